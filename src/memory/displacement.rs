use super::location::{apply_displacement, Displacement, GridSize, Location, Token};
use crate::error::ConfigError;
use crate::hash::{hash32, hash_combine};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// How a step's displacement is derived from the token stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DisplacementMethod {
    /// MurmurHash3 fold over the recent context
    Hash,
}

impl FromStr for DisplacementMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hash" => Ok(DisplacementMethod::Hash),
            other => Err(ConfigError::UnsupportedDisplacementMethod(other.to_string())),
        }
    }
}

impl TryFrom<String> for DisplacementMethod {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DisplacementMethod> for String {
    fn from(method: DisplacementMethod) -> Self {
        method.to_string()
    }
}

impl fmt::Display for DisplacementMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplacementMethod::Hash => f.write_str("hash"),
        }
    }
}

/// Configuration for the displacement encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplacementConfig {
    pub method: DisplacementMethod,
    /// Number of most recent tokens folded into each step
    pub context_length: usize,
    /// Each component of a step lies in `[-max_step, max_step]`
    pub max_step: u32,
    pub seed: u32,
    /// Force a unit cardinal step instead of standing still
    pub avoid_zero_step: bool,
}

impl Default for DisplacementConfig {
    fn default() -> Self {
        Self {
            method: DisplacementMethod::Hash,
            context_length: 3,
            max_step: 3,
            seed: 0,
            avoid_zero_step: true,
        }
    }
}

impl DisplacementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context_length == 0 {
            return Err(ConfigError::Invalid("context_length must be at least 1".into()));
        }
        if self.max_step > 0x7FFF {
            return Err(ConfigError::Invalid(format!("max_step {} is too large", self.max_step)));
        }
        Ok(())
    }
}

/// Deterministic map from recent tokens to a 2D step.
///
/// Identical seeds and token sequences always produce identical
/// displacements; every stored location depends on this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplacementEncoder {
    config: DisplacementConfig,
    buffer: VecDeque<Token>,
}

impl DisplacementEncoder {
    pub fn new(config: DisplacementConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let buffer = VecDeque::with_capacity(config.context_length);
        Ok(Self { config, buffer })
    }

    pub fn config(&self) -> &DisplacementConfig { &self.config }

    /// Tokens currently held in the sliding context, oldest first
    pub fn buffer(&self) -> Vec<Token> {
        self.buffer.iter().copied().collect()
    }

    /// Displacement for the last `context_length` tokens of `window`
    pub fn encode(&self, window: &[Token]) -> Displacement {
        let start = window.len().saturating_sub(self.config.context_length);
        let folded = hash_combine(&window[start..], self.config.seed);
        self.derive(hash32(folded, self.config.seed))
    }

    /// Pushes a token into the context and encodes the result
    pub fn step(&mut self, token: Token) -> Displacement {
        if self.buffer.len() == self.config.context_length {
            self.buffer.pop_front();
        }
        self.buffer.push_back(token);
        let folded = self
            .buffer
            .iter()
            .fold(self.config.seed, |h, &t| hash32(t, h));
        self.derive(hash32(folded, self.config.seed))
    }

    /// Replaces the context, keeping only the newest `context_length` tokens
    pub fn restore_buffer(&mut self, tokens: &[Token]) {
        let start = tokens.len().saturating_sub(self.config.context_length);
        self.buffer = tokens[start..].iter().copied().collect();
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn apply(location: Location, displacement: Displacement, size: GridSize) -> Location {
        apply_displacement(location, displacement, size)
    }

    fn derive(&self, h: u32) -> Displacement {
        let max_step = self.config.max_step;
        let range = 2 * max_step + 1;
        let dx = (h % range) as i32 - max_step as i32;
        let dy = ((h >> 16) % range) as i32 - max_step as i32;

        if self.config.avoid_zero_step && dx == 0 && dy == 0 {
            return match (h >> 24) & 0b11 {
                0 => Displacement::new(1, 0),
                1 => Displacement::new(-1, 0),
                2 => Displacement::new(0, 1),
                _ => Displacement::new(0, -1),
            };
        }
        Displacement::new(dx, dy)
    }
}
