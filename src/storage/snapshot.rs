//! Snapshot persistence: bincode payload, optional LZ4 compression, CRC32 frame.
//!
//! Frame layout: `MAGIC (4) | algorithm (1) | crc32 of body (4, LE) | body`.

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"TMS1";
const HEADER_LEN: usize = 9;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("LZ4 decompression error: {0}")]
    Decompression(String),
    #[error("Invalid checksum: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch { expected: u32, found: u32 },
    #[error("Not a snapshot frame")]
    BadHeader,
    #[error("Unknown compression tag {0}")]
    UnknownCompression(u8),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    None,
    #[default]
    LZ4,
}

impl CompressionAlgorithm {
    fn tag(self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::LZ4 => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, PersistError> {
        match tag {
            0 => Ok(CompressionAlgorithm::None),
            1 => Ok(CompressionAlgorithm::LZ4),
            other => Err(PersistError::UnknownCompression(other)),
        }
    }
}

/// Sizes recorded while encoding a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    pub original_size: usize,
    pub compressed_size: usize,
    pub algorithm: CompressionAlgorithm,
}

impl SnapshotMetrics {
    pub fn compression_ratio(&self) -> f32 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.compressed_size as f32 / self.original_size as f32
    }
}

/// Serializes `value` into a checksummed frame
pub fn encode<T: Serialize>(value: &T, algorithm: CompressionAlgorithm) -> Result<(Vec<u8>, SnapshotMetrics), PersistError> {
    let raw = bincode::serialize(value)?;
    let body = match algorithm {
        CompressionAlgorithm::None => raw.clone(),
        CompressionAlgorithm::LZ4 => compress_prepend_size(&raw),
    };
    let checksum = crc32fast::hash(&body);

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(MAGIC);
    frame.push(algorithm.tag());
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame.extend_from_slice(&body);

    let metrics = SnapshotMetrics {
        original_size: raw.len(),
        compressed_size: body.len(),
        algorithm,
    };
    Ok((frame, metrics))
}

/// Verifies and deserializes a frame produced by [`encode`]
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, PersistError> {
    if frame.len() < HEADER_LEN || &frame[..4] != MAGIC {
        return Err(PersistError::BadHeader);
    }
    let algorithm = CompressionAlgorithm::from_tag(frame[4])?;
    let expected = u32::from_le_bytes([frame[5], frame[6], frame[7], frame[8]]);
    let body = &frame[HEADER_LEN..];
    let found = crc32fast::hash(body);
    if found != expected {
        return Err(PersistError::ChecksumMismatch { expected, found });
    }

    let raw = match algorithm {
        CompressionAlgorithm::None => body.to_vec(),
        CompressionAlgorithm::LZ4 => decompress_size_prepended(body)
            .map_err(|e| PersistError::Decompression(e.to_string()))?,
    };
    Ok(bincode::deserialize(&raw)?)
}

pub fn write_to<W: Write, T: Serialize>(
    writer: &mut W,
    value: &T,
    algorithm: CompressionAlgorithm,
) -> Result<SnapshotMetrics, PersistError> {
    let (frame, metrics) = encode(value, algorithm)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(metrics)
}

pub fn read_from<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, PersistError> {
    let mut frame = Vec::new();
    reader.read_to_end(&mut frame)?;
    decode(&frame)
}
