use thiserror::Error;

/// A consistency rule breach found while replaying.
///
/// Violations are collected and returned next to the reconstructed state;
/// they never abort a replay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Consistency violation at step {step} [{rule}]: {message}")]
pub struct Violation {
    pub step: u64,
    pub rule: String,
    pub message: String,
}

/// A single transition check over `(prev, event, next)`
pub trait ConsistencyRule<S, E>: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a message describing the breach, if any
    fn check(&self, prev: &S, event: &E, next: &S) -> Option<String>;
}

/// Adapts a closure into a named rule
pub struct FnRule<F> {
    name: String,
    check: F,
}

impl<F> FnRule<F> {
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self { name: name.into(), check }
    }
}

impl<S, E, F> ConsistencyRule<S, E> for FnRule<F>
where
    F: Fn(&S, &E, &S) -> Option<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, prev: &S, event: &E, next: &S) -> Option<String> {
        (self.check)(prev, event, next)
    }
}

/// Ordered set of rules applied to every replayed transition
pub struct Verifier<S, E> {
    rules: Vec<Box<dyn ConsistencyRule<S, E>>>,
}

impl<S, E> Default for Verifier<S, E> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<S, E> Verifier<S, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: impl ConsistencyRule<S, E> + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn add_rule(&mut self, rule: Box<dyn ConsistencyRule<S, E>>) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize { self.rules.len() }
    pub fn is_empty(&self) -> bool { self.rules.is_empty() }

    /// Every rule's verdict on one transition, in rule order
    pub fn check(&self, step: u64, prev: &S, event: &E, next: &S) -> Vec<Violation> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.check(prev, event, next).map(|message| Violation {
                    step,
                    rule: rule.name().to_string(),
                    message,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_report_in_order() {
        let verifier = Verifier::<i32, i32>::new()
            .with_rule(FnRule::new("non_negative", |_: &i32, _: &i32, next: &i32| {
                (*next < 0).then(|| format!("value went negative: {next}"))
            }))
            .with_rule(FnRule::new("small_steps", |prev: &i32, _: &i32, next: &i32| {
                ((next - prev).abs() > 5).then(|| "jump too large".to_string())
            }));

        assert!(verifier.check(0, &1, &1, &2).is_empty());

        let found = verifier.check(4, &3, &-10, &-7);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].rule, "non_negative");
        assert_eq!(found[1].rule, "small_steps");
        assert_eq!(found[0].step, 4);
        assert!(found[0].to_string().contains("step 4"));
    }
}
