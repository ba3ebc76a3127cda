use crate::Generator;
use burrow_core::ShortCode;
use std::sync::atomic::{AtomicU64, Ordering};

/// A sequential short code generator.
///
/// Produces codes like "seq000000", "seq000001", ... and never repeats
/// within one instance. Useful where deterministic codes matter, such as
/// tests and fixtures.
#[derive(Debug)]
pub struct SeqGenerator {
    counter: AtomicU64,
    prefix: String,
}

impl Clone for SeqGenerator {
    fn clone(&self) -> Self {
        Self {
            counter: AtomicU64::new(self.counter.load(Ordering::SeqCst)),
            prefix: self.prefix.clone(),
        }
    }
}

impl SeqGenerator {
    /// Creates a generator with a custom prefix.
    ///
    /// The prefix should be alphanumeric so generated codes stay valid.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_offset(prefix, 0)
    }

    /// Creates a generator starting from a specific counter value.
    pub fn with_offset(prefix: impl Into<String>, offset: u64) -> Self {
        Self {
            counter: AtomicU64::new(offset),
            prefix: prefix.into(),
        }
    }
}

impl Generator for SeqGenerator {
    type Output = ShortCode;

    fn generate(&self) -> Self::Output {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        ShortCode::new_unchecked(format!("{}{:06}", self.prefix, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_sequential_codes() {
        let generator = SeqGenerator::with_prefix("bw");

        assert_eq!(generator.generate().as_str(), "bw000000");
        assert_eq!(generator.generate().as_str(), "bw000001");
        assert_eq!(generator.generate().as_str(), "bw000002");
    }

    #[test]
    fn starts_from_offset() {
        let generator = SeqGenerator::with_offset("bw", 1000);

        assert_eq!(generator.generate().as_str(), "bw001000");
        assert_eq!(generator.generate().as_str(), "bw001001");
    }

    #[test]
    fn clone_preserves_counter_state() {
        let generator = SeqGenerator::with_prefix("bw");
        generator.generate();
        generator.generate();

        let cloned = generator.clone();

        assert_eq!(generator.generate().as_str(), "bw000002");
        assert_eq!(cloned.generate().as_str(), "bw000002");
    }
}
