use crate::Generator;
use burrow_core::ShortCode;
use rand::Rng;

/// Symbols a generated code is drawn from.
pub const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Length of every generated code.
pub const CODE_LENGTH: usize = 8;

/// Draws each position independently and uniformly from [`ALPHABET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomGenerator;

impl RandomGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Generator for RandomGenerator {
    type Output = ShortCode;

    fn generate(&self) -> Self::Output {
        let mut rng = rand::rng();
        let code: String = (0..CODE_LENGTH)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        ShortCode::new_unchecked(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_have_fixed_length_and_alphabet() {
        let generator = RandomGenerator::new();
        for _ in 0..10_000 {
            let code = generator.generate();
            assert_eq!(code.as_str().len(), CODE_LENGTH, "wrong length: {}", code);
            assert!(
                code.as_str().bytes().all(|b| ALPHABET.contains(&b)),
                "symbol outside alphabet in {}",
                code
            );
        }
    }

    #[test]
    fn generated_codes_pass_validation() {
        let code = RandomGenerator::new().generate();
        assert!(ShortCode::new(code.as_str()).is_ok());
    }

    #[test]
    fn every_symbol_shows_up() {
        let generator = RandomGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..5_000 {
            seen.extend(generator.generate().as_str().bytes());
        }
        assert_eq!(seen.len(), ALPHABET.len());
    }

    #[test]
    fn generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RandomGenerator>();
    }
}
