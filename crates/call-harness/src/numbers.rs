//! Fake phone numbers
//!
//! Dummy numbers have the form `<prefix>YXXX`: `Y` is `1` for video calls and
//! `0` for audio calls, `XXX` is a zero-padded random number below 999.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errors::Result;
use crate::types::PhoneNumber;

#[derive(Debug)]
pub struct NumberGenerator {
    prefix: String,
    rng: StdRng,
}

impl NumberGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence for tests
    pub fn seeded(prefix: impl Into<String>, seed: u64) -> Self {
        Self {
            prefix: prefix.into(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn dummy_number(&mut self, is_video: bool) -> Result<PhoneNumber> {
        let video_digit = if is_video { 1 } else { 0 };
        let number: u32 = self.rng.gen_range(0..999);
        PhoneNumber::parse(&format!("{}{}{:03}", self.prefix, video_digit, number))
    }

    /// Whether the harness places this outgoing number itself
    pub fn is_test_number(&self, number: &PhoneNumber) -> bool {
        number.number().starts_with(&self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_number_format() {
        let mut numbers = NumberGenerator::seeded("555", 7);
        for _ in 0..200 {
            let audio = numbers.dummy_number(false).unwrap();
            let digits = audio.number();
            assert_eq!(digits.len(), 7);
            assert!(digits.starts_with("5550"));

            let video = numbers.dummy_number(true).unwrap();
            assert!(video.number().starts_with("5551"));
            let tail: u32 = video.number()[4..].parse().unwrap();
            assert!(tail < 999);
        }
    }

    #[test]
    fn test_seeded_is_repeatable() {
        let mut a = NumberGenerator::seeded("555", 42);
        let mut b = NumberGenerator::seeded("555", 42);
        assert_eq!(a.dummy_number(false).unwrap(), b.dummy_number(false).unwrap());
    }

    #[test]
    fn test_is_test_number() {
        let numbers = NumberGenerator::new("555");
        assert!(numbers.is_test_number(&PhoneNumber::parse("5551212").unwrap()));
        assert!(!numbers.is_test_number(&PhoneNumber::parse("6505551212").unwrap()));
    }
}
