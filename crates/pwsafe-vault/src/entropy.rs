//! Injected randomness for padding and new-container key material.
//!
//! Every random byte the codec consumes comes from a single
//! [`EntropySource`]. Implementations must be cryptographically secure and
//! must return [`VaultError::Entropy`] when they cannot deliver; an
//! implementation must never substitute a weaker generator.

use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, VaultError};

/// A source of cryptographically secure random bytes.
pub trait EntropySource {
    /// Fill `dest` completely with random bytes, or fail.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;
}

/// The operating system CSPRNG, via `ring`.
#[derive(Debug)]
pub struct SystemEntropy {
    rng: SystemRandom,
}

impl SystemEntropy {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for SystemEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for SystemEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        self.rng.fill(dest).map_err(|_| VaultError::Entropy {
            reason: "system CSPRNG unavailable".into(),
        })
    }
}

/// Draw a fixed-size array from `entropy`.
pub(crate) fn random_array<const N: usize>(entropy: &dyn EntropySource) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    entropy.fill(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl EntropySource for Broken {
        fn fill(&self, _dest: &mut [u8]) -> Result<()> {
            Err(VaultError::Entropy {
                reason: "unplugged".into(),
            })
        }
    }

    #[test]
    fn system_entropy_fills_buffer() {
        let a: [u8; 32] = random_array(&SystemEntropy::new()).unwrap();
        let b: [u8; 32] = random_array(&SystemEntropy::new()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn failing_source_propagates() {
        let result: Result<[u8; 16]> = random_array(&Broken);
        assert!(matches!(result, Err(VaultError::Entropy { .. })));
    }
}
