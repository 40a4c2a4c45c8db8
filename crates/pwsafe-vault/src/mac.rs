//! Running HMAC-SHA256 over decoded field values.
//!
//! Only the plaintext field *values* are authenticated, in stream order:
//! header fields, the (empty) end-of-header sentinel, then each record's
//! fields followed by its (empty) sentinel. Lengths, types and padding are
//! covered indirectly through the CBC chain.

use ring::hmac;
use subtle::ConstantTimeEq;

/// Length of the trailing integrity tag.
pub const TAG_LEN: usize = 32;

/// Keyed digest accumulator for one container pass.
pub struct IntegrityMac {
    ctx: hmac::Context,
}

impl IntegrityMac {
    /// Start a new digest keyed with the MAC key L.
    pub fn new(key: &[u8]) -> Self {
        let key = hmac::Key::new(hmac::HMAC_SHA256, key);
        Self {
            ctx: hmac::Context::with_key(&key),
        }
    }

    pub fn update(&mut self, value: &[u8]) {
        self.ctx.update(value);
    }

    /// Finish and return the tag to append to a container.
    pub fn finish(self) -> [u8; TAG_LEN] {
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(self.ctx.sign().as_ref());
        tag
    }

    /// Finish and compare against the tag read from a container.
    pub fn verify(self, expected: &[u8; TAG_LEN]) -> bool {
        self.finish()[..].ct_eq(&expected[..]).into()
    }
}
