//! Password stretching and key wrapping.
//!
//! The V3 key schedule is:
//!
//! 1. `P' = SHA-256(password ‖ salt)`, then `iterations` more rounds of
//!    `P' = SHA-256(P')`. The total of `iterations + 1` hashes is part of the
//!    file format; one round more or less produces a different key.
//! 2. `SHA-256(P')` is stored in the file as the password check.
//! 3. `P'` keys single-block Twofish, which unwraps B1..B4 into the data
//!    key `K = D(B1) ‖ D(B2)` and the MAC key `L = D(B3) ‖ D(B4)`.
//!
//! All derived material is returned in [`Zeroizing`] buffers.

use ring::digest::{self, SHA256, SHA256_OUTPUT_LEN};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::cipher::{BLOCK_LEN, Block, SingleBlock};
use crate::error::Result;

/// Length of the stretched password and of K and L.
pub const KEY_LEN: usize = SHA256_OUTPUT_LEN;

/// Length of the stored salt.
pub const SALT_LEN: usize = 32;

/// A 256-bit key held in memory that is wiped on drop.
pub type Key = Zeroizing<[u8; KEY_LEN]>;

/// The four wrapped key blocks B1..B4.
pub type WrappedKeys = [Block; 4];

/// Stretch `password` with `salt` through `iterations + 1` SHA-256 rounds.
pub fn stretch(password: &[u8], salt: &[u8; SALT_LEN], iterations: u32) -> Key {
    let mut ctx = digest::Context::new(&SHA256);
    ctx.update(password);
    ctx.update(salt);

    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    out.copy_from_slice(ctx.finish().as_ref());
    for _ in 0..iterations {
        let next = digest::digest(&SHA256, &out[..]);
        out.copy_from_slice(next.as_ref());
    }
    out
}

/// The password check hash stored in the container: `SHA-256(stretched)`.
pub fn password_check(stretched: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(digest::digest(&SHA256, stretched).as_ref());
    out
}

/// Compare `SHA-256(stretched)` against the stored check hash in constant time.
pub fn verify(stretched: &[u8; KEY_LEN], stored_check: &[u8; KEY_LEN]) -> bool {
    password_check(stretched)[..].ct_eq(&stored_check[..]).into()
}

/// Unwrap the data key K and MAC key L from B1..B4.
pub fn unwrap_keys(stretched: &[u8; KEY_LEN], wrapped: &WrappedKeys) -> Result<(Key, Key)> {
    let ecb = SingleBlock::new(stretched)?;
    let mut k = Zeroizing::new([0u8; KEY_LEN]);
    let mut l = Zeroizing::new([0u8; KEY_LEN]);

    k[..BLOCK_LEN].copy_from_slice(&ecb.decrypt(&wrapped[0]));
    k[BLOCK_LEN..].copy_from_slice(&ecb.decrypt(&wrapped[1]));
    l[..BLOCK_LEN].copy_from_slice(&ecb.decrypt(&wrapped[2]));
    l[BLOCK_LEN..].copy_from_slice(&ecb.decrypt(&wrapped[3]));

    Ok((k, l))
}

/// Wrap K and L into B1..B4. Inverse of [`unwrap_keys`].
pub fn wrap_keys(
    stretched: &[u8; KEY_LEN],
    k: &[u8; KEY_LEN],
    l: &[u8; KEY_LEN],
) -> Result<WrappedKeys> {
    let ecb = SingleBlock::new(stretched)?;
    let halves = [&k[..BLOCK_LEN], &k[BLOCK_LEN..], &l[..BLOCK_LEN], &l[BLOCK_LEN..]];

    let mut wrapped = [[0u8; BLOCK_LEN]; 4];
    for (out, half) in wrapped.iter_mut().zip(halves) {
        let mut block = [0u8; BLOCK_LEN];
        block.copy_from_slice(half);
        *out = ecb.encrypt(&block);
    }
    Ok(wrapped)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
