//! Twofish in the two block modes used by the V3 container.
//!
//! - [`SingleBlock`]: unchained (ECB) single-block encrypt/decrypt, used
//!   only to wrap and unwrap the data and MAC keys.
//! - [`ChainedStream`]: CBC seeded with the container IV. One instance lives
//!   for a whole container pass so the chain state carries across fields.
//!
//! Neither mode pads. Callers hand in whole 16-byte blocks.

use twofish::Twofish;
use twofish::cipher::generic_array::GenericArray;
use twofish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::error::{Result, VaultError};

/// Twofish block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// One physical cipher block.
pub type Block = [u8; BLOCK_LEN];

fn twofish(key: &[u8]) -> Result<Twofish> {
    Twofish::new_from_slice(key)
        .map_err(|_| VaultError::format(format!("invalid Twofish key length {}", key.len())))
}

fn check_whole_blocks(data: &[u8]) -> Result<()> {
    if data.len() % BLOCK_LEN != 0 {
        return Err(VaultError::format(format!(
            "cipher input of {} bytes is not a whole number of blocks",
            data.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unchained mode
// ---------------------------------------------------------------------------

/// Independent per-block Twofish, no IV.
pub struct SingleBlock {
    cipher: Twofish,
}

impl SingleBlock {
    pub fn new(key: &[u8]) -> Result<Self> {
        Ok(Self {
            cipher: twofish(key)?,
        })
    }

    pub fn encrypt(&self, block: &Block) -> Block {
        let mut out = *block;
        self.cipher.encrypt_block(GenericArray::from_mut_slice(&mut out));
        out
    }

    pub fn decrypt(&self, block: &Block) -> Block {
        let mut out = *block;
        self.cipher.decrypt_block(GenericArray::from_mut_slice(&mut out));
        out
    }
}

// ---------------------------------------------------------------------------
// Chained mode
// ---------------------------------------------------------------------------

/// Twofish-CBC with a running chain value.
///
/// A stream is used either for encryption or for decryption during one
/// container pass, never both.
pub struct ChainedStream {
    cipher: Twofish,
    chain: Block,
}

impl ChainedStream {
    pub fn new(key: &[u8], iv: &Block) -> Result<Self> {
        Ok(Self {
            cipher: twofish(key)?,
            chain: *iv,
        })
    }

    /// Encrypt `data` in place. `data` must be a multiple of [`BLOCK_LEN`].
    pub fn encrypt(&mut self, data: &mut [u8]) -> Result<()> {
        check_whole_blocks(data)?;
        for chunk in data.chunks_exact_mut(BLOCK_LEN) {
            for (byte, prev) in chunk.iter_mut().zip(self.chain.iter()) {
                *byte ^= prev;
            }
            self.cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
            self.chain.copy_from_slice(chunk);
        }
        Ok(())
    }

    /// Decrypt `data` in place. `data` must be a multiple of [`BLOCK_LEN`].
    pub fn decrypt(&mut self, data: &mut [u8]) -> Result<()> {
        check_whole_blocks(data)?;
        for chunk in data.chunks_exact_mut(BLOCK_LEN) {
            let mut ciphertext = [0u8; BLOCK_LEN];
            ciphertext.copy_from_slice(chunk);
            self.cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
            for (byte, prev) in chunk.iter_mut().zip(self.chain.iter()) {
                *byte ^= prev;
            }
            self.chain = ciphertext;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
