//! TLV framing of fields over the CBC block stream.
//!
//! A field in plaintext is `length (u32 LE) ‖ type (u8) ‖ value`, padded
//! with random bytes to a multiple of 16 and then encrypted. The first block
//! therefore carries the length, the type and up to 11 value bytes; a value
//! of `length` bytes needs `(length + 4) / 16` further blocks.
//!
//! The end of the field stream is marked by the 16-byte literal
//! [`EOF_MARKER`], written *unencrypted*, so it is recognised on the raw
//! ciphertext before any decryption.

use std::io::{Read, Write};

use zeroize::{Zeroize, Zeroizing};

use crate::cipher::{BLOCK_LEN, Block, ChainedStream};
use crate::entropy::EntropySource;
use crate::error::{Result, VaultError};
use crate::record::Field;

/// Unencrypted end-of-stream marker.
pub const EOF_MARKER: &[u8; BLOCK_LEN] = b"PWS3-EOFPWS3-EOF";

/// Largest field value the reader accepts. Anything longer is treated as
/// corruption rather than read.
pub const MAX_FIELD_LEN: usize = 1024;

/// Bytes of length prefix plus type code in the first block.
const PREFIX_LEN: usize = 5;

/// Value bytes carried by the first block.
const FIRST_CHUNK_LEN: usize = BLOCK_LEN - PREFIX_LEN;

/// Read exactly one block, reporting a short read as a truncated container.
pub(crate) fn read_block<R: Read>(reader: &mut R, block: &mut Block, what: &str) -> Result<()> {
    reader
        .read_exact(block)
        .map_err(|e| VaultError::from_read(e, what))
}

/// Decode the next field, or `None` at the end-of-stream marker.
///
/// # Errors
///
/// [`VaultError::Format`] if the stream ends mid-field or the declared
/// length exceeds [`MAX_FIELD_LEN`]. The length check happens before any
/// continuation block is read.
pub fn decode_field<R: Read>(reader: &mut R, cipher: &mut ChainedStream) -> Result<Option<Field>> {
    let mut block = [0u8; BLOCK_LEN];
    read_block(reader, &mut block, "field")?;
    if &block == EOF_MARKER {
        return Ok(None);
    }

    cipher.decrypt(&mut block)?;
    let length = u32::from_le_bytes([block[0], block[1], block[2], block[3]]) as usize;
    let field_type = block[4];

    if length > MAX_FIELD_LEN {
        block.zeroize();
        return Err(VaultError::format(format!(
            "field length {length} exceeds limit of {MAX_FIELD_LEN} bytes"
        )));
    }

    let extra_blocks = if length > FIRST_CHUNK_LEN {
        (length + 4) / BLOCK_LEN
    } else {
        0
    };

    let mut value = Vec::with_capacity(FIRST_CHUNK_LEN + extra_blocks * BLOCK_LEN);
    value.extend_from_slice(&block[PREFIX_LEN..]);
    block.zeroize();

    for _ in 0..extra_blocks {
        if let Err(err) = read_block(reader, &mut block, "field continuation")
            .and_then(|()| cipher.decrypt(&mut block))
        {
            value.zeroize();
            return Err(err);
        }
        value.extend_from_slice(&block);
        block.zeroize();
    }

    value[length..].zeroize();
    value.truncate(length);

    tracing::trace!(field_type, length, "decoded field");
    Ok(Some(Field::new(field_type, value)))
}

/// Encode one field, or the end-of-stream marker for `None`.
///
/// Padding comes from `entropy`.
///
/// # Errors
///
/// [`VaultError::Format`] if the value is longer than [`MAX_FIELD_LEN`]
/// (the reader would reject it), [`VaultError::Entropy`] if padding cannot
/// be generated, [`VaultError::Io`] on write failure.
pub fn encode_field<W: Write>(
    writer: &mut W,
    cipher: &mut ChainedStream,
    field: Option<&Field>,
    entropy: &dyn EntropySource,
) -> Result<()> {
    let Some(field) = field else {
        writer.write_all(EOF_MARKER)?;
        return Ok(());
    };

    if field.len() > MAX_FIELD_LEN {
        return Err(VaultError::format(format!(
            "field 0x{:02x} is {} bytes, limit is {MAX_FIELD_LEN}",
            field.field_type(),
            field.len()
        )));
    }

    let unpadded = PREFIX_LEN + field.len();
    let padded = unpadded.div_ceil(BLOCK_LEN) * BLOCK_LEN;

    let mut data = Zeroizing::new(Vec::with_capacity(padded));
    data.extend_from_slice(&(field.len() as u32).to_le_bytes());
    data.push(field.field_type());
    data.extend_from_slice(field.value());
    data.resize(padded, 0);
    entropy.fill(&mut data[unpadded..])?;

    cipher.encrypt(&mut data)?;
    writer.write_all(&data)?;

    tracing::trace!(
        field_type = field.field_type(),
        length = field.len(),
        blocks = padded / BLOCK_LEN,
        "encoded field"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
