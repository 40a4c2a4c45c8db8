//! The V3 container: load, save and create.
//!
//! A [`Vault`] holds the key envelope read from (or generated for) a file
//! together with the decoded header and records. Loading walks an explicit
//! sequence of phases; any failure aborts the whole load and
//! nothing partially decoded is returned.
//!
//! # On-disk layout
//!
//! ```text
//! [  4 bytes: "PWS3"]
//! [ 32 bytes: salt]
//! [  4 bytes: iteration count, u32 LE]
//! [ 32 bytes: SHA-256 of the stretched password]
//! [4 x 16 bytes: B1..B4, wrapped K and L]
//! [ 16 bytes: CBC IV]
//! [ ... CBC field stream: header fields, 0xFF, {record fields, 0xFF}* ]
//! [ 16 bytes: "PWS3-EOFPWS3-EOF", unencrypted]
//! [ 32 bytes: HMAC-SHA256 over field values]
//! ```
//!
//! # Saving
//!
//! [`Vault::write`] writes to a uniquely named temporary file next to the
//! destination, reads it back with the same password, and only then renames
//! it over the destination. A failure at any step leaves the destination
//! untouched.
//!
//! Saving an existing vault reuses its salt, wrapped keys and IV. Only
//! [`Vault::create`] generates fresh ones.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use zeroize::Zeroizing;

use crate::cipher::{Block, ChainedStream};
use crate::entropy::{EntropySource, SystemEntropy, random_array};
use crate::error::{Result, VaultError};
use crate::field::{decode_field, encode_field, read_block};
use crate::kdf::{self, KEY_LEN, SALT_LEN, WrappedKeys};
use crate::mac::{IntegrityMac, TAG_LEN};
use crate::record::{FORMAT_VERSION, Field, Header, Record};

/// Magic tag at the start of every V3 container.
pub const MAGIC: &[u8; 4] = b"PWS3";

/// Stretching rounds used for new containers unless overridden.
pub const DEFAULT_ITERATIONS: u32 = 2048;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Parameters for [`Vault::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// Extra SHA-256 rounds applied when stretching the password. Must be at
    /// least 1.
    pub iterations: u32,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

// ---------------------------------------------------------------------------
// Load phases
// ---------------------------------------------------------------------------

/// Progress of a container load, logged when a load fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadPhase {
    Start,
    TagCheck,
    PasswordVerify,
    KeyUnwrap,
    HeaderFields,
    RecordFields,
    TagVerify,
    Loaded,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// An in-memory Password Safe V3 container.
#[derive(Debug, Clone)]
pub struct Vault {
    salt: [u8; SALT_LEN],
    iterations: u32,
    password_check: [u8; KEY_LEN],
    wrapped_keys: WrappedKeys,
    iv: Block,
    header: Header,
    records: Vec<Record>,
    mac_tag: [u8; TAG_LEN],
}

impl Vault {
    /// Create a brand-new, empty container protected by `password`.
    ///
    /// Salt, data key, MAC key and IV are drawn from `entropy`. The header
    /// gets the format version field.
    ///
    /// # Errors
    ///
    /// [`VaultError::Format`] if `options.iterations` is zero,
    /// [`VaultError::Entropy`] if `entropy` fails.
    pub fn create(
        password: &[u8],
        options: &CreateOptions,
        entropy: &dyn EntropySource,
    ) -> Result<Self> {
        if options.iterations == 0 {
            return Err(VaultError::format("iteration count must be at least 1"));
        }

        let salt: [u8; SALT_LEN] = random_array(entropy)?;
        let stretched = kdf::stretch(password, &salt, options.iterations);
        let k = Zeroizing::new(random_array::<KEY_LEN>(entropy)?);
        let l = Zeroizing::new(random_array::<KEY_LEN>(entropy)?);
        let wrapped_keys = kdf::wrap_keys(&stretched, &k, &l)?;
        let iv: Block = random_array(entropy)?;

        let mut header = Header::new();
        header.set_version(FORMAT_VERSION);

        tracing::debug!(iterations = options.iterations, "created new vault");

        Ok(Self {
            salt,
            iterations: options.iterations,
            password_check: kdf::password_check(&stretched),
            wrapped_keys,
            iv,
            header,
            records: Vec::new(),
            mac_tag: [0u8; TAG_LEN],
        })
    }

    /// Load the container stored at `path`.
    ///
    /// # Errors
    ///
    /// [`VaultError::Version`] if the file is not a V3 container,
    /// [`VaultError::BadPassword`] if `password` is wrong,
    /// [`VaultError::Format`] if the file is truncated, malformed or fails
    /// its integrity check, [`VaultError::Io`] if the file cannot be read.
    pub fn read(path: impl AsRef<Path>, password: &[u8]) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening vault");

        let file = File::open(path)?;
        let vault = Self::read_from(BufReader::new(file), password)?;

        tracing::info!(
            path = %path.display(),
            records = vault.records.len(),
            "vault loaded"
        );
        Ok(vault)
    }

    /// Load a container from any byte source. See [`Vault::read`].
    pub fn read_from<R: Read>(reader: R, password: &[u8]) -> Result<Self> {
        let mut loader = Loader {
            phase: LoadPhase::Start,
        };
        loader.run(reader, password).inspect_err(|err| {
            tracing::warn!(phase = ?loader.phase, error = %err, "vault load failed");
        })
    }

    /// Save to `destination` with `password`, using the system CSPRNG for
    /// block padding.
    ///
    /// # Errors
    ///
    /// [`VaultError::Format`] if the written container fails to read back,
    /// or any error from encoding and I/O. In every error case the
    /// destination file is left as it was.
    pub fn write(&mut self, destination: impl AsRef<Path>, password: &[u8]) -> Result<()> {
        self.write_with(destination, password, &SystemEntropy::new())
    }

    /// Like [`Vault::write`], with an explicit randomness source.
    pub fn write_with(
        &mut self,
        destination: impl AsRef<Path>,
        password: &[u8],
        entropy: &dyn EntropySource,
    ) -> Result<()> {
        self.commit(destination.as_ref(), password, entropy, |_| Ok(()))
    }

    /// Serialize the container to `writer`.
    ///
    /// The stored password check and integrity tag are updated only once the
    /// whole container has been written.
    pub fn write_to<W: Write>(
        &mut self,
        writer: &mut W,
        password: &[u8],
        entropy: &dyn EntropySource,
    ) -> Result<()> {
        let (password_check, mac_tag) = self.serialize(writer, password, entropy)?;
        self.password_check = password_check;
        self.mac_tag = mac_tag;
        Ok(())
    }

    /// Write the full container and return the check hash and tag it carries.
    /// Leaves `self` untouched.
    fn serialize<W: Write>(
        &self,
        writer: &mut W,
        password: &[u8],
        entropy: &dyn EntropySource,
    ) -> Result<([u8; KEY_LEN], [u8; TAG_LEN])> {
        let stretched = kdf::stretch(password, &self.salt, self.iterations);
        let password_check = kdf::password_check(&stretched);

        writer.write_all(MAGIC)?;
        writer.write_all(&self.salt)?;
        writer.write_all(&self.iterations.to_le_bytes())?;
        writer.write_all(&password_check)?;
        for block in &self.wrapped_keys {
            writer.write_all(block)?;
        }
        writer.write_all(&self.iv)?;

        let (k, l) = kdf::unwrap_keys(&stretched, &self.wrapped_keys)?;
        let mut cipher = ChainedStream::new(&k[..], &self.iv)?;
        let mut mac = IntegrityMac::new(&l[..]);
        let end = Field::end_of_entry();

        for field in self.header.fields().iter() {
            encode_field(writer, &mut cipher, Some(field), entropy)?;
            mac.update(field.value());
        }
        encode_field(writer, &mut cipher, Some(&end), entropy)?;
        mac.update(end.value());

        for record in &self.records {
            for field in record.fields().iter() {
                encode_field(writer, &mut cipher, Some(field), entropy)?;
                mac.update(field.value());
            }
            encode_field(writer, &mut cipher, Some(&end), entropy)?;
            mac.update(end.value());
        }

        encode_field(writer, &mut cipher, None, entropy)?;

        let mac_tag = mac.finish();
        writer.write_all(&mac_tag)?;

        tracing::debug!(
            header_fields = self.header.fields().len(),
            records = self.records.len(),
            "vault serialized"
        );
        Ok((password_check, mac_tag))
    }

    /// Write to a temporary file, run `before_verify` on it, read it back and
    /// move it into place.
    pub(crate) fn commit<F>(
        &mut self,
        destination: &Path,
        password: &[u8],
        entropy: &dyn EntropySource,
        before_verify: F,
    ) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        tracing::info!(path = %destination.display(), "saving vault");

        let file_name = destination.file_name().ok_or_else(|| {
            VaultError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no file name", destination.display()),
            ))
        })?;
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Same directory as the destination, so the final rename stays on one
        // filesystem. Dropping `tmp` on any early return deletes it.
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{}.", file_name.to_string_lossy()))
            .suffix(".part")
            .tempfile_in(dir)?;

        let (password_check, mac_tag) = {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            let written = self.serialize(&mut writer, password, entropy)?;
            writer.flush()?;
            written
        };
        tmp.as_file().sync_all()?;

        before_verify(tmp.path())?;

        if let Err(err) = self.verify_written(tmp.path(), password) {
            tracing::warn!(
                path = %destination.display(),
                error = %err,
                "written vault failed verification, keeping existing file"
            );
            if let Err(close_err) = tmp.close() {
                tracing::warn!(error = %close_err, "could not remove temporary file");
            }
            return Err(VaultError::format(format!(
                "written container failed verification: {err}"
            )));
        }

        tmp.persist(destination).map_err(|e| VaultError::Io(e.error))?;
        self.password_check = password_check;
        self.mac_tag = mac_tag;

        tracing::info!(
            path = %destination.display(),
            records = self.records.len(),
            "vault saved"
        );
        Ok(())
    }

    /// Read back a freshly written file and check it matches this vault.
    fn verify_written(&self, path: &Path, password: &[u8]) -> Result<()> {
        let reread = Self::read_from(BufReader::new(File::open(path)?), password)?;
        if reread.header != self.header || reread.records != self.records {
            return Err(VaultError::format("read-back content differs"));
        }
        Ok(())
    }

    // -- Accessors ----------------------------------------------------------

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// SHA-256 of the stretched password, as last read or written.
    pub fn password_check(&self) -> &[u8; KEY_LEN] {
        &self.password_check
    }

    /// B1..B4.
    pub fn wrapped_keys(&self) -> &WrappedKeys {
        &self.wrapped_keys
    }

    pub fn iv(&self) -> &Block {
        &self.iv
    }

    /// Integrity tag as last read or written. All zeros for a vault that has
    /// been created but never written.
    pub fn mac_tag(&self) -> &[u8; TAG_LEN] {
        &self.mac_tag
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut Vec<Record> {
        &mut self.records
    }

    pub fn push_record(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Remove and return the record at `index`, if there is one.
    pub fn remove_record(&mut self, index: usize) -> Option<Record> {
        (index < self.records.len()).then(|| self.records.remove(index))
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

struct Loader {
    phase: LoadPhase,
}

impl Loader {
    fn run<R: Read>(&mut self, mut reader: R, password: &[u8]) -> Result<Vault> {
        self.phase = LoadPhase::TagCheck;
        let tag: [u8; 4] = read_array(&mut reader, "magic tag")?;
        if &tag != MAGIC {
            return Err(VaultError::Version { found: tag });
        }

        self.phase = LoadPhase::PasswordVerify;
        let salt: [u8; SALT_LEN] = read_array(&mut reader, "salt")?;
        let iterations = u32::from_le_bytes(read_array(&mut reader, "iteration count")?);
        if iterations == 0 {
            return Err(VaultError::format("iteration count is zero"));
        }
        let stretched = kdf::stretch(password, &salt, iterations);
        let password_check: [u8; KEY_LEN] = read_array(&mut reader, "password check")?;
        if !kdf::verify(&stretched, &password_check) {
            return Err(VaultError::BadPassword);
        }

        self.phase = LoadPhase::KeyUnwrap;
        let mut wrapped_keys: WrappedKeys = Default::default();
        for block in wrapped_keys.iter_mut() {
            read_block(&mut reader, block, "wrapped key")?;
        }
        let (k, l) = kdf::unwrap_keys(&stretched, &wrapped_keys)?;
        let iv: Block = read_array(&mut reader, "IV")?;
        let mut cipher = ChainedStream::new(&k[..], &iv)?;
        let mut mac = IntegrityMac::new(&l[..]);
        tracing::debug!(iterations, "vault keys unwrapped");

        self.phase = LoadPhase::HeaderFields;
        let mut header = Header::new();
        let mut stream_ended = false;
        loop {
            match decode_field(&mut reader, &mut cipher)? {
                None => {
                    stream_ended = true;
                    break;
                }
                Some(field) => {
                    mac.update(field.value());
                    if field.is_end_of_entry() {
                        break;
                    }
                    header.fields_mut().put(field);
                }
            }
        }

        self.phase = LoadPhase::RecordFields;
        let mut records = Vec::new();
        let mut current = Record::new();
        while !stream_ended {
            match decode_field(&mut reader, &mut cipher)? {
                None => stream_ended = true,
                Some(field) => {
                    mac.update(field.value());
                    if field.is_end_of_entry() {
                        records.push(std::mem::take(&mut current));
                    } else {
                        current.fields_mut().put(field);
                    }
                }
            }
        }
        if !current.fields().is_empty() {
            tracing::warn!(
                fields = current.fields().len(),
                "dropping unterminated record at end of stream"
            );
        }
        tracing::debug!(
            header_fields = header.fields().len(),
            records = records.len(),
            "field stream decoded"
        );

        self.phase = LoadPhase::TagVerify;
        let mac_tag: [u8; TAG_LEN] = read_array(&mut reader, "integrity tag")?;
        if !mac.verify(&mac_tag) {
            return Err(VaultError::format("integrity check failed"));
        }

        self.phase = LoadPhase::Loaded;
        Ok(Vault {
            salt,
            iterations,
            password_check,
            wrapped_keys,
            iv,
            header,
            records,
            mac_tag,
        })
    }
}

fn read_array<R: Read, const N: usize>(reader: &mut R, what: &str) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    reader
        .read_exact(&mut out)
        .map_err(|e| VaultError::from_read(e, what))?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::field::EOF_MARKER;
    use crate::record::FieldKind;

    const PASSWORD: &[u8] = b"correct horse";

    /// Offset of the first field-stream byte.
    const STREAM_START: usize = 4 + 32 + 4 + 32 + 4 * 16 + 16;

    fn fast_options() -> CreateOptions {
        CreateOptions { iterations: 1 }
    }

    fn sample_vault() -> Vault {
        let mut vault = Vault::create(PASSWORD, &fast_options(), &SystemEntropy::new()).unwrap();
        let mut record = Record::new();
        // 11- and 27-byte values fill their blocks exactly, so every byte of
        // the stream is either framing or value.
        record.set_title("eleven char");
        record.set_notes("twenty-seven bytes of notes");
        vault.push_record(record);
        vault
    }

    fn serialize(vault: &mut Vault) -> Vec<u8> {
        let mut out = Vec::new();
        vault
            .write_to(&mut out, PASSWORD, &SystemEntropy::new())
            .unwrap();
        out
    }

    #[test]
    fn layout_has_fixed_preamble_and_trailer() {
        let mut vault = sample_vault();
        let bytes = serialize(&mut vault);

        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(&bytes[4..36], vault.salt());
        assert_eq!(&bytes[36..40], &1u32.to_le_bytes());
        assert_eq!(&bytes[STREAM_START - 16..STREAM_START], vault.iv());
        let trailer = bytes.len() - TAG_LEN;
        assert_eq!(&bytes[trailer - 16..trailer], EOF_MARKER);
        assert_eq!(&bytes[trailer..], vault.mac_tag());
        assert_eq!((bytes.len() - STREAM_START - 16 - TAG_LEN) % 16, 0);
    }

    #[test]
    fn stream_roundtrip() {
        let mut vault = sample_vault();
        let bytes = serialize(&mut vault);

        let loaded = Vault::read_from(Cursor::new(bytes), PASSWORD).unwrap();
        assert_eq!(loaded.records().len(), 1);
        assert_eq!(loaded.records()[0].title(), "eleven char");
        assert_eq!(loaded.records()[0].text(FieldKind::Notes), "twenty-seven bytes of notes");
        assert_eq!(loaded.header().version(), Some(FORMAT_VERSION));
        assert_eq!(loaded.mac_tag(), vault.mac_tag());
    }

    #[test]
    fn every_flipped_stream_byte_is_detected() {
        let mut vault = sample_vault();
        let bytes = serialize(&mut vault);

        for pos in STREAM_START..bytes.len() {
            let mut damaged = bytes.clone();
            damaged[pos] ^= 0x01;
            let result = Vault::read_from(Cursor::new(damaged), PASSWORD);
            assert!(
                matches!(result, Err(VaultError::Format { .. })),
                "flip at {pos} gave {result:?}"
            );
        }
    }

    #[test]
    fn wrong_password_fails_before_field_stream() {
        let mut vault = sample_vault();
        let mut bytes = serialize(&mut vault);
        // Without a field stream a correct password reports truncation, a
        // wrong one never gets that far.
        bytes.truncate(STREAM_START);

        assert!(matches!(
            Vault::read_from(Cursor::new(bytes.clone()), b"wrong"),
            Err(VaultError::BadPassword)
        ));
        assert!(matches!(
            Vault::read_from(Cursor::new(bytes), PASSWORD),
            Err(VaultError::Format { .. })
        ));
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut vault = sample_vault();
        let mut bytes = serialize(&mut vault);
        bytes[36..40].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            Vault::read_from(Cursor::new(bytes), PASSWORD),
            Err(VaultError::Format { .. })
        ));
    }

    #[test]
    fn create_rejects_zero_iterations() {
        let result = Vault::create(
            PASSWORD,
            &CreateOptions { iterations: 0 },
            &SystemEntropy::new(),
        );
        assert!(matches!(result, Err(VaultError::Format { .. })));
    }

    #[test]
    fn missing_tag_is_format_error() {
        let mut vault = sample_vault();
        let mut bytes = serialize(&mut vault);
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            Vault::read_from(Cursor::new(bytes), PASSWORD),
            Err(VaultError::Format { .. })
        ));
    }

    #[test]
    fn eof_marker_inside_header_yields_no_records() {
        let mut vault = Vault::create(PASSWORD, &fast_options(), &SystemEntropy::new()).unwrap();
        let full = serialize(&mut vault);

        // Rebuild a stream that holds only the version field, then EOF.
        let stretched = kdf::stretch(PASSWORD, vault.salt(), vault.iterations());
        let (k, l) = kdf::unwrap_keys(&stretched, vault.wrapped_keys()).unwrap();
        let mut cipher = ChainedStream::new(&k[..], vault.iv()).unwrap();
        let mut mac = IntegrityMac::new(&l[..]);

        let mut bytes = full[..STREAM_START].to_vec();
        let version = vault.header().fields().iter().next().unwrap().clone();
        encode_field(&mut bytes, &mut cipher, Some(&version), &SystemEntropy::new()).unwrap();
        mac.update(version.value());
        encode_field(&mut bytes, &mut cipher, None, &SystemEntropy::new()).unwrap();
        bytes.extend_from_slice(&mac.finish());

        let loaded = Vault::read_from(Cursor::new(bytes), PASSWORD).unwrap();
        assert!(loaded.records().is_empty());
        assert_eq!(loaded.header().version(), Some(FORMAT_VERSION));
    }

    #[test]
    fn failed_verification_keeps_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safe.psafe3");

        let mut vault = sample_vault();
        vault.write(&path, PASSWORD).unwrap();
        let before = std::fs::read(&path).unwrap();

        vault.records_mut()[0].set_user("someone");
        let result = vault.commit(&path, PASSWORD, &SystemEntropy::new(), |tmp| {
            let mut bytes = std::fs::read(tmp)?;
            let last = bytes.len() - 1;
            bytes[last] ^= 0xff;
            std::fs::write(tmp, bytes)?;
            Ok(())
        });

        assert!(matches!(result, Err(VaultError::Format { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), before);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "temporary file left behind: {leftovers:?}");
    }

    #[test]
    fn failed_verification_keeps_check_and_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safe.psafe3");

        let mut vault = sample_vault();
        vault.write(&path, b"old").unwrap();
        let check = *vault.password_check();
        let tag = *vault.mac_tag();

        let result = vault.commit(&path, b"new", &SystemEntropy::new(), |tmp| {
            let mut bytes = std::fs::read(tmp)?;
            let last = bytes.len() - 1;
            bytes[last] ^= 0xff;
            std::fs::write(tmp, bytes)?;
            Ok(())
        });

        assert!(matches!(result, Err(VaultError::Format { .. })));
        assert_eq!(vault.password_check(), &check);
        assert_eq!(vault.mac_tag(), &tag);

        // In-memory state still describes the file on disk.
        let on_disk = Vault::read(&path, b"old").unwrap();
        assert_eq!(on_disk.password_check(), vault.password_check());
        assert_eq!(on_disk.mac_tag(), vault.mac_tag());
    }

    #[test]
    fn successful_commit_updates_check_and_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safe.psafe3");

        let mut vault = sample_vault();
        vault.write(&path, b"old").unwrap();
        let check = *vault.password_check();

        vault.write(&path, b"new").unwrap();
        assert_ne!(vault.password_check(), &check);

        let on_disk = Vault::read(&path, b"new").unwrap();
        assert_eq!(on_disk.password_check(), vault.password_check());
        assert_eq!(on_disk.mac_tag(), vault.mac_tag());
    }

    #[test]
    fn remove_record_out_of_range_is_none() {
        let mut vault = sample_vault();
        assert!(vault.remove_record(5).is_none());
        assert!(vault.remove_record(0).is_some());
        assert!(vault.records().is_empty());
    }
}
