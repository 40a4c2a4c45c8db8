//! Vault error types.
//!
//! Every public API in this crate surfaces failures through [`VaultError`].
//! The three container-level failure kinds are kept apart so callers can tell
//! "not a V3 file" from "wrong password" from "damaged file" without
//! inspecting strings.

/// Unified error type for the Password Safe V3 container codec.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Container errors ---------------------------------------------------
    /// The file does not start with the `PWS3` magic tag.
    #[error("not a Password Safe V3 container (tag {found:02x?})")]
    Version { found: [u8; 4] },

    /// The stretched password does not match the stored check hash.
    ///
    /// Raised before any field of the container is decrypted.
    #[error("wrong password")]
    BadPassword,

    /// The container is truncated, malformed, or fails its integrity check.
    ///
    /// Also raised when a freshly written container fails to read back.
    #[error("vault format error: {reason}")]
    Format { reason: String },

    // -- Data model errors --------------------------------------------------
    /// The end-of-record sentinel type cannot be stored as a field.
    #[error("field type 0x{0:02x} is reserved")]
    ReservedFieldType(u8),

    // -- Randomness errors --------------------------------------------------
    /// The secure randomness source failed. There is no weaker fallback.
    #[error("entropy source failed: {reason}")]
    Entropy { reason: String },

    // -- Configuration errors -----------------------------------------------
    /// The configuration file location could not be determined or used.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The configuration file is not valid TOML for [`crate::Config`].
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML.
    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // -- Underlying errors --------------------------------------------------
    /// I/O error from the filesystem.
    ///
    /// A short read inside a container is reported as [`VaultError::Format`]
    /// instead.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Build a [`VaultError::Format`] from anything string-like.
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    /// Map an I/O error raised while reading container bytes.
    ///
    /// Running out of input means the container is truncated, which is a
    /// format problem rather than an I/O one.
    pub(crate) fn from_read(err: std::io::Error, what: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::format(format!("truncated container while reading {what}"))
        } else {
            Self::Io(err)
        }
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_read_becomes_format_error() {
        let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            VaultError::from_read(err, "salt"),
            VaultError::Format { .. }
        ));
    }

    #[test]
    fn other_read_errors_stay_io() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(VaultError::from_read(err, "salt"), VaultError::Io(_)));
    }

    #[test]
    fn version_error_shows_found_tag() {
        let msg = VaultError::Version { found: *b"PWS2" }.to_string();
        assert!(msg.contains("50"), "{msg}");
    }
}
