//! Password Safe V3 compatible vault container.
//!
//! This crate reads and writes `.psafe3` containers: a password-protected
//! file holding a header and a list of credential records, encrypted with
//! Twofish-CBC and authenticated with HMAC-SHA256.
//!
//! # Modules
//!
//! - [`kdf`]: iterated SHA-256 password stretching, key wrap/unwrap.
//! - [`cipher`]: Twofish in single-block and chained (CBC) modes.
//! - [`field`]: TLV field framing over 16-byte blocks.
//! - [`mac`]: running HMAC over decoded field values.
//! - [`container`]: [`Vault`] load, save (atomic) and create.
//! - [`record`]: [`Field`], [`Header`] and [`Record`] types.
//! - [`entropy`]: the injected randomness source.
//! - [`config`]: recently used vault list.
//! - [`error`]: unified error type.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pwsafe_vault::{CreateOptions, Record, SystemEntropy, Vault};
//!
//! # fn example() -> pwsafe_vault::Result<()> {
//! let mut vault = Vault::create(b"master", &CreateOptions::default(), &SystemEntropy::new())?;
//!
//! let mut record = Record::new();
//! record.set_title("mail");
//! record.set_user("me@example.org");
//! record.set_password("hunter2");
//! vault.push_record(record);
//!
//! vault.write("personal.psafe3", b"master")?;
//!
//! let reopened = Vault::read("personal.psafe3", b"master")?;
//! assert_eq!(reopened.records()[0].title(), "mail");
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod config;
pub mod container;
pub mod entropy;
pub mod error;
pub mod field;
pub mod kdf;
pub mod mac;
pub mod record;

// Re-export the most commonly used types at the crate root for convenience.
pub use config::Config;
pub use container::{CreateOptions, Vault};
pub use entropy::{EntropySource, SystemEntropy};
pub use error::{Result, VaultError};
pub use record::{Field, FieldKind, FieldMap, Header, Record};
