//! User configuration: the list of recently opened vaults.
//!
//! Stored as TOML:
//!
//! ```toml
//! recent_vaults = ["/home/me/work.psafe3", "/home/me/personal.psafe3"]
//! ```
//!
//! The list is kept newest first, without duplicates, and capped at
//! [`MAX_RECENT`] entries. A missing file simply yields the defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Maximum number of remembered vault paths.
pub const MAX_RECENT: usize = 10;

const APP_DIR: &str = "pwsafe-vault";
const CONFIG_FILE: &str = "config.toml";

/// Persisted user settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Recently used vault files, newest first.
    #[serde(default)]
    pub recent_vaults: Vec<PathBuf>,
}

impl Config {
    /// Platform default location of the configuration file.
    ///
    /// - macOS: `~/Library/Application Support/pwsafe-vault/config.toml`
    /// - Windows: `%APPDATA%\pwsafe-vault\config.toml`
    /// - elsewhere: `$XDG_CONFIG_HOME/pwsafe-vault/config.toml`, then
    ///   `~/.config/pwsafe-vault/config.toml`
    ///
    /// Falls back to `config.toml` in the current directory when none of
    /// these base directories exist.
    pub fn default_path() -> PathBuf {
        Self::candidate_bases()
            .into_iter()
            .find(|base| base.is_dir())
            .map(|base| base.join(APP_DIR).join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    fn candidate_bases() -> Vec<PathBuf> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let mut bases = Vec::new();

        if cfg!(target_os = "macos") {
            if let Some(home) = &home {
                bases.push(home.join("Library").join("Application Support"));
            }
        }
        if cfg!(windows) {
            if let Some(appdata) = std::env::var_os("APPDATA") {
                bases.push(PathBuf::from(appdata));
            }
        }
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            bases.push(PathBuf::from(xdg));
        }
        if let Some(home) = &home {
            bases.push(home.join(".config"));
        }
        bases
    }

    /// Load from [`Config::default_path`].
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path`, returning defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// [`VaultError::ConfigParse`] if the file is not valid TOML for this
    /// structure, [`VaultError::Io`] for other read failures.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut config: Self = toml::from_str(&content)?;
        config.normalize();
        tracing::debug!(
            path = %path.display(),
            recent = config.recent_vaults.len(),
            "loaded config"
        );
        Ok(config)
    }

    /// Save to [`Config::default_path`].
    pub fn save(&mut self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save to `path`, creating its parent directory if needed.
    pub fn save_to(&mut self, path: &Path) -> Result<()> {
        self.normalize();
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| VaultError::Config {
                reason: format!("cannot create {}: {e}", parent.display()),
            })?;
        }
        std::fs::write(path, content)?;

        tracing::info!(path = %path.display(), "saved config");
        Ok(())
    }

    /// Record `path` as the most recently used vault.
    pub fn push_recent(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.recent_vaults.retain(|p| *p != path);
        self.recent_vaults.insert(0, path);
        self.recent_vaults.truncate(MAX_RECENT);
    }

    /// Forget `path`, e.g. after it failed to open.
    pub fn forget_recent(&mut self, path: &Path) {
        self.recent_vaults.retain(|p| p != path);
    }

    /// Drop duplicates (keeping the first occurrence) and cap the list.
    fn normalize(&mut self) {
        let mut seen = Vec::with_capacity(self.recent_vaults.len());
        self.recent_vaults.retain(|p| {
            if seen.contains(p) {
                false
            } else {
                seen.push(p.clone());
                true
            }
        });
        self.recent_vaults.truncate(MAX_RECENT);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
