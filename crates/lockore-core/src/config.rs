use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LockoreError, LockoreResult};

/// AES block length; the cipher window must be a multiple of it.
pub const CIPHER_BLOCK_LEN: usize = 16;

/// Top-level configuration (loaded from lockore.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoreConfig {
    pub log: LogConfig,
    pub vault: VaultConfig,
    pub kdf: KdfConfig,
    pub cipher: CipherConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (default: info)
    pub level: String,
    /// Log format: "text" or "json"
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding one sub-directory per store
    pub data_dir: PathBuf,
    /// Insert a random padding island into every saved record
    pub record_padding: bool,
    /// Upper bound for the padding island length in bytes
    pub max_padding: usize,
    /// Quota reported as the store's total capacity, in bytes
    pub quota_bytes: u64,
}

/// PBKDF2-HMAC-SHA1 key stretching parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Iteration count for newly locked stores (default: 1280)
    pub iterations: u32,
    /// Add a random extra of up to 1/8 of `iterations` when locking
    pub iteration_jitter: bool,
    /// Minimum wall-clock duration of a derivation in milliseconds
    pub min_duration_ms: u64,
    /// Lower bound on iterations between progress reports
    pub min_report_iterations: u32,
    /// Upper bound on iterations between progress reports
    pub max_report_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherConfig {
    /// Streaming cipher window in bytes (multiple of the AES block)
    pub window: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.local/share/lockore"),
            record_padding: true,
            max_padding: 256,
            quota_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            iterations: 1280,
            iteration_jitter: true,
            min_duration_ms: 1000,
            min_report_iterations: 200,
            max_report_iterations: 65536,
        }
    }
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self { window: 1024 }
    }
}

impl LockoreConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> LockoreResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LockoreError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LockoreResult<()> {
        if self.cipher.window == 0 || self.cipher.window % CIPHER_BLOCK_LEN != 0 {
            return Err(LockoreError::Config(format!(
                "cipher.window must be a non-zero multiple of {CIPHER_BLOCK_LEN}, got {}",
                self.cipher.window
            )));
        }
        if self.kdf.iterations == 0 {
            return Err(LockoreError::Config("kdf.iterations must be positive".into()));
        }
        if self.kdf.min_report_iterations == 0
            || self.kdf.min_report_iterations > self.kdf.max_report_iterations
        {
            return Err(LockoreError::Config(
                "kdf report bounds must satisfy 0 < min <= max".into(),
            ));
        }
        Ok(())
    }

    /// `vault.data_dir` with a leading `~/` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.vault.data_dir)
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
