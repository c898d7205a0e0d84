//! Configuration file I/O operations

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

use super::LoyaltyConfig;

impl LoyaltyConfig {
    /// Get the global config directory path (~/.loyalty/)
    pub fn global_config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".loyalty")
    }

    /// Get the global config file path (~/.loyalty/config.toml)
    pub fn global_config_path() -> PathBuf {
        Self::global_config_dir().join("config.toml")
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: LoyaltyConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to a file with atomic write and file locking.
    ///
    /// An exclusive lock on a sidecar file keeps concurrent CLI invocations
    /// from interleaving writes; the temp file plus rename means readers never
    /// see a half-written config.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).with_context(|| "Failed to serialize config")?;
        let _lock = lock_config(path)?;
        write_atomic(path, &content)
    }

    /// Load global configuration from ~/.loyalty/config.toml.
    /// If no config exists, auto-creates one with defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::global_config_path())
    }

    /// Load configuration from `path`, creating it with defaults if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::auto_init(path)?;
        }
        Self::from_file(path)
    }

    /// Write a default config to `path` unless another process got there first
    fn auto_init(path: &Path) -> Result<()> {
        let _lock = lock_config(path)?;

        // Re-check after acquiring the lock
        if path.exists() {
            return Ok(());
        }

        let content = toml::to_string_pretty(&Self::with_defaults())
            .with_context(|| "Failed to serialize default config")?;
        write_atomic(path, &content)?;

        tracing::info!(path = %path.display(), "Created default config");
        Ok(())
    }
}

/// Create the parent dir and take an exclusive lock on `<path>.lock`.
/// The lock is released when the returned file is dropped.
fn lock_config(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create config directory: {}", parent.display())
        })?;
    }

    let lock_path = path.with_extension("toml.lock");
    let lock_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

    lock_file
        .lock_exclusive()
        .with_context(|| "Failed to acquire config lock")?;

    Ok(lock_file)
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("toml.tmp");
    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

    temp_file
        .write_all(content.as_bytes())
        .with_context(|| "Failed to write config content")?;

    temp_file
        .sync_all()
        .with_context(|| "Failed to sync config file")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename config file: {}", path.display()))?;

    Ok(())
}
