//! CLI command implementations

pub mod challenge;
pub mod init;
pub mod member;
pub mod points;
pub mod sweep;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use loyalty_engine::{LoyaltyConfig, LoyaltyDb, LoyaltyService, SystemClock};

/// Config and database locations, resolved from global flags
pub struct Paths {
    pub config: PathBuf,
    pub db: PathBuf,
}

impl Paths {
    pub fn new(config: Option<PathBuf>, db: Option<PathBuf>) -> Self {
        Self {
            config: config.unwrap_or_else(LoyaltyConfig::global_config_path),
            db: db.unwrap_or_else(|| LoyaltyConfig::global_config_dir().join("ledger.db")),
        }
    }

    pub fn load_config(&self) -> Result<LoyaltyConfig> {
        LoyaltyConfig::load_from(&self.config)
    }
}

/// Load config, open the ledger and build the service
pub fn open_service(paths: &Paths) -> Result<LoyaltyService> {
    let config = paths.load_config()?;
    open_service_with(&config, &paths.db)
}

pub fn open_service_with(config: &LoyaltyConfig, db_path: &Path) -> Result<LoyaltyService> {
    let db = LoyaltyDb::open(db_path)?;
    LoyaltyService::new(config, db, Arc::new(SystemClock))
        .with_context(|| format!("Failed to start engine on {}", db_path.display()))
}
