//! Configuration loading.
//!
//! Layers, later ones winning:
//! 1. built-in defaults
//! 2. `~/.config/schemaledger/config.toml`
//! 3. `./schemaledger.toml`, or the file given with `--config`
//! 4. command-line flags and environment (applied by the binary)
//!
//! ```toml
//! database_url = "postgres://app@localhost/app"
//! migrations_dir = "db/migrations"
//! ledger_table = "_schema_migrations"
//! extension = ".sql"
//! ledger_read = "abort"
//! ```

use crate::error::{MigrateError, MigrateResult};
use crate::ledger::DEFAULT_LEDGER_TABLE;
use crate::source::DEFAULT_EXTENSION;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Project-local config file name.
pub const LOCAL_CONFIG_FILE: &str = "schemaledger.toml";

/// What `run` does when the ledger cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerReadPolicy {
    /// Fail the run before anything is applied.
    #[default]
    Abort,
    /// Treat the ledger as empty. Already-applied migrations are then
    /// attempted again and rejected by the ledger's unique constraint.
    Degrade,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub database_url: Option<String>,
    pub migrations_dir: PathBuf,
    pub ledger_table: String,
    pub extension: String,
    pub ledger_read: LedgerReadPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            migrations_dir: PathBuf::from("migrations"),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            ledger_read: LedgerReadPolicy::default(),
        }
    }
}

/// One config file; every key optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub database_url: Option<String>,
    pub migrations_dir: Option<PathBuf>,
    pub ledger_table: Option<String>,
    pub extension: Option<String>,
    pub ledger_read: Option<LedgerReadPolicy>,
}

impl ConfigFile {
    pub fn parse(content: &str) -> MigrateResult<Self> {
        toml::from_str(content).map_err(|e| MigrateError::Config(e.to_string()))
    }

    pub fn read(path: &Path) -> MigrateResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| MigrateError::Config(format!("{}: {}", path.display(), e)))
    }
}

impl Config {
    /// Load defaults, the user-wide file and then either `explicit` (which
    /// must exist) or `./schemaledger.toml` (if present).
    pub fn load(explicit: Option<&Path>) -> MigrateResult<Self> {
        let mut config = Self::default();

        if let Some(global) = global_config_path() {
            if global.is_file() {
                debug!(path = %global.display(), "loading user config");
                config.merge(ConfigFile::read(&global)?);
            }
        }

        match explicit {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                config.merge(ConfigFile::read(path)?);
            }
            None => {
                let local = Path::new(LOCAL_CONFIG_FILE);
                if local.is_file() {
                    debug!(path = %local.display(), "loading project config");
                    config.merge(ConfigFile::read(local)?);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Overlay every key present in `file`.
    pub fn merge(&mut self, file: ConfigFile) {
        if let Some(url) = file.database_url {
            self.database_url = Some(url);
        }
        if let Some(dir) = file.migrations_dir {
            self.migrations_dir = dir;
        }
        if let Some(table) = file.ledger_table {
            self.ledger_table = table;
        }
        if let Some(ext) = file.extension {
            self.extension = ext;
        }
        if let Some(policy) = file.ledger_read {
            self.ledger_read = policy;
        }
    }

    pub fn validate(&self) -> MigrateResult<()> {
        if !self.extension.starts_with('.') || self.extension.len() < 2 {
            return Err(MigrateError::Config(format!(
                "extension must look like '.sql', got '{}'",
                self.extension
            )));
        }
        if self.ledger_table.trim().is_empty() {
            return Err(MigrateError::Config("ledger_table must not be empty".into()));
        }
        Ok(())
    }

    /// The URL to connect with, or a usage error naming how to set it.
    pub fn require_database_url(&self) -> MigrateResult<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            MigrateError::usage("no database URL. Use --database-url or set DATABASE_URL")
        })
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("schemaledger").join("config.toml"))
}
