//! Manager configuration.
//!
//! Defaults: the database lives in the platform data directory and Argon2
//! runs with interactive limits. Environment overrides:
//! - `CK_DB_PATH`        — database file, or `:memory:` for a throwaway store
//! - `CK_KDF_MEMORY_KIB` — Argon2 memory cost
//! - `CK_KDF_ITERATIONS` — Argon2 passes

use std::path::PathBuf;

use ck_crypto::KdfLimits;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ManagerError;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "chatkeys";
pub const APP_NAME: &str = "chatkeys";
pub const DB_FILE_NAME: &str = "keys.db";

pub const ENV_DB_PATH: &str = "CK_DB_PATH";
pub const ENV_KDF_MEMORY_KIB: &str = "CK_KDF_MEMORY_KIB";
pub const ENV_KDF_ITERATIONS: &str = "CK_KDF_ITERATIONS";

const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// `None` keeps everything in memory.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub kdf: KdfLimits,
}

impl ManagerConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: None,
            kdf: KdfLimits::interactive(),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            kdf: KdfLimits::interactive(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfLimits) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn from_env() -> Result<Self, ManagerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ManagerError> {
        let db_path = match lookup(ENV_DB_PATH) {
            Some(path) if path == IN_MEMORY => None,
            Some(path) if !path.trim().is_empty() => Some(PathBuf::from(path)),
            _ => Some(data_dir()?.join(DB_FILE_NAME)),
        };

        let defaults = KdfLimits::interactive();
        let memory_kib = parse_u32(&lookup, ENV_KDF_MEMORY_KIB)?.unwrap_or(defaults.memory_kib);
        let iterations = parse_u32(&lookup, ENV_KDF_ITERATIONS)?.unwrap_or(defaults.iterations);
        let kdf = KdfLimits::new(memory_kib, iterations, defaults.parallelism)
            .map_err(|e| ManagerError::Validation(e.to_string()))?;

        Ok(Self { db_path, kdf })
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

pub fn data_dir() -> Result<PathBuf, ManagerError> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| ManagerError::Validation("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

fn parse_u32(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<u32>, ManagerError> {
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<u32>()
                .map_err(|e| ManagerError::Validation(format!("{name}={raw:?}: {e}")))
        })
        .transpose()
}
