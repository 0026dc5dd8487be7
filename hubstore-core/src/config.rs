//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, HubError, HubResult};
use crate::lease::{
    LeaseSchedule, LEGACY_RENT_PERIOD_SECS, LEGACY_STORAGE_UNIT_CUTOFF_TIMESTAMP,
    RENT_PERIOD_SECS,
};

/// Storage cache settings. Defaults are the protocol values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageCacheConfig {
    /// Block timestamp (Unix seconds) separating legacy and current leases.
    pub legacy_cutoff_timestamp: u64,
    /// Lease length for legacy rentals.
    pub legacy_rent_period_secs: u64,
    /// Lease length for current rentals.
    pub rent_period_secs: u64,
    /// Log sync progress every this many message keys. 0 disables progress logs.
    pub sync_progress_interval: u64,
}

impl Default for StorageCacheConfig {
    fn default() -> Self {
        Self {
            legacy_cutoff_timestamp: LEGACY_STORAGE_UNIT_CUTOFF_TIMESTAMP,
            legacy_rent_period_secs: LEGACY_RENT_PERIOD_SECS,
            rent_period_secs: RENT_PERIOD_SECS,
            sync_progress_interval: 100_000,
        }
    }
}

impl StorageCacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lease cutover timestamp.
    pub fn with_legacy_cutoff(mut self, timestamp: u64) -> Self {
        self.legacy_cutoff_timestamp = timestamp;
        self
    }

    /// Set the legacy lease length.
    pub fn with_legacy_rent_period(mut self, secs: u64) -> Self {
        self.legacy_rent_period_secs = secs;
        self
    }

    /// Set the current lease length.
    pub fn with_rent_period(mut self, secs: u64) -> Self {
        self.rent_period_secs = secs;
        self
    }

    /// Set the sync progress logging interval.
    pub fn with_sync_progress_interval(mut self, keys: u64) -> Self {
        self.sync_progress_interval = keys;
        self
    }

    /// Lease rules described by this config.
    pub fn lease_schedule(&self) -> LeaseSchedule {
        LeaseSchedule {
            cutoff_timestamp: self.legacy_cutoff_timestamp,
            legacy_period_secs: self.legacy_rent_period_secs,
            period_secs: self.rent_period_secs,
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - both lease periods are positive
    pub fn validate(&self) -> HubResult<()> {
        if self.legacy_rent_period_secs == 0 {
            return Err(HubError::Config(ConfigError::InvalidValue {
                field: "legacy_rent_period_secs".to_string(),
                value: self.legacy_rent_period_secs.to_string(),
                reason: "legacy_rent_period_secs must be greater than 0".to_string(),
            }));
        }

        if self.rent_period_secs == 0 {
            return Err(HubError::Config(ConfigError::InvalidValue {
                field: "rent_period_secs".to_string(),
                value: self.rent_period_secs.to_string(),
                reason: "rent_period_secs must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}

/// LMDB environment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmdbConfig {
    /// Directory holding the LMDB environment.
    pub path: PathBuf,
    /// Maximum map size in megabytes.
    #[serde(default = "default_map_size_mb")]
    pub map_size_mb: usize,
}

fn default_map_size_mb() -> usize {
    1024
}

impl LmdbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size_mb: default_map_size_mb(),
        }
    }

    /// Set the map size.
    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> HubResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(HubError::Config(ConfigError::MissingRequired {
                field: "lmdb.path".to_string(),
            }));
        }

        if self.map_size_mb == 0 {
            return Err(HubError::Config(ConfigError::InvalidValue {
                field: "lmdb.map_size_mb".to_string(),
                value: self.map_size_mb.to_string(),
                reason: "map_size_mb must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}

/// Master configuration struct.
///
/// The `[cache]` table may be omitted; `[lmdb]` with a `path` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStoreConfig {
    #[serde(default)]
    pub cache: StorageCacheConfig,
    pub lmdb: LmdbConfig,
}

impl HubStoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> HubResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| {
            HubError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> HubResult<()> {
        self.cache.validate()?;
        self.lmdb.validate()
    }
}

// =============================================================================
// TESTS
// =============================================================================
