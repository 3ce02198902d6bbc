//! Construction-time configuration for the in-memory backend.
//!
//! Backends are created by a factory from a string-keyed map, the same shape
//! an operator's configuration file produces. [`MemoryBackendConfig::from_map`]
//! parses that map; the builder and `serde` paths exist for programmatic and
//! structured configuration.
//!
//! # Recognized keys
//!
//! | Key | Meaning | Default |
//! |-----|---------|---------|
//! | `max_value_size` | Largest accepted value in bytes, `0` for unlimited | `0` |
//! | `parallel_operations` | Permit pool size, `0` for the default, at most [`MAX_PARALLEL_OPERATIONS`] | `128` |
//! | `log_ops` | Trace every operation (`true`/`false`/`1`/`0`) | `false` |
//!
//! Unknown keys are ignored so one map can configure several layers.
//!
//! Verbose tracing is a field here rather than an environment lookup: the
//! backend's behavior is fully determined by its configuration.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    Backend,
    error::{ConfigError, StorageResult},
    memory::{MemoryBackend, MemoryHaBackend},
    permit_pool::{DEFAULT_PARALLEL_OPERATIONS, MAX_PARALLEL_OPERATIONS},
};

/// Map key for the maximum value size.
pub const MAX_VALUE_SIZE_KEY: &str = "max_value_size";

/// Map key for the permit pool size.
pub const PARALLEL_OPERATIONS_KEY: &str = "parallel_operations";

/// Map key for verbose per-operation tracing.
pub const LOG_OPS_KEY: &str = "log_ops";

/// Configuration for [`MemoryBackend`].
///
/// # Example
///
/// ```
/// use bastion_storage::MemoryBackendConfig;
///
/// let config = MemoryBackendConfig::builder().max_value_size(1024).log_ops(true).build();
/// assert_eq!(config.max_value_size(), 1024);
/// assert_eq!(config.parallel_operations(), 128);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryBackendConfig {
    max_value_size: usize,
    #[serde(deserialize_with = "deserialize_parallel_operations")]
    parallel_operations: usize,
    log_ops: bool,
}

impl MemoryBackendConfig {
    /// Starts a builder with default values.
    pub fn builder() -> MemoryBackendConfigBuilder {
        MemoryBackendConfigBuilder { config: Self::default() }
    }

    /// Parses the string-keyed factory map.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidValue`] when a value does not parse.
    /// - [`ConfigError::BelowMinimum`] when a size is negative.
    /// - [`ConfigError::AboveMaximum`] when `parallel_operations` exceeds
    ///   [`MAX_PARALLEL_OPERATIONS`].
    pub fn from_map(conf: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        if let Some(raw) = conf.get(MAX_VALUE_SIZE_KEY) {
            builder = builder.max_value_size(parse_size(MAX_VALUE_SIZE_KEY, raw)?);
        }
        if let Some(raw) = conf.get(PARALLEL_OPERATIONS_KEY) {
            let permits = parse_size(PARALLEL_OPERATIONS_KEY, raw)?;
            builder = builder.parallel_operations(check_parallel_operations(permits)?);
        }
        if let Some(raw) = conf.get(LOG_OPS_KEY) {
            builder = builder.log_ops(parse_flag(LOG_OPS_KEY, raw)?);
        }
        Ok(builder.build())
    }

    /// Largest accepted value in bytes; `0` means unlimited.
    #[must_use]
    pub fn max_value_size(&self) -> usize {
        self.max_value_size
    }

    /// Permit pool size.
    #[must_use]
    pub fn parallel_operations(&self) -> usize {
        self.parallel_operations
    }

    /// Whether every operation is traced.
    #[must_use]
    pub fn log_ops(&self) -> bool {
        self.log_ops
    }
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            max_value_size: 0,
            parallel_operations: DEFAULT_PARALLEL_OPERATIONS,
            log_ops: false,
        }
    }
}

/// Builder for [`MemoryBackendConfig`].
#[derive(Debug, Clone)]
pub struct MemoryBackendConfigBuilder {
    config: MemoryBackendConfig,
}

impl MemoryBackendConfigBuilder {
    /// Sets the largest accepted value in bytes (`0` = unlimited).
    #[must_use]
    pub fn max_value_size(mut self, bytes: usize) -> Self {
        self.config.max_value_size = bytes;
        self
    }

    /// Sets the permit pool size (`0` = default). Sizes above
    /// [`MAX_PARALLEL_OPERATIONS`] are capped to it.
    #[must_use]
    pub fn parallel_operations(mut self, permits: usize) -> Self {
        self.config.parallel_operations = match permits {
            0 => DEFAULT_PARALLEL_OPERATIONS,
            n => n.min(MAX_PARALLEL_OPERATIONS),
        };
        self
    }

    /// Enables tracing of every operation.
    #[must_use]
    pub fn log_ops(mut self, enabled: bool) -> Self {
        self.config.log_ops = enabled;
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> MemoryBackendConfig {
        self.config
    }
}

fn parse_size(field: &'static str, raw: &str) -> Result<usize, ConfigError> {
    let value: i64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
        ConfigError::InvalidValue { field, value: raw.to_owned(), reason: e.to_string() }
    })?;
    usize::try_from(value).map_err(|_| ConfigError::BelowMinimum {
        field,
        min: "0".to_owned(),
        value: value.to_string(),
    })
}

fn check_parallel_operations(permits: usize) -> Result<usize, ConfigError> {
    if permits > MAX_PARALLEL_OPERATIONS {
        return Err(ConfigError::AboveMaximum {
            field: PARALLEL_OPERATIONS_KEY,
            max: MAX_PARALLEL_OPERATIONS.to_string(),
            value: permits.to_string(),
        });
    }
    Ok(if permits == 0 { DEFAULT_PARALLEL_OPERATIONS } else { permits })
}

fn deserialize_parallel_operations<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let permits = usize::deserialize(deserializer)?;
    check_parallel_operations(permits).map_err(serde::de::Error::custom)
}

fn parse_flag(field: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        _ => Err(ConfigError::InvalidValue {
            field,
            value: raw.to_owned(),
            reason: "expected true, false, 1 or 0".to_owned(),
        }),
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Factories
// ───────────────────────────────────────────────────────────────────────────

/// Builds an in-memory backend from a factory map.
///
/// # Errors
///
/// Returns [`StorageError::Config`](crate::StorageError::Config) when the map
/// does not parse.
pub fn new_memory_backend(conf: &HashMap<String, String>) -> StorageResult<Arc<dyn Backend>> {
    let config = MemoryBackendConfig::from_map(conf)?;
    Ok(Arc::new(MemoryBackend::with_config(config)))
}

/// Builds an HA-capable in-memory backend from a factory map.
///
/// # Errors
///
/// Returns [`StorageError::Config`](crate::StorageError::Config) when the map
/// does not parse.
pub fn new_memory_ha_backend(conf: &HashMap<String, String>) -> StorageResult<Arc<dyn Backend>> {
    let config = MemoryBackendConfig::from_map(conf)?;
    Ok(Arc::new(MemoryHaBackend::with_config(config)))
}
