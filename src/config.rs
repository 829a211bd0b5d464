//! Tracker configuration

use crate::error::{TrackerError, TrackerResult};
use crate::profiler::Core;
use serde::{Deserialize, Serialize};

/// Complete tracker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Database registry and record store sizing
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Idle profiler settings
    #[serde(default)]
    pub profiler: ProfilerConfig,
}

impl TrackerConfig {
    /// Small tables for constrained targets
    pub fn compact() -> Self {
        Self {
            registry: RegistryConfig {
                database_buckets: 4,
                record_buckets: 8,
                strict_duplicates: true,
            },
            profiler: ProfilerConfig {
                ring_capacity: 32,
                ..ProfilerConfig::default()
            },
        }
    }

    /// Deep idle history and frequent calibration, used while bringing up
    /// a new driver port
    pub fn debug() -> Self {
        Self {
            registry: RegistryConfig::default(),
            profiler: ProfilerConfig {
                ring_capacity: 1024,
                calibration_period: Some(1_000_000),
                ..ProfilerConfig::default()
            },
        }
    }

    /// Check every section
    pub fn validate(&self) -> TrackerResult<()> {
        self.registry.validate()?;
        self.profiler.validate()
    }
}

/// Hash table sizing for the registry and per-database record stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Buckets in the process-keyed registry
    pub database_buckets: usize,
    /// Buckets in each database's record store
    pub record_buckets: usize,
    /// Reject a second live record with the same (kind, owner key); turning
    /// it off leaves duplicate detection to the caller
    pub strict_duplicates: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database_buckets: 16,
            record_buckets: 48,
            strict_duplicates: true,
        }
    }
}

impl RegistryConfig {
    /// Reject empty tables
    pub fn validate(&self) -> TrackerResult<()> {
        if self.database_buckets == 0 {
            return Err(TrackerError::InvalidArgument(
                "database_buckets must be non-zero".to_string(),
            ));
        }
        if self.record_buckets == 0 {
            return Err(TrackerError::InvalidArgument(
                "record_buckets must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Idle profiler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Samples retained per core
    pub ring_capacity: usize,
    /// Cores that start out idle; all others start busy
    pub idle_at_start: Vec<Core>,
    /// Ticks between speed calibration samples, `None` to disable
    pub calibration_period: Option<u64>,
    /// Idle percentage above which the power policy may switch a core off
    pub idle_threshold_percent: u32,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 256,
            // The 3D core comes up busy, the 2D and VG cores idle.
            idle_at_start: vec![Core::TwoD, Core::Vg],
            calibration_period: None,
            idle_threshold_percent: 50,
        }
    }
}

impl ProfilerConfig {
    /// Check ring and threshold bounds
    pub fn validate(&self) -> TrackerResult<()> {
        if self.ring_capacity < 2 {
            return Err(TrackerError::InvalidArgument(format!(
                "ring_capacity must be at least 2, got {}",
                self.ring_capacity
            )));
        }
        if self.idle_threshold_percent > 100 {
            return Err(TrackerError::InvalidArgument(format!(
                "idle_threshold_percent must be within 0..=100, got {}",
                self.idle_threshold_percent
            )));
        }
        if self.calibration_period == Some(0) {
            return Err(TrackerError::InvalidArgument(
                "calibration_period must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `core` starts out idle
    pub fn starts_idle(&self, core: Core) -> bool {
        self.idle_at_start.contains(&core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
        assert!(TrackerConfig::compact().validate().is_ok());
        assert!(TrackerConfig::debug().validate().is_ok());
    }

    #[test]
    fn test_zero_buckets_rejected() {
        let mut config = TrackerConfig::default();
        config.registry.record_buckets = 0;
        assert!(matches!(config.validate(), Err(TrackerError::InvalidArgument(_))));
    }

    #[test]
    fn test_tiny_ring_rejected() {
        let mut config = TrackerConfig::default();
        config.profiler.ring_capacity = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_start_states() {
        let config = ProfilerConfig::default();
        assert!(!config.starts_idle(Core::Major));
        assert!(config.starts_idle(Core::TwoD));
    }

    #[test]
    fn test_partial_json() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{ "registry": { "database_buckets": 8 } }"#).unwrap();
        assert_eq!(config.registry.database_buckets, 8);
        assert_eq!(config.registry.record_buckets, 48);
        assert_eq!(config.profiler.ring_capacity, 256);
        assert!(config.registry.strict_duplicates);
    }
}
