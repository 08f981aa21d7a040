//! Lifecycle controller configuration
//!
//! Settings mirror the dynamic cluster settings of the surrounding system.
//! `LifecycleSettings` carries the boot-time values; runtime updates flow
//! through the service's `update_*` methods.

use crate::transport::RolloverConfiguration;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Setting key for the poll interval.
pub const POLL_INTERVAL_SETTING: &str = "data_streams.lifecycle.poll_interval";
/// Setting key for the target merge factor.
pub const MERGE_POLICY_TARGET_FACTOR_SETTING: &str =
    "data_streams.lifecycle.target.merge.policy.merge_factor";
/// Setting key for the target floor segment size.
pub const MERGE_POLICY_TARGET_FLOOR_SEGMENT_SETTING: &str =
    "data_streams.lifecycle.target.merge.policy.floor_segment";

/// The smallest poll interval the controller accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// The smallest merge factor the controller accepts.
pub const MIN_MERGE_FACTOR: u32 = 2;
/// Default target floor segment size before force-merge.
pub const ONE_HUNDRED_MB: u64 = 100 * 1024 * 1024;
/// Default target merge factor before force-merge.
pub const TARGET_MERGE_FACTOR: u32 = 16;

/// Boot-time configuration for the lifecycle controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// How often the lifecycle job fires
    pub poll_interval: Duration,
    /// Desired index merge factor before force-merge
    pub target_merge_factor: u32,
    /// Desired floor-segment size (bytes) before force-merge
    pub target_floor_segment_bytes: u64,
    /// Cluster default rollover conditions, resolved per data stream
    pub rollover: RolloverConfiguration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5 * 60),
            target_merge_factor: TARGET_MERGE_FACTOR,
            target_floor_segment_bytes: ONE_HUNDRED_MB,
            rollover: RolloverConfiguration::default(),
        }
    }
}

impl LifecycleSettings {
    /// Build settings from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - STREAMWARD_POLL_INTERVAL_SECS: lifecycle poll interval (default 300)
    /// - STREAMWARD_TARGET_MERGE_FACTOR: merge factor target (default 16)
    /// - STREAMWARD_TARGET_FLOOR_SEGMENT_MB: floor segment target in MiB (default 100)
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Ok(value) = std::env::var("STREAMWARD_POLL_INTERVAL_SECS") {
            let secs: u64 = value.parse().map_err(|_| {
                Error::Config(format!("invalid STREAMWARD_POLL_INTERVAL_SECS: {value}"))
            })?;
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(value) = std::env::var("STREAMWARD_TARGET_MERGE_FACTOR") {
            settings.target_merge_factor = value.parse().map_err(|_| {
                Error::Config(format!("invalid STREAMWARD_TARGET_MERGE_FACTOR: {value}"))
            })?;
        }
        if let Ok(value) = std::env::var("STREAMWARD_TARGET_FLOOR_SEGMENT_MB") {
            let mb: u64 = value.parse().map_err(|_| {
                Error::Config(format!("invalid STREAMWARD_TARGET_FLOOR_SEGMENT_MB: {value}"))
            })?;
            settings.target_floor_segment_bytes = mb * 1024 * 1024;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values below the documented minimums.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval < MIN_POLL_INTERVAL {
            return Err(Error::Config(format!(
                "{POLL_INTERVAL_SETTING} must be at least {}s",
                MIN_POLL_INTERVAL.as_secs()
            )));
        }
        if self.target_merge_factor < MIN_MERGE_FACTOR {
            return Err(Error::Config(format!(
                "{MERGE_POLICY_TARGET_FACTOR_SETTING} must be at least {MIN_MERGE_FACTOR}"
            )));
        }
        Ok(())
    }
}
