//! Backing-index metadata

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of a downsampling task targeting an index.
///
/// The status lives in the *target* index's settings: an index that was
/// created by a downsample operation carries `Started` until the task
/// finishes and `Success` afterwards. An index that was never the target of
/// a downsample reports `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownsampleStatus {
    #[default]
    Unknown,
    Started,
    Success,
}

/// The subset of index settings the lifecycle controller reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Configured merge-policy floor segment size in bytes, if set
    pub merge_policy_floor_segment: Option<u64>,
    /// Configured merge-policy merge factor, if set
    pub merge_policy_merge_factor: Option<u32>,
    /// Name of the source index this index was downsampled from, if any
    pub downsample_source_name: Option<String>,
    /// Downsampling task status for this index
    pub downsample_status: DownsampleStatus,
    /// ILM policy attached to the index. An index with an ILM policy is not
    /// managed by the data stream lifecycle.
    pub ilm_policy: Option<String>,
    /// Explicit age basis in epoch millis, overriding the creation date.
    /// Set when an index replaces another so age keeps measuring the original.
    pub origination_date_millis: Option<i64>,
}

/// Metadata for a single index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    /// Index creation time in epoch millis
    pub creation_date_millis: i64,
    pub settings: IndexSettings,
    /// Custom metadata maps, keyed by owning subsystem
    pub custom_metadata: BTreeMap<String, BTreeMap<String, String>>,
}

impl IndexMetadata {
    pub fn new(name: impl Into<String>, creation_date_millis: i64) -> Self {
        Self {
            name: name.into(),
            creation_date_millis,
            settings: IndexSettings::default(),
            custom_metadata: BTreeMap::new(),
        }
    }

    /// The custom metadata map registered under `key`, if present.
    pub fn custom_data(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        self.custom_metadata.get(key)
    }

    /// Age of the index at `now_millis`, honouring the origination date when set.
    pub fn age_millis(&self, now_millis: i64) -> i64 {
        let basis = self
            .settings
            .origination_date_millis
            .unwrap_or(self.creation_date_millis);
        now_millis - basis
    }

    /// True when this index is the product of a downsample operation.
    pub fn is_downsample_index(&self) -> bool {
        self.settings
            .downsample_source_name
            .as_deref()
            .is_some_and(|s| !s.is_empty())
    }
}
