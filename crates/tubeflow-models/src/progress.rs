//! Engine progress snapshots.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Download status reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Downloading,
    Finished,
    Error,
    #[serde(other)]
    Unknown,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Downloading => "downloading",
            ProgressStatus::Finished => "finished",
            ProgressStatus::Error => "error",
            ProgressStatus::Unknown => "unknown",
        }
    }
}

/// Point-in-time progress of one download.
///
/// Field names follow the engine's progress dictionary so stored entries
/// stay readable by existing pollers. Fields the engine adds that are not
/// modelled here are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSnapshot {
    pub status: ProgressStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes_estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    #[serde(rename = "_percent_str", default, skip_serializing_if = "Option::is_none")]
    pub percent_str: Option<String>,
    #[serde(rename = "_speed_str", default, skip_serializing_if = "Option::is_none")]
    pub speed_str: Option<String>,
    #[serde(rename = "_eta_str", default, skip_serializing_if = "Option::is_none")]
    pub eta_str: Option<String>,
    #[serde(rename = "_total_bytes_str", default, skip_serializing_if = "Option::is_none")]
    pub total_bytes_str: Option<String>,
    #[serde(
        rename = "_total_bytes_estimate_str",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_bytes_estimate_str: Option<String>,
    #[serde(rename = "_downloaded_bytes_str", default, skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes_str: Option<String>,
    #[serde(rename = "_elapsed_str", default, skip_serializing_if = "Option::is_none")]
    pub elapsed_str: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmpfilename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_count: Option<u64>,

    /// Final metadata, populated once the engine resolved it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_dict: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The polling view of a snapshot: status, counters and their formatted forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReducedProgress {
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes_estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(rename = "_percent_str", default, skip_serializing_if = "Option::is_none")]
    pub percent_str: Option<String>,
    #[serde(rename = "_speed_str", default, skip_serializing_if = "Option::is_none")]
    pub speed_str: Option<String>,
    #[serde(rename = "_eta_str", default, skip_serializing_if = "Option::is_none")]
    pub eta_str: Option<String>,
    #[serde(rename = "_total_bytes_str", default, skip_serializing_if = "Option::is_none")]
    pub total_bytes_str: Option<String>,
    #[serde(
        rename = "_total_bytes_estimate_str",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_bytes_estimate_str: Option<String>,
    #[serde(rename = "_downloaded_bytes_str", default, skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes_str: Option<String>,
    #[serde(rename = "_elapsed_str", default, skip_serializing_if = "Option::is_none")]
    pub elapsed_str: Option<String>,
}

impl ProgressSnapshot {
    pub fn new(status: ProgressStatus) -> Self {
        Self {
            status,
            downloaded_bytes: None,
            total_bytes: None,
            total_bytes_estimate: None,
            elapsed: None,
            eta: None,
            speed: None,
            percent_str: None,
            speed_str: None,
            eta_str: None,
            total_bytes_str: None,
            total_bytes_estimate_str: None,
            downloaded_bytes_str: None,
            elapsed_str: None,
            filename: None,
            tmpfilename: None,
            fragment_index: None,
            fragment_count: None,
            info_dict: None,
            extra: Map::new(),
        }
    }

    fn info_str(&self, field: &str) -> Option<&str> {
        self.info_dict
            .as_ref()?
            .get(field)?
            .as_str()
            .filter(|value| !value.is_empty())
    }

    /// Content id, once the engine has resolved it.
    pub fn content_id(&self) -> Option<&str> {
        self.info_str("id")
    }

    /// The source URL this snapshot belongs to, when the metadata names it.
    pub fn source_url(&self) -> Option<&str> {
        self.info_str("original_url")
            .or_else(|| self.info_str("webpage_url"))
    }

    /// Final path component of the file being written.
    pub fn file_name(&self) -> Option<&str> {
        let filename = self.filename.as_deref()?;
        filename
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
    }

    pub fn reduced(&self) -> ReducedProgress {
        ReducedProgress {
            status: self.status,
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            total_bytes_estimate: self.total_bytes_estimate,
            elapsed: self.elapsed,
            eta: self.eta,
            speed: self.speed,
            percent_str: self.percent_str.clone(),
            speed_str: self.speed_str.clone(),
            eta_str: self.eta_str.clone(),
            total_bytes_str: self.total_bytes_str.clone(),
            total_bytes_estimate_str: self.total_bytes_estimate_str.clone(),
            downloaded_bytes_str: self.downloaded_bytes_str.clone(),
            elapsed_str: self.elapsed_str.clone(),
        }
    }
}
