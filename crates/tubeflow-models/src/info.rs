//! Bounded metadata returned by `extract_info`.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};

/// Metadata for one video. Only `id` is guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractInfoResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulltitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// `YYYYMMDD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    /// Unix seconds, possibly fractional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webpage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<FormatInfo>>,
}

/// One available format, trimmed to the fields pollers care about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormatInfo {
    pub format_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcodec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acodec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl ExtractInfoResponse {
    /// Bound a raw engine info mapping to the response shape.
    ///
    /// Unknown fields are dropped, and so is any known field whose value has
    /// an unexpected type. A missing or empty `id` is an error.
    pub fn from_info(info: &Value) -> ModelResult<Self> {
        let id = match info.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => return Err(ModelError::MissingField("id")),
        };

        Ok(Self {
            id,
            title: field(info, "title"),
            fulltitle: field(info, "fulltitle"),
            description: field(info, "description"),
            duration: field(info, "duration"),
            uploader: field(info, "uploader"),
            uploader_id: field(info, "uploader_id"),
            channel: field(info, "channel"),
            channel_id: field(info, "channel_id"),
            upload_date: field(info, "upload_date"),
            timestamp: field(info, "timestamp"),
            view_count: count(info, "view_count"),
            like_count: count(info, "like_count"),
            webpage_url: field(info, "webpage_url"),
            thumbnail: field(info, "thumbnail"),
            extractor: field(info, "extractor"),
            tags: strings(info, "tags"),
            categories: strings(info, "categories"),
            formats: info
                .get("formats")
                .and_then(Value::as_array)
                .map(|formats| formats.iter().filter_map(FormatInfo::from_info).collect()),
        })
    }
}

impl FormatInfo {
    /// Entries without a string `format_id` are skipped.
    fn from_info(info: &Value) -> Option<Self> {
        Some(Self {
            format_id: info.get("format_id")?.as_str()?.to_string(),
            ext: field(info, "ext"),
            resolution: field(info, "resolution"),
            fps: field(info, "fps"),
            vcodec: field(info, "vcodec"),
            acodec: field(info, "acodec"),
            filesize: count(info, "filesize"),
            protocol: field(info, "protocol"),
        })
    }
}

fn field<T: DeserializeOwned>(info: &Value, key: &str) -> Option<T> {
    T::deserialize(info.get(key)?).ok()
}

/// Non-negative count; engines sometimes report these as floats.
fn count(info: &Value, key: &str) -> Option<u64> {
    let value = info.get(key)?;
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n as u64)
    })
}

/// String entries of a list, ignoring anything else.
fn strings(info: &Value, key: &str) -> Option<Vec<String>> {
    let items = info.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
    )
}
