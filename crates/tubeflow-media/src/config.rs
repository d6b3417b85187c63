//! Engine configuration.

use serde_json::{Map, Value};
use thiserror::Error;
use tubeflow_models::DownloadOptions;

use crate::params::{EngineParams, ENGINE_FIELDS};

/// Invalid engine configuration.
#[derive(Debug, Error)]
pub enum EngineConfigError {
    #[error("{var} is not a valid engine parameter object: {source}")]
    InvalidParams {
        var: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Process-wide engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// yt-dlp binary name or path
    pub binary: String,
    /// Lowest-precedence parameter layer
    pub defaults: EngineParams,
    /// Highest-precedence parameter layer, always wins over request options
    pub overrides: EngineParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            defaults: EngineParams::default(),
            overrides: EngineParams::default(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, EngineConfigError> {
        Ok(Self {
            binary: std::env::var("YTDLP_BINARY").unwrap_or_else(|_| "yt-dlp".to_string()),
            defaults: params_from_env("TUBEFLOW_ENGINE_DEFAULTS")?,
            overrides: params_from_env("TUBEFLOW_ENGINE_OVERRIDES")?,
        })
    }
}

fn params_from_env(var: &'static str) -> Result<EngineParams, EngineConfigError> {
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => parse_params(var, &raw),
        _ => Ok(EngineParams::default()),
    }
}

/// Parse one parameter layer, rejecting keys neither half recognizes.
///
/// `EngineParams` flattens its options, which switches off unknown-field
/// checks, so the two halves are deserialized separately.
fn parse_params(var: &'static str, raw: &str) -> Result<EngineParams, EngineConfigError> {
    let invalid = |source| EngineConfigError::InvalidParams { var, source };

    let object: Map<String, Value> = serde_json::from_str(raw).map_err(invalid)?;
    let (engine, options): (Map<String, Value>, Map<String, Value>) = object
        .into_iter()
        .partition(|(key, _)| ENGINE_FIELDS.contains(&key.as_str()));

    let options: DownloadOptions = serde_json::from_value(Value::Object(options)).map_err(invalid)?;
    let mut params: EngineParams = serde_json::from_value(Value::Object(engine)).map_err(invalid)?;
    params.options = options;
    Ok(params)
}
