//! Progress polling.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tubeflow_queue::{Entity, IdentifierType};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    /// `invocation-id`, `url` or `id` (the `by-` prefix is optional)
    pub by: String,
    pub value: String,
    /// `reduced` (default) or `full`
    #[serde(default)]
    pub view: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressView {
    Full,
    Reduced,
}

impl ProgressView {
    fn parse(view: Option<&str>) -> ApiResult<Self> {
        match view {
            None | Some("reduced") => Ok(ProgressView::Reduced),
            Some("full") => Ok(ProgressView::Full),
            Some(other) => Err(ApiError::validation(format!(
                "view must be 'full' or 'reduced', got '{other}'"
            ))),
        }
    }

    fn entity(self) -> Entity {
        match self {
            ProgressView::Full => Entity::Info,
            ProgressView::Reduced => Entity::Progress,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub by: &'static str,
    pub value: String,
    pub view: ProgressView,
    pub progress: Value,
    /// Bytes downloaded per output file
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub downloaded_bytes: BTreeMap<String, u64>,
}

/// Latest progress snapshot stored for one identifier.
pub async fn get_progress(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> ApiResult<Json<ProgressResponse>> {
    let id_type: IdentifierType = query.by.parse().map_err(ApiError::validation)?;
    let view = ProgressView::parse(query.view.as_deref())?;
    if query.value.trim().is_empty() {
        return Err(ApiError::validation("value must not be blank"));
    }

    let raw = state
        .store
        .get_entry(view.entity(), id_type, &query.value)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!("no progress for {} {}", id_type, query.value))
        })?;
    let progress: Value = serde_json::from_str(&raw)
        .map_err(|e| ApiError::internal(format!("stored progress is not JSON: {e}")))?;

    let bytes_key = state
        .store
        .keys()
        .key(Entity::DownloadedBytes, id_type, &query.value);
    let downloaded_bytes = state
        .store
        .get_hash(&bytes_key)
        .await?
        .into_iter()
        .filter_map(|(file, bytes)| bytes.parse().ok().map(|bytes| (file, bytes)))
        .collect();

    Ok(Json(ProgressResponse {
        by: id_type.as_str(),
        value: query.value,
        view,
        progress,
        downloaded_bytes,
    }))
}
