//! Invocation submission and outcome polling.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use tracing::info;

use tubeflow_models::{DownloadRequest, ExtractInfoRequest, InvocationId, ModelError};
use tubeflow_queue::{Invocation, InvocationOutcome};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Optional caller-chosen invocation id; a UUID is generated otherwise.
pub const INVOCATION_ID_HEADER: &str = "X-Invocation-ID";

const MAX_INVOCATION_ID_LEN: usize = 128;

/// Accepted submission, with the invocation id echoed as a header.
pub type Submitted = (StatusCode, [(&'static str, String); 1], Json<SubmitResponse>);

/// Accepted submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub invocation_id: InvocationId,
    pub handler: &'static str,
}

/// Queue a `download` invocation.
pub async fn submit_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Submitted> {
    let request = DownloadRequest::from_json(&body).map_err(|e| rejected("download", e))?;
    let invocation_id = invocation_id_from(&headers)?;

    info!(
        invocation_id = %invocation_id,
        urls = request.url.len(),
        destination = %request.output.destination,
        "Submitting download"
    );
    submit(&state, Invocation::download(invocation_id, request)).await
}

/// Queue an `extract_info` invocation.
pub async fn submit_extract_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Submitted> {
    let request =
        ExtractInfoRequest::from_json(&body).map_err(|e| rejected("extract_info", e))?;
    let invocation_id = invocation_id_from(&headers)?;

    info!(invocation_id = %invocation_id, url = %request.url, "Submitting extract_info");
    submit(&state, Invocation::extract_info(invocation_id, request)).await
}

/// Latest outcome record of an invocation.
pub async fn get_invocation(
    State(state): State<AppState>,
    Path(invocation_id): Path<String>,
) -> ApiResult<Json<InvocationOutcome>> {
    let invocation_id = InvocationId::from(invocation_id);
    state
        .store
        .get_outcome(&invocation_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no outcome for invocation {invocation_id}")))
}

fn rejected(handler: &'static str, error: ModelError) -> ApiError {
    metrics::record_invocation_rejected(handler);
    ApiError::from(error)
}

fn invocation_id_from(headers: &HeaderMap) -> ApiResult<InvocationId> {
    let Some(value) = headers.get(INVOCATION_ID_HEADER) else {
        return Ok(InvocationId::new());
    };

    let value = value
        .to_str()
        .map_err(|_| ApiError::validation(format!("{INVOCATION_ID_HEADER} must be ASCII")))?
        .trim();

    if value.is_empty() || value.len() > MAX_INVOCATION_ID_LEN {
        return Err(ApiError::validation(format!(
            "{INVOCATION_ID_HEADER} must be 1-{MAX_INVOCATION_ID_LEN} characters"
        )));
    }

    Ok(InvocationId::from(value))
}

async fn submit(
    state: &AppState,
    invocation: Invocation,
) -> ApiResult<Submitted> {
    let handler = invocation.handler();
    let invocation_id = invocation.invocation_id().clone();

    state.queue.enqueue(&invocation).await?;
    metrics::record_invocation_submitted(handler);

    Ok((
        StatusCode::ACCEPTED,
        [(INVOCATION_ID_HEADER, invocation_id.to_string())],
        Json(SubmitResponse {
            invocation_id,
            handler,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_invocation_id_generated_when_absent() {
        let id = invocation_id_from(&HeaderMap::new()).unwrap();
        assert_eq!(id.as_str().len(), 36);
    }

    #[test]
    fn test_invocation_id_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(INVOCATION_ID_HEADER, HeaderValue::from_static("  job-42 "));
        assert_eq!(invocation_id_from(&headers).unwrap().as_str(), "job-42");
    }

    #[test]
    fn test_blank_invocation_id_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(INVOCATION_ID_HEADER, HeaderValue::from_static("   "));
        assert!(matches!(
            invocation_id_from(&headers),
            Err(ApiError::Validation(_))
        ));
    }
}
