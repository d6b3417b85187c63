//! Published JSON schemas of the request and response models.

use axum::extract::Path;
use axum::Json;
use schemars::schema::RootSchema;
use schemars::schema_for;

use tubeflow_models::{DownloadRequest, ExtractInfoRequest, ExtractInfoResponse, ProgressSnapshot};

use crate::error::{ApiError, ApiResult};

pub const SCHEMA_NAMES: [&str; 4] = ["download", "extract-info", "extract-info-response", "progress"];

pub async fn get_schema(Path(name): Path<String>) -> ApiResult<Json<RootSchema>> {
    let schema = match name.as_str() {
        "download" => schema_for!(DownloadRequest),
        "extract-info" => schema_for!(ExtractInfoRequest),
        "extract-info-response" => schema_for!(ExtractInfoResponse),
        "progress" => schema_for!(ProgressSnapshot),
        _ => {
            return Err(ApiError::not_found(format!(
                "unknown schema '{name}', expected one of {}",
                SCHEMA_NAMES.join(", ")
            )))
        }
    };
    Ok(Json(schema))
}
