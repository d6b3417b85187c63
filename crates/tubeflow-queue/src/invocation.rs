//! Invocation payloads carried on the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tubeflow_models::{DownloadRequest, ExtractInfoRequest, InvocationId};

/// A queued `download` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadInvocation {
    pub invocation_id: InvocationId,
    pub request: DownloadRequest,
    pub created_at: DateTime<Utc>,
}

/// A queued `extract_info` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractInfoInvocation {
    pub invocation_id: InvocationId,
    pub request: ExtractInfoRequest,
    pub created_at: DateTime<Utc>,
}

/// Handler call wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Invocation {
    Download(DownloadInvocation),
    ExtractInfo(ExtractInfoInvocation),
}

impl Invocation {
    pub fn download(invocation_id: InvocationId, request: DownloadRequest) -> Self {
        Self::Download(DownloadInvocation {
            invocation_id,
            request,
            created_at: Utc::now(),
        })
    }

    pub fn extract_info(invocation_id: InvocationId, request: ExtractInfoRequest) -> Self {
        Self::ExtractInfo(ExtractInfoInvocation {
            invocation_id,
            request,
            created_at: Utc::now(),
        })
    }

    pub fn invocation_id(&self) -> &InvocationId {
        match self {
            Invocation::Download(i) => &i.invocation_id,
            Invocation::ExtractInfo(i) => &i.invocation_id,
        }
    }

    /// Handler name, used in outcome records, logs and metrics.
    pub fn handler(&self) -> &'static str {
        match self {
            Invocation::Download(_) => "download",
            Invocation::ExtractInfo(_) => "extract_info",
        }
    }

    /// One invocation id may be enqueued once.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.handler(), self.invocation_id())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Invocation::Download(i) => i.created_at,
            Invocation::ExtractInfo(i) => i.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tubeflow_models::{DownloadOutput, OutputRef};

    #[test]
    fn test_tagged_payload() {
        let request = DownloadRequest::new(
            "https://example.com/watch?v=1",
            DownloadOutput {
                destination: OutputRef::parse("s3://bucket/videos").unwrap(),
                filter: None,
            },
            None,
        )
        .unwrap();
        let invocation = Invocation::download(InvocationId::from("inv1"), request);

        let json = serde_json::to_value(&invocation).unwrap();
        assert_eq!(json["type"], "download");
        assert_eq!(json["invocation_id"], "inv1");
        assert_eq!(json["request"]["output"]["destination"], "s3://bucket/videos");

        let parsed: Invocation = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.handler(), "download");
        assert_eq!(parsed.idempotency_key(), "download:inv1");
    }

    #[test]
    fn test_extract_info_payload() {
        let request = ExtractInfoRequest::new("https://example.com/v", None).unwrap();
        let invocation = Invocation::extract_info(InvocationId::from("inv2"), request);
        let json = serde_json::to_string(&invocation).unwrap();
        assert!(json.contains(r#""type":"extract_info""#));
        assert_eq!(invocation.handler(), "extract_info");
    }
}
