pub mod execute;

use crate::jobs::execute::ExecuteJob;
use crate::redis_manager::keys;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Worker job enum - represents different types of jobs the worker can process
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum WorkerJob {
    /// Run a code snippet in the sandbox
    #[serde(rename = "execute")]
    Execute(ExecuteJob),
}

/// A queued job that could not be parsed, with whatever addressing fields
/// were still readable
#[derive(Debug, Error)]
#[error("Invalid job: {error}")]
pub struct MalformedJob {
    pub request_id: Option<String>,
    pub result_key: Option<String>,
    pub error: String,
}

impl MalformedJob {
    /// Where the rejection goes; None when the requester cannot be identified
    pub fn result_key(&self) -> Option<String> {
        let request_id = self.request_id.as_ref()?;
        Some(
            self.result_key
                .clone()
                .unwrap_or_else(|| format!("{}{}", keys::EXECUTE_RESULT_PREFIX, request_id)),
        )
    }
}

/// Parse a job popped from the queue
pub fn parse_job(data: &str) -> Result<WorkerJob, MalformedJob> {
    serde_json::from_str::<WorkerJob>(data).map_err(|e| {
        let value = serde_json::from_str::<serde_json::Value>(data).ok();
        let field = |name: &str| {
            value
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        MalformedJob {
            request_id: field("request_id"),
            result_key: field("result_key"),
            error: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_execute_job() {
        let json = r#"{"job_type":"execute","request_id":"r-1","code":"print(1)","language":"python"}"#;
        let WorkerJob::Execute(job) = parse_job(json).unwrap();
        assert_eq!(job.request_id, "r-1");
        assert_eq!(job.language, "python");
        assert_eq!(job.stdin, None);
    }

    #[test]
    fn test_unknown_job_type_is_rejected() {
        let json = r#"{"job_type":"judge","submission_id":1}"#;
        assert!(serde_json::from_str::<WorkerJob>(json).is_err());
    }

    #[test]
    fn test_job_missing_code_keeps_request_id() {
        let json = r#"{"job_type":"execute","request_id":"r-9","language":"python"}"#;
        let malformed = parse_job(json).unwrap_err();

        assert_eq!(malformed.request_id.as_deref(), Some("r-9"));
        assert_eq!(malformed.result_key().as_deref(), Some("execute:result:r-9"));
        assert!(malformed.to_string().starts_with("Invalid job: "));
        assert!(malformed.error.contains("code"));
    }

    #[test]
    fn test_malformed_job_honours_result_key() {
        let json = r#"{"job_type":"execute","request_id":"r-3","result_key":"custom","code":42,"language":"c"}"#;
        let malformed = parse_job(json).unwrap_err();
        assert_eq!(malformed.result_key().as_deref(), Some("custom"));
    }

    #[test]
    fn test_unidentifiable_job_has_nowhere_to_report() {
        let malformed = parse_job("not json at all").unwrap_err();
        assert_eq!(malformed.request_id, None);
        assert_eq!(malformed.result_key(), None);

        let malformed = parse_job(r#"{"job_type":"execute","result_key":"k"}"#).unwrap_err();
        assert_eq!(malformed.result_key(), None);
    }
}
