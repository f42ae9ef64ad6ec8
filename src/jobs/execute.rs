use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::Outcome;
use crate::executor::{ExecutionRequest, ExecutionResult, Executor};
use crate::redis_manager::keys;

/// Execution job received from the Redis queue
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteJob {
    pub request_id: String,
    /// List the result is pushed to (defaults to `execute:result:<request_id>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub stdin: Option<String>,
}

impl ExecuteJob {
    pub fn result_key(&self) -> String {
        self.result_key
            .clone()
            .unwrap_or_else(|| format!("{}{}", keys::EXECUTE_RESULT_PREFIX, self.request_id))
    }

    fn to_request(&self) -> ExecutionRequest {
        ExecutionRequest {
            code: self.code.clone(),
            language: self.language.clone(),
            stdin: self.stdin.clone().unwrap_or_default(),
        }
    }
}

/// What the caller sees: program output, or an error for outcomes that
/// produced none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecuteResponse {
    Output { output: String },
    Error { error: String, kind: Outcome },
}

impl From<&ExecutionResult> for ExecuteResponse {
    fn from(result: &ExecutionResult) -> Self {
        if result.outcome.is_failure_response() {
            ExecuteResponse::Error {
                error: result
                    .message
                    .clone()
                    .unwrap_or_else(|| result.outcome.to_string()),
                kind: result.outcome,
            }
        } else {
            ExecuteResponse::Output {
                output: result.combined_output(),
            }
        }
    }
}

/// Result of an execution job
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub request_id: String,
    /// Workspace id, for matching the result against worker logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    pub outcome: Outcome,
    pub exit_code: Option<i32>,
    /// Output was cut at the capture limit
    #[serde(default)]
    pub truncated: bool,
    #[serde(flatten)]
    pub response: ExecuteResponse,
}

impl ExecuteResult {
    pub fn new(request_id: impl Into<String>, result: &ExecutionResult) -> Self {
        Self {
            request_id: request_id.into(),
            execution_id: result.execution_id,
            outcome: result.outcome,
            exit_code: result.exit_code,
            truncated: result.truncated,
            response: ExecuteResponse::from(result),
        }
    }

    /// Reply to a job that was never executed
    pub fn rejected(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            execution_id: None,
            outcome: Outcome::InfrastructureError,
            exit_code: None,
            truncated: false,
            response: ExecuteResponse::Error {
                error: message.into(),
                kind: Outcome::InfrastructureError,
            },
        }
    }
}

/// Process an execution job
pub async fn process_execute_job(
    executor: &Executor,
    job: &ExecuteJob,
    cancel: &CancellationToken,
) -> ExecuteResult {
    let result = executor
        .execute_with_cancel(&job.to_request(), cancel)
        .await;
    ExecuteResult::new(&job.request_id, &result)
}
