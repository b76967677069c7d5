use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Created at the moment of dispatch; mutated only by the Router to
/// attach a result, never deleted. Forms the audit trail (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRequest {
    pub request_id: Uuid,
    pub bundle_name: String,
    pub command_name: String,
    pub parameters: Vec<String>,
    pub adapter: String,
    pub channel_id: String,
    /// chat-provider user id, prior to mapping to a gort username.
    pub provider_user_id: String,
    pub gort_username: String,
    pub timestamp: DateTime<Utc>,
}

impl CommandRequest {
    pub fn new(
        bundle_name: String,
        command_name: String,
        parameters: Vec<String>,
        adapter: String,
        channel_id: String,
        provider_user_id: String,
        gort_username: String,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            bundle_name,
            command_name,
            parameters,
            adapter,
            channel_id,
            provider_user_id,
            gort_username,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    pub request_id: Uuid,
    pub duration_ms: u64,
    /// 0 = success.
    pub status: i32,
    pub error: Option<String>,
    pub output: String,
    pub output_stderr: String,
    pub structured: Option<serde_json::Value>,
}

impl CommandResponse {
    pub fn success(request_id: Uuid, duration_ms: u64, output: String, output_stderr: String) -> Self {
        let structured = serde_json::from_str::<serde_json::Value>(output.trim()).ok();
        Self {
            request_id,
            duration_ms,
            status: 0,
            error: None,
            output,
            output_stderr,
            structured,
        }
    }

    /// Builds a response from a completed backend execution, deriving
    /// `status`/`error` from the process's exit code (§3: 0 = success;
    /// §7: a post-dispatch failure must close with non-zero status).
    pub fn from_result(request_id: Uuid, duration_ms: u64, exit_code: i32, output: String, output_stderr: String) -> Self {
        let structured = serde_json::from_str::<serde_json::Value>(output.trim()).ok();
        let error = if exit_code != 0 {
            Some(format!("exit status {exit_code}"))
        } else {
            None
        };
        Self {
            request_id,
            duration_ms,
            status: exit_code,
            error,
            output,
            output_stderr,
            structured,
        }
    }

    pub fn failure(request_id: Uuid, duration_ms: u64, status: i32, error: impl Into<String>) -> Self {
        Self {
            request_id,
            duration_ms,
            status,
            error: Some(error.into()),
            output: String::new(),
            output_stderr: String::new(),
            structured: None,
        }
    }
}
