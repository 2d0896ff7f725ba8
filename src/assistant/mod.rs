pub mod driver;
pub mod openai;
pub mod poller;
#[cfg(test)]
pub mod testing;

pub use driver::RunDriver;
pub use openai::{AssistantConfig, OpenAiJobs};
pub use poller::{Clock, PollConfig, RunPoller, TokioClock};

use crate::models::Role;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;

/// Remote job service that executes assistant runs against a thread.
///
/// Any non-success answer from the service is reported as
/// [`UpstreamError::Unavailable`]; run outcomes are classified by the poller.
#[async_trait]
pub trait JobService: Send + Sync {
    async fn create_thread(&self) -> Result<String, UpstreamError>;

    async fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), UpstreamError>;

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, UpstreamError>;

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, UpstreamError>;

    /// Messages of a thread, newest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, UpstreamError>;

    async fn describe_assistant(&self, assistant_id: &str) -> Result<AssistantInfo, UpstreamError>;
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("job service unavailable: {0}")]
    Unavailable(String),
    #[error("run {run_id} ended with status `{status}`")]
    RunFailed { run_id: String, status: RunStatus },
    #[error("run {run_id} did not complete after {attempts} checks in {elapsed:?}")]
    Timeout {
        run_id: String,
        attempts: u32,
        elapsed: Duration,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

/// How the poller should treat an observed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Pending,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn outcome(&self) -> RunOutcome {
        match self {
            RunStatus::Completed => RunOutcome::Succeeded,
            // No tool handlers are registered, so a run waiting on tool output
            // would never progress.
            RunStatus::Failed
            | RunStatus::Cancelled
            | RunStatus::Expired
            | RunStatus::Incomplete
            | RunStatus::RequiresAction => RunOutcome::Failed,
            RunStatus::Queued
            | RunStatus::InProgress
            | RunStatus::Cancelling
            | RunStatus::Unknown => RunOutcome::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of the assistant against a thread. Only the remote service
/// changes its status.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantInfo {
    pub id: String,
    pub name: Option<String>,
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(RunStatus::Completed.outcome(), RunOutcome::Succeeded);
        for status in [RunStatus::Failed, RunStatus::Cancelled, RunStatus::Expired] {
            assert_eq!(status.outcome(), RunOutcome::Failed, "{status}");
        }
        for status in [RunStatus::Queued, RunStatus::InProgress, RunStatus::Cancelling] {
            assert_eq!(status.outcome(), RunOutcome::Pending, "{status}");
        }
    }

    #[test]
    fn unknown_status_strings_keep_polling() {
        let status: RunStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(status, RunStatus::Unknown);
        assert_eq!(status.outcome(), RunOutcome::Pending);
        let status: RunStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(status, RunStatus::InProgress);
    }
}
