use super::{JobService, PollConfig, Run, RunPoller, ThreadMessage, UpstreamError};
use crate::models::Role;
use std::sync::Arc;
use tracing::{debug, info};

const PRIMING_PREAMBLE: &str = "You are a DIY construction assistant. Please respond as if you are an expert in home improvement and construction projects.";

/// Submits turns to a thread and drives their runs through the poller.
#[derive(Clone)]
pub struct RunDriver {
    service: Arc<dyn JobService>,
    poller: RunPoller,
    assistant_id: String,
}

impl RunDriver {
    pub fn new(service: Arc<dyn JobService>, poller: RunPoller, assistant_id: String) -> Self {
        Self {
            service,
            poller,
            assistant_id,
        }
    }

    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    pub fn service(&self) -> &dyn JobService {
        self.service.as_ref()
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poller.config()
    }

    pub async fn create_thread(&self) -> Result<String, UpstreamError> {
        let thread_id = self.service.create_thread().await?;
        info!(target = "buildlist.assistant", thread_id = %thread_id, "thread_created");
        Ok(thread_id)
    }

    /// Sends the priming context as its own turn and waits for that run to
    /// finish.
    pub async fn prime(&self, thread_id: &str, context: &str) -> Result<(), UpstreamError> {
        let content = format!("{PRIMING_PREAMBLE} {context}");
        self.service
            .append_message(thread_id, Role::User, &content)
            .await?;
        let run = self.service.start_run(thread_id, &self.assistant_id).await?;
        self.poller.wait(self.service.as_ref(), &run).await?;
        debug!(target = "buildlist.assistant", thread_id = %thread_id, "priming_processed");
        Ok(())
    }

    /// Appends `message` and starts a run for it. A priming context, when
    /// given, is fully processed first.
    pub async fn submit(
        &self,
        thread_id: &str,
        message: &str,
        priming: Option<&str>,
    ) -> Result<Run, UpstreamError> {
        if let Some(context) = priming {
            self.prime(thread_id, context).await?;
        }
        self.service
            .append_message(thread_id, Role::User, message)
            .await?;
        let run = self.service.start_run(thread_id, &self.assistant_id).await?;
        debug!(
            target = "buildlist.assistant",
            thread_id = %thread_id,
            run_id = %run.id,
            "run_started"
        );
        Ok(run)
    }

    pub async fn complete(&self, run: &Run) -> Result<Run, UpstreamError> {
        self.poller.wait(self.service.as_ref(), run).await
    }

    /// Submit, then wait for the run to reach a successful terminal state.
    pub async fn submit_and_wait(
        &self,
        thread_id: &str,
        message: &str,
        priming: Option<&str>,
    ) -> Result<Run, UpstreamError> {
        let run = self.submit(thread_id, message, priming).await?;
        self.complete(&run).await
    }

    pub async fn messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, UpstreamError> {
        self.service.list_messages(thread_id).await
    }

    /// Text of the newest assistant message, empty when there is none.
    pub async fn latest_reply(&self, thread_id: &str) -> Result<String, UpstreamError> {
        let messages = self.messages(thread_id).await?;
        Ok(messages
            .into_iter()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.text)
            .unwrap_or_default())
    }
}
