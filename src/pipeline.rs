use crate::affiliate::attach_links;
use crate::assistant::{
    AssistantConfig, AssistantInfo, OpenAiJobs, PollConfig, RunDriver, RunPoller, TokioClock,
    UpstreamError,
};
use crate::extract::{extract, strip_payload};
use crate::mock;
use crate::models::{
    ChatAction, ChatMessage, ChatRequest, ChatResponse, ProductItem, Recommendations, Role,
};
use crate::sessions::{SessionMode, SessionStore};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const RECOMMENDATION_REQUEST: &str = r#"Please provide recommendations for my project in JSON format with "materials" and "tools" arrays. Each item should have a "name" property."#;

const FALLBACK_MATERIALS: [&str; 4] = [
    "Drywall Sheets",
    "Joint Compound",
    "Drywall Tape",
    "Primer Paint",
];

const FALLBACK_TOOLS: [&str; 4] = [
    "Drywall Saw",
    "Utility Knife",
    "Drywall Screwdriver",
    "Taping Knife",
];

/// Static catalog returned whenever no recommendations can be extracted.
pub fn fallback_catalog() -> Recommendations {
    let mut catalog = Recommendations {
        materials: FALLBACK_MATERIALS.iter().map(|n| ProductItem::named(*n)).collect(),
        tools: FALLBACK_TOOLS.iter().map(|n| ProductItem::named(*n)).collect(),
    };
    attach_links(&mut catalog);
    catalog
}

#[derive(Clone)]
enum Backend {
    Live(RunDriver),
    Mock,
}

/// Every chat action goes through here, in live or degraded mode.
#[derive(Clone)]
pub struct Pipeline {
    backend: Backend,
    sessions: SessionStore,
    key_hint: String,
}

impl Pipeline {
    pub fn live(driver: RunDriver, sessions: SessionStore) -> Self {
        Self {
            backend: Backend::Live(driver),
            sessions,
            key_hint: "Set".into(),
        }
    }

    pub fn mock(sessions: SessionStore) -> Self {
        Self {
            backend: Backend::Mock,
            sessions,
            key_hint: "Not Set".into(),
        }
    }

    pub fn from_env(sessions: SessionStore) -> Self {
        let config = AssistantConfig::from_env();
        if !config.has_credentials() {
            warn!(
                target = "buildlist.pipeline",
                "OPENAI_API_KEY is not set; serving canned replies"
            );
            return Self::mock(sessions);
        }
        let poll = PollConfig::from_env();
        info!(
            target = "buildlist.pipeline",
            key = %config.masked_key(),
            assistant_id = %config.assistant_id,
            interval_ms = poll.interval.as_millis() as u64,
            max_attempts = poll.max_attempts,
            timeout_secs = poll.timeout.as_secs(),
            "job service configured"
        );
        let assistant_id = config.assistant_id.clone();
        let key_hint = config.masked_key();
        let service = Arc::new(OpenAiJobs::new(config));
        let poller = RunPoller::new(poll, Arc::new(TokioClock));
        Self {
            key_hint,
            ..Self::live(RunDriver::new(service, poller, assistant_id), sessions)
        }
    }

    pub fn mode(&self) -> SessionMode {
        match self.backend {
            Backend::Live(_) => SessionMode::Live,
            Backend::Mock => SessionMode::Mock,
        }
    }

    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse, PipelineError> {
        match request.action {
            ChatAction::CreateThread => self.create_thread(&request).await,
            ChatAction::SendMessage => self.send_message(&request).await,
            ChatAction::GenerateRecommendations => self.generate_recommendations(&request).await,
            ChatAction::Unknown => Err(PipelineError::invalid_input("chat", "Invalid action")),
        }
    }

    async fn create_thread(&self, request: &ChatRequest) -> Result<ChatResponse, PipelineError> {
        let Backend::Live(driver) = &self.backend else {
            return Ok(self.mock_thread(request).await);
        };

        let thread_id = match driver.create_thread().await {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    target = "buildlist.pipeline",
                    error = %err,
                    "thread creation failed; continuing in degraded mode"
                );
                crate::metrics::degraded("create_thread");
                return Ok(self.mock_thread(request).await);
            }
        };
        self.sessions.open(&thread_id, SessionMode::Live).await;

        let priming = request.priming_context();
        match request.text() {
            Some(message) => {
                driver
                    .submit_and_wait(&thread_id, message, priming)
                    .await
                    .map_err(|err| PipelineError::upstream("create_thread", &err))?;
                let reply = driver
                    .latest_reply(&thread_id)
                    .await
                    .map_err(|err| PipelineError::upstream("create_thread", &err))?;
                self.sessions.touch(&thread_id, SessionMode::Live).await;
                Ok(ChatResponse::reply(Some(thread_id), strip_payload(&reply)))
            }
            None => {
                if let Some(context) = priming {
                    driver
                        .prime(&thread_id, context)
                        .await
                        .map_err(|err| PipelineError::upstream("create_thread", &err))?;
                }
                Ok(ChatResponse::thread_only(thread_id))
            }
        }
    }

    async fn mock_thread(&self, request: &ChatRequest) -> ChatResponse {
        let thread_id = mock::synthetic_thread_id();
        self.sessions.open(&thread_id, SessionMode::Mock).await;
        let reply = mock::canned_reply(request.text());
        info!(target = "buildlist.pipeline", thread_id = %thread_id, "mock_thread_created");
        ChatResponse::reply(Some(thread_id), reply)
    }

    async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse, PipelineError> {
        let (Some(thread_id), Some(message)) = (request.thread(), request.text()) else {
            return Err(PipelineError::invalid_input(
                "send_message",
                "Thread ID and message are required",
            ));
        };
        check_thread_id("send_message", thread_id)?;

        match &self.backend {
            Backend::Live(driver) if !mock::is_synthetic(thread_id) => {
                driver
                    .submit_and_wait(thread_id, message, None)
                    .await
                    .map_err(|err| PipelineError::upstream("send_message", &err))?;
                let reply = driver
                    .latest_reply(thread_id)
                    .await
                    .map_err(|err| PipelineError::upstream("send_message", &err))?;
                self.sessions.touch(thread_id, SessionMode::Live).await;
                Ok(ChatResponse::reply(None, strip_payload(&reply)))
            }
            _ => {
                self.sessions.touch(thread_id, SessionMode::Mock).await;
                Ok(ChatResponse::reply(None, mock::canned_reply(Some(message))))
            }
        }
    }

    async fn generate_recommendations(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatResponse, PipelineError> {
        let Some(thread_id) = request.thread() else {
            return Err(PipelineError::invalid_input(
                "generate_recommendations",
                "Thread ID is required",
            ));
        };
        check_thread_id("generate_recommendations", thread_id)?;
        let recommendations = self.resolve(thread_id, &request.messages).await;
        self.sessions
            .remember_recommendations(thread_id, &recommendations)
            .await;
        Ok(ChatResponse::recommendations(recommendations))
    }

    /// Recommendations for a thread. Never fails: any upstream failure or an
    /// unusable reply yields [`fallback_catalog`]. Every returned item carries
    /// an affiliate link.
    pub async fn resolve(&self, thread_id: &str, history: &[ChatMessage]) -> Recommendations {
        let user_turns = history.iter().filter(|m| m.role == Role::User).count();
        let driver = match &self.backend {
            Backend::Live(driver) if !mock::is_synthetic(thread_id) => driver,
            _ => {
                crate::metrics::fallback_used("mock");
                return fallback_catalog();
            }
        };

        match find_recommendations(driver, thread_id).await {
            Ok(Some(mut recommendations)) => {
                attach_links(&mut recommendations);
                info!(
                    target = "buildlist.pipeline",
                    thread_id = %thread_id,
                    user_turns,
                    materials = recommendations.materials.len(),
                    items = recommendations.items().count(),
                    "recommendations_extracted"
                );
                recommendations
            }
            Ok(None) => {
                warn!(
                    target = "buildlist.pipeline",
                    thread_id = %thread_id,
                    user_turns,
                    "no recommendation payload in assistant replies"
                );
                crate::metrics::fallback_used("not_found");
                fallback_catalog()
            }
            Err(err) => {
                warn!(
                    target = "buildlist.pipeline",
                    thread_id = %thread_id,
                    error = %err,
                    "recommendation run failed"
                );
                crate::metrics::fallback_used(fallback_reason(&err));
                fallback_catalog()
            }
        }
    }

    pub async fn status(&self) -> StatusReport {
        let sessions = self.sessions.count().await;
        let Backend::Live(driver) = &self.backend else {
            return StatusReport {
                mode: SessionMode::Mock,
                api_key: self.key_hint.clone(),
                assistant_id: None,
                assistant: None,
                poll: None,
                error: None,
                sessions,
            };
        };
        let probe = driver
            .service()
            .describe_assistant(driver.assistant_id())
            .await;
        let (assistant, error) = match probe {
            Ok(info) => (Some(info), None),
            Err(err) => (None, Some(err.to_string())),
        };
        let poll = driver.poll_config();
        StatusReport {
            mode: SessionMode::Live,
            api_key: self.key_hint.clone(),
            assistant_id: Some(driver.assistant_id().to_string()),
            assistant,
            poll: Some(PollSummary {
                interval_ms: poll.interval.as_millis() as u64,
                max_attempts: poll.max_attempts,
                timeout_secs: poll.timeout.as_secs(),
            }),
            error,
            sessions,
        }
    }
}

/// Asks for the two-collection payload, then scans assistant replies newest
/// first until one yields a valid payload.
async fn find_recommendations(
    driver: &RunDriver,
    thread_id: &str,
) -> Result<Option<Recommendations>, UpstreamError> {
    driver
        .submit_and_wait(thread_id, RECOMMENDATION_REQUEST, None)
        .await?;
    let messages = driver.messages(thread_id).await?;
    Ok(messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .find_map(|m| extract(&m.text)))
}

/// Thread ids travel into upstream URL paths, so only the characters the
/// job service and the mock path ever issue are accepted.
fn check_thread_id(stage: &'static str, thread_id: &str) -> Result<(), PipelineError> {
    let valid = thread_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::invalid_input(stage, "Invalid thread ID"))
    }
}

fn fallback_reason(err: &UpstreamError) -> &'static str {
    match err {
        UpstreamError::Unavailable(_) => "unavailable",
        UpstreamError::RunFailed { .. } => "run_failed",
        UpstreamError::Timeout { .. } => "timeout",
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub mode: SessionMode,
    pub api_key: String,
    pub assistant_id: Option<String>,
    pub assistant: Option<AssistantInfo>,
    pub poll: Option<PollSummary>,
    pub error: Option<String>,
    pub sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct PollSummary {
    pub interval_ms: u64,
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Upstream,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn upstream(stage: &'static str, err: &UpstreamError) -> Self {
        Self {
            stage,
            message: err.to_string(),
            kind: PipelineErrorKind::Upstream,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
