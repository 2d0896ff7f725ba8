use super::{AssistantInfo, JobService, Run, ThreadMessage, UpstreamError};
use crate::http::build_client;
use crate::models::Role;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ASSISTANT_ID: &str = "asst_Vyg9xBn8t8QZtdYwdJRTZAr1";
const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_key: Option<String>,
    pub assistant_id: String,
    pub base_url: String,
}

impl AssistantConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            assistant_id: std::env::var("OPENAI_ASSISTANT_ID")
                .ok()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ASSISTANT_ID.into()),
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// First characters of the key, safe to show in diagnostics.
    pub fn masked_key(&self) -> String {
        match &self.api_key {
            Some(key) => format!("{}...", key.chars().take(5).collect::<String>()),
            None => "Not Set".into(),
        }
    }
}

/// Assistants v2 HTTP client: threads are jobs, runs are executions.
pub struct OpenAiJobs {
    http: Client,
    config: AssistantConfig,
}

impl OpenAiJobs {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, UpstreamError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| UpstreamError::Unavailable("OPENAI_API_KEY is not set".into()))?;
        let url = format!("{}{path}", self.config.base_url);
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(key)
            .header(BETA_HEADER.0, BETA_HEADER.1))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, UpstreamError> {
        let response = request
            .send()
            .await
            .map_err(|err| UpstreamError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|env| env.error.message)
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return Err(UpstreamError::Unavailable(format!("HTTP {status}: {detail}")));
        }

        response
            .json()
            .await
            .map_err(|err| UpstreamError::Unavailable(format!("invalid response: {err}")))
    }
}

#[async_trait]
impl JobService for OpenAiJobs {
    async fn create_thread(&self) -> Result<String, UpstreamError> {
        let request = self.request(Method::POST, "/threads")?.json(&json!({}));
        let thread: ThreadObject = self.send(request).await?;
        Ok(thread.id)
    }

    async fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), UpstreamError> {
        let body = CreateMessage {
            role: role.as_str(),
            content,
        };
        let request = self
            .request(Method::POST, &thread_path(thread_id, "/messages"))?
            .json(&body);
        let _: MessageObject = self.send(request).await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, UpstreamError> {
        let request = self
            .request(Method::POST, &thread_path(thread_id, "/runs"))?
            .json(&json!({ "assistant_id": assistant_id }));
        self.send(request).await
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, UpstreamError> {
        let tail = format!("/runs/{}", urlencoding::encode(run_id));
        let request = self.request(Method::GET, &thread_path(thread_id, &tail))?;
        self.send(request).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, UpstreamError> {
        let request = self
            .request(Method::GET, &thread_path(thread_id, "/messages"))?
            .query(&[("order", "desc"), ("limit", "20")]);
        let list: MessageList = self.send(request).await?;
        Ok(list.data.into_iter().map(MessageObject::into_message).collect())
    }

    async fn describe_assistant(&self, assistant_id: &str) -> Result<AssistantInfo, UpstreamError> {
        let path = format!("/assistants/{}", urlencoding::encode(assistant_id));
        let request = self.request(Method::GET, &path)?;
        let assistant: AssistantObject = self.send(request).await?;
        Ok(AssistantInfo {
            id: assistant.id,
            name: assistant.name,
            model: assistant.model,
        })
    }
}

/// Ids are single path segments; `/` and other reserved characters are
/// percent-encoded so they cannot leave `/threads/{id}`.
fn thread_path(thread_id: &str, tail: &str) -> String {
    format!("/threads/{}{tail}", urlencoding::encode(thread_id))
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    role: Role,
    #[serde(default)]
    content: Vec<ContentPart>,
}

impl MessageObject {
    /// Keeps the first text part; image and file parts carry no reply text.
    fn into_message(self) -> ThreadMessage {
        let text = self
            .content
            .into_iter()
            .find(|part| part.kind == "text")
            .and_then(|part| part.text)
            .map(|text| text.value)
            .unwrap_or_default();
        ThreadMessage {
            role: self.role,
            text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    value: String,
}

#[derive(Debug, Deserialize)]
struct AssistantObject {
    id: String,
    #[serde(default)]
    name: Option<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::RunStatus;
    use serde_json::json;

    #[test]
    fn message_object_keeps_first_text_part() {
        let raw = json!({
            "id": "msg_1",
            "role": "assistant",
            "created_at": 1700000000,
            "content": [
                { "type": "image_file", "image_file": { "file_id": "f" } },
                { "type": "text", "text": { "value": "Use a notched trowel.", "annotations": [] } },
            ],
        });
        let msg: MessageObject = serde_json::from_value(raw).unwrap();
        let msg = msg.into_message();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.text, "Use a notched trowel.");
    }

    #[test]
    fn run_object_parses_status() {
        let raw = json!({
            "id": "run_1",
            "object": "thread.run",
            "thread_id": "thread_1",
            "assistant_id": "asst_1",
            "status": "in_progress",
            "created_at": 1700000000,
        });
        let run: Run = serde_json::from_value(raw).unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
        assert_eq!(run.thread_id, "thread_1");
    }

    #[tokio::test]
    async fn missing_key_is_unavailable_without_network() {
        let jobs = OpenAiJobs::new(AssistantConfig {
            api_key: None,
            assistant_id: "asst_test".into(),
            base_url: "http://127.0.0.1:9".into(),
        });
        let err = jobs.create_thread().await.expect_err("no key");
        assert!(matches!(err, UpstreamError::Unavailable(_)));
    }

    #[test]
    fn ids_stay_inside_their_path_segment() {
        let jobs = OpenAiJobs::new(AssistantConfig {
            api_key: Some("sk-test".into()),
            assistant_id: "asst_test".into(),
            base_url: "http://127.0.0.1:9/v1".into(),
        });
        let path = thread_path("../../assistants/asst_other", "/messages");
        let request = jobs
            .request(Method::POST, &path)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.url().path(),
            "/v1/threads/..%2F..%2Fassistants%2Fasst_other/messages"
        );
        assert_eq!(thread_path("thread_abc", "/runs"), "/threads/thread_abc/runs");
    }

    #[test]
    fn masked_key_shows_prefix_only() {
        let config = AssistantConfig {
            api_key: Some("sk-abcdef123456".into()),
            assistant_id: "asst".into(),
            base_url: DEFAULT_BASE_URL.into(),
        };
        assert_eq!(config.masked_key(), "sk-ab...");
    }
}
