use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChatAction {
    CreateThread,
    SendMessage,
    GenerateRecommendations,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub action: ChatAction,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Thread id with surrounding whitespace removed; blank counts as absent.
    pub fn thread(&self) -> Option<&str> {
        self.thread_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn text(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.trim().is_empty())
    }

    /// First `system` entry of the supplied history, used as a priming turn.
    pub fn priming_context(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .filter(|c| !c.trim().is_empty())
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub thread_id: Option<String>,
    pub message: Option<String>,
    pub recommendations: Option<Recommendations>,
    pub ready_for_recommendations: Option<bool>,
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn reply(thread_id: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let ready = crate::extract::announces_recommendations(&message);
        Self {
            success: true,
            thread_id,
            message: Some(message),
            ready_for_recommendations: ready.then_some(true),
            ..Default::default()
        }
    }

    pub fn thread_only(thread_id: String) -> Self {
        Self {
            success: true,
            thread_id: Some(thread_id),
            ..Default::default()
        }
    }

    pub fn recommendations(recommendations: Recommendations) -> Self {
        Self {
            success: true,
            recommendations: Some(recommendations),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliate_url: Option<String>,
}

impl ProductItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affiliate_url: None,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        !self.name.trim().is_empty()
            && self
                .affiliate_url
                .as_deref()
                .map(|url| !url.trim().is_empty())
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Recommendations {
    pub materials: Vec<ProductItem>,
    pub tools: Vec<ProductItem>,
}

impl Recommendations {
    pub fn items(&self) -> impl Iterator<Item = &ProductItem> {
        self.materials.iter().chain(self.tools.iter())
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Body of `POST /api/email`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub items: Vec<ProductItem>,
    #[serde(default)]
    pub project_title: Option<String>,
    #[serde(default)]
    pub recommendations: Option<Recommendations>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailResponse {
    pub success: bool,
    pub message: String,
    pub preview_url: Option<String>,
}
