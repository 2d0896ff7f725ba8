use crate::affiliate::attach_links;
use crate::http::build_client;
use crate::models::{EmailRequest, EmailResponse, ProductItem};
use crate::pipeline::PipelineError;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_PROJECT_TITLE: &str = "DIY Project";
const TOOL_HINTS: [&str; 4] = ["tool", "cutter", "knife", "measure"];

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("mail relay request failed: {0}")]
    Relay(String),
}

/// A validated shopping list, ready to hand to the mail relay.
#[derive(Debug, Clone, PartialEq)]
pub struct ShoppingList {
    pub recipient: String,
    pub email: String,
    pub project_title: String,
    pub materials: Vec<ProductItem>,
    pub tools: Vec<ProductItem>,
}

impl ShoppingList {
    pub fn from_request(request: EmailRequest) -> Result<Self, PipelineError> {
        let first = request.first_name.trim();
        let last = request.last_name.trim();
        let email = request.email.trim();
        if first.is_empty() || last.is_empty() || email.is_empty() || request.items.is_empty() {
            return Err(PipelineError::invalid_input(
                "email",
                "Invalid request. Required fields: firstName, lastName, email, and items (array)",
            ));
        }
        if !email.contains('@') {
            return Err(PipelineError::invalid_input("email", "Invalid email address"));
        }
        if !request.items.iter().all(ProductItem::is_well_formed) {
            return Err(PipelineError::invalid_input(
                "email",
                "Invalid items format. Each item must have name and affiliate_url properties",
            ));
        }

        let project_title = request
            .project_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_PROJECT_TITLE)
            .to_string();

        let (materials, tools) = match request.recommendations {
            Some(mut recommendations) => {
                attach_links(&mut recommendations);
                if !recommendations.items().all(ProductItem::is_well_formed) {
                    return Err(PipelineError::invalid_input(
                        "email",
                        "Invalid recommendations format. Each item must have a name",
                    ));
                }
                (recommendations.materials, recommendations.tools)
            }
            None => request
                .items
                .into_iter()
                .partition(|item| !looks_like_tool(&item.name)),
        };

        Ok(Self {
            recipient: format!("{first} {last}"),
            email: email.to_string(),
            project_title,
            materials,
            tools,
        })
    }

    pub fn subject(&self) -> String {
        format!("Your shopping list for {}", self.project_title)
    }

    pub fn render_text(&self) -> String {
        let mut body = format!(
            "Hi {},\n\nHere is your list for {}.\n",
            self.recipient, self.project_title
        );
        for (heading, items) in [("Materials", &self.materials), ("Tools", &self.tools)] {
            if items.is_empty() {
                continue;
            }
            body.push_str(&format!("\n{heading}:\n"));
            for item in items {
                let url = item.affiliate_url.as_deref().unwrap_or_default();
                body.push_str(&format!("- {}: {}\n", item.name, url));
            }
        }
        body.push_str("\nHappy building!\n");
        body
    }
}

fn looks_like_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    TOOL_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Hands shopping lists to an HTTP mail relay, or logs them when none is
/// configured. Delivery is at most once.
#[derive(Clone)]
pub struct EmailClient {
    http: Client,
    webhook_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    to: &'a str,
    name: &'a str,
    subject: String,
    text: String,
}

impl EmailClient {
    pub fn from_env() -> Self {
        Self {
            http: build_client(),
            webhook_url: std::env::var("EMAIL_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        }
    }

    #[cfg(test)]
    pub fn log_only() -> Self {
        Self {
            http: build_client(),
            webhook_url: None,
        }
    }

    pub async fn send(&self, list: &ShoppingList) -> Result<EmailResponse, EmailError> {
        let text = list.render_text();
        let Some(url) = &self.webhook_url else {
            info!(
                target = "buildlist.email",
                to = %list.email,
                materials = list.materials.len(),
                tools = list.tools.len(),
                "mail relay not configured; logging shopping list"
            );
            debug!(target = "buildlist.email", body = %text, "shopping_list_preview");
            return Ok(EmailResponse {
                success: true,
                message: format!("Shopping list prepared for {}", list.email),
                preview_url: None,
            });
        };

        let message = RelayMessage {
            to: &list.email,
            name: &list.recipient,
            subject: list.subject(),
            text,
        };
        let response = self
            .http
            .post(url)
            .json(&message)
            .send()
            .await
            .map_err(|err| EmailError::Relay(err.to_string()))?;
        if !response.status().is_success() {
            return Err(EmailError::Relay(format!("HTTP {}", response.status())));
        }
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        let preview_url = payload
            .get("previewUrl")
            .and_then(Value::as_str)
            .map(str::to_string);
        info!(target = "buildlist.email", to = %list.email, "shopping_list_sent");
        Ok(EmailResponse {
            success: true,
            message: format!("Shopping list sent to {}", list.email),
            preview_url,
        })
    }
}
