// src/gateway.rs
// MODEL COMPLETION GATEWAY
// Sends one system+user prompt to a chat-completion model and hands back the raw text.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::GatewaySettings;
use crate::error::{GatewayError, PipelineError};

/// One completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Anything that can turn a prompt into raw model text.
///
/// Implementations perform no retries; a failed call is reported once.
pub trait CompletionGateway: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiGateway {
    client: Client,
    settings: GatewaySettings,
}

impl OpenAiGateway {
    /// Build the gateway. Missing credentials are a configuration failure.
    pub fn new(settings: GatewaySettings) -> Result<Self, PipelineError> {
        if settings.api_key.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(model = %settings.model, base_url = %settings.base_url, "Model gateway initialized");
        Ok(Self { client, settings })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

impl CompletionGateway for OpenAiGateway {
    fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages: vec![
                ChatTurn { role: "system", content: &request.system_prompt },
                ChatTurn { role: "user", content: &request.user_prompt },
            ],
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        };

        let start_time = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            if let Some(error) = status_error(status, detail) {
                return Err(error);
            }
            unreachable!("status_error classifies every non-success status");
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .map_err(|e| GatewayError::Unavailable(format!("unreadable provider response: {}", e)))?;

        tracing::debug!(
            model = %self.settings.model,
            elapsed_ms = start_time.elapsed().as_millis(),
            prompt_length = request.user_prompt.len(),
            "Completion call finished"
        );

        extract_content(parsed)
    }
}

/// Rejected credentials are fatal; every other non-success status is worth another try.
fn status_error(status: StatusCode, body: String) -> Option<GatewayError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Some(GatewayError::Unauthorized(format!("provider returned {}", status)));
    }
    if !status.is_success() {
        return Some(GatewayError::Unavailable(format!("provider returned {}: {}", status, body)));
    }
    None
}

fn extract_content(response: ChatCompletionResponse) -> Result<String, GatewayError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(GatewayError::EmptyResponse)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted gateway for exercising the pipeline without a network.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued replies in call order; falls back to `default_reply` once drained.
    pub struct ScriptedGateway {
        replies: Mutex<VecDeque<Result<String, GatewayError>>>,
        default_reply: Result<String, GatewayError>,
        pub prompts: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedGateway {
        pub fn always(reply: Result<String, GatewayError>) -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                default_reply: reply,
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn sequence(replies: Vec<Result<String, GatewayError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                default_reply: Err(GatewayError::EmptyResponse),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl CompletionGateway for ScriptedGateway {
        fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
            self.prompts.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default_reply.clone())
        }
    }
}
