//! genai-backed implementations of the LLM collaborators.
//!
//! The generator, refiner and judge share one [`LlmClient`]. Model names
//! without a provider prefix are served by a local Ollama instance, which
//! [`check_ollama_ready`] checks before a run starts.

pub mod generator;
pub mod judge;
pub mod prompts;
pub mod refiner;
pub mod safety;

use std::time::Duration;

use futures::StreamExt;
use genai::Client;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent};
use serde_json::Value;

use crate::error::LlmError;

pub use generator::LlmGenerator;
pub use judge::LlmJudge;
pub use refiner::LlmRefiner;
pub use safety::ContentFilter;

const OLLAMA_URL: &str = "http://localhost:11434/";

/// Model-name prefixes genai routes to a hosted provider instead of Ollama.
const HOSTED_PREFIXES: &[&str] = &[
    "gpt", "o1", "o3", "o4", "chatgpt", "claude", "gemini", "command", "grok", "deepseek",
];

/// A single-model chat client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    model: String,
    options: ChatOptions,
}

impl LlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            // Defaults to Ollama for non-prefixed model names.
            client: Client::default(),
            model: model.into(),
            options: ChatOptions::default().with_capture_content(true),
        }
    }

    /// One system + user exchange; returns the full response text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request =
            ChatRequest::from_system(system).append_message(ChatMessage::user(user.to_string()));

        let response = self
            .client
            .exec_chat_stream(&self.model, request, Some(&self.options))
            .await
            .map_err(|e| request_error(&self.model, e.to_string()))?;

        let mut stream = response.stream;
        let mut text: Option<String> = None;
        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatStreamEvent::End(end)) => {
                    if let Some(captured) = end.captured_first_text() {
                        text = Some(captured.to_string());
                    }
                }
                Ok(_) => {}
                Err(e) => return Err(request_error(&self.model, e.to_string())),
            }
        }

        text.filter(|t| !t.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Ollama answers a chat for an unpulled model with a 404 "model ... not
/// found"; keep that apart from transient transport failures.
fn request_error(model: &str, message: String) -> LlmError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("model") && lower.contains("not found") {
        LlmError::ModelNotAvailable {
            model: model.to_string(),
            message,
        }
    } else {
        LlmError::Request(message)
    }
}

/// Whether genai will route `model` to Ollama.
pub fn uses_ollama(model: &str) -> bool {
    if model.contains("::") {
        return model.starts_with("ollama::");
    }
    let lower = model.to_ascii_lowercase();
    !HOSTED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Validate that Ollama is running and the configured model is available.
///
/// Step 1: HTTP GET to the Ollama root with a 5-second timeout.
/// Step 2: HTTP POST to `/api/show` to verify the model.
pub async fn check_ollama_ready(model: &str) -> Result<(), LlmError> {
    let http = reqwest::Client::new();

    http.get(OLLAMA_URL)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| LlmError::OllamaUnavailable {
            url: OLLAMA_URL.to_string(),
            message: format!("Is Ollama running? {e}"),
        })?;

    let name = model.strip_prefix("ollama::").unwrap_or(model);
    let show_url = format!("{OLLAMA_URL}api/show");
    let resp = http
        .post(&show_url)
        .json(&serde_json::json!({ "model": name }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| LlmError::ModelNotAvailable {
            model: name.to_string(),
            message: format!("Failed to query model info: {e}"),
        })?;

    if !resp.status().is_success() {
        return Err(LlmError::ModelNotAvailable {
            model: name.to_string(),
            message: format!(
                "Model not found (HTTP {}). Run `ollama pull {name}` to download it.",
                resp.status()
            ),
        });
    }

    Ok(())
}

/// Pull a JSON object out of a model response: a ```json fence first, then
/// any fence, then the outermost braces.
pub fn extract_json(content: &str) -> Result<Value, LlmError> {
    let content = content.trim();
    let body = fenced(content, "```json")
        .or_else(|| fenced(content, "```"))
        .or_else(|| {
            let start = content.find('{')?;
            let end = content.rfind('}')?;
            (start < end).then(|| &content[start..=end])
        })
        .unwrap_or(content);

    let value: Value =
        serde_json::from_str(body).map_err(|e| LlmError::NoJson(format!("{e}: {}", preview(body))))?;
    if !value.is_object() {
        return Err(LlmError::NoJson(format!("expected an object, got: {}", preview(body))));
    }
    Ok(value)
}

fn fenced<'a>(content: &'a str, open: &str) -> Option<&'a str> {
    let start = content.find(open)? + open.len();
    let end = content[start..].find("```")? + start;
    Some(content[start..end].trim())
}

fn preview(s: &str) -> String {
    s.chars().take(200).collect()
}
