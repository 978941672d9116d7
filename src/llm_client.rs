// src/llm_client.rs
//
// Shared OpenAI-compatible chat plumbing used by both the primary
// extraction path and the batched UOM lookup.

use crate::config::{LlmBackend, LlmSection};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Resolved endpoint configuration ready to make API calls.
pub struct ResolvedEndpoint {
    pub base_url: String,
    pub model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint.
pub fn resolve_endpoint(llm: &LlmSection) -> Result<ResolvedEndpoint, Box<dyn std::error::Error>> {
    match llm.backend {
        LlmBackend::Ollama => Ok(ResolvedEndpoint {
            base_url: llm.ollama.base_url.clone(),
            model: llm.ollama.model.clone(),
            api_key: "ollama".to_string(), // required by API but ignored
        }),
        LlmBackend::Remote => {
            let api_key = std::env::var("LLM_API_KEY")
                .map_err(|_| "LLM_API_KEY env var required for remote backend")?;
            Ok(ResolvedEndpoint {
                base_url: llm.remote.base_url.clone(),
                model: llm.remote.model.clone(),
                api_key,
            })
        }
        LlmBackend::Heuristics => Err("Heuristics backend selected; no LLM endpoint".into()),
    }
}

/// Check whether the configured backend can serve requests at all.
/// Called once per run so a dead Ollama or a missing API key degrades the
/// whole run to deterministic parsing instead of failing every invoice.
pub async fn llm_available(client: &Client, llm: &LlmSection) -> bool {
    match llm.backend {
        LlmBackend::Heuristics => false,
        LlmBackend::Ollama => {
            if check_ollama_health(client, &llm.ollama.base_url).await {
                info!(url = %llm.ollama.base_url, model = %llm.ollama.model, "Using Ollama (local) backend");
                true
            } else {
                false
            }
        }
        LlmBackend::Remote => {
            if std::env::var("LLM_API_KEY").is_ok() {
                info!(url = %llm.remote.base_url, model = %llm.remote.model, "Using remote API backend");
                true
            } else {
                warn!("LLM_API_KEY not set; remote backend unavailable");
                false
            }
        }
    }
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches("/v1").trim_end_matches("/v1/");

    match client
        .get(health_url)
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                true
            } else {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// One system+user round trip; returns the assistant message content.
pub async fn chat(
    client: &Client,
    endpoint: &ResolvedEndpoint,
    system: &str,
    user: &str,
    max_tokens: u32,
) -> Result<String, Box<dyn std::error::Error>> {
    let request = ChatRequest {
        model: endpoint.model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user.to_string(),
            },
        ],
        // Extraction, not generation: keep sampling nearly deterministic.
        temperature: 0.1,
        max_tokens,
    };

    let url = format!("{}/chat/completions", endpoint.base_url);

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", endpoint.api_key))
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("LLM API error {status}: {body}").into());
    }

    let chat_response: ChatResponse = response.json().await?;
    let content = chat_response
        .choices
        .first()
        .map(|c| c.message.content.as_str())
        .ok_or("Empty response from LLM")?;

    Ok(content.trim().to_string())
}

/// Strip markdown fences if the model added them despite instructions.
pub fn strip_markdown_fences(s: &str) -> &str {
    s.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. thinking tokens from qwen3).
pub fn extract_json_object(s: &str) -> Result<&str, Box<dyn std::error::Error>> {
    let start = s.find('{').ok_or("No '{' found in LLM response")?;
    let end = s.rfind('}').ok_or("No '}' found in LLM response")?;
    if end <= start {
        return Err("Malformed JSON in LLM response".into());
    }
    Ok(&s[start..=end])
}

/// Same as `extract_json_object`, for responses that should be a JSON array.
pub fn extract_json_array(s: &str) -> Result<&str, Box<dyn std::error::Error>> {
    let start = s.find('[').ok_or("No '[' found in LLM response")?;
    let end = s.rfind(']').ok_or("No ']' found in LLM response")?;
    if end <= start {
        return Err("Malformed JSON in LLM response".into());
    }
    Ok(&s[start..=end])
}

/// Truncate prompt input to at most `max` bytes without splitting a
/// multibyte character; PDF text is not reliably ASCII.
pub fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
