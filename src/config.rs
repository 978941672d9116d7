use crate::uom::EngineParams;
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub io: IoSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub llm: LlmSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IoSection {
    #[serde(default = "default_input_dir")]
    pub input_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_input_dir() -> String {
    "./input".to_string()
}

fn default_output_dir() -> String {
    "./output".to_string()
}

impl Default for IoSection {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// LLM-first extraction for supplier name, clean descriptions, MPN.
    #[serde(default = "default_true")]
    pub use_llm_primary: bool,
    /// Retry with the LLM when deterministic parsing finds zero lines.
    #[serde(default = "default_true")]
    pub use_llm_fallback: bool,
    /// Batched agentic lookup for lines with missing/ambiguous pack info.
    #[serde(default = "default_true")]
    pub use_lookup_agent: bool,
    /// Invoices processed concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_true() -> bool {
    true
}

fn default_parallelism() -> usize {
    1
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            use_llm_primary: true,
            use_llm_fallback: true,
            use_lookup_agent: true,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: f64,
    #[serde(default = "default_currency_scale")]
    pub currency_scale: i64,
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_price_tolerance() -> f64 {
    0.01
}

fn default_currency_scale() -> i64 {
    4
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            price_tolerance: default_price_tolerance(),
            currency_scale: default_currency_scale(),
        }
    }
}

impl EngineSection {
    pub fn params(&self) -> EngineParams {
        EngineParams {
            confidence_threshold: self.confidence_threshold,
            price_tolerance: self.price_tolerance,
            currency_scale: self.currency_scale,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub backend: LlmBackend,
    #[serde(default)]
    pub ollama: OllamaSection,
    #[serde(default)]
    pub remote: RemoteSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Local Ollama server, OpenAI-compatible /v1 endpoint.
    #[default]
    Ollama,
    /// Hosted OpenAI-compatible API; key from the LLM_API_KEY env var.
    Remote,
    /// No LLM at all: deterministic parsers only.
    Heuristics,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaSection {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

fn default_ollama_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_ollama_model() -> String {
    "qwen3:8b".to_string()
}

impl Default for OllamaSection {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSection {
    #[serde(default = "default_remote_url")]
    pub base_url: String,
    #[serde(default = "default_remote_model")]
    pub model: String,
}

fn default_remote_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_remote_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            base_url: default_remote_url(),
            model: default_remote_model(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the config file, falling back to defaults when it is absent or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config not loaded; using defaults");
                Self::default()
            }
        }
    }
}
