use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::warn;

/// Upper bound on one generation round trip.
pub const GENERATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept for diagnostics.
const ERROR_BODY_LIMIT: usize = 800;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(GENERATE_TIMEOUT)
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("generation API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("generation timed out after {}s", GENERATE_TIMEOUT.as_secs())]
    Timeout,
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Backend that can turn a prompt into code.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(
        &self,
        raw_input: &str,
        template: &str,
        language: &str,
        temperature: f64,
    ) -> Result<String, GenerateError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Client for an Ollama-style `/api/generate` endpoint.
pub struct GenerateClient {
    http: Client,
    endpoint: String,
    model: String,
}

impl GenerateClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl CodeGenerator for GenerateClient {
    async fn generate(
        &self,
        raw_input: &str,
        template: &str,
        language: &str,
        temperature: f64,
    ) -> Result<String, GenerateError> {
        let prompt = build_prompt(raw_input, template, language);
        let req = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            stream: false,
            temperature,
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&req)
            .send()
            .await
            .map_err(classify)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            warn!("Generation backend returned {}: {}", status, body);
            return Err(GenerateError::Api { status, body });
        }

        let body: GenerateResponse = resp.json().await.map_err(classify)?;
        Ok(extract_code_block(&body.response))
    }
}

fn classify(e: reqwest::Error) -> GenerateError {
    if e.is_timeout() {
        GenerateError::Timeout
    } else {
        GenerateError::Http(e)
    }
}

/// Fills the style template with the user's request and wraps it in the
/// instructions the backend expects.
pub fn build_prompt(raw_input: &str, template: &str, language: &str) -> String {
    let styled = template.replacen("{}", raw_input, 1);
    format!(
        "Generate {language} code for: {styled}. \
         Only return code with proper formatting and comments. \
         Do not include explanations outside of code comments."
    )
}

/// Pulls the first fenced code block out of a model reply. Replies
/// without a fence come back whole, trimmed.
pub fn extract_code_block(response: &str) -> String {
    let Some((_, rest)) = response.split_once("```") else {
        return response.trim().to_string();
    };
    let block = match rest.split_once("```") {
        Some((block, _)) => block,
        None => rest,
    };
    strip_language_tag(block).trim().to_string()
}

/// Drops a leading `python`-style tag line left over from the fence.
fn strip_language_tag(block: &str) -> &str {
    let Some((first, rest)) = block.split_once('\n') else {
        return block;
    };
    if is_language_tag(first.trim()) {
        rest
    } else {
        block
    }
}

fn is_language_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 24
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '#' | '-' | '_' | '.'))
}
