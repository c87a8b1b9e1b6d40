//! Answer generation.
//!
//! Defines the [`AnswerGenerator`] trait and its implementations:
//! - **[`ExtractiveGenerator`]**: offline; answers with the context sentences
//!   that share the most terms with the question. The default.
//! - **[`GeminiGenerator`]**: Google Generative Language `generateContent`.
//! - **[`OpenAIGenerator`]**: OpenAI chat completions.
//! - **[`OllamaGenerator`]**: a local Ollama instance's `/api/generate`.
//!
//! Remote generators share the retry and backoff policy in the `http` module.
//! Use [`create_generator`] to pick one from configuration.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::embedding::tokenize;
use crate::http;

/// Everything a generator may use to produce an answer.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Fully rendered prompt: instructions, context, history, question.
    pub prompt: String,
    pub question: String,
    /// Retrieved chunks rendered as `[<filename>]\n<text>` blocks.
    pub context: String,
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

// ============ Extractive ============

/// Returned when no context sentence shares a term with the question.
pub const DONT_KNOW: &str = "I don't know. The provided documents do not contain enough information to answer this question.";

/// Deterministic offline generator.
///
/// Scores every context sentence by how many distinct question terms it
/// contains and answers with the best `max_sentences`, in document order.
pub struct ExtractiveGenerator {
    max_sentences: usize,
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self { max_sentences: 3 }
    }
}

impl ExtractiveGenerator {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }

    pub fn answer(&self, question: &str, context: &str) -> String {
        let terms: HashSet<String> = tokenize(question).filter(|t| t.chars().count() > 2).collect();
        if terms.is_empty() {
            return DONT_KNOW.to_string();
        }

        let sentences = split_sentences(context);
        let mut scored: Vec<(usize, usize)> = sentences
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let words: HashSet<String> = tokenize(s).collect();
                (i, terms.iter().filter(|t| words.contains(*t)).count())
            })
            .filter(|(_, score)| *score > 0)
            .collect();
        if scored.is_empty() {
            return DONT_KNOW.to_string();
        }

        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(self.max_sentences);
        scored.sort_by_key(|(i, _)| *i);

        let mut picked: Vec<&str> = Vec::new();
        for (i, _) in scored {
            if !picked.contains(&sentences[i]) {
                picked.push(sentences[i]);
            }
        }
        picked.join(" ")
    }
}

/// Split rendered context into trimmed sentences, skipping `[file]` headers.
fn split_sentences(context: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for line in context.lines() {
        let line = line.trim();
        if line.is_empty() || (line.starts_with('[') && line.ends_with(']')) {
            continue;
        }
        let mut start = 0;
        for (i, c) in line.char_indices() {
            if matches!(c, '.' | '!' | '?') {
                let end = i + c.len_utf8();
                let at_boundary = line[end..].chars().next().map_or(true, char::is_whitespace);
                if at_boundary {
                    let sentence = line[start..end].trim();
                    if !sentence.is_empty() {
                        out.push(sentence);
                    }
                    start = end;
                }
            }
        }
        let rest = line[start..].trim();
        if !rest.is_empty() {
            out.push(rest);
        }
    }
    out
}

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        Ok(self.answer(&request.question, &request.context))
    }
}

// ============ Gemini ============

/// Generator backed by Google's Generative Language API.
///
/// Reads the API key from `GEMINI_API_KEY` unless `generation.api_key_env`
/// names another variable. The key is sent as the `x-goog-api-key` header.
pub struct GeminiGenerator {
    model: String,
    temperature: f32,
    api_key: String,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let key_var = config.api_key_env.as_deref().unwrap_or("GEMINI_API_KEY");
        Self::with_api_key(config, http::api_key_from_env(key_var)?)
    }

    /// Build with an explicit key instead of reading the environment.
    pub fn with_api_key(config: &GenerationConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gemini-2.5-pro".to_string()),
            temperature: config.temperature,
            api_key: api_key.into(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            max_retries: config.max_retries,
            client: http::build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl AnswerGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        &self.model
    }
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": {"temperature": self.temperature},
        });
        let json = http::post_json(
            &self.client,
            &url,
            http::Auth::Header("x-goog-api-key", &self.api_key),
            &body,
            self.max_retries,
            "Gemini",
        )
        .await?;
        parse_gemini_response(&json)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing candidate parts"))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        bail!("Gemini returned an empty answer");
    }
    Ok(text)
}

// ============ OpenAI ============

/// Generator using OpenAI chat completions. Key from `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    model: String,
    temperature: f32,
    api_key: String,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let key_var = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
        Ok(Self {
            model: config
                .model
                .clone()
                .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?,
            temperature: config.temperature,
            api_key: http::api_key_from_env(key_var)?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: config.max_retries,
            client: http::build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIGenerator {
    fn name(&self) -> &str {
        &self.model
    }
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/chat/completions", self.base_url.trim_end_matches('/')),
            http::Auth::Bearer(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    model: String,
    temperature: f32,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config
                .model
                .clone()
                .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?,
            temperature: config.temperature,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            client: http::build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.model
    }
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {"temperature": self.temperature},
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/generate", self.url.trim_end_matches('/')),
            http::Auth::None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
    }
}

/// Create the [`AnswerGenerator`] named by `generation.provider`.
///
/// | Config Value | Generator |
/// |-------------|-----------|
/// | `"extractive"` | [`ExtractiveGenerator`] |
/// | `"gemini"` | [`GeminiGenerator`] |
/// | `"openai"` | [`OpenAIGenerator`] |
/// | `"ollama"` | [`OllamaGenerator`] |
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator::default())),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTEXT: &str = "[france.txt]\nParis is the capital of France. It sits on the Seine!\n\n[rust.md]\nRust has no garbage collector. Version 1.0 shipped in 2015.";

    #[test]
    fn extractive_picks_overlapping_sentence() {
        let answer = ExtractiveGenerator::default().answer("What is the capital of France?", CONTEXT);
        assert!(answer.starts_with("Paris is the capital of France."));
        assert!(!answer.contains("[france.txt]"));
    }

    #[test]
    fn extractive_keeps_document_order() {
        let answer = ExtractiveGenerator::new(2).answer("Does Rust have a garbage collector, like Paris?", CONTEXT);
        let paris = answer.find("Paris").unwrap();
        let rust = answer.find("Rust has").unwrap();
        assert!(paris < rust);
    }

    #[test]
    fn extractive_says_dont_know() {
        let gen = ExtractiveGenerator::default();
        assert_eq!(gen.answer("Who wrote Hamlet?", CONTEXT), DONT_KNOW);
        assert_eq!(gen.answer("?", CONTEXT), DONT_KNOW);
        assert_eq!(gen.answer("capital", ""), DONT_KNOW);
    }

    #[test]
    fn sentence_split_ignores_decimal_points() {
        let sentences = split_sentences("Version 1.0 shipped. Next one!");
        assert_eq!(sentences, vec!["Version 1.0 shipped.", "Next one!"]);
    }

    #[tokio::test]
    async fn extractive_generator_uses_request_context() {
        let request = GenerationRequest {
            prompt: String::new(),
            question: "capital of France".to_string(),
            context: CONTEXT.to_string(),
        };
        let answer = ExtractiveGenerator::default().generate(&request).await.unwrap();
        assert!(answer.contains("Paris"));
    }

    #[test]
    fn gemini_response_joins_parts() {
        let json = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Hello, "}, {"text": "world"}]}}]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "Hello, world");
        assert!(parse_gemini_response(&serde_json::json!({"candidates": []})).is_err());
    }

    fn gemini_config(url: String) -> GenerationConfig {
        GenerationConfig {
            provider: "gemini".to_string(),
            url: Some(url),
            max_retries: 0,
            ..GenerationConfig::default()
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "QUESTION: capital?".to_string(),
            question: "capital?".to_string(),
            context: CONTEXT.to_string(),
        }
    }

    #[tokio::test]
    async fn gemini_sends_key_as_header() {
        use axum::extract::RawQuery;
        use axum::http::{HeaderMap, StatusCode};
        use axum::routing::post;
        use axum::{Json, Router};

        async fn fake_gemini(
            headers: HeaderMap,
            RawQuery(query): RawQuery,
        ) -> (StatusCode, Json<serde_json::Value>) {
            let key = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok());
            if key == Some("test-key") && query.is_none() {
                let body = serde_json::json!({
                    "candidates": [{"content": {"parts": [{"text": "Paris"}]}}]
                });
                (StatusCode::OK, Json(body))
            } else {
                (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "bad key"})))
            }
        }

        let app = Router::new().route("/models/{call}", post(fake_gemini));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let gen = GeminiGenerator::with_api_key(&gemini_config(format!("http://{}", addr)), "test-key")
            .unwrap();
        assert_eq!(gen.generate(&request()).await.unwrap(), "Paris");
    }

    #[tokio::test]
    async fn gemini_connection_error_omits_key() {
        let gen = GeminiGenerator::with_api_key(
            &gemini_config("http://127.0.0.1:1".to_string()),
            "SECRET-KEY-12345",
        )
        .unwrap();
        let err = gen.generate(&request()).await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Gemini connection error"), "got {}", message);
        assert!(!message.contains("SECRET-KEY-12345"), "got {}", message);
    }

    #[test]
    fn unknown_provider_rejected() {
        let config = GenerationConfig {
            provider: "nope".to_string(),
            ..GenerationConfig::default()
        };
        assert!(create_generator(&config).is_err());
        assert_eq!(
            create_generator(&GenerationConfig::default()).unwrap().name(),
            "extractive"
        );
    }
}
