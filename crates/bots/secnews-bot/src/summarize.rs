use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::debug;

use crate::USER_AGENT;
use crate::compose::truncate_chars;
use crate::entry::NewsEntry;

const LOG_TARGET: &str = "secnews_bot::summarize";

pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const SUMMARIZE_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "You are a factual cybersecurity news editor. \
    You write short, accurate social media posts about security news. \
    Never invent details that are not in the provided article.";

#[derive(Debug, Snafu)]
pub enum SummarizeError {
    #[snafu(display("Summarization request failed"))]
    Transport { source: reqwest::Error },
    #[snafu(display("Summarization service responded with {status}: {body}"))]
    Status { status: u16, body: String },
    #[snafu(display("Malformed summarization response"))]
    InvalidResponse { source: serde_json::Error },
    #[snafu(display("Summarization response contained no text"))]
    EmptyCompletion,
}

pub type SummarizeResult<T> = std::result::Result<T, SummarizeError>;

/// Turns a news entry into post-sized text.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    /// `max_chars` is a hint for the model; callers must still enforce it.
    async fn summarize(&self, entry: &NewsEntry, max_chars: usize) -> SummarizeResult<String>;
}

/// OpenAI compatible chat completions backend.
pub struct OpenAiSummarizer {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiSummarizer {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> SummarizeResult<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(SUMMARIZE_TIMEOUT)
            .build()
            .context(TransportSnafu)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 100,
            temperature: 0.7,
        })
    }

    pub fn request_body(&self, entry: &NewsEntry, max_chars: usize) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(entry, max_chars) },
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }
}

#[async_trait::async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, entry: &NewsEntry, max_chars: usize) -> SummarizeResult<String> {
        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(entry, max_chars))
            .send()
            .await
            .context(TransportSnafu)?;

        let status = response.status();
        let body = response.text().await.context(TransportSnafu)?;
        if !status.is_success() {
            return StatusSnafu {
                status: status.as_u16(),
                body: truncate_chars(&body, 300),
            }
            .fail();
        }

        let summary = parse_completion(&body)?;
        debug!(target: LOG_TARGET, model = %self.model, chars = summary.chars().count(), "Summary generated");
        Ok(summary)
    }
}

fn user_prompt(entry: &NewsEntry, max_chars: usize) -> String {
    format!(
        "Write a post of at most {max_chars} characters summarizing this cybersecurity news.\n\
         Do not include any URL. Use at most two relevant hashtags.\n\n\
         Title: {}\nSource: {}\nDescription: {}",
        entry.title, entry.source, entry.description
    )
}

/// Extract the first choice's message text.
pub fn parse_completion(body: &str) -> SummarizeResult<String> {
    let json: Value = serde_json::from_str(body).context(InvalidResponseSnafu)?;
    let text = json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .context(EmptyCompletionSnafu)?;
    Ok(text.to_string())
}
