//! Chat-completion endpoint used by the classifier and the dependency resolver
//!
//! Every call runs as a spawned task on a shared tokio runtime and is awaited
//! under a deadline; on timeout the task is aborted and the caller sees
//! `Ok(None)` instead of an error, so a stuck endpoint cannot wedge a worker.

use crate::error::PipelineError;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Attempts for transient HTTP failures (429 / 5xx / connect errors).
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// "Invoke chat(prompt, timeout) -> text or timeout".
pub trait ChatEndpoint: Send + Sync {
    /// `Ok(None)` when the deadline expired before an answer arrived.
    fn chat(&self, model: &str, prompt: &str, timeout: Duration) -> Result<Option<String>>;
}

/// Classifier answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Yes,
    No,
    Maybe,
}

impl Answer {
    fn from_word(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "maybe" => Some(Self::Maybe),
            _ => None,
        }
    }
}

fn answer_field() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)"answer"\s*:\s*"(yes|no|maybe)""#).expect("answer field regex")
    })
}

/// Parse `{"answer": "yes"|"no"|"maybe"}`, tolerating code fences and prose.
pub fn parse_answer(text: &str) -> Option<Answer> {
    #[derive(Deserialize)]
    struct Envelope {
        answer: String,
    }

    if let Some(json) = extract_json_object(text) {
        if let Ok(envelope) = serde_json::from_str::<Envelope>(json) {
            if let Some(answer) = Answer::from_word(&envelope.answer) {
                return Some(answer);
            }
        }
    }
    if let Some(caps) = answer_field().captures(text) {
        return caps.get(1).and_then(|m| Answer::from_word(m.as_str()));
    }
    text.split(|c: char| !c.is_ascii_alphabetic())
        .find(|w| !w.is_empty())
        .and_then(Answer::from_word)
}

/// The outermost `{...}` span of a response, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl OpenAiChat {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("perfminer-llm")
            .build()
            .context("Failed to start LLM runtime")?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            runtime: Arc::new(runtime),
        })
    }

    async fn request(
        client: reqwest::Client,
        url: String,
        api_key: String,
        model: String,
        prompt: String,
    ) -> Result<String> {
        let body = ChatRequest {
            model: &model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.0,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = client
                .post(&url)
                .bearer_auth(&api_key)
                .json(&body)
                .send()
                .await;

            let retry_reason = match response {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: ChatResponse =
                        resp.json().await.context("Malformed chat completion response")?;
                    return Ok(parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .unwrap_or_default());
                }
                Ok(resp)
                    if resp.status().as_u16() == 429 || resp.status().is_server_error() =>
                {
                    format!("HTTP {}", resp.status())
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    anyhow::bail!("Chat endpoint returned {}: {}", status, text);
                }
                Err(e) if e.is_connect() || e.is_timeout() => e.to_string(),
                Err(e) => return Err(e).context("Chat request failed"),
            };

            if attempt >= MAX_ATTEMPTS {
                return Err(PipelineError::transient(format!(
                    "chat endpoint unavailable after {} attempts: {}",
                    attempt, retry_reason
                ))
                .into());
            }
            let wait = BACKOFF_BASE * 2u32.pow(attempt - 1);
            tracing::warn!("LLM call failed ({}), retrying in {:?}", retry_reason, wait);
            tokio::time::sleep(wait).await;
        }
    }
}

impl ChatEndpoint for OpenAiChat {
    fn chat(&self, model: &str, prompt: &str, timeout: Duration) -> Result<Option<String>> {
        let url = format!("{}/chat/completions", self.base_url);
        let task = Self::request(
            self.client.clone(),
            url,
            self.api_key.clone(),
            model.to_string(),
            prompt.to_string(),
        );

        self.runtime.block_on(async move {
            let mut handle = tokio::spawn(task);
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(joined) => joined.context("LLM task panicked")?.map(Some),
                Err(_) => {
                    handle.abort();
                    tracing::warn!("LLM call to {} timed out after {:?}", model, timeout);
                    Ok(None)
                }
            }
        })
    }
}
