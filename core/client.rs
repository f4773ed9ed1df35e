//! Resilient text-generation calls.
//!
//! Every outbound request goes through [`RequestClient::send`]: the token cost is
//! checked locally first, quota responses (HTTP 429) are retried after a fixed
//! cool-down, and the reply envelope is decoded strictly.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::session::{ArtifactKind, Session};
use crate::tokens::TokenCounter;
use log;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Network seam. An `Err` is a connection-level failure and is never retried.
pub trait Transport {
    fn post(&self, text: &str) -> Result<RawResponse>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

impl<'a> GenerateRequest<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            contents: [RequestContent {
                parts: [RequestPart { text }],
            }],
        }
    }
}

/// Blocking Gemini `generateContent` client.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(config: &Config, api_key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout()?)
            .build()?;
        let url = format!(
            "{}/models/{}:generateContent",
            config.request.endpoint.trim_end_matches('/'),
            config.request.model
        );
        log::debug!("Generation endpoint: {}", url);
        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

impl Transport for HttpTransport {
    fn post(&self, text: &str) -> Result<RawResponse> {
        let response = self
            .client
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&GenerateRequest::new(text))
            .send()
            .map_err(|e| AppError::Transport(format!("Request to {} failed: {}", self.url, e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| AppError::Transport(format!("Failed to read response body: {}", e)))?;
        Ok(RawResponse { status, body })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: Option<usize>,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: Option<usize>,
}

/// Text extracted from a successful reply plus any token counts the service reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub input_tokens: Option<usize>,
    pub output_tokens: Option<usize>,
}

/// Decodes `candidates[0].content.parts[0].text`. Any other shape is a `Parse` error.
pub fn parse_envelope(body: &str) -> Result<Reply> {
    let decoded: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| AppError::Parse(format!("Unexpected response format: {}", e)))?;
    let text = decoded
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content.parts.into_iter().next())
        .map(|p| p.text)
        .ok_or_else(|| AppError::Parse("Response contains no candidate text".to_string()))?;
    let (input_tokens, output_tokens) = match decoded.usage_metadata {
        Some(usage) => (usage.prompt_token_count, usage.candidates_token_count),
        None => (None, None),
    };
    Ok(Reply {
        text,
        input_tokens,
        output_tokens,
    })
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Reply),
    Retryable(String),
    Fatal(AppError),
}

pub fn classify(response: &RawResponse) -> AttemptOutcome {
    match response.status {
        200..=299 => match parse_envelope(&response.body) {
            Ok(reply) => AttemptOutcome::Success(reply),
            Err(e) => AttemptOutcome::Fatal(e),
        },
        429 => AttemptOutcome::Retryable(truncate(&response.body, 300)),
        status => AttemptOutcome::Fatal(AppError::Transport(format!(
            "HTTP {}: {}",
            status,
            truncate(&response.body, 300)
        ))),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
    pub progress_interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            max_attempts: config.request.max_attempts.max(1),
            cooldown: config.cooldown()?,
            progress_interval: config.progress_interval()?,
        })
    }

    /// Blocks for the cool-down, logging the time left at each progress interval.
    fn cool_down(&self) {
        let mut remaining = self.cooldown;
        while !remaining.is_zero() {
            log::info!("Waiting... (time left: {} seconds)", remaining.as_secs());
            let step = if self.progress_interval.is_zero() {
                remaining
            } else {
                remaining.min(self.progress_interval)
            };
            thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: Duration::from_secs(60),
            progress_interval: Duration::from_secs(10),
        }
    }
}

pub struct RequestClient {
    transport: Box<dyn Transport>,
    counter: TokenCounter,
    ceiling: usize,
    policy: RetryPolicy,
}

impl RequestClient {
    pub fn new(
        transport: Box<dyn Transport>,
        counter: TokenCounter,
        ceiling: usize,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            counter,
            ceiling,
            policy,
        }
    }

    pub fn from_config(config: &Config, transport: Box<dyn Transport>) -> Result<Self> {
        Ok(Self::new(
            transport,
            TokenCounter::new(config.budget.tokenizer),
            config.budget.max_tokens,
            RetryPolicy::from_config(config)?,
        ))
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn send(&self, session: &mut Session, text: &str, label: &str) -> Result<String> {
        let input_tokens = self.counter.count(text);
        if input_tokens > self.ceiling {
            log::error!(
                "Prompt for {} exceeds token limit: {} > {}",
                label,
                input_tokens,
                self.ceiling
            );
            return Err(AppError::TokenLimit {
                tokens: input_tokens,
                ceiling: self.ceiling,
            });
        }

        let call = session.next_call();
        session.recorder().record(call, ArtifactKind::Request, text);
        log::info!(
            "Sending {} request ({} characters, ~{} tokens)",
            label,
            text.chars().count(),
            input_tokens
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let outcome = match self.transport.post(text) {
                Ok(raw) => {
                    log::info!(
                        "Received response (status: {}, duration: {:.2}s)",
                        raw.status,
                        started.elapsed().as_secs_f64()
                    );
                    if (200..300).contains(&raw.status) {
                        session.recorder().record(call, ArtifactKind::Response, &raw.body);
                    } else {
                        session.recorder().record(
                            call,
                            ArtifactKind::Error { attempt },
                            &format!("Status Code: {}\n\n{}", raw.status, raw.body),
                        );
                    }
                    classify(&raw)
                }
                Err(e) => AttemptOutcome::Fatal(e),
            };

            match outcome {
                AttemptOutcome::Success(reply) => {
                    session.recorder().record(call, ArtifactKind::Extracted, &reply.text);
                    let input = reply.input_tokens.unwrap_or(input_tokens);
                    let output = reply
                        .output_tokens
                        .unwrap_or_else(|| self.counter.count(&reply.text));
                    session.record_call(label, input, output);
                    log::info!(
                        "Extracted response text ({} characters)",
                        reply.text.chars().count()
                    );
                    return Ok(reply.text);
                }
                AttemptOutcome::Retryable(message) => {
                    if attempt >= self.policy.max_attempts {
                        log::error!("Quota still exceeded after {} attempt(s)", attempt);
                        return Err(AppError::Quota {
                            attempts: attempt,
                            message,
                        });
                    }
                    log::warn!(
                        "Quota exceeded on attempt {} of {}. Retrying in {} seconds",
                        attempt,
                        self.policy.max_attempts,
                        self.policy.cooldown.as_secs()
                    );
                    self.policy.cool_down();
                }
                AttemptOutcome::Fatal(e) => {
                    log::error!("Request {} failed: {}", label, e);
                    return Err(e);
                }
            }
        }
    }
}
