//! Reply generation
//!
//! OpenAI-backed reply drafting with duplicate avoidance: each candidate is
//! checked against today's already-posted replies and regenerated a few times
//! when it reads too close to one of them.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODEL: &str = "gpt-4o-mini";
const MAX_REPLY_CHARS: usize = 220;

/// Candidates generated before giving up on uniqueness.
const MAX_CANDIDATES: usize = 3;

/// Replies closer than this to a prior one are regenerated.
const SIMILARITY_THRESHOLD: f64 = 0.6;

const SYSTEM_PROMPT: &str = "\
You are a helpful Twitter user who writes thoughtful, natural replies.

Rules:
- Write 1-3 short sentences maximum
- Keep under 220 characters
- Use simple, conversational English
- NO emojis
- NO quotation marks
- NO generic praise like \"Great post!\" or \"Amazing!\"
- Add one useful insight, question, or thoughtful comment
- Vary sentence structure
- Sound like a real human, not a bot";

/// Content-generation contract. `Ok(None)` means generation failed in a way
/// the orchestrator should count as a per-item failure.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        content: &str,
        recent_outputs: &[String],
    ) -> anyhow::Result<Option<String>>;
}

/// OpenAI chat-completions reply generator.
pub struct OpenAiGenerator {
    client: Client,
    api_key: String,
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
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
        }
    }

    async fn draft(&self, content: &str) -> anyhow::Result<Option<String>> {
        let user_prompt = format!(
            "Write a brief, thoughtful reply to this post:\n\n\"{}\"\n\n\
             Remember: Under 220 chars, no emoji, sound natural and human.",
            content
        );

        let body = json!({
            "model": MODEL,
            "messages": [
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &user_prompt },
            ],
            "max_tokens": 100,
            // High temperature for variety across a session.
            "temperature": 0.9,
        });

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            warn!("Generation request failed: {} {}", status, detail);
            return Ok(None);
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content);

        Ok(text.map(|t| tidy_reply(&t)))
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        content: &str,
        recent_outputs: &[String],
    ) -> anyhow::Result<Option<String>> {
        let mut last = None;
        for attempt in 1..=MAX_CANDIDATES {
            let Some(reply) = self.draft(content).await? else {
                return Ok(None);
            };

            if !is_too_similar(&reply, recent_outputs) {
                return Ok(Some(reply));
            }
            debug!("Candidate {} too similar to a prior reply, regenerating", attempt);
            last = Some(reply);
        }

        // All candidates read alike; ship the last one rather than fail the item.
        Ok(last)
    }
}

/// Strip accidental wrapping quotes and clamp to the platform limit.
fn tidy_reply(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('"').trim_matches('\'').trim();
    if trimmed.chars().count() > MAX_REPLY_CHARS {
        let cut: String = trimmed.chars().take(MAX_REPLY_CHARS - 3).collect();
        format!("{}...", cut)
    } else {
        trimmed.to_string()
    }
}

/// Whether `candidate` reads too close to any prior reply.
pub fn is_too_similar(candidate: &str, previous: &[String]) -> bool {
    previous
        .iter()
        .any(|prev| similarity(&candidate.to_lowercase(), &prev.to_lowercase()) > SIMILARITY_THRESHOLD)
}

/// Character-bigram Dice coefficient in [0, 1].
fn similarity(a: &str, b: &str) -> f64 {
    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };

    let mut left = bigrams(a);
    let right = bigrams(b);
    if left.is_empty() || right.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }

    let total = left.len() + right.len();
    let mut matches = 0usize;
    for pair in &right {
        if let Some(pos) = left.iter().position(|p| p == pair) {
            left.swap_remove(pos);
            matches += 1;
        }
    }

    (2.0 * matches as f64) / total as f64
}
