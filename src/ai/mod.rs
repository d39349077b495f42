// SPDX-License-Identifier: MIT
//! AI prioritization upstream (Anthropic Messages API).
//!
//! The core only consumes the returned priority ordering and reasons; it
//! never generates them. Prioritization degrades to input order when the
//! upstream is unavailable or no API key is configured; insights surface
//! the failure to the caller instead.

use crate::config::DaemonConfig;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::tasks::Task;
use anyhow::{anyhow, Context as _, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 500;

/// Per-task ranking returned by the upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct RankedTask {
    pub id: String,
    #[serde(rename = "aiPriority")]
    pub ai_priority: u32,
    #[serde(rename = "aiReason")]
    pub ai_reason: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

pub struct AiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    retry: RetryConfig,
}

impl AiClient {
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.ai_api_key.clone(),
            base_url: config.ai_base_url.clone(),
            model: config.ai_model.clone(),
            retry: RetryConfig::default(),
        }
    }

    /// Rank `tasks` with the upstream model and merge the ranking back into
    /// the task objects as `aiPriority`/`aiReason`, sorted best-first.
    /// Falls back to input order when the upstream call fails.
    pub async fn prioritize(&self, tasks: &[Task], prompt: &str) -> Vec<Value> {
        let ranked = match self.call_messages(prompt).await.and_then(|text| parse_ranked(&text)) {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(err = %e, "AI prioritization unavailable — falling back to input order");
                tasks
                    .iter()
                    .enumerate()
                    .map(|(i, t)| RankedTask {
                        id: t.id.clone(),
                        ai_priority: i as u32 + 1,
                        ai_reason: "Fallback prioritization (AI unavailable)".to_string(),
                    })
                    .collect()
            }
        };

        let mut enhanced: Vec<Value> = tasks
            .iter()
            .map(|task| {
                let hit = ranked.iter().find(|r| r.id == task.id);
                let mut value = serde_json::to_value(task).unwrap_or_default();
                if let Some(obj) = value.as_object_mut() {
                    match hit {
                        Some(r) => {
                            obj.insert("aiPriority".to_string(), json!(r.ai_priority));
                            obj.insert("aiReason".to_string(), json!(r.ai_reason));
                        }
                        None => {
                            obj.insert("aiPriority".to_string(), json!(999));
                            obj.insert("aiReason".to_string(), json!("No AI analysis available"));
                        }
                    }
                }
                value
            })
            .collect();

        enhanced.sort_by_key(|v| v["aiPriority"].as_u64().unwrap_or(u64::MAX));
        enhanced
    }

    /// Free-text insight about task patterns. Unlike prioritize, upstream
    /// failure propagates to the caller.
    pub async fn insight(&self, prompt: &str) -> Result<String> {
        self.call_messages(prompt).await
    }

    async fn call_messages(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no AI API key configured"))?;

        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [{
                    "type": "text",
                    "text": format!("{prompt}\n\nIMPORTANT: Respond ONLY with valid JSON, no extra commentary."),
                }],
            }],
        });

        let url = format!("{}/v1/messages", self.base_url);
        let response = retry_with_backoff(&self.retry, || async {
            let resp = self
                .http
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .context("AI upstream request failed")?;
            let status = resp.status();
            if !status.is_success() {
                let detail = resp.text().await.unwrap_or_default();
                return Err(anyhow!("AI upstream returned {status}: {detail}"));
            }
            resp.json::<MessagesResponse>()
                .await
                .context("AI upstream returned malformed JSON")
        })
        .await?;

        let text = response
            .content
            .first()
            .map(|block| block.text.clone())
            .unwrap_or_default();
        Ok(text)
    }
}

/// The model may wrap the JSON array in prose or markdown fences; extract
/// the outermost array before parsing.
fn parse_ranked(text: &str) -> Result<Vec<RankedTask>> {
    let candidate = match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    };
    serde_json::from_str(candidate).context("AI ranking response is not a JSON array")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Priority;

    fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            priority: Priority::Medium,
            completed: false,
            created_by: "alice".to_string(),
            assigned_to: "alice".to_string(),
        }
    }

    fn client_without_key() -> AiClient {
        AiClient {
            http: reqwest::Client::new(),
            api_key: None,
            base_url: "http://127.0.0.1:1".to_string(),
            model: "test".to_string(),
            retry: RetryConfig::instant(),
        }
    }

    #[test]
    fn parse_ranked_handles_markdown_wrapping() {
        let text = "Here you go:\n```json\n[{\"id\":\"a\",\"aiPriority\":1,\"aiReason\":\"urgent\"}]\n```";
        let ranked = parse_ranked(text).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "a");
        assert_eq!(ranked[0].ai_priority, 1);
    }

    #[test]
    fn parse_ranked_rejects_non_arrays() {
        assert!(parse_ranked("the tasks look fine").is_err());
    }

    #[tokio::test]
    async fn prioritize_falls_back_to_input_order() {
        let client = client_without_key();
        let tasks = [task("a", "first"), task("b", "second")];
        let enhanced = client.prioritize(&tasks, "rank these").await;
        assert_eq!(enhanced.len(), 2);
        assert_eq!(enhanced[0]["id"], "a");
        assert_eq!(enhanced[0]["aiPriority"], 1);
        assert_eq!(enhanced[1]["aiPriority"], 2);
        assert!(enhanced[0]["aiReason"]
            .as_str()
            .unwrap()
            .contains("Fallback"));
    }

    #[tokio::test]
    async fn insight_errors_without_api_key() {
        let client = client_without_key();
        assert!(client.insight("anything").await.is_err());
    }
}
