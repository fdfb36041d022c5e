//! Chat-completion client for the analysis agents.
//!
//! All supported providers speak the OpenAI-compatible chat endpoint, so a
//! single request/response shape covers them; the provider only selects the
//! base URL and API key. Structured output is obtained by demanding a JSON
//! object in the reply and extracting it from the content.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::{LlmConfig, LlmProvider};

#[derive(Debug, Clone)]
pub struct LlmUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LlmCallOutput {
    pub model: String,
    pub content: String,
    pub usage: LlmUsage,
    pub latency_ms: u64,
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    provider: LlmProvider,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
}

impl LlmClient {
    pub fn from_config(http: reqwest::Client, cfg: &LlmConfig) -> Result<Self> {
        let api_key = cfg
            .api_key_for(cfg.provider)
            .context("no API key configured for the selected LLM provider")?
            .to_string();
        if api_key.trim().is_empty() {
            return Err(anyhow!("LLM API key is empty"));
        }

        Ok(Self {
            http,
            provider: cfg.provider,
            api_key,
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            timeout: cfg.request_timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &'static str {
        match self.provider {
            LlmProvider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            LlmProvider::OpenAi => "https://api.openai.com/v1/chat/completions",
            LlmProvider::DeepSeek => "https://api.deepseek.com/v1/chat/completions",
            LlmProvider::Anthropic => "https://api.anthropic.com/v1/chat/completions",
        }
    }

    pub async fn chat_completion(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> Result<LlmCallOutput> {
        let start = Instant::now();

        let req = ChatCompletionRequest {
            model: model.to_string(),
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
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };

        let resp = self
            .http
            .post(self.endpoint())
            .timeout(self.timeout)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .context("chat completion request")?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(anyhow!(
                "{} {}: {}",
                self.provider.as_str(),
                status.as_u16(),
                snippet
            ));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).context("chat completion json parse")?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(LlmCallOutput {
            model: model.to_string(),
            content,
            usage: LlmUsage {
                prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
                completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
                total_tokens: parsed.usage.as_ref().and_then(|u| u.total_tokens),
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// `(prompt, schema) -> instance | error`: run the chat call and parse
    /// the JSON object the reply must contain.
    pub async fn structured<T: serde::de::DeserializeOwned>(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> Result<(T, LlmCallOutput)> {
        let out = self.chat_completion(model, system, user).await?;
        let json = extract_json_object(&out.content)
            .ok_or_else(|| anyhow!("no JSON object in model reply"))?;
        let value: T = serde_json::from_str(json).with_context(|| {
            let snippet: String = json.chars().take(200).collect();
            format!("reply did not match schema: {snippet}")
        })?;
        Ok((value, out))
    }
}

/// Pull the first balanced JSON object out of free-form model text. Models
/// routinely wrap the object in prose or markdown fences.
pub fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    pub message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_from_fenced_reply() {
        let content = "Here is my analysis:\n```json\n{\"signal\": \"BUY\", \"confidence\": 80}\n```\nDone.";
        let json = extract_json_object(content).unwrap();
        let v: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(v["signal"], "BUY");
    }

    #[test]
    fn extract_json_handles_nested_objects_and_strings() {
        let content = r#"{"a": {"b": "with } brace"}, "c": 1} trailing"#;
        let json = extract_json_object(content).unwrap();
        assert_eq!(json, r#"{"a": {"b": "with } brace"}, "c": 1}"#);
    }

    #[test]
    fn extract_json_none_without_object() {
        assert!(extract_json_object("no json here").is_none());
    }
}
