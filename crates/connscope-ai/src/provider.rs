use std::time::Duration;

use anyhow::{Context, Result};
use connscope_core::config::AiSection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    Zhipu,
    Qwen,
    Kimi,
    OpenAi,
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Zhipu => write!(f, "zhipu"),
            AiProvider::Qwen => write!(f, "qwen"),
            AiProvider::Kimi => write!(f, "kimi"),
            AiProvider::OpenAi => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for AiProvider {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "zhipu" | "glm" => Ok(AiProvider::Zhipu),
            "qwen" | "dashscope" => Ok(AiProvider::Qwen),
            "kimi" | "moonshot" => Ok(AiProvider::Kimi),
            "openai" | "open_ai" => Ok(AiProvider::OpenAi),
            _ => anyhow::bail!("unknown provider '{}': expected zhipu, qwen, kimi, or openai", s),
        }
    }
}

impl AiProvider {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            AiProvider::Zhipu => "https://open.bigmodel.cn/api/paas/v4/chat/completions",
            AiProvider::Qwen => "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions",
            AiProvider::Kimi => "https://api.moonshot.cn/v1/chat/completions",
            AiProvider::OpenAi => "https://api.openai.com/v1/chat/completions",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            AiProvider::Zhipu => "glm-4",
            AiProvider::Qwen => "qwen-plus",
            AiProvider::Kimi => "moonshot-v1-8k",
            AiProvider::OpenAi => "gpt-4o",
        }
    }
}

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fully resolved provider settings: every optional field of the
/// config section filled from the provider's defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub temperature: f32,
}

impl AiConfig {
    pub fn from_section(section: &AiSection) -> Result<Self> {
        let provider: AiProvider = section.provider.parse()?;
        Ok(Self {
            provider,
            api_key: section.api_key.clone().filter(|k| !k.is_empty()),
            model: section
                .model
                .clone()
                .unwrap_or_else(|| provider.default_model().to_string()),
            endpoint: section
                .api_base
                .clone()
                .unwrap_or_else(|| provider.default_endpoint().to_string()),
            timeout: Duration::from_secs(section.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            max_retries: section.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1),
            temperature: section.temperature,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// Wait before retry number `attempt` (0-based): 2s, 4s, 6s...
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2 * (attempt as u64 + 1))
}

pub fn extract_content(json: &serde_json::Value) -> Result<String> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(String::from)
        .context("response has no choices[0].message.content")
}

pub struct AiClient {
    config: AiConfig,
    http: reqwest::Client,
}

impl AiClient {
    pub fn new(config: AiConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    pub fn has_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Sends `messages`, retrying failures up to `max_retries` attempts in
    /// total with a linearly growing pause between them.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..self.config.max_retries {
            match self.chat_once(messages).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    if attempt + 1 < self.config.max_retries {
                        let wait = backoff(attempt);
                        tracing::warn!(
                            provider = %self.config.provider,
                            attempt = attempt + 1,
                            max = self.config.max_retries,
                            wait_secs = wait.as_secs(),
                            error = %format!("{e:#}"),
                            "AI request failed, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts made")))
    }

    async fn chat_once(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!("no API key configured. Set AI_API_KEY or ai.api_key in the config file")
        })?;

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
        });

        let resp = self
            .http
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach {} API", self.config.provider))?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("{} API error ({}): {}", self.config.provider, status, text);
        }

        let json: serde_json::Value = serde_json::from_str(&text)?;
        extract_content(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse_and_display() -> Result<()> {
        for p in [AiProvider::Zhipu, AiProvider::Qwen, AiProvider::Kimi, AiProvider::OpenAi] {
            assert_eq!(p.to_string().parse::<AiProvider>()?, p);
        }
        assert_eq!("Moonshot".parse::<AiProvider>()?, AiProvider::Kimi);
        assert!("claude".parse::<AiProvider>().is_err());
        Ok(())
    }

    #[test]
    fn test_config_defaults_per_provider() -> Result<()> {
        let section = AiSection {
            provider: "qwen".into(),
            api_key: Some(String::new()),
            ..Default::default()
        };
        let cfg = AiConfig::from_section(&section)?;
        assert_eq!(cfg.model, "qwen-plus");
        assert!(cfg.endpoint.starts_with("https://dashscope.aliyuncs.com/"));
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.api_key, None);
        Ok(())
    }

    #[test]
    fn test_config_overrides() -> Result<()> {
        let section = AiSection {
            provider: "openai".into(),
            api_key: Some("sk-test".into()),
            model: Some("gpt-4o-mini".into()),
            api_base: Some("http://localhost:8080/v1/chat/completions".into()),
            timeout_secs: Some(5),
            max_retries: Some(0),
            ..Default::default()
        };
        let cfg = AiConfig::from_section(&section)?;
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(cfg.max_retries, 1);
        Ok(())
    }

    #[test]
    fn test_backoff_is_linear() {
        assert_eq!(backoff(0), Duration::from_secs(2));
        assert_eq!(backoff(1), Duration::from_secs(4));
        assert_eq!(backoff(2), Duration::from_secs(6));
    }

    #[test]
    fn test_extract_content() {
        let ok = serde_json::json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]});
        assert_eq!(extract_content(&ok).unwrap(), "hello");
        assert!(extract_content(&serde_json::json!({"error": "bad"})).is_err());
    }

    #[test]
    fn test_chat_without_key_fails() -> Result<()> {
        let cfg = AiConfig::from_section(&AiSection {
            max_retries: Some(1),
            ..Default::default()
        })?;
        let client = AiClient::new(cfg)?;
        assert!(!client.has_key());
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let err = rt.block_on(client.chat(&[ChatMessage::user("hi")])).unwrap_err();
        assert!(err.to_string().contains("no API key"));
        Ok(())
    }
}
