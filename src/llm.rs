//! 大语言模型客户端抽象层（自然语言转指令用）。

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::NlConfig;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 最近一次成功调用实际使用的模型。
    fn last_used_model(&self) -> Option<String> {
        None
    }
}

pub fn create_llm(config: &NlConfig, proxy: Option<&str>) -> Result<Box<dyn LlmClient>> {
    Ok(Box::new(OpenRouterClient::new(config, proxy)?))
}

// --- OpenRouter ---
// OpenAI 兼容格式，按优先级依次尝试配置的模型列表。

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

pub struct OpenRouterClient {
    api_key: String,
    models: Vec<String>,
    http_referer: String,
    x_title: String,
    client: reqwest::Client,
    last_used: Mutex<Option<String>>,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ChatError>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatError {
    message: String,
}

enum AttemptError {
    /// 网络/超时/空响应，轮询下一个模型
    Retryable(anyhow::Error),
    /// 接口明确返回错误，直接终止
    Fatal(anyhow::Error),
}

impl OpenRouterClient {
    pub fn new(config: &NlConfig, proxy: Option<&str>) -> Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!("未配置 OpenRouter API Key");
        }
        if config.models.is_empty() {
            anyhow::bail!("未配置模型列表");
        }
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout));
        if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            api_key: config.api_key.clone(),
            models: config.models.clone(),
            http_referer: config
                .http_referer
                .clone()
                .unwrap_or_else(|| "https://github.com/prompt2image".to_string()),
            x_title: config
                .x_title
                .clone()
                .unwrap_or_else(|| "prompt2image".to_string()),
            client: builder.build()?,
            last_used: Mutex::new(None),
        })
    }

    async fn try_model(&self, model: &str, prompt: &str) -> Result<String, AttemptError> {
        let request_body = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(OPENROUTER_URL)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.http_referer)
            .header("X-Title", &self.x_title)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(anyhow!("网络错误（模型: {model}）: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Fatal(anyhow!(
                "OpenRouter API 返回错误 (状态码 {status}): {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Retryable(anyhow!("解析响应失败（模型: {model}）: {e}")))?;

        if let Some(error) = result.error {
            return Err(AttemptError::Fatal(anyhow!(
                "OpenRouter API 错误: {}",
                error.message
            )));
        }

        let content = result
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty());
        match content {
            Some(content) => Ok(content.to_string()),
            None => Err(AttemptError::Retryable(anyhow!(
                "OpenRouter 返回空响应（模型: {model}）"
            ))),
        }
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = None;

        let mut last_error = None;
        for model in &self.models {
            match self.try_model(model, prompt).await {
                Ok(content) => {
                    *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) =
                        Some(model.clone());
                    return Ok(content);
                }
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Retryable(error)) => {
                    warn!("模型 {model} 调用失败: {error}，尝试下一个模型");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("所有模型调用均失败")))
    }

    fn last_used_model(&self) -> Option<String> {
        self.last_used.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_response_parsing_success() {
        let json = r#"{
            "id": "gen-123",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "1girl, solo, smile" },
                "finish_reason": "stop"
            }]
        }"#;
        let result: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(result.error.is_none());
        assert_eq!(
            result.choices[0].message.content.as_deref(),
            Some("1girl, solo, smile")
        );
    }

    #[test]
    fn test_chat_response_parsing_embedded_error() {
        let json = r#"{ "error": { "message": "Invalid API key", "code": 401 } }"#;
        let result: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(result.choices.is_empty());
        assert_eq!(result.error.unwrap().message, "Invalid API key");
    }

    #[test]
    fn test_chat_response_parsing_missing_content() {
        let json = r#"{ "choices": [{ "message": { "role": "assistant" } }] }"#;
        let result: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(result.choices[0].message.content.is_none());
    }

    #[test]
    fn test_client_requires_key_and_models() {
        let mut config = NlConfig {
            api_key: String::new(),
            ..NlConfig::default()
        };
        assert!(OpenRouterClient::new(&config, None).is_err());

        config.api_key = "sk-or-xxx".to_string();
        config.models = vec![];
        assert!(OpenRouterClient::new(&config, None).is_err());

        config.models = vec!["openai/gpt-4o-mini".to_string()];
        assert!(OpenRouterClient::new(&config, None).is_ok());
    }
}
