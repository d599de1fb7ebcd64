//! 翻译服务提供方
//!
//! 主服务使用对话补全接口（Mistral / OpenAI 兼容），备用服务使用 REST 翻译接口
//! （DeepLX、dptrans 或通用 `translated_text` 格式）。
//!
//! 提供方只负责单次请求：网络错误、非 2xx、非 JSON 响应和格式错误都以
//! [`TranslationError`] 返回，由 [`crate::TranslationClient`] 决定重试和降级。

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::config::{ChatProviderConfig, RestFlavor, RestProviderConfig};
use crate::error::{Result, TranslationError};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, DeepLXRequest, DeepLXResponse,
    DpTransRequest, GenericTranslateRequest,
};

/// 翻译服务提供方
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// 用于日志的名称
    fn name(&self) -> &str;

    /// 翻译一段文本，返回译文
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;

    /// 识别文本语言，返回模型的原始回答；不支持时返回 `None`
    async fn detect_language(&self, _text: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// 发送 JSON 请求并将响应解析为 JSON
///
/// 429 映射为 `RateLimited`，其他非 2xx 映射为 `ApiError`，
/// 连接失败和超时映射为 `Network`，响应体不是 JSON 时为 `Provider`。
pub(crate) async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    bearer: Option<&str>,
    body: &B,
) -> Result<serde_json::Value> {
    let mut request = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json")
        .json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| TranslationError::Network(format!("请求 {} 失败: {}", url, e)))?;

    let status = response.status();
    debug!(%status, url, "翻译服务响应");

    let body = response
        .text()
        .await
        .map_err(|e| TranslationError::Network(format!("读取响应文本失败: {}", e)))?;

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TranslationError::RateLimited(body));
    }
    if !status.is_success() {
        return Err(TranslationError::ApiError {
            code: status.as_u16() as i32,
            message: format!("{} - {}", status, body),
        });
    }

    serde_json::from_str::<serde_json::Value>(&body)
        .map_err(|e| TranslationError::Provider(format!("响应不是有效的JSON: {}", e)))
}

/// 去掉模型回显的外层引号
fn strip_echo_quotes(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// 对话补全翻译服务
pub struct ChatCompletionProvider {
    client: Client,
    config: ChatProviderConfig,
}

impl ChatCompletionProvider {
    pub fn new(client: Client, config: ChatProviderConfig) -> Self {
        Self { client, config }
    }

    fn max_tokens_for(&self, text: &str) -> u32 {
        let scaled = (text.chars().count() as f64 * 1.5).ceil() as u32;
        scaled.max(self.config.min_max_tokens)
    }

    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32, max_tokens: u32) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature,
            max_tokens,
        };

        let value = post_json(
            &self.client,
            &self.config.endpoint,
            Some(self.config.api_key.as_str()),
            &request,
        )
        .await?;

        let response: ChatCompletionResponse = serde_json::from_value(value)
            .map_err(|e| TranslationError::Provider(format!("无法解析对话补全响应: {}", e)))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| TranslationError::Provider("响应中没有 choices".to_string()))?;

        let content = strip_echo_quotes(&content);
        if content.is_empty() {
            return Err(TranslationError::Provider("返回了空的翻译结果".to_string()));
        }
        Ok(content.to_string())
    }
}

#[async_trait]
impl TranslationProvider for ChatCompletionProvider {
    fn name(&self) -> &str {
        "chat-completion"
    }

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let direction = if source_lang == "auto" {
            format!("into {}", target_lang)
        } else {
            format!("from {} into {}", source_lang, target_lang)
        };

        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: format!(
                    "You are a professional translation assistant. Translate the given text {} \
                     preserving the meaning and tone of the original, producing natural and fluent output.",
                    direction
                ),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!(
                    "Translate the following text {}. Return only the translation, without explanations:\n\n\"{}\"",
                    direction, text
                ),
            },
        ];

        self.complete(messages, self.config.temperature, self.max_tokens_for(text))
            .await
    }

    async fn detect_language(&self, text: &str) -> Result<Option<String>> {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: "You are a language identification expert. Answer only with a two-letter language code (en, tr, fr, de, ...).".to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!(
                    "Identify the language of the following text and return only its two-letter code.\n\n\"{}\"",
                    text
                ),
            },
        ];

        self.complete(messages, 0.1, 10).await.map(Some)
    }
}

/// REST 翻译服务（DeepLX / dptrans / 通用格式）
pub struct RestTranslateProvider {
    client: Client,
    config: RestProviderConfig,
}

impl RestTranslateProvider {
    pub fn new(client: Client, config: RestProviderConfig) -> Self {
        Self { client, config }
    }
}

/// 从 REST 接口的 JSON 响应中提取译文
pub(crate) fn extract_rest_translation(value: &serde_json::Value) -> Result<String> {
    if let Ok(result) = serde_json::from_value::<DeepLXResponse>(value.clone()) {
        return if result.code == 200 {
            if result.data.trim().is_empty() {
                Err(TranslationError::Provider("DeepLX返回了空的翻译结果".to_string()))
            } else {
                Ok(result.data)
            }
        } else {
            Err(TranslationError::ApiError {
                code: result.code,
                message: format!("DeepLX翻译失败，返回代码: {}", result.code),
            })
        };
    }

    let translated = value
        .get("translated_text")
        .or_else(|| value.get("result"))
        .or_else(|| value.get("translation"))
        .or_else(|| value.get("data"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    match translated {
        Some(text) => Ok(text.to_string()),
        None => Err(TranslationError::Provider(format!(
            "无法从JSON响应中提取翻译结果: {}",
            value
        ))),
    }
}

#[async_trait]
impl TranslationProvider for RestTranslateProvider {
    fn name(&self) -> &str {
        match self.config.flavor {
            RestFlavor::DeepLx => "deeplx",
            RestFlavor::DpTrans => "dptrans",
            RestFlavor::Generic => "rest",
        }
    }

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let bearer = self.config.api_key.as_deref();
        let url = self.config.api_url.as_str();

        let value = match self.config.flavor {
            RestFlavor::DeepLx => {
                let request = DeepLXRequest {
                    text: text.to_string(),
                    source_lang: source_lang.to_string(),
                    target_lang: target_lang.to_string(),
                };
                post_json(&self.client, url, bearer, &request).await?
            }
            RestFlavor::DpTrans => {
                let request = DpTransRequest {
                    text: text.to_string(),
                    source_lang: source_lang.to_string(),
                    target_lang: target_lang.to_string(),
                };
                post_json(&self.client, url, bearer, &request).await?
            }
            RestFlavor::Generic => {
                let request = GenericTranslateRequest {
                    text: text.to_string(),
                    source_language: source_lang.to_string(),
                    target_language: target_lang.to_string(),
                };
                post_json(&self.client, url, bearer, &request).await?
            }
        };

        extract_rest_translation(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_provider(url: String) -> ChatCompletionProvider {
        ChatCompletionProvider::new(
            Client::new(),
            ChatProviderConfig {
                endpoint: url,
                api_key: "test-key".to_string(),
                ..ChatProviderConfig::default()
            },
        )
    }

    #[test]
    fn deeplx_payload_is_extracted() {
        let value = json!({"code": 200, "data": "merhaba"});
        assert_eq!(extract_rest_translation(&value).unwrap(), "merhaba");
    }

    #[test]
    fn generic_payload_is_extracted() {
        let value = json!({"translated_text": " hallo "});
        assert_eq!(extract_rest_translation(&value).unwrap(), "hallo");
    }

    #[test]
    fn deeplx_error_code_is_api_error() {
        let value = json!({"code": 503, "data": ""});
        assert!(matches!(
            extract_rest_translation(&value),
            Err(TranslationError::ApiError { code: 503, .. })
        ));
    }

    #[test]
    fn missing_translation_is_provider_error() {
        let value = json!({"status": "ok"});
        assert!(matches!(
            extract_rest_translation(&value),
            Err(TranslationError::Provider(_))
        ));
    }

    #[test]
    fn echoed_quotes_are_removed() {
        assert_eq!(strip_echo_quotes("  \"Merhaba dünya\" "), "Merhaba dünya");
        assert_eq!(strip_echo_quotes("plain"), "plain");
    }

    #[tokio::test]
    async fn chat_provider_sends_bearer_and_reads_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Merhaba dünya"}}]}"#)
            .create_async()
            .await;

        let provider = chat_provider(format!("{}/v1/chat/completions", server.url()));
        let out = provider.translate("Hello world", "en", "tr").await.unwrap();
        assert_eq!(out, "Merhaba dünya");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_json_body_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let provider = chat_provider(format!("{}/v1/chat/completions", server.url()));
        let err = provider.translate("Hello", "en", "tr").await.unwrap_err();
        assert!(matches!(err, TranslationError::Provider(_)));
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/translate")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let provider = RestTranslateProvider::new(
            Client::new(),
            RestProviderConfig {
                enabled: true,
                api_url: format!("{}/translate", server.url()),
                api_key: None,
                flavor: RestFlavor::Generic,
            },
        );
        let err = provider.translate("Hello", "en", "tr").await.unwrap_err();
        assert!(matches!(err, TranslationError::RateLimited(_)));
    }
}
