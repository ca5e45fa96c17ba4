//! Anthropic Messages API 客户端
//!
//! POST {endpoint}/v1/messages，拼接 content 数组中所有 text 片段。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::llm::traits::error_for_status;
use crate::llm::{GenerationOptions, GenerationRequest, LlmClient, LlmError, Provider};

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Messages API 要求必须给出 max_tokens
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_provider(provider: &Provider) -> Result<Self, LlmError> {
        let key = provider
            .credential()
            .ok_or_else(|| LlmError::MissingCredential(provider.name.clone()))?;
        Ok(Self::new(provider.endpoint.clone(), provider.model.clone(), key))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let parsed: MessagesResponse = error_for_status(resp).await?.json().await?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse("no text content".to_string()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "type": "message",
                "content": [
                    {"type": "text", "text": "Hello, "},
                    {"type": "text", "text": "world"}
                ]
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(server.uri(), "claude", "sk-test");
        let text = client
            .complete(
                &GenerationRequest::new("greet").with_system("be brief"),
                &GenerationOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(text, "Hello, world");
    }

    #[tokio::test]
    async fn test_empty_content_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": []})))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(server.uri(), "claude", "sk-test");
        let err = client
            .complete(&GenerationRequest::new("hi"), &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn test_requires_credential() {
        let provider = Provider::new(
            "claude",
            crate::llm::ProviderKind::Anthropic,
            "http://localhost",
            "m",
            crate::llm::CostTier::High,
        );
        assert!(matches!(
            AnthropicClient::from_provider(&provider),
            Err(LlmError::MissingCredential(_))
        ));
    }
}
