//! Ollama 本地模型客户端
//!
//! POST {endpoint}/api/generate，stream=false，读取响应体中的 `response` 字段。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::llm::traits::error_for_status;
use crate::llm::{GenerationOptions, GenerationRequest, LlmClient, LlmError, Provider};

pub struct OllamaClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn from_provider(provider: &Provider) -> Self {
        Self::new(provider.endpoint.clone(), provider.model.clone())
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        let mut body = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        let mut model_options = serde_json::Map::new();
        if let Some(t) = options.temperature {
            model_options.insert("temperature".into(), json!(t));
        }
        if let Some(n) = options.max_tokens {
            model_options.insert("num_predict".into(), json!(n));
        }
        if !model_options.is_empty() {
            body["options"] = serde_json::Value::Object(model_options);
        }

        let resp = self
            .http
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await?;
        let parsed: GenerateResponse = error_for_status(resp).await?.json().await?;

        parsed
            .response
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("missing `response` field".to_string()))
    }
}
