//! LLM 层：复杂度分类、Provider、客户端实现（Ollama / OpenAI 兼容 / Anthropic / Mock）与路由器

pub mod anthropic;
pub mod classifier;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod router;
pub mod traits;

use std::sync::Arc;

pub use anthropic::AnthropicClient;
pub use classifier::{ComplexityClass, ComplexityClassifier};
pub use mock::MockLlmClient;
pub use ollama::OllamaClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use provider::{CostTier, Provider, ProviderKind};
pub use router::{ModelRouter, NormalizedResponse, ProviderFailure, RouterError, RoutingMode};
pub use traits::{GenerationOptions, GenerationRequest, LlmClient, LlmError};

use crate::config::RouterSection;

/// 按 Provider 协议构建客户端
pub fn build_client(provider: &Provider) -> Result<Arc<dyn LlmClient>, LlmError> {
    let client: Arc<dyn LlmClient> = match provider.kind {
        ProviderKind::Ollama => Arc::new(OllamaClient::from_provider(provider)),
        ProviderKind::OpenAiCompatible => Arc::new(OpenAiClient::from_provider(provider)?),
        ProviderKind::Anthropic => Arc::new(AnthropicClient::from_provider(provider)?),
    };
    Ok(client)
}

/// 占位客户端：对应的 Provider 已被过滤，正常路由不会调用到它
struct UnavailableClient(String);

#[async_trait::async_trait]
impl LlmClient for UnavailableClient {
    async fn complete(
        &self,
        _request: &GenerationRequest,
        _options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        Err(LlmError::MissingCredential(self.0.clone()))
    }
}

impl ModelRouter {
    /// 从配置构建路由器；不可用的 Provider 仍登记（用于展示），但不会进入候选
    pub fn from_config(section: &RouterSection) -> Result<Self, String> {
        let mode: RoutingMode = section.mode.parse()?;
        let mut router = ModelRouter::new(mode);
        for entry in &section.providers {
            let provider = Provider::from_config(entry)?;
            let client: Arc<dyn LlmClient> = if provider.available {
                build_client(&provider).map_err(|e| e.to_string())?
            } else {
                tracing::info!(provider = %provider.name, "provider unavailable, skipped for routing");
                Arc::new(UnavailableClient(provider.name.clone()))
            };
            router.add_provider(provider, client);
        }
        Ok(router)
    }
}
