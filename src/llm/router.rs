//! 多模型路由器
//!
//! 根据复杂度挑选 Provider 并按顺序回退：
//! - 先过滤掉不可用（缺凭证 / 被禁用）的 Provider
//! - simple / medium：按成本档位升序（最便宜的可用 Provider 优先）
//! - complex：按成本档位降序（能力更强的托管模型优先）
//! - 每个候选只调用一次，各自带超时；全部失败返回 AllProvidersExhausted

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use super::{
    ComplexityClass, ComplexityClassifier, GenerationOptions, GenerationRequest, LlmClient,
    LlmError, Provider,
};

/// 路由模式
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// 按复杂度决定排序方向
    #[default]
    Auto,
    /// 总是成本升序
    PreferLocal,
    /// 总是成本降序
    PreferHosted,
    /// 只使用指定 Provider
    Only(String),
}

impl FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix("only:") {
            return Ok(Self::Only(name.trim().to_string()));
        }
        match s.to_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "prefer_local" | "local" => Ok(Self::PreferLocal),
            "prefer_hosted" | "hosted" => Ok(Self::PreferHosted),
            other => Err(format!("unknown routing mode: {other}")),
        }
    }
}

/// 归一化后的生成结果；调用方不需要关心具体是哪个厂商的响应格式
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedResponse {
    pub text: String,
    pub provider_used: String,
    pub complexity: ComplexityClass,
}

/// 单个候选的失败记录
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: LlmError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    /// 候选列表中每一个 Provider 都失败（候选为空时 attempts 也为空）
    #[error("All providers exhausted ({})", format_attempts(.attempts))]
    AllProvidersExhausted { attempts: Vec<ProviderFailure> },
}

fn format_attempts(attempts: &[ProviderFailure]) -> String {
    if attempts.is_empty() {
        return "no available provider".to_string();
    }
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// 多模型路由器：持有 (Provider, 客户端) 列表，顺序即配置顺序
pub struct ModelRouter {
    providers: Vec<(Provider, Arc<dyn LlmClient>)>,
    default_mode: RoutingMode,
    /// 实际发出的后端调用次数（含失败）
    call_count: AtomicUsize,
}

impl ModelRouter {
    pub fn new(default_mode: RoutingMode) -> Self {
        Self {
            providers: Vec::new(),
            default_mode,
            call_count: AtomicUsize::new(0),
        }
    }

    /// 添加 Provider 及其客户端
    pub fn add_provider(&mut self, provider: Provider, client: Arc<dyn LlmClient>) {
        self.providers.push((provider, client));
    }

    pub fn with_provider(mut self, provider: Provider, client: Arc<dyn LlmClient>) -> Self {
        self.add_provider(provider, client);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn providers(&self) -> impl Iterator<Item = &Provider> {
        self.providers.iter().map(|(p, _)| p)
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// 给出有序候选列表（不含不可用 Provider）
    pub fn route(&self, complexity: ComplexityClass, mode: &RoutingMode) -> Vec<Provider> {
        self.candidates(complexity, mode)
            .into_iter()
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn candidates(
        &self,
        complexity: ComplexityClass,
        mode: &RoutingMode,
    ) -> Vec<&(Provider, Arc<dyn LlmClient>)> {
        let mut candidates: Vec<_> = self.providers.iter().filter(|(p, _)| p.available).collect();

        let descending = match mode {
            RoutingMode::Only(name) => {
                candidates.retain(|(p, _)| &p.name == name);
                return candidates;
            }
            RoutingMode::PreferLocal => false,
            RoutingMode::PreferHosted => true,
            RoutingMode::Auto => complexity == ComplexityClass::Complex,
        };

        // sort_by_key 为稳定排序：同档位保持配置顺序
        if descending {
            candidates.sort_by_key(|(p, _)| std::cmp::Reverse(p.cost_tier));
        } else {
            candidates.sort_by_key(|(p, _)| p.cost_tier);
        }
        candidates
    }

    /// 分类 → 路由 → 依次调用候选，首个成功即返回
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> Result<NormalizedResponse, RouterError> {
        let complexity = ComplexityClassifier::classify(&request.prompt, options.complexity);
        let mode = options.mode.as_ref().unwrap_or(&self.default_mode);
        let candidates = self.candidates(complexity, mode);

        tracing::debug!(
            complexity = %complexity,
            candidates = ?candidates.iter().map(|(p, _)| p.name.as_str()).collect::<Vec<_>>(),
            "routing request"
        );

        let mut attempts = Vec::with_capacity(candidates.len());
        for (provider, client) in candidates {
            self.call_count.fetch_add(1, Ordering::Relaxed);
            let start = Instant::now();
            let outcome =
                tokio::time::timeout(provider.timeout, client.complete(request, options)).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            let error = match outcome {
                Ok(Ok(text)) => {
                    tracing::info!(
                        provider = %provider.name,
                        complexity = %complexity,
                        latency_ms,
                        "provider succeeded"
                    );
                    return Ok(NormalizedResponse {
                        text,
                        provider_used: provider.name.clone(),
                        complexity,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => LlmError::Timeout(provider.timeout.as_secs()),
            };

            tracing::warn!(
                provider = %provider.name,
                latency_ms,
                error = %error,
                "provider failed, falling back"
            );
            attempts.push(ProviderFailure {
                provider: provider.name.clone(),
                error,
            });
        }

        Err(RouterError::AllProvidersExhausted { attempts })
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new(RoutingMode::Auto)
    }
}
