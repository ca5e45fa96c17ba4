//! Provider：一个已配置的 LLM 后端（名称、端点、凭证、成本档位、可用性）
//!
//! 启动时从 [[router.providers]] 加载一次，此后只读。凭证不会出现在 Debug 输出与日志中。

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ProviderSection;

/// 成本档位（Free < Low < High）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    Free,
    Low,
    High,
}

impl FromStr for CostTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "low" => Ok(Self::Low),
            "high" => Ok(Self::High),
            other => Err(format!("unknown cost tier: {other}")),
        }
    }
}

/// 后端协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl ProviderKind {
    /// 托管服务需要凭证；本地 Ollama 不需要
    pub fn requires_credential(&self) -> bool {
        !matches!(self, Self::Ollama)
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::Ollama => Duration::from_secs(30),
            Self::OpenAiCompatible | Self::Anthropic => Duration::from_secs(60),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "openai_compatible" | "deepseek" => Ok(Self::OpenAiCompatible),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

/// 已配置的 LLM 后端
#[derive(Clone)]
pub struct Provider {
    pub name: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    pub model: String,
    credential: Option<String>,
    pub cost_tier: CostTier,
    /// 凭证缺失或被禁用时为 false，路由前即被过滤
    pub available: bool,
    /// 单次调用的超时预算
    pub timeout: Duration,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        kind: ProviderKind,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        cost_tier: CostTier,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: endpoint.into(),
            model: model.into(),
            credential: None,
            cost_tier,
            available: !kind.requires_credential(),
            timeout: kind.default_timeout(),
        }
    }

    /// 设置凭证；空字符串视为缺失
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.trim().is_empty());
        self.available = !self.kind.requires_credential() || self.credential.is_some();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 强制标记不可用（配置 enabled = false 或健康检查失败）
    pub fn disabled(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// 从配置段构建；credential 优先，其次读取 credential_env 指向的环境变量
    pub fn from_config(section: &ProviderSection) -> Result<Self, String> {
        let kind: ProviderKind = section.kind.parse()?;
        let cost_tier: CostTier = section.cost_tier.parse()?;
        let credential = section.credential.clone().or_else(|| {
            section
                .credential_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
        });
        let mut provider = Provider::new(
            section.name.clone(),
            kind,
            section.endpoint.clone(),
            section.model.clone(),
            cost_tier,
        )
        .with_credential(credential);
        if let Some(secs) = section.timeout_secs {
            provider = provider.with_timeout(Duration::from_secs(secs.max(1)));
        }
        if !section.enabled {
            provider = provider.disabled();
        }
        Ok(provider)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("cost_tier", &self.cost_tier)
            .field("available", &self.available)
            .field("timeout", &self.timeout)
            .finish()
    }
}
