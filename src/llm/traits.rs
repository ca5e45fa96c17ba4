//! LLM 客户端抽象
//!
//! 每个后端（Ollama / OpenAI 兼容 / Anthropic / Mock）实现 LlmClient：输入 prompt + 生成参数，
//! 输出已归一化的纯文本；厂商特有的响应字段只存在于各自的实现内部。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{ComplexityClass, RoutingMode};

/// 一次生成请求
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// 生成参数；complexity / mode 只被路由器使用，适配器忽略
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// 调用方显式指定的复杂度（总是优先于分类器）
    pub complexity: Option<ComplexityClass>,
    /// 覆盖路由器默认模式
    pub mode: Option<RoutingMode>,
}

/// 单个后端调用失败的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 兼容 API 返回的错误对象（async-openai 不暴露 HTTP 状态码）
    #[error("API error: {0}")]
    Api(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing credential for provider {0}")]
    MissingCredential(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            LlmError::InvalidResponse(e.to_string())
        } else {
            LlmError::Transport(e.to_string())
        }
    }
}

/// LLM 客户端 trait：非流式完成，返回归一化文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> Result<String, LlmError>;
}

/// 非 2xx 响应转为 LlmError::Status，响应体截断到 512 字符
pub(crate) async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::Status {
        status: status.as_u16(),
        body: body.chars().take(512).collect(),
    })
}
