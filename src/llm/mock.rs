//! Mock LLM 客户端（用于测试，无需网络）
//!
//! 固定回复 / 固定失败 / 延迟回复，并统计被调用次数。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{GenerationOptions, GenerationRequest, LlmClient, LlmError};

#[derive(Debug, Clone)]
enum Behavior {
    Reply(String),
    Fail(LlmError),
}

#[derive(Debug, Clone)]
pub struct MockLlmClient {
    behavior: Behavior,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockLlmClient {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::Reply(text.into()),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(error: LlmError) -> Self {
        Self {
            behavior: Behavior::Fail(error),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 共享计数器；clone 出的实例与原实例计数相同
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::reply("mock response")
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        _request: &GenerationRequest,
        _options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Fail(e) => Err(e.clone()),
        }
    }
}
