//! 步骤执行层：shell / file_create / api_call 三种步骤的执行器
//!
//! 步骤失败是值而不是错误：每个步骤都产出 StepResult，由 StepExecutor 决定是否继续。

pub mod executor;
pub mod filesystem;
pub mod http;
pub mod shell;

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use executor::{FailurePolicy, PlanRun, StepExecutor};
pub use filesystem::WorkspaceFs;
pub use http::ApiCaller;
pub use shell::ShellRunner;

/// 截断标记
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// 步骤失败原因（记录在 StepResult 中）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    #[error("exited with status {}", .0.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()))]
    NonZeroExit(Option<i32>),

    #[error("timed out after {0}s")]
    TimedOut(u64),

    #[error("failed to spawn: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("transport error: {0}")]
    Transport(String),

    /// 命中拒绝列表，命令未被执行
    #[error("blocked by denied pattern: {0}")]
    Blocked(String),
}

/// 单个步骤的执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub failure: Option<StepFailure>,
}

impl StepResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            failure: None,
        }
    }

    /// 失败结果；error 为空时使用 failure 的描述
    pub fn failed(failure: StepFailure, output: impl Into<String>, error: Option<String>) -> Self {
        let error = error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| failure.to_string());
        Self {
            success: false,
            output: output.into(),
            error: Some(error),
            failure: Some(failure),
        }
    }
}

/// 最多保留 cap 字节，剩余部分读出后丢弃（子进程不会因管道写满而阻塞）；返回 (内容, 是否截断)
pub async fn read_capped<R>(reader: R, cap: usize) -> io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut limited = reader.take(cap as u64);
    let mut buf = Vec::with_capacity(cap.min(8192));
    limited.read_to_end(&mut buf).await?;
    let mut rest = limited.into_inner();
    let dropped = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;
    Ok((buf, dropped > 0))
}

/// 字节转文本；截断时去掉末尾不完整的 UTF-8 序列并追加 `...[truncated]`
pub fn capped_text(bytes: &[u8], truncated: bool) -> String {
    if !truncated {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let whole = match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => &bytes[..e.valid_up_to()],
        _ => bytes,
    };
    format!("{}{}", String::from_utf8_lossy(whole), TRUNCATION_MARKER)
}
