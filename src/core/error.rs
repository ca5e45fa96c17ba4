//! 编排层错误类型
//!
//! 各层错误（计划 / 路由 / 存储）在这里汇总；步骤失败不是错误，它们被记录在 ExecutionRecord 中。

use thiserror::Error;

use crate::llm::RouterError;
use crate::plan::PlanError;
use crate::store::StoreError;
use crate::task::TaskStatus;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    /// 当前状态不允许该操作；不会修改任务
    #[error("Cannot {action} task {id} in state {status}")]
    InvalidState {
        id: String,
        status: TaskStatus,
        action: &'static str,
    },

    #[error("Analysis already in progress for task {0}")]
    AnalysisInProgress(String),

    #[error("Task {0} is already executing")]
    ConcurrentExecution(String),

    #[error("Planning failed: {0}")]
    Plan(PlanError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("No model providers configured")]
    RouterNotConfigured,

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl OrchestratorError {
    /// 状态冲突类错误（InvalidState / AnalysisInProgress / ConcurrentExecution）
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. } | Self::AnalysisInProgress(_) | Self::ConcurrentExecution(_)
        )
    }
}

impl From<PlanError> for OrchestratorError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::Router(r) => OrchestratorError::Router(r),
            other => OrchestratorError::Plan(other),
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => OrchestratorError::NotFound(id),
            other => OrchestratorError::Store(other),
        }
    }
}
