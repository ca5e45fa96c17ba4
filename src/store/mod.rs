//! 任务存储：TaskStore trait 与内存 / SQLite 两种实现
//!
//! 存储是唯一的共享可变资源。执行互斥依赖 compare_and_swap：只有库中任务的 (status, updated_at)
//! 仍等于调用方读到的版本时才写入，检查与写入在同一临界区内完成。

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{StoreBackend, StoreSection};
use crate::task::{ExecutionRecord, Task, TaskPriority, TaskStatus};

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task already exists: {0}")]
    Duplicate(String),

    /// compare_and_swap 时任务已被其他写入修改；actual 为库中当前状态
    #[error("Task {id} is {actual}")]
    StatusMismatch { id: String, actual: TaskStatus },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(String),

    #[error("Store lock poisoned")]
    Poisoned,

    /// 库中数据无法还原为领域类型
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Join(e.to_string())
    }
}

/// 列表过滤条件；均为 None 时返回全部
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

impl TaskFilter {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.priority.map_or(true, |p| task.priority == p)
    }
}

/// 列表的确定性顺序：优先级降序，创建时间升序，id 升序
pub fn sort_for_listing(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Task, StoreError>;

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// 原子地：若库中任务的 status 与 updated_at 仍等于 current 的值，则整体替换为 next；
    /// 否则 StatusMismatch（即使状态相同，中间发生过其他迁移也算不匹配）
    async fn compare_and_swap(&self, current: &Task, next: &Task) -> Result<(), StoreError>;

    /// 追加执行记录（只追加，不修改）
    async fn append_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// 按 execution_time 排序，同时刻按插入顺序
    async fn executions(&self, task_id: &str) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// 按配置打开存储
pub fn open_store(section: &StoreSection) -> Result<Arc<dyn TaskStore>, StoreError> {
    let store: Arc<dyn TaskStore> = match section.backend {
        StoreBackend::Memory => Arc::new(MemoryTaskStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteTaskStore::open(&section.path)?),
    };
    Ok(store)
}
