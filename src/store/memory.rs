//! 内存存储（测试与临时运行用）

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{sort_for_listing, StoreError, TaskFilter, TaskStore};
use crate::task::{ExecutionRecord, Task};

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    executions: RwLock<HashMap<String, Vec<ExecutionRecord>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id.clone()));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        sort_for_listing(&mut tasks);
        Ok(tasks)
    }

    async fn compare_and_swap(&self, current: &Task, next: &Task) -> Result<(), StoreError> {
        // 写锁内完成检查与替换
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(&current.id)
            .ok_or_else(|| StoreError::NotFound(current.id.clone()))?;
        if stored.status != current.status || stored.updated_at != current.updated_at {
            return Err(StoreError::StatusMismatch {
                id: current.id.clone(),
                actual: stored.status,
            });
        }
        *stored = next.clone();
        Ok(())
    }

    async fn append_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        if !self.tasks.read().await.contains_key(&record.task_id) {
            return Err(StoreError::NotFound(record.task_id.clone()));
        }
        self.executions
            .write()
            .await
            .entry(record.task_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn executions(&self, task_id: &str) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut records = self
            .executions
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default();
        // 稳定排序，同一时刻保持插入顺序
        records.sort_by_key(|r| r.execution_time);
        Ok(records)
    }
}
