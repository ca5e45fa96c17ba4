//! SQLite 存储（rusqlite，bundled）
//!
//! 同步 Connection 放在 Mutex 后面，所有操作经 spawn_blocking 执行；
//! 列表字段与计划以 JSON 文本存储。CAS 是一条带 `status = ? AND updated_at = ?` 条件的 UPDATE。
//! 打开文件库时，上次进程退出时仍处于 executing 的任务被落为 failed 并补一条失败记录。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};

use super::{sort_for_listing, StoreError, TaskFilter, TaskStore};
use crate::task::{ExecutionRecord, Task, TaskPriority, TaskStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    objective TEXT NOT NULL,
    requirements TEXT NOT NULL DEFAULT '[]',
    constraints TEXT NOT NULL DEFAULT '[]',
    acceptance_criteria TEXT NOT NULL DEFAULT '[]',
    priority TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    plan TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority);

CREATE TABLE IF NOT EXISTS task_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    execution_time TEXT NOT NULL,
    success INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    step_results TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_task_executions_task ON task_executions(task_id, execution_time);
";

const TASK_COLUMNS: &str = "id, title, description, objective, requirements, constraints, \
     acceptance_criteria, priority, status, created_at, updated_at, completed_at, plan";

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// 打开（或创建）数据库文件，父目录不存在时自动创建
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(SCHEMA)?;
        let recovered = recover_interrupted(&mut conn)?;
        if recovered > 0 {
            tracing::warn!(
                path = %path.display(),
                recovered,
                "tasks left executing by a previous run marked failed"
            );
        }
        tracing::info!(path = %path.display(), "sqlite task store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程池中持锁执行 f
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await?
    }
}

/// 写入用的列值
struct TaskRow {
    id: String,
    title: String,
    description: String,
    objective: String,
    requirements: String,
    constraints: String,
    acceptance_criteria: String,
    priority: &'static str,
    status: &'static str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    plan: Option<String>,
}

impl TaskRow {
    fn from_task(task: &Task) -> Result<Self, StoreError> {
        Ok(Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            objective: task.objective.clone(),
            requirements: serde_json::to_string(&task.requirements)?,
            constraints: serde_json::to_string(&task.constraints)?,
            acceptance_criteria: serde_json::to_string(&task.acceptance_criteria)?,
            priority: task.priority.as_str(),
            status: task.status.as_str(),
            created_at: task.created_at,
            updated_at: task.updated_at,
            completed_at: task.completed_at,
            plan: task.plan.as_ref().map(serde_json::to_string).transpose()?,
        })
    }
}

fn task_from_row(row: &Row<'_>) -> Result<Task, StoreError> {
    let priority: String = row.get(7)?;
    let status: String = row.get(8)?;
    let plan: Option<String> = row.get(12)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        objective: row.get(3)?,
        requirements: serde_json::from_str(&row.get::<_, String>(4)?)?,
        constraints: serde_json::from_str(&row.get::<_, String>(5)?)?,
        acceptance_criteria: serde_json::from_str(&row.get::<_, String>(6)?)?,
        priority: priority.parse::<TaskPriority>().map_err(StoreError::Corrupt)?,
        status: status.parse::<TaskStatus>().map_err(StoreError::Corrupt)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        completed_at: row.get(11)?,
        plan: plan.as_deref().map(serde_json::from_str).transpose()?,
    })
}

/// executing 状态的任务没有执行者（进程已退出）：补一条无步骤的失败记录（已有记录则不补），再落为 failed
fn recover_interrupted(conn: &mut Connection) -> Result<usize, StoreError> {
    let now = Utc::now();
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO task_executions (task_id, execution_time, success, duration_ms, step_results)
         SELECT t.id, t.updated_at, 0, 0, '[]' FROM tasks t
         WHERE t.status = 'executing'
           AND NOT EXISTS (
               SELECT 1 FROM task_executions e
               WHERE e.task_id = t.id AND e.execution_time >= t.updated_at
           )",
        [],
    )?;
    let recovered = tx.execute(
        "UPDATE tasks SET status = 'failed', updated_at = ?1, completed_at = ?1 WHERE status = 'executing'",
        params![now],
    )?;
    tx.commit()?;
    Ok(recovered)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        let row = TaskRow::from_task(task)?;
        self.with_conn(move |conn| {
            let result = conn.execute(
                &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
                params![
                    row.id,
                    row.title,
                    row.description,
                    row.objective,
                    row.requirements,
                    row.constraints,
                    row.acceptance_criteria,
                    row.priority,
                    row.status,
                    row.created_at,
                    row.updated_at,
                    row.completed_at,
                    row.plan,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(StoreError::Duplicate(row.id)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Task, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => task_from_row(row),
                None => Err(StoreError::NotFound(id)),
            }
        })
        .await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut clauses = Vec::new();
            let mut args: Vec<&'static str> = Vec::new();
            if let Some(status) = filter.status {
                clauses.push(format!("status = ?{}", args.len() + 1));
                args.push(status.as_str());
            }
            if let Some(priority) = filter.priority {
                clauses.push(format!("priority = ?{}", args.len() + 1));
                args.push(priority.as_str());
            }
            let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(args.iter()))?;
            let mut tasks = Vec::new();
            while let Some(row) = rows.next()? {
                tasks.push(task_from_row(row)?);
            }
            sort_for_listing(&mut tasks);
            Ok(tasks)
        })
        .await
    }

    async fn compare_and_swap(&self, current: &Task, next: &Task) -> Result<(), StoreError> {
        let row = TaskRow::from_task(next)?;
        let id = current.id.clone();
        let expected_status = current.status.as_str();
        let expected_updated_at = current.updated_at;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET title = ?2, description = ?3, objective = ?4, requirements = ?5, \
                 constraints = ?6, acceptance_criteria = ?7, priority = ?8, status = ?9, \
                 created_at = ?10, updated_at = ?11, completed_at = ?12, plan = ?13 \
                 WHERE id = ?1 AND status = ?14 AND updated_at = ?15",
                params![
                    id,
                    row.title,
                    row.description,
                    row.objective,
                    row.requirements,
                    row.constraints,
                    row.acceptance_criteria,
                    row.priority,
                    row.status,
                    row.created_at,
                    row.updated_at,
                    row.completed_at,
                    row.plan,
                    expected_status,
                    expected_updated_at,
                ],
            )?;
            if changed == 1 {
                return Ok(());
            }

            let actual: Option<String> = conn
                .query_row("SELECT status FROM tasks WHERE id = ?1", params![id], |r| r.get(0))
                .optional()?;
            match actual {
                None => Err(StoreError::NotFound(id)),
                Some(status) => Err(StoreError::StatusMismatch {
                    id,
                    actual: status.parse().map_err(StoreError::Corrupt)?,
                }),
            }
        })
        .await
    }

    async fn append_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let step_results = serde_json::to_string(&record.step_results)?;
        let record = record.clone();
        self.with_conn(move |conn| {
            let exists: Option<i64> = conn
                .query_row("SELECT 1 FROM tasks WHERE id = ?1", params![record.task_id], |r| r.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(record.task_id));
            }
            conn.execute(
                "INSERT INTO task_executions (task_id, execution_time, success, duration_ms, step_results)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.task_id,
                    record.execution_time,
                    record.success,
                    record.duration_ms as i64,
                    step_results,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn executions(&self, task_id: &str) -> Result<Vec<ExecutionRecord>, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT task_id, execution_time, success, duration_ms, step_results
                 FROM task_executions WHERE task_id = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query(params![task_id])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let duration_ms: i64 = row.get(3)?;
                records.push(ExecutionRecord {
                    task_id: row.get(0)?,
                    execution_time: row.get(1)?,
                    success: row.get(2)?,
                    duration_ms: duration_ms.max(0) as u64,
                    step_results: serde_json::from_str(&row.get::<_, String>(4)?)?,
                });
            }
            records.sort_by_key(|r| r.execution_time);
            Ok(records)
        })
        .await
    }
}
