//! 任务编排器
//!
//! 对外的唯一入口：创建、分析（生成计划）、执行、查询任务，以及直接调用模型路由。
//! 状态迁移全部经由 Task::transition 校验，再以读到的版本做 compare_and_swap；
//! 同一任务同一时刻最多只有一次执行，执行被中途丢弃时由 ExecutionGuard 在后台落为 failed。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::error::OrchestratorError;
use crate::llm::{
    ComplexityClass, GenerationOptions, GenerationRequest, ModelRouter, NormalizedResponse,
};
use crate::plan::{PlanGenerator, PlanRequest};
use crate::store::{StoreError, TaskFilter, TaskStore};
use crate::task::{
    ExecutionRecord, InvalidTransition, StepResultRecord, Task, TaskSpec, TaskStatus,
};
use crate::tools::StepExecutor;

/// analyze_task_with 的选项
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// 允许对 failed 任务重新生成计划
    pub replan: bool,
    /// 允许模型返回零步骤计划
    pub allow_empty_plan: bool,
    pub complexity_hint: Option<ComplexityClass>,
    /// 附加给模型的上下文
    pub context: Option<String>,
}

/// 正在分析的任务 id；guard 离开作用域时移除
struct AnalysisGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> AnalysisGuard<'a> {
    fn acquire(active: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let mut set = active.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            active,
            id: id.to_string(),
        })
    }
}

impl Drop for AnalysisGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.active.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.id);
    }
}

/// 执行期间持有；未 disarm 就被丢弃（future 被取消、最终写入失败）时，
/// 在后台补写失败记录并把任务从 executing 落为 failed
struct ExecutionGuard {
    store: Arc<dyn TaskStore>,
    running: Option<Task>,
    started: DateTime<Utc>,
    record_appended: bool,
}

impl ExecutionGuard {
    fn arm(store: Arc<dyn TaskStore>, running: Task, started: DateTime<Utc>) -> Self {
        Self {
            store,
            running: Some(running),
            started,
            record_appended: false,
        }
    }

    fn disarm(&mut self) {
        self.running = None;
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                task_id = %running.id,
                "execution abandoned without a runtime, task left executing"
            );
            return;
        };
        let store = self.store.clone();
        let append_record = !self.record_appended;
        let started = self.started;
        handle.spawn(abandon_execution(store, running, started, append_record));
    }
}

async fn abandon_execution(
    store: Arc<dyn TaskStore>,
    running: Task,
    started: DateTime<Utc>,
    append_record: bool,
) {
    if append_record {
        let record = ExecutionRecord {
            task_id: running.id.clone(),
            execution_time: started,
            success: false,
            duration_ms: (Utc::now() - started).num_milliseconds().max(0) as u64,
            step_results: Vec::new(),
        };
        if let Err(e) = store.append_execution(&record).await {
            tracing::warn!(task_id = %running.id, error = %e, "failed to record abandoned execution");
        }
    }

    let mut failed = running.clone();
    if let Err(e) = failed.transition(TaskStatus::Failed) {
        tracing::error!(task_id = %running.id, error = %e, "cannot fail abandoned execution");
        return;
    }
    match store.compare_and_swap(&running, &failed).await {
        Ok(()) => tracing::warn!(task_id = %running.id, "abandoned execution marked failed"),
        Err(e) => {
            tracing::error!(task_id = %running.id, error = %e, "failed to release abandoned execution")
        }
    }
}

pub struct TaskOrchestrator {
    store: Arc<dyn TaskStore>,
    planner: PlanGenerator,
    executor: StepExecutor,
    router: Option<Arc<ModelRouter>>,
    analyzing: Mutex<HashSet<String>>,
}

impl TaskOrchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        planner: PlanGenerator,
        executor: StepExecutor,
        router: Option<Arc<ModelRouter>>,
    ) -> Self {
        Self {
            store,
            planner,
            executor,
            router,
            analyzing: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn router(&self) -> Option<&Arc<ModelRouter>> {
        self.router.as_ref()
    }

    /// 创建 pending 任务；title / objective 不能为空
    pub async fn create_task(&self, spec: TaskSpec) -> Result<Task, OrchestratorError> {
        if spec.title.trim().is_empty() {
            return Err(OrchestratorError::Validation("title must not be empty".into()));
        }
        if spec.objective.trim().is_empty() {
            return Err(OrchestratorError::Validation("objective must not be empty".into()));
        }
        let task = Task::from_spec(spec);
        self.store.insert(&task).await?;
        tracing::info!(task_id = %task.id, priority = %task.priority, "task created");
        Ok(task)
    }

    pub async fn analyze_task(&self, id: &str) -> Result<Task, OrchestratorError> {
        self.analyze_task_with(id, AnalyzeOptions::default()).await
    }

    /// 生成计划并进入 planned；计划失败时任务保持原状态
    pub async fn analyze_task_with(
        &self,
        id: &str,
        options: AnalyzeOptions,
    ) -> Result<Task, OrchestratorError> {
        let task = self.store.get(id).await?;
        // failed → planned 只在显式 replan 时允许
        let may_analyze = task.status.can_transition_to(TaskStatus::Planned)
            && (options.replan || task.status == TaskStatus::Pending);
        if !may_analyze {
            return Err(OrchestratorError::InvalidState {
                id: task.id,
                status: task.status,
                action: "analyze",
            });
        }

        let _guard = AnalysisGuard::acquire(&self.analyzing, id)
            .ok_or_else(|| OrchestratorError::AnalysisInProgress(id.to_string()))?;

        let request = PlanRequest {
            objective: task.objective.clone(),
            requirements: task.requirements.clone(),
            constraints: task.constraints.clone(),
            context: merge_context(&task.description, options.context.as_deref()),
            allow_empty: options.allow_empty_plan,
            complexity_hint: options.complexity_hint,
        };
        let plan = match self.planner.generate_plan(&request).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "planning failed, task unchanged");
                return Err(e.into());
            }
        };

        let mut next = task.clone();
        next.plan = Some(plan);
        next.transition(TaskStatus::Planned)
            .map_err(|e| invalid_transition(id, e, "analyze"))?;
        self.store
            .compare_and_swap(&task, &next)
            .await
            .map_err(|e| state_error(e, "analyze"))?;

        tracing::info!(
            task_id = %id,
            steps = next.plan.as_ref().map_or(0, |p| p.steps.len()),
            "task planned"
        );
        Ok(next)
    }

    /// 执行计划；每次调用恰好追加一条执行记录
    pub async fn execute_task(&self, id: &str) -> Result<ExecutionRecord, OrchestratorError> {
        let task = self.store.get(id).await?;
        if task.status == TaskStatus::Executing {
            return Err(OrchestratorError::ConcurrentExecution(task.id));
        }
        if !task.status.can_transition_to(TaskStatus::Executing) {
            return Err(OrchestratorError::InvalidState {
                id: task.id,
                status: task.status,
                action: "execute",
            });
        }
        let Some(plan) = task.plan.clone() else {
            return Err(OrchestratorError::InvalidState {
                id: task.id,
                status: task.status,
                action: "execute",
            });
        };

        let mut running = task.clone();
        running
            .transition(TaskStatus::Executing)
            .map_err(|e| invalid_transition(id, e, "execute"))?;
        self.store
            .compare_and_swap(&task, &running)
            .await
            .map_err(|e| state_error(e, "execute"))?;
        tracing::info!(task_id = %id, steps = plan.steps.len(), "task executing");

        let execution_time = Utc::now();
        let mut guard = ExecutionGuard::arm(self.store.clone(), running.clone(), execution_time);
        let run = self.executor.run_plan(&plan).await;
        let record = ExecutionRecord {
            task_id: id.to_string(),
            execution_time,
            success: run.success,
            duration_ms: run.duration_ms,
            step_results: run
                .results
                .into_iter()
                .enumerate()
                .map(|(step_index, r)| StepResultRecord {
                    step_index,
                    success: r.success,
                    output_excerpt: r.output,
                    error_excerpt: r.error,
                })
                .collect(),
        };

        let appended = self.store.append_execution(&record).await;
        guard.record_appended = appended.is_ok();
        let final_status = if record.success && appended.is_ok() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let mut finished = running.clone();
        finished
            .transition(final_status)
            .map_err(|e| invalid_transition(id, e, "execute"))?;
        // 写入失败时 guard 仍处于 armed，由后台重试落为 failed
        self.store.compare_and_swap(&running, &finished).await?;
        guard.disarm();
        appended?;

        tracing::info!(
            task_id = %id,
            status = %final_status,
            duration_ms = record.duration_ms,
            "task finished"
        );
        Ok(record)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, OrchestratorError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, OrchestratorError> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn execution_history(
        &self,
        id: &str,
    ) -> Result<Vec<ExecutionRecord>, OrchestratorError> {
        self.store.get(id).await?;
        Ok(self.store.executions(id).await?)
    }

    /// 直接调用模型路由
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> Result<NormalizedResponse, OrchestratorError> {
        let router = self
            .router
            .as_ref()
            .filter(|r| r.provider_count() > 0)
            .ok_or(OrchestratorError::RouterNotConfigured)?;
        Ok(router.generate(request, options).await?)
    }
}

fn merge_context(description: &str, extra: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [Some(description), extra]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn invalid_transition(id: &str, e: InvalidTransition, action: &'static str) -> OrchestratorError {
    OrchestratorError::InvalidState {
        id: id.to_string(),
        status: e.from,
        action,
    }
}

/// CAS 失败转为状态冲突
fn state_error(e: StoreError, action: &'static str) -> OrchestratorError {
    match e {
        StoreError::StatusMismatch {
            id,
            actual: TaskStatus::Executing,
        } => OrchestratorError::ConcurrentExecution(id),
        StoreError::StatusMismatch { id, actual } => OrchestratorError::InvalidState {
            id,
            status: actual,
            action,
        },
        other => other.into(),
    }
}
