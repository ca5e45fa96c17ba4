//! 任务数据模型：Task、TaskSpec、优先级、执行记录

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use crate::core::state::{InvalidTransition, TaskStatus};
use crate::plan::Plan;

/// 任务 ID（`task_<uuid>`）
pub type TaskId = String;

/// 任务优先级（可比较：Low < Medium < High < Critical）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// 调用方提交的任务描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    pub title: String,
    pub description: String,
    pub objective: String,
    pub requirements: Vec<String>,
    pub constraints: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub priority: TaskPriority,
}

impl TaskSpec {
    pub fn new(title: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            objective: objective.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.push(requirement.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_acceptance_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// 一个待完成的工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub objective: String,
    pub requirements: Vec<String>,
    pub constraints: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 进入 completed / failed 时写入；重新执行时清空
    pub completed_at: Option<DateTime<Utc>>,
    /// 仅在 planned 及之后的状态存在
    pub plan: Option<Plan>,
}

impl Task {
    /// 由 TaskSpec 创建 pending 任务
    pub fn from_spec(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            title: spec.title,
            description: spec.description,
            objective: spec.objective,
            requirements: spec.requirements,
            constraints: spec.constraints,
            acceptance_criteria: spec.acceptance_criteria,
            priority: spec.priority,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            plan: None,
        }
    }

    /// 按迁移表迁移到新状态；非法迁移返回错误且不修改任务
    ///
    /// updated_at 严格递增，存储层以 (status, updated_at) 作为 compare_and_swap 的版本；
    /// 终态写 completed_at，离开终态时清空。
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now().max(self.updated_at + Duration::nanoseconds(1));
        self.status = next;
        self.updated_at = now;
        self.completed_at = if next.is_terminal() { Some(now) } else { None };
        Ok(())
    }
}

/// 一次执行中单个步骤的结果摘要（step_index 从 0 开始，与计划顺序一致）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResultRecord {
    pub step_index: usize,
    pub success: bool,
    pub output_excerpt: String,
    pub error_excerpt: Option<String>,
}

/// 一次计划执行的不可变审计记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_id: TaskId,
    pub execution_time: DateTime<Utc>,
    /// 当且仅当本次所有步骤成功
    pub success: bool,
    pub duration_ms: u64,
    pub step_results: Vec<StepResultRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec_starts_pending_without_plan() {
        let spec = TaskSpec::new("t", "do it")
            .with_requirement("r1")
            .with_constraint("c1")
            .with_priority(TaskPriority::High);
        let task = Task::from_spec(spec);
        assert!(task.id.starts_with("task_"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.plan.is_none());
        assert!(task.completed_at.is_none());
        assert_eq!(task.requirements, vec!["r1"]);
        assert_eq!(task.priority, TaskPriority::High);
    }

    #[test]
    fn test_transition_sets_and_clears_completed_at() {
        let mut task = Task::from_spec(TaskSpec::new("t", "o"));
        task.transition(TaskStatus::Planned).unwrap();
        task.transition(TaskStatus::Executing).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        assert!(task.completed_at.is_some());
        task.transition(TaskStatus::Executing).unwrap();
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_invalid_transition_leaves_task_unchanged() {
        let mut task = Task::from_spec(TaskSpec::new("t", "o"));
        let before = task.clone();
        let err = task.transition(TaskStatus::Failed).unwrap_err();
        assert_eq!(
            err,
            InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Failed
            }
        );
        assert_eq!(task, before);
        assert!(task.transition(TaskStatus::Executing).is_err());
    }

    #[test]
    fn test_updated_at_strictly_increases() {
        let mut task = Task::from_spec(TaskSpec::new("t", "o"));
        // 时钟回拨也不能让版本倒退
        task.updated_at = Utc::now() + Duration::hours(1);
        let before = task.updated_at;
        task.transition(TaskStatus::Planned).unwrap();
        assert!(task.updated_at > before);
        let planned_at = task.updated_at;
        task.transition(TaskStatus::Executing).unwrap();
        assert!(task.updated_at > planned_at);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::Medium > TaskPriority::Low);
        assert_eq!("HIGH".parse::<TaskPriority>().unwrap(), TaskPriority::High);
    }
}
