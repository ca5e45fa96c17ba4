//! 步骤执行器
//!
//! execute_step 按步骤类型分派到 shell / 文件 / HTTP 执行器；run_plan 顺序执行整个计划，
//! 默认遇到首个失败即停止。每个步骤输出一条结构化审计日志（JSON）。

use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::{ApiCaller, ShellRunner, StepResult, WorkspaceFs};
use crate::config::ExecutorSection;
use crate::plan::{Plan, Step, StepAction};

/// 失败策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// 第 k 个步骤失败时只产生 k 个结果
    #[default]
    AbortOnFirstFailure,
    /// 每个步骤都执行并记录
    ContinueOnFailure,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort_on_first_failure" | "abort" => Ok(Self::AbortOnFirstFailure),
            "continue_on_failure" | "continue" => Ok(Self::ContinueOnFailure),
            other => Err(format!("unknown failure policy: {other}")),
        }
    }
}

/// 一次计划执行的结果
#[derive(Debug, Clone)]
pub struct PlanRun {
    /// 与计划步骤一一对应（中止时更短）
    pub results: Vec<StepResult>,
    pub success: bool,
    pub duration_ms: u64,
}

pub struct StepExecutor {
    shell: ShellRunner,
    fs: WorkspaceFs,
    http: ApiCaller,
    policy: FailurePolicy,
}

impl StepExecutor {
    pub fn new(shell: ShellRunner, fs: WorkspaceFs, http: ApiCaller) -> Self {
        Self {
            shell,
            fs,
            http,
            policy: FailurePolicy::default(),
        }
    }

    pub fn from_config(section: &ExecutorSection, workdir: impl Into<PathBuf>) -> Result<Self, String> {
        let workdir = workdir.into();
        let shell = ShellRunner::new(
            workdir.clone(),
            Duration::from_secs(section.shell_timeout_secs.max(1)),
            section.output_cap_bytes,
        )
        .with_denied_patterns(section.denied_patterns.clone());
        let http = ApiCaller::new(
            Duration::from_secs(section.api_timeout_secs.max(1)),
            section.output_cap_bytes,
        );
        Ok(Self::new(shell, WorkspaceFs::new(workdir), http)
            .with_policy(section.failure_policy.parse()?))
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub async fn execute_step(&self, step: &Step) -> StepResult {
        let start = Instant::now();
        let result = match &step.action {
            StepAction::Shell { command } => self.shell.run(command).await,
            StepAction::FileCreate { path, content } => self.fs.create_file(path, content).await,
            StepAction::ApiCall {
                url,
                method,
                body,
                headers,
            } => self.http.call(url, *method, body.as_ref(), headers).await,
        };

        let audit = serde_json::json!({
            "event": "step_audit",
            "type": step.kind(),
            "ok": result.success,
            "failure": result.failure.as_ref().map(|f| f.to_string()),
            "duration_ms": start.elapsed().as_millis() as u64,
            "description": step.description,
        });
        tracing::info!(audit = %audit, "step");
        result
    }

    /// 顺序执行计划
    pub async fn run_plan(&self, plan: &Plan) -> PlanRun {
        let start = Instant::now();
        let mut results = Vec::with_capacity(plan.steps.len());
        for (index, step) in plan.steps.iter().enumerate() {
            let result = self.execute_step(step).await;
            let failed = !result.success;
            results.push(result);
            if failed && self.policy == FailurePolicy::AbortOnFirstFailure {
                tracing::warn!(step_index = index, "step failed, aborting plan");
                break;
            }
        }
        let success = results.len() == plan.steps.len() && results.iter().all(|r| r.success);
        PlanRun {
            results,
            success,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::plan::PlanSource;

    fn executor(dir: &std::path::Path) -> StepExecutor {
        StepExecutor::from_config(&ExecutorSection::default(), dir).unwrap()
    }

    fn plan(steps: Vec<Step>) -> Plan {
        Plan::new(
            steps,
            PlanSource::Template {
                name: "test".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_abort_after_failing_step() {
        let dir = tempfile::TempDir::new().unwrap();
        let run = executor(dir.path())
            .run_plan(&plan(vec![
                Step::shell("echo one"),
                Step::shell("exit 1"),
                Step::file_create("never.txt", "x"),
            ]))
            .await;
        assert!(!run.success);
        assert_eq!(run.results.len(), 2);
        assert!(run.results[0].success);
        assert!(!run.results[1].success);
        assert!(!dir.path().join("never.txt").exists());
    }

    #[tokio::test]
    async fn test_continue_on_failure_runs_every_step() {
        let dir = tempfile::TempDir::new().unwrap();
        let run = executor(dir.path())
            .with_policy(FailurePolicy::ContinueOnFailure)
            .run_plan(&plan(vec![
                Step::shell("exit 1"),
                Step::file_create("after.txt", "still here"),
            ]))
            .await;
        assert!(!run.success);
        assert_eq!(run.results.len(), 2);
        assert!(run.results[1].success);
        assert!(dir.path().join("after.txt").exists());
    }

    #[tokio::test]
    async fn test_file_then_shell_share_workdir() {
        let dir = tempfile::TempDir::new().unwrap();
        let run = executor(dir.path())
            .run_plan(&plan(vec![
                Step::file_create("greeting.txt", "hi there"),
                Step::shell("cat greeting.txt"),
            ]))
            .await;
        assert!(run.success);
        assert_eq!(run.results[1].output.trim(), "hi there");
    }

    #[tokio::test]
    async fn test_default_denylist_blocks() {
        let dir = tempfile::TempDir::new().unwrap();
        let r = executor(dir.path()).execute_step(&Step::shell("sudo RM -RF / --no-preserve-root")).await;
        assert!(!r.success);
        assert!(matches!(r.failure, Some(crate::tools::StepFailure::Blocked(_))));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "continue_on_failure".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::ContinueOnFailure
        );
        assert!("retry".parse::<FailurePolicy>().is_err());
    }
}
