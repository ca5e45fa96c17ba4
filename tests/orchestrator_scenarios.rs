//! 编排器端到端测试：模板计划、执行成功 / 失败、状态冲突、并发执行互斥、持久化

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use taskforge::config::{AppConfig, StoreBackend};
    use taskforge::core::OrchestratorBuilder;
    use taskforge::llm::{CostTier, MockLlmClient, ModelRouter, Provider, ProviderKind};
    use taskforge::plan::{PlanSource, StepAction};
    use taskforge::store::{SqliteTaskStore, TaskFilter, TaskStore};
    use taskforge::{
        AnalyzeOptions, OrchestratorError, TaskOrchestrator, TaskPriority, TaskSpec, TaskStatus,
    };

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.router.providers.clear();
        config
    }

    fn orchestrator(workdir: &Path) -> TaskOrchestrator {
        OrchestratorBuilder::new(memory_config(), workdir.to_path_buf())
            .build()
            .unwrap()
    }

    /// 路由器只有一个本地 Provider，固定回复 reply
    fn orchestrator_with_model(workdir: &Path, reply: &str) -> TaskOrchestrator {
        let provider = Provider::new("local", ProviderKind::Ollama, "http://localhost", "m", CostTier::Free);
        let router = ModelRouter::default().with_provider(provider, Arc::new(MockLlmClient::reply(reply)));
        OrchestratorBuilder::new(memory_config(), workdir.to_path_buf())
            .with_router(Arc::new(router))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_file_create_objective_end_to_end() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("x.txt");
        let orch = orchestrator(dir.path());

        let task = orch
            .create_task(TaskSpec::new(
                "t",
                format!("create file {} with content hi", target.display()),
            ))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let planned = orch.analyze_task(&task.id).await.unwrap();
        assert_eq!(planned.status, TaskStatus::Planned);
        let plan = planned.plan.as_ref().unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert!(matches!(plan.steps[0].action, StepAction::FileCreate { .. }));
        assert!(matches!(plan.source, PlanSource::Template { .. }));

        let record = orch.execute_task(&task.id).await.unwrap();
        assert!(record.success);
        assert_eq!(record.step_results.len(), 1);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hi");

        let done = orch.get_task(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failing_shell_step_marks_task_failed() {
        let dir = tempfile::TempDir::new().unwrap();
        let orch = orchestrator(dir.path());
        let task = orch.create_task(TaskSpec::new("t", "run `exit 1`")).await.unwrap();
        orch.analyze_task(&task.id).await.unwrap();

        let record = orch.execute_task(&task.id).await.unwrap();
        assert!(!record.success);
        assert!(!record.step_results[0].success);
        assert_eq!(record.step_results[0].step_index, 0);
        assert_eq!(orch.get_task(&task.id).await.unwrap().status, TaskStatus::Failed);

        // failed 任务可以直接重跑，复用原计划
        let again = orch.execute_task(&task.id).await.unwrap();
        assert!(!again.success);
        let history = orch.execution_history(&task.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].execution_time <= history[1].execution_time);
    }

    #[tokio::test]
    async fn test_analyze_planned_task_is_state_conflict() {
        let dir = tempfile::TempDir::new().unwrap();
        let orch = orchestrator(dir.path());
        let task = orch.create_task(TaskSpec::new("t", "run `echo one`")).await.unwrap();
        let planned = orch.analyze_task(&task.id).await.unwrap();

        let err = orch.analyze_task(&task.id).await.unwrap_err();
        assert!(err.is_state_conflict());
        assert!(matches!(
            err,
            OrchestratorError::InvalidState {
                status: TaskStatus::Planned,
                ..
            }
        ));
        let after = orch.get_task(&task.id).await.unwrap();
        assert_eq!(after.plan, planned.plan);
        assert_eq!(after.updated_at, planned.updated_at);
    }

    #[tokio::test]
    async fn test_concurrent_execute_runs_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let orch = orchestrator(dir.path());
        let task = orch.create_task(TaskSpec::new("t", "run `sleep 0.5`")).await.unwrap();
        orch.analyze_task(&task.id).await.unwrap();

        let (a, b) = tokio::join!(orch.execute_task(&task.id), orch.execute_task(&task.id));
        let results = [a, b];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let concurrent = results
            .iter()
            .filter(|r| matches!(r, Err(OrchestratorError::ConcurrentExecution(_))))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(concurrent, 1);
        assert_eq!(orch.execution_history(&task.id).await.unwrap().len(), 1);
        assert_eq!(orch.get_task(&task.id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_abort_after_failing_model_step() {
        let dir = tempfile::TempDir::new().unwrap();
        let reply = r#"```json
{"steps": [
  {"type": "file_create", "path": "first.txt", "content": "1"},
  {"type": "shell", "command": "exit 7"},
  {"type": "file_create", "path": "third.txt", "content": "3"}
]}
```"#;
        let orch = orchestrator_with_model(dir.path(), reply);
        let task = orch
            .create_task(TaskSpec::new("three steps", "prepare the release notes"))
            .await
            .unwrap();
        let planned = orch.analyze_task(&task.id).await.unwrap();
        assert_eq!(
            planned.plan.as_ref().unwrap().source,
            PlanSource::Model {
                provider: "local".into()
            }
        );

        let record = orch.execute_task(&task.id).await.unwrap();
        assert!(!record.success);
        assert_eq!(record.step_results.len(), 2);
        assert!(record.step_results[0].success);
        assert!(!record.step_results[1].success);
        assert!(dir.path().join("first.txt").exists());
        assert!(!dir.path().join("third.txt").exists());
    }

    #[tokio::test]
    async fn test_replan_failed_task_on_request() {
        let dir = tempfile::TempDir::new().unwrap();
        let orch = orchestrator_with_model(dir.path(), r#"[{"type": "shell", "command": "true"}]"#);
        let task = orch.create_task(TaskSpec::new("t", "run `exit 2`")).await.unwrap();
        orch.analyze_task(&task.id).await.unwrap();
        orch.execute_task(&task.id).await.unwrap();

        // 未显式要求时 failed 任务不能重新分析
        assert!(orch.analyze_task(&task.id).await.unwrap_err().is_state_conflict());

        let replanned = orch
            .analyze_task_with(
                &task.id,
                AnalyzeOptions {
                    replan: true,
                    ..AnalyzeOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(replanned.status, TaskStatus::Planned);
        assert!(replanned.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_unparsable_model_plan_keeps_pending() {
        let dir = tempfile::TempDir::new().unwrap();
        let orch = orchestrator_with_model(dir.path(), r#"{"steps": []}"#);
        let task = orch
            .create_task(TaskSpec::new("t", "improve onboarding docs"))
            .await
            .unwrap();
        let err = orch.analyze_task(&task.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Plan(_)));
        assert_eq!(orch.get_task(&task.id).await.unwrap().status, TaskStatus::Pending);

        // 显式允许空计划
        let planned = orch
            .analyze_task_with(
                &task.id,
                AnalyzeOptions {
                    allow_empty_plan: true,
                    ..AnalyzeOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(planned.plan.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_created_task_round_trips_through_sqlite() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn TaskStore> =
            Arc::new(SqliteTaskStore::open(&dir.path().join("tasks.db")).unwrap());
        let orch = OrchestratorBuilder::new(memory_config(), dir.path().to_path_buf())
            .with_store(store)
            .build()
            .unwrap();

        let spec = TaskSpec::new("ship", "run `echo shipped`")
            .with_description("release")
            .with_requirement("green CI")
            .with_constraint("no force push")
            .with_acceptance_criterion("tag exists")
            .with_priority(TaskPriority::High);
        let created = orch.create_task(spec.clone()).await.unwrap();
        let loaded = orch.get_task(&created.id).await.unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.title, spec.title);
        assert_eq!(loaded.requirements, spec.requirements);
        assert_eq!(loaded.acceptance_criteria, spec.acceptance_criteria);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert!(loaded.plan.is_none());

        orch.analyze_task(&created.id).await.unwrap();
        let record = orch.execute_task(&created.id).await.unwrap();
        assert!(record.success);
        assert_eq!(record.step_results[0].output_excerpt.trim(), "shipped");
    }

    #[tokio::test]
    async fn test_listing_is_idempotent_and_filtered() {
        let dir = tempfile::TempDir::new().unwrap();
        let orch = orchestrator(dir.path());
        for (title, priority) in [
            ("a", TaskPriority::Low),
            ("b", TaskPriority::Critical),
            ("c", TaskPriority::Medium),
        ] {
            orch.create_task(TaskSpec::new(title, "run `echo x`").with_priority(priority))
                .await
                .unwrap();
        }

        let first = orch.list_tasks(&TaskFilter::default()).await.unwrap();
        let second = orch.list_tasks(&TaskFilter::default()).await.unwrap();
        assert_eq!(first, second);
        let titles: Vec<_> = first.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "c", "a"]);

        let pending = orch
            .list_tasks(&TaskFilter::default().with_status(TaskStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 3);
        let planned = orch
            .list_tasks(&TaskFilter::default().with_status(TaskStatus::Planned))
            .await
            .unwrap();
        assert!(planned.is_empty());
    }
}
