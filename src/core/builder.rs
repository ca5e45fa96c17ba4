//! 编排器构建器：统一的初始化逻辑（CLI 与测试共用）
//!
//! 配置 → 存储 / 路由器 / 计划生成器 / 步骤执行器 → TaskOrchestrator。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::core::TaskOrchestrator;
use crate::llm::ModelRouter;
use crate::plan::PlanGenerator;
use crate::store::{open_store, TaskStore};
use crate::tools::StepExecutor;

pub struct OrchestratorBuilder {
    config: AppConfig,
    workspace: PathBuf,
    store: Option<Arc<dyn TaskStore>>,
    router: Option<Arc<ModelRouter>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self {
            config,
            workspace,
            store: None,
            router: None,
        }
    }

    /// 注入存储（默认按 [store] 打开）
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 注入路由器（默认按 [router] 构建）
    pub fn with_router(mut self, router: Arc<ModelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// 没有配置任何 Provider 时返回 None（只能走模板）
    pub fn build_router(&self) -> anyhow::Result<Option<Arc<ModelRouter>>> {
        if let Some(router) = &self.router {
            return Ok(Some(router.clone()));
        }
        if self.config.router.providers.is_empty() {
            return Ok(None);
        }
        let router = ModelRouter::from_config(&self.config.router)
            .map_err(anyhow::Error::msg)
            .context("invalid [router] configuration")?;
        Ok(Some(Arc::new(router)))
    }

    pub fn build(self) -> anyhow::Result<TaskOrchestrator> {
        let router = self.build_router()?;
        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config.store).context("failed to open task store")?,
        };
        let planner = PlanGenerator::from_config(&self.config.planning, router.clone())
            .map_err(anyhow::Error::msg)
            .context("invalid [planning] configuration")?;
        let executor = StepExecutor::from_config(&self.config.executor, self.workspace.clone())
            .map_err(anyhow::Error::msg)
            .context("invalid [executor] configuration")?;

        tracing::info!(
            workspace = %self.workspace.display(),
            backend = ?self.config.store.backend,
            providers = router.as_ref().map_or(0, |r| r.provider_count()),
            strategy = %planner.strategy(),
            "orchestrator ready"
        );
        Ok(TaskOrchestrator::new(store, planner, executor, router))
    }
}

/// 便捷函数：加载配置并确定工作目录
pub fn create_orchestrator_builder(config_path: Option<PathBuf>) -> anyhow::Result<OrchestratorBuilder> {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let workspace = match config.app.workspace_root.clone() {
        Some(path) => path,
        None => std::env::current_dir()
            .context("cannot determine current directory")?
            .join("workspace"),
    };
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("cannot create workspace {}", workspace.display()))?;
    let workspace = workspace.canonicalize().unwrap_or(workspace);

    Ok(OrchestratorBuilder::new(config, workspace))
}
