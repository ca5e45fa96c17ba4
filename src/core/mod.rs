//! 核心编排层：任务状态机、错误类型、编排器与构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use builder::{create_orchestrator_builder, OrchestratorBuilder};
pub use error::OrchestratorError;
pub use orchestrator::{AnalyzeOptions, TaskOrchestrator};
pub use state::{InvalidTransition, TaskStatus};
