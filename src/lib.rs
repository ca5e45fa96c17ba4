//! taskforge - 开发任务编排引擎 + 多模型路由
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 任务状态机、编排器、构建器、错误类型
//! - **llm**: 复杂度分类、Provider、客户端实现（Ollama / OpenAI 兼容 / Anthropic / Mock）与路由器
//! - **observability**: tracing 初始化
//! - **plan**: 计划与步骤类型、模板、模型输出解析、计划生成器
//! - **store**: TaskStore（内存 / SQLite）
//! - **task**: 任务数据模型与执行记录
//! - **tools**: 步骤执行（shell / file_create / api_call）

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod plan;
pub mod store;
pub mod task;
pub mod tools;

pub use crate::core::{AnalyzeOptions, OrchestratorBuilder, OrchestratorError, TaskOrchestrator};
pub use crate::task::{ExecutionRecord, Task, TaskPriority, TaskSpec, TaskStatus};
