//! 计划层：Plan / Step 类型、确定性模板、模型输出解析、计划生成器
//!
//! Step 为封闭的标签枚举（shell / file_create / api_call），JSON 中以 `type` 字段区分；
//! 新增步骤类型必须在此显式添加，不能靠字符串分支静默忽略。

pub mod generator;
pub mod parser;
pub mod template;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::RouterError;

pub use generator::{PlanGenerator, PlanRequest, PlanningStrategy};
pub use parser::parse_plan_response;
pub use template::{PlanTemplate, TemplateSet};

/// 已知的步骤类型名（`type` 字段取值）
pub const KNOWN_STEP_TYPES: &[&str] = &["shell", "file_create", "api_call"];

/// 一个任务的有序步骤列表；顺序即执行顺序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub source: PlanSource,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(steps: Vec<Step>, source: PlanSource) -> Self {
        Self {
            steps,
            source,
            created_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// 计划来源：模板展开或模型生成
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PlanSource {
    Template { name: String },
    Model { provider: String },
}

/// 单个可执行步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 仅用于展示
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub action: StepAction,
}

impl Step {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            action: StepAction::Shell {
                command: command.into(),
            },
        }
    }

    pub fn file_create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            action: StepAction::FileCreate {
                path: path.into(),
                content: content.into(),
            },
        }
    }

    pub fn api_call(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            action: StepAction::ApiCall {
                url: url.into(),
                method,
                body: None,
                headers: BTreeMap::new(),
            },
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn kind(&self) -> &'static str {
        self.action.kind()
    }
}

/// 步骤载荷，按类型区分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    Shell {
        command: String,
    },
    FileCreate {
        path: String,
        content: String,
    },
    ApiCall {
        url: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Shell { .. } => "shell",
            Self::FileCreate { .. } => "file_create",
            Self::ApiCall { .. } => "api_call",
        }
    }
}

/// api_call 支持的 HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported HTTP method: {other}")),
        }
    }
}

/// 计划生成失败
#[derive(Error, Debug)]
pub enum PlanError {
    /// 模型输出无法拆解为带类型的步骤
    #[error("Unparsable plan: {0}")]
    UnparsablePlan(String),

    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    /// 没有匹配的模板，且未配置可用的模型路由
    #[error("No planning strategy applies to objective: {0}")]
    NoStrategy(String),

    #[error(transparent)]
    Router(#[from] RouterError),
}
