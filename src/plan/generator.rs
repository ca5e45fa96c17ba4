//! 计划生成器
//!
//! 策略顺序：确定性模板优先；无命中时把目标、需求、约束组织成结构化 prompt 交给路由器，
//! 再严格解析模型回复。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::{parse_plan_response, Plan, PlanError, PlanSource, TemplateSet};
use crate::config::PlanningSection;
use crate::llm::{ComplexityClass, GenerationOptions, GenerationRequest, ModelRouter};

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a build planner. Turn the task into an ordered list of executable steps.
Reply with JSON only, in the shape {"steps": [ ... ]}. Each step is an object with a "type" field and a short "description":
- {"type": "shell", "command": "<sh command>"}
- {"type": "file_create", "path": "<relative or absolute path>", "content": "<full file content>"}
- {"type": "api_call", "url": "<http(s) url>", "method": "GET|POST|PUT|PATCH|DELETE", "body": <optional JSON>, "headers": {<optional>}}
No other step types are allowed. Steps run sequentially and stop at the first failure."#;

/// 计划策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanningStrategy {
    /// 模板 → 模型
    #[default]
    Auto,
    TemplateOnly,
    ModelOnly,
}

impl FromStr for PlanningStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "template_only" | "template" => Ok(Self::TemplateOnly),
            "model_only" | "model" => Ok(Self::ModelOnly),
            other => Err(format!("unknown planning strategy: {other}")),
        }
    }
}

impl fmt::Display for PlanningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::TemplateOnly => "template_only",
            Self::ModelOnly => "model_only",
        })
    }
}

/// 一次计划请求
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub objective: String,
    pub requirements: Vec<String>,
    pub constraints: Vec<String>,
    pub context: Option<String>,
    /// 允许模型返回零步骤
    pub allow_empty: bool,
    pub complexity_hint: Option<ComplexityClass>,
}

impl PlanRequest {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            ..Self::default()
        }
    }

    /// 结构化 prompt：目标、需求、约束、上下文分段列出
    pub fn to_prompt(&self) -> String {
        let mut prompt = format!("Objective:\n{}\n", self.objective.trim());
        if !self.requirements.is_empty() {
            prompt.push_str("\nRequirements:\n");
            for r in &self.requirements {
                prompt.push_str(&format!("- {r}\n"));
            }
        }
        if !self.constraints.is_empty() {
            prompt.push_str("\nConstraints:\n");
            for c in &self.constraints {
                prompt.push_str(&format!("- {c}\n"));
            }
        }
        if let Some(ctx) = self.context.as_deref().filter(|c| !c.trim().is_empty()) {
            prompt.push_str(&format!("\nContext:\n{}\n", ctx.trim()));
        }
        prompt
    }
}

pub struct PlanGenerator {
    templates: TemplateSet,
    router: Option<Arc<ModelRouter>>,
    strategy: PlanningStrategy,
    temperature: f32,
    max_tokens: u32,
}

impl PlanGenerator {
    pub fn new(templates: TemplateSet, router: Option<Arc<ModelRouter>>) -> Self {
        Self {
            templates,
            router,
            strategy: PlanningStrategy::Auto,
            temperature: 0.2,
            max_tokens: 1024,
        }
    }

    pub fn from_config(
        section: &PlanningSection,
        router: Option<Arc<ModelRouter>>,
    ) -> Result<Self, String> {
        let templates = TemplateSet::builtin().map_err(|e| e.to_string())?;
        Ok(Self::new(templates, router)
            .with_strategy(section.strategy.parse()?)
            .with_sampling(section.temperature, section.max_tokens))
    }

    pub fn with_strategy(mut self, strategy: PlanningStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn strategy(&self) -> PlanningStrategy {
        self.strategy
    }

    pub async fn generate_plan(&self, request: &PlanRequest) -> Result<Plan, PlanError> {
        if self.strategy != PlanningStrategy::ModelOnly {
            if let Some((name, step)) = self.templates.match_objective(&request.objective) {
                tracing::info!(template = name, step_type = step.kind(), "plan from template");
                return Ok(Plan::new(
                    vec![step],
                    PlanSource::Template {
                        name: name.to_string(),
                    },
                ));
            }
        }

        let router = match (&self.router, self.strategy) {
            (_, PlanningStrategy::TemplateOnly) | (None, _) => {
                return Err(PlanError::NoStrategy(request.objective.clone()))
            }
            (Some(router), _) if router.provider_count() == 0 => {
                return Err(PlanError::NoStrategy(request.objective.clone()))
            }
            (Some(router), _) => router,
        };

        let generation = GenerationRequest::new(request.to_prompt()).with_system(PLANNER_SYSTEM_PROMPT);
        let options = GenerationOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            complexity: request.complexity_hint,
            mode: None,
        };
        let response = router.generate(&generation, &options).await?;
        let steps = parse_plan_response(&response.text, request.allow_empty)?;

        tracing::info!(
            provider = %response.provider_used,
            complexity = %response.complexity,
            steps = steps.len(),
            "plan from model"
        );
        Ok(Plan::new(
            steps,
            PlanSource::Model {
                provider: response.provider_used,
            },
        ))
    }
}
