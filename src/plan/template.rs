//! 确定性计划模板
//!
//! 按顺序用正则匹配 objective，首个命中的模板直接展开为单步计划，不经过模型。
//! shell 模板只认显式标记（反引号包裹或 `command:` 前缀），普通英文句子一律交给模型。

use regex::{Captures, Regex};

use super::{HttpMethod, Step};

/// 一个模板：名称 + 正则 + 由捕获组构造步骤
pub struct PlanTemplate {
    pub name: &'static str,
    pattern: Regex,
    build: fn(&Captures) -> Option<Step>,
}

impl PlanTemplate {
    pub fn new(
        name: &'static str,
        pattern: &str,
        build: fn(&Captures) -> Option<Step>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            pattern: Regex::new(pattern)?,
            build,
        })
    }

    pub fn apply(&self, objective: &str) -> Option<Step> {
        let caps = self.pattern.captures(objective)?;
        (self.build)(&caps)
    }
}

/// 有序模板集合
pub struct TemplateSet {
    templates: Vec<PlanTemplate>,
}

const FILE_CREATE: &str = r"(?is)^\s*(?:create|write)\s+(?:a\s+)?(?:new\s+)?file\s+(?:named\s+|called\s+|at\s+)?(?P<path>\S+)\s+with\s+(?:the\s+)?content\s+(?P<content>.+?)\s*$";
const SHELL_BACKTICK: &str = r"(?is)^\s*(?:run|execute)\s+(?:the\s+)?(?:shell\s+)?(?:command\s*:?\s*)?`(?P<command>[^`]+)`";
const SHELL_MARKER: &str = r"(?is)^\s*(?:run|execute)\s+(?:the\s+)?(?:shell\s+)?command\s*:\s*(?P<command>.+?)\s*$";
const API_CALL: &str = r"(?i)^\s*(?:call|fetch|request)\s+(?:(?P<method>GET|POST|PUT|PATCH|DELETE)\s+)?(?P<url>https?://[^\s'`]+)";

impl TemplateSet {
    /// 内置模板：file_create → shell（反引号）→ shell（`command:`）→ api_call
    pub fn builtin() -> Result<Self, regex::Error> {
        Ok(Self {
            templates: vec![
                PlanTemplate::new("file_create", FILE_CREATE, build_file_create)?,
                PlanTemplate::new("shell_backtick", SHELL_BACKTICK, build_shell)?,
                PlanTemplate::new("shell_marker", SHELL_MARKER, build_shell)?,
                PlanTemplate::new("api_call", API_CALL, build_api_call)?,
            ],
        })
    }

    pub fn empty() -> Self {
        Self {
            templates: Vec::new(),
        }
    }

    pub fn push(&mut self, template: PlanTemplate) {
        self.templates.push(template);
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// 返回 (模板名, 步骤)；无命中时 None
    pub fn match_objective(&self, objective: &str) -> Option<(&'static str, Step)> {
        self.templates
            .iter()
            .find_map(|t| t.apply(objective).map(|step| (t.name, step)))
    }
}

/// 去掉成对的首尾引号
fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    for quote in ['"', '\'', '`'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn build_file_create(caps: &Captures) -> Option<Step> {
    let path = strip_quotes(caps.name("path")?.as_str());
    let content = strip_quotes(caps.name("content")?.as_str());
    if path.is_empty() {
        return None;
    }
    Some(Step::file_create(path, content).with_description(format!("create file {path}")))
}

fn build_shell(caps: &Captures) -> Option<Step> {
    let command = strip_quotes(caps.name("command")?.as_str()).trim();
    if command.is_empty() {
        return None;
    }
    Some(Step::shell(command).with_description(format!("run `{command}`")))
}

fn build_api_call(caps: &Captures) -> Option<Step> {
    let url = caps.name("url")?.as_str().trim_end_matches(['.', ',', ';', '"']);
    let method = caps
        .name("method")
        .and_then(|m| m.as_str().parse::<HttpMethod>().ok())
        .unwrap_or_default();
    Some(Step::api_call(method, url).with_description(format!("{method} {url}")))
}
