//! 复杂度分类器（纯函数，无 I/O）
//!
//! 调用方给出的 hint 总是优先；否则按 RULES 表自上而下匹配，首条命中的规则决定结果，都不命中则为 Medium。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 复杂度档位（用于挑选 Provider）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityClass {
    Simple,
    Medium,
    Complex,
}

impl ComplexityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

impl fmt::Display for ComplexityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplexityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "medium" => Ok(Self::Medium),
            "complex" => Ok(Self::Complex),
            other => Err(format!("unknown complexity: {other}")),
        }
    }
}

/// 跨领域关键词词干（命中越多越倾向 Complex）
const MULTI_DOMAIN_STEMS: &[&str] = &[
    "architect",
    "design",
    "distributed",
    "microservice",
    "database",
    "security",
    "scalab",
    "refactor",
    "migrat",
    "integrat",
    "concurren",
    "pipeline",
    "infrastructure",
    "performance",
    "subsystem",
];

const FACT_LEADS: &[&str] = &[
    "what is",
    "what's",
    "who is",
    "who was",
    "when did",
    "when was",
    "where is",
    "define",
    "how many",
    "how much",
];

const GREETINGS: &[&str] = &["hi", "hello", "hey", "thanks", "thank you", "你好"];

const ARITHMETIC_PREFIXES: &[&str] = &["what is", "what's", "calculate", "compute", "evaluate"];

const LONG_REQUEST_WORDS: usize = 120;
const KEYWORD_BACKED_WORDS: usize = 40;
const SHORT_FACT_WORDS: usize = 12;

/// 从请求文本提取的特征
#[derive(Debug, Clone)]
pub struct Features {
    pub words: usize,
    pub keyword_hits: usize,
    pub arithmetic: bool,
    pub fact_lead: bool,
    pub greeting: bool,
}

impl Features {
    pub fn extract(text: &str) -> Self {
        let lower = text.trim().to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let keyword_hits = MULTI_DOMAIN_STEMS
            .iter()
            .filter(|stem| tokens.iter().any(|t| t.starts_with(*stem)))
            .count();
        let stripped = lower.trim_end_matches(['?', '!', '.']).trim();
        Self {
            words: lower.split_whitespace().count(),
            keyword_hits,
            arithmetic: is_arithmetic(&lower),
            fact_lead: FACT_LEADS.iter().any(|lead| lower.starts_with(lead)),
            greeting: GREETINGS.iter().any(|g| stripped == *g),
        }
    }
}

/// 分类规则：名称、谓词、结果
pub struct Rule {
    pub name: &'static str,
    pub matches: fn(&Features) -> bool,
    pub class: ComplexityClass,
}

fn long_request(f: &Features) -> bool {
    f.words > LONG_REQUEST_WORDS
}

fn multi_domain(f: &Features) -> bool {
    f.keyword_hits >= 2
}

fn keyword_with_detail(f: &Features) -> bool {
    f.keyword_hits == 1 && f.words > KEYWORD_BACKED_WORDS
}

fn arithmetic(f: &Features) -> bool {
    f.arithmetic
}

fn single_fact(f: &Features) -> bool {
    f.words > 0 && f.words <= SHORT_FACT_WORDS && (f.fact_lead || f.greeting)
}

/// 按优先级排列的规则表
pub const RULES: &[Rule] = &[
    Rule {
        name: "long_request",
        matches: long_request,
        class: ComplexityClass::Complex,
    },
    Rule {
        name: "multi_domain",
        matches: multi_domain,
        class: ComplexityClass::Complex,
    },
    Rule {
        name: "keyword_with_detail",
        matches: keyword_with_detail,
        class: ComplexityClass::Complex,
    },
    Rule {
        name: "arithmetic",
        matches: arithmetic,
        class: ComplexityClass::Simple,
    },
    Rule {
        name: "single_fact",
        matches: single_fact,
        class: ComplexityClass::Simple,
    },
];

/// 复杂度分类器
pub struct ComplexityClassifier;

impl ComplexityClassifier {
    /// hint 优先；否则首条命中规则决定；默认 Medium
    pub fn classify(text: &str, hint: Option<ComplexityClass>) -> ComplexityClass {
        if let Some(class) = hint {
            return class;
        }
        let features = Features::extract(text);
        RULES
            .iter()
            .find(|rule| (rule.matches)(&features))
            .map(|rule| rule.class)
            .unwrap_or(ComplexityClass::Medium)
    }

    /// 返回命中的规则名（调试 / 日志用）
    pub fn explain(text: &str) -> Option<&'static str> {
        let features = Features::extract(text);
        RULES
            .iter()
            .find(|rule| (rule.matches)(&features))
            .map(|rule| rule.name)
    }
}

/// 形如 "what is 12 * (3 + 4)?" 的算式
fn is_arithmetic(lower: &str) -> bool {
    let mut expr = lower.trim();
    for prefix in ARITHMETIC_PREFIXES {
        if let Some(rest) = expr.strip_prefix(prefix) {
            expr = rest.trim();
            break;
        }
    }
    let expr = expr.trim_end_matches(['?', '=']).trim();
    if expr.is_empty() {
        return false;
    }
    let allowed = |c: char| c.is_ascii_digit() || c.is_whitespace() || "+-*/%^().x".contains(c);
    let has_digit = expr.chars().any(|c| c.is_ascii_digit());
    let has_operator = expr.chars().any(|c| "+-*/%^x".contains(c));
    expr.chars().all(allowed) && has_digit && has_operator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_always_wins() {
        let text = "design a distributed database architecture";
        assert_eq!(
            ComplexityClassifier::classify(text, Some(ComplexityClass::Simple)),
            ComplexityClass::Simple
        );
    }

    #[test]
    fn test_arithmetic_is_simple() {
        assert_eq!(
            ComplexityClassifier::classify("what is 12 * (3 + 4)?", None),
            ComplexityClass::Simple
        );
        assert_eq!(ComplexityClassifier::classify("2+2", None), ComplexityClass::Simple);
        assert_eq!(ComplexityClassifier::explain("2+2"), Some("arithmetic"));
    }

    #[test]
    fn test_single_fact_and_greeting_are_simple() {
        assert_eq!(
            ComplexityClassifier::classify("What is the capital of France?", None),
            ComplexityClass::Simple
        );
        assert_eq!(ComplexityClassifier::classify("hello!", None), ComplexityClass::Simple);
    }

    #[test]
    fn test_multi_domain_keywords_are_complex() {
        let text = "Propose an architecture for migrating the billing database";
        assert_eq!(ComplexityClassifier::classify(text, None), ComplexityClass::Complex);
        assert_eq!(ComplexityClassifier::explain(text), Some("multi_domain"));
    }

    #[test]
    fn test_long_request_is_complex() {
        let text = "word ".repeat(LONG_REQUEST_WORDS + 1);
        assert_eq!(ComplexityClassifier::classify(&text, None), ComplexityClass::Complex);
    }

    #[test]
    fn test_single_keyword_needs_detail() {
        assert_eq!(
            ComplexityClassifier::classify("refactor the login handler", None),
            ComplexityClass::Medium
        );
        let detailed = format!("refactor the login handler {}", "so that it works ".repeat(10));
        assert_eq!(ComplexityClassifier::classify(&detailed, None), ComplexityClass::Complex);
    }

    #[test]
    fn test_default_is_medium() {
        assert_eq!(
            ComplexityClassifier::classify("write a script that renames photos by date", None),
            ComplexityClass::Medium
        );
        assert_eq!(ComplexityClassifier::classify("", None), ComplexityClass::Medium);
        assert_eq!(ComplexityClassifier::classify("   ", None), ComplexityClass::Medium);
    }

    #[test]
    fn test_rule_order_prefers_complex_over_simple() {
        // 以 fact lead 开头，但跨领域关键词先命中
        let text = "what is the best design for a distributed cache";
        assert_eq!(ComplexityClassifier::classify(text, None), ComplexityClass::Complex);
    }
}
