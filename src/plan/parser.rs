//! 模型输出 → 步骤列表（严格解析）
//!
//! JSON 来源依次为：首个标注 json 的代码块、首个无语言标注的代码块、
//! 文本中第一个能完整解析为对象 / 数组的 `{` 或 `[` 位置。接受 `{"steps": [...]}` 或裸数组。
//! 任何无法识别的内容都是错误，绝不静默返回空计划。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::{PlanError, Step, KNOWN_STEP_TYPES};

static FENCE: OnceLock<Option<Regex>> = OnceLock::new();

fn fence() -> Option<&'static Regex> {
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

/// 解析模型回复；allow_empty 为 false 时零步骤视为错误
pub fn parse_plan_response(text: &str, allow_empty: bool) -> Result<Vec<Step>, PlanError> {
    let items = match extract_json(text)? {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("steps") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(PlanError::UnparsablePlan("`steps` is not an array".into())),
            None => return Err(PlanError::UnparsablePlan("missing `steps` field".into())),
        },
        _ => return Err(PlanError::UnparsablePlan("expected object or array".into())),
    };

    let steps = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| parse_step(i, item))
        .collect::<Result<Vec<_>, _>>()?;

    if steps.is_empty() && !allow_empty {
        return Err(PlanError::UnparsablePlan("plan contains no steps".into()));
    }
    Ok(steps)
}

fn parse_step(index: usize, item: Value) -> Result<Step, PlanError> {
    let kind = match item.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => {
            return Err(PlanError::UnparsablePlan(format!(
                "step {index}: `type` is not a string"
            )))
        }
        None => {
            return Err(PlanError::UnparsablePlan(format!(
                "step {index}: missing `type`"
            )))
        }
    };
    if !KNOWN_STEP_TYPES.contains(&kind.as_str()) {
        return Err(PlanError::UnknownStepType(kind));
    }
    serde_json::from_value(item)
        .map_err(|e| PlanError::UnparsablePlan(format!("step {index} ({kind}): {e}")))
}

/// 取出回复中的 JSON 值
fn extract_json(text: &str) -> Result<Value, PlanError> {
    if let Some(body) = fenced_body(text) {
        return serde_json::from_str(body)
            .map_err(|e| PlanError::UnparsablePlan(format!("invalid JSON: {e}")));
    }
    scan_json(text)
        .ok_or_else(|| PlanError::UnparsablePlan("no JSON object or array in reply".into()))
}

/// json 代码块优先；其次是无语言标注的代码块；bash 等其他语言的代码块跳过
fn fenced_body(text: &str) -> Option<&str> {
    let mut untagged = None;
    for caps in fence()?.captures_iter(text) {
        let (Some(tag), Some(body)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let body = body.as_str().trim();
        if body.is_empty() {
            continue;
        }
        if tag.as_str().eq_ignore_ascii_case("json") {
            return Some(body);
        }
        if tag.as_str().is_empty() && untagged.is_none() {
            untagged = Some(body);
        }
    }
    untagged
}

/// 从左到右尝试每个 `{` / `[`，返回第一个完整的对象或数组
fn scan_json(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| matches!(c, '{' | '['))
        .find_map(|(i, _)| {
            let mut stream = serde_json::Deserializer::from_str(&text[i..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value @ (Value::Object(_) | Value::Array(_)))) => Some(value),
                _ => None,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepAction;

    #[test]
    fn test_parses_fenced_steps_object() {
        let reply = r#"Here is the plan:
```json
{"steps": [
  {"type": "shell", "command": "mkdir -p out", "description": "prepare"},
  {"type": "file_create", "path": "out/a.txt", "content": "A"}
]}
```
Good luck!"#;
        let steps = parse_plan_response(reply, false).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].description, "prepare");
        assert_eq!(
            steps[1].action,
            StepAction::FileCreate {
                path: "out/a.txt".into(),
                content: "A".into()
            }
        );
    }

    #[test]
    fn test_parses_bare_array_with_prose() {
        let reply = r#"Sure. [{"type": "api_call", "url": "https://example.com", "method": "POST", "body": {"a": 1}}] done"#;
        let steps = parse_plan_response(reply, false).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind(), "api_call");
    }

    #[test]
    fn test_json_fence_preferred_over_earlier_shell_fence() {
        let reply = r#"First check the tree:
```bash
ls -la
```
Then apply:
```json
[{"type": "shell", "command": "make build"}]
```"#;
        let steps = parse_plan_response(reply, false).unwrap();
        assert_eq!(
            steps[0].action,
            StepAction::Shell {
                command: "make build".into()
            }
        );
    }

    #[test]
    fn test_untagged_fence_is_used() {
        let reply = "```\n{\"steps\": [{\"type\": \"shell\", \"command\": \"true\"}]}\n```";
        assert_eq!(parse_plan_response(reply, false).unwrap().len(), 1);
    }

    #[test]
    fn test_bracketed_prose_before_json_is_skipped() {
        let reply = r#"[Plan] {"steps": [{"type": "file_create", "path": "a.txt", "content": "[x]"}]} [end]"#;
        let steps = parse_plan_response(reply, false).unwrap();
        assert_eq!(
            steps[0].action,
            StepAction::FileCreate {
                path: "a.txt".into(),
                content: "[x]".into()
            }
        );
    }

    #[test]
    fn test_malformed_json_fence_is_an_error() {
        let reply = "```json\n{\"steps\": [\n```";
        match parse_plan_response(reply, false) {
            Err(PlanError::UnparsablePlan(msg)) => assert!(msg.contains("invalid JSON")),
            other => panic!("expected UnparsablePlan, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_step_type_rejected() {
        let reply = r#"{"steps": [{"type": "deploy", "target": "prod"}]}"#;
        match parse_plan_response(reply, false) {
            Err(PlanError::UnknownStepType(kind)) => assert_eq!(kind, "deploy"),
            other => panic!("expected UnknownStepType, got {other:?}"),
        }
    }

    #[test]
    fn test_legacy_task_type_field_is_not_accepted() {
        let reply = r#"[{"task_type": "shell", "command": "ls"}]"#;
        assert!(matches!(
            parse_plan_response(reply, false),
            Err(PlanError::UnparsablePlan(_))
        ));
    }

    #[test]
    fn test_missing_fields_and_bad_types_rejected() {
        for reply in [
            r#"[{"type": "shell"}]"#,
            r#"[{"type": "file_create", "path": "a"}]"#,
            r#"[{"type": "shell", "command": 42}]"#,
            r#"[{"type": "api_call", "url": "http://x", "method": "FETCH"}]"#,
            r#"{"plan": []}"#,
            r#"{"steps": "none"}"#,
            "I cannot help with that.",
            "{not json}",
        ] {
            assert!(
                matches!(parse_plan_response(reply, false), Err(PlanError::UnparsablePlan(_))),
                "should reject: {reply}"
            );
        }
    }

    #[test]
    fn test_empty_plan_requires_opt_in() {
        assert!(matches!(
            parse_plan_response(r#"{"steps": []}"#, false),
            Err(PlanError::UnparsablePlan(_))
        ));
        assert!(parse_plan_response(r#"{"steps": []}"#, true).unwrap().is_empty());
    }
}
