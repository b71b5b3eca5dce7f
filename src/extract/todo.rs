//! Todo extraction from transcripts.
//!
//! The language model proposes a JSON array of tasks. Its output is parsed
//! into a [`TodoProposal`]: either a validated task forest or an explicit
//! `Malformed` marker. Parse problems never surface as errors; provider
//! failures do, so the caller can retry them.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::priority::{explicit_priority, infer_priority};
use super::strip_code_fences;
use crate::adapters::LanguageModel;
use crate::core::PipelineResult;
use crate::domain::ExtractedTask;

const SYSTEM_PROMPT: &str = "You extract actionable tasks from personal notes and reply with JSON only.";

const PROMPT_TEMPLATE: &str = r#"Analyze the following text and extract any tasks, action items, or things the user needs to do later or be reminded of. Consider various formats and implicit tasks. Format the output as a JSON array of objects, where each object has the following properties:
- text: The task description
- priority: A number from 1 to 10, where 1 is high priority and 10 is low priority
- subtasks: An array of subtasks, each following the same format as the main tasks

Look for:
1. Explicit todo items (e.g., "TODO:", "Task:", "Action item:")
2. Implicit tasks or future actions (e.g., "I need to", "Don't forget to", "Remember to")
3. Deadlines or time-sensitive items (e.g., "by Friday", "next week")
4. Questions or uncertainties that require follow-up
5. Commitments or promises made in the text

Text: {text}

JSON Output:"#;

const LABELS: [&str; 3] = ["todo:", "task:", "action item:"];

/// Parsed model output
#[derive(Debug, Clone, PartialEq)]
pub enum TodoProposal {
    Parsed(Vec<ExtractedTask>),

    /// The output was not a JSON array; no tasks were taken from it
    Malformed { reason: String },
}

impl TodoProposal {
    pub fn tasks(&self) -> &[ExtractedTask] {
        match self {
            Self::Parsed(tasks) => tasks,
            Self::Malformed { .. } => &[],
        }
    }

    pub fn into_tasks(self) -> Vec<ExtractedTask> {
        match self {
            Self::Parsed(tasks) => tasks,
            Self::Malformed { .. } => Vec::new(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

/// Remove leading `TODO:` / `Task:` / `Action item:` labels
pub fn strip_labels(text: &str) -> String {
    let mut rest = text.trim();
    loop {
        let Some(label) = LABELS.iter().find(|l| {
            rest.get(..l.len())
                .map(|head| head.eq_ignore_ascii_case(l))
                .unwrap_or(false)
        }) else {
            break;
        };
        rest = rest[label.len()..].trim_start();
    }
    rest.trim().to_string()
}

/// Parse raw model output into a proposal
pub fn parse_proposal(raw: &str) -> TodoProposal {
    let cleaned = strip_code_fences(raw);
    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(e) => {
            return TodoProposal::Malformed {
                reason: format!("invalid JSON: {e}"),
            }
        }
    };

    match value {
        Value::Array(items) => TodoProposal::Parsed(parse_items(&items)),
        other => TodoProposal::Malformed {
            reason: format!("expected a JSON array, got {}", json_type(&other)),
        },
    }
}

fn parse_items(items: &[Value]) -> Vec<ExtractedTask> {
    items.iter().filter_map(parse_item).collect()
}

fn parse_item(item: &Value) -> Option<ExtractedTask> {
    let Some(obj) = item.as_object() else {
        debug!(item = %item, "Skipping todo item that is not an object");
        return None;
    };
    let raw_text = obj.get("text").and_then(Value::as_str).unwrap_or_default();
    let text = strip_labels(raw_text);
    if text.is_empty() {
        debug!("Skipping todo item without text");
        return None;
    }

    let (priority, priority_inferred) = match explicit_priority(obj.get("priority")) {
        Some(p) => (p, false),
        None => (infer_priority(raw_text), true),
    };

    let subtasks = obj
        .get("subtasks")
        .and_then(Value::as_array)
        .map(|subs| parse_items(subs))
        .unwrap_or_default();

    Some(ExtractedTask {
        text,
        priority,
        priority_inferred,
        subtasks,
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Turns transcripts into task proposals
pub struct TodoExtractor {
    model: Arc<dyn LanguageModel>,
}

impl TodoExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn extract(&self, text: &str) -> PipelineResult<TodoProposal> {
        if text.trim().is_empty() {
            return Ok(TodoProposal::Parsed(Vec::new()));
        }

        let prompt = PROMPT_TEMPLATE.replace("{text}", text);
        let raw = self.model.complete(SYSTEM_PROMPT, &prompt).await?;

        let proposal = parse_proposal(&raw);
        if let TodoProposal::Malformed { reason } = &proposal {
            warn!(model = self.model.name(), %reason, "Todo output was malformed");
        }
        Ok(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_labels() {
        assert_eq!(strip_labels("TODO: renew passport"), "renew passport");
        assert_eq!(strip_labels("  action item:  task: file taxes "), "file taxes");
        assert_eq!(strip_labels("Todo list review"), "Todo list review");
        assert_eq!(strip_labels("TODO:"), "");
    }

    #[test]
    fn test_parse_nested_with_fences() {
        let raw = "```json\n[{\"text\": \"Plan trip\", \"priority\": 3, \"subtasks\": [{\"text\": \"Task: book hotel\"}]}]\n```";
        let proposal = parse_proposal(raw);
        let tasks = proposal.tasks();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].priority, 3);
        assert!(!tasks[0].priority_inferred);
        assert_eq!(tasks[0].subtasks[0].text, "book hotel");
        assert!(tasks[0].subtasks[0].priority_inferred);
    }

    #[test]
    fn test_non_array_is_malformed() {
        assert!(parse_proposal(r#"{"text": "x"}"#).is_malformed());
        assert!(parse_proposal("sure! here are your tasks").is_malformed());
        assert!(parse_proposal("").is_malformed());
        assert!(parse_proposal("```json\nnull\n```").is_malformed());
    }

    #[test]
    fn test_invalid_items_skipped() {
        let raw = r#"[42, {"priority": 2}, {"text": "  "}, {"text": "ok", "subtasks": "none"}]"#;
        let tasks = parse_proposal(raw).into_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "ok");
        assert!(tasks[0].subtasks.is_empty());
    }

    #[test]
    fn test_out_of_range_priority_is_inferred() {
        let tasks = parse_proposal(r#"[{"text": "asap: call plumber", "priority": 42}]"#).into_tasks();
        assert!(tasks[0].priority_inferred);
        assert!([1, 2].contains(&tasks[0].priority));
    }
}
