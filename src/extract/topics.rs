//! Topic extraction for the concept graph.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::strip_code_fences;
use crate::adapters::LanguageModel;
use crate::core::{PipelineError, PipelineResult};
use crate::domain::Topic;

const SYSTEM_PROMPT: &str =
    "You organise personal notes into a mind map of concepts and reply with JSON only.";

const PROMPT_TEMPLATE: &str = r#"Identify the concepts discussed in the text below. List the main subject first, then the related concepts. Format the output as a JSON array of objects, where each object has the following properties:
- name: A short name for the concept (a few words)
- info: An array of short facts about the concept taken from the text

Related notes the user captured earlier (use them only to name concepts consistently):
{context}

Text: {text}

JSON Output:"#;

/// Turns transcripts into topics for the concept graph
pub struct TopicExtractor {
    model: Arc<dyn LanguageModel>,
}

impl TopicExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Topics in `text`, primary first. `context` is prior related text.
    pub async fn extract(&self, text: &str, context: &str) -> PipelineResult<Vec<Topic>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let context = if context.trim().is_empty() { "(none)" } else { context };
        let prompt = PROMPT_TEMPLATE
            .replace("{context}", context)
            .replace("{text}", text);
        let raw = self.model.complete(SYSTEM_PROMPT, &prompt).await?;
        parse_topics(&raw)
    }
}

/// Parse `[{name, info}]`. Items without a usable name are skipped; any
/// other shape is a parse failure.
pub fn parse_topics(raw: &str) -> PipelineResult<Vec<Topic>> {
    let value: Value = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| PipelineError::ParseFailure(format!("topic output is not JSON: {e}")))?;

    let Value::Array(items) = value else {
        return Err(PipelineError::ParseFailure(
            "topic output is not a JSON array".to_string(),
        ));
    };

    let mut topics = Vec::new();
    for item in &items {
        let name = item.get("name").and_then(Value::as_str).unwrap_or_default().trim();
        if name.is_empty() {
            debug!(item = %item, "Skipping topic without a name");
            continue;
        }
        let info_points = match item.get("info") {
            Some(Value::Array(points)) => points
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(point)) if !point.trim().is_empty() => vec![point.trim().to_string()],
            _ => Vec::new(),
        };
        topics.push(Topic::new(name, info_points));
    }
    Ok(topics)
}
