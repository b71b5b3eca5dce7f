//! Language-model driven extraction: todos and graph topics.

pub mod priority;
pub mod todo;
pub mod topics;

pub use priority::{classify, infer_priority, PriorityClass};
pub use todo::{parse_proposal, strip_labels, TodoExtractor, TodoProposal};
pub use topics::{parse_topics, TopicExtractor};

/// Strip a surrounding markdown code fence (```` ```json ... ``` ````)
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (`json`) on the opening line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
