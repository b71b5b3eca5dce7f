//! Priority inference from task wording.
//!
//! Keyword classes are checked in precedence order; the first class with a
//! matching keyword decides the sub-range. The value inside the sub-range
//! comes from a digest of the text, so the same text always gets the same
//! priority.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::task::is_valid_priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    Urgent,
    High,
    Medium,
    Low,
    /// No keyword matched
    Default,
}

impl PriorityClass {
    /// Classes with keywords, highest precedence first
    const ORDERED: [PriorityClass; 4] = [
        PriorityClass::Urgent,
        PriorityClass::High,
        PriorityClass::Medium,
        PriorityClass::Low,
    ];

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Urgent => &["urgent", "critical", "immediate", "asap"],
            Self::High => &["important", "priority", "crucial"],
            Self::Medium => &["should", "need to", "required"],
            Self::Low => &["maybe", "consider", "might", "could", "eventually"],
            Self::Default => &[],
        }
    }

    pub fn range(self) -> &'static [u8] {
        match self {
            Self::Urgent => &[1, 2],
            Self::High => &[3, 4],
            Self::Medium => &[5, 6, 7],
            Self::Low => &[8, 9, 10],
            Self::Default => &[4, 5, 6, 7],
        }
    }
}

/// Highest-precedence class whose keyword appears in `text` (case-insensitive)
pub fn classify(text: &str) -> PriorityClass {
    let lower = text.to_lowercase();
    PriorityClass::ORDERED
        .into_iter()
        .find(|class| class.keywords().iter().any(|k| lower.contains(k)))
        .unwrap_or(PriorityClass::Default)
}

/// Priority for a task that came without one
pub fn infer_priority(text: &str) -> u8 {
    let range = classify(text).range();
    let digest = Sha256::digest(text.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let pick = u64::from_be_bytes(head) % range.len() as u64;
    range[pick as usize]
}

/// An explicit priority from provider output, if usable. Integers and
/// integer strings in 1..=10 are accepted; anything else counts as missing.
pub fn explicit_priority(value: Option<&Value>) -> Option<u8> {
    let n = match value? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        })?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if is_valid_priority(n) {
        u8::try_from(n).ok()
    } else {
        None
    }
}
