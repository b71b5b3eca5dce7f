//! Write-once records derived from a capture.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default language tag when the provider does not report one
pub const DEFAULT_LANGUAGE: &str = "en";

/// Language names some providers report in place of a tag
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("arabic", "ar"),
    ("chinese", "zh"),
    ("czech", "cs"),
    ("danish", "da"),
    ("dutch", "nl"),
    ("english", "en"),
    ("finnish", "fi"),
    ("french", "fr"),
    ("german", "de"),
    ("greek", "el"),
    ("hebrew", "he"),
    ("hindi", "hi"),
    ("hungarian", "hu"),
    ("indonesian", "id"),
    ("italian", "it"),
    ("japanese", "ja"),
    ("korean", "ko"),
    ("norwegian", "no"),
    ("polish", "pl"),
    ("portuguese", "pt"),
    ("romanian", "ro"),
    ("russian", "ru"),
    ("spanish", "es"),
    ("swedish", "sv"),
    ("thai", "th"),
    ("turkish", "tr"),
    ("ukrainian", "uk"),
    ("vietnamese", "vi"),
];

/// Primary language subtag for a reported language: `"en-US"` and
/// `"English"` both give `"en"`. `None` when it is not recognised.
pub fn language_tag(reported: &str) -> Option<String> {
    let reported = reported.trim().to_ascii_lowercase();
    let primary = reported.split(['-', '_']).next().unwrap_or_default();
    if (2..=3).contains(&primary.len()) && primary.bytes().all(|b| b.is_ascii_lowercase()) {
        return Some(primary.to_string());
    }
    LANGUAGE_NAMES
        .iter()
        .find(|(name, _)| *name == reported)
        .map(|(_, tag)| tag.to_string())
}

/// Verbatim text of a capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub session_id: Uuid,
    pub owner_id: String,
    pub text: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

/// An embedded piece of text, queried by similarity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: i64,
    pub owner_id: String,
    pub source_text: String,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}
