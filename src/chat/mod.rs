//! Question answering over an owner's captured notes.
//!
//! The orchestrator retrieves the notes closest to the question from the
//! semantic index; [`NoteChat`] folds them and the conversation so far into
//! one prompt for the language model.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::LanguageModel;
use crate::core::{PipelineError, PipelineResult};

const SYSTEM_PROMPT: &str = "You answer questions about the user's own notes. \
Use the related notes when they help, and say so plainly when they do not cover the question.";

const PROMPT_TEMPLATE: &str = r#"Related notes the user captured:
{context}

Conversation so far:
{history}

user: {question}
assistant:"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One earlier message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

pub struct NoteChat {
    model: Arc<dyn LanguageModel>,
}

impl NoteChat {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Answer `question` given prior turns and retrieved note text
    pub async fn answer(&self, question: &str, history: &[ChatTurn], context: &str) -> PipelineResult<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::ValidationFailure("question is empty".to_string()));
        }

        let prompt = build_prompt(question, history, context);
        debug!(turns = history.len(), prompt_chars = prompt.len(), "Asking language model");
        let answer = self.model.complete(SYSTEM_PROMPT, &prompt).await?;
        Ok(answer.trim().to_string())
    }
}

/// History lines are `role: content`, one per turn
pub fn build_prompt(question: &str, history: &[ChatTurn], context: &str) -> String {
    let context = if context.trim().is_empty() { "(none)" } else { context.trim() };
    let history = if history.is_empty() {
        "(none)".to_string()
    } else {
        history
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.content.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    PROMPT_TEMPLATE
        .replace("{context}", context)
        .replace("{history}", &history)
        .replace("{question}", question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, _system: &str, prompt: &str) -> PipelineResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("  You wanted to renew your passport.\n".to_string())
        }
    }

    #[test]
    fn test_prompt_lists_history_in_order() {
        let history = vec![ChatTurn::user("what is due?"), ChatTurn::assistant("the bank call")];
        let prompt = build_prompt("and after that?", &history, "renew passport");

        assert!(prompt.contains("Related notes the user captured:\nrenew passport"));
        assert!(prompt.contains("user: what is due?\nassistant: the bank call"));
        assert!(prompt.ends_with("user: and after that?\nassistant:"));
    }

    #[test]
    fn test_prompt_marks_missing_context() {
        let prompt = build_prompt("anything?", &[], "  ");
        assert_eq!(prompt.matches("(none)").count(), 2);
    }

    #[test]
    fn test_turn_serde() {
        let turn: ChatTurn = serde_json::from_str(r#"{"role": "assistant", "content": "hi"}"#).unwrap();
        assert_eq!(turn, ChatTurn::assistant("hi"));
    }

    #[tokio::test]
    async fn test_answer_trims_and_rejects_blank_question() {
        let model = Arc::new(EchoModel::default());
        let chat = NoteChat::new(model.clone());

        let answer = chat.answer("passport?", &[], "renew passport").await.unwrap();
        assert_eq!(answer, "You wanted to renew your passport.");

        let err = chat.answer("   ", &[], "").await.unwrap_err();
        assert!(matches!(err, PipelineError::ValidationFailure(_)));
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }
}
