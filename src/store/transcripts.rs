//! Transcript persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::core::PipelineResult;
use crate::domain::Transcript;

use super::{uuid_column, Database};

impl Database {
    /// Write a session's transcript. Transcripts are immutable: a second
    /// write for the same session leaves the first in place.
    pub async fn insert_transcript(&self, transcript: Transcript) -> PipelineResult<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO transcripts (session_id, owner_id, text, language, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    transcript.session_id.to_string(),
                    transcript.owner_id,
                    transcript.text,
                    transcript.language,
                    transcript.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn transcript(&self, session_id: Uuid) -> PipelineResult<Option<Transcript>> {
        self.call(move |conn| {
            let transcript = conn
                .query_row(
                    "SELECT session_id, owner_id, text, language, created_at
                     FROM transcripts WHERE session_id = ?1",
                    params![session_id.to_string()],
                    |row| {
                        Ok(Transcript {
                            session_id: uuid_column(row, 0)?,
                            owner_id: row.get(1)?,
                            text: row.get(2)?,
                            language: row.get(3)?,
                            created_at: row.get::<_, DateTime<Utc>>(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(transcript)
        })
        .await
    }
}
