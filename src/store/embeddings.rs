//! Embedding persistence and nearest-neighbour lookup.
//!
//! Vectors are stored as little-endian f32 blobs. Similarity search is a
//! linear cosine scan over the owner's records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::core::{PipelineError, PipelineResult};
use crate::domain::EmbeddingRecord;

use super::Database;

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Cosine similarity; zero when either vector has no magnitude or the
/// dimensions differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl Database {
    pub async fn insert_embedding(
        &self,
        owner_id: &str,
        source_text: &str,
        vector: Vec<f32>,
    ) -> PipelineResult<EmbeddingRecord> {
        if vector.is_empty() {
            return Err(PipelineError::ValidationFailure("embedding vector is empty".to_string()));
        }
        let owner_id = owner_id.to_string();
        let source_text = source_text.to_string();

        self.call(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO embeddings (owner_id, source_text, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![owner_id, source_text, encode_vector(&vector), created_at],
            )?;
            Ok(EmbeddingRecord {
                id: conn.last_insert_rowid(),
                owner_id,
                source_text,
                vector,
                created_at,
            })
        })
        .await
    }

    /// The owner's `k` records most similar to `query`, best first.
    /// Ties keep insertion order.
    pub async fn nearest_embeddings(
        &self,
        owner_id: &str,
        query: Vec<f32>,
        k: usize,
    ) -> PipelineResult<Vec<(EmbeddingRecord, f32)>> {
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }
        let owner_id = owner_id.to_string();

        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, source_text, vector, created_at
                 FROM embeddings WHERE owner_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![owner_id], |row| {
                    let blob: Vec<u8> = row.get(3)?;
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        blob,
                        row.get::<_, DateTime<Utc>>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut scored: Vec<(EmbeddingRecord, f32)> = rows
                .into_iter()
                .filter_map(|(id, owner_id, source_text, blob, created_at)| {
                    let vector = decode_vector(&blob)?;
                    let score = cosine_similarity(&query, &vector);
                    Some((
                        EmbeddingRecord {
                            id,
                            owner_id,
                            source_text,
                            vector,
                            created_at,
                        },
                        score,
                    ))
                })
                .collect();

            scored.sort_by(|a, b| b.1.total_cmp(&a.1));
            scored.truncate(k);
            Ok(scored)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_vector_blob_layout() {
        let v = vec![1.5f32, -2.0, 0.25];
        assert_eq!(decode_vector(&encode_vector(&v)), Some(v));
        assert_eq!(decode_vector(&[0, 1, 2]), None);
    }

    #[tokio::test]
    async fn test_nearest_is_owner_scoped_and_ranked() {
        let db = Database::in_memory().unwrap();
        db.insert_embedding("u1", "north", vec![0.0, 1.0]).await.unwrap();
        db.insert_embedding("u1", "east", vec![1.0, 0.0]).await.unwrap();
        db.insert_embedding("u1", "northeast", vec![0.7, 0.7]).await.unwrap();
        db.insert_embedding("u2", "east too", vec![1.0, 0.0]).await.unwrap();

        let hits = db.nearest_embeddings("u1", vec![1.0, 0.1], 2).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|(r, _)| r.source_text.as_str()).collect();
        assert_eq!(texts, vec!["east", "northeast"]);

        assert!(db.nearest_embeddings("u3", vec![1.0, 0.0], 5).await.unwrap().is_empty());
        assert!(db.nearest_embeddings("u1", vec![1.0, 0.0], 0).await.unwrap().is_empty());
    }
}
