//! Concept graph persistence.
//!
//! Concept identity is `(owner_id, name_key)`, enforced by a UNIQUE
//! constraint so concurrent upserts for the same name converge on one row.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::core::{PipelineError, PipelineResult};
use crate::domain::concept::{display_name, name_key};
use crate::domain::{ConceptEdge, ConceptGraph, ConceptKind, ConceptNode, Topic};

use super::Database;

fn concept_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConceptNode> {
    let kind: String = row.get(3)?;
    let info_raw: String = row.get(4)?;
    let info_points: Vec<String> = serde_json::from_str(&info_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ConceptNode {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        kind: ConceptKind::parse(&kind).unwrap_or(ConceptKind::Secondary),
        info_points,
        created_at: row.get::<_, DateTime<Utc>>(5)?,
    })
}

fn find_by_key(conn: &Connection, owner_id: &str, key: &str) -> rusqlite::Result<Option<ConceptNode>> {
    conn.query_row(
        "SELECT id, owner_id, name, kind, info_points, created_at
         FROM concepts WHERE owner_id = ?1 AND name_key = ?2",
        params![owner_id, key],
        concept_from_row,
    )
    .optional()
}

/// Append points not already present, keeping first-seen order
fn merge_info_points(existing: &mut Vec<String>, incoming: &[String]) -> bool {
    let mut changed = false;
    for point in incoming {
        let point = point.trim();
        if point.is_empty() || existing.iter().any(|p| p == point) {
            continue;
        }
        existing.push(point.to_string());
        changed = true;
    }
    changed
}

impl Database {
    /// Create the concept if the owner has none by that name, otherwise
    /// merge the new info points into it. Kind is promoted to primary but
    /// never demoted.
    pub async fn upsert_concept(
        &self,
        owner_id: &str,
        topic: Topic,
        kind: ConceptKind,
    ) -> PipelineResult<ConceptNode> {
        let name = display_name(&topic.name);
        if name.is_empty() {
            return Err(PipelineError::ValidationFailure("concept name is empty".to_string()));
        }
        let key = name_key(&name);
        let owner_id = owner_id.to_string();

        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO concepts (id, owner_id, name, name_key, kind, info_points, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, '[]', ?6)
                 ON CONFLICT (owner_id, name_key) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    owner_id,
                    name,
                    key,
                    kind.as_str(),
                    Utc::now(),
                ],
            )?;

            let mut node = find_by_key(&tx, &owner_id, &key)?.ok_or_else(|| {
                PipelineError::Storage(format!("concept '{key}' vanished after upsert"))
            })?;

            let mut dirty = merge_info_points(&mut node.info_points, &topic.info_points);
            if kind > node.kind {
                node.kind = kind;
                dirty = true;
            }

            if dirty {
                let info = serde_json::to_string(&node.info_points)
                    .map_err(|e| PipelineError::Storage(format!("encode info points: {e}")))?;
                tx.execute(
                    "UPDATE concepts SET kind = ?1, info_points = ?2 WHERE id = ?3",
                    params![node.kind.as_str(), info, node.id],
                )?;
            }
            tx.commit()?;
            Ok(node)
        })
        .await
    }

    /// Link two concepts. Returns false when the link already exists in
    /// either orientation or both ends are the same concept.
    pub async fn insert_edge(&self, owner_id: &str, source: &str, target: &str) -> PipelineResult<bool> {
        if source == target {
            return Ok(false);
        }
        let owner_id = owner_id.to_string();
        let source = source.to_string();
        let target = target.to_string();

        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO concept_edges (owner_id, source_id, target_id, pair_key)
                 VALUES (?1, ?2, ?3, ?4)",
                params![owner_id, source, target, ConceptEdge::pair_key(&source, &target)],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    /// The owner's whole graph, nodes and edges in insertion order
    pub async fn concept_graph(&self, owner_id: &str) -> PipelineResult<ConceptGraph> {
        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, name, kind, info_points, created_at
                 FROM concepts WHERE owner_id = ?1 ORDER BY seq",
            )?;
            let nodes = stmt
                .query_map(params![owner_id], concept_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(
                "SELECT owner_id, source_id, target_id
                 FROM concept_edges WHERE owner_id = ?1 ORDER BY seq",
            )?;
            let edges = stmt
                .query_map(params![owner_id], |row| {
                    Ok(ConceptEdge {
                        owner_id: row.get(0)?,
                        source: row.get(1)?,
                        target: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(ConceptGraph { nodes, edges })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str, info: &[&str]) -> Topic {
        Topic::new(name, info.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_upsert_merges_by_normalized_name() {
        let db = Database::in_memory().unwrap();

        let first = db
            .upsert_concept("u1", topic("Borrow  Checker", &["enforces aliasing"]), ConceptKind::Secondary)
            .await
            .unwrap();
        let second = db
            .upsert_concept(
                "u1",
                topic("borrow checker", &["enforces aliasing", "runs at compile time"]),
                ConceptKind::Primary,
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Borrow Checker");
        assert_eq!(second.kind, ConceptKind::Primary);
        assert_eq!(second.info_points, vec!["enforces aliasing", "runs at compile time"]);

        let graph = db.concept_graph("u1").await.unwrap();
        assert_eq!(graph.nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_kind_is_never_demoted() {
        let db = Database::in_memory().unwrap();
        db.upsert_concept("u1", topic("Tokio", &[]), ConceptKind::Primary)
            .await
            .unwrap();
        let again = db
            .upsert_concept("u1", topic("tokio", &[]), ConceptKind::Secondary)
            .await
            .unwrap();
        assert_eq!(again.kind, ConceptKind::Primary);
    }

    #[tokio::test]
    async fn test_edges_are_unordered_and_unique() {
        let db = Database::in_memory().unwrap();
        let a = db.upsert_concept("u1", topic("a", &[]), ConceptKind::Primary).await.unwrap();
        let b = db.upsert_concept("u1", topic("b", &[]), ConceptKind::Secondary).await.unwrap();

        assert!(db.insert_edge("u1", &a.id, &b.id).await.unwrap());
        assert!(!db.insert_edge("u1", &b.id, &a.id).await.unwrap());
        assert!(!db.insert_edge("u1", &a.id, &a.id).await.unwrap());

        let graph = db.concept_graph("u1").await.unwrap();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].source, a.id);
    }

    #[tokio::test]
    async fn test_graphs_are_owner_scoped() {
        let db = Database::in_memory().unwrap();
        let mine = db.upsert_concept("u1", topic("Rust", &[]), ConceptKind::Primary).await.unwrap();
        let theirs = db.upsert_concept("u2", topic("Rust", &[]), ConceptKind::Primary).await.unwrap();

        assert_ne!(mine.id, theirs.id);
        assert_eq!(db.concept_graph("u1").await.unwrap().nodes.len(), 1);
        assert!(db.concept_graph("u3").await.unwrap().nodes.is_empty());
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let db = Database::in_memory().unwrap();
        let result = db.upsert_concept("u1", topic("   ", &[]), ConceptKind::Primary).await;
        assert!(matches!(result, Err(PipelineError::ValidationFailure(_))));
    }
}
