//! Merging extracted topics into an owner's concept graph.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::core::PipelineResult;
use crate::domain::concept::{display_name, name_key};
use crate::domain::{ConceptKind, ConceptNode, Topic};
use crate::store::Database;

/// What one sync call changed
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    /// Nodes touched, in topic order
    pub nodes: Vec<ConceptNode>,
    pub edges_added: usize,
}

/// Serialises graph mutations per owner; owners proceed in parallel
pub struct GraphSynchronizer {
    db: Database,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GraphSynchronizer {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: DashMap::new(),
        }
    }

    fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(owner_id.to_string()).or_default().clone()
    }

    /// Upsert every topic, then link every pair of them
    #[instrument(skip(self, topics), fields(topics = topics.len()))]
    pub async fn sync(&self, owner_id: &str, topics: &[Topic]) -> PipelineResult<SyncSummary> {
        let topics = dedupe_topics(topics);
        if topics.is_empty() {
            return Ok(SyncSummary::default());
        }

        let lock = self.owner_lock(owner_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply(owner_id, topics).await
        };
        drop(lock);
        // the map holds the only other reference once no sync for this owner is running
        self.locks
            .remove_if(owner_id, |_, held| Arc::strong_count(held) == 1);
        result
    }

    async fn apply(&self, owner_id: &str, topics: Vec<Topic>) -> PipelineResult<SyncSummary> {
        let db = &self.db;
        let mut summary = SyncSummary::default();
        for (i, topic) in topics.into_iter().enumerate() {
            let kind = if i == 0 {
                ConceptKind::Primary
            } else {
                ConceptKind::Secondary
            };
            summary.nodes.push(db.upsert_concept(owner_id, topic, kind).await?);
        }

        for (i, earlier) in summary.nodes.iter().enumerate() {
            for later in &summary.nodes[i + 1..] {
                if db.insert_edge(owner_id, &earlier.id, &later.id).await? {
                    summary.edges_added += 1;
                }
            }
        }

        debug!(
            nodes = summary.nodes.len(),
            edges_added = summary.edges_added,
            "Graph synced"
        );
        Ok(summary)
    }
}

/// Merge topics whose names normalise to the same key, keeping first-seen
/// order and name; blank names are dropped
fn dedupe_topics(topics: &[Topic]) -> Vec<Topic> {
    let mut merged: Vec<(String, Topic)> = Vec::new();
    for topic in topics {
        let key = name_key(&topic.name);
        if key.is_empty() {
            continue;
        }
        match merged.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                for point in &topic.info_points {
                    if !existing.info_points.contains(point) {
                        existing.info_points.push(point.clone());
                    }
                }
            }
            None => merged.push((
                key,
                Topic::new(display_name(&topic.name), topic.info_points.clone()),
            )),
        }
    }
    merged.into_iter().map(|(_, t)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str, info: &[&str]) -> Topic {
        Topic::new(name, info.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_dedupe_topics() {
        let topics = dedupe_topics(&[
            topic("Rust", &["fast"]),
            topic("  rust ", &["safe", "fast"]),
            topic("   ", &["nothing"]),
            topic("Cargo", &[]),
        ]);
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].info_points, vec!["fast", "safe"]);
        assert_eq!(topics[1].name, "Cargo");
    }

    #[tokio::test]
    async fn test_sync_links_all_pairs() {
        let db = Database::in_memory().unwrap();
        let sync = GraphSynchronizer::new(db.clone());

        let summary = sync
            .sync("u1", &[topic("A", &[]), topic("B", &[]), topic("C", &[])])
            .await
            .unwrap();
        assert_eq!(summary.edges_added, 3);
        assert_eq!(summary.nodes[0].kind, ConceptKind::Primary);
        assert_eq!(summary.nodes[1].kind, ConceptKind::Secondary);

        // B is promoted when it leads a later capture; A-B already linked
        let summary = sync
            .sync("u1", &[topic("b", &["new"]), topic("a", &[])])
            .await
            .unwrap();
        assert_eq!(summary.edges_added, 0);
        assert_eq!(summary.nodes[0].kind, ConceptKind::Primary);

        let graph = db.concept_graph("u1").await.unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 3);
    }

    #[tokio::test]
    async fn test_owner_locks_released_after_sync() {
        let sync = Arc::new(GraphSynchronizer::new(Database::in_memory().unwrap()));

        let mut handles = Vec::new();
        for owner in ["u1", "u1", "u2", "u3"] {
            let sync = sync.clone();
            handles.push(tokio::spawn(async move {
                sync.sync(owner, &[topic("Rust", &[]), topic("Cargo", &[])]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(sync.locks.is_empty());
    }

    #[tokio::test]
    async fn test_empty_topics_is_noop() {
        let sync = GraphSynchronizer::new(Database::in_memory().unwrap());
        let summary = sync.sync("u1", &[]).await.unwrap();
        assert!(summary.nodes.is_empty());
    }
}
