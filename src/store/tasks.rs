//! Task persistence.
//!
//! Rows are flat (id, parent_id); trees are assembled with [`TaskArena`].
//! Deleting a task never cascades: its children are lifted to the top level.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use uuid::Uuid;

use crate::core::{PipelineError, PipelineResult};
use crate::domain::task::is_valid_priority;
use crate::domain::{ExtractedTask, TaskArena, TaskId, TaskNode, TaskTree};

use super::{opt_uuid_column, uuid_column, Database};

const TASK_COLUMNS: &str = "id, owner_id, text, priority, parent_id, source_session, created_at";

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskNode> {
    let priority: i64 = row.get(3)?;
    Ok(TaskNode {
        id: uuid_column(row, 0)?,
        owner_id: row.get(1)?,
        text: row.get(2)?,
        priority: u8::try_from(priority).unwrap_or(crate::domain::PRIORITY_MAX),
        children: Vec::new(),
        parent_id: opt_uuid_column(row, 4)?,
        source_session: opt_uuid_column(row, 5)?,
        created_at: row.get::<_, DateTime<Utc>>(6)?,
    })
}

fn load_owner_tasks(conn: &Connection, owner_id: &str) -> rusqlite::Result<Vec<TaskNode>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = ?1 ORDER BY seq"
    ))?;
    let rows = stmt
        .query_map(params![owner_id], task_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn load_task(conn: &Connection, owner_id: &str, id: TaskId) -> rusqlite::Result<Option<TaskNode>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = ?1 AND id = ?2"),
        params![owner_id, id.to_string()],
        task_from_row,
    )
    .optional()
}

fn insert_row(tx: &Transaction<'_>, node: &TaskNode) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO tasks (id, owner_id, text, priority, parent_id, source_session, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            node.id.to_string(),
            node.owner_id,
            node.text,
            i64::from(node.priority),
            node.parent_id.map(|p| p.to_string()),
            node.source_session.map(|s| s.to_string()),
            node.created_at,
        ],
    )?;
    Ok(())
}

fn insert_tree(
    tx: &Transaction<'_>,
    owner_id: &str,
    session_id: Option<Uuid>,
    parent_id: Option<TaskId>,
    task: &ExtractedTask,
    inserted: &mut Vec<TaskId>,
) -> rusqlite::Result<()> {
    let node = TaskNode {
        id: Uuid::new_v4(),
        owner_id: owner_id.to_string(),
        text: task.text.clone(),
        priority: task.priority,
        children: Vec::new(),
        parent_id,
        source_session: session_id,
        created_at: Utc::now(),
    };
    insert_row(tx, &node)?;
    inserted.push(node.id);

    for sub in &task.subtasks {
        insert_tree(tx, owner_id, session_id, Some(node.id), sub, inserted)?;
    }
    Ok(())
}

fn validate_priority(priority: u8) -> PipelineResult<()> {
    if !is_valid_priority(i64::from(priority)) {
        return Err(PipelineError::ValidationFailure(format!(
            "priority {priority} outside 1..=10"
        )));
    }
    Ok(())
}

impl Database {
    /// Persist extracted task trees with fresh ids, in one transaction.
    /// Returns the ids of every inserted task, parents before children.
    /// Trees an earlier attempt stored for the same session are replaced.
    pub async fn insert_extracted_tasks(
        &self,
        owner_id: &str,
        session_id: Option<Uuid>,
        tasks: Vec<ExtractedTask>,
    ) -> PipelineResult<Vec<TaskId>> {
        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            if let Some(session) = session_id {
                tx.execute(
                    "DELETE FROM tasks WHERE owner_id = ?1 AND source_session = ?2",
                    params![owner_id, session.to_string()],
                )?;
            }
            let mut inserted = Vec::new();
            for task in &tasks {
                insert_tree(&tx, &owner_id, session_id, None, task, &mut inserted)?;
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    /// Create a single task, optionally under an existing parent
    pub async fn create_task(
        &self,
        owner_id: &str,
        text: &str,
        priority: u8,
        parent_id: Option<TaskId>,
    ) -> PipelineResult<TaskNode> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(PipelineError::ValidationFailure("task text is empty".to_string()));
        }
        validate_priority(priority)?;

        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            if let Some(parent) = parent_id {
                if load_task(&tx, &owner_id, parent)?.is_none() {
                    return Err(PipelineError::ValidationFailure(format!(
                        "parent task {parent} not found"
                    )));
                }
            }

            let node = TaskNode {
                id: Uuid::new_v4(),
                owner_id: owner_id.clone(),
                text,
                priority,
                children: Vec::new(),
                parent_id,
                source_session: None,
                created_at: Utc::now(),
            };
            insert_row(&tx, &node)?;
            tx.commit()?;
            Ok(node)
        })
        .await
    }

    /// Delete a task. Its children become top-level tasks.
    /// Returns false when no such task exists for the owner.
    pub async fn delete_task(&self, owner_id: &str, id: TaskId) -> PipelineResult<bool> {
        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "DELETE FROM tasks WHERE owner_id = ?1 AND id = ?2",
                params![owner_id, id.to_string()],
            )?;
            if deleted > 0 {
                tx.execute(
                    "UPDATE tasks SET parent_id = NULL WHERE owner_id = ?1 AND parent_id = ?2",
                    params![owner_id, id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Change a task's priority
    pub async fn set_task_priority(&self, owner_id: &str, id: TaskId, priority: u8) -> PipelineResult<bool> {
        validate_priority(priority)?;
        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE tasks SET priority = ?1 WHERE owner_id = ?2 AND id = ?3",
                params![i64::from(priority), owner_id, id.to_string()],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    /// Reparent a task (`None` makes it top-level). Rejects moves that
    /// would make a task its own descendant.
    pub async fn move_task(
        &self,
        owner_id: &str,
        id: TaskId,
        new_parent: Option<TaskId>,
    ) -> PipelineResult<()> {
        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let arena = TaskArena::from_nodes(load_owner_tasks(&tx, &owner_id)?);

            if arena.get(&id).is_none() {
                return Err(PipelineError::ValidationFailure(format!("task {id} not found")));
            }
            if let Some(parent) = new_parent {
                if arena.get(&parent).is_none() {
                    return Err(PipelineError::ValidationFailure(format!(
                        "parent task {parent} not found"
                    )));
                }
                if arena.would_create_cycle(id, parent) {
                    return Err(PipelineError::ValidationFailure(format!(
                        "moving {id} under {parent} would create a cycle"
                    )));
                }
            }

            tx.execute(
                "UPDATE tasks SET parent_id = ?1 WHERE owner_id = ?2 AND id = ?3",
                params![new_parent.map(|p| p.to_string()), owner_id, id.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// All of an owner's tasks as a forest
    pub async fn list_tasks(&self, owner_id: &str) -> PipelineResult<Vec<TaskTree>> {
        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let rows = load_owner_tasks(conn, &owner_id)?;
            Ok(TaskArena::from_nodes(rows).forest())
        })
        .await
    }

    /// Task trees extracted from one capture session
    pub async fn session_tasks(&self, owner_id: &str, session_id: Uuid) -> PipelineResult<Vec<TaskTree>> {
        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let rows: Vec<TaskNode> = load_owner_tasks(conn, &owner_id)?
                .into_iter()
                .filter(|t| t.source_session == Some(session_id))
                .collect();
            Ok(TaskArena::from_nodes(rows).forest())
        })
        .await
    }
}
