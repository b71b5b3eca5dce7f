//! Task forest model.
//!
//! Tasks are stored flat and addressed by id. [`TaskArena`] assembles the
//! flat rows into a forest and answers structural questions (descendants,
//! cycles). Expand/collapse state lives in [`ExpansionState`], which is
//! purely presentational and never persisted with the tasks.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskId = Uuid;

/// Most urgent priority
pub const PRIORITY_MIN: u8 = 1;
/// Least urgent priority
pub const PRIORITY_MAX: u8 = 10;

/// Whether a value is a valid priority
pub fn is_valid_priority(priority: i64) -> bool {
    (i64::from(PRIORITY_MIN)..=i64::from(PRIORITY_MAX)).contains(&priority)
}

/// A persisted task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: TaskId,
    pub owner_id: String,
    pub text: String,
    /// 1 (most urgent) to 10
    pub priority: u8,
    /// Subtask ids in display order
    pub children: Vec<TaskId>,
    pub parent_id: Option<TaskId>,
    /// Capture session the task was extracted from, if any
    pub source_session: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A task proposed by the extractor, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub text: String,
    pub priority: u8,
    /// True when the priority came from keyword inference
    pub priority_inferred: bool,
    pub subtasks: Vec<ExtractedTask>,
}

impl ExtractedTask {
    /// Number of tasks in this tree, including the root
    pub fn count(&self) -> usize {
        1 + self.subtasks.iter().map(ExtractedTask::count).sum::<usize>()
    }
}

/// A task with its subtasks resolved
#[derive(Debug, Clone, Serialize)]
pub struct TaskTree {
    pub task: TaskNode,
    pub subtasks: Vec<TaskTree>,
}

/// Flat task rows assembled into a forest
#[derive(Debug, Clone, Default)]
pub struct TaskArena {
    nodes: HashMap<TaskId, TaskNode>,
    order: Vec<TaskId>,
}

impl TaskArena {
    /// Build an arena from task rows. Children lists are rebuilt from the
    /// parent links; a parent link to a missing task makes the task a root.
    pub fn from_nodes(rows: Vec<TaskNode>) -> Self {
        let mut order: Vec<TaskId> = rows.iter().map(|t| t.id).collect();
        let mut nodes: HashMap<TaskId, TaskNode> = rows
            .into_iter()
            .map(|mut t| {
                t.children.clear();
                (t.id, t)
            })
            .collect();

        // stable: rows created in the same instant keep their input order
        order.sort_by_key(|id| nodes[id].created_at);

        for id in &order {
            let parent = nodes[id].parent_id;
            match parent {
                Some(p) if nodes.contains_key(&p) && p != *id => {
                    if let Some(parent_node) = nodes.get_mut(&p) {
                        parent_node.children.push(*id);
                    }
                }
                Some(_) => {
                    if let Some(node) = nodes.get_mut(id) {
                        node.parent_id = None;
                    }
                }
                None => {}
            }
        }

        let mut arena = Self { nodes, order };
        arena.break_cycles();
        arena
    }

    /// Parent links that loop back are cut so the result is a forest
    fn break_cycles(&mut self) {
        let ids = self.order.clone();
        for id in ids {
            let mut seen = HashSet::new();
            let mut current = Some(id);
            while let Some(c) = current {
                if !seen.insert(c) {
                    self.detach(c);
                    break;
                }
                current = self.nodes.get(&c).and_then(|n| n.parent_id);
            }
        }
    }

    fn detach(&mut self, id: TaskId) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent_id);
        if let Some(p) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&p) {
                parent_node.children.retain(|c| *c != id);
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent_id = None;
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level tasks
    pub fn roots(&self) -> Vec<&TaskNode> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| n.parent_id.is_none())
            .collect()
    }

    /// Whether `candidate` is `ancestor` itself or lies below it
    pub fn is_descendant(&self, candidate: TaskId, ancestor: TaskId) -> bool {
        let mut current = Some(candidate);
        let mut steps = 0usize;
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            current = self.nodes.get(&c).and_then(|n| n.parent_id);
        }
        false
    }

    /// Whether making `new_parent` the parent of `task` would close a cycle
    pub fn would_create_cycle(&self, task: TaskId, new_parent: TaskId) -> bool {
        self.is_descendant(new_parent, task)
    }

    /// Forest view, siblings sorted by priority then creation
    pub fn forest(&self) -> Vec<TaskTree> {
        let mut roots: Vec<&TaskNode> = self.roots();
        roots.sort_by_key(|n| n.priority);
        roots.into_iter().map(|n| self.tree(n)).collect()
    }

    fn tree(&self, node: &TaskNode) -> TaskTree {
        let mut children: Vec<&TaskNode> = node
            .children
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect();
        children.sort_by_key(|n| n.priority);

        TaskTree {
            task: node.clone(),
            subtasks: children.into_iter().map(|c| self.tree(c)).collect(),
        }
    }
}

/// One visible line of a task list
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: TaskId,
    pub depth: usize,
    pub text: String,
    pub priority: u8,
    pub subtask_count: usize,
    pub expanded: bool,
}

/// Which tasks are expanded in a list view
#[derive(Debug, Clone, Default)]
pub struct ExpansionState {
    expanded: HashSet<TaskId>,
}

impl ExpansionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand every task that has subtasks
    pub fn all(forest: &[TaskTree]) -> Self {
        let mut state = Self::new();
        fn walk(state: &mut ExpansionState, trees: &[TaskTree]) {
            for t in trees {
                if !t.subtasks.is_empty() {
                    state.expanded.insert(t.task.id);
                }
                walk(state, &t.subtasks);
            }
        }
        walk(&mut state, forest);
        state
    }

    pub fn toggle(&mut self, id: TaskId) -> bool {
        if !self.expanded.remove(&id) {
            self.expanded.insert(id);
            return true;
        }
        false
    }

    pub fn is_expanded(&self, id: &TaskId) -> bool {
        self.expanded.contains(id)
    }

    /// Flatten a forest into the rows currently visible
    pub fn visible_rows(&self, forest: &[TaskTree]) -> Vec<TaskRow> {
        let mut rows = Vec::new();
        self.push_rows(forest, 0, &mut rows);
        rows
    }

    fn push_rows(&self, trees: &[TaskTree], depth: usize, rows: &mut Vec<TaskRow>) {
        for t in trees {
            let expanded = self.is_expanded(&t.task.id);
            rows.push(TaskRow {
                id: t.task.id,
                depth,
                text: t.task.text.clone(),
                priority: t.task.priority,
                subtask_count: t.subtasks.len(),
                expanded,
            });
            if expanded {
                self.push_rows(&t.subtasks, depth + 1, rows);
            }
        }
    }
}
