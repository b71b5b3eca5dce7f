//! Layered (Sugiyama-style) layout for the concept graph.
//!
//! Pure and deterministic: the same nodes and edges in the same order always
//! produce the same positions. Steps:
//!
//! 1. DFS in input order marks back-edges; they are kept for crossing counts
//!    but ignored when ranking.
//! 2. Longest-path layering: sources get rank 0, every other node one more
//!    than its highest-ranked predecessor.
//! 3. Barycenter ordering, alternating down and up sweeps, keeping the
//!    ordering with the fewest crossings seen.
//! 4. Coordinates: each weakly connected component is laid out on its own,
//!    layers centered within it, components placed side by side.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::ConceptGraph;

/// Which way ranks grow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    #[serde(rename = "TB")]
    TopBottom,
    #[serde(rename = "BT")]
    BottomTop,
    #[serde(rename = "LR")]
    LeftRight,
    #[serde(rename = "RL")]
    RightLeft,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TB" => Ok(Self::TopBottom),
            "BT" => Ok(Self::BottomTop),
            "LR" => Ok(Self::LeftRight),
            "RL" => Ok(Self::RightLeft),
            other => Err(format!("unknown direction '{other}' (expected TB, BT, LR or RL)")),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TopBottom => "TB",
            Self::BottomTop => "BT",
            Self::LeftRight => "LR",
            Self::RightLeft => "RL",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub direction: Direction,
    /// Distance between neighbours in a layer
    pub node_spacing: f64,
    /// Distance between layers
    pub layer_spacing: f64,
    /// Gap between disconnected components
    pub component_spacing: f64,
    /// Down+up sweep pairs for crossing reduction
    pub sweeps: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            direction: Direction::TopBottom,
            node_spacing: 180.0,
            layer_spacing: 100.0,
            component_spacing: 180.0,
            sweeps: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionedNode {
    pub id: String,
    pub rank: usize,
    /// Position within its layer, inside its component
    pub order: usize,
    pub x: f64,
    pub y: f64,
}

/// Lay out a concept graph
pub fn layout_graph(graph: &ConceptGraph, config: &LayoutConfig) -> Vec<PositionedNode> {
    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let edges: Vec<(&str, &str)> = graph
        .edges
        .iter()
        .map(|e| (e.source.as_str(), e.target.as_str()))
        .collect();
    layout(&ids, &edges, config)
}

/// Lay out `nodes` connected by directed `edges`. Edges with unknown
/// endpoints and self-loops are ignored; duplicate node ids keep the first.
/// Output follows the input node order.
pub fn layout(nodes: &[&str], edges: &[(&str, &str)], config: &LayoutConfig) -> Vec<PositionedNode> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut ids: Vec<&str> = Vec::new();
    for &id in nodes {
        if !index.contains_key(id) {
            index.insert(id, ids.len());
            ids.push(id);
        }
    }
    let n = ids.len();
    if n == 0 {
        return Vec::new();
    }

    let mut graph_edges: Vec<(usize, usize)> = Vec::new();
    for (s, t) in edges {
        let (Some(&s), Some(&t)) = (index.get(s), index.get(t)) else {
            continue;
        };
        if s != t && !graph_edges.contains(&(s, t)) {
            graph_edges.push((s, t));
        }
    }

    let back = back_edges(n, &graph_edges);
    let ranks = longest_path_ranks(n, &graph_edges, &back);
    let components = components(n, &graph_edges);
    let max_rank = ranks.iter().copied().max().unwrap_or(0);

    // every edge runs from the lower rank to the higher one
    let spans: Vec<(usize, usize)> = graph_edges
        .iter()
        .map(|&(s, t)| if ranks[s] <= ranks[t] { (s, t) } else { (t, s) })
        .collect();

    let mut in_layer = vec![0.0f64; n];
    let mut orders = vec![0usize; n];
    let mut offset = 0.0f64;

    for members in &components {
        let layers = order_component(members, &ranks, &spans, config.sweeps);

        let widest = layers.iter().map(Vec::len).max().unwrap_or(1);
        let width = (widest.saturating_sub(1)) as f64 * config.node_spacing;
        for layer in &layers {
            let layer_width = (layer.len().saturating_sub(1)) as f64 * config.node_spacing;
            let start = offset + (width - layer_width) / 2.0;
            for (pos, &node) in layer.iter().enumerate() {
                orders[node] = pos;
                in_layer[node] = start + pos as f64 * config.node_spacing;
            }
        }
        offset += width + config.component_spacing;
    }

    (0..n)
        .map(|i| {
            let along = ranks[i] as f64 * config.layer_spacing;
            let reversed = (max_rank - ranks[i]) as f64 * config.layer_spacing;
            let (x, y) = match config.direction {
                Direction::TopBottom => (in_layer[i], along),
                Direction::BottomTop => (in_layer[i], reversed),
                Direction::LeftRight => (along, in_layer[i]),
                Direction::RightLeft => (reversed, in_layer[i]),
            };
            PositionedNode {
                id: ids[i].to_string(),
                rank: ranks[i],
                order: orders[i],
                x,
                y,
            }
        })
        .collect()
}

/// Indices into `edges` that close a cycle, found by DFS in input order
fn back_edges(n: usize, edges: &[(usize, usize)]) -> Vec<bool> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let mut out: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (e, &(s, _)) in edges.iter().enumerate() {
        out[s].push(e);
    }

    let mut back = vec![false; edges.len()];
    let mut mark = vec![Mark::New; n];
    for root in 0..n {
        if mark[root] != Mark::New {
            continue;
        }
        // (node, next outgoing edge to visit)
        let mut stack = vec![(root, 0usize)];
        mark[root] = Mark::Active;
        while let Some((node, next)) = stack.pop() {
            if next == out[node].len() {
                mark[node] = Mark::Done;
                continue;
            }
            stack.push((node, next + 1));
            let e = out[node][next];
            let target = edges[e].1;
            match mark[target] {
                Mark::Active => back[e] = true,
                Mark::New => {
                    mark[target] = Mark::Active;
                    stack.push((target, 0));
                }
                Mark::Done => {}
            }
        }
    }
    back
}

/// Longest-path ranks over the edges that are not back-edges
fn longest_path_ranks(n: usize, edges: &[(usize, usize)], back: &[bool]) -> Vec<usize> {
    let mut out: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    for (e, &(s, t)) in edges.iter().enumerate() {
        if !back[e] {
            out[s].push(t);
            indegree[t] += 1;
        }
    }

    let mut rank = vec![0usize; n];
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    while let Some(node) = queue.pop_front() {
        for &t in &out[node] {
            rank[t] = rank[t].max(rank[node] + 1);
            indegree[t] -= 1;
            if indegree[t] == 0 {
                queue.push_back(t);
            }
        }
    }
    rank
}

/// Weakly connected components, each listed in input order, ordered by
/// their first node
fn components(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut adjacent: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(s, t) in edges {
        adjacent[s].push(t);
        adjacent[t].push(s);
    }

    let mut component = vec![usize::MAX; n];
    let mut result: Vec<Vec<usize>> = Vec::new();
    for start in 0..n {
        if component[start] != usize::MAX {
            continue;
        }
        let id = result.len();
        let mut members = Vec::new();
        let mut queue = VecDeque::from([start]);
        component[start] = id;
        while let Some(node) = queue.pop_front() {
            members.push(node);
            for &next in &adjacent[node] {
                if component[next] == usize::MAX {
                    component[next] = id;
                    queue.push_back(next);
                }
            }
        }
        members.sort_unstable();
        result.push(members);
    }
    result
}

/// Order one component's layers by barycenter sweeps
fn order_component(
    members: &[usize],
    ranks: &[usize],
    spans: &[(usize, usize)],
    sweeps: usize,
) -> Vec<Vec<usize>> {
    let depth = members.iter().map(|&m| ranks[m]).max().unwrap_or(0) + 1;
    let mut layers: Vec<Vec<usize>> = vec![Vec::new(); depth];
    for &m in members {
        layers[ranks[m]].push(m);
    }

    let in_component = |node: usize| members.binary_search(&node).is_ok();
    let edges: Vec<(usize, usize)> = spans
        .iter()
        .copied()
        .filter(|&(lo, _)| in_component(lo))
        .collect();

    let mut below: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut above: HashMap<usize, Vec<usize>> = HashMap::new();
    for &(lo, hi) in &edges {
        below.entry(hi).or_default().push(lo);
        above.entry(lo).or_default().push(hi);
    }

    let mut position: HashMap<usize, usize> = HashMap::new();
    for layer in &layers {
        for (p, &node) in layer.iter().enumerate() {
            position.insert(node, p);
        }
    }

    let mut best = layers.clone();
    let mut best_crossings = crossings(&edges, ranks, &position);

    for _ in 0..sweeps {
        if best_crossings == 0 {
            break;
        }
        for downward in [true, false] {
            let order: Vec<usize> = if downward {
                (1..depth).collect()
            } else {
                (0..depth.saturating_sub(1)).rev().collect()
            };
            let neighbours = if downward { &below } else { &above };

            for r in order {
                let layer = &mut layers[r];
                let mut keyed: Vec<(f64, usize, usize)> = layer
                    .iter()
                    .map(|&node| {
                        let current = position[&node];
                        let bary = neighbours
                            .get(&node)
                            .filter(|ns| !ns.is_empty())
                            .map(|ns| {
                                ns.iter().map(|v| position[v] as f64).sum::<f64>() / ns.len() as f64
                            })
                            .unwrap_or(current as f64);
                        (bary, current, node)
                    })
                    .collect();
                keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                *layer = keyed.into_iter().map(|(_, _, node)| node).collect();
                for (p, &node) in layer.iter().enumerate() {
                    position.insert(node, p);
                }
            }

            let count = crossings(&edges, ranks, &position);
            if count < best_crossings {
                best_crossings = count;
                best = layers.clone();
            }
        }
    }
    best
}

/// Pairs of edges spanning the same layers whose endpoints are in opposite
/// order
fn crossings(edges: &[(usize, usize)], ranks: &[usize], position: &HashMap<usize, usize>) -> usize {
    let mut count = 0;
    for (i, &(a1, b1)) in edges.iter().enumerate() {
        for &(a2, b2) in &edges[i + 1..] {
            if ranks[a1] != ranks[a2] || ranks[b1] != ranks[b2] {
                continue;
            }
            let top = position[&a1] as i64 - position[&a2] as i64;
            let bottom = position[&b1] as i64 - position[&b2] as i64;
            if top * bottom < 0 {
                count += 1;
            }
        }
    }
    count
}
