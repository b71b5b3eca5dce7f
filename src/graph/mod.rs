//! Concept graph: synchronisation from extracted topics, and layout.

pub mod layout;
pub mod sync;

pub use layout::{layout, layout_graph, Direction, LayoutConfig, PositionedNode};
pub use sync::{GraphSynchronizer, SyncSummary};
