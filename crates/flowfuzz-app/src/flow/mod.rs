//! Flow reconstruction
//!
//! Rebuilds the execution graph from the event stream alone. The reducer
//! keeps one node per `(test case, action)` slot plus per-case summaries;
//! projection decides what is visible given the collapse state.

pub mod collapse;
pub mod projection;
pub mod reducer;

pub use collapse::CollapseState;
pub use projection::{project, EdgeStyle, FlowEdge, FlowGraph, GraphNode};
pub use reducer::{apply, ActionNode, FlowState, NodeKind, SummaryNode};
