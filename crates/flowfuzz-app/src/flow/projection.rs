//! Graph projection
//!
//! Turns a [`FlowState`] into the visible node list and the edges between
//! consecutive visible nodes. Test cases are laid out in ascending order; a
//! collapsed case with a known summary shows only that summary, any other
//! case shows its action nodes by action index.

use flowfuzz_core::ActionStatus;
use serde::Serialize;

use super::reducer::{ActionNode, FlowState, SummaryNode};

/// Edge colour for a completed target
pub const COLOR_COMPLETED: &str = "#22c55e";
/// Edge colour for a failed target
pub const COLOR_FAILED: &str = "#fbbf24";
/// Edge colour for a crashed target
pub const COLOR_CRASHED: &str = "#ef4444";
/// Edge colour for a summary target
pub const COLOR_NEUTRAL: &str = "#94a3b8";

const DASHED: &str = "5,5";

/// One visible node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphNode {
    Action(ActionNode),
    Summary(SummaryNode),
}

impl GraphNode {
    pub fn id(&self) -> &str {
        match self {
            GraphNode::Action(node) => &node.id,
            GraphNode::Summary(node) => &node.id,
        }
    }

    pub fn test_case_index(&self) -> usize {
        match self {
            GraphNode::Action(node) => node.test_case_index,
            GraphNode::Summary(node) => node.totals.test_case_index,
        }
    }

    /// Status the incoming edge is styled after; `None` for summaries
    pub fn status(&self) -> Option<ActionStatus> {
        match self {
            GraphNode::Action(node) => Some(node.status),
            GraphNode::Summary(_) => None,
        }
    }
}

/// Visual style of an edge, derived from the target node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeStyle {
    pub color: &'static str,
    pub animated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dash: Option<&'static str>,
}

impl EdgeStyle {
    pub fn for_status(status: Option<ActionStatus>) -> Self {
        match status {
            Some(ActionStatus::Completed) => Self {
                color: COLOR_COMPLETED,
                animated: true,
                dash: None,
            },
            Some(ActionStatus::Failed) => Self {
                color: COLOR_FAILED,
                animated: false,
                dash: Some(DASHED),
            },
            Some(ActionStatus::Crashed) => Self {
                color: COLOR_CRASHED,
                animated: false,
                dash: Some(DASHED),
            },
            None => Self {
                color: COLOR_NEUTRAL,
                animated: false,
                dash: None,
            },
        }
    }
}

/// Directed edge between two consecutive visible nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub style: EdgeStyle,
}

/// Rendered graph: visible nodes in order plus their edges
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<FlowEdge>,
}

impl FlowGraph {
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(GraphNode::id).collect()
    }
}

/// Project the visible graph
pub fn project(state: &FlowState) -> FlowGraph {
    let mut nodes = Vec::new();

    for case in state.case_indexes() {
        match state.summary(case) {
            Some(summary) if state.is_collapsed(case) => {
                nodes.push(GraphNode::Summary(summary.clone()));
            }
            _ => nodes.extend(state.case_nodes(case).cloned().map(GraphNode::Action)),
        }
    }

    let edges = nodes
        .windows(2)
        .map(|pair| {
            let (source, target) = (&pair[0], &pair[1]);
            FlowEdge {
                id: format!("edge-{}-{}", source.id(), target.id()),
                source: source.id().to_string(),
                target: target.id().to_string(),
                style: EdgeStyle::for_status(target.status()),
            }
        })
        .collect();

    FlowGraph { nodes, edges }
}
