//! Replay a captured event stream into a flow graph

use std::fmt::Write as _;
use std::path::Path;

use flowfuzz_app::flow::{project, FlowGraph, FlowState, GraphNode};
use flowfuzz_core::prelude::*;
use flowfuzz_core::SseDecoder;

/// Decode a captured stream and fold it into a flow state
///
/// `collapse` lists the test-case indexes to show as summaries.
pub fn load_flow(raw: &str, collapse: &[usize]) -> FlowState {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.push(raw);
    events.extend(decoder.finish());
    if decoder.skipped() > 0 {
        warn!("Skipped {} malformed frames", decoder.skipped());
    }

    let mut state = FlowState::from_events(&events);
    for &case in collapse {
        state.set_collapsed(case, true);
    }
    state
}

/// Print the reconstructed graph of a captured stream
pub fn run_replay(file: &Path, collapse: &[usize], json: bool) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read event stream {}", file.display()))?;
    let graph = project(&load_flow(&raw, collapse));

    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
    } else {
        print!("{}", render_text(&graph));
    }
    Ok(())
}

/// One line per visible node, followed by the edge into the next one
pub fn render_text(graph: &FlowGraph) -> String {
    let mut out = String::new();

    for (i, node) in graph.nodes.iter().enumerate() {
        let _ = match node {
            GraphNode::Action(action) => writeln!(
                out,
                "{:<14} {:<10} {:<9} {}",
                action.id,
                action.action_type,
                action.status.as_str(),
                action.description
            ),
            GraphNode::Summary(summary) => writeln!(
                out,
                "{:<14} {:<10} {:<9} {} actions, {} ok, {} failed, {} crashed",
                summary.id,
                "Summary",
                if summary.totals.passed() { "passed" } else { "failed" },
                summary.totals.total_actions,
                summary.totals.success_count,
                summary.totals.failed_count,
                summary.totals.crash_count
            ),
        };

        if let Some(edge) = graph.edges.get(i) {
            let _ = writeln!(
                out,
                "  │ {}{}",
                edge.style.color,
                if edge.style.dash.is_some() { " dashed" } else { "" }
            );
        }
    }

    out
}
