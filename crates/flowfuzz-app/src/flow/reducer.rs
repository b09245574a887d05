//! Event reducer for the flow graph
//!
//! [`apply`] folds one [`ExecutionEvent`] into a [`FlowState`]. The reducer is
//! pure and replayable: it holds no clock, performs no I/O and derives
//! nothing it cannot re-derive from the event stream.
//!
//! Slots are keyed by `(test case, action)`. An upsert replaces the node in
//! its slot, so replaying a stream, or applying the same event twice, yields
//! the same state, and events for distinct slots commute.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use flowfuzz_core::{
    ActionCompleted, ActionStatus, Coordinate, CrashDetected, CrashReport, ExecutionEvent,
    TestCaseCompleted,
};
use serde::Serialize;

use super::collapse::CollapseState;

/// What an action slot currently shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Action,
    Crash,
}

/// One executed action (or a crash attributed to it)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionNode {
    pub id: String,
    pub kind: NodeKind,
    pub test_case_index: usize,
    pub action_index: i32,
    pub action_type: String,
    pub description: String,
    pub screenshot_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration: u64,
    pub success: bool,
    pub status: ActionStatus,
    pub crash: Option<CrashReport>,
}

impl ActionNode {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.test_case_index, self.action_index)
    }

    fn from_action(event: &ActionCompleted) -> Self {
        Self {
            id: format!("node-{}-{}", event.test_case_index, event.action_index),
            kind: NodeKind::Action,
            test_case_index: event.test_case_index,
            action_index: event.action_index,
            action_type: event.action.action_type.clone(),
            description: event.action.description.clone(),
            screenshot_url: event.screenshot_url.clone(),
            timestamp: event.timestamp,
            duration: event.duration,
            success: event.success,
            status: event.status,
            crash: None,
        }
    }

    fn from_crash(at: Coordinate, event: &CrashDetected) -> Self {
        Self {
            id: format!("crash-{}-{}", at.test_case_index, at.action_index),
            kind: NodeKind::Crash,
            test_case_index: at.test_case_index,
            action_index: at.action_index,
            action_type: "Crash".to_string(),
            description: event.crash.summary(),
            screenshot_url: event.screenshot_url.clone(),
            timestamp: event.timestamp,
            duration: 0,
            success: false,
            status: ActionStatus::Crashed,
            crash: Some(event.crash.clone()),
        }
    }
}

/// Per-case totals shown when a case is collapsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryNode {
    pub id: String,
    #[serde(flatten)]
    pub totals: TestCaseCompleted,
}

impl SummaryNode {
    fn from_event(event: &TestCaseCompleted) -> Self {
        Self {
            id: format!("summary-{}", event.test_case_index),
            totals: event.clone(),
        }
    }
}

/// Reconstructed execution graph
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    pub(super) nodes: BTreeMap<Coordinate, ActionNode>,
    pub(super) summaries: BTreeMap<usize, SummaryNode>,
    pub(super) collapse: CollapseState,
    /// Whether cases start collapsed once their summary is known
    pub(super) default_collapsed: bool,
}

impl FlowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State whose cases are collapsed unless explicitly expanded
    pub fn collapsed_by_default() -> Self {
        Self {
            default_collapsed: true,
            ..Self::default()
        }
    }

    /// Fold a whole stream
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a ExecutionEvent>) -> Self {
        let mut state = Self::new();
        for event in events {
            apply(&mut state, event);
        }
        state
    }

    pub fn node(&self, at: Coordinate) -> Option<&ActionNode> {
        self.nodes.get(&at)
    }

    pub fn summary(&self, case: usize) -> Option<&SummaryNode> {
        self.summaries.get(&case)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Every test case with at least one node or a summary, ascending
    pub fn case_indexes(&self) -> Vec<usize> {
        let mut cases: Vec<usize> = self
            .nodes
            .keys()
            .map(|c| c.test_case_index)
            .chain(self.summaries.keys().copied())
            .collect();
        cases.sort_unstable();
        cases.dedup();
        cases
    }

    /// Action nodes of one case, by action index
    pub fn case_nodes(&self, case: usize) -> impl Iterator<Item = &ActionNode> {
        self.nodes
            .range(Coordinate::new(case, i32::MIN)..=Coordinate::new(case, i32::MAX))
            .map(|(_, node)| node)
    }

    pub fn is_collapsed(&self, case: usize) -> bool {
        self.collapse.is_collapsed(case, self.default_collapsed)
    }

    pub fn toggle_collapse(&mut self, case: usize) {
        self.collapse.toggle(case, self.default_collapsed);
    }

    pub fn set_collapsed(&mut self, case: usize, collapsed: bool) {
        self.collapse.set(case, collapsed, self.default_collapsed);
    }

    /// Forget every node, summary and collapse override
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.summaries.clear();
        self.collapse.reset();
    }
}

/// Fold one event into the state
pub fn apply(state: &mut FlowState, event: &ExecutionEvent) {
    match event {
        ExecutionEvent::ActionCompleted(e) => {
            let mut node = ActionNode::from_action(e);
            // A crashed action keeps the report of the crash it superseded
            if node.status == ActionStatus::Crashed {
                node.crash = state
                    .nodes
                    .get(&node.coordinate())
                    .and_then(|previous| previous.crash.clone());
            }
            state.nodes.insert(node.coordinate(), node);
        }
        ExecutionEvent::CrashDetected(e) => {
            // Uncorrelated crashes have no slot in the graph
            if let Some(at) = e.coordinate() {
                state.nodes.insert(at, ActionNode::from_crash(at, e));
            }
        }
        ExecutionEvent::TestCaseCompleted(e) => {
            state
                .summaries
                .insert(e.test_case_index, SummaryNode::from_event(e));
        }
        ExecutionEvent::TaskStarted
        | ExecutionEvent::GeneratingTestCases
        | ExecutionEvent::TestCasesGenerated { .. }
        | ExecutionEvent::TestCaseStarted(_)
        | ExecutionEvent::TaskCompleted { .. }
        | ExecutionEvent::TaskFailed { .. } => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flowfuzz_core::crash::CrashType;
    use flowfuzz_core::ActionSnapshot;

    pub(crate) fn action(case: usize, index: i32, status: ActionStatus) -> ExecutionEvent {
        ExecutionEvent::ActionCompleted(ActionCompleted {
            test_case_index: case,
            action_index: index,
            action: ActionSnapshot {
                action_type: "Tap".to_string(),
                description: format!("tap {case}/{index}"),
                params: Default::default(),
            },
            screenshot_url: None,
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            duration: 100,
            success: status == ActionStatus::Completed,
            status,
        })
    }

    pub(crate) fn crash(case: Option<usize>, index: Option<i32>) -> ExecutionEvent {
        ExecutionEvent::CrashDetected(CrashDetected {
            test_case_index: case,
            action_index: index,
            screenshot_url: None,
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_500).unwrap(),
            crash: CrashReport::new(CrashType::ManagedException, "com.example", ""),
            total_crashes: 1,
        })
    }

    pub(crate) fn completed(case: usize, actions: usize) -> ExecutionEvent {
        ExecutionEvent::TestCaseCompleted(TestCaseCompleted {
            test_case_index: case,
            total_actions: actions,
            success_count: actions,
            failed_count: 0,
            crash_count: 0,
            total_duration: 1000,
            final_screenshot_url: None,
        })
    }

    #[test]
    fn test_action_upsert_by_slot() {
        let mut state = FlowState::new();
        apply(&mut state, &action(0, 1, ActionStatus::Completed));
        apply(&mut state, &action(0, 1, ActionStatus::Failed));

        assert_eq!(state.node_count(), 1);
        let node = state.node(Coordinate::new(0, 1)).unwrap();
        assert_eq!(node.id, "node-0-1");
        assert_eq!(node.status, ActionStatus::Failed);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let events = vec![
            action(0, -1, ActionStatus::Completed),
            action(0, 0, ActionStatus::Completed),
            completed(0, 1),
        ];
        let once = FlowState::from_events(&events);
        let twice = FlowState::from_events(events.iter().chain(events.iter()));

        assert_eq!(once.nodes, twice.nodes);
        assert_eq!(once.summaries, twice.summaries);
    }

    #[test]
    fn test_distinct_slots_commute() {
        let events = vec![
            action(1, 0, ActionStatus::Completed),
            action(0, 2, ActionStatus::Failed),
            action(0, -1, ActionStatus::Completed),
            completed(0, 3),
        ];
        let forward = FlowState::from_events(&events);
        let reverse = FlowState::from_events(events.iter().rev());

        assert_eq!(forward.nodes, reverse.nodes);
        assert_eq!(forward.summaries, reverse.summaries);
    }

    #[test]
    fn test_crash_replaces_action_node() {
        let mut state = FlowState::new();
        apply(&mut state, &action(0, 1, ActionStatus::Completed));
        apply(&mut state, &crash(Some(0), Some(1)));

        let node = state.node(Coordinate::new(0, 1)).unwrap();
        assert_eq!(node.id, "crash-0-1");
        assert_eq!(node.kind, NodeKind::Crash);
        assert_eq!(node.status, ActionStatus::Crashed);
        assert_eq!(state.node_count(), 1);
    }

    #[test]
    fn test_crashed_action_keeps_crash_report() {
        let mut state = FlowState::new();
        apply(&mut state, &crash(Some(0), Some(1)));
        apply(&mut state, &action(0, 1, ActionStatus::Crashed));

        let node = state.node(Coordinate::new(0, 1)).unwrap();
        assert_eq!(node.kind, NodeKind::Action);
        assert_eq!(node.status, ActionStatus::Crashed);
        assert!(node.crash.is_some());
    }

    #[test]
    fn test_uncorrelated_crash_adds_no_node() {
        let mut state = FlowState::new();
        apply(&mut state, &crash(None, None));
        apply(&mut state, &crash(Some(0), None));
        assert_eq!(state.node_count(), 0);
    }

    #[test]
    fn test_case_nodes_are_ordered_by_action_index() {
        let state = FlowState::from_events(&[
            action(0, 2, ActionStatus::Completed),
            action(1, 0, ActionStatus::Completed),
            action(0, -1, ActionStatus::Completed),
            action(0, 0, ActionStatus::Completed),
        ]);

        let indexes: Vec<i32> = state.case_nodes(0).map(|n| n.action_index).collect();
        assert_eq!(indexes, vec![-1, 0, 2]);
        assert_eq!(state.case_indexes(), vec![0, 1]);
    }

    #[test]
    fn test_lifecycle_events_are_ignored() {
        let state = FlowState::from_events(&[
            ExecutionEvent::TaskStarted,
            ExecutionEvent::TestCasesGenerated { count: 2 },
            ExecutionEvent::task_failed("cancelled"),
        ]);
        assert_eq!(state.node_count(), 0);
        assert!(state.case_indexes().is_empty());
    }
}
