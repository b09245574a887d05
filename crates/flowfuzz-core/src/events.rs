//! Execution event definitions
//!
//! [`ExecutionEvent`] is the canonical, append-only log of a run. It is
//! serialized as a tagged JSON object (`{"type": "action_completed", ...}`)
//! and is the only input of the flow reducer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{ActionParams, ActionSpec};
use crate::crash::CrashReport;
use crate::types::{ActionStatus, Coordinate};

// ─────────────────────────────────────────────────────────
// Event Payloads
// ─────────────────────────────────────────────────────────

/// The action as it was requested, echoed on `action_completed`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionSnapshot {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: ActionParams,
}

impl ActionSnapshot {
    /// Snapshot for the baseline launch that opens every test case
    pub fn launch() -> Self {
        Self {
            action_type: "Launch".to_string(),
            description: "Launch app".to_string(),
            params: ActionParams::default(),
        }
    }
}

impl From<&ActionSpec> for ActionSnapshot {
    fn from(spec: &ActionSpec) -> Self {
        Self {
            action_type: spec.action.clone(),
            description: spec.description.clone(),
            params: spec.params.clone(),
        }
    }
}

/// One executed action slot
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCompleted {
    pub test_case_index: usize,
    pub action_index: i32,
    pub action: ActionSnapshot,
    #[serde(default)]
    pub screenshot_url: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Milliseconds
    pub duration: u64,
    pub success: bool,
    pub status: ActionStatus,
}

impl ActionCompleted {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.test_case_index, self.action_index)
    }
}

/// A crash report, optionally correlated with the action that was current
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashDetected {
    #[serde(default)]
    pub test_case_index: Option<usize>,
    #[serde(default)]
    pub action_index: Option<i32>,
    #[serde(default)]
    pub screenshot_url: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub crash: CrashReport,
    /// Running crash count for the task, including this one
    pub total_crashes: usize,
}

impl CrashDetected {
    pub fn coordinate(&self) -> Option<Coordinate> {
        Some(Coordinate::new(self.test_case_index?, self.action_index?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseStarted {
    /// 1-based ordinal of the case, for display
    pub index: usize,
    pub total: usize,
    #[serde(default)]
    pub description: String,
}

/// Per-case totals, also the payload of the collapsed summary node
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseCompleted {
    pub test_case_index: usize,
    pub total_actions: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub crash_count: usize,
    /// Milliseconds
    pub total_duration: u64,
    #[serde(default)]
    pub final_screenshot_url: Option<String>,
}

impl TestCaseCompleted {
    /// A case passes when nothing failed or crashed
    pub fn passed(&self) -> bool {
        self.failed_count == 0 && self.crash_count == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub crashes: usize,
}

// ─────────────────────────────────────────────────────────
// Execution Event
// ─────────────────────────────────────────────────────────

/// Tagged union of everything a run emits
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    TaskStarted,
    GeneratingTestCases,
    TestCasesGenerated { count: usize },
    TestCaseStarted(TestCaseStarted),
    ActionCompleted(ActionCompleted),
    CrashDetected(CrashDetected),
    TestCaseCompleted(TestCaseCompleted),
    TaskCompleted { summary: TaskSummary },
    TaskFailed { error: String },
}

impl ExecutionEvent {
    /// Wire name of the event (`type` field)
    pub fn event_type(&self) -> &'static str {
        match self {
            ExecutionEvent::TaskStarted => "task_started",
            ExecutionEvent::GeneratingTestCases => "generating_test_cases",
            ExecutionEvent::TestCasesGenerated { .. } => "test_cases_generated",
            ExecutionEvent::TestCaseStarted(_) => "test_case_started",
            ExecutionEvent::ActionCompleted(_) => "action_completed",
            ExecutionEvent::CrashDetected(_) => "crash_detected",
            ExecutionEvent::TestCaseCompleted(_) => "test_case_completed",
            ExecutionEvent::TaskCompleted { .. } => "task_completed",
            ExecutionEvent::TaskFailed { .. } => "task_failed",
        }
    }

    /// Slot this event addresses in the flow graph, if any
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            ExecutionEvent::ActionCompleted(e) => Some(e.coordinate()),
            ExecutionEvent::CrashDetected(e) => e.coordinate(),
            _ => None,
        }
    }

    /// Whether the event ends the stream for its task
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::TaskCompleted { .. } | ExecutionEvent::TaskFailed { .. }
        )
    }

    pub fn task_failed(error: impl Into<String>) -> Self {
        ExecutionEvent::TaskFailed {
            error: error.into(),
        }
    }
}
