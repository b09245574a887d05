//! Core domain types: tasks, test cases and execution coordinates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::ActionSpec;
use crate::error::{Error, Result};

/// Action index used for the baseline launch at the start of every test case
pub const LAUNCH_ACTION_INDEX: i32 = -1;

/// Default number of test cases requested from the generator
pub const DEFAULT_TEST_DEPTH: usize = 10;

/// Task identifier
pub type TaskId = String;

/// Check that a task id can name its record and screenshot directories
///
/// Ids are used as one path component, so separators, `..` and empty ids
/// are rejected.
pub fn validate_task_id(id: &str) -> Result<()> {
    let invalid = id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(Error::invalid_task_id(id));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Task
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a fuzz task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the run has finished, one way or another
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run configuration submitted with a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Desired number of generated test cases
    #[serde(default = "default_test_depth")]
    pub test_depth: usize,

    /// Focus-area tags forwarded to the generator
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            test_depth: DEFAULT_TEST_DEPTH,
            focus_areas: Vec::new(),
        }
    }
}

fn default_test_depth() -> usize {
    DEFAULT_TEST_DEPTH
}

/// A submitted fuzz task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    /// Package name of the application under test
    pub target_app: String,

    /// Free-text description forwarded to the generator
    #[serde(default)]
    pub description: String,

    /// Generated test cases; empty until generation has run once
    #[serde(default)]
    pub test_cases: Vec<TestCase>,

    #[serde(default)]
    pub config: RunConfig,

    #[serde(default)]
    pub status: TaskStatus,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        target_app: impl Into<String>,
        description: impl Into<String>,
        config: RunConfig,
    ) -> Self {
        Self {
            id: id.into(),
            target_app: target_app.into(),
            description: description.into(),
            test_cases: Vec::new(),
            config,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Attach pre-generated test cases (skips generation on start)
    pub fn with_test_cases(mut self, test_cases: Vec<TestCase>) -> Self {
        self.test_cases = test_cases;
        self
    }

    /// Record a status transition with its timestamp
    pub fn set_status(&mut self, status: TaskStatus) {
        let now = Utc::now();
        match status {
            TaskStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        self.status = status;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test Case
// ─────────────────────────────────────────────────────────────────────────────

/// Generator's estimate of how likely a case is to crash the app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrashLikelihood {
    High,
    #[default]
    Medium,
    Low,
}

/// One exploratory scenario: an ordered sequence of fuzz actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub actions: Vec<ActionSpec>,

    #[serde(default)]
    pub expected_behavior: String,

    #[serde(default, alias = "crashProbability")]
    pub crash_likelihood: CrashLikelihood,
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution coordinates and statuses
// ─────────────────────────────────────────────────────────────────────────────

/// Position of one executed action within a run
///
/// `action_index` is [`LAUNCH_ACTION_INDEX`] for the baseline launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub test_case_index: usize,
    pub action_index: i32,
}

impl Coordinate {
    pub fn new(test_case_index: usize, action_index: i32) -> Self {
        Self {
            test_case_index,
            action_index,
        }
    }

    /// Coordinate of the baseline launch for a test case
    pub fn launch(test_case_index: usize) -> Self {
        Self::new(test_case_index, LAUNCH_ACTION_INDEX)
    }

    pub fn is_launch(&self) -> bool {
        self.action_index == LAUNCH_ACTION_INDEX
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.test_case_index, self.action_index)
    }
}

/// Outcome status of one executed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Completed,
    Failed,
    Crashed,
}

impl ActionStatus {
    /// Compute the status of an action from executor success and crash correlation
    ///
    /// A correlated crash always wins over the executor's own result.
    pub fn resolve(success: bool, crashed: bool) -> Self {
        if crashed {
            ActionStatus::Crashed
        } else if success {
            ActionStatus::Completed
        } else {
            ActionStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Crashed => "crashed",
        }
    }
}
