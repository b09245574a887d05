//! Run persistence
//!
//! Checkpoint writes of task, execution, result and crash records. The store
//! is write-only from the orchestrator's point of view; a failed write is a
//! [`Error::PersistenceFailure`] that the run logs and survives.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use flowfuzz_core::crash::CrashSeverity;
use flowfuzz_core::prelude::*;
use flowfuzz_core::{
    validate_task_id, CrashReport, Task, TaskId, TaskStatus, TaskSummary, TestCaseCompleted,
};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Execution of one test case within a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub task_id: TaskId,
    pub test_case_index: usize,
    pub test_case_id: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub totals: Option<TestCaseCompleted>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn started(task_id: &str, test_case_index: usize, test_case_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            test_case_index,
            test_case_id: test_case_id.to_string(),
            status: TaskStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            totals: None,
            error: None,
        }
    }

    /// Close the record; completed only when nothing failed or crashed
    pub fn finish(&mut self, totals: TestCaseCompleted) {
        self.status = if totals.passed() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.completed_at = Some(Utc::now());
        self.totals = Some(totals);
    }

    /// Close the record after an error inside the case
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

/// Final outcome of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub summary: TaskSummary,
    pub completed_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn new(task_id: &str, status: TaskStatus, summary: TaskSummary) -> Self {
        Self {
            task_id: task_id.to_string(),
            status,
            summary,
            completed_at: Utc::now(),
        }
    }
}

/// One detected crash, numbered in detection order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashRecord {
    pub task_id: TaskId,
    pub sequence: usize,
    pub severity: CrashSeverity,
    #[serde(default)]
    pub screenshot_url: Option<String>,
    pub report: CrashReport,
}

impl CrashRecord {
    pub fn new(
        task_id: &str,
        sequence: usize,
        report: CrashReport,
        screenshot_url: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            sequence,
            severity: report.crash_type.severity(),
            screenshot_url,
            report,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store trait
// ─────────────────────────────────────────────────────────────────────────────

/// Create/update operations at run checkpoints
#[trait_variant::make(TaskStore: Send)]
pub trait LocalTaskStore {
    async fn save_task(&self, task: &Task) -> Result<()>;

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()>;

    async fn save_result(&self, record: &ResultRecord) -> Result<()>;

    async fn save_crash(&self, record: &CrashRecord) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON file store
// ─────────────────────────────────────────────────────────────────────────────

/// Writes one JSON document per record under `<root>/<task>/`
///
/// ```text
/// <root>/<task>/task.json
/// <root>/<task>/executions/test_<i>.json
/// <root>/<task>/result.json
/// <root>/<task>/crashes/crash_<n>.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one task's records; rejects ids that would escape the root
    pub fn task_dir(&self, task_id: &str) -> Result<PathBuf> {
        validate_task_id(task_id)?;
        Ok(self.root.join(task_id))
    }

    async fn write_json<T: Serialize + Sync>(&self, path: PathBuf, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| Error::persistence(format!("encode {}: {e}", path.display())))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::persistence(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| Error::persistence(format!("write {}: {e}", path.display())))?;

        trace!("Wrote {}", path.display());
        Ok(())
    }
}

impl TaskStore for JsonFileStore {
    async fn save_task(&self, task: &Task) -> Result<()> {
        self.write_json(self.task_dir(&task.id)?.join("task.json"), task)
            .await
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let path = self
            .task_dir(&record.task_id)?
            .join("executions")
            .join(format!("test_{}.json", record.test_case_index));
        self.write_json(path, record).await
    }

    async fn save_result(&self, record: &ResultRecord) -> Result<()> {
        self.write_json(self.task_dir(&record.task_id)?.join("result.json"), record)
            .await
    }

    async fn save_crash(&self, record: &CrashRecord) -> Result<()> {
        let path = self
            .task_dir(&record.task_id)?
            .join("crashes")
            .join(format!("crash_{}.json", record.sequence));
        self.write_json(path, record).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Records {
    tasks: Vec<Task>,
    executions: Vec<ExecutionRecord>,
    results: Vec<ResultRecord>,
    crashes: Vec<CrashRecord>,
    failing: bool,
}

/// Keeps every write in memory, in order
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_failing(&self, failing: bool) {
        self.records().failing = failing;
    }

    /// Every saved snapshot of a task, oldest first
    pub fn tasks(&self) -> Vec<Task> {
        self.records().tasks.clone()
    }

    pub fn last_task(&self) -> Option<Task> {
        self.records().tasks.last().cloned()
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.records().executions.clone()
    }

    pub fn results(&self) -> Vec<ResultRecord> {
        self.records().results.clone()
    }

    pub fn crashes(&self) -> Vec<CrashRecord> {
        self.records().crashes.clone()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, what: &str, f: impl FnOnce(&mut Records)) -> Result<()> {
        let mut records = self.records();
        if records.failing {
            return Err(Error::persistence(format!("{what} rejected")));
        }
        f(&mut records);
        Ok(())
    }
}

impl TaskStore for MemoryStore {
    async fn save_task(&self, task: &Task) -> Result<()> {
        self.write("task", |r| r.tasks.push(task.clone()))
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        self.write("execution", |r| r.executions.push(record.clone()))
    }

    async fn save_result(&self, record: &ResultRecord) -> Result<()> {
        self.write("result", |r| r.results.push(record.clone()))
    }

    async fn save_crash(&self, record: &CrashRecord) -> Result<()> {
        self.write("crash", |r| r.crashes.push(record.clone()))
    }
}
