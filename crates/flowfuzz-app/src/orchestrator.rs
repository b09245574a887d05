//! Execution orchestrator
//!
//! Owns the lifecycle of one run per task:
//! `Pending → Running → {Completed, Failed, Cancelled}`.
//!
//! A run is a sequential loop over the task's test cases. Each case
//! force-stops and relaunches the target, records a baseline, then executes
//! its actions one by one, settling and capturing after each. The crash
//! detector polls concurrently and reports over a channel that is drained
//! after every action, so a crash is attributed to the action that was
//! current when it became visible. Before each drain, before a case closes
//! and before the detector stops, the run flushes the detector so a fault on
//! the last action is never left to a tick that will not come.
//!
//! An error inside a case fails that case. A fatal one (the bridge program
//! is gone) also ends the run with `task_failed`; anything else lets the run
//! go on with the next case.
//!
//! Cancellation is cooperative: the flag is checked before every case and
//! every action.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use flowfuzz_bridge::{first_ready, DeviceBridge};
use flowfuzz_core::prelude::*;
use flowfuzz_core::{
    validate_task_id, Action, ActionCompleted, ActionKind, ActionSnapshot, ActionStatus,
    Coordinate, CrashDetected, CrashReport, ExecutionEvent, Task, TaskId, TaskStatus, TaskSummary,
    TestCase, TestCaseCompleted, TestCaseStarted,
};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bus::EventBus;
use crate::config::Settings;
use crate::detector::CrashDetector;
use crate::executor::{ActionExecutor, ActionOutcome};
use crate::generator::{GenerationRequest, TestCaseGenerator};
use crate::position::CurrentPosition;
use crate::screenshots::{self, ScreenshotManager};
use crate::store::{CrashRecord, ExecutionRecord, ResultRecord, TaskStore};

/// Error text carried by `task_failed` when a run is stopped
pub const CANCELLED_ERROR: &str = "cancelled";

/// Fresh task id: `task_<UTC yyyymmddHHMMSS>_<6 hex digits>`
pub fn new_task_id() -> TaskId {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!(
        "task_{}_{:06x}",
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        suffix
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Run registry and handle
// ─────────────────────────────────────────────────────────────────────────────

/// Live runs keyed by task id
#[derive(Debug, Clone, Default)]
struct RunRegistry {
    runs: Arc<Mutex<HashMap<TaskId, Arc<AtomicBool>>>>,
}

impl RunRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Arc<AtomicBool>>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, task_id: &str) -> Result<Arc<AtomicBool>> {
        let mut runs = self.lock();
        if runs.contains_key(task_id) {
            return Err(Error::already_running(task_id));
        }
        let cancel = Arc::new(AtomicBool::new(false));
        runs.insert(task_id.to_string(), Arc::clone(&cancel));
        Ok(cancel)
    }

    fn remove(&self, task_id: &str) {
        self.lock().remove(task_id);
    }

    fn get(&self, task_id: &str) -> Option<Arc<AtomicBool>> {
        self.lock().get(task_id).cloned()
    }
}

/// Handle to a spawned run
#[derive(Debug)]
pub struct RunHandle {
    task_id: TaskId,
    cancel: Arc<AtomicBool>,
    join: JoinHandle<Task>,
}

impl RunHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Ask the run to stop at the next case or action boundary
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// A cloneable cancel trigger, for signal handlers
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Wait for the run to end and return the final task
    pub async fn wait(self) -> Result<Task> {
        match self.join.await {
            Ok(task) => Ok(task),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::Cancelled),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Starts and stops task runs
pub struct Orchestrator<B, G, S> {
    bridge: Arc<B>,
    generator: Arc<G>,
    store: Arc<S>,
    bus: Arc<EventBus>,
    settings: Settings,
    runs: RunRegistry,
}

impl<B, G, S> Orchestrator<B, G, S>
where
    B: DeviceBridge + Send + Sync + 'static,
    G: TestCaseGenerator + Send + Sync + 'static,
    S: TaskStore + Send + Sync + 'static,
{
    pub fn new(
        bridge: Arc<B>,
        generator: Arc<G>,
        store: Arc<S>,
        bus: Arc<EventBus>,
        settings: Settings,
    ) -> Self {
        Self {
            bridge,
            generator,
            store,
            bus,
            settings,
            runs: RunRegistry::default(),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.runs.get(task_id).is_some()
    }

    /// Spawn a run for `task`
    ///
    /// Fails with [`Error::AlreadyRunning`] while a run for the same task id
    /// is live, and with [`Error::InvalidTaskId`] for an id that cannot name
    /// a record directory. Subscribe to the bus before calling this to see
    /// every event.
    pub fn start(&self, task: Task) -> Result<RunHandle> {
        validate_task_id(&task.id)?;
        let cancel = self.runs.register(&task.id)?;
        let task_id = task.id.clone();
        info!("Starting run for task {} ({})", task_id, task.target_app);

        let run = TaskRun {
            executor: ActionExecutor::new(Arc::clone(&self.bridge)),
            screenshots: ScreenshotManager::new(
                Arc::clone(&self.bridge),
                &self.settings.output,
                &task.id,
            ),
            bridge: Arc::clone(&self.bridge),
            generator: Arc::clone(&self.generator),
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            settings: self.settings.clone(),
            cancel: Arc::clone(&cancel),
            position: CurrentPosition::new(),
            total_crashes: 0,
            task,
        };

        let registry = self.runs.clone();
        let id = task_id.clone();
        let join = tokio::spawn(async move {
            let task = run.run().await;
            registry.remove(&id);
            task
        });

        Ok(RunHandle {
            task_id,
            cancel,
            join,
        })
    }

    /// Request cancellation of a live run
    pub fn stop(&self, task_id: &str) -> Result<()> {
        let cancel = self
            .runs
            .get(task_id)
            .ok_or_else(|| Error::not_running(task_id))?;
        info!("Stopping run for task {}", task_id);
        cancel.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One run
// ─────────────────────────────────────────────────────────────────────────────

/// Counters of one test case
#[derive(Debug, Default)]
struct CaseTally {
    total: usize,
    success: usize,
    failed: usize,
    crashed: usize,
    final_screenshot: Option<String>,
}

impl CaseTally {
    fn record(&mut self, status: ActionStatus) {
        self.total += 1;
        match status {
            ActionStatus::Completed => self.success += 1,
            ActionStatus::Failed => self.failed += 1,
            ActionStatus::Crashed => self.crashed += 1,
        }
    }

    /// Count crash reports that did not land on a tallied action
    fn add_crashes(&mut self, count: usize) {
        self.crashed += count;
    }

    fn into_completed(self, test_case_index: usize, started: Instant) -> TestCaseCompleted {
        TestCaseCompleted {
            test_case_index,
            total_actions: self.total,
            success_count: self.success,
            failed_count: self.failed,
            crash_count: self.crashed,
            total_duration: started.elapsed().as_millis() as u64,
            final_screenshot_url: self.final_screenshot,
        }
    }
}

/// What one drain of the crash channel hit
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct CrashHits {
    /// A report carried the current coordinate
    current: bool,
    /// Reports for the current case at any other coordinate
    elsewhere_in_case: usize,
}

impl CrashHits {
    /// Reports for the current case, the current coordinate included
    fn in_case(&self) -> usize {
        self.elsewhere_in_case + usize::from(self.current)
    }
}

struct TaskRun<B, G, S> {
    task: Task,
    bridge: Arc<B>,
    generator: Arc<G>,
    store: Arc<S>,
    bus: Arc<EventBus>,
    settings: Settings,
    cancel: Arc<AtomicBool>,
    position: CurrentPosition,
    executor: ActionExecutor<B>,
    screenshots: ScreenshotManager<B>,
    total_crashes: usize,
}

impl<B, G, S> TaskRun<B, G, S>
where
    B: DeviceBridge + Send + Sync + 'static,
    G: TestCaseGenerator + Send + Sync + 'static,
    S: TaskStore + Send + Sync + 'static,
{
    async fn run(mut self) -> Task {
        self.emit(ExecutionEvent::TaskStarted);
        self.task.set_status(TaskStatus::Running);
        self.save_task().await;

        if let Err(e) = self.check_device().await {
            return self.fail(e).await;
        }

        let cases = match self.prepare_cases().await {
            Ok(cases) => cases,
            Err(e) => return self.fail(e).await,
        };

        let (mut detector, mut reports) = CrashDetector::new(
            Arc::clone(&self.bridge),
            self.task.target_app.clone(),
            self.settings.detector.clone(),
            self.position.clone(),
        );
        detector.start();

        let mut summary = TaskSummary {
            total: cases.len(),
            ..Default::default()
        };
        let mut fatal = None;

        for (index, case) in cases.iter().enumerate() {
            if self.is_cancelled() {
                break;
            }
            match self
                .run_case(index, cases.len(), case, &detector, &mut reports)
                .await
            {
                Ok(true) => summary.passed += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    fatal = Some(e);
                    break;
                }
            }
        }

        detector.flush().await;
        detector.stop().await;
        self.drain_crashes(&mut reports, None, None).await;
        summary.crashes = self.total_crashes;

        if let Some(e) = fatal {
            self.checkpoint(
                "result",
                self.store
                    .save_result(&ResultRecord::new(&self.task.id, TaskStatus::Failed, summary))
                    .await,
            );
            return self.fail(e).await;
        }

        let status = if self.is_cancelled() {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Completed
        };
        self.task.set_status(status);
        self.save_task().await;
        self.checkpoint(
            "result",
            self.store
                .save_result(&ResultRecord::new(&self.task.id, status, summary))
                .await,
        );

        if status == TaskStatus::Cancelled {
            info!("Run for task {} cancelled", self.task.id);
            self.emit(ExecutionEvent::task_failed(CANCELLED_ERROR));
        } else {
            info!(
                "Run for task {} completed: {}/{} passed, {} crashes",
                self.task.id, summary.passed, summary.total, summary.crashes
            );
            self.emit(ExecutionEvent::TaskCompleted { summary });
        }
        self.task
    }

    async fn check_device(&self) -> Result<()> {
        let devices = self.bridge.list_devices().await?;
        match first_ready(&devices) {
            Some(device) => {
                debug!("Running on device {}", device.display_name());
                Ok(())
            }
            None => Err(Error::NoDevice),
        }
    }

    /// Generate the task's test cases unless they are already cached
    async fn prepare_cases(&mut self) -> Result<Vec<TestCase>> {
        if self.task.test_cases.is_empty() {
            self.emit(ExecutionEvent::GeneratingTestCases);
            let request = GenerationRequest::for_task(&self.task);
            let cases = self.generator.generate(&request).await?;
            if cases.is_empty() {
                return Err(Error::generation("generator returned no test cases"));
            }
            self.task.test_cases = cases;
            self.save_task().await;
        } else {
            debug!(
                "Task {} has {} cached test cases",
                self.task.id,
                self.task.test_cases.len()
            );
        }

        self.emit(ExecutionEvent::TestCasesGenerated {
            count: self.task.test_cases.len(),
        });
        Ok(self.task.test_cases.clone())
    }

    /// Run one case; returns whether it passed, or the fatal error that
    /// must end the run
    async fn run_case(
        &mut self,
        index: usize,
        total: usize,
        case: &TestCase,
        detector: &CrashDetector<B>,
        reports: &mut mpsc::UnboundedReceiver<CrashReport>,
    ) -> Result<bool> {
        let mut record = ExecutionRecord::started(&self.task.id, index, &case.id);
        self.checkpoint("execution", self.store.save_execution(&record).await);
        self.emit(ExecutionEvent::TestCaseStarted(TestCaseStarted {
            index: index + 1,
            total,
            description: case.description.clone(),
        }));

        let started = Instant::now();
        let mut tally = CaseTally::default();
        let result = self
            .execute_case(index, case, detector, reports, &mut tally)
            .await;

        // Late reports for this case still count while its coordinate is published
        detector.flush().await;
        let hits = self.drain_crashes(reports, Some(index), None).await;
        tally.add_crashes(hits.in_case());
        self.position.clear();

        if let Err(e) = &result {
            if e.is_recoverable() {
                warn!("Test case {} aborted: {}", index, e);
            } else {
                error!("Test case {} aborted: {}", index, e);
            }
            tally.failed += 1;
        }
        let completed = tally.into_completed(index, started);
        let passed = result.is_ok() && completed.passed();

        let fatal = match result {
            Ok(()) => {
                record.finish(completed.clone());
                None
            }
            Err(e) => {
                record.totals = Some(completed.clone());
                record.fail(e.to_string());
                e.is_fatal().then_some(e)
            }
        };
        self.emit(ExecutionEvent::TestCaseCompleted(completed));
        self.checkpoint("execution", self.store.save_execution(&record).await);

        match fatal {
            Some(e) => Err(e),
            None => Ok(passed),
        }
    }

    async fn execute_case(
        &mut self,
        index: usize,
        case: &TestCase,
        detector: &CrashDetector<B>,
        reports: &mut mpsc::UnboundedReceiver<CrashReport>,
        tally: &mut CaseTally,
    ) -> Result<()> {
        let package = self.task.target_app.clone();

        // Relaunch from a clean state; the detector must not see this stop
        self.position.clear();
        self.bridge.stop(&package).await?;
        tokio::time::sleep(self.settings.runner.relaunch_delay()).await;

        let launch = self
            .executor
            .execute(&Action::Launch { activity: None }, &package)
            .await;
        if !launch.success {
            self.complete_action(
                Coordinate::launch(index),
                ActionSnapshot::launch(),
                &launch,
                None,
                false,
            );
            return Err(Error::bridge(
                launch.error.unwrap_or_else(|| "launch failed".to_string()),
            ));
        }
        self.bridge.dump_log(true).await?;

        let at = Coordinate::launch(index);
        self.position.publish(at);
        self.settle(ActionKind::Launch).await;
        let screenshot = self.screenshots.capture(&screenshots::start_file(index)).await;
        detector.flush().await;
        let hits = self.drain_crashes(reports, Some(index), Some(at)).await;
        // The baseline is not one of the case's actions, but its crashes count
        tally.add_crashes(hits.in_case());
        self.complete_action(at, ActionSnapshot::launch(), &launch, screenshot, hits.current);

        for (action_index, spec) in case.actions.iter().enumerate() {
            if self.is_cancelled() {
                debug!("Cancelled before action {} of case {}", action_index, index);
                break;
            }

            let at = Coordinate::new(index, action_index as i32);
            self.position.publish(at);

            let outcome = self.executor.execute_spec(spec, &package).await;
            if let Some(kind) = ActionKind::parse(&spec.action) {
                self.settle(kind).await;
            }
            let screenshot = self
                .screenshots
                .capture(&screenshots::action_file(index, action_index))
                .await;
            detector.flush().await;
            let hits = self.drain_crashes(reports, Some(index), Some(at)).await;
            tally.add_crashes(hits.elsewhere_in_case);

            let status = self.complete_action(
                at,
                ActionSnapshot::from(spec),
                &outcome,
                screenshot,
                hits.current,
            );
            tally.record(status);
        }

        tally.final_screenshot = self.screenshots.capture(&screenshots::final_file(index)).await;
        Ok(())
    }

    /// Emit `action_completed` for a slot and return its status
    fn complete_action(
        &self,
        at: Coordinate,
        action: ActionSnapshot,
        outcome: &ActionOutcome,
        screenshot_url: Option<String>,
        crashed: bool,
    ) -> ActionStatus {
        let status = ActionStatus::resolve(outcome.success, crashed);
        self.emit(ExecutionEvent::ActionCompleted(ActionCompleted {
            test_case_index: at.test_case_index,
            action_index: at.action_index,
            action,
            screenshot_url,
            timestamp: chrono::Utc::now(),
            duration: outcome.elapsed_ms(),
            success: outcome.success,
            status,
        }));
        status
    }

    /// Emit every pending crash report
    ///
    /// Returns which of them landed on `current` and how many others belong
    /// to test case `case`.
    async fn drain_crashes(
        &mut self,
        reports: &mut mpsc::UnboundedReceiver<CrashReport>,
        case: Option<usize>,
        current: Option<Coordinate>,
    ) -> CrashHits {
        let mut hits = CrashHits::default();

        while let Ok(report) = reports.try_recv() {
            self.total_crashes += 1;
            let coordinate = report.coordinate;
            if coordinate.is_some() && coordinate == current {
                hits.current = true;
            } else if coordinate.is_some_and(|c| Some(c.test_case_index) == case) {
                hits.elsewhere_in_case += 1;
            }

            let screenshot_url = self
                .screenshots
                .capture(&screenshots::crash_file(coordinate, self.total_crashes))
                .await;
            warn!(
                "Crash #{} at {}: {}",
                self.total_crashes,
                coordinate.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                report.summary()
            );

            let record = CrashRecord::new(
                &self.task.id,
                self.total_crashes,
                report.clone(),
                screenshot_url.clone(),
            );
            self.checkpoint("crash", self.store.save_crash(&record).await);

            self.emit(ExecutionEvent::CrashDetected(CrashDetected {
                test_case_index: coordinate.map(|c| c.test_case_index),
                action_index: coordinate.map(|c| c.action_index),
                screenshot_url,
                timestamp: report.timestamp,
                crash: report,
                total_crashes: self.total_crashes,
            }));
        }

        hits
    }

    async fn settle(&self, kind: ActionKind) {
        if !self.settings.runner.settle_delays {
            return;
        }
        let delay = kind.settle_time();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn fail(mut self, error: Error) -> Task {
        error!("Run for task {} failed: {}", self.task.id, error);
        self.task.set_status(TaskStatus::Failed);
        self.save_task().await;
        self.emit(ExecutionEvent::task_failed(error.to_string()));
        self.task
    }

    async fn save_task(&self) {
        self.checkpoint("task", self.store.save_task(&self.task).await);
    }

    /// Persistence failures are logged; the run continues
    fn checkpoint(&self, what: &str, result: Result<()>) {
        if let Err(e) = result {
            warn!("Could not persist {} for task {}: {}", what, self.task.id, e);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ExecutionEvent) {
        trace!("Task {} event {}", self.task.id, event.event_type());
        self.bus.publish(&self.task.id, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Subscription;
    use crate::config::{DetectorSettings, OutputSettings};
    use crate::generator::StaticGenerator;
    use crate::store::MemoryStore;
    use flowfuzz_bridge::test_utils::{managed_crash_log, BridgeCall, FakeBridge};
    use flowfuzz_core::crash::CrashType;
    use flowfuzz_core::{ActionParams, ActionSpec, Point, RunConfig};
    use tempfile::TempDir;

    const PKG: &str = "com.example.shop";

    fn tap(x: i32, y: i32) -> ActionSpec {
        ActionSpec::new("Tap", format!("tap {x},{y}")).with_params(ActionParams {
            element: Some(format!("{x} {y}")),
            ..Default::default()
        })
    }

    fn type_text(text: &str) -> ActionSpec {
        ActionSpec::new("Type", "type").with_params(ActionParams {
            text: Some(text.to_string()),
            ..Default::default()
        })
    }

    fn case(description: &str, actions: Vec<ActionSpec>) -> TestCase {
        TestCase {
            id: String::new(),
            description: description.to_string(),
            category: "navigation".to_string(),
            actions,
            expected_behavior: String::new(),
            crash_likelihood: Default::default(),
        }
    }

    fn settings(dir: &TempDir) -> Settings {
        Settings {
            detector: DetectorSettings {
                poll_interval_ms: 500,
                ..Default::default()
            },
            output: OutputSettings {
                screenshots_dir: dir.path().join("screenshots"),
                records_dir: dir.path().join("records"),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    struct Harness {
        orchestrator: Orchestrator<FakeBridge, StaticGenerator, MemoryStore>,
        bridge: Arc<FakeBridge>,
        store: Arc<MemoryStore>,
        _dir: TempDir,
    }

    fn harness(bridge: FakeBridge, cases: Vec<TestCase>) -> Harness {
        harness_with(bridge, cases, |_| {})
    }

    fn harness_with(
        bridge: FakeBridge,
        cases: Vec<TestCase>,
        configure: impl FnOnce(&mut Settings),
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(bridge);
        let store = Arc::new(MemoryStore::new());
        let mut settings = settings(&dir);
        configure(&mut settings);
        let orchestrator = Orchestrator::new(
            Arc::clone(&bridge),
            Arc::new(StaticGenerator::new(cases)),
            Arc::clone(&store),
            Arc::new(EventBus::default()),
            settings,
        );
        Harness {
            orchestrator,
            bridge,
            store,
            _dir: dir,
        }
    }

    fn task() -> Task {
        Task::new("t1", PKG, "a shop", RunConfig::default())
    }

    async fn run_to_end(h: &Harness, task: Task) -> (Task, Vec<ExecutionEvent>) {
        let mut sub = h.orchestrator.bus().subscribe(&task.id);
        let handle = h.orchestrator.start(task).unwrap();
        let task = handle.wait().await.unwrap();
        (task, sub.drain())
    }

    fn types(events: &[ExecutionEvent]) -> Vec<&'static str> {
        events.iter().map(ExecutionEvent::event_type).collect()
    }

    fn action_events(events: &[ExecutionEvent]) -> Vec<&ActionCompleted> {
        events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::ActionCompleted(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn case_completed(events: &[ExecutionEvent]) -> Vec<&TestCaseCompleted> {
        events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::TestCaseCompleted(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    fn crash_events(events: &[ExecutionEvent]) -> Vec<&CrashDetected> {
        events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::CrashDetected(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    fn no_settle(settings: &mut Settings) {
        settings.runner.settle_delays = false;
        settings.detector.poll_interval_ms = 2000;
    }

    async fn next_action(sub: &mut Subscription, at: Coordinate) {
        while let Some(event) = sub.recv().await {
            if event.coordinate() == Some(at) && event.event_type() == "action_completed" {
                return;
            }
        }
        panic!("stream ended before {at}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_without_crash() {
        let h = harness(
            FakeBridge::new(),
            vec![case(
                "browse",
                vec![tap(100, 200), type_text("hello"), ActionSpec::new("Back", "back")],
            )],
        );

        let (task, events) = run_to_end(&h, task()).await;

        assert_eq!(
            types(&events),
            vec![
                "task_started",
                "generating_test_cases",
                "test_cases_generated",
                "test_case_started",
                "action_completed",
                "action_completed",
                "action_completed",
                "action_completed",
                "test_case_completed",
                "task_completed",
            ]
        );
        assert_eq!(events[2], ExecutionEvent::TestCasesGenerated { count: 1 });
        assert!(matches!(
            &events[3],
            ExecutionEvent::TestCaseStarted(s) if s.index == 1 && s.total == 1
        ));

        let actions = action_events(&events);
        assert_eq!(actions[0].action_index, -1);
        assert_eq!(actions[0].action.action_type, "Launch");
        assert_eq!(
            actions[0].screenshot_url.as_deref(),
            Some("/screenshots/t1/test_0_start.png")
        );
        assert!(actions.iter().all(|a| a.status == ActionStatus::Completed));
        assert_eq!(
            actions[2].screenshot_url.as_deref(),
            Some("/screenshots/t1/test_0_action_1.png")
        );

        let completed = case_completed(&events)[0];
        assert_eq!(
            (
                completed.total_actions,
                completed.success_count,
                completed.failed_count,
                completed.crash_count
            ),
            (3, 3, 0, 0)
        );
        assert_eq!(
            completed.final_screenshot_url.as_deref(),
            Some("/screenshots/t1/test_0_final.png")
        );

        assert_eq!(
            events.last(),
            Some(&ExecutionEvent::TaskCompleted {
                summary: TaskSummary {
                    total: 1,
                    passed: 1,
                    failed: 0,
                    crashes: 0
                }
            })
        );

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.test_cases.len(), 1);
        assert!(!h.orchestrator.is_running("t1"));

        let executions = h.store.executions();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[1].status, TaskStatus::Completed);
        assert_eq!(h.store.results()[0].summary.passed, 1);
        assert_eq!(h.store.last_task().unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_action_does_not_stop_case() {
        let h = harness(
            FakeBridge::new().fail_on_tap(Point::new(10, 10)),
            vec![case("tap twice", vec![tap(10, 10), tap(20, 20)])],
        );

        let (task, events) = run_to_end(&h, task()).await;

        let actions = action_events(&events);
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[1].status, ActionStatus::Failed);
        assert!(!actions[1].success);
        assert_eq!(actions[2].status, ActionStatus::Completed);
        assert_eq!(
            h.bridge.count_calls(|c| *c == BridgeCall::Tap(Point::new(20, 20))),
            1
        );

        let completed = case_completed(&events)[0];
        assert_eq!(completed.failed_count, 1);
        assert_eq!(completed.success_count, 1);
        assert_eq!(completed.total_actions, 2);

        // A failed action still completes the task, but the case fails
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::TaskCompleted { summary }) if summary.failed == 1 && summary.passed == 0
        ));
        assert_eq!(h.store.executions()[1].status, TaskStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_is_attributed_to_current_action() {
        let h = harness(
            FakeBridge::new().crash_on_tap(Point::new(300, 400), managed_crash_log(PKG)),
            vec![case(
                "crash on second tap",
                vec![tap(100, 100), tap(300, 400), ActionSpec::new("Back", "back")],
            )],
        );

        let (_task, events) = run_to_end(&h, task()).await;

        let crashes = crash_events(&events);
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].coordinate(), Some(Coordinate::new(0, 1)));
        assert_eq!(crashes[0].total_crashes, 1);
        assert_eq!(crashes[0].crash.crash_type, CrashType::ManagedException);
        assert_eq!(
            crashes[0].screenshot_url.as_deref(),
            Some("/screenshots/t1/crash_0_1.png")
        );

        // crash_detected precedes the crashed action's completion
        let crash_pos = events
            .iter()
            .position(|e| e.event_type() == "crash_detected")
            .unwrap();
        let crashed_pos = events
            .iter()
            .position(|e| {
                matches!(e, ExecutionEvent::ActionCompleted(a) if a.status == ActionStatus::Crashed)
            })
            .unwrap();
        assert!(crash_pos < crashed_pos);

        let actions = action_events(&events);
        assert_eq!(actions[2].coordinate(), Coordinate::new(0, 1));
        assert_eq!(actions[2].status, ActionStatus::Crashed);
        assert_eq!(actions[3].status, ActionStatus::Completed);

        let completed = case_completed(&events)[0];
        assert_eq!(completed.crash_count, 1);
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::TaskCompleted { summary }) if summary.crashes == 1
        ));

        let records = h.store.crashes();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_first_case() {
        let cases = (0..3)
            .map(|i| case(&format!("case {i}"), vec![tap(1, 1), tap(2, 2), tap(3, 3)]))
            .collect();
        let h = harness(FakeBridge::new(), cases);

        let mut sub = h.orchestrator.bus().subscribe("t1");
        let handle = h.orchestrator.start(task()).unwrap();

        next_action(&mut sub, Coordinate::new(0, 0)).await;
        h.orchestrator.stop("t1").unwrap();
        assert!(handle.is_cancelled());

        let task = handle.wait().await.unwrap();
        let events = sub.drain();

        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(events
            .iter()
            .filter_map(ExecutionEvent::coordinate)
            .all(|c| c.test_case_index == 0));
        assert_eq!(case_completed(&events).len(), 1);
        assert_eq!(
            events.last(),
            Some(&ExecutionEvent::task_failed(CANCELLED_ERROR))
        );
        assert_eq!(h.store.results()[0].status, TaskStatus::Cancelled);
        assert!(matches!(
            h.orchestrator.stop("t1"),
            Err(Error::NotRunning { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_live_task() {
        let h = harness(FakeBridge::new(), vec![case("one", vec![tap(1, 1)])]);

        let handle = h.orchestrator.start(task()).unwrap();
        assert!(h.orchestrator.is_running("t1"));
        assert!(matches!(
            h.orchestrator.start(task()),
            Err(Error::AlreadyRunning { .. })
        ));

        handle.wait().await.unwrap();
        assert!(!h.orchestrator.is_running("t1"));

        // The same id may run again once finished
        h.orchestrator.start(task()).unwrap().wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_device_fails_run() {
        let h = harness(
            FakeBridge::new().with_devices(vec![]),
            vec![case("one", vec![tap(1, 1)])],
        );

        let (task, events) = run_to_end(&h, task()).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(types(&events), vec!["task_started", "task_failed"]);
        assert_eq!(
            events[1],
            ExecutionEvent::task_failed(Error::NoDevice.to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failure_fails_run() {
        let h = harness(FakeBridge::new(), vec![]);

        let (task, events) = run_to_end(&h, task()).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            types(&events),
            vec!["task_started", "generating_test_cases", "task_failed"]
        );
        assert_eq!(h.bridge.count_calls(|c| matches!(c, BridgeCall::Launch { .. })), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_cases_skip_generation() {
        let h = harness(FakeBridge::new(), vec![]);
        let task = task().with_test_cases(vec![case("cached", vec![tap(1, 1)])]);

        let (task, events) = run_to_end(&h, task).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(!types(&events).contains(&"generating_test_cases"));
        assert_eq!(events[1], ExecutionEvent::TestCasesGenerated { count: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_does_not_stop_run() {
        let h = harness(FakeBridge::new(), vec![case("one", vec![tap(1, 1)])]);
        h.store.set_failing(true);

        let (task, events) = run_to_end(&h, task()).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(events.last().map(ExecutionEvent::event_type), Some("task_completed"));
        assert!(h.store.tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_on_last_action_is_counted() {
        let h = harness_with(
            FakeBridge::new().crash_on_tap(Point::new(300, 400), managed_crash_log(PKG)),
            vec![case("crash last", vec![tap(100, 100), tap(300, 400)])],
            no_settle,
        );

        let (task, events) = run_to_end(&h, task()).await;

        let crashes = crash_events(&events);
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].coordinate(), Some(Coordinate::new(0, 1)));

        let actions = action_events(&events);
        assert_eq!(actions[2].coordinate(), Coordinate::new(0, 1));
        assert_eq!(actions[2].status, ActionStatus::Crashed);

        let completed = case_completed(&events)[0];
        assert_eq!(completed.crash_count, 1);
        assert!(!completed.passed());

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(
            events.last(),
            Some(&ExecutionEvent::TaskCompleted {
                summary: TaskSummary {
                    total: 1,
                    passed: 0,
                    failed: 1,
                    crashes: 1
                }
            })
        );
        assert_eq!(h.store.executions()[1].status, TaskStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_on_last_action_stays_with_its_case() {
        let h = harness_with(
            FakeBridge::new().crash_on_tap(Point::new(300, 400), managed_crash_log(PKG)),
            vec![
                case("crash last", vec![tap(100, 100), tap(300, 400)]),
                case("clean", vec![tap(5, 5)]),
            ],
            no_settle,
        );

        let (_task, events) = run_to_end(&h, task()).await;

        let crashes = crash_events(&events);
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].coordinate(), Some(Coordinate::new(0, 1)));

        // Reported before case 0 closes
        let crash_pos = events
            .iter()
            .position(|e| e.event_type() == "crash_detected")
            .unwrap();
        let first_close = events
            .iter()
            .position(|e| e.event_type() == "test_case_completed")
            .unwrap();
        assert!(crash_pos < first_close);

        let completed = case_completed(&events);
        assert_eq!(completed[0].crash_count, 1);
        assert!(!completed[0].passed());
        assert_eq!(completed[1].crash_count, 0);
        assert!(completed[1].passed());

        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::TaskCompleted { summary })
                if summary.passed == 1 && summary.failed == 1 && summary.crashes == 1
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_case_error_moves_to_next_case() {
        let h = harness(
            FakeBridge::new().fail_launches(),
            vec![case("one", vec![tap(1, 1)]), case("two", vec![tap(2, 2)])],
        );

        let (task, events) = run_to_end(&h, task()).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(case_completed(&events).len(), 2);
        assert_eq!(h.bridge.count_calls(|c| matches!(c, BridgeCall::Tap(_))), 0);

        // Only the failed launch slots are reported
        let actions = action_events(&events);
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| a.action_index == -1 && !a.success));

        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::TaskCompleted { summary })
                if summary.failed == 2 && summary.passed == 0
        ));
        let executions = h.store.executions();
        assert!(executions[1].error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_case_error_ends_run() {
        let h = harness(
            FakeBridge::new().lose_bridge_on_stop(),
            vec![case("one", vec![tap(1, 1)]), case("two", vec![tap(2, 2)])],
        );

        let (task, events) = run_to_end(&h, task()).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            types(&events),
            vec![
                "task_started",
                "generating_test_cases",
                "test_cases_generated",
                "test_case_started",
                "test_case_completed",
                "task_failed",
            ]
        );
        assert_eq!(
            events.last(),
            Some(&ExecutionEvent::task_failed(Error::BridgeNotFound.to_string()))
        );
        assert_eq!(h.bridge.count_calls(|c| matches!(c, BridgeCall::Launch { .. })), 0);

        let results = h.store.results();
        assert_eq!(results[0].status, TaskStatus::Failed);
        assert_eq!(results[0].summary.failed, 1);
        assert!(!h.orchestrator.is_running("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_path_like_task_id() {
        let h = harness(FakeBridge::new(), vec![case("one", vec![tap(1, 1)])]);

        let err = tokio_test::assert_err!(h
            .orchestrator
            .start(Task::new("../x", PKG, "a shop", RunConfig::default())));
        assert!(matches!(err, Error::InvalidTaskId { .. }));
        assert!(!h.orchestrator.is_running("../x"));
        assert!(h.store.tasks().is_empty());
    }

    #[test]
    fn test_new_task_ids_differ() {
        let a = new_task_id();
        assert_ne!(a, new_task_id());

        let parts: Vec<&str> = a.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "task");
        assert_eq!(parts[1].len(), 14);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
        assert!(validate_task_id(&a).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relaunch_sequence() {
        let h = harness(FakeBridge::new(), vec![case("one", vec![])]);

        run_to_end(&h, task()).await;

        let calls: Vec<BridgeCall> = h
            .bridge
            .calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    BridgeCall::Stop(_) | BridgeCall::Launch { .. } | BridgeCall::DumpLog { clear: true }
                )
            })
            .collect();
        assert_eq!(
            calls,
            vec![
                BridgeCall::Stop(PKG.to_string()),
                BridgeCall::Launch {
                    package: PKG.to_string(),
                    activity: None
                },
                BridgeCall::DumpLog { clear: true },
            ]
        );
    }
}
