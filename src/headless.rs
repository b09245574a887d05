//! Headless run - SSE event output on stdout
//!
//! Runs one task against the attached device and writes every execution
//! event to stdout as a `data: <json>\n\n` frame, the same format a live
//! client receives. Logs go to the log file, progress notes to stderr.
//!
//! # Example Output
//!
//! ```text
//! data: {"type":"task_started"}
//!
//! data: {"type":"test_cases_generated","count":2}
//!
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowfuzz_app::config::{load_settings, Settings};
use flowfuzz_app::{new_task_id, EventBus, FileGenerator, JsonFileStore, Orchestrator};
use flowfuzz_bridge::PlatformBridge;
use flowfuzz_core::prelude::*;
use flowfuzz_core::{encode_frame, ExecutionEvent, RunConfig, Task};

use crate::signals::spawn_signal_handler;

/// Options of `flowfuzz run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub app: String,
    pub cases: PathBuf,
    pub description: String,
    pub task_id: Option<String>,
    pub depth: Option<usize>,
    pub focus_areas: Vec<String>,
    pub serial: Option<String>,
}

/// Resolve relative output directories against the project
pub fn resolve_settings(project: &Path, mut settings: Settings) -> Settings {
    settings.output.screenshots_dir = project.join(&settings.output.screenshots_dir);
    settings.output.records_dir = project.join(&settings.output.records_dir);
    settings
}

/// Run a task and stream its events to stdout; returns the final task
pub async fn run_headless(project: &Path, options: RunOptions) -> Result<Task> {
    let mut settings = resolve_settings(project, load_settings(project));
    if options.serial.is_some() {
        settings.bridge.serial = options.serial.clone();
    }

    info!("═══════════════════════════════════════════════════════");
    info!("flowfuzz starting a HEADLESS run");
    info!("Target: {}", options.app);
    info!("Cases: {}", options.cases.display());
    info!("═══════════════════════════════════════════════════════");

    let bridge = PlatformBridge::connect(settings.bridge.clone())
        .with_context(|| format!("No {} bridge", settings.bridge.platform.tool()))?;
    let bridge = Arc::new(bridge);
    let generator = Arc::new(FileGenerator::new(&options.cases));
    let store = Arc::new(JsonFileStore::new(&settings.output.records_dir));
    let bus = Arc::new(EventBus::new(settings.bus.subscriber_capacity));

    let config = RunConfig {
        test_depth: options.depth.unwrap_or(settings.runner.test_depth),
        focus_areas: options.focus_areas.clone(),
    };
    let task = Task::new(
        options.task_id.clone().unwrap_or_else(new_task_id),
        &options.app,
        &options.description,
        config,
    );
    eprintln!("Task {}", task.id);

    let orchestrator = Orchestrator::new(bridge, generator, store, Arc::clone(&bus), settings);
    let mut events = bus.subscribe(&task.id);
    let handle = orchestrator.start(task).context("Could not start run")?;
    spawn_signal_handler(handle.cancel_token());

    while let Some(event) = events.recv().await {
        emit(&event);
        if event.is_terminal() {
            break;
        }
    }

    let task = handle.wait().await?;
    info!("Headless run for {} ended: {}", task.id, task.status);
    Ok(task)
}

/// Write one event frame to stdout
pub fn emit(event: &ExecutionEvent) {
    let frame = match encode_frame(event) {
        Ok(frame) => frame,
        Err(e) => {
            error!("Failed to serialize {} event: {}", event.event_type(), e);
            return;
        }
    };

    let mut stdout = io::stdout().lock();
    if let Err(e) = stdout.write_all(frame.as_bytes()) {
        error!("Failed to write event to stdout: {}", e);
        return;
    }

    // Flush so a piped consumer sees each frame immediately
    if let Err(e) = stdout.flush() {
        error!("Failed to flush stdout: {}", e);
    }
}
