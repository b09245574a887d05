//! flowfuzz-app - Run orchestration for flowfuzz
//!
//! Drives a fuzz task against a device: generates or loads test cases,
//! executes their actions through the device bridge, polls for crashes,
//! publishes every step on a per-task event bus and rebuilds the execution
//! flow graph from that stream.

pub mod bus;
pub mod config;
pub mod detector;
pub mod executor;
pub mod flow;
pub mod generator;
pub mod orchestrator;
pub mod position;
pub mod screenshots;
pub mod store;

// Re-export primary types
pub use bus::{EventBus, SubscriberId, Subscription};
pub use config::Settings;
pub use detector::{poll_once, CrashClassifier, CrashDetector};
pub use executor::{ActionExecutor, ActionOutcome};
pub use flow::{apply, project, FlowGraph, FlowState};
pub use generator::{FileGenerator, GenerationRequest, StaticGenerator, TestCaseGenerator};
pub use orchestrator::{new_task_id, Orchestrator, RunHandle, CANCELLED_ERROR};
pub use position::CurrentPosition;
pub use screenshots::ScreenshotManager;
pub use store::{JsonFileStore, MemoryStore, TaskStore};
