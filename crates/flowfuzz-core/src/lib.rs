//! # flowfuzz-core - Core Domain Types
//!
//! Foundation crate for flowfuzz. Provides domain types, error handling,
//! execution events, crash signatures and stream framing.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Task`] - A submitted fuzz task and its lifecycle [`TaskStatus`]
//! - [`TestCase`] - An ordered list of generated actions
//! - [`Coordinate`] - (test case, action) slot of one executed action
//! - [`ActionStatus`] - Outcome status of one executed action
//!
//! ### Actions (`action`)
//! - [`ActionSpec`] - String-tagged action record as produced by the generator
//! - [`Action`] - Closed sum type the executor matches on
//! - [`ActionKind`] - Action tag with its settle delay
//!
//! ### Events (`events`)
//! - [`ExecutionEvent`] - Tagged union of everything a run emits
//!
//! ### Crashes (`crash`)
//! - [`CrashReport`] - Structured crash report
//! - [`classify()`] - Fault-signature classifier over a logcat dump
//! - [`classify_hilog()`], [`LogDialect`] - The same over a HarmonyOS hilog dump
//!
//! ### Stream Framing (`stream`)
//! - [`encode_frame()`] - `data: <json>\n\n` frame encoding
//! - [`SseDecoder`] - Incremental frame decoder
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use flowfuzz_core::prelude::*;
//! ```

pub mod action;
pub mod crash;
pub mod error;
pub mod events;
pub mod logging;
pub mod prelude;
pub mod stream;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use action::{Action, ActionKind, ActionParams, ActionSpec, Direction, Point};
pub use crash::{
    classify, classify_hilog, CrashReport, CrashSeverity, CrashType, LogDialect, SignatureMatch,
};
pub use error::{Error, Result, ResultExt};
pub use events::{
    ActionCompleted, ActionSnapshot, CrashDetected, ExecutionEvent, TaskSummary, TestCaseCompleted,
    TestCaseStarted,
};
pub use stream::{decode_all, encode_frame, SseDecoder};
pub use types::{
    validate_task_id, ActionStatus, Coordinate, CrashLikelihood, RunConfig, Task, TaskId,
    TaskStatus, TestCase, LAUNCH_ACTION_INDEX,
};
