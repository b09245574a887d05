//! Action executor
//!
//! Maps one abstract fuzz action onto device bridge calls. Execution never
//! panics and never retries: every failure, including an unknown action tag,
//! comes back as a failed [`ActionOutcome`].

use std::sync::Arc;
use std::time::Duration;

use flowfuzz_bridge::{DeviceBridge, KEYCODE_BACK, KEYCODE_HOME};
use flowfuzz_core::action::SWIPE_DURATION;
use flowfuzz_core::prelude::*;
use flowfuzz_core::{Action, ActionSpec};
use tokio::time::Instant;

/// Result of executing one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl ActionOutcome {
    fn from_result(result: Result<()>, elapsed: Duration) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                error: None,
                elapsed,
            },
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
                elapsed,
            },
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// Executes actions against the app under test
pub struct ActionExecutor<B> {
    bridge: Arc<B>,
}

impl<B> Clone for ActionExecutor<B> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
        }
    }
}

impl<B: DeviceBridge + Sync> ActionExecutor<B> {
    pub fn new(bridge: Arc<B>) -> Self {
        Self { bridge }
    }

    /// Convert a generated action record and execute it
    pub async fn execute_spec(&self, spec: &ActionSpec, package: &str) -> ActionOutcome {
        match Action::try_from(spec) {
            Ok(action) => self.execute(&action, package).await,
            Err(e) => {
                warn!("Skipping action '{}': {}", spec.action, e);
                ActionOutcome::from_result(Err(e), Duration::ZERO)
            }
        }
    }

    /// Execute one action
    pub async fn execute(&self, action: &Action, package: &str) -> ActionOutcome {
        let started = Instant::now();
        let result = self.dispatch(action, package).await;
        let outcome = ActionOutcome::from_result(result, started.elapsed());

        match &outcome.error {
            None => debug!("{} completed in {:?}", action.kind(), outcome.elapsed),
            Some(e) => warn!("{} failed: {}", action.kind(), e),
        }
        outcome
    }

    async fn dispatch(&self, action: &Action, package: &str) -> Result<()> {
        match action {
            Action::Launch { activity } => self.bridge.launch(package, activity.as_deref()).await,
            Action::Tap { at } => self.bridge.tap(*at).await,
            Action::Type { text } => self.bridge.type_text(text).await,
            Action::Swipe { from, to } => self.bridge.swipe(*from, *to, SWIPE_DURATION).await,
            Action::Back => self.bridge.key_event(KEYCODE_BACK).await,
            Action::Home => self.bridge.key_event(KEYCODE_HOME).await,
            Action::LongPress { at, hold } => self.bridge.swipe(*at, *at, *hold).await,
            Action::Wait { duration } => {
                tokio::time::sleep(*duration).await;
                Ok(())
            }
        }
    }
}
