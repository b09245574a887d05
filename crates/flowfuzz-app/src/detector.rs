//! Crash/freeze detector
//!
//! A fixed-interval polling task that dumps the device log, classifies it
//! against the known fault signatures and sends one [`CrashReport`] per
//! distinct occurrence to the orchestrator.
//!
//! **Classification order** (first match wins, one report per tick):
//! 1. managed-runtime fatal exception
//! 2. native fault
//! 3. application freeze for the target package
//! 4. process-liveness fallback, reported as `process_dead`
//!
//! The liveness fallback only runs while an action coordinate is published.
//! During the forced stop and relaunch the position is cleared, so the
//! intentional stop is never reported.
//!
//! **Dedup:** a report whose `(type, stack prefix)` equals the immediately
//! preceding report is suppressed, because the log lines of a crash persist
//! until the log is cleared. A clean tick forgets the previous report.
//!
//! **Flush:** [`CrashDetector::flush`] runs one tick on the caller's task.
//! The orchestrator flushes before completing an action and before closing a
//! case, so a fault never waits for the next interval to be attributed.
//! Ticks and flushes share one classifier, so dedup holds across both.

use std::sync::Arc;

use flowfuzz_bridge::DeviceBridge;
use flowfuzz_core::crash::{log_tail, CrashReport, CrashType, LogDialect, SignatureMatch};
use flowfuzz_core::prelude::*;
use flowfuzz_core::Coordinate;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::DetectorSettings;
use crate::position::CurrentPosition;

// ─────────────────────────────────────────────────────────────────────────────
// Classifier state
// ─────────────────────────────────────────────────────────────────────────────

/// Per-run classification state, free of timers and device calls
#[derive(Debug, Clone)]
pub struct CrashClassifier {
    package: String,
    settings: DetectorSettings,
    dialect: LogDialect,
    last_reported: Option<(CrashType, String)>,
}

impl CrashClassifier {
    pub fn new(package: impl Into<String>, settings: DetectorSettings) -> Self {
        Self {
            package: package.into(),
            settings,
            dialect: LogDialect::default(),
            last_reported: None,
        }
    }

    /// Read dumps in the given log format instead of logcat
    pub fn with_dialect(mut self, dialect: LogDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    fn classify(&self, log: &str) -> Option<SignatureMatch> {
        self.dialect.classify(log, &self.package)
    }

    /// Classify one log dump
    ///
    /// `alive` is the liveness check result, or `None` when it was skipped.
    pub fn observe(
        &mut self,
        log: &str,
        alive: Option<bool>,
        coordinate: Option<Coordinate>,
    ) -> Option<CrashReport> {
        let signature = self.classify(log);
        self.evaluate(signature, log, alive, coordinate)
    }

    fn evaluate(
        &mut self,
        signature: Option<SignatureMatch>,
        log: &str,
        alive: Option<bool>,
        coordinate: Option<Coordinate>,
    ) -> Option<CrashReport> {
        let report = match signature {
            Some(signature) => CrashReport::from_match(signature, &self.package, ""),
            None if alive == Some(false) => {
                CrashReport::new(CrashType::ProcessDead, &self.package, "")
            }
            None => {
                self.last_reported = None;
                return None;
            }
        };

        let key = report.dedup_key(self.settings.dedup_prefix_chars);
        if self.last_reported.as_ref() == Some(&key) {
            trace!("Suppressing repeated {} report", key.0);
            return None;
        }
        self.last_reported = Some(key);

        let mut report = report.with_coordinate(coordinate);
        report.log_tail = log_tail(log, self.settings.log_tail_bytes).to_string();
        Some(report)
    }
}

/// Run one detection tick against the device
///
/// The coordinate is read after the log dump, so a report carries the action
/// that was current when the fault became visible.
pub async fn poll_once<B: DeviceBridge>(
    bridge: &B,
    classifier: &mut CrashClassifier,
    position: &CurrentPosition,
) -> Result<Option<CrashReport>> {
    let log = bridge.dump_log(false).await?;
    let coordinate = position.get();
    let signature = classifier.classify(&log);

    let alive = match (&signature, coordinate) {
        (None, Some(_)) => Some(bridge.is_running(classifier.package()).await?),
        _ => None,
    };

    Ok(classifier.evaluate(signature, &log, alive, coordinate))
}

// ─────────────────────────────────────────────────────────────────────────────
// Polling task
// ─────────────────────────────────────────────────────────────────────────────

/// Background crash detector bound to one run
///
/// `Idle → Polling → Idle`; [`start`](Self::start) and [`stop`](Self::stop)
/// are idempotent. Once `stop` returns the polling task has finished and its
/// sender is dropped, so no further report arrives.
pub struct CrashDetector<B> {
    bridge: Arc<B>,
    package: String,
    settings: DetectorSettings,
    position: CurrentPosition,
    classifier: Arc<Mutex<CrashClassifier>>,
    report_tx: Option<mpsc::UnboundedSender<CrashReport>>,
    task: Option<(JoinHandle<()>, watch::Sender<bool>)>,
}

impl<B: DeviceBridge + Sync + 'static> CrashDetector<B> {
    /// Create an idle detector and the receiving end of its report channel
    pub fn new(
        bridge: Arc<B>,
        package: impl Into<String>,
        settings: DetectorSettings,
        position: CurrentPosition,
    ) -> (Self, mpsc::UnboundedReceiver<CrashReport>) {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let package = package.into();
        let classifier = CrashClassifier::new(package.clone(), settings.clone())
            .with_dialect(bridge.log_dialect());
        let detector = Self {
            bridge,
            package,
            settings,
            position,
            classifier: Arc::new(Mutex::new(classifier)),
            report_tx: Some(report_tx),
            task: None,
        };
        (detector, report_rx)
    }

    pub fn is_polling(&self) -> bool {
        self.task.is_some()
    }

    /// Spawn the polling task
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let Some(report_tx) = self.report_tx.clone() else {
            warn!("Crash detector for {} was already stopped", self.package);
            return;
        };

        let interval = self.settings.poll_interval();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let bridge = Arc::clone(&self.bridge);
        let position = self.position.clone();
        let classifier = Arc::clone(&self.classifier);

        info!(
            "Crash detector polling {} every {:?}",
            self.package, interval
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; start polling one interval in
            ticker.tick().await;

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }

                    _ = ticker.tick() => {
                        let mut guard = classifier.lock().await;
                        let polled = poll_once(&*bridge, &mut guard, &position).await;
                        if !forward(polled, &report_tx) {
                            // Orchestrator went away
                            break;
                        }
                    }
                }
            }
        });

        self.task = Some((handle, shutdown_tx));
    }

    /// Run one detection tick now, queueing any report on the channel
    ///
    /// Does nothing once the detector is stopped. Returns whether a report
    /// was queued.
    pub async fn flush(&self) -> bool {
        let Some(report_tx) = &self.report_tx else {
            return false;
        };
        let mut classifier = self.classifier.lock().await;
        let polled = poll_once(&*self.bridge, &mut classifier, &self.position).await;
        let found = matches!(polled, Ok(Some(_)));
        forward(polled, report_tx) && found
    }

    /// Stop polling and wait for the task to finish
    pub async fn stop(&mut self) {
        self.report_tx = None;
        let Some((handle, shutdown_tx)) = self.task.take() else {
            return;
        };

        let _ = shutdown_tx.send(true);
        handle.abort();
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Crash detector task ended abnormally: {}", e),
        }
        debug!("Crash detector for {} stopped", self.package);
    }
}

/// Queue the outcome of one tick; false once the receiver is gone
fn forward(
    polled: Result<Option<CrashReport>>,
    report_tx: &mpsc::UnboundedSender<CrashReport>,
) -> bool {
    match polled {
        Ok(Some(report)) => {
            info!("Crash detected: {}", report.summary());
            report_tx.send(report).is_ok()
        }
        Ok(None) => true,
        Err(e) if e.is_recoverable() => {
            // Transient bridge errors; the next tick retries
            debug!("Crash poll failed: {}", e);
            true
        }
        Err(e) => {
            warn!("Crash poll failed: {}", e);
            true
        }
    }
}
