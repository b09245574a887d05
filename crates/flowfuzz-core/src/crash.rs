//! Crash reports and device-log fault signatures
//!
//! [`classify`] scans a logcat dump for the fault classes the detector knows
//! about, in priority order:
//!
//! 1. managed-runtime fatal exception (`AndroidRuntime: FATAL EXCEPTION`)
//! 2. native fault (`Fatal signal N (SIGxxx)` with an optional tombstone backtrace)
//! 3. application freeze (`ANR in <package>`)
//!
//! [`classify_hilog`] does the same for a HarmonyOS `hilog` dump: a
//! `JS ERROR` block with its `Stacktrace:`, then `Fatal signal` with its
//! `backtrace:`, then an `AppFreeze` event. [`LogDialect`] picks between them.
//!
//! The process-liveness fallback needs a device call and lives in the detector.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Coordinate;

/// Number of trailing log bytes kept on a crash report
pub const LOG_TAIL_BYTES: usize = 5000;

/// Maximum stack lines captured for one signature
const MAX_STACK_LINES: usize = 64;

/// `-v time` prefix: `01-02 03:04:05.678 E/AndroidRuntime( 1234): `
static TIME_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d+\s+[VDIWEF]/[^(]*\(\s*\d+\):\s?")
        .expect("Invalid logcat time prefix regex")
});

/// `-v threadtime` prefix: `01-02 03:04:05.678  1234  1250 E AndroidRuntime: `
static THREADTIME_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d+\s+\d+\s+\d+\s+[VDIWEF]\s+[^:]*:\s?")
        .expect("Invalid logcat threadtime prefix regex")
});

static FATAL_SIGNAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Fatal signal \d+ \((SIG[A-Z]+)\)").expect("Invalid fatal signal regex")
});

static SIGNAL_PID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pid \d+ \(([^)]+)\)").expect("Invalid signal pid regex"));

static NATIVE_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\d+\s+pc\s+[0-9a-fA-F]+").expect("Invalid backtrace regex"));

static ANR_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ANR in (\S+)").expect("Invalid ANR regex"));

static PROCESS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Process: ([^,\s]+)").expect("Invalid process regex"));

static JS_MODULE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Module name:\s*([\w.:]+)").expect("Invalid JS module regex")
});

/// Bundle named by an `AppFreeze` event (`bundleName:x`, `PACKAGE_NAME = x`)
static FREEZE_BUNDLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:bundleName|BUNDLE_NAME|PACKAGE_NAME)\s*[:=]\s*([\w.:]+)")
        .expect("Invalid freeze bundle regex")
});

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Fault class of a detected crash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashType {
    /// Native fault (signal + tombstone)
    Native,
    /// Application not responding / freeze
    Anr,
    /// Uncaught managed-runtime (Java/Kotlin) exception
    ManagedException,
    /// Target process disappeared without a recognised signature
    ProcessDead,
}

impl CrashType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrashType::Native => "native",
            CrashType::Anr => "anr",
            CrashType::ManagedException => "managed_exception",
            CrashType::ProcessDead => "process_dead",
        }
    }

    pub fn severity(&self) -> CrashSeverity {
        match self {
            CrashType::Native | CrashType::ManagedException => CrashSeverity::Critical,
            CrashType::Anr => CrashSeverity::High,
            CrashType::ProcessDead => CrashSeverity::Medium,
        }
    }
}

impl std::fmt::Display for CrashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrashSeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// A fault signature found in a log dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMatch {
    pub crash_type: CrashType,
    pub stack_trace: Option<String>,
}

/// A structured crash report
///
/// `coordinate` is the action that was executing when the detector saw the
/// fault. It is a best-effort correlation, not proof of causality: a delayed
/// freeze can surface while a later action is current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashReport {
    #[serde(rename = "type")]
    pub crash_type: CrashType,

    pub timestamp: DateTime<Utc>,

    /// Package of the application under test
    pub package: String,

    pub severity: CrashSeverity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    /// Last [`LOG_TAIL_BYTES`] of the log dump
    #[serde(default)]
    pub log_tail: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
}

impl CrashReport {
    pub fn new(crash_type: CrashType, package: impl Into<String>, log: &str) -> Self {
        Self {
            crash_type,
            timestamp: Utc::now(),
            package: package.into(),
            severity: crash_type.severity(),
            stack_trace: None,
            log_tail: log_tail(log, LOG_TAIL_BYTES).to_string(),
            coordinate: None,
        }
    }

    /// Build a report from a signature match
    pub fn from_match(signature: SignatureMatch, package: impl Into<String>, log: &str) -> Self {
        let mut report = Self::new(signature.crash_type, package, log);
        report.stack_trace = signature.stack_trace;
        report
    }

    pub fn with_coordinate(mut self, coordinate: Option<Coordinate>) -> Self {
        self.coordinate = coordinate;
        self
    }

    /// Identity used to suppress re-reporting a fault whose log lines persist
    pub fn dedup_key(&self, stack_prefix_chars: usize) -> (CrashType, String) {
        let prefix = self
            .stack_trace
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(stack_prefix_chars)
            .collect();
        (self.crash_type, prefix)
    }

    /// One-line description for logs and CLI output
    pub fn summary(&self) -> String {
        let first = self
            .stack_trace
            .as_deref()
            .and_then(|s| s.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("no stack trace");
        format!("[{}] {}: {}", self.crash_type, self.package, first)
    }
}

/// Format of the device log a bridge dumps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDialect {
    /// Android `logcat`
    #[default]
    Logcat,
    /// HarmonyOS `hilog`
    Hilog,
}

impl LogDialect {
    /// Classify a dump written in this dialect
    pub fn classify(&self, log: &str, package: &str) -> Option<SignatureMatch> {
        match self {
            LogDialect::Logcat => classify(log, package),
            LogDialect::Hilog => classify_hilog(log, package),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Classify a log dump for the given target package
///
/// Returns the highest-priority signature found, or `None` if the log is clean.
pub fn classify(log: &str, package: &str) -> Option<SignatureMatch> {
    let lines: Vec<&str> = log.lines().map(strip_logcat_prefix).collect();

    find_managed_exception(&lines, package)
        .or_else(|| find_native_fault(&lines, package))
        .or_else(|| find_anr(&lines, package))
}

/// Classify a `hilog` dump for the given bundle
///
/// hilog lines share the threadtime layout (`MM-DD hh:mm:ss.mmm pid tid L
/// domain/tag: msg`), so the same prefix stripping applies.
pub fn classify_hilog(log: &str, bundle: &str) -> Option<SignatureMatch> {
    let lines: Vec<&str> = log.lines().map(strip_logcat_prefix).collect();

    find_js_error(&lines, bundle)
        .or_else(|| find_native_fault(&lines, bundle))
        .or_else(|| find_app_freeze(&lines, bundle))
}

/// Strip the logcat timestamp/tag prefix from a line, if present
pub fn strip_logcat_prefix(line: &str) -> &str {
    let line = line.trim_end_matches('\r');
    if let Some(m) = TIME_PREFIX.find(line) {
        return &line[m.end()..];
    }
    if let Some(m) = THREADTIME_PREFIX.find(line) {
        return &line[m.end()..];
    }
    line
}

/// Last `max_bytes` of `log`, cut on a char boundary
pub fn log_tail(log: &str, max_bytes: usize) -> &str {
    if log.len() <= max_bytes {
        return log;
    }
    let mut start = log.len() - max_bytes;
    while !log.is_char_boundary(start) {
        start += 1;
    }
    &log[start..]
}

fn find_managed_exception(lines: &[&str], package: &str) -> Option<SignatureMatch> {
    let mut i = 0;
    while i < lines.len() {
        if !lines[i].contains("FATAL EXCEPTION") {
            i += 1;
            continue;
        }

        let block: Vec<&str> = lines[i + 1..]
            .iter()
            .take_while(|l| !l.trim().is_empty())
            .take(MAX_STACK_LINES)
            .copied()
            .collect();

        // A block naming another process belongs to a different app
        let process = block
            .iter()
            .find_map(|l| PROCESS_LINE.captures(l.trim()))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());

        match process {
            Some(p) if !is_same_process(p, package) => {
                i += 1 + block.len();
            }
            _ => {
                let stack = block
                    .iter()
                    .filter(|l| !PROCESS_LINE.is_match(l.trim()))
                    .copied()
                    .collect::<Vec<_>>()
                    .join("\n");
                return Some(SignatureMatch {
                    crash_type: CrashType::ManagedException,
                    stack_trace: (!stack.is_empty()).then_some(stack),
                });
            }
        }
    }
    None
}

fn find_native_fault(lines: &[&str], package: &str) -> Option<SignatureMatch> {
    // Signal lines naming another process's pid are skipped
    let start = lines.iter().position(|l| {
        FATAL_SIGNAL.is_match(l)
            && SIGNAL_PID
                .captures(l)
                .and_then(|c| c.get(1))
                .map_or(true, |m| is_same_process(m.as_str(), package))
    })?;

    let frames: Vec<&str> = lines[start + 1..]
        .iter()
        .skip_while(|l| !l.contains("backtrace:"))
        .skip(1)
        .filter(|l| NATIVE_FRAME.is_match(l))
        .take(MAX_STACK_LINES)
        .map(|l| l.trim())
        .collect();

    let stack = if frames.is_empty() {
        FATAL_SIGNAL
            .find(lines[start])
            .map(|m| lines[start][m.start()..].trim().to_string())
    } else {
        Some(frames.join("\n"))
    };

    Some(SignatureMatch {
        crash_type: CrashType::Native,
        stack_trace: stack,
    })
}

fn find_anr(lines: &[&str], package: &str) -> Option<SignatureMatch> {
    let start = lines.iter().position(|l| {
        ANR_IN
            .captures(l)
            .and_then(|c| c.get(1))
            .is_some_and(|m| is_same_process(m.as_str(), package))
    })?;

    let reason = lines[start + 1..]
        .iter()
        .take(8)
        .map(|l| l.trim())
        .find(|l| l.starts_with("Reason:"))
        .map(str::to_string);

    Some(SignatureMatch {
        crash_type: CrashType::Anr,
        stack_trace: reason,
    })
}

fn find_js_error(lines: &[&str], bundle: &str) -> Option<SignatureMatch> {
    let mut i = 0;
    while i < lines.len() {
        if !lines[i].contains("JS ERROR") {
            i += 1;
            continue;
        }

        let block: Vec<&str> = lines[i + 1..]
            .iter()
            .take_while(|l| !l.trim().is_empty())
            .take(MAX_STACK_LINES)
            .copied()
            .collect();

        let module = block
            .iter()
            .find_map(|l| JS_MODULE_LINE.captures(l.trim()))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());

        // Only a block that reaches its stack trace is a crash
        let has_stack = block.iter().any(|l| l.trim().starts_with("Stacktrace:"));

        match module {
            Some(m) if !is_same_process(m, bundle) => i += 1 + block.len(),
            _ if !has_stack => i += 1 + block.len(),
            _ => {
                let stack = block
                    .iter()
                    .map(|l| l.trim())
                    .filter(|l| !JS_MODULE_LINE.is_match(l) && *l != "Stacktrace:")
                    .collect::<Vec<_>>()
                    .join("\n");
                return Some(SignatureMatch {
                    crash_type: CrashType::ManagedException,
                    stack_trace: (!stack.is_empty()).then_some(stack),
                });
            }
        }
    }
    None
}

fn find_app_freeze(lines: &[&str], bundle: &str) -> Option<SignatureMatch> {
    let start = lines.iter().position(|l| {
        l.contains("AppFreeze")
            && FREEZE_BUNDLE
                .captures(l)
                .and_then(|c| c.get(1))
                .map_or(true, |m| is_same_process(m.as_str(), bundle))
    })?;

    Some(SignatureMatch {
        crash_type: CrashType::Anr,
        stack_trace: Some(lines[start].trim().to_string()),
    })
}

/// `com.example` matches `com.example` and its sub-processes (`com.example:remote`)
fn is_same_process(process: &str, package: &str) -> bool {
    process == package
        || process
            .strip_prefix(package)
            .is_some_and(|rest| rest.starts_with(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PKG: &str = "com.example.shop";

    const MANAGED_LOG: &str = "\
01-02 03:04:05.100 I/ActivityManager(  600): Start proc com.example.shop
01-02 03:04:06.200 E/AndroidRuntime( 1234): FATAL EXCEPTION: main
01-02 03:04:06.200 E/AndroidRuntime( 1234): Process: com.example.shop, PID: 1234
01-02 03:04:06.200 E/AndroidRuntime( 1234): java.lang.NullPointerException: cart was null
01-02 03:04:06.200 E/AndroidRuntime( 1234): \tat com.example.shop.CartActivity.onResume(CartActivity.kt:42)

01-02 03:04:07.000 I/ActivityManager(  600): Process com.example.shop has died
";

    const NATIVE_LOG: &str = "\
01-02 03:04:05.678  1234  1250 F libc    : Fatal signal 11 (SIGSEGV), code 1, fault addr 0x0 in tid 1250 (RenderThread), pid 1234 (com.example.shop)
01-02 03:04:05.900  1300  1300 F DEBUG   : *** *** *** *** *** *** *** *** *** *** *** *** *** *** *** ***
01-02 03:04:05.901  1300  1300 F DEBUG   : backtrace:
01-02 03:04:05.902  1300  1300 F DEBUG   :       #00 pc 000000000004a1b0  /system/lib64/libc.so (strlen+16)
01-02 03:04:05.903  1300  1300 F DEBUG   :       #01 pc 00000000000123ab  /data/app/libshop.so (render+88)
";

    const ANR_LOG: &str = "\
01-02 03:04:05.000 E/ActivityManager(  600): ANR in com.example.shop (com.example.shop/.MainActivity)
01-02 03:04:05.000 E/ActivityManager(  600): PID: 1234
01-02 03:04:05.000 E/ActivityManager(  600): Reason: Input dispatching timed out
";

    #[test]
    fn test_clean_log_has_no_signature() {
        let log = "01-02 03:04:05.100 I/ActivityManager(  600): Displayed com.example.shop/.Main\n";
        assert_eq!(classify(log, PKG), None);
    }

    #[test]
    fn test_managed_exception_with_stack() {
        let sig = classify(MANAGED_LOG, PKG).expect("should match");
        assert_eq!(sig.crash_type, CrashType::ManagedException);
        let stack = sig.stack_trace.unwrap();
        assert!(stack.starts_with("java.lang.NullPointerException"));
        assert!(stack.contains("CartActivity.kt:42"));
        assert!(!stack.contains("Process:"));
    }

    #[test]
    fn test_managed_exception_of_other_app_is_ignored() {
        let log = MANAGED_LOG.replace("Process: com.example.shop", "Process: com.other.app");
        assert_eq!(classify(&log, PKG), None);
    }

    #[test]
    fn test_managed_exception_wins_over_anr() {
        let log = format!("{ANR_LOG}\n{MANAGED_LOG}");
        let sig = classify(&log, PKG).unwrap();
        assert_eq!(sig.crash_type, CrashType::ManagedException);
    }

    #[test]
    fn test_native_fault_with_backtrace() {
        let sig = classify(NATIVE_LOG, PKG).expect("should match");
        assert_eq!(sig.crash_type, CrashType::Native);
        let stack = sig.stack_trace.unwrap();
        assert!(stack.starts_with("#00 pc"));
        assert_eq!(stack.lines().count(), 2);
    }

    #[test]
    fn test_native_fault_without_backtrace_uses_signal_line() {
        let log = "F libc    : Fatal signal 6 (SIGABRT), code -6 in tid 77 (main)\n";
        let sig = classify(log, PKG).unwrap();
        assert_eq!(sig.crash_type, CrashType::Native);
        assert!(sig.stack_trace.unwrap().starts_with("Fatal signal 6 (SIGABRT)"));
    }

    #[test]
    fn test_anr_for_target_package() {
        let sig = classify(ANR_LOG, PKG).expect("should match");
        assert_eq!(sig.crash_type, CrashType::Anr);
        assert_eq!(
            sig.stack_trace.as_deref(),
            Some("Reason: Input dispatching timed out")
        );
    }

    #[test]
    fn test_anr_for_other_package_is_ignored() {
        assert_eq!(classify(ANR_LOG, "com.example"), None);
        assert_eq!(classify(ANR_LOG, "com.example.shopping"), None);
    }

    #[test]
    fn test_strip_prefix_formats() {
        assert_eq!(
            strip_logcat_prefix("01-02 03:04:06.200 E/AndroidRuntime( 1234): FATAL EXCEPTION: main"),
            "FATAL EXCEPTION: main"
        );
        assert_eq!(
            strip_logcat_prefix("01-02 03:04:05.678  1234  1250 E AndroidRuntime: boom"),
            "boom"
        );
        assert_eq!(strip_logcat_prefix("plain line"), "plain line");
    }

    #[test]
    fn test_log_tail_respects_char_boundaries() {
        let log = "ééééé";
        let tail = log_tail(log, 3);
        assert_eq!(tail, "é");
        assert_eq!(log_tail("short", 100), "short");
    }

    #[test]
    fn test_dedup_key_uses_type_and_stack_prefix() {
        let sig = classify(MANAGED_LOG, PKG).unwrap();
        let a = CrashReport::from_match(sig.clone(), PKG, MANAGED_LOG);
        let b = CrashReport::from_match(sig, PKG, "different tail");
        assert_eq!(a.dedup_key(200), b.dedup_key(200));

        let dead = CrashReport::new(CrashType::ProcessDead, PKG, "");
        assert_ne!(a.dedup_key(200), dead.dedup_key(200));
    }

    const HILOG_JS_ERROR: &str = "\
08-05 10:11:12.100  4242  4242 I C03900/Ace: [page_router.cpp] router push pages/Cart
08-05 10:11:12.345  4242  4242 E C03f00/JsApp: JS ERROR: uncaught exception
08-05 10:11:12.345  4242  4242 E C03f00/JsApp: Module name:com.example.shop
08-05 10:11:12.345  4242  4242 E C03f00/JsApp: Error name:TypeError
08-05 10:11:12.345  4242  4242 E C03f00/JsApp: Error message:Cannot read property length of undefined
08-05 10:11:12.345  4242  4242 E C03f00/JsApp: Stacktrace:
08-05 10:11:12.345  4242  4242 E C03f00/JsApp:     at onClick (entry/src/main/ets/pages/Cart.ets:42:13)
08-05 10:11:12.345  4242  4242 E C03f00/JsApp:     at anonymous (entry/src/main/ets/pages/Cart.ets:40:9)

08-05 10:11:12.500   600   612 I C01800/AppMgr: process com.example.shop died
";

    const HILOG_NATIVE: &str = "\
08-05 10:11:12.345  4242  4260 F C03f00/MUSL-SIGCHAIN: Fatal signal 11 (SIGSEGV), code 1, pid 4242 (com.example.shop)
08-05 10:11:12.400  4300  4300 F C02d11/DfxFaultLogger: backtrace:
08-05 10:11:12.401  4300  4300 F C02d11/DfxFaultLogger: #00 pc 000000000009f5a4 /system/lib64/libace.z.so
08-05 10:11:12.402  4300  4300 F C02d11/DfxFaultLogger: #01 pc 00000000000a1b20 /data/storage/el1/bundle/libs/arm64/libshop.so
";

    const HILOG_FREEZE: &str = "\
08-05 10:11:20.000   600   700 E C01800/FreezeDetector: AppFreeze THREAD_BLOCK_6S bundleName:com.example.shop pid:4242
";

    #[test]
    fn test_hilog_js_error_with_stack() {
        let sig = classify_hilog(HILOG_JS_ERROR, PKG).expect("should match");
        assert_eq!(sig.crash_type, CrashType::ManagedException);
        let stack = sig.stack_trace.unwrap();
        assert!(stack.starts_with("Error name:TypeError"));
        assert!(stack.contains("at onClick (entry/src/main/ets/pages/Cart.ets:42:13)"));
        assert!(!stack.contains("Module name"));
        assert!(!stack.contains("died"));
    }

    #[test]
    fn test_hilog_js_error_of_other_bundle_is_ignored() {
        let log = HILOG_JS_ERROR.replace("Module name:com.example.shop", "Module name:com.other.app");
        assert_eq!(classify_hilog(&log, PKG), None);
    }

    #[test]
    fn test_hilog_native_fault_with_backtrace() {
        let sig = classify_hilog(HILOG_NATIVE, PKG).expect("should match");
        assert_eq!(sig.crash_type, CrashType::Native);
        let stack = sig.stack_trace.unwrap();
        assert!(stack.starts_with("#00 pc 000000000009f5a4"));
        assert_eq!(stack.lines().count(), 2);
    }

    #[test]
    fn test_hilog_app_freeze() {
        let sig = classify_hilog(HILOG_FREEZE, PKG).expect("should match");
        assert_eq!(sig.crash_type, CrashType::Anr);
        assert!(sig.stack_trace.unwrap().starts_with("AppFreeze THREAD_BLOCK_6S"));

        assert_eq!(classify_hilog(HILOG_FREEZE, "com.example"), None);
    }

    #[test]
    fn test_hilog_js_error_wins_over_freeze() {
        let log = format!("{HILOG_FREEZE}{HILOG_JS_ERROR}");
        let sig = classify_hilog(&log, PKG).unwrap();
        assert_eq!(sig.crash_type, CrashType::ManagedException);
    }

    #[test]
    fn test_dialect_selects_classifier() {
        assert_eq!(LogDialect::default(), LogDialect::Logcat);
        assert!(LogDialect::Logcat.classify(HILOG_JS_ERROR, PKG).is_none());
        assert!(LogDialect::Hilog.classify(HILOG_JS_ERROR, PKG).is_some());
        assert!(LogDialect::Hilog.classify(MANAGED_LOG, PKG).is_none());
    }

    #[test]
    fn test_report_severity_and_summary() {
        let report = CrashReport::from_match(classify(ANR_LOG, PKG).unwrap(), PKG, ANR_LOG);
        assert_eq!(report.severity, CrashSeverity::High);
        assert_eq!(
            report.summary(),
            "[anr] com.example.shop: Reason: Input dispatching timed out"
        );
    }
}
