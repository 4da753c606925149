// crates/split-test-server/src/audit.rs
// ============================================================================
// Module: Experiment Audit Logging
// Description: Structured audit events for experiment state changes.
// Purpose: Emit JSON-lines audit records without hard logging dependencies.
// Dependencies: split-test-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Audit events record lifecycle writes, allocation fallbacks, rejected
//! conversions, and automatic winners as one JSON object per line. Counter
//! increments on the hot path are not audited. Sinks never fail the caller:
//! serialization or write errors drop the event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use split_test_core::ErrorKind;
use split_test_core::TestStatus;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome recorded with an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The operation was applied.
    Applied,
    /// The operation was refused.
    Rejected,
    /// The visitor was served the control variant instead.
    Fallback,
}

/// Experiment audit event payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Test identifier when the event concerns one test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    /// Variant identifier when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    /// Test status after the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TestStatus>,
    /// Event outcome.
    pub outcome: AuditOutcome,
    /// Error classification for rejected or fallback events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Inputs required to construct an audit event.
#[derive(Debug, Clone)]
pub struct ExperimentAuditEventParams {
    /// Event identifier.
    pub event: &'static str,
    /// Test identifier.
    pub test_id: Option<String>,
    /// Variant identifier.
    pub variant_id: Option<String>,
    /// Test status after the event.
    pub status: Option<TestStatus>,
    /// Event outcome.
    pub outcome: AuditOutcome,
    /// Error classification.
    pub error_kind: Option<ErrorKind>,
    /// Human-readable detail.
    pub message: Option<String>,
}

impl ExperimentAuditEventParams {
    /// Starts params for an applied event on a test.
    #[must_use]
    pub fn applied(event: &'static str, test_id: impl Into<String>) -> Self {
        Self {
            event,
            test_id: Some(test_id.into()),
            variant_id: None,
            status: None,
            outcome: AuditOutcome::Applied,
            error_kind: None,
            message: None,
        }
    }
}

impl ExperimentAuditEvent {
    /// Creates a new audit event stamped with the current time.
    #[must_use]
    pub fn new(params: ExperimentAuditEventParams) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event: params.event,
            timestamp_ms,
            test_id: params.test_id,
            variant_id: params.variant_id,
            status: params.status,
            outcome: params.outcome,
            error_kind: params.error_kind,
            message: params.message,
        }
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for experiment events.
pub trait ExperimentAuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &ExperimentAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl ExperimentAuditSink for StderrAuditSink {
    fn record(&self, event: &ExperimentAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl ExperimentAuditSink for FileAuditSink {
    fn record(&self, event: &ExperimentAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl ExperimentAuditSink for NoopAuditSink {
    fn record(&self, _event: &ExperimentAuditEvent) {}
}

// ============================================================================
// SECTION: Tests
// ============================================================================
