// crates/split-test-server/src/lib.rs
// ============================================================================
// Module: Split Test Server Library
// Description: Experiment service, REST surface, and audit sinks.
// Purpose: Expose experiment lifecycle, allocation, and metrics over HTTP.
// Dependencies: split-test-core, split-test-config, split-test-store-sqlite, axum
// ============================================================================

//! ## Overview
//! The server crate wires the core runtime to a store backend and serves it
//! as a JSON REST API. [`ExperimentService`] owns every operation and is
//! usable without HTTP; [`SplitTestServer`] binds it to an axum router.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod server;
pub mod service;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditOutcome;
pub use audit::ExperimentAuditEvent;
pub use audit::ExperimentAuditEventParams;
pub use audit::ExperimentAuditSink;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use server::ApiError;
pub use server::ServerError;
pub use server::SplitTestServer;
pub use server::build_audit_sink;
pub use server::build_router;
pub use server::build_test_store;
pub use service::ExperimentService;
pub use service::ServiceOptions;
