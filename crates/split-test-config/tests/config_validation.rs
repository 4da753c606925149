//! Cross-field validation tests for split-test-config.
// crates/split-test-config/tests/config_validation.rs
// =============================================================================
// Module: Config Validation Tests
// Description: Validate fail-closed checks for each section.
// Purpose: Ensure inconsistent settings are rejected with clear messages.
// =============================================================================

use std::path::PathBuf;

use split_test_config::AuditSinkKind;
use split_test_config::StoreType;

mod common;

use common::assert_invalid;

type TestResult = Result<(), String>;

#[test]
fn bind_must_be_socket_address() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.bind = "localhost".to_string();
    assert_invalid(config.validate(), "invalid server.bind address")
}

#[test]
fn max_body_bytes_must_be_positive() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.max_body_bytes = 0;
    assert_invalid(config.validate(), "server.max_body_bytes must be greater than zero")
}

#[test]
fn sqlite_store_requires_path() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.store.store_type = StoreType::Sqlite;
    assert_invalid(config.validate(), "sqlite store requires path")
}

#[test]
fn memory_store_rejects_path() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.store.path = Some(PathBuf::from("split-test.sqlite3"));
    assert_invalid(config.validate(), "memory store must not set path")
}

#[test]
fn store_path_component_length_is_limited() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.store.store_type = StoreType::Sqlite;
    config.store.path = Some(PathBuf::from("a".repeat(300)));
    assert_invalid(config.validate(), "store.path path component too long")
}

#[test]
fn significance_threshold_must_be_positive() -> TestResult {
    let config = common::config_from_toml("[experiments]\nsignificance_view_threshold = 0\n")
        .map_err(|err| err.to_string())?;
    assert_invalid(config.validate(), "significance_view_threshold must be greater than zero")
}

#[test]
fn auto_winner_confidence_must_be_a_percentage() -> TestResult {
    let config = common::config_from_toml(
        "[experiments.auto_winner]\nenabled = true\nmin_confidence_percent = 100.0\n",
    )
    .map_err(|err| err.to_string())?;
    assert_invalid(config.validate(), "min_confidence_percent must be within (0, 100)")
}

#[test]
fn enabled_auto_winner_needs_views() -> TestResult {
    let config = common::config_from_toml(
        "[experiments.auto_winner]\nenabled = true\nmin_views_per_variant = 0\n",
    )
    .map_err(|err| err.to_string())?;
    assert_invalid(config.validate(), "min_views_per_variant must be greater than zero")
}

#[test]
fn file_audit_sink_requires_path() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.audit.sink = AuditSinkKind::File;
    assert_invalid(config.validate(), "audit.sink=file requires audit.path")
}

#[test]
fn audit_path_requires_file_sink() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.audit.path = Some(PathBuf::from("audit.jsonl"));
    assert_invalid(config.validate(), "audit.path requires audit.sink=file")
}
