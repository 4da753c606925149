//! Config defaults and loading tests for split-test-config.
// crates/split-test-config/tests/config_defaults.rs
// =============================================================================
// Module: Config Defaults and Loading Tests
// Description: Validate default behavior and path resolution.
// Purpose: Ensure an empty config is usable and files load fail-closed.
// =============================================================================

use std::fs;

use split_test_config::AuditSinkKind;
use split_test_config::ConfigError;
use split_test_config::SplitTestConfig;
use split_test_config::StoreType;
use split_test_config::config_toml_example;
use split_test_core::SignificanceMethod;
use split_test_store_sqlite::SqliteStoreMode;
use split_test_store_sqlite::SqliteSyncMode;
use tempfile::TempDir;

mod common;

type TestResult = Result<(), String>;

#[test]
fn empty_config_uses_defaults() -> TestResult {
    let config = common::minimal_config().map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    if config.server.bind != "127.0.0.1:8080" || config.server.max_body_bytes != 65_536 {
        return Err("unexpected server defaults".to_string());
    }
    if config.store.store_type != StoreType::Memory || config.store.sqlite_config().is_some() {
        return Err("store should default to memory".to_string());
    }
    let policy = config.experiments.significance_policy();
    if policy.method != SignificanceMethod::ViewThreshold || policy.view_threshold != 1_000 {
        return Err("significance should default to the view-threshold heuristic".to_string());
    }
    if config.experiments.auto_winner.rule().is_some() {
        return Err("auto winner must be opt-in".to_string());
    }
    if config.audit.sink != AuditSinkKind::Stderr {
        return Err("audit should default to stderr".to_string());
    }
    Ok(())
}

#[test]
fn example_config_validates() -> TestResult {
    let config =
        SplitTestConfig::from_toml_str(&config_toml_example()).map_err(|err| err.to_string())?;
    let sqlite = config.store.sqlite_config().ok_or("example selects sqlite")?;
    if sqlite.journal_mode != SqliteStoreMode::Wal || sqlite.sync_mode != SqliteSyncMode::Full {
        return Err("example should keep durable sqlite defaults".to_string());
    }
    if sqlite.busy_timeout_ms != 5_000 {
        return Err("unexpected busy timeout".to_string());
    }
    Ok(())
}

#[test]
fn load_reads_explicit_path() -> TestResult {
    let temp = TempDir::new().map_err(|err| err.to_string())?;
    let path = temp.path().join("split-test.toml");
    fs::write(
        &path,
        "[experiments]\nsignificance_method = \"two_proportion_z\"\n\n[experiments.auto_winner]\nenabled = true\nmin_views_per_variant = 200\n",
    )
    .map_err(|err| err.to_string())?;
    let config = SplitTestConfig::load(Some(&path)).map_err(|err| err.to_string())?;
    let rule = config.experiments.auto_winner.rule().ok_or("rule should be enabled")?;
    if rule.min_views_per_variant != 200 {
        return Err("min views not applied".to_string());
    }
    if config.experiments.significance_method != SignificanceMethod::TwoProportionZ {
        return Err("significance method not applied".to_string());
    }
    Ok(())
}

#[test]
fn load_missing_file_is_io_error() -> TestResult {
    let temp = TempDir::new().map_err(|err| err.to_string())?;
    match SplitTestConfig::load(Some(&temp.path().join("absent.toml"))) {
        Err(ConfigError::Io(_)) => Ok(()),
        other => Err(format!("expected io error, got {other:?}")),
    }
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let temp = TempDir::new().map_err(|err| err.to_string())?;
    let path = temp.path().join("big.toml");
    let padding = format!("# {}\n", "x".repeat(1024 * 1024));
    fs::write(&path, padding).map_err(|err| err.to_string())?;
    common::assert_invalid(SplitTestConfig::load(Some(&path)).map(|_| ()), "size limit")
}

#[test]
fn unknown_enum_values_fail_to_parse() -> TestResult {
    match SplitTestConfig::from_toml_str("[store]\ntype = \"postgres\"\n") {
        Err(ConfigError::Parse(_)) => Ok(()),
        other => Err(format!("expected parse error, got {other:?}")),
    }
}
