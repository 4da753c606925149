// crates/split-test-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: Deterministic example for docs and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example `split-test.toml`. Every key is spelled out with its
//! default except the store, which selects the durable `SQLite` backend.

/// Returns a canonical example `split-test.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[server]
bind = "127.0.0.1:8080"
max_body_bytes = 65536

[store]
type = "sqlite"
path = "data/split-test.sqlite3"
busy_timeout_ms = 5000
journal_mode = "wal"
sync_mode = "full"

[experiments]
significance_method = "view_threshold"
significance_view_threshold = 1000
config_cache_entries = 1024

[experiments.auto_winner]
enabled = false
min_views_per_variant = 500
min_confidence_percent = 95.0

[audit]
sink = "stderr"
# path = "logs/split-test-audit.jsonl"
"#,
    )
}
