// crates/split-test-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Test Store
// Description: Durable TestStore backend using SQLite WAL.
// Purpose: Persist experiment definitions, lifecycle state, and counters.
// Dependencies: split-test-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`TestStore`] implementation. Test
//! definitions are stored as hashed canonical JSON; lifecycle fields and
//! per-variant counters live in their own columns so that increments are
//! single-statement updates. Security posture: database contents are
//! untrusted and verified on load.
//!
//! [`TestStore`]: split_test_core::TestStore

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_DEFINITION_BYTES;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
pub use store::SqliteTestStore;
