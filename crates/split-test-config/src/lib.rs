// crates/split-test-config/src/lib.rs
// ============================================================================
// Module: Split Test Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for split-test.toml semantics.
// Dependencies: split-test-core, split-test-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `split-test-config` defines the configuration model for the Split Test
//! server and CLI. Validation is strict and fails closed; a canonical example
//! file is provided for docs and tests.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
