// crates/split-test-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Test Store
// Description: Durable TestStore backed by SQLite WAL.
// Purpose: Persist experiments with hashed definitions and atomic counters.
// Dependencies: split-test-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Three tables back the store:
//!
//! - `experiments`: one row per test with lifecycle columns, a revision used
//!   for compare-and-swap, and the immutable definition as canonical JSON
//!   plus its hash.
//! - `variant_counters`: one row per variant with views, conversions, and
//!   revenue.
//! - `store_meta`: the schema version.
//!
//! Every counter increment is a single guarded `UPDATE`; when it touches no
//! row the store inspects the data to report why. Loads verify the
//! definition hash and fail closed on corruption. Security posture: database
//! contents are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use split_test_core::CounterOutcome;
use split_test_core::ExperimentTest;
use split_test_core::ExperimentVariant;
use split_test_core::LifecycleUpdate;
use split_test_core::PageSlug;
use split_test_core::StoreError;
use split_test_core::TestId;
use split_test_core::TestStatus;
use split_test_core::TestStore;
use split_test_core::Timestamp;
use split_test_core::VariantCounters;
use split_test_core::VariantId;
use split_test_core::WriteOutcome;
use split_test_core::hashing::DEFAULT_HASH_ALGORITHM;
use split_test_core::hashing::HashAlgorithm;
use split_test_core::hashing::canonical_json_bytes;
use split_test_core::hashing::hash_bytes;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum stored definition size accepted by the store.
pub const MAX_DEFINITION_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode.
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode.
    #[default]
    Full,
    /// Normal synchronous mode.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` test store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a config for `path` with default durability settings.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Insert collided with an existing test.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// Stored definition exceeded the size limit.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::Invalid(format!(
                "definition_json exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

/// Maps a rusqlite error into a store error.
#[allow(clippy::needless_pass_by_value, reason = "Used as a map_err adapter.")]
fn db_error(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Stored Definition
// ============================================================================

/// Immutable part of a test, hashed and stored as canonical JSON.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDefinition {
    /// Test identifier; must match the row key.
    test_id: TestId,
    /// Test label.
    name: String,
    /// Target page.
    page_slug: PageSlug,
    /// Creation timestamp.
    created_at: Timestamp,
    /// Variant configuration in declaration order.
    variants: Vec<StoredVariant>,
}

/// Variant configuration without counters.
#[derive(Debug, Serialize, Deserialize)]
struct StoredVariant {
    /// Variant identifier.
    id: VariantId,
    /// Variant label.
    name: String,
    /// Traffic share.
    traffic_percentage: u8,
}

impl StoredDefinition {
    /// Extracts the immutable definition from a test.
    fn from_test(test: &ExperimentTest) -> Self {
        Self {
            test_id: test.id.clone(),
            name: test.name.clone(),
            page_slug: test.page_slug.clone(),
            created_at: test.created_at,
            variants: test
                .variants
                .iter()
                .map(|variant| StoredVariant {
                    id: variant.id.clone(),
                    name: variant.name.clone(),
                    traffic_percentage: variant.traffic_percentage,
                })
                .collect(),
        }
    }
}

/// Raw counter columns for one variant.
#[derive(Debug, Clone, Copy)]
struct CounterRow {
    /// Views column.
    views: i64,
    /// Conversions column.
    conversions: i64,
    /// Revenue column.
    revenue_cents: i64,
    /// Whether any revenue was reported.
    has_revenue: bool,
}

impl CounterRow {
    /// Converts raw columns into checked counters.
    fn into_counters(self, variant_id: VariantId) -> Result<VariantCounters, SqliteStoreError> {
        let views = to_u64(self.views, "views")?;
        let conversions = to_u64(self.conversions, "conversions")?;
        if conversions > views {
            return Err(SqliteStoreError::Corrupt(format!(
                "variant {variant_id} has more conversions than views"
            )));
        }
        let revenue_cents = if self.has_revenue {
            Some(to_u64(self.revenue_cents, "revenue_cents")?)
        } else {
            None
        };
        Ok(VariantCounters {
            variant_id,
            views,
            conversions,
            revenue_cents,
        })
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed test store with WAL support.
#[derive(Debug, Clone)]
pub struct SqliteTestStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteTestStore {
    /// Opens an `SQLite`-backed test store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Opens an existing store without creating files or schema.
    ///
    /// Pragmas that rewrite the database header are skipped, so reads
    /// through this handle leave the file untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Io`] when the database file does not
    /// exist, and [`SqliteStoreError::VersionMismatch`] or
    /// [`SqliteStoreError::Db`] when it is not a compatible store.
    pub fn open_existing(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        if !config.path.is_file() {
            return Err(SqliteStoreError::Io(format!(
                "store database not found: {}",
                config.path.display()
            )));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
        connection
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(db_error)?;
        let store = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        store.check_ready()?;
        Ok(store)
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }

    /// Inserts a new test and its counter rows.
    fn insert_test(&self, test: &ExperimentTest) -> Result<(), SqliteStoreError> {
        let definition = StoredDefinition::from_test(test);
        let canonical_json = canonical_json_bytes(&definition)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        if canonical_json.len() > MAX_DEFINITION_BYTES {
            return Err(SqliteStoreError::TooLarge {
                max_bytes: MAX_DEFINITION_BYTES,
                actual_bytes: canonical_json.len(),
            });
        }
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &canonical_json);
        let revision = to_i64(test.revision, "revision")?;
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate).map_err(db_error)?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM experiments WHERE test_id = ?1",
                params![test.id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        if exists.is_some() {
            return Err(SqliteStoreError::Conflict(format!("test already exists: {}", test.id)));
        }
        tx.execute(
            "INSERT INTO experiments (test_id, page_slug, status, revision, start_date, end_date, \
             winner_id, created_at, definition_json, definition_hash, hash_algorithm) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                test.id.as_str(),
                test.page_slug.as_str(),
                test.status.as_str(),
                revision,
                encode_timestamp(test.start_date.as_ref())?,
                encode_timestamp(test.end_date.as_ref())?,
                test.winner_id.as_ref().map(VariantId::as_str),
                encode_timestamp(Some(&test.created_at))?,
                canonical_json,
                digest.value,
                digest.algorithm.label(),
            ],
        )
        .map_err(db_error)?;
        for (position, variant) in test.variants.iter().enumerate() {
            let position = i64::try_from(position)
                .map_err(|_| SqliteStoreError::Invalid("variant position overflow".to_string()))?;
            tx.execute(
                "INSERT INTO variant_counters (test_id, variant_id, position, views, \
                 conversions, revenue_cents, has_revenue) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    test.id.as_str(),
                    variant.id.as_str(),
                    position,
                    to_i64(variant.views, "views")?,
                    to_i64(variant.conversions, "conversions")?,
                    to_i64(variant.revenue_cents.unwrap_or(0), "revenue_cents")?,
                    variant.revenue_cents.is_some(),
                ],
            )
            .map_err(db_error)?;
        }
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(())
    }

    /// Loads one test.
    fn load_test(&self, test_id: &TestId) -> Result<Option<ExperimentTest>, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_error)?;
        let test = read_test(&tx, test_id)?;
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(test)
    }

    /// Lists tests, optionally filtered by page.
    fn list_tests(
        &self,
        page_slug: Option<&PageSlug>,
    ) -> Result<Vec<ExperimentTest>, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_error)?;
        let ids = {
            let mut statement = tx
                .prepare("SELECT test_id FROM experiments WHERE ?1 IS NULL OR page_slug = ?1")
                .map_err(db_error)?;
            let rows = statement
                .query_map(params![page_slug.map(PageSlug::as_str)], |row| row.get::<_, String>(0))
                .map_err(db_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_error)?
        };
        let mut tests = Vec::with_capacity(ids.len());
        for id in ids {
            let test_id = TestId::new(id);
            let test = read_test(&tx, &test_id)?.ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("test {test_id} vanished during listing"))
            })?;
            tests.push(test);
        }
        tx.commit().map_err(db_error)?;
        drop(guard);
        tests.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(tests)
    }

    /// Applies a revision-guarded lifecycle write.
    fn update_test_lifecycle(
        &self,
        update: &LifecycleUpdate,
    ) -> Result<WriteOutcome, SqliteStoreError> {
        let expected = to_i64(update.expected_revision, "revision")?;
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate).map_err(db_error)?;
        let changed = tx
            .execute(
                "UPDATE experiments SET status = ?2, start_date = ?3, end_date = ?4, winner_id = \
                 ?5, revision = revision + 1 WHERE test_id = ?1 AND revision = ?6",
                params![
                    update.test_id.as_str(),
                    update.status.as_str(),
                    encode_timestamp(update.start_date.as_ref())?,
                    encode_timestamp(update.end_date.as_ref())?,
                    update.winner_id.as_ref().map(VariantId::as_str),
                    expected,
                ],
            )
            .map_err(db_error)?;
        let outcome = if changed == 1 {
            WriteOutcome::Applied {
                revision: update.expected_revision.saturating_add(1),
            }
        } else {
            revision_outcome(&tx, &update.test_id)?
        };
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(outcome)
    }

    /// Deletes a test and its counters when the revision matches.
    fn delete_test(
        &self,
        test_id: &TestId,
        expected_revision: u64,
    ) -> Result<WriteOutcome, SqliteStoreError> {
        let expected = to_i64(expected_revision, "revision")?;
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate).map_err(db_error)?;
        let changed = tx
            .execute(
                "DELETE FROM experiments WHERE test_id = ?1 AND revision = ?2",
                params![test_id.as_str(), expected],
            )
            .map_err(db_error)?;
        let outcome = if changed == 1 {
            tx.execute("DELETE FROM variant_counters WHERE test_id = ?1", params![test_id.as_str()])
                .map_err(db_error)?;
            WriteOutcome::Applied {
                revision: 0,
            }
        } else {
            revision_outcome(&tx, test_id)?
        };
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(outcome)
    }

    /// Runs a guarded counter `UPDATE` and reports the outcome.
    fn increment(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
        sql: &str,
        extra: Option<i64>,
    ) -> Result<CounterOutcome, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate).map_err(db_error)?;
        let changed = match extra {
            Some(value) => tx.execute(sql, params![test_id.as_str(), variant_id.as_str(), value]),
            None => tx.execute(sql, params![test_id.as_str(), variant_id.as_str()]),
        }
        .map_err(db_error)?;
        let outcome = if changed == 1 {
            let counters = read_counters(&tx, test_id, variant_id)?.ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("counter row vanished for {variant_id}"))
            })?;
            CounterOutcome::Recorded(counters)
        } else {
            diagnose_counter(&tx, test_id, variant_id)?
        };
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(outcome)
    }

    /// Checks the schema version.
    fn check_ready(&self) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        let version: i64 = guard
            .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
            .map_err(db_error)?;
        drop(guard);
        if version != SCHEMA_VERSION {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {version}"
            )));
        }
        Ok(())
    }
}

/// Adds one view to a variant of a running test.
const INCREMENT_VIEWS_SQL: &str = "UPDATE variant_counters SET views = views + 1 WHERE test_id = \
                                   ?1 AND variant_id = ?2 AND EXISTS (SELECT 1 FROM experiments \
                                   WHERE test_id = ?1 AND status = 'running')";

/// Adds one conversion and revenue to a variant of a running test with
/// unconverted views. Revenue saturates at the signed 64-bit maximum.
const INCREMENT_CONVERSIONS_SQL: &str = "UPDATE variant_counters SET conversions = conversions \
                                         + 1, revenue_cents = CASE WHEN revenue_cents > \
                                         9223372036854775807 - ?3 THEN 9223372036854775807 ELSE \
                                         revenue_cents + ?3 END, has_revenue = 1 WHERE test_id = \
                                         ?1 AND variant_id = ?2 AND views > conversions AND \
                                         EXISTS (SELECT 1 FROM experiments WHERE test_id = ?1 AND \
                                         status = 'running')";

/// Adds one conversion without revenue.
const INCREMENT_CONVERSIONS_NO_REVENUE_SQL: &str = "UPDATE variant_counters SET conversions = \
                                                    conversions + 1 WHERE test_id = ?1 AND \
                                                    variant_id = ?2 AND views > conversions AND \
                                                    EXISTS (SELECT 1 FROM experiments WHERE \
                                                    test_id = ?1 AND status = 'running')";

impl TestStore for SqliteTestStore {
    fn insert(&self, test: &ExperimentTest) -> Result<(), StoreError> {
        self.insert_test(test).map_err(StoreError::from)
    }

    fn load(&self, test_id: &TestId) -> Result<Option<ExperimentTest>, StoreError> {
        self.load_test(test_id).map_err(StoreError::from)
    }

    fn list(&self, page_slug: Option<&PageSlug>) -> Result<Vec<ExperimentTest>, StoreError> {
        self.list_tests(page_slug).map_err(StoreError::from)
    }

    fn update_lifecycle(&self, update: &LifecycleUpdate) -> Result<WriteOutcome, StoreError> {
        self.update_test_lifecycle(update).map_err(StoreError::from)
    }

    fn delete(
        &self,
        test_id: &TestId,
        expected_revision: u64,
    ) -> Result<WriteOutcome, StoreError> {
        self.delete_test(test_id, expected_revision).map_err(StoreError::from)
    }

    fn increment_views(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
    ) -> Result<CounterOutcome, StoreError> {
        self.increment(test_id, variant_id, INCREMENT_VIEWS_SQL, None).map_err(StoreError::from)
    }

    fn increment_conversions(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
        revenue_cents: Option<u64>,
    ) -> Result<CounterOutcome, StoreError> {
        let result = match revenue_cents {
            Some(amount) => {
                let amount = i64::try_from(amount).unwrap_or(i64::MAX);
                self.increment(test_id, variant_id, INCREMENT_CONVERSIONS_SQL, Some(amount))
            }
            None => self.increment(test_id, variant_id, INCREMENT_CONVERSIONS_NO_REVENUE_SQL, None),
        };
        result.map_err(StoreError::from)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.check_ready().map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Row Access
// ============================================================================

/// Reads a full test: verified definition, lifecycle columns, and counters.
fn read_test(
    connection: &Connection,
    test_id: &TestId,
) -> Result<Option<ExperimentTest>, SqliteStoreError> {
    let length: Option<i64> = connection
        .query_row(
            "SELECT length(definition_json) FROM experiments WHERE test_id = ?1",
            params![test_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)?;
    let Some(length) = length else {
        return Ok(None);
    };
    let length = usize::try_from(length).map_err(|_| {
        SqliteStoreError::Invalid(format!("negative definition length for test {test_id}"))
    })?;
    if length > MAX_DEFINITION_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_DEFINITION_BYTES,
            actual_bytes: length,
        });
    }

    let row = connection
        .query_row(
            "SELECT status, revision, start_date, end_date, winner_id, definition_json, \
             definition_hash, hash_algorithm FROM experiments WHERE test_id = ?1",
            params![test_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .map_err(db_error)?;
    let (status, revision, start_date, end_date, winner_id, bytes, hash_value, hash_algorithm) =
        row;

    let algorithm = parse_hash_algorithm(&hash_algorithm)?;
    if hash_bytes(algorithm, &bytes).value != hash_value {
        return Err(SqliteStoreError::Corrupt(format!("hash mismatch for test {test_id}")));
    }
    let definition: StoredDefinition =
        serde_json::from_slice(&bytes).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    if &definition.test_id != test_id {
        return Err(SqliteStoreError::Invalid(
            "test_id mismatch between key and definition".to_string(),
        ));
    }
    let status = TestStatus::parse(&status)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown status for test {test_id}")))?;

    let mut counters = read_all_counters(connection, test_id)?;
    let mut variants = Vec::with_capacity(definition.variants.len());
    for stored in definition.variants {
        let row = counters.remove(stored.id.as_str()).ok_or_else(|| {
            SqliteStoreError::Corrupt(format!("missing counters for variant {}", stored.id))
        })?;
        let checked = row.into_counters(stored.id.clone())?;
        variants.push(ExperimentVariant {
            id: stored.id,
            name: stored.name,
            traffic_percentage: stored.traffic_percentage,
            views: checked.views,
            conversions: checked.conversions,
            revenue_cents: checked.revenue_cents,
        });
    }
    let traffic_split = variants
        .iter()
        .map(|variant| (variant.name.clone(), variant.traffic_percentage))
        .collect();

    Ok(Some(ExperimentTest {
        id: definition.test_id,
        name: definition.name,
        page_slug: definition.page_slug,
        status,
        variants,
        traffic_split,
        start_date: decode_timestamp(start_date.as_deref())?,
        end_date: decode_timestamp(end_date.as_deref())?,
        winner_id: winner_id.map(VariantId::new),
        revision: to_u64(revision, "revision")?,
        created_at: definition.created_at,
    }))
}

/// Reads every counter row of a test keyed by variant id.
fn read_all_counters(
    connection: &Connection,
    test_id: &TestId,
) -> Result<BTreeMap<String, CounterRow>, SqliteStoreError> {
    let mut statement = connection
        .prepare(
            "SELECT variant_id, views, conversions, revenue_cents, has_revenue FROM \
             variant_counters WHERE test_id = ?1",
        )
        .map_err(db_error)?;
    let rows = statement
        .query_map(params![test_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                CounterRow {
                    views: row.get(1)?,
                    conversions: row.get(2)?,
                    revenue_cents: row.get(3)?,
                    has_revenue: row.get(4)?,
                },
            ))
        })
        .map_err(db_error)?;
    rows.collect::<Result<BTreeMap<_, _>, _>>().map_err(db_error)
}

/// Reads one variant's counters.
fn read_counters(
    connection: &Connection,
    test_id: &TestId,
    variant_id: &VariantId,
) -> Result<Option<VariantCounters>, SqliteStoreError> {
    let row = connection
        .query_row(
            "SELECT views, conversions, revenue_cents, has_revenue FROM variant_counters WHERE \
             test_id = ?1 AND variant_id = ?2",
            params![test_id.as_str(), variant_id.as_str()],
            |row| {
                Ok(CounterRow {
                    views: row.get(0)?,
                    conversions: row.get(1)?,
                    revenue_cents: row.get(2)?,
                    has_revenue: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(db_error)?;
    row.map(|row| row.into_counters(variant_id.clone())).transpose()
}

/// Explains why a guarded counter update touched no row.
fn diagnose_counter(
    connection: &Connection,
    test_id: &TestId,
    variant_id: &VariantId,
) -> Result<CounterOutcome, SqliteStoreError> {
    let status: Option<String> = connection
        .query_row(
            "SELECT status FROM experiments WHERE test_id = ?1",
            params![test_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)?;
    let Some(status) = status else {
        return Ok(CounterOutcome::UnknownTest);
    };
    let Some(counters) = read_counters(connection, test_id, variant_id)? else {
        return Ok(CounterOutcome::UnknownVariant);
    };
    let status = TestStatus::parse(&status)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown status for test {test_id}")))?;
    if status != TestStatus::Running {
        return Ok(CounterOutcome::NotRunning(status));
    }
    Ok(CounterOutcome::Orphaned(counters))
}

/// Reports missing tests or the current revision after a failed guarded write.
fn revision_outcome(
    connection: &Connection,
    test_id: &TestId,
) -> Result<WriteOutcome, SqliteStoreError> {
    let current: Option<i64> = connection
        .query_row(
            "SELECT revision FROM experiments WHERE test_id = ?1",
            params![test_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)?;
    match current {
        None => Ok(WriteOutcome::Missing),
        Some(current) => Ok(WriteOutcome::RevisionConflict {
            current: to_u64(current, "revision")?,
        }),
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with durable defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(db_error)?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate).map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS experiments (
                    test_id TEXT PRIMARY KEY,
                    page_slug TEXT NOT NULL,
                    status TEXT NOT NULL,
                    revision INTEGER NOT NULL,
                    start_date TEXT,
                    end_date TEXT,
                    winner_id TEXT,
                    created_at TEXT NOT NULL,
                    definition_json BLOB NOT NULL,
                    definition_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_experiments_page_slug
                    ON experiments (page_slug);
                CREATE TABLE IF NOT EXISTS variant_counters (
                    test_id TEXT NOT NULL,
                    variant_id TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    views INTEGER NOT NULL DEFAULT 0,
                    conversions INTEGER NOT NULL DEFAULT 0,
                    revenue_cents INTEGER NOT NULL DEFAULT 0,
                    has_revenue INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (test_id, variant_id),
                    FOREIGN KEY (test_id) REFERENCES experiments(test_id) ON DELETE CASCADE
                );",
            )
            .map_err(db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}

/// Serializes an optional timestamp column.
fn encode_timestamp(value: Option<&Timestamp>) -> Result<Option<String>, SqliteStoreError> {
    value
        .map(|timestamp| {
            serde_json::to_string(timestamp)
                .map_err(|err| SqliteStoreError::Invalid(err.to_string()))
        })
        .transpose()
}

/// Parses an optional timestamp column.
fn decode_timestamp(value: Option<&str>) -> Result<Option<Timestamp>, SqliteStoreError> {
    value
        .map(|raw| {
            serde_json::from_str(raw).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
        })
        .transpose()
}

/// Converts a stored integer into an unsigned counter.
fn to_u64(value: i64, field: &str) -> Result<u64, SqliteStoreError> {
    u64::try_from(value).map_err(|_| SqliteStoreError::Corrupt(format!("negative {field}")))
}

/// Converts an unsigned value into a storable integer.
fn to_i64(value: u64, field: &str) -> Result<i64, SqliteStoreError> {
    i64::try_from(value).map_err(|_| SqliteStoreError::Invalid(format!("{field} too large")))
}

/// Parses a hash algorithm label.
fn parse_hash_algorithm(label: &str) -> Result<HashAlgorithm, SqliteStoreError> {
    HashAlgorithm::from_label(label)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("unsupported hash algorithm: {label}")))
}
