// crates/split-test-cli/src/main.rs
// ============================================================================
// Module: Split Test CLI Entry Point
// Description: Command dispatcher for the Split Test server and offline tools.
// Purpose: Run the REST server, validate config, and inspect stored tests.
// Dependencies: clap, split-test-config, split-test-core, split-test-server, split-test-store-sqlite
// ============================================================================

//! ## Overview
//! The `split-test` binary starts the REST server and offers offline
//! commands that read the configured store directly: configuration
//! validation and experiment listing with dashboard summaries. Offline
//! commands never write to the store.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde::Serialize;
use split_test_config::SplitTestConfig;
use split_test_config::config_toml_example;
use split_test_core::ExperimentTest;
use split_test_core::PageSlug;
use split_test_core::SharedTestStore;
use split_test_core::TestId;
use split_test_core::TestStore;
use split_test_core::TestSummary;
use split_test_core::summarize;
use split_test_server::SplitTestServer;
use split_test_store_sqlite::SqliteTestStore;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Split Test command-line interface.
#[derive(Parser, Debug)]
#[command(name = "split-test", disable_help_subcommand = true, version)]
struct Cli {
    /// Selected command.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the REST server.
    Serve(ServeCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Inspect stored experiments without a running server.
    Experiments {
        /// Selected experiments subcommand.
        #[command(subcommand)]
        command: ExperimentsCommand,
    },
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path (defaults to split-test.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a Split Test configuration file.
    Validate(ConfigValidateCommand),
    /// Print an annotated example configuration.
    Example,
}

/// Arguments for config validation.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Optional config file path (defaults to split-test.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Experiments subcommands.
#[derive(Subcommand, Debug)]
enum ExperimentsCommand {
    /// List tests with their dashboard summaries.
    List(ExperimentsListCommand),
    /// Show one test and its dashboard summary.
    Show(ExperimentsShowCommand),
}

/// Arguments for listing experiments.
#[derive(Args, Debug)]
struct ExperimentsListCommand {
    /// Optional config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Only list tests targeting this page.
    #[arg(long, value_name = "SLUG")]
    page_slug: Option<String>,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// Arguments for showing one experiment.
#[derive(Args, Debug)]
struct ExperimentsShowCommand {
    /// Test identifier.
    test_id: String,
    /// Optional config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Output format for list commands.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Tab-separated table.
    Text,
    /// Pretty-printed JSON array of summaries.
    Json,
}

/// JSON payload printed by `experiments show`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShowOutput {
    /// Stored test definition and counters.
    test: ExperimentTest,
    /// Derived dashboard summary.
    summary: TestSummary,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing error messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Config {
            command,
        } => command_config(command),
        Commands::Experiments {
            command,
        } => command_experiments(command),
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config)?;
    let server = tokio::task::spawn_blocking(move || SplitTestServer::from_config(config))
        .await
        .map_err(|err| CliError::new(format!("server init join failed: {err}")))?
        .map_err(|err| CliError::new(format!("server init failed: {err}")))?;
    server.serve().await.map_err(|err| CliError::new(format!("server failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(command) => {
            let _config = load_config(command.config)?;
            write_stdout_line("config ok").map_err(|err| output_error(&err))?;
        }
        ConfigCommand::Example => {
            write_stdout_line(config_toml_example().trim_end())
                .map_err(|err| output_error(&err))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Loads configuration from an explicit path or the default resolution rules.
fn load_config(path: Option<PathBuf>) -> CliResult<SplitTestConfig> {
    SplitTestConfig::load(path.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

// ============================================================================
// SECTION: Experiments Commands
// ============================================================================

/// Dispatches experiments subcommands.
fn command_experiments(command: ExperimentsCommand) -> CliResult<ExitCode> {
    let output = match command {
        ExperimentsCommand::List(command) => {
            let config = load_config(command.config)?;
            let page_slug = command.page_slug.map(PageSlug::new);
            render_list(&config, page_slug.as_ref(), command.format)?
        }
        ExperimentsCommand::Show(command) => {
            let config = load_config(command.config)?;
            render_show(&config, &TestId::new(command.test_id))?
        }
    };
    write_stdout_line(output.trim_end()).map_err(|err| output_error(&err))?;
    Ok(ExitCode::SUCCESS)
}

/// Opens the configured store for offline reads.
///
/// The memory store holds nothing outside a running server, so offline
/// commands require the SQLite backend. A missing database file is an error
/// rather than a fresh empty store.
fn open_store(config: &SplitTestConfig) -> CliResult<SharedTestStore> {
    let Some(sqlite) = config.store.sqlite_config() else {
        return Err(CliError::new(
            "offline experiment commands require store type \"sqlite\"".to_string(),
        ));
    };
    let store = SqliteTestStore::open_existing(&sqlite)
        .map_err(|err| CliError::new(format!("failed to open store: {err}")))?;
    Ok(SharedTestStore::from_store(store))
}

/// Renders the list of tests in the requested format.
fn render_list(
    config: &SplitTestConfig,
    page_slug: Option<&PageSlug>,
    format: OutputFormat,
) -> CliResult<String> {
    let store = open_store(config)?;
    let policy = config.experiments.significance_policy();
    let summaries: Vec<TestSummary> = store
        .list(page_slug)
        .map_err(|err| CliError::new(format!("failed to list experiments: {err}")))?
        .iter()
        .map(|test| summarize(test, &policy))
        .collect();
    match format {
        OutputFormat::Json => to_json(&summaries),
        OutputFormat::Text => Ok(render_summary_table(&summaries)),
    }
}

/// Renders one test with its summary as JSON.
fn render_show(config: &SplitTestConfig, test_id: &TestId) -> CliResult<String> {
    let store = open_store(config)?;
    let test = store
        .load(test_id)
        .map_err(|err| CliError::new(format!("failed to load experiment: {err}")))?
        .ok_or_else(|| CliError::new(format!("unknown test: {test_id}")))?;
    let summary = summarize(&test, &config.experiments.significance_policy());
    to_json(&ShowOutput {
        test,
        summary,
    })
}

/// Formats summaries as a tab-separated table with a header row.
fn render_summary_table(summaries: &[TestSummary]) -> String {
    let mut output = String::from("id\tstatus\tpage\tviews\tconversions\tleader\twinner\n");
    for summary in summaries {
        let leader = summary.leading_variant_id.as_ref().map_or("-", |id| id.as_str());
        let winner = summary.winner_id.as_ref().map_or("-", |id| id.as_str());
        let _ = writeln!(
            output,
            "{}\t{}\t{}\t{}\t{}\t{leader}\t{winner}",
            summary.test_id,
            summary.status,
            summary.page_slug,
            summary.total_views,
            summary.total_conversions,
        );
    }
    output
}

/// Serializes a value as pretty JSON.
fn to_json<T: Serialize>(value: &T) -> CliResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to render json: {err}")))
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Wraps an output stream failure.
fn output_error(error: &std::io::Error) -> CliError {
    CliError::new(format!("failed to write output: {error}"))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
