//! ledgerfill command-line interface.
//!
//! ```bash
//! # Learn rules from a labeled statement and store them
//! ledgerfill mine history.csv
//!
//! # Fill a new statement with the latest stored rule set
//! ledgerfill apply march.csv -o march_filled.csv
//!
//! # Score a filled file against its labeled version
//! ledgerfill evaluate labeled.csv march_filled.csv
//! ```

mod commands;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ledgerfill_import::CsvImportProfile;
use tracing_subscriber::EnvFilter;

use commands::{ApplyArgs, MineArgs, OutputFormat, Preset, Store};
use settings::Settings;

#[derive(Parser)]
#[command(name = "ledgerfill")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to the per-user ledgerfill.toml)
    #[arg(short, long, env = "LEDGERFILL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding rule-set JSON files
    #[arg(long, global = true)]
    rules_dir: Option<PathBuf>,

    /// Store rule sets in this SQLite file instead of a directory
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct CsvOptions {
    /// Field delimiter
    #[arg(long, default_value = ",")]
    delimiter: char,

    /// Leading metadata rows to skip before the header
    #[arg(long, default_value = "0")]
    skip_rows: usize,
}

impl CsvOptions {
    fn profile(&self) -> CsvImportProfile {
        CsvImportProfile {
            delimiter: self.delimiter.to_string(),
            skip_rows: self.skip_rows,
            ..CsvImportProfile::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Mine fill rules from a labeled CSV and store them
    Mine {
        /// Labeled historical statement
        input: PathBuf,

        /// Threshold preset (overrides the configured thresholds)
        #[arg(long, value_enum)]
        preset: Option<Preset>,

        /// Mine and report without saving
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        csv: CsvOptions,
    },

    /// Fill empty target cells of a CSV using the latest rule set
    Apply {
        /// Statement to fill
        input: PathBuf,

        /// Where to write the filled CSV
        #[arg(short, long)]
        output: PathBuf,

        /// Apply this rule-set file instead of the latest stored one
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Consider only the first N ranked rules
        #[arg(long)]
        max_rules: Option<usize>,

        /// Fail if protected data would change
        #[arg(long)]
        strict: bool,

        /// Copy reference codes from the description into empty Reference cells
        #[arg(long)]
        extract_references: bool,

        #[command(flatten)]
        csv: CsvOptions,
    },

    /// Compare a filled CSV with its labeled version
    Evaluate {
        /// Labeled statement
        truth: PathBuf,

        /// Filled statement
        output: PathBuf,

        #[command(flatten)]
        csv: CsvOptions,
    },

    /// Show a stored rule set (the latest when no id is given)
    Inspect {
        id: Option<String>,

        /// Number of rules to print
        #[arg(long, default_value = "20")]
        top: usize,
    },

    /// List stored rule sets, oldest first
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let format = cli.format;
    let (rules_dir, database) = (cli.rules_dir, cli.database);
    let open_store = || Store::open(&settings, rules_dir.as_deref(), database.as_deref());

    match cli.command {
        Commands::Mine {
            input,
            preset,
            dry_run,
            csv,
        } => {
            let args = MineArgs {
                input,
                profile: csv.profile(),
                preset,
                dry_run,
            };
            commands::mine(&settings, &open_store().await?, args, format).await
        }
        Commands::Apply {
            input,
            output,
            rules,
            max_rules,
            strict,
            extract_references,
            csv,
        } => {
            let args = ApplyArgs {
                input,
                output,
                profile: csv.profile(),
                rules,
                max_rules,
                strict,
                extract_references,
            };
            commands::apply(&settings, &open_store().await?, args, format)
                .await
                .map(|_| ())
        }
        Commands::Evaluate { truth, output, csv } => {
            commands::evaluate(&truth, &output, &csv.profile(), format).map(|_| ())
        }
        Commands::Inspect { id, top } => {
            commands::inspect(&open_store().await?, id.as_deref(), top, format).await
        }
        Commands::List => commands::list(&open_store().await?, format).await,
    }
}
