use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::reconcile::RatePolicy;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile sales activity against job and commission reports",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Join an activity log to a job report and count actions per customer job
    Enrich(EnrichArgs),
    /// Check that every sales job appears in a consolidated activity file
    Validate(ValidateArgs),
    /// Compute conversion metrics between consolidated activity and sales
    Reconcile(ReconcileArgs),
    /// Process every partition listed in a manifest and write roll-up reports
    Run(RunArgs),
    /// Rebuild monthly and per-person reports from a consolidated sales report
    Rollup(RollupArgs),
}

#[derive(Debug, Args)]
pub struct EnrichArgs {
    /// Sales activity log (one row per event)
    #[arg(short = 'a', long = "activity")]
    pub activity: PathBuf,
    /// Job report with customer details per job
    #[arg(short = 'j', long = "jobs")]
    pub jobs: PathBuf,
    /// Write the row-per-event enriched log here
    #[arg(long = "detailed")]
    pub detailed: Option<PathBuf>,
    /// Consolidated output (stdout if omitted)
    #[arg(short = 'o', long = "consolidated")]
    pub consolidated: Option<PathBuf>,
    /// Columns that vary between events of one job (defaults to Action Performed, Date, Time)
    #[arg(long = "activity-columns", value_delimiter = ',')]
    pub activity_columns: Vec<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Character encoding for output files (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Consolidated activity file produced by `enrich`
    #[arg(short = 'c', long = "consolidated")]
    pub consolidated: PathBuf,
    /// Sales or commission report
    #[arg(short = 's', long = "sales")]
    pub sales: PathBuf,
    /// Write sales rows for missing jobs here
    #[arg(long = "missing")]
    pub missing: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Character encoding for output files (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Consolidated activity file produced by `enrich`
    #[arg(short = 'c', long = "consolidated")]
    pub consolidated: PathBuf,
    /// Sales or commission report
    #[arg(short = 's', long = "sales")]
    pub sales: PathBuf,
    /// Person label for the report
    #[arg(long)]
    pub person: Option<String>,
    /// Month label for the report
    #[arg(long)]
    pub month: Option<String>,
    /// Report type label
    #[arg(long = "report-type")]
    pub report_type: Option<String>,
    /// Directory for the metrics row and customer detail files
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,
    /// How the conversion rate numerator is chosen
    #[arg(long = "rate-policy", value_enum, default_value = "sales-population")]
    pub rate_policy: RatePolicy,
    /// Print metrics as JSON instead of a table
    #[arg(long)]
    pub json: bool,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Character encoding for output files (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// YAML manifest listing partitions and their input files
    #[arg(short = 'm', long = "manifest")]
    pub manifest: PathBuf,
    /// Root directory for per-partition and roll-up reports
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: PathBuf,
    /// Override the manifest's conversion rate policy
    #[arg(long = "rate-policy", value_enum)]
    pub rate_policy: Option<RatePolicy>,
    /// Skip the converted / non-converted / sales-only customer files
    #[arg(long = "no-details")]
    pub no_details: bool,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Character encoding for output files (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct RollupArgs {
    /// Consolidated sales report written by `run`
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Directory for the roll-up reports
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: PathBuf,
    /// How the conversion rate numerator is chosen
    #[arg(long = "rate-policy", value_enum, default_value = "sales-population")]
    pub rate_policy: RatePolicy,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Character encoding for output files (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
