use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::Serialize;

use crate::{
    cli::RunArgs,
    enrich::{self, EnrichOptions},
    io_utils::{self, CsvFormat},
    manifest::{Manifest, PartitionSpec},
    reconcile::{self, ConversionMetrics, PartitionKey, RatePolicy},
    resolve::ResolutionError,
    rollup,
    table::Table,
    validate,
};

pub const DIAGNOSTICS_REPORT: &str = "partition_diagnostics.csv";

/// Settings shared by every partition in a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub rate_policy: RatePolicy,
    pub enrich: EnrichOptions,
    pub write_details: bool,
    pub format: CsvFormat,
}

/// Non-fatal findings recorded for one partition.
///
/// The completeness fields are empty when the sales ledger has no job column.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PartitionDiagnostics {
    pub person: String,
    pub month: String,
    pub report_type: String,
    pub unmatched_activity_rows: usize,
    pub excluded_activity_rows: usize,
    pub missing_sales_jobs: Option<usize>,
    pub is_complete: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    pub metrics: ConversionMetrics,
    pub diagnostics: PartitionDiagnostics,
}

pub fn execute(args: &RunArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;
    let settings = RunSettings {
        rate_policy: args
            .rate_policy
            .or(manifest.rate_policy)
            .unwrap_or_default(),
        enrich: manifest
            .activity_columns
            .clone()
            .map(|activity_columns| EnrichOptions { activity_columns })
            .unwrap_or_default(),
        write_details: !args.no_details && manifest.write_details.unwrap_or(true),
        format: CsvFormat::from_labels(
            args.delimiter,
            args.input_encoding.as_deref(),
            args.output_encoding.as_deref(),
        )?,
    };
    info!(
        "Running {} partition(s) from {:?} with {:?} conversion rate",
        manifest.partitions.len(),
        args.manifest,
        settings.rate_policy
    );
    run_partitions(&manifest.partitions, &args.output_dir, &settings)?;
    Ok(())
}

/// Runs every partition, then writes the roll-ups and diagnostics into `output_dir`.
///
/// Partitions whose identifier columns cannot be resolved are skipped; any
/// other failure aborts the run.
pub fn run_partitions(
    partitions: &[PartitionSpec],
    output_dir: &Path,
    settings: &RunSettings,
) -> Result<Vec<PartitionOutcome>> {
    let mut outcomes = Vec::new();
    for partition in partitions {
        let key = partition.key();
        match run_partition(partition, output_dir, settings) {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => match err.downcast_ref::<ResolutionError>() {
                Some(resolution) => {
                    warn!(
                        "Skipping {} / month {} / {}: {resolution}",
                        key.person, key.month, key.report_type
                    );
                }
                None => {
                    error!(
                        "Processing {} / month {} / {} failed",
                        key.person, key.month, key.report_type
                    );
                    return Err(err);
                }
            },
        }
    }

    let records = outcomes
        .iter()
        .map(|o| o.metrics.clone())
        .collect::<Vec<_>>();
    match rollup::rollup(&records, settings.rate_policy) {
        Some(result) => {
            rollup::write_rollup(output_dir, &result, &settings.format)?;
            write_diagnostics(
                &output_dir.join(DIAGNOSTICS_REPORT),
                outcomes.iter().map(|o| &o.diagnostics),
                &settings.format,
            )?;
        }
        None => info!("No reports to consolidate"),
    }
    info!(
        "Processed {} of {} partition(s)",
        outcomes.len(),
        partitions.len()
    );
    Ok(outcomes)
}

pub fn partition_dir(output_dir: &Path, key: &PartitionKey) -> PathBuf {
    output_dir
        .join(&key.person)
        .join(format!("month_{}", key.month))
        .join(&key.report_type)
}

/// Enrich, validate and reconcile one partition, writing its artifacts.
pub fn run_partition(
    partition: &PartitionSpec,
    output_dir: &Path,
    settings: &RunSettings,
) -> Result<PartitionOutcome> {
    let key = partition.key();
    info!(
        "Processing {} / month {} / {}",
        key.person, key.month, key.report_type
    );
    let format = &settings.format;
    let activity = load(&partition.activity, "activity log", format)?;
    let jobs = load(&partition.jobs, "job report", format)?;
    let sales = load(&partition.sales, "sales ledger", format)?;

    let dir = partition_dir(output_dir, &key);
    let prefix = key.file_prefix();
    let artifact = |name: &str| dir.join(format!("{prefix}{name}"));

    // Everything is computed before the first write so a skipped partition leaves no files behind.
    let enrichment = enrich::enrich(&activity, &jobs, &settings.enrich)?;
    let completeness = validate::validate(&enrichment.consolidated, &sales);
    let reconciliation = reconcile::reconcile(
        &enrichment.consolidated,
        &sales,
        &key,
        settings.rate_policy,
    )?;

    enrichment
        .enriched
        .save(Some(&artifact("detailed_activity_logs.csv")), format)?;
    enrichment
        .consolidated
        .save(Some(&artifact("consolidated_activity_logs.csv")), format)?;

    // Completeness is a diagnostic only; a sales ledger without job ids still reconciles.
    let (missing_sales_jobs, is_complete) = match completeness {
        Ok(report) => {
            if !report.is_complete {
                report
                    .missing_details
                    .save(Some(&artifact("missing_sales_jobs.csv")), format)?;
            }
            (Some(report.missing_job_ids.len()), Some(report.is_complete))
        }
        Err(err) => {
            warn!("Skipping completeness check: {err}");
            (None, None)
        }
    };

    if settings.write_details {
        reconcile::write_reconciliation(&dir, &reconciliation, format)?;
    } else {
        reconcile::write_metrics(
            &artifact("sales_conversion_report.csv"),
            std::slice::from_ref(&reconciliation.metrics),
            format,
        )?;
    }

    Ok(PartitionOutcome {
        metrics: reconciliation.metrics,
        diagnostics: PartitionDiagnostics {
            person: key.person,
            month: key.month,
            report_type: key.report_type,
            unmatched_activity_rows: enrichment.unmatched_rows,
            excluded_activity_rows: enrichment.excluded_rows,
            missing_sales_jobs,
            is_complete,
        },
    })
}

fn load(path: &Path, what: &str, format: &CsvFormat) -> Result<Table> {
    let table = Table::load(path, format).with_context(|| format!("Loading {what} {path:?}"))?;
    info!("Loaded {} row(s) from {what} {path:?}", table.len());
    Ok(table)
}

fn write_diagnostics<'a, I>(path: &Path, rows: I, format: &CsvFormat) -> Result<()>
where
    I: IntoIterator<Item = &'a PartitionDiagnostics>,
{
    let mut writer = io_utils::open_csv_writer(
        Some(path),
        format.output_delimiter(Some(path)),
        format.output_encoding,
    )?;
    for row in rows {
        writer
            .serialize(row)
            .context("Writing partition diagnostics")?;
    }
    writer.flush().context("Flushing partition diagnostics")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn settings() -> RunSettings {
        RunSettings {
            rate_policy: RatePolicy::SalesPopulation,
            enrich: EnrichOptions::default(),
            write_details: false,
            format: CsvFormat::default(),
        }
    }

    fn partition(dir: &Path, sales: &str) -> PartitionSpec {
        let write = |name: &str, contents: &str| {
            let path = dir.join(name);
            fs::write(&path, contents).unwrap();
            path
        };
        PartitionSpec {
            person: "ann".into(),
            month: "05".into(),
            report_type: "isr".into(),
            activity: write("activity.csv", "Job ID,Action Performed\n101,Call\n102,Email\n"),
            jobs: write(
                "jobs.csv",
                "Job ID,Customer ID,Customer Name\n101,1,Alpha\n102,2,Beta\n",
            ),
            sales: write("sales.csv", sales),
        }
    }

    #[test]
    fn completeness_is_blank_when_sales_have_no_job_column() {
        let dir = tempdir().unwrap();
        let spec = partition(dir.path(), "Customer ID,Amount\n1,10\n");
        let outcome = run_partition(&spec, &dir.path().join("out"), &settings()).unwrap();
        assert_eq!(outcome.diagnostics.missing_sales_jobs, None);
        assert_eq!(outcome.diagnostics.is_complete, None);
        assert_eq!(outcome.metrics.converted_customers, 1);

        let path = dir.path().join("diagnostics.csv");
        write_diagnostics(&path, [&outcome.diagnostics], &CsvFormat::default()).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[5], "");
        assert_eq!(&record[6], "");
    }

    #[test]
    fn completeness_is_recorded_when_checked() {
        let dir = tempdir().unwrap();
        let spec = partition(dir.path(), "Job ID,Customer ID\n101,1\n103,3\n");
        let outcome = run_partition(&spec, &dir.path().join("out"), &settings()).unwrap();
        assert_eq!(outcome.diagnostics.missing_sales_jobs, Some(1));
        assert_eq!(outcome.diagnostics.is_complete, Some(false));
    }

    #[test]
    fn partition_dir_nests_person_month_and_type() {
        let key = PartitionKey::new("ann", "07", "isr");
        assert_eq!(
            partition_dir(Path::new("out"), &key),
            PathBuf::from("out/ann/month_07/isr")
        );
    }
}
