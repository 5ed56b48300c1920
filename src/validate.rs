use std::collections::BTreeSet;

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};

use crate::{
    cli::ValidateArgs,
    io_utils::CsvFormat,
    normalize::canonical_column,
    resolve::{self, ResolutionError, Role},
    table::Table,
};

const MISSING_SAMPLE: usize = 20;

/// Cross-check of sales jobs against consolidated activity.
#[derive(Debug, Clone)]
pub struct Completeness {
    pub is_complete: bool,
    pub missing_job_ids: BTreeSet<String>,
    pub consolidated_jobs: usize,
    pub sales_jobs: usize,
    /// Sales rows whose job id never shows up in the activity log.
    pub missing_details: Table,
}

pub fn execute(args: &ValidateArgs) -> Result<()> {
    let format = CsvFormat::from_labels(
        args.delimiter,
        args.input_encoding.as_deref(),
        args.output_encoding.as_deref(),
    )?;
    let consolidated = Table::load(&args.consolidated, &format)
        .with_context(|| format!("Loading consolidated activity {:?}", args.consolidated))?;
    let sales = Table::load(&args.sales, &format)
        .with_context(|| format!("Loading sales ledger {:?}", args.sales))?;

    let report = validate(&consolidated, &sales)?;
    if let Some(path) = &args.missing
        && !report.is_complete
    {
        report
            .missing_details
            .save(Some(path), &format)
            .with_context(|| format!("Writing missing sales jobs to {path:?}"))?;
        info!("Details of missing jobs saved to {path:?}");
    }
    Ok(())
}

/// Reports sales job ids that are absent from the consolidated table.
pub fn validate(consolidated: &Table, sales: &Table) -> Result<Completeness, ResolutionError> {
    let consolidated_job =
        resolve::resolve(consolidated, Role::JobIdentifier, "consolidated activity")?;
    let sales_job = resolve::resolve(sales, Role::JobIdentifier, "sales ledger")?;
    info!(
        "Comparing job ids: consolidated '{}' vs sales '{}'",
        consolidated_job.column, sales_job.column
    );

    let consolidated_ids = id_set(&canonical_column(consolidated, consolidated_job.index));
    let sales_canonical = canonical_column(sales, sales_job.index);
    let sales_ids = id_set(&sales_canonical);
    let missing: BTreeSet<String> = sales_ids.difference(&consolidated_ids).cloned().collect();

    info!(
        "Unique jobs: {} in consolidated activity, {} in sales",
        consolidated_ids.len(),
        sales_ids.len()
    );
    if missing.is_empty() {
        info!("All sales jobs are present in the consolidated activity list");
    } else {
        let more = missing.len().saturating_sub(MISSING_SAMPLE);
        warn!(
            "{} sales job(s) are not in the consolidated activity list: [{}]{}",
            missing.len(),
            missing.iter().take(MISSING_SAMPLE).join(", "),
            if more > 0 { format!(" and {more} more") } else { String::new() }
        );
    }

    let missing_rows = sales_canonical
        .iter()
        .enumerate()
        .filter(|(_, id)| missing.contains(*id))
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();

    Ok(Completeness {
        is_complete: missing.is_empty(),
        consolidated_jobs: consolidated_ids.len(),
        sales_jobs: sales_ids.len(),
        missing_details: sales.select_rows(&missing_rows),
        missing_job_ids: missing,
    })
}

/// Distinct non-empty canonical identifiers.
pub(crate) fn id_set(canonical: &[String]) -> BTreeSet<String> {
    canonical
        .iter()
        .filter(|id| !id.is_empty())
        .cloned()
        .collect()
}
