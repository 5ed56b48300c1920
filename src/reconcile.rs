//! Conversion metrics between activity customers and sales customers.
//!
//! `A` is the set of customer ids seen in the consolidated activity table and
//! `B` the set seen in the sales ledger. The headline rate divides the whole
//! sales population `|B|` by `|A|`; customers who bought without any logged
//! activity still count as sales. [`RatePolicy::Matched`] switches to
//! `|A ∩ B| / |A|` for callers that want the stricter definition.

use std::{collections::BTreeSet, path::Path};

use anyhow::{Context, Result};
use clap::ValueEnum;
use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    cli::ReconcileArgs,
    io_utils::{self, CsvFormat},
    normalize::{self, canonical_column},
    render,
    resolve::{self, ResolutionError, Role},
    table::Table,
    validate::id_set,
};

const SALES_ONLY_SAMPLE: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[value(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RatePolicy {
    /// All sales customers over all activity customers
    #[default]
    SalesPopulation,
    /// Activity customers who also appear in sales over all activity customers
    Matched,
}

impl RatePolicy {
    /// Percentage rate; zero when there is no activity population.
    pub fn rate(
        self,
        total_customers: usize,
        converted_customers: usize,
        all_sales_customers: usize,
    ) -> f64 {
        if total_customers == 0 {
            return 0.0;
        }
        let numerator = match self {
            RatePolicy::SalesPopulation => all_sales_customers,
            RatePolicy::Matched => converted_customers,
        };
        numerator as f64 / total_customers as f64 * 100.0
    }
}

/// Opaque (person, month, report type) label a reconciliation runs under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub person: String,
    pub month: String,
    pub report_type: String,
}

impl PartitionKey {
    pub fn new(
        person: impl Into<String>,
        month: impl Into<String>,
        report_type: impl Into<String>,
    ) -> Self {
        Self {
            person: person.into(),
            month: month.into(),
            report_type: report_type.into(),
        }
    }

    /// File name prefix such as `alice_month_03_isr_`.
    pub fn file_prefix(&self) -> String {
        format!("{}_month_{}_{}_", self.person, self.month, self.report_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionMetrics {
    pub person: String,
    pub month: String,
    pub report_type: String,
    pub total_customers: usize,
    pub converted_customers: usize,
    pub all_sales_customers: usize,
    #[serde(serialize_with = "serialize_rate")]
    pub conversion_rate: f64,
    pub customers_not_converted: usize,
    pub sales_only_customers: usize,
}

impl ConversionMetrics {
    pub fn key(&self) -> PartitionKey {
        PartitionKey::new(&self.person, &self.month, &self.report_type)
    }
}

pub(crate) fn round_rate(rate: f64) -> f64 {
    (rate * 100.0).round() / 100.0
}

pub(crate) fn serialize_rate<S>(rate: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(round_rate(*rate))
}

/// Metrics plus the per-customer detail slices for report renderers.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub metrics: ConversionMetrics,
    pub non_converted: Table,
    pub converted: Table,
    pub sales_only: Table,
}

pub fn execute(args: &ReconcileArgs) -> Result<()> {
    let format = CsvFormat::from_labels(
        args.delimiter,
        args.input_encoding.as_deref(),
        args.output_encoding.as_deref(),
    )?;
    let consolidated = Table::load(&args.consolidated, &format)
        .with_context(|| format!("Loading consolidated activity {:?}", args.consolidated))?;
    let sales = Table::load(&args.sales, &format)
        .with_context(|| format!("Loading sales ledger {:?}", args.sales))?;
    let key = PartitionKey::new(
        args.person.as_deref().unwrap_or("Unknown"),
        args.month.as_deref().unwrap_or("Unknown"),
        args.report_type.as_deref().unwrap_or("Unknown"),
    );

    let result = reconcile(&consolidated, &sales, &key, args.rate_policy)?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result.metrics).context("Serializing metrics")?
        );
    } else {
        render::print_metrics(&result.metrics);
    }
    if let Some(dir) = &args.output_dir {
        write_reconciliation(dir, &result, &format)?;
    }
    Ok(())
}

/// Computes conversion metrics for one partition.
pub fn reconcile(
    consolidated: &Table,
    sales: &Table,
    key: &PartitionKey,
    policy: RatePolicy,
) -> Result<Reconciliation, ResolutionError> {
    let consolidated_customer =
        resolve::resolve(consolidated, Role::CustomerIdentifier, "consolidated activity")?;
    let sales_customer = resolve::resolve(sales, Role::CustomerIdentifier, "sales ledger")?;
    info!(
        "Comparing customers: consolidated '{}' vs sales '{}'",
        consolidated_customer.column, sales_customer.column
    );

    let mut consolidated = consolidated.clone();
    let mut sales = sales.clone();
    normalize::normalize_column_in_place(&mut consolidated, consolidated_customer.index);
    normalize::normalize_column_in_place(&mut sales, sales_customer.index);
    let activity_ids = canonical_column(&consolidated, consolidated_customer.index);
    let sales_ids = canonical_column(&sales, sales_customer.index);

    let a = id_set(&activity_ids);
    let b = id_set(&sales_ids);
    let metrics = compute_metrics(&a, &b, key, policy);

    let sales_only: BTreeSet<String> = b.difference(&a).cloned().collect();
    if !sales_only.is_empty() {
        warn!(
            "{} customer(s) in the sales ledger do not appear in activity logs, e.g. [{}]",
            sales_only.len(),
            sales_only.iter().take(SALES_ONLY_SAMPLE).join(", ")
        );
    }
    let matching: BTreeSet<String> = a.intersection(&b).cloned().collect();
    let not_converted: BTreeSet<String> = a.difference(&b).cloned().collect();
    info!(
        "{}: {} activity customer(s), {} converted, {} sales customer(s), rate {:.2}%",
        describe(key),
        metrics.total_customers,
        metrics.converted_customers,
        metrics.all_sales_customers,
        metrics.conversion_rate
    );

    Ok(Reconciliation {
        non_converted: first_rows_for(&consolidated, &activity_ids, &not_converted),
        converted: first_rows_for(&consolidated, &activity_ids, &matching),
        sales_only: first_rows_for(&sales, &sales_ids, &sales_only),
        metrics,
    })
}

/// Set arithmetic behind every metrics record.
pub fn compute_metrics(
    activity: &BTreeSet<String>,
    sales: &BTreeSet<String>,
    key: &PartitionKey,
    policy: RatePolicy,
) -> ConversionMetrics {
    let total_customers = activity.len();
    let converted_customers = activity.intersection(sales).count();
    let all_sales_customers = sales.len();
    ConversionMetrics {
        person: key.person.clone(),
        month: key.month.clone(),
        report_type: key.report_type.clone(),
        total_customers,
        converted_customers,
        all_sales_customers,
        conversion_rate: policy.rate(total_customers, converted_customers, all_sales_customers),
        customers_not_converted: total_customers - converted_customers,
        sales_only_customers: sales.difference(activity).count(),
    }
}

/// First row for each id in `wanted`, in table order.
fn first_rows_for(table: &Table, ids: &[String], wanted: &BTreeSet<String>) -> Table {
    let mut seen = BTreeSet::new();
    let rows = ids
        .iter()
        .enumerate()
        .filter(|(_, id)| wanted.contains(*id) && seen.insert((*id).clone()))
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    table.select_rows(&rows)
}

fn describe(key: &PartitionKey) -> String {
    format!("{} / month {} / {}", key.person, key.month, key.report_type)
}

/// Writes the metrics row and the non-empty detail slices into `dir`.
pub fn write_reconciliation(dir: &Path, result: &Reconciliation, format: &CsvFormat) -> Result<()> {
    let prefix = result.metrics.key().file_prefix();
    let slices = [
        ("non_converted_customers.csv", &result.non_converted),
        ("converted_customers.csv", &result.converted),
        ("sales_only_customers.csv", &result.sales_only),
    ];
    for (name, table) in slices {
        if table.is_empty() {
            continue;
        }
        let path = dir.join(format!("{prefix}{name}"));
        table
            .save(Some(&path), format)
            .with_context(|| format!("Writing {path:?}"))?;
    }
    let report_path = dir.join(format!("{prefix}sales_conversion_report.csv"));
    write_metrics(&report_path, std::slice::from_ref(&result.metrics), format)?;
    info!("Summary report saved to {report_path:?}");
    Ok(())
}

pub fn write_metrics(path: &Path, records: &[ConversionMetrics], format: &CsvFormat) -> Result<()> {
    let mut writer = io_utils::open_csv_writer(
        Some(path),
        format.output_delimiter(Some(path)),
        format.output_encoding,
    )?;
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("Writing metrics row to {path:?}"))?;
    }
    writer.flush().context("Flushing metrics output")?;
    Ok(())
}

pub fn read_metrics(path: &Path, format: &CsvFormat) -> Result<Vec<ConversionMetrics>> {
    let mut reader = io_utils::open_csv_reader_from_path(path, format.input_delimiter(path))?;
    reader
        .deserialize::<ConversionMetrics>()
        .enumerate()
        .map(|(idx, row)| {
            row.with_context(|| format!("Reading metrics row {} in {path:?}", idx + 2))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::cell_text;

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sales_population_rate_counts_sales_only_customers() {
        let key = PartitionKey::new("alice", "03", "isr");
        let metrics = compute_metrics(
            &ids(&["1", "2", "3"]),
            &ids(&["2", "3", "4"]),
            &key,
            RatePolicy::SalesPopulation,
        );
        assert_eq!(metrics.total_customers, 3);
        assert_eq!(metrics.converted_customers, 2);
        assert_eq!(metrics.all_sales_customers, 3);
        assert_eq!(metrics.sales_only_customers, 1);
        assert_eq!(metrics.customers_not_converted, 1);
        assert_eq!(metrics.conversion_rate, 100.0);
    }

    #[test]
    fn matched_policy_uses_intersection() {
        let key = PartitionKey::default();
        let metrics = compute_metrics(
            &ids(&["1", "2", "3", "5"]),
            &ids(&["2", "3", "4"]),
            &key,
            RatePolicy::Matched,
        );
        assert_eq!(metrics.conversion_rate, 50.0);
    }

    #[test]
    fn empty_population_has_zero_rate() {
        let metrics = compute_metrics(
            &ids(&[]),
            &ids(&["9"]),
            &PartitionKey::default(),
            RatePolicy::SalesPopulation,
        );
        assert_eq!(metrics.total_customers, 0);
        assert_eq!(metrics.conversion_rate, 0.0);
        assert_eq!(metrics.sales_only_customers, 1);
    }

    #[test]
    fn reconcile_normalizes_ids_and_slices_details() {
        let consolidated = Table::from_text_rows(
            &["Customer Name", "Customer ID", "Job ID", "Action Performed", "Count"],
            &[
                vec!["A", "1", "10", "Call", "2"],
                vec!["A", "2", "11", "Call", "1"],
                vec!["A", "2", "11", "Email", "1"],
                vec!["B", "3", "12", "Call", "1"],
            ],
        );
        let sales = Table::from_text_rows(
            &["Job #", "Customer Id #", "Amount"],
            &[vec!["11", "2.0", "100"], vec!["12", "3.0", "50"], vec!["13", "4.0", "75"]],
        );
        let key = PartitionKey::new("bob", "04", "isr");
        let result = reconcile(&consolidated, &sales, &key, RatePolicy::SalesPopulation).unwrap();
        assert_eq!(result.metrics.total_customers, 3);
        assert_eq!(result.metrics.converted_customers, 2);
        assert_eq!(result.metrics.conversion_rate, 100.0);
        assert_eq!(result.converted.len(), 2);
        assert_eq!(result.non_converted.len(), 1);
        assert_eq!(cell_text(&result.non_converted.rows()[0][1]), "1");
        assert_eq!(result.sales_only.len(), 1);
        assert_eq!(cell_text(&result.sales_only.rows()[0][1]), "4");
    }

    #[test]
    fn persisted_rate_is_rounded() {
        assert_eq!(round_rate(66.666_666), 66.67);
        assert_eq!(round_rate(0.0), 0.0);
    }

    #[test]
    fn file_prefix_joins_partition_labels() {
        assert_eq!(PartitionKey::new("ann", "05", "isr").file_prefix(), "ann_month_05_isr_");
    }
}
