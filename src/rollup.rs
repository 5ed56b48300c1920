use std::{collections::BTreeMap, ops::AddAssign, path::Path};

use anyhow::{Context, Result};
use log::info;

use crate::{
    cli::RollupArgs,
    io_utils::{self, CsvFormat},
    reconcile::{self, ConversionMetrics, RatePolicy, round_rate},
};

pub const FLAT_REPORT: &str = "consolidated_sales_report.csv";
pub const MONTHLY_REPORT: &str = "monthly_sales_report.csv";
pub const PERSON_REPORT: &str = "person_sales_report.csv";

const ROLLUP_FIELDS: &[&str] = &[
    "total_customers",
    "converted_customers",
    "all_sales_customers",
    "customers_not_converted",
    "sales_only_customers",
    "conversion_rate",
];

/// Additive counts carried through a roll-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub total_customers: usize,
    pub converted_customers: usize,
    pub all_sales_customers: usize,
    pub customers_not_converted: usize,
    pub sales_only_customers: usize,
}

impl AddAssign<&ConversionMetrics> for Totals {
    fn add_assign(&mut self, record: &ConversionMetrics) {
        self.total_customers += record.total_customers;
        self.converted_customers += record.converted_customers;
        self.all_sales_customers += record.all_sales_customers;
        self.customers_not_converted += record.customers_not_converted;
        self.sales_only_customers += record.sales_only_customers;
    }
}

impl AddAssign for Totals {
    fn add_assign(&mut self, other: Totals) {
        self.total_customers += other.total_customers;
        self.converted_customers += other.converted_customers;
        self.all_sales_customers += other.all_sales_customers;
        self.customers_not_converted += other.customers_not_converted;
        self.sales_only_customers += other.sales_only_customers;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RollupRow {
    pub key: String,
    pub totals: Totals,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone)]
pub struct Rollup {
    pub flat: Vec<ConversionMetrics>,
    pub by_month: Vec<RollupRow>,
    pub by_person: Vec<RollupRow>,
}

pub fn execute(args: &RollupArgs) -> Result<()> {
    let format = CsvFormat::from_labels(
        args.delimiter,
        args.input_encoding.as_deref(),
        args.output_encoding.as_deref(),
    )?;
    let records = reconcile::read_metrics(&args.input, &format)
        .with_context(|| format!("Loading metrics from {:?}", args.input))?;
    info!("Loaded {} partition record(s)", records.len());
    match rollup(&records, args.rate_policy) {
        Some(result) => write_rollup(&args.output_dir, &result, &format),
        None => {
            info!("No reports to consolidate");
            Ok(())
        }
    }
}

/// Groups partition records by month and by person; `None` when there is nothing to report.
pub fn rollup(records: &[ConversionMetrics], policy: RatePolicy) -> Option<Rollup> {
    if records.is_empty() {
        return None;
    }
    Some(Rollup {
        flat: records.to_vec(),
        by_month: group_by(records, |r| r.month.as_str(), policy),
        by_person: group_by(records, |r| r.person.as_str(), policy),
    })
}

/// Sums counts per key (sorted ascending) and recomputes the rate from the sums.
pub fn group_by<F>(records: &[ConversionMetrics], key: F, policy: RatePolicy) -> Vec<RollupRow>
where
    F: Fn(&ConversionMetrics) -> &str,
{
    let mut groups: BTreeMap<String, Totals> = BTreeMap::new();
    for record in records {
        *groups.entry(key(record).to_string()).or_default() += record;
    }
    groups
        .into_iter()
        .map(|(key, totals)| RollupRow {
            key,
            conversion_rate: policy.rate(
                totals.total_customers,
                totals.converted_customers,
                totals.all_sales_customers,
            ),
            totals,
        })
        .collect()
}

pub fn write_rollup(dir: &Path, rollup: &Rollup, format: &CsvFormat) -> Result<()> {
    let flat_path = dir.join(FLAT_REPORT);
    reconcile::write_metrics(&flat_path, &rollup.flat, format)?;
    info!("Consolidated report for all people and months saved to {flat_path:?}");

    let month_path = dir.join(MONTHLY_REPORT);
    write_rollup_rows(&month_path, "month", &rollup.by_month, format)?;
    info!("Monthly report saved to {month_path:?}");

    let person_path = dir.join(PERSON_REPORT);
    write_rollup_rows(&person_path, "person", &rollup.by_person, format)?;
    info!("Per-person report saved to {person_path:?}");
    Ok(())
}

fn write_rollup_rows(
    path: &Path,
    key_header: &str,
    rows: &[RollupRow],
    format: &CsvFormat,
) -> Result<()> {
    let mut writer = io_utils::open_csv_writer(
        Some(path),
        format.output_delimiter(Some(path)),
        format.output_encoding,
    )?;
    let mut headers = vec![key_header];
    headers.extend_from_slice(ROLLUP_FIELDS);
    writer.write_record(&headers).context("Writing roll-up headers")?;
    for row in rows {
        let t = &row.totals;
        writer
            .write_record([
                row.key.clone(),
                t.total_customers.to_string(),
                t.converted_customers.to_string(),
                t.all_sales_customers.to_string(),
                t.customers_not_converted.to_string(),
                t.sales_only_customers.to_string(),
                format!("{:.2}", round_rate(row.conversion_rate)),
            ])
            .with_context(|| format!("Writing roll-up row for '{}'", row.key))?;
    }
    writer.flush().context("Flushing roll-up output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        person: &str,
        month: &str,
        total: usize,
        converted: usize,
        sales: usize,
    ) -> ConversionMetrics {
        ConversionMetrics {
            person: person.to_string(),
            month: month.to_string(),
            report_type: "isr".to_string(),
            total_customers: total,
            converted_customers: converted,
            all_sales_customers: sales,
            conversion_rate: RatePolicy::SalesPopulation.rate(total, converted, sales),
            customers_not_converted: total - converted,
            sales_only_customers: sales - converted,
        }
    }

    #[test]
    fn empty_input_produces_nothing() {
        assert!(rollup(&[], RatePolicy::SalesPopulation).is_none());
    }

    #[test]
    fn month_rate_is_recomputed_from_sums() {
        let records = vec![record("ann", "01", 10, 1, 1), record("bob", "01", 2, 2, 2)];
        let result = rollup(&records, RatePolicy::SalesPopulation).unwrap();
        assert_eq!(result.flat.len(), 2);
        assert_eq!(result.by_month.len(), 1);
        let month = &result.by_month[0];
        assert_eq!(month.totals.total_customers, 12);
        assert_eq!(month.totals.all_sales_customers, 3);
        assert_eq!(month.conversion_rate, 25.0);
        // Averaging the per-partition rates would give 55%.
        assert_ne!(month.conversion_rate, (10.0 + 100.0) / 2.0);
    }

    #[test]
    fn person_groups_are_sorted_by_key() {
        let records = vec![
            record("zoe", "02", 4, 1, 2),
            record("ann", "01", 5, 0, 0),
            record("zoe", "03", 0, 0, 3),
        ];
        let result = rollup(&records, RatePolicy::SalesPopulation).unwrap();
        let keys = result.by_person.iter().map(|r| r.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["ann", "zoe"]);
        assert_eq!(result.by_person[1].totals.all_sales_customers, 5);
        assert_eq!(result.by_person[1].conversion_rate, 125.0);
        assert_eq!(result.by_person[0].conversion_rate, 0.0);
    }

    #[test]
    fn zero_population_group_has_zero_rate() {
        let records = vec![record("ann", "01", 0, 0, 4)];
        let result = rollup(&records, RatePolicy::Matched).unwrap();
        assert_eq!(result.by_month[0].conversion_rate, 0.0);
    }
}
