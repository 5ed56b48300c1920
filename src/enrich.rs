use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{debug, info, warn};

use crate::{
    cli::EnrichArgs,
    io_utils::CsvFormat,
    normalize::{self, canonical_column},
    resolve::{self, Binding, MatchRule, ResolutionError, Role},
    table::{Cell, Table, Value, cell_text},
};

pub const COUNT_COLUMN: &str = "Count";
pub const PLACEHOLDER_VALUE: &str = "Unknown";
pub const DEFAULT_ACTIVITY_COLUMNS: &[&str] = &["Action Performed", "Date", "Time"];
const UNMATCHED_SAMPLE: usize = 5;

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Columns that vary between events of the same job; compared case-insensitively.
    pub activity_columns: Vec<String>,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            activity_columns: DEFAULT_ACTIVITY_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// Column bindings used to build the consolidated table.
#[derive(Debug, Clone)]
pub struct GroupColumns {
    pub customer_name: String,
    pub customer_id: String,
    pub job_id: String,
    pub action: String,
}

#[derive(Debug, Clone)]
pub struct Enrichment {
    /// One row per activity event with reference columns attached.
    pub enriched: Table,
    /// One row per (customer, job, action) with an event count.
    pub consolidated: Table,
    pub group_columns: GroupColumns,
    /// Activity rows whose job id had no reference match.
    pub unmatched_rows: usize,
    /// Enriched rows left out of the counts because a group key was empty.
    pub excluded_rows: usize,
    /// Roles that had to be filled with a placeholder column.
    pub placeholders: Vec<Role>,
}

pub fn execute(args: &EnrichArgs) -> Result<()> {
    let format = CsvFormat::from_labels(
        args.delimiter,
        args.input_encoding.as_deref(),
        args.output_encoding.as_deref(),
    )?;
    let activity = Table::load(&args.activity, &format)
        .with_context(|| format!("Loading activity log {:?}", args.activity))?;
    let jobs = Table::load(&args.jobs, &format)
        .with_context(|| format!("Loading job report {:?}", args.jobs))?;
    info!(
        "Activity log contains {} entries, job report contains {} jobs",
        activity.len(),
        jobs.len()
    );

    let options = EnrichOptions {
        activity_columns: if args.activity_columns.is_empty() {
            EnrichOptions::default().activity_columns
        } else {
            args.activity_columns.clone()
        },
    };
    let enrichment = enrich(&activity, &jobs, &options)?;

    if let Some(path) = &args.detailed {
        enrichment
            .enriched
            .save(Some(path), &format)
            .with_context(|| format!("Writing detailed activity to {path:?}"))?;
    }
    enrichment
        .consolidated
        .save(args.consolidated.as_deref(), &format)
        .context("Writing consolidated activity")?;
    Ok(())
}

/// Joins activity events to the job reference and counts actions per job.
pub fn enrich(
    activity: &Table,
    reference: &Table,
    options: &EnrichOptions,
) -> Result<Enrichment, ResolutionError> {
    let activity_job = resolve::resolve(activity, Role::JobIdentifier, "activity log")?;
    let reference_job = resolve::resolve(reference, Role::JobIdentifier, "job report")?;
    if activity_job.column != reference_job.column {
        debug!(
            "Job id column differs between activity ('{}') and job report ('{}')",
            activity_job.column, reference_job.column
        );
    }

    let mut activity = activity.clone();
    let mut reference = reference.clone();
    for table in [&mut activity, &mut reference] {
        let swept = normalize::normalize_identifier_columns(table);
        debug!("Normalized identifier columns: {:?}", swept);
    }
    normalize::normalize_column_in_place(&mut activity, activity_job.index);
    normalize::normalize_column_in_place(&mut reference, reference_job.index);

    let (mut enriched, unmatched_rows) =
        left_join(&activity, &reference, activity_job.index, reference_job.index);
    info!(
        "Joined {} activity row(s) on '{}'; enriched table has {} row(s)",
        activity.len(),
        activity_job.column,
        enriched.len()
    );

    let mut placeholders = Vec::new();
    let customer_id =
        bind_or_placeholder(&mut enriched, Role::CustomerIdentifier, &mut placeholders);
    let customer_name = bind_or_placeholder(&mut enriched, Role::CustomerName, &mut placeholders);
    let action = resolve::resolve(&enriched, Role::Action, "enriched activity log")?;
    let job = Binding {
        role: Role::JobIdentifier,
        index: activity_job.index,
        column: activity_job.column.clone(),
        rule: activity_job.rule,
    };

    let (consolidated, excluded_rows) = consolidate(
        &enriched,
        [&customer_name, &customer_id, &job, &action],
        &options.activity_columns,
    );
    info!(
        "Consolidated {} enriched row(s) into {} job action(s)",
        enriched.len(),
        consolidated.len()
    );
    if excluded_rows > 0 {
        warn!(
            "{} enriched row(s) have an empty customer, job or action value and were not counted",
            excluded_rows
        );
    }

    Ok(Enrichment {
        enriched,
        consolidated,
        group_columns: GroupColumns {
            customer_name: customer_name.column,
            customer_id: customer_id.column,
            job_id: job.column,
            action: action.column,
        },
        unmatched_rows,
        excluded_rows,
        placeholders,
    })
}

/// Left-outer join of `left` to `right` on already-normalized key columns.
///
/// Every left row survives; a key with several right matches fans out into one
/// row per match. The right key column is dropped and clashing right headers
/// are renamed `right_{name}_{n}`.
fn left_join(left: &Table, right: &Table, left_key: usize, right_key: usize) -> (Table, usize) {
    let mut lookup: HashMap<String, Vec<usize>> = HashMap::new();
    for (row_idx, key) in canonical_column(right, right_key).into_iter().enumerate() {
        if !key.is_empty() {
            lookup.entry(key).or_default().push(row_idx);
        }
    }

    let (headers, right_columns) = build_output_headers(left.columns(), right.columns(), right_key);
    let mut joined = Table::new(headers);
    let mut unmatched = Vec::new();

    for (row, key) in left.rows().iter().zip(canonical_column(left, left_key)) {
        match lookup.get(&key) {
            Some(matches) => {
                for right_idx in matches {
                    let right_row = &right.rows()[*right_idx];
                    let mut combined = row.clone();
                    combined.extend(right_columns.iter().map(|idx| right_row[*idx].clone()));
                    joined.push_row(combined);
                }
            }
            None => {
                joined.push_row(row.clone());
                unmatched.push(key);
            }
        }
    }

    if !unmatched.is_empty() {
        warn!(
            "{} activity log entries could not be matched to a job; first unmatched job ids: [{}]",
            unmatched.len(),
            unmatched.iter().take(UNMATCHED_SAMPLE).join(", ")
        );
    }
    (joined, unmatched.len())
}

fn build_output_headers(
    left_headers: &[String],
    right_headers: &[String],
    right_key: usize,
) -> (Vec<String>, Vec<usize>) {
    let mut headers = left_headers.to_vec();
    let mut seen: HashSet<String> = headers.iter().cloned().collect();
    let mut right_columns = Vec::new();

    for (idx, name) in right_headers.iter().enumerate() {
        if idx == right_key {
            continue;
        }
        let mut candidate = name.clone();
        let mut counter = 1usize;
        while seen.contains(&candidate) {
            candidate = format!("right_{name}_{counter}");
            counter += 1;
        }
        seen.insert(candidate.clone());
        headers.push(candidate);
        right_columns.push(idx);
    }

    (headers, right_columns)
}

/// Binds a grouping role by exact label or tokens. A fallback match (e.g. "Customer
/// Name" for the customer id) is not trusted and gets the placeholder column.
fn bind_or_placeholder(table: &mut Table, role: Role, placeholders: &mut Vec<Role>) -> Binding {
    match resolve::resolve(table, role, "enriched activity log") {
        Ok(binding) if binding.rule != MatchRule::Fallback => {
            debug!("Using '{}' as the {} column", binding.column, role);
            return binding;
        }
        Ok(binding) => debug!(
            "Ignoring fallback match '{}' for the {} column",
            binding.column, role
        ),
        Err(_) => {}
    }
    warn!(
        "No {} column found for grouping; filling '{}' with '{}'",
        role,
        role.default_header(),
        PLACEHOLDER_VALUE
    );
    placeholders.push(role);
    let index = table.add_column(role.default_header(), Some(Value::from(PLACEHOLDER_VALUE)));
    Binding {
        role,
        index,
        column: role.default_header().to_string(),
        rule: MatchRule::Exact,
    }
}

type GroupKey = (String, String, String, String);

/// Counts events per (customer name, customer id, job id, action) and attaches
/// the first-seen job-consistent columns for each (customer name, customer id,
/// job id).
fn consolidate(
    enriched: &Table,
    group: [&Binding; 4],
    activity_columns: &[String],
) -> (Table, usize) {
    let group_indices = group.map(|b| b.index);
    let volatile: HashSet<String> = activity_columns.iter().map(|c| c.to_lowercase()).collect();
    let consistent: Vec<usize> = enriched
        .columns()
        .iter()
        .enumerate()
        .filter(|(idx, name)| {
            !group_indices.contains(idx)
                && !volatile.contains(&name.to_lowercase())
                && name.as_str() != COUNT_COLUMN
        })
        .map(|(idx, _)| idx)
        .collect();

    // Ordered keys reproduce the group-sorted order that ties fall back to.
    let mut counts: BTreeMap<GroupKey, usize> = BTreeMap::new();
    let mut representatives: HashMap<(String, String, String), usize> = HashMap::new();
    let mut excluded = 0usize;
    for (row_idx, row) in enriched.rows().iter().enumerate() {
        let [name, id, job, action] =
            group_indices.map(|idx| cell_text(&row[idx]).trim().to_string());
        if [&name, &id, &job, &action].iter().any(|v| v.is_empty()) {
            excluded += 1;
            continue;
        }
        representatives
            .entry((name.clone(), id.clone(), job.clone()))
            .or_insert(row_idx);
        *counts.entry((name, id, job, action)).or_insert(0) += 1;
    }

    let mut headers = group.iter().map(|b| b.column.clone()).collect::<Vec<_>>();
    headers.push(COUNT_COLUMN.to_string());
    headers.extend(consistent.iter().map(|idx| enriched.columns()[*idx].clone()));

    let mut rows: Vec<(GroupKey, usize, Vec<Cell>)> = counts
        .into_iter()
        .map(|(key, count)| {
            let representative = representatives
                .get(&(key.0.clone(), key.1.clone(), key.2.clone()))
                .map(|idx| &enriched.rows()[*idx]);
            let extra = consistent
                .iter()
                .map(|idx| representative.and_then(|row| row[*idx].clone()))
                .collect();
            (key, count, extra)
        })
        .collect();
    rows.sort_by(|(a, a_count, _), (b, b_count, _)| {
        a.0.cmp(&b.0)
            .then_with(|| a.2.cmp(&b.2))
            .then_with(|| b_count.cmp(a_count))
    });

    let mut consolidated = Table::new(headers);
    for ((name, id, job, action), count, extra) in rows {
        let mut row: Vec<Cell> = vec![
            Some(Value::Text(name)),
            Some(Value::Text(id)),
            Some(Value::Text(job)),
            Some(Value::Text(action)),
            Some(Value::Integer(count as i64)),
        ];
        row.extend(extra);
        consolidated.push_row(row);
    }
    (consolidated, excluded)
}
