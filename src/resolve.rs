//! Binds semantic roles to concrete columns by name.
//!
//! Source exports never agree on a header spelling (`Job ID`, `job_id`,
//! `Job Id #`, `Customer`), so every table is resolved independently before a
//! join or set comparison. Matching is case-insensitive and tried in order:
//!
//! 1. the role's canonical label (`job id`, `customer id`, ...)
//! 2. the first column containing every required token
//! 3. the first column containing the role's fallback token, if it has one

use std::fmt;

use thiserror::Error;

use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    JobIdentifier,
    CustomerIdentifier,
    CustomerName,
    Action,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::JobIdentifier => "job id",
            Role::CustomerIdentifier => "customer id",
            Role::CustomerName => "customer name",
            Role::Action => "action performed",
        }
    }

    fn required_tokens(self) -> &'static [&'static str] {
        match self {
            Role::JobIdentifier => &["job", "id"],
            Role::CustomerIdentifier => &["customer", "id"],
            Role::CustomerName => &["customer", "name"],
            Role::Action => &["action"],
        }
    }

    fn fallback_token(self) -> Option<&'static str> {
        match self {
            Role::CustomerIdentifier => Some("customer"),
            _ => None,
        }
    }

    /// Header used when a placeholder column has to be synthesized.
    pub fn default_header(self) -> &'static str {
        match self {
            Role::JobIdentifier => "Job ID",
            Role::CustomerIdentifier => "Customer ID",
            Role::CustomerName => "Customer Name",
            Role::Action => "Action Performed",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Exact,
    Tokens,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub role: Role,
    pub index: usize,
    pub column: String,
    pub rule: MatchRule,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no {role} column found in {table} (columns: {columns:?})")]
    MissingIdentifierColumn {
        role: Role,
        table: String,
        columns: Vec<String>,
    },
}

/// Finds the column index playing `role` among `columns`.
pub fn resolve_in(columns: &[String], role: Role) -> Option<(usize, MatchRule)> {
    let lowered = columns.iter().map(|c| c.to_lowercase()).collect::<Vec<_>>();
    let label = role.label();
    if let Some(idx) = lowered.iter().position(|c| c.trim() == label) {
        return Some((idx, MatchRule::Exact));
    }
    let tokens = role.required_tokens();
    if let Some(idx) = lowered
        .iter()
        .position(|c| tokens.iter().all(|token| c.contains(token)))
    {
        return Some((idx, MatchRule::Tokens));
    }
    let fallback = role.fallback_token()?;
    lowered
        .iter()
        .position(|c| c.contains(fallback))
        .map(|idx| (idx, MatchRule::Fallback))
}

/// Resolves `role` in `table`; `table_name` only feeds the error message.
pub fn resolve(table: &Table, role: Role, table_name: &str) -> Result<Binding, ResolutionError> {
    let columns = table.columns();
    match resolve_in(columns, role) {
        Some((index, rule)) => Ok(Binding {
            role,
            index,
            column: columns[index].clone(),
            rule,
        }),
        None => Err(ResolutionError::MissingIdentifierColumn {
            role,
            table: table_name.to_string(),
            columns: columns.to_vec(),
        }),
    }
}
