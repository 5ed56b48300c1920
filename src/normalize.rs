//! Canonical string form for identifier columns.
//!
//! Spreadsheet exports store identifiers as floats (`1023.0`) in one file and
//! as text (`"1023"`) in another. Every identifier that takes part in a join or
//! a set comparison goes through [`normalize`] first so both spellings land on
//! the same key. Null cells become the empty string, which callers treat as
//! "no identifier".

use crate::table::{Cell, Table, Value};

/// Canonicalizes a whole column at once.
///
/// - all non-null cells numeric and integral: rendered as integers
/// - numeric but fractional: rendered with the shortest round-trip form
/// - anything else: rendered as text and trimmed
pub fn normalize(cells: &[Cell]) -> Vec<String> {
    let present = || cells.iter().flatten();
    let all_numeric = present().all(Value::is_numeric);
    let all_integral = all_numeric && present().all(is_integral);

    cells
        .iter()
        .map(|cell| match cell {
            None => String::new(),
            Some(value) if all_integral => integral_text(value),
            Some(value) if all_numeric => value.as_display(),
            Some(value) => value.as_display().trim().to_string(),
        })
        .collect()
}

fn is_integral(value: &Value) -> bool {
    match value {
        Value::Integer(_) => true,
        Value::Float(f) => f.fract() == 0.0 && f.abs() < i64::MAX as f64,
        Value::Text(_) => false,
    }
}

fn integral_text(value: &Value) -> String {
    match value {
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => (*f as i64).to_string(),
        Value::Text(s) => s.trim().to_string(),
    }
}

/// Canonical values of one column of `table`.
pub fn canonical_column(table: &Table, column: usize) -> Vec<String> {
    normalize(&table.column_cells(column))
}

/// Rewrites a column in place with its canonical text; empty results become null.
pub fn normalize_column_in_place(table: &mut Table, column: usize) {
    let cells = canonical_column(table, column)
        .into_iter()
        .map(|text| (!text.is_empty()).then_some(Value::Text(text)))
        .collect();
    table.replace_column(column, cells);
}

/// Column names that look like identifiers (`Job ID`, `Invoice #`).
pub fn is_identifier_column(name: &str) -> bool {
    name.to_lowercase().contains("id") || name.contains('#')
}

/// Normalizes every identifier-looking column and returns their names.
pub fn normalize_identifier_columns(table: &mut Table) -> Vec<String> {
    let targets = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, name)| is_identifier_column(name))
        .map(|(idx, name)| (idx, name.clone()))
        .collect::<Vec<_>>();
    for (idx, _) in &targets {
        normalize_column_in_place(table, *idx);
    }
    targets.into_iter().map(|(_, name)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Some(Value::Text(s.to_string()))
    }

    #[test]
    fn integral_floats_drop_trailing_zero() {
        let cells = vec![Some(Value::Float(1023.0)), Some(Value::Float(1024.0)), None];
        assert_eq!(normalize(&cells), vec!["1023", "1024", ""]);
    }

    #[test]
    fn missing_values_never_become_sentinels() {
        let cells = vec![None, Some(Value::Integer(-1)), None];
        assert_eq!(normalize(&cells), vec!["", "-1", ""]);
    }

    #[test]
    fn fractional_numbers_keep_precision() {
        let cells = vec![Some(Value::Float(12.5)), Some(Value::Float(3.0))];
        assert_eq!(normalize(&cells), vec!["12.5", "3"]);
    }

    #[test]
    fn text_is_trimmed() {
        let cells = vec![text("  A-17 "), text("1023"), None];
        assert_eq!(normalize(&cells), vec!["A-17", "1023", ""]);
    }

    #[test]
    fn mixed_text_and_numbers_fall_back_to_text() {
        let cells = vec![text("A-17"), Some(Value::Float(1023.0))];
        assert_eq!(normalize(&cells), vec!["A-17", "1023"]);
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let cells = vec![Some(Value::Float(7.0)), None, Some(Value::Integer(8))];
        let once = normalize(&cells);
        let as_cells = once
            .iter()
            .map(|s| (!s.is_empty()).then(|| Value::Text(s.clone())))
            .collect::<Vec<_>>();
        assert_eq!(normalize(&as_cells), once);
    }

    #[test]
    fn identifier_sweep_touches_id_and_hash_columns() {
        let mut table = Table::from_text_rows(
            &["Job ID", "Invoice #", "Amount"],
            &[vec!["1.0", "77.0", "10.0"], vec!["2.0", "", "12.0"]],
        );
        let swept = normalize_identifier_columns(&mut table);
        assert_eq!(swept, vec!["Job ID".to_string(), "Invoice #".to_string()]);
        assert_eq!(table.cell(0, 0), Some(&Value::Text("1".to_string())));
        assert_eq!(table.cell(1, 1), None);
        assert_eq!(table.cell(0, 2), Some(&Value::Float(10.0)));
    }
}
