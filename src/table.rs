//! In-memory tables loaded from heterogeneous CSV exports.
//!
//! A [`Table`] keeps the header order of its source and stores each cell as an
//! optional [`Value`]. Column types are inferred per column when loading, so a
//! spreadsheet column of `1023.0, 1024.0` arrives as floats while a column that
//! mixes `A-17` and `1023` stays textual.

use std::{fmt, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::io_utils::{self, CsvFormat};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

pub type Cell = Option<Value>;

/// Storage type chosen for a column when it is loaded from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
}

impl ColumnKind {
    /// Picks the narrowest kind that every non-empty cell satisfies.
    pub fn infer<'a, I>(cells: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut kind = ColumnKind::Integer;
        let mut saw_value = false;
        for raw in cells {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            saw_value = true;
            let integer = trimmed.parse::<i64>().ok();
            // Digits that overflow i64 would lose precision as f64.
            if integer.is_none() && is_integer_literal(trimmed) {
                return ColumnKind::Text;
            }
            if kind == ColumnKind::Integer && integer.is_none() {
                kind = ColumnKind::Float;
            }
            if kind == ColumnKind::Float && parse_finite_float(trimmed).is_none() {
                return ColumnKind::Text;
            }
        }
        if saw_value { kind } else { ColumnKind::Text }
    }

    pub fn parse(self, raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match self {
            ColumnKind::Integer => trimmed.parse().ok().map(Value::Integer),
            ColumnKind::Float => parse_finite_float(trimmed).map(Value::Float),
            ColumnKind::Text => Some(Value::Text(raw.to_string())),
        }
    }
}

fn is_integer_literal(value: &str) -> bool {
    let digits = value.strip_prefix(['-', '+']).unwrap_or(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_finite_float(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|f| f.is_finite())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from raw text cells, inferring column kinds the same way
    /// CSV loading does.
    pub fn from_text_rows<S>(columns: &[S], rows: &[Vec<&str>]) -> Self
    where
        S: AsRef<str>,
    {
        let columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|s| s.to_string()).collect())
            .collect();
        Self::from_raw(columns, rows)
    }

    fn from_raw(columns: Vec<String>, raw_rows: Vec<Vec<String>>) -> Self {
        let kinds = (0..columns.len())
            .map(|idx| {
                ColumnKind::infer(
                    raw_rows
                        .iter()
                        .map(|row| row.get(idx).map(String::as_str).unwrap_or("")),
                )
            })
            .collect::<Vec<_>>();
        let rows = raw_rows
            .iter()
            .map(|row| {
                kinds
                    .iter()
                    .enumerate()
                    .map(|(idx, kind)| kind.parse(row.get(idx).map(String::as_str).unwrap_or("")))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn load(path: &Path, format: &CsvFormat) -> Result<Self> {
        let delimiter = format.input_delimiter(path);
        let encoding = format.input_encoding;
        let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
        let columns = io_utils::reader_headers(&mut reader, encoding)
            .with_context(|| format!("Reading headers from {path:?}"))?;
        let mut raw_rows = Vec::new();
        for (row_idx, record) in reader.byte_records().enumerate() {
            let record =
                record.with_context(|| format!("Reading row {} in {path:?}", row_idx + 2))?;
            let mut decoded = io_utils::decode_record(&record, encoding)
                .with_context(|| format!("Decoding row {} in {path:?}", row_idx + 2))?;
            decoded.resize(columns.len(), String::new());
            raw_rows.push(decoded);
        }
        Ok(Self::from_raw(columns, raw_rows))
    }

    pub fn save(&self, path: Option<&Path>, format: &CsvFormat) -> Result<()> {
        let delimiter = format.output_delimiter(path);
        let mut writer = io_utils::open_csv_writer(path, delimiter, format.output_encoding)?;
        writer
            .write_record(&self.columns)
            .context("Writing table headers")?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|cell| cell_text(cell)))
                .context("Writing table row")?;
        }
        writer.flush().context("Flushing table output")?;
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column)).and_then(Option::as_ref)
    }

    pub fn column_cells(&self, column: usize) -> Vec<Cell> {
        self.rows
            .iter()
            .map(|row| row.get(column).cloned().flatten())
            .collect()
    }

    /// Appends a row, padding or truncating it to the header width.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn add_column(&mut self, name: impl Into<String>, fill: Cell) -> usize {
        self.columns.push(name.into());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
        self.columns.len() - 1
    }

    pub fn replace_column(&mut self, column: usize, cells: Vec<Cell>) {
        for (row, cell) in self.rows.iter_mut().zip(cells) {
            row[column] = cell;
        }
    }

    /// Copies the given rows, in the given order, into a new table with the
    /// same header.
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|idx| self.rows.get(*idx).cloned())
                .collect(),
        }
    }
}

pub fn cell_text(cell: &Cell) -> String {
    cell.as_ref().map(Value::as_display).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_prefers_integer_then_float_then_text() {
        assert_eq!(ColumnKind::infer(["1", "", " 2 "]), ColumnKind::Integer);
        assert_eq!(ColumnKind::infer(["1", "2.5"]), ColumnKind::Float);
        assert_eq!(ColumnKind::infer(["1023.0", "1024.0"]), ColumnKind::Float);
        assert_eq!(ColumnKind::infer(["1023", "A-17"]), ColumnKind::Text);
        assert_eq!(ColumnKind::infer(["", ""]), ColumnKind::Text);
        assert_eq!(ColumnKind::infer(["inf"]), ColumnKind::Text);
    }

    #[test]
    fn integers_wider_than_i64_stay_text() {
        assert_eq!(ColumnKind::infer(["12345678901234567890"]), ColumnKind::Text);
        assert_eq!(ColumnKind::infer(["1.5", "12345678901234567890"]), ColumnKind::Text);
        let table = Table::from_text_rows(&["Job ID"], &[vec!["12345678901234567890"], vec!["7"]]);
        assert_eq!(
            crate::normalize::canonical_column(&table, 0),
            vec!["12345678901234567890", "7"]
        );
    }

    #[test]
    fn empty_cells_load_as_null() {
        let table = Table::from_text_rows(
            &["Job ID", "Customer Name"],
            &[vec!["1023.0", "Acme"], vec!["", "  "]],
        );
        assert_eq!(table.cell(0, 0), Some(&Value::Float(1023.0)));
        assert_eq!(table.cell(1, 0), None);
        assert_eq!(table.cell(1, 1), None);
    }

    #[test]
    fn text_columns_keep_raw_cells() {
        let table = Table::from_text_rows(&["id"], &[vec![" A-1 "], vec!["2"]]);
        assert_eq!(table.cell(0, 0), Some(&Value::Text(" A-1 ".to_string())));
        assert_eq!(table.cell(1, 0), Some(&Value::Text("2".to_string())));
    }

    #[test]
    fn push_row_pads_to_header_width() {
        let mut table = Table::new(vec!["a".into(), "b".into()]);
        table.push_row(vec![Some(Value::from("x"))]);
        assert_eq!(table.rows()[0], vec![Some(Value::from("x")), None]);
    }

    #[test]
    fn add_column_fills_existing_rows() {
        let mut table = Table::from_text_rows(&["a"], &[vec!["1"], vec!["2"]]);
        let idx = table.add_column("Customer ID", Some(Value::from("Unknown")));
        assert_eq!(idx, 1);
        assert_eq!(table.column_index("Customer ID"), Some(1));
        assert_eq!(cell_text(&table.rows()[1][1]), "Unknown");
    }

    #[test]
    fn select_rows_preserves_requested_order() {
        let table = Table::from_text_rows(&["a"], &[vec!["x"], vec!["y"], vec!["z"]]);
        let picked = table.select_rows(&[2, 0]);
        assert_eq!(picked.len(), 2);
        assert_eq!(cell_text(&picked.rows()[0][0]), "z");
        assert_eq!(cell_text(&picked.rows()[1][0]), "x");
    }
}
