use std::borrow::Cow;
use std::fmt::Write as _;

use crate::reconcile::ConversionMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// Renders rows as space-separated columns; numeric-looking cells are right-aligned.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    let mut aligns = vec![Align::Right; column_count];

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell));
            if !looks_numeric(cell) {
                aligns[idx] = Align::Left;
            }
        }
    }
    if rows.is_empty() {
        aligns.fill(Align::Left);
    }

    let mut output = String::new();
    let header_aligns = vec![Align::Left; column_count];
    let _ = writeln!(output, "{}", format_row(headers, &widths, &header_aligns));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths, &header_aligns));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths, &aligns));
    }
    output
}

pub fn metrics_rows(metrics: &ConversionMetrics) -> Vec<Vec<String>> {
    [
        ("person", metrics.person.clone()),
        ("month", metrics.month.clone()),
        ("report_type", metrics.report_type.clone()),
        ("total_customers", metrics.total_customers.to_string()),
        ("converted_customers", metrics.converted_customers.to_string()),
        ("all_sales_customers", metrics.all_sales_customers.to_string()),
        ("conversion_rate", format!("{:.2}%", metrics.conversion_rate)),
        ("customers_not_converted", metrics.customers_not_converted.to_string()),
        ("sales_only_customers", metrics.sales_only_customers.to_string()),
    ]
    .into_iter()
    .map(|(name, value)| vec![name.to_string(), value])
    .collect()
}

pub fn print_metrics(metrics: &ConversionMetrics) {
    let headers = vec!["metric".to_string(), "value".to_string()];
    print!("{}", render_table(&headers, &metrics_rows(metrics)));
}

fn format_row(values: &[String], widths: &[usize], aligns: &[Align]) -> String {
    let cells = values
        .iter()
        .zip(widths.iter().zip(aligns))
        .map(|(value, (width, align))| {
            let sanitized = sanitize_cell(value);
            let padding = " ".repeat(width.saturating_sub(display_width(&sanitized)));
            match align {
                Align::Left => format!("{sanitized}{padding}"),
                Align::Right => format!("{padding}{sanitized}"),
            }
        })
        .collect::<Vec<_>>();
    cells.join("  ").trim_end().to_string()
}

fn looks_numeric(value: &str) -> bool {
    let trimmed = value.trim().trim_end_matches('%');
    !trimmed.is_empty() && trimmed.parse::<f64>().is_ok()
}

fn display_width(value: &str) -> usize {
    let mut width = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            // ANSI escape sequence, e.g. \x1b[31m
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_columns_are_right_aligned() {
        let headers = vec!["name".to_string(), "count".to_string()];
        let rows = vec![
            vec!["Acme".to_string(), "7".to_string()],
            vec!["Zed".to_string(), "12".to_string()],
        ];
        let rendered = render_table(&headers, &rows);
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines, vec!["name  count", "----  -----", "Acme      7", "Zed      12"]);
    }

    #[test]
    fn control_characters_become_spaces() {
        let headers = vec!["note".to_string()];
        let rows = vec![vec!["a\nb\tc".to_string()]];
        let rendered = render_table(&headers, &rows);
        assert_eq!(rendered.lines().nth(2), Some("a b c"));
    }

    #[test]
    fn metrics_render_rate_with_two_decimals() {
        let metrics = ConversionMetrics {
            person: "ann".into(),
            month: "01".into(),
            report_type: "isr".into(),
            total_customers: 3,
            converted_customers: 1,
            all_sales_customers: 2,
            conversion_rate: 200.0 / 3.0,
            customers_not_converted: 2,
            sales_only_customers: 1,
        };
        let rows = metrics_rows(&metrics);
        assert_eq!(rows[6], vec!["conversion_rate".to_string(), "66.67%".to_string()]);
    }
}
