//! Terminal rendering for command results.
//!
//! Rows are printed as tables or, with `--json`, as JSON documents on stdout.

use crate::db::Row;
use crate::error::{PharmaError, Result};
use prettytable::{Cell, Row as TableRow, Table};
use serde::Serialize;

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Renders rows as a table with one column per result column.
///
/// Column headers come from the first row.
pub fn rows_table(rows: &[Row]) -> Table {
    let mut table = Table::new();
    if let Some(first) = rows.first() {
        table.set_titles(TableRow::new(first.columns().map(Cell::new).collect()));
    }
    for row in rows {
        table.add_row(TableRow::new(
            row.values()
                .map(|v| Cell::new(&v.to_display_string()))
                .collect(),
        ));
    }
    table
}

/// Renders label/value pairs as a two-column table.
pub fn record_table<'a, I>(pairs: I) -> Table
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let mut table = Table::new();
    for (label, value) in pairs {
        table.add_row(TableRow::new(vec![Cell::new(label), Cell::new(&value)]));
    }
    table
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| PharmaError::internal(format!("Failed to serialize output: {e}")))
}

/// Prints a row listing, with `empty` shown instead of an empty table.
pub fn print_rows(format: OutputFormat, rows: &[Row], empty: &str) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", to_json(rows)?),
        OutputFormat::Table if rows.is_empty() => println!("{empty}"),
        OutputFormat::Table => rows_table(rows).printstd(),
    }
    Ok(())
}

/// Prints a titled section; JSON output nests it under `title`.
pub fn print_section(format: OutputFormat, title: &str, rows: &[Row]) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", to_json(&serde_json::json!({ "title": title, "rows": rows }))?)
        }
        OutputFormat::Table => {
            println!("{title}");
            print_rows(format, rows, "(no rows)")?;
        }
    }
    Ok(())
}

/// Prints a serializable value as JSON, or a one-line message otherwise.
pub fn print_message<T: Serialize>(format: OutputFormat, value: &T, message: &str) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", to_json(value)?),
        OutputFormat::Table => println!("{message}"),
    }
    Ok(())
}
