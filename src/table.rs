use std::path::Path;

use anyhow::{Context, Result};

/// The fixed output contract every parser must produce, in column order.
pub const SCHEMA: [&str; 5] = ["Date", "Description", "Debit Amt", "Credit Amt", "Balance"];

/// Columns compared as floating-point values after currency cleanup.
const NUMERIC_COLUMNS: [&str; 3] = ["Debit Amt", "Credit Amt", "Balance"];

pub fn is_numeric_column(name: &str) -> bool {
    NUMERIC_COLUMNS.contains(&name)
}

/// One table cell. `Missing` is the uniform absent-value marker used for
/// empty CSV fields, NaN, dropped columns and unparsable numeric text.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn render(&self) -> String {
        match self {
            Cell::Missing => "<NA>".to_string(),
            Cell::Number(n) => format!("{n}"),
            Cell::Text(s) => s.clone(),
        }
    }

    fn csv_field(&self) -> String {
        match self {
            Cell::Missing => String::new(),
            Cell::Number(n) => format!("{n}"),
            Cell::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let columns = reader
            .headers()
            .with_context(|| format!("failed to read CSV header from {}", path.display()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.with_context(|| format!("malformed CSV row in {}", path.display()))?;
            rows.push(record.iter().map(cell_from_field).collect());
        }
        Ok(Self { columns, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::csv_field))?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn cell_from_field(field: &str) -> Cell {
    if field.trim().is_empty() {
        Cell::Missing
    } else {
        Cell::Text(field.to_string())
    }
}

/// Reindex a table to [`SCHEMA`]: absent columns filled with `Missing`,
/// numeric columns cleaned and parsed, text columns trimmed. Row order is
/// preserved — comparison downstream is positional, not set-based.
///
/// Idempotent: normalizing an already-normalized table is a no-op.
pub fn normalize(table: &Table) -> Table {
    let source_idx: Vec<Option<usize>> = SCHEMA
        .iter()
        .map(|name| table.columns.iter().position(|c| c.trim() == *name))
        .collect();

    let rows = table
        .rows
        .iter()
        .map(|row| {
            SCHEMA
                .iter()
                .zip(&source_idx)
                .map(|(name, idx)| {
                    let cell = idx
                        .and_then(|i| row.get(i))
                        .cloned()
                        .unwrap_or(Cell::Missing);
                    if is_numeric_column(name) {
                        normalize_numeric(cell)
                    } else {
                        normalize_text(cell)
                    }
                })
                .collect()
        })
        .collect();

    Table {
        columns: SCHEMA.iter().map(|s| s.to_string()).collect(),
        rows,
    }
}

fn normalize_numeric(cell: Cell) -> Cell {
    match cell {
        Cell::Missing => Cell::Missing,
        Cell::Number(n) if n.is_nan() => Cell::Missing,
        Cell::Number(n) => Cell::Number(n),
        Cell::Text(s) => match parse_number(&s) {
            Some(n) => Cell::Number(n),
            None => Cell::Missing,
        },
    }
}

fn normalize_text(cell: Cell) -> Cell {
    match cell {
        Cell::Missing => Cell::Missing,
        Cell::Number(n) => Cell::Text(format!("{n}")),
        Cell::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Cell::Missing
            } else {
                Cell::Text(trimmed.to_string())
            }
        }
    }
}

/// Parse currency-formatted text: thousands separators and currency symbols
/// are stripped before the float parse. Unparsable text is `None`.
fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, ',' | '₹' | '$' | '€' | '£') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// One cell-level mismatch between the reference and a candidate's output.
#[derive(Debug, Clone, PartialEq)]
pub struct CellDiff {
    pub row: usize,
    pub column: String,
    pub expected: String,
    pub actual: String,
}

const MISSING_ROW: &str = "<missing row>";

/// Positional cell-by-cell comparison of two normalized tables. A row
/// present on only one side reports every schema column against
/// `<missing row>`, so an empty candidate output yields one diff per
/// reference cell rather than a crash.
pub fn diff(expected: &Table, actual: &Table) -> Vec<CellDiff> {
    let mut diffs = Vec::new();
    let row_count = expected.rows.len().max(actual.rows.len());

    for r in 0..row_count {
        match (expected.rows.get(r), actual.rows.get(r)) {
            (Some(e_row), Some(a_row)) => {
                for (c, column) in expected.columns.iter().enumerate() {
                    let e_cell = e_row.get(c).unwrap_or(&Cell::Missing);
                    let a_cell = a_row.get(c).unwrap_or(&Cell::Missing);
                    if e_cell != a_cell {
                        diffs.push(CellDiff {
                            row: r,
                            column: column.clone(),
                            expected: e_cell.render(),
                            actual: a_cell.render(),
                        });
                    }
                }
            }
            (Some(e_row), None) => {
                for (c, column) in expected.columns.iter().enumerate() {
                    diffs.push(CellDiff {
                        row: r,
                        column: column.clone(),
                        expected: e_row.get(c).unwrap_or(&Cell::Missing).render(),
                        actual: MISSING_ROW.to_string(),
                    });
                }
            }
            (None, Some(a_row)) => {
                for (c, column) in actual.columns.iter().enumerate() {
                    diffs.push(CellDiff {
                        row: r,
                        column: column.clone(),
                        expected: MISSING_ROW.to_string(),
                        actual: a_row.get(c).unwrap_or(&Cell::Missing).render(),
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }

    diffs
}

pub fn render_row(row: &[Cell]) -> String {
    row.iter()
        .map(Cell::render)
        .collect::<Vec<_>>()
        .join(" | ")
}
