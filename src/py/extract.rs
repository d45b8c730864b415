use std::ffi::CString;
use std::path::Path;

use anyhow::{anyhow, Result};
use pyo3::prelude::*;
use pyo3::types::PyList;
use tracing::debug;

use crate::table::{Cell, Table};

/// Extract page-level text from the first `max_pages` pages via pdfplumber.
pub fn page_text(py: Python<'_>, pdf: &Path, max_pages: usize) -> Result<String> {
    let pdfplumber = py.import("pdfplumber")?;
    let doc = pdfplumber.call_method1("open", (path_arg(pdf),))?;
    let pages = doc.getattr("pages")?;
    let pages = pages.downcast::<PyList>().map_err(PyErr::from)?;

    let mut parts = Vec::new();
    for page in pages.iter().take(max_pages) {
        let text = page.call_method0("extract_text")?;
        if !text.is_none() {
            let text: String = text.extract()?;
            let text = text.trim();
            if !text.is_empty() {
                parts.push(text.to_string());
            }
        }
    }
    doc.call_method0("close")?;

    debug!(pages = parts.len(), "Extracted PDF text");
    Ok(parts.join("\n"))
}

/// Render pdfplumber's raw extracted tables for the first `max_pages`
/// pages, `max_rows` rows each, as log-friendly text.
pub fn table_preview(
    py: Python<'_>,
    pdf: &Path,
    max_pages: usize,
    max_rows: usize,
) -> Result<String> {
    let pdfplumber = py.import("pdfplumber")?;
    let doc = pdfplumber.call_method1("open", (path_arg(pdf),))?;
    let pages = doc.getattr("pages")?;
    let pages = pages.downcast::<PyList>().map_err(PyErr::from)?;

    let mut out = String::new();
    for (page_idx, page) in pages.iter().take(max_pages).enumerate() {
        let tables = page.call_method0("extract_tables")?;
        let tables = tables.downcast::<PyList>().map_err(PyErr::from)?;
        out.push_str(&format!("Page {} tables:\n", page_idx + 1));
        for (table_idx, table) in tables.iter().enumerate() {
            let table = table.downcast::<PyList>().map_err(PyErr::from)?;
            out.push_str(&format!("  Table {}:\n", table_idx + 1));
            for row in table.iter().take(max_rows) {
                out.push_str(&format!("    {}\n", row.str()?.to_string_lossy()));
            }
        }
    }
    doc.call_method0("close")?;

    Ok(out)
}

/// Load a Candidate Artifact as a fresh, unregistered module and invoke
/// `parse(pdf_path)`. Each call compiles the source into a new namespace,
/// so nothing a previous candidate defined leaks into the next attempt.
pub fn run_candidate(py: Python<'_>, source: &str, pdf: &Path) -> Result<Table> {
    let code = CString::new(source.as_bytes())
        .map_err(|_| anyhow!("candidate source contains a NUL byte"))?;
    let module = PyModule::from_code(py, &code, c"candidate_parser.py", c"candidate_parser")
        .map_err(|e| anyhow!("candidate failed to load: {e}"))?;
    let parse = module
        .getattr("parse")
        .map_err(|_| anyhow!("candidate defines no parse() function"))?;

    let value = parse
        .call1((path_arg(pdf),))
        .map_err(|e| anyhow!("parse() raised: {e}"))?;

    dataframe_to_table(py, &value)
        .map_err(|e| anyhow!("parse() must return a pandas DataFrame: {e}"))
}

/// Convert a DataFrame into a [`Table`]: column labels stringified, NaN
/// masked to None, values materialized row by row.
fn dataframe_to_table(py: Python<'_>, value: &Bound<'_, PyAny>) -> PyResult<Table> {
    let columns: Vec<String> = value
        .getattr("columns")?
        .call_method1("astype", ("str",))?
        .call_method0("tolist")?
        .extract()?;

    let masked = value.call_method1("where", (value.call_method0("notna")?, py.None()))?;
    let values = masked.getattr("values")?.call_method0("tolist")?;
    let values = values.downcast::<PyList>().map_err(PyErr::from)?;

    let mut rows = Vec::with_capacity(values.len());
    for row in values.iter() {
        let row = row.downcast::<PyList>().map_err(PyErr::from)?;
        rows.push(row.iter().map(|cell| cell_from_py(&cell)).collect());
    }

    Ok(Table { columns, rows })
}

fn cell_from_py(obj: &Bound<'_, PyAny>) -> Cell {
    if obj.is_none() {
        return Cell::Missing;
    }
    // Strings first: a Python "950" must stay text so the schema
    // normalization decides how to parse it.
    if let Ok(s) = obj.extract::<String>() {
        return Cell::Text(s);
    }
    if let Ok(n) = obj.extract::<f64>() {
        if n.is_nan() {
            return Cell::Missing;
        }
        return Cell::Number(n);
    }
    match obj.str() {
        Ok(s) => Cell::Text(s.to_string_lossy().into_owned()),
        Err(_) => Cell::Missing,
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
