//! Execution of generated code
//!
//! A [`CodeRunner`] takes the source of a `solver()` function plus the data
//! sources it may read, runs it, and returns the computed value. The
//! descriptors are the only data-access surface: the runtime exposes
//! `fetch_df(file_id)` and `fetch_json(file_id, jq_query)` bound to them.

pub mod python;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sources::DataSource;

pub use python::{PythonSandbox, SandboxConfig};

/// Value returned by a successful `solver()` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ComputedValue {
    Text {
        value: String,
    },
    Number {
        value: serde_json::Number,
    },
    /// Tabular result; every row has one cell per column
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    },
    /// Rendered plot
    Figure {
        png_base64: String,
    },
}

impl ComputedValue {
    pub fn text(value: impl Into<String>) -> Self {
        ComputedValue::Text {
            value: value.into(),
        }
    }

    pub fn number(value: impl Into<serde_json::Number>) -> Self {
        ComputedValue::Number {
            value: value.into(),
        }
    }

    /// Build a number from a float; NaN and infinities become text
    pub fn float(value: f64) -> Self {
        match serde_json::Number::from_f64(value) {
            Some(n) => ComputedValue::Number { value: n },
            None => ComputedValue::text(value.to_string()),
        }
    }

    pub fn is_figure(&self) -> bool {
        matches!(self, ComputedValue::Figure { .. })
    }

    /// (rows, columns) for tables
    pub fn table_shape(&self) -> Option<(usize, usize)> {
        match self {
            ComputedValue::Table { columns, rows } => Some((rows.len(), columns.len())),
            _ => None,
        }
    }

    /// Text form shown to the user and fed to the summarizer
    ///
    /// Tables are laid out as right-aligned columns without an index.
    pub fn stringify(&self) -> String {
        match self {
            ComputedValue::Text { value } => value.clone(),
            ComputedValue::Number { value } => value.to_string(),
            ComputedValue::Figure { .. } => "<Figure>".to_string(),
            ComputedValue::Table { columns, rows } => render_table(columns, rows),
        }
    }
}

impl std::fmt::Display for ComputedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.stringify())
    }
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NaN".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_table(columns: &[String], rows: &[Vec<serde_json::Value>]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            cells
                .iter()
                .filter_map(|row| row.get(idx))
                .map(|c| c.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(format_row(columns.iter().map(String::as_str), &widths));
    for row in &cells {
        lines.push(format_row(row.iter().map(String::as_str), &widths));
    }
    lines.join("\n")
}

fn format_row<'a>(values: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    values
        .zip(widths)
        .map(|(v, w)| format!("{:>width$}", v, width = *w))
        .collect::<Vec<_>>()
        .join("  ")
}

/// Error type for code execution
///
/// `Display` yields the text fed back to the model on refinement.
#[derive(Debug)]
pub enum ExecutionError {
    /// Scratch directory or file setup failed
    Io(std::io::Error),
    /// The interpreter could not be started
    Spawn(String),
    /// Wall-clock limit exceeded; the process was killed
    Timeout(Duration),
    /// The code raised; `message` is the final line of the traceback
    Failed { message: String, stderr: String },
    /// The runtime exited cleanly but produced no readable result
    Protocol(String),
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionError::Io(e) => write!(f, "Sandbox I/O error: {}", e),
            ExecutionError::Spawn(msg) => write!(f, "Failed to start interpreter: {}", msg),
            ExecutionError::Timeout(after) => {
                write!(f, "Execution timed out after {} seconds", after.as_secs_f64())
            }
            ExecutionError::Failed { message, .. } => write!(f, "{}", message),
            ExecutionError::Protocol(msg) => write!(f, "Invalid solver result: {}", msg),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<std::io::Error> for ExecutionError {
    fn from(e: std::io::Error) -> Self {
        ExecutionError::Io(e)
    }
}

/// Runs generated `solver()` code against a set of data sources
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, code: &str, sources: &[DataSource]) -> Result<ComputedValue, ExecutionError>;
}
