//! Log file ingestion
//!
//! Log files have no fixed schema. A handful of sampled lines is shown to
//! the model, which answers with a regex of named groups; the regex turns
//! every line into a row, and the rows are materialized as CSV so the
//! sandbox can load them with `fetch_df`.

use std::collections::BTreeSet;
use std::path::Path;

use rand::seq::SliceRandom;
use regex::Regex;
use tracing::{debug, error, info};

use super::descriptor::{DataSource, FieldInfo, SourceSchema};
use crate::agent::{TaskError, TaskExecutor};
use crate::llm::PromptTask;

/// Number of lines shown to the pattern extractor
pub const SAMPLE_LINES: usize = 5;

/// Error type for log ingestion
#[derive(Debug)]
pub enum LogError {
    Io(std::io::Error),
    /// The extractor task failed
    Task(TaskError),
    /// The model's pattern does not compile
    Pattern(regex::Error),
    /// The pattern has no named groups
    NoFields(String),
    /// Not a single line matched the pattern
    NoMatches { lines: usize },
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::Io(e) => write!(f, "Log I/O error: {}", e),
            LogError::Task(e) => write!(f, "Pattern extraction failed: {}", e),
            LogError::Pattern(e) => write!(f, "Invalid log pattern: {}", e),
            LogError::NoFields(p) => write!(f, "Log pattern has no named groups: {}", p),
            LogError::NoMatches { lines } => {
                write!(f, "Unable to parse log file: none of {} lines matched", lines)
            }
        }
    }
}

impl std::error::Error for LogError {}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        LogError::Io(e)
    }
}

impl From<TaskError> for LogError {
    fn from(e: TaskError) -> Self {
        LogError::Task(e)
    }
}

impl From<regex::Error> for LogError {
    fn from(e: regex::Error) -> Self {
        LogError::Pattern(e)
    }
}

/// Parsed rows, one optional cell per field
pub type LogRows = Vec<Vec<Option<String>>>;

/// Compiled line pattern with its named fields in group order
#[derive(Debug, Clone)]
pub struct LogPattern {
    regex: Regex,
    fields: Vec<String>,
}

impl LogPattern {
    /// Compile a pattern; matching is anchored at the start of the line
    pub fn compile(pattern: &str) -> Result<Self, LogError> {
        let regex = Regex::new(&format!("^(?:{})", pattern))?;
        let fields: Vec<String> = regex.capture_names().flatten().map(str::to_string).collect();
        if fields.is_empty() {
            return Err(LogError::NoFields(pattern.to_string()));
        }
        Ok(Self { regex, fields })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Parse every line; lines that do not match are logged and skipped
    pub fn parse_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<LogRows, LogError> {
        let mut rows = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            let line = line.as_ref().trim_end_matches(['\r', '\n']);
            match self.regex.captures(line) {
                Some(caps) => rows.push(
                    self.fields
                        .iter()
                        .map(|name| caps.name(name).map(|m| m.as_str().to_string()))
                        .collect(),
                ),
                None => error!(line_id = idx, "Unable to parse log line"),
            }
        }

        if rows.is_empty() {
            return Err(LogError::NoMatches { lines: lines.len() });
        }
        Ok(rows)
    }
}

/// Pick up to `SAMPLE_LINES` random non-empty lines
pub fn sample_lines<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let candidates: Vec<&str> = lines
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| !l.is_empty())
        .collect();
    candidates
        .choose_multiple(&mut rand::thread_rng(), SAMPLE_LINES)
        .map(|l| l.to_string())
        .collect()
}

/// Ask the model for a pattern matching the sampled lines
pub async fn infer_pattern(
    executor: &TaskExecutor,
    file_name: &str,
    sample: Vec<String>,
) -> Result<LogPattern, LogError> {
    let response = executor
        .execute_single(PromptTask::log_field_extractor(file_name, sample))
        .await?;
    let pattern = response.pattern().unwrap_or_default();
    debug!(file_name, pattern, "Inferred log pattern");
    LogPattern::compile(pattern)
}

/// Infer a dtype the way a dataframe loader would
fn infer_field_type<'a>(values: impl Iterator<Item = &'a str> + Clone) -> &'static str {
    let mut present = values.peekable();
    if present.peek().is_none() {
        return "object";
    }
    if present.clone().all(|v| v.parse::<i64>().is_ok()) {
        "int64"
    } else if present.all(|v| v.parse::<f64>().is_ok()) {
        "float64"
    } else {
        "object"
    }
}

/// Field summaries for parsed rows
pub fn summarize_fields(fields: &[String], rows: &LogRows) -> Vec<FieldInfo> {
    fields
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let column = rows.iter().map(|row| row.get(idx).and_then(|c| c.as_deref()));
            let present = column.clone().flatten();

            let null_count = column.filter(|c| c.is_none()).count() as u64;
            let mut seen = BTreeSet::new();
            let uniques: Vec<String> = present
                .clone()
                .filter(|v| seen.insert(*v))
                .map(str::to_string)
                .collect();

            let mut field = FieldInfo::new(name.clone(), infer_field_type(present)).with_uniques(uniques);
            field.null_count = null_count;
            field
        })
        .collect()
}

fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Serialize parsed rows as CSV with a header line
pub fn rows_to_csv(fields: &[String], rows: &LogRows) -> String {
    let mut out = String::new();
    let header: Vec<String> = fields.iter().map(|f| csv_cell(f)).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .map(|c| c.as_deref().map(csv_cell).unwrap_or_default())
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

/// Build a log descriptor: infer a pattern, parse all lines, write the CSV
///
/// The CSV is written next to the log with a `.csv` extension.
pub async fn ingest_log(
    executor: &TaskExecutor,
    id: &str,
    file_path: &Path,
) -> Result<DataSource, LogError> {
    let content = tokio::fs::read_to_string(file_path).await?;
    let lines: Vec<&str> = content.lines().collect();
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let sample = sample_lines(&lines);
    if sample.is_empty() {
        return Err(LogError::NoMatches { lines: lines.len() });
    }

    let pattern = infer_pattern(executor, file_name, sample).await?;
    let rows = pattern.parse_lines(&lines)?;
    let fields = summarize_fields(pattern.fields(), &rows);

    let csv_path = file_path.with_extension("csv");
    tokio::fs::write(&csv_path, rows_to_csv(pattern.fields(), &rows)).await?;

    info!(
        file_name,
        fields = fields.len(),
        rows = rows.len(),
        lines = lines.len(),
        "Parsed log file"
    );

    Ok(DataSource {
        id: id.to_string(),
        file_path: file_path.to_string_lossy().into_owned(),
        schema: SourceSchema::Log {
            fields,
            row_count: rows.len() as u64,
            log_line_count: lines.len() as u64,
            csv_file_path: csv_path.to_string_lossy().into_owned(),
        },
    })
}
