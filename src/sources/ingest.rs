//! File ingestion
//!
//! Turns an uploaded file into a [`DataSource`]. The format comes from the
//! extension and is checked before anything is read, so an unsupported
//! file fails here and never reaches the model.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, error, info};

use super::descriptor::{DataSource, JsonKey, JsonType, SourceError, SourceFormat, SourceSchema};
use super::logs::{self, LogError, LogRows};
use crate::agent::TaskExecutor;

/// Array items inspected per array when flattening JSON keys
pub const JSON_ITEM_LOOKUP: usize = 100;

/// Error type for file ingestion
#[derive(Debug)]
pub enum IngestError {
    /// Extension is not a supported source format
    Format(SourceError),
    Io(std::io::Error),
    Log(LogError),
    Json(serde_json::Error),
    /// CSV file without a header line
    EmptyCsv,
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Format(e) => write!(f, "{}", e),
            IngestError::Io(e) => write!(f, "Ingest I/O error: {}", e),
            IngestError::Log(e) => write!(f, "{}", e),
            IngestError::Json(e) => write!(f, "Invalid JSON file: {}", e),
            IngestError::EmptyCsv => write!(f, "CSV file has no header line"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<SourceError> for IngestError {
    fn from(e: SourceError) -> Self {
        IngestError::Format(e)
    }
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::Io(e)
    }
}

impl From<LogError> for IngestError {
    fn from(e: LogError) -> Self {
        IngestError::Log(e)
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        IngestError::Json(e)
    }
}

/// Describe one file as a data source, dispatching on its extension
///
/// Log files need the model to infer a line pattern; CSV and JSON files
/// are described locally.
pub async fn ingest_file(
    executor: &TaskExecutor,
    id: &str,
    path: &Path,
) -> Result<DataSource, IngestError> {
    let format = SourceFormat::from_path(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "Unknown file format");
        e
    })?;
    info!(id, path = %path.display(), format = %format, "Generating file metadata");

    match format {
        SourceFormat::Csv => describe_csv(id, path).await,
        SourceFormat::Log => Ok(logs::ingest_log(executor, id, path).await?),
        SourceFormat::Json => describe_json(id, path).await,
    }
}

/// Split CSV text into records; quoted cells may hold commas, quotes and newlines
pub fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    cell.push('"');
                }
                '"' => in_quotes = false,
                _ => cell.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut cell)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut cell));
                records.push(std::mem::take(&mut record));
            }
            _ => cell.push(c),
        }
    }
    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        records.push(record);
    }

    // Blank lines carry no row
    records.retain(|r| !(r.len() == 1 && r[0].is_empty()));
    records
}

async fn describe_csv(id: &str, path: &Path) -> Result<DataSource, IngestError> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut records = parse_csv(&content).into_iter();
    let header = records.next().ok_or(IngestError::EmptyCsv)?;

    let rows: LogRows = records
        .map(|record| {
            (0..header.len())
                .map(|idx| record.get(idx).filter(|c| !c.is_empty()).cloned())
                .collect()
        })
        .collect();
    let fields = logs::summarize_fields(&header, &rows);
    debug!(id, fields = fields.len(), rows = rows.len(), "Described CSV file");

    Ok(DataSource {
        id: id.to_string(),
        file_path: path.to_string_lossy().into_owned(),
        schema: SourceSchema::Csv {
            fields,
            row_count: rows.len() as u64,
        },
    })
}

/// Flattened jq-style key paths of every scalar in a JSON document
///
/// Keys are visited breadth first; each distinct path and type is listed
/// once. Only the first `JSON_ITEM_LOOKUP` items of an array are inspected.
pub fn flatten_json_keys(document: &Value) -> Vec<JsonKey> {
    let mut keys = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([(document, String::new())]);

    while let Some((value, path)) = queue.pop_front() {
        let key_type = match value {
            Value::Object(map) => {
                for (name, child) in map {
                    queue.push_back((child, format!("{}.{}", path, name)));
                }
                continue;
            }
            Value::Array(items) => {
                let item_path = if path.is_empty() {
                    ".[]".to_string()
                } else {
                    format!("{}[]", path)
                };
                for item in items.iter().take(JSON_ITEM_LOOKUP) {
                    queue.push_back((item, item_path.clone()));
                }
                continue;
            }
            Value::Number(_) => JsonType::Number,
            Value::String(_) => JsonType::String,
            Value::Bool(_) => JsonType::Boolean,
            Value::Null => continue,
        };

        let path = if path.is_empty() { ".".to_string() } else { path };
        if seen.insert((path.clone(), key_type)) {
            keys.push(JsonKey::new(path, key_type));
        }
    }

    keys
}

async fn describe_json(id: &str, path: &Path) -> Result<DataSource, IngestError> {
    let content = tokio::fs::read_to_string(path).await?;
    let document: Value = serde_json::from_str(&content)?;
    let json_keys = flatten_json_keys(&document);
    debug!(id, keys = json_keys.len(), "Described JSON file");

    Ok(DataSource::json(id, path.to_string_lossy(), json_keys))
}
