//! Data source descriptors
//!
//! A descriptor identifies one ingested file and summarizes its schema. It
//! is rendered into prompts and routes the sandbox's data-loading bindings.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Maximum number of distinct values listed for a field
pub const UNIQUE_VALUES_LIMIT: usize = 10;

/// Format of an ingested file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Log,
    Json,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Log => "log",
            SourceFormat::Json => "json",
        }
    }

    /// Parse a format discriminator or a file extension
    pub fn parse(value: &str) -> Result<Self, SourceError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "log" => Ok(SourceFormat::Log),
            "json" => Ok(SourceFormat::Json),
            other => Err(SourceError::UnrecognizedFormat(other.to_string())),
        }
    }

    /// Infer the format from a path's extension
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::parse(ext)
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a tabular (CSV or parsed log) source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    /// dtype as reported by the loader (e.g. "int64", "float64", "object")
    pub field_type: String,
    #[serde(default)]
    pub null_count: u64,
    #[serde(default)]
    pub unique_count: u64,
    /// Distinct values, only kept when there are at most `UNIQUE_VALUES_LIMIT`
    #[serde(default)]
    pub uniques: Vec<String>,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            null_count: 0,
            unique_count: 0,
            uniques: Vec::new(),
        }
    }

    /// Record distinct values, dropping the list if it is too long to be useful
    pub fn with_uniques(mut self, uniques: Vec<String>) -> Self {
        self.unique_count = uniques.len() as u64;
        self.uniques = if uniques.len() <= UNIQUE_VALUES_LIMIT {
            uniques
        } else {
            Vec::new()
        };
        self
    }
}

/// Type of a flattened JSON key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    #[serde(rename = "list")]
    Array,
    Number,
    #[serde(rename = "str")]
    String,
    #[serde(rename = "dict")]
    Object,
    #[serde(rename = "bool")]
    Boolean,
}

impl JsonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::Array => "list",
            JsonType::Number => "number",
            JsonType::String => "str",
            JsonType::Object => "dict",
            JsonType::Boolean => "bool",
        }
    }
}

/// One flattened key path of a JSON source, e.g. `.hosts[].cpu`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JsonKey {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: JsonType,
}

impl JsonKey {
    pub fn new(key: impl Into<String>, key_type: JsonType) -> Self {
        Self {
            key: key.into(),
            key_type,
        }
    }

    /// Last path segment, without array markers
    pub fn leaf(&self) -> &str {
        let last = self.key.rsplit('.').next().unwrap_or(&self.key);
        last.trim_end_matches("[]")
    }
}

/// Format-specific schema summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "file_format", rename_all = "lowercase")]
pub enum SourceSchema {
    Csv {
        fields: Vec<FieldInfo>,
        #[serde(default)]
        row_count: u64,
    },
    Log {
        fields: Vec<FieldInfo>,
        #[serde(default)]
        row_count: u64,
        log_line_count: u64,
        /// Parsed rows, materialized as CSV for `fetch_df`
        csv_file_path: String,
    },
    Json {
        json_keys: Vec<JsonKey>,
    },
}

/// Schema and identity summary of one ingested file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub file_path: String,
    #[serde(flatten)]
    pub schema: SourceSchema,
}

impl DataSource {
    pub fn csv(id: impl Into<String>, file_path: impl Into<String>, fields: Vec<FieldInfo>) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            schema: SourceSchema::Csv {
                fields,
                row_count: 0,
            },
        }
    }

    pub fn json(id: impl Into<String>, file_path: impl Into<String>, json_keys: Vec<JsonKey>) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            schema: SourceSchema::Json { json_keys },
        }
    }

    pub fn format(&self) -> SourceFormat {
        match self.schema {
            SourceSchema::Csv { .. } => SourceFormat::Csv,
            SourceSchema::Log { .. } => SourceFormat::Log,
            SourceSchema::Json { .. } => SourceFormat::Json,
        }
    }

    /// Basename of the file
    pub fn file_name(&self) -> &str {
        Path::new(&self.file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file_path)
    }

    /// Tabular fields, for CSV and parsed log sources
    pub fn fields(&self) -> Option<&[FieldInfo]> {
        match &self.schema {
            SourceSchema::Csv { fields, .. } | SourceSchema::Log { fields, .. } => Some(fields),
            SourceSchema::Json { .. } => None,
        }
    }

    /// File that `fetch_df` should read for this source
    pub fn tabular_path(&self) -> Option<&str> {
        match &self.schema {
            SourceSchema::Csv { .. } => Some(&self.file_path),
            SourceSchema::Log { csv_file_path, .. } => Some(csv_file_path),
            SourceSchema::Json { .. } => None,
        }
    }

    /// Document text indexed by the vector store
    pub fn doc_string(&self) -> String {
        match &self.schema {
            SourceSchema::Csv { fields, .. } | SourceSchema::Log { fields, .. } => {
                let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
                format!(
                    "Metadata for a {} file \"{}\" that consists of the following fields: {}",
                    self.format().as_str().to_ascii_uppercase(),
                    self.file_name(),
                    names.join(", ")
                )
            }
            SourceSchema::Json { json_keys } => {
                // Container keys carry no leaf name worth indexing
                let mut leaves: Vec<&str> = json_keys
                    .iter()
                    .filter(|k| !matches!(k.key_type, JsonType::Object | JsonType::Array))
                    .map(|k| k.leaf())
                    .collect();
                leaves.sort_unstable();
                leaves.dedup();
                format!(
                    "Metadata for a JSON file \"{}\" that consists of the following keys: {}",
                    self.file_name(),
                    leaves.join(", ")
                )
            }
        }
    }

    /// Flatten into a vector-store metadata bag
    ///
    /// Scalars are stored as-is; list-valued fields are JSON-encoded into a
    /// single string. `file_format` is the discriminator.
    pub fn to_metadata_bag(&self) -> Result<MetadataBag, SourceError> {
        let mut bag = MetadataBag::new();
        bag.insert("id".to_string(), self.id.clone());
        bag.insert("file_path".to_string(), self.file_path.clone());
        bag.insert("file_format".to_string(), self.format().as_str().to_string());

        match &self.schema {
            SourceSchema::Csv { fields, row_count } => {
                bag.insert("fields".to_string(), serde_json::to_string(fields)?);
                bag.insert("row_count".to_string(), row_count.to_string());
            }
            SourceSchema::Log {
                fields,
                row_count,
                log_line_count,
                csv_file_path,
            } => {
                bag.insert("fields".to_string(), serde_json::to_string(fields)?);
                bag.insert("row_count".to_string(), row_count.to_string());
                bag.insert("log_line_count".to_string(), log_line_count.to_string());
                bag.insert("csv_file_path".to_string(), csv_file_path.clone());
            }
            SourceSchema::Json { json_keys } => {
                bag.insert("json_keys".to_string(), serde_json::to_string(json_keys)?);
            }
        }

        Ok(bag)
    }

    /// Rebuild a descriptor from a vector-store metadata bag
    pub fn from_metadata_bag(bag: &MetadataBag) -> Result<Self, SourceError> {
        let get = |key: &str| {
            bag.get(key)
                .cloned()
                .ok_or_else(|| SourceError::MissingField(key.to_string()))
        };
        let get_u64 = |key: &str| -> Result<u64, SourceError> {
            match bag.get(key) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| SourceError::InvalidField(key.to_string())),
                None => Ok(0),
            }
        };

        let id = get("id")?;
        let file_path = get("file_path")?;
        let format = SourceFormat::parse(&get("file_format")?)?;

        let schema = match format {
            SourceFormat::Csv => SourceSchema::Csv {
                fields: serde_json::from_str(&get("fields")?)?,
                row_count: get_u64("row_count")?,
            },
            SourceFormat::Log => SourceSchema::Log {
                fields: serde_json::from_str(&get("fields")?)?,
                row_count: get_u64("row_count")?,
                log_line_count: get_u64("log_line_count")?,
                csv_file_path: get("csv_file_path")?,
            },
            SourceFormat::Json => SourceSchema::Json {
                json_keys: serde_json::from_str(&get("json_keys")?)?,
            },
        };

        Ok(Self {
            id,
            file_path,
            schema,
        })
    }
}

/// Flat key-value metadata as stored by the vector store
pub type MetadataBag = BTreeMap<String, String>;

/// Error type for descriptor handling
#[derive(Debug)]
pub enum SourceError {
    /// Format discriminator or extension not understood
    UnrecognizedFormat(String),
    /// Required key missing from a metadata bag
    MissingField(String),
    /// Scalar value in a metadata bag could not be parsed
    InvalidField(String),
    /// Nested field (de)serialization failed
    Encoding(serde_json::Error),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::UnrecognizedFormat(fmt) => write!(f, "Unrecognized source format '{}'", fmt),
            SourceError::MissingField(key) => write!(f, "Metadata field '{}' is missing", key),
            SourceError::InvalidField(key) => write!(f, "Metadata field '{}' is invalid", key),
            SourceError::Encoding(e) => write!(f, "Metadata encoding error: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Encoding(e)
    }
}
