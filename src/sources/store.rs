//! Vector store contract and an in-memory implementation
//!
//! The store indexes one document per data source together with a flat
//! metadata bag. Retrieval returns bags, which are turned back into
//! descriptors by `query_sources` / `get_sources`.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::descriptor::{DataSource, MetadataBag, SourceError};

/// Default number of candidates fetched per query
pub const TOP_N_RESULTS: usize = 5;

/// Error type for vector store operations
#[derive(Debug)]
pub enum StoreError {
    /// A document with this id already exists
    DuplicateId(String),
    /// Backend-specific failure
    Backend(String),
    /// Descriptor could not be flattened for storage
    Source(SourceError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateId(id) => write!(f, "Document '{}' already exists", id),
            StoreError::Backend(msg) => write!(f, "Vector store error: {}", msg),
            StoreError::Source(e) => write!(f, "Invalid source: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<SourceError> for StoreError {
    fn from(e: SourceError) -> Self {
        StoreError::Source(e)
    }
}

/// Minimal vector store surface used by the analyst
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Index a document with its metadata
    async fn add(&self, id: &str, document: &str, metadata: MetadataBag) -> Result<(), StoreError>;

    /// Most similar documents first, at most `top_n`
    async fn query(&self, text: &str, top_n: usize) -> Result<Vec<MetadataBag>, StoreError>;

    /// Metadata for the given ids; unknown ids are skipped
    async fn get(&self, ids: &[String]) -> Result<Vec<MetadataBag>, StoreError>;

    /// Number of indexed documents
    async fn count(&self) -> usize;
}

/// Index a descriptor under its own id
pub async fn add_source(store: &dyn VectorStore, source: &DataSource) -> Result<(), StoreError> {
    let bag = source.to_metadata_bag()?;
    store.add(&source.id, &source.doc_string(), bag).await?;
    info!(source_id = %source.id, format = %source.format(), "Indexed data source");
    Ok(())
}

/// Query the store and decode candidates, skipping unreadable bags
pub async fn query_sources(
    store: &dyn VectorStore,
    text: &str,
    top_n: usize,
) -> Result<Vec<DataSource>, StoreError> {
    let bags = store.query(text, top_n).await?;
    Ok(decode_bags(bags))
}

/// Fetch descriptors by id, skipping unreadable bags
pub async fn get_sources(
    store: &dyn VectorStore,
    ids: &[String],
) -> Result<Vec<DataSource>, StoreError> {
    let bags = store.get(ids).await?;
    Ok(decode_bags(bags))
}

fn decode_bags(bags: Vec<MetadataBag>) -> Vec<DataSource> {
    bags.iter()
        .filter_map(|bag| match DataSource::from_metadata_bag(bag) {
            Ok(source) => Some(source),
            Err(e) => {
                error!(error = %e, "Unable to parse metadata bag");
                None
            }
        })
        .collect()
}

struct StoredDocument {
    id: String,
    tokens: HashSet<String>,
    metadata: MetadataBag,
}

/// In-memory store ranking documents by token overlap with the query
///
/// Scoped to one session; suitable for tests and the CLI.
#[derive(Default)]
pub struct InMemoryStore {
    documents: Mutex<Vec<StoredDocument>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn add(&self, id: &str, document: &str, metadata: MetadataBag) -> Result<(), StoreError> {
        let mut documents = self.documents.lock().await;
        if documents.iter().any(|d| d.id == id) {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        documents.push(StoredDocument {
            id: id.to_string(),
            tokens: tokenize(document),
            metadata,
        });
        Ok(())
    }

    async fn query(&self, text: &str, top_n: usize) -> Result<Vec<MetadataBag>, StoreError> {
        let query_tokens = tokenize(text);
        let documents = self.documents.lock().await;

        let mut scored: Vec<(usize, usize)> = documents
            .iter()
            .enumerate()
            .map(|(idx, doc)| (idx, doc.tokens.intersection(&query_tokens).count()))
            .collect();

        // Highest overlap first; insertion order breaks ties
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        debug!(candidates = scored.len(), top_n, "Ranked documents");

        Ok(scored
            .into_iter()
            .take(top_n)
            .map(|(idx, _)| documents[idx].metadata.clone())
            .collect())
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<MetadataBag>, StoreError> {
        let documents = self.documents.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| documents.iter().find(|d| &d.id == id))
            .map(|d| d.metadata.clone())
            .collect())
    }

    async fn count(&self) -> usize {
        self.documents.lock().await.len()
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}
