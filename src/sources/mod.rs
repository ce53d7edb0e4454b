//! Data sources: descriptors, file ingestion, the vector store and log parsing

pub mod descriptor;
pub mod ingest;
pub mod logs;
pub mod store;

pub use descriptor::{
    DataSource, FieldInfo, JsonKey, JsonType, MetadataBag, SourceError, SourceFormat,
    SourceSchema, UNIQUE_VALUES_LIMIT,
};
pub use ingest::{ingest_file, IngestError};
pub use logs::{LogError, LogPattern};
pub use store::{
    add_source, get_sources, query_sources, InMemoryStore, StoreError, VectorStore, TOP_N_RESULTS,
};
