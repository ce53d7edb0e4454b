//! Dataloom - natural-language questions over CSV, log and JSON data
//!
//! A question is answered by code the LLM writes, run against the user's
//! data, and repaired when it fails.
//!
//! # Modules
//!
//! - `agent` - Task executor, relevance filter, feedback loop and workflow
//! - `llm` - LLM backends, prompt templates and prompt tasks
//! - `sources` - Data source descriptors, vector store and log ingestion
//! - `sandbox` - Execution of generated code in a Python subprocess
//! - `config` - Runtime configuration from the environment
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Console and OpenTelemetry tracing setup
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dataloom::{Analyst, AnalystConfig, InMemoryStore};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let (config, _warnings) = AnalystConfig::from_env();
//! let analyst = Analyst::from_config(config, store);
//! let result = analyst.answer("What's the max cpu usage?", None).await?;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod sources;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{Analyst, AppResult, Continuation, Session, TaskExecutor};
pub use config::AnalystConfig;
pub use sources::{DataSource, InMemoryStore, VectorStore};
