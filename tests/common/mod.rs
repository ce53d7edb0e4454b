//! Scripted test doubles for the LLM backend and the code runner

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dataloom::llm::{BackendError, LlmBackend, RenderedPrompt};
use dataloom::sandbox::{CodeRunner, ComputedValue, ExecutionError};
use dataloom::sources::{add_source, DataSource, FieldInfo, InMemoryStore};

/// Which prompt a backend call was for, judged from the system text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Relevance,
    Solver,
    Refinement,
    Summary,
    LogFields,
}

pub fn classify(prompt: &RenderedPrompt) -> PromptKind {
    let system = prompt.system.as_str();
    if system.contains("Decide whether the file holds information") {
        PromptKind::Relevance
    } else if system.starts_with("Given the data sources described below and an existing") {
        PromptKind::Refinement
    } else if system.starts_with("Given the data sources described below") {
        PromptKind::Solver
    } else if system.starts_with("You are given a value") {
        PromptKind::Summary
    } else {
        PromptKind::LogFields
    }
}

/// Wrap code the way a model would, after a throwaway example block
pub fn fenced(code: &str) -> String {
    format!(
        "For example:\n```python\ndef solver():\n    return None\n```\nFinal answer:\n```python\n{}\n```\n",
        code
    )
}

/// Backend answering from a script, recording every prompt
pub struct ScriptedBackend {
    /// File names that get a "Yes" relevance verdict
    relevant_files: Vec<String>,
    code_replies: Mutex<VecDeque<String>>,
    summary: String,
    delay: Duration,
    pub calls: Mutex<Vec<(PromptKind, RenderedPrompt)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(relevant_files: &[&str], code_replies: Vec<String>, summary: &str) -> Arc<Self> {
        Arc::new(Self {
            relevant_files: relevant_files.iter().map(|f| f.to_string()).collect(),
            code_replies: Mutex::new(code_replies.into()),
            summary: summary.to_string(),
            delay: Duration::from_millis(2),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls_of(&self, kind: PromptKind) -> Vec<RenderedPrompt> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn kinds(&self) -> Vec<PromptKind> {
        self.calls.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<String, BackendError> {
        let kind = classify(prompt);
        self.calls.lock().unwrap().push((kind, prompt.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = match kind {
            PromptKind::Relevance => {
                let relevant = self
                    .relevant_files
                    .iter()
                    .any(|f| prompt.system.contains(&format!("Filename: {}\n", f)));
                if relevant { "Yes" } else { "No" }.to_string()
            }
            PromptKind::Solver | PromptKind::Refinement => self
                .code_replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| BackendError::Other("code script exhausted".to_string()))?,
            PromptKind::Summary => self.summary.clone(),
            PromptKind::LogFields => r"r'^(?P<level>\w+) (?P<message>.*)$'".to_string(),
        };
        Ok(reply)
    }
}

/// Runner replaying scripted outcomes, recording the code it was given
pub struct ScriptedRunner {
    outcomes: Mutex<VecDeque<Result<ComputedValue, String>>>,
    pub seen: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(outcomes: Vec<Result<ComputedValue, String>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeRunner for ScriptedRunner {
    async fn run(&self, code: &str, _sources: &[DataSource]) -> Result<ComputedValue, ExecutionError> {
        self.seen.lock().unwrap().push(code.to_string());
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(ExecutionError::Failed {
                stderr: format!("Traceback (most recent call last):\n{}", message),
                message,
            }),
            None => Err(ExecutionError::Protocol("no scripted outcome".to_string())),
        }
    }
}

pub fn metrics_csv() -> DataSource {
    DataSource::csv(
        "file-0",
        "/data/metrics.csv",
        vec![
            FieldInfo::new("host", "object"),
            FieldInfo::new("cpu", "float64"),
            FieldInfo::new("ts", "int64"),
        ],
    )
}

pub fn sales_csv() -> DataSource {
    DataSource::csv(
        "file-1",
        "/data/sales.csv",
        vec![FieldInfo::new("region", "object"), FieldInfo::new("revenue", "float64")],
    )
}

pub async fn store_with(sources: &[DataSource]) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for source in sources {
        add_source(store.as_ref(), source).await.unwrap();
    }
    store
}
