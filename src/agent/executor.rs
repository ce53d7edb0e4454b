//! Concurrent executor for prompt tasks
//!
//! Tasks are queued with `submit()` and drained by `run_all()`, which spawns
//! a bounded set of workers. Each worker pops from the pending queue (LIFO),
//! renders the prompt, invokes the backend and parses the reply. Responses
//! accumulate in an unordered result list; callers join them back to their
//! tasks by tag through `fetch_results()`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::llm::{BackendError, LlmBackend, ModelResponse, ParseError, PromptTask, TaskKind};
use crate::metrics::{LLM_CALL_TIME, LLM_TASKS};

/// Default width of the worker pool
pub const DEFAULT_MAX_WORKERS: usize = 20;

/// Progress callback, called with `completed / (completed + pending)`
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Error type for task execution
#[derive(Debug)]
pub enum TaskError {
    /// The backend call failed
    Backend { kind: TaskKind, source: BackendError },
    /// The backend did not answer within the configured bound
    Timeout { kind: TaskKind, after: Duration },
    /// The reply could not be parsed into a typed response
    Parse(ParseError),
    /// The task panicked; its worker carried on with the queue
    Panic { kind: TaskKind },
    /// A worker was cancelled
    Join(String),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Backend { kind, source } => write!(f, "{} task failed: {}", kind, source),
            TaskError::Timeout { kind, after } => {
                write!(f, "{} task timed out after {:?}", kind, after)
            }
            TaskError::Parse(e) => write!(f, "Response parse error: {}", e),
            TaskError::Panic { kind } => write!(f, "{} task panicked", kind),
            TaskError::Join(msg) => write!(f, "Worker failed: {}", msg),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<ParseError> for TaskError {
    fn from(e: ParseError) -> Self {
        TaskError::Parse(e)
    }
}

struct Shared {
    backend: Arc<dyn LlmBackend>,
    call_timeout: Duration,
    pending: Mutex<Vec<PromptTask>>,
    results: Mutex<Vec<ModelResponse>>,
}

/// Runs batches of prompt tasks against one backend
///
/// Cloning is cheap and clones share the same queues.
#[derive(Clone)]
pub struct TaskExecutor {
    shared: Arc<Shared>,
}

impl TaskExecutor {
    /// Create an executor
    ///
    /// # Arguments
    /// * `backend` - LLM backend shared by all workers
    /// * `call_timeout` - Upper bound on a single backend round trip
    pub fn new(backend: Arc<dyn LlmBackend>, call_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                call_timeout,
                pending: Mutex::new(Vec::new()),
                results: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Queue a task for the next `run_all()`
    pub async fn submit(&self, task: PromptTask) {
        self.shared.pending.lock().await.push(task);
    }

    /// Number of queued, not yet claimed tasks
    pub async fn pending_len(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Drain the pending queue with at most `max_workers` concurrent tasks
    ///
    /// Every claimed task is run to completion even after a failure; all
    /// successful responses are kept and the first failure is returned.
    /// Returns the number of tasks completed successfully in this run.
    pub async fn run_all(
        &self,
        max_workers: usize,
        on_progress: Option<ProgressFn>,
    ) -> Result<usize, TaskError> {
        let queued = self.pending_len().await;
        if queued == 0 {
            return Ok(0);
        }

        let width = max_workers.max(1).min(queued);
        let completed = Arc::new(AtomicUsize::new(0));
        let first_error: Arc<Mutex<Option<TaskError>>> = Arc::new(Mutex::new(None));

        info!(tasks = queued, workers = width, backend = %self.shared.backend.name(), "Running prompt tasks");

        let mut workers = JoinSet::new();
        for worker_id in 0..width {
            let shared = Arc::clone(&self.shared);
            let completed = Arc::clone(&completed);
            let first_error = Arc::clone(&first_error);
            let on_progress = on_progress.clone();

            workers.spawn(
                async move {
                    loop {
                        // LIFO claim
                        let Some(task) = shared.pending.lock().await.pop() else {
                            break;
                        };

                        let kind = task.kind();
                        let outcome = AssertUnwindSafe(run_task(
                            shared.backend.as_ref(),
                            &task,
                            shared.call_timeout,
                        ))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            LLM_TASKS.with_label_values(&[kind.tag(), "panic"]).inc();
                            Err(TaskError::Panic { kind })
                        });

                        match outcome {
                            Ok(response) => {
                                shared.results.lock().await.push(response);
                                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                                if let Some(callback) = &on_progress {
                                    let left = shared.pending.lock().await.len();
                                    callback(done as f64 / (done + left) as f64);
                                }
                            }
                            Err(e) => {
                                warn!(worker_id, error = %e, "Prompt task failed");
                                let mut slot = first_error.lock().await;
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                            }
                        }
                    }
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                let mut slot = first_error.lock().await;
                if slot.is_none() {
                    *slot = Some(TaskError::Join(e.to_string()));
                }
            }
        }

        let done = completed.load(Ordering::SeqCst);
        let taken = first_error.lock().await.take();
        match taken {
            Some(e) => Err(e),
            None => {
                debug!(completed = done, "Prompt tasks finished");
                Ok(done)
            }
        }
    }

    /// Accumulated responses whose tags include every tag in `filter`
    ///
    /// An empty filter returns everything. Order is unspecified.
    pub async fn fetch_results(&self, filter: &[&str]) -> Vec<ModelResponse> {
        self.shared
            .results
            .lock()
            .await
            .iter()
            .filter(|r| r.has_tags(filter))
            .cloned()
            .collect()
    }

    /// Run one task immediately, bypassing the queue and result list
    pub async fn execute_single(&self, task: PromptTask) -> Result<ModelResponse, TaskError> {
        run_task(self.shared.backend.as_ref(), &task, self.shared.call_timeout).await
    }
}

/// Render, invoke and parse one task
async fn run_task(
    backend: &dyn LlmBackend,
    task: &PromptTask,
    call_timeout: Duration,
) -> Result<ModelResponse, TaskError> {
    let kind = task.kind();
    let span = info_span!("llm_task", kind = %kind, otel.name = "llm_task");

    async {
        let prompt = task.render();
        debug!(kind = %kind, system_len = prompt.system.len(), user = %prompt.user, "Invoking backend");

        let start = Instant::now();
        let raw = match tokio::time::timeout(call_timeout, backend.invoke(&prompt)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(source)) => {
                LLM_TASKS.with_label_values(&[kind.tag(), "backend_error"]).inc();
                return Err(TaskError::Backend { kind, source });
            }
            Err(_) => {
                LLM_TASKS.with_label_values(&[kind.tag(), "timeout"]).inc();
                return Err(TaskError::Timeout {
                    kind,
                    after: call_timeout,
                });
            }
        };
        LLM_CALL_TIME
            .with_label_values(&[kind.tag()])
            .observe(start.elapsed().as_secs_f64());
        debug!(kind = %kind, response = %raw, "Backend replied");

        match task.postprocess(&raw) {
            Ok(response) => {
                LLM_TASKS.with_label_values(&[kind.tag(), "success"]).inc();
                Ok(response)
            }
            Err(e) => {
                LLM_TASKS.with_label_values(&[kind.tag(), "parse_error"]).inc();
                Err(e.into())
            }
        }
    }
    .instrument(span)
    .await
}
