//! Relevance filter: map-reduce over candidate data sources
//!
//! One Relevance Check per candidate runs concurrently on the executor; the
//! boolean verdicts are reduced into the list of sources worth handing to
//! the code generator.

use tracing::{debug, info};

use super::executor::{ProgressFn, TaskError, TaskExecutor};
use crate::llm::{PromptTask, TaskKind};
use crate::metrics::RELEVANCE_VERDICTS;
use crate::sources::DataSource;

/// Keep the candidates the model judges relevant to `query`
///
/// Results are joined back to their sources through the correlation tag
/// `turn_tag`, so concurrent filters on one executor do not mix. The
/// returned order follows `candidates`. An empty list means no relevant
/// data; callers must stop there.
pub async fn filter_relevant(
    executor: &TaskExecutor,
    candidates: &[DataSource],
    query: &str,
    turn_tag: &str,
    max_workers: usize,
    on_progress: Option<ProgressFn>,
) -> Result<Vec<DataSource>, TaskError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    for source in candidates {
        executor
            .submit(PromptTask::relevance_check(source.clone(), query).with_tag(turn_tag))
            .await;
    }
    executor.run_all(max_workers, on_progress).await?;

    let responses = executor
        .fetch_results(&[TaskKind::RelevanceCheck.tag(), turn_tag])
        .await;

    let relevant_ids: Vec<String> = responses
        .iter()
        .filter_map(|response| {
            let verdict = response.verdict().unwrap_or(false);
            let label = if verdict { "relevant" } else { "irrelevant" };
            RELEVANCE_VERDICTS.with_label_values(&[label]).inc();

            let subject = response.subject.as_ref()?;
            debug!(source_id = %subject.id, verdict, "Relevance verdict");
            verdict.then(|| subject.id.clone())
        })
        .collect();

    let relevant: Vec<DataSource> = candidates
        .iter()
        .filter(|source| relevant_ids.contains(&source.id))
        .cloned()
        .collect();

    info!(
        candidates = candidates.len(),
        relevant = relevant.len(),
        "Relevance filter finished"
    );
    Ok(relevant)
}
