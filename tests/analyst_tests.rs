//! End-to-end tests for the question answering workflow
//!
//! The LLM and the code runner are scripted; the tests that need a live
//! model and a Python interpreter are marked #[ignore].

mod common;

use std::sync::Arc;

use common::{fenced, metrics_csv, sales_csv, store_with, PromptKind, ScriptedBackend, ScriptedRunner};
use dataloom::agent::{
    Analyst, Continuation, FeedbackConfig, FeedbackLoop, LoopOutcome, Session, TaskExecutor,
};
use dataloom::sandbox::ComputedValue;
use dataloom::AnalystConfig;

const MAX_CPU_CODE: &str = "def solver():\n    return fetch_df('file-0')['cpu'].max()";
const BAD_COLUMN_CODE: &str = "def solver():\n    return fetch_df('file-0')['cpu_usage'].max()";
const SUMMARY: &str = "The max cpu usage observed is 0.99";

async fn analyst(backend: Arc<ScriptedBackend>, runner: Arc<ScriptedRunner>) -> Analyst {
    let store = store_with(&[metrics_csv(), sales_csv()]).await;
    Analyst::new(AnalystConfig::default(), backend, store, runner)
}

/// Scenario: straightforward success with a summary
#[tokio::test]
async fn test_max_cpu_success() {
    let backend = ScriptedBackend::new(&["metrics.csv"], vec![fenced(MAX_CPU_CODE)], SUMMARY);
    let runner = ScriptedRunner::new(vec![Ok(ComputedValue::float(0.99))]);
    let analyst = analyst(backend.clone(), runner.clone()).await;

    let result = analyst.answer("What's the max cpu usage?", None).await.unwrap();

    assert!(result.success);
    assert_eq!(result.message, SUMMARY);
    assert_eq!(result.value_text().as_deref(), Some("0.99"));
    assert_eq!(result.source_ids, vec!["file-0".to_string()]);
    assert_eq!(result.retries_used, 0);
    assert_eq!(result.code.as_deref().map(str::trim_end), Some(MAX_CPU_CODE));
    assert!(!result.trace_id.is_empty());

    assert_eq!(backend.calls_of(PromptKind::Relevance).len(), 2);
    assert_eq!(backend.calls_of(PromptKind::Solver).len(), 1);
    assert_eq!(backend.calls_of(PromptKind::Summary).len(), 1);
    assert_eq!(runner.seen().len(), 1);

    // Only the relevant source is described to the code generator
    let solver = &backend.calls_of(PromptKind::Solver)[0];
    assert!(solver.system.contains("File ID: file-0"));
    assert!(!solver.system.contains("file-1"));
}

/// The last fenced python block is the code that gets executed
#[tokio::test]
async fn test_last_fenced_block_is_executed() {
    let backend = ScriptedBackend::new(&["metrics.csv"], vec![fenced(MAX_CPU_CODE)], SUMMARY);
    let runner = ScriptedRunner::new(vec![Ok(ComputedValue::float(0.99))]);
    let analyst = analyst(backend, runner.clone()).await;

    analyst.answer("max cpu", None).await.unwrap();

    let seen = runner.seen();
    assert!(seen[0].contains("['cpu'].max()"));
    assert!(!seen[0].contains("return None"));
}

/// Scenario: a KeyError is repaired by one refinement
#[tokio::test]
async fn test_key_error_then_success() {
    let backend = ScriptedBackend::new(
        &["metrics.csv"],
        vec![fenced(BAD_COLUMN_CODE), fenced(MAX_CPU_CODE)],
        SUMMARY,
    );
    let runner = ScriptedRunner::new(vec![
        Err("KeyError: 'cpu_usage'".to_string()),
        Ok(ComputedValue::float(0.99)),
    ]);
    let analyst = analyst(backend.clone(), runner.clone()).await;

    let result = analyst.answer("What's the max cpu usage?", None).await.unwrap();

    assert!(result.success);
    assert_eq!(result.retries_used, 1);
    assert_eq!(result.value_text().as_deref(), Some("0.99"));
    assert_eq!(runner.seen().len(), 2);

    let refinements = backend.calls_of(PromptKind::Refinement);
    assert_eq!(refinements.len(), 1);
    assert!(refinements[0].user.contains(BAD_COLUMN_CODE));
    assert!(refinements[0].user.contains(
        "What's the max cpu usage?.\n\nCode Error: \"KeyError: 'cpu_usage'\"\n\nFix the issue."
    ));
}

/// Scenario: five failures exhaust the budget and keep the final code
#[tokio::test]
async fn test_five_failures_exhaust_budget() {
    let codes: Vec<String> = (1..=5)
        .map(|i| format!("def solver():\n    return attempt_{}", i))
        .collect();
    let backend = ScriptedBackend::new(
        &["metrics.csv"],
        codes.iter().map(|c| fenced(c)).collect(),
        SUMMARY,
    );
    let runner = ScriptedRunner::new(
        (1..=5)
            .map(|i| Err(format!("NameError: name 'attempt_{}' is not defined", i)))
            .collect(),
    );
    let analyst = analyst(backend.clone(), runner.clone()).await;

    let result = analyst.answer("What's the max cpu usage?", None).await.unwrap();

    assert!(!result.success);
    assert_eq!(
        result.message,
        "Generated code did not execute successfully.\nLatest Error: NameError: name 'attempt_5' is not defined"
    );
    assert_eq!(result.code.as_deref().map(str::trim_end), Some(codes[4].as_str()));
    assert_eq!(result.retries_used, 5);
    assert!(result.computed_value.is_none());

    assert_eq!(runner.seen().len(), 5);
    assert_eq!(backend.calls_of(PromptKind::Solver).len(), 1);
    assert_eq!(backend.calls_of(PromptKind::Refinement).len(), 4);
    assert!(backend.calls_of(PromptKind::Summary).is_empty());
}

/// No relevant source stops the turn before any code is generated
#[tokio::test]
async fn test_no_relevant_source_short_circuits() {
    let backend = ScriptedBackend::new(&[], vec![fenced(MAX_CPU_CODE)], SUMMARY);
    let runner = ScriptedRunner::new(vec![Ok(ComputedValue::float(0.99))]);
    let analyst = analyst(backend.clone(), runner.clone()).await;

    let result = analyst.answer("How many users signed up?", None).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.message, "Could not find relevant data source.");
    assert!(result.code.is_none());
    assert!(backend
        .kinds()
        .iter()
        .all(|k| *k == PromptKind::Relevance));
    assert!(runner.seen().is_empty());
}

#[tokio::test]
async fn test_empty_store_short_circuits() {
    let backend = ScriptedBackend::new(&[], vec![], SUMMARY);
    let runner = ScriptedRunner::new(vec![]);
    let store = store_with(&[]).await;
    let analyst = Analyst::new(AnalystConfig::default(), backend.clone(), store, runner);

    let result = analyst.answer("max cpu", None).await.unwrap();
    assert_eq!(result.message, "Could not find relevant data source.");
    assert!(backend.kinds().is_empty());
}

/// Loop attempts never exceed the budget, whatever the budget
#[tokio::test]
async fn test_loop_attempts_bounded_by_budget() {
    for budget in [0u32, 1, 3] {
        let backend = ScriptedBackend::new(&[], vec![fenced("def solver():\n    return x"); 10], SUMMARY);
        let runner = ScriptedRunner::new(vec![Err("NameError: name 'x' is not defined".to_string()); 10]);
        let executor = TaskExecutor::new(backend, std::time::Duration::from_secs(5));
        let config = FeedbackConfig {
            retry_budget: budget,
            ..FeedbackConfig::default()
        };

        let feedback = FeedbackLoop::new(&executor, runner.as_ref(), config);
        let outcome = feedback
            .run("max cpu", &[metrics_csv()], None, "turn-1")
            .await
            .unwrap();

        assert!(matches!(outcome, LoopOutcome::Exhausted { .. }));
        assert!(outcome.attempts() <= budget + 1);
        assert_eq!(outcome.attempts(), budget.max(1));
        assert_eq!(runner.seen().len() as u32, outcome.attempts());
    }
}

/// A large table is returned without a summary
#[tokio::test]
async fn test_large_table_skips_summary() {
    let table = ComputedValue::Table {
        columns: vec!["host".to_string(), "cpu".to_string()],
        rows: (0..11).map(|i| vec![serde_json::json!(format!("h{}", i)), serde_json::json!(i)]).collect(),
    };
    let backend = ScriptedBackend::new(&["metrics.csv"], vec![fenced(MAX_CPU_CODE)], SUMMARY);
    let runner = ScriptedRunner::new(vec![Ok(table)]);
    let analyst = analyst(backend.clone(), runner).await;

    let result = analyst.answer("cpu per host", None).await.unwrap();
    assert!(result.success);
    assert!(result.message.is_empty());
    assert!(backend.calls_of(PromptKind::Summary).is_empty());
}

/// A continuation refines the previous code on the previous sources
#[tokio::test]
async fn test_continuation_refines_previous_code() {
    let backend = ScriptedBackend::new(&[], vec![fenced(MAX_CPU_CODE)], SUMMARY);
    let runner = ScriptedRunner::new(vec![Ok(ComputedValue::float(0.99))]);
    let analyst = analyst(backend.clone(), runner).await;

    let previous = Continuation {
        code: BAD_COLUMN_CODE.to_string(),
        source_ids: vec!["file-0".to_string()],
    };
    let result = analyst.answer("use the cpu column", Some(&previous)).await.unwrap();

    assert!(result.success);
    assert_eq!(result.source_ids, vec!["file-0".to_string()]);
    assert_eq!(backend.kinds()[0], PromptKind::Refinement);
    assert!(backend.calls_of(PromptKind::Relevance).is_empty());

    let refinement = &backend.calls_of(PromptKind::Refinement)[0];
    assert!(refinement.user.contains(BAD_COLUMN_CODE));
    assert!(refinement.user.contains("use the cpu column"));
}

/// `@prev ` continues from the previous turn in a session
#[tokio::test]
async fn test_session_prev_prefix() {
    let backend = ScriptedBackend::new(
        &["metrics.csv"],
        vec![fenced(MAX_CPU_CODE), fenced("def solver():\n    return 1")],
        SUMMARY,
    );
    let runner = ScriptedRunner::new(vec![Ok(ComputedValue::float(0.99)), Ok(ComputedValue::number(1))]);
    let analyst = analyst(backend.clone(), runner).await;
    let mut session = Session::new();

    session.ask(&analyst, "What's the max cpu usage?").await.unwrap();
    let second = session.ask(&analyst, "@prev count the hosts").await.unwrap();
    assert!(second.success);
    assert_eq!(second.user_prompt, "count the hosts");
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.turns[1].prompt, "@prev count the hosts");

    let summary = session.summary();
    assert_eq!((summary.turns, summary.answered), (2, 2));
    assert_eq!(summary.last_prompt, "@prev count the hosts");

    let refinement = &backend.calls_of(PromptKind::Refinement)[0];
    assert!(refinement.user.contains(MAX_CPU_CODE));
    assert_eq!(backend.calls_of(PromptKind::Relevance).len(), 2);
}

#[tokio::test]
#[ignore = "requires Ollama running locally with the qwen3 model and python3 with pandas"]
async fn test_live_max_cpu() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("metrics.csv");
    std::fs::write(&csv, "host,cpu\nweb-1,0.5\ndb-1,0.99\n").unwrap();

    let source = dataloom::DataSource::csv(
        "file-0",
        csv.to_string_lossy(),
        vec![
            dataloom::sources::FieldInfo::new("host", "object"),
            dataloom::sources::FieldInfo::new("cpu", "float64"),
        ],
    );
    let store = store_with(&[source]).await;
    let (config, _) = AnalystConfig::from_env();
    let analyst = Analyst::from_config(config, store);

    let result = analyst.answer("What's the max cpu usage?", None).await.unwrap();
    assert!(result.success, "{}", result.message);
    assert_eq!(result.value_text().as_deref(), Some("0.99"));
}
