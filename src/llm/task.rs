//! Prompt tasks and the typed responses they produce
//!
//! Every unit of LLM work is one variant of the closed [`PromptTask`] enum.
//! A task knows how to derive its template bindings (`preprocess`), which
//! static template it uses (`prompt`), and how to parse the model's raw
//! text into a [`ModelResponse`] (`postprocess`).

use std::collections::BTreeSet;

use super::backend::RenderedPrompt;
use super::fence;
use super::templates::{self, Bindings, PromptTemplate};
use crate::sources::DataSource;

/// Info strings accepted for generated Python blocks
const PYTHON_FENCES: &[&str] = &["python", "python3", "py"];

/// Maximum number of lines kept from a summary
pub const SUMMARY_MAX_LINES: usize = 3;

/// Kind of a prompt task; its tag is always part of the response's tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    RelevanceCheck,
    CodeSolver,
    CodeRefinement,
    LogFieldExtractor,
    Summarizer,
}

impl TaskKind {
    pub fn tag(&self) -> &'static str {
        match self {
            TaskKind::RelevanceCheck => "relevance_check",
            TaskKind::CodeSolver => "code_solver",
            TaskKind::CodeRefinement => "code_refinement",
            TaskKind::LogFieldExtractor => "log_field_extractor",
            TaskKind::Summarizer => "summarizer",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Error raised when a model reply cannot be turned into a typed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No fenced block of the expected language in the reply
    MissingCodeBlock { kind: TaskKind },
    /// A block was found but contained nothing
    EmptyAnswer { kind: TaskKind },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MissingCodeBlock { kind } => {
                write!(f, "{}: expected a fenced code block in the model reply", kind)
            }
            ParseError::EmptyAnswer { kind } => write!(f, "{}: model reply was empty", kind),
        }
    }
}

impl std::error::Error for ParseError {}

/// Typed part of a model response
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Relevance verdict
    Verdict(bool),
    /// Extracted Python source
    Code(String),
    /// Cleaned regex pattern
    Pattern(String),
    /// Short prose summary
    Summary(String),
}

/// Parsed, tagged output of one prompt task
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub kind: TaskKind,
    /// Raw model text
    pub text: String,
    /// Kind tag plus caller-supplied tags
    pub tags: BTreeSet<String>,
    /// Correlation metadata carried over from the task
    pub subject: Option<DataSource>,
    pub payload: Payload,
}

impl ModelResponse {
    /// True when every tag in `filter` is present on this response
    pub fn has_tags<S: AsRef<str>>(&self, filter: &[S]) -> bool {
        filter.iter().all(|t| self.tags.contains(t.as_ref()))
    }

    pub fn verdict(&self) -> Option<bool> {
        match self.payload {
            Payload::Verdict(v) => Some(v),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match &self.payload {
            Payload::Code(code) => Some(code),
            _ => None,
        }
    }

    pub fn pattern(&self) -> Option<&str> {
        match &self.payload {
            Payload::Pattern(p) => Some(p),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<&str> {
        match &self.payload {
            Payload::Summary(s) => Some(s),
            _ => None,
        }
    }
}

/// Fields shared by every task: correlation tags and metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskContext {
    pub tags: Vec<String>,
    pub subject: Option<DataSource>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceCheck {
    pub source: DataSource,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeSolver {
    pub sources: Vec<DataSource>,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeRefinement {
    pub code: String,
    pub sources: Vec<DataSource>,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogFieldExtractor {
    pub file_name: String,
    pub sample_lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summarizer {
    pub data: String,
    pub query: String,
}

/// The closed set of LLM work units
#[derive(Debug, Clone, PartialEq)]
pub enum PromptTaskKind {
    RelevanceCheck(RelevanceCheck),
    CodeSolver(CodeSolver),
    CodeRefinement(CodeRefinement),
    LogFieldExtractor(LogFieldExtractor),
    Summarizer(Summarizer),
}

/// One immutable unit of LLM work
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTask {
    work: PromptTaskKind,
    context: TaskContext,
}

impl PromptTask {
    pub fn new(work: PromptTaskKind) -> Self {
        Self {
            work,
            context: TaskContext::default(),
        }
    }

    /// Is `source` relevant to `query`? The source is also the correlation subject.
    pub fn relevance_check(source: DataSource, query: impl Into<String>) -> Self {
        let subject = source.clone();
        Self::new(PromptTaskKind::RelevanceCheck(RelevanceCheck {
            source,
            query: query.into(),
        }))
        .with_subject(subject)
    }

    pub fn code_solver(sources: Vec<DataSource>, query: impl Into<String>) -> Self {
        Self::new(PromptTaskKind::CodeSolver(CodeSolver {
            sources,
            query: query.into(),
        }))
    }

    pub fn code_refinement(
        code: impl Into<String>,
        sources: Vec<DataSource>,
        query: impl Into<String>,
    ) -> Self {
        Self::new(PromptTaskKind::CodeRefinement(CodeRefinement {
            code: code.into(),
            sources,
            query: query.into(),
        }))
    }

    pub fn log_field_extractor(file_name: impl Into<String>, sample_lines: Vec<String>) -> Self {
        Self::new(PromptTaskKind::LogFieldExtractor(LogFieldExtractor {
            file_name: file_name.into(),
            sample_lines,
        }))
    }

    pub fn summarizer(data: impl Into<String>, query: impl Into<String>) -> Self {
        Self::new(PromptTaskKind::Summarizer(Summarizer {
            data: data.into(),
            query: query.into(),
        }))
    }

    /// Add a caller-supplied correlation tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.context.tags.push(tag.into());
        self
    }

    /// Attach correlation metadata returned with the response
    pub fn with_subject(mut self, subject: DataSource) -> Self {
        self.context.subject = Some(subject);
        self
    }

    pub fn kind(&self) -> TaskKind {
        match &self.work {
            PromptTaskKind::RelevanceCheck(_) => TaskKind::RelevanceCheck,
            PromptTaskKind::CodeSolver(_) => TaskKind::CodeSolver,
            PromptTaskKind::CodeRefinement(_) => TaskKind::CodeRefinement,
            PromptTaskKind::LogFieldExtractor(_) => TaskKind::LogFieldExtractor,
            PromptTaskKind::Summarizer(_) => TaskKind::Summarizer,
        }
    }

    /// Kind tag followed by the caller's tags
    pub fn tags(&self) -> BTreeSet<String> {
        std::iter::once(self.kind().tag().to_string())
            .chain(self.context.tags.iter().cloned())
            .collect()
    }

    /// Named values used to fill this task's template
    pub fn preprocess(&self) -> Bindings {
        let mut bindings = Bindings::new();
        match &self.work {
            PromptTaskKind::RelevanceCheck(task) => {
                bindings.insert("file_name", task.source.file_name().to_string());
                bindings.insert("file_info", templates::relevance_file_info(&task.source));
                bindings.insert("query", task.query.clone());
            }
            PromptTaskKind::CodeSolver(task) => {
                bindings.insert("file_infos", templates::detailed_file_infos(&task.sources));
                bindings.insert("query", task.query.clone());
            }
            PromptTaskKind::CodeRefinement(task) => {
                bindings.insert("code", task.code.clone());
                bindings.insert("file_infos", templates::detailed_file_infos(&task.sources));
                bindings.insert("query", task.query.clone());
            }
            PromptTaskKind::LogFieldExtractor(task) => {
                let lines: Vec<&str> = task.sample_lines.iter().map(|l| l.trim()).collect();
                bindings.insert("file_name", task.file_name.clone());
                bindings.insert("k", task.sample_lines.len().to_string());
                bindings.insert("log_lines", lines.join("\n"));
            }
            PromptTaskKind::Summarizer(task) => {
                bindings.insert("data", task.data.clone());
                bindings.insert("user_query", task.query.clone());
            }
        }
        bindings
    }

    /// Static template pair for this task's kind
    pub fn prompt(&self) -> PromptTemplate {
        match self.kind() {
            TaskKind::RelevanceCheck => PromptTemplate {
                system: templates::RELEVANCE_SYSTEM,
                user: templates::RELEVANCE_USER,
            },
            TaskKind::CodeSolver => PromptTemplate {
                system: templates::code_solver_system(),
                user: templates::CODE_SOLVER_USER,
            },
            TaskKind::CodeRefinement => PromptTemplate {
                system: templates::code_refinement_system(),
                user: templates::CODE_REFINEMENT_USER,
            },
            TaskKind::LogFieldExtractor => PromptTemplate {
                system: templates::LOG_FIELDS_SYSTEM,
                user: templates::LOG_FIELDS_USER,
            },
            TaskKind::Summarizer => PromptTemplate {
                system: templates::SUMMARY_SYSTEM,
                user: templates::SUMMARY_USER,
            },
        }
    }

    /// Template filled with this task's bindings
    pub fn render(&self) -> RenderedPrompt {
        let template = self.prompt();
        let bindings = self.preprocess();
        RenderedPrompt::new(
            templates::render(template.system, &bindings),
            templates::render(template.user, &bindings),
        )
    }

    /// Parse the model's raw text into a typed response
    pub fn postprocess(&self, raw: &str) -> Result<ModelResponse, ParseError> {
        let kind = self.kind();
        let answer = strip_reasoning(raw);

        let payload = match kind {
            TaskKind::RelevanceCheck => Payload::Verdict(parse_verdict(answer)),
            TaskKind::CodeSolver | TaskKind::CodeRefinement => {
                let code = fence::last_block_for(answer, PYTHON_FENCES)
                    .ok_or(ParseError::MissingCodeBlock { kind })?;
                if code.trim().is_empty() {
                    return Err(ParseError::EmptyAnswer { kind });
                }
                Payload::Code(code.to_string())
            }
            TaskKind::LogFieldExtractor => {
                let pattern = clean_regex_answer(answer);
                if pattern.is_empty() {
                    return Err(ParseError::EmptyAnswer { kind });
                }
                Payload::Pattern(pattern)
            }
            TaskKind::Summarizer => {
                let summary = clip_lines(answer, SUMMARY_MAX_LINES);
                if summary.is_empty() {
                    return Err(ParseError::EmptyAnswer { kind });
                }
                Payload::Summary(summary)
            }
        };

        Ok(ModelResponse {
            kind,
            text: raw.to_string(),
            tags: self.tags(),
            subject: self.context.subject.clone(),
            payload,
        })
    }
}

/// Drop a leading `<think>...</think>` block emitted by reasoning models
fn strip_reasoning(raw: &str) -> &str {
    let trimmed = raw.trim_start();
    if trimmed.starts_with("<think>") {
        if let Some(end) = trimmed.find("</think>") {
            return &trimmed[end + "</think>".len()..];
        }
    }
    raw
}

fn parse_verdict(answer: &str) -> bool {
    let answer = answer.trim_start().trim_start_matches(|c| c == '*' || c == '"');
    answer
        .get(..3)
        .map(|head| head.eq_ignore_ascii_case("yes"))
        .unwrap_or(false)
}

/// Reduce a regex answer to the bare pattern
///
/// Handles a surrounding fence (with or without an info line) and a Python
/// raw-string wrapper such as `r'...'`.
pub fn clean_regex_answer(raw: &str) -> String {
    let mut answer = raw.trim();

    if answer.contains("```") {
        if let Some(block) = fence::last_block_raw(answer) {
            answer = block.trim();
            // Drop an info line like "regex" or "python" when the pattern follows it
            if let Some((first, rest)) = answer.split_once('\n') {
                let first = first.trim();
                if !first.is_empty() && first.chars().all(|c| c.is_ascii_alphanumeric()) {
                    answer = rest.trim();
                }
            }
        }
    }

    for quote in ['\'', '"'] {
        let prefix = format!("r{}", quote);
        if answer.len() >= 3 && answer.starts_with(&prefix) && answer.ends_with(quote) {
            answer = &answer[2..answer.len() - 1];
            break;
        }
    }

    answer.trim().to_string()
}

fn clip_lines(text: &str, max_lines: usize) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(max_lines)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::FieldInfo;

    fn metrics_csv() -> DataSource {
        DataSource::csv(
            "file-0",
            "/tmp/metrics.csv",
            vec![FieldInfo::new("cpu", "float64"), FieldInfo::new("ts", "int64")],
        )
    }

    #[test]
    fn test_tags_include_kind_and_caller_tags() {
        let task = PromptTask::code_solver(vec![], "q").with_tag("turn-1");
        let tags = task.tags();
        assert!(tags.contains("code_solver"));
        assert!(tags.contains("turn-1"));
    }

    #[test]
    fn test_relevance_verdicts() {
        let task = PromptTask::relevance_check(metrics_csv(), "max cpu?");
        assert_eq!(task.postprocess("Yes, it has cpu.").unwrap().verdict(), Some(true));
        assert_eq!(task.postprocess("  yes").unwrap().verdict(), Some(true));
        assert_eq!(task.postprocess("**Yes**").unwrap().verdict(), Some(true));
        assert_eq!(task.postprocess("No.").unwrap().verdict(), Some(false));
        assert_eq!(task.postprocess("").unwrap().verdict(), Some(false));
        assert_eq!(
            task.postprocess("<think>cpu column exists</think>\nYes").unwrap().verdict(),
            Some(true)
        );
    }

    #[test]
    fn test_relevance_response_carries_subject() {
        let task = PromptTask::relevance_check(metrics_csv(), "max cpu?");
        let response = task.postprocess("Yes").unwrap();
        assert_eq!(response.subject.as_ref().map(|s| s.id.as_str()), Some("file-0"));
    }

    #[test]
    fn test_relevance_prompt_rendering() {
        let prompt = PromptTask::relevance_check(metrics_csv(), "max cpu?").render();
        assert!(prompt.system.contains("Filename: metrics.csv"));
        assert!(prompt.system.contains("CSV Fields: cpu (float64), ts (int64)"));
        assert!(prompt.user.contains("max cpu?"));
    }

    #[test]
    fn test_code_solver_takes_last_block() {
        let task = PromptTask::code_solver(vec![metrics_csv()], "max cpu?");
        let reply = "Like this:\n```python\ndef solver():\n    return 0\n```\n\
                     Final:\n```python\ndef solver():\n    return fetch_df('file-0')['cpu'].max()\n```";
        let response = task.postprocess(reply).unwrap();
        let code = response.code().unwrap();
        assert!(code.contains("['cpu'].max()"));
        assert!(!code.contains("return 0"));
        assert_eq!(response.text, reply);
    }

    #[test]
    fn test_code_solver_without_block_is_parse_error() {
        let task = PromptTask::code_solver(vec![], "q");
        assert_eq!(
            task.postprocess("def solver(): return 1"),
            Err(ParseError::MissingCodeBlock {
                kind: TaskKind::CodeSolver
            })
        );
    }

    #[test]
    fn test_refinement_prompt_includes_prior_code() {
        let task = PromptTask::code_refinement("def solver():\n    return 1", vec![metrics_csv()], "fix it");
        let prompt = task.render();
        assert!(prompt.user.contains("def solver():\n    return 1"));
        assert!(prompt.system.contains("1. File ID: file-0"));
        assert!(prompt.system.starts_with("Given the data sources described below and an existing"));
    }

    #[test]
    fn test_regex_cleanup_variants() {
        assert_eq!(clean_regex_answer(r"r'^(?P<a>\d+)$'"), r"^(?P<a>\d+)$");
        assert_eq!(clean_regex_answer("```\nr'^(?P<a>\\d+)$'\n```"), r"^(?P<a>\d+)$");
        assert_eq!(clean_regex_answer("```regex\n^(?P<a>\\d+)$\n```"), r"^(?P<a>\d+)$");
        assert_eq!(clean_regex_answer("  ^(?P<a>.*)$  "), "^(?P<a>.*)$");
        // A pattern that merely starts with "r" is left alone
        assert_eq!(clean_regex_answer("root=(?P<r>.*)"), "root=(?P<r>.*)");
    }

    #[test]
    fn test_log_extractor_bindings() {
        let task = PromptTask::log_field_extractor(
            "app.log",
            vec!["  line one ".to_string(), "line two".to_string()],
        );
        let bindings = task.preprocess();
        assert_eq!(bindings["k"], "2");
        assert_eq!(bindings["log_lines"], "line one\nline two");
        let prompt = task.render();
        assert!(prompt.user.contains("2 log lines sampled from app.log"));
    }

    #[test]
    fn test_summary_clipped_to_three_lines() {
        let task = PromptTask::summarizer("0.99", "max cpu?");
        let response = task.postprocess("one\n\ntwo\nthree\nfour").unwrap();
        assert_eq!(response.summary(), Some("one\ntwo\nthree"));
        assert!(response.tags.contains("summarizer"));
    }
}
