//! Prompt templates and the helpers that fill them
//!
//! Templates use `{name}` placeholders. Only names present in the bindings
//! are substituted, so literal braces in examples (regex quantifiers such
//! as `\d{2}`) need no escaping.

use std::collections::BTreeMap;

use crate::sources::{DataSource, FieldInfo, JsonKey, SourceSchema};

/// Named values filled into a template
pub type Bindings = BTreeMap<&'static str, String>;

/// Static system/user template pair for one task kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub system: &'static str,
    pub user: &'static str,
}

/// Replace every `{name}` whose name is bound; leave other braces alone
pub fn render(template: &str, bindings: &Bindings) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let candidate = &rest[open + 1..];
        let substituted = candidate.find('}').and_then(|close| {
            bindings
                .get(&candidate[..close])
                .map(|value| (value, close))
        });
        match substituted {
            Some((value, close)) => {
                out.push_str(value);
                rest = &candidate[close + 1..];
            }
            None => {
                out.push('{');
                rest = candidate;
            }
        }
    }
    out.push_str(rest);
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Relevance check
// ─────────────────────────────────────────────────────────────────────────────

pub const RELEVANCE_SYSTEM: &str = r#"Below is the description of a data file.
Decide whether the file holds information relevant to the user's query.
Answer "Yes" if it does, otherwise answer "No".
Never write code. Keep the answer short.

Filename: {file_name}
{file_info}
"#;

pub const RELEVANCE_USER: &str = r#"### Query
{query}
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Code solver / refinement
// ─────────────────────────────────────────────────────────────────────────────

const CODE_RULES: &str = r#"Rules for the generated code:
- Never call the solver function yourself.
- Do not make assumptions about the data beyond the descriptions below.
- Load data only through the predefined helpers:
    - CSV and LOG sources: "fetch_df(file_id)" returns a pandas DataFrame.
    - JSON sources: "fetch_json(file_id, jq_query)" returns the list of results of a "jq" query.
- Do not import modules; use the modules listed under "Imported Modules".
- If the query asks for a plot, draw it with matplotlib and return the Figure from "solver", with labels and a legend where useful.
- Keep the answer minimal.

Definition of fetch_df:
```
def fetch_df(file_id: str) -> pd.DataFrame:
    ...
```

Definition of fetch_json:
```
def fetch_json(file_id: str, jq_query: str) -> list:
    ...
```

Input Data Sources:
{file_infos}

Imported Modules:
```
import time
import math
import pandas as pd
import numpy as np
import matplotlib
import matplotlib.pyplot as plt
```

Output Format:
```python
def solver() -> str | int | float | pd.DataFrame | matplotlib.figure.Figure:
    <Code Here>
```
"#;

pub const CODE_SOLVER_SYSTEM_HEAD: &str = "Given the data sources described below, write a Python function 'solver' that computes the answer to the user's query.\n\n";

pub const CODE_REFINEMENT_SYSTEM_HEAD: &str = "Given the data sources described below and an existing Python function 'solver', rewrite 'solver' so that it answers the user's query.\n\n";

pub const CODE_SOLVER_USER: &str = r#"### Query
{query}
"#;

pub const CODE_REFINEMENT_USER: &str = r#"### Code
```python
{code}
```

### Query
{query}
"#;

/// System prompt for the code solver, rules included
pub fn code_solver_system() -> &'static str {
    lazy_static::lazy_static! {
        static ref SYSTEM: String = format!("{}{}", CODE_SOLVER_SYSTEM_HEAD, CODE_RULES);
    }
    &SYSTEM
}

/// System prompt for code refinement, rules included
pub fn code_refinement_system() -> &'static str {
    lazy_static::lazy_static! {
        static ref SYSTEM: String = format!("{}{}", CODE_REFINEMENT_SYSTEM_HEAD, CODE_RULES);
    }
    &SYSTEM
}

// ─────────────────────────────────────────────────────────────────────────────
// Log field extraction
// ─────────────────────────────────────────────────────────────────────────────

pub const LOG_FIELDS_SYSTEM: &str = r#"You are given sample lines from a log file whose structure is unknown. Infer the recurring components and write a regex pattern that parses one line.

Rules for the regex:
- Return only the pattern as a raw string, without explanation.
- Use named capture groups, (?P<name>...), for the key parts of each entry.
- Group names must be unique.
- Groups must appear in the same order as the components in the line.
- The pattern must match a whole line from start to end.
- Escape brackets and double quotes that appear in the line.

### Example

Sample log lines:
```
Jun 14 15:16:01 authentication failure; logname= uid=0 euid=0 tty=NODEVssh ruser= rhost=218.188.2.4
```

Output:
r'^(?P<date>\w{3} \d{2} \d{2}:\d{2}:\d{2}) (?P<message>.*)'
"#;

pub const LOG_FIELDS_USER: &str = r#"Here are {k} log lines sampled from {file_name}:

```
{log_lines}
```
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Summarizer
// ─────────────────────────────────────────────────────────────────────────────

pub const SUMMARY_SYSTEM: &str = r#"You are given a value that was computed to answer a question, converted to text. Write a short summary of it.

Rules:
- At most 3 lines.
- Never write code.
- Start directly with the summary and return nothing else.
- Do not make assumptions about the data; treat it as a raw value.
- Do not turn values into percentages; paraphrase with the raw value. For example, if the data is "0.99" and the query is "What's the max cpu usage?", answer "The max cpu usage observed is 0.99".
"#;

pub const SUMMARY_USER: &str = r#"### Query
{user_query}

### Data
{data}
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Source descriptions
// ─────────────────────────────────────────────────────────────────────────────

/// One-line schema summary used by the relevance check
pub fn relevance_file_info(source: &DataSource) -> String {
    match &source.schema {
        SourceSchema::Csv { fields, .. } | SourceSchema::Log { fields, .. } => {
            let described: Vec<String> = fields
                .iter()
                .map(|f| format!("{} ({})", f.name, f.field_type))
                .collect();
            format!("CSV Fields: {}", described.join(", "))
        }
        SourceSchema::Json { json_keys } => {
            let keys: Vec<&str> = json_keys.iter().map(|k| k.key.as_str()).collect();
            format!("JSON Keys: {}", keys.join(", "))
        }
    }
}

fn field_line(field: &FieldInfo) -> String {
    let uniques = if field.uniques.is_empty() {
        String::new()
    } else {
        format!(", uniques=[{}]", field.uniques.join(", "))
    };
    format!(
        "  - \"{}\" (type: {}, unique count: {}{})",
        field.name, field.field_type, field.unique_count, uniques
    )
}

fn json_key_line(key: &JsonKey) -> String {
    format!("  - \"{}\" (type: {})", key.key, key.key_type.as_str())
}

/// Numbered, detailed description of every source for the code tasks
pub fn detailed_file_infos(sources: &[DataSource]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(idx, source)| {
            let (heading, lines): (&str, Vec<String>) = match &source.schema {
                SourceSchema::Csv { fields, .. } | SourceSchema::Log { fields, .. } => {
                    ("Fields", fields.iter().map(field_line).collect())
                }
                SourceSchema::Json { json_keys } => {
                    ("Keys", json_keys.iter().map(json_key_line).collect())
                }
            };
            format!(
                "{}. File ID: {}\n Filename: {}\n Format: {}\n {}:\n{}\n",
                idx + 1,
                source.id,
                source.file_name(),
                source.format(),
                heading,
                lines.join("\n")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::JsonType;

    #[test]
    fn test_render_only_touches_bound_names() {
        let mut bindings = Bindings::new();
        bindings.insert("query", "max cpu".to_string());
        let out = render(r"Q: {query} re: \d{2} {missing}", &bindings);
        assert_eq!(out, r"Q: max cpu re: \d{2} {missing}");
    }

    #[test]
    fn test_render_values_are_not_rescanned() {
        let mut bindings = Bindings::new();
        bindings.insert("a", "{b}".to_string());
        bindings.insert("b", "nope".to_string());
        assert_eq!(render("{a}", &bindings), "{b}");
    }

    #[test]
    fn test_example_regex_survives_rendering() {
        let out = render(LOG_FIELDS_SYSTEM, &Bindings::new());
        assert!(out.contains(r"\w{3} \d{2}"));
    }

    #[test]
    fn test_file_infos() {
        let csv = DataSource::csv(
            "file-0",
            "/data/metrics.csv",
            vec![FieldInfo::new("host", "object").with_uniques(vec!["a".into(), "b".into()])],
        );
        let json = DataSource::json("file-1", "/data/app.json", vec![JsonKey::new(".level", JsonType::String)]);

        assert_eq!(relevance_file_info(&csv), "CSV Fields: host (object)");
        assert_eq!(relevance_file_info(&json), "JSON Keys: .level");

        let detailed = detailed_file_infos(&[csv, json]);
        assert!(detailed.contains("1. File ID: file-0"));
        assert!(detailed.contains("uniques=[a, b]"));
        assert!(detailed.contains("2. File ID: file-1"));
        assert!(detailed.contains("\".level\" (type: str)"));
    }
}
