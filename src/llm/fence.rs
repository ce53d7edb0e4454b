//! Fenced code block extraction
//!
//! Models often restate an example before giving the final answer, so the
//! LAST matching block in a response is the authoritative one.

const FENCE: &str = "```";

/// A triple-backtick block found in model output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock<'a> {
    /// Info string after the opening fence (e.g. "python"), trimmed
    pub info: &'a str,
    /// Body between the info line and the closing fence
    pub body: &'a str,
    /// Everything between the two fences, info string included
    pub raw: &'a str,
}

/// All complete fenced blocks, in order of appearance
///
/// Fences pair up left to right; a trailing unclosed fence is ignored.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(FENCE) {
        let after_open = &rest[open + FENCE.len()..];
        let Some(close) = after_open.find(FENCE) else {
            break;
        };
        let inner = &after_open[..close];

        // Info string runs to the end of the opening line; single-line blocks have none
        let (info, body) = match inner.find('\n') {
            Some(nl) => (inner[..nl].trim(), &inner[nl + 1..]),
            None => ("", inner),
        };
        blocks.push(FencedBlock {
            info,
            body,
            raw: inner,
        });

        rest = &after_open[close + FENCE.len()..];
    }

    blocks
}

/// Body of the last block whose info string names one of `languages`
///
/// Matching is case-insensitive. Returns `None` when no such block exists.
pub fn last_block_for<'a>(text: &'a str, languages: &[&str]) -> Option<&'a str> {
    fenced_blocks(text)
        .into_iter()
        .rev()
        .find(|block| languages.iter().any(|l| block.info.eq_ignore_ascii_case(l)))
        .map(|block| block.body)
}

/// Full contents of the last block, info line included
pub fn last_block_raw(text: &str) -> Option<&str> {
    fenced_blocks(text).pop().map(|block| block.raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_python_block_wins() {
        let text = "Example:\n```python\ndef solver():\n    return 1\n```\n\
                    Final answer:\n```python\ndef solver():\n    return 2\n```\n";
        let body = last_block_for(text, &["python"]).unwrap();
        assert!(body.contains("return 2"));
        assert!(!body.contains("return 1"));
    }

    #[test]
    fn test_language_filter_skips_other_blocks() {
        let text = "```python\nx = 1\n```\n```text\nnot code\n```";
        assert_eq!(last_block_for(text, &["python"]), Some("x = 1\n"));
        assert_eq!(last_block_raw(text), Some("text\nnot code\n"));
    }

    #[test]
    fn test_missing_or_unclosed_block() {
        assert_eq!(last_block_for("no code here", &["python"]), None);
        assert_eq!(last_block_for("```python\nnever closed", &["python"]), None);
    }

    #[test]
    fn test_single_line_block_has_no_info() {
        let blocks = fenced_blocks("```^(?P<a>\\d+)$```");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].info, "");
        assert_eq!(blocks[0].body, "^(?P<a>\\d+)$");
    }
}
