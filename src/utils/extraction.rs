//! Extraction of scripts and JSON payloads from model replies.
//!
//! Model replies mix prose with fenced code blocks. The helpers here pull out
//! the part the pipeline needs:
//! 1. Fenced block tagged with the expected language
//! 2. First fenced block of any language
//! 3. Bracket-matched JSON anywhere in the text
//!
//! # Example
//!
//! ```
//! use circuit_weaver::utils::extraction::extract_code_block;
//!
//! let reply = "Here you go:\n```python\nprint('ok')\n```\n";
//! assert_eq!(extract_code_block(reply, Some("python")).as_deref(), Some("print('ok')"));
//! ```

use std::sync::OnceLock;

use regex::Regex;

fn fenced_block_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+\-]*)[ \t]*\r?\n(.*?)```").ok())
        .as_ref()
}

/// Extract the body of a fenced code block.
///
/// A block tagged with `language` wins over untagged or differently tagged
/// blocks. Returns `None` when the reply has no non-empty fenced block.
pub fn extract_code_block(content: &str, language: Option<&str>) -> Option<String> {
    let mut first_any = None;

    for caps in fenced_block_regex()?.captures_iter(content) {
        let tag = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let body = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        if body.is_empty() {
            continue;
        }
        if let Some(lang) = language {
            if tag.eq_ignore_ascii_case(lang) {
                return Some(body.to_string());
            }
        }
        if first_any.is_none() {
            first_any = Some(body.to_string());
        }
    }

    first_any
}

/// Extract a runnable script from a model reply.
///
/// Falls back to the whole reply when it contains no fenced block. Returns
/// `None` when nothing usable remains.
pub fn extract_script(content: &str, language: Option<&str>) -> Option<String> {
    if let Some(block) = extract_code_block(content, language) {
        return Some(block);
    }

    let trimmed = content.trim();
    if trimmed.is_empty() || trimmed.contains("```") {
        return None;
    }
    Some(trimmed.to_string())
}

/// Find the index of the bracket closing the one at the start of `s`.
///
/// Handles nesting, string literals and escape sequences. `s` must start with
/// `open`.
pub fn find_matching_close(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extract a JSON array or object from a reply.
///
/// Prefers a ```json block, then the earliest bracket-balanced array or
/// object in the text.
pub fn extract_json_payload(content: &str) -> Option<String> {
    let source = extract_code_block(content, Some("json"))
        .filter(|block| block.starts_with('[') || block.starts_with('{'))
        .unwrap_or_else(|| content.to_string());

    let start = source.find(['[', '{'])?;
    let rest = &source[start..];
    let (open, close) = if rest.starts_with('[') {
        ('[', ']')
    } else {
        ('{', '}')
    };
    let end = find_matching_close(rest, open, close)?;
    Some(rest[..=end].to_string())
}

/// Truncate text to at most `max_chars` characters, keeping the tail.
///
/// Error output is most informative at the end, so the head is dropped.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - max_chars).collect();
    format!("...[truncated]\n{}", skipped)
}
