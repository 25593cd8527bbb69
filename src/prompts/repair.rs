//! Repair prompt for one debug round.
//!
//! Every racing backend receives the same prompt. The current error section
//! always reflects the latest attempt; earlier errors appear only in the
//! history section.

use serde::Serialize;

use super::{render, Prompt};
use crate::agents::types::RepairContext;
use crate::retrieval::Snippet;
use crate::utils::tail_chars;

/// Longest error text passed to a backend.
const MAX_ERROR_CHARS: usize = 4000;

pub const REPAIR_SYSTEM_PROMPT: &str = r#"You are part of a team of AI engineers repairing a diagram script that fails to run.

Each round, every team member receives the same failing script and error. The first fix that runs cleanly wins.
When the previous round failed for the whole team, you see a summary of every teammate's failure.

Rules:
- Fix the CURRENT ERROR. Earlier errors are history, not instructions.
- Never repeat a mistake listed in the previous round's failures.
- Rewrite the ENTIRE script.
- Respond with ONLY the corrected script in a single fenced code block."#;

const REPAIR_TEMPLATE: &str = r#"**DIAGRAM CONCEPT:**
{{ concept }}

{% if script %}### CURRENT SCRIPT (attempt {{ attempt_index }})
```{{ language }}
{{ script }}
```
{% else %}### CURRENT SCRIPT
No script exists yet: generating the first one failed. Write the complete script from the concept.
{% endif %}
### CURRENT ERROR
Core error: {{ core_line }}
```
{{ error_text }}
```
{% if docs | length > 0 %}
### DOCUMENTATION
{% for doc in docs %}
--- {{ doc.title }} ---
{{ doc.content }}
{% endfor %}{% endif %}{% if fixes | length > 0 %}
### KNOWN FIXES FOR SIMILAR ERRORS
{% for fix in fixes %}
- Error pattern: {{ fix.title }}
  Solution: {{ fix.content }}
{% endfor %}{% endif %}{% if report %}
### PREVIOUS ROUND: ALL CANDIDATES FAILED
{{ report }}
Every approach above failed. Take a fundamentally different approach.
{% endif %}{% if history %}
### HISTORY
{{ history }}{% endif %}
**YOUR TASK (round {{ round }}):** Rewrite the entire script so it runs without error and writes its output files.
Output ONLY the corrected script in a single ```{{ language }} ... ``` block."#;

#[derive(Serialize)]
struct RepairView<'a> {
    concept: &'a str,
    round: u32,
    attempt_index: u32,
    language: &'a str,
    script: &'a str,
    core_line: &'a str,
    error_text: String,
    docs: &'a [Snippet],
    fixes: &'a [Snippet],
    report: Option<String>,
    history: Option<String>,
}

/// Build the repair prompt for `context`.
pub fn build_repair_prompt(context: &RepairContext, language: &str) -> Result<Prompt, tera::Error> {
    let history = (!context.history.is_empty()).then(|| context.history.render());
    let view = RepairView {
        concept: &context.concept,
        round: context.round,
        attempt_index: context.current.attempt_index,
        language,
        script: &context.current.script,
        core_line: &context.current.signature.core_line,
        error_text: tail_chars(&context.current.error_text, MAX_ERROR_CHARS),
        docs: &context.docs,
        fixes: &context.fixes,
        report: context.last_report.as_ref().map(|r| r.summary()),
        history,
    };
    let user = render(REPAIR_TEMPLATE, &view)?;
    Ok(Prompt::new(REPAIR_SYSTEM_PROMPT, user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{
        CollectiveFailureReport, ConversationLog, CurrentError, FailedCandidate,
    };
    use crate::retrieval::Source;
    use crate::sandbox::ErrorSignature;

    fn context() -> RepairContext {
        RepairContext {
            job_id: "job-1".to_string(),
            round: 2,
            concept: "A buck converter".to_string(),
            current: CurrentError {
                attempt_index: 4,
                script: "import schemdraw".to_string(),
                signature: ErrorSignature::from_core_line("TypeError: bad anchor"),
                error_text: "Traceback...\nTypeError: bad anchor".to_string(),
            },
            docs: vec![],
            fixes: vec![],
            history: ConversationLog::new(5),
            last_report: None,
        }
    }

    fn section<'a>(text: &'a str, header: &str) -> &'a str {
        let start = text.find(header).map(|i| i + header.len()).unwrap_or(text.len());
        let rest = &text[start..];
        let end = rest.find("\n### ").unwrap_or(rest.len());
        &rest[..end]
    }

    #[test]
    fn test_current_error_section() {
        let prompt = build_repair_prompt(&context(), "python").expect("renders");
        let current = section(&prompt.user, "### CURRENT ERROR");
        assert!(current.contains("TypeError: bad anchor"));
        assert!(prompt.user.contains("attempt 4"));
        assert!(prompt.user.contains("round 2"));
        assert!(!prompt.user.contains("### DOCUMENTATION"));
        assert!(!prompt.user.contains("### HISTORY"));
    }

    #[test]
    fn test_missing_script_asks_for_full_script() {
        let mut ctx = context();
        ctx.round = 1;
        ctx.current.script = String::new();
        ctx.current.signature = ErrorSignature::from_core_line("GenerationError: HTTP 503");
        ctx.current.error_text = "The model failed to generate any script: HTTP 503".to_string();

        let prompt = build_repair_prompt(&ctx, "python").expect("renders");
        let script = section(&prompt.user, "### CURRENT SCRIPT");
        assert!(script.contains("No script exists yet"));
        assert!(!script.contains("```python"));
        assert!(section(&prompt.user, "### CURRENT ERROR").contains("GenerationError: HTTP 503"));
    }

    #[test]
    fn test_optional_sections_render() {
        let mut ctx = context();
        ctx.docs.push(Snippet {
            source: Source::Docs,
            title: "Anchors".to_string(),
            content: "Use .at(block.E)".to_string(),
            score: 0.8,
        });
        ctx.fixes.push(Snippet {
            source: Source::Corrective,
            title: "AttributeError: no attribute 'Vcc'".to_string(),
            content: "Use elm.Vdd instead.".to_string(),
            score: 0.9,
        });
        ctx.history = ctx.history.with_entry("Attempt 0 failed: NameError: name 'd' is not defined");
        ctx.last_report = Some(CollectiveFailureReport {
            round: 1,
            candidates: vec![FailedCandidate::generation_error("fixer-2", "timeout")],
        });

        let prompt = build_repair_prompt(&ctx, "python").expect("renders");
        assert!(prompt.user.contains("--- Anchors ---"));
        assert!(prompt.user.contains("Solution: Use elm.Vdd instead."));
        assert!(prompt.user.contains("Round 1: all 1 candidates failed"));

        let history = section(&prompt.user, "### HISTORY");
        assert!(history.contains("NameError"));
        let current = section(&prompt.user, "### CURRENT ERROR");
        assert!(!current.contains("NameError"));
    }
}
