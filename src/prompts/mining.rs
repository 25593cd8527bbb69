//! Solution mining prompt.

use serde::Serialize;

use super::{render, Prompt};

pub const MINER_SYSTEM_PROMPT: &str = "You are a precise code analysis assistant. \
You extract reusable error-to-fix knowledge from debugging sessions and answer only in JSON.";

const MINER_TEMPLATE: &str = r#"A diagram script went through {{ failures | length }} distinct failure(s) before this version succeeded.

{% for failure in failures %}
### FAILURE at chain position {{ failure.position }}
Core error: {{ failure.core_line }}
```
{{ failure.error_text }}
```
Failing script:
```{{ language }}
{{ failure.script }}
```
{% endfor %}
### SUCCESSFUL SCRIPT
```{{ language }}
{{ winner }}
```

**YOUR TASK:**
Compare each failing script with the successful script. For every distinct root cause the successful script fixes,
produce one record. One record may cover several chain positions when they share a root cause.

- "error_pattern": the core error in one concise line, usable as a lookup key.
  Example: `AttributeError: module 'schemdraw.elements' has no attribute 'Vcc'`
- "solution": the general fix in one or two sentences, without code.
  Example: "The power supply element 'Vcc' does not exist; use elm.Vdd."
- "chain_positions": the failure positions this record resolves.

Respond with ONLY a JSON array:
[{"chain_positions": [0], "error_pattern": "...", "solution": "..."}]"#;

/// One failure shown to the miner.
#[derive(Debug, Clone, Serialize)]
pub struct MiningFailure {
    pub position: u32,
    pub core_line: String,
    pub error_text: String,
    pub script: String,
}

#[derive(Serialize)]
struct MiningContext<'a> {
    failures: &'a [MiningFailure],
    winner: &'a str,
    language: &'a str,
}

/// Build the mining prompt for a resolved chain.
pub fn build_mining_prompt(
    failures: &[MiningFailure],
    winner: &str,
    language: &str,
) -> Result<Prompt, tera::Error> {
    let user = render(
        MINER_TEMPLATE,
        &MiningContext {
            failures,
            winner,
            language,
        },
    )?;
    Ok(Prompt::new(MINER_SYSTEM_PROMPT, user))
}
