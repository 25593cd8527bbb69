//! Initial code generation prompt.
//!
//! Combines the concept, a style guide and the closest successful scripts
//! from the creative store.

use serde::Serialize;

use super::{render, Prompt};

/// Built-in style guide used when no style guide file is configured.
pub const STYLE_GUIDE_SAMPLE: &str = r#"# Diagram Script Style Guide

1. Import the drawing library once at the top: `import schemdraw`, `import schemdraw.elements as elm`,
   and `from schemdraw import dsp, flow, logic` only when needed.
2. Draw inside a single context manager:
   `with schemdraw.Drawing(file='circuit_diagram.svg', show=False) as d:`.
3. Keep one primary direction of flow (left-to-right or top-to-bottom).
4. Keep references to blocks you connect later: `adc = d.add(dsp.Adc().label('ADC'))`.
5. Connect blocks by anchors (`.at(block.E)`, `.to(block.W)`) rather than absolute coordinates.
6. Label every block; offset labels with `loc` and `ofst` so they never overlap lines.
7. Do not call `plt.show()` or open windows; the script runs headless."#;

const CODEGEN_SYSTEM: &str = r#"You are a diagram code generation specialist. You write complete, runnable scripts that draw circuit and block diagrams.

Rules:
- Follow the style guide exactly.
- The script runs unattended in an empty directory and must write its output files there.
- Respond with ONLY the complete script inside a single fenced code block. No explanations."#;

const CODEGEN_TEMPLATE: &str = r#"**Diagram Concept:**
{{ concept }}

---
**Style Guide:**
{{ style_guide }}
---
{% if examples | length > 0 %}
The following scripts drew similar diagrams successfully. Reuse their API usage; do not copy their layout.
{% for example in examples %}
### Relevant Example #{{ loop.index }}
Concept: {{ example.concept }}
```{{ language }}
{{ example.script }}
```
{% endfor %}
{% endif %}
**YOUR TASK:**
Write a script that draws the concept above.
- It MUST write {% for artifact in artifacts %}`{{ artifact }}`{% if not loop.last %}, {% endif %}{% endfor %} in the current directory.
- Output ONLY the complete script in a single ```{{ language }} ... ``` block."#;

/// A retrieved example shown to the coder.
#[derive(Debug, Clone, Serialize)]
pub struct CodegenExample {
    pub concept: String,
    pub script: String,
}

#[derive(Serialize)]
struct CodegenContext<'a> {
    concept: &'a str,
    style_guide: &'a str,
    examples: &'a [CodegenExample],
    artifacts: &'a [String],
    language: &'a str,
}

/// Build the initial generation prompt.
///
/// `examples` may be empty; the examples section is then omitted.
pub fn build_codegen_prompt(
    concept: &str,
    style_guide: &str,
    examples: &[CodegenExample],
    artifacts: &[String],
    language: &str,
) -> Result<Prompt, tera::Error> {
    let user = render(
        CODEGEN_TEMPLATE,
        &CodegenContext {
            concept,
            style_guide,
            examples,
            artifacts,
            language,
        },
    )?;
    Ok(Prompt::new(CODEGEN_SYSTEM, user))
}
