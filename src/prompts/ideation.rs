//! Ideation prompt: expand a diagram category into a concrete concept.

use serde::Serialize;

use super::{render, Prompt};

/// Diagram categories rotated across jobs.
pub const DIAGRAM_CATEGORIES: &[(&str, &str)] = &[
    (
        "RF Front-End",
        "A receiver or transmitter chain with amplifiers, mixers, oscillators and filters.",
    ),
    (
        "Power Conversion",
        "A regulated supply stage: rectifier, switching converter, feedback and protection.",
    ),
    (
        "Mixed-Signal Acquisition",
        "An analog sensor path feeding an ADC, a processor and a digital output.",
    ),
    (
        "Digital Logic Datapath",
        "Registers, multiplexers, an ALU and control signals connected into a datapath.",
    ),
    (
        "Control Loop",
        "A closed feedback loop with a controller, plant, sensor and error summing junction.",
    ),
    (
        "Embedded Bus System",
        "A microcontroller talking to memories and peripherals over shared buses.",
    ),
    (
        "Audio Signal Chain",
        "Microphone preamp, equalizer, compressor and power amplifier stages.",
    ),
    (
        "Process Flowchart",
        "A decision-driven process flow with start, actions, branches and end states.",
    ),
];

const IDEATION_SYSTEM: &str = r#"You are a creative systems engineer who designs clear, instructive circuit and block diagrams.

Your concepts are concrete enough for a programmer to draw with a diagramming library:
- every block has a specific name
- the signal or data flow between blocks is explicit
- the diagram has between 5 and 8 blocks

Respond with ONLY the concept paragraph. No headings, no lists, no code."#;

const IDEATION_TEMPLATE: &str = r#"**Diagram Category:**
{{ category }}

**High-Level Description:**
{{ description }}

**YOUR TASK:**
Based on the category and description above, write a detailed, one-paragraph concept.
- Give the system a specific, imaginative name (e.g. "A Simple AGC Loop", "A Microcontroller to RAM Interface").
- Describe the blocks and the signal flow between them in a clear, narrative style.
- Use between 5 and 8 blocks in total.

Output ONLY the concept paragraph. Do not repeat the category or description."#;

#[derive(Serialize)]
struct IdeationContext<'a> {
    category: &'a str,
    description: &'a str,
}

/// Pick a category deterministically from the job id.
pub fn category_for_job(job_id: &str) -> (&'static str, &'static str) {
    let hash = job_id
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    DIAGRAM_CATEGORIES[hash % DIAGRAM_CATEGORIES.len()]
}

/// Build the ideation prompt for `job_id`.
pub fn build_ideation_prompt(job_id: &str) -> Result<Prompt, tera::Error> {
    let (category, description) = category_for_job(job_id);
    let user = render(
        IDEATION_TEMPLATE,
        &IdeationContext {
            category,
            description,
        },
    )?;
    Ok(Prompt::new(IDEATION_SYSTEM, user))
}
