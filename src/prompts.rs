//! Review prompts sent to the model endpoint.
//!
//! Centralising every prompt here keeps prompt wording out of the retry and
//! parsing code, and lets unit tests inspect prompts without a live model.
//!
//! A request prompt is assembled from three parts:
//!
//! 1. the instruction template (a focus preset or a caller override),
//! 2. [`OUTPUT_SCHEMA`], which pins the response format that
//!    [`crate::pipeline::findings`] accepts,
//! 3. the reference datasheet excerpt, when one is configured,
//! 4. the chunk's page-labelled text.
//!
//! Callers override part 1 via [`crate::config::ReviewConfig::instructions`];
//! the other parts are fixed.

use crate::pipeline::chunk::Chunk;
use crate::pipeline::datasheet::Datasheet;

/// Broad review used when no focus is selected.
pub const GENERAL_REVIEW: &str = r#"You are an experienced hardware design engineer reviewing an electronic schematic (pages {pages}).

Check the design for:
- Component values and ratings (resistor, capacitor and inductor values, voltage ratings)
- Pin connections and signal routing, including floating inputs
- Power supply design, decoupling and grounding
- Protection circuits (ESD, reverse polarity, over-voltage)
- Signal integrity, EMC/EMI and thermal concerns

Refer to components by their designators (R1, C1, U1, ...) and to pins by number."#;

/// Component values, terminations and required externals. Values are
/// compared with the reference datasheet when one is attached.
pub const COMPONENT_VERIFICATION: &str = r#"You are reviewing the components of an electronic schematic (pages {pages}).

1. Verify component values are appropriate (pull-ups, pull-downs, biasing, decoupling, timing); where a reference datasheet is given, compare them with its recommendations
2. Check pin configurations: every pin connected according to its function, required terminations present
3. Identify missing external components (crystals, load capacitors, decoupling, protection)
4. Validate power requirements: voltage levels, current capacity, sequencing

Refer to components by their designators (R1, C1, U1, ...)."#;

/// Pin-by-pin connection review.
pub const PIN_CONFIGURATION: &str = r#"You are reviewing the pin connections of an electronic schematic (pages {pages}).

1. Check every pin assignment matches its intended function; look for swapped or misconnected pins
2. Verify required pull-up and pull-down resistors are present with sensible values
3. Validate all power and ground pins are connected and decoupled
4. Check unused pins: floating inputs that should be tied, special mode/test pins

Give specific pin numbers in every finding."#;

/// Regulators, rails and decoupling.
pub const POWER_SUPPLY: &str = r#"You are reviewing the power supply design of an electronic schematic (pages {pages}).

1. Verify input ranges and regulated output voltages
2. Check decoupling capacitor values, types and placement near power pins
3. Validate current capacity of regulators and heat dissipation
4. Review power sequencing, required delays and power-good signals

Refer to regulators and capacitors by their designators."#;

/// Deviations from reference designs.
pub const DESIGN_COMPLIANCE: &str = r#"You are checking an electronic schematic (pages {pages}) against common reference designs.

1. Identify deviations from typical application circuits
2. Verify recommended external components, values and tolerances are present
3. Check thermal considerations (copper area, thermal vias, ambient limits)
4. Note application-specific requirements that appear unmet"#;

/// Required parts that are absent.
pub const MISSING_COMPONENTS: &str = r#"You are looking for components missing from an electronic schematic (pages {pages}).

1. Protection: ESD diodes, over-voltage, reverse polarity, current limiting
2. Required externals: crystal and load capacitors, reset circuit, bias and compensation parts
3. Filtering: input/output filter capacitors, EMI suppression, supply filters
4. Clocking: feedback resistors, clock buffers

Report each missing component with its purpose."#;

/// Fixed response-format section appended to every instruction template.
///
/// Keep in sync with the grammar in [`crate::pipeline::findings`].
pub const OUTPUT_SCHEMA: &str = r#"RESPONSE FORMAT
Respond with JSON only, no commentary, exactly in this shape:
{"findings": [{"page": <page number>, "severity": "info" | "warning" | "error", "message": "<one finding>", "region": {"x": <0-1>, "y": <0-1>, "width": <0-1>, "height": <0-1>}}]}

- "page" is the page number shown in the "--- Page N ---" marker.
- "region" is optional: the finding's location as fractions of the page, origin top-left.
- Use "error" for issues that prevent the circuit from working, "warning" for reliability or performance risks, "info" for observations.
- If there is nothing to report, respond with {"findings": []}."#;

/// Appended to the datasheet excerpt.
pub const DATASHEET_INSTRUCTIONS: &str = r#"When referencing the datasheet:
- Cite section, table or figure numbers where possible
- Quote the relevant specification directly
- Report every discrepancy between the schematic and the datasheet's recommendations"#;

/// Note placed under a page marker when the page has no extractable text.
pub const SCANNED_PAGE_NOTE: &str = "[No extractable text on this page; review the attached image.]";

/// Substitute `{pages}` in an instruction template.
pub fn render_instructions(template: &str, chunk: &Chunk) -> String {
    template.replace("{pages}", &chunk.page_label())
}

/// Build the complete prompt for one chunk, with the datasheet excerpt if
/// one is given and has text.
pub fn build_review_prompt(template: &str, chunk: &Chunk, datasheet: Option<&Datasheet>) -> String {
    let mut prompt = render_instructions(template, chunk);
    prompt.push_str("\n\n");
    prompt.push_str(OUTPUT_SCHEMA);

    if let Some(sheet) = datasheet.filter(|d| !d.text.is_empty()) {
        prompt.push_str("\n\nREFERENCE DATASHEET");
        if let Some(part) = &sheet.part_number {
            prompt.push_str(&format!(" ({})", part));
        }
        prompt.push('\n');
        prompt.push_str(&sheet.text);
        prompt.push('\n');
        if sheet.truncated() {
            prompt.push_str(&format!(
                "[Datasheet text was cut to its first {} characters.]\n",
                sheet.char_count()
            ));
        }
        prompt.push('\n');
        prompt.push_str(DATASHEET_INSTRUCTIONS);
    }

    prompt.push_str("\n\nDOCUMENT CONTENT\n");

    for unit in &chunk.units {
        prompt.push_str(&format!("\n--- Page {} ---\n", unit.page_index + 1));
        if unit.scanned {
            prompt.push_str(SCANNED_PAGE_NOTE);
        } else {
            prompt.push_str(&unit.text());
        }
        prompt.push('\n');
    }

    if chunk.truncated() {
        prompt.push_str("\n[Page text was truncated to fit the review budget.]\n");
    }

    prompt
}
