use std::collections::BTreeMap;

const PERSONA_MD: &str = include_str!("../resources/prompts/persona.md");
const UNIVERSAL_CONSTRAINTS_MD: &str = include_str!("../resources/prompts/universal_constraints.md");
const LENS_OVERLAY_MD: &str = include_str!("../resources/prompts/lens_overlay.md");
const TASK_MODE_MD: &str = include_str!("../resources/prompts/task_mode.md");
const TASK_GENERIC_MD: &str = include_str!("../resources/prompts/task_generic.md");
const TASK_CUSTOM_MD: &str = include_str!("../resources/prompts/task_custom.md");
const TASK_INTERROGATION_MD: &str = include_str!("../resources/prompts/task_interrogation.md");
const GATE_PARTIAL_MD: &str = include_str!("../resources/prompts/gate_partial.md");
const GATE_FULL_MD: &str = include_str!("../resources/prompts/gate_full.md");

/// User-turn text sent alongside the image on initial analyses.
pub const ANALYZE_USER_MESSAGE: &str =
    "Please analyze this artwork using the Hidden Grammar framework as described in the system prompt.";

pub const REFERENCE_HEADER: &str = "# FRAMEWORK REFERENCE (INTERNAL)";
pub const LEXICON_HEADER: &str = "# CROSS-CULTURAL LEXICON";
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateId {
    Persona,
    UniversalConstraints,
    LensOverlay,
    TaskMode,
    TaskGeneric,
    TaskCustom,
    TaskInterrogation,
    GatePartial,
    GateFull,
}

impl TemplateId {
    fn source(self) -> &'static str {
        match self {
            TemplateId::Persona => PERSONA_MD,
            TemplateId::UniversalConstraints => UNIVERSAL_CONSTRAINTS_MD,
            TemplateId::LensOverlay => LENS_OVERLAY_MD,
            TemplateId::TaskMode => TASK_MODE_MD,
            TemplateId::TaskGeneric => TASK_GENERIC_MD,
            TemplateId::TaskCustom => TASK_CUSTOM_MD,
            TemplateId::TaskInterrogation => TASK_INTERROGATION_MD,
            TemplateId::GatePartial => GATE_PARTIAL_MD,
            TemplateId::GateFull => GATE_FULL_MD,
        }
    }
}

/// Built-in prompt text blocks with `{{key}}` placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptTemplates;

impl PromptTemplates {
    pub fn text(&self, id: TemplateId) -> &'static str {
        id.source().trim()
    }

    pub fn render(&self, id: TemplateId, vars: &BTreeMap<&str, String>) -> String {
        render_placeholders(self.text(id), vars)
    }
}

/// Single left-to-right pass: substituted values are never rescanned, and
/// unknown keys are left in place.
pub fn render_placeholders(template: &str, vars: &BTreeMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
