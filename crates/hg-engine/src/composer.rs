use std::collections::BTreeMap;

use anyhow::Result;
use hg_contracts::framework::FrameworkStore;
use hg_contracts::lenses::LensRegistry;
use hg_contracts::modes::{
    fallback_fields, FieldSpec, GatingLevel, ModeRegistry, ModeSelector, ModeSpec,
};
use hg_contracts::session::{ContextFields, Session};
use serde::Serialize;

use crate::error::ComposeError;
use crate::templates::{
    PromptTemplates, TemplateId, ANALYZE_USER_MESSAGE, LEXICON_HEADER, REFERENCE_HEADER,
    SECTION_SEPARATOR,
};

const EMPTY_CONTEXT: &str = "No context was supplied. Work from the image alone.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LensRequest {
    pub id: String,
    pub intent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUp {
    pub prior_analysis: String,
    pub question: String,
}

/// Everything the composer needs for one instruction document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeRequest {
    pub mode: Option<String>,
    pub submode: Option<String>,
    pub custom_text: Option<String>,
    pub fields: ContextFields,
    pub lens: Option<LensRequest>,
    pub follow_up: Option<FollowUp>,
}

impl ComposeRequest {
    pub fn for_mode(mode_id: impl Into<String>) -> Self {
        Self {
            mode: Some(mode_id.into()),
            ..Self::default()
        }
    }

    pub fn for_custom(text: impl Into<String>) -> Self {
        Self {
            custom_text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn for_follow_up(
        prior_analysis: impl Into<String>,
        question: impl Into<String>,
        mode_id: Option<&str>,
    ) -> Self {
        Self {
            mode: mode_id.map(str::to_string),
            follow_up: Some(FollowUp {
                prior_analysis: prior_analysis.into(),
                question: question.into(),
            }),
            ..Self::default()
        }
    }

    /// Mode, sub-mode, custom text, fields and lens of the session.
    pub fn from_session(session: &Session) -> Self {
        Self {
            mode: session.mode_id().map(str::to_string),
            submode: session.submode_id().map(str::to_string),
            custom_text: session.custom_text().map(str::to_string),
            fields: session.fields().clone(),
            lens: session.lens_id().map(|id| LensRequest {
                id: id.to_string(),
                intent: session.lens_intent().map(str::to_string),
            }),
            follow_up: None,
        }
    }

    pub fn with_fields(mut self, fields: ContextFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_submode(mut self, submode: impl Into<String>) -> Self {
        self.submode = Some(submode.into());
        self
    }

    pub fn with_lens(mut self, id: impl Into<String>, intent: Option<&str>) -> Self {
        self.lens = Some(LensRequest {
            id: id.into(),
            intent: intent.map(str::to_string),
        });
        self
    }

    pub fn is_follow_up(&self) -> bool {
        self.follow_up.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Custom,
    ModeTemplate,
    GenericFallback,
    Interrogation,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Custom => "custom",
            TaskKind::ModeTemplate => "mode_template",
            TaskKind::GenericFallback => "generic_fallback",
            TaskKind::Interrogation => "interrogation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub system: String,
    pub user: String,
    pub mode_id: Option<String>,
    pub task: TaskKind,
    pub gating: GatingLevel,
    pub lens_id: Option<String>,
    pub fallback_reason: Option<String>,
}

/// Layers the instruction document in a fixed order: framework, universal
/// constraints, lens overlay, task, evidence gate.
pub struct PromptComposer {
    framework: FrameworkStore,
    selector: ModeSelector,
    lenses: LensRegistry,
    templates: PromptTemplates,
    fallback_fields: Vec<FieldSpec>,
}

impl PromptComposer {
    pub fn new(framework: FrameworkStore, modes: ModeRegistry, lenses: LensRegistry) -> Self {
        Self {
            framework,
            selector: ModeSelector::new(modes),
            lenses,
            templates: PromptTemplates,
            fallback_fields: fallback_fields(),
        }
    }

    pub fn builtin() -> Result<Self> {
        Ok(Self::new(
            FrameworkStore::builtin()?,
            ModeRegistry::builtin()?,
            LensRegistry::builtin()?,
        ))
    }

    pub fn framework(&self) -> &FrameworkStore {
        &self.framework
    }

    pub fn modes(&self) -> &ModeRegistry {
        &self.selector.registry
    }

    pub fn lenses(&self) -> &LensRegistry {
        &self.lenses
    }

    pub fn compose(&self, request: &ComposeRequest) -> Result<ComposedPrompt, ComposeError> {
        let custom_text = non_blank(request.custom_text.as_deref());
        let follow_up = match &request.follow_up {
            Some(follow_up) => Some(validate_follow_up(follow_up)?),
            None => None,
        };

        let (mode, fallback_reason) = match non_blank(request.mode.as_deref()) {
            Some(requested) => {
                let selection = self
                    .selector
                    .select(Some(requested))
                    .map_err(ComposeError::Registry)?;
                (Some(selection.mode), selection.fallback_reason)
            }
            None if follow_up.is_some() || custom_text.is_some() => (None, None),
            None => return Err(ComposeError::NothingToInstruct),
        };

        let lens = match &request.lens {
            Some(lens) => Some(self.lens_overlay(lens)?),
            None => None,
        };

        let initial = follow_up.is_none();
        let cross_cultural = mode.as_ref().map(|mode| mode.cross_cultural).unwrap_or(false);
        let mut sections = vec![
            self.base_framework(initial, initial && cross_cultural),
            self.templates
                .text(TemplateId::UniversalConstraints)
                .to_string(),
        ];
        if let Some(overlay) = lens.as_ref().map(|(_, text)| text.clone()) {
            sections.push(overlay);
        }

        // An unregistered mode id keeps the free-form fields the caller keyed against.
        let field_specs = match &mode {
            Some(mode) if fallback_reason.is_some() => {
                merged_fields(&mode.fields, &self.fallback_fields)
            }
            Some(mode) => mode.fields.clone(),
            None => self.fallback_fields.clone(),
        };
        let submode_label = mode.as_ref().and_then(|mode| {
            non_blank(request.submode.as_deref())
                .and_then(|id| mode.submode(id))
                .map(|submode| submode.label.as_str())
        });
        let context = context_block(&request.fields, &field_specs, submode_label);

        let (task, task_text) = match (&follow_up, custom_text, &mode) {
            (Some((prior, question)), _, _) => {
                let mut vars = BTreeMap::new();
                vars.insert("prior_analysis", prior.to_string());
                vars.insert("question", question.to_string());
                (
                    TaskKind::Interrogation,
                    self.templates.render(TemplateId::TaskInterrogation, &vars),
                )
            }
            (None, Some(custom), _) => {
                let mut vars = BTreeMap::new();
                vars.insert("instructions", custom.to_string());
                vars.insert("context", context);
                (
                    TaskKind::Custom,
                    self.templates.render(TemplateId::TaskCustom, &vars),
                )
            }
            (None, None, Some(mode)) => self.mode_task(mode, context),
            (None, None, None) => return Err(ComposeError::NothingToInstruct),
        };
        sections.push(task_text);

        let gating = match (task, &mode) {
            (TaskKind::ModeTemplate | TaskKind::GenericFallback, Some(mode)) => mode.gating,
            _ => GatingLevel::None,
        };
        match gating {
            GatingLevel::Partial => sections.push(
                self.templates
                    .text(TemplateId::GatePartial)
                    .to_string(),
            ),
            GatingLevel::Full => {
                sections.push(self.templates.text(TemplateId::GateFull).to_string())
            }
            GatingLevel::None => {}
        }

        let user = match &follow_up {
            Some((_, question)) => question.to_string(),
            None => ANALYZE_USER_MESSAGE.to_string(),
        };

        Ok(ComposedPrompt {
            system: sections.join(SECTION_SEPARATOR),
            user,
            mode_id: mode.map(|mode| mode.id),
            task,
            gating,
            lens_id: lens.map(|(id, _)| id),
            fallback_reason,
        })
    }

    fn mode_task(&self, mode: &ModeSpec, context: String) -> (TaskKind, String) {
        let mut vars = BTreeMap::new();
        vars.insert("label", mode.label.clone());
        vars.insert("context", context);
        match mode.template() {
            Some(template) => {
                vars.insert("instructions", template.to_string());
                (
                    TaskKind::ModeTemplate,
                    self.templates.render(TemplateId::TaskMode, &vars),
                )
            }
            None => {
                vars.insert("description", mode.description.clone());
                (
                    TaskKind::GenericFallback,
                    self.templates.render(TemplateId::TaskGeneric, &vars),
                )
            }
        }
    }

    fn lens_overlay(&self, request: &LensRequest) -> Result<(String, String), ComposeError> {
        let lens = self
            .lenses
            .get(request.id.trim())
            .ok_or_else(|| ComposeError::UnknownLens(request.id.clone()))?;
        let instructions = lens
            .instantiate(request.intent.as_deref())
            .ok_or_else(|| ComposeError::LensIntentRequired(lens.id.clone()))?;
        let mut vars = BTreeMap::new();
        vars.insert("name", lens.name.clone());
        vars.insert("thinker", lens.thinker.clone());
        vars.insert("tagline", lens.tagline.clone());
        vars.insert("instructions", instructions);
        Ok((
            lens.id.clone(),
            self.templates.render(TemplateId::LensOverlay, &vars),
        ))
    }

    fn base_framework(&self, include_reference: bool, include_lexicon: bool) -> String {
        let mut out = self.templates.text(TemplateId::Persona).to_string();
        if include_reference {
            out.push_str("\n\n");
            out.push_str(&self.reference_dump());
        }
        if include_lexicon {
            out.push_str("\n\n");
            out.push_str(&self.lexicon_dump());
        }
        out
    }

    fn reference_dump(&self) -> String {
        let mut out = vec![
            REFERENCE_HEADER.to_string(),
            format!(
                "Framework version {}. Use these categories to think; in the output, refer to them only by descriptive name.",
                self.framework.version()
            ),
            format!("## Drivers ({})", self.framework.drivers().len()),
        ];
        for driver in self.framework.drivers() {
            let mut entry = format!(
                "**{}**: {}\nGoverns: {}",
                driver.name, driver.subtitle, driver.governs
            );
            if !driver.anchor_cues.is_empty() {
                entry.push_str(&format!("\nAnchor cues: {}", driver.anchor_cues.join(", ")));
            }
            out.push(entry);
        }
        out.push(format!("## Principles ({})", self.framework.principles().len()));
        for principle in self.framework.principles() {
            out.push(format!(
                "**{}**: {}\nMechanism: {}",
                principle.name, principle.subtitle, principle.mechanism
            ));
        }
        out.join("\n\n")
    }

    fn lexicon_dump(&self) -> String {
        let mut out = vec![
            LEXICON_HEADER.to_string(),
            "Use these concepts where the work's own tradition calls for them, always glossed in plain English."
                .to_string(),
        ];
        for term in self.framework.lexicon() {
            out.push(format!(
                "**{}** ({})\nDefinition: {}\nIn practice: {}\nFramework mapping: {}",
                term.term, term.origin, term.definition, term.in_practice, term.mapping
            ));
        }
        out.join("\n\n")
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn validate_follow_up(follow_up: &FollowUp) -> Result<(&str, &str), ComposeError> {
    let prior =
        non_blank(Some(follow_up.prior_analysis.as_str())).ok_or(ComposeError::MissingPriorAnalysis)?;
    let question =
        non_blank(Some(follow_up.question.as_str())).ok_or(ComposeError::MissingQuestion)?;
    Ok((prior, question))
}

fn merged_fields(primary: &[FieldSpec], extra: &[FieldSpec]) -> Vec<FieldSpec> {
    let mut merged = primary.to_vec();
    for field in extra {
        if !merged.iter().any(|existing| existing.id == field.id) {
            merged.push(field.clone());
        }
    }
    merged
}

/// Labeled context lines for declared, non-empty fields, in declaration order.
fn context_block(fields: &ContextFields, specs: &[FieldSpec], submode: Option<&str>) -> String {
    let mut lines = Vec::new();
    if let Some(submode) = submode {
        lines.push(format!("- **Sub-mode:** {submode}"));
    }
    for (label, value) in fields.labeled(specs) {
        if value.contains('\n') {
            let indented = value
                .lines()
                .map(|line| format!("  {line}"))
                .collect::<Vec<_>>()
                .join("\n");
            lines.push(format!("- **{label}:**\n{indented}"));
        } else {
            lines.push(format!("- **{label}:** {value}"));
        }
    }
    if lines.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }
    lines.join("\n")
}
