use anyhow::{bail, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::fields::ContextFields;
use super::image::ImagePayload;
use crate::modes::{fallback_fields, FieldSpec, ModeSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnKind {
    Initial,
    Interrogation { question: String },
    Lens { lens_id: String, lens_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisTurn {
    pub index: usize,
    #[serde(flatten)]
    pub kind: TurnKind,
    pub raw: String,
    pub html: String,
    pub created_at: String,
}

impl AnalysisTurn {
    pub fn heading(&self) -> String {
        match &self.kind {
            TurnKind::Initial => "Analysis".to_string(),
            TurnKind::Interrogation { question } => format!("Follow-up: {question}"),
            TurnKind::Lens { lens_name, .. } => format!("Lens: {lens_name}"),
        }
    }
}

/// In-memory state for one artwork.
///
/// `turns()[0]` is always the initial analysis. Turns are only ever
/// appended, or dropped all at once by [`Session::clear`].
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    image: Option<ImagePayload>,
    mode: Option<ModeSpec>,
    submode_id: Option<String>,
    lens_id: Option<String>,
    lens_intent: Option<String>,
    custom_text: Option<String>,
    field_specs: Vec<FieldSpec>,
    fields: ContextFields,
    outputs: Vec<AnalysisTurn>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: None,
            mode: None,
            submode_id: None,
            lens_id: None,
            lens_intent: None,
            custom_text: None,
            field_specs: fallback_fields(),
            fields: ContextFields::new(),
            outputs: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image(&self) -> Option<&ImagePayload> {
        self.image.as_ref()
    }

    /// Replaces the active image. Stored turns are left as they are.
    pub fn record_image(&mut self, image: ImagePayload) -> Option<ImagePayload> {
        self.image.replace(image)
    }

    pub fn mode(&self) -> Option<&ModeSpec> {
        self.mode.as_ref()
    }

    pub fn mode_id(&self) -> Option<&str> {
        self.mode.as_ref().map(|mode| mode.id.as_str())
    }

    pub fn select_mode(&mut self, mode: ModeSpec) {
        let keep_submode = self
            .submode_id
            .as_deref()
            .map(|id| mode.submode(id).is_some())
            .unwrap_or(false);
        if !keep_submode {
            self.submode_id = None;
        }
        self.field_specs = mode.fields.clone();
        self.fields = self.fields.restricted_to(&self.field_specs);
        self.mode = Some(mode);
    }

    pub fn clear_mode(&mut self) {
        self.mode = None;
        self.submode_id = None;
        self.field_specs = fallback_fields();
        self.fields = self.fields.restricted_to(&self.field_specs);
    }

    pub fn submode_id(&self) -> Option<&str> {
        self.submode_id.as_deref()
    }

    pub fn select_submode(&mut self, id: &str) -> Result<()> {
        let Some(mode) = self.mode.as_ref() else {
            bail!("select a mode before choosing a sub-mode");
        };
        if mode.submode(id).is_none() {
            bail!("mode '{}' has no sub-mode '{id}'", mode.id);
        }
        self.submode_id = Some(id.to_string());
        Ok(())
    }

    pub fn field_specs(&self) -> &[FieldSpec] {
        &self.field_specs
    }

    pub fn fields(&self) -> &ContextFields {
        &self.fields
    }

    pub fn set_field(&mut self, id: &str, value: &str) -> Result<()> {
        if !self.field_specs.iter().any(|field| field.id == id) {
            let known = self
                .field_specs
                .iter()
                .map(|field| field.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            bail!("unknown field '{id}' (expected one of: {known})");
        }
        self.fields.insert(id, value);
        Ok(())
    }

    pub fn custom_text(&self) -> Option<&str> {
        self.custom_text.as_deref()
    }

    pub fn set_custom_text(&mut self, text: Option<&str>) {
        self.custom_text = text
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
    }

    pub fn lens_id(&self) -> Option<&str> {
        self.lens_id.as_deref()
    }

    pub fn lens_intent(&self) -> Option<&str> {
        self.lens_intent.as_deref()
    }

    pub fn select_lens(&mut self, lens_id: Option<&str>, intent: Option<&str>) {
        self.lens_id = lens_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        self.lens_intent = intent
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
    }

    pub fn turns(&self) -> &[AnalysisTurn] {
        &self.outputs
    }

    pub fn turn(&self, index: usize) -> Option<&AnalysisTurn> {
        self.outputs.get(index)
    }

    pub fn has_analysis(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Raw text of the initial analysis, the grounding for every follow-up.
    pub fn prior_analysis(&self) -> Option<&str> {
        self.outputs.first().map(|turn| turn.raw.as_str())
    }

    pub fn record_initial(&mut self, raw: String, html: String) -> Result<usize> {
        if self.has_analysis() {
            bail!("an initial analysis is already recorded; start a new artwork first");
        }
        Ok(self.push(TurnKind::Initial, raw, html))
    }

    pub fn append_interrogation(
        &mut self,
        question: &str,
        raw: String,
        html: String,
    ) -> Result<usize> {
        if !self.has_analysis() {
            bail!("follow-up questions need an initial analysis");
        }
        Ok(self.push(
            TurnKind::Interrogation {
                question: question.trim().to_string(),
            },
            raw,
            html,
        ))
    }

    pub fn append_lens(
        &mut self,
        lens_id: &str,
        lens_name: &str,
        raw: String,
        html: String,
    ) -> Result<usize> {
        if !self.has_analysis() {
            bail!("lens readings need an initial analysis");
        }
        Ok(self.push(
            TurnKind::Lens {
                lens_id: lens_id.to_string(),
                lens_name: lens_name.to_string(),
            },
            raw,
            html,
        ))
    }

    /// Resets everything for a new artwork. The session id is kept.
    pub fn clear(&mut self) {
        *self = Self::with_id(std::mem::take(&mut self.id));
    }

    fn push(&mut self, kind: TurnKind, raw: String, html: String) -> usize {
        let index = self.outputs.len();
        self.outputs.push(AnalysisTurn {
            index,
            kind,
            raw,
            html,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        index
    }
}
