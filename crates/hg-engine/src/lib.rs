use std::path::Path;

use anyhow::{bail, Context, Result};
use hg_contracts::events::{EventPayload, EventWriter};
use hg_contracts::modes::ModeSpec;
use hg_contracts::session::{FeedbackRecord, Session};
use reqwest::blocking::Response as HttpResponse;
use serde_json::{json, Value};

pub mod composer;
pub mod config;
pub mod error;
pub mod export;
pub mod feedback;
pub mod gateway;
pub mod markdown;
pub mod normalizer;
pub mod providers;
pub mod templates;

pub use composer::{ComposeRequest, ComposedPrompt, PromptComposer, TaskKind};
pub use config::EngineConfig;
pub use error::{AnalysisError, ComposeError, NormalizeError};
pub use feedback::{FeedbackAck, FeedbackChannel};
pub use gateway::{AnalysisGateway, AnalysisResult, GatewayReply};
pub use normalizer::{ImageNormalizer, NormalizedImage};

/// Session driver: normalizes images, runs analyses and follow-ups through
/// the gateway, records turns and emits lifecycle events.
pub struct Studio {
    gateway: AnalysisGateway,
    normalizer: ImageNormalizer,
    feedback: FeedbackChannel,
    events: EventWriter,
}

impl Studio {
    pub fn new(
        gateway: AnalysisGateway,
        normalizer: ImageNormalizer,
        feedback: FeedbackChannel,
        events: EventWriter,
    ) -> Self {
        Self {
            gateway,
            normalizer,
            feedback,
            events,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let events = match &config.events_path {
            Some(path) => EventWriter::new(path, "studio"),
            None => EventWriter::disabled("studio"),
        };
        Ok(Self::new(
            AnalysisGateway::from_config(config)?,
            ImageNormalizer::default(),
            FeedbackChannel::from_config(&config.feedback),
            events,
        ))
    }

    pub fn gateway(&self) -> &AnalysisGateway {
        &self.gateway
    }

    pub fn composer(&self) -> &PromptComposer {
        self.gateway.composer()
    }

    pub fn load_image_path(
        &self,
        session: &mut Session,
        path: &Path,
    ) -> Result<NormalizedImage, NormalizeError> {
        let normalized = self.normalizer.normalize_path(path)?;
        self.accept_image(session, normalized, Some(path))
    }

    pub fn load_image_data_url(
        &self,
        session: &mut Session,
        raw: &str,
    ) -> Result<NormalizedImage, NormalizeError> {
        let normalized = self.normalizer.normalize_data_url(raw)?;
        self.accept_image(session, normalized, None)
    }

    fn accept_image(
        &self,
        session: &mut Session,
        normalized: NormalizedImage,
        source: Option<&Path>,
    ) -> Result<NormalizedImage, NormalizeError> {
        session.record_image(normalized.payload.clone());
        let mut payload = EventPayload::new();
        payload.insert(
            "source".to_string(),
            json!(source.map(|path| path.display().to_string())),
        );
        payload.insert("media_type".to_string(), json!(normalized.payload.media_type));
        payload.insert("width".to_string(), json!(normalized.width));
        payload.insert("height".to_string(), json!(normalized.height));
        payload.insert("original_width".to_string(), json!(normalized.original_width));
        payload.insert("original_height".to_string(), json!(normalized.original_height));
        payload.insert("was_resized".to_string(), json!(normalized.was_resized));
        payload.insert("quality".to_string(), json!(normalized.quality));
        payload.insert("approx_bytes".to_string(), json!(normalized.approx_bytes()));
        self.emit(session, "image_loaded", payload);
        Ok(normalized)
    }

    pub fn select_mode(&self, session: &mut Session, mode_id: &str) -> Result<ModeSpec> {
        let modes = self.composer().modes();
        let Some(mode) = modes.get(mode_id.trim()) else {
            let known = modes
                .list()
                .map(|mode| mode.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            bail!("unknown mode '{mode_id}' (available: {known})");
        };
        session.select_mode(mode.clone());
        let mut payload = EventPayload::new();
        payload.insert("mode_id".to_string(), json!(mode.id));
        payload.insert("category".to_string(), json!(mode.category));
        payload.insert("gating".to_string(), json!(mode.gating.as_str()));
        self.emit(session, "mode_selected", payload);
        Ok(mode.clone())
    }

    pub fn run_analysis(&self, session: &mut Session) -> Result<usize, AnalysisError> {
        if session.has_analysis() {
            return Err(AnalysisError::Validation(
                "an analysis is already recorded for this artwork; start a new artwork first"
                    .to_string(),
            ));
        }
        let request = ComposeRequest::from_session(session);
        let outcome = self.gateway.analyze(session.image(), &request);
        let result = self.observe(session, "initial", outcome)?;
        session
            .record_initial(result.raw, result.html)
            .map_err(|err| AnalysisError::Validation(err.to_string()))
    }

    pub fn ask(&self, session: &mut Session, question: &str) -> Result<usize, AnalysisError> {
        let Some(prior) = session.prior_analysis() else {
            return Err(AnalysisError::Validation(
                "run an analysis before asking follow-up questions".to_string(),
            ));
        };
        let outcome = self.gateway.interrogate(prior, question, session.mode_id());
        let result = self.observe(session, "interrogation", outcome)?;
        session
            .append_interrogation(question, result.raw, result.html)
            .map_err(|err| AnalysisError::Validation(err.to_string()))
    }

    /// Re-reads the current image through a lens, keeping the session's task.
    pub fn apply_lens(
        &self,
        session: &mut Session,
        lens_id: &str,
        intent: Option<&str>,
    ) -> Result<usize, AnalysisError> {
        if !session.has_analysis() {
            return Err(AnalysisError::Validation(
                "run an analysis before applying a lens".to_string(),
            ));
        }
        let request = ComposeRequest::from_session(session).with_lens(lens_id.trim(), intent);
        let outcome = self.gateway.analyze(session.image(), &request);
        let result = self.observe(session, "lens", outcome)?;
        let lens_name = self
            .composer()
            .lenses()
            .get(lens_id.trim())
            .map(|lens| lens.name.clone())
            .unwrap_or_else(|| lens_id.trim().to_string());
        session
            .append_lens(lens_id.trim(), &lens_name, result.raw, result.html)
            .map_err(|err| AnalysisError::Validation(err.to_string()))
    }

    pub fn submit_feedback(
        &self,
        session: &Session,
        rating: Option<i64>,
        comment: Option<&str>,
    ) -> FeedbackAck {
        let record = FeedbackRecord::for_session(session, rating, comment);
        let ack = self.feedback.submit(&record);
        let mut payload = EventPayload::new();
        payload.insert("rating".to_string(), json!(record.rating));
        payload.insert("has_comment".to_string(), json!(record.comment.is_some()));
        payload.insert("delivered_remote".to_string(), json!(ack.delivered_remote));
        payload.insert("journaled".to_string(), json!(ack.journaled));
        self.emit(session, "feedback_submitted", payload);
        ack
    }

    pub fn new_artwork(&self, session: &mut Session) {
        let turns = session.turns().len();
        session.clear();
        let mut payload = EventPayload::new();
        payload.insert("discarded_turns".to_string(), json!(turns));
        self.emit(session, "session_reset", payload);
    }

    fn observe(
        &self,
        session: &Session,
        kind: &str,
        outcome: Result<AnalysisResult, AnalysisError>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let mut payload = EventPayload::new();
        payload.insert("kind".to_string(), json!(kind));
        match &outcome {
            Ok(result) => {
                payload.insert("provider".to_string(), json!(result.provider));
                payload.insert("model".to_string(), json!(result.model));
                payload.insert("task".to_string(), json!(result.task.as_str()));
                payload.insert("mode_id".to_string(), json!(result.mode_id));
                payload.insert("lens_id".to_string(), json!(result.lens_id));
                payload.insert("fallback_reason".to_string(), json!(result.fallback_reason));
                payload.insert("input_tokens".to_string(), json!(result.input_tokens));
                payload.insert("output_tokens".to_string(), json!(result.output_tokens));
                self.emit(session, "analysis_completed", payload);
            }
            Err(err) => {
                payload.insert("error".to_string(), json!(err.to_string()));
                payload.insert("status".to_string(), json!(err.status_code()));
                self.emit(session, "analysis_failed", payload);
            }
        }
        outcome
    }

    fn emit(&self, session: &Session, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.for_session(session.id()).emit(event_type, payload) {
            log::warn!(
                "event {event_type} not written: {}",
                error_chain_text(&err, 256)
            );
        }
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(body);
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&detail, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::anyhow;
    use hg_contracts::events::EventWriter;
    use hg_contracts::session::{FeedbackWriter, Session, TurnKind};
    use image::{DynamicImage, Rgb, RgbImage};
    use serde_json::Value;

    use super::{error_chain_text, truncate_text, EngineConfig, Studio};
    use crate::error::AnalysisError;
    use crate::feedback::FeedbackChannel;
    use crate::gateway::AnalysisGateway;
    use crate::normalizer::ImageNormalizer;

    fn studio(events_path: &std::path::Path, journal: &std::path::Path) -> anyhow::Result<Studio> {
        Ok(Studio::new(
            AnalysisGateway::from_config(&EngineConfig::dryrun())?,
            ImageNormalizer::default(),
            FeedbackChannel::new(None, Some(FeedbackWriter::new(journal))),
            EventWriter::new(events_path, "studio"),
        ))
    }

    fn event_types(path: &std::path::Path) -> anyhow::Result<Vec<String>> {
        let raw = fs::read_to_string(path)?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    #[test]
    fn studio_runs_a_full_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let studio = studio(&events_path, &temp.path().join("feedback.jsonl"))?;

        let image_path = temp.path().join("work.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([20, 40, 60]))).save(&image_path)?;

        let mut session = Session::with_id("s-studio");
        let normalized = studio.load_image_path(&mut session, &image_path)?;
        assert!(!normalized.was_resized);
        studio.select_mode(&mut session, "fine-art-comprehensive")?;
        session.set_field("title", "Harbor")?;

        assert_eq!(studio.run_analysis(&mut session)?, 0);
        assert!(session.turns()[0].raw.starts_with("## Dry Run Analysis"));
        assert!(session.turns()[0].html.starts_with("<h2>Dry Run Analysis</h2>"));

        assert_eq!(studio.ask(&mut session, "Why does the corner feel heavy?")?, 1);
        assert_eq!(
            session.turns()[1].kind,
            TurnKind::Interrogation {
                question: "Why does the corner feel heavy?".to_string()
            }
        );

        assert_eq!(studio.apply_lens(&mut session, "lens-ooo", None)?, 2);
        assert_eq!(
            session.turns()[2].kind,
            TurnKind::Lens {
                lens_id: "lens-ooo".to_string(),
                lens_name: "Object-Oriented Ontology".to_string()
            }
        );

        let ack = studio.submit_feedback(&session, Some(5), Some("precise"));
        assert!(ack.journaled);

        let second = studio.run_analysis(&mut session);
        assert!(matches!(second, Err(AnalysisError::Validation(_))));

        studio.new_artwork(&mut session);
        assert!(!session.has_analysis());
        assert!(session.image().is_none());
        assert_eq!(session.id(), "s-studio");

        let types = event_types(&events_path)?;
        assert_eq!(
            types,
            vec![
                "image_loaded",
                "mode_selected",
                "analysis_completed",
                "analysis_completed",
                "analysis_completed",
                "feedback_submitted",
                "session_reset",
            ]
        );
        Ok(())
    }

    #[test]
    fn follow_ups_need_an_initial_analysis() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let studio = studio(&events_path, &temp.path().join("feedback.jsonl"))?;
        let mut session = Session::new();

        assert!(matches!(
            studio.ask(&mut session, "why?"),
            Err(AnalysisError::Validation(_))
        ));
        assert!(matches!(
            studio.apply_lens(&mut session, "lens-ooo", None),
            Err(AnalysisError::Validation(_))
        ));
        assert!(studio.select_mode(&mut session, "nope").is_err());

        let missing_image = studio.run_analysis(&mut session);
        assert!(matches!(missing_image, Err(AnalysisError::Validation(_))));
        assert_eq!(event_types(&events_path)?, vec!["analysis_failed"]);
        Ok(())
    }

    #[test]
    fn error_chain_text_joins_causes() {
        let err = anyhow!("socket closed").context("anthropic request failed");
        assert_eq!(
            error_chain_text(&err, 200),
            "anthropic request failed | caused by: socket closed"
        );
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }
}
