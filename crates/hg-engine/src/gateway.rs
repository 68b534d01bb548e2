use anyhow::{bail, Result};
use hg_contracts::session::{ContextFields, ImagePayload};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::composer::{ComposeRequest, ComposedPrompt, LensRequest, PromptComposer, TaskKind};
use crate::config::EngineConfig;
use crate::error::AnalysisError;
use crate::error_chain_text;
use crate::markdown::render_html;
use crate::normalizer::HARD_LIMIT_BYTES;
use crate::providers::{default_provider_registry, VisionProviderRegistry, VisionRequest};

const LEGACY_FIELD_IDS: &[(&str, &str)] = &[
    ("title", "title"),
    ("artist", "artist"),
    ("year", "year"),
    ("medium", "medium"),
    ("dimensions", "dimensions"),
    ("artistStatement", "artist-statement"),
    ("contextNote", "context-note"),
];

/// One completed provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub raw: String,
    pub html: String,
    pub provider: String,
    pub model: String,
    pub mode_id: Option<String>,
    pub lens_id: Option<String>,
    pub task: TaskKind,
    pub fallback_reason: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// HTTP-shaped reply for the JSON handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReply {
    pub status: u16,
    pub body: Value,
}

impl GatewayReply {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }
}

/// Request body of `POST /api/analyze-artwork`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeArtworkBody {
    pub image: Option<String>,
    pub fields: Option<Map<String, Value>>,
    pub prompt_text: Option<String>,
    pub prompt_id: Option<String>,
    pub submode_id: Option<String>,
    pub lens_id: Option<String>,
    pub lens_intent: Option<String>,
    pub interrogation_mode: Option<bool>,
    pub prior_analysis: Option<String>,
    pub user_question: Option<String>,
    pub mode: Option<String>,
    pub custom_prompt: Option<String>,
    pub lens: Option<String>,
    #[serde(flatten)]
    pub legacy: Map<String, Value>,
}

impl AnalyzeArtworkBody {
    pub fn context_fields(&self) -> ContextFields {
        let mut fields = ContextFields::new();
        for (id, value) in self.fields.iter().flatten() {
            if let Some(text) = field_text(value) {
                fields.insert(id.clone(), &text);
            }
        }
        for (wire, id) in LEGACY_FIELD_IDS {
            if fields.get(id).is_some() {
                continue;
            }
            if let Some(text) = self.legacy.get(*wire).and_then(field_text) {
                fields.insert(*id, &text);
            }
        }
        fields
    }

    /// `promptId` (or legacy `mode`) names a mode; otherwise `promptText`
    /// (or legacy `customPrompt`) is the user's own instructions.
    pub fn compose_request(&self) -> ComposeRequest {
        let mode = first_text(&[&self.prompt_id, &self.mode]);
        let custom_text = match mode {
            Some(_) => first_text(&[&self.custom_prompt]),
            None => first_text(&[&self.custom_prompt, &self.prompt_text]),
        };
        let lens = first_text(&[&self.lens_id, &self.lens]).map(|id| LensRequest {
            id,
            intent: first_text(&[&self.lens_intent]),
        });
        ComposeRequest {
            mode,
            submode: first_text(&[&self.submode_id]),
            custom_text,
            fields: self.context_fields(),
            lens,
            follow_up: None,
        }
    }
}

pub struct AnalysisGateway {
    composer: PromptComposer,
    providers: VisionProviderRegistry,
    provider: String,
    model: String,
    max_tokens: u32,
}

impl AnalysisGateway {
    pub fn new(
        composer: PromptComposer,
        providers: VisionProviderRegistry,
        provider: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<Self> {
        if providers.get(provider).is_none() {
            bail!(
                "unknown vision provider '{provider}' (available: {})",
                providers.names().join(", ")
            );
        }
        Ok(Self {
            composer,
            providers,
            provider: provider.to_string(),
            model: model.to_string(),
            max_tokens,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(
            PromptComposer::builtin()?,
            default_provider_registry(config)?,
            &config.provider,
            &config.model,
            config.max_tokens,
        )
    }

    pub fn composer(&self) -> &PromptComposer {
        &self.composer
    }

    pub fn provider_name(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn credential_present(&self) -> bool {
        self.providers
            .get(&self.provider)
            .map(|provider| provider.credential_present())
            .unwrap_or(false)
    }

    /// Checks run in a fixed order: credential, image, composition. At most
    /// one provider call is made.
    pub fn analyze(
        &self,
        image: Option<&ImagePayload>,
        request: &ComposeRequest,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.ensure_credential()?;
        let Some(image) = image else {
            return Err(AnalysisError::Validation("No image provided".to_string()));
        };
        if image.approx_bytes() > HARD_LIMIT_BYTES {
            return Err(AnalysisError::Validation(format!(
                "Image is about {} bytes, above the {HARD_LIMIT_BYTES} byte limit; use a smaller image",
                image.approx_bytes()
            )));
        }
        let composed = self.composer.compose(request)?;
        self.execute(Some(image), composed)
    }

    /// Follow-up question about a prior analysis. Sends no image.
    pub fn interrogate(
        &self,
        prior_analysis: &str,
        question: &str,
        mode_id: Option<&str>,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.ensure_credential()?;
        let composed = self.composer.compose(&ComposeRequest::for_follow_up(
            prior_analysis,
            question,
            mode_id,
        ))?;
        self.execute(None, composed)
    }

    fn ensure_credential(&self) -> Result<(), AnalysisError> {
        if self.credential_present() {
            return Ok(());
        }
        Err(AnalysisError::Configuration {
            message: format!("{} API key is not configured", self.provider),
            credential_present: false,
        })
    }

    fn execute(
        &self,
        image: Option<&ImagePayload>,
        composed: ComposedPrompt,
    ) -> Result<AnalysisResult, AnalysisError> {
        let provider = self
            .providers
            .get(&self.provider)
            .ok_or_else(|| AnalysisError::Configuration {
                message: format!("vision provider '{}' is not registered", self.provider),
                credential_present: false,
            })?;
        if let Some(reason) = &composed.fallback_reason {
            log::warn!("{reason}");
        }
        log::info!(
            "analysis request provider={} model={} task={} gating={} mode={} lens={}",
            self.provider,
            self.model,
            composed.task.as_str(),
            composed.gating.as_str(),
            composed.mode_id.as_deref().unwrap_or("-"),
            composed.lens_id.as_deref().unwrap_or("-"),
        );

        let request = VisionRequest {
            system: composed.system,
            user_text: composed.user,
            image: image.cloned(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
        };
        let response = provider.complete(&request).map_err(|err| {
            let detail = error_chain_text(&err, 1024);
            log::error!("vision provider {} failed: {detail}", self.provider);
            AnalysisError::Upstream(detail)
        })?;
        log::info!(
            "analysis complete provider={} model={} input_tokens={} output_tokens={}",
            self.provider,
            response.model,
            response.input_tokens.unwrap_or_default(),
            response.output_tokens.unwrap_or_default(),
        );

        Ok(AnalysisResult {
            html: render_html(&response.text),
            raw: response.text,
            provider: self.provider.clone(),
            model: response.model,
            mode_id: composed.mode_id,
            lens_id: composed.lens_id,
            task: composed.task,
            fallback_reason: composed.fallback_reason,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        })
    }

    /// JSON handler behind `POST /api/analyze-artwork`.
    pub fn handle_analyze(&self, body: &Value) -> GatewayReply {
        let outcome = match AnalyzeArtworkBody::deserialize(body) {
            Ok(parsed) => self.analyze_body(&parsed),
            Err(err) => Err(AnalysisError::Validation(format!(
                "Request body must be a JSON object: {err}"
            ))),
        };
        match outcome {
            Ok(result) => {
                let mut reply = json!({
                    "success": true,
                    "analysis": result.html,
                    "raw": result.raw,
                    "provider": result.provider,
                    "model": result.model,
                });
                if let Some(reason) = result.fallback_reason {
                    reply["fallbackReason"] = json!(reason);
                }
                GatewayReply::ok(reply)
            }
            Err(err) => self.error_reply(&err),
        }
    }

    fn analyze_body(&self, body: &AnalyzeArtworkBody) -> Result<AnalysisResult, AnalysisError> {
        if body.interrogation_mode.unwrap_or(false) {
            let prior = body.prior_analysis.as_deref().unwrap_or_default();
            let question = body.user_question.as_deref().unwrap_or_default();
            let mode = first_text(&[&body.prompt_id, &body.mode]);
            return self.interrogate(prior, question, mode.as_deref());
        }
        self.ensure_credential()?;
        let image = match body.image.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                ImagePayload::from_data_url(raw)
                    .map_err(|err| AnalysisError::Validation(err.to_string()))?,
            ),
            _ => None,
        };
        self.analyze(image.as_ref(), &body.compose_request())
    }

    pub fn error_reply(&self, err: &AnalysisError) -> GatewayReply {
        let status = err.status_code();
        if err.is_client_error() {
            log::warn!("analysis rejected: {err}");
            return GatewayReply {
                status,
                body: json!({ "error": err.to_string() }),
            };
        }
        let credential_present = match err {
            AnalysisError::Configuration {
                credential_present, ..
            } => *credential_present,
            _ => self.credential_present(),
        };
        GatewayReply {
            status,
            body: json!({
                "error": "Failed to analyze artwork",
                "details": err.to_string(),
                "credentialPresent": credential_present,
            }),
        }
    }
}

fn first_text(candidates: &[&Option<String>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|candidate| candidate.as_deref())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::bail;
    use hg_contracts::session::ImagePayload;
    use serde_json::json;

    use super::{AnalysisGateway, AnalyzeArtworkBody};
    use crate::composer::{ComposeRequest, PromptComposer, TaskKind};
    use crate::error::{AnalysisError, ComposeError};
    use crate::providers::{
        DryrunProvider, VisionProvider, VisionProviderRegistry, VisionRequest, VisionResponse,
    };

    const PNG_DATA_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

    /// Records every request it receives and replies with fixed Markdown.
    struct RecordingProvider {
        calls: Arc<AtomicUsize>,
        key: bool,
        fail: bool,
    }

    impl VisionProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn credential_present(&self) -> bool {
            self.key
        }

        fn complete(&self, request: &VisionRequest) -> anyhow::Result<VisionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("upstream exploded (529)");
            }
            Ok(VisionResponse {
                text: format!("## Result\n\n**{}**", request.user_text),
                model: request.model.clone(),
                input_tokens: Some(10),
                output_tokens: Some(5),
                stop_reason: None,
                provider_request: Default::default(),
            })
        }
    }

    fn gateway(key: bool, fail: bool) -> anyhow::Result<(AnalysisGateway, Arc<AtomicUsize>)> {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut providers = VisionProviderRegistry::new();
        providers.register(RecordingProvider {
            calls: calls.clone(),
            key,
            fail,
        });
        providers.register(DryrunProvider);
        let gateway =
            AnalysisGateway::new(PromptComposer::builtin()?, providers, "recording", "test-model", 512)?;
        Ok((gateway, calls))
    }

    fn image() -> anyhow::Result<ImagePayload> {
        ImagePayload::from_data_url(PNG_DATA_URL)
    }

    #[test]
    fn unknown_provider_is_rejected() -> anyhow::Result<()> {
        let result = AnalysisGateway::new(
            PromptComposer::builtin()?,
            VisionProviderRegistry::new(),
            "anthropic",
            "m",
            1,
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn analysis_renders_html_and_keeps_raw() -> anyhow::Result<()> {
        let (gateway, calls) = gateway(true, false)?;
        let result = gateway.analyze(Some(&image()?), &ComposeRequest::for_mode("fine-art-wip"))?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.task, TaskKind::ModeTemplate);
        assert!(result.raw.starts_with("## Result"));
        assert!(result.html.starts_with("<h2>Result</h2>"));
        assert!(result.html.contains("<strong>"));
        assert_eq!(result.model, "test-model");
        Ok(())
    }

    #[test]
    fn credential_is_checked_before_image() -> anyhow::Result<()> {
        let (gateway, calls) = gateway(false, false)?;
        let err = gateway
            .analyze(None, &ComposeRequest::default())
            .expect_err("no credential");
        assert!(matches!(
            err,
            AnalysisError::Configuration {
                credential_present: false,
                ..
            }
        ));
        assert_eq!(err.status_code(), 500);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn missing_image_and_empty_instructions_make_no_call() -> anyhow::Result<()> {
        let (gateway, calls) = gateway(true, false)?;
        let err = gateway
            .analyze(None, &ComposeRequest::for_mode("fine-art-wip"))
            .expect_err("no image");
        assert_eq!(err.to_string(), "No image provided");
        assert_eq!(err.status_code(), 400);

        let err = gateway
            .analyze(Some(&image()?), &ComposeRequest::default())
            .expect_err("nothing to instruct");
        assert!(matches!(err, AnalysisError::Compose(ComposeError::NothingToInstruct)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn upstream_failure_is_a_server_error() -> anyhow::Result<()> {
        let (gateway, calls) = gateway(true, true)?;
        let reply = gateway.handle_analyze(&json!({
            "image": PNG_DATA_URL,
            "promptId": "fine-art-wip",
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reply.status, 500);
        assert_eq!(reply.body["error"], json!("Failed to analyze artwork"));
        assert!(reply.body["details"]
            .as_str()
            .unwrap_or_default()
            .contains("upstream exploded"));
        assert_eq!(reply.body["credentialPresent"], json!(true));
        Ok(())
    }

    #[test]
    fn handle_analyze_success_shape() -> anyhow::Result<()> {
        let (gateway, _) = gateway(true, false)?;
        let reply = gateway.handle_analyze(&json!({
            "image": PNG_DATA_URL,
            "promptText": "Describe only the edges.",
            "fields": {"title": "Harbor", "year": 1968},
        }));
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["success"], json!(true));
        assert!(reply.body["analysis"]
            .as_str()
            .unwrap_or_default()
            .starts_with("<h2>"));
        assert!(reply.body["raw"].as_str().is_some());
        Ok(())
    }

    #[test]
    fn handle_analyze_validation_errors() -> anyhow::Result<()> {
        let (gateway, calls) = gateway(true, false)?;
        let missing = gateway.handle_analyze(&json!({"promptId": "fine-art-wip"}));
        assert_eq!(missing.status, 400);
        assert_eq!(missing.body, json!({"error": "No image provided"}));

        let not_object = gateway.handle_analyze(&json!("nope"));
        assert_eq!(not_object.status, 400);

        let bad_lens = gateway.handle_analyze(&json!({
            "image": PNG_DATA_URL,
            "promptId": "fine-art-wip",
            "lensId": "lens-stated-intent",
        }));
        assert_eq!(bad_lens.status, 400);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn interrogation_mode_needs_no_image() -> anyhow::Result<()> {
        let (gateway, calls) = gateway(true, false)?;
        let reply = gateway.handle_analyze(&json!({
            "interrogationMode": true,
            "priorAnalysis": "The left edge is hard.",
            "userQuestion": "Why does it feel heavy?",
        }));
        assert_eq!(reply.status, 200);
        assert!(reply.body["raw"]
            .as_str()
            .unwrap_or_default()
            .contains("Why does it feel heavy?"));

        let missing = gateway.handle_analyze(&json!({
            "interrogationMode": true,
            "userQuestion": "Why?",
        }));
        assert_eq!(missing.status, 400);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn legacy_fields_map_to_field_ids() -> anyhow::Result<()> {
        let body: AnalyzeArtworkBody = serde_json::from_value(json!({
            "mode": "physics",
            "title": "Harbor",
            "artistStatement": "About tides.",
            "fields": {"title": "Preferred"},
            "customPrompt": "",
            "lens": "lens-ooo",
        }))?;
        let request = body.compose_request();
        assert_eq!(request.mode.as_deref(), Some("physics"));
        assert_eq!(request.custom_text, None);
        assert_eq!(request.fields.get("title"), Some("Preferred"));
        assert_eq!(request.fields.get("artist-statement"), Some("About tides."));
        assert_eq!(request.lens.map(|lens| lens.id), Some("lens-ooo".to_string()));
        Ok(())
    }

    #[test]
    fn legacy_year_survives_composition() -> anyhow::Result<()> {
        let (gateway, _) = gateway(true, false)?;
        let wip: AnalyzeArtworkBody = serde_json::from_value(json!({
            "mode": "wip",
            "title": "Harbor",
            "year": "1968-XYZ",
            "medium": "Oil",
        }))?;
        let prompt = gateway.composer().compose(&wip.compose_request())?;
        assert_eq!(prompt.mode_id.as_deref(), Some("wip"));
        assert!(prompt.fallback_reason.is_none());
        assert!(prompt.system.contains("- **Year:** 1968-XYZ"));
        assert!(prompt.system.contains("- **Medium:** Oil"));

        let retired: AnalyzeArtworkBody = serde_json::from_value(json!({
            "mode": "tour-guide-classic",
            "year": "1968-XYZ",
        }))?;
        let prompt = gateway.composer().compose(&retired.compose_request())?;
        assert!(prompt.fallback_reason.is_some());
        assert!(prompt.system.contains("- **Year:** 1968-XYZ"));
        Ok(())
    }

    #[test]
    fn prompt_text_is_custom_only_without_prompt_id() -> anyhow::Result<()> {
        let with_id: AnalyzeArtworkBody = serde_json::from_value(json!({
            "promptId": "cpg-shelf",
            "promptText": "resolved template text",
        }))?;
        assert_eq!(with_id.compose_request().custom_text, None);

        let without_id: AnalyzeArtworkBody = serde_json::from_value(json!({
            "promptText": "my own instructions",
        }))?;
        let request = without_id.compose_request();
        assert_eq!(request.mode, None);
        assert_eq!(request.custom_text.as_deref(), Some("my own instructions"));
        Ok(())
    }
}
