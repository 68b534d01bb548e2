use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hg_contracts::session::ImagePayload;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;
use crate::{response_json_or_error, truncate_text};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One single-turn vision call: system document, user text, optional image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionRequest {
    pub system: String,
    pub user_text: String,
    pub image: Option<ImagePayload>,
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionResponse {
    pub text: String,
    pub model: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub stop_reason: Option<String>,
    pub provider_request: Map<String, Value>,
}

pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn credential_present(&self) -> bool;
    fn complete(&self, request: &VisionRequest) -> Result<VisionResponse>;
}

#[derive(Default)]
pub struct VisionProviderRegistry {
    providers: BTreeMap<String, Box<dyn VisionProvider>>,
}

impl VisionProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: VisionProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn VisionProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(config: &EngineConfig) -> Result<VisionProviderRegistry> {
    let mut registry = VisionProviderRegistry::new();
    registry.register(DryrunProvider);
    registry.register(AnthropicProvider::new(
        &config.anthropic_api_base,
        config.anthropic_api_key.clone(),
        config.request_timeout,
    )?);
    Ok(registry)
}

/// Offline provider: a deterministic Markdown reply derived from the request.
pub struct DryrunProvider;

impl VisionProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn credential_present(&self) -> bool {
        true
    }

    fn complete(&self, request: &VisionRequest) -> Result<VisionResponse> {
        let digest = request_digest(request);
        let image_line = match &request.image {
            Some(image) => format!(
                "The request carried one `{}` image of about {} bytes.",
                image.media_type,
                image.approx_bytes()
            ),
            None => "The request carried no image.".to_string(),
        };
        let text = format!(
            "## Dry Run Analysis\n\n\
             **Request digest:** `{digest}`\n\n\
             - {image_line}\n\
             - The instruction document is {} characters long.\n\n\
             ### Prompt\n\n{}\n",
            request.system.chars().count(),
            truncate_text(request.user_text.trim(), 240),
        );
        let mut provider_request = Map::new();
        provider_request.insert("digest".to_string(), json!(digest));
        Ok(VisionResponse {
            text,
            model: request.model.clone(),
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".to_string()),
            provider_request,
        })
    }
}

pub struct AnthropicProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl AnthropicProvider {
    pub fn new(api_base: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build anthropic http client")?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|value| !value.trim().is_empty()),
            http,
        })
    }

    fn messages_endpoint(&self) -> String {
        format!("{}/messages", self.api_base)
    }

    fn build_payload(request: &VisionRequest) -> Value {
        let mut content = Vec::new();
        if let Some(image) = &request.image {
            content.push(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": image.media_type,
                    "data": image.data,
                }
            }));
        }
        content.push(json!({
            "type": "text",
            "text": request.user_text,
        }));
        json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": [{
                "role": "user",
                "content": content,
            }],
        })
    }
}

impl VisionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn credential_present(&self) -> bool {
        self.api_key.is_some()
    }

    fn complete(&self, request: &VisionRequest) -> Result<VisionResponse> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("ANTHROPIC_API_KEY not set");
        };
        let endpoint = self.messages_endpoint();
        let payload = Self::build_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .context("anthropic request failed")?;
        let parsed = response_json_or_error("anthropic", response)?;

        let text = extract_message_text(&parsed);
        if text.trim().is_empty() {
            bail!("anthropic response contained no text content");
        }

        let mut provider_request = Map::new();
        provider_request.insert("endpoint".to_string(), json!(endpoint));
        provider_request.insert("model".to_string(), json!(request.model));
        provider_request.insert("max_tokens".to_string(), json!(request.max_tokens));
        provider_request.insert(
            "image_media_type".to_string(),
            json!(request.image.as_ref().map(|image| image.media_type.clone())),
        );
        if let Some(id) = parsed.get("id").and_then(Value::as_str) {
            provider_request.insert("message_id".to_string(), json!(id));
        }

        let usage = parsed.get("usage");
        Ok(VisionResponse {
            text,
            model: parsed
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&request.model)
                .to_string(),
            input_tokens: usage
                .and_then(|usage| usage.get("input_tokens"))
                .and_then(Value::as_u64),
            output_tokens: usage
                .and_then(|usage| usage.get("output_tokens"))
                .and_then(Value::as_u64),
            stop_reason: parsed
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            provider_request,
        })
    }
}

/// Joins the `text` blocks of a messages response.
fn extract_message_text(response: &Value) -> String {
    response
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .unwrap_or_default()
}

fn request_digest(request: &VisionRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.system.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.user_text.as_bytes());
    if let Some(image) = &request.image {
        hasher.update([0u8]);
        hasher.update(image.data.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hg_contracts::session::ImagePayload;
    use serde_json::json;

    use super::{
        default_provider_registry, extract_message_text, AnthropicProvider, DryrunProvider,
        VisionProvider, VisionRequest,
    };
    use crate::config::EngineConfig;

    fn request() -> VisionRequest {
        VisionRequest {
            system: "system document".to_string(),
            user_text: "Please analyze.".to_string(),
            image: Some(ImagePayload::new("image/png", "aGVsbG8=")),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
        }
    }

    #[test]
    fn registry_lists_builtin_providers() -> anyhow::Result<()> {
        let registry = default_provider_registry(&EngineConfig::default())?;
        assert_eq!(registry.names(), vec!["anthropic", "dryrun"]);
        let anthropic = registry.get("anthropic").expect("anthropic registered");
        assert!(!anthropic.credential_present());
        Ok(())
    }

    #[test]
    fn anthropic_payload_puts_image_before_text() {
        let payload = AnthropicProvider::build_payload(&request());
        assert_eq!(payload["system"], json!("system document"));
        assert_eq!(payload["max_tokens"], json!(4096));
        let content = &payload["messages"][0]["content"];
        assert_eq!(content[0]["type"], json!("image"));
        assert_eq!(content[0]["source"]["media_type"], json!("image/png"));
        assert_eq!(content[0]["source"]["data"], json!("aGVsbG8="));
        assert_eq!(content[1], json!({"type": "text", "text": "Please analyze."}));
    }

    #[test]
    fn anthropic_without_key_fails_before_network() -> anyhow::Result<()> {
        let provider =
            AnthropicProvider::new("http://127.0.0.1:9/v1/", Some("  ".to_string()), Duration::from_secs(1))?;
        assert!(!provider.credential_present());
        assert_eq!(provider.messages_endpoint(), "http://127.0.0.1:9/v1/messages");
        let err = provider.complete(&request()).expect_err("no key");
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
        Ok(())
    }

    #[test]
    fn message_text_joins_text_blocks() {
        let response = json!({
            "content": [
                {"type": "text", "text": "## First\n"},
                {"type": "tool_use", "name": "ignored"},
                {"type": "text", "text": "Second"}
            ]
        });
        assert_eq!(extract_message_text(&response), "## First\n\nSecond");
        assert_eq!(extract_message_text(&json!({})), "");
    }

    #[test]
    fn dryrun_is_deterministic() -> anyhow::Result<()> {
        let first = DryrunProvider.complete(&request())?;
        let second = DryrunProvider.complete(&request())?;
        assert_eq!(first.text, second.text);
        assert!(first.text.starts_with("## Dry Run Analysis"));
        assert!(first.text.contains("`image/png`"));

        let mut other = request();
        other.system.push_str(" changed");
        assert_ne!(DryrunProvider.complete(&other)?.text, first.text);
        Ok(())
    }
}
