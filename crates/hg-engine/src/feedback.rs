use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use hg_contracts::session::{FeedbackRecord, FeedbackWriter};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::FeedbackConfig;
use crate::gateway::GatewayReply;
use crate::{error_chain_text, response_json_or_error};

/// Table-per-record store reached over HTTP (Airtable-compatible).
pub struct RemoteFeedbackStore {
    endpoint: Url,
    api_key: String,
    http: HttpClient,
}

impl RemoteFeedbackStore {
    pub fn new(
        api_base: &str,
        base_id: &str,
        table: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut endpoint =
            Url::parse(api_base).with_context(|| format!("invalid feedback api base {api_base}"))?;
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow!("feedback api base cannot carry a path: {api_base}"))?
            .pop_if_empty()
            .push(base_id)
            .push(table);
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build feedback http client")?;
        Ok(Self {
            endpoint,
            api_key: api_key.to_string(),
            http,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn record_fields(record: &FeedbackRecord) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(rating) = record.rating {
            fields.insert("Rating".to_string(), json!(rating));
        }
        let text = |value: &Option<String>| json!(value.clone().unwrap_or_default());
        fields.insert("Comment".to_string(), text(&record.comment));
        fields.insert("Mode".to_string(), text(&record.mode_id));
        fields.insert("Prompt".to_string(), text(&record.prompt_id));
        fields.insert("SubMode".to_string(), text(&record.submode_id));
        fields.insert("SessionID".to_string(), json!(record.session_id));
        fields.insert("Timestamp".to_string(), json!(record.timestamp));
        fields
    }

    pub fn submit(&self, record: &FeedbackRecord) -> Result<()> {
        let payload = json!({
            "records": [{ "fields": Self::record_fields(record) }],
        });
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .context("feedback request failed")?;
        response_json_or_error("feedback store", response)?;
        Ok(())
    }
}

/// What happened to one submission. The caller is always told it succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackAck {
    pub delivered_remote: bool,
    pub journaled: bool,
}

/// Best-effort feedback sink: remote store, local journal, log.
pub struct FeedbackChannel {
    remote: Option<RemoteFeedbackStore>,
    journal: Option<FeedbackWriter>,
}

impl FeedbackChannel {
    pub fn new(remote: Option<RemoteFeedbackStore>, journal: Option<FeedbackWriter>) -> Self {
        Self { remote, journal }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn from_config(config: &FeedbackConfig) -> Self {
        let remote = match (&config.api_key, &config.base_id) {
            (Some(api_key), Some(base_id)) => match RemoteFeedbackStore::new(
                &config.api_base,
                base_id,
                &config.table,
                api_key,
                config.timeout,
            ) {
                Ok(store) => Some(store),
                Err(err) => {
                    log::warn!(
                        "feedback store disabled: {}",
                        error_chain_text(&err, 512)
                    );
                    None
                }
            },
            _ => None,
        };
        let journal = config.journal_path.clone().map(FeedbackWriter::new);
        Self::new(remote, journal)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn submit(&self, record: &FeedbackRecord) -> FeedbackAck {
        let mut ack = FeedbackAck::default();
        log::info!(
            "feedback session={} rating={} mode={} prompt={} comment_chars={}",
            record.session_id,
            record
                .rating
                .map(|rating| rating.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.mode_id.as_deref().unwrap_or("-"),
            record.prompt_id.as_deref().unwrap_or("-"),
            record
                .comment
                .as_deref()
                .map(|comment| comment.chars().count())
                .unwrap_or_default(),
        );
        if !record.has_content() {
            log::debug!("feedback without rating or comment; nothing to deliver");
            return ack;
        }

        if let Some(journal) = &self.journal {
            match journal.record(record) {
                Ok(_) => ack.journaled = true,
                Err(err) => log::warn!(
                    "feedback journal write failed: {}",
                    error_chain_text(&err, 512)
                ),
            }
        }

        match &self.remote {
            Some(remote) => match remote.submit(record) {
                Ok(()) => ack.delivered_remote = true,
                Err(err) => log::warn!(
                    "feedback delivery failed: {}",
                    error_chain_text(&err, 512)
                ),
            },
            None => log::debug!("feedback store not configured; skipping remote delivery"),
        }
        ack
    }

    /// JSON handler behind `POST /api/submit-feedback`. Always 200.
    pub fn handle_submit(&self, body: &Value) -> GatewayReply {
        match FeedbackBody::deserialize(body) {
            Ok(parsed) => {
                self.submit(&parsed.into_record());
            }
            Err(err) => log::warn!("ignoring malformed feedback body: {err}"),
        }
        GatewayReply::ok(json!({ "success": true }))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FeedbackBody {
    rating: Option<Value>,
    comment: Option<String>,
    mode_id: Option<String>,
    prompt_id: Option<String>,
    submode_id: Option<String>,
    session_id: Option<String>,
}

impl FeedbackBody {
    fn into_record(self) -> FeedbackRecord {
        let rating = match &self.rating {
            Some(Value::Number(number)) => number.as_i64(),
            Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
            _ => None,
        };
        let mut record = FeedbackRecord::new(
            self.session_id.unwrap_or_default(),
            rating,
            self.comment.as_deref(),
        );
        record.mode_id = self.mode_id;
        record.prompt_id = self.prompt_id;
        record.submode_id = self.submode_id;
        record
    }
}
