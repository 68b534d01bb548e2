use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::state::Session;

/// One user rating of an analysis. Ratings outside 1..=5 are stored as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub rating: Option<u8>,
    pub comment: Option<String>,
    pub mode_id: Option<String>,
    pub prompt_id: Option<String>,
    pub submode_id: Option<String>,
    pub session_id: String,
    pub timestamp: String,
}

impl FeedbackRecord {
    pub fn new(session_id: impl Into<String>, rating: Option<i64>, comment: Option<&str>) -> Self {
        Self {
            rating: normalize_rating(rating),
            comment: comment
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            mode_id: None,
            prompt_id: None,
            submode_id: None,
            session_id: session_id.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Fills category, mode and sub-mode from the session's selection.
    pub fn for_session(session: &Session, rating: Option<i64>, comment: Option<&str>) -> Self {
        let mut record = Self::new(session.id(), rating, comment);
        if let Some(mode) = session.mode() {
            record.mode_id = Some(mode.category.clone());
            record.prompt_id = Some(mode.id.clone());
        }
        record.submode_id = session.submode_id().map(str::to_string);
        record
    }

    pub fn has_content(&self) -> bool {
        self.rating.is_some() || self.comment.is_some()
    }
}

pub fn normalize_rating(raw: Option<i64>) -> Option<u8> {
    match raw {
        Some(value @ 1..=5) => u8::try_from(value).ok(),
        _ => None,
    }
}

/// Append-only local journal of submitted feedback.
#[derive(Debug, Clone)]
pub struct FeedbackWriter {
    path: PathBuf,
}

impl FeedbackWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, record: &FeedbackRecord) -> anyhow::Result<Map<String, Value>> {
        let mut payload = Map::new();
        payload.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        if let Value::Object(fields) = serde_json::to_value(record)? {
            payload.extend(fields);
        }
        append_jsonl(&self.path, &payload)?;
        Ok(payload)
    }
}

fn append_jsonl(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    use std::io::Write;
    file.write_all(serde_json::to_string(payload)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{normalize_rating, FeedbackRecord, FeedbackWriter};
    use crate::modes::ModeRegistry;
    use crate::session::Session;

    #[test]
    fn zero_and_out_of_range_ratings_become_null() {
        assert_eq!(normalize_rating(Some(0)), None);
        assert_eq!(normalize_rating(Some(6)), None);
        assert_eq!(normalize_rating(Some(-2)), None);
        assert_eq!(normalize_rating(None), None);
        assert_eq!(normalize_rating(Some(4)), Some(4));
    }

    #[test]
    fn record_captures_session_selection() -> anyhow::Result<()> {
        let registry = ModeRegistry::builtin()?;
        let mut session = Session::with_id("session-9");
        if let Some(mode) = registry.get("fine-art-wip").cloned() {
            session.select_mode(mode);
        }
        session.select_submode("fine-art-sculpture")?;

        let record = FeedbackRecord::for_session(&session, Some(5), Some("  sharp  "));
        assert_eq!(record.rating, Some(5));
        assert_eq!(record.comment.as_deref(), Some("sharp"));
        assert_eq!(record.mode_id.as_deref(), Some("fine-art"));
        assert_eq!(record.prompt_id.as_deref(), Some("fine-art-wip"));
        assert_eq!(record.submode_id.as_deref(), Some("fine-art-sculpture"));
        assert_eq!(record.session_id, "session-9");
        assert!(record.has_content());

        let empty = FeedbackRecord::new("s", Some(0), Some("  "));
        assert!(!empty.has_content());
        Ok(())
    }

    #[test]
    fn feedback_writer_appends_jsonl_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("feedback.jsonl");
        let writer = FeedbackWriter::new(&path);

        let payload = writer.record(&FeedbackRecord::new("session-1", Some(3), None))?;
        assert_eq!(payload["sessionId"], Value::String("session-1".to_string()));
        assert_eq!(payload["rating"], Value::from(3));
        assert_eq!(payload["comment"], Value::Null);

        let raw = std::fs::read_to_string(path)?;
        let line = raw.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;
        assert_eq!(parsed["sessionId"], Value::String("session-1".to_string()));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
