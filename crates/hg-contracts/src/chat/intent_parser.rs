use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, EXPORT_COMMAND, KEYED_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS,
    SINGLE_PATH_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_spec<'a>(command: &str, specs: &'a [CommandSpec]) -> Option<&'a CommandSpec> {
    specs.iter().find(|spec| spec.command == command)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Splits `key rest of line` into the key and the trimmed remainder.
fn split_keyed_arg(arg: &str) -> (String, String) {
    let trimmed = arg.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((key, rest)) => (key.to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

fn parse_rating(raw: &str) -> Value {
    raw.trim()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or(Value::Null)
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
                return Intent::new(spec.action, text)
                    .with_arg(spec.arg_key, Value::String(arg.to_string()));
            }

            if let Some(spec) = find_spec(&command, SINGLE_PATH_COMMANDS) {
                return Intent::new(spec.action, text)
                    .with_arg(spec.arg_key, Value::String(parse_single_path_arg(arg)));
            }

            if let Some((spec, rest_key)) = KEYED_COMMANDS
                .iter()
                .find(|(spec, _)| spec.command == command)
            {
                let (key, rest) = split_keyed_arg(arg);
                let key_value = if spec.action == "feedback" {
                    parse_rating(&key)
                } else {
                    Value::String(key)
                };
                return Intent::new(spec.action, text)
                    .with_arg(spec.arg_key, key_value)
                    .with_arg(rest_key, Value::String(rest));
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action, text);
            }

            if command == EXPORT_COMMAND.command {
                let parts = parse_path_args(arg);
                let format = parts
                    .first()
                    .map(|value| value.to_ascii_lowercase())
                    .unwrap_or_else(|| "md".to_string());
                let path = parts.get(1).cloned().map(Value::String).unwrap_or(Value::Null);
                return Intent::new(EXPORT_COMMAND.action, text)
                    .with_arg(EXPORT_COMMAND.arg_key, Value::String(format))
                    .with_arg("path", path);
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    let mut intent = Intent::new("ask", text)
        .with_arg("question", Value::String(raw_trimmed.to_string()));
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_image_with_quoted_path() {
        let intent = parse_intent("/image \"/tmp/my scan.png\"");
        assert_eq!(intent.action, "load_image");
        assert_eq!(intent.command_args["path"], json!("/tmp/my scan.png"));
    }

    #[test]
    fn parse_raw_argument_commands() {
        let mode = parse_intent("/mode fine-art-comprehensive");
        assert_eq!(mode.action, "set_mode");
        assert_eq!(mode.arg_str("mode"), Some("fine-art-comprehensive"));

        let custom = parse_intent("/custom  Focus on the edges, please.  ");
        assert_eq!(custom.action, "set_custom");
        assert_eq!(custom.arg_str("text"), Some("Focus on the edges, please."));

        let ask = parse_intent("/ask Why does the corner feel heavy?");
        assert_eq!(ask.action, "ask");
        assert_eq!(ask.arg_str("question"), Some("Why does the corner feel heavy?"));
    }

    #[test]
    fn parse_keyed_commands() {
        let field = parse_intent("/field artist-statement About  tides and  memory");
        assert_eq!(field.action, "set_field");
        assert_eq!(field.command_args["field"], json!("artist-statement"));
        assert_eq!(field.command_args["value"], json!("About  tides and  memory"));

        let lens = parse_intent("/lens lens-stated-intent A study of flood memory.");
        assert_eq!(lens.action, "apply_lens");
        assert_eq!(lens.command_args["lens"], json!("lens-stated-intent"));
        assert_eq!(lens.command_args["intent"], json!("A study of flood memory."));

        let bare_lens = parse_intent("/lens lens-ooo");
        assert_eq!(bare_lens.command_args["intent"], json!(""));
        assert_eq!(bare_lens.arg_str("intent"), None);
    }

    #[test]
    fn parse_feedback_rating() {
        let feedback = parse_intent("/feedback 4 very precise");
        assert_eq!(feedback.action, "feedback");
        assert_eq!(feedback.command_args["rating"], json!(4));
        assert_eq!(feedback.command_args["comment"], json!("very precise"));

        let unrated = parse_intent("/feedback - just a note");
        assert_eq!(unrated.command_args["rating"], json!(null));
    }

    #[test]
    fn parse_export_defaults_to_markdown() {
        let bare = parse_intent("/export");
        assert_eq!(bare.command_args["format"], json!("md"));
        assert_eq!(bare.command_args["path"], json!(null));

        let html = parse_intent("/export HTML \"/tmp/out dir/report.html\"");
        assert_eq!(html.command_args["format"], json!("html"));
        assert_eq!(html.command_args["path"], json!("/tmp/out dir/report.html"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/analyze").action, "analyze");
        assert_eq!(parse_intent("/new").action, "new_artwork");
        assert_eq!(parse_intent("/exit").action, "quit");
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn plain_text_is_a_question() {
        let intent = parse_intent("What holds the left edge?");
        assert_eq!(intent.action, "ask");
        assert_eq!(intent.prompt.as_deref(), Some("What holds the left edge?"));
        assert_eq!(intent.arg_str("question"), Some("What holds the left edge?"));
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
