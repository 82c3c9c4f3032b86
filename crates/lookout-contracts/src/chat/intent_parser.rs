use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SLOT_COMMANDS};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: impl Into<String>) -> Self {
        self.command_args
            .insert(key.to_string(), Value::String(value.into()));
        self
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args.get(key).and_then(Value::as_str)
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
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

// Unquoted paths with spaces come back as several words; glue them back.
fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Turns one session input line into an intent.
///
/// Slash commands map through the command registry. Any other non-empty line
/// is read as an image path (or `data:` URL) dropped into the session, which
/// fills the next empty slot.
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
        let rest = &slash_tail[command_len..];
        // "/tmp/cat.png" is an absolute path, not a command.
        if command_len > 0 && (rest.is_empty() || rest.starts_with(char::is_whitespace)) {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = rest.trim();

            if let Some(action) = find_action(&command, SLOT_COMMANDS) {
                return Intent::new(action, text)
                    .with_arg("slot", command.as_str())
                    .with_arg("path", parse_single_path_arg(arg));
            }

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let key = match action {
                    "set_mode" => "mode",
                    "remove_image" => "slot",
                    _ => "model",
                };
                return Intent::new(action, text).with_arg(key, arg.to_ascii_lowercase());
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            return Intent::new("unknown", text)
                .with_arg("command", command.as_str())
                .with_arg("arg", arg);
        }
    }

    Intent::new("add_image", text).with_arg("path", parse_single_path_arg(raw_trimmed))
}
