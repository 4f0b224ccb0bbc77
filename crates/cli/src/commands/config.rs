use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use intake_core::{IntakeConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match IntakeConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    let source = |key_path: &str, env_key: Option<&str>| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    lines.push(render_line(
        "safety.risk_keywords",
        &format!("{} keyword(s)", config.safety.risk_keywords.len()),
        source("safety.risk_keywords", None),
    ));
    lines.push(render_line(
        "safety.escalation_message",
        &preview(&config.safety.escalation_message),
        source("safety.escalation_message", None),
    ));
    for (intent, fields) in &config.intents.required_fields {
        lines.push(render_line(
            &format!("intents.required_fields.{}", intent.as_str()),
            &format!("[{}]", fields.join(", ")),
            source("intents.required_fields", None),
        ));
    }
    lines.push(render_line(
        "limits.default_call_ceiling",
        &config.limits.default_call_ceiling.to_string(),
        source("limits.default_call_ceiling", Some("INTAKE_DEFAULT_CALL_CEILING")),
    ));
    lines.push(render_line(
        "limits.retry_max_attempts",
        &config.limits.retry_max_attempts.to_string(),
        source("limits.retry_max_attempts", Some("INTAKE_RETRY_MAX_ATTEMPTS")),
    ));
    lines.push(render_line(
        "masking.patterns",
        &format!("{} pattern(s)", config.masking.patterns.len()),
        source("masking.patterns", None),
    ));
    lines.push(render_line(
        "masking.marker",
        &config.masking.marker,
        source("masking.marker", None),
    ));
    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", Some("INTAKE_LOG_LEVEL")),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", Some("INTAKE_LOG_FORMAT")),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("intake.toml");
    if root.exists() {
        return Some(root);
    }
    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn preview(text: &str) -> String {
    const MAX: usize = 48;
    let trimmed = text.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let cut = trimmed
        .char_indices()
        .take_while(|(index, _)| *index < MAX)
        .last()
        .map(|(index, character)| index + character.len_utf8())
        .unwrap_or(MAX);
    format!("{}...", &trimmed[..cut])
}
