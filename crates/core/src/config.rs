use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::masking::{self, PiiMasker};
use crate::state::Intent;

const DEFAULT_CONFIG_FILE: &str = "intake.toml";

const ENV_LOG_LEVEL: &str = "INTAKE_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "INTAKE_LOG_FORMAT";
const ENV_RETRY_MAX_ATTEMPTS: &str = "INTAKE_RETRY_MAX_ATTEMPTS";
const ENV_DEFAULT_CALL_CEILING: &str = "INTAKE_DEFAULT_CALL_CEILING";

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Process-wide configuration, read-only after [`IntakeConfig::load`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntakeConfig {
    pub safety: SafetyConfig,
    pub intents: IntentRules,
    pub limits: LimitConfig,
    pub masking: MaskingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Lowercase keywords that mark a request as a potential emergency.
    pub risk_keywords: Vec<String>,
    /// Canned response released on the escalation path.
    pub escalation_message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentRules {
    pub required_fields: BTreeMap<Intent, Vec<String>>,
}

impl IntentRules {
    pub fn required_for(&self, intent: Intent) -> &[String] {
        self.required_fields.get(&intent).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Ceiling applied to nodes without an entry in `call_ceilings`.
    pub default_call_ceiling: u32,
    pub call_ceilings: BTreeMap<String, u32>,
    pub retry_max_attempts: u32,
}

impl LimitConfig {
    pub fn ceiling_for(&self, node: &str) -> u32 {
        self.call_ceilings.get(node).copied().unwrap_or(self.default_call_ceiling)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaskingConfig {
    pub patterns: Vec<String>,
    pub marker: String,
}

impl MaskingConfig {
    pub fn build_masker(&self) -> Result<PiiMasker, masking::MaskingError> {
        PiiMasker::new(&self.patterns, &self.marker)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Programmatic overrides applied after file and environment values.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub retry_max_attempts: Option<u32>,
    pub default_call_ceiling: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for IntakeConfig {
    fn default() -> Self {
        let mut required_fields = BTreeMap::new();
        required_fields.insert(Intent::Reschedule, vec!["appointment_id".to_owned()]);
        required_fields.insert(Intent::Cancel, vec!["appointment_id".to_owned()]);
        required_fields.insert(Intent::PrepInfo, Vec::new());
        required_fields.insert(Intent::Unknown, vec!["request_details".to_owned()]);

        Self {
            safety: SafetyConfig {
                risk_keywords: [
                    "chest pain",
                    "shortness of breath",
                    "difficulty breathing",
                    "unconscious",
                    "severe bleeding",
                    "stroke",
                    "suicidal",
                    "kill myself",
                    "overdose",
                    "emergency",
                ]
                .into_iter()
                .map(str::to_owned)
                .collect(),
                escalation_message: "Your message suggests a potential emergency. \
                     Please call local emergency services immediately or go to the nearest \
                     emergency department. If possible, contact the clinic afterward to \
                     update your appointment."
                    .to_owned(),
            },
            intents: IntentRules { required_fields },
            limits: LimitConfig {
                default_call_ceiling: 5,
                call_ceilings: BTreeMap::new(),
                retry_max_attempts: 3,
            },
            masking: MaskingConfig {
                patterns: masking::default_patterns(),
                marker: masking::REDACTION_MARKER.to_owned(),
            },
            logging: LoggingConfig { level: "info".to_owned(), format: LogFormat::Compact },
        }
    }
}

impl IntakeConfig {
    /// Loads configuration: defaults, then the TOML file (with `${VAR}`
    /// interpolation), then environment overrides, then programmatic
    /// overrides. The result is validated before it is returned; the process
    /// never starts with an invalid configuration.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = options.config_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if path.exists() {
            config.merge_file(&path)?;
        } else if options.require_file || options.config_path.is_some() {
            return Err(ConfigError::MissingConfigFile(path));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(&options.overrides);
        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
        let interpolated = interpolate_env(&raw)?;
        let parsed: RawConfig = toml::from_str(&interpolated)
            .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })?;

        if let Some(safety) = parsed.safety {
            if let Some(keywords) = safety.risk_keywords {
                self.safety.risk_keywords = keywords;
            }
            if let Some(message) = safety.escalation_message {
                self.safety.escalation_message = message;
            }
        }
        if let Some(intents) = parsed.intents {
            if let Some(required) = intents.required_fields {
                self.intents.required_fields = required;
            }
        }
        if let Some(limits) = parsed.limits {
            if let Some(ceiling) = limits.default_call_ceiling {
                self.limits.default_call_ceiling = ceiling;
            }
            if let Some(ceilings) = limits.call_ceilings {
                self.limits.call_ceilings = ceilings;
            }
            if let Some(attempts) = limits.retry_max_attempts {
                self.limits.retry_max_attempts = attempts;
            }
        }
        if let Some(masking) = parsed.masking {
            if let Some(patterns) = masking.patterns {
                self.masking.patterns = patterns;
            }
            if let Some(marker) = masking.marker {
                self.masking.marker = marker;
            }
        }
        if let Some(logging) = parsed.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Ok(format) = env::var(ENV_LOG_FORMAT) {
            self.logging.format = match format.as_str() {
                "compact" => LogFormat::Compact,
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::InvalidEnvOverride {
                        key: ENV_LOG_FORMAT.to_owned(),
                        value: format,
                    })
                }
            };
        }
        if let Ok(attempts) = env::var(ENV_RETRY_MAX_ATTEMPTS) {
            self.limits.retry_max_attempts =
                attempts.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                    key: ENV_RETRY_MAX_ATTEMPTS.to_owned(),
                    value: attempts,
                })?;
        }
        if let Ok(ceiling) = env::var(ENV_DEFAULT_CALL_CEILING) {
            self.limits.default_call_ceiling =
                ceiling.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                    key: ENV_DEFAULT_CALL_CEILING.to_owned(),
                    value: ceiling,
                })?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
        if let Some(attempts) = overrides.retry_max_attempts {
            self.limits.retry_max_attempts = attempts;
        }
        if let Some(ceiling) = overrides.default_call_ceiling {
            self.limits.default_call_ceiling = ceiling;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.safety.risk_keywords.is_empty() {
            return Err(ConfigError::Validation("safety.risk_keywords must not be empty".into()));
        }
        if self.safety.escalation_message.trim().is_empty() {
            return Err(ConfigError::Validation(
                "safety.escalation_message must not be empty".into(),
            ));
        }
        if self.limits.retry_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "limits.retry_max_attempts must be at least 1".into(),
            ));
        }
        if self.limits.default_call_ceiling == 0 {
            return Err(ConfigError::Validation(
                "limits.default_call_ceiling must be at least 1".into(),
            ));
        }
        if let Some((node, _)) = self.limits.call_ceilings.iter().find(|(_, c)| **c == 0) {
            return Err(ConfigError::Validation(format!(
                "limits.call_ceilings.{node} must be at least 1"
            )));
        }
        self.masking
            .build_masker()
            .map_err(|error| ConfigError::Validation(error.to_string()))?;
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {VALID_LOG_LEVELS:?}, got `{}`",
                self.logging.level
            )));
        }
        Ok(())
    }
}

/// Replaces `${VAR}` expressions with environment values before parsing.
fn interpolate_env(raw: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &after[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_owned() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    safety: Option<RawSafety>,
    intents: Option<RawIntents>,
    limits: Option<RawLimits>,
    masking: Option<RawMasking>,
    logging: Option<RawLogging>,
}

#[derive(Debug, Deserialize)]
struct RawSafety {
    risk_keywords: Option<Vec<String>>,
    escalation_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIntents {
    required_fields: Option<BTreeMap<Intent, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct RawLimits {
    default_call_ceiling: Option<u32>,
    call_ceilings: Option<BTreeMap<String, u32>>,
    retry_max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawMasking {
    patterns: Option<Vec<String>>,
    marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLogging {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{ConfigError, ConfigOverrides, IntakeConfig, LoadOptions, LogFormat};
    use crate::state::Intent;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn defaults_pass_validation() {
        let config = IntakeConfig::load(LoadOptions::default()).expect("defaults load");
        assert_eq!(config.limits.retry_max_attempts, 3);
        assert_eq!(config.limits.ceiling_for("draft"), 5);
        assert_eq!(config.intents.required_for(Intent::Cancel), ["appointment_id"]);
        assert!(config.intents.required_for(Intent::PrepInfo).is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let file = write_config(
            r#"
[limits]
retry_max_attempts = 2
default_call_ceiling = 9

[limits.call_ceilings]
hitl = 1

[logging]
level = "debug"
format = "json"

[intents.required_fields]
RESCHEDULE = ["appointment_id", "preferred_slot"]
"#,
        );

        let config = IntakeConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            ..LoadOptions::default()
        })
        .expect("file config loads");

        assert_eq!(config.limits.retry_max_attempts, 2);
        assert_eq!(config.limits.ceiling_for("hitl"), 1);
        assert_eq!(config.limits.ceiling_for("draft"), 9);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.intents.required_for(Intent::Reschedule),
            ["appointment_id", "preferred_slot"]
        );
        // Untouched sections keep their defaults.
        assert!(!config.safety.risk_keywords.is_empty());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let error = IntakeConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            ..LoadOptions::default()
        })
        .expect_err("missing file must fail");

        assert!(matches!(error, ConfigError::MissingConfigFile(_)));
    }

    #[test]
    fn programmatic_overrides_win() {
        let config = IntakeConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                retry_max_attempts: Some(1),
                log_level: Some("warn".to_owned()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("overrides load");

        assert_eq!(config.limits.retry_max_attempts, 1);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn zero_retry_attempts_fail_validation() {
        let error = IntakeConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                retry_max_attempts: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect_err("zero attempts invalid");

        assert!(matches!(error, ConfigError::Validation(_)));
    }

    #[test]
    fn invalid_masking_pattern_fails_validation() {
        let file = write_config(
            r#"
[masking]
patterns = ["[unclosed"]
"#,
        );

        let error = IntakeConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            ..LoadOptions::default()
        })
        .expect_err("bad pattern invalid");

        assert!(matches!(error, ConfigError::Validation(_)));
    }

    #[test]
    fn env_interpolation_resolves_variables() {
        std::env::set_var("INTAKE_TEST_MARKER_7Q", "[redacted]");
        let file = write_config(
            r#"
[masking]
marker = "${INTAKE_TEST_MARKER_7Q}"
"#,
        );

        let config = IntakeConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            ..LoadOptions::default()
        })
        .expect("interpolated config loads");

        assert_eq!(config.masking.marker, "[redacted]");
    }

    #[test]
    fn unterminated_interpolation_is_rejected() {
        let file = write_config(
            r#"
[masking]
marker = "${INTAKE_NEVER_CLOSED"
"#,
        );

        let error = IntakeConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            ..LoadOptions::default()
        })
        .expect_err("unterminated interpolation must fail");

        assert!(matches!(error, ConfigError::UnterminatedInterpolation));
    }
}
