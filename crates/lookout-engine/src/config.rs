use std::env;
use std::time::Duration;

use lookout_contracts::models::DEFAULT_VISION_MODEL;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
const MIN_REQUEST_TIMEOUT_S: f64 = 5.0;
const MAX_REQUEST_TIMEOUT_S: f64 = 300.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            model: DEFAULT_VISION_MODEL.to_string(),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        Self {
            api_key: lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")),
            api_base: lookup("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_base),
            model: lookup("LOOKOUT_VISION_MODEL").unwrap_or(defaults.model),
            request_timeout: timeout_from(lookup("LOOKOUT_REQUEST_TIMEOUT").as_deref()),
        }
    }

    pub fn with_model(mut self, model: Option<&str>) -> Self {
        if let Some(model) = model.map(str::trim).filter(|value| !value.is_empty()) {
            self.model = model.to_string();
        }
        self
    }
}

fn timeout_from(raw: Option<&str>) -> Duration {
    let seconds = raw
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
        .clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S);
    Duration::from_secs_f64(seconds)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{EngineConfig, DEFAULT_GEMINI_API_BASE};

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.api_base, DEFAULT_GEMINI_API_BASE);
        assert_eq!(config.model, "gemini-2.0-flash");
        assert_eq!(config.request_timeout, Duration::from_secs(90));
    }

    #[test]
    fn google_key_is_the_fallback_credential() {
        let config = config_from(&[("GEMINI_API_KEY", "  "), ("GOOGLE_API_KEY", "g-key")]);
        assert_eq!(config.api_key.as_deref(), Some("g-key"));

        let config = config_from(&[("GEMINI_API_KEY", "gem"), ("GOOGLE_API_KEY", "g-key")]);
        assert_eq!(config.api_key.as_deref(), Some("gem"));
    }

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let config = config_from(&[("GEMINI_API_BASE", "http://localhost:9000/v1beta/")]);
        assert_eq!(config.api_base, "http://localhost:9000/v1beta");
    }

    #[test]
    fn timeout_is_clamped() {
        assert_eq!(
            config_from(&[("LOOKOUT_REQUEST_TIMEOUT", "1")]).request_timeout,
            Duration::from_secs(5)
        );
        assert_eq!(
            config_from(&[("LOOKOUT_REQUEST_TIMEOUT", "9000")]).request_timeout,
            Duration::from_secs(300)
        );
        assert_eq!(
            config_from(&[("LOOKOUT_REQUEST_TIMEOUT", "soon")]).request_timeout,
            Duration::from_secs(90)
        );
    }

    #[test]
    fn explicit_model_overrides_environment() {
        let config = config_from(&[("LOOKOUT_VISION_MODEL", "gemini-1.5-pro")]);
        assert_eq!(config.model, "gemini-1.5-pro");
        let config = config.with_model(Some("dryrun-vision-1"));
        assert_eq!(config.model, "dryrun-vision-1");
        let config = config.with_model(Some(" "));
        assert_eq!(config.model, "dryrun-vision-1");
    }
}
