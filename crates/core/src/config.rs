use crate::emotion::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};
use url::Url;

pub const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:5000/classify";
pub const DEFAULT_FURHAT_URL: &str = "http://127.0.0.1:54321";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_FURHAT_VOICE: &str = "Joanna";
pub const DEFAULT_FURHAT_CHARACTER: &str = "Isabel";
pub const DEFAULT_FURHAT_MASK: &str = "Adult";
pub const DEFAULT_LISTEN_LANGUAGE: &str = "en-US";

pub const DEFAULT_GENERATION_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_LISTEN_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_SPEAK_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CLASSIFY_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 100;
pub const DEFAULT_STOP_GRACE_MS: u64 = 3_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_HISTORY_TURNS: usize = 8;

pub const DEFAULT_FALLBACK_REPLY: &str = "I'm here with you. Tell me what's on your mind.";

pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_CAMERA_URL: &str = "EMOCONNECT_CAMERA_URL";
pub const ENV_CLASSIFIER_URL: &str = "EMOCONNECT_CLASSIFIER_URL";
pub const ENV_FURHAT_URL: &str = "FURHAT_URL";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(**redacted**)")
    }
}

/// An absolute http(s) URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint(Url);

impl Endpoint {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(value.trim()).map_err(|e| ConfigError::InvalidUrl {
            value: value.to_owned(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                value: value.to_owned(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }
        Ok(Self(url))
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Appends `segments` to the path, keeping any base path (`/v1beta`).
    pub fn join_path(&self, segments: &[&str]) -> Url {
        let mut url = self.0.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraSource {
    Snapshot(Endpoint),
    Directory(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FurhatConfig {
    pub url: Endpoint,
    pub voice: Option<String>,
    pub character: Option<String>,
    pub mask: Option<String>,
    pub language: String,
    /// Bounds each request made while connecting.
    pub connect_timeout: Duration,
}

impl FurhatConfig {
    pub fn new(url: Endpoint) -> Self {
        Self {
            url,
            voice: Some(DEFAULT_FURHAT_VOICE.to_owned()),
            character: Some(DEFAULT_FURHAT_CHARACTER.to_owned()),
            mask: Some(DEFAULT_FURHAT_MASK.to_owned()),
            language: DEFAULT_LISTEN_LANGUAGE.to_owned(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RobotTarget {
    Furhat(FurhatConfig),
    Console,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeneratorTarget {
    Gemini {
        api_key: ApiKey,
        model: String,
        base_url: Endpoint,
        /// Exchanges kept as context within one session.
        history_turns: usize,
    },
    /// Canned per-emotion replies; no network.
    Offline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub generation: Duration,
    pub listen: Duration,
    pub speak: Duration,
    pub classify: Duration,
    /// Camera acquisition and robot connection at Start.
    pub connect: Duration,
    /// Guessing the emotion from the user's words.
    pub inference: Duration,
    pub stop_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            generation: Duration::from_millis(DEFAULT_GENERATION_TIMEOUT_MS),
            listen: Duration::from_millis(DEFAULT_LISTEN_TIMEOUT_MS),
            speak: Duration::from_millis(DEFAULT_SPEAK_TIMEOUT_MS),
            classify: Duration::from_millis(DEFAULT_CLASSIFY_TIMEOUT_MS),
            connect: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            inference: Duration::from_millis(DEFAULT_INFERENCE_TIMEOUT_MS),
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub camera: CameraSource,
    pub classifier_url: Endpoint,
    pub robot: RobotTarget,
    pub generator: GeneratorTarget,
    pub tracker: TrackerConfig,
    pub timeouts: Timeouts,
    pub frame_interval: Duration,
    pub fallback_reply: String,
    pub ask_name: bool,
    pub ask_to_continue: bool,
    pub infer_from_text: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("api key must not be empty")]
    EmptyApiKey,
    #[error("invalid url {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("{0} must be > 0 ms")]
    ZeroDuration(&'static str),
    #[error("invalid tracker setting: {0}")]
    InvalidTracker(String),
    #[error("fallback reply must not be empty")]
    EmptyFallbackReply,
}

pub fn nonzero_ms(name: &'static str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::ZeroDuration(name));
    }
    Ok(Duration::from_millis(ms))
}

pub fn validate_tracker(cfg: &TrackerConfig) -> Result<(), ConfigError> {
    if cfg.staleness_window.is_zero() {
        return Err(ConfigError::ZeroDuration("staleness window"));
    }
    if cfg.half_life.is_zero() {
        return Err(ConfigError::ZeroDuration("decay half-life"));
    }
    if !(cfg.smoothing > 0.0 && cfg.smoothing <= 1.0) {
        return Err(ConfigError::InvalidTracker(format!(
            "smoothing must be in (0, 1], got {}",
            cfg.smoothing
        )));
    }
    if !(0.0..=1.0).contains(&cfg.tie_epsilon) {
        return Err(ConfigError::InvalidTracker(format!(
            "tie epsilon must be in [0, 1], got {}",
            cfg.tie_epsilon
        )));
    }
    if !(0.0..=1.0).contains(&cfg.min_confidence) {
        return Err(ConfigError::InvalidTracker(format!(
            "min confidence must be in [0, 1], got {}",
            cfg.min_confidence
        )));
    }
    Ok(())
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// CLI value wins over the environment; absence of both is not an error.
pub fn resolve_api_key(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<ApiKey>, ConfigError> {
    match cli_value.or_else(|| env.var(env_key)) {
        Some(v) => Ok(Some(ApiKey::new(v)?)),
        None => Ok(None),
    }
}

pub fn resolve_endpoint(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> Result<Endpoint, ConfigError> {
    let raw = cli_value
        .or_else(|| env.var(env_key))
        .unwrap_or_else(|| default.to_owned());
    Endpoint::parse(&raw)
}

pub fn resolve_optional_endpoint(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<Endpoint>, ConfigError> {
    cli_value
        .or_else(|| env.var(env_key))
        .map(|raw| Endpoint::parse(&raw))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_cli_takes_precedence_over_env() {
        let env = MapEnv::default().with_var(ENV_GEMINI_API_KEY, "env-key");
        let key = resolve_api_key(Some("cli-key".to_owned()), ENV_GEMINI_API_KEY, &env)
            .expect("valid key")
            .expect("present");
        assert_eq!(key.expose(), "cli-key");
    }

    #[test]
    fn api_key_absent_is_not_an_error() {
        let env = MapEnv::default();
        assert_eq!(resolve_api_key(None, ENV_GEMINI_API_KEY, &env), Ok(None));
    }

    #[test]
    fn blank_api_key_is_rejected() {
        let env = MapEnv::default().with_var(ENV_GEMINI_API_KEY, "   ");
        assert_eq!(
            resolve_api_key(None, ENV_GEMINI_API_KEY, &env),
            Err(ConfigError::EmptyApiKey)
        );
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("secret").expect("valid");
        assert_eq!(format!("{key:?}"), "ApiKey(**redacted**)");
    }

    #[test]
    fn endpoint_env_used_when_cli_missing() {
        let env = MapEnv::default().with_var(ENV_FURHAT_URL, "http://robot.local:54321");
        let ep = resolve_endpoint(None, ENV_FURHAT_URL, &env, DEFAULT_FURHAT_URL).expect("valid");
        assert_eq!(ep.as_url().host_str(), Some("robot.local"));
    }

    #[test]
    fn endpoint_default_used_when_both_missing() {
        let env = MapEnv::default();
        let ep = resolve_endpoint(None, ENV_CLASSIFIER_URL, &env, DEFAULT_CLASSIFIER_URL)
            .expect("valid");
        assert_eq!(ep.as_url().as_str(), DEFAULT_CLASSIFIER_URL);
    }

    #[test]
    fn endpoint_rejects_non_http_scheme() {
        assert!(matches!(
            Endpoint::parse("ftp://camera/frame.jpg"),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(Endpoint::parse("not a url").is_err());
    }

    #[test]
    fn join_path_keeps_base_path() {
        let ep = Endpoint::parse(DEFAULT_GEMINI_BASE_URL).expect("valid");
        let url = ep.join_path(&["models", "gemini-2.5-flash-lite:generateContent"]);
        assert_eq!(
            url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-lite:generateContent"
        );
    }

    #[test]
    fn optional_endpoint_absent() {
        let env = MapEnv::default();
        assert_eq!(resolve_optional_endpoint(None, ENV_CAMERA_URL, &env), Ok(None));
    }

    #[test]
    fn tracker_validation() {
        assert_eq!(validate_tracker(&TrackerConfig::default()), Ok(()));
        let bad = TrackerConfig {
            smoothing: 0.0,
            ..TrackerConfig::default()
        };
        assert!(matches!(
            validate_tracker(&bad),
            Err(ConfigError::InvalidTracker(_))
        ));
        let zero = TrackerConfig {
            staleness_window: Duration::ZERO,
            ..TrackerConfig::default()
        };
        assert_eq!(
            validate_tracker(&zero),
            Err(ConfigError::ZeroDuration("staleness window"))
        );
    }

    #[test]
    fn zero_timeout_rejected() {
        assert_eq!(
            nonzero_ms("generation timeout", 0),
            Err(ConfigError::ZeroDuration("generation timeout"))
        );
        assert_eq!(nonzero_ms("x", 250), Ok(Duration::from_millis(250)));
    }
}
