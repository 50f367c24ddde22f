use std::str::FromStr;
use std::time::Duration;

use aura_batch::backend::UploadMode;
use aura_client::api::ExportMode;
use aura_client::reconnect::ReconnectPolicy;

const DEFAULT_API_URL: &str = "http://127.0.0.1:47821";
const WS_PATH: &str = "/ws/progress";

/// A malformed environment variable.
#[derive(Debug, thiserror::Error)]
#[error("{var}={value:?} is invalid: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Runner configuration loaded from environment variables.
///
/// Every field has a default matching a local AuraTranscribe server.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Base URL of the HTTP API.
    pub api_url: String,
    /// WebSocket endpoint of the event stream.
    pub ws_url: String,
    pub reconnect: ReconnectPolicy,
    /// Pause between separate-mode export steps.
    pub export_step_delay: Duration,
    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,
    pub export_mode: ExportMode,
    pub upload_mode: UploadMode,
    /// Print every transcript to stdout after the export.
    pub print_transcripts: bool,
}

impl RunnerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                              |
    /// |--------------------------|--------------------------------------|
    /// | `AURA_API_URL`           | `http://127.0.0.1:47821`             |
    /// | `AURA_WS_URL`            | `ws://<api host>/ws/progress`        |
    /// | `RECONNECT_DELAY_MS`     | `2000`                               |
    /// | `MAX_RECONNECT_ATTEMPTS` | `5`                                  |
    /// | `EXPORT_STEP_DELAY_MS`   | `400`                                |
    /// | `REQUEST_TIMEOUT_SECS`   | `30`                                 |
    /// | `EXPORT_MODE`            | `merged` (`merged` or `separate`)    |
    /// | `UPLOAD_BY_PATH`         | `false`                              |
    /// | `PRINT_TRANSCRIPTS`      | `false`                              |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let api_url = get("AURA_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();

        let ws_url = match get("AURA_WS_URL") {
            Some(url) => url.trim().to_string(),
            None => derive_ws_url(&api_url).ok_or_else(|| ConfigError {
                var: "AURA_API_URL",
                value: api_url.clone(),
                reason: "expected an http:// or https:// URL".into(),
            })?,
        };

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            delay: Duration::from_millis(parse_or(
                &get,
                "RECONNECT_DELAY_MS",
                defaults.delay.as_millis() as u64,
            )?),
            max_attempts: parse_or(&get, "MAX_RECONNECT_ATTEMPTS", defaults.max_attempts)?,
        };

        let export_step_delay = Duration::from_millis(parse_or(&get, "EXPORT_STEP_DELAY_MS", 400)?);
        let request_timeout = Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 30)?);
        let export_mode = parse_or(&get, "EXPORT_MODE", ExportMode::Merged)?;

        let upload_mode = if parse_bool(&get, "UPLOAD_BY_PATH")? {
            UploadMode::Paths
        } else {
            UploadMode::Multipart
        };
        let print_transcripts = parse_bool(&get, "PRINT_TRANSCRIPTS")?;

        Ok(Self {
            api_url,
            ws_url,
            reconnect,
            export_step_delay,
            request_timeout,
            export_mode,
            upload_mode,
            print_transcripts,
        })
    }
}

/// `http://host:port/...` becomes `ws://host:port/ws/progress`
/// (`https` maps to `wss`).
pub fn derive_ws_url(api_url: &str) -> Option<String> {
    let (scheme, rest) = if let Some(rest) = api_url.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        ("ws", rest)
    } else {
        return None;
    };
    let host = rest.split('/').next().filter(|h| !h.is_empty())?;
    Some(format!("{scheme}://{host}{WS_PATH}"))
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_bool<G>(get: &G, var: &'static str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(value) = get(var) else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            var,
            value,
            reason: "expected true or false".into(),
        }),
    }
}
