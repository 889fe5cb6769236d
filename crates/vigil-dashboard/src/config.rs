use crate::poller::{PollSchedule, ALERT_POLL_MS, DASHBOARD_ALERT_LIMIT, DETECTION_POLL_MS};
use crate::session::{ReconnectPolicy, SessionConfig};
use clap::Parser;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use vigil_core::api::{stream_url_for, ApiError, DEFAULT_API_URL};

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

#[derive(Parser, Debug, Clone)]
#[command(name = "vigil-dashboard", about = "Live detection dashboard")]
pub struct Args {
    /// Backend base url (env VIGIL_API_URL)
    #[arg(long, default_value = "")]
    pub api_url: String,
    /// Push channel url; derived from the api url when empty (env VIGIL_STREAM_URL)
    #[arg(long, default_value = "")]
    pub stream_url: String,
    #[arg(long, default_value_t = DETECTION_POLL_MS)]
    pub detection_interval_ms: u64,
    #[arg(long, default_value_t = ALERT_POLL_MS)]
    pub alert_interval_ms: u64,
    #[arg(long, default_value_t = DASHBOARD_ALERT_LIMIT)]
    pub alert_limit: u32,
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,
    /// Reopen the push channel after it drops (env VIGIL_RECONNECT)
    #[arg(long, default_value_t = false)]
    pub reconnect: bool,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub api_url: Url,
    pub request_timeout: Duration,
    pub session: SessionConfig,
    pub log_stdout: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field} '{value}': {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        source: url::ParseError,
    },
    #[error("cannot derive stream url: {0}")]
    Stream(#[from] ApiError),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

pub fn load_config() -> Result<DashboardConfig, ConfigError> {
    resolve_config(Args::parse(), |key| std::env::var(key).ok())
}

/// Builds the config from parsed flags, falling back to `env` for anything
/// left empty on the command line.
pub fn resolve_config<E>(args: Args, env: E) -> Result<DashboardConfig, ConfigError>
where
    E: Fn(&str) -> Option<String>,
{
    let api_raw = non_empty(&args.api_url)
        .or_else(|| env("VIGIL_API_URL").and_then(|value| non_empty(&value)))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let api_url = parse_url("api url", &api_raw)?;

    let stream_url = match non_empty(&args.stream_url)
        .or_else(|| env("VIGIL_STREAM_URL").and_then(|value| non_empty(&value)))
    {
        Some(raw) => parse_url("stream url", &raw)?,
        None => stream_url_for(&api_url)?,
    };

    if args.detection_interval_ms == 0 {
        return Err(ConfigError::Zero("detection interval"));
    }
    if args.alert_interval_ms == 0 {
        return Err(ConfigError::Zero("alert interval"));
    }
    if args.alert_limit == 0 {
        return Err(ConfigError::Zero("alert limit"));
    }
    if args.request_timeout_ms == 0 {
        return Err(ConfigError::Zero("request timeout"));
    }

    let reconnect = args.reconnect
        || env("VIGIL_RECONNECT")
            .and_then(|value| parse_bool_flag(&value))
            .unwrap_or(false);
    let log_stdout = env("VIGIL_LOG_STDOUT")
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false);

    Ok(DashboardConfig {
        api_url,
        request_timeout: Duration::from_millis(args.request_timeout_ms),
        session: SessionConfig {
            stream_url,
            schedule: PollSchedule {
                detection_interval: Duration::from_millis(args.detection_interval_ms),
                alert_interval: Duration::from_millis(args.alert_interval_ms),
                alert_limit: args.alert_limit,
            },
            reconnect: reconnect.then(ReconnectPolicy::default),
        },
        log_stdout,
    })
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })
}
