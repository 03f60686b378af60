//! Settings read from `INPUT_*` environment variables.
//!
//! Every variable is first read as an optional string so that validation can
//! report all problems in one pass instead of stopping at the first one.

use crate::domain::{HttpMethod, PercentileKind};
use crate::engine::alert::AlertThresholds;
use crate::engine::sampler::build_headers;
use crate::engine::selector::RATIO_SCALE;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "INPUT_";

pub const ENV_TARGET_URL: &str = "INPUT_TARGET_URL";
pub const ENV_HTTP_HEADERS: &str = "INPUT_HTTP_HEADERS";
pub const ENV_REQ_HTTP_METHOD_RATIO: &str = "INPUT_REQ_HTTP_METHOD_RATIO";
pub const ENV_HTTP_REQ_BODY: &str = "INPUT_HTTP_REQ_BODY";
pub const ENV_THREAD_NUM: &str = "INPUT_THREAD_NUM";
pub const ENV_TRIAL_NUM: &str = "INPUT_TRIAL_NUM";
pub const ENV_PERMANENT: &str = "INPUT_PERMANENT";
pub const ENV_ENABLE_ALERT: &str = "INPUT_ENABLE_ALERT";
pub const ENV_SLACK_WEB_HOOK_URL: &str = "INPUT_SLACK_WEB_HOOK_URL";
pub const ENV_SLACK_CHANNEL: &str = "INPUT_SLACK_CHANNEL";
pub const ENV_THRESHOLD_LATENCY_MILLIS: &str = "INPUT_SLACK_NOTIFY_THRESHOLD_LATENCY_MILLIS";
pub const ENV_THRESHOLD_RPS: &str = "INPUT_SLACK_NOTIFY_THRESHOLD_RPS";
pub const ENV_ALERT_LATENCY_PERCENTILE: &str = "INPUT_ALERT_LATENCY_PERCENTILE";
pub const ENV_TIMEOUT_MILLIS: &str = "INPUT_TIMEOUT_MILLIS";
pub const ENV_RANDOM_SEED: &str = "INPUT_RANDOM_SEED";
pub const ENV_REPORT_DIR: &str = "INPUT_REPORT_DIR";

pub const MAX_THREAD_NUM: u32 = 3;
pub const MAX_TRIAL_NUM: u32 = 20;
const DEFAULT_TIMEOUT_MILLIS: u64 = 10_000;
const DEFAULT_REPORT_DIR: &str = "report";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Environment(String),
    #[error("Environment variable {0} is required.")]
    Missing(&'static str),
    #[error("Environment variable {0} must be a JSON object.")]
    NotJsonObject(&'static str),
    #[error("Environment variable {var} must be an http or https URL: {reason}")]
    InvalidUrl { var: &'static str, reason: String },
    #[error("Environment variable {0} is not a number.")]
    NotNumber(&'static str),
    #[error("Environment variable {var} must be between {min} and {max}, got {value}.")]
    OutOfRange {
        var: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },
    #[error("Environment variable {0} must be true or false.")]
    NotBool(&'static str),
    #[error("Environment variable {var} names unsupported HTTP method `{0}`.", var = ENV_REQ_HTTP_METHOD_RATIO)]
    UnsupportedMethod(String),
    #[error("Environment variable {var} weight for {method} must not be negative.", var = ENV_REQ_HTTP_METHOD_RATIO)]
    NegativeWeight { method: String },
    #[error(
        "Environment variable {var} weights must add up to {scale}, got {0}.",
        var = ENV_REQ_HTTP_METHOD_RATIO,
        scale = RATIO_SCALE
    )]
    RatioSum(i64),
    #[error("Environment variable {var} is invalid: {0}", var = ENV_HTTP_HEADERS)]
    InvalidHeader(String),
    #[error(
        "Environment variable {latency} or {rps} is required.",
        latency = ENV_THRESHOLD_LATENCY_MILLIS,
        rps = ENV_THRESHOLD_RPS
    )]
    AlertThresholdRequired,
    #[error(
        "Environment variable {var} must be one of avg, p50, p90, p95, p99.",
        var = ENV_ALERT_LATENCY_PERCENTILE
    )]
    InvalidPercentile,
}

/// Raw `INPUT_*` values, untyped.
#[derive(Debug, Default, Deserialize)]
pub struct RawSettings {
    pub target_url: Option<String>,
    pub http_headers: Option<String>,
    pub req_http_method_ratio: Option<String>,
    pub http_req_body: Option<String>,
    pub thread_num: Option<String>,
    pub trial_num: Option<String>,
    pub permanent: Option<String>,
    pub enable_alert: Option<String>,
    pub slack_web_hook_url: Option<String>,
    pub slack_channel: Option<String>,
    pub slack_notify_threshold_latency_millis: Option<String>,
    pub slack_notify_threshold_rps: Option<String>,
    pub alert_latency_percentile: Option<String>,
    pub timeout_millis: Option<String>,
    pub random_seed: Option<String>,
    pub report_dir: Option<String>,
}

impl RawSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_iter(std::env::vars())
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .map_err(|err| ConfigError::Environment(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackDestination {
    pub webhook_url: String,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertConfig {
    pub thresholds: AlertThresholds,
    pub slack: SlackDestination,
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub headers: HashMap<String, String>,
    pub method_ratio: BTreeMap<HttpMethod, u32>,
    /// Compact JSON, sent with every non-GET request.
    pub request_body: Option<String>,
    pub thread_num: u32,
    pub trial_num: u32,
    pub permanent: bool,
    pub alert: Option<AlertConfig>,
    pub timeout: Duration,
    pub random_seed: Option<u64>,
    pub report_dir: PathBuf,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn require<'a>(
    value: &'a Option<String>,
    var: &'static str,
    errors: &mut Vec<ConfigError>,
) -> Option<&'a str> {
    let value = present(value);
    if value.is_none() {
        errors.push(ConfigError::Missing(var));
    }
    value
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn parse_optional_bool(
    value: &Option<String>,
    var: &'static str,
    errors: &mut Vec<ConfigError>,
) -> bool {
    let Some(raw) = present(value) else {
        return false;
    };
    parse_bool(raw).unwrap_or_else(|| {
        errors.push(ConfigError::NotBool(var));
        false
    })
}

fn parse_number(raw: &str, var: &'static str, errors: &mut Vec<ConfigError>) -> Option<u64> {
    raw.parse::<u64>()
        .map_err(|_| errors.push(ConfigError::NotNumber(var)))
        .ok()
}

fn parse_bounded(
    value: &Option<String>,
    var: &'static str,
    max: u32,
    errors: &mut Vec<ConfigError>,
) -> Option<u32> {
    let value = parse_number(require(value, var, errors)?, var, errors)?;
    if value == 0 || value > u64::from(max) {
        errors.push(ConfigError::OutOfRange {
            var,
            min: 1,
            max: u64::from(max),
            value,
        });
        return None;
    }
    Some(value as u32)
}

fn parse_url(raw: &str, var: &'static str, errors: &mut Vec<ConfigError>) -> Option<String> {
    match reqwest::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(raw.to_string()),
        Ok(url) => {
            errors.push(ConfigError::InvalidUrl {
                var,
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
            None
        }
        Err(err) => {
            errors.push(ConfigError::InvalidUrl {
                var,
                reason: err.to_string(),
            });
            None
        }
    }
}

fn parse_headers(raw: &str, errors: &mut Vec<ConfigError>) -> Option<HashMap<String, String>> {
    let Ok(values) = serde_json::from_str::<HashMap<String, serde_json::Value>>(raw) else {
        errors.push(ConfigError::NotJsonObject(ENV_HTTP_HEADERS));
        return None;
    };

    let headers: HashMap<String, String> = values
        .into_iter()
        .map(|(name, value)| match value {
            serde_json::Value::String(text) => (name, text),
            other => (name, other.to_string()),
        })
        .collect();

    if let Err(err) = build_headers(&headers) {
        errors.push(ConfigError::InvalidHeader(err.to_string()));
        return None;
    }
    Some(headers)
}

fn parse_ratio(raw: &str, errors: &mut Vec<ConfigError>) -> Option<BTreeMap<HttpMethod, u32>> {
    let Ok(weights) = serde_json::from_str::<BTreeMap<String, i64>>(raw) else {
        errors.push(ConfigError::NotJsonObject(ENV_REQ_HTTP_METHOD_RATIO));
        return None;
    };

    let mut ratio = BTreeMap::new();
    let mut valid = true;
    for (name, weight) in &weights {
        let Ok(method) = name.parse::<HttpMethod>() else {
            errors.push(ConfigError::UnsupportedMethod(name.clone()));
            valid = false;
            continue;
        };
        if *weight < 0 {
            errors.push(ConfigError::NegativeWeight {
                method: name.clone(),
            });
            valid = false;
            continue;
        }
        // Oversized weights surface through the total below.
        match u32::try_from(*weight) {
            Ok(weight) if weight <= RATIO_SCALE => {
                ratio.insert(method, weight);
            }
            _ => valid = false,
        }
    }

    let total = weights
        .values()
        .try_fold(0i64, |sum, weight| sum.checked_add(*weight));
    if total != Some(i64::from(RATIO_SCALE)) {
        errors.push(ConfigError::RatioSum(total.unwrap_or(i64::MAX)));
        valid = false;
    }

    valid.then_some(ratio)
}

fn parse_body(raw: &str, errors: &mut Vec<ConfigError>) -> Option<String> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => Some(value.to_string()),
        _ => {
            errors.push(ConfigError::NotJsonObject(ENV_HTTP_REQ_BODY));
            None
        }
    }
}

fn parse_alert(raw: &RawSettings, errors: &mut Vec<ConfigError>) -> Option<AlertConfig> {
    if !parse_optional_bool(&raw.enable_alert, ENV_ENABLE_ALERT, errors) {
        return None;
    }

    let latency = present(&raw.slack_notify_threshold_latency_millis);
    let rps = present(&raw.slack_notify_threshold_rps);
    if latency.is_none() && rps.is_none() {
        errors.push(ConfigError::AlertThresholdRequired);
    }
    let latency_millis = latency.and_then(|v| parse_number(v, ENV_THRESHOLD_LATENCY_MILLIS, errors));
    let rps = rps.and_then(|v| parse_number(v, ENV_THRESHOLD_RPS, errors));

    let latency_kind = match present(&raw.alert_latency_percentile) {
        None => None,
        Some(value) => match value.parse::<PercentileKind>() {
            Ok(kind) if kind.is_latency() => Some(kind),
            _ => {
                errors.push(ConfigError::InvalidPercentile);
                None
            }
        },
    };

    let webhook_url = require(&raw.slack_web_hook_url, ENV_SLACK_WEB_HOOK_URL, errors)
        .and_then(|v| parse_url(v, ENV_SLACK_WEB_HOOK_URL, errors))?;

    Some(AlertConfig {
        thresholds: AlertThresholds {
            latency_millis,
            latency_kind,
            rps,
        },
        slack: SlackDestination {
            webhook_url,
            channel: present(&raw.slack_channel).map(str::to_string),
        },
    })
}

impl Config {
    pub fn from_env() -> Result<Self, Vec<ConfigError>> {
        let raw = RawSettings::from_env().map_err(|err| vec![err])?;
        Self::from_raw(&raw)
    }

    /// Validate raw settings, collecting every violation.
    pub fn from_raw(raw: &RawSettings) -> Result<Self, Vec<ConfigError>> {
        let mut errors = Vec::new();

        let target_url = require(&raw.target_url, ENV_TARGET_URL, &mut errors)
            .and_then(|v| parse_url(v, ENV_TARGET_URL, &mut errors));
        let method_ratio = require(&raw.req_http_method_ratio, ENV_REQ_HTTP_METHOD_RATIO, &mut errors)
            .and_then(|v| parse_ratio(v, &mut errors));
        let headers = require(&raw.http_headers, ENV_HTTP_HEADERS, &mut errors)
            .and_then(|v| parse_headers(v, &mut errors));

        let needs_body = method_ratio.as_ref().is_some_and(|ratio| {
            ratio
                .iter()
                .any(|(method, weight)| *weight > 0 && method.requires_body())
        });
        let request_body = if needs_body {
            require(&raw.http_req_body, ENV_HTTP_REQ_BODY, &mut errors)
                .and_then(|v| parse_body(v, &mut errors))
        } else {
            present(&raw.http_req_body).and_then(|v| parse_body(v, &mut errors))
        };

        let thread_num = parse_bounded(&raw.thread_num, ENV_THREAD_NUM, MAX_THREAD_NUM, &mut errors);
        let trial_num = parse_bounded(&raw.trial_num, ENV_TRIAL_NUM, MAX_TRIAL_NUM, &mut errors);
        let permanent = parse_optional_bool(&raw.permanent, ENV_PERMANENT, &mut errors);
        let alert = parse_alert(raw, &mut errors);

        let timeout_millis = match present(&raw.timeout_millis) {
            None => Some(DEFAULT_TIMEOUT_MILLIS),
            Some(value) => match parse_number(value, ENV_TIMEOUT_MILLIS, &mut errors) {
                Some(0) => {
                    errors.push(ConfigError::OutOfRange {
                        var: ENV_TIMEOUT_MILLIS,
                        min: 1,
                        max: u64::MAX,
                        value: 0,
                    });
                    None
                }
                other => other,
            },
        };
        let random_seed = present(&raw.random_seed)
            .and_then(|v| parse_number(v, ENV_RANDOM_SEED, &mut errors));
        let report_dir = PathBuf::from(present(&raw.report_dir).unwrap_or(DEFAULT_REPORT_DIR));

        match (target_url, method_ratio, headers, thread_num, trial_num, timeout_millis) {
            (
                Some(target_url),
                Some(method_ratio),
                Some(headers),
                Some(thread_num),
                Some(trial_num),
                Some(timeout_millis),
            ) if errors.is_empty() => Ok(Config {
                target_url,
                headers,
                method_ratio,
                request_body,
                thread_num,
                trial_num,
                permanent,
                alert,
                timeout: Duration::from_millis(timeout_millis),
                random_seed,
                report_dir,
            }),
            _ => Err(errors),
        }
    }
}
