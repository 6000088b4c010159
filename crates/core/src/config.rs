//! Run configuration and the per-run options resolved from it.

use crate::document::Document;
use crate::error::{FlowError, FlowResult};
use crate::types::RunId;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Request document key carrying the caller's request id.
pub const REQUEST_ID_KEY: &str = "request-id";

const ENV_GATEWAY: &str = "gateway";
const ENV_REQUEST_ID: &str = "request-id";
const ENV_READ_TIMEOUT: &str = "read_timeout";
const ENV_DEFAULT_METHOD: &str = "default-method";

/// Deadline horizon used when a timeout does not fit on the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Configuration shared by every run of an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Address of the function gateway, with or without a scheme.
    #[serde(default = "default_gateway")]
    pub gateway: String,

    /// Fallback request id when the request document carries none.
    #[serde(default)]
    pub request_id: Option<String>,

    /// Run-wide deadline, measured from run start.
    #[serde(
        default = "default_read_timeout",
        deserialize_with = "deserialize_timeout",
        serialize_with = "serialize_timeout"
    )]
    pub read_timeout: Duration,

    /// HTTP method for operations that do not set one.
    #[serde(default = "default_method")]
    pub default_method: String,
}

fn default_gateway() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_method() -> String {
    "POST".to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            gateway: default_gateway(),
            request_id: None,
            read_timeout: default_read_timeout(),
            default_method: default_method(),
        }
    }
}

impl RunConfig {
    /// Build a configuration from the process environment.
    ///
    /// Absent or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::default().with_lookup(lookup)
    }

    /// Fill fields that still hold their defaults from a key lookup.
    pub fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.gateway == defaults.gateway {
            if let Some(gateway) = present(ENV_GATEWAY) {
                self.gateway = gateway;
            }
        }
        if self.request_id.is_none() {
            self.request_id = present(ENV_REQUEST_ID);
        }
        if self.read_timeout == defaults.read_timeout {
            if let Some(raw) = present(ENV_READ_TIMEOUT) {
                match parse_timeout(&raw) {
                    Ok(timeout) => self.read_timeout = timeout,
                    Err(e) => tracing::warn!(value = %raw, error = %e, "ignoring read_timeout"),
                }
            }
        }
        if self.default_method == defaults.default_method {
            if let Some(method) = present(ENV_DEFAULT_METHOD) {
                self.default_method = method.to_uppercase();
            }
        }
        self
    }

    /// Resolve the options of one run against its request document.
    pub fn resolve(&self, request: &Document, cancel: CancellationToken) -> RunOptions {
        let request_id = request
            .get(REQUEST_ID_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.request_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let now = Instant::now();
        let deadline = now
            .checked_add(self.read_timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);

        RunOptions {
            run_id: RunId::new(),
            request_id,
            gateway: self.gateway.clone(),
            default_method: self.default_method.clone(),
            read_timeout: self.read_timeout,
            deadline,
            cancel,
        }
    }
}

/// Immutable options visible to every operation of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_id: RunId,
    pub request_id: String,
    pub gateway: String,
    pub default_method: String,
    pub read_timeout: Duration,
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn deadline_error(&self) -> FlowError {
        FlowError::DeadlineExceeded {
            after: self.read_timeout,
        }
    }

    /// Fail when the run was cancelled or its deadline has passed.
    pub fn check(&self) -> FlowResult<()> {
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        if self.is_expired() {
            return Err(self.deadline_error());
        }
        Ok(())
    }
}

/// Parse a timeout given as whole seconds (`"10"`) or with a unit suffix
/// (`"250ms"`, `"3s"`, `"1m"`, `"2h"`).
pub fn parse_timeout(s: &str) -> FlowResult<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(FlowError::Config("empty duration string".to_string()));
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| FlowError::Config(format!("invalid duration '{}'", s)))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| FlowError::Config(format!("invalid duration number '{}': {}", num_part, e)))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => scaled_secs(value, 60),
        "h" => scaled_secs(value, 60 * 60),
        unit => Err(FlowError::Config(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        ))),
    }
}

fn scaled_secs(value: u64, factor: u64) -> FlowResult<Duration> {
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| FlowError::Config(format!("duration {} x {}s overflows", value, factor)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimeout {
    Secs(u64),
    Text(String),
}

fn deserialize_timeout<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimeout::deserialize(deserializer)? {
        RawTimeout::Secs(secs) => Ok(Duration::from_secs(secs)),
        RawTimeout::Text(text) => parse_timeout(&text).map_err(serde::de::Error::custom),
    }
}

fn serialize_timeout<S>(timeout: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{}ms", timeout.as_millis()))
}
