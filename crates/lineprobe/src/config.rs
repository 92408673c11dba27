//! Probe configuration loading.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::capture::CaptureSettings;
use crate::error::{ProbeError, ProbeResult};

pub const ENV_INSPECTOR_URL: &str = "LINEPROBE_INSPECTOR_URL";
pub const ENV_TIMEOUT_MS: &str = "LINEPROBE_TIMEOUT_MS";
pub const ENV_MAX_LOCALS: &str = "LINEPROBE_MAX_LOCALS";
pub const ENV_MAX_REFERENCE_DEPTH: &str = "LINEPROBE_MAX_REFERENCE_DEPTH";

/// Upper bound for `max_reference_depth`.
pub const MAX_REFERENCE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeConfig {
    /// Inspector WebSocket url (`ws://host:port/<uuid>`).
    pub inspector_url: Option<String>,
    /// Default deadline for `activate`; `None` waits until the probe fires.
    pub request_timeout: Option<Duration>,
    pub capture: CaptureSettings,
}

impl ProbeConfig {
    pub fn load(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| ProbeError::Config(format!("{}: {err}", path.display()).into()))?;
        let raw: ProbeToml = toml::from_str(&text)
            .map_err(|err| ProbeError::Config(format!("{}: {err}", path.display()).into()))?;
        raw.into_config()
    }

    pub fn from_toml_str(text: &str) -> ProbeResult<Self> {
        let raw: ProbeToml =
            toml::from_str(text).map_err(|err| ProbeError::Config(err.to_string().into()))?;
        raw.into_config()
    }

    /// Apply `LINEPROBE_*` environment overrides.
    pub fn with_env_overrides(self) -> ProbeResult<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    /// Blank values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> ProbeResult<Self> {
        let value = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        if let Some(url) = value(ENV_INSPECTOR_URL) {
            self = self.with_inspector_url(url)?;
        }
        if let Some(raw) = value(ENV_TIMEOUT_MS) {
            self.request_timeout = timeout_from_ms(parse_number(ENV_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = value(ENV_MAX_LOCALS) {
            self.capture.max_locals = validate_max_locals(parse_number(ENV_MAX_LOCALS, &raw)?)?;
        }
        if let Some(raw) = value(ENV_MAX_REFERENCE_DEPTH) {
            self.capture.max_reference_depth =
                validate_depth(parse_number(ENV_MAX_REFERENCE_DEPTH, &raw)?)?;
        }
        Ok(self)
    }

    /// Replace the inspector url, applying the same check as the file and
    /// environment sources.
    pub fn with_inspector_url(mut self, url: impl Into<String>) -> ProbeResult<Self> {
        self.inspector_url = Some(validate_url(url.into())?);
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProbeToml {
    #[serde(default)]
    inspector: InspectorSection,
    #[serde(default)]
    probe: ProbeSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InspectorSection {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProbeSection {
    timeout_ms: Option<u64>,
    max_locals: Option<u64>,
    max_reference_depth: Option<u64>,
}

impl ProbeToml {
    fn into_config(self) -> ProbeResult<ProbeConfig> {
        let inspector_url = self.inspector.url.map(validate_url).transpose()?;
        let request_timeout = self.probe.timeout_ms.and_then(timeout_from_ms);
        let mut capture = CaptureSettings::default();
        if let Some(max_locals) = self.probe.max_locals {
            capture.max_locals = validate_max_locals(max_locals)?;
        }
        if let Some(depth) = self.probe.max_reference_depth {
            capture.max_reference_depth = validate_depth(depth)?;
        }
        Ok(ProbeConfig {
            inspector_url,
            request_timeout,
            capture,
        })
    }
}

fn validate_url(url: String) -> ProbeResult<String> {
    let url = url.trim().to_string();
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(url)
    } else {
        Err(ProbeError::Config(
            format!("inspector url must be ws:// or wss://, got '{url}'").into(),
        ))
    }
}

/// Zero disables the deadline.
fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn validate_max_locals(value: u64) -> ProbeResult<usize> {
    match usize::try_from(value) {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(ProbeError::Config(
            format!("max_locals must be a positive count, got {value}").into(),
        )),
    }
}

fn validate_depth(value: u64) -> ProbeResult<usize> {
    match usize::try_from(value) {
        Ok(depth) if depth <= MAX_REFERENCE_DEPTH => Ok(depth),
        _ => Err(ProbeError::Config(
            format!("max_reference_depth must be at most {MAX_REFERENCE_DEPTH}, got {value}")
                .into(),
        )),
    }
}

fn parse_number(name: &str, raw: &str) -> ProbeResult<u64> {
    raw.parse::<u64>()
        .map_err(|err| ProbeError::Config(format!("{name}='{raw}': {err}").into()))
}
