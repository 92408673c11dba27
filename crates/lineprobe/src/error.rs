//! Probe errors.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Errors surfaced to callers of probe activation.
///
/// Errors local to one probe never tear down the session; only
/// [`ProbeError::WorkerTerminated`] is global to every pending request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum ProbeError {
    /// The host runtime rejected a protocol command.
    #[error("protocol error {code}: {message}")]
    Protocol { code: i64, message: SmolStr },

    /// No loaded script matches the requested partial path.
    #[error("no loaded script found for '{path}'")]
    ScriptNotFound { path: SmolStr },

    /// The worker exited while the request was pending.
    #[error(
        "probe worker terminated{}",
        .code.map(|code| format!(" with exit code {code}")).unwrap_or_default()
    )]
    WorkerTerminated { code: Option<i32> },

    /// The probe was deactivated before it fired.
    #[error("probe deactivated before it fired")]
    Cancelled,

    /// The request deadline elapsed before a reply arrived.
    #[error("timed out waiting for probe reply")]
    Timeout,

    /// The probe request itself is malformed.
    #[error("invalid probe: {0}")]
    InvalidProbe(SmolStr),

    /// The connection to the host runtime could not be established.
    #[error("transport error: {0}")]
    Transport(SmolStr),

    /// The worker thread could not be spawned.
    #[error("failed to spawn probe worker: {0}")]
    Spawn(SmolStr),

    /// Configuration could not be loaded or validated.
    #[error("invalid configuration: {0}")]
    Config(SmolStr),
}

impl ProbeError {
    pub(crate) fn protocol(code: i64, message: impl Into<SmolStr>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn connection_closed() -> Self {
        Self::protocol(-1, "connection closed")
    }

    /// Whether this error ends every request owned by the worker.
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self, Self::WorkerTerminated { .. })
    }
}

pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_worker_exit_is_global() {
        assert!(ProbeError::WorkerTerminated { code: Some(1) }.is_global());
        assert!(!ProbeError::Timeout.is_global());
        assert!(!ProbeError::Cancelled.is_global());
        assert!(!ProbeError::ScriptNotFound {
            path: "server.js".into()
        }
        .is_global());
    }

    #[test]
    fn exit_code_is_part_of_the_message() {
        assert_eq!(
            ProbeError::WorkerTerminated { code: Some(101) }.to_string(),
            "probe worker terminated with exit code 101"
        );
        assert_eq!(
            ProbeError::WorkerTerminated { code: None }.to_string(),
            "probe worker terminated"
        );
    }

    #[test]
    fn errors_travel_as_tagged_json() {
        let err = ProbeError::protocol(-32000, "Breakpoint at specified location already exists.");
        let text = serde_json::to_string(&err).unwrap();
        let back: ProbeError = serde_json::from_str(&text).unwrap();
        assert_eq!(back, err);
        assert!(text.contains(r#""kind":"protocol""#));
    }
}
