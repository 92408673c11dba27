//! Probe requests and the snapshots they produce.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use uuid::Uuid;

use crate::error::{ProbeError, ProbeResult};

/// Correlation id of one activation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeId(Uuid);

impl ProbeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProbeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Capture batch a controller threads through every request it issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A logical request to capture state at `file:line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub id: ProbeId,
    #[serde(default)]
    pub version: u32,
    /// Partial path, matched as a suffix of loaded script urls.
    pub file: SmolStr,
    /// One-based line number.
    pub line: u32,
}

impl Probe {
    pub fn new(id: ProbeId, file: impl Into<SmolStr>, line: u32) -> ProbeResult<Self> {
        let file = file.into();
        if file.trim().is_empty() {
            return Err(ProbeError::InvalidProbe("file must not be empty".into()));
        }
        if line == 0 {
            return Err(ProbeError::InvalidProbe("line numbers are 1-based".into()));
        }
        Ok(Self {
            id,
            version: 0,
            file,
            line,
        })
    }

    #[must_use]
    pub fn location(&self) -> ProbeLocation {
        ProbeLocation {
            file: self.file.clone(),
            lines: vec![self.line],
        }
    }
}

/// One-based client line to the protocol's zero-based line.
#[must_use]
pub fn to_protocol_line(line: u32) -> Option<u32> {
    line.checked_sub(1)
}

/// Zero-based protocol line (or column) to one-based.
#[must_use]
pub fn to_client_line(line: u32) -> u32 {
    line.saturating_add(1)
}

/// Source location as requested by the probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeLocation {
    pub file: SmolStr,
    pub lines: Vec<u32>,
}

/// Probe description embedded in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotProbe {
    pub id: ProbeId,
    pub version: u32,
    pub location: ProbeLocation,
}

/// One entry of a captured stack, one-based line and column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub file_name: String,
    pub function: String,
    pub line_number: u32,
    pub column_number: u32,
}

/// Representation of one captured value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedValue {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_null: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_captured_reason: Option<String>,
    /// Own properties of an expanded object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<IndexMap<String, CapturedValue>>,
}

/// Locals captured at one line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineCapture {
    pub locals: IndexMap<String, CapturedValue>,
}

/// Captures keyed by one-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Captures {
    pub lines: BTreeMap<String, LineCapture>,
}

/// Evidence captured from one breakpoint hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Correlation id of the request that installed the probe.
    pub id: ProbeId,
    pub batch_id: BatchId,
    /// Unix time in milliseconds.
    pub timestamp: i64,
    pub probe: SnapshotProbe,
    pub stack: Vec<StackFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captures: Option<Captures>,
}
