//! Messages exchanged between the controller and a probe worker.

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;
use crate::probe::{BatchId, Probe, ProbeId, Snapshot};

/// Controller → worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum WorkerRequest {
    #[serde(rename_all = "camelCase")]
    Install { probe: Probe, batch_id: BatchId },
    #[serde(rename_all = "camelCase")]
    Uninstall { probe_id: ProbeId },
}

/// Worker → controller reply, correlated by the probe id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum WorkerReply {
    Snapshot {
        id: ProbeId,
        probe: Probe,
        snapshot: Snapshot,
    },
    Error {
        id: ProbeId,
        error: ProbeError,
    },
}

impl WorkerReply {
    #[must_use]
    pub fn id(&self) -> ProbeId {
        match self {
            Self::Snapshot { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}

/// Everything a worker reports, in order. `Exited` is always last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Online,
    Reply(WorkerReply),
    Error { message: String },
    Exited { code: i32 },
}
