//! Caller-facing probe controller.
//!
//! A [`Controller`] owns at most one worker at a time and correlates its
//! replies back to the `activate` calls waiting on them. Pending requests
//! are tagged with the generation of the worker that accepted them, so a
//! worker exit only rejects what that worker owned.
//!
//! Locks are always taken worker-slot first, then the pending table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::capture::CaptureSettings;
use crate::config::ProbeConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::probe::{BatchId, Probe, ProbeId, Snapshot};
use crate::transport::{Connector, WebSocketConnector};
use crate::worker::{spawn_worker, WorkerEvent, WorkerReply, WorkerRequest};

type Responder = oneshot::Sender<ProbeResult<ProbeReply>>;

/// Successful outcome of an activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReply {
    pub probe: Probe,
    pub snapshot: Snapshot,
}

struct PendingEntry {
    generation: u64,
    responder: Responder,
}

struct WorkerHandle {
    generation: u64,
    requests: UnboundedSender<WorkerRequest>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        !self.requests.is_closed() && !self.thread.is_finished()
    }

    fn uninstall(&self, probe_id: ProbeId) {
        if self
            .requests
            .send(WorkerRequest::Uninstall { probe_id })
            .is_err()
        {
            debug!(probe = %probe_id, generation = self.generation, "worker gone; uninstall dropped");
        }
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    settings: CaptureSettings,
    request_timeout: Option<Duration>,
    batch_id: BatchId,
    worker: Mutex<Option<WorkerHandle>>,
    pending: Mutex<HashMap<ProbeId, PendingEntry>>,
    generations: AtomicU64,
}

/// Handle to a probe controller. Clones share the same worker.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("batch_id", &self.inner.batch_id)
            .field("running", &self.is_running())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Controller {
    pub fn new(connector: impl Connector, config: &ProbeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                settings: config.capture,
                request_timeout: config.request_timeout,
                batch_id: BatchId::new(),
                worker: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Controller for the inspector WebSocket named by `config`.
    pub fn from_config(config: &ProbeConfig) -> ProbeResult<Self> {
        let url = config
            .inspector_url
            .as_deref()
            .ok_or_else(|| ProbeError::Config("no inspector url configured".into()))?;
        Ok(Self::new(WebSocketConnector::new(url), config))
    }

    /// Batch id copied into every snapshot this controller produces.
    #[must_use]
    pub fn batch_id(&self) -> BatchId {
        self.inner.batch_id
    }

    /// Spawn the worker unless one is already running. Must be called from
    /// within a tokio runtime.
    pub fn start(&self) -> ProbeResult<()> {
        let mut slot = self.inner.worker.lock();
        self.ensure_worker(&mut slot).map(|_| ())
    }

    /// Install a probe at `file:line` (one-based) and wait for its first hit.
    pub async fn activate(&self, file: impl Into<SmolStr>, line: u32) -> ProbeResult<ProbeReply> {
        self.activate_with_timeout(file, line, self.inner.request_timeout)
            .await
    }

    /// Like [`Controller::activate`] with an explicit deadline.
    pub async fn activate_with_timeout(
        &self,
        file: impl Into<SmolStr>,
        line: u32,
        timeout: Option<Duration>,
    ) -> ProbeResult<ProbeReply> {
        let probe = Probe::new(ProbeId::new(), file, line)?;
        self.activate_probe(probe, timeout).await
    }

    /// Activate a caller-built probe, keeping its id for [`Controller::deactivate`].
    pub async fn activate_probe(
        &self,
        probe: Probe,
        timeout: Option<Duration>,
    ) -> ProbeResult<ProbeReply> {
        let id = probe.id;
        let receiver = self.submit(probe)?;
        let _guard = PendingGuard {
            inner: &self.inner,
            id,
        };
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(probe = %id, timeout_ms = limit.as_millis(), "probe timed out");
                    return Err(ProbeError::Timeout);
                }
            },
            None => receiver.await,
        };
        outcome.unwrap_or(Err(ProbeError::Cancelled))
    }

    /// Remove a probe's breakpoint. A still-waiting activation for it
    /// resolves with [`ProbeError::Cancelled`].
    pub fn deactivate(&self, probe_id: ProbeId) {
        let slot = self.inner.worker.lock();
        if let Some(entry) = self.inner.pending.lock().remove(&probe_id) {
            let _ = entry.responder.send(Err(ProbeError::Cancelled));
        }
        match slot.as_ref() {
            Some(handle) => {
                debug!(probe = %probe_id, "deactivating probe");
                handle.uninstall(probe_id);
            }
            None => debug!(probe = %probe_id, "no worker; nothing to deactivate"),
        }
    }

    /// Number of activations waiting for a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(WorkerHandle::is_alive)
    }

    fn submit(&self, probe: Probe) -> ProbeResult<oneshot::Receiver<ProbeResult<ProbeReply>>> {
        let mut slot = self.inner.worker.lock();
        let handle = self.ensure_worker(&mut slot)?;
        let id = probe.id;
        let (responder, receiver) = oneshot::channel();
        self.inner.pending.lock().insert(
            id,
            PendingEntry {
                generation: handle.generation,
                responder,
            },
        );
        debug!(probe = %id, file = %probe.file, line = probe.line, "activating probe");
        let request = WorkerRequest::Install {
            probe,
            batch_id: self.inner.batch_id,
        };
        if handle.requests.send(request).is_err() {
            self.inner.pending.lock().remove(&id);
            return Err(ProbeError::WorkerTerminated { code: None });
        }
        Ok(receiver)
    }

    fn ensure_worker<'a>(
        &self,
        slot: &'a mut Option<WorkerHandle>,
    ) -> ProbeResult<&'a WorkerHandle> {
        let handle = match slot.take() {
            Some(handle) if handle.is_alive() => handle,
            _ => self.spawn()?,
        };
        Ok(slot.insert(handle))
    }

    fn spawn(&self) -> ProbeResult<WorkerHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| ProbeError::Spawn(err.to_string().into()))?;
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let channels = spawn_worker(Arc::clone(&self.inner.connector), self.inner.settings)?;
        runtime.spawn(route_events(
            Arc::downgrade(&self.inner),
            generation,
            channels.events,
        ));
        info!(generation, batch = %self.inner.batch_id, "probe worker started");
        Ok(WorkerHandle {
            generation,
            requests: channels.requests,
            thread: channels.thread,
        })
    }
}

/// Forgets an abandoned activation when `activate` is dropped or times out,
/// and uninstalls its breakpoint.
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: ProbeId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let slot = self.inner.worker.lock();
        let Some(entry) = self.inner.pending.lock().remove(&self.id) else {
            return;
        };
        debug!(probe = %self.id, "abandoned pending probe");
        if let Some(handle) = slot
            .as_ref()
            .filter(|handle| handle.generation == entry.generation)
        {
            handle.uninstall(self.id);
        }
    }
}

impl Inner {
    fn deliver(&self, reply: WorkerReply) {
        let id = reply.id();
        let Some(entry) = self.pending.lock().remove(&id) else {
            warn!(probe = %id, "dropping unroutable reply");
            return;
        };
        let outcome = match reply {
            WorkerReply::Snapshot {
                probe, snapshot, ..
            } => Ok(ProbeReply { probe, snapshot }),
            WorkerReply::Error { error, .. } => Err(error),
        };
        let _ = entry.responder.send(outcome);
    }

    fn worker_exited(&self, generation: u64, code: Option<i32>) {
        let mut slot = self.worker.lock();
        if slot
            .as_ref()
            .is_some_and(|handle| handle.generation == generation)
        {
            *slot = None;
        }
        let orphaned: Vec<PendingEntry> = {
            let mut pending = self.pending.lock();
            let (orphaned, kept): (HashMap<_, _>, HashMap<_, _>) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|(_, entry)| entry.generation == generation);
            *pending = kept;
            orphaned.into_values().collect()
        };
        drop(slot);
        warn!(generation, ?code, rejected = orphaned.len(), "probe worker exited");
        for entry in orphaned {
            let _ = entry
                .responder
                .send(Err(ProbeError::WorkerTerminated { code }));
        }
    }
}

async fn route_events(
    inner: Weak<Inner>,
    generation: u64,
    mut events: UnboundedReceiver<WorkerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            WorkerEvent::Online => debug!(generation, "probe worker online"),
            WorkerEvent::Error { message } => warn!(generation, %message, "probe worker error"),
            WorkerEvent::Reply(reply) => inner.deliver(reply),
            WorkerEvent::Exited { code } => {
                inner.worker_exited(generation, Some(code));
                return;
            }
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.worker_exited(generation, None);
    }
}
