//! Probe worker: owns one host-runtime session and serves install requests.
//!
//! The worker runs on its own thread (see [`spawn_worker`]). Everything it
//! does with the host is driven from a single loop so that responses and
//! notifications are applied in the order the host produced them:
//!
//! - completed commands are applied first (e.g. a breakpoint is registered
//!   before the pause it causes is looked up)
//! - then protocol frames (responses wake completions, events are handled)
//! - then controller requests
//!
//! A probe fires once: its breakpoint is removed from the host as soon as
//! the pause is attributed to it.

mod messages;
mod spawn;

use std::collections::HashSet;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

pub use messages::{WorkerEvent, WorkerReply, WorkerRequest};
pub use spawn::{spawn_worker, WorkerChannels, PANIC_EXIT_CODE, WORKER_THREAD_NAME};

use crate::breakpoints::{BreakpointRegistry, InstalledBreakpoint};
use crate::capture::{begin_capture, expand, CaptureSettings, CaptureStep, CapturedHit};
use crate::error::{ProbeError, ProbeResult};
use crate::probe::{to_client_line, to_protocol_line, BatchId, Probe, ProbeId};
use crate::protocol::{BreakpointId, Location, SetBreakpointResult};
use crate::scripts::ScriptRegistry;
use crate::session::{Session, SessionEvent, SessionMessage};

/// Debugger-domain lifecycle of the session.
#[derive(Debug)]
enum DebuggerState {
    Idle,
    /// `Debugger.enable` is in flight; installs wait for it.
    Starting { waiting: Vec<(Probe, BatchId)> },
    Active,
}

/// Result of a command issued by the worker.
enum Completion {
    Enabled(ProbeResult<()>),
    Installed {
        probe: Probe,
        batch_id: BatchId,
        url: String,
        result: ProbeResult<SetBreakpointResult>,
    },
    Captured(CaptureStep),
    Removed {
        probe_id: ProbeId,
        breakpoint_id: BreakpointId,
        result: ProbeResult<()>,
    },
}

pub struct Worker {
    session: Session,
    requests: UnboundedReceiver<WorkerRequest>,
    events: UnboundedSender<WorkerEvent>,
    scripts: ScriptRegistry,
    breakpoints: BreakpointRegistry,
    state: DebuggerState,
    settings: CaptureSettings,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    /// Probes accepted but not yet registered.
    installing: HashSet<ProbeId>,
    /// Installing probes uninstalled before their breakpoint was set.
    cancelled: HashSet<ProbeId>,
}

impl Worker {
    #[must_use]
    pub fn new(
        session: Session,
        requests: UnboundedReceiver<WorkerRequest>,
        events: UnboundedSender<WorkerEvent>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            session,
            requests,
            events,
            scripts: ScriptRegistry::new(),
            breakpoints: BreakpointRegistry::new(),
            state: DebuggerState::Idle,
            settings,
            in_flight: FuturesUnordered::new(),
            installing: HashSet::new(),
            cancelled: HashSet::new(),
        }
    }

    /// Serve until the controller hangs up (`Ok`) or the host connection
    /// closes (`Err`).
    pub async fn run(mut self) -> ProbeResult<()> {
        loop {
            tokio::select! {
                biased;
                Some(completion) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.complete(completion);
                }
                message = self.session.recv() => match message {
                    Some(SessionMessage::Event(event)) => self.on_event(event),
                    Some(SessionMessage::Acknowledged { .. }) => {}
                    None => {
                        warn!(
                            breakpoints = self.breakpoints.len(),
                            "host runtime connection closed"
                        );
                        return Err(ProbeError::connection_closed());
                    }
                },
                request = self.requests.recv() => match request {
                    Some(request) => self.on_request(request),
                    None => {
                        debug!("controller hung up; worker stopping");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn on_request(&mut self, request: WorkerRequest) {
        match request {
            WorkerRequest::Install { probe, batch_id } => self.install(probe, batch_id),
            WorkerRequest::Uninstall { probe_id } => self.uninstall(probe_id),
        }
    }

    fn install(&mut self, probe: Probe, batch_id: BatchId) {
        self.installing.insert(probe.id);
        match self.state {
            DebuggerState::Active => self.set_breakpoint(probe, batch_id),
            DebuggerState::Starting { ref mut waiting } => waiting.push((probe, batch_id)),
            DebuggerState::Idle => {
                info!("enabling debugger");
                let enable = self.session.enable();
                self.in_flight.push(enable.map(Completion::Enabled).boxed());
                self.state = DebuggerState::Starting {
                    waiting: vec![(probe, batch_id)],
                };
            }
        }
    }

    fn set_breakpoint(&mut self, probe: Probe, batch_id: BatchId) {
        let Some(script) = self.scripts.resolve(&probe.file) else {
            debug!(probe = %probe.id, file = %probe.file, scripts = self.scripts.len(), "script not loaded");
            let path = probe.file.clone();
            self.fail(probe.id, ProbeError::ScriptNotFound { path });
            return;
        };
        let Some(line_number) = to_protocol_line(probe.line) else {
            self.fail(
                probe.id,
                ProbeError::InvalidProbe("line numbers are 1-based".into()),
            );
            return;
        };
        debug!(probe = %probe.id, url = %script.url, line = probe.line, "setting breakpoint");
        let install = self.session.set_breakpoint(Location {
            script_id: script.script_id,
            line_number,
            column_number: None,
        });
        let url = script.url;
        self.in_flight.push(
            async move {
                Completion::Installed {
                    probe,
                    batch_id,
                    url,
                    result: install.await,
                }
            }
            .boxed(),
        );
    }

    fn uninstall(&mut self, probe_id: ProbeId) {
        if let Some(entry) = self.breakpoints.remove_probe(&probe_id) {
            self.remove_breakpoint(probe_id, entry.breakpoint_id);
        } else if self.installing.contains(&probe_id) {
            self.cancelled.insert(probe_id);
        } else {
            debug!(probe = %probe_id, "uninstall for unknown probe");
        }
    }

    fn remove_breakpoint(&mut self, probe_id: ProbeId, breakpoint_id: BreakpointId) {
        let removal = self.session.remove_breakpoint(breakpoint_id.clone());
        self.in_flight.push(
            async move {
                Completion::Removed {
                    probe_id,
                    breakpoint_id,
                    result: removal.await,
                }
            }
            .boxed(),
        );
    }

    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ScriptParsed(script) => self.scripts.register(script),
            SessionEvent::Paused(paused) => {
                if let Some(capture) = begin_capture(
                    &mut self.session,
                    paused,
                    &mut self.breakpoints,
                    &self.scripts,
                    self.settings,
                ) {
                    self.in_flight.push(capture.step.map(Completion::Captured).boxed());
                    let hit = capture.breakpoint;
                    self.remove_breakpoint(hit.probe.id, hit.breakpoint_id);
                }
            }
            SessionEvent::Resumed | SessionEvent::Other { .. } => {}
        }
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Enabled(Ok(())) => {
                info!(scripts = self.scripts.len(), "debugger enabled");
                let waiting = match std::mem::replace(&mut self.state, DebuggerState::Active) {
                    DebuggerState::Starting { waiting } => waiting,
                    DebuggerState::Idle | DebuggerState::Active => Vec::new(),
                };
                for (probe, batch_id) in waiting {
                    if self.cancelled.remove(&probe.id) {
                        self.installing.remove(&probe.id);
                        continue;
                    }
                    self.set_breakpoint(probe, batch_id);
                }
            }
            Completion::Enabled(Err(error)) => {
                warn!(%error, "failed to enable debugger");
                let waiting = match std::mem::replace(&mut self.state, DebuggerState::Idle) {
                    DebuggerState::Starting { waiting } => waiting,
                    DebuggerState::Idle | DebuggerState::Active => Vec::new(),
                };
                for (probe, _) in waiting {
                    self.fail(probe.id, error.clone());
                }
            }
            Completion::Installed {
                probe,
                batch_id,
                url,
                result,
            } => self.installed(probe, batch_id, url, result),
            Completion::Captured(CaptureStep::Expand(expansion)) => {
                let step = expand(&mut self.session, expansion);
                self.in_flight.push(step.map(Completion::Captured).boxed());
            }
            Completion::Captured(CaptureStep::Done(CapturedHit { probe, snapshot })) => {
                info!(probe = %probe.id, frames = snapshot.stack.len(), "probe hit");
                self.send(WorkerEvent::Reply(WorkerReply::Snapshot {
                    id: probe.id,
                    probe,
                    snapshot,
                }));
            }
            Completion::Removed {
                probe_id,
                breakpoint_id,
                result,
            } => match result {
                Ok(()) => debug!(probe = %probe_id, breakpoint = %breakpoint_id, "breakpoint removed"),
                Err(error) => {
                    warn!(probe = %probe_id, breakpoint = %breakpoint_id, %error, "failed to remove breakpoint");
                }
            },
        }
    }

    fn installed(
        &mut self,
        probe: Probe,
        batch_id: BatchId,
        url: String,
        result: ProbeResult<SetBreakpointResult>,
    ) {
        self.installing.remove(&probe.id);
        let cancelled = self.cancelled.remove(&probe.id);
        let result = match result {
            Ok(result) => result,
            Err(error) => {
                if !cancelled {
                    self.fail(probe.id, error);
                }
                return;
            }
        };
        if cancelled {
            self.remove_breakpoint(probe.id, result.breakpoint_id);
            return;
        }
        if let Some(actual) = &result.actual_location {
            let line = to_client_line(actual.line_number);
            if line != probe.line {
                debug!(probe = %probe.id, requested = probe.line, line, "breakpoint moved by host");
            }
        }
        info!(probe = %probe.id, breakpoint = %result.breakpoint_id, %url, "breakpoint installed");
        let location = probe.location();
        let displaced = self.breakpoints.insert(InstalledBreakpoint {
            breakpoint_id: result.breakpoint_id.clone(),
            probe,
            batch_id,
            url,
            location,
        });
        if let Some(previous) = displaced {
            if previous.breakpoint_id != result.breakpoint_id {
                self.remove_breakpoint(previous.probe.id, previous.breakpoint_id);
            }
        }
    }

    fn fail(&mut self, id: ProbeId, error: ProbeError) {
        self.installing.remove(&id);
        self.cancelled.remove(&id);
        debug!(probe = %id, %error, "probe failed");
        self.send(WorkerEvent::Reply(WorkerReply::Error { id, error }));
    }

    fn send(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            debug!("controller gone; dropping worker event");
        }
    }
}
