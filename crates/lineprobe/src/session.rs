//! Debug-protocol session over a single host-runtime connection.
//! - command bookkeeping: id assignment + pending responders
//! - typed commands: enable/setBreakpoint/removeBreakpoint/resume/getProperties
//! - recv: route responses, decode notifications

use std::collections::HashMap;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde_json::Value;
use smol_str::SmolStr;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{ProbeError, ProbeResult};
use crate::protocol::{
    BreakpointId, Command, GetPropertiesParams, GetPropertiesResult, Incoming, Location, Paused,
    RemoveBreakpointParams, ScriptParsed, SetBreakpointParams, SetBreakpointResult,
    DEBUGGER_ENABLE, DEBUGGER_REMOVE_BREAKPOINT, DEBUGGER_RESUME, DEBUGGER_SET_BREAKPOINT,
    EVENT_PAUSED, EVENT_RESUMED, EVENT_SCRIPT_PARSED, RUNTIME_GET_PROPERTIES,
};
use crate::transport::Transport;

type Responder = oneshot::Sender<ProbeResult<Value>>;

/// Decoded protocol notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ScriptParsed(ScriptParsed),
    Paused(Paused),
    Resumed,
    Other { method: SmolStr },
}

/// One inbound frame after routing.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    /// A command response was handed to its waiting future.
    Acknowledged { id: u64 },
    Event(SessionEvent),
}

/// Owns the connection to the host runtime's inspector.
///
/// Commands are written when the method is called; the returned future only
/// waits for the response. Several commands can therefore be pipelined and
/// the host applies them in call order.
#[derive(Debug)]
pub struct Session {
    outbound: UnboundedSender<String>,
    inbound: UnboundedReceiver<String>,
    pending: HashMap<u64, Responder>,
    next_id: u64,
}

impl Session {
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self {
            outbound: transport.outbound,
            inbound: transport.inbound,
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    /// Issue `Debugger.enable`. Re-issuing it on an enabled session is a no-op
    /// on the host side; scripts are re-announced via `scriptParsed`.
    pub fn enable(&mut self) -> impl Future<Output = ProbeResult<()>> + Send + 'static {
        let reply = self.command(DEBUGGER_ENABLE, Ok(None));
        async move { reply.await.map(|_| ()) }
    }

    /// Install a breakpoint at a zero-based protocol location.
    pub fn set_breakpoint(
        &mut self,
        location: Location,
    ) -> impl Future<Output = ProbeResult<SetBreakpointResult>> + Send + 'static {
        let params = encode(&SetBreakpointParams { location });
        let reply = self.command(DEBUGGER_SET_BREAKPOINT, params);
        decode(DEBUGGER_SET_BREAKPOINT, reply)
    }

    pub fn remove_breakpoint(
        &mut self,
        breakpoint_id: BreakpointId,
    ) -> impl Future<Output = ProbeResult<()>> + Send + 'static {
        let params = encode(&RemoveBreakpointParams { breakpoint_id });
        let reply = self.command(DEBUGGER_REMOVE_BREAKPOINT, params);
        async move { reply.await.map(|_| ()) }
    }

    /// Resume a paused runtime. Must be issued for every pause notification.
    pub fn resume(&mut self) -> impl Future<Output = ProbeResult<()>> + Send + 'static {
        let reply = self.command(DEBUGGER_RESUME, Ok(None));
        async move { reply.await.map(|_| ()) }
    }

    /// Read the own properties of a remote object (e.g. a scope object).
    pub fn get_properties(
        &mut self,
        object_id: SmolStr,
    ) -> impl Future<Output = ProbeResult<GetPropertiesResult>> + Send + 'static {
        let params = encode(&GetPropertiesParams {
            object_id,
            own_properties: true,
        });
        let reply = self.command(RUNTIME_GET_PROPERTIES, params);
        decode(RUNTIME_GET_PROPERTIES, reply)
    }

    /// Read the next inbound frame.
    ///
    /// Returns `None` once the connection is closed; every outstanding
    /// command then fails with a connection-closed protocol error.
    pub async fn recv(&mut self) -> Option<SessionMessage> {
        loop {
            let Some(frame) = self.inbound.recv().await else {
                self.close();
                return None;
            };
            match serde_json::from_str::<Incoming>(&frame) {
                Ok(Incoming::Response { id, result, error }) => {
                    self.respond(id, result, error.map(|err| (err.code, err.message)));
                    return Some(SessionMessage::Acknowledged { id });
                }
                Ok(Incoming::Notification { method, params }) => {
                    return Some(SessionMessage::Event(decode_event(method, params)));
                }
                Err(err) => {
                    warn!(%err, "dropping malformed protocol frame");
                }
            }
        }
    }

    /// Number of commands still waiting for a response.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    fn command(
        &mut self,
        method: &'static str,
        params: ProbeResult<Option<Value>>,
    ) -> impl Future<Output = ProbeResult<Value>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        match params.and_then(|params| self.write(method, params)) {
            Ok(id) => {
                self.pending.insert(id, tx);
            }
            Err(err) => {
                let _ = tx.send(Err(err));
            }
        }
        async move {
            rx.await
                .unwrap_or_else(|_| Err(ProbeError::connection_closed()))
        }
    }

    fn write(&mut self, method: &'static str, params: Option<Value>) -> ProbeResult<u64> {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        let frame = serde_json::to_string(&Command {
            id,
            method: method.to_string(),
            params,
        })
        .map_err(|err| ProbeError::protocol(-1, format!("encode {method}: {err}")))?;
        trace!(id, method, "command");
        self.outbound
            .send(frame)
            .map_err(|_| ProbeError::connection_closed())?;
        Ok(id)
    }

    fn respond(&mut self, id: u64, result: Option<Value>, error: Option<(i64, String)>) {
        let Some(responder) = self.pending.remove(&id) else {
            debug!(id, "response for unknown command");
            return;
        };
        let outcome = match error {
            Some((code, message)) => Err(ProbeError::protocol(code, message)),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = responder.send(outcome);
    }

    fn close(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                outstanding = self.pending.len(),
                "connection closed with commands in flight"
            );
        }
        for (_, responder) in self.pending.drain() {
            let _ = responder.send(Err(ProbeError::connection_closed()));
        }
    }
}

fn encode<T: serde::Serialize>(params: &T) -> ProbeResult<Option<Value>> {
    serde_json::to_value(params)
        .map(Some)
        .map_err(|err| ProbeError::protocol(-1, format!("encode params: {err}")))
}

fn decode<T: DeserializeOwned + Send + 'static>(
    method: &'static str,
    reply: impl Future<Output = ProbeResult<Value>> + Send + 'static,
) -> impl Future<Output = ProbeResult<T>> + Send + 'static {
    async move {
        let value = reply.await?;
        serde_json::from_value(value)
            .map_err(|err| ProbeError::protocol(-1, format!("malformed {method} result: {err}")))
    }
}

fn decode_event(method: String, params: Option<Value>) -> SessionEvent {
    let params = params.unwrap_or(Value::Null);
    let decoded = match method.as_str() {
        EVENT_SCRIPT_PARSED => serde_json::from_value(params).map(SessionEvent::ScriptParsed),
        EVENT_PAUSED => serde_json::from_value(params).map(SessionEvent::Paused),
        EVENT_RESUMED => Ok(SessionEvent::Resumed),
        _ => {
            trace!(method = %method, "ignoring notification");
            Ok(SessionEvent::Other {
                method: method.as_str().into(),
            })
        }
    };
    decoded.unwrap_or_else(|err| {
        warn!(method = %method, %err, "malformed notification body");
        SessionEvent::Other {
            method: method.as_str().into(),
        }
    })
}
