//! On-demand line probes for V8 inspector targets.
//!
//! A [`Controller`] installs a breakpoint at a partial path and one-based
//! line in a running host runtime, waits for the first hit, and returns a
//! [`Snapshot`] of the paused stack and innermost locals. The runtime is
//! resumed as soon as the capture has been requested.
//!
//! Layers, bottom-up:
//! - [`transport`]: text-frame channels to the inspector
//! - [`session`]: command/response correlation and event decoding
//! - [`scripts`] and [`breakpoints`]: script resolution and bookkeeping
//! - [`capture`]: snapshot assembly on pause
//! - [`worker`]: per-connection thread serving install requests
//! - [`controller`]: caller-facing correlation of requests and replies

pub mod breakpoints;
pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod probe;
pub mod protocol;
pub mod scripts;
pub mod session;
pub mod transport;
pub mod worker;

pub use capture::CaptureSettings;
pub use config::ProbeConfig;
pub use controller::{Controller, ProbeReply};
pub use error::{ProbeError, ProbeResult};
pub use probe::{
    BatchId, CapturedValue, Captures, LineCapture, Probe, ProbeId, ProbeLocation, Snapshot,
    SnapshotProbe, StackFrame,
};
pub use transport::{connect_websocket, Connector, Transport, TransportPeer, WebSocketConnector};
