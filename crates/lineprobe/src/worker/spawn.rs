//! Worker thread bootstrap.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use super::{Worker, WorkerEvent, WorkerRequest};
use crate::capture::CaptureSettings;
use crate::error::{ProbeError, ProbeResult};
use crate::session::Session;
use crate::transport::Connector;

pub const WORKER_THREAD_NAME: &str = "lineprobe-worker";

/// Exit code reported when the worker thread panicked.
pub const PANIC_EXIT_CODE: i32 = 101;

const CLEAN_EXIT_CODE: i32 = 0;
const FAILURE_EXIT_CODE: i32 = 1;

/// Controller-side ends of a running worker.
#[derive(Debug)]
pub struct WorkerChannels {
    pub requests: UnboundedSender<WorkerRequest>,
    pub events: UnboundedReceiver<WorkerEvent>,
    pub thread: JoinHandle<()>,
}

/// Start a worker on a dedicated thread with its own runtime.
///
/// The worker connects through `connector`, reports [`WorkerEvent::Online`]
/// and then serves requests. Whatever happens, the last event it emits is
/// [`WorkerEvent::Exited`].
pub fn spawn_worker(
    connector: Arc<dyn Connector>,
    settings: CaptureSettings,
) -> ProbeResult<WorkerChannels> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let thread = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let mut exit = ExitSignal {
                events: event_tx.clone(),
                code: FAILURE_EXIT_CODE,
            };
            exit.code = run(connector.as_ref(), settings, request_rx, event_tx);
        })
        .map_err(|err| ProbeError::Spawn(err.to_string().into()))?;
    Ok(WorkerChannels {
        requests: request_tx,
        events: event_rx,
        thread,
    })
}

fn run(
    connector: &dyn Connector,
    settings: CaptureSettings,
    requests: UnboundedReceiver<WorkerRequest>,
    events: UnboundedSender<WorkerEvent>,
) -> i32 {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = events.send(WorkerEvent::Error {
                message: format!("failed to build worker runtime: {err}"),
            });
            return FAILURE_EXIT_CODE;
        }
    };
    let outcome = runtime.block_on(async {
        let transport = connector.connect().await?;
        info!("probe worker online");
        let _ = events.send(WorkerEvent::Online);
        Worker::new(Session::new(transport), requests, events.clone(), settings)
            .run()
            .await
    });
    match outcome {
        Ok(()) => CLEAN_EXIT_CODE,
        Err(err) => {
            warn!(%err, "probe worker failed");
            let _ = events.send(WorkerEvent::Error {
                message: err.to_string(),
            });
            FAILURE_EXIT_CODE
        }
    }
}

/// Emits [`WorkerEvent::Exited`] when the worker thread unwinds or returns.
struct ExitSignal {
    events: UnboundedSender<WorkerEvent>,
    code: i32,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let code = if thread::panicking() {
            PANIC_EXIT_CODE
        } else {
            self.code
        };
        let _ = self.events.send(WorkerEvent::Exited { code });
    }
}
