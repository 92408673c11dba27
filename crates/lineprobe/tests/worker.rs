mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc::UnboundedReceiver;

use common::{FakeInspector, Note};
use lineprobe::worker::{spawn_worker, WorkerEvent, WorkerReply, WorkerRequest, PANIC_EXIT_CODE};
use lineprobe::{
    BatchId, CaptureSettings, Connector, Probe, ProbeError, ProbeId, ProbeResult, Transport,
};

const SCRIPTS: &[(&str, &str)] = &[("7", "file:///srv/jobs/worker.js")];

async fn next_event(events: &mut UnboundedReceiver<WorkerEvent>) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for worker event")
        .expect("worker event channel closed")
}

fn install(line: u32, batch_id: BatchId) -> (Probe, WorkerRequest) {
    let probe = Probe::new(ProbeId::new(), "worker.js", line).unwrap();
    let request = WorkerRequest::Install {
        probe: probe.clone(),
        batch_id,
    };
    (probe, request)
}

#[tokio::test]
async fn worker_goes_online_and_exits_cleanly_when_controller_hangs_up() {
    let (inspector, _observer) = FakeInspector::new(SCRIPTS);
    let channels = spawn_worker(Arc::new(inspector), CaptureSettings::default()).unwrap();
    let mut events = channels.events;
    assert_eq!(next_event(&mut events).await, WorkerEvent::Online);

    drop(channels.requests);
    assert_eq!(
        next_event(&mut events).await,
        WorkerEvent::Exited { code: 0 }
    );
    assert!(events.recv().await.is_none());
    channels.thread.join().unwrap();
}

#[tokio::test]
async fn replies_carry_the_request_batch() {
    let (inspector, mut observer) = FakeInspector::new(SCRIPTS);
    let channels = spawn_worker(Arc::new(inspector.clone()), CaptureSettings::default()).unwrap();
    let mut events = channels.events;
    assert_eq!(next_event(&mut events).await, WorkerEvent::Online);

    let batch_id = BatchId::new();
    let (probe, request) = install(14, batch_id);
    channels.requests.send(request).unwrap();
    observer.breakpoint_set().await;
    inspector.reach(14);

    match next_event(&mut events).await {
        WorkerEvent::Reply(WorkerReply::Snapshot {
            id,
            probe: replied,
            snapshot,
        }) => {
            assert_eq!(id, probe.id);
            assert_eq!(replied, probe);
            assert_eq!(snapshot.batch_id, batch_id);
            assert_eq!(snapshot.stack[0].file_name, "file:///srv/jobs/worker.js");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn failed_install_replies_with_an_error() {
    let (inspector, _observer) = FakeInspector::new(SCRIPTS);
    let channels = spawn_worker(Arc::new(inspector), CaptureSettings::default()).unwrap();
    let mut events = channels.events;
    assert_eq!(next_event(&mut events).await, WorkerEvent::Online);

    let probe = Probe::new(ProbeId::new(), "elsewhere.js", 3).unwrap();
    channels
        .requests
        .send(WorkerRequest::Install {
            probe: probe.clone(),
            batch_id: BatchId::new(),
        })
        .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        WorkerEvent::Reply(WorkerReply::Error {
            id: probe.id,
            error: ProbeError::ScriptNotFound {
                path: "elsewhere.js".into()
            },
        })
    );
}

#[tokio::test]
async fn uninstall_removes_an_installed_breakpoint() {
    let (inspector, mut observer) = FakeInspector::new(SCRIPTS);
    let channels = spawn_worker(Arc::new(inspector), CaptureSettings::default()).unwrap();
    let mut events = channels.events;
    assert_eq!(next_event(&mut events).await, WorkerEvent::Online);

    let (probe, request) = install(9, BatchId::new());
    channels.requests.send(request).unwrap();
    let (breakpoint_id, _, line_number) = observer.breakpoint_set().await;
    assert_eq!(line_number, 8);

    channels
        .requests
        .send(WorkerRequest::Uninstall { probe_id: probe.id })
        .unwrap();
    let removed = observer
        .wait_for(|note| matches!(note, Note::BreakpointRemoved { .. }))
        .await;
    assert_eq!(removed, Note::BreakpointRemoved { breakpoint_id });
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn uninstall_while_enabling_skips_the_install() {
    let (inspector, mut observer) = FakeInspector::new(SCRIPTS);
    let channels = spawn_worker(Arc::new(inspector), CaptureSettings::default()).unwrap();
    let mut events = channels.events;
    assert_eq!(next_event(&mut events).await, WorkerEvent::Online);

    let (dropped, request) = install(9, BatchId::new());
    channels.requests.send(request).unwrap();
    channels
        .requests
        .send(WorkerRequest::Uninstall {
            probe_id: dropped.id,
        })
        .unwrap();
    let (_, request) = install(20, BatchId::new());
    channels.requests.send(request).unwrap();

    let (_, _, line_number) = observer.breakpoint_set().await;
    assert_eq!(line_number, 19);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn lost_connection_exits_with_failure() {
    let (inspector, mut observer) = FakeInspector::new(SCRIPTS);
    let channels = spawn_worker(Arc::new(inspector.clone()), CaptureSettings::default()).unwrap();
    let mut events = channels.events;
    assert_eq!(next_event(&mut events).await, WorkerEvent::Online);
    observer.wait_for(|note| *note == Note::Connected).await;

    inspector.close();
    assert!(matches!(
        next_event(&mut events).await,
        WorkerEvent::Error { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        WorkerEvent::Exited { code: 1 }
    );
    drop(channels.requests);
}

struct PanickingConnector;

impl Connector for PanickingConnector {
    fn connect(&self) -> BoxFuture<'static, ProbeResult<Transport>> {
        Box::pin(async { Err::<Transport, ProbeError>(handshake()) })
    }
}

fn handshake() -> ProbeError {
    panic!("inspector handshake exploded")
}

#[tokio::test]
async fn panicking_worker_reports_panic_exit_code() {
    let channels = spawn_worker(Arc::new(PanickingConnector), CaptureSettings::default()).unwrap();
    let mut events = channels.events;
    assert_eq!(
        next_event(&mut events).await,
        WorkerEvent::Exited {
            code: PANIC_EXIT_CODE
        }
    );
    assert!(channels.thread.join().is_err());
}
