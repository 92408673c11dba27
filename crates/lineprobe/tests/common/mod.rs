#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use lineprobe::{Connector, ProbeError, ProbeResult, Transport, TransportPeer};

pub const NOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Something the fake host runtime observed or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    Connected,
    Enabled,
    BreakpointSet {
        breakpoint_id: String,
        script_id: String,
        line_number: u64,
    },
    BreakpointRemoved {
        breakpoint_id: String,
    },
    PropertiesRead {
        object_id: String,
    },
    Resumed,
}

#[derive(Debug)]
enum Control {
    /// Execution reached a zero-based line; pause on breakpoints set there.
    Reach { line_number: u64 },
    /// Pause reporting exactly these breakpoint ids.
    Pause { hits: Vec<String> },
    Close,
}

struct Shared {
    scripts: Vec<(String, String)>,
    locals: Mutex<Vec<(String, Value)>>,
    objects: Mutex<HashMap<String, Vec<(String, Value)>>>,
    fail_enable: AtomicBool,
    fail_reads: AtomicBool,
    refuse: AtomicBool,
    pause_on_install: AtomicBool,
    connects: AtomicUsize,
    control: Mutex<Option<UnboundedSender<Control>>>,
    notes: UnboundedSender<Note>,
}

/// In-memory stand-in for a `node --inspect` process.
#[derive(Clone)]
pub struct FakeInspector {
    shared: Arc<Shared>,
}

/// Test-side view of what the fake host runtime did.
pub struct Observer {
    notes: UnboundedReceiver<Note>,
}

impl FakeInspector {
    /// Host with the given `(script_id, url)` scripts loaded.
    pub fn new(scripts: &[(&str, &str)]) -> (Self, Observer) {
        let (notes_tx, notes_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            scripts: scripts
                .iter()
                .map(|(id, url)| ((*id).to_string(), (*url).to_string()))
                .collect(),
            locals: Mutex::new(vec![
                ("total".to_string(), json!({ "type": "number", "value": 42 })),
                ("name".to_string(), json!({ "type": "string", "value": "probe" })),
            ]),
            objects: Mutex::new(HashMap::new()),
            fail_enable: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            refuse: AtomicBool::new(false),
            pause_on_install: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            control: Mutex::new(None),
            notes: notes_tx,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            Observer { notes: notes_rx },
        )
    }

    pub fn set_locals(&self, locals: Vec<(&str, Value)>) {
        *self.shared.locals.lock() = locals
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
    }

    /// Own properties reported for a nested object id.
    pub fn set_object(&self, object_id: &str, properties: Vec<(&str, Value)>) {
        self.shared.objects.lock().insert(
            object_id.to_string(),
            properties
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        );
    }

    /// Answer every `Runtime.getProperties` with an error.
    pub fn fail_reads(&self, fail: bool) {
        self.shared.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_enable(&self, fail: bool) {
        self.shared.fail_enable.store(fail, Ordering::SeqCst);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Pause right after answering every `setBreakpoint`.
    pub fn pause_on_install(&self, enabled: bool) {
        self.shared.pause_on_install.store(enabled, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Run the program up to a one-based line.
    pub fn reach(&self, line: u64) {
        self.control(Control::Reach {
            line_number: line - 1,
        });
    }

    pub fn pause_with(&self, hits: &[&str]) {
        self.control(Control::Pause {
            hits: hits.iter().map(|hit| (*hit).to_string()).collect(),
        });
    }

    /// Drop the current connection as if the process went away.
    pub fn close(&self) {
        self.control(Control::Close);
    }

    fn control(&self, control: Control) {
        let sent = self
            .shared
            .control
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(control).is_ok());
        assert!(sent, "fake inspector has no live connection");
    }
}

impl Connector for FakeInspector {
    fn connect(&self) -> BoxFuture<'static, ProbeResult<Transport>> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            if shared.refuse.load(Ordering::SeqCst) {
                return Err(ProbeError::Transport("connection refused".into()));
            }
            shared.connects.fetch_add(1, Ordering::SeqCst);
            let (transport, peer) = Transport::pair();
            let (control_tx, control_rx) = mpsc::unbounded_channel();
            *shared.control.lock() = Some(control_tx);
            let _ = shared.notes.send(Note::Connected);
            tokio::spawn(serve(shared, peer, control_rx));
            Ok(transport)
        })
    }
}

impl Observer {
    pub async fn next(&mut self) -> Note {
        tokio::time::timeout(NOTE_TIMEOUT, self.notes.recv())
            .await
            .expect("timed out waiting for the fake inspector")
            .expect("fake inspector notes closed")
    }

    /// Skip notes until one matches.
    pub async fn wait_for(&mut self, mut wanted: impl FnMut(&Note) -> bool) -> Note {
        loop {
            let note = self.next().await;
            if wanted(&note) {
                return note;
            }
        }
    }

    pub async fn breakpoint_set(&mut self) -> (String, String, u64) {
        match self
            .wait_for(|note| matches!(note, Note::BreakpointSet { .. }))
            .await
        {
            Note::BreakpointSet {
                breakpoint_id,
                script_id,
                line_number,
            } => (breakpoint_id, script_id, line_number),
            other => unreachable!("{other:?}"),
        }
    }

    /// Notes already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<Note> {
        let mut notes = Vec::new();
        while let Ok(note) = self.notes.try_recv() {
            notes.push(note);
        }
        notes
    }
}

struct Installed {
    breakpoint_id: String,
    script_id: String,
    line_number: u64,
}

async fn serve(
    shared: Arc<Shared>,
    mut peer: TransportPeer,
    mut control: UnboundedReceiver<Control>,
) {
    let mut installed: Vec<Installed> = Vec::new();
    let mut next_breakpoint = 0usize;
    loop {
        tokio::select! {
            frame = peer.recv() => {
                let Some(frame) = frame else { return };
                let command: Value = serde_json::from_str(&frame).expect("command is json");
                let id = command["id"].clone();
                let params = &command["params"];
                match command["method"].as_str().unwrap_or_default() {
                    "Debugger.enable" => {
                        if shared.fail_enable.load(Ordering::SeqCst) {
                            peer.send(json!({
                                "id": id,
                                "error": { "code": -32000, "message": "Debugger agent disabled" }
                            }).to_string());
                            continue;
                        }
                        for (script_id, url) in &shared.scripts {
                            peer.send(json!({
                                "method": "Debugger.scriptParsed",
                                "params": { "scriptId": script_id, "url": url, "startLine": 0 }
                            }).to_string());
                        }
                        peer.send(json!({ "id": id, "result": { "debuggerId": "fake" } }).to_string());
                        let _ = shared.notes.send(Note::Enabled);
                    }
                    "Debugger.setBreakpoint" => {
                        let script_id = params["location"]["scriptId"].as_str().unwrap_or_default().to_string();
                        let line_number = params["location"]["lineNumber"].as_u64().unwrap_or_default();
                        if installed.iter().any(|entry| entry.script_id == script_id && entry.line_number == line_number) {
                            peer.send(json!({
                                "id": id,
                                "error": { "code": -32000, "message": "Breakpoint at specified location already exists." }
                            }).to_string());
                            continue;
                        }
                        next_breakpoint += 1;
                        let breakpoint_id = format!("{next_breakpoint}:{line_number}:0:{script_id}");
                        peer.send(json!({
                            "id": id,
                            "result": {
                                "breakpointId": breakpoint_id,
                                "actualLocation": { "scriptId": script_id, "lineNumber": line_number, "columnNumber": 2 }
                            }
                        }).to_string());
                        let _ = shared.notes.send(Note::BreakpointSet {
                            breakpoint_id: breakpoint_id.clone(),
                            script_id: script_id.clone(),
                            line_number,
                        });
                        if shared.pause_on_install.load(Ordering::SeqCst) {
                            peer.send(paused(&shared, &script_id, line_number, &[breakpoint_id.clone()]));
                        }
                        installed.push(Installed { breakpoint_id, script_id, line_number });
                    }
                    "Debugger.removeBreakpoint" => {
                        let breakpoint_id = params["breakpointId"].as_str().unwrap_or_default().to_string();
                        installed.retain(|entry| entry.breakpoint_id != breakpoint_id);
                        peer.send(json!({ "id": id, "result": {} }).to_string());
                        let _ = shared.notes.send(Note::BreakpointRemoved { breakpoint_id });
                    }
                    "Runtime.getProperties" => {
                        let object_id = params["objectId"].as_str().unwrap_or_default().to_string();
                        if shared.fail_reads.load(Ordering::SeqCst) {
                            peer.send(json!({
                                "id": id,
                                "error": { "code": -32000, "message": "Could not find object with given id" }
                            }).to_string());
                            continue;
                        }
                        let properties = if object_id == "scope-local" {
                            shared.locals.lock().clone()
                        } else {
                            shared.objects.lock().get(&object_id).cloned().unwrap_or_default()
                        };
                        let result: Vec<Value> = properties
                            .iter()
                            .map(|(name, value)| json!({ "name": name, "value": value }))
                            .collect();
                        peer.send(json!({ "id": id, "result": { "result": result } }).to_string());
                        let _ = shared.notes.send(Note::PropertiesRead { object_id });
                    }
                    "Debugger.resume" => {
                        peer.send(json!({ "id": id, "result": {} }).to_string());
                        peer.send(json!({ "method": "Debugger.resumed", "params": {} }).to_string());
                        let _ = shared.notes.send(Note::Resumed);
                    }
                    other => {
                        peer.send(json!({
                            "id": id,
                            "error": { "code": -32601, "message": format!("'{other}' wasn't found") }
                        }).to_string());
                    }
                }
            }
            request = control.recv() => match request {
                Some(Control::Reach { line_number }) => {
                    let hits: Vec<String> = installed
                        .iter()
                        .filter(|entry| entry.line_number == line_number)
                        .map(|entry| entry.breakpoint_id.clone())
                        .collect();
                    if let Some(first) = installed.iter().find(|entry| entry.line_number == line_number) {
                        peer.send(paused(&shared, &first.script_id, line_number, &hits));
                    }
                }
                Some(Control::Pause { hits }) => {
                    let script_id = shared.scripts.first().map(|(id, _)| id.clone()).unwrap_or_default();
                    peer.send(paused(&shared, &script_id, 0, &hits));
                }
                Some(Control::Close) | None => return,
            }
        }
    }
}

fn paused(shared: &Shared, script_id: &str, line_number: u64, hits: &[String]) -> String {
    let url = shared
        .scripts
        .iter()
        .find(|(id, _)| id == script_id)
        .map(|(_, url)| url.clone())
        .unwrap_or_default();
    json!({
        "method": "Debugger.paused",
        "params": {
            "reason": "other",
            "hitBreakpoints": hits,
            "callFrames": [
                {
                    "callFrameId": "frame-0",
                    "functionName": "handle",
                    "url": url,
                    "location": { "scriptId": script_id, "lineNumber": line_number, "columnNumber": 2 },
                    "scopeChain": [
                        { "type": "local", "object": { "type": "object", "objectId": "scope-local" } },
                        { "type": "closure", "object": { "type": "object", "objectId": "scope-closure" } },
                        { "type": "global", "object": { "type": "object", "objectId": "scope-global" } }
                    ]
                },
                {
                    "callFrameId": "frame-1",
                    "functionName": "",
                    "url": url,
                    "location": { "scriptId": script_id, "lineNumber": 0, "columnNumber": 0 },
                    "scopeChain": []
                }
            ]
        }
    })
    .to_string()
}
