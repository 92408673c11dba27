//! Pause handling: stack + locals capture with an immediate resume.
//! - begin_capture: attribute a pause, issue scope reads then resume
//! - expand: read nested objects up to the configured reference depth
//! - stack_from_frames: zero-based protocol frames to one-based stack
//! - captured_value: remote object to snapshot value representation

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::breakpoints::{BreakpointRegistry, InstalledBreakpoint};
use crate::probe::{
    to_client_line, BatchId, Captures, CapturedValue, LineCapture, Probe, Snapshot,
    SnapshotProbe, StackFrame,
};
use crate::protocol::{CallFrame, GetPropertiesResult, Paused, RemoteObject};
use crate::scripts::ScriptRegistry;
use crate::session::Session;

const NOT_CAPTURED_DEPTH: &str = "depth";
const PROTOTYPE_FIELD: &str = "__proto__";

/// Capture limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Maximum number of locals recorded per hit, and of fields recorded
    /// per expanded object.
    pub max_locals: usize,
    /// Levels of nested objects expanded below each local; 0 keeps every
    /// object shallow.
    pub max_reference_depth: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_locals: 64,
            max_reference_depth: 3,
        }
    }
}

/// A finished capture for a tracked breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedHit {
    pub probe: Probe,
    pub snapshot: Snapshot,
}

/// A pause attributed to a tracked breakpoint.
pub struct Capture {
    /// Entry the pause was attributed to. It has left the registry; the
    /// caller still owns removing the breakpoint from the host.
    pub breakpoint: InstalledBreakpoint,
    pub step: BoxFuture<'static, CaptureStep>,
}

/// Outcome of one round of property reads.
#[derive(Debug)]
pub enum CaptureStep {
    Done(CapturedHit),
    /// Objects remain to be expanded; drive them with [`expand`].
    Expand(Expansion),
}

/// Capture in progress, waiting on nested object reads.
#[derive(Debug)]
pub struct Expansion {
    draft: Draft,
    /// Objects to read this round, addressed by their path from a local.
    frontier: Vec<(Vec<String>, SmolStr)>,
    /// Reference depth of the objects in `frontier` (locals are depth 1).
    depth: usize,
    settings: CaptureSettings,
}

#[derive(Debug)]
struct Draft {
    probe: Probe,
    batch_id: BatchId,
    timestamp: i64,
    stack: Vec<StackFrame>,
    locals: IndexMap<String, CapturedValue>,
}

/// React to a pause notification.
///
/// `Debugger.resume` is always written before this returns. For a tracked
/// breakpoint the innermost frame's scope reads are written first, so the
/// host answers them while still paused, and the returned step assembles
/// the locals once those answers arrive. Untracked pauses yield `None`.
pub fn begin_capture(
    session: &mut Session,
    paused: Paused,
    breakpoints: &mut BreakpointRegistry,
    scripts: &ScriptRegistry,
    settings: CaptureSettings,
) -> Option<Capture> {
    let Some(breakpoint) = breakpoints.take_first_hit(&paused.hit_breakpoints) else {
        debug!(
            hits = ?paused.hit_breakpoints,
            reason = %paused.reason,
            "pause on untracked breakpoint"
        );
        let _ = session.resume();
        return None;
    };
    let draft = Draft {
        probe: breakpoint.probe.clone(),
        batch_id: breakpoint.batch_id,
        timestamp: unix_millis(),
        stack: stack_from_frames(&paused.call_frames, scripts),
        locals: IndexMap::new(),
    };

    let reads = paused
        .call_frames
        .first()
        .map(|frame| {
            frame
                .scope_chain
                .iter()
                .filter(|scope| scope.is_local())
                .filter_map(|scope| scope.object.object_id.clone())
                .map(|object_id| session.get_properties(object_id))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let resume = session.resume();

    let step = async move {
        let mut draft = draft;
        let mut frontier = Vec::new();
        for read in join_all(reads).await {
            match read {
                Ok(properties) => {
                    for (name, object) in own_values(properties) {
                        if draft.locals.len() >= settings.max_locals {
                            break;
                        }
                        // Inner scopes come first and shadow outer names.
                        if draft.locals.contains_key(&name) {
                            continue;
                        }
                        if settings.max_reference_depth > 0 {
                            if let Some(object_id) = expandable(&object) {
                                frontier.push((vec![name.clone()], object_id));
                            }
                        }
                        draft.locals.insert(name, captured_value(&object));
                    }
                }
                Err(err) => warn!(probe = %draft.probe.id, %err, "failed to read frame locals"),
            }
        }
        if let Err(err) = resume.await {
            warn!(probe = %draft.probe.id, %err, "resume after capture failed");
        }
        Expansion {
            draft,
            frontier,
            depth: 1,
            settings,
        }
        .next_step()
    };
    Some(Capture {
        breakpoint,
        step: step.boxed(),
    })
}

/// Read the properties of every object in the expansion's frontier.
///
/// The host may already have resumed; an object it can no longer read keeps
/// its shallow representation.
pub fn expand(session: &mut Session, expansion: Expansion) -> BoxFuture<'static, CaptureStep> {
    let Expansion {
        mut draft,
        frontier,
        depth,
        settings,
    } = expansion;
    let reads: Vec<_> = frontier
        .into_iter()
        .map(|(path, object_id)| {
            let read = session.get_properties(object_id.clone());
            async move { (path, object_id, read.await) }
        })
        .collect();
    async move {
        let mut next = Vec::new();
        for (path, object_id, read) in join_all(reads).await {
            let properties = match read {
                Ok(properties) => properties,
                Err(err) => {
                    debug!(probe = %draft.probe.id, object = %object_id, %err, "object not expanded");
                    continue;
                }
            };
            let mut fields = IndexMap::new();
            for (name, object) in own_values(properties) {
                if fields.len() >= settings.max_locals {
                    break;
                }
                if name == PROTOTYPE_FIELD {
                    continue;
                }
                if depth < settings.max_reference_depth {
                    if let Some(object_id) = expandable(&object) {
                        let mut child = path.clone();
                        child.push(name.clone());
                        next.push((child, object_id));
                    }
                }
                fields.insert(name, captured_value(&object));
            }
            if let Some(value) = value_at(&mut draft.locals, &path) {
                value.not_captured_reason = None;
                value.fields = Some(fields);
            }
        }
        Expansion {
            draft,
            frontier: next,
            depth: depth + 1,
            settings,
        }
        .next_step()
    }
    .boxed()
}

impl Expansion {
    fn next_step(self) -> CaptureStep {
        if self.frontier.is_empty() {
            CaptureStep::Done(self.draft.finish())
        } else {
            CaptureStep::Expand(self)
        }
    }
}

impl Draft {
    fn finish(self) -> CapturedHit {
        let probe = self.probe;
        let captures = (!self.locals.is_empty()).then(|| Captures {
            lines: [(
                probe.line.to_string(),
                LineCapture {
                    locals: self.locals,
                },
            )]
            .into_iter()
            .collect(),
        });
        let snapshot = Snapshot {
            id: probe.id,
            batch_id: self.batch_id,
            timestamp: self.timestamp,
            probe: SnapshotProbe {
                id: probe.id,
                version: probe.version,
                location: probe.location(),
            },
            stack: self.stack,
            captures,
        };
        CapturedHit { probe, snapshot }
    }
}

/// Properties that carry a value; accessors are skipped.
fn own_values(properties: GetPropertiesResult) -> impl Iterator<Item = (String, RemoteObject)> {
    properties
        .result
        .into_iter()
        .filter_map(|property| Some((property.name, property.value?)))
}

fn expandable(object: &RemoteObject) -> Option<SmolStr> {
    if object.kind != "object" || object.subtype.as_deref() == Some("null") {
        return None;
    }
    object.object_id.clone()
}

fn value_at<'a>(
    locals: &'a mut IndexMap<String, CapturedValue>,
    path: &[String],
) -> Option<&'a mut CapturedValue> {
    let (first, rest) = path.split_first()?;
    let mut value = locals.get_mut(first)?;
    for name in rest {
        value = value.fields.as_mut()?.get_mut(name)?;
    }
    Some(value)
}

/// Convert protocol call frames (innermost first) into a one-based stack.
#[must_use]
pub fn stack_from_frames(frames: &[CallFrame], scripts: &ScriptRegistry) -> Vec<StackFrame> {
    frames
        .iter()
        .map(|frame| {
            let file_name = if frame.url.is_empty() {
                scripts
                    .url_for(&frame.location.script_id)
                    .unwrap_or_default()
                    .to_string()
            } else {
                frame.url.clone()
            };
            StackFrame {
                file_name,
                function: frame.function_name.clone(),
                line_number: to_client_line(frame.location.line_number),
                column_number: to_client_line(frame.location.column_number.unwrap_or(0)),
            }
        })
        .collect()
}

/// Shallow representation of a runtime value. Objects are marked as not
/// captured until [`expand`] fills in their fields.
#[must_use]
pub fn captured_value(object: &RemoteObject) -> CapturedValue {
    match object.kind.as_str() {
        "undefined" => CapturedValue {
            kind: "undefined".to_string(),
            ..CapturedValue::default()
        },
        "object" if object.subtype.as_deref() == Some("null") => CapturedValue {
            kind: "null".to_string(),
            is_null: Some(true),
            ..CapturedValue::default()
        },
        "string" | "number" | "boolean" | "bigint" | "symbol" => CapturedValue {
            kind: object.kind.clone(),
            value: primitive_text(object),
            ..CapturedValue::default()
        },
        _ => CapturedValue {
            kind: object
                .class_name
                .clone()
                .unwrap_or_else(|| object.kind.clone()),
            value: object.description.clone(),
            not_captured_reason: Some(NOT_CAPTURED_DEPTH.to_string()),
            ..CapturedValue::default()
        },
    }
}

fn primitive_text(object: &RemoteObject) -> Option<String> {
    if let Some(text) = &object.unserializable_value {
        return Some(text.clone());
    }
    match &object.value {
        Some(Value::String(text)) => Some(text.clone()),
        Some(value) => Some(value.to_string()),
        None => object.description.clone(),
    }
}

fn unix_millis() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}
