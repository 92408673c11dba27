//! Chrome DevTools Protocol message types (V8 inspector subset).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

/// Runtime-assigned script identifier.
pub type ScriptId = SmolStr;

/// Runtime-assigned breakpoint identifier.
pub type BreakpointId = SmolStr;

/// Outgoing protocol command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
}

/// Incoming frame: either a response to a command or a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ResponseError>,
    },
    Notification {
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
}

/// `Debugger.scriptParsed` notification body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsed {
    pub script_id: ScriptId,
    #[serde(default)]
    pub url: String,
}

/// Protocol-level location (zero-based line and column).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub script_id: ScriptId,
    pub line_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

/// Mirror object describing a runtime value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unserializable_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<SmolStr>,
}

/// One entry of a call frame's scope chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(rename = "type")]
    pub kind: String,
    pub object: RemoteObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Scope {
    /// Whether this scope holds the frame's own variables.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.kind.as_str(), "local" | "block")
    }
}

/// Call frame reported by `Debugger.paused`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub call_frame_id: SmolStr,
    #[serde(default)]
    pub function_name: String,
    pub location: Location,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub scope_chain: Vec<Scope>,
}

/// `Debugger.paused` notification body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Paused {
    pub call_frames: Vec<CallFrame>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub hit_breakpoints: Vec<BreakpointId>,
}

/// `Debugger.setBreakpoint` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointParams {
    pub location: Location,
}

/// `Debugger.setBreakpoint` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointResult {
    pub breakpoint_id: BreakpointId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_location: Option<Location>,
}

/// `Debugger.removeBreakpoint` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoveBreakpointParams {
    pub breakpoint_id: BreakpointId,
}

/// `Runtime.getProperties` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetPropertiesParams {
    pub object_id: SmolStr,
    pub own_properties: bool,
}

/// Single property of an inspected object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<RemoteObject>,
}

/// `Runtime.getProperties` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetPropertiesResult {
    #[serde(default)]
    pub result: Vec<PropertyDescriptor>,
}

pub const DEBUGGER_ENABLE: &str = "Debugger.enable";
pub const DEBUGGER_SET_BREAKPOINT: &str = "Debugger.setBreakpoint";
pub const DEBUGGER_REMOVE_BREAKPOINT: &str = "Debugger.removeBreakpoint";
pub const DEBUGGER_RESUME: &str = "Debugger.resume";
pub const RUNTIME_GET_PROPERTIES: &str = "Runtime.getProperties";

pub const EVENT_SCRIPT_PARSED: &str = "Debugger.scriptParsed";
pub const EVENT_PAUSED: &str = "Debugger.paused";
pub const EVENT_RESUMED: &str = "Debugger.resumed";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_distinguishes_responses_from_notifications() {
        let response: Incoming =
            serde_json::from_str(r#"{"id":3,"result":{"breakpointId":"1:7:0:4"}}"#).unwrap();
        assert!(matches!(response, Incoming::Response { id: 3, .. }));

        let failure: Incoming = serde_json::from_str(
            r#"{"id":4,"error":{"code":-32000,"message":"Invalid script id"}}"#,
        )
        .unwrap();
        match failure {
            Incoming::Response { error: Some(err), .. } => assert_eq!(err.code, -32000),
            other => panic!("unexpected frame {other:?}"),
        }

        let event: Incoming = serde_json::from_str(
            r#"{"method":"Debugger.scriptParsed","params":{"scriptId":"42","url":"file:///a/server.js"}}"#,
        )
        .unwrap();
        assert!(matches!(event, Incoming::Notification { ref method, .. } if method == EVENT_SCRIPT_PARSED));
    }

    #[test]
    fn paused_body_tolerates_missing_optional_fields() {
        let paused: Paused = serde_json::from_value(serde_json::json!({
            "callFrames": [{
                "callFrameId": "cf-0",
                "location": { "scriptId": "42", "lineNumber": 7, "columnNumber": 2 },
                "scopeChain": [
                    { "type": "local", "object": { "type": "object", "objectId": "scope-1" } },
                    { "type": "global", "object": { "type": "object", "objectId": "scope-2" } }
                ]
            }]
        }))
        .unwrap();
        assert!(paused.hit_breakpoints.is_empty());
        let frame = &paused.call_frames[0];
        assert_eq!(frame.function_name, "");
        assert!(frame.scope_chain[0].is_local());
        assert!(!frame.scope_chain[1].is_local());
    }
}
