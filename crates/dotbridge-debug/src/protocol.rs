use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// DAP envelope, discriminated by the `type` field. Unknown `command` and
/// `event` values stay representable because sub-typing lives in the
/// `arguments`/`body` payloads, parsed on demand by whoever inspects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    Request(Request),
    Response(Response),
    Event(Event),
}

impl ProtocolMessage {
    /// Decode a single message from raw frame bytes.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Encode for the wire. Extension fields captured during decode are
    /// written back out untouched.
    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    #[must_use]
    pub fn seq(&self) -> u32 {
        match self {
            Self::Request(request) => request.seq,
            Self::Response(response) => response.seq,
            Self::Event(event) => event.seq,
        }
    }

    /// Short label for logging.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Request(request) => format!("request '{}'", request.command),
            Self::Response(response) => format!("response '{}'", response.command),
            Self::Event(event) => format!("event '{}'", event.event),
        }
    }
}

/// Generic DAP request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub seq: u32,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Request {
    #[must_use]
    pub fn new(seq: u32, command: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            seq,
            command: command.into(),
            arguments,
            extra: BTreeMap::new(),
        }
    }
}

/// Generic DAP response message. An error response is a `Response` with
/// `success=false` and a human-readable `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub seq: u32,
    #[serde(rename = "request_seq", alias = "requestSeq")]
    pub request_seq: u32,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Response {
    #[must_use]
    pub fn success(seq: u32, request_seq: u32, command: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            seq,
            request_seq,
            success: true,
            command: command.into(),
            message: None,
            body,
            extra: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn failure(seq: u32, request_seq: u32, command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            seq,
            request_seq,
            success: false,
            command: command.into(),
            message: Some(message.into()),
            body: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Generic DAP event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub seq: u32,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Event {
    #[must_use]
    pub fn new(seq: u32, event: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            seq,
            event: event.into(),
            body,
            extra: BTreeMap::new(),
        }
    }
}

/// DAP variable description. `variables_reference` is an opaque handle owned
/// by the debugger; nonzero means the variable's children can be fetched with
/// a further `variables` request. Handles do not survive a resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluate_name: Option<String>,
    #[serde(default)]
    pub variables_reference: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub named_variables: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_variables: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Variable {
    /// A fully resolved scalar: no further drill-down offered to the client.
    #[must_use]
    pub fn scalar(name: impl Into<String>, value: impl Into<String>, r#type: Option<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            r#type,
            evaluate_name: None,
            variables_reference: 0,
            named_variables: None,
            indexed_variables: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Arguments for `variables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: u32,
}

/// Response body for `variables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesResponseBody {
    pub variables: Vec<Variable>,
}

/// Arguments for `attach`. The debugger-specific shape is an open bag; the
/// launch rewriter fills in whatever the chosen strategy requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttachArguments {
    #[serde(flatten)]
    pub additional: BTreeMap<String, Value>,
}

/// Arguments for `launch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    #[serde(flatten)]
    pub additional: BTreeMap<String, Value>,
}

/// DAP source reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// DAP breakpoint requested by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Arguments for `setBreakpoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_modified: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Stopped event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_threads_stopped: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Process event body; carries the debuggee's OS process id once the
/// debugger has discovered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEventBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_process_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_local_process: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_method: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Exited event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEventBody {
    pub exit_code: i64,
}

/// Terminated event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedEventBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<Value>,
}

/// Arguments for the reverse `runInTerminal` request sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInTerminalArguments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub cwd: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, Option<String>>>,
}

/// Response body for `runInTerminal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunInTerminalResponseBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell_process_id: Option<u32>,
}

/// Body for the periodic `cpuUsage`/`memoryUsage` telemetry events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEventBody {
    pub value: f64,
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::{ProtocolMessage, Response, Variable};
    use serde_json::{json, Value};

    #[test]
    fn response_uses_request_seq_field() {
        let response = Response::success(7, 3, "initialize", Some(json!({"ok": true})));
        let serialized = serde_json::to_value(ProtocolMessage::Response(response)).expect("serialize response");
        assert_eq!(serialized.get("request_seq"), Some(&json!(3)));
        assert!(serialized.get("requestSeq").is_none());
        assert_eq!(serialized.get("type"), Some(&json!("response")));
    }

    #[test]
    fn decode_dispatches_on_type_discriminator() {
        let request = ProtocolMessage::from_slice(
            br#"{"seq":1,"type":"request","command":"attach","arguments":{"processId":12}}"#,
        )
        .expect("decode request");
        assert!(matches!(request, ProtocolMessage::Request(ref r) if r.command == "attach"));

        let event = ProtocolMessage::from_slice(br#"{"seq":2,"type":"event","event":"stopped"}"#)
            .expect("decode event");
        assert!(matches!(event, ProtocolMessage::Event(ref e) if e.event == "stopped"));
    }

    #[test]
    fn unknown_command_decodes_as_generic_request() {
        let message =
            ProtocolMessage::from_slice(br#"{"seq":9,"type":"request","command":"fancyNewThing"}"#)
                .expect("decode");
        let ProtocolMessage::Request(request) = message else {
            panic!("expected request");
        };
        assert_eq!(request.command, "fancyNewThing");
        assert!(request.arguments.is_none());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = ProtocolMessage::from_slice(br#"{"seq":1,"type":"gossip"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn extension_fields_round_trip() {
        let raw = br#"{"seq":4,"type":"event","event":"custom","body":{"x":1},"vendorTag":"abc"}"#;
        let message = ProtocolMessage::from_slice(raw).expect("decode");
        let encoded = message.to_vec().expect("encode");
        let reparsed: Value = serde_json::from_slice(&encoded).expect("reparse");
        assert_eq!(reparsed.get("vendorTag"), Some(&serde_json::json!("abc")));
        assert_eq!(reparsed.get("body"), Some(&serde_json::json!({"x": 1})));
    }

    #[test]
    fn variable_reference_defaults_to_zero() {
        let variable: Variable =
            serde_json::from_value(json!({"name": "x", "value": "1"})).expect("decode variable");
        assert_eq!(variable.variables_reference, 0);
        assert!(variable.extra.is_empty());
    }
}
