//! Debug Adapter Protocol wire model.
//!
//! Message envelopes, the typed request/response/event bodies this driver
//! uses, and the Content-Length framing codec. Only framing and (de)serialization
//! live here; correlation and dispatch belong to the communication layer.

use std::io::{self, BufRead, Read};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Read one framed message payload from a blocking reader.
///
/// Returns `Ok(None)` on a clean end of stream between messages.
pub fn read_frame<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let read_n = reader.read_line(&mut line)?;
        if read_n == 0 {
            return if content_length.is_none() {
                Ok(None)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a message header",
                ))
            };
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("Content-Length:") {
            content_length = Some(v.trim().parse().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "bad Content-Length header")
            })?);
        }
    }

    let len = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header")
    })?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(Some(buf))
}

/// Frame a JSON payload with the Content-Length header.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("Content-Length: {}\r\n\r\n", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Any message arriving from the peer.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Response(Response),
    Event(EventMessage),
    Request(PeerRequest),
}

/// Response envelope. `body` stays untyped here; callers decode the body
/// they asked for. Envelope field names are verbatim protocol names
/// (`request_seq` is snake_case on the wire).
#[derive(Debug, Deserialize)]
pub struct Response {
    pub seq: i64,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Value,
}

/// Event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub seq: i64,
    pub event: String,
    #[serde(default)]
    pub body: Value,
}

/// Reverse request initiated by the peer (e.g. runInTerminal).
#[derive(Debug, Deserialize)]
pub struct PeerRequest {
    pub seq: i64,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Build an outgoing request payload.
pub fn request_payload(seq: i64, command: &str, arguments: &Value) -> Value {
    serde_json::json!({
        "seq": seq,
        "type": "request",
        "command": command,
        "arguments": arguments,
    })
}

/// Build a failure response to a reverse request we do not service.
pub fn reject_payload(seq: i64, request: &PeerRequest, message: &str) -> Value {
    serde_json::json!({
        "seq": seq,
        "type": "response",
        "request_seq": request.seq,
        "success": false,
        "command": request.command,
        "message": message,
    })
}

/// Peer feature flags, stored once per session after the initialize
/// handshake. Absent flags deserialize to false.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub supports_configuration_done_request: bool,
    pub supports_function_breakpoints: bool,
    pub supports_conditional_breakpoints: bool,
    pub supports_hit_conditional_breakpoints: bool,
    pub supports_evaluate_for_hovers: bool,
    pub supports_step_back: bool,
    pub supports_set_variable: bool,
    pub supports_restart_frame: bool,
    pub supports_goto_targets_request: bool,
    pub supports_step_in_targets_request: bool,
    pub supports_completions_request: bool,
    pub supports_modules_request: bool,
    pub supports_restart_request: bool,
    pub supports_value_formatting_options: bool,
    pub supports_exception_info_request: bool,
    pub support_terminate_debuggee: bool,
    pub supports_delayed_stack_trace_loading: bool,
    pub supports_loaded_sources_request: bool,
    pub supports_log_points: bool,
    pub supports_terminate_threads_request: bool,
    pub supports_set_expression: bool,
    pub supports_terminate_request: bool,
    pub supports_data_breakpoints: bool,
    pub supports_read_memory_request: bool,
    pub supports_write_memory_request: bool,
    pub supports_disassemble_request: bool,
    pub supports_cancel_request: bool,
    pub supports_breakpoint_locations_request: bool,
    pub supports_clipboard_context: bool,
    pub supports_stepping_granularity: bool,
    pub supports_instruction_breakpoints: bool,
    pub supports_exception_filter_options: bool,
}

/// Source descriptor attached to breakpoints, frames and instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Source-line breakpoint descriptor (outgoing, per file).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Function breakpoint descriptor (outgoing).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionBreakpoint {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Instruction breakpoint descriptor (outgoing).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionBreakpoint {
    pub instruction_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Breakpoint record as the peer reports it.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Breakpoint {
    pub id: Option<i64>,
    pub verified: bool,
    pub message: Option<String>,
    pub source: Option<Source>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub end_line: Option<u32>,
    pub instruction_reference: Option<String>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    pub source: Option<Source>,
    pub line: u32,
    pub column: u32,
    pub instruction_pointer_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    pub expensive: bool,
}

/// Variable record as the peer reports it.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WireVariable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub var_type: Option<String>,
    pub variables_reference: i64,
    pub memory_reference: Option<String>,
}

/// Module id, integer or string per the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleId {
    Number(i64),
    Name(String),
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleId::Number(n) => write!(f, "{n}"),
            ModuleId::Name(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub symbol_status: Option<String>,
    #[serde(default)]
    pub symbol_file_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DisassembledInstruction {
    pub address: String,
    pub instruction: String,
    pub instruction_bytes: Option<String>,
    pub symbol: Option<String>,
    pub location: Option<Source>,
    pub line: Option<u32>,
    pub end_line: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoTarget {
    pub id: i64,
    pub label: String,
    pub line: u32,
}

// ---- event bodies ----

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StoppedEventBody {
    pub reason: String,
    pub description: Option<String>,
    pub thread_id: Option<i64>,
    pub all_threads_stopped: Option<bool>,
    pub hit_breakpoint_ids: Option<Vec<i64>>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputEventBody {
    pub category: Option<String>,
    pub output: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ContinuedEventBody {
    pub thread_id: Option<i64>,
    pub all_threads_continued: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ExitedEventBody {
    pub exit_code: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointEventBody {
    pub reason: String,
    pub breakpoint: Breakpoint,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleEventBody {
    pub reason: String,
    pub module: Module,
}

// ---- response bodies ----

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsResponseBody {
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadsResponseBody {
    pub threads: Vec<Thread>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    pub stack_frames: Vec<StackFrame>,
    #[serde(default)]
    pub total_frames: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesResponseBody {
    pub scopes: Vec<Scope>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesResponseBody {
    pub variables: Vec<WireVariable>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluateResponseBody {
    pub result: String,
    #[serde(rename = "type")]
    pub result_type: Option<String>,
    pub variables_reference: i64,
    pub memory_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisassembleResponseBody {
    pub instructions: Vec<DisassembledInstruction>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadMemoryResponseBody {
    pub address: String,
    pub unreadable_bytes: Option<i64>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WriteMemoryResponseBody {
    pub bytes_written: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoTargetsResponseBody {
    pub targets: Vec<GotoTarget>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulesResponseBody {
    pub modules: Vec<Module>,
    #[serde(default)]
    pub total_modules: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn frame_round_trip() {
        let payload = br#"{"seq":1,"type":"event","event":"initialized"}"#;
        let framed = encode_frame(payload);
        let mut reader = BufReader::new(framed.as_slice());

        let read = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(read, payload);
        assert!(read_frame(&mut reader).unwrap().is_none());
    }

    #[test]
    fn frame_reads_back_to_back_messages() {
        let mut stream = encode_frame(br#"{"a":1}"#);
        stream.extend(encode_frame(br#"{"b":2}"#));
        let mut reader = BufReader::new(stream.as_slice());

        assert_eq!(read_frame(&mut reader).unwrap().unwrap(), br#"{"a":1}"#);
        assert_eq!(read_frame(&mut reader).unwrap().unwrap(), br#"{"b":2}"#);
    }

    #[test]
    fn missing_content_length_is_invalid() {
        let mut reader = BufReader::new(&b"X-Other: 1\r\n\r\n{}"[..]);
        assert!(read_frame(&mut reader).is_err());
    }

    #[test]
    fn parse_response_envelope() {
        let raw = r#"{"seq":4,"type":"response","request_seq":2,"success":false,"command":"launch","message":"no such file"}"#;
        match serde_json::from_str::<InboundMessage>(raw).unwrap() {
            InboundMessage::Response(resp) => {
                assert_eq!(resp.request_seq, 2);
                assert!(!resp.success);
                assert_eq!(resp.message.as_deref(), Some("no such file"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parse_stopped_event() {
        let raw = r#"{"seq":9,"type":"event","event":"stopped","body":{"reason":"breakpoint","threadId":1,"hitBreakpointIds":[3],"allThreadsStopped":true}}"#;
        match serde_json::from_str::<InboundMessage>(raw).unwrap() {
            InboundMessage::Event(ev) => {
                assert_eq!(ev.event, "stopped");
                let body: StoppedEventBody = serde_json::from_value(ev.body).unwrap();
                assert_eq!(body.reason, "breakpoint");
                assert_eq!(body.thread_id, Some(1));
                assert_eq!(body.hit_breakpoint_ids, Some(vec![3]));
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn capabilities_default_to_false() {
        let caps: Capabilities =
            serde_json::from_str(r#"{"supportsDisassembleRequest":true}"#).unwrap();
        assert!(caps.supports_disassemble_request);
        assert!(!caps.supports_read_memory_request);
        assert!(!caps.supports_function_breakpoints);
    }

    #[test]
    fn module_id_accepts_number_or_string() {
        let m: Module =
            serde_json::from_str(r#"{"id":7,"name":"libc.so"}"#).unwrap();
        assert_eq!(m.id, ModuleId::Number(7));
        let m: Module =
            serde_json::from_str(r#"{"id":"libm","name":"libm.so"}"#).unwrap();
        assert_eq!(m.id, ModuleId::Name("libm".into()));
    }
}
