//! Proxy integration tests.
//! - sequence virtualization and correlation across the two loops
//! - converter redemption, fallback and invalidation
//! - launch strategies (attach-by-pid, run-in-terminal)

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use crate::protocol::{Event, ProtocolMessage, Request, Response};
use crate::session::SessionEvent;

use super::channels::MessageChannels;
use super::convert::ConverterRegistry;
use super::core::ProxyCore;
use super::intercept::{ClientInterceptor, DebuggerInterceptor, Interceptor};
use super::launch::{LaunchProfile, LaunchStrategy, ProfileRewriter};
use super::tracker::RequestTracker;

const RECV_WINDOW: Duration = Duration::from_secs(2);
const QUIET_WINDOW: Duration = Duration::from_millis(200);

struct Fixture {
    channels: Arc<MessageChannels>,
    tracker: Arc<RequestTracker>,
    converters: Arc<ConverterRegistry>,
    core: Arc<ProxyCore>,
    events: Receiver<SessionEvent>,
}

impl Fixture {
    fn new(profile: LaunchProfile) -> Self {
        let channels = Arc::new(MessageChannels::new());
        let tracker = Arc::new(RequestTracker::new());
        let converters = Arc::new(ConverterRegistry::with_default_converters());
        let (event_tx, event_rx) = mpsc::channel();

        let client_interceptor: Arc<dyn Interceptor> = Arc::new(ClientInterceptor::new(
            Arc::new(ProfileRewriter::new(profile)),
            Arc::clone(&converters),
            Arc::clone(&tracker),
        ));
        let debugger_interceptor: Arc<dyn Interceptor> = Arc::new(DebuggerInterceptor::new(
            Arc::clone(&converters),
            event_tx,
        ));
        let core = ProxyCore::new(
            Arc::clone(&channels),
            Arc::clone(&tracker),
            client_interceptor,
            debugger_interceptor,
        );
        let _loops = core.spawn_loops();

        Self {
            channels,
            tracker,
            converters,
            core,
            events: event_rx,
        }
    }

    fn client_sends(&self, request: Request) {
        self.core
            .ingest_client_message(ProtocolMessage::Request(request));
    }

    fn debugger_sends(&self, message: ProtocolMessage) {
        self.channels.debugger_inbound.send(message);
    }

    fn to_debugger(&self) -> ProtocolMessage {
        self.channels
            .debugger_outbound
            .recv_timeout(RECV_WINDOW)
            .expect("message for debugger")
    }

    fn to_client(&self) -> ProtocolMessage {
        self.channels
            .client_outbound
            .recv_timeout(RECV_WINDOW)
            .expect("message for client")
    }

    /// Walk a `variables` response past the debugger interceptor so the
    /// registry can claim convertible children.
    fn claim_reference(&self, client_seq: u32, reference: u32, type_name: &str) {
        self.client_sends(Request::new(
            client_seq,
            "variables",
            Some(json!({ "variablesReference": reference + 1000 })),
        ));
        let ProtocolMessage::Request(forwarded) = self.to_debugger() else {
            panic!("expected forwarded variables request");
        };
        let body = json!({
            "variables": [{
                "name": "claimed",
                "value": "{...}",
                "type": type_name,
                "variablesReference": reference,
            }]
        });
        self.debugger_sends(ProtocolMessage::Response(Response::success(
            900 + client_seq,
            forwarded.seq,
            "variables",
            Some(body),
        )));
        let ProtocolMessage::Response(response) = self.to_client() else {
            panic!("expected claimed response");
        };
        assert_eq!(response.request_seq, client_seq);
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.channels.complete_all();
    }
}

fn launch_profile(strategy: LaunchStrategy) -> LaunchProfile {
    LaunchProfile {
        program: Some("/work/out/App.dll".into()),
        cwd: Some("/work".into()),
        args: Vec::new(),
        env: std::collections::BTreeMap::new(),
        strategy,
    }
}

fn guid_fields_body() -> Value {
    let fields: [(&str, i64); 11] = [
        ("_a", 1_543_583_988),
        ("_b", 23_662),
        ("_c", 18_852),
        ("_d", 133),
        ("_e", 136),
        ("_f", 114),
        ("_g", 68),
        ("_h", 173),
        ("_i", 2),
        ("_j", 88),
        ("_k", 5),
    ];
    let variables: Vec<Value> = fields
        .iter()
        .map(|(name, value)| {
            json!({ "name": name, "value": value.to_string(), "variablesReference": 0 })
        })
        .collect();
    json!({ "variables": variables })
}

#[test]
fn attach_request_is_virtualized_and_response_seq_restored() {
    let fixture = Fixture::new(launch_profile(LaunchStrategy::AttachToProcess {
        process_id: 4242,
    }));

    fixture.client_sends(Request::new(1, "attach", Some(json!({}))));

    let ProtocolMessage::Request(forwarded) = fixture.to_debugger() else {
        panic!("expected forwarded attach request");
    };
    assert_eq!(forwarded.command, "attach");
    let arguments = forwarded.arguments.as_ref().expect("attach arguments");
    assert_eq!(arguments.get("processId"), Some(&json!(4242)));

    fixture.debugger_sends(ProtocolMessage::Response(Response::success(
        1,
        forwarded.seq,
        "attach",
        None,
    )));

    let ProtocolMessage::Response(response) = fixture.to_client() else {
        panic!("expected attach response");
    };
    assert!(response.success);
    assert_eq!(response.request_seq, 1);
}

#[test]
fn response_for_unknown_sequence_is_dropped() {
    let fixture = Fixture::new(launch_profile(LaunchStrategy::Launch));

    fixture.debugger_sends(ProtocolMessage::Response(Response::success(
        1, 999, "attach", None,
    )));

    assert!(fixture
        .channels
        .client_outbound
        .recv_timeout(QUIET_WINDOW)
        .is_none());
}

#[test]
fn proxy_originated_response_completes_future_without_forwarding() {
    let fixture = Fixture::new(launch_profile(LaunchStrategy::Launch));
    let handle = fixture.core.handle();

    let waiter = thread::spawn(move || {
        handle.request_debugger("threads", None)
    });

    let ProtocolMessage::Request(request) = fixture.to_debugger() else {
        panic!("expected proxy request");
    };
    assert_eq!(request.command, "threads");

    fixture.debugger_sends(ProtocolMessage::Response(Response::success(
        5,
        request.seq,
        "threads",
        Some(json!({ "threads": [] })),
    )));

    let response = waiter.join().expect("waiter").expect("threads response");
    assert!(response.success);

    // The response resolved the proxy's own request; the client sees nothing.
    assert!(fixture
        .channels
        .client_outbound
        .recv_timeout(QUIET_WINDOW)
        .is_none());
}

#[test]
fn non_request_client_messages_are_dropped() {
    let fixture = Fixture::new(launch_profile(LaunchStrategy::Launch));

    fixture
        .core
        .ingest_client_message(ProtocolMessage::Event(Event::new(1, "noise", None)));
    fixture
        .core
        .ingest_client_message(ProtocolMessage::Response(Response::success(
            2, 77, "whatever", None,
        )));

    assert!(fixture
        .channels
        .debugger_outbound
        .recv_timeout(QUIET_WINDOW)
        .is_none());
}

#[test]
fn variables_request_is_answered_from_converter_cache() {
    let fixture = Fixture::new(launch_profile(LaunchStrategy::Launch));
    fixture.claim_reference(5, 77, "System.Guid");
    assert_eq!(fixture.converters.claimed_count(), 1);

    // Redeem: the converter resolves the container through a nested fetch;
    // the debugger only ever sees that nested request.
    fixture.client_sends(Request::new(
        6,
        "variables",
        Some(json!({ "variablesReference": 77 })),
    ));

    let ProtocolMessage::Request(nested) = fixture.to_debugger() else {
        panic!("expected nested fetch");
    };
    assert_eq!(nested.command, "variables");
    assert_eq!(
        nested.arguments.as_ref().and_then(|a| a.get("variablesReference")),
        Some(&json!(77))
    );

    fixture.debugger_sends(ProtocolMessage::Response(Response::success(
        8,
        nested.seq,
        "variables",
        Some(guid_fields_body()),
    )));

    let ProtocolMessage::Response(response) = fixture.to_client() else {
        panic!("expected synthesized response");
    };
    assert!(response.success);
    assert_eq!(response.request_seq, 6);
    let body = response.body.expect("variables body");
    let variables = body.get("variables").and_then(Value::as_array).expect("variables");
    assert_eq!(variables.len(), 1);
    assert_eq!(
        variables[0].get("value"),
        Some(&json!("5c0138f4-5c6e-49a4-8588-7244ad025805"))
    );
    assert_eq!(variables[0].get("variablesReference"), Some(&json!(0)));

    // The client's own request never reached the debugger.
    assert!(fixture
        .channels
        .debugger_outbound
        .recv_timeout(QUIET_WINDOW)
        .is_none());
}

#[test]
fn failed_conversion_falls_back_to_forwarding_the_raw_request() {
    let fixture = Fixture::new(launch_profile(LaunchStrategy::Launch));
    fixture.claim_reference(5, 88, "System.Collections.Generic.List`1[System.String]");

    fixture.client_sends(Request::new(
        6,
        "variables",
        Some(json!({ "variablesReference": 88 })),
    ));

    // The list converter fetches the container but finds no backing fields.
    let ProtocolMessage::Request(nested) = fixture.to_debugger() else {
        panic!("expected nested fetch");
    };
    fixture.debugger_sends(ProtocolMessage::Response(Response::success(
        8,
        nested.seq,
        "variables",
        Some(json!({ "variables": [{ "name": "Count", "value": "3", "variablesReference": 0 }] })),
    )));

    // Fallback: the original request goes through after all.
    let ProtocolMessage::Request(forwarded) = fixture.to_debugger() else {
        panic!("expected forwarded request");
    };
    assert_eq!(forwarded.command, "variables");
    assert_eq!(
        forwarded.arguments.as_ref().and_then(|a| a.get("variablesReference")),
        Some(&json!(88))
    );

    let raw_body = json!({ "variables": [{ "name": "[0]", "value": "\"A\"", "variablesReference": 0 }] });
    fixture.debugger_sends(ProtocolMessage::Response(Response::success(
        9,
        forwarded.seq,
        "variables",
        Some(raw_body.clone()),
    )));

    let ProtocolMessage::Response(response) = fixture.to_client() else {
        panic!("expected raw response");
    };
    assert_eq!(response.request_seq, 6);
    assert_eq!(response.body, Some(raw_body));
}

#[test]
fn stopped_event_invalidates_claims_even_for_reused_handles() {
    let fixture = Fixture::new(launch_profile(LaunchStrategy::Launch));
    fixture.claim_reference(5, 77, "System.Guid");
    assert_eq!(fixture.converters.claimed_count(), 1);

    fixture.debugger_sends(ProtocolMessage::Event(Event::new(
        10,
        "stopped",
        Some(json!({ "reason": "breakpoint", "threadId": 1 })),
    )));

    let ProtocolMessage::Event(event) = fixture.to_client() else {
        panic!("expected stopped event to propagate");
    };
    assert_eq!(event.event, "stopped");
    assert_eq!(fixture.converters.claimed_count(), 0);

    // The same integer may denote an unrelated object now; it must be
    // forwarded instead of redeemed.
    fixture.client_sends(Request::new(
        6,
        "variables",
        Some(json!({ "variablesReference": 77 })),
    ));
    let ProtocolMessage::Request(forwarded) = fixture.to_debugger() else {
        panic!("expected forwarded request");
    };
    assert_eq!(forwarded.command, "variables");
}

#[test]
fn process_event_reports_debuggee_pid_to_the_coordinator() {
    let fixture = Fixture::new(launch_profile(LaunchStrategy::Launch));

    fixture.debugger_sends(ProtocolMessage::Event(Event::new(
        3,
        "process",
        Some(json!({ "name": "App", "systemProcessId": 4242, "startMethod": "launch" })),
    )));

    let ProtocolMessage::Event(event) = fixture.to_client() else {
        panic!("expected process event to propagate");
    };
    assert_eq!(event.event, "process");

    match fixture.events.recv_timeout(RECV_WINDOW) {
        Ok(SessionEvent::DebuggeeDiscovered(pid)) => assert_eq!(pid, 4242),
        other => panic!("expected DebuggeeDiscovered, got {other:?}"),
    }
}

#[test]
fn set_breakpoints_paths_are_normalized_for_the_host_debugger() {
    let fixture = Fixture::new(launch_profile(LaunchStrategy::Launch));

    fixture.client_sends(Request::new(
        4,
        "setBreakpoints",
        Some(json!({
            "source": { "path": "src\\Nested/Program.cs" },
            "breakpoints": [{ "line": 12 }],
        })),
    ));

    let ProtocolMessage::Request(forwarded) = fixture.to_debugger() else {
        panic!("expected forwarded setBreakpoints");
    };
    let expected = format!(
        "src{sep}Nested{sep}Program.cs",
        sep = std::path::MAIN_SEPARATOR
    );
    assert_eq!(
        forwarded
            .arguments
            .as_ref()
            .and_then(|a| a.pointer("/source/path")),
        Some(&json!(expected))
    );
    // Breakpoint entries pass through untouched.
    assert_eq!(
        forwarded.arguments.as_ref().and_then(|a| a.pointer("/breakpoints/0/line")),
        Some(&json!(12))
    );
}

#[test]
fn run_in_terminal_strategy_attaches_to_the_reported_process() {
    let fixture = Fixture::new(launch_profile(LaunchStrategy::RunInTerminal {
        startup_hook: Some("/opt/hooks/wait.dll".into()),
    }));

    fixture.client_sends(Request::new(2, "attach", Some(json!({}))));

    // The proxy asks the client to start the program in its terminal.
    let ProtocolMessage::Request(terminal) = fixture.to_client() else {
        panic!("expected runInTerminal reverse request");
    };
    assert_eq!(terminal.command, "runInTerminal");
    let arguments = terminal.arguments.as_ref().expect("terminal arguments");
    assert_eq!(
        arguments.pointer("/env/DOTNET_STARTUP_HOOKS"),
        Some(&json!("/opt/hooks/wait.dll"))
    );
    assert_eq!(arguments.pointer("/args/0"), Some(&json!("/work/out/App.dll")));

    fixture
        .core
        .ingest_client_message(ProtocolMessage::Response(Response::success(
            9,
            terminal.seq,
            "runInTerminal",
            Some(json!({ "processId": 777 })),
        )));

    let ProtocolMessage::Request(attach) = fixture.to_debugger() else {
        panic!("expected rewritten attach");
    };
    assert_eq!(attach.command, "attach");
    assert_eq!(
        attach.arguments.as_ref().and_then(|a| a.get("processId")),
        Some(&json!(777))
    );
}

#[test]
fn launch_rewrite_failure_answers_the_client_directly() {
    // Launch strategy with no program path: the rewrite cannot succeed.
    let mut profile = launch_profile(LaunchStrategy::Launch);
    profile.program = None;
    let fixture = Fixture::new(profile);

    fixture.client_sends(Request::new(3, "launch", Some(json!({}))));

    let ProtocolMessage::Response(response) = fixture.to_client() else {
        panic!("expected error response");
    };
    assert!(!response.success);
    assert_eq!(response.request_seq, 3);

    assert!(fixture
        .channels
        .debugger_outbound
        .recv_timeout(QUIET_WINDOW)
        .is_none());
    // The correlation entry was dropped with the request.
    assert_eq!(fixture.tracker.pending(), 0);
}
