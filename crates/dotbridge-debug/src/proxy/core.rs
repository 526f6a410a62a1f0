//! Proxy core: the two processing loops.
//! - client loop: register, substitute seq, intercept, forward
//! - debugger loop: correlate responses, complete proxy futures, forward
//! - ProxyHandle: synthesized traffic (nested fetches, reverse requests)

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::error::RequestError;
use crate::protocol::{ProtocolMessage, Request, Response, Variable, VariablesResponseBody};

use super::channels::MessageChannels;
use super::convert::{ConvertError, DebuggerClient};
use super::intercept::Interceptor;
use super::tracker::{RequestOrigin, RequestTracker};

/// How long a proxy-originated request may stay unanswered. Disposal drops
/// the pending senders, so a shutdown unblocks waiters sooner.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared write/issue surface handed to interceptors and converters.
#[derive(Clone)]
pub struct ProxyHandle {
    channels: Arc<MessageChannels>,
    tracker: Arc<RequestTracker>,
}

impl ProxyHandle {
    #[must_use]
    pub fn new(channels: Arc<MessageChannels>, tracker: Arc<RequestTracker>) -> Self {
        Self { channels, tracker }
    }

    pub fn send_to_client(&self, message: ProtocolMessage) -> bool {
        self.channels.client_outbound.send(message)
    }

    pub fn send_to_debugger(&self, message: ProtocolMessage) -> bool {
        self.channels.debugger_outbound.send(message)
    }

    /// Issue a proxy-originated request to the debugger and wait for its
    /// response. The response is consumed here and never forwarded.
    pub fn request_debugger(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<Response, RequestError> {
        self.request_via(command, arguments, |message| {
            self.channels.debugger_outbound.send(message)
        })
    }

    /// Issue a reverse request to the client (e.g. `runInTerminal`).
    pub fn request_client(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<Response, RequestError> {
        self.request_via(command, arguments, |message| {
            self.channels.client_outbound.send(message)
        })
    }

    fn request_via(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
        send: impl Fn(ProtocolMessage) -> bool,
    ) -> Result<Response, RequestError> {
        let (proxy_seq, receiver) = self.tracker.register_proxy_request();
        let request = Request::new(proxy_seq, command, arguments);
        if !send(ProtocolMessage::Request(request)) {
            self.tracker.take_proxy_context(proxy_seq);
            return Err(RequestError::ChannelClosed(command.to_string()));
        }
        match receiver.recv_timeout(REQUEST_TIMEOUT) {
            Ok(response) if response.success => Ok(response),
            Ok(response) => Err(RequestError::Rejected {
                command: command.to_string(),
                message: response.message.unwrap_or_else(|| "request failed".to_string()),
            }),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                self.tracker.take_proxy_context(proxy_seq);
                Err(RequestError::Timeout(command.to_string()))
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                Err(RequestError::ChannelClosed(command.to_string()))
            }
        }
    }
}

impl DebuggerClient for ProxyHandle {
    fn fetch_variables(&self, variables_reference: u32) -> Result<Vec<Variable>, ConvertError> {
        let response = self.request_debugger(
            "variables",
            Some(json!({ "variablesReference": variables_reference })),
        )?;
        let body = response
            .body
            .ok_or(ConvertError::EmptyContainer(variables_reference))?;
        let parsed: VariablesResponseBody =
            serde_json::from_value(body).map_err(|err| ConvertError::Fetch(err.to_string()))?;
        Ok(parsed.variables)
    }
}

/// Orchestrates the channel topology: two independent loops, one per inbound
/// stream, running for the lifetime of the session.
pub struct ProxyCore {
    channels: Arc<MessageChannels>,
    tracker: Arc<RequestTracker>,
    client_interceptor: Arc<dyn Interceptor>,
    debugger_interceptor: Arc<dyn Interceptor>,
}

impl ProxyCore {
    #[must_use]
    pub fn new(
        channels: Arc<MessageChannels>,
        tracker: Arc<RequestTracker>,
        client_interceptor: Arc<dyn Interceptor>,
        debugger_interceptor: Arc<dyn Interceptor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channels,
            tracker,
            client_interceptor,
            debugger_interceptor,
        })
    }

    #[must_use]
    pub fn handle(&self) -> ProxyHandle {
        ProxyHandle::new(Arc::clone(&self.channels), Arc::clone(&self.tracker))
    }

    /// Spawn both processing loops. They exit when their inbound channel is
    /// completed and drained.
    #[must_use]
    pub fn spawn_loops(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let client = Arc::clone(self);
        let debugger = Arc::clone(self);
        vec![
            thread::spawn(move || client.client_loop()),
            thread::spawn(move || debugger.debugger_loop()),
        ]
    }

    /// Entry point for raw client traffic. Responses to proxy reverse
    /// requests are completed right here so the client loop can stay blocked
    /// inside an interceptor (the run-in-terminal rewrite waits on one)
    /// without deadlocking.
    pub fn ingest_client_message(&self, message: ProtocolMessage) {
        match message {
            ProtocolMessage::Response(response) => {
                match self.tracker.take_proxy_context(response.request_seq) {
                    Some(context) => context.complete(response),
                    None => warn!(
                        request_seq = response.request_seq,
                        "dropping client response with no pending reverse request"
                    ),
                }
            }
            other => {
                self.channels.client_inbound.send(other);
            }
        }
    }

    fn client_loop(&self) {
        let handle = self.handle();
        while let Some(message) = self.channels.client_inbound.recv() {
            let mut request = match message {
                ProtocolMessage::Request(request) => request,
                other => {
                    warn!(message = %other.describe(), "dropping non-request client message");
                    continue;
                }
            };
            let proxy_seq = self.tracker.register_client_request(request.seq);
            debug!(command = %request.command, client_seq = request.seq, proxy_seq, "client request");
            request.seq = proxy_seq;
            if let Some(transformed) = self
                .client_interceptor
                .intercept(ProtocolMessage::Request(request), &handle)
            {
                self.channels.debugger_outbound.send(transformed);
            }
        }
        debug!("client loop finished");
    }

    fn debugger_loop(self: &Arc<Self>) {
        while let Some(message) = self.channels.debugger_inbound.recv() {
            // Each message gets its own worker so a slow conversion cannot
            // stall delivery of unrelated events.
            let core = Arc::clone(self);
            thread::spawn(move || core.process_debugger_message(message));
        }
        debug!("debugger loop finished");
    }

    fn process_debugger_message(&self, message: ProtocolMessage) {
        let handle = self.handle();
        match message {
            ProtocolMessage::Response(mut response) => {
                let Some(context) = self.tracker.take_context(response.request_seq) else {
                    return;
                };
                match context.origin {
                    RequestOrigin::Proxy => context.complete(response),
                    RequestOrigin::Client => {
                        response.request_seq = context.original_seq;
                        if let Some(transformed) = self
                            .debugger_interceptor
                            .intercept(ProtocolMessage::Response(response), &handle)
                        {
                            self.channels.client_outbound.send(transformed);
                        }
                    }
                }
            }
            ProtocolMessage::Event(event) => {
                if let Some(transformed) = self
                    .debugger_interceptor
                    .intercept(ProtocolMessage::Event(event), &handle)
                {
                    self.channels.client_outbound.send(transformed);
                }
            }
            ProtocolMessage::Request(request) => {
                warn!(command = %request.command, "dropping debugger-originated request");
            }
        }
    }
}
