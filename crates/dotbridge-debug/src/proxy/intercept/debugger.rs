//! Debugger-side interception.
//! - variables responses: register expandable children with the converters
//! - stopped: invalidate every converter claim (handles die on resume)
//! - process: hand the debuggee pid to the session coordinator
//! - exited/terminated: diagnostics only, propagated unchanged

use std::sync::mpsc::Sender;
use std::sync::Arc;

use tracing::{debug, info};

use crate::protocol::{ProcessEventBody, ProtocolMessage, VariablesResponseBody};
use crate::session::SessionEvent;

use super::super::convert::ConverterRegistry;
use super::super::core::ProxyHandle;
use super::Interceptor;

pub struct DebuggerInterceptor {
    converters: Arc<ConverterRegistry>,
    events: Sender<SessionEvent>,
}

impl DebuggerInterceptor {
    #[must_use]
    pub fn new(converters: Arc<ConverterRegistry>, events: Sender<SessionEvent>) -> Self {
        Self { converters, events }
    }
}

impl Interceptor for DebuggerInterceptor {
    fn intercept(&self, message: ProtocolMessage, _proxy: &ProxyHandle) -> Option<ProtocolMessage> {
        match &message {
            ProtocolMessage::Response(response) => {
                if response.success && response.command == "variables" {
                    if let Some(parsed) = response
                        .body
                        .clone()
                        .and_then(|body| serde_json::from_value::<VariablesResponseBody>(body).ok())
                    {
                        self.converters.observe_variables(&parsed.variables);
                    }
                }
            }
            ProtocolMessage::Event(event) => match event.event.as_str() {
                "stopped" => {
                    debug!(claimed = self.converters.claimed_count(), "stop reached, dropping converter claims");
                    self.converters.invalidate_all();
                }
                "process" => {
                    let body: ProcessEventBody = event
                        .body
                        .clone()
                        .and_then(|body| serde_json::from_value(body).ok())
                        .unwrap_or_default();
                    if let Some(pid) = body.system_process_id {
                        info!(pid, "debuggee process discovered");
                        let _ = self.events.send(SessionEvent::DebuggeeDiscovered(pid));
                    }
                }
                "exited" | "terminated" => {
                    info!(event = %event.event, body = ?event.body, "debuggee lifecycle event");
                }
                "output" => {
                    debug!("forwarding debugger output event");
                }
                _ => {}
            },
            ProtocolMessage::Request(_) => {}
        }
        Some(message)
    }
}
