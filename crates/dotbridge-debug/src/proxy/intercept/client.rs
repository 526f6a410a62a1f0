//! Client-side interception.
//! - attach/launch: delegate to the launch rewriter
//! - variables: answer from the converter cache without a debugger round-trip
//! - setBreakpoints: normalize path separators for the host debugger

use std::sync::Arc;

use tracing::{debug, warn};

use crate::protocol::{
    ProtocolMessage, Request, Response, SetBreakpointsArguments, VariablesArguments,
    VariablesResponseBody,
};

use super::super::convert::ConverterRegistry;
use super::super::core::ProxyHandle;
use super::super::launch::LaunchRewriter;
use super::super::tracker::RequestTracker;
use super::Interceptor;

pub struct ClientInterceptor {
    rewriter: Arc<dyn LaunchRewriter>,
    converters: Arc<ConverterRegistry>,
    tracker: Arc<RequestTracker>,
}

impl ClientInterceptor {
    #[must_use]
    pub fn new(
        rewriter: Arc<dyn LaunchRewriter>,
        converters: Arc<ConverterRegistry>,
        tracker: Arc<RequestTracker>,
    ) -> Self {
        Self {
            rewriter,
            converters,
            tracker,
        }
    }

    fn rewrite_start(&self, mut request: Request, proxy: &ProxyHandle) -> Option<ProtocolMessage> {
        match self.rewriter.rewrite(&mut request, proxy) {
            Ok(()) => Some(ProtocolMessage::Request(request)),
            Err(err) => {
                warn!(command = %request.command, error = %err, "launch rewrite failed");
                // The request never reaches the debugger, so answer it here
                // and drop the correlation entry it registered.
                let original_seq = self
                    .tracker
                    .take_context(request.seq)
                    .map_or(request.seq, |context| context.original_seq);
                let response = Response::failure(
                    self.tracker.allocate_seq(),
                    original_seq,
                    request.command.clone(),
                    err.to_string(),
                );
                proxy.send_to_client(ProtocolMessage::Response(response));
                None
            }
        }
    }

    fn redeem_variables(&self, request: Request, proxy: &ProxyHandle) -> Option<ProtocolMessage> {
        let arguments: VariablesArguments = match request
            .arguments
            .clone()
            .map(serde_json::from_value)
        {
            Some(Ok(arguments)) => arguments,
            _ => return Some(ProtocolMessage::Request(request)),
        };

        let Some(converter) = self.converters.lookup(arguments.variables_reference) else {
            return Some(ProtocolMessage::Request(request));
        };

        match converter.try_convert(arguments.variables_reference, proxy) {
            Ok(variables) => {
                let Ok(body) = serde_json::to_value(VariablesResponseBody { variables }) else {
                    return Some(ProtocolMessage::Request(request));
                };
                let Some(context) = self.tracker.take_context(request.seq) else {
                    return Some(ProtocolMessage::Request(request));
                };
                let response = Response::success(
                    self.tracker.allocate_seq(),
                    context.original_seq,
                    "variables",
                    Some(body),
                );
                proxy.send_to_client(ProtocolMessage::Response(response));
                None
            }
            Err(err) => {
                warn!(
                    reference = arguments.variables_reference,
                    converter = converter.name(),
                    error = %err,
                    "conversion failed, forwarding raw request"
                );
                Some(ProtocolMessage::Request(request))
            }
        }
    }

    fn normalize_breakpoints(mut request: Request) -> ProtocolMessage {
        let Some(raw) = request.arguments.clone() else {
            return ProtocolMessage::Request(request);
        };
        let Ok(mut arguments) = serde_json::from_value::<SetBreakpointsArguments>(raw) else {
            debug!("unparseable setBreakpoints arguments, forwarding unchanged");
            return ProtocolMessage::Request(request);
        };
        if let Some(path) = arguments.source.path.take() {
            arguments.source.path = Some(normalize_separators(&path, std::path::MAIN_SEPARATOR));
        }
        match serde_json::to_value(arguments) {
            Ok(value) => request.arguments = Some(value),
            Err(_) => debug!("could not re-serialize setBreakpoints arguments"),
        }
        ProtocolMessage::Request(request)
    }
}

impl Interceptor for ClientInterceptor {
    fn intercept(&self, message: ProtocolMessage, proxy: &ProxyHandle) -> Option<ProtocolMessage> {
        let request = match message {
            ProtocolMessage::Request(request) => request,
            other => return Some(other),
        };
        match request.command.as_str() {
            "attach" | "launch" => self.rewrite_start(request, proxy),
            "variables" => self.redeem_variables(request, proxy),
            "setBreakpoints" => Some(Self::normalize_breakpoints(request)),
            command => {
                debug!(command, "forwarding client request");
                Some(ProtocolMessage::Request(request))
            }
        }
    }
}

/// Rewrite every separator to the one the host debugger matches on.
#[must_use]
pub fn normalize_separators(path: &str, separator: char) -> String {
    path.chars()
        .map(|c| if c == '/' || c == '\\' { separator } else { c })
        .collect()
}
