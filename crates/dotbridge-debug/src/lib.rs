//! Debug Adapter Protocol proxy for .NET debug sessions.
//!
//! Sits between an editor's DAP client and a native debugger process:
//! virtualizes sequence numbers so the proxy can inject its own requests,
//! rewrites launch/attach requests from the resolved launch profile, and
//! augments variable inspection with type-aware value converters.

mod error;
mod protocol;
mod proxy;
mod session;
mod telemetry;

pub use error::{RequestError, SessionError};
pub use protocol::{
    AttachArguments, Event, ExitedEventBody, LaunchArguments, ProcessEventBody, ProtocolMessage,
    Request, Response, RunInTerminalArguments, RunInTerminalResponseBody, SetBreakpointsArguments,
    Source, SourceBreakpoint, StoppedEventBody, TelemetryEventBody, TerminatedEventBody, Variable,
    VariablesArguments, VariablesResponseBody,
};
pub use proxy::channels::{Channel, MessageChannels};
pub use proxy::convert::{
    ConvertError, ConverterRegistry, DebuggerClient, DictionaryConverter, GuidConverter,
    HashSetConverter, ListConverter, QueueConverter, ReadOnlyWrapperConverter, TupleConverter,
    ValueConverter,
};
pub use proxy::core::{ProxyCore, ProxyHandle};
pub use proxy::framing::{read_frame, write_frame, Transcript, TRANSCRIPT_ENV};
pub use proxy::intercept::{ClientInterceptor, DebuggerInterceptor, Interceptor};
pub use proxy::launch::{
    LaunchError, LaunchProfile, LaunchRewriter, LaunchStrategy, ProfileRewriter,
};
pub use proxy::tracker::{RequestContext, RequestOrigin, RequestTracker};
pub use session::{
    DebugSession, DebuggerCommand, SessionConfig, SessionEvent, SessionOutcome, SessionRegistry,
    SessionState,
};
pub use telemetry::TelemetrySampler;
