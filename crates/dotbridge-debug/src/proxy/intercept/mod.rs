//! Interceptor pipeline.
//! One interceptor per direction; a `None` result means the message was
//! fully handled and must not be forwarded.

mod client;
mod debugger;

pub use client::ClientInterceptor;
pub use debugger::DebuggerInterceptor;

use crate::protocol::ProtocolMessage;

use super::core::ProxyHandle;

/// Per-direction, per-message-kind transform applied before forwarding.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, message: ProtocolMessage, proxy: &ProxyHandle) -> Option<ProtocolMessage>;
}
