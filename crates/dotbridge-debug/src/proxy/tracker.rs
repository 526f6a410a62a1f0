//! Sequence virtualization and in-flight request correlation.
//! - allocate_seq: strictly increasing proxy-local sequence numbers
//! - register_client_request / register_proxy_request
//! - take_context: atomic removal on response arrival

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Mutex};

use tracing::warn;

use crate::protocol::Response;

/// Who initiated an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// Forwarded on behalf of the editor client.
    Client,
    /// Issued by the proxy itself (nested variables fetches, runInTerminal).
    Proxy,
}

/// Correlation state for one outstanding request. Removed exactly once,
/// either when the matching response arrives or when the tracker is
/// cancelled at disposal.
#[derive(Debug)]
pub struct RequestContext {
    pub original_seq: u32,
    pub proxy_seq: u32,
    pub origin: RequestOrigin,
    completion: Option<mpsc::Sender<Response>>,
}

impl RequestContext {
    /// Fulfill the one-shot completion, if this context carries one. The
    /// sender is consumed so a second fulfillment is unrepresentable.
    pub fn complete(mut self, response: Response) {
        if let Some(sender) = self.completion.take() {
            let _ = sender.send(response);
        }
    }
}

/// Virtualizes sequence numbers so the proxy can inject its own requests
/// without colliding with the client's numbering.
pub struct RequestTracker {
    next_seq: AtomicU32,
    inflight: Mutex<HashMap<u32, RequestContext>>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU32::new(1),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next proxy-local sequence number. Also used for
    /// proxy-synthesized messages that need a seq but no correlation entry.
    pub fn allocate_seq(&self) -> u32 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a client request and return the proxy seq to substitute
    /// into the outgoing message.
    pub fn register_client_request(&self, original_seq: u32) -> u32 {
        let proxy_seq = self.allocate_seq();
        let context = RequestContext {
            original_seq,
            proxy_seq,
            origin: RequestOrigin::Client,
            completion: None,
        };
        self.insert(context);
        proxy_seq
    }

    /// Register a proxy-originated request. The returned receiver observes
    /// the matching response exactly once.
    pub fn register_proxy_request(&self) -> (u32, mpsc::Receiver<Response>) {
        let proxy_seq = self.allocate_seq();
        let (tx, rx) = mpsc::channel();
        let context = RequestContext {
            original_seq: 0,
            proxy_seq,
            origin: RequestOrigin::Proxy,
            completion: Some(tx),
        };
        self.insert(context);
        (proxy_seq, rx)
    }

    /// Atomically take the context for `proxy_seq`. A miss is tolerated
    /// (response for an unknown or already-completed sequence) but logged,
    /// since it can indicate a correlation bug.
    pub fn take_context(&self, proxy_seq: u32) -> Option<RequestContext> {
        let taken = self.lock_inflight().remove(&proxy_seq);
        if taken.is_none() {
            warn!(proxy_seq, "response for unknown or completed sequence, dropping");
        }
        taken
    }

    /// Take the context for `proxy_seq` only when the proxy originated it.
    /// Client-origin contexts are left untouched; used on the client-inbound
    /// side where only reverse-request responses are expected.
    pub fn take_proxy_context(&self, proxy_seq: u32) -> Option<RequestContext> {
        let mut inflight = self.lock_inflight();
        match inflight.get(&proxy_seq) {
            Some(context) if context.origin == RequestOrigin::Proxy => inflight.remove(&proxy_seq),
            _ => None,
        }
    }

    /// Drop every pending context. Receivers of proxy-originated requests
    /// observe a disconnect instead of a response.
    pub fn cancel_all(&self) {
        let mut inflight = self.lock_inflight();
        if !inflight.is_empty() {
            warn!(pending = inflight.len(), "cancelling in-flight requests");
        }
        inflight.clear();
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_inflight().len()
    }

    fn insert(&self, context: RequestContext) {
        self.lock_inflight().insert(context.proxy_seq, context);
    }

    fn lock_inflight(&self) -> std::sync::MutexGuard<'_, HashMap<u32, RequestContext>> {
        match self.inflight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
