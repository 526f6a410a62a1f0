//! Internal channel topology.
//! Four unbounded, order-preserving queues decouple reading, transforming
//! and writing. Back-pressure lives in the transport read loops, not here.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use crate::protocol::ProtocolMessage;

/// One unbounded queue. `complete()` drops the sender so the reader drains
/// remaining items and then observes completion.
pub struct Channel {
    tx: Mutex<Option<Sender<ProtocolMessage>>>,
    rx: Mutex<Receiver<ProtocolMessage>>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    /// Enqueue a message. Returns false once the channel is completed.
    pub fn send(&self, message: ProtocolMessage) -> bool {
        match self.lock_tx().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Blocking receive. `None` means the channel was completed and fully
    /// drained.
    pub fn recv(&self) -> Option<ProtocolMessage> {
        self.lock_rx().recv().ok()
    }

    /// Bounded receive, used by tests and bounded shutdown waits.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ProtocolMessage> {
        match self.lock_rx().recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Mark the writer closed.
    pub fn complete(&self) {
        self.lock_tx().take();
    }

    fn lock_tx(&self) -> std::sync::MutexGuard<'_, Option<Sender<ProtocolMessage>>> {
        match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_rx(&self) -> std::sync::MutexGuard<'_, Receiver<ProtocolMessage>> {
        match self.rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The four unidirectional queues of the proxy.
#[derive(Default)]
pub struct MessageChannels {
    /// Editor client -> proxy.
    pub client_inbound: Channel,
    /// Debugger process -> proxy.
    pub debugger_inbound: Channel,
    /// Proxy -> editor client.
    pub client_outbound: Channel,
    /// Proxy -> debugger process.
    pub debugger_outbound: Channel,
}

impl MessageChannels {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Close every writer; readers drain and exit. Shutdown only.
    pub fn complete_all(&self) {
        self.client_inbound.complete();
        self.debugger_inbound.complete();
        self.client_outbound.complete();
        self.debugger_outbound.complete();
    }
}
