//! Debuggee resource sampling.
//! Emits periodic `cpuUsage`/`memoryUsage` events to the client while the
//! debuggee pid is known.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sysinfo::{Pid, System};
use tracing::debug;

use crate::protocol::{Event, ProtocolMessage, TelemetryEventBody};
use crate::proxy::channels::MessageChannels;
use crate::proxy::tracker::RequestTracker;

const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Background sampler bound to one debuggee process.
pub struct TelemetrySampler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetrySampler {
    /// Start sampling `pid`. The thread stops on `stop()`, when the process
    /// disappears, or when the outbound channel completes.
    #[must_use]
    pub fn spawn(pid: u32, channels: Arc<MessageChannels>, tracker: Arc<RequestTracker>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut system = System::new();
            let pid = Pid::from_u32(pid);
            while !stop_flag.load(Ordering::Relaxed) {
                if !system.refresh_process(pid) {
                    debug!(pid = pid.as_u32(), "debuggee gone, telemetry sampler exiting");
                    break;
                }
                let Some(process) = system.process(pid) else {
                    break;
                };
                let cpu = f64::from(process.cpu_usage()).clamp(0.0, 100.0);
                let memory = process.memory();
                let timestamp = epoch_millis();

                let sent = emit(&channels, &tracker, "cpuUsage", cpu, timestamp)
                    && emit(&channels, &tracker, "memoryUsage", as_f64(memory), timestamp);
                if !sent {
                    break;
                }
                thread::sleep(SAMPLE_INTERVAL);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop sampling and wait for the thread to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn emit(
    channels: &MessageChannels,
    tracker: &RequestTracker,
    event: &str,
    value: f64,
    timestamp: u64,
) -> bool {
    let body = match serde_json::to_value(TelemetryEventBody { value, timestamp }) {
        Ok(body) => body,
        Err(_) => return true,
    };
    channels
        .client_outbound
        .send(ProtocolMessage::Event(Event::new(
            tracker.allocate_seq(),
            event,
            Some(body),
        )))
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: u64) -> f64 {
    value as f64
}
