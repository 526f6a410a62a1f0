//! Debug session coordination.
//! - DebugSession: listener, debugger process, transport wiring, disposal
//! - SessionRegistry: at most one live session per project path
//! - accept timeout, telemetry startup, ordered teardown

use std::collections::HashMap;
use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sysinfo::System;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::protocol::ProtocolMessage;
use crate::proxy::channels::MessageChannels;
use crate::proxy::convert::ConverterRegistry;
use crate::proxy::core::ProxyCore;
use crate::proxy::framing::{read_frame, write_frame, Transcript};
use crate::proxy::intercept::{ClientInterceptor, DebuggerInterceptor, Interceptor};
use crate::proxy::launch::{LaunchProfile, LaunchRewriter, ProfileRewriter};
use crate::proxy::tracker::RequestTracker;
use crate::telemetry::TelemetrySampler;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    AwaitingClient = 1,
    ProcessStarting = 2,
    Ready = 3,
    Disposing = 4,
    Disposed = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::AwaitingClient,
            2 => Self::ProcessStarting,
            3 => Self::Ready,
            4 => Self::Disposing,
            5 => Self::Disposed,
            _ => Self::Created,
        }
    }
}

/// How the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Normal teardown: client disconnect, debugger exit or explicit stop.
    Completed,
    /// Cancelled before becoming ready (no client within the accept window).
    Canceled,
    /// A fault tore the session down; the reason is logged and carried here.
    Faulted(String),
}

/// Coordination signals raised by transports and interceptors and consumed
/// by the session's event loop.
#[derive(Debug)]
pub enum SessionEvent {
    DebuggeeDiscovered(u32),
    DebuggerExited(Option<i32>),
    PeerDisconnected(&'static str),
    Fault(String),
}

/// The debugger child process command line.
#[derive(Debug, Clone)]
pub struct DebuggerCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Everything a session consumes, resolved once before start.
pub struct SessionConfig {
    pub project_path: PathBuf,
    pub listen: SocketAddr,
    pub accept_timeout: Duration,
    pub drain_timeout: Duration,
    pub debugger: DebuggerCommand,
    pub profile: LaunchProfile,
    /// Invoked last during disposal; failures are logged, never propagated.
    pub on_dispose: Option<Box<dyn FnOnce() -> io::Result<()> + Send>>,
}

impl SessionConfig {
    #[must_use]
    pub fn new(project_path: PathBuf, debugger: DebuggerCommand, profile: LaunchProfile) -> Self {
        Self {
            project_path,
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            accept_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(3),
            debugger,
            profile,
            on_dispose: None,
        }
    }
}

struct SessionInner {
    listener: Option<TcpListener>,
    client: Option<TcpStream>,
    debugger: Option<Child>,
    debuggee_pid: Option<u32>,
    telemetry: Option<TelemetrySampler>,
    workers: Vec<JoinHandle<()>>,
    cleanup: Option<Box<dyn FnOnce() -> io::Result<()> + Send>>,
}

struct OutcomeCell {
    slot: Mutex<Option<SessionOutcome>>,
    cvar: Condvar,
}

impl OutcomeCell {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            cvar: Condvar::new(),
        }
    }

    /// First write wins; later settlements are ignored.
    fn set(&self, outcome: SessionOutcome) {
        let mut slot = lock_or_recover(&self.slot);
        if slot.is_none() {
            *slot = Some(outcome);
            self.cvar.notify_all();
        }
    }

    fn peek(&self) -> Option<SessionOutcome> {
        lock_or_recover(&self.slot).clone()
    }

    fn wait(&self) -> SessionOutcome {
        let mut slot = lock_or_recover(&self.slot);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = match self.cvar.wait(slot) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<SessionOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock_or_recover(&self.slot);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Some(outcome.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = match self.cvar.wait_timeout(slot, deadline - now) {
                Ok(result) => result,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot = guard;
        }
    }
}

fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

enum AcceptError {
    TimedOut,
    Cancelled,
    Io(io::Error),
}

/// One live debug session: a listening endpoint, a debugger child process
/// and the proxy wiring between them.
pub struct DebugSession {
    project_path: PathBuf,
    debugger: DebuggerCommand,
    accept_timeout: Duration,
    drain_timeout: Duration,
    local_addr: SocketAddr,
    state: AtomicU8,
    disposing: AtomicBool,
    cancel: Arc<AtomicBool>,
    channels: Arc<MessageChannels>,
    tracker: Arc<RequestTracker>,
    outcome: OutcomeCell,
    inner: Mutex<SessionInner>,
}

impl DebugSession {
    /// Bind the listening endpoint and start the session in the background.
    /// Returns as soon as the endpoint is bound so the caller can hand the
    /// port to the editor; connection acceptance, process startup and the
    /// proxy loops all run on their own threads.
    pub fn start(mut config: SessionConfig) -> Result<Arc<Self>, SessionError> {
        let listener = TcpListener::bind(config.listen).map_err(SessionError::Bind)?;
        listener.set_nonblocking(true).map_err(SessionError::Bind)?;
        let local_addr = listener.local_addr().map_err(SessionError::Bind)?;

        let channels = Arc::new(MessageChannels::new());
        let tracker = Arc::new(RequestTracker::new());
        let converters = Arc::new(ConverterRegistry::with_default_converters());
        let (event_tx, event_rx) = mpsc::channel();

        let rewriter: Arc<dyn LaunchRewriter> = Arc::new(ProfileRewriter::new(config.profile.clone()));
        let client_interceptor: Arc<dyn Interceptor> = Arc::new(ClientInterceptor::new(
            rewriter,
            Arc::clone(&converters),
            Arc::clone(&tracker),
        ));
        let debugger_interceptor: Arc<dyn Interceptor> = Arc::new(DebuggerInterceptor::new(
            Arc::clone(&converters),
            event_tx.clone(),
        ));
        let core = ProxyCore::new(
            Arc::clone(&channels),
            Arc::clone(&tracker),
            client_interceptor,
            debugger_interceptor,
        );

        let session = Arc::new(Self {
            project_path: config.project_path.clone(),
            debugger: config.debugger.clone(),
            accept_timeout: config.accept_timeout,
            drain_timeout: config.drain_timeout,
            local_addr,
            state: AtomicU8::new(SessionState::Created as u8),
            disposing: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
            channels,
            tracker,
            outcome: OutcomeCell::new(),
            inner: Mutex::new(SessionInner {
                listener: Some(listener),
                client: None,
                debugger: None,
                debuggee_pid: None,
                telemetry: None,
                workers: Vec::new(),
                cleanup: config.on_dispose.take(),
            }),
        });
        session.set_state(SessionState::AwaitingClient);
        info!(
            project = %session.project_path.display(),
            addr = %local_addr,
            "debug session awaiting client"
        );

        let runner = Arc::clone(&session);
        thread::spawn(move || runner.run(event_rx, core, event_tx));
        Ok(session)
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state() == SessionState::Disposed
    }

    #[must_use]
    pub fn debuggee_pid(&self) -> Option<u32> {
        self.lock_inner().debuggee_pid
    }

    /// Block until the session settles.
    #[must_use]
    pub fn wait(&self) -> SessionOutcome {
        self.outcome.wait()
    }

    /// Bounded wait; `None` if the session is still running.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<SessionOutcome> {
        self.outcome.wait_timeout(timeout)
    }

    #[must_use]
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome.peek()
    }

    /// Graceful, idempotent teardown. Safe to call from any thread and any
    /// number of times.
    pub fn dispose(&self) {
        self.dispose_inner(true);
    }

    /// Teardown that skips the bounded drain of in-flight work.
    pub fn dispose_forced(&self) {
        self.dispose_inner(false);
    }

    fn run(self: Arc<Self>, event_rx: Receiver<SessionEvent>, core: Arc<ProxyCore>, events: Sender<SessionEvent>) {
        let client = match self.accept_client() {
            Ok(stream) => stream,
            Err(AcceptError::TimedOut) => {
                warn!(
                    timeout = ?self.accept_timeout,
                    "no debug client connected, cancelling session"
                );
                self.outcome.set(SessionOutcome::Canceled);
                self.dispose();
                return;
            }
            Err(AcceptError::Cancelled) => {
                self.dispose();
                return;
            }
            Err(AcceptError::Io(err)) => {
                self.outcome
                    .set(SessionOutcome::Faulted(format!("accept failed: {err}")));
                self.dispose();
                return;
            }
        };

        self.set_state(SessionState::ProcessStarting);
        if let Err(reason) = self.start_debugger(client, &core, &events) {
            error!(%reason, "debug session failed to start");
            self.outcome.set(SessionOutcome::Faulted(reason));
            self.dispose();
            return;
        }
        self.set_state(SessionState::Ready);
        info!("debug session ready");

        // Only workers hold event senders now; once disposal stops them the
        // receive loop below observes disconnect and this thread exits.
        drop(core);
        drop(events);

        while let Ok(event) = event_rx.recv() {
            match event {
                SessionEvent::DebuggeeDiscovered(pid) => {
                    let mut inner = self.lock_inner();
                    inner.debuggee_pid = Some(pid);
                    if inner.telemetry.is_none() && !self.cancel.load(Ordering::SeqCst) {
                        inner.telemetry = Some(TelemetrySampler::spawn(
                            pid,
                            Arc::clone(&self.channels),
                            Arc::clone(&self.tracker),
                        ));
                    }
                }
                SessionEvent::DebuggerExited(code) => {
                    info!(?code, "debugger process exited");
                    break;
                }
                SessionEvent::PeerDisconnected(peer) => {
                    info!(peer, "peer disconnected");
                    break;
                }
                SessionEvent::Fault(reason) => {
                    error!(%reason, "session fault");
                    self.outcome.set(SessionOutcome::Faulted(reason));
                    break;
                }
            }
        }
        self.dispose();
    }

    fn accept_client(&self) -> Result<TcpStream, AcceptError> {
        let deadline = Instant::now() + self.accept_timeout;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(AcceptError::Cancelled);
            }
            let accepted = {
                let inner = self.lock_inner();
                let Some(listener) = inner.listener.as_ref() else {
                    return Err(AcceptError::Cancelled);
                };
                match listener.accept() {
                    Ok(accepted) => Some(accepted),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
                    Err(err) => return Err(AcceptError::Io(err)),
                }
            };
            if let Some((stream, peer)) = accepted {
                info!(%peer, "debug client connected");
                stream.set_nonblocking(false).map_err(AcceptError::Io)?;
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            if Instant::now() >= deadline {
                return Err(AcceptError::TimedOut);
            }
            thread::sleep(ACCEPT_POLL_INTERVAL);
        }
    }

    /// Spawn the debugger child and wire every transport thread. The error
    /// string becomes the session's fault reason.
    fn start_debugger(
        self: &Arc<Self>,
        client: TcpStream,
        core: &Arc<ProxyCore>,
        events: &Sender<SessionEvent>,
    ) -> Result<(), String> {
        let mut command = Command::new(&self.debugger.program);
        command
            .args(&self.debugger.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command
            .spawn()
            .map_err(|err| format!("debugger '{}' failed to start: {err}", self.debugger.program))?;
        info!(pid = child.id(), program = %self.debugger.program, "debugger process started");

        let stdin = child.stdin.take().ok_or("debugger stdin unavailable")?;
        let stdout = child.stdout.take().ok_or("debugger stdout unavailable")?;
        let stderr = child.stderr.take().ok_or("debugger stderr unavailable")?;

        let reader_stream = client.try_clone().map_err(|err| format!("client stream: {err}"))?;
        let writer_stream = client.try_clone().map_err(|err| format!("client stream: {err}"))?;

        let transcript = Transcript::from_env();
        let mut workers = core.spawn_loops();
        workers.push(spawn_client_reader(
            reader_stream,
            Arc::clone(core),
            events.clone(),
            transcript.clone(),
            Arc::clone(&self.cancel),
        ));
        workers.push(spawn_client_writer(
            writer_stream,
            Arc::clone(&self.channels),
            events.clone(),
            transcript.clone(),
        ));
        workers.push(spawn_debugger_reader(
            stdout,
            Arc::clone(&self.channels),
            events.clone(),
            transcript.clone(),
            Arc::clone(&self.cancel),
        ));
        workers.push(spawn_debugger_writer(
            stdin,
            Arc::clone(&self.channels),
            events.clone(),
            transcript,
        ));
        workers.push(spawn_stderr_drain(stderr));
        workers.push(spawn_exit_watcher(Arc::clone(self), events.clone()));

        let mut inner = self.lock_inner();
        inner.client = Some(client);
        inner.debugger = Some(child);
        inner.workers = workers;
        Ok(())
    }

    /// Ordered teardown: cancel, drain bounded, terminate processes, release
    /// the endpoint, then the caller-supplied cleanup. Guarded by an atomic
    /// compare-and-set so concurrent calls are no-ops.
    fn dispose_inner(&self, graceful: bool) {
        if self
            .disposing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.set_state(SessionState::Disposing);
        info!(project = %self.project_path.display(), graceful, "disposing debug session");

        self.cancel.store(true, Ordering::SeqCst);
        self.channels.complete_all();
        self.tracker.cancel_all();

        let (client, workers, telemetry, debugger, debuggee_pid, listener, cleanup) = {
            let mut inner = self.lock_inner();
            (
                inner.client.take(),
                std::mem::take(&mut inner.workers),
                inner.telemetry.take(),
                inner.debugger.take(),
                inner.debuggee_pid.take(),
                inner.listener.take(),
                inner.cleanup.take(),
            )
        };

        // Cancellation must unblock pending transport reads.
        if let Some(stream) = &client {
            let _ = stream.shutdown(Shutdown::Both);
        }

        if graceful {
            bounded_join(workers, self.drain_timeout);
        }
        if let Some(sampler) = telemetry {
            sampler.stop();
        }

        if let Some(pid) = debuggee_pid {
            kill_debuggee(pid);
        }
        if let Some(mut child) = debugger {
            let _ = child.kill();
            let _ = child.wait();
        }

        drop(listener);
        drop(client);

        if let Some(cleanup) = cleanup {
            if let Err(err) = cleanup() {
                error!(error = %err, "session cleanup callback failed");
            }
        }

        self.outcome.set(SessionOutcome::Completed);
        self.set_state(SessionState::Disposed);
        info!(project = %self.project_path.display(), "debug session disposed");
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn lock_inner(&self) -> MutexGuard<'_, SessionInner> {
        lock_or_recover(&self.inner)
    }
}

fn spawn_client_reader(
    stream: TcpStream,
    core: Arc<ProxyCore>,
    events: Sender<SessionEvent>,
    transcript: Transcript,
    cancel: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        loop {
            match read_frame(&mut reader) {
                Ok(Some(payload)) => {
                    transcript.line("c->", &payload);
                    match ProtocolMessage::from_slice(&payload) {
                        Ok(message) => core.ingest_client_message(message),
                        Err(err) => {
                            // Contract violation, not a recoverable condition.
                            let _ = events.send(SessionEvent::Fault(format!(
                                "unsupported client message: {err}"
                            )));
                            break;
                        }
                    }
                }
                Ok(None) => {
                    let _ = events.send(SessionEvent::PeerDisconnected("client"));
                    break;
                }
                Err(err) => {
                    if !cancel.load(Ordering::SeqCst) {
                        let _ = events
                            .send(SessionEvent::Fault(format!("client framing error: {err}")));
                    }
                    break;
                }
            }
        }
        debug!("client reader finished");
    })
}

fn spawn_client_writer(
    mut stream: TcpStream,
    channels: Arc<MessageChannels>,
    events: Sender<SessionEvent>,
    transcript: Transcript,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while let Some(message) = channels.client_outbound.recv() {
            let Ok(payload) = message.to_vec() else {
                continue;
            };
            transcript.line("->c", &payload);
            if write_frame(&mut stream, &payload).is_err() {
                let _ = events.send(SessionEvent::PeerDisconnected("client"));
                break;
            }
        }
        debug!("client writer finished");
    })
}

fn spawn_debugger_reader(
    stdout: ChildStdout,
    channels: Arc<MessageChannels>,
    events: Sender<SessionEvent>,
    transcript: Transcript,
    cancel: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            match read_frame(&mut reader) {
                Ok(Some(payload)) => {
                    transcript.line("d->", &payload);
                    match ProtocolMessage::from_slice(&payload) {
                        Ok(message) => {
                            channels.debugger_inbound.send(message);
                        }
                        Err(err) => {
                            let _ = events.send(SessionEvent::Fault(format!(
                                "unsupported debugger message: {err}"
                            )));
                            break;
                        }
                    }
                }
                Ok(None) => {
                    let _ = events.send(SessionEvent::PeerDisconnected("debugger"));
                    break;
                }
                Err(err) => {
                    if !cancel.load(Ordering::SeqCst) {
                        let _ = events
                            .send(SessionEvent::Fault(format!("debugger framing error: {err}")));
                    }
                    break;
                }
            }
        }
        debug!("debugger reader finished");
    })
}

fn spawn_debugger_writer(
    mut stdin: ChildStdin,
    channels: Arc<MessageChannels>,
    events: Sender<SessionEvent>,
    transcript: Transcript,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while let Some(message) = channels.debugger_outbound.recv() {
            let Ok(payload) = message.to_vec() else {
                continue;
            };
            transcript.line("->d", &payload);
            if write_frame(&mut stdin, &payload).is_err() {
                let _ = events.send(SessionEvent::PeerDisconnected("debugger"));
                break;
            }
        }
        debug!("debugger writer finished");
    })
}

/// Stderr carries diagnostics only; it is never parsed as protocol, but it
/// must be drained or the child wedges on a full pipe.
fn spawn_stderr_drain(stderr: ChildStderr) -> JoinHandle<()> {
    thread::spawn(move || {
        use std::io::BufRead;
        let reader = BufReader::new(stderr);
        for line in reader.lines() {
            match line {
                Ok(line) => debug!(source = "debugger-stderr", "{line}"),
                Err(_) => break,
            }
        }
    })
}

fn spawn_exit_watcher(session: Arc<DebugSession>, events: Sender<SessionEvent>) -> JoinHandle<()> {
    thread::spawn(move || {
        loop {
            if session.cancel.load(Ordering::SeqCst) {
                break;
            }
            let status = {
                let mut inner = session.lock_inner();
                let Some(child) = inner.debugger.as_mut() else {
                    break;
                };
                child.try_wait().unwrap_or(None)
            };
            if let Some(status) = status {
                let _ = events.send(SessionEvent::DebuggerExited(status.code()));
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    })
}

/// Wait for workers to finish, bounded. Stragglers are detached; the process
/// kills below will unblock them.
fn bounded_join(mut workers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        workers.retain(|worker| !worker.is_finished());
        if workers.is_empty() {
            break;
        }
        if Instant::now() >= deadline {
            warn!(stuck = workers.len(), "workers still running after drain window");
            break;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
}

fn kill_debuggee(pid: u32) {
    let mut system = System::new();
    let pid = sysinfo::Pid::from_u32(pid);
    if system.refresh_process(pid) {
        if let Some(process) = system.process(pid) {
            if process.kill() {
                info!(pid = pid.as_u32(), "debuggee terminated");
            } else {
                warn!(pid = pid.as_u32(), "could not terminate debuggee");
            }
        }
    }
}

/// Keyed registry enforcing at most one live session per project path.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<PathBuf, Arc<DebugSession>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for `config.project_path`. Fails with
    /// [`SessionError::SessionActive`] when a live session already exists
    /// for that path; disposed sessions are pruned first.
    pub fn start(&self, config: SessionConfig) -> Result<Arc<DebugSession>, SessionError> {
        let mut sessions = lock_or_recover(&self.sessions);
        sessions.retain(|_, session| !session.is_disposed());
        if sessions.contains_key(&config.project_path) {
            return Err(SessionError::SessionActive(config.project_path));
        }
        let session = DebugSession::start(config)?;
        sessions.insert(session.project_path.clone(), Arc::clone(&session));
        Ok(session)
    }

    #[must_use]
    pub fn get(&self, project_path: &Path) -> Option<Arc<DebugSession>> {
        lock_or_recover(&self.sessions).get(project_path).cloned()
    }

    /// Dispose every live session, gracefully.
    pub fn dispose_all(&self) {
        let sessions: Vec<Arc<DebugSession>> =
            lock_or_recover(&self.sessions).values().cloned().collect();
        for session in sessions {
            session.dispose();
        }
    }
}
