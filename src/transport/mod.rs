//! Physical imaging transports unified behind one contract.
//!
//! Two backing technologies exist: a serial/UART command-response link and a
//! memory-mapped V4L2 capture device. Both implement [`TransportBackend`];
//! the [`Transport`] wrapper owns the exclusive lock around state transitions
//! and I/O so a still-capture call and the streaming loop can never
//! interleave exchanges on the same handle, and the rest of the crate never
//! knows which backend is in use.

pub mod framing;
#[cfg(unix)]
pub mod serial;
#[cfg(target_os = "linux")]
pub mod v4l2;

use crate::errors::TransportError;
use crate::types::Frame;
use std::fmt;
use std::sync::Mutex;

/// Lifecycle of the physical handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Closed,
    OpenIdle,
    OpenCapturing,
}

impl TransportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::Closed => "closed",
            TransportState::OpenIdle => "open-idle",
            TransportState::OpenCapturing => "open-capturing",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, TransportState::Closed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw operations one physical backend provides.
///
/// Backends only perform I/O; sequencing rules (idempotent open, no reads
/// while idle) are enforced by [`Transport`], so a backend may assume its
/// methods are called in a valid order and never concurrently.
pub trait TransportBackend: Send {
    /// Short human-readable identity for logs, e.g. "serial /dev/ttyUSB0 @115200".
    fn describe(&self) -> String;
    fn open(&mut self) -> Result<(), TransportError>;
    fn capture_still(&mut self) -> Result<Frame, TransportError>;
    fn start_streaming(&mut self) -> Result<(), TransportError>;
    fn read_stream_frame(&mut self) -> Result<Frame, TransportError>;
    fn stop_streaming(&mut self) -> Result<(), TransportError>;
    fn close(&mut self);
}

/// Snapshot of transport health consumed by the phase state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHealth {
    pub state: TransportState,
    pub open_attempted: bool,
    pub faulted: bool,
}

struct TransportInner {
    backend: Box<dyn TransportBackend>,
    state: TransportState,
    open_attempted: bool,
    /// Last unrecovered device loss. Cleared only by a successful open.
    fault: Option<String>,
}

/// Exclusive owner of the physical handle.
///
/// All operations serialize on one internal lock, held across the backend
/// I/O; every backend read is bounded by its own timeout so the lock is
/// never held indefinitely. A device loss is remembered: subsequent calls
/// answer with the same `DeviceUnavailable` until a reopen succeeds.
pub struct Transport {
    inner: Mutex<TransportInner>,
}

impl Transport {
    pub fn new(backend: Box<dyn TransportBackend>) -> Self {
        Self {
            inner: Mutex::new(TransportInner {
                backend,
                state: TransportState::Closed,
                open_attempted: false,
                fault: None,
            }),
        }
    }

    pub fn describe(&self) -> String {
        self.inner.lock().expect("lock poisoned").backend.describe()
    }

    /// Acquire the handle and negotiate the configured mode. No-op success
    /// when already open.
    pub fn open(&self) -> Result<(), TransportError> {
        let mut g = self.inner.lock().expect("lock poisoned");
        g.open_attempted = true;
        if g.state.is_open() {
            log::debug!("transport already open, ignoring open()");
            return Ok(());
        }
        match g.backend.open() {
            Ok(()) => {
                g.state = TransportState::OpenIdle;
                if g.fault.take().is_some() {
                    log::info!("transport fault cleared by successful open");
                }
                log::info!("transport open: {}", g.backend.describe());
                Ok(())
            }
            Err(e) => {
                log::warn!("transport open failed: {}", e);
                Err(e)
            }
        }
    }

    /// One command/response (or buffer dequeue) cycle bounded by the
    /// backend's timeout.
    pub fn capture_still(&self) -> Result<Frame, TransportError> {
        let mut g = self.inner.lock().expect("lock poisoned");
        Self::require_open(&g)?;
        match g.backend.capture_still() {
            Err(TransportError::DeviceUnavailable(msg)) => Err(Self::lose_device(&mut g, msg)),
            other => other,
        }
    }

    /// Transition Open-Idle → Open-Capturing. No-op success when already
    /// capturing; `NotOpen` when closed.
    pub fn start_streaming(&self) -> Result<(), TransportError> {
        let mut g = self.inner.lock().expect("lock poisoned");
        Self::require_open(&g)?;
        if g.state == TransportState::OpenCapturing {
            log::debug!("streaming already active, ignoring start");
            return Ok(());
        }
        match g.backend.start_streaming() {
            Ok(()) => {
                g.state = TransportState::OpenCapturing;
                log::info!("transport streaming started");
                Ok(())
            }
            Err(TransportError::DeviceUnavailable(msg)) => Err(Self::lose_device(&mut g, msg)),
            Err(e) => Err(e),
        }
    }

    /// Transition Open-Capturing → Open-Idle. No-op success in any other
    /// state. The local state transitions even when the wire exchange fails;
    /// the error is surfaced for logging.
    pub fn stop_streaming(&self) -> Result<(), TransportError> {
        let mut g = self.inner.lock().expect("lock poisoned");
        if g.state != TransportState::OpenCapturing {
            return Ok(());
        }
        let result = g.backend.stop_streaming();
        match result {
            Ok(()) => {
                g.state = TransportState::OpenIdle;
                log::info!("transport streaming stopped");
                Ok(())
            }
            Err(TransportError::DeviceUnavailable(msg)) => Err(Self::lose_device(&mut g, msg)),
            Err(e) => {
                g.state = TransportState::OpenIdle;
                Err(e)
            }
        }
    }

    /// Pull one stream unit. Only valid while Open-Capturing.
    pub fn read_stream_frame(&self) -> Result<Frame, TransportError> {
        let mut g = self.inner.lock().expect("lock poisoned");
        Self::require_open(&g)?;
        if g.state != TransportState::OpenCapturing {
            return Err(TransportError::NotOpen);
        }
        match g.backend.read_stream_frame() {
            Err(TransportError::DeviceUnavailable(msg)) => Err(Self::lose_device(&mut g, msg)),
            other => other,
        }
    }

    /// Release the handle. Safe from any state, idempotent. Does not clear
    /// a recorded fault.
    pub fn close(&self) {
        let mut g = self.inner.lock().expect("lock poisoned");
        if g.state == TransportState::Closed {
            return;
        }
        if g.state == TransportState::OpenCapturing {
            if let Err(e) = g.backend.stop_streaming() {
                log::debug!("stop during close failed: {}", e);
            }
        }
        g.backend.close();
        g.state = TransportState::Closed;
        log::info!("transport closed");
    }

    pub fn state(&self) -> TransportState {
        self.inner.lock().expect("lock poisoned").state
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub fn health(&self) -> TransportHealth {
        let g = self.inner.lock().expect("lock poisoned");
        TransportHealth {
            state: g.state,
            open_attempted: g.open_attempted,
            faulted: g.fault.is_some(),
        }
    }

    /// Record an unrecovered failure observed outside a transport call
    /// (e.g. reopen exhaustion in the acquisition loop).
    pub fn record_fault(&self, msg: impl Into<String>) {
        let msg = msg.into();
        log::warn!("transport fault recorded: {}", msg);
        self.inner.lock().expect("lock poisoned").fault = Some(msg);
    }

    fn require_open(g: &TransportInner) -> Result<(), TransportError> {
        if g.state == TransportState::Closed {
            if let Some(fault) = &g.fault {
                return Err(TransportError::DeviceUnavailable(fault.clone()));
            }
            return Err(TransportError::NotOpen);
        }
        Ok(())
    }

    fn lose_device(g: &mut TransportInner, msg: String) -> TransportError {
        log::error!("device lost: {}", msg);
        g.backend.close();
        g.state = TransportState::Closed;
        g.fault = Some(msg.clone());
        TransportError::DeviceUnavailable(msg)
    }
}

/// Wait for the descriptor to become readable, at most `timeout`.
/// `Ok(false)` means the wait elapsed with nothing to read.
#[cfg(unix)]
pub(crate) fn wait_readable(
    fd: std::os::fd::BorrowedFd<'_>,
    timeout: std::time::Duration,
) -> Result<bool, TransportError> {
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

    let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    loop {
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => return Ok(false),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
                if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL)
                {
                    return Err(TransportError::DeviceUnavailable(
                        "device hung up".to_string(),
                    ));
                }
                return Ok(true);
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                return Err(TransportError::DeviceUnavailable(format!(
                    "poll failed: {}",
                    e
                )))
            }
        }
    }
}
