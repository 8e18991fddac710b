//! Continuous acquisition worker.
//!
//! One named thread owns the stream: it pulls frames from the transport,
//! publishes them to the frame store, and fans them out to attached
//! consumers. Timeouts are routine and merely retried; repeated protocol
//! errors or a lost device trigger a bounded reopen with exponential
//! backoff, and only exhausted recovery marks the transport faulted and
//! parks the loop.

use crate::config::AcquisitionSettings;
use crate::distribution::DistributionSet;
use crate::errors::{AdapterError, TransportError};
use crate::store::FrameStore;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Shared {
    transport: Arc<Transport>,
    store: Arc<FrameStore>,
    consumers: Arc<DistributionSet>,
    settings: AcquisitionSettings,
    stop: AtomicBool,
    streaming: AtomicBool,
    frames: AtomicU64,
    timeouts: AtomicU64,
    protocol_errors: AtomicU64,
    reopens: AtomicU64,
}

pub struct AcquisitionLoop {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AcquisitionLoop {
    pub fn new(
        transport: Arc<Transport>,
        store: Arc<FrameStore>,
        consumers: Arc<DistributionSet>,
        settings: AcquisitionSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                store,
                consumers,
                settings,
                stop: AtomicBool::new(false),
                streaming: AtomicBool::new(false),
                frames: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
                protocol_errors: AtomicU64::new(0),
                reopens: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Put the transport into streaming mode and spawn the worker. Calling
    /// while already running is a no-op success.
    pub fn start(&self) -> Result<(), AdapterError> {
        let mut worker = self.worker.lock().expect("lock poisoned");
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                log::debug!("acquisition loop already running");
                return Ok(());
            }
        }

        self.shared.transport.start_streaming()?;
        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.streaming.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        match std::thread::Builder::new()
            .name("camlink-acquisition".to_string())
            .spawn(move || run(shared))
        {
            Ok(handle) => {
                *worker = Some(handle);
                log::info!("acquisition loop started");
                Ok(())
            }
            Err(e) => {
                self.shared.streaming.store(false, Ordering::SeqCst);
                if let Err(stop_err) = self.shared.transport.stop_streaming() {
                    log::debug!("stop after failed spawn: {}", stop_err);
                }
                Err(AdapterError::Internal(format!(
                    "failed to spawn acquisition thread: {}",
                    e
                )))
            }
        }
    }

    /// Signal the worker, wait for it to exit, and take the transport out
    /// of streaming mode. Safe to call when not running.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);

        let handle = self.worker.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            // The worker observes the flag within one bounded read.
            let grace = Instant::now() + Duration::from_secs(3);
            while !handle.is_finished() && Instant::now() < grace {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                if let Err(e) = handle.join() {
                    log::warn!("acquisition thread panicked: {:?}", e);
                }
            } else {
                log::warn!("acquisition thread did not exit in time, detaching");
            }
        }

        if let Err(e) = self.shared.transport.stop_streaming() {
            log::debug!("stop streaming after loop exit: {}", e);
        }
        self.shared.streaming.store(false, Ordering::SeqCst);
    }

    /// Whether the worker is live. Stays true across an in-progress reopen.
    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::SeqCst)
    }

    pub fn frames_published(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.shared.timeouts.load(Ordering::Relaxed)
    }

    pub fn protocol_errors(&self) -> u64 {
        self.shared.protocol_errors.load(Ordering::Relaxed)
    }

    pub fn reopens(&self) -> u64 {
        self.shared.reopens.load(Ordering::Relaxed)
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        if self.is_streaming() {
            log::warn!("acquisition loop dropped while running, stopping");
            self.stop();
        }
    }
}

fn run(shared: Arc<Shared>) {
    let mut consecutive_protocol_errors = 0u32;
    while !shared.stop.load(Ordering::SeqCst) {
        match shared.transport.read_stream_frame() {
            Ok(frame) => {
                consecutive_protocol_errors = 0;
                let published = shared.store.publish(frame);
                let delivered = shared.consumers.deliver(&published);
                shared.frames.fetch_add(1, Ordering::Relaxed);
                log::trace!(
                    "frame {} ({} bytes) delivered to {} consumers",
                    published.seq,
                    published.len(),
                    delivered
                );
            }
            Err(TransportError::Timeout) => {
                shared.timeouts.fetch_add(1, Ordering::Relaxed);
                log::debug!("no frame within the read bound, retrying");
            }
            Err(TransportError::Protocol(msg)) => {
                consecutive_protocol_errors += 1;
                shared.protocol_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "protocol error on stream read ({} consecutive): {}",
                    consecutive_protocol_errors,
                    msg
                );
                if consecutive_protocol_errors >= shared.settings.protocol_error_threshold {
                    if !reopen(&shared) {
                        break;
                    }
                    consecutive_protocol_errors = 0;
                }
            }
            Err(TransportError::DeviceUnavailable(msg)) => {
                log::error!("device lost mid-stream: {}", msg);
                if !reopen(&shared) {
                    break;
                }
                consecutive_protocol_errors = 0;
            }
            Err(TransportError::NotOpen) => {
                log::debug!("transport closed under the loop, exiting");
                break;
            }
            Err(e) => {
                log::warn!("unexpected stream read failure: {}", e);
                break;
            }
        }
    }
    shared.streaming.store(false, Ordering::SeqCst);
    log::info!(
        "acquisition loop exited after {} frames",
        shared.frames.load(Ordering::Relaxed)
    );
}

/// Close and reopen the transport with exponential backoff. True means
/// streaming resumed; false means stop was requested or recovery is
/// exhausted, in which case the fault has been recorded.
fn reopen(shared: &Shared) -> bool {
    let settings = &shared.settings;
    log::warn!("reopening transport after stream failure");
    shared.transport.close();

    let mut last_err = String::from("no attempt made");
    for attempt in 1..=settings.reopen_attempts {
        let delay = (settings.reopen_backoff_base_ms * 2u64.pow(attempt - 1))
            .min(settings.reopen_backoff_max_ms);
        if !sleep_unless_stopped(shared, Duration::from_millis(delay)) {
            log::info!("stop requested during reopen backoff");
            return false;
        }
        match shared
            .transport
            .open()
            .and_then(|()| shared.transport.start_streaming())
        {
            Ok(()) => {
                // The new session starts its own sequence numbering.
                shared.store.reset();
                shared.consumers.reset_progress();
                shared.reopens.fetch_add(1, Ordering::Relaxed);
                log::info!("transport reopened on attempt {}", attempt);
                return true;
            }
            Err(e) => {
                log::warn!(
                    "reopen attempt {}/{} failed: {}",
                    attempt,
                    settings.reopen_attempts,
                    e
                );
                last_err = e.to_string();
            }
        }
    }

    shared.transport.record_fault(format!(
        "reopen failed after {} attempts: {}",
        settings.reopen_attempts, last_err
    ));
    log::error!(
        "giving up after {} reopen attempts",
        settings.reopen_attempts
    );
    false
}

/// Sliced sleep that bails out early when stop is requested. Returns false
/// if stopped.
fn sleep_unless_stopped(shared: &Shared, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if shared.stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(20)));
    }
}
