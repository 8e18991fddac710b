//! Scripted transport backend.
//!
//! Every operation is driven by queues that tests fill before or while the
//! adapter runs, and every backend call is counted, so failure-handling
//! paths (timeouts, protocol errors, device loss, reopen storms) can be
//! reproduced deterministically.

use crate::errors::TransportError;
use crate::testing::synthetic_data::synthetic_jpeg_frame;
use crate::transport::TransportBackend;
use crate::types::Frame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted outcome for a stream read.
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    Frame(Vec<u8>),
    Timeout,
    Protocol(String),
    Unavailable(String),
}

#[derive(Default)]
struct ScriptInner {
    reads: Mutex<VecDeque<ScriptedRead>>,
    stills: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    open_failures: Mutex<VecDeque<TransportError>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    stream_starts: AtomicUsize,
    stream_stops: AtomicUsize,
    still_captures: AtomicUsize,
    frame_reads: AtomicUsize,
}

/// Backend whose behavior is fully determined by scripted queues.
///
/// An exhausted read queue behaves like a quiet device: each read pauses
/// briefly and reports `Timeout`, which also keeps a spinning acquisition
/// loop from burning a core during tests.
pub struct ScriptedBackend {
    inner: Arc<ScriptInner>,
}

/// Cloneable view onto a [`ScriptedBackend`]'s queues and call counters,
/// usable after the backend has been handed to a transport.
#[derive(Clone)]
pub struct ScriptHandle {
    inner: Arc<ScriptInner>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScriptInner::default()),
        }
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn push_read(&self, read: ScriptedRead) {
        self.handle().push_read(read);
    }

    pub fn push_still_error(&self, err: TransportError) {
        self.handle().push_still_error(err);
    }

    pub fn fail_next_open(&self, err: TransportError) {
        self.handle().fail_next_open(err);
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptHandle {
    pub fn push_read(&self, read: ScriptedRead) {
        self.inner.reads.lock().expect("lock poisoned").push_back(read);
    }

    pub fn push_frame(&self, payload: Vec<u8>) {
        self.push_read(ScriptedRead::Frame(payload));
    }

    pub fn push_still(&self, payload: Vec<u8>) {
        self.inner
            .stills
            .lock()
            .expect("lock poisoned")
            .push_back(Ok(payload));
    }

    pub fn push_still_error(&self, err: TransportError) {
        self.inner
            .stills
            .lock()
            .expect("lock poisoned")
            .push_back(Err(err));
    }

    pub fn fail_next_open(&self, err: TransportError) {
        self.inner
            .open_failures
            .lock()
            .expect("lock poisoned")
            .push_back(err);
    }

    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn stream_starts(&self) -> usize {
        self.inner.stream_starts.load(Ordering::SeqCst)
    }

    pub fn stream_stops(&self) -> usize {
        self.inner.stream_stops.load(Ordering::SeqCst)
    }

    pub fn still_captures(&self) -> usize {
        self.inner.still_captures.load(Ordering::SeqCst)
    }

    pub fn frame_reads(&self) -> usize {
        self.inner.frame_reads.load(Ordering::SeqCst)
    }
}

impl TransportBackend for ScriptedBackend {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        match self
            .inner
            .open_failures
            .lock()
            .expect("lock poisoned")
            .pop_front()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn capture_still(&mut self) -> Result<Frame, TransportError> {
        let n = self.inner.still_captures.fetch_add(1, Ordering::SeqCst);
        match self.inner.stills.lock().expect("lock poisoned").pop_front() {
            Some(Ok(payload)) => Ok(Frame::still(payload, "JPEG")),
            Some(Err(err)) => Err(err),
            None => Ok(Frame::still(synthetic_jpeg_frame(n as u64, 64), "JPEG")),
        }
    }

    fn start_streaming(&mut self) -> Result<(), TransportError> {
        self.inner.stream_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_stream_frame(&mut self) -> Result<Frame, TransportError> {
        self.inner.frame_reads.fetch_add(1, Ordering::SeqCst);
        let next = self.inner.reads.lock().expect("lock poisoned").pop_front();
        match next {
            Some(ScriptedRead::Frame(payload)) => Ok(Frame::stream_unit(payload, "JPEG")),
            Some(ScriptedRead::Timeout) => {
                std::thread::sleep(Duration::from_millis(2));
                Err(TransportError::Timeout)
            }
            Some(ScriptedRead::Protocol(msg)) => Err(TransportError::Protocol(msg)),
            Some(ScriptedRead::Unavailable(msg)) => Err(TransportError::DeviceUnavailable(msg)),
            None => {
                std::thread::sleep(Duration::from_millis(5));
                Err(TransportError::Timeout)
            }
        }
    }

    fn stop_streaming(&mut self) -> Result<(), TransportError> {
        self.inner.stream_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}
