//! Fan-out of published frames to attached stream consumers.
//!
//! Consumers are held in a flat session list guarded by one lock, but
//! deliveries happen outside it: the set is snapshotted, the lock released,
//! and each sink offered the frame in turn. A consumer that cannot accept
//! right now just misses that cycle; one that reports itself gone is pruned.
//! Slow or dead consumers can therefore never stall publication or each
//! other.

use crate::types::Frame;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque identity of one attached consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a delivery did not reach a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The consumer has not drained the previous frame yet.
    Busy,
    /// The consumer is gone and will never accept another frame.
    Closed,
}

/// Destination for published frames.
///
/// `deliver` runs on the acquisition thread and must not block. A sink that
/// cannot take the frame immediately answers `Busy`; the frame is simply
/// skipped for that consumer and the next delivery carries a newer one.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: &Arc<Frame>) -> Result<(), SinkError>;
}

/// Sink backed by a bounded single-slot channel: the receiver always finds
/// the latest frame it kept up with, never a backlog.
struct ChannelSink {
    tx: mpsc::Sender<Arc<Frame>>,
}

impl FrameSink for ChannelSink {
    fn deliver(&self, frame: &Arc<Frame>) -> Result<(), SinkError> {
        match self.tx.try_send(Arc::clone(frame)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SinkError::Busy),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}

/// Consumer end of an attached stream session.
#[derive(Debug)]
pub struct FrameReceiver {
    id: SessionId,
    rx: mpsc::Receiver<Arc<Frame>>,
}

impl FrameReceiver {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Arc<Frame>> {
        self.rx.recv().await
    }

    /// Blocking receive for consumers living outside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Arc<Frame>> {
        self.rx.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Result<Arc<Frame>, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

struct StreamSession {
    id: SessionId,
    sink: Arc<dyn FrameSink>,
    /// Highest sequence this consumer has been handed.
    last_seq: u64,
}

/// The set of attached stream consumers.
#[derive(Default)]
pub struct DistributionSet {
    sessions: Mutex<Vec<StreamSession>>,
}

impl DistributionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a channel-backed consumer. The receiver sees frames published
    /// from attachment onward, each at most once, in sequence order.
    pub fn attach(&self) -> (SessionId, FrameReceiver) {
        let (tx, rx) = mpsc::channel(1);
        let id = self.attach_sink(Arc::new(ChannelSink { tx }));
        (id, FrameReceiver { id, rx })
    }

    /// Attach a caller-provided sink.
    pub fn attach_sink(&self, sink: Arc<dyn FrameSink>) -> SessionId {
        let id = SessionId::new();
        self.sessions
            .lock()
            .expect("lock poisoned")
            .push(StreamSession {
                id,
                sink,
                last_seq: 0,
            });
        log::info!("stream consumer {} attached", id);
        id
    }

    /// Remove a consumer. Unknown ids are a no-op returning false.
    pub fn detach(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock().expect("lock poisoned");
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        let removed = sessions.len() < before;
        if removed {
            log::info!("stream consumer {} detached", id);
        }
        removed
    }

    /// Offer a published frame to every attached consumer. Returns how many
    /// accepted it.
    pub fn deliver(&self, frame: &Arc<Frame>) -> usize {
        // Snapshot under the lock, send outside it.
        let targets: Vec<(SessionId, Arc<dyn FrameSink>)> = {
            let sessions = self.sessions.lock().expect("lock poisoned");
            sessions
                .iter()
                .filter(|s| s.last_seq < frame.seq)
                .map(|s| (s.id, Arc::clone(&s.sink)))
                .collect()
        };

        let mut delivered = Vec::new();
        let mut dead = Vec::new();
        for (id, sink) in targets {
            match sink.deliver(frame) {
                Ok(()) => delivered.push(id),
                Err(SinkError::Busy) => {
                    log::trace!("consumer {} busy, skipping frame {}", id, frame.seq);
                }
                Err(SinkError::Closed) => dead.push(id),
            }
        }

        let mut sessions = self.sessions.lock().expect("lock poisoned");
        for id in &dead {
            sessions.retain(|s| s.id != *id);
            log::info!("stream consumer {} gone, detached", id);
        }
        for id in &delivered {
            // A consumer detached mid-send is simply absent here.
            if let Some(s) = sessions.iter_mut().find(|s| s.id == *id) {
                s.last_seq = frame.seq;
            }
        }
        delivered.len()
    }

    /// Forget per-consumer progress after a sequence restart. The consumers
    /// themselves stay attached; without this, watermarks from the previous
    /// session would starve them until the new numbering caught up.
    pub fn reset_progress(&self) {
        let mut sessions = self.sessions.lock().expect("lock poisoned");
        for s in sessions.iter_mut() {
            s.last_seq = 0;
        }
    }

    /// Detach every consumer at once, e.g. when streaming stops.
    pub fn clear(&self) {
        let mut sessions = self.sessions.lock().expect("lock poisoned");
        if !sessions.is_empty() {
            log::info!("detaching {} stream consumers", sessions.len());
            sessions.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
