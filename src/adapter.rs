//! The adapter facade.
//!
//! One [`CameraAdapter`] owns the transport, the frame store, the consumer
//! set, the acquisition loop, and the phase monitor, and exposes the small
//! operation surface callers interact with. All methods take `&self`; the
//! adapter is shared freely behind an `Arc`.

use crate::acquisition::AcquisitionLoop;
use crate::config::AdapterConfig;
use crate::distribution::{DistributionSet, FrameReceiver, FrameSink, SessionId};
use crate::errors::{AdapterError, TransportError};
use crate::phase::{PhaseMonitor, PhaseSink};
use crate::store::FrameStore;
use crate::transport::{Transport, TransportBackend};
use crate::types::{AdapterStats, DevicePhase, Frame, FrameKind};
use std::sync::Arc;
use std::time::Duration;

pub struct CameraAdapter {
    transport: Arc<Transport>,
    store: Arc<FrameStore>,
    consumers: Arc<DistributionSet>,
    acquisition: AcquisitionLoop,
    monitor: PhaseMonitor,
    still_timeout: Duration,
}

impl CameraAdapter {
    /// Assemble an adapter around a concrete backend.
    pub fn new(
        config: &AdapterConfig,
        backend: Box<dyn TransportBackend>,
        sink: Arc<dyn PhaseSink>,
    ) -> Self {
        let transport = Arc::new(Transport::new(backend));
        let store = Arc::new(FrameStore::new());
        let consumers = Arc::new(DistributionSet::new());
        let acquisition = AcquisitionLoop::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            Arc::clone(&consumers),
            config.acquisition.clone(),
        );
        let monitor = PhaseMonitor::new(Arc::clone(&transport), sink, config.phase.poll_interval());
        Self {
            transport,
            store,
            consumers,
            acquisition,
            monitor,
            still_timeout: config.frame_timeout(),
        }
    }

    /// Assemble an adapter with the backend selected by configuration.
    pub fn from_config(
        config: &AdapterConfig,
        sink: Arc<dyn PhaseSink>,
    ) -> Result<Self, AdapterError> {
        if let Err(msg) = config.validate() {
            return Err(AdapterError::Transport(TransportError::ConfigRejected(msg)));
        }
        let backend: Box<dyn TransportBackend> = match config.transport.kind {
            #[cfg(unix)]
            crate::config::TransportKind::Serial => Box::new(
                crate::transport::serial::SerialBackend::new(config.serial.clone()),
            ),
            #[cfg(target_os = "linux")]
            crate::config::TransportKind::V4l2 => Box::new(
                crate::transport::v4l2::V4l2Backend::new(config.v4l2.clone()),
            ),
            #[allow(unreachable_patterns)]
            kind => {
                return Err(AdapterError::Transport(TransportError::ConfigRejected(
                    format!("transport {} is not supported on this platform", kind),
                )))
            }
        };
        Ok(Self::new(config, backend, sink))
    }

    pub fn describe_transport(&self) -> String {
        self.transport.describe()
    }

    pub fn open(&self) -> Result<(), AdapterError> {
        self.transport.open().map_err(AdapterError::from)
    }

    pub fn close(&self) {
        self.stop_stream();
        self.transport.close();
    }

    /// One-shot still capture.
    ///
    /// While streaming, the still is the next frame off the live feed, so a
    /// command/response link never sees interleaved exchanges. When idle it
    /// is a direct transport exchange published to the store.
    pub fn capture_still(&self) -> Result<Arc<Frame>, AdapterError> {
        if self.acquisition.is_streaming() {
            let (frame, _) = self
                .store
                .wait_for_next(self.store.last_seq(), self.still_timeout)
                .ok_or(AdapterError::Transport(TransportError::Timeout))?;
            let mut still = (*frame).clone();
            still.kind = FrameKind::Still;
            return Ok(Arc::new(still));
        }
        let frame = self.transport.capture_still()?;
        Ok(self.store.publish(frame))
    }

    /// Start continuous acquisition. No-op when already streaming.
    pub fn start_stream(&self) -> Result<(), AdapterError> {
        self.acquisition.start()
    }

    /// Stop continuous acquisition and detach every consumer.
    pub fn stop_stream(&self) {
        self.acquisition.stop();
        self.consumers.clear();
    }

    /// Attach a channel-backed consumer to the live stream.
    pub fn attach_stream_consumer(&self) -> Result<(SessionId, FrameReceiver), AdapterError> {
        if !self.acquisition.is_streaming() {
            return Err(AdapterError::StreamInactive);
        }
        Ok(self.consumers.attach())
    }

    /// Attach a caller-provided sink to the live stream.
    pub fn attach_stream_sink(&self, sink: Arc<dyn FrameSink>) -> Result<SessionId, AdapterError> {
        if !self.acquisition.is_streaming() {
            return Err(AdapterError::StreamInactive);
        }
        Ok(self.consumers.attach_sink(sink))
    }

    /// Detach a consumer. Unknown ids return false.
    pub fn detach_stream_consumer(&self, id: SessionId) -> bool {
        self.consumers.detach(id)
    }

    /// Most recent published frame, if any, without waiting.
    pub fn get_latest_frame(&self) -> Option<Arc<Frame>> {
        self.store.latest().map(|(frame, _)| frame)
    }

    /// Block until a frame newer than `after_seq` is published or `timeout`
    /// elapses.
    pub fn wait_for_frame(&self, after_seq: u64, timeout: Duration) -> Option<Arc<Frame>> {
        self.store.wait_for_next(after_seq, timeout).map(|(f, _)| f)
    }

    pub fn get_phase(&self) -> DevicePhase {
        self.monitor.current_phase()
    }

    pub fn is_streaming(&self) -> bool {
        self.acquisition.is_streaming()
    }

    /// Begin periodic phase reporting to the configured sink.
    pub fn start_phase_reporting(&self) -> Result<(), AdapterError> {
        self.monitor.start().map_err(|e| {
            AdapterError::Internal(format!("failed to spawn phase monitor: {}", e))
        })
    }

    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            frames_published: self.acquisition.frames_published(),
            timeouts: self.acquisition.timeouts(),
            protocol_errors: self.acquisition.protocol_errors(),
            reopens: self.acquisition.reopens(),
            consumers: self.consumers.len(),
            streaming: self.acquisition.is_streaming(),
            phase: self.get_phase(),
            last_seq: self.store.last_seq(),
        }
    }

    /// Stop phase reporting and streaming, then release the transport.
    pub fn shutdown(&self) {
        self.monitor.stop();
        self.stop_stream();
        self.transport.close();
    }
}

impl std::fmt::Debug for CameraAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraAdapter")
            .field("transport", &self.transport.describe())
            .finish_non_exhaustive()
    }
}

impl Drop for CameraAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
