use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a frame was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// One-shot still capture.
    Still,
    /// One unit of a continuous stream.
    Stream,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Still => "still",
            FrameKind::Stream => "stream",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One captured image or stream unit.
///
/// The payload is immutable and cheaply shareable; every consumer of a
/// published frame holds the same allocation. `seq` is zero until the frame
/// store stamps it at publish time, after which it is unique and strictly
/// increasing for the device session.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub kind: FrameKind,
    /// Negotiated encoding name, e.g. "JPEG" or "MJPG".
    pub format: String,
    pub timestamp: DateTime<Utc>,
    pub data: Bytes,
}

impl Frame {
    pub fn still(data: impl Into<Bytes>, format: impl Into<String>) -> Self {
        Self::new(FrameKind::Still, data, format)
    }

    pub fn stream_unit(data: impl Into<Bytes>, format: impl Into<String>) -> Self {
        Self::new(FrameKind::Stream, data, format)
    }

    fn new(kind: FrameKind, data: impl Into<Bytes>, format: impl Into<String>) -> Self {
        Self {
            seq: 0,
            kind,
            format: format.into(),
            timestamp: Utc::now(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Coarse operational status reported to the external control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevicePhase {
    Unknown,
    Pending,
    Running,
    Failed,
}

impl DevicePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevicePhase::Unknown => "Unknown",
            DevicePhase::Pending => "Pending",
            DevicePhase::Running => "Running",
            DevicePhase::Failed => "Failed",
        }
    }
}

impl fmt::Display for DevicePhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time counters for a status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterStats {
    pub frames_published: u64,
    pub timeouts: u64,
    pub protocol_errors: u64,
    pub reopens: u64,
    pub consumers: usize,
    pub streaming: bool,
    pub phase: DevicePhase,
    pub last_seq: u64,
}
