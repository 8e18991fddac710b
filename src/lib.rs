//! camlink: edge-resident camera adapter
//!
//! Bridges a physical camera to in-process consumers: one-shot stills, a
//! continuously refreshed latest-frame slot, live stream fan-out, and device
//! phase reporting to an external control plane.
//!
//! # Features
//! - Serial/UART command-response and V4L2 mmap capture behind one transport contract
//! - Single-slot frame store with strictly increasing sequence numbers
//! - Latest-frame-wins distribution to any number of mutually isolated consumers
//! - Self-healing acquisition loop with bounded reopen and exponential backoff
//! - Edge-triggered device phase reporting (Unknown/Pending/Running/Failed)
//!
//! # Usage
//! ```rust,no_run
//! use camlink::{AdapterConfig, CameraAdapter, LogPhaseSink};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), camlink::AdapterError> {
//!     camlink::init_logging();
//!     let config = AdapterConfig::load_or_default();
//!     let adapter = CameraAdapter::from_config(&config, Arc::new(LogPhaseSink))?;
//!     adapter.open()?;
//!     let frame = adapter.capture_still()?;
//!     println!("captured {} bytes", frame.len());
//!     Ok(())
//! }
//! ```

pub mod acquisition;
pub mod adapter;
pub mod config;
pub mod distribution;
pub mod errors;
pub mod phase;
pub mod store;
pub mod transport;
pub mod types;

// Testing utilities - scripted backend and synthetic data for offline testing
pub mod testing;

// Re-exports for convenience
pub use adapter::CameraAdapter;
pub use config::{AdapterConfig, TransportKind};
pub use distribution::{DistributionSet, FrameReceiver, FrameSink, SessionId, SinkError};
pub use errors::{AdapterError, TransportError};
pub use phase::{
    compute_phase, phase_patch_body, LogPhaseSink, PhaseMonitor, PhaseReportError, PhaseSink,
};
pub use store::FrameStore;
pub use transport::{Transport, TransportBackend, TransportHealth, TransportState};
pub use types::{AdapterStats, DevicePhase, Frame, FrameKind};

/// Initialize logging for the adapter
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "camlink=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
