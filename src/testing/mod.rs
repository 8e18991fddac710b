//! Testing utilities for camlink
//!
//! Provides a fully scripted transport backend and synthetic frame payloads
//! so the acquisition loop, frame distribution, and phase reporting can be
//! exercised without camera hardware attached.

pub mod scripted;
pub mod synthetic_data;

pub use scripted::{ScriptHandle, ScriptedBackend, ScriptedRead};
pub use synthetic_data::{synthetic_jpeg_frame, wire_frame};
