//! Configuration management for camlink
//!
//! Provides configuration loading, saving, and environment overrides for the
//! transport, acquisition loop, and phase reporting settings, plus the opaque
//! per-operation protocol property lists shipped with a device instruction
//! file.

use crate::errors::AdapterError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub v4l2: V4l2Settings,
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    #[serde(default)]
    pub phase: PhaseSettings,
    /// Per-operation protocol property lists, consumed once at construction.
    #[serde(default)]
    pub instructions: HashMap<String, InstructionSettings>,
}

/// Identity of the device in the external control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub name: String,
    pub namespace: String,
}

/// Which physical transport backs the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    pub kind: TransportKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Serial,
    V4l2,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::V4l2 => write!(f, "v4l2"),
        }
    }
}

/// UART link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device node of the serial port
    pub path: String,
    /// Line speed in bits per second
    pub baud: u32,
    /// Bound on waiting for a command status line, milliseconds
    pub response_timeout_ms: u64,
    /// Bound on waiting for one complete frame, milliseconds
    pub frame_timeout_ms: u64,
    /// Largest declared frame length accepted by the framing layer
    pub max_frame_bytes: usize,
}

/// V4L2 capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V4l2Settings {
    /// Device node of the capture device
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Requested pixel format as a four-character code
    pub fourcc: String,
    /// Number of memory-mapped buffers in the ring
    pub buffers: u32,
    /// Frames discarded before a still capture to flush stale buffers
    pub warmup_frames: u32,
    /// Bound on waiting for one buffer to become ready, milliseconds
    pub frame_timeout_ms: u64,
}

/// Acquisition loop failure handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Consecutive protocol errors tolerated before a reopen is attempted
    pub protocol_error_threshold: u32,
    /// Reopen attempts before the loop gives up
    pub reopen_attempts: u32,
    /// Backoff before the first reopen attempt, milliseconds (doubles per attempt)
    pub reopen_backoff_base_ms: u64,
    /// Backoff ceiling, milliseconds
    pub reopen_backoff_max_ms: u64,
}

/// Phase reporting cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSettings {
    pub poll_interval_ms: u64,
}

/// Opaque property list attached to one exposed operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructionSettings {
    #[serde(default)]
    pub protocol_property_list: HashMap<String, String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            name: "edge-camera".to_string(),
            namespace: "devices".to_string(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Serial,
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud: 115200,
            response_timeout_ms: 1000,
            frame_timeout_ms: 2000,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

impl Default for V4l2Settings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            fourcc: "MJPG".to_string(),
            buffers: 4,
            warmup_frames: 2,
            frame_timeout_ms: 2000,
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            protocol_error_threshold: 3,
            reopen_attempts: 3,
            reopen_backoff_base_ms: 100,
            reopen_backoff_max_ms: 2000,
        }
    }
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            device: DeviceSettings::default(),
            transport: TransportSettings::default(),
            serial: SerialSettings::default(),
            v4l2: V4l2Settings::default(),
            acquisition: AcquisitionSettings::default(),
            phase: PhaseSettings::default(),
            instructions: HashMap::new(),
        }
    }
}

impl SerialSettings {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl V4l2Settings {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl PhaseSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AdapterConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AdapterError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| AdapterError::Internal(format!("Failed to read config file: {}", e)))?;

        let config: AdapterConfig = toml::from_str(&contents)
            .map_err(|e| AdapterError::Internal(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AdapterError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AdapterError::Internal(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| AdapterError::Internal(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| AdapterError::Internal(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("camlink.toml")
    }

    /// Load from default location, environment applied on top
    pub fn load_or_default() -> Self {
        let mut config = Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    /// Apply the deployment environment variables the device drivers use.
    ///
    /// Unparseable values are logged and skipped, never fatal.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("EDGEDEVICE_NAME") {
            self.device.name = name;
        }
        if let Ok(namespace) = std::env::var("EDGEDEVICE_NAMESPACE") {
            self.device.namespace = namespace;
        }
        if let Ok(kind) = std::env::var("TRANSPORT_KIND") {
            match kind.to_ascii_lowercase().as_str() {
                "serial" => self.transport.kind = TransportKind::Serial,
                "v4l2" => self.transport.kind = TransportKind::V4l2,
                other => log::warn!("Ignoring unknown TRANSPORT_KIND {:?}", other),
            }
        }
        if let Ok(path) = std::env::var("UART_PATH") {
            self.serial.path = path;
        }
        if let Ok(baud) = std::env::var("UART_BAUDRATE") {
            match baud.parse() {
                Ok(baud) => self.serial.baud = baud,
                Err(_) => log::warn!("Ignoring unparseable UART_BAUDRATE {:?}", baud),
            }
        }
        if let Ok(device) = std::env::var("CAMERA_DEVICE") {
            self.v4l2.device = device;
        }
        for (var, slot) in [
            ("CAMERA_WIDTH", &mut self.v4l2.width),
            ("CAMERA_HEIGHT", &mut self.v4l2.height),
            ("CAMERA_FPS", &mut self.v4l2.fps),
        ] {
            if let Ok(value) = std::env::var(var) {
                match value.parse() {
                    Ok(value) => *slot = value,
                    Err(_) => log::warn!("Ignoring unparseable {} {:?}", var, value),
                }
            }
        }
    }

    /// Read bound for one frame on the configured transport.
    pub fn frame_timeout(&self) -> Duration {
        match self.transport.kind {
            TransportKind::Serial => self.serial.frame_timeout(),
            TransportKind::V4l2 => self.v4l2.frame_timeout(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.device.name.is_empty() {
            return Err("Device name must not be empty".to_string());
        }

        if self.serial.baud == 0 {
            return Err("Serial baud rate must be non-zero".to_string());
        }
        if self.serial.max_frame_bytes == 0 {
            return Err("Serial max frame size must be non-zero".to_string());
        }
        if self.serial.response_timeout_ms == 0 || self.serial.frame_timeout_ms == 0 {
            return Err("Serial timeouts must be non-zero".to_string());
        }

        if self.v4l2.width == 0 || self.v4l2.height == 0 {
            return Err("Invalid capture resolution".to_string());
        }
        if self.v4l2.fps == 0 || self.v4l2.fps > 240 {
            return Err("Invalid FPS (must be 1-240)".to_string());
        }
        if self.v4l2.fourcc.len() != 4 {
            return Err("FourCC must be exactly four characters".to_string());
        }
        if self.v4l2.buffers == 0 || self.v4l2.buffers > 32 {
            return Err("Buffer count must be between 1 and 32".to_string());
        }

        if self.acquisition.protocol_error_threshold == 0 {
            return Err("Protocol error threshold must be at least 1".to_string());
        }
        if self.acquisition.reopen_backoff_base_ms > self.acquisition.reopen_backoff_max_ms {
            return Err("Reopen backoff base must not exceed the ceiling".to_string());
        }

        if self.phase.poll_interval_ms == 0 {
            return Err("Phase poll interval must be non-zero".to_string());
        }

        Ok(())
    }
}
