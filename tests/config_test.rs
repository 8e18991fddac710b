//! Configuration round-trips and environment overrides.
//!
//! Run with: cargo test --test config_test

use camlink::{AdapterConfig, AdapterError, TransportKind};

#[test]
fn round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("camlink.toml");

    let mut config = AdapterConfig::default();
    config.device.name = "bench-camera".to_string();
    config.transport.kind = TransportKind::V4l2;
    config.v4l2.device = "/dev/video3".to_string();
    config.v4l2.width = 1920;
    config.v4l2.height = 1080;
    config.serial.baud = 57600;
    config.acquisition.reopen_attempts = 7;

    config.save_to_file(&path).unwrap();
    let loaded = AdapterConfig::load_from_file(&path).unwrap();

    assert_eq!(loaded.device.name, "bench-camera");
    assert_eq!(loaded.transport.kind, TransportKind::V4l2);
    assert_eq!(loaded.v4l2.device, "/dev/video3");
    assert_eq!(loaded.v4l2.width, 1920);
    assert_eq!(loaded.v4l2.height, 1080);
    assert_eq!(loaded.serial.baud, 57600);
    assert_eq!(loaded.acquisition.reopen_attempts, 7);
    assert!(loaded.validate().is_ok());
}

#[test]
fn garbage_content_is_a_parse_error_not_a_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camlink.toml");
    std::fs::write(&path, "this is { not toml").unwrap();

    let err = AdapterConfig::load_from_file(&path).unwrap_err();
    assert!(matches!(err, AdapterError::Internal(_)));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let config = AdapterConfig::load_from_file(&path).unwrap();
    assert_eq!(config.serial.baud, 115200);
    assert_eq!(config.transport.kind, TransportKind::Serial);
}

// Environment variables are process-wide, so every override scenario lives in
// this one test.
#[test]
fn environment_overrides_apply_on_top() {
    let vars = [
        ("EDGEDEVICE_NAME", "line-3-camera"),
        ("EDGEDEVICE_NAMESPACE", "factory"),
        ("TRANSPORT_KIND", "V4L2"),
        ("UART_PATH", "/dev/ttyAMA0"),
        ("UART_BAUDRATE", "not-a-number"),
        ("CAMERA_DEVICE", "/dev/video9"),
        ("CAMERA_WIDTH", "1280"),
        ("CAMERA_HEIGHT", "720"),
        ("CAMERA_FPS", "15"),
    ];
    for (key, value) in vars {
        std::env::set_var(key, value);
    }

    let mut config = AdapterConfig::default();
    config.apply_env_overrides();

    for (key, _) in vars {
        std::env::remove_var(key);
    }

    assert_eq!(config.device.name, "line-3-camera");
    assert_eq!(config.device.namespace, "factory");
    assert_eq!(config.transport.kind, TransportKind::V4l2);
    assert_eq!(config.serial.path, "/dev/ttyAMA0");
    // The unparseable baud rate is skipped, not fatal.
    assert_eq!(config.serial.baud, 115200);
    assert_eq!(config.v4l2.device, "/dev/video9");
    assert_eq!(config.v4l2.width, 1280);
    assert_eq!(config.v4l2.height, 720);
    assert_eq!(config.v4l2.fps, 15);
    assert!(config.validate().is_ok());
}
