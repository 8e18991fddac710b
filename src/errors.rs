use thiserror::Error;

/// Failures raised by a transport backend or the transport state machine.
///
/// `Timeout` and `Protocol` are transient classes the acquisition loop
/// tolerates or retries; `DeviceUnavailable` means the handle is gone and
/// stays the answer until a reopen succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("configuration rejected: {0}")]
    ConfigRejected(String),
    #[error("timed out waiting for the device")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport is not open")]
    NotOpen,
    #[error("transport is already open")]
    AlreadyOpen,
}

impl TransportError {
    /// True for errors the streaming loop may see on a healthy link.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Protocol(_))
    }
}

/// Failures surfaced by the adapter facade to its callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("streaming is not active")]
    StreamInactive,
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display() {
        let err = TransportError::DeviceUnavailable("/dev/ttyUSB0 missing".to_string());
        assert!(err.to_string().contains("device unavailable"));
        assert!(err.to_string().contains("/dev/ttyUSB0"));

        let err = TransportError::Protocol("declared length 0".to_string());
        assert!(err.to_string().contains("protocol error"));
    }

    #[test]
    fn transient_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Protocol("bad length".into()).is_transient());
        assert!(!TransportError::NotOpen.is_transient());
        assert!(!TransportError::DeviceUnavailable("gone".into()).is_transient());
    }

    #[test]
    fn adapter_error_wraps_transport() {
        let err: AdapterError = TransportError::Timeout.into();
        assert_eq!(err, AdapterError::Transport(TransportError::Timeout));
        assert_eq!(err.to_string(), "timed out waiting for the device");
    }
}
