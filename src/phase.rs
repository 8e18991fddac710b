//! Device phase tracking and edge-triggered reporting.
//!
//! The externally visible phase is a pure function of transport health,
//! recomputed every poll tick. Only transitions are pushed to the
//! [`PhaseSink`]; a report that fails leaves the last-reported value
//! untouched so the next tick retries the same transition instead of
//! silently dropping it.

use crate::transport::{Transport, TransportHealth};
use crate::types::DevicePhase;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failure delivering one phase report to the control plane.
#[derive(Debug, Clone, Error)]
#[error("phase report failed: {0}")]
pub struct PhaseReportError(pub String);

/// Destination for phase transitions.
pub trait PhaseSink: Send + Sync {
    fn report_phase(&self, phase: DevicePhase) -> Result<(), PhaseReportError>;
}

/// Sink that just logs transitions, for deployments without a control plane.
pub struct LogPhaseSink;

impl PhaseSink for LogPhaseSink {
    fn report_phase(&self, phase: DevicePhase) -> Result<(), PhaseReportError> {
        log::info!("device phase is now {}", phase);
        Ok(())
    }
}

/// JSON body of a control-plane status patch for the given phase.
pub fn phase_patch_body(phase: DevicePhase) -> String {
    serde_json::json!({ "status": { "edgeDevicePhase": phase.as_str() } }).to_string()
}

/// Map transport health to the externally visible phase.
///
/// `Running` means the transport is open, whether or not frames are being
/// streamed right now; stream liveness is reported separately.
pub fn compute_phase(health: TransportHealth) -> DevicePhase {
    if !health.open_attempted {
        DevicePhase::Unknown
    } else if health.faulted {
        DevicePhase::Failed
    } else if health.state.is_open() {
        DevicePhase::Running
    } else {
        DevicePhase::Pending
    }
}

struct MonitorShared {
    transport: Arc<Transport>,
    sink: Arc<dyn PhaseSink>,
    interval: Duration,
    stop: AtomicBool,
    last_reported: Mutex<Option<DevicePhase>>,
    last_transition: Mutex<Option<DateTime<Utc>>>,
    reports: AtomicU64,
}

/// Periodic phase evaluator.
pub struct PhaseMonitor {
    shared: Arc<MonitorShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PhaseMonitor {
    pub fn new(transport: Arc<Transport>, sink: Arc<dyn PhaseSink>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                transport,
                sink,
                interval,
                stop: AtomicBool::new(false),
                last_reported: Mutex::new(None),
                last_transition: Mutex::new(None),
                reports: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the polling thread. Calling while running is a no-op.
    pub fn start(&self) -> Result<(), std::io::Error> {
        let mut worker = self.worker.lock().expect("lock poisoned");
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                log::debug!("phase monitor already running");
                return Ok(());
            }
        }
        self.shared.stop.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("camlink-phase".to_string())
            .spawn(move || run(shared))?;
        *worker = Some(handle);
        log::info!("phase monitor started");
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            let grace = Instant::now() + Duration::from_secs(1);
            while !handle.is_finished() && Instant::now() < grace {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                if let Err(e) = handle.join() {
                    log::warn!("phase monitor thread panicked: {:?}", e);
                }
            } else {
                log::warn!("phase monitor thread did not exit in time, detaching");
            }
        }
    }

    /// Run one evaluation tick immediately, outside the polling cadence.
    pub fn evaluate_once(&self) {
        evaluate(&self.shared);
    }

    /// Current phase as computed from live transport health.
    pub fn current_phase(&self) -> DevicePhase {
        compute_phase(self.shared.transport.health())
    }

    /// Last phase successfully delivered to the sink, if any.
    pub fn last_reported(&self) -> Option<DevicePhase> {
        *self.shared.last_reported.lock().expect("lock poisoned")
    }

    /// When the last successful report happened.
    pub fn last_transition(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_transition.lock().expect("lock poisoned")
    }

    pub fn reports_sent(&self) -> u64 {
        self.shared.reports.load(Ordering::Relaxed)
    }
}

impl Drop for PhaseMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: Arc<MonitorShared>) {
    log::debug!("phase monitor polling every {:?}", shared.interval);
    while !shared.stop.load(Ordering::SeqCst) {
        evaluate(&shared);
        let deadline = Instant::now() + shared.interval;
        loop {
            if shared.stop.load(Ordering::SeqCst) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }
}

fn evaluate(shared: &MonitorShared) {
    let phase = compute_phase(shared.transport.health());
    let mut last = shared.last_reported.lock().expect("lock poisoned");
    if *last == Some(phase) {
        return;
    }
    log::info!(
        "device phase {} -> {}",
        last.map(|p| p.as_str()).unwrap_or("unreported"),
        phase
    );
    match shared.sink.report_phase(phase) {
        Ok(()) => {
            *last = Some(phase);
            *shared.last_transition.lock().expect("lock poisoned") = Some(Utc::now());
            shared.reports.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            // Leave last_reported untouched; the next tick retries.
            log::warn!("{}, will retry", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use crate::transport::TransportState;

    struct RecordingSink {
        seen: Mutex<Vec<DevicePhase>>,
        fail_next: AtomicBool,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_next: AtomicBool::new(false),
            }
        }
    }

    impl PhaseSink for RecordingSink {
        fn report_phase(&self, phase: DevicePhase) -> Result<(), PhaseReportError> {
            self.seen.lock().unwrap().push(phase);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(PhaseReportError("control plane unreachable".into()));
            }
            Ok(())
        }
    }

    fn health(state: TransportState, open_attempted: bool, faulted: bool) -> TransportHealth {
        TransportHealth {
            state,
            open_attempted,
            faulted,
        }
    }

    #[test]
    fn phase_follows_transport_health() {
        assert_eq!(
            compute_phase(health(TransportState::Closed, false, false)),
            DevicePhase::Unknown
        );
        assert_eq!(
            compute_phase(health(TransportState::Closed, true, false)),
            DevicePhase::Pending
        );
        assert_eq!(
            compute_phase(health(TransportState::OpenIdle, true, false)),
            DevicePhase::Running
        );
        assert_eq!(
            compute_phase(health(TransportState::OpenCapturing, true, false)),
            DevicePhase::Running
        );
        assert_eq!(
            compute_phase(health(TransportState::Closed, true, true)),
            DevicePhase::Failed
        );
    }

    #[test]
    fn patch_body_matches_control_plane_contract() {
        assert_eq!(
            phase_patch_body(DevicePhase::Running),
            r#"{"status":{"edgeDevicePhase":"Running"}}"#
        );
    }

    #[test]
    fn only_transitions_are_reported() {
        let transport = Arc::new(Transport::new(Box::new(ScriptedBackend::new())));
        let sink = Arc::new(RecordingSink::new());
        let monitor = PhaseMonitor::new(
            Arc::clone(&transport),
            Arc::clone(&sink) as Arc<dyn PhaseSink>,
            Duration::from_millis(10),
        );

        monitor.evaluate_once();
        monitor.evaluate_once();
        monitor.evaluate_once();
        assert_eq!(sink.seen.lock().unwrap().as_slice(), &[DevicePhase::Unknown]);

        transport.open().unwrap();
        monitor.evaluate_once();
        monitor.evaluate_once();
        assert_eq!(
            sink.seen.lock().unwrap().as_slice(),
            &[DevicePhase::Unknown, DevicePhase::Running]
        );
        assert_eq!(monitor.reports_sent(), 2);
        assert!(monitor.last_transition().is_some());
    }

    #[test]
    fn failed_report_retries_next_tick() {
        let transport = Arc::new(Transport::new(Box::new(ScriptedBackend::new())));
        let sink = Arc::new(RecordingSink::new());
        let monitor = PhaseMonitor::new(
            Arc::clone(&transport),
            Arc::clone(&sink) as Arc<dyn PhaseSink>,
            Duration::from_millis(10),
        );

        sink.fail_next.store(true, Ordering::SeqCst);
        monitor.evaluate_once();
        assert_eq!(monitor.last_reported(), None);

        monitor.evaluate_once();
        assert_eq!(monitor.last_reported(), Some(DevicePhase::Unknown));
        // Two attempts hit the sink, one succeeded.
        assert_eq!(sink.seen.lock().unwrap().len(), 2);
        assert_eq!(monitor.reports_sent(), 1);
    }
}
