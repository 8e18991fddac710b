//! Phase state machine walks and edge-triggered report delivery.
//!
//! Run with: cargo test --test phase_test

use camlink::testing::ScriptedBackend;
use camlink::{
    phase_patch_body, DevicePhase, PhaseMonitor, PhaseReportError, PhaseSink, Transport,
    TransportError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct RecordingSink {
    seen: Mutex<Vec<DevicePhase>>,
    fail_next: AtomicBool,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        })
    }

    fn seen(&self) -> Vec<DevicePhase> {
        self.seen.lock().unwrap().clone()
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

type Harness = (
    PhaseMonitor,
    Arc<RecordingSink>,
    Arc<Transport>,
    camlink::testing::ScriptHandle,
);

fn monitor_over_scripted() -> Harness {
    let backend = ScriptedBackend::new();
    let handle = backend.handle();
    let transport = Arc::new(Transport::new(Box::new(backend)));
    let sink = RecordingSink::new();
    let monitor = PhaseMonitor::new(
        Arc::clone(&transport),
        Arc::clone(&sink) as Arc<dyn PhaseSink>,
        Duration::from_millis(10),
    );
    (monitor, sink, transport, handle)
}

#[test]
fn full_lifecycle_reports_each_transition_once() {
    let (monitor, sink, transport, handle) = monitor_over_scripted();

    // Never touched: Unknown.
    monitor.evaluate_once();
    monitor.evaluate_once();

    // Open attempted but refused: Pending.
    handle.fail_next_open(TransportError::DeviceUnavailable("absent".into()));
    let _ = transport.open();
    monitor.evaluate_once();
    monitor.evaluate_once();

    // Established: Running.
    transport.open().unwrap();
    monitor.evaluate_once();

    // Established then lost: Failed.
    handle.push_still_error(TransportError::DeviceUnavailable("yanked".into()));
    let _ = transport.capture_still();
    monitor.evaluate_once();
    monitor.evaluate_once();

    // Recovered: Running again.
    transport.open().unwrap();
    monitor.evaluate_once();

    // Gracefully released: Pending, not Failed.
    transport.close();
    monitor.evaluate_once();

    assert_eq!(
        sink.seen(),
        vec![
            DevicePhase::Unknown,
            DevicePhase::Pending,
            DevicePhase::Running,
            DevicePhase::Failed,
            DevicePhase::Running,
            DevicePhase::Pending,
        ]
    );
    assert_eq!(monitor.reports_sent(), 6);
}

#[test]
fn polling_thread_reports_transitions_in_order() {
    let (monitor, sink, transport, _) = monitor_over_scripted();
    monitor.start().unwrap();

    std::thread::sleep(Duration::from_millis(40));
    transport.open().unwrap();
    std::thread::sleep(Duration::from_millis(40));
    monitor.stop();

    let seen = sink.seen();
    assert_eq!(seen.first(), Some(&DevicePhase::Unknown));
    assert_eq!(seen.last(), Some(&DevicePhase::Running));
    // Edge-triggered: no adjacent repeats no matter how many ticks ran.
    assert!(seen.windows(2).all(|w| w[0] != w[1]), "{seen:?}");
}

#[test]
fn a_failed_report_is_retried_with_the_same_phase() {
    let (monitor, sink, _, _) = monitor_over_scripted();

    sink.fail_next.store(true, Ordering::SeqCst);
    monitor.evaluate_once();
    assert_eq!(monitor.last_reported(), None);
    assert_eq!(monitor.reports_sent(), 0);

    monitor.evaluate_once();
    assert_eq!(monitor.last_reported(), Some(DevicePhase::Unknown));
    assert_eq!(sink.seen(), vec![DevicePhase::Unknown, DevicePhase::Unknown]);
    assert_eq!(monitor.reports_sent(), 1);
}

#[test]
fn patch_bodies_follow_the_control_plane_contract() {
    for phase in [
        DevicePhase::Unknown,
        DevicePhase::Pending,
        DevicePhase::Running,
        DevicePhase::Failed,
    ] {
        let body: serde_json::Value =
            serde_json::from_str(&phase_patch_body(phase)).unwrap();
        assert_eq!(body["status"]["edgeDevicePhase"], phase.as_str());
    }
}
