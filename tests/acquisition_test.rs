//! Acquisition loop behavior under scripted fault sequences.
//!
//! Run with: cargo test --test acquisition_test

use camlink::acquisition::AcquisitionLoop;
use camlink::config::AcquisitionSettings;
use camlink::testing::{synthetic_jpeg_frame, ScriptHandle, ScriptedBackend, ScriptedRead};
use camlink::{compute_phase, DevicePhase, DistributionSet, FrameStore, Transport, TransportError};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Harness {
    acquisition: AcquisitionLoop,
    handle: ScriptHandle,
    transport: Arc<Transport>,
    store: Arc<FrameStore>,
    consumers: Arc<DistributionSet>,
}

fn harness(settings: AcquisitionSettings) -> Harness {
    let backend = ScriptedBackend::new();
    let handle = backend.handle();
    let transport = Arc::new(Transport::new(Box::new(backend)));
    let store = Arc::new(FrameStore::new());
    let consumers = Arc::new(DistributionSet::new());
    let acquisition = AcquisitionLoop::new(
        Arc::clone(&transport),
        Arc::clone(&store),
        Arc::clone(&consumers),
        settings,
    );
    Harness {
        acquisition,
        handle,
        transport,
        store,
        consumers,
    }
}

fn fast_settings() -> AcquisitionSettings {
    AcquisitionSettings {
        protocol_error_threshold: 3,
        reopen_attempts: 2,
        reopen_backoff_base_ms: 5,
        reopen_backoff_max_ms: 10,
    }
}

/// Poll until `cond` holds or the deadline passes.
fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn frames_flow_to_store_and_consumers() {
    let h = harness(fast_settings());
    for n in 0..3u64 {
        h.handle.push_frame(synthetic_jpeg_frame(n, 32));
    }
    let (_, mut rx) = h.consumers.attach();

    h.transport.open().unwrap();
    h.acquisition.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        h.acquisition.frames_published() >= 3
    }));
    h.acquisition.stop();

    let (latest, seq) = h.store.latest().unwrap();
    assert_eq!(seq, 3);
    assert_eq!(latest.data.as_ref(), synthetic_jpeg_frame(2, 32).as_slice());

    // The consumer saw a strictly increasing subset of the sequence.
    let mut seen = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        seen.push(frame.seq);
    }
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "{seen:?}");
}

#[test]
fn timeouts_are_tolerated_without_recovery() {
    let h = harness(fast_settings());
    h.handle.push_read(ScriptedRead::Timeout);
    h.handle.push_read(ScriptedRead::Timeout);
    h.handle.push_read(ScriptedRead::Timeout);
    h.handle.push_frame(synthetic_jpeg_frame(0, 16));

    h.transport.open().unwrap();
    h.acquisition.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        h.acquisition.frames_published() >= 1
    }));
    h.acquisition.stop();

    assert!(h.acquisition.timeouts() >= 3);
    assert_eq!(h.acquisition.reopens(), 0);
    assert_eq!(h.handle.opens(), 1);
    // Quiet spells never push the device out of Running.
    assert_eq!(compute_phase(h.transport.health()), DevicePhase::Running);
}

#[test]
fn repeated_protocol_errors_reopen_and_restart_numbering() {
    let h = harness(fast_settings());
    h.handle.push_frame(synthetic_jpeg_frame(0, 16));
    for _ in 0..3 {
        h.handle
            .push_read(ScriptedRead::Protocol("bad length prefix".into()));
    }
    h.handle.push_frame(synthetic_jpeg_frame(1, 16));

    h.transport.open().unwrap();
    h.acquisition.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        h.acquisition.frames_published() >= 2
    }));
    h.acquisition.stop();

    assert_eq!(h.acquisition.protocol_errors(), 3);
    assert_eq!(h.acquisition.reopens(), 1);
    assert_eq!(h.handle.opens(), 2);

    // The post-reopen frame starts a fresh sequence.
    let (latest, seq) = h.store.latest().unwrap();
    assert_eq!(seq, 1);
    assert_eq!(latest.data.as_ref(), synthetic_jpeg_frame(1, 16).as_slice());
}

#[test]
fn a_single_protocol_error_does_not_reopen() {
    let h = harness(fast_settings());
    h.handle
        .push_read(ScriptedRead::Protocol("one-off glitch".into()));
    h.handle.push_frame(synthetic_jpeg_frame(0, 16));
    h.handle
        .push_read(ScriptedRead::Protocol("another glitch".into()));
    h.handle.push_frame(synthetic_jpeg_frame(1, 16));

    h.transport.open().unwrap();
    h.acquisition.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        h.acquisition.frames_published() >= 2
    }));
    h.acquisition.stop();

    // Interleaved successes keep resetting the consecutive count.
    assert_eq!(h.acquisition.protocol_errors(), 2);
    assert_eq!(h.acquisition.reopens(), 0);
    assert_eq!(h.store.last_seq(), 2);
}

#[test]
fn exhausted_reopen_marks_the_transport_failed_and_parks_the_loop() {
    let h = harness(fast_settings());
    h.handle
        .push_read(ScriptedRead::Unavailable("cable pulled".into()));
    h.handle
        .fail_next_open(TransportError::DeviceUnavailable("still gone".into()));
    h.handle
        .fail_next_open(TransportError::DeviceUnavailable("still gone".into()));

    h.transport.open().unwrap();
    h.acquisition.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        !h.acquisition.is_streaming()
    }));

    // One initial open plus two failed reopen attempts.
    assert_eq!(h.handle.opens(), 3);
    assert_eq!(h.acquisition.reopens(), 0);

    let health = h.transport.health();
    assert!(health.faulted);
    assert_eq!(compute_phase(health), DevicePhase::Failed);

    // The recorded fault answers later calls.
    assert!(matches!(
        h.transport.capture_still().unwrap_err(),
        TransportError::DeviceUnavailable(_)
    ));
    h.acquisition.stop();
}

#[test]
fn stop_interrupts_reopen_backoff_without_marking_a_fault() {
    let h = harness(AcquisitionSettings {
        protocol_error_threshold: 3,
        reopen_attempts: 3,
        reopen_backoff_base_ms: 500,
        reopen_backoff_max_ms: 2000,
    });
    h.handle
        .push_read(ScriptedRead::Unavailable("transient".into()));

    h.transport.open().unwrap();
    h.acquisition.start().unwrap();
    // Let the loop hit the loss and enter backoff.
    std::thread::sleep(Duration::from_millis(50));

    let begun = Instant::now();
    h.acquisition.stop();
    assert!(begun.elapsed() < Duration::from_secs(1));
    assert!(!h.acquisition.is_streaming());
    // Stopping mid-recovery is not a device fault.
    assert!(!h.transport.health().faulted);
}

#[test]
fn consumers_survive_a_reopen() {
    let h = harness(fast_settings());
    h.handle.push_frame(synthetic_jpeg_frame(0, 16));
    h.handle
        .push_read(ScriptedRead::Unavailable("hiccup".into()));
    // Space the post-reopen frame out so the drain below keeps pace.
    for _ in 0..10 {
        h.handle.push_read(ScriptedRead::Timeout);
    }
    h.handle.push_frame(synthetic_jpeg_frame(7, 16));

    let (_, mut rx) = h.consumers.attach();
    h.transport.open().unwrap();
    h.acquisition.start().unwrap();

    // Drain as frames arrive so the bounded slot never blocks the second one.
    let mut seen = Vec::new();
    assert!(wait_until(Duration::from_secs(2), || {
        while let Ok(frame) = rx.try_recv() {
            seen.push(frame.data.to_vec());
        }
        seen.len() >= 2
    }));
    h.acquisition.stop();

    assert_eq!(h.acquisition.reopens(), 1);
    assert_eq!(h.consumers.len(), 1);
    assert_eq!(seen[0], synthetic_jpeg_frame(0, 16));
    assert_eq!(seen[1], synthetic_jpeg_frame(7, 16));
}
