use std::sync::Arc;

use tempfile::tempdir;

use super::*;
use crate::transport::{SimService, SimTransport};

#[test]
fn lease_binds_the_name() {
    let dir = tempdir().unwrap();
    let sim = SimTransport::new(dir.path()).unwrap();
    let lease = QuarantineLease::acquire(&sim, "audio").unwrap();
    assert_eq!(lease.name(), "audio");
    assert!(dir.path().join("audio").exists());
}

#[test]
fn second_lease_for_same_name_is_refused() {
    let dir = tempdir().unwrap();
    let sim = SimTransport::new(dir.path()).unwrap();
    let _lease = QuarantineLease::acquire(&sim, "audio").unwrap();
    assert!(QuarantineLease::acquire(&sim, "audio").is_err());
}

#[test]
fn squat_on_live_name_returns_error() {
    let dir = tempdir().unwrap();
    let sim = SimTransport::new(dir.path()).unwrap();
    sim.register("audio", SimService::healthy()).unwrap();
    let err = squat(&sim, "audio").unwrap_err();
    assert!(matches!(err, TransportError::Attach { .. }));
}

#[test]
fn squatter_absorbs_messages_and_pulses_without_returning() {
    let dir = tempdir().unwrap();
    let sim = Arc::new(SimTransport::new(dir.path()).unwrap());
    let lease = QuarantineLease::acquire(&*sim, "audio").unwrap();
    let handle = spawn_squatter(lease).unwrap();

    let coid = sim.open("audio").unwrap();
    for i in 0..250usize {
        let payload = vec![i as u8; i % 300];
        sim.send_sync(coid, &payload).unwrap();
    }
    assert_eq!(sim.absorbed("audio"), 250);

    sim.send_pulse(coid, 5, 9).unwrap();
    while sim.absorbed("audio") < 251 {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!handle.is_finished(), "squatter must never return");
}
