use std::fs;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tempfile::{TempDir, tempdir};

use super::*;
use crate::generator::{ByteSource, SpecializationTable};
use crate::transport::sim::SendKind;
use crate::transport::{SimService, SimTransport};

struct Harness {
    _dir: TempDir,
    sim: Arc<SimTransport>,
    namespace: PathBuf,
    crashes: PathBuf,
    logs: PathBuf,
}

impl Harness {
    fn new(services: Vec<(&str, SimService)>) -> Self {
        let dir = tempdir().unwrap();
        let namespace = dir.path().join("ns");
        let crashes = dir.path().join("crashes");
        let logs = dir.path().join("logs");
        fs::create_dir_all(&logs).unwrap();
        let sim = Arc::new(SimTransport::new(&namespace).unwrap());
        for (name, service) in services {
            sim.register(name, service).unwrap();
        }
        Self {
            _dir: dir,
            sim,
            namespace,
            crashes,
            logs,
        }
    }

    fn engine(&self, options: EngineOptions) -> Engine<SimTransport, StdRng> {
        self.engine_with(LivenessMonitor::namespace(&self.namespace), options)
    }

    fn engine_with(
        &self,
        monitor: LivenessMonitor,
        options: EngineOptions,
    ) -> Engine<SimTransport, StdRng> {
        let names = crate::registry::discover(&self.namespace).unwrap();
        let registry = EndpointRegistry::open_all(&*self.sim, &self.namespace, names);
        Engine::new(
            Arc::clone(&self.sim),
            registry,
            MessageGenerator::new(SpecializationTable::default(), ByteSource::Seeded),
            monitor,
            CrashStore::open(&self.crashes).unwrap(),
            StdRng::seed_from_u64(0xf022),
            options,
        )
    }
}

#[tokio::test]
async fn healthy_targets_never_produce_artifacts() {
    let harness = Harness::new(vec![
        ("audio", SimService::healthy()),
        ("net", SimService::healthy()),
    ]);
    let mut engine = harness.engine(EngineOptions::default());
    for _ in 0..1000 {
        let step = engine.step().await.unwrap();
        assert!(matches!(step, Step::Continue(_)), "unexpected {step:?}");
    }
    assert_eq!(engine.iterations(), 1000);
    assert!(engine.store().artifacts().unwrap().is_empty());
    assert_eq!(harness.sim.sent_count(), 1000);
}

#[tokio::test]
async fn crash_persists_exact_payload_and_stops() {
    let harness = Harness::new(vec![
        ("audio", SimService::healthy()),
        ("fragile", SimService::crash_when(|p| p.len() == 4096)),
        ("net", SimService::healthy()),
    ]);
    let mut engine = harness.engine(EngineOptions {
        max_iterations: Some(100_000),
        ..EngineOptions::default()
    });

    let RunEnd::Crashed(report) = engine.run().await.unwrap() else {
        panic!("expected a crash");
    };
    assert_eq!(report.endpoint, "fragile");
    assert_eq!(report.size, 4096);
    assert!(report.core.is_none());

    let sent = harness.sim.sent();
    let last = sent.last().unwrap();
    assert_eq!(last.endpoint, "fragile");
    assert_eq!(last.payload.len(), 4096);
    assert_eq!(fs::read(&report.artifact).unwrap(), last.payload);
    assert_eq!(report.artifact, engine.store().artifact_path(report.id));

    assert!(engine.registry().get("fragile").is_none());
    assert_eq!(engine.registry().len(), 2);
    assert_eq!(harness.sim.sent_count(), sent.len());
}

#[tokio::test]
async fn fixed_target_is_the_only_target() {
    let harness = Harness::new(vec![
        ("audio", SimService::healthy()),
        ("phone-service", SimService::healthy()),
    ]);
    let mut engine = harness.engine(EngineOptions {
        target: Some("phone-service".to_string()),
        ..EngineOptions::default()
    });
    for _ in 0..50 {
        let Step::Continue(iteration) = engine.step().await.unwrap() else {
            panic!("expected continue");
        };
        assert_eq!(iteration.target, "phone-service");
        assert_eq!(iteration.size, 28);
    }
    assert!(
        harness
            .sim
            .sent()
            .iter()
            .all(|sent| sent.endpoint == "phone-service")
    );
}

#[tokio::test]
async fn missing_fixed_target_is_an_error() {
    let harness = Harness::new(vec![("audio", SimService::healthy())]);
    let mut engine = harness.engine(EngineOptions {
        target: Some("ghost".to_string()),
        ..EngineOptions::default()
    });
    let err = engine.step().await.unwrap_err();
    assert!(err.to_string().contains("no longer in rotation"));
}

#[tokio::test]
async fn send_failure_is_not_fatal() {
    let harness = Harness::new(vec![("audio", SimService::healthy())]);
    let mut engine = harness.engine(EngineOptions::default());
    let coid = engine.registry().get("audio").unwrap().coid;
    harness.sim.close(coid).unwrap();

    for _ in 0..5 {
        let step = engine.step().await.unwrap();
        assert!(matches!(step, Step::Continue(_)), "unexpected {step:?}");
    }
}

#[tokio::test]
async fn core_file_strategy_adopts_the_core() {
    let harness = Harness::new(vec![("audio", SimService::healthy())]);
    let monitor = LivenessMonitor::core_file(&harness.logs, Duration::ZERO);
    let mut engine = harness.engine_with(monitor, EngineOptions::default());

    assert!(matches!(engine.step().await.unwrap(), Step::Continue(_)));

    fs::write(harness.logs.join("audio.core"), b"dump").unwrap();
    let Step::Crashed(report) = engine.step().await.unwrap() else {
        panic!("expected a crash");
    };
    let core = report.core.expect("core adopted");
    assert_eq!(
        core,
        harness.crashes.join(format!("audio.core{}", report.id))
    );
    assert!(!harness.logs.join("audio.core").exists());
    assert!(report.artifact.exists());
}

#[tokio::test]
async fn bounded_wait_turns_stall_into_hang() {
    let harness = Harness::new(vec![("slow", SimService::stall(Duration::from_millis(300)))]);
    let mut engine = harness.engine(EngineOptions {
        send_timeout: Some(Duration::from_millis(20)),
        ..EngineOptions::default()
    });

    let RunEnd::Hung(report) = engine.run().await.unwrap() else {
        panic!("expected a hang");
    };
    assert_eq!(report.endpoint, "slow");
    assert!(report.artifact.exists());
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn hang_in_random_mode_keeps_fuzzing_the_rest() {
    let harness = Harness::new(vec![
        ("slow", SimService::stall(Duration::from_millis(200))),
        ("audio", SimService::healthy()),
    ]);
    let mut engine = harness.engine(EngineOptions {
        send_timeout: Some(Duration::from_millis(20)),
        max_iterations: Some(40),
        ..EngineOptions::default()
    });

    assert_eq!(engine.run().await.unwrap(), RunEnd::IterationLimit(40));
    assert!(engine.registry().get("slow").is_none());
    assert_eq!(engine.store().artifacts().unwrap().len(), 1);
}

#[tokio::test]
async fn async_delivery_ends_the_run() {
    let harness = Harness::new(vec![("audio", SimService::healthy())]);
    let mut engine = harness.engine(EngineOptions {
        send_mode: SendMode::Async,
        ..EngineOptions::default()
    });
    let end = engine.run().await.unwrap();
    assert!(matches!(end, RunEnd::Delivered { ref endpoint, .. } if endpoint == "audio"));
    assert_eq!(harness.sim.sent()[0].kind, SendKind::Async);
}

#[tokio::test]
async fn pulse_codes_stay_in_range() {
    let harness = Harness::new(vec![("audio", SimService::healthy())]);
    let mut engine = harness.engine(EngineOptions {
        send_mode: SendMode::Pulse,
        ..EngineOptions::default()
    });
    assert!(matches!(
        engine.step().await.unwrap(),
        Step::Delivered { .. }
    ));
    let SendKind::Pulse { code, value } = harness.sim.sent()[0].kind else {
        panic!("expected a pulse");
    };
    assert!((0..=127).contains(&code));
    assert!((0..=127).contains(&value));
}

#[tokio::test]
async fn iteration_limit_and_cancel_stop_the_loop() {
    let harness = Harness::new(vec![("audio", SimService::healthy())]);
    let mut engine = harness.engine(EngineOptions {
        max_iterations: Some(25),
        ..EngineOptions::default()
    });
    assert_eq!(engine.run().await.unwrap(), RunEnd::IterationLimit(25));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut engine = harness.engine(EngineOptions {
        cancel: Some(cancel),
        ..EngineOptions::default()
    });
    assert_eq!(engine.run().await.unwrap(), RunEnd::Cancelled(0));
}

#[tokio::test]
async fn pulse_crash_records_the_pulse_not_a_payload() {
    let harness = Harness::new(vec![("audio", SimService::healthy())]);
    let mut engine = harness.engine(EngineOptions {
        send_mode: SendMode::Pulse,
        ..EngineOptions::default()
    });
    harness.sim.kill("audio").unwrap();

    let Step::Crashed(report) = engine.step().await.unwrap() else {
        panic!("expected a crash");
    };
    let sent = harness.sim.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].payload.is_empty());
    let SendKind::Pulse { code, value } = sent[0].kind else {
        panic!("expected a pulse");
    };

    let saved = fs::read(&report.artifact).unwrap();
    assert_eq!(saved, pulse_bytes(code, value));
    assert_eq!(saved.len(), 5);
    assert_eq!(report.size, 5);
}

#[tokio::test]
async fn hang_with_core_file_liveness_ends_the_run() {
    let harness = Harness::new(vec![
        ("slow", SimService::stall(Duration::from_millis(300))),
        ("audio", SimService::healthy()),
    ]);
    let monitor = LivenessMonitor::core_file(&harness.logs, Duration::ZERO);
    let mut engine = harness.engine_with(
        monitor,
        EngineOptions {
            send_timeout: Some(Duration::from_millis(20)),
            max_iterations: Some(1000),
            ..EngineOptions::default()
        },
    );

    let RunEnd::Hung(report) = engine.run().await.unwrap() else {
        panic!("expected the run to stop at the hang");
    };
    assert_eq!(report.endpoint, "slow");
    assert_eq!(harness.sim.sent().last().unwrap().endpoint, "slow");

    // The hung process dumps core after the loop stopped; nothing claims it.
    fs::write(harness.logs.join("slow.core"), b"late").unwrap();
    let sent_before = harness.sim.sent_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.sim.sent_count(), sent_before);
    assert!(harness.logs.join("slow.core").exists());
    assert!(engine.registry().get("audio").is_some());
    assert_eq!(engine.store().artifacts().unwrap().len(), 1);
}
