use rand::SeedableRng;
use rand::rngs::StdRng;
use tempfile::tempdir;

use super::*;

#[test]
fn open_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crashes");
    CrashStore::open(&path).unwrap();
    CrashStore::open(&path).unwrap();
    assert!(path.is_dir());
}

#[test]
fn persist_round_trips_bytes() {
    let dir = tempdir().unwrap();
    let store = CrashStore::open(dir.path()).unwrap();
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let id = IterationId::new(123_456);

    let path = store.persist(id, &payload).unwrap();
    assert_eq!(path, dir.path().join("123456.bin"));
    assert_eq!(fs::read(&path).unwrap(), payload);
}

#[test]
fn colliding_id_overwrites() {
    let dir = tempdir().unwrap();
    let store = CrashStore::open(dir.path()).unwrap();
    let id = IterationId::new(7);
    store.persist(id, b"first").unwrap();
    store.persist(id, b"second").unwrap();
    assert_eq!(fs::read(store.artifact_path(id)).unwrap(), b"second");
    assert_eq!(store.artifacts().unwrap().len(), 1);
}

#[test]
fn empty_payload_is_persisted() {
    let dir = tempdir().unwrap();
    let store = CrashStore::open(dir.path()).unwrap();
    let path = store.persist(IterationId::new(1), &[]).unwrap();
    assert_eq!(fs::read(path).unwrap(), Vec::<u8>::new());
}

#[test]
fn adopt_core_moves_file_next_to_input() {
    let logs = tempdir().unwrap();
    let out = tempdir().unwrap();
    let core = logs.path().join("audio.core");
    fs::write(&core, b"core image").unwrap();

    let store = CrashStore::open(out.path()).unwrap();
    let adopted = store.adopt_core(&core, IterationId::new(42)).unwrap();

    assert_eq!(adopted, out.path().join("audio.core42"));
    assert!(!core.exists());
    assert_eq!(fs::read(adopted).unwrap(), b"core image");
    assert!(store.artifacts().unwrap().is_empty());
}

#[test]
fn ids_stay_within_24_bits() {
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..1000 {
        assert!(IterationId::random(&mut rng).value() <= MAX_ITERATION_ID);
    }
    assert_eq!(IterationId::new(u32::MAX).value(), MAX_ITERATION_ID);
}
