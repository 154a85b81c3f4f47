use tempfile::tempdir;

use super::*;

#[tokio::test]
async fn namespace_entry_present_is_ok() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("audio"), b"").unwrap();
    let monitor = LivenessMonitor::namespace(dir.path());
    assert_eq!(monitor.observe("audio").await, Outcome::Ok);
}

#[tokio::test]
async fn namespace_entry_gone_is_crash() {
    let dir = tempdir().unwrap();
    let monitor = LivenessMonitor::namespace(dir.path());
    assert_eq!(
        monitor.observe("audio").await,
        Outcome::Crashed { core: None }
    );
}

#[tokio::test]
async fn core_file_is_reported() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("boot.log"), b"noise").unwrap();
    fs::write(dir.path().join("audio.core"), b"core").unwrap();
    let monitor = LivenessMonitor::core_file(dir.path(), Duration::ZERO);
    assert_eq!(
        monitor.observe("audio").await,
        Outcome::Crashed {
            core: Some(dir.path().join("audio.core"))
        }
    );
}

#[tokio::test]
async fn no_core_file_is_ok() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("boot.log"), b"noise").unwrap();
    let monitor = LivenessMonitor::core_file(dir.path(), Duration::ZERO);
    assert_eq!(monitor.observe("audio").await, Outcome::Ok);
}

#[tokio::test]
async fn unreadable_core_dir_is_not_a_crash() {
    let dir = tempdir().unwrap();
    let monitor = LivenessMonitor::core_file(dir.path().join("missing"), Duration::ZERO);
    assert_eq!(monitor.observe("audio").await, Outcome::Ok);
}

#[tokio::test(start_paused = true)]
async fn settle_window_catches_late_core() {
    let dir = tempdir().unwrap();
    let monitor = CoreFileMonitor::new(dir.path(), Duration::from_secs(1));
    let core = dir.path().join("late.core");
    let writer = {
        let core = core.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            fs::write(core, b"core").unwrap();
        })
    };
    assert_eq!(monitor.wait_for_core().await, Some(core));
    writer.await.unwrap();
}

#[test]
fn purge_removes_only_cores() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.core"), b"").unwrap();
    fs::write(dir.path().join("b.core"), b"").unwrap();
    fs::write(dir.path().join("slog.txt"), b"").unwrap();
    let monitor = CoreFileMonitor::new(dir.path(), Duration::ZERO);

    assert_eq!(monitor.purge_stale().unwrap(), 2);
    assert!(monitor.scan().unwrap().is_none());
    assert!(dir.path().join("slog.txt").exists());
}

#[test]
fn purge_of_missing_dir_is_noop() {
    let dir = tempdir().unwrap();
    let monitor = CoreFileMonitor::new(dir.path().join("missing"), Duration::ZERO);
    assert_eq!(monitor.purge_stale().unwrap(), 0);
}
