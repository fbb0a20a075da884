//! End-to-end runs against a share tree mounted in a temp directory.

use std::path::{Path, PathBuf};

use sharespeed::config::Config;
use sharespeed::lock::{LockPolicy, RunLock};
use sharespeed::report::csv::HEADER;
use sharespeed::sample::RunMode;

fn config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.run.targets = vec![r"\\fs01\data".to_string()];
    cfg.run.passes = 1;
    cfg.run.payload_size_bytes = 32 * 1024;
    cfg.run.inter_pass_delay_secs = 0;
    cfg.run.source_host = Some("src01".to_string());
    cfg.run.work_dir = dir.join("work");
    cfg.run.share_mount_root = Some(dir.join("mnt"));
    cfg.drain.enabled = false;
    cfg.lock.dir = dir.join("locks");
    cfg.report.dir = dir.join("reports");
    cfg.mail.enabled = false;
    cfg
}

fn make_share(dir: &Path, pool_files: usize) -> PathBuf {
    let pool = dir.join("mnt/fs01/data/SpeedTest/Pool/src01");
    std::fs::create_dir_all(&pool).unwrap();
    for i in 0..pool_files {
        std::fs::write(pool.join(format!("f{i:02}.bin")), vec![7u8; 16 * 1024]).unwrap();
    }
    pool
}

#[tokio::test]
async fn test_run_writes_csv_report_and_releases_lock() {
    let dir = tempfile::TempDir::new().unwrap();
    let pool = make_share(dir.path(), 2);
    let cfg = config(dir.path());

    let outcome = sharespeed::run_measurement(&cfg).await.unwrap();

    assert_eq!(outcome.samples.len(), 2);
    assert!(outcome.samples.iter().all(|s| s.is_ok()));
    assert_eq!(outcome.samples[0].mode, RunMode::Cold);
    assert_eq!(outcome.samples[1].mode, RunMode::Warm);
    assert_eq!(outcome.summary.source_host, "src01");

    let csv = std::fs::read_to_string(&outcome.csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("fs01,") && lines[1].ends_with(",True"));
    assert!(lines[2].ends_with(",False"));

    let report = outcome.report_path.expect("report written");
    assert!(report.starts_with(dir.path().join("reports")));
    assert!(std::fs::read_to_string(report).unwrap().contains("fs01"));

    assert!(!RunLock::marker_path(&cfg.lock.dir, "src01").exists());
    // The warm probe consumed the file the cold probe selected.
    assert_eq!(std::fs::read_dir(pool).unwrap().count(), 1);
}

#[tokio::test]
async fn test_second_run_appends_without_new_header() {
    let dir = tempfile::TempDir::new().unwrap();
    make_share(dir.path(), 4);
    let mut cfg = config(dir.path());
    cfg.report.write_html = false;

    let first = sharespeed::run_measurement(&cfg).await.unwrap();
    let second = sharespeed::run_measurement(&cfg).await.unwrap();

    assert!(second.report_path.is_none());
    assert_eq!(first.csv_path, second.csv_path);
    let csv = std::fs::read_to_string(&second.csv_path).unwrap();
    assert_eq!(csv.lines().count(), 5);
    assert_eq!(csv.lines().filter(|l| *l == HEADER).count(), 1);
}

#[tokio::test]
async fn test_held_lock_aborts_before_any_probe() {
    let dir = tempfile::TempDir::new().unwrap();
    make_share(dir.path(), 2);
    let cfg = config(dir.path());
    let _held = RunLock::acquire(&cfg.lock.dir, "src01").unwrap();

    let err = sharespeed::run_measurement(&cfg).await.unwrap_err();

    assert!(err.to_string().contains("src01"));
    assert!(!cfg.report.dir.join(&cfg.report.csv_file).exists());
    assert!(!cfg.run.work_dir.join("payload-fs01-data.bin").exists());
}

#[tokio::test]
async fn test_held_lock_with_warn_policy_proceeds() {
    let dir = tempfile::TempDir::new().unwrap();
    make_share(dir.path(), 2);
    let mut cfg = config(dir.path());
    cfg.lock.on_contention = LockPolicy::Warn;
    let held = RunLock::acquire(&cfg.lock.dir, "src01").unwrap();

    let outcome = sharespeed::run_measurement(&cfg).await.unwrap();

    assert_eq!(outcome.samples.len(), 2);
    // The marker belongs to the other holder and is left alone.
    assert!(held.path().exists());
}

#[tokio::test]
async fn test_unreachable_target_still_produces_samples() {
    let dir = tempfile::TempDir::new().unwrap();
    let cfg = config(dir.path());

    let outcome = sharespeed::run_measurement(&cfg).await.unwrap();

    assert_eq!(outcome.samples.len(), 2);
    assert!(outcome.samples.iter().all(|s| !s.is_ok()));
    assert!(outcome.samples[0]
        .status
        .to_string()
        .starts_with("target unreachable"));
}

#[tokio::test]
async fn test_cold_and_warm_probes_across_invocations() {
    let dir = tempfile::TempDir::new().unwrap();
    let pool = make_share(dir.path(), 3);
    let cfg = config(dir.path());

    let cold = sharespeed::probe_once(&cfg, r"\\fs01\data", RunMode::Cold)
        .await
        .unwrap();
    let warm = sharespeed::probe_once(&cfg, r"\\fs01\data", RunMode::Warm)
        .await
        .unwrap();

    assert!(cold.is_ok(), "{}", cold.status);
    assert!(warm.is_ok(), "{}", warm.status);
    assert_eq!(std::fs::read_dir(pool).unwrap().count(), 2);
    assert!(!RunLock::marker_path(&cfg.lock.dir, "src01").exists());
}

#[tokio::test]
async fn test_seed_fills_read_pool() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("mnt/fs01/data")).unwrap();
    let cfg = config(dir.path());

    let files = sharespeed::seed_read_pools(&cfg, 3, 4096, 0.0).await.unwrap();

    assert_eq!(files.len(), 3);
    for f in &files {
        assert!(f.starts_with(dir.path().join("mnt/fs01/data/SpeedTest/Pool/src01")));
        assert_eq!(std::fs::metadata(f).unwrap().len(), 4096);
    }
}

#[tokio::test]
async fn test_seed_refuses_missing_target() {
    let dir = tempfile::TempDir::new().unwrap();
    let cfg = config(dir.path());

    let err = sharespeed::seed_read_pools(&cfg, 1, 4096, 0.0).await.unwrap_err();
    assert!(err.to_string().contains("target unreachable"));
    assert!(!dir.path().join("mnt").exists());
}

#[test]
fn test_unlock_removes_stale_marker() {
    let dir = tempfile::TempDir::new().unwrap();
    let cfg = config(dir.path());
    let guard = RunLock::acquire(&cfg.lock.dir, "src01").unwrap();
    std::mem::forget(guard);

    assert!(sharespeed::unlock(&cfg).unwrap());
    assert!(!sharespeed::unlock(&cfg).unwrap());
}

#[tokio::test]
async fn test_two_source_hosts_share_a_target() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("mnt/fs01/data")).unwrap();
    let host = |name: &str| {
        let mut cfg = config(dir.path());
        cfg.run.source_host = Some(name.to_string());
        cfg.run.work_dir = dir.path().join(format!("work-{name}"));
        cfg
    };
    let (a, b) = (host("srcA"), host("srcB"));
    sharespeed::seed_read_pools(&a, 1, 8192, 0.0).await.unwrap();
    sharespeed::seed_read_pools(&b, 1, 8192, 0.0).await.unwrap();

    let target = r"\\fs01\data";
    let cold_a = sharespeed::probe_once(&a, target, RunMode::Cold).await.unwrap();
    let cold_b = sharespeed::probe_once(&b, target, RunMode::Cold).await.unwrap();
    let warm_a = sharespeed::probe_once(&a, target, RunMode::Warm).await.unwrap();
    let warm_b = sharespeed::probe_once(&b, target, RunMode::Warm).await.unwrap();

    for sample in [&cold_a, &cold_b, &warm_a, &warm_b] {
        assert!(sample.is_ok(), "{}: {}", sample.source_host, sample.status);
    }
    let pool = dir.path().join("mnt/fs01/data/SpeedTest/Pool");
    assert_eq!(std::fs::read_dir(pool.join("srcA")).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(pool.join("srcB")).unwrap().count(), 0);
}
