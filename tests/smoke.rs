//! Smoke tests -- verify the binary runs and every subcommand is wired.

use assert_cmd::Command;

fn sharespeed() -> Command {
    let mut cmd = Command::cargo_bin("sharespeed").unwrap();
    cmd.env_remove("SHARESPEED_CONFIG");
    cmd
}

#[test]
fn test_cli_help() {
    sharespeed()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Cold/warm file-share throughput tester"));
}

#[test]
fn test_cli_version() {
    sharespeed()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("sharespeed"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["run", "probe", "drain", "seed", "unlock"] {
        sharespeed().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_probe_rejects_unknown_mode() {
    sharespeed()
        .args(["probe", "--target", r"\\fs01\data", "--mode", "tepid"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("unknown run mode"));
}

#[test]
fn test_run_without_targets_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("sharespeed.toml");
    std::fs::write(&config, "[run]\npasses = 1\n").unwrap();

    sharespeed()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicates::str::contains("no targets configured"));
}

#[test]
fn test_unlock_without_marker() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("sharespeed.toml");
    std::fs::write(
        &config,
        format!(
            "[run]\nsource_host = \"src01\"\n\n[lock]\ndir = {:?}\n",
            dir.path().join("locks")
        ),
    )
    .unwrap();

    sharespeed()
        .arg("--config")
        .arg(&config)
        .arg("unlock")
        .assert()
        .success()
        .stdout(predicates::str::contains("No lock held"));
}

#[test]
fn test_unreadable_config_env_warns_and_falls_back() {
    let dir = tempfile::TempDir::new().unwrap();

    sharespeed()
        .current_dir(dir.path())
        .env_remove("RUST_LOG")
        .env("SHARESPEED_CONFIG", dir.path().join("missing.toml"))
        .arg("drain")
        .assert()
        .success()
        .stdout(predicates::str::contains("No candidate addresses"))
        .stderr(predicates::str::contains(
            "SHARESPEED_CONFIG set but file could not be loaded",
        ));
}
