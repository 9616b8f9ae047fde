use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn pvestic_binary() -> &'static str {
    env!("CARGO_BIN_EXE_pvestic")
}

fn run_in(dir: &Path, args: &[&str], config_env: Option<&str>) -> Output {
    let mut cmd = Command::new(pvestic_binary());
    cmd.args(args);
    cmd.current_dir(dir);
    cmd.env("NO_COLOR", "1");
    if let Some(path) = config_env {
        cmd.env("PVESTIC_CONFIG", path);
    }
    cmd.output().unwrap()
}

#[test]
fn config_generate_writes_a_loadable_template() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("pvestic.yaml");
    let dest_str = dest.to_str().unwrap();

    let output = run_in(tmp.path(), &["config", "--dest", dest_str], None);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(dest.exists());

    let config = pvestic_core::config::load_config(&dest).unwrap();
    assert!(!config.machines.is_empty());
    assert!(config.restic.repository.is_some());
}

#[test]
fn config_generate_refuses_to_overwrite() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("pvestic.yaml");
    let dest_str = dest.to_str().unwrap();

    assert!(run_in(tmp.path(), &["config", "--dest", dest_str], None)
        .status
        .success());
    let second = run_in(tmp.path(), &["config", "--dest", dest_str], None);
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));
}

#[test]
fn missing_config_file_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let ghost = tmp.path().join("ghost.yaml");

    let output = run_in(tmp.path(), &["list"], Some(ghost.to_str().unwrap()));
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot read"));
}

#[test]
fn invalid_config_file_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("pvestic.yaml");
    std::fs::write(&config_path, "machines: notalist\n").unwrap();

    let output = run_in(tmp.path(), &["list"], Some(config_path.to_str().unwrap()));
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid config"));
}

#[test]
fn a_subcommand_is_required() {
    let tmp = TempDir::new().unwrap();
    let output = run_in(tmp.path(), &[], None);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}
