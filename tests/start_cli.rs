//! Integration tests for `expod start` flag handling

use std::fs;

use clap::Parser;
use expod::cli::{Cli, Command, StartArgs};
use expod_core::{Error, HostType, Mode};
use tempfile::TempDir;

fn start_args(args: &[&str]) -> StartArgs {
    let mut argv = vec!["expod", "start"];
    argv.extend_from_slice(args);
    match Cli::try_parse_from(argv).unwrap().command {
        Command::Start(args) => args,
    }
}

fn create_project() -> TempDir {
    let temp = tempfile::tempdir().unwrap();
    fs::write(
        temp.path().join("package.json"),
        r#"{"name":"demo","dependencies":{"expo":"*"}}"#,
    )
    .unwrap();
    temp
}

#[tokio::test]
async fn test_tunnel_and_lan_fail_before_binding() {
    let project = create_project();
    // Hold the port: reaching the bind step would report PortInUse instead
    let held = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = held.local_addr().unwrap().port().to_string();

    let args = start_args(&[
        project.path().to_str().unwrap(),
        "--host",
        "tunnel",
        "--lan",
        "--port",
        &port,
    ]);
    let err = expod::start::run(args).await.unwrap_err();

    assert!(matches!(err, Error::Usage { .. }), "got {err:?}");
    assert!(err.to_string().contains("--host"));
    assert!(!project.path().join(".expo").exists());
}

#[tokio::test]
async fn test_missing_project_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let args = start_args(&[temp.path().to_str().unwrap(), "--localhost"]);
    let err = expod::start::run(args).await.unwrap_err();
    assert!(matches!(err, Error::NoProject { .. }));
}

#[test]
fn test_offline_forces_lan() {
    let plan = start_args(&["--offline", "--no-dev"]).plan().unwrap();
    assert_eq!(plan.options.location.host_type, HostType::Lan);
    assert_eq!(plan.options.mode, Mode::Production);
    assert!(plan.offline);
}

#[tokio::test]
async fn test_offline_and_lan_fail_before_binding() {
    let project = create_project();
    let args = start_args(&[project.path().to_str().unwrap(), "--offline", "--lan"]);
    let err = expod::start::run(args).await.unwrap_err();

    assert!(matches!(err, Error::Usage { .. }), "got {err:?}");
    assert!(err.to_string().contains("--offline"));
    assert!(!project.path().join(".expo").exists());
}

#[test]
fn test_unknown_flag_is_rejected_by_parser() {
    assert!(Cli::try_parse_from(["expod", "start", "--wan"]).is_err());
}
