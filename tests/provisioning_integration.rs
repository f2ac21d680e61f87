mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use common::{FakeAdb, FakeOwner, held_port};
use rtmp_relay::cli::Cli;
use rtmp_relay::config::{ConfigLoader, Settings};
use rtmp_relay::orchestrator::{HeadlessHooks, Stage, Workflow, WorkflowError};
use rtmp_relay::port::ConflictError;
use rtmp_relay::process::{PortOwner, TerminateError};
use tempfile::TempDir;

const ONE_DEVICE: &str = "List of devices attached\nR58M1234ABC device usb:3-2 model:SM_S918B\n";

/// Settings loaded the way the binary loads them, with `/bin/sh` standing
/// in for both the bridge and the relay server.
fn settings(dir: &TempDir, port: u16, script: &str) -> Settings {
    let path = dir.path().join("relay.toml");
    fs::write(
        &path,
        format!(
            r#"
[paths]
bridge = "/bin/sh"
server = "/bin/sh"
server_identity = "MonaServer"

[network]
port = {port}

[server]
args = ["-c", "{script}"]

[options]
fetch_device_models = false

[timing]
readiness_timeout_ms = 5000
readiness_poll_ms = 50
port_release_delay_ms = 10
conflict_attempts = 2
"#
        ),
    )
    .unwrap();

    let loader = ConfigLoader::with_paths(
        dir.path().join("missing-system.toml"),
        dir.path().join("missing-user.toml"),
    );
    let cli = Cli::parse_from(["rtmp-relay", "--config", path.to_str().unwrap(), "--headless"]);
    loader.load(&cli).unwrap().validate().unwrap()
}

#[tokio::test]
async fn test_provision_and_teardown() {
    let dir = TempDir::new().unwrap();
    let (_held, port) = held_port();
    let settings = settings(&dir, port, "exec sleep 30");
    assert_eq!(settings.server_dir, Path::new("/bin"));

    let adb = Arc::new(FakeAdb::new(ONE_DEVICE));
    let owner = Arc::new(FakeOwner::free());
    let mut workflow = Workflow::from_settings(&settings, adb.clone(), owner, HeadlessHooks);

    let state = workflow.run().await;

    assert!(state.is_ready(), "aborted: {:?}", state.error());
    assert_eq!(adb.rules(), vec![("R58M1234ABC".to_string(), port, port)]);
    assert_eq!(settings.stream_url(), format!("rtmp://127.0.0.1:{}/live", port));

    workflow.teardown(&state).await.unwrap();
    assert!(adb.rules().is_empty());
}

#[tokio::test]
async fn test_forward_only_when_server_start_disabled() {
    let dir = TempDir::new().unwrap();
    let (_held, port) = held_port();
    let mut settings = settings(&dir, port, "exit 3");
    assert!(settings.auto_start_server);
    settings.auto_start_server = false;

    let adb = Arc::new(FakeAdb::new(ONE_DEVICE));
    let owner = Arc::new(FakeOwner::free());
    let mut workflow = Workflow::from_settings(&settings, adb.clone(), owner, HeadlessHooks);

    let state = workflow.run().await;

    assert!(state.is_ready(), "aborted: {:?}", state.error());
    assert!(!state.history().iter().any(|r| r.stage == Stage::StartingServer));
    assert!(state.server.is_none());
    assert_eq!(state.listener, Some(PortOwner::Free));
    assert_eq!(adb.rules(), vec![("R58M1234ABC".to_string(), port, port)]);

    workflow.teardown(&state).await.unwrap();
    assert!(adb.rules().is_empty());
}

#[tokio::test]
async fn test_stale_server_is_replaced() {
    let dir = TempDir::new().unwrap();
    let (_held, port) = held_port();
    let settings = settings(&dir, port, "exec sleep 30");

    let adb = Arc::new(FakeAdb::new(ONE_DEVICE));
    let owner = Arc::new(FakeOwner::process(777, "MonaServer", false));
    let mut workflow = Workflow::from_settings(&settings, adb, owner.clone(), HeadlessHooks);

    let state = workflow.run().await;

    assert!(state.is_ready(), "aborted: {:?}", state.error());
    assert_eq!(owner.terminated(), vec![777]);
    let binding = state.binding.clone().unwrap();
    assert!(binding.is_free());
    workflow.teardown(&state).await.unwrap();
}

#[tokio::test]
async fn test_foreign_owner_untouched_without_force() {
    let dir = TempDir::new().unwrap();
    let (_held, port) = held_port();
    let settings = settings(&dir, port, "exec sleep 30");

    let adb = Arc::new(FakeAdb::new(ONE_DEVICE));
    let owner = Arc::new(FakeOwner::process(4242, "nginx", false));
    let mut workflow = Workflow::from_settings(&settings, adb.clone(), owner.clone(), HeadlessHooks);

    let state = workflow.run().await;

    assert_eq!(state.failed_stage(), Some(Stage::ResolvingPort));
    assert!(matches!(
        state.error(),
        Some(WorkflowError::Conflict(ConflictError::PolicyDenied { owner, .. })) if owner.pid == 4242
    ));
    assert!(owner.terminated().is_empty());
    assert!(adb.rules().is_empty());
}

#[tokio::test]
async fn test_forced_resolution_gives_up_on_stubborn_owner() {
    let dir = TempDir::new().unwrap();
    let (_held, port) = held_port();
    let mut settings = settings(&dir, port, "exec sleep 30");
    settings.force_resolve_port_conflicts = true;

    let adb = Arc::new(FakeAdb::new(ONE_DEVICE));
    let owner = Arc::new(FakeOwner::process(4242, "nginx", true));
    let mut workflow = Workflow::from_settings(&settings, adb, owner.clone(), HeadlessHooks);

    let state = workflow.run().await;

    assert!(matches!(
        state.error(),
        Some(WorkflowError::Conflict(ConflictError::Unresolvable { attempts: 2, .. }))
    ));
    assert_eq!(owner.terminated(), vec![4242, 4242]);
}

#[tokio::test]
async fn test_owner_that_exits_on_its_own_frees_port() {
    let dir = TempDir::new().unwrap();
    let (_held, port) = held_port();
    let settings = settings(&dir, port, "exec sleep 30");

    let adb = Arc::new(FakeAdb::new(ONE_DEVICE));
    let owner = Arc::new(FakeOwner::process(777, "MonaServer", false).failing_with(TerminateError::NotFound(777)));
    let mut workflow = Workflow::from_settings(&settings, adb, owner.clone(), HeadlessHooks);

    let state = workflow.run().await;

    assert!(state.is_ready(), "aborted: {:?}", state.error());
    assert_eq!(owner.terminated(), vec![777]);
    assert!(state.binding.as_ref().is_some_and(|b| b.released.is_empty()));
    workflow.teardown(&state).await.unwrap();
}

#[tokio::test]
async fn test_unkillable_owner_is_unresolvable() {
    let dir = TempDir::new().unwrap();
    let (_held, port) = held_port();
    let settings = settings(&dir, port, "exec sleep 30");

    let adb = Arc::new(FakeAdb::new(ONE_DEVICE));
    let owner = Arc::new(FakeOwner::process(1, "MonaServer", true).failing_with(
        TerminateError::PermissionDenied {
            pid: 1,
            reason: "EPERM".to_string(),
        },
    ));
    let mut workflow = Workflow::from_settings(&settings, adb.clone(), owner.clone(), HeadlessHooks);

    let state = workflow.run().await;

    assert_eq!(state.failed_stage(), Some(Stage::ResolvingPort));
    assert!(matches!(
        state.error(),
        Some(WorkflowError::Conflict(ConflictError::Unresolvable { attempts: 2, .. }))
    ));
    assert_eq!(owner.terminated(), vec![1, 1]);
    assert!(adb.rules().is_empty());
}

#[tokio::test]
async fn test_server_that_never_listens_times_out() {
    let dir = TempDir::new().unwrap();
    let port = {
        let (listener, port) = held_port();
        drop(listener);
        port
    };
    let mut settings = settings(&dir, port, "exec sleep 30");
    settings.timing.readiness_timeout = Duration::from_millis(300);

    let adb = Arc::new(FakeAdb::new(ONE_DEVICE));
    let mut workflow = Workflow::from_settings(&settings, adb.clone(), Arc::new(FakeOwner::free()), HeadlessHooks);

    let state = workflow.run().await;

    assert_eq!(state.failed_stage(), Some(Stage::StartingServer));
    assert!(matches!(state.error(), Some(WorkflowError::Start(_))));

    // Cleanup after an aborted run stops the lingering process and the forward.
    workflow.teardown(&state).await.unwrap();
    assert!(adb.rules().is_empty());
}
