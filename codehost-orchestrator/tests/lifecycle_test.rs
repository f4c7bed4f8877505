//! Lifecycle tests for the workspace orchestrator
//!
//! Every scenario runs against an in-memory store and the mock engine. After
//! each transition the stored state is checked against the invariants that
//! must always hold: a running row names its container, a user runs at most
//! one workspace, and a running workspace has exactly one open session.

use std::collections::HashMap;
use std::net::{Ipv4Addr, TcpListener};

use codehost_orchestrator::history::PageRequest;
use codehost_orchestrator::test_utils::{create_request, test_config, TestHarness};
use codehost_orchestrator::{ErrorKind, WorkspaceFilters, WorkspaceStatus};
use codehost_ports::{seed_port, PortRange};
use codehost_runtime::{ContainerRuntime, ContainerSpec, MockOp, PortMapping, RuntimeError};

async fn assert_invariants(h: &TestHarness) {
    let all = h
        .orchestrator
        .list_workspaces(&WorkspaceFilters::default())
        .await
        .unwrap();

    let mut running_per_user: HashMap<&str, usize> = HashMap::new();
    for ws in &all {
        ws.check_invariants().unwrap();

        let open: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM history_sessions WHERE workspace_id = ? AND exit_at IS NULL",
        )
        .bind(ws.id)
        .fetch_one(&h.pool)
        .await
        .unwrap();

        if ws.is_running() {
            *running_per_user.entry(ws.user_id.as_str()).or_default() += 1;
            assert_eq!(open, 1, "running workspace {} must have one open session", ws.id);
        } else {
            assert_eq!(open, 0, "stopped workspace {} must have no open session", ws.id);
        }
    }
    for (user, count) in running_per_user {
        assert!(count <= 1, "user {user} has {count} running workspaces");
    }
}

#[tokio::test]
async fn test_create_starts_container() {
    let h = TestHarness::new().await;

    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .expect("Failed to create workspace");

    assert_eq!(conn.status, WorkspaceStatus::Running);
    let port = conn.host_port.unwrap();
    assert!((20000..=29999).contains(&port));
    assert_eq!(conn.connection_uri, Some(format!("http://localhost:{port}")));
    assert!(conn.container_name.starts_with("code-demo-"));

    let ws = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();
    let container = h.runtime.container(ws.container().unwrap()).unwrap();
    assert!(container.running);
    assert_eq!(container.spec.name, conn.container_name);
    assert_eq!(container.spec.port, PortMapping::code_server(port));

    // Host directory exists before the container mounts it
    let host_dir = h.workspace_root.path().join("alice").join(&ws.slug);
    assert!(host_dir.is_dir());
    assert_eq!(container.spec.mounts[0].source, host_dir.to_string_lossy());

    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_create_stop_delete() {
    let h = TestHarness::new().await;
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let id = conn.workspace_id;

    let stopped = h.orchestrator.stop_workspace("alice", id).await.unwrap();
    assert_eq!(stopped.status, WorkspaceStatus::Stopped);
    assert!(stopped.connection_uri.is_none());
    assert_eq!(stopped.host_port, conn.host_port);
    assert_eq!(h.runtime.running_count(), 0);
    assert_invariants(&h).await;

    h.orchestrator.delete_workspace("alice", id).await.unwrap();
    assert_eq!(h.runtime.container_count(), 0);

    let err = h.orchestrator.get_workspace(id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_delete_running_workspace_conflicts() {
    let h = TestHarness::new().await;
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .delete_workspace("alice", conn.workspace_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let ws = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();
    assert_eq!(ws.status, WorkspaceStatus::Running);
    assert_eq!(h.runtime.running_count(), 1);
}

#[tokio::test]
async fn test_delete_stale_running_row_succeeds() {
    let h = TestHarness::new().await;
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let ws = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();
    h.runtime.stop_out_of_band(ws.container().unwrap());

    h.orchestrator
        .delete_workspace("alice", conn.workspace_id)
        .await
        .expect("engine says the container is stopped, so delete proceeds");
    assert_eq!(h.runtime.container_count(), 0);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let h = TestHarness::new().await;
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let starts = h.runtime.calls(MockOp::Start);

    let again = h
        .orchestrator
        .start_workspace("alice", conn.workspace_id)
        .await
        .unwrap();

    assert_eq!(again, conn);
    assert_eq!(h.runtime.calls(MockOp::Start), starts);
    assert_eq!(h.runtime.container_count(), 1);

    let history = h
        .orchestrator
        .list_history(conn.workspace_id, PageRequest::new(None, None).unwrap())
        .await
        .unwrap();
    assert_eq!(history.pagination.total_record, 1);
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = TestHarness::new().await;
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();

    h.orchestrator.stop_workspace("alice", conn.workspace_id).await.unwrap();
    let stops = h.runtime.calls(MockOp::Stop);
    let again = h.orchestrator.stop_workspace("alice", conn.workspace_id).await.unwrap();

    assert_eq!(again.status, WorkspaceStatus::Stopped);
    assert_eq!(h.runtime.calls(MockOp::Stop), stops);
}

#[tokio::test]
async fn test_restart_reuses_container_and_port() {
    let h = TestHarness::new().await;
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let first = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();

    h.orchestrator.stop_workspace("alice", conn.workspace_id).await.unwrap();
    let restarted = h
        .orchestrator
        .start_workspace("alice", conn.workspace_id)
        .await
        .unwrap();

    let second = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();
    assert_eq!(restarted.host_port, conn.host_port);
    assert_eq!(second.container_ref, first.container_ref);
    assert_eq!(h.runtime.calls(MockOp::Create), 1);
    assert_invariants(&h).await;

    let via_restart = h
        .orchestrator
        .restart_workspace("alice", conn.workspace_id)
        .await
        .unwrap();
    assert_eq!(via_restart.host_port, conn.host_port);

    let history = h
        .orchestrator
        .list_history(conn.workspace_id, PageRequest::new(None, None).unwrap())
        .await
        .unwrap();
    assert_eq!(history.pagination.total_record, 3);
    assert_eq!(history.items.iter().filter(|s| s.is_open()).count(), 1);
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_restart_moves_when_old_port_is_taken() {
    let h = TestHarness::new().await;
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let old_port = conn.host_port.unwrap();
    let old_ref = h
        .orchestrator
        .get_workspace(conn.workspace_id)
        .await
        .unwrap()
        .container_ref;

    h.orchestrator.stop_workspace("alice", conn.workspace_id).await.unwrap();

    // Someone else grabs the port while the workspace is stopped
    let Ok(_squatter) = TcpListener::bind((Ipv4Addr::LOCALHOST, old_port)) else {
        return;
    };

    let restarted = h
        .orchestrator
        .start_workspace("alice", conn.workspace_id)
        .await
        .unwrap();
    let ws = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();

    assert_ne!(restarted.host_port, Some(old_port));
    assert_ne!(ws.container_ref, old_ref);
    // The old container was replaced, not left behind
    assert_eq!(h.runtime.container_count(), 1);
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_second_running_workspace_is_refused() {
    let h = TestHarness::new().await;
    let demo = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();

    // A second create while demo runs is refused and leaves nothing behind
    let err = h
        .orchestrator
        .create_workspace("alice", create_request("demo2", 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.runtime.container_count(), 1);

    h.orchestrator.stop_workspace("alice", demo.workspace_id).await.unwrap();
    let demo2 = h
        .orchestrator
        .create_workspace("alice", create_request("demo2", 1))
        .await
        .unwrap();
    assert_eq!(demo2.status, WorkspaceStatus::Running);

    let err = h
        .orchestrator
        .start_workspace("alice", demo.workspace_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Other users are unaffected
    h.orchestrator
        .create_workspace("bob", create_request("demo3", 1))
        .await
        .unwrap();
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_start_of_provisioned_workspace_waits_for_quota() {
    let h = TestHarness::new().await;
    let demo = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let demo2 = h
        .orchestrator
        .provision_workspace("alice", create_request("demo2", 1))
        .await
        .unwrap();
    assert_eq!(demo2.status, WorkspaceStatus::Stopped);

    let err = h
        .orchestrator
        .start_workspace("alice", demo2.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.runtime.container_count(), 1);
    assert_invariants(&h).await;

    let stopped = h
        .orchestrator
        .stop_workspace("alice", demo.workspace_id)
        .await
        .unwrap();
    assert_eq!(stopped.status, WorkspaceStatus::Stopped);

    let history = h
        .orchestrator
        .list_history(demo.workspace_id, PageRequest::new(None, None).unwrap())
        .await
        .unwrap();
    assert_eq!(history.items.len(), 1);
    let session = &history.items[0];
    let exit_at = session.exit_at.expect("stopping closes the session");
    assert!(exit_at >= session.enter_at);

    let started = h
        .orchestrator
        .start_workspace("alice", demo2.id)
        .await
        .unwrap();
    assert_eq!(started.status, WorkspaceStatus::Running);
    assert!(started.connection_uri.is_some());
    assert_eq!(h.runtime.running_count(), 1);
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_user_id_cannot_escape_workspace_root() {
    let h = TestHarness::new().await;
    let outside = h.workspace_root.path().join("..").join("escape");

    for user in ["../escape", "../../escape", "/tmp/escape", "alice/../../escape", ".."] {
        let err = h
            .orchestrator
            .create_workspace(user, create_request("demo", 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{user} accepted");

        let err = h
            .orchestrator
            .provision_workspace(user, create_request("demo", 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{user} accepted");
    }

    assert_eq!(h.runtime.calls(MockOp::Create), 0);
    assert!(!outside.exists());

    // A valid id lands directly under the root
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let ws = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();
    let dir = h.workspace_root.path().join("alice").join(&ws.slug);
    assert!(dir.is_dir());
    let container = h.runtime.container_by_name(&conn.container_name).unwrap();
    assert_eq!(container.spec.mounts[0].source, dir.to_string_lossy());
}

#[tokio::test]
async fn test_stale_running_row_does_not_block_quota() {
    let h = TestHarness::new().await;
    let demo = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let ws = h.orchestrator.get_workspace(demo.workspace_id).await.unwrap();
    h.runtime.stop_out_of_band(ws.container().unwrap());

    h.orchestrator
        .create_workspace("alice", create_request("demo2", 1))
        .await
        .expect("the engine shows demo stopped");

    let demo = h.orchestrator.get_workspace(demo.workspace_id).await.unwrap();
    assert_eq!(demo.status, WorkspaceStatus::Stopped);
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_duplicate_name_in_project_conflicts() {
    let h = TestHarness::new().await;
    let demo = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    h.orchestrator.stop_workspace("alice", demo.workspace_id).await.unwrap();

    let err = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Same name in another project gets its own container
    let other = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 2))
        .await
        .unwrap();
    assert_ne!(other.container_name, demo.container_name);
}

#[tokio::test]
async fn test_stop_after_container_vanished() {
    let h = TestHarness::new().await;
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let ws = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();
    assert!(h.runtime.remove_out_of_band(ws.container().unwrap()));

    let stopped = h.orchestrator.stop_workspace("alice", conn.workspace_id).await.unwrap();
    assert_eq!(stopped.status, WorkspaceStatus::Stopped);

    let ws = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();
    assert!(ws.container_ref.is_none());
    assert_invariants(&h).await;

    // Next start builds a fresh container
    let started = h.orchestrator.start_workspace("alice", conn.workspace_id).await.unwrap();
    assert_eq!(started.status, WorkspaceStatus::Running);
    assert_eq!(h.runtime.container_count(), 1);
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_start_recovers_from_vanished_container() {
    let h = TestHarness::new().await;
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let before = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();
    h.runtime.remove_out_of_band(before.container().unwrap());

    let started = h.orchestrator.start_workspace("alice", conn.workspace_id).await.unwrap();
    let after = h.orchestrator.get_workspace(conn.workspace_id).await.unwrap();

    assert_eq!(started.status, WorkspaceStatus::Running);
    assert_ne!(after.container_ref, before.container_ref);
    assert!(h.runtime.container(after.container().unwrap()).unwrap().running);

    // The stale session was closed and a new one opened
    let history = h
        .orchestrator
        .list_history(conn.workspace_id, PageRequest::new(None, None).unwrap())
        .await
        .unwrap();
    assert_eq!(history.pagination.total_record, 2);
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_port_conflict_is_retried() {
    let h = TestHarness::new().await;
    h.runtime.inject_fault(
        MockOp::Start,
        RuntimeError::PortConflict("port is already allocated".into()),
    );

    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .expect("a single port conflict is retried");

    assert_eq!(conn.status, WorkspaceStatus::Running);
    assert_eq!(h.runtime.calls(MockOp::Create), 2);
    assert_eq!(h.runtime.calls(MockOp::Start), 2);
    // The half-created container from the first attempt is gone
    assert_eq!(h.runtime.container_count(), 1);
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_port_conflict_retries_are_bounded() {
    let h = TestHarness::new().await;
    for _ in 0..4 {
        h.runtime.inject_fault(
            MockOp::Start,
            RuntimeError::PortConflict("port is already allocated".into()),
        );
    }

    let err = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.runtime.calls(MockOp::Start), 4);
    assert_eq!(h.runtime.container_count(), 0);
    assert!(h
        .orchestrator
        .list_workspaces(&WorkspaceFilters::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_create_is_atomic_on_engine_failure() {
    let h = TestHarness::new().await;
    h.runtime.inject_fault(
        MockOp::Start,
        RuntimeError::CommandFailed("exec format error".into()),
    );

    let err = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RuntimeUnavailable);
    assert_eq!(h.runtime.container_count(), 0);
    assert!(h
        .orchestrator
        .list_workspaces(&WorkspaceFilters::default())
        .await
        .unwrap()
        .is_empty());

    // The name is still free afterwards
    h.orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_engine_unavailable() {
    let h = TestHarness::new().await;
    let ws = h
        .orchestrator
        .provision_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    h.runtime.set_unavailable(true);

    let err = h
        .orchestrator
        .create_workspace("alice", create_request("other", 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeUnavailable);

    let err = h.orchestrator.start_workspace("alice", ws.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeUnavailable);

    let ws = h.orchestrator.get_workspace(ws.id).await.unwrap();
    assert_eq!(ws.status, WorkspaceStatus::Stopped);
}

#[tokio::test]
async fn test_stale_container_name_is_cleared() {
    let h = TestHarness::new().await;
    let ws = h
        .orchestrator
        .provision_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();

    // A leftover container already holds the name
    let stale = ContainerSpec {
        image: "stale:latest".to_string(),
        name: ws.container_name(),
        mounts: Vec::new(),
        port: PortMapping::code_server(29999),
        network_mode: "bridge".to_string(),
        env: Vec::new(),
        labels: Vec::new(),
    };
    h.runtime.create(&stale).await.unwrap();

    let conn = h.orchestrator.start_workspace("alice", ws.id).await.unwrap();

    assert_eq!(conn.status, WorkspaceStatus::Running);
    assert_eq!(h.runtime.container_count(), 1);
    let container = h.runtime.container_by_name(&ws.container_name()).unwrap();
    assert_ne!(container.spec.image, "stale:latest");
    assert_invariants(&h).await;
}

#[tokio::test]
async fn test_seed_port_collision_probes_upward() {
    let h = TestHarness::new().await;
    let ws = h
        .orchestrator
        .provision_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();

    let range = h.orchestrator.config().port_range;
    let seed = seed_port(&ws.container_name(), &range);
    let Ok(_holder) = TcpListener::bind((Ipv4Addr::LOCALHOST, seed)) else {
        return;
    };

    let conn = h.orchestrator.start_workspace("alice", ws.id).await.unwrap();
    let port = conn.host_port.unwrap();
    assert_ne!(port, seed);
    assert!(port > seed && port <= range.ceiling);
}

#[tokio::test]
async fn test_port_exhaustion() {
    let holder = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let only_port = holder.local_addr().unwrap().port();

    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.port_range = PortRange::new(only_port, only_port).unwrap();
    let h = TestHarness::with_config(config, root).await;

    let err = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PortExhausted);
    assert_eq!(h.runtime.calls(MockOp::Create), 0);
}

#[tokio::test]
async fn test_rename() {
    let h = TestHarness::new().await;
    let demo = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    let other = h
        .orchestrator
        .provision_workspace("alice", create_request("other", 1))
        .await
        .unwrap();

    // Allowed while running; the container keeps its name
    let renamed = h
        .orchestrator
        .rename_workspace("alice", demo.workspace_id, "  renamed ")
        .await
        .unwrap();
    assert_eq!(renamed.name, "renamed");
    assert_eq!(renamed.container_name(), demo.container_name);
    assert!(renamed.is_running());

    let err = h
        .orchestrator
        .rename_workspace("alice", other.id, "renamed")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = h
        .orchestrator
        .rename_workspace("alice", other.id, "   ")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_history_pagination() {
    let h = TestHarness::new().await;
    let conn = h
        .orchestrator
        .create_workspace("alice", create_request("demo", 1))
        .await
        .unwrap();
    for _ in 0..2 {
        h.orchestrator.restart_workspace("alice", conn.workspace_id).await.unwrap();
    }

    let first = h
        .orchestrator
        .list_history(conn.workspace_id, PageRequest::new(Some(1), Some(2)).unwrap())
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.pagination.total_record, 3);
    assert_eq!(first.pagination.total_page, 2);
    assert!(first.pagination.has_next_page);
    assert!(first.items[0].is_open());

    let second = h
        .orchestrator
        .list_history(conn.workspace_id, PageRequest::new(Some(2), Some(2)).unwrap())
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(!second.pagination.has_next_page);
    assert!(second.pagination.has_previous_page);

    let err = h
        .orchestrator
        .list_history(9999, PageRequest::new(None, None).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_validation_errors() {
    let h = TestHarness::new().await;

    let err = h
        .orchestrator
        .create_workspace("alice", create_request("", 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .orchestrator
        .create_workspace("alice", create_request("demo", -1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h.orchestrator.start_workspace("alice", 404).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.runtime.calls(MockOp::Create), 0);
}
