//! Daemon lifecycle and client end-to-end tests over a tempdir socket.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use agentdb_core::embeddings::MockEmbedder;
use agentdb_core::{Error, MemoryConfig};
use agentdb_daemon::{ClientConfig, DaemonServer, MemoryClient, MemoryService, ServerState};

const DIM: usize = 16;

fn test_config(dir: &TempDir) -> MemoryConfig {
    let data_dir = dir.path().join("data");
    MemoryConfig {
        dimension: DIM,
        cache_dir: data_dir.join("capability-cache"),
        agents_dir: dir.path().join("agents"),
        socket_path: dir.path().join("agentdb.sock"),
        data_dir,
        embedding_url: None,
        auto_start: false,
        verbose: false,
    }
}

async fn start_daemon(
    config: &MemoryConfig,
) -> (
    agentdb_daemon::ShutdownHandle,
    tokio::task::JoinHandle<agentdb_core::Result<()>>,
    tokio::sync::watch::Receiver<ServerState>,
) {
    std::fs::create_dir_all(&config.agents_dir).unwrap();
    std::fs::write(
        config.agents_dir.join("generalist.md"),
        "# generalist\ndomains: general\nHandles everything",
    )
    .unwrap();

    let service = MemoryService::initialize(config.clone(), Arc::new(MockEmbedder::new(DIM)))
        .await
        .unwrap();
    let server = DaemonServer::new(config.clone(), service);
    let shutdown = server.shutdown_handle();
    let mut state = server.state();
    let task = tokio::spawn(server.run());

    // Wait until the accept loop is live.
    while *state.borrow() != ServerState::Ready {
        state.changed().await.unwrap();
    }
    (shutdown, task, state)
}

fn client_for(config: &MemoryConfig) -> MemoryClient {
    let mut client_config = ClientConfig::from_memory_config(config);
    client_config.request_timeout = Duration::from_secs(5);
    client_config.max_reconnect_attempts = 1;
    client_config.reconnect_base_delay = Duration::from_millis(10);
    MemoryClient::new(client_config)
}

#[tokio::test]
async fn full_lifecycle_ping_and_shutdown() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let (shutdown, task, mut state) = start_daemon(&config).await;

    // PID file written, socket restricted to the owner.
    let pid_contents = std::fs::read_to_string(config.pid_file()).unwrap();
    let pid_json: serde_json::Value = serde_json::from_str(&pid_contents).unwrap();
    assert_eq!(pid_json["pid"], u64::from(std::process::id()));
    assert!(pid_json["address"]
        .as_str()
        .unwrap()
        .starts_with("unix:"));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&config.socket_path)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let client = client_for(&config);
    client.connect().await.unwrap();
    let pong = client.ping().await.unwrap();
    assert_eq!(pong["pong"], true);
    assert!(pong["uptimeMs"].as_u64().is_some());

    // Graceful shutdown removes both files.
    client.close().await;
    shutdown.trigger();
    task.await.unwrap().unwrap();
    assert_eq!(*state.borrow_and_update(), ServerState::Stopped);
    assert!(!config.socket_path.exists());
    assert!(!config.pid_file().exists());

    // A fresh client cannot reach the stopped daemon.
    let late = client_for(&config);
    let err = late.connect().await.unwrap_err();
    assert!(matches!(err, Error::ServerNotRunning));
}

#[tokio::test]
async fn memory_store_and_retrieve_over_rpc() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let (shutdown, task, _state) = start_daemon(&config).await;

    let client = client_for(&config);
    client.connect().await.unwrap();

    let stored = client
        .call(
            "memory.store",
            json!({
                "taskText": "configure the linter",
                "answerText": "added the workspace lint table",
                "agentType": "coder",
                "domain": "coding",
                "tags": ["lint"]
            }),
        )
        .await
        .unwrap();
    let episode_id = stored["episodeId"].as_str().unwrap().to_string();

    // Identical query text embeds identically: exact hit above the
    // coding threshold.
    let results = client
        .call(
            "episode.retrieve",
            json!({ "query": "configure the linter", "k": 3, "domain": "coding" }),
        )
        .await
        .unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["episode"]["episodeId"], episode_id.as_str());

    // Outcome recording reflects in the response.
    let recorded = client
        .call(
            "episode.record",
            json!({ "episodeId": episode_id, "success": true }),
        )
        .await
        .unwrap();
    assert_eq!(recorded["successes"], 1);

    let by_domain = client
        .call("memory.getByDomain", json!({ "domain": "coding" }))
        .await
        .unwrap();
    assert_eq!(by_domain["episodes"].as_array().unwrap().len(), 1);

    let deleted = client
        .call("memory.delete", json!({ "episodeId": episode_id }))
        .await
        .unwrap();
    assert_eq!(deleted["deleted"], true);

    client.close().await;
    shutdown.trigger();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn routing_and_health_over_rpc() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let (shutdown, task, _state) = start_daemon(&config).await;

    let client = client_for(&config);
    client.connect().await.unwrap();

    let decision = client
        .call("route.select", json!({ "task": "summarize the meeting notes" }))
        .await
        .unwrap();
    assert_eq!(decision["selected"]["agentKey"], "generalist");
    assert!(decision["confidence"].as_f64().unwrap() > 0.0);

    let health = client.call("health.check", json!({})).await.unwrap();
    assert_eq!(health["status"], "ready");
    assert_eq!(health["agents"], 1);

    let metrics = client.call("health.metrics", json!({})).await.unwrap();
    assert!(metrics["compression"]["vectorCount"].is_number());

    client.close().await;
    shutdown.trigger();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn rpc_error_surface() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let (shutdown, task, _state) = start_daemon(&config).await;

    let client = client_for(&config);
    client.connect().await.unwrap();

    // Unknown method.
    let err = client.call("nope.nothing", json!({})).await.unwrap_err();
    match err {
        Error::Rpc { code, .. } => assert_eq!(code, -32601),
        other => panic!("unexpected error {other:?}"),
    }

    // Invalid params.
    let err = client
        .call("episode.record", json!({ "episodeId": "not-a-uuid" }))
        .await
        .unwrap_err();
    match err {
        Error::Rpc { code, .. } => assert_eq!(code, -32602),
        other => panic!("unexpected error {other:?}"),
    }

    // Internal errors carry typed codes: deleting a missing episode.
    let err = client
        .call(
            "memory.delete",
            json!({ "episodeId": uuid::Uuid::new_v4() }),
        )
        .await
        .unwrap_err();
    match err {
        Error::Rpc { code, .. } => assert_eq!(code, -32603),
        other => panic!("unexpected error {other:?}"),
    }

    // The daemon survived all of it.
    assert_eq!(client.ping().await.unwrap()["pong"], true);

    client.close().await;
    shutdown.trigger();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn second_daemon_refuses_to_start() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let (shutdown, task, _state) = start_daemon(&config).await;

    let service = MemoryService::initialize(config.clone(), Arc::new(MockEmbedder::new(DIM)))
        .await
        .unwrap();
    let second = DaemonServer::new(config.clone(), service);
    let err = second.run().await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // The original daemon is unaffected.
    let client = client_for(&config);
    client.connect().await.unwrap();
    assert_eq!(client.ping().await.unwrap()["pong"], true);

    client.close().await;
    shutdown.trigger();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn disconnected_client_rejects_pending_and_reconnects() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let (shutdown, task, _state) = start_daemon(&config).await;

    let client = client_for(&config);
    client.connect().await.unwrap();
    assert!(client.is_connected());

    // Intentional close suppresses reconnection.
    client.close().await;
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, Error::ServerDisconnected));

    // Reconnect explicitly and keep working.
    client.connect().await.unwrap();
    assert_eq!(client.ping().await.unwrap()["pong"], true);

    client.close().await;
    shutdown.trigger();
    task.await.unwrap().unwrap();
}
