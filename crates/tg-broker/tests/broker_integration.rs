//! Broker integration tests
//!
//! Runs a real broker on a Unix socket in a temporary directory and talks
//! to it with `BrokerClient`, using `MemoryRegistry` as the session
//! registry.

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::time::timeout;

use tg_broker::{
    Broker, BrokerClient, BrokerConfig, BrokerError, BrokerHandle, Credentials, Incoming,
};
use tg_core::config::{AgentSettings, KeyPair, UnauthenticatedPolicy};
use tg_core::{
    MemoryRegistry, MemorySettingsStore, SessionCounts, SessionKind, SessionRegistry,
    SettingsStore, TaskId, TaskStatus, TomlSettingsStore,
};
use tg_protocol::{CommandKind, Multipart, PushType, RpcCommand, RpcResponse, RpcStatus};

/// Keypair the test brokers trust
fn client_keys() -> &'static KeyPair {
    static KEYS: OnceLock<KeyPair> = OnceLock::new();
    KEYS.get_or_init(|| KeyPair::generate().unwrap())
}

fn trusted() -> Credentials {
    Credentials::Curve(client_keys().clone())
}

fn stranger() -> Credentials {
    Credentials::Curve(KeyPair::generate().unwrap())
}

/// Timeout for anything that should happen promptly
const STEP: Duration = Duration::from_secs(5);

struct TestBroker {
    _dir: TempDir,
    socket: PathBuf,
    registry: Arc<MemoryRegistry>,
    handle: BrokerHandle,
}

impl TestBroker {
    async fn start(registry: MemoryRegistry, policy: UnauthenticatedPolicy) -> Self {
        let store = Arc::new(MemorySettingsStore::new(SessionCounts::new(1, 1)));
        Self::start_with_store(registry, policy, store).await
    }

    async fn start_with_store(
        registry: MemoryRegistry,
        policy: UnauthenticatedPolicy,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("taskgate.sock");
        let registry = Arc::new(registry);

        let counts = store.load();
        let config = BrokerConfig::new(&socket, client_keys().public.clone(), store)
            .with_policy(policy)
            .with_workers(4)
            .with_sessions(counts.clients, counts.servers);

        let handle = Broker::new(config, registry.clone())
            .start()
            .await
            .expect("broker failed to start");

        Self {
            _dir: dir,
            socket,
            registry,
            handle,
        }
    }

    async fn connect(&self) -> BrokerClient {
        timeout(STEP, BrokerClient::connect_unix(&self.socket, trusted()))
            .await
            .expect("connect timed out")
            .expect("connect failed")
    }

    async fn stop(self) {
        self.handle.shutdown();
        timeout(STEP, self.handle.wait())
            .await
            .expect("shutdown timed out")
            .expect("broker failed");
    }
}

async fn request(client: &mut BrokerClient, command: &RpcCommand) -> RpcResponse {
    timeout(STEP, client.request(command))
        .await
        .expect("request timed out")
        .expect("request failed")
}

#[tokio::test]
async fn test_round_trip_returns_to_caller() {
    let broker = TestBroker::start(MemoryRegistry::new(), UnauthenticatedPolicy::Reject).await;

    let mut callers = Vec::new();
    for n in 0..6 {
        let mut client = broker.connect().await;
        callers.push(tokio::spawn(async move {
            for i in 0..10 {
                let cookie = format!("caller-{}-{}", n, i);
                let command = RpcCommand::new(CommandKind::ListServerContracts, 1)
                    .with_cookie(cookie.clone())
                    .with_params(serde_json::json!({ "n": n, "i": i }));
                let response = request(&mut client, &command).await;
                assert_eq!(response.cookie, cookie);
                assert_eq!(response.payload, serde_json::json!({ "n": n, "i": i }));
            }
        }));
    }

    for caller in callers {
        caller.await.unwrap();
    }
    assert_eq!(broker.registry.executed(), 60);
    broker.stop().await;
}

#[tokio::test]
async fn test_reply_payload_is_byte_identical() {
    let broker = TestBroker::start(MemoryRegistry::new(), UnauthenticatedPolicy::Reject).await;
    let mut client = broker.connect().await;

    let command = RpcCommand::new(CommandKind::GetNym, 0)
        .with_cookie("exact")
        .with_params(serde_json::json!({ "nym": "N1", "detail": [1, 2, 3] }));
    let expected = RpcResponse::ok(&command)
        .with_payload(command.params.clone())
        .encode()
        .unwrap();

    client
        .send_raw(Multipart::new().with(Bytes::new()).with(command.encode().unwrap()))
        .await
        .unwrap();
    let Incoming::Reply(reply) = timeout(STEP, client.recv()).await.unwrap().unwrap() else {
        panic!("expected a reply");
    };

    assert_eq!(reply, Multipart::new().with(Bytes::new()).with(expected));
    broker.stop().await;
}

#[tokio::test]
async fn test_invalid_command_gets_error_reply() {
    let broker = TestBroker::start(MemoryRegistry::new(), UnauthenticatedPolicy::Reject).await;
    let mut client = broker.connect().await;

    client
        .send_raw(Multipart::new().with(Bytes::new()).with("{not json"))
        .await
        .unwrap();
    let Incoming::Reply(reply) = timeout(STEP, client.recv()).await.unwrap().unwrap() else {
        panic!("expected a reply");
    };
    assert_eq!(reply.len(), 2);

    let response = RpcResponse::decode(reply.get(1).unwrap()).unwrap();
    assert_eq!(response.kind, CommandKind::Error);
    assert_eq!(response.status, RpcStatus::Failed);
    assert_eq!(broker.registry.executed(), 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_task_completion_pushed_to_owner_connection() {
    let broker = TestBroker::start(MemoryRegistry::new(), UnauthenticatedPolicy::Reject).await;
    let mut client = broker.connect().await;
    let mut bystander = broker.connect().await;

    let command = RpcCommand::new(CommandKind::SendPayment, 0).with_owner("N1");
    let response = request(&mut client, &command).await;
    assert_eq!(response.status, RpcStatus::Queued);
    let task = TaskId::new(response.task.unwrap());
    assert!(broker.handle.state().correlator.contains(&task));

    broker.registry.complete_task(0, &task, true).unwrap();

    let push = timeout(STEP, client.next_push()).await.unwrap().unwrap();
    assert_eq!(push.push_type, PushType::TaskComplete);
    assert_eq!(push.id, "N1");
    assert_eq!(push.task.id, task);
    assert!(push.task.result);
    assert!(!broker.handle.state().correlator.contains(&task));

    // Nobody else hears about it, and a duplicate event changes nothing
    broker.registry.complete_task(0, &task, true).unwrap();
    let ping = RpcCommand::new(CommandKind::ListNyms, 0).with_cookie("ping");
    assert_eq!(request(&mut client, &ping).await.cookie, "ping");
    assert_eq!(request(&mut bystander, &ping).await.cookie, "ping");
    assert_eq!(client.buffered_pushes(), 0);
    assert_eq!(bystander.buffered_pushes(), 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_task_finished_before_registration_pushed_once() {
    let broker = TestBroker::start(
        MemoryRegistry::with_instant_completion(false),
        UnauthenticatedPolicy::Reject,
    )
    .await;
    let mut client = broker.connect().await;

    let command = RpcCommand::new(CommandKind::MoveFunds, 0).with_owner("N7");
    let response = request(&mut client, &command).await;
    let task = TaskId::new(response.task.unwrap());

    let push = timeout(STEP, client.next_push()).await.unwrap().unwrap();
    assert_eq!(push.task.id, task);
    assert!(!push.task.result);
    assert_eq!(broker.registry.task_status(0, &task).await, TaskStatus::Failed);

    // A request round trip later, still only the one push
    let ping = RpcCommand::new(CommandKind::ListNyms, 0);
    request(&mut client, &ping).await;
    assert_eq!(client.buffered_pushes(), 0);
    assert_eq!(broker.handle.state().correlator.pending_count(), 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_unresolved_task_stays_pending() {
    let broker = TestBroker::start(MemoryRegistry::new(), UnauthenticatedPolicy::Reject).await;
    let mut client = broker.connect().await;

    for _ in 0..3 {
        let command = RpcCommand::new(CommandKind::RegisterNym, 0).with_owner("N1");
        request(&mut client, &command).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.handle.state().correlator.pending_count(), 3);

    broker.stop().await;
}

#[tokio::test]
async fn test_empty_message_gets_no_reply() {
    let broker = TestBroker::start(MemoryRegistry::new(), UnauthenticatedPolicy::Reject).await;
    let mut client = broker.connect().await;

    client.send_raw(Multipart::new().with(Bytes::new())).await.unwrap();
    client.send_raw(Multipart::new().with("no-delimiter")).await.unwrap();

    // The next reply belongs to the real request
    let command = RpcCommand::new(CommandKind::ListNyms, 0).with_cookie("after");
    assert_eq!(request(&mut client, &command).await.cookie, "after");
    assert_eq!(broker.registry.executed(), 1);
    assert_eq!(broker.handle.state().correlator.pending_count(), 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_wrong_key_rejected() {
    let broker = TestBroker::start(MemoryRegistry::new(), UnauthenticatedPolicy::Reject).await;

    let result = BrokerClient::connect_unix(&broker.socket, stranger()).await;
    match result {
        Err(BrokerError::Rejected { status, reason }) => {
            assert_eq!(status, "400");
            assert_eq!(reason, "Incorrect pubkey");
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("wrong key admitted"),
    }

    broker.stop().await;
}

#[tokio::test]
async fn test_trusted_key_without_private_half_rejected() {
    let broker = TestBroker::start(MemoryRegistry::new(), UnauthenticatedPolicy::Admit).await;

    // Claims the trusted public key but signs with another key
    let impostor = KeyPair {
        private: KeyPair::generate().unwrap().private,
        public: client_keys().public.clone(),
    };
    let result =
        BrokerClient::connect_unix(&broker.socket, Credentials::Curve(impostor)).await;
    match result {
        Err(BrokerError::Rejected { status, reason }) => {
            assert_eq!(status, "400");
            assert_eq!(reason, "Invalid key proof");
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("peer admitted without the private key"),
    }
    assert_eq!(broker.handle.connection_count(), 0);

    // The real holder still gets in
    let mut client = broker.connect().await;
    let command = RpcCommand::new(CommandKind::ListNyms, 0).with_cookie("owner");
    assert_eq!(request(&mut client, &command).await.cookie, "owner");

    broker.stop().await;
}

#[tokio::test]
async fn test_unauthenticated_rejected_by_default() {
    let broker = TestBroker::start(MemoryRegistry::new(), UnauthenticatedPolicy::Reject).await;

    let result = BrokerClient::connect_unix(&broker.socket, Credentials::Null).await;
    assert!(matches!(
        result,
        Err(BrokerError::Rejected { reason, .. }) if reason == "Unsupported mechanism"
    ));

    broker.stop().await;
}

#[tokio::test]
async fn test_unauthenticated_admitted_when_configured() {
    let broker = TestBroker::start(MemoryRegistry::new(), UnauthenticatedPolicy::Admit).await;

    let mut client = timeout(STEP, BrokerClient::connect_unix(&broker.socket, Credentials::Null))
        .await
        .unwrap()
        .unwrap();
    let command = RpcCommand::new(CommandKind::ListNyms, 0).with_cookie("open");
    assert_eq!(request(&mut client, &command).await.cookie, "open");

    // Key checks still apply to CURVE peers
    let result = BrokerClient::connect_unix(&broker.socket, stranger()).await;
    assert!(matches!(result, Err(BrokerError::Rejected { .. })));

    broker.stop().await;
}

#[tokio::test]
async fn test_tcp_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = BrokerConfig::new(
        dir.path().join("taskgate.sock"),
        client_keys().public.clone(),
        Arc::new(MemorySettingsStore::default()),
    )
    .with_endpoint("tcp://127.0.0.1:0")
    .with_workers(2)
    .with_sessions(1, 0);
    let handle = Broker::new(config, Arc::new(MemoryRegistry::new()))
        .start()
        .await
        .unwrap();

    let address = handle.local_addresses()[1].clone();
    let mut client = timeout(STEP, BrokerClient::connect_tcp(&address, trusted()))
        .await
        .unwrap()
        .unwrap();
    let command = RpcCommand::new(CommandKind::ListNyms, 0).with_cookie("tcp");
    assert_eq!(request(&mut client, &command).await.cookie, "tcp");

    handle.shutdown();
    timeout(STEP, handle.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_new_client_session_persisted_and_listened_to() {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("agent.toml");
    let base = AgentSettings {
        clients: 1,
        servers: 1,
        ..AgentSettings::default()
    };
    let store = Arc::new(TomlSettingsStore::new(&settings_path, base));
    store.save(&SessionCounts::new(1, 1)).unwrap();
    let broker = TestBroker::start_with_store(
        MemoryRegistry::new(),
        UnauthenticatedPolicy::Reject,
        store.clone(),
    )
    .await;
    let mut client = broker.connect().await;

    let response = request(&mut client, &RpcCommand::new(CommandKind::AddClientSession, -1)).await;
    assert_eq!(response.status, RpcStatus::Ok);
    assert_eq!(response.session, 2);
    assert_eq!(store.load(), SessionCounts::new(2, 1));

    let response = request(&mut client, &RpcCommand::new(CommandKind::AddServerSession, -1)).await;
    assert_eq!(response.session, 3);
    assert_eq!(store.load(), SessionCounts::new(2, 2));

    // Completions of the new session reach the caller
    let command = RpcCommand::new(CommandKind::IssueUnitDefinition, 2).with_owner("N2");
    let response = request(&mut client, &command).await;
    let task = TaskId::new(response.task.unwrap());
    broker.registry.complete_task(1, &task, true).unwrap();

    let push = timeout(STEP, client.next_push()).await.unwrap().unwrap();
    assert_eq!(push.id, "N2");

    broker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_session_creation_counts_every_session() {
    let store = Arc::new(MemorySettingsStore::new(SessionCounts::new(1, 0)));
    let broker = TestBroker::start_with_store(
        MemoryRegistry::new(),
        UnauthenticatedPolicy::Reject,
        store.clone(),
    )
    .await;

    let mut creators = Vec::new();
    for _ in 0..8 {
        let mut client = broker.connect().await;
        creators.push(tokio::spawn(async move {
            for _ in 0..4 {
                let command = RpcCommand::new(CommandKind::AddClientSession, -1);
                let response = request(&mut client, &command).await;
                assert_eq!(response.status, RpcStatus::Ok);
            }
        }));
    }
    for creator in creators {
        creator.await.unwrap();
    }

    assert_eq!(store.load().clients, 33);
    assert_eq!(broker.handle.state().sessions.client_count(), 33);
    assert_eq!(broker.registry.client_count(), 33);

    broker.stop().await;
}

/// Registry that reports queued tasks on a server session
struct MisroutingRegistry;

#[async_trait::async_trait]
impl SessionRegistry for MisroutingRegistry {
    async fn start_session(
        &self,
        _kind: SessionKind,
        _index: usize,
    ) -> Result<(), tg_core::RegistryError> {
        Ok(())
    }

    fn completion_endpoint(
        &self,
        _client_index: usize,
    ) -> Result<tg_core::CompletionEndpoint, tg_core::RegistryError> {
        let (_tx, rx) = tokio::sync::broadcast::channel(1);
        Ok(rx)
    }

    async fn task_status(&self, _client_index: usize, _task: &TaskId) -> TaskStatus {
        TaskStatus::Running
    }

    async fn execute(&self, command: RpcCommand) -> RpcResponse {
        let mut response = RpcResponse::queued(&command, "T1");
        response.session = 1;
        response
    }
}

#[tokio::test]
async fn test_queued_on_server_session_stops_broker() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("taskgate.sock");
    let config = BrokerConfig::new(&socket, client_keys().public.clone(), Arc::new(MemorySettingsStore::default()))
        .with_workers(2)
        .with_sessions(1, 1);
    let cancel = tokio_util::sync::CancellationToken::new();
    let broker = tokio::spawn(Broker::new(config, Arc::new(MisroutingRegistry)).run(cancel));

    let mut client = None;
    for _ in 0..50 {
        match BrokerClient::connect_unix(&socket, trusted()).await {
            Ok(connected) => {
                client = Some(connected);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut client = client.expect("broker never came up");

    client
        .send_raw(
            Multipart::new()
                .with(Bytes::new())
                .with(RpcCommand::new(CommandKind::SendPayment, 0).encode().unwrap()),
        )
        .await
        .unwrap();

    let result = timeout(STEP, broker).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(BrokerError::InvalidClientSession { session: 1 })
    ));
}
