// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service Integration Tests
//!
//! Drive a full service over the in-process transport:
//! - SI-01: door command round trips (lock, unlock, unknown door, bad action)
//! - SI-02: unmatched sinks are dropped silently
//! - SI-03: startup bootstrap and bridge handoff
//! - SI-04: shutdown ordering and reclamation
//! - SI-05: connect failure aborts startup

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use ustreamer_service::door::METHOD_EXECUTE_DOOR_COMMAND;
use ustreamer_service::{
    BridgeEngine, BridgeState, ConnectionHandle, Door, DoorAction, DoorCommand, EngineError,
    HandlerMap, LocalSubscriptionRegistry, LocalTransport, MonitorEngine, RequestRouter,
    ServiceConfig, SubscriptionHandle, UCode, UEntity, UListener, UMessage, UMessageType,
    UStatus, UStreamerService, UTransport, UUri,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    service: UStreamerService,
    transport: Arc<LocalTransport>,
    registry: Arc<LocalSubscriptionRegistry>,
    responses: Arc<Mutex<Vec<UMessage>>>,
    events: Arc<Mutex<Vec<UMessage>>>,
}

fn client() -> UUri {
    UUri::for_entity(UEntity::new("client.test", 1))
}

fn collector() -> (Arc<dyn UListener>, Arc<Mutex<Vec<UMessage>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn UListener> = Arc::new(move |m: UMessage| sink.lock().push(m));
    (listener, seen)
}

async fn started(config: ServiceConfig, engine: Arc<dyn BridgeEngine>) -> Harness {
    let transport = Arc::new(LocalTransport::new(config.entity()));
    let registry = Arc::new(LocalSubscriptionRegistry::new());
    let service = UStreamerService::new(config, transport.clone(), registry.clone(), engine);
    service.start().await.expect("start");

    let (listener, responses) = collector();
    transport
        .register_listener(&client(), listener)
        .await
        .expect("client listener");
    let (listener, events) = collector();
    for (_, topic) in service.topology().door_topics() {
        transport
            .register_listener(topic, listener.clone())
            .await
            .expect("topic listener");
    }

    Harness {
        service,
        transport,
        registry,
        responses,
        events,
    }
}

async fn default_harness() -> Harness {
    let config = ServiceConfig::default();
    let engine = Arc::new(MonitorEngine::new(
        config.bridge.engine_topic_uris().expect("engine topics"),
    ));
    started(config, engine).await
}

impl Harness {
    fn method(&self) -> UUri {
        self.service
            .topology()
            .method_uri(METHOD_EXECUTE_DOOR_COMMAND)
            .cloned()
            .expect("method")
    }

    fn send(&self, command: &DoorCommand) -> UMessage {
        let request = UMessage::request(client(), self.method(), command).expect("request");
        self.transport.send(request.clone()).expect("send");
        request
    }

    async fn wait_for(&self, responses: usize, events: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.responses.lock().len() < responses || self.events.lock().len() < events {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for traffic"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn response_for(&self, request: &UMessage) -> UStatus {
        let responses = self.responses.lock();
        let response = responses
            .iter()
            .find(|r| r.attributes.reqid == Some(request.attributes.id))
            .expect("correlated response");
        assert_eq!(response.attributes.kind, UMessageType::Response);
        response.payload.unpack().expect("status")
    }
}

/// SI-01: lock and unlock publish the new state and reply OK.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn si01_lock_and_unlock() {
    let h = default_harness().await;

    let lock = h.send(&DoorCommand::new("front_left", DoorAction::Lock));
    h.wait_for(1, 1).await;
    assert!(h.response_for(&lock).is_ok());

    let unlock = h.send(&DoorCommand::new("front_left", DoorAction::Unlock));
    h.wait_for(2, 2).await;
    assert!(h.response_for(&unlock).is_ok());

    let front_left = h
        .service
        .topology()
        .door_topic("front_left")
        .cloned()
        .expect("topic");
    let states: Vec<bool> = h
        .events
        .lock()
        .iter()
        .map(|e| {
            assert_eq!(e.source(), &front_left);
            e.payload.unpack::<Door>().expect("door").locked
        })
        .collect();
    assert_eq!(states, vec![true, false]);

    h.service.shutdown().await;
}

/// SI-01: invalid commands are answered with INVALID_ARGUMENT and publish nothing.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn si01_invalid_commands() {
    let h = default_harness().await;

    let unknown_door = h.send(&DoorCommand::new("rear_left", DoorAction::Lock));
    let bad_action = h.send(&DoorCommand {
        action: 9,
        ..DoorCommand::new("front_left", DoorAction::Lock)
    });
    h.wait_for(2, 0).await;

    let status = h.response_for(&unknown_door);
    assert_eq!(status.code, UCode::InvalidArgument);
    assert!(status.message.contains("rear_left"));
    assert_eq!(h.response_for(&bad_action).code, UCode::InvalidArgument);

    h.service.shutdown().await;
    assert!(h.events.lock().is_empty());
}

/// SI-02: a request for a method nobody registered gets no reply and no error.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn si02_unmatched_sink_is_silent() {
    let config = ServiceConfig::default();
    let transport: Arc<dyn UTransport> = Arc::new(LocalTransport::new(config.entity()));
    transport.connect().await.expect("connect");
    let (listener, responses) = collector();
    transport
        .register_listener(&client(), listener)
        .await
        .expect("client listener");

    let router = RequestRouter::spawn(Arc::new(HandlerMap::new()), Arc::downgrade(&transport), 4);
    let stranger = UUri::for_method(&config.entity(), "OpenSunroof");
    router.on_receive(UMessage::request(client(), stranger, &UStatus::ok()).expect("request"));

    let deadline = tokio::time::Instant::now() + WAIT;
    while router.stats().snapshot().unmatched == 0 {
        assert!(tokio::time::Instant::now() < deadline, "request never routed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    router.close();
    assert!(router.join(WAIT).await);

    let stats = router.stats().snapshot();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.dispatched, 0);
    assert!(responses.lock().is_empty());
}

/// SI-03: startup subscribes, creates door topics and activates the engine.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn si03_bootstrap_and_bridge() {
    let h = default_harness().await;

    let report = h.service.bootstrap_report().await.expect("report");
    assert_eq!(report.failed, 0);
    assert_eq!(report.subscribed, 1);
    assert_eq!(report.created, 2);
    for (_, topic) in h.service.topology().door_topics() {
        assert!(h.registry.has_topic(topic));
    }
    let engine_topic: UUri = "/client.test/1/resource.main#Rust".parse().expect("uri");
    assert!(h
        .registry
        .subscribers(&engine_topic)
        .contains(h.service.topology().service_uri()));

    assert!(
        h.service
            .bridge()
            .wait_for_state(BridgeState::Active, WAIT)
            .await
    );
    assert_eq!(h.transport.listener_count(&engine_topic), 1);

    h.service.shutdown().await;
    assert_eq!(h.service.bridge_state(), BridgeState::Terminated);
}

/// SI-04: shutdown unregisters methods, disconnects and terminates the bridge.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn si04_shutdown_reclaims_everything() {
    let h = default_harness().await;
    let method = h.method();
    assert_eq!(h.service.methods(), vec![method.clone()]);
    assert!(
        h.service
            .bridge()
            .wait_for_state(BridgeState::Active, WAIT)
            .await
    );

    h.service.shutdown().await;

    assert!(h.service.methods().is_empty());
    assert_eq!(h.transport.listener_count(&method), 0);
    assert_eq!(h.service.bridge_state(), BridgeState::Terminated);
    assert!(h.transport.send(UMessage::default()).is_err());

    let err = h
        .service
        .register_method(&method, Arc::new(|_m: UMessage| {}))
        .await
        .unwrap_err();
    assert_eq!(err.code, UCode::Unavailable);

    // A second shutdown is harmless.
    h.service.shutdown().await;
}

struct RefusingEngine;

impl BridgeEngine for RefusingEngine {
    fn initialize(
        &self,
        _connection: ConnectionHandle,
        _subscription: SubscriptionHandle,
    ) -> Result<String, EngineError> {
        Err(EngineError::Initialize("no native library".into()))
    }

    fn teardown(&self) -> Result<String, EngineError> {
        Ok("nothing to do".into())
    }
}

/// SI-03: an engine failure does not take the service down.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn si03_engine_failure_is_not_fatal() {
    let h = started(ServiceConfig::default(), Arc::new(RefusingEngine)).await;
    assert!(
        h.service
            .bridge()
            .wait_for_state(BridgeState::Terminated, WAIT)
            .await
    );

    let lock = h.send(&DoorCommand::new("front_right", DoorAction::Lock));
    h.wait_for(1, 1).await;
    assert!(h.response_for(&lock).is_ok());
    h.service.shutdown().await;
}

/// Transport that cannot connect.
#[derive(Default)]
struct UnreachableTransport {
    entity: UEntity,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl UnreachableTransport {
    fn new(entity: UEntity) -> Self {
        Self {
            entity,
            ..Default::default()
        }
    }
}

#[async_trait]
impl UTransport for UnreachableTransport {
    fn entity(&self) -> &UEntity {
        &self.entity
    }

    async fn connect(&self) -> Result<(), UStatus> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Err(UStatus::fail_with_code(UCode::Unavailable, "bus not reachable"))
    }

    async fn disconnect(&self) -> Result<(), UStatus> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Err(UStatus::fail_with_code(UCode::FailedPrecondition, "not connected"))
    }

    fn send(&self, _message: UMessage) -> Result<(), UStatus> {
        Err(UStatus::fail_with_code(UCode::Unavailable, "not connected"))
    }

    async fn register_listener(
        &self,
        _address: &UUri,
        _listener: Arc<dyn UListener>,
    ) -> Result<(), UStatus> {
        Err(UStatus::fail_with_code(UCode::Unavailable, "not connected"))
    }

    async fn unregister_listener(
        &self,
        _address: &UUri,
        _listener: &Arc<dyn UListener>,
    ) -> Result<(), UStatus> {
        Err(UStatus::fail_with_code(UCode::Unavailable, "not connected"))
    }
}

/// SI-05: connect failure fails start and never starts the bridge.
#[tokio::test]
async fn si05_connect_failure() {
    let config = ServiceConfig::default();
    let transport = Arc::new(UnreachableTransport::new(config.entity()));
    let service = UStreamerService::new(
        config,
        transport.clone(),
        Arc::new(LocalSubscriptionRegistry::new()),
        Arc::new(RefusingEngine),
    );

    let err = service.start().await.unwrap_err();
    assert_eq!(err.code, UCode::Unavailable);
    assert_eq!(service.bridge_state(), BridgeState::Uninitialized);
    assert!(service.methods().is_empty());

    // A failed start can be retried.
    let err = service.start().await.unwrap_err();
    assert_eq!(err.code, UCode::Unavailable);
    assert_eq!(transport.connects.load(Ordering::SeqCst), 2);

    service.shutdown().await;
    assert_eq!(service.bridge_state(), BridgeState::Terminated);
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 0);
}

/// Startup cannot run twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_twice_is_rejected() {
    let h = default_harness().await;
    let err = h.service.start().await.unwrap_err();
    assert_eq!(err.code, UCode::FailedPrecondition);
    h.service.shutdown().await;
}
