// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service orchestration.
//!
//! Startup: connect, bootstrap subscriptions and topics, start the bridge,
//! register the advertised methods. Shutdown runs the reverse stages, each
//! best-effort: stop the executor and the router, unregister methods,
//! disconnect, tear the bridge down.

use crate::bootstrap::{self, BootstrapReport};
use crate::bridge::{
    BridgeEngine, BridgeLifecycle, BridgeState, ConnectionHandle, SubscriptionHandle,
};
use crate::config::{ServiceConfig, ServiceTopology};
use crate::dispatch::{HandlerMap, MethodDispatchTable, RequestHandler};
use crate::door::{DoorCommandHandler, METHOD_EXECUTE_DOOR_COMMAND};
use crate::executor::SerialExecutor;
use crate::router::{RequestRouter, RouterStatsSnapshot};
use crate::status::{log_status, UCode, UStatus};
use crate::subscription::USubscription;
use crate::transport::{ConnectionState, UListener, UTransport};
use crate::uri::UUri;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The streamer service.
pub struct UStreamerService {
    config: ServiceConfig,
    topology: Arc<ServiceTopology>,
    transport: Arc<dyn UTransport>,
    registry: Arc<dyn USubscription>,
    executor: Arc<SerialExecutor>,
    router: Arc<RequestRouter>,
    table: Arc<MethodDispatchTable>,
    bridge: Arc<BridgeLifecycle>,
    started: AtomicBool,
    connection_monitor: Mutex<Option<JoinHandle<()>>>,
    bootstrap: Mutex<Option<JoinHandle<BootstrapReport>>>,
}

impl UStreamerService {
    /// Build the service around its collaborators.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn new(
        config: ServiceConfig,
        transport: Arc<dyn UTransport>,
        registry: Arc<dyn USubscription>,
        engine: Arc<dyn BridgeEngine>,
    ) -> Self {
        let topology = Arc::new(ServiceTopology::from_config(&config));
        let executor = Arc::new(SerialExecutor::spawn(format!("{}-executor", config.name)));
        let handlers = Arc::new(HandlerMap::new());
        let router = RequestRouter::spawn(
            handlers.clone(),
            Arc::downgrade(&transport),
            config.inbound_queue_capacity,
        );
        let listener: Arc<dyn UListener> = router.clone();
        let table = Arc::new(MethodDispatchTable::new(
            transport.clone(),
            listener,
            handlers,
        ));
        let bridge = BridgeLifecycle::new(engine, config.bridge.teardown_timeout());

        Self {
            config,
            topology,
            transport,
            registry,
            executor,
            router,
            table,
            bridge,
            started: AtomicBool::new(false),
            connection_monitor: Mutex::new(None),
            bootstrap: Mutex::new(None),
        }
    }

    /// Connect and bring the service up.
    ///
    /// Only a connect failure fails startup; bootstrap, bridge and method
    /// registration failures are logged.
    pub async fn start(&self) -> Result<(), UStatus> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(UStatus::fail_with_code(
                UCode::FailedPrecondition,
                "service already started",
            ));
        }

        let service_uri = self.topology.service_uri();
        let connected = self.transport.connect().await;
        log_status("connect", &connected, Some(service_uri));
        if let Err(e) = connected {
            // Never connected: allow a retry and skip disconnect at shutdown.
            self.started.store(false, Ordering::Release);
            return Err(e);
        }

        self.spawn_connection_monitor();

        let subscriptions = self.config.subscription_uris().unwrap_or_else(|e| {
            tracing::error!("Skipping startup subscriptions: {}", e);
            Vec::new()
        });
        let topics = self.topology.door_topics().map(|(_, t)| t.clone()).collect();
        *self.bootstrap.lock() = Some(bootstrap::spawn(
            self.registry.clone(),
            service_uri.clone(),
            subscriptions,
            topics,
        ));

        if self.config.bridge.enabled {
            let runtime = Handle::current();
            let connection = ConnectionHandle::new(self.transport.clone(), runtime.clone());
            let subscription = SubscriptionHandle::new(self.registry.clone(), runtime);
            if let Err(e) = self.bridge.start(connection, subscription) {
                tracing::error!("initializeStreamer: {}", e);
            }
        }

        for (name, address) in self.topology.method_uris() {
            let Some(handler) = self.handler_for(name) else {
                tracing::warn!("No handler for advertised method '{}'", name);
                continue;
            };
            // Already logged by the dispatch table.
            let _ = self.register_method(address, handler).await;
        }

        tracing::info!(
            "Service '{}' started ({} method(s))",
            self.config.name,
            self.table.handlers().len()
        );
        Ok(())
    }

    fn handler_for(&self, method: &str) -> Option<Arc<dyn RequestHandler>> {
        match method {
            METHOD_EXECUTE_DOOR_COMMAND => Some(Arc::new(DoorCommandHandler::new(
                self.topology.clone(),
                Arc::downgrade(&self.transport),
                self.executor.clone(),
            ))),
            _ => None,
        }
    }

    fn spawn_connection_monitor(&self) {
        let Some(mut rx) = self.transport.connection_state() else {
            return;
        };
        let name = self.config.name.clone();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => tracing::info!("{}: connected", name),
                    ConnectionState::Lost => {
                        tracing::warn!("{}: unexpectedly disconnected", name)
                    }
                    ConnectionState::Disconnected => tracing::debug!("{}: disconnected", name),
                }
            }
        });
        *self.connection_monitor.lock() = Some(task);
    }

    /// Register `handler` for `address` on the service executor.
    pub async fn register_method(
        &self,
        address: &UUri,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), UStatus> {
        let table = self.table.clone();
        let address = address.clone();
        self.executor
            .submit(async move { table.register(&address, handler).await })
            .await?
    }

    /// Unregister `address` on the service executor.
    pub async fn unregister_method(&self, address: &UUri) -> Result<(), UStatus> {
        let table = self.table.clone();
        let address = address.clone();
        self.executor
            .submit(async move { table.unregister(&address).await })
            .await?
    }

    /// Stop the service. Every stage runs even if an earlier one failed.
    pub async fn shutdown(&self) {
        tracing::info!("Service '{}' shutting down", self.config.name);

        self.executor.shutdown();
        self.router.close();
        if !self.executor.join(DRAIN_TIMEOUT).await {
            tracing::warn!("Executor still busy, continuing shutdown");
        }

        // The executor is gone; unregister directly.
        for address in self.table.handlers().addresses() {
            let _ = self.table.unregister(&address).await;
        }

        if self.started.load(Ordering::Acquire) {
            let disconnected = self.transport.disconnect().await;
            log_status("disconnect", &disconnected, Some(self.topology.service_uri()));
        }

        self.bridge.teardown().await;

        if let Some(task) = self.connection_monitor.lock().take() {
            task.abort();
        }
        if let Some(task) = self.bootstrap.lock().take() {
            task.abort();
        }
        if !self.router.join(DRAIN_TIMEOUT).await {
            tracing::warn!("Request router did not stop in time");
        }
        tracing::info!("Service '{}' stopped", self.config.name);
    }

    /// Wait for the startup bootstrap to finish.
    pub async fn bootstrap_report(&self) -> Option<BootstrapReport> {
        let task = self.bootstrap.lock().take()?;
        task.await.ok()
    }

    /// Service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Address tables.
    pub fn topology(&self) -> &Arc<ServiceTopology> {
        &self.topology
    }

    /// Router counters.
    pub fn router_stats(&self) -> RouterStatsSnapshot {
        self.router.stats().snapshot()
    }

    /// Bridge lifecycle.
    pub fn bridge(&self) -> &Arc<BridgeLifecycle> {
        &self.bridge
    }

    /// Bridge state.
    pub fn bridge_state(&self) -> BridgeState {
        self.bridge.state()
    }

    /// Registered method addresses.
    pub fn methods(&self) -> Vec<UUri> {
        self.table.handlers().addresses()
    }
}
