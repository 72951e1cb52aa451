// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handles lent to the external engine.
//!
//! Every value crossing the handoff boundary is a [`UPayload`]: an
//! interpreted type name plus bytes. Handle calls are blocking and run on
//! the engine's own threads; they refuse to run from inside an async
//! context instead of stalling a runtime worker.
//!
//! # Lifetime
//!
//! Handles are cheap clones of a shared session. Once the lifecycle revokes
//! them, engine listeners are unregistered and every call fails with
//! `UNAVAILABLE`, whichever clone it goes through.

use crate::message::{UMessage, UPayload};
use crate::status::{check_argument, UCode, UStatus};
use crate::subscription::{CreateTopicRequest, SubscriptionRequest, USubscription};
use crate::transport::{UListener, UTransport};
use crate::uri::{UEntity, UUri};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Engine-side receiver of inbound envelopes.
///
/// `message` is a packed [`UMessage`]; `listener_id` is the id the engine
/// chose when registering.
pub trait InboundSink: Send + Sync + 'static {
    fn deliver(&self, listener_id: u64, message: &UPayload);
}

/// A function-based inbound sink.
impl<F> InboundSink for F
where
    F: Fn(u64, &UPayload) + Send + Sync + 'static,
{
    fn deliver(&self, listener_id: u64, message: &UPayload) {
        self(listener_id, message)
    }
}

fn revoked_status() -> UStatus {
    UStatus::fail_with_code(UCode::Unavailable, "bridge session has been revoked")
}

fn block_on<T>(
    runtime: &Handle,
    revoked: &AtomicBool,
    call: impl Future<Output = Result<T, UStatus>>,
) -> Result<T, UStatus> {
    if revoked.load(Ordering::Acquire) {
        return Err(revoked_status());
    }
    if Handle::try_current().is_ok() {
        return Err(UStatus::fail_with_code(
            UCode::FailedPrecondition,
            "bridge handles block and cannot be used from an async context",
        ));
    }
    runtime.block_on(call)
}

struct EngineListener {
    address: UUri,
    listener: Arc<dyn UListener>,
}

struct ConnectionSession {
    transport: Arc<dyn UTransport>,
    runtime: Handle,
    revoked: AtomicBool,
    listeners: DashMap<u64, EngineListener>,
}

/// Live transport connection lent to the engine.
#[derive(Clone)]
pub struct ConnectionHandle {
    session: Arc<ConnectionSession>,
}

impl ConnectionHandle {
    /// Wrap `transport`; blocking calls are driven on `runtime`.
    pub fn new(transport: Arc<dyn UTransport>, runtime: Handle) -> Self {
        Self {
            session: Arc::new(ConnectionSession {
                transport,
                runtime,
                revoked: AtomicBool::new(false),
                listeners: DashMap::new(),
            }),
        }
    }

    /// Entity owning the connection.
    pub fn entity(&self) -> &UEntity {
        self.session.transport.entity()
    }

    /// Send a packed [`UMessage`].
    pub fn send(&self, message: &UPayload) -> Result<(), UStatus> {
        if self.is_revoked() {
            return Err(revoked_status());
        }
        let message: UMessage = message.unpack()?;
        self.session.transport.send(message)
    }

    /// Route envelopes for `address` (a packed [`UUri`]) to `sink` under `listener_id`.
    pub fn register_listener(
        &self,
        address: &UPayload,
        listener_id: u64,
        sink: Arc<dyn InboundSink>,
    ) -> Result<(), UStatus> {
        let address: UUri = address.unpack()?;
        check_argument(
            !address.entity.name.is_empty(),
            "listener address has no entity",
        )?;

        let listener: Arc<dyn UListener> = Arc::new(move |message: UMessage| {
            match UPayload::pack(&message) {
                Ok(packed) => sink.deliver(listener_id, &packed),
                Err(e) => tracing::warn!(listener_id, "Failed to marshal inbound envelope: {}", e),
            }
        });

        let session = &self.session;
        match session.listeners.entry(listener_id) {
            Entry::Occupied(_) => {
                return Err(UStatus::fail_with_code(
                    UCode::AlreadyExists,
                    format!("listener id {} is already registered", listener_id),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(EngineListener {
                    address: address.clone(),
                    listener: listener.clone(),
                });
            }
        }

        let result = block_on(
            &session.runtime,
            &session.revoked,
            session.transport.register_listener(&address, listener),
        );
        if result.is_err() {
            session.listeners.remove(&listener_id);
        }
        result
    }

    /// Remove the listener registered under `listener_id`.
    pub fn unregister_listener(&self, listener_id: u64) -> Result<(), UStatus> {
        let session = &self.session;
        let (_, entry) = session.listeners.remove(&listener_id).ok_or_else(|| {
            UStatus::fail_with_code(
                UCode::NotFound,
                format!("no listener with id {}", listener_id),
            )
        })?;
        block_on(
            &session.runtime,
            &session.revoked,
            session
                .transport
                .unregister_listener(&entry.address, &entry.listener),
        )
    }

    /// Number of engine listeners currently registered.
    pub fn listener_count(&self) -> usize {
        self.session.listeners.len()
    }

    /// Check if the session was revoked.
    pub fn is_revoked(&self) -> bool {
        self.session.revoked.load(Ordering::Acquire)
    }

    /// Revoke the session and unregister every engine listener (best-effort).
    pub(crate) async fn revoke(&self) {
        if self.session.revoked.swap(true, Ordering::AcqRel) {
            return;
        }
        let ids: Vec<u64> = self.session.listeners.iter().map(|e| *e.key()).collect();
        for id in ids {
            let Some((_, entry)) = self.session.listeners.remove(&id) else {
                continue;
            };
            if let Err(e) = self
                .session
                .transport
                .unregister_listener(&entry.address, &entry.listener)
                .await
            {
                tracing::warn!(
                    listener_id = id,
                    uri = %entry.address,
                    "Failed to reclaim engine listener: {}",
                    e
                );
            }
        }
        tracing::debug!("Bridge connection handle revoked");
    }
}

struct SubscriptionSession {
    registry: Arc<dyn USubscription>,
    runtime: Handle,
    revoked: AtomicBool,
}

/// Subscription registry proxy lent to the engine.
#[derive(Clone)]
pub struct SubscriptionHandle {
    session: Arc<SubscriptionSession>,
}

impl SubscriptionHandle {
    /// Wrap `registry`; blocking calls are driven on `runtime`.
    pub fn new(registry: Arc<dyn USubscription>, runtime: Handle) -> Self {
        Self {
            session: Arc::new(SubscriptionSession {
                registry,
                runtime,
                revoked: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe with a packed [`SubscriptionRequest`]; returns a packed
    /// [`SubscriptionResponse`](crate::subscription::SubscriptionResponse).
    pub fn subscribe(&self, request: &UPayload) -> Result<UPayload, UStatus> {
        let request: SubscriptionRequest = request.unpack()?;
        let session = &self.session;
        let response = block_on(&session.runtime, &session.revoked, async {
            session.registry.subscribe(request).await.map_err(UStatus::from)
        })?;
        UPayload::pack(&response)
    }

    /// Create a topic from a packed [`CreateTopicRequest`].
    pub fn create_topic(&self, request: &UPayload) -> Result<(), UStatus> {
        let request: CreateTopicRequest = request.unpack()?;
        let session = &self.session;
        block_on(&session.runtime, &session.revoked, async {
            match session.registry.create_topic(request).await {
                Ok(status) => status.into_result(),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Check if the session was revoked.
    pub fn is_revoked(&self) -> bool {
        self.session.revoked.load(Ordering::Acquire)
    }

    pub(crate) fn revoke(&self) {
        self.session.revoked.store(true, Ordering::Release);
    }
}
