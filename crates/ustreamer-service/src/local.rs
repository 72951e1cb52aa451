// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport and subscription registry.
//!
//! Used by the `demo` subcommand and by tests. Publications are delivered to
//! listeners registered on their source topic; requests and responses to
//! listeners registered on their sink.

use crate::message::{UMessage, UMessageType};
use crate::status::{UCode, UStatus};
use crate::subscription::{
    CreateTopicRequest, RegistryError, SubscriptionRequest, SubscriptionResponse,
    SubscriptionState, USubscription,
};
use crate::transport::{same_listener, ConnectionState, UListener, UTransport};
use crate::uri::{UEntity, UUri};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// In-process [`UTransport`].
pub struct LocalTransport {
    entity: UEntity,
    listeners: RwLock<HashMap<UUri, Vec<Arc<dyn UListener>>>>,
    state: watch::Sender<ConnectionState>,
    sent: AtomicU64,
}

impl LocalTransport {
    /// Create a disconnected transport owned by `entity`.
    pub fn new(entity: UEntity) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            entity,
            listeners: RwLock::new(HashMap::new()),
            state,
            sent: AtomicU64::new(0),
        }
    }

    /// Number of listeners registered on `address`.
    pub fn listener_count(&self, address: &UUri) -> usize {
        self.listeners.read().get(address).map_or(0, Vec::len)
    }

    /// Total listener registrations.
    pub fn total_listeners(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    /// Number of envelopes accepted by [`send`](UTransport::send).
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Current link state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Mark the link as lost without a disconnect request.
    pub fn simulate_link_loss(&self) {
        self.state.send_replace(ConnectionState::Lost);
    }

    fn ensure_connected(&self) -> Result<(), UStatus> {
        if self.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(UStatus::fail_with_code(
                UCode::Unavailable,
                format!("transport for {} is not connected", self.entity.name),
            ))
        }
    }
}

#[async_trait]
impl UTransport for LocalTransport {
    fn entity(&self) -> &UEntity {
        &self.entity
    }

    async fn connect(&self) -> Result<(), UStatus> {
        self.state.send_replace(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), UStatus> {
        match self.state.send_replace(ConnectionState::Disconnected) {
            ConnectionState::Disconnected => Err(UStatus::fail_with_code(
                UCode::FailedPrecondition,
                "transport already disconnected",
            )),
            _ => Ok(()),
        }
    }

    fn send(&self, message: UMessage) -> Result<(), UStatus> {
        self.ensure_connected()?;
        let address = match message.attributes.kind {
            UMessageType::Publish => message.source().clone(),
            UMessageType::Request | UMessageType::Response => {
                message.sink().cloned().ok_or_else(|| {
                    UStatus::fail_with_code(UCode::InvalidArgument, "envelope has no sink")
                })?
            }
        };
        self.sent.fetch_add(1, Ordering::Relaxed);

        // Listeners run outside the lock so they may call back into the transport.
        let targets = self
            .listeners
            .read()
            .get(&address)
            .cloned()
            .unwrap_or_default();
        if let Some((last, rest)) = targets.split_last() {
            for listener in rest {
                listener.on_receive(message.clone());
            }
            last.on_receive(message);
        }
        Ok(())
    }

    async fn register_listener(
        &self,
        address: &UUri,
        listener: Arc<dyn UListener>,
    ) -> Result<(), UStatus> {
        self.ensure_connected()?;
        let mut listeners = self.listeners.write();
        let entry = listeners.entry(address.clone()).or_default();
        if entry.iter().any(|l| same_listener(l, &listener)) {
            return Err(UStatus::fail_with_code(
                UCode::AlreadyExists,
                format!("listener already registered on {}", address),
            ));
        }
        entry.push(listener);
        Ok(())
    }

    async fn unregister_listener(
        &self,
        address: &UUri,
        listener: &Arc<dyn UListener>,
    ) -> Result<(), UStatus> {
        self.ensure_connected()?;
        let mut listeners = self.listeners.write();
        let not_found =
            || UStatus::fail_with_code(UCode::NotFound, format!("no listener on {}", address));
        let entry = listeners.get_mut(address).ok_or_else(not_found)?;
        let position = entry
            .iter()
            .position(|l| same_listener(l, listener))
            .ok_or_else(not_found)?;
        entry.remove(position);
        if entry.is_empty() {
            listeners.remove(address);
        }
        Ok(())
    }

    fn connection_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        Some(self.state.subscribe())
    }
}

/// In-process [`USubscription`].
#[derive(Default)]
pub struct LocalSubscriptionRegistry {
    subscribers: DashMap<UUri, HashSet<UUri>>,
    topics: DashSet<UUri>,
    failure: Mutex<Option<RegistryError>>,
}

impl LocalSubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `error` (`None` restores service).
    pub fn fail_with(&self, error: Option<RegistryError>) {
        *self.failure.lock() = error;
    }

    /// Subscribers of `topic`.
    pub fn subscribers(&self, topic: &UUri) -> Vec<UUri> {
        self.subscribers
            .get(topic)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if `topic` was created.
    pub fn has_topic(&self, topic: &UUri) -> bool {
        self.topics.contains(topic)
    }

    /// Number of created topics.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    fn check_available(&self) -> Result<(), RegistryError> {
        match self.failure.lock().as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl USubscription for LocalSubscriptionRegistry {
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<SubscriptionResponse, RegistryError> {
        self.check_available()?;
        self.subscribers
            .entry(request.topic.clone())
            .or_default()
            .insert(request.subscriber.uri);
        Ok(SubscriptionResponse {
            topic: request.topic,
            state: SubscriptionState::Subscribed,
            status: UStatus::ok(),
        })
    }

    async fn create_topic(&self, request: CreateTopicRequest) -> Result<UStatus, RegistryError> {
        self.check_available()?;
        self.topics.insert(request.topic);
        Ok(UStatus::ok())
    }
}
