// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Method dispatch table.
//!
//! Maps method addresses to handlers. Reads happen on the delivery path and
//! must stay cheap, so the map is a copy-on-write snapshot behind an
//! `ArcSwap`: a lookup is an atomic load plus a hash probe, never a lock.
//! Writers build a new map and swap it in.
//!
//! Registration is two-phase: the transport-level listener is registered
//! first and the local entry is inserted only if that succeeded. Removal is
//! unconditional.

use crate::message::UMessage;
use crate::status::{log_status, UStatus};
use crate::transport::{UListener, UTransport};
use crate::uri::UUri;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// Handler bound to a method address.
///
/// Invoked synchronously by the router. Implementations must not block;
/// heavy work belongs on the service executor.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one inbound request envelope.
    fn handle(&self, request: UMessage);
}

/// A function-based request handler.
impl<F> RequestHandler for F
where
    F: Fn(UMessage) + Send + Sync + 'static,
{
    fn handle(&self, request: UMessage) {
        self(request)
    }
}

type HandlerSnapshot = HashMap<UUri, Arc<dyn RequestHandler>>;

/// Lock-free, read-mostly map from method address to handler.
pub struct HandlerMap {
    handlers: ArcSwap<HandlerSnapshot>,
}

impl Default for HandlerMap {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Look up the handler for `address`.
    pub fn lookup(&self, address: &UUri) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.load().get(address).cloned()
    }

    /// Check if `address` has a handler.
    pub fn contains(&self, address: &UUri) -> bool {
        self.handlers.load().contains_key(address)
    }

    /// Route `message` to the handler registered for its sink.
    ///
    /// Returns `false` when no handler matches; the message is dropped
    /// without error since a shared listener also sees foreign traffic.
    pub fn dispatch(&self, message: UMessage) -> bool {
        let Some(handler) = message.sink().and_then(|sink| self.lookup(sink)) else {
            tracing::trace!(source = %message.source(), "No handler for sink, dropping");
            return false;
        };
        handler.handle(message);
        true
    }

    /// Registered addresses.
    pub fn addresses(&self) -> Vec<UUri> {
        self.handlers.load().keys().cloned().collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.load().is_empty()
    }

    pub(crate) fn insert(&self, address: UUri, handler: Arc<dyn RequestHandler>) {
        self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(address.clone(), handler.clone());
            next
        });
    }

    pub(crate) fn remove(&self, address: &UUri) -> bool {
        let previous = self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(address);
            next
        });
        previous.contains_key(address)
    }
}

/// Method registrations backed by transport listeners.
///
/// Every method shares one transport listener (the request router); the
/// table decides which handler an envelope reaches.
pub struct MethodDispatchTable {
    transport: Arc<dyn UTransport>,
    listener: Arc<dyn UListener>,
    handlers: Arc<HandlerMap>,
}

impl MethodDispatchTable {
    /// Create a table that registers `listener` with `transport` per method.
    pub fn new(
        transport: Arc<dyn UTransport>,
        listener: Arc<dyn UListener>,
        handlers: Arc<HandlerMap>,
    ) -> Self {
        Self {
            transport,
            listener,
            handlers,
        }
    }

    /// Register `handler` for `address`.
    ///
    /// The local entry is inserted only after the transport listener
    /// registration succeeds; on failure the table is unchanged.
    pub async fn register(
        &self,
        address: &UUri,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), UStatus> {
        let result = self
            .transport
            .register_listener(address, self.listener.clone())
            .await;
        if result.is_ok() {
            self.handlers.insert(address.clone(), handler);
        }
        log_status("registerMethod", &result, Some(address));
        result
    }

    /// Unregister `address`.
    ///
    /// The local entry is removed whatever the transport answers.
    pub async fn unregister(&self, address: &UUri) -> Result<(), UStatus> {
        let result = self
            .transport
            .unregister_listener(address, &self.listener)
            .await;
        self.handlers.remove(address);
        log_status("unregisterMethod", &result, Some(address));
        result
    }

    /// Route `message` to its handler. See [`HandlerMap::dispatch`].
    pub fn dispatch(&self, message: UMessage) -> bool {
        self.handlers.dispatch(message)
    }

    /// Shared handler map.
    pub fn handlers(&self) -> &Arc<HandlerMap> {
        &self.handlers
    }
}
