// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport client capability.
//!
//! The service is written against [`UTransport`] only, so a native-bridge
//! backed client or the in-process [`LocalTransport`](crate::local::LocalTransport)
//! can be substituted without touching routing logic.
//!
//! # Listener contract
//!
//! Listeners are invoked from a context owned by the transport. They must be
//! cheap and must not block: a slow listener stalls delivery for every
//! address, not just its own.

use crate::message::UMessage;
use crate::status::UStatus;
use crate::uri::{UEntity, UUri};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// Callback receiving inbound envelopes for a registered address.
pub trait UListener: Send + Sync {
    /// Called once per inbound envelope.
    fn on_receive(&self, message: UMessage);
}

/// A function-based listener.
impl<F> UListener for F
where
    F: Fn(UMessage) + Send + Sync,
{
    fn on_receive(&self, message: UMessage) {
        self(message)
    }
}

/// Link state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected or cleanly disconnected.
    #[default]
    Disconnected,
    /// Connected and ready.
    Connected,
    /// Link lost without a disconnect request.
    Lost,
}

/// Connection to the pub/sub fabric.
#[async_trait]
pub trait UTransport: Send + Sync {
    /// Identity of the local entity owning this connection.
    fn entity(&self) -> &UEntity;

    /// Establish the connection.
    async fn connect(&self) -> Result<(), UStatus>;

    /// Tear the connection down.
    async fn disconnect(&self) -> Result<(), UStatus>;

    /// Hand an envelope to the fabric. Must not wait on the network.
    fn send(&self, message: UMessage) -> Result<(), UStatus>;

    /// Register `listener` for envelopes addressed to `address`.
    async fn register_listener(
        &self,
        address: &UUri,
        listener: Arc<dyn UListener>,
    ) -> Result<(), UStatus>;

    /// Remove a registration made with [`register_listener`](Self::register_listener).
    ///
    /// Listeners are matched by identity (same `Arc` allocation).
    async fn unregister_listener(
        &self,
        address: &UUri,
        listener: &Arc<dyn UListener>,
    ) -> Result<(), UStatus>;

    /// Link-state notifications, if the transport reports them.
    fn connection_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        None
    }
}

/// Compare two listeners by allocation identity.
pub fn same_listener(a: &Arc<dyn UListener>, b: &Arc<dyn UListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
