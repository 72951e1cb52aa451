// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process engine that watches the engine topics.

use super::{BridgeEngine, ConnectionHandle, EngineError, InboundSink, SubscriptionHandle};
use crate::message::{UMessage, UPayload};
use crate::subscription::{SubscriberInfo, SubscriptionRequest, SubscriptionResponse};
use crate::uri::UUri;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct CountingSink {
    received: AtomicU64,
}

impl InboundSink for CountingSink {
    fn deliver(&self, listener_id: u64, message: &UPayload) {
        self.received.fetch_add(1, Ordering::Relaxed);
        match message.unpack::<UMessage>() {
            Ok(envelope) => tracing::debug!(
                listener_id,
                source = %envelope.source(),
                payload_type = %envelope.payload.type_name,
                "Engine received envelope"
            ),
            Err(e) => tracing::warn!(listener_id, "Engine received undecodable envelope: {}", e),
        }
    }
}

/// Engine subscribing to a fixed topic set and counting what arrives.
pub struct MonitorEngine {
    topics: Vec<UUri>,
    sink: Arc<CountingSink>,
    session: Mutex<Option<(ConnectionHandle, Vec<u64>)>>,
}

impl MonitorEngine {
    /// Create an engine watching `topics`.
    pub fn new(topics: Vec<UUri>) -> Self {
        Self {
            topics,
            sink: Arc::new(CountingSink {
                received: AtomicU64::new(0),
            }),
            session: Mutex::new(None),
        }
    }

    /// Envelopes received so far.
    pub fn received(&self) -> u64 {
        self.sink.received.load(Ordering::Relaxed)
    }
}

impl BridgeEngine for MonitorEngine {
    fn initialize(
        &self,
        connection: ConnectionHandle,
        subscription: SubscriptionHandle,
    ) -> Result<String, EngineError> {
        let subscriber = SubscriberInfo {
            uri: UUri::for_entity(connection.entity().clone()),
        };
        let mut listener_ids = Vec::with_capacity(self.topics.len());

        for (id, topic) in (0u64..).zip(&self.topics) {
            let request = SubscriptionRequest {
                topic: topic.clone(),
                subscriber: subscriber.clone(),
            };
            let reply = subscription.subscribe(&UPayload::pack(&request)?)?;
            let reply: SubscriptionResponse = reply.unpack()?;
            tracing::debug!(%topic, state = ?reply.state, "Engine subscription");

            connection.register_listener(&UPayload::pack(topic)?, id, self.sink.clone())?;
            listener_ids.push(id);
        }

        let count = listener_ids.len();
        *self.session.lock() = Some((connection, listener_ids));
        Ok(format!("monitor engine listening on {} topic(s)", count))
    }

    fn teardown(&self) -> Result<String, EngineError> {
        let session = self.session.lock().take();
        if let Some((connection, listener_ids)) = session {
            for id in listener_ids {
                if let Err(e) = connection.unregister_listener(id) {
                    tracing::debug!(listener_id = id, "Engine listener already gone: {}", e);
                }
            }
        }
        Ok(format!(
            "monitor engine received {} envelope(s)",
            self.received()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalSubscriptionRegistry, LocalTransport};
    use crate::transport::UTransport;
    use crate::uri::UEntity;
    use tokio::runtime::Runtime;

    #[test]
    fn counts_envelopes_on_engine_topics() {
        let runtime = Runtime::new().expect("runtime");
        let transport = Arc::new(LocalTransport::new(UEntity::new("example.streamer", 1)));
        runtime.block_on(transport.connect()).expect("connect");
        let registry = Arc::new(LocalSubscriptionRegistry::new());

        let topic: UUri = "/client.test/1/resource.main#Rust".parse().expect("uri");
        let engine = MonitorEngine::new(vec![topic.clone()]);
        let text = engine
            .initialize(
                ConnectionHandle::new(transport.clone(), runtime.handle().clone()),
                SubscriptionHandle::new(registry.clone(), runtime.handle().clone()),
            )
            .expect("initialize");
        assert!(text.contains("1 topic"));
        assert_eq!(registry.subscribers(&topic).len(), 1);

        for _ in 0..3 {
            let event = UMessage::publish(topic.clone(), &topic).expect("publish");
            transport.send(event).expect("send");
        }
        assert_eq!(engine.received(), 3);

        let text = engine.teardown().expect("teardown");
        assert!(text.contains("3 envelope"));
        assert_eq!(transport.listener_count(&topic), 0);
    }
}
