// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request router.
//!
//! The router is the single listener bound to the transport for every
//! advertised method. Delivery happens on a transport-owned context, so
//! `on_receive` only enqueues into a bounded channel; a dedicated consumer
//! task drains the channel and dispatches through the [`HandlerMap`].

use crate::dispatch::HandlerMap;
use crate::message::UMessage;
use crate::status::{UCode, UStatus};
use crate::transport::{UListener, UTransport};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Router counters.
#[derive(Debug)]
pub struct RouterStats {
    /// Envelopes handed to the router by the transport.
    pub received: AtomicU64,
    /// Envelopes that reached a handler.
    pub dispatched: AtomicU64,
    /// Envelopes dropped because no handler matched their sink.
    pub unmatched: AtomicU64,
    /// Requests answered with an error because they could not be queued
    /// (`RESOURCE_EXHAUSTED` when full, `UNAVAILABLE` once closed).
    pub rejected: AtomicU64,
    /// Envelopes for foreign sinks dropped at intake.
    pub enqueue_failures: AtomicU64,
    /// Router creation time.
    pub created: Instant,
}

impl Default for RouterStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            enqueue_failures: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Get snapshot of current counters.
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of router counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub unmatched: u64,
    pub rejected: u64,
    pub enqueue_failures: u64,
    pub uptime_secs: u64,
}

impl RouterStatsSnapshot {
    /// Dispatched requests per second since creation.
    pub fn dispatch_rate(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.dispatched as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

/// Transport listener feeding the dispatch table through a bounded queue.
pub struct RequestRouter {
    handlers: Arc<HandlerMap>,
    queue: mpsc::Sender<UMessage>,
    accepting: AtomicBool,
    // Weak: the transport holds this router as a listener.
    transport: Weak<dyn UTransport>,
    stats: Arc<RouterStats>,
    stop: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RequestRouter {
    /// Create the router and spawn its consumer task on the current runtime.
    ///
    /// `capacity` bounds the inbound queue (minimum 1).
    pub fn spawn(
        handlers: Arc<HandlerMap>,
        transport: Weak<dyn UTransport>,
        capacity: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(RouterStats::new());
        let stop = Arc::new(Notify::new());

        let worker = tokio::spawn(run_consumer(
            rx,
            handlers.clone(),
            stats.clone(),
            stop.clone(),
        ));

        Arc::new(Self {
            handlers,
            queue: tx,
            accepting: AtomicBool::new(true),
            transport,
            stats,
            stop,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Router counters.
    pub fn stats(&self) -> &Arc<RouterStats> {
        &self.stats
    }

    /// Check if the router still accepts inbound envelopes.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop intake. Envelopes already queued are still dispatched.
    pub fn close(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            tracing::debug!("Request router closed");
            self.stop.notify_one();
        }
    }

    /// Wait up to `timeout` for the consumer task to finish after [`close`](Self::close).
    pub async fn join(&self, timeout: Duration) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return true;
        };
        tokio::time::timeout(timeout, worker).await.is_ok()
    }

    /// Answer a request that could not be queued.
    ///
    /// Only requests for registered methods get a reply; foreign traffic is
    /// dropped like any other unmatched envelope.
    fn reject(&self, message: UMessage, code: UCode, reason: &str) {
        let registered = message.attributes.is_request()
            && message.sink().is_some_and(|sink| self.handlers.contains(sink));
        if !registered {
            self.stats.enqueue_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        let status = UStatus::fail_with_code(code, reason);
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        let sent = UMessage::response(&message.attributes, &status)
            .and_then(|response| transport.send(response));
        if let Err(e) = sent {
            tracing::warn!("Failed to send {} response: {}", code, e);
        }
    }
}

impl UListener for RequestRouter {
    fn on_receive(&self, message: UMessage) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        if !self.is_accepting() {
            self.reject(message, UCode::Unavailable, "router is shutting down");
            return;
        }
        match self.queue.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                self.reject(message, UCode::ResourceExhausted, "inbound queue is full")
            }
            Err(TrySendError::Closed(message)) => {
                self.reject(message, UCode::Unavailable, "router is shutting down")
            }
        }
    }
}

impl Drop for RequestRouter {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_consumer(
    mut rx: mpsc::Receiver<UMessage>,
    handlers: Arc<HandlerMap>,
    stats: Arc<RouterStats>,
    stop: Arc<Notify>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.notified() => break,
            message = rx.recv() => match message {
                Some(message) => route(&handlers, &stats, message),
                None => return,
            },
        }
    }

    // Drain what was queued before intake stopped.
    while let Ok(message) = rx.try_recv() {
        route(&handlers, &stats, message);
    }
    tracing::debug!("Request router consumer stopped");
}

fn route(handlers: &HandlerMap, stats: &RouterStats, message: UMessage) {
    match catch_unwind(AssertUnwindSafe(|| handlers.dispatch(message))) {
        Ok(true) => {
            stats.dispatched.fetch_add(1, Ordering::Relaxed);
        }
        Ok(false) => {
            stats.unmatched.fetch_add(1, Ordering::Relaxed);
        }
        Err(panic) => {
            stats.dispatched.fetch_add(1, Ordering::Relaxed);
            tracing::error!("{}", UStatus::from_panic(panic.as_ref()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RequestHandler;
    use crate::local::LocalTransport;
    use crate::uri::{UEntity, UUri};

    fn entity() -> UEntity {
        UEntity::new("example.streamer", 1)
    }

    fn caller() -> UUri {
        UUri::for_entity(UEntity::new("client.test", 1))
    }

    fn method(name: &str) -> UUri {
        UUri::for_method(&entity(), name)
    }

    fn request_to(sink: UUri) -> UMessage {
        UMessage::request(caller(), sink, &UStatus::ok()).expect("request")
    }

    async fn connected_transport() -> Arc<LocalTransport> {
        let transport = Arc::new(LocalTransport::new(entity()));
        transport.connect().await.expect("connect");
        transport
    }

    fn weak(transport: &Arc<LocalTransport>) -> Weak<dyn UTransport> {
        let transport: Arc<dyn UTransport> = transport.clone();
        Arc::downgrade(&transport)
    }

    async fn collector(
        transport: &LocalTransport,
        address: UUri,
    ) -> (Arc<dyn UListener>, Arc<Mutex<Vec<UMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Arc<dyn UListener> = Arc::new(move |msg: UMessage| sink.lock().push(msg));
        transport
            .register_listener(&address, listener.clone())
            .await
            .expect("register collector");
        (listener, seen)
    }

    #[tokio::test]
    async fn routes_queued_requests_to_handlers() {
        let transport = connected_transport().await;
        let handlers = Arc::new(HandlerMap::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let handler: Arc<dyn RequestHandler> =
            Arc::new(move |msg: UMessage| log.lock().push(msg.attributes.id));
        handlers.insert(method("A"), handler);

        let router = RequestRouter::spawn(handlers, weak(&transport), 16);
        let first = request_to(method("A"));
        let ids = vec![first.attributes.id];
        router.on_receive(first);
        router.on_receive(request_to(method("Unknown")));

        router.close();
        assert!(router.join(Duration::from_secs(5)).await);

        assert_eq!(*seen.lock(), ids);
        let stats = router.stats().snapshot();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.unmatched, 1);
    }

    #[tokio::test]
    async fn full_queue_rejects_registered_requests() {
        let transport = connected_transport().await;
        let (_listener, responses) = collector(&transport, caller()).await;

        let handlers = Arc::new(HandlerMap::new());
        let handler: Arc<dyn RequestHandler> = Arc::new(|_msg: UMessage| {});
        handlers.insert(method("A"), handler);
        let router = RequestRouter::spawn(handlers, weak(&transport), 1);

        // Current-thread runtime: the consumer cannot run until we yield.
        router.on_receive(request_to(method("A")));
        let overflow = request_to(method("A"));
        let overflow_id = overflow.attributes.id;
        router.on_receive(overflow);
        router.on_receive(request_to(method("Foreign")));

        let responses = responses.lock();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].attributes.reqid, Some(overflow_id));
        let status: UStatus = responses[0].payload.unpack().expect("status");
        assert_eq!(status.code, UCode::ResourceExhausted);

        let stats = router.stats().snapshot();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.enqueue_failures, 1);
    }

    #[tokio::test]
    async fn closed_router_drops_intake() {
        let transport = connected_transport().await;
        let handlers = Arc::new(HandlerMap::new());
        let router = RequestRouter::spawn(handlers, weak(&transport), 4);

        router.close();
        assert!(!router.is_accepting());
        router.on_receive(request_to(method("A")));
        assert!(router.join(Duration::from_secs(5)).await);

        let stats = router.stats().snapshot();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.enqueue_failures, 1);
        assert_eq!(stats.dispatched + stats.unmatched, 0);
    }

    #[tokio::test]
    async fn closed_router_answers_registered_requests() {
        let transport = connected_transport().await;
        let (_listener, responses) = collector(&transport, caller()).await;

        let handlers = Arc::new(HandlerMap::new());
        let handler: Arc<dyn RequestHandler> = Arc::new(|_msg: UMessage| {});
        handlers.insert(method("A"), handler);
        let router = RequestRouter::spawn(handlers, weak(&transport), 4);

        router.close();
        let late = request_to(method("A"));
        let late_id = late.attributes.id;
        router.on_receive(late);
        router.on_receive(request_to(method("Foreign")));
        assert!(router.join(Duration::from_secs(5)).await);

        let responses = responses.lock();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].attributes.reqid, Some(late_id));
        let status: UStatus = responses[0].payload.unpack().expect("status");
        assert_eq!(status.code, UCode::Unavailable);

        let stats = router.stats().snapshot();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.enqueue_failures, 1);
        assert_eq!(stats.dispatched + stats.unmatched, 0);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_consumer() {
        let transport = connected_transport().await;
        let handlers = Arc::new(HandlerMap::new());
        let boom: Arc<dyn RequestHandler> = Arc::new(|_msg: UMessage| panic!("boom"));
        handlers.insert(method("Boom"), boom);
        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        let ok: Arc<dyn RequestHandler> = Arc::new(move |_msg: UMessage| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        handlers.insert(method("Ok"), ok);

        let router = RequestRouter::spawn(handlers, weak(&transport), 8);
        router.on_receive(request_to(method("Boom")));
        router.on_receive(request_to(method("Ok")));
        router.close();
        assert!(router.join(Duration::from_secs(5)).await);

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(router.stats().snapshot().dispatched, 2);
    }
}
