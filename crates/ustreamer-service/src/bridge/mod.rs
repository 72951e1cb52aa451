// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! External engine handoff.
//!
//! After the transport connects, the live connection and the subscription
//! registry are lent to an external engine on a dedicated thread. At
//! shutdown the engine is torn down and the handles are reclaimed.
//!
//! ```text
//! UNINITIALIZED -> INITIALIZING -> ACTIVE -> TEARING_DOWN -> TERMINATED
//!       |               |                         ^
//!       |               +-------------------------+  (teardown during init)
//!       |               +--> TERMINATED              (initialize failed)
//!       +--> TERMINATED                              (teardown before start)
//! ```
//!
//! At most one session exists per lifecycle: a terminated lifecycle cannot
//! be restarted.
//!
//! The engine never sees `teardown` while `initialize` is still running.
//! Teardown during `INITIALIZING` waits for `initialize` to return (bounded
//! by the teardown timeout). If the wait expires the session is abandoned,
//! and the init thread tears the engine down itself once `initialize`
//! returns successfully.

mod handle;
mod monitor;

pub use handle::{ConnectionHandle, InboundSink, SubscriptionHandle};
pub use monitor::MonitorEngine;

use crate::status::{UCode, UStatus};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Engine initialize failed: {0}")]
    Initialize(String),

    #[error("Engine teardown failed: {0}")]
    Teardown(String),

    #[error("Engine panicked: {0}")]
    Panicked(String),

    #[error("Handle call failed: {0}")]
    Status(#[from] UStatus),
}

/// External engine receiving the connection handoff.
///
/// Both calls run on dedicated threads and may block.
pub trait BridgeEngine: Send + Sync + 'static {
    /// Take over the lent handles. Returns a human-readable result.
    fn initialize(
        &self,
        connection: ConnectionHandle,
        subscription: SubscriptionHandle,
    ) -> Result<String, EngineError>;

    /// Release everything acquired in `initialize`. Returns a human-readable result.
    fn teardown(&self) -> Result<String, EngineError>;
}

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    #[default]
    Uninitialized,
    Initializing,
    Active,
    TearingDown,
    Terminated,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Initializing => "INITIALIZING",
            Self::Active => "ACTIVE",
            Self::TearingDown => "TEARING_DOWN",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// How `initialize` ended, as seen by a concurrent teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitOutcome {
    Pending,
    Succeeded,
    Failed,
    /// Teardown stopped waiting; the init thread owns the engine teardown.
    Abandoned,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> EngineError {
    EngineError::Panicked(UStatus::from_panic(payload.as_ref()).message)
}

fn run_engine_teardown(engine: &dyn BridgeEngine) -> Result<String, EngineError> {
    catch_unwind(AssertUnwindSafe(|| engine.teardown()))
        .unwrap_or_else(|panic| Err(panic_message(panic)))
}

/// Handoff state machine.
pub struct BridgeLifecycle {
    engine: Arc<dyn BridgeEngine>,
    state: watch::Sender<BridgeState>,
    handles: Mutex<Option<(ConnectionHandle, SubscriptionHandle)>>,
    init: watch::Sender<InitOutcome>,
    teardown_timeout: Duration,
}

impl BridgeLifecycle {
    /// Create an uninitialized lifecycle for `engine`.
    ///
    /// `teardown_timeout` bounds how long [`teardown`](Self::teardown) waits
    /// for the engine.
    pub fn new(engine: Arc<dyn BridgeEngine>, teardown_timeout: Duration) -> Arc<Self> {
        let (state, _) = watch::channel(BridgeState::Uninitialized);
        let (init, _) = watch::channel(InitOutcome::Pending);
        Arc::new(Self {
            engine,
            state,
            handles: Mutex::new(None),
            init,
            teardown_timeout,
        })
    }

    /// Current state.
    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// State change notifications.
    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Wait until the lifecycle reaches `target`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, target: BridgeState, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|state| *state == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    /// Apply `next` atomically; returns the state observed before the call.
    fn transition(&self, next: impl FnOnce(BridgeState) -> Option<BridgeState>) -> BridgeState {
        let mut previous = BridgeState::Uninitialized;
        self.state.send_if_modified(|state| {
            previous = *state;
            match next(*state) {
                Some(to) => {
                    tracing::debug!("Bridge {} -> {}", state, to);
                    *state = to;
                    true
                }
                None => false,
            }
        });
        previous
    }

    /// Lend the handles to the engine and initialize it on a dedicated thread.
    ///
    /// Returns once the thread is spawned. Fails with `FAILED_PRECONDITION`
    /// unless the lifecycle is `UNINITIALIZED`.
    pub fn start(
        self: &Arc<Self>,
        connection: ConnectionHandle,
        subscription: SubscriptionHandle,
    ) -> Result<(), UStatus> {
        let runtime = Handle::try_current().map_err(|_| {
            UStatus::fail_with_code(UCode::FailedPrecondition, "no tokio runtime available")
        })?;

        let previous = self.transition(|state| match state {
            BridgeState::Uninitialized => Some(BridgeState::Initializing),
            _ => None,
        });
        if previous != BridgeState::Uninitialized {
            return Err(UStatus::fail_with_code(
                UCode::FailedPrecondition,
                format!("bridge cannot start from {}", previous),
            ));
        }
        *self.handles.lock() = Some((connection.clone(), subscription.clone()));

        let this = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("ustreamer-bridge".into())
            .spawn(move || {
                let engine = this.engine.clone();
                let result = catch_unwind(AssertUnwindSafe(|| {
                    engine.initialize(connection, subscription)
                }))
                .unwrap_or_else(|panic| Err(panic_message(panic)));
                this.finish_initialize(result, &runtime);
            });

        if let Err(e) = spawned {
            self.transition(|_| Some(BridgeState::Terminated));
            self.reclaim_detached();
            return Err(UStatus::fail_with_code(
                UCode::Internal,
                format!("failed to spawn bridge thread: {}", e),
            ));
        }
        Ok(())
    }

    fn finish_initialize(&self, result: Result<String, EngineError>, runtime: &Handle) {
        let outcome = if result.is_ok() {
            InitOutcome::Succeeded
        } else {
            InitOutcome::Failed
        };
        let mut abandoned = false;
        self.init.send_if_modified(|current| match *current {
            InitOutcome::Pending => {
                *current = outcome;
                true
            }
            InitOutcome::Abandoned => {
                abandoned = true;
                false
            }
            _ => false,
        });

        match result {
            Ok(text) => {
                tracing::info!("initializeStreamer: {}", text);
                self.transition(|state| match state {
                    BridgeState::Initializing => Some(BridgeState::Active),
                    _ => None,
                });
                if abandoned {
                    // The handles were revoked when teardown gave up waiting.
                    match run_engine_teardown(self.engine.as_ref()) {
                        Ok(text) => tracing::info!("teardownStreamer (late): {}", text),
                        Err(e) => tracing::error!("teardownStreamer (late): {}", e),
                    }
                }
            }
            Err(e) => {
                tracing::error!("initializeStreamer: {}", e);
                let previous = self.transition(|state| match state {
                    BridgeState::Initializing => Some(BridgeState::Terminated),
                    _ => None,
                });
                if previous != BridgeState::Initializing {
                    return;
                }
                let handles = self.handles.lock().take();
                if let Some((connection, subscription)) = handles {
                    subscription.revoke();
                    runtime.block_on(connection.revoke());
                }
            }
        }
    }

    /// Wait for a running `initialize` to return.
    ///
    /// Returns `true` when the engine initialized and must be torn down here.
    async fn settle_initialize(&self) -> bool {
        let mut rx = self.init.subscribe();
        let _ = tokio::time::timeout(
            self.teardown_timeout,
            rx.wait_for(|outcome| *outcome != InitOutcome::Pending),
        )
        .await;

        let mut settled = InitOutcome::Pending;
        self.init.send_if_modified(|current| {
            if *current == InitOutcome::Pending {
                *current = InitOutcome::Abandoned;
            }
            settled = *current;
            settled == InitOutcome::Abandoned
        });
        if settled == InitOutcome::Abandoned {
            tracing::warn!(
                "teardownStreamer: initialize still running after {:?}, abandoning session",
                self.teardown_timeout
            );
        }
        settled == InitOutcome::Succeeded
    }

    fn reclaim_detached(&self) {
        let handles = self.handles.lock().take();
        if let Some((connection, subscription)) = handles {
            subscription.revoke();
            tokio::spawn(async move { connection.revoke().await });
        }
    }

    /// Tear the engine down and reclaim the handles.
    ///
    /// No-op when already tearing down or terminated; moves straight to
    /// `TERMINATED` when never started. Engine failures and timeouts are
    /// logged, never returned.
    pub async fn teardown(&self) {
        let previous = self.transition(|state| match state {
            BridgeState::Uninitialized => Some(BridgeState::Terminated),
            BridgeState::Initializing | BridgeState::Active => Some(BridgeState::TearingDown),
            BridgeState::TearingDown | BridgeState::Terminated => None,
        });
        let initialized = match previous {
            BridgeState::Active => true,
            BridgeState::Initializing => self.settle_initialize().await,
            BridgeState::Uninitialized => {
                tracing::debug!("Bridge never started, nothing to tear down");
                return;
            }
            BridgeState::TearingDown | BridgeState::Terminated => return,
        };
        if initialized {
            self.teardown_engine().await;
        }

        let handles = self.handles.lock().take();
        if let Some((connection, subscription)) = handles {
            subscription.revoke();
            connection.revoke().await;
        }
        self.transition(|_| Some(BridgeState::Terminated));
    }

    async fn teardown_engine(&self) {
        let engine = self.engine.clone();
        let (tx, rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("ustreamer-bridge-teardown".into())
            .spawn(move || {
                let _ = tx.send(run_engine_teardown(engine.as_ref()));
            });

        match spawned {
            Err(e) => tracing::error!("teardownStreamer: failed to spawn thread: {}", e),
            Ok(_) => match tokio::time::timeout(self.teardown_timeout, rx).await {
                Ok(Ok(Ok(text))) => tracing::info!("teardownStreamer: {}", text),
                Ok(Ok(Err(e))) => tracing::error!("teardownStreamer: {}", e),
                Ok(Err(_)) => tracing::error!("teardownStreamer: engine thread exited"),
                Err(_) => tracing::warn!(
                    "teardownStreamer: engine did not finish within {:?}",
                    self.teardown_timeout
                ),
            },
        }
    }
}
