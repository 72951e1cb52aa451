// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! uStreamer Service
//!
//! Request routing and RPC dispatch for a vehicle-signal publish/subscribe
//! fabric, with a handoff of the live connection to an external engine.
//!
//! # Features
//!
//! - **Method Dispatch**: Lock-free address-to-handler table behind a single transport listener
//! - **Request/Response over Pub/Sub**: Correlated replies with decoupled side-effect publishes
//! - **Bridge Lifecycle**: Lend the connection to an external engine and reclaim it at shutdown
//! - **Bootstrap**: Best-effort subscriptions and topic creation at startup
//!
//! # Quick Start
//!
//! ```bash
//! # In-process round trip
//! ustreamer-service demo
//!
//! # Using config file
//! ustreamer-service --config ustreamer.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! name = "ustreamer-service"
//! doors = ["front_left", "front_right"]
//! subscriptions = ["/client.test/1/resource.main#Rust"]
//!
//! [entity]
//! name = "example.streamer"
//! version_major = 1
//!
//! [bridge]
//! enabled = true
//! teardown_timeout_ms = 2000
//! ```

pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod door;
pub mod executor;
pub mod local;
pub mod message;
pub mod router;
pub mod service;
pub mod status;
pub mod subscription;
pub mod transport;
pub mod uri;

pub use bridge::{
    BridgeEngine, BridgeLifecycle, BridgeState, ConnectionHandle, EngineError, InboundSink,
    MonitorEngine, SubscriptionHandle,
};
pub use config::{BridgeConfig, ConfigError, EntityConfig, ServiceConfig, ServiceTopology};
pub use dispatch::{HandlerMap, MethodDispatchTable, RequestHandler};
pub use door::{Door, DoorAction, DoorCommand, DoorCommandHandler};
pub use executor::SerialExecutor;
pub use local::{LocalSubscriptionRegistry, LocalTransport};
pub use message::{PayloadType, UAttributes, UMessage, UMessageType, UPayload, UPriority};
pub use router::{RequestRouter, RouterStats, RouterStatsSnapshot};
pub use service::UStreamerService;
pub use status::{UCode, UStatus};
pub use subscription::{RegistryError, USubscription};
pub use transport::{ConnectionState, UListener, UTransport};
pub use uri::{UEntity, UResource, UUri, UriError};
