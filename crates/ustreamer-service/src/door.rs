// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Door command method.
//!
//! `ExecuteDoorCommand` validates a lock/unlock command, schedules the
//! door-state publish on the service executor and replies immediately. The
//! reply never waits for the publish; it is sent on every path, including
//! failures and handler panics.

use crate::config::ServiceTopology;
use crate::dispatch::RequestHandler;
use crate::executor::SerialExecutor;
use crate::message::{PayloadType, UMessage};
use crate::status::{log_status, UCode, UStatus};
use crate::transport::UTransport;
use crate::uri::UUri;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// Method name of the door command.
pub const METHOD_EXECUTE_DOOR_COMMAND: &str = "ExecuteDoorCommand";
/// Resource name of door state topics.
pub const DOOR_RESOURCE: &str = "doors";
/// Message name of door state topics.
pub const DOOR_MESSAGE: &str = "Doors";

/// Door state, also used to name the target of a command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Door {
    /// Door instance (e.g. `front_left`).
    pub instance: String,
    /// Lock state.
    #[serde(default)]
    pub locked: bool,
}

impl PayloadType for Door {
    const TYPE_NAME: &'static str = "ustreamer.example.v1.Door";
}

/// Door command actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DoorAction {
    Unspecified = 0,
    Lock = 1,
    Unlock = 2,
}

impl DoorAction {
    /// Convert from i32.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Unspecified),
            1 => Some(Self::Lock),
            2 => Some(Self::Unlock),
            _ => None,
        }
    }

    /// Convert to i32.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Request payload of `ExecuteDoorCommand`.
///
/// `action` stays a raw integer on the wire so out-of-range values reach
/// the handler and are rejected there.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DoorCommand {
    pub door: Door,
    pub action: i32,
}

impl DoorCommand {
    /// Command applying `action` to `instance`.
    pub fn new(instance: impl Into<String>, action: DoorAction) -> Self {
        Self {
            door: Door {
                instance: instance.into(),
                locked: false,
            },
            action: action.as_i32(),
        }
    }
}

impl PayloadType for DoorCommand {
    const TYPE_NAME: &'static str = "ustreamer.example.v1.DoorCommand";
}

/// Handler of `ExecuteDoorCommand`.
pub struct DoorCommandHandler {
    topology: Arc<ServiceTopology>,
    transport: Weak<dyn UTransport>,
    executor: Arc<SerialExecutor>,
}

impl DoorCommandHandler {
    /// Create the handler.
    pub fn new(
        topology: Arc<ServiceTopology>,
        transport: Weak<dyn UTransport>,
        executor: Arc<SerialExecutor>,
    ) -> Self {
        Self {
            topology,
            transport,
            executor,
        }
    }

    /// Validate the command and schedule its side effect.
    fn execute(&self, request: &UMessage) -> Result<(), UStatus> {
        let command: DoorCommand = request.payload.unpack()?;
        let instance = command.door.instance;
        tracing::info!(%instance, action = command.action, "executeDoorCommand request");

        let topic = self.topology.door_topic(&instance).cloned().ok_or_else(|| {
            UStatus::fail_with_code(UCode::InvalidArgument, format!("Unknown door: {}", instance))
        })?;

        let locked = match DoorAction::from_i32(command.action) {
            Some(DoorAction::Lock) => true,
            Some(DoorAction::Unlock) => false,
            Some(DoorAction::Unspecified) | None => {
                return Err(UStatus::fail_with_code(
                    UCode::InvalidArgument,
                    format!("Unknown action: {}", command.action),
                ))
            }
        };

        let transport = self.transport.clone();
        let event = Door { instance, locked };
        self.executor
            .execute(async move { publish(&transport, topic, &event) })
    }

    fn respond(&self, request: &UMessage, status: &UStatus) {
        let Some(transport) = self.transport.upgrade() else {
            tracing::warn!("Transport gone, dropping executeDoorCommand response");
            return;
        };
        let sent = UMessage::response(&request.attributes, status)
            .and_then(|response| transport.send(response));
        if let Err(e) = sent {
            tracing::error!("Failed to send executeDoorCommand response: {}", e);
        }
    }
}

impl RequestHandler for DoorCommandHandler {
    fn handle(&self, request: UMessage) {
        let result = catch_unwind(AssertUnwindSafe(|| self.execute(&request)))
            .unwrap_or_else(|panic| Err(UStatus::from_panic(panic.as_ref())));
        log_status("executeDoorCommand", &result, request.sink());
        self.respond(&request, &UStatus::from_result(&result));
    }
}

fn publish(transport: &Weak<dyn UTransport>, topic: UUri, event: &Door) {
    let result = match transport.upgrade() {
        Some(transport) => UMessage::publish(topic.clone(), event).and_then(|m| transport.send(m)),
        None => Err(UStatus::fail_with_code(
            UCode::Unavailable,
            "transport is gone",
        )),
    };
    log_status("publish", &result, Some(&topic));
}
