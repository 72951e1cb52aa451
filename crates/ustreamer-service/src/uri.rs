// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hierarchical addresses for topics and methods.
//!
//! A [`UUri`] names either a pub/sub topic or an RPC method. It is an
//! immutable value compared structurally, so it can key the dispatch table
//! directly.
//!
//! # Text form
//!
//! ```text
//! /<entity>/<major>/<resource>.<instance>#<message>
//! /example.streamer/1/doors.front_left#Doors
//! /example.streamer/1/rpc.ExecuteDoorCommand
//! ```

use crate::message::PayloadType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Resource name reserved for RPC methods.
pub const RPC_RESOURCE: &str = "rpc";

/// Address parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    #[error("URI must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("URI has an empty entity name: {0}")]
    EmptyEntity(String),

    #[error("Invalid major version '{version}' in {uri}")]
    InvalidVersion { uri: String, version: String },

    #[error("URI has too many segments: {0}")]
    TooManySegments(String),
}

/// Software entity (service) identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UEntity {
    /// Entity name (e.g. `example.streamer`).
    pub name: String,
    /// Major version of the entity API.
    pub version_major: u32,
}

impl UEntity {
    /// Create an entity.
    pub fn new(name: impl Into<String>, version_major: u32) -> Self {
        Self {
            name: name.into(),
            version_major,
        }
    }
}

/// Resource within an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UResource {
    /// Resource name (`doors`, `rpc`, ...).
    pub name: String,
    /// Resource instance (`front_left`, method name, ...).
    #[serde(default)]
    pub instance: String,
    /// Message type carried on this resource.
    #[serde(default)]
    pub message: String,
}

impl UResource {
    /// Create a resource.
    pub fn new(
        name: impl Into<String>,
        instance: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instance: instance.into(),
            message: message.into(),
        }
    }

    /// Resource for an RPC request method (`rpc.<method>`).
    pub fn for_rpc_request(method: impl Into<String>) -> Self {
        Self {
            name: RPC_RESOURCE.to_string(),
            instance: method.into(),
            message: String::new(),
        }
    }

    /// Check if this resource names an RPC method.
    pub fn is_rpc_method(&self) -> bool {
        self.name == RPC_RESOURCE
    }
}

/// Address of a topic or method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UUri {
    /// Owning entity.
    pub entity: UEntity,
    /// Addressed resource (empty for entity-level addresses).
    #[serde(default)]
    pub resource: UResource,
}

impl UUri {
    /// Create an address.
    pub fn new(entity: UEntity, resource: UResource) -> Self {
        Self { entity, resource }
    }

    /// Entity-level address (no resource), e.g. a subscriber identity.
    pub fn for_entity(entity: UEntity) -> Self {
        Self {
            entity,
            resource: UResource::default(),
        }
    }

    /// Method address for `method` on `entity`.
    pub fn for_method(entity: &UEntity, method: &str) -> Self {
        Self::new(entity.clone(), UResource::for_rpc_request(method))
    }

    /// Topic address on `entity`.
    pub fn for_topic(entity: &UEntity, resource: UResource) -> Self {
        Self::new(entity.clone(), resource)
    }

    /// Check if this is an RPC method address.
    pub fn is_method(&self) -> bool {
        self.resource.is_rpc_method()
    }
}

impl PayloadType for UUri {
    const TYPE_NAME: &'static str = "ustreamer.v1.UUri";
}

impl fmt::Display for UUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.entity.name, self.entity.version_major)?;
        if self.resource.name.is_empty() {
            return Ok(());
        }
        write!(f, "/{}", self.resource.name)?;
        if !self.resource.instance.is_empty() {
            write!(f, ".{}", self.resource.instance)?;
        }
        if !self.resource.message.is_empty() {
            write!(f, "#{}", self.resource.message)?;
        }
        Ok(())
    }
}

impl FromStr for UUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| UriError::MissingLeadingSlash(s.to_string()))?;

        let mut segments = rest.splitn(3, '/');
        let name = segments.next().unwrap_or_default();
        if name.is_empty() {
            return Err(UriError::EmptyEntity(s.to_string()));
        }

        let version_major = match segments.next() {
            None | Some("") => 0,
            Some(v) => v.parse().map_err(|_| UriError::InvalidVersion {
                uri: s.to_string(),
                version: v.to_string(),
            })?,
        };

        let resource = match segments.next() {
            None | Some("") => UResource::default(),
            Some(r) if r.contains('/') => return Err(UriError::TooManySegments(s.to_string())),
            Some(r) => {
                let (path, message) = r.split_once('#').unwrap_or((r, ""));
                let (res_name, instance) = path.split_once('.').unwrap_or((path, ""));
                UResource::new(res_name, instance, message)
            }
        };

        Ok(Self {
            entity: UEntity::new(name, version_major),
            resource,
        })
    }
}
