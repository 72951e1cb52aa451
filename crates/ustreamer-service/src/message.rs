// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Envelopes and typed payloads.
//!
//! A [`UMessage`] carries routing attributes and an opaque payload. Requests
//! and responses are correlated through attributes (`id` / `reqid`) on the
//! envelope itself, never through a side channel.
//!
//! Payloads are a type name plus bytes. Structured values are packed with
//! `serde_json`; the type name is checked on unpack.

use crate::status::{UCode, UStatus};
use crate::uri::UUri;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A structured value with a stable interpreted type name.
pub trait PayloadType: Serialize + DeserializeOwned {
    /// Fully-qualified type name written into [`UPayload::type_name`].
    const TYPE_NAME: &'static str;
}

/// Message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UMessageType {
    /// Topic publication.
    #[default]
    Publish,
    /// RPC request.
    Request,
    /// RPC response.
    Response,
}

/// Message priority classes (CS0 lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UPriority {
    /// Low priority (default for publications).
    #[default]
    Cs0,
    Cs1,
    Cs2,
    Cs3,
    /// Minimum priority class for RPC traffic.
    Cs4,
    Cs5,
    Cs6,
}

/// Routing attributes of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UAttributes {
    /// Unique message id.
    pub id: Uuid,
    /// Message kind.
    pub kind: UMessageType,
    /// Originating address (topic for publications).
    pub source: UUri,
    /// Destination address (method for requests, caller for responses).
    #[serde(default)]
    pub sink: Option<UUri>,
    /// Priority class.
    #[serde(default)]
    pub priority: UPriority,
    /// Correlation id: for a response, the `id` of the request it answers.
    #[serde(default)]
    pub reqid: Option<Uuid>,
}

impl UAttributes {
    /// Attributes for a topic publication.
    pub fn publish(source: UUri, priority: UPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: UMessageType::Publish,
            source,
            sink: None,
            priority,
            reqid: None,
        }
    }

    /// Attributes for an RPC request from `source` to method `sink`.
    pub fn request(source: UUri, sink: UUri, priority: UPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: UMessageType::Request,
            source,
            sink: Some(sink),
            priority: priority.max(UPriority::Cs4),
            reqid: None,
        }
    }

    /// Attributes for the response correlated to `request`.
    ///
    /// Source and sink are swapped, priority is kept and `reqid` is set to
    /// the request id.
    pub fn response_for(request: &UAttributes) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: UMessageType::Response,
            source: request.sink.clone().unwrap_or_default(),
            sink: Some(request.source.clone()),
            priority: request.priority,
            reqid: Some(request.id),
        }
    }

    /// Check if these attributes describe a request.
    pub fn is_request(&self) -> bool {
        self.kind == UMessageType::Request
    }
}

/// Typed opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UPayload {
    /// Interpreted type name of `data`.
    pub type_name: String,
    /// Serialized value.
    #[serde(default)]
    pub data: Vec<u8>,
}

impl UPayload {
    /// Build a payload from raw parts.
    pub fn new(type_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            data,
        }
    }

    /// Pack a structured value.
    pub fn pack<T: PayloadType>(value: &T) -> Result<Self, UStatus> {
        let data = serde_json::to_vec(value).map_err(|e| {
            UStatus::fail_with_code(
                UCode::Internal,
                format!("failed to pack {}: {}", T::TYPE_NAME, e),
            )
        })?;
        Ok(Self {
            type_name: T::TYPE_NAME.to_string(),
            data,
        })
    }

    /// Unpack a structured value, checking the type name.
    ///
    /// A type mismatch or undecodable bytes yield `InvalidArgument`.
    pub fn unpack<T: PayloadType>(&self) -> Result<T, UStatus> {
        if self.type_name != T::TYPE_NAME {
            return Err(UStatus::fail_with_code(
                UCode::InvalidArgument,
                format!(
                    "payload type mismatch: expected {}, got {}",
                    T::TYPE_NAME,
                    self.type_name
                ),
            ));
        }
        serde_json::from_slice(&self.data).map_err(|e| {
            UStatus::fail_with_code(
                UCode::InvalidArgument,
                format!("failed to unpack {}: {}", T::TYPE_NAME, e),
            )
        })
    }

    /// Check if the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UMessage {
    /// Routing attributes.
    pub attributes: UAttributes,
    /// Payload.
    #[serde(default)]
    pub payload: UPayload,
}

impl UMessage {
    /// Build an envelope.
    pub fn new(attributes: UAttributes, payload: UPayload) -> Self {
        Self {
            attributes,
            payload,
        }
    }

    /// Publication of `value` on `topic`.
    pub fn publish<T: PayloadType>(topic: UUri, value: &T) -> Result<Self, UStatus> {
        Ok(Self::new(
            UAttributes::publish(topic, UPriority::Cs0),
            UPayload::pack(value)?,
        ))
    }

    /// Request carrying `value` from `source` to method `sink`.
    pub fn request<T: PayloadType>(source: UUri, sink: UUri, value: &T) -> Result<Self, UStatus> {
        Ok(Self::new(
            UAttributes::request(source, sink, UPriority::Cs4),
            UPayload::pack(value)?,
        ))
    }

    /// Response to `request` carrying `status`.
    pub fn response(request: &UAttributes, status: &UStatus) -> Result<Self, UStatus> {
        Ok(Self::new(
            UAttributes::response_for(request),
            UPayload::pack(status)?,
        ))
    }

    /// Destination address, if any.
    pub fn sink(&self) -> Option<&UUri> {
        self.attributes.sink.as_ref()
    }

    /// Originating address.
    pub fn source(&self) -> &UUri {
        &self.attributes.source
    }
}

impl PayloadType for UMessage {
    const TYPE_NAME: &'static str = "ustreamer.v1.UMessage";
}
