// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription registry capability.
//!
//! Remote proxy to the central subscription/topic administration service.
//! Registry calls can fail two ways: the registry answers with a failure
//! status, or the call never completes (communication failure). Both are
//! folded into a [`UStatus`] by [`RegistryError`]'s conversion.

use crate::message::PayloadType;
use crate::status::{UCode, UStatus};
use crate::uri::UUri;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Registry call errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The request could not be delivered or the reply was lost.
    #[error("Registry communication failure: {0}")]
    Communication(String),

    /// No reply within the call deadline.
    #[error("Registry call timed out")]
    Timeout,

    /// The registry processed the request and refused it.
    #[error("Registry rejected request: {0}")]
    Rejected(UStatus),
}

impl From<RegistryError> for UStatus {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Communication(msg) => UStatus::fail_with_code(UCode::Unavailable, msg),
            RegistryError::Timeout => {
                UStatus::fail_with_code(UCode::DeadlineExceeded, "registry call timed out")
            }
            RegistryError::Rejected(status) => status,
        }
    }
}

/// Subscriber identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberInfo {
    /// Entity-level address of the subscriber.
    pub uri: UUri,
}

/// Request to subscribe `subscriber` to `topic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Topic to receive from.
    pub topic: UUri,
    /// Subscriber identity.
    pub subscriber: SubscriberInfo,
}

impl PayloadType for SubscriptionRequest {
    const TYPE_NAME: &'static str = "ustreamer.v1.SubscriptionRequest";
}

/// State of a subscription as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    SubscribePending,
    Subscribed,
    UnsubscribePending,
}

/// Registry reply to a [`SubscriptionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    /// Topic the reply refers to.
    pub topic: UUri,
    /// Resulting state.
    pub state: SubscriptionState,
    /// Registry status.
    pub status: UStatus,
}

impl PayloadType for SubscriptionResponse {
    const TYPE_NAME: &'static str = "ustreamer.v1.SubscriptionResponse";
}

/// Request asserting that `topic` exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTopicRequest {
    /// Topic to create.
    pub topic: UUri,
}

impl PayloadType for CreateTopicRequest {
    const TYPE_NAME: &'static str = "ustreamer.v1.CreateTopicRequest";
}

/// Subscription registry stub.
#[async_trait]
pub trait USubscription: Send + Sync {
    /// Register a subscriber for a topic.
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<SubscriptionResponse, RegistryError>;

    /// Assert that a topic exists. Idempotent: creating an existing topic succeeds.
    async fn create_topic(&self, request: CreateTopicRequest) -> Result<UStatus, RegistryError>;
}
