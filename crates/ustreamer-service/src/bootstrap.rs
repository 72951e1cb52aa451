// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription and topic bootstrap.
//!
//! Both calls resolve to a plain status: registry-reported failures and
//! communication failures are folded into [`UStatus`] the same way.
//! Startup subscriptions are fire-and-forget; a failure is logged and the
//! service keeps running.

use crate::status::{log_status, UStatus};
use crate::subscription::{
    CreateTopicRequest, SubscriberInfo, SubscriptionRequest, USubscription,
};
use crate::uri::UUri;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Subscribe `subscriber` to `topic`.
pub async fn subscribe(
    registry: &dyn USubscription,
    topic: &UUri,
    subscriber: &UUri,
) -> Result<(), UStatus> {
    let request = SubscriptionRequest {
        topic: topic.clone(),
        subscriber: SubscriberInfo {
            uri: subscriber.clone(),
        },
    };
    let result = match registry.subscribe(request).await {
        Ok(response) => response.status.into_result(),
        Err(e) => Err(e.into()),
    };
    log_status("subscribe", &result, Some(topic));
    result
}

/// Assert that `topic` exists. Idempotent.
pub async fn create_topic(registry: &dyn USubscription, topic: &UUri) -> Result<(), UStatus> {
    let request = CreateTopicRequest {
        topic: topic.clone(),
    };
    let result = match registry.create_topic(request).await {
        Ok(status) => status.into_result(),
        Err(e) => Err(e.into()),
    };
    log_status("createTopic", &result, Some(topic));
    result
}

/// Spawn the startup bootstrap: subscribe to `subscriptions`, then create
/// `topics`. Failures never abort the sequence.
pub fn spawn(
    registry: Arc<dyn USubscription>,
    subscriber: UUri,
    subscriptions: Vec<UUri>,
    topics: Vec<UUri>,
) -> JoinHandle<BootstrapReport> {
    tokio::spawn(async move {
        let mut report = BootstrapReport::default();
        for topic in &subscriptions {
            match subscribe(registry.as_ref(), topic, &subscriber).await {
                Ok(()) => report.subscribed += 1,
                Err(_) => report.failed += 1,
            }
        }
        for topic in &topics {
            match create_topic(registry.as_ref(), topic).await {
                Ok(()) => report.created += 1,
                Err(_) => report.failed += 1,
            }
        }
        report
    })
}

/// Outcome counters of a bootstrap run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootstrapReport {
    pub subscribed: usize,
    pub created: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalSubscriptionRegistry;
    use crate::status::UCode;
    use crate::subscription::{RegistryError, SubscriptionResponse, SubscriptionState};
    use crate::uri::UEntity;
    use async_trait::async_trait;

    fn topic() -> UUri {
        "/client.test/1/resource.main#Rust".parse().expect("uri")
    }

    fn subscriber() -> UUri {
        UUri::for_entity(UEntity::new("example.streamer", 1))
    }

    /// Registry answering every call with a failure status.
    struct RefusingRegistry;

    #[async_trait]
    impl USubscription for RefusingRegistry {
        async fn subscribe(
            &self,
            request: SubscriptionRequest,
        ) -> Result<SubscriptionResponse, RegistryError> {
            Ok(SubscriptionResponse {
                topic: request.topic,
                state: SubscriptionState::Unsubscribed,
                status: UStatus::fail_with_code(UCode::PermissionDenied, "not allowed"),
            })
        }

        async fn create_topic(
            &self,
            _request: CreateTopicRequest,
        ) -> Result<UStatus, RegistryError> {
            Ok(UStatus::fail_with_code(UCode::PermissionDenied, "not allowed"))
        }
    }

    #[tokio::test]
    async fn subscribe_and_create() {
        let registry = LocalSubscriptionRegistry::new();
        subscribe(&registry, &topic(), &subscriber())
            .await
            .expect("subscribe");
        create_topic(&registry, &topic()).await.expect("create");
        create_topic(&registry, &topic()).await.expect("create again");
        assert_eq!(registry.subscribers(&topic()), vec![subscriber()]);
        assert!(registry.has_topic(&topic()));
    }

    #[tokio::test]
    async fn communication_failures_become_status() {
        let registry = LocalSubscriptionRegistry::new();
        registry.fail_with(Some(RegistryError::Communication("broken pipe".into())));
        let err = create_topic(&registry, &topic()).await.unwrap_err();
        assert_eq!(err.code, UCode::Unavailable);

        registry.fail_with(Some(RegistryError::Timeout));
        let err = subscribe(&registry, &topic(), &subscriber())
            .await
            .unwrap_err();
        assert_eq!(err.code, UCode::DeadlineExceeded);
    }

    #[tokio::test]
    async fn registry_reported_failures_are_returned() {
        let err = subscribe(&RefusingRegistry, &topic(), &subscriber())
            .await
            .unwrap_err();
        assert_eq!(err.code, UCode::PermissionDenied);
        let err = create_topic(&RefusingRegistry, &topic()).await.unwrap_err();
        assert_eq!(err.code, UCode::PermissionDenied);
    }

    #[tokio::test]
    async fn bootstrap_continues_past_failures() {
        let registry = Arc::new(LocalSubscriptionRegistry::new());
        registry.fail_with(Some(RegistryError::Timeout));
        let report = spawn(registry.clone(), subscriber(), vec![topic()], vec![topic()])
            .await
            .expect("join");
        assert_eq!(report.failed, 2);

        registry.fail_with(None);
        let report = spawn(registry, subscriber(), vec![topic()], vec![topic()])
            .await
            .expect("join");
        assert_eq!(
            report,
            BootstrapReport {
                subscribed: 1,
                created: 1,
                failed: 0
            }
        );
    }
}
