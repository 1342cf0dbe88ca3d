use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use notify_service::{
    directory::{ServiceRecords, StaticDirectory},
    dispatch::DispatchPolicy,
    error::{NotifyError, Result as NotifyResult},
    models::{
        category::Category,
        message::{NotificationEnvelope, NotificationType},
        provider::ProviderProfile,
        service::ServiceSnapshot,
    },
};
use serde_json::json;
use tokio::sync::Mutex;

use crate::support::Harness;

fn policy(harness: &Harness) -> DispatchPolicy {
    DispatchPolicy::new(
        Arc::new(StaticDirectory::with_defaults()),
        harness.publisher.clone(),
    )
}

struct FakeRecords {
    services: HashMap<String, ServiceSnapshot>,
}

#[async_trait]
impl ServiceRecords for FakeRecords {
    async fn fetch_service(&self, service_id: &str) -> NotifyResult<Option<ServiceSnapshot>> {
        Ok(self.services.get(service_id).cloned())
    }
}

/// Test: A specific category produces exactly one broadcast on its exchange
#[tokio::test]
async fn test_specific_category_broadcasts_once() -> Result<()> {
    let harness = Harness::new();
    let service = ServiceSnapshot::new("svc-1", &["TOWING"]).with_field("address", json!("Main St"));

    let report = policy(&harness).notify_providers_of_new_service(&service).await?;

    let published = harness.broker.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "towing-notifications-exchange");
    assert_eq!(report.exchanges, vec!["towing-notifications-exchange".to_string()]);

    let envelope = NotificationEnvelope::decode(&published[0].message.body)?;
    assert_eq!(envelope.notification_type, NotificationType::NewServiceRequest);
    assert_eq!(envelope.data, service.to_payload()?);
    assert_eq!(envelope.data["address"], json!("Main St"));

    Ok(())
}

/// Test: The wildcard reaches every known category with the same snapshot
#[tokio::test]
async fn test_wildcard_fans_out_to_every_category() -> Result<()> {
    let harness = Harness::new();
    let service = ServiceSnapshot::new("svc-2", &["other"]);

    let report = policy(&harness).notify_providers_of_new_service(&service).await?;

    let published = harness.broker.published().await;
    assert_eq!(published.len(), 6);
    assert_eq!(report.matched_providers, None);

    let mut exchanges: Vec<String> = published.iter().map(|p| p.exchange.clone()).collect();
    exchanges.sort();
    let mut expected: Vec<String> = Category::defaults().iter().map(Category::exchange_name).collect();
    expected.sort();
    assert_eq!(exchanges, expected);

    for message in &published {
        let envelope = NotificationEnvelope::decode(&message.message.body)?;
        assert_eq!(envelope.data, service.to_payload()?);
    }

    Ok(())
}

/// Test: Only the first category of a multi-category service is routed
#[tokio::test]
async fn test_first_category_routes() -> Result<()> {
    let harness = Harness::new();
    let service = ServiceSnapshot::new("svc-3", &["flat_tire", "TOWING"]);

    policy(&harness).notify_providers_of_new_service(&service).await?;

    let published = harness.broker.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "flat_tire-notifications-exchange");

    Ok(())
}

/// Test: Unknown and missing categories are refused without publishing
#[tokio::test]
async fn test_unroutable_services_are_refused() -> Result<()> {
    let harness = Harness::new();
    let dispatch = policy(&harness);

    let unknown = dispatch
        .notify_providers_of_new_service(&ServiceSnapshot::new("svc-4", &["PLUMBING"]))
        .await;
    assert!(matches!(unknown, Err(NotifyError::UnknownCategory(ref c)) if c == "PLUMBING"));

    let missing = dispatch
        .notify_providers_of_new_service(&ServiceSnapshot::new("svc-5", &[]))
        .await;
    assert!(matches!(missing, Err(NotifyError::MissingCategory { ref service_id }) if service_id == "svc-5"));

    assert!(harness.broker.published().await.is_empty());

    Ok(())
}

/// Test: The report counts providers matched by field or signup list
#[tokio::test]
async fn test_report_counts_matched_providers() -> Result<()> {
    let harness = Harness::new();
    let directory = StaticDirectory::with_defaults()
        .with_provider(ProviderProfile::new("p-1", "LOCKOUT", &[]))
        .with_provider(ProviderProfile::new("p-2", "TOWING", &["LOCKOUT"]))
        .with_provider(ProviderProfile::new("p-3", "TOWING", &[]));
    let dispatch = DispatchPolicy::new(Arc::new(directory), harness.publisher.clone());

    let report = dispatch
        .notify_providers_of_new_service(&ServiceSnapshot::new("svc-6", &["LOCKOUT"]))
        .await?;

    assert_eq!(report.matched_providers, Some(2));
    assert_eq!(report.categories, vec![Category::new("LOCKOUT")]);

    Ok(())
}

/// Test: Creation still succeeds when the broker is down
#[tokio::test]
async fn test_best_effort_dispatch_never_fails_creation() -> Result<()> {
    let harness = Harness::new();
    let dispatch = policy(&harness);
    let store: Mutex<Vec<ServiceSnapshot>> = Mutex::new(Vec::new());

    harness.broker.set_offline(true);

    let service = ServiceSnapshot::new("svc-7", &["TOWING"]);
    store.lock().await.push(service.clone());

    let strict = dispatch.notify_providers_of_new_service(&service).await;
    assert!(matches!(strict, Err(NotifyError::BrokerUnavailable(_))));

    let report = dispatch.notify_providers_best_effort(&service).await;
    assert!(report.is_none());
    assert_eq!(store.lock().await.len(), 1, "Persisted service must survive");

    harness.broker.set_offline(false);
    assert!(dispatch.notify_providers_best_effort(&service).await.is_some());

    Ok(())
}

/// Test: One category exhausting its retries does not stop the wildcard fan-out
#[tokio::test]
async fn test_failed_category_does_not_stop_the_rest() -> Result<()> {
    let harness = Harness::new();
    let service = ServiceSnapshot::new("svc-8", &["OTHER"]);

    // Every retry of the first category (TOWING) fails.
    harness.broker.fail_next(3);

    let result = policy(&harness).notify_providers_of_new_service(&service).await;
    assert!(matches!(result, Err(NotifyError::BrokerUnavailable(_))));

    let published = harness.broker.published().await;
    assert_eq!(published.len(), 5, "Remaining categories must still be attempted");
    assert!(harness.broker.published_to("towing-notifications-exchange").await.is_empty());

    let mut exchanges: Vec<String> = published.iter().map(|p| p.exchange.clone()).collect();
    exchanges.sort();
    let mut expected: Vec<String> = Category::defaults()
        .iter()
        .filter(|category| category.as_str() != "TOWING")
        .map(Category::exchange_name)
        .collect();
    expected.sort();
    assert_eq!(exchanges, expected);

    Ok(())
}

/// Test: A persisted service can be dispatched again by id
#[tokio::test]
async fn test_replay_service_by_id() -> Result<()> {
    let harness = Harness::new();
    let service = ServiceSnapshot::new("svc-8", &["EMERGENCY"]);
    let records = FakeRecords {
        services: HashMap::from([("svc-8".to_string(), service)]),
    };
    let dispatch = policy(&harness).with_records(Arc::new(records));

    let report = dispatch.replay_service("svc-8").await?;
    assert_eq!(report.exchanges, vec!["emergency-notifications-exchange".to_string()]);

    let missing = dispatch.replay_service("svc-404").await;
    assert!(matches!(missing, Err(NotifyError::Directory(_))));

    let without_store = policy(&harness).replay_service("svc-8").await;
    assert!(matches!(without_store, Err(NotifyError::Configuration(_))));

    Ok(())
}
