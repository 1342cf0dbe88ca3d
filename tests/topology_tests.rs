use anyhow::Result;
use notify_service::{
    broker::{Broker, OutboundMessage},
    models::{category::Category, destination::Destination, role::Role},
};

use crate::support::Harness;

/// Test: Declaring the same direct queue twice is harmless and keeps one queue
#[tokio::test]
async fn test_direct_queue_declaration_is_idempotent() -> Result<()> {
    let harness = Harness::new();

    let first = harness.topology.ensure_direct_queue(Role::Client, "client123").await?;
    let second = harness.topology.ensure_direct_queue(Role::Client, "client123").await?;

    assert_eq!(first, second);
    assert_eq!(first.name, "notifications_client_client123");
    assert_eq!(harness.broker.declare_count(&first.name).await, 2);
    assert_eq!(harness.broker.queue_names().await, vec![first.name]);

    Ok(())
}

/// Test: Broadcast exchanges are named from the lower-cased category
#[tokio::test]
async fn test_broadcast_exchange_naming() -> Result<()> {
    let harness = Harness::new();

    let exchange = harness
        .topology
        .ensure_broadcast_exchange(&Category::new("Fuel_Delivery"))
        .await?;

    assert_eq!(exchange.name, "fuel_delivery-notifications-exchange");
    assert!(harness.broker.has_exchange("fuel_delivery-notifications-exchange").await);

    harness
        .topology
        .ensure_destination(&Destination::broadcast(Category::new("FUEL_DELIVERY")))
        .await?;
    assert_eq!(harness.broker.declare_count(&exchange.name).await, 2);

    Ok(())
}

/// Test: Each private binding gets its own server-named queue
#[tokio::test]
async fn test_private_bindings_are_per_caller() -> Result<()> {
    let harness = Harness::new();
    let categories = vec![Category::new("TOWING"), Category::new("LOCKOUT")];

    let a = harness.topology.ensure_private_binding(&categories).await?;
    let b = harness.topology.ensure_private_binding(&categories[..1]).await?;

    assert_ne!(a.name, b.name);
    assert!(a.name.starts_with("amq.gen-"));
    assert_eq!(
        harness.broker.bindings("towing-notifications-exchange").await,
        vec![a.name.clone(), b.name.clone()]
    );
    assert_eq!(
        harness.broker.bindings("lockout-notifications-exchange").await,
        vec![a.name.clone()]
    );

    harness
        .broker
        .publish(
            "lockout-notifications-exchange",
            "",
            OutboundMessage::json(b"{}".to_vec()),
        )
        .await?;
    assert_eq!(harness.broker.queue_depth(&a.name).await, 1);
    assert_eq!(harness.broker.queue_depth(&b.name).await, 0);

    Ok(())
}

/// Test: The dead-letter queue is declared under the configured name
#[tokio::test]
async fn test_dead_letter_queue_declared() -> Result<()> {
    let harness = Harness::new();

    let queue = harness
        .topology
        .ensure_dead_letter_queue("notifications_dead_letter")
        .await?;

    assert_eq!(queue.name, "notifications_dead_letter");
    assert!(harness.broker.has_queue("notifications_dead_letter").await);

    Ok(())
}
