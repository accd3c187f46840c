use std::sync::Arc;

use anyhow::Result;
use alert_queue::{events::AlertEventBus, models::event::{AlertEventType, Scope}};
use serde_json::json;

/// Test: One emission reaches the alert, hospital and global scopes,
/// and nobody else.
#[tokio::test]
async fn test_event_fans_out_to_three_scopes() -> Result<()> {
    let bus = Arc::new(AlertEventBus::new());

    let mut by_alert = bus.subscribe(Scope::Alert("alert-1".to_string()));
    let mut by_hospital = bus.subscribe(Scope::Hospital("hosp-1".to_string()));
    let mut global = bus.subscribe(Scope::Global);
    let mut other_hospital = bus.subscribe(Scope::Hospital("hosp-2".to_string()));

    bus.alert_created("alert-1", "hosp-1", json!({"severity": "red"}));

    for subscription in [&mut by_alert, &mut by_hospital, &mut global] {
        let event = subscription.try_recv().expect("scope should receive the event");
        assert_eq!(event.event_type, AlertEventType::Created);
        assert_eq!(event.alert_id, "alert-1");
        assert_eq!(event.data["severity"], "red");
    }

    assert!(other_hospital.try_recv().is_none(), "Unrelated scope stays quiet");

    Ok(())
}

/// Test: Fan-out holds up with a crowd of subscribers on one scope.
#[tokio::test]
async fn test_many_subscribers_all_receive() -> Result<()> {
    let bus = Arc::new(AlertEventBus::new());

    let mut subscriptions: Vec<_> = (0..150)
        .map(|_| bus.subscribe(Scope::Hospital("hosp-1".to_string())))
        .collect();
    assert_eq!(bus.subscriber_count(), 150);

    bus.alert_acknowledged("alert-1", "hosp-1", json!({}));

    for subscription in &mut subscriptions {
        assert!(subscription.try_recv().is_some());
    }

    Ok(())
}

/// Test: Event ids are monotonic and the subscription tracks the last
/// one it has seen.
#[tokio::test]
async fn test_event_ids_are_monotonic_cursor() -> Result<()> {
    let bus = Arc::new(AlertEventBus::new());
    let mut subscription = bus.subscribe(Scope::Global);

    bus.alert_created("alert-1", "hosp-1", json!({}));
    bus.alert_updated("alert-1", "hosp-1", json!({}));
    bus.alert_resolved("alert-1", "hosp-1", json!({}));

    let mut last = 0;
    while let Some(event) = subscription.try_recv() {
        assert!(event.id > last, "ids must strictly increase");
        last = event.id;
    }
    assert_eq!(subscription.last_event_id(), last);
    assert!(last >= 3);

    Ok(())
}

/// Test: Unsubscribing twice is harmless, and a dropped subscription
/// disappears from the registry.
#[tokio::test]
async fn test_unsubscribe_is_idempotent_and_drop_cleans_up() -> Result<()> {
    let bus = Arc::new(AlertEventBus::new());

    let keeper = bus.subscribe(Scope::Global);
    let leaver = bus.subscribe(Scope::Hospital("hosp-1".to_string()));
    assert_eq!(bus.subscriber_count(), 2);

    leaver.unsubscribe();
    assert_eq!(bus.subscriber_count(), 1);
    leaver.unsubscribe();
    assert_eq!(bus.subscriber_count(), 1);
    drop(leaver);
    assert_eq!(bus.subscriber_count(), 1);

    drop(keeper);
    assert_eq!(bus.subscriber_count(), 0);

    // Emitting into empty scopes is a no-op, not an error.
    bus.alert_escalated("alert-1", "hosp-1", json!({"tier": 1}));

    Ok(())
}

/// Test: Scope keys parse strictly.
#[tokio::test]
async fn test_scope_keys_parse_strictly() -> Result<()> {
    assert_eq!(
        Scope::parse("hospital:hosp-1"),
        Some(Scope::Hospital("hosp-1".to_string()))
    );
    assert_eq!(
        Scope::parse("alert:alert-9"),
        Some(Scope::Alert("alert-9".to_string()))
    );
    assert_eq!(Scope::parse("*"), Some(Scope::Global));

    assert_eq!(Scope::parse("hospital:"), None);
    assert_eq!(Scope::parse("alert:"), None);
    assert_eq!(Scope::parse("ward:w1"), None);
    assert_eq!(Scope::parse(""), None);

    assert_eq!(Scope::Hospital("hosp-1".to_string()).to_string(), "hospital:hosp-1");
    assert_eq!(Scope::Global.to_string(), "*");

    Ok(())
}
