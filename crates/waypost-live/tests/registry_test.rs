//! Integration tests for subscriber fan-out and keep-alive behavior.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use waypost_core::{TestClock, TrackingNumber, TrackingStatus};
use waypost_live::{PushEvent, PushEventKind, RegistryConfig, SubscriberRegistry, Subscription};

fn registry_with(keepalive_interval: Duration, buffer: usize) -> Arc<SubscriberRegistry> {
    Arc::new(SubscriberRegistry::new(
        RegistryConfig { keepalive_interval, buffer },
        Arc::new(TestClock::new()),
    ))
}

async fn skip_greeting(sub: &mut Subscription) {
    let event = sub.next().await.expect("stream ended before greeting");
    assert_eq!(event.kind(), PushEventKind::Connected);
}

#[tokio::test]
async fn broadcasts_reach_only_matching_subscribers() {
    let registry = registry_with(Duration::from_secs(30), 16);
    let alpha = TrackingNumber::from("ALPHA001");
    let beta = TrackingNumber::from("BETA0002");

    let mut alpha_a = registry.subscribe(&alpha);
    let mut alpha_b = registry.subscribe(&alpha);
    let mut beta_a = registry.subscribe(&beta);
    for sub in [&mut alpha_a, &mut alpha_b, &mut beta_a] {
        skip_greeting(sub).await;
    }

    let delivered = registry.broadcast(&alpha, PushEvent::destination_change(&alpha, "Home"));
    assert_eq!(delivered, 2);

    for sub in [&mut alpha_a, &mut alpha_b] {
        let event = sub.next().await.unwrap();
        assert_eq!(event.kind(), PushEventKind::DestinationChange);
        assert_eq!(event.json().unwrap()["destination"], "Home");
    }

    let nothing = tokio::time::timeout(Duration::from_millis(50), beta_a.next()).await;
    assert!(nothing.is_err(), "beta subscriber must not see alpha events");
}

#[tokio::test]
async fn events_arrive_in_broadcast_order() {
    let registry = registry_with(Duration::from_secs(30), 16);
    let number = TrackingNumber::from("ORDER001");
    let mut sub = registry.subscribe(&number);
    skip_greeting(&mut sub).await;

    registry.broadcast(
        &number,
        PushEvent::status_change(&number, TrackingStatus::Delivered, chrono::Utc::now()),
    );
    registry.broadcast(&number, PushEvent::delivery_removed(&number));
    registry.broadcast(&number, PushEvent::eta_change(&number, chrono::Utc::now()));

    let kinds: Vec<PushEventKind> = sub.by_ref().take(3).map(|e| e.kind()).collect().await;
    assert_eq!(
        kinds,
        vec![PushEventKind::StatusChange, PushEventKind::DeliveryRemoved, PushEventKind::EtaChange]
    );
}

#[tokio::test]
async fn removed_subscriber_receives_nothing_further() {
    let registry = registry_with(Duration::from_secs(30), 16);
    let number = TrackingNumber::from("GONE0001");
    let mut sub = registry.subscribe(&number);
    skip_greeting(&mut sub).await;

    assert!(registry.unsubscribe(&number, sub.id()));
    assert_eq!(registry.broadcast(&number, PushEvent::delivery_removed(&number)), 0);

    assert!(sub.next().await.is_none());
}

#[tokio::test]
async fn statistics_track_registrations() {
    let registry = registry_with(Duration::from_secs(30), 4);
    let a = TrackingNumber::from("STATS001");
    let b = TrackingNumber::from("STATS002");

    let subs: Vec<Subscription> =
        vec![registry.subscribe(&a), registry.subscribe(&a), registry.subscribe(&b)];

    assert_eq!(registry.subscriber_count(&a), 2);
    assert_eq!(registry.subscriber_count(&b), 1);
    assert_eq!(registry.total_subscribers(), 3);
    assert_eq!(registry.tracking_count(), 2);

    drop(subs);

    assert_eq!(registry.total_subscribers(), 0);
    assert_eq!(registry.tracking_count(), 0);
}

#[tokio::test]
async fn concurrent_subscribe_and_broadcast_never_double_deliver() {
    let registry = registry_with(Duration::from_secs(30), 256);
    let number = TrackingNumber::from("RACE0001");

    let mut subs = Vec::new();
    for _ in 0..20 {
        let mut sub = registry.subscribe(&number);
        skip_greeting(&mut sub).await;
        subs.push(sub);
    }

    let mut handles = Vec::new();
    for _ in 0..10 {
        let registry = registry.clone();
        let number = number.clone();
        handles.push(tokio::spawn(async move {
            registry.broadcast(&number, PushEvent::delivery_removed(&number))
        }));
    }
    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 200);

    for sub in &mut subs {
        let received: Vec<PushEvent> = sub.by_ref().take(10).collect().await;
        assert_eq!(received.len(), 10);
        let extra = tokio::time::timeout(Duration::from_millis(10), sub.next()).await;
        assert!(extra.is_err());
    }
}

#[tokio::test(start_paused = true)]
async fn heartbeats_follow_the_configured_interval() {
    let registry = registry_with(Duration::from_secs(30), 8);
    let number = TrackingNumber::from("BEAT0001");
    let start = tokio::time::Instant::now();

    let mut sub = registry.subscribe(&number);
    skip_greeting(&mut sub).await;

    let first = sub.next().await.unwrap();
    assert_eq!(first.kind(), PushEventKind::Heartbeat);
    assert!(first.json().unwrap()["timestamp"].is_string());
    assert_eq!(start.elapsed(), Duration::from_secs(30));

    let second = sub.next().await.unwrap();
    assert_eq!(second.kind(), PushEventKind::Heartbeat);
    assert_eq!(start.elapsed(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn heartbeats_stop_after_unsubscribe() {
    let registry = registry_with(Duration::from_secs(5), 8);
    let number = TrackingNumber::from("BEAT0002");

    let mut sub = registry.subscribe(&number);
    skip_greeting(&mut sub).await;
    assert_eq!(sub.next().await.unwrap().kind(), PushEventKind::Heartbeat);

    registry.unsubscribe(&number, sub.id());

    // Once the keep-alive task exits the last sender is gone and the stream
    // ends instead of producing further beats.
    assert!(sub.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn full_buffer_skips_heartbeat_without_eviction() {
    let registry = registry_with(Duration::from_secs(5), 1);
    let number = TrackingNumber::from("BEAT0003");

    // The greeting stays unread, so every beat finds the buffer full.
    let _sub = registry.subscribe(&number);
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(registry.subscriber_count(&number), 1);
}
