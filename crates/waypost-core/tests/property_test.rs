//! Property-based tests for tracking invariants.
//!
//! Runs against the file backend in a temporary directory with a test clock,
//! so timestamps can be driven forwards and backwards at will.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::{prelude::*, test_runner::Config as ProptestConfig};
use waypost_core::{
    Clock, FileStore, TestClock, TrackingNumber, TrackingStatus, TrackingStore, UpdateKey,
    DELIVERED_LOCATION,
};
use waypost_testing::TrackingBuilder;

fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 50,
        timeout: 5000,
        fork: false,
        failure_persistence: None,
        source_file: None,
        ..ProptestConfig::default()
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).single().unwrap()
}

/// Location labels with `Delivered` mixed in.
fn label_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => prop::string::string_regex("[A-Z][a-z]{2,10}( [A-Z][a-z]{2,8})?").unwrap(),
        1 => Just(DELIVERED_LOCATION.to_string()),
    ]
}

fn status_strategy() -> impl Strategy<Value = TrackingStatus> {
    prop::sample::select(TrackingStatus::ALL.to_vec())
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Locations always list ascending by `recorded_at`, whatever order the
    /// clock produced them in.
    #[test]
    fn locations_list_sorted_after_clock_jumps(
        offsets in prop::collection::vec(-10_000i64..10_000, 1..20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let clock = TestClock::with_start_time(base_time());
            let shared: Arc<dyn Clock> = Arc::new(clock.clone());
            let store = FileStore::open(dir.path(), shared).await.unwrap();

            let new = TrackingBuilder::new().build();
            let number = new.tracking_number.clone();
            let id = store.create_tracking(new).await.unwrap();

            for (i, offset) in offsets.iter().enumerate() {
                clock.jump_to(base_time() + Duration::seconds(*offset));
                store.append_location(id, &number, &format!("Stop {i}")).await.unwrap();
            }

            let locations = store.list_locations(&number).await.unwrap();
            prop_assert_eq!(locations.len(), offsets.len());
            prop_assert!(locations.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));

            // Equal timestamps keep insertion order.
            for pair in locations.windows(2) {
                if pair[0].recorded_at == pair[1].recorded_at {
                    let index = |label: &str| {
                        label.trim_start_matches("Stop ").parse::<usize>().unwrap()
                    };
                    prop_assert!(index(&pair[0].location) < index(&pair[1].location));
                }
            }
            Ok(())
        })?;
    }

    /// Removing `Delivered` entries leaves exactly the other entries, in
    /// their original order, and reports whether anything was removed.
    #[test]
    fn delivered_removal_keeps_everything_else(
        labels in prop::collection::vec(label_strategy(), 0..15),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let clock = TestClock::with_start_time(base_time());
            let shared: Arc<dyn Clock> = Arc::new(clock.clone());
            let store = FileStore::open(dir.path(), shared).await.unwrap();

            let new = TrackingBuilder::new().build();
            let number = new.tracking_number.clone();
            let id = store.create_tracking(new).await.unwrap();

            for label in &labels {
                clock.advance(std::time::Duration::from_secs(60));
                store.append_location(id, &number, label).await.unwrap();
            }

            let had_marker = labels.iter().any(|l| l == DELIVERED_LOCATION);
            prop_assert_eq!(store.has_delivered_location(&number).await.unwrap(), had_marker);
            prop_assert_eq!(store.remove_delivered_locations(&number).await.unwrap(), had_marker);

            let remaining: Vec<String> = store
                .list_locations(&number)
                .await
                .unwrap()
                .into_iter()
                .map(|l| l.location)
                .collect();
            let expected: Vec<String> =
                labels.iter().filter(|l| *l != DELIVERED_LOCATION).cloned().collect();
            prop_assert_eq!(remaining, expected);
            prop_assert!(!store.has_delivered_location(&number).await.unwrap());
            Ok(())
        })?;
    }

    /// A bare status update never changes the location history.
    #[test]
    fn status_updates_leave_history_alone(
        statuses in prop::collection::vec(status_strategy(), 1..10),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let clock: Arc<dyn Clock> = Arc::new(TestClock::with_start_time(base_time()));
            let store = FileStore::open(dir.path(), clock).await.unwrap();

            let new = TrackingBuilder::new().build();
            let number = new.tracking_number.clone();
            let id = store.create_tracking(new).await.unwrap();
            store.append_location(id, &number, "Depot").await.unwrap();

            for status in &statuses {
                prop_assert!(store.update_status(&number, *status).await.unwrap());
            }

            let tracking = store.find_tracking(&number).await.unwrap().unwrap();
            prop_assert_eq!(Some(&tracking.status), statuses.last());
            prop_assert_eq!(store.list_locations(&number).await.unwrap().len(), 1);
            Ok(())
        })?;
    }

    /// A generated key verifies itself and nothing else.
    #[test]
    fn update_key_accepts_only_itself(other in "[a-z0-9]{0,20}") {
        let key = UpdateKey::generate();
        let exposed = key.expose().to_string();

        prop_assert_eq!(exposed.len(), 16);
        prop_assert!(key.verify(&exposed));
        prop_assert_eq!(key.verify(&other), other == exposed);
    }

    /// Generated tracking numbers are always eight uppercase alphanumerics.
    #[test]
    fn generated_tracking_numbers_are_well_formed(_seed in any::<u8>()) {
        let number = TrackingNumber::generate();

        prop_assert!(number.is_well_formed());
        prop_assert_eq!(number.as_str().len(), 8);
        prop_assert!(number
            .as_str()
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    /// Status labels survive a text round trip.
    #[test]
    fn status_labels_parse_back(status in status_strategy()) {
        let parsed: TrackingStatus = status.as_str().parse().unwrap();
        prop_assert_eq!(parsed, status);
    }
}
