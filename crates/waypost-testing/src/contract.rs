//! Behavioural contract for `TrackingStore` backends.
//!
//! Every backend must pass [`run_all`]. Checks create their own trackings
//! with fresh numbers, so they can run against a shared database.

use anyhow::{ensure, Context, Result};
use chrono::Duration;
use waypost_core::{
    CoreError, TrackingId, TrackingNumber, TrackingStatus, TrackingStore, DELIVERED_LOCATION,
};

use crate::fixtures::{default_eta, TrackingBuilder};

/// Runs every contract check in sequence.
///
/// # Errors
///
/// Returns the first failed check with its name as context.
pub async fn run_all(store: &dyn TrackingStore) -> Result<()> {
    create_then_find(store).await.context("create_then_find")?;
    duplicate_number_is_rejected(store).await.context("duplicate_number_is_rejected")?;
    unknown_tracking_mutations_report_false(store)
        .await
        .context("unknown_tracking_mutations_report_false")?;
    field_updates_persist(store).await.context("field_updates_persist")?;
    locations_list_in_recorded_order(store).await.context("locations_list_in_recorded_order")?;
    append_requires_matching_id(store).await.context("append_requires_matching_id")?;
    remove_delivered_only_removes_markers(store)
        .await
        .context("remove_delivered_only_removes_markers")?;
    update_key_verification(store).await.context("update_key_verification")?;
    list_trackings_newest_first(store).await.context("list_trackings_newest_first")?;
    store.health_check().await.context("health_check")?;
    Ok(())
}

/// A created tracking reads back with every field and status `Preparing`.
///
/// # Errors
///
/// Returns an error describing the mismatch.
pub async fn create_then_find(store: &dyn TrackingStore) -> Result<()> {
    let new = TrackingBuilder::new()
        .provider("Owl Post")
        .destination("Hogsmeade")
        .creator("fr-FR", "Europe/Paris")
        .build();
    let number = new.tracking_number.clone();
    let key = new.update_key.expose().to_string();

    let id = store.create_tracking(new).await?;
    let tracking = store.find_tracking(&number).await?.context("created tracking not found")?;

    ensure!(tracking.id == id, "id mismatch");
    ensure!(tracking.tracking_number == number, "number mismatch");
    ensure!(tracking.provider == "Owl Post", "provider mismatch");
    ensure!(tracking.destination == "Hogsmeade", "destination mismatch");
    ensure!(tracking.eta == default_eta(), "eta mismatch: {}", tracking.eta);
    ensure!(tracking.status == TrackingStatus::Preparing, "status is {}", tracking.status);
    ensure!(tracking.update_key.verify(&key), "update key did not round-trip");
    ensure!(tracking.creator_locale.as_deref() == Some("fr-FR"), "locale mismatch");
    ensure!(tracking.creator_timezone.as_deref() == Some("Europe/Paris"), "timezone mismatch");

    let full = store
        .find_tracking_with_locations(&number)
        .await?
        .context("tracking with locations not found")?;
    ensure!(full.locations.is_empty(), "new tracking has locations");

    Ok(())
}

/// Reusing a tracking number fails with `DuplicateTrackingNumber`.
///
/// # Errors
///
/// Returns an error if the second create succeeds or fails differently.
pub async fn duplicate_number_is_rejected(store: &dyn TrackingStore) -> Result<()> {
    let first = TrackingBuilder::new().build();
    let number = first.tracking_number.clone();
    store.create_tracking(first).await?;

    let second = TrackingBuilder::new().tracking_number(number.clone()).build();
    match store.create_tracking(second).await {
        Err(CoreError::DuplicateTrackingNumber(taken)) => {
            ensure!(taken == number, "reported {taken}, expected {number}");
            Ok(())
        },
        Err(other) => anyhow::bail!("unexpected error: {other}"),
        Ok(_) => anyhow::bail!("duplicate tracking number accepted"),
    }
}

/// Mutations against an unknown number change nothing and report it.
///
/// # Errors
///
/// Returns an error if any mutation claims success.
pub async fn unknown_tracking_mutations_report_false(store: &dyn TrackingStore) -> Result<()> {
    let unknown = TrackingNumber::generate();

    ensure!(store.find_tracking(&unknown).await?.is_none(), "unknown tracking found");
    ensure!(
        store.find_tracking_with_locations(&unknown).await?.is_none(),
        "unknown tracking found with locations"
    );
    ensure!(!store.update_eta(&unknown, default_eta()).await?, "eta update reported true");
    ensure!(!store.update_destination(&unknown, "Nowhere").await?, "destination reported true");
    ensure!(
        !store.update_status(&unknown, TrackingStatus::Delayed).await?,
        "status update reported true"
    );
    ensure!(!store.remove_delivered_locations(&unknown).await?, "removal reported true");
    ensure!(store.list_locations(&unknown).await?.is_empty(), "unknown tracking has locations");

    match store.append_location(TrackingId::new(), &unknown, "Somewhere").await {
        Err(CoreError::NotFound(_)) => Ok(()),
        Err(other) => anyhow::bail!("unexpected error: {other}"),
        Ok(_) => anyhow::bail!("append to unknown tracking succeeded"),
    }
}

/// ETA, destination and status updates are visible on the next read.
///
/// # Errors
///
/// Returns an error describing the stale field.
pub async fn field_updates_persist(store: &dyn TrackingStore) -> Result<()> {
    let new = TrackingBuilder::new().build();
    let number = new.tracking_number.clone();
    store.create_tracking(new).await?;
    let before = store.find_tracking(&number).await?.context("tracking not found")?;

    let eta = default_eta() + Duration::days(3);
    ensure!(store.update_eta(&number, eta).await?, "eta update reported false");
    ensure!(store.update_destination(&number, "Moon Base").await?, "destination reported false");
    ensure!(
        store.update_status(&number, TrackingStatus::OutForDelivery).await?,
        "status update reported false"
    );

    let after = store.find_tracking(&number).await?.context("tracking vanished")?;
    ensure!(after.eta == eta, "eta is {}", after.eta);
    ensure!(after.destination == "Moon Base", "destination is {}", after.destination);
    ensure!(after.status == TrackingStatus::OutForDelivery, "status is {}", after.status);
    ensure!(after.updated_at >= before.updated_at, "updated_at went backwards");
    ensure!(after.created_at == before.created_at, "created_at changed");

    // A status update alone never touches the history.
    ensure!(
        store.update_status(&number, TrackingStatus::Delivered).await?,
        "status update reported false"
    );
    ensure!(!store.has_delivered_location(&number).await?, "status update wrote a location");

    Ok(())
}

/// Locations come back oldest first, in insertion order.
///
/// # Errors
///
/// Returns an error if the order or contents differ.
pub async fn locations_list_in_recorded_order(store: &dyn TrackingStore) -> Result<()> {
    let new = TrackingBuilder::new().build();
    let number = new.tracking_number.clone();
    let id = store.create_tracking(new).await?;

    let labels = ["Paris", "Lyon", "Marseille", "Nice"];
    for label in labels {
        let update = store.append_location(id, &number, label).await?;
        ensure!(update.location == label, "stored {} for {label}", update.location);
        ensure!(update.tracking_id == id, "stored under the wrong tracking");
        ensure!(update.tracking_number == number, "stored under the wrong number");
    }

    let locations = store.list_locations(&number).await?;
    let listed: Vec<&str> = locations.iter().map(|l| l.location.as_str()).collect();
    ensure!(listed == labels, "listed {listed:?}");
    ensure!(
        locations.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at),
        "locations not sorted by recorded_at"
    );

    Ok(())
}

/// Appends must name an existing tracking by both id and number.
///
/// # Errors
///
/// Returns an error if a mismatched append is stored.
pub async fn append_requires_matching_id(store: &dyn TrackingStore) -> Result<()> {
    let new = TrackingBuilder::new().build();
    let number = new.tracking_number.clone();
    store.create_tracking(new).await?;

    match store.append_location(TrackingId::new(), &number, "Nowhere").await {
        Err(CoreError::NotFound(_)) => {},
        Err(other) => anyhow::bail!("unexpected error: {other}"),
        Ok(_) => anyhow::bail!("append with a foreign id succeeded"),
    }
    ensure!(store.list_locations(&number).await?.is_empty(), "mismatched append was stored");

    Ok(())
}

/// Removing `Delivered` entries keeps every other location.
///
/// # Errors
///
/// Returns an error if the wrong entries are removed or the flag is wrong.
pub async fn remove_delivered_only_removes_markers(store: &dyn TrackingStore) -> Result<()> {
    let new = TrackingBuilder::new().build();
    let number = new.tracking_number.clone();
    let id = store.create_tracking(new).await?;

    store.append_location(id, &number, "Depot").await?;
    ensure!(!store.remove_delivered_locations(&number).await?, "removed without markers");

    store.append_location(id, &number, DELIVERED_LOCATION).await?;
    store.append_location(id, &number, "Doorstep").await?;
    store.append_location(id, &number, DELIVERED_LOCATION).await?;
    ensure!(store.has_delivered_location(&number).await?, "marker not detected");

    ensure!(store.remove_delivered_locations(&number).await?, "removal reported false");
    ensure!(!store.has_delivered_location(&number).await?, "marker survived removal");

    let remaining: Vec<String> =
        store.list_locations(&number).await?.into_iter().map(|l| l.location).collect();
    ensure!(remaining == ["Depot", "Doorstep"], "remaining {remaining:?}");

    ensure!(!store.remove_delivered_locations(&number).await?, "second removal reported true");

    Ok(())
}

/// Only the exact stored key verifies.
///
/// # Errors
///
/// Returns an error if a wrong key verifies or the right one does not.
pub async fn update_key_verification(store: &dyn TrackingStore) -> Result<()> {
    let new = TrackingBuilder::new().update_key("k3y0000000000001").build();
    let number = new.tracking_number.clone();
    store.create_tracking(new).await?;

    ensure!(store.verify_update_key(&number, "k3y0000000000001").await?, "right key rejected");
    ensure!(!store.verify_update_key(&number, "k3y0000000000002").await?, "wrong key accepted");
    ensure!(!store.verify_update_key(&number, "").await?, "empty key accepted");
    ensure!(
        !store.verify_update_key(&TrackingNumber::generate(), "k3y0000000000001").await?,
        "key accepted for unknown tracking"
    );

    Ok(())
}

/// Listing returns every tracking with `created_at` non-increasing.
///
/// # Errors
///
/// Returns an error if a tracking is missing or the order is wrong.
pub async fn list_trackings_newest_first(store: &dyn TrackingStore) -> Result<()> {
    let mut numbers = Vec::new();
    for _ in 0..3 {
        let new = TrackingBuilder::new().build();
        numbers.push(new.tracking_number.clone());
        store.create_tracking(new).await?;
    }

    let listed = store.list_trackings().await?;
    for number in &numbers {
        ensure!(listed.iter().any(|t| &t.tracking_number == number), "{number} not listed");
    }
    ensure!(
        listed.windows(2).all(|w| w[0].created_at >= w[1].created_at),
        "trackings not sorted newest first"
    );

    Ok(())
}
