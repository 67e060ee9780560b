//! Flat-file backend storing two JSON documents.
//!
//! `trackings.json` maps tracking numbers to trackings and `locations.json`
//! maps tracking numbers to their location history. Every mutation reads the
//! whole document, changes it and writes it back through a temporary sibling
//! file that is renamed over the target.
//!
//! Concurrent writers to the same document are not excluded. The last rename
//! wins and the losing write is lost.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{StoreBackend, TrackingStore};
use crate::{
    error::{CoreError, Result},
    models::{
        LocationId, LocationUpdate, NewTracking, Tracking, TrackingId, TrackingNumber,
        TrackingStatus,
    },
    time::Clock,
};

const TRACKINGS_FILE: &str = "trackings.json";
const LOCATIONS_FILE: &str = "locations.json";

type TrackingDocument = BTreeMap<TrackingNumber, Tracking>;
type LocationDocument = BTreeMap<TrackingNumber, Vec<LocationUpdate>>;

/// Tracking store backed by JSON documents on disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileStore {
    /// Opens a store rooted at `data_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Io` if the directory cannot be created.
    pub async fn open(data_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        debug!(data_dir = %data_dir.display(), "file store opened");

        Ok(Self { data_dir, clock })
    }

    /// Returns the directory holding the documents.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn trackings_path(&self) -> PathBuf {
        self.data_dir.join(TRACKINGS_FILE)
    }

    fn locations_path(&self) -> PathBuf {
        self.data_dir.join(LOCATIONS_FILE)
    }

    async fn read_trackings(&self) -> Result<TrackingDocument> {
        read_document(&self.trackings_path()).await
    }

    async fn write_trackings(&self, doc: &TrackingDocument) -> Result<()> {
        write_document(&self.trackings_path(), doc).await
    }

    async fn read_locations(&self) -> Result<LocationDocument> {
        read_document(&self.locations_path()).await
    }

    async fn write_locations(&self, doc: &LocationDocument) -> Result<()> {
        write_document(&self.locations_path(), doc).await
    }

    /// Applies `mutate` to one tracking and stamps `updated_at`.
    async fn modify_tracking<F>(&self, tracking_number: &TrackingNumber, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Tracking) + Send,
    {
        let mut doc = self.read_trackings().await?;
        let Some(tracking) = doc.get_mut(tracking_number) else {
            return Ok(false);
        };

        mutate(tracking);
        tracking.updated_at = self.clock.now_utc();
        self.write_trackings(&doc).await?;

        Ok(true)
    }
}

/// Reads a document, treating a missing or empty file as an empty document.
async fn read_document<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(T::default()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Writes a document to a unique sibling file, then renames it into place.
async fn write_document<T>(path: &Path, doc: &T) -> Result<()>
where
    T: Serialize + Sync,
{
    let bytes = serde_json::to_vec_pretty(doc)?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("document");
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    Ok(())
}

#[async_trait]
impl TrackingStore for FileStore {
    async fn backend(&self) -> Result<StoreBackend> {
        Ok(StoreBackend::File)
    }

    async fn create_tracking(&self, new: NewTracking) -> Result<TrackingId> {
        let mut doc = self.read_trackings().await?;
        if doc.contains_key(&new.tracking_number) {
            return Err(CoreError::DuplicateTrackingNumber(new.tracking_number));
        }

        let now = self.clock.now_utc();
        let tracking = Tracking {
            id: TrackingId::new(),
            tracking_number: new.tracking_number,
            provider: new.provider,
            destination: new.destination,
            eta: new.eta,
            status: TrackingStatus::Preparing,
            update_key: new.update_key,
            creator_locale: new.creator_locale,
            creator_timezone: new.creator_timezone,
            created_at: now,
            updated_at: now,
        };
        let id = tracking.id;

        doc.insert(tracking.tracking_number.clone(), tracking);
        self.write_trackings(&doc).await?;

        Ok(id)
    }

    async fn find_tracking(&self, tracking_number: &TrackingNumber) -> Result<Option<Tracking>> {
        let mut doc = self.read_trackings().await?;
        Ok(doc.remove(tracking_number))
    }

    async fn update_eta(
        &self,
        tracking_number: &TrackingNumber,
        eta: DateTime<Utc>,
    ) -> Result<bool> {
        self.modify_tracking(tracking_number, |tracking| tracking.eta = eta).await
    }

    async fn update_destination(
        &self,
        tracking_number: &TrackingNumber,
        destination: &str,
    ) -> Result<bool> {
        let destination = destination.to_string();
        self.modify_tracking(tracking_number, move |tracking| tracking.destination = destination)
            .await
    }

    async fn update_status(
        &self,
        tracking_number: &TrackingNumber,
        status: TrackingStatus,
    ) -> Result<bool> {
        self.modify_tracking(tracking_number, |tracking| tracking.status = status).await
    }

    async fn append_location(
        &self,
        tracking_id: TrackingId,
        tracking_number: &TrackingNumber,
        location: &str,
    ) -> Result<LocationUpdate> {
        let trackings = self.read_trackings().await?;
        match trackings.get(tracking_number) {
            Some(tracking) if tracking.id == tracking_id => {},
            _ => return Err(CoreError::NotFound(format!("tracking {tracking_number}"))),
        }

        let update = LocationUpdate {
            id: LocationId::new(),
            tracking_id,
            tracking_number: tracking_number.clone(),
            location: location.to_string(),
            recorded_at: self.clock.now_utc(),
        };

        let mut doc = self.read_locations().await?;
        doc.entry(tracking_number.clone()).or_default().push(update.clone());
        self.write_locations(&doc).await?;

        Ok(update)
    }

    async fn list_locations(
        &self,
        tracking_number: &TrackingNumber,
    ) -> Result<Vec<LocationUpdate>> {
        let mut doc = self.read_locations().await?;
        let mut locations = doc.remove(tracking_number).unwrap_or_default();
        locations.sort_by_key(|update| update.recorded_at);

        Ok(locations)
    }

    async fn remove_delivered_locations(&self, tracking_number: &TrackingNumber) -> Result<bool> {
        let mut doc = self.read_locations().await?;
        let Some(locations) = doc.get_mut(tracking_number) else {
            return Ok(false);
        };

        let before = locations.len();
        locations.retain(|update| !update.is_delivered_marker());
        if locations.len() == before {
            return Ok(false);
        }

        if locations.is_empty() {
            doc.remove(tracking_number);
        }
        self.write_locations(&doc).await?;

        Ok(true)
    }

    async fn list_trackings(&self) -> Result<Vec<Tracking>> {
        let doc = self.read_trackings().await?;
        let mut trackings: Vec<Tracking> = doc.into_values().collect();
        trackings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(trackings)
    }

    async fn health_check(&self) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.data_dir).await?;
        if !metadata.is_dir() {
            return Err(CoreError::InvalidInput(format!(
                "{} is not a directory",
                self.data_dir.display()
            )));
        }
        self.read_trackings().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{time::TestClock, DELIVERED_LOCATION};

    async fn store_with_clock() -> (tempfile::TempDir, FileStore, TestClock) {
        let dir = tempfile::tempdir().unwrap();
        let clock = TestClock::new();
        let store = FileStore::open(dir.path(), Arc::new(clock.clone())).await.unwrap();
        (dir, store, clock)
    }

    #[tokio::test]
    async fn missing_documents_read_as_empty() {
        let (_dir, store, _clock) = store_with_clock().await;

        assert!(store.list_trackings().await.unwrap().is_empty());
        assert!(store.list_locations(&TrackingNumber::from("NOPE0000")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn documents_are_written_as_pretty_json_objects() {
        let (dir, store, _clock) = store_with_clock().await;
        let new = NewTracking::new("Love Express", "Her Heart", Utc::now());
        let number = new.tracking_number.clone();
        let id = store.create_tracking(new).await.unwrap();
        store.append_location(id, &number, "Depot").await.unwrap();

        let trackings = std::fs::read_to_string(dir.path().join(TRACKINGS_FILE)).unwrap();
        let locations = std::fs::read_to_string(dir.path().join(LOCATIONS_FILE)).unwrap();

        let trackings: serde_json::Value = serde_json::from_str(&trackings).unwrap();
        let locations: serde_json::Value = serde_json::from_str(&locations).unwrap();
        assert!(trackings.get(number.as_str()).is_some());
        assert_eq!(locations[number.as_str()].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_temporary_files_are_left_behind() {
        let (dir, store, _clock) = store_with_clock().await;
        store.create_tracking(NewTracking::new("P", "D", Utc::now())).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![TRACKINGS_FILE.to_string()]);
    }

    #[tokio::test]
    async fn mutations_stamp_updated_at_from_the_clock() {
        let (_dir, store, clock) = store_with_clock().await;
        let new = NewTracking::new("P", "D", Utc::now());
        let number = new.tracking_number.clone();
        store.create_tracking(new).await.unwrap();
        let created = store.find_tracking(&number).await.unwrap().unwrap();

        clock.advance(Duration::from_secs(90));
        assert!(store.update_destination(&number, "Elsewhere").await.unwrap());

        let updated = store.find_tracking(&number).await.unwrap().unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.updated_at, created.updated_at + chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn locations_sort_even_when_the_clock_goes_backwards() {
        let (_dir, store, clock) = store_with_clock().await;
        let new = NewTracking::new("P", "D", Utc::now());
        let number = new.tracking_number.clone();
        let id = store.create_tracking(new).await.unwrap();

        let start = clock.now_utc();
        store.append_location(id, &number, "second").await.unwrap();
        clock.jump_to(start - chrono::Duration::minutes(5));
        store.append_location(id, &number, "first").await.unwrap();

        let labels: Vec<String> =
            store.list_locations(&number).await.unwrap().into_iter().map(|l| l.location).collect();
        assert_eq!(labels, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn removing_the_last_delivered_entry_drops_the_key() {
        let (dir, store, _clock) = store_with_clock().await;
        let new = NewTracking::new("P", "D", Utc::now());
        let number = new.tracking_number.clone();
        let id = store.create_tracking(new).await.unwrap();
        store.append_location(id, &number, DELIVERED_LOCATION).await.unwrap();

        assert!(store.remove_delivered_locations(&number).await.unwrap());

        let raw = std::fs::read_to_string(dir.path().join(LOCATIONS_FILE)).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(doc.get(number.as_str()).is_none());
    }

    #[tokio::test]
    async fn append_with_mismatched_id_is_not_found() {
        let (_dir, store, _clock) = store_with_clock().await;
        let new = NewTracking::new("P", "D", Utc::now());
        let number = new.tracking_number.clone();
        store.create_tracking(new).await.unwrap();

        let err = store.append_location(TrackingId::new(), &number, "Depot").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn corrupt_document_surfaces_serialization_error() {
        let (dir, store, _clock) = store_with_clock().await;
        std::fs::write(dir.path().join(TRACKINGS_FILE), "{not json").unwrap();

        let err = store.list_trackings().await.unwrap_err();
        assert!(matches!(err, CoreError::Serialization(_)));
        assert!(store.health_check().await.is_err());
    }
}
