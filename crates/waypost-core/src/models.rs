//! Core domain models and strongly-typed identifiers.
//!
//! Defines trackings, location updates, the status lifecycle, and newtype
//! wrappers for identifiers and secrets. Includes the database encodings
//! shared by the PostgreSQL backend and the serde layout used by the file
//! backend.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type BoxDynError = sqlx::error::BoxDynError;

/// Location label recorded when a tracking transitions into `Delivered`.
pub const DELIVERED_LOCATION: &str = "Delivered";

const TRACKING_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TRACKING_NUMBER_LEN: usize = 8;
const UPDATE_KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const UPDATE_KEY_LEN: usize = 16;

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len).map(|_| char::from(alphabet[rng.random_range(0..alphabet.len())])).collect()
}

/// Strongly-typed internal tracking identifier.
///
/// Never shown to viewers; location updates carry it as a back-reference so
/// the relational backend can enforce referential integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct TrackingId(pub Uuid);

impl TrackingId {
    /// Creates a new random tracking ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TrackingId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed location update identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct LocationId(pub Uuid);

impl LocationId {
    /// Creates a new random location ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public, shareable tracking number.
///
/// Generated numbers are eight characters drawn from `A-Z0-9`. Numbers
/// arriving from request paths are taken verbatim; a malformed number simply
/// never matches a stored tracking.
///
/// # Example
///
/// ```
/// use waypost_core::TrackingNumber;
///
/// let number = TrackingNumber::generate();
/// assert!(number.is_well_formed());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct TrackingNumber(String);

impl TrackingNumber {
    /// Generates a fresh random tracking number.
    pub fn generate() -> Self {
        Self(random_string(TRACKING_NUMBER_ALPHABET, TRACKING_NUMBER_LEN))
    }

    /// Returns the tracking number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether this number has the shape of a generated one.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == TRACKING_NUMBER_LEN
            && self.0.bytes().all(|b| TRACKING_NUMBER_ALPHABET.contains(&b))
    }
}

impl fmt::Display for TrackingNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TrackingNumber {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TrackingNumber {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Secret authorizing updates to a single tracking.
///
/// Sixteen characters from `a-z0-9`, issued once at creation and never
/// rotated. `Debug` output is redacted so the key cannot leak into logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UpdateKey(String);

impl UpdateKey {
    /// Generates a fresh random update key.
    pub fn generate() -> Self {
        Self(random_string(UPDATE_KEY_ALPHABET, UPDATE_KEY_LEN))
    }

    /// Returns the key as a string slice.
    ///
    /// Only link construction should need this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compares a caller-supplied key in constant time.
    pub fn verify(&self, provided: &str) -> bool {
        let expected = self.0.as_bytes();
        let provided = provided.as_bytes();

        if expected.len() != provided.len() {
            return false;
        }

        let mut result = 0u8;
        for (a, b) in expected.iter().zip(provided.iter()) {
            result |= a ^ b;
        }
        result == 0
    }
}

impl fmt::Debug for UpdateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UpdateKey(***)")
    }
}

impl From<String> for UpdateKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Tracking lifecycle status.
///
/// Any status may follow any other. Entering or leaving `Delivered` carries
/// side effects on the location history, which the tracking service applies:
///
/// ```text
/// Preparing -> In Transit -> Out for Delivery -> Delivered
///        \________ Delayed ________/              |
///                     ^---------------------------+ (removes "Delivered" entries)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingStatus {
    /// Created, not yet handed to the carrier.
    Preparing,
    /// On its way.
    #[serde(rename = "In Transit")]
    InTransit,
    /// Last leg.
    #[serde(rename = "Out for Delivery")]
    OutForDelivery,
    /// Arrived.
    Delivered,
    /// Running late.
    Delayed,
}

impl TrackingStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 5] =
        [Self::Preparing, Self::InTransit, Self::OutForDelivery, Self::Delivered, Self::Delayed];

    /// Returns the wire label for this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "Preparing",
            Self::InTransit => "In Transit",
            Self::OutForDelivery => "Out for Delivery",
            Self::Delivered => "Delivered",
            Self::Delayed => "Delayed",
        }
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid tracking status: {s}"))
    }
}

impl sqlx::Type<PgDb> for TrackingStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for TrackingStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// A shipment-like journey shared through a public link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tracking {
    /// Internal identifier.
    pub id: TrackingId,

    /// Public tracking number, unique and immutable.
    pub tracking_number: TrackingNumber,

    /// Carrier label shown to viewers.
    pub provider: String,

    /// Where the journey ends.
    pub destination: String,

    /// Estimated time of arrival.
    pub eta: DateTime<Utc>,

    /// Current lifecycle status.
    pub status: TrackingStatus,

    /// Secret required for updates.
    pub update_key: UpdateKey,

    /// Locale the creator used, if reported.
    #[serde(default)]
    pub creator_locale: Option<String>,

    /// IANA timezone the creator used, if reported.
    #[serde(default)]
    pub creator_timezone: Option<String>,

    /// When the tracking was created.
    pub created_at: DateTime<Utc>,

    /// When the tracking was last mutated.
    pub updated_at: DateTime<Utc>,
}

/// A timestamped waypoint attached to a tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LocationUpdate {
    /// Unique identifier for this update.
    pub id: LocationId,

    /// Back-reference to the owning tracking.
    pub tracking_id: TrackingId,

    /// Tracking number of the owning tracking.
    pub tracking_number: TrackingNumber,

    /// Free-text location label.
    pub location: String,

    /// When the update was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl LocationUpdate {
    /// Whether this entry was written by a transition into `Delivered`.
    pub fn is_delivered_marker(&self) -> bool {
        self.location == DELIVERED_LOCATION
    }
}

/// A tracking together with its location history, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingWithLocations {
    /// The tracking record.
    pub tracking: Tracking,
    /// Location history sorted ascending by `recorded_at`.
    pub locations: Vec<LocationUpdate>,
}

/// Input for creating a tracking.
#[derive(Debug, Clone)]
pub struct NewTracking {
    /// Tracking number to register.
    pub tracking_number: TrackingNumber,
    /// Carrier label.
    pub provider: String,
    /// Destination label.
    pub destination: String,
    /// Estimated time of arrival.
    pub eta: DateTime<Utc>,
    /// Secret issued to the creator.
    pub update_key: UpdateKey,
    /// Creator locale hint.
    pub creator_locale: Option<String>,
    /// Creator timezone hint.
    pub creator_timezone: Option<String>,
}

impl NewTracking {
    /// Creates input with a freshly generated tracking number and update key.
    pub fn new(
        provider: impl Into<String>,
        destination: impl Into<String>,
        eta: DateTime<Utc>,
    ) -> Self {
        Self {
            tracking_number: TrackingNumber::generate(),
            provider: provider.into(),
            destination: destination.into(),
            eta,
            update_key: UpdateKey::generate(),
            creator_locale: None,
            creator_timezone: None,
        }
    }

    /// Sets the creator locale hint.
    #[must_use]
    pub fn with_locale(mut self, locale: Option<String>) -> Self {
        self.creator_locale = locale;
        self
    }

    /// Sets the creator timezone hint.
    #[must_use]
    pub fn with_timezone(mut self, timezone: Option<String>) -> Self {
        self.creator_timezone = timezone;
        self
    }

    /// Replaces the tracking number with a freshly generated one.
    ///
    /// Used after a collision; the update key stays the same.
    pub fn regenerate_tracking_number(&mut self) {
        self.tracking_number = TrackingNumber::generate();
    }
}
