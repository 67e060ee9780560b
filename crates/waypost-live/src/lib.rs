//! Live update fan-out for tracking viewers.
//!
//! Keeps an in-memory registry of push subscribers keyed by tracking number,
//! broadcasts state-change events to every active subscriber and keeps idle
//! connections alive with periodic heartbeats. Single process only.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event;
pub mod registry;

pub use event::{PushEvent, PushEventKind};
pub use registry::{RegistryConfig, SubscriberId, SubscriberRegistry, Subscription};
