//! Client-side synchronization for list screens backed by a REST collection.
//!
//! A [`RelationshipCache`] holds a primary collection with each entity's
//! related items joined in. A [`MutationEngine`] applies user intents to the
//! cache straight away, issues the remote call, and then confirms or rolls
//! back. Selection for bulk operations lives in the cache so that it can be
//! kept consistent with the visible view in the same step as every change.
//!
//! [`GuardianScreen`] and [`NotificationScreen`] are the two screens built on
//! top of it.

pub mod cache;
pub mod engine;
pub mod entity;
pub mod errors;
pub mod guardians;
pub mod metrics_defs;
pub mod notifications;
pub mod outcome;
pub mod record;
pub mod selection;
pub mod source;

#[cfg(test)]
mod testutils;

pub use cache::{CacheState, RelationshipCache, View};
pub use engine::{Confirmation, Intent, MutationEngine};
pub use entity::{Entity, EntityId, Page, ViewFilter};
pub use errors::{Result, SyncError};
pub use guardians::{Child, Guardian, GuardianForm, GuardianScreen, GuardianSource};
pub use notifications::{Folder, NewNotification, Notification, NotificationScreen, NotificationSource};
pub use outcome::{BatchSummary, LoadOutcome, LoadReport, MutationOutcome, Notice, NoticeLevel};
pub use record::{LocalEdit, MutationRecord, Operation, RecordState};
pub use selection::SelectionSet;
pub use source::CollectionSource;
