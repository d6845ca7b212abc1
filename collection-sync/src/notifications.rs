//! Notification inbox and sent folder.

use crate::cache::{RelationshipCache, View};
use crate::engine::{Confirmation, Intent, MutationEngine};
use crate::entity::{Entity, EntityId, ViewFilter, any_field_contains};
use crate::errors::{Result, SyncError};
use crate::outcome::{BatchSummary, LoadOutcome, MutationOutcome, Notice};
use crate::record::Operation;
use crate::source::CollectionSource;
use async_trait::async_trait;
use gateway::{ApiRequest, Gateway, GatewayError, GatewayExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const NOTIFICATIONS: &str = "admin/notifications";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Folder {
    #[default]
    Received,
    Sent,
}

impl Folder {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Folder::Received => "received",
            Folder::Sent => "sent",
        }
    }

    pub fn filter(&self) -> ViewFilter {
        ViewFilter::scoped(self.as_str())
    }

    fn of(filter: &ViewFilter) -> Folder {
        match filter.scope.as_deref() {
            Some("sent") => Folder::Sent,
            _ => Folder::Received,
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Folder {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "received" => Ok(Folder::Received),
            "sent" => Ok(Folder::Sent),
            other => Err(SyncError::Invalid(format!("unknown folder: {other}"))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Notification {
    #[serde(alias = "_id")]
    pub id: EntityId,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// `"all"` or a list of recipients, depending on who sent it.
    pub recipients: Value,
    pub created_at: Option<String>,
    pub read: bool,
}

impl Entity for Notification {
    type Related = bool;

    fn id(&self) -> &str {
        &self.id
    }

    fn related(&self) -> &bool {
        &self.read
    }

    fn set_related(&mut self, related: bool) {
        self.read = related;
    }

    fn matches_search(&self, needle: &str) -> bool {
        any_field_contains([Some(self.title.as_str()), Some(self.message.as_str())], needle)
    }

    fn kind(&self) -> Option<&str> {
        Some(&self.kind)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub recipients: String,
}

impl Default for NewNotification {
    fn default() -> Self {
        NewNotification {
            title: String::new(),
            message: String::new(),
            kind: "info".to_string(),
            recipients: "all".to_string(),
        }
    }
}

impl NewNotification {
    pub fn new<S: Into<String>>(message: S) -> Self {
        NewNotification {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Lists one folder. The read flag comes inline with each notification.
pub struct NotificationSource {
    gateway: Arc<dyn Gateway>,
}

impl NotificationSource {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        NotificationSource { gateway }
    }
}

#[async_trait]
impl CollectionSource<Notification> for NotificationSource {
    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn list(&self, filter: &ViewFilter) -> Result<Vec<Notification>, GatewayError> {
        let folder = Folder::of(filter);
        self.gateway
            .fetch(ApiRequest::list(NOTIFICATIONS).segment(folder.as_str()))
            .await
    }
}

#[derive(Clone)]
pub struct NotificationScreen {
    engine: MutationEngine<Notification>,
    gateway: Arc<dyn Gateway>,
}

impl NotificationScreen {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        let source = Arc::new(NotificationSource::new(gateway.clone()));
        NotificationScreen {
            engine: MutationEngine::new(RelationshipCache::new(source)),
            gateway,
        }
    }

    pub fn cache(&self) -> &RelationshipCache<Notification> {
        self.engine.cache()
    }

    pub async fn load(&self, filter: ViewFilter) -> Result<LoadOutcome> {
        self.cache().load(filter).await
    }

    /// Switches folder. Search and type filter carry over.
    pub async fn open_folder(&self, folder: Folder) -> Result<LoadOutcome> {
        let filter = ViewFilter {
            scope: Some(folder.as_str().to_string()),
            ..self.cache().read(|state| state.filter().clone())
        };
        self.load(filter).await
    }

    pub fn folder(&self) -> Folder {
        self.cache().read(|state| Folder::of(state.filter()))
    }

    pub fn view(&self) -> View<Notification> {
        self.cache().view()
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        self.cache().take_notices()
    }

    pub fn close(&self) {
        self.cache().close();
    }

    pub fn unread_count(&self) -> usize {
        self.cache()
            .read(|state| state.entities().filter(|n| !n.read).count())
    }

    /// Sends a notification. It shows up in the list once the server has
    /// accepted it, and only while the sent folder is displayed.
    pub async fn send(&self, notification: NewNotification) -> Result<Notification> {
        if notification.message.trim().is_empty() {
            self.cache().notify(Notice::error("Message is required"));
            return Err(SyncError::Invalid("message is required".to_string()));
        }
        let body =
            serde_json::to_value(&notification).map_err(|e| SyncError::Invalid(e.to_string()))?;

        self.engine
            .create(
                "Notification sent successfully",
                "Failed to send notification",
                |filter| Folder::of(filter) == Folder::Sent,
                || self.gateway.fetch(ApiRequest::create(NOTIFICATIONS, body)),
            )
            .await
    }

    pub async fn mark_as_read(&self, id: &str) -> Result<MutationOutcome> {
        let intent = Intent::new(Operation::MarkAsRead, id)
            .on_failure("Failed to mark notification as read");
        self.engine
            .mutate(
                intent,
                |edit| {
                    let notification = edit
                        .get_mut(id)
                        .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
                    notification.read = true;
                    Ok(())
                },
                || async {
                    // The response body, if any, is not a notification
                    self.gateway
                        .send(ApiRequest::mark_as_read(NOTIFICATIONS, id))
                        .await
                        .map(|()| Confirmation::Keep)
                },
            )
            .await
    }

    /// Marks every selected notification as read. Selection is kept.
    pub async fn bulk_mark_as_read(&self) -> Result<BatchSummary> {
        self.engine
            .mutate_selected(
                Operation::MarkAsRead,
                |id, edit| {
                    let notification = edit
                        .get_mut(id)
                        .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
                    notification.read = true;
                    Ok(())
                },
                |id| {
                    let gateway = self.gateway.clone();
                    async move {
                        gateway
                            .send(ApiRequest::mark_as_read(NOTIFICATIONS, &id))
                            .await
                            .map(|()| Confirmation::Keep)
                    }
                },
            )
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<MutationOutcome> {
        let intent = Intent::new(Operation::Delete, id)
            .on_success("Notification deleted")
            .on_failure("Failed to delete notification");
        self.engine
            .delete(intent, || {
                self.gateway.send(ApiRequest::delete(NOTIFICATIONS, id))
            })
            .await
    }

    /// Deletes every selected notification. Deleted ones leave the selection,
    /// failed ones stay selected.
    pub async fn bulk_delete(&self) -> Result<BatchSummary> {
        self.engine
            .delete_selected(|id: EntityId| {
                let gateway = self.gateway.clone();
                async move { gateway.send(ApiRequest::delete(NOTIFICATIONS, &id)).await }
            })
            .await
    }
}
