//! Guardian management: guardians with their children joined in.

use crate::cache::{RelationshipCache, View};
use crate::engine::{Confirmation, Intent, MutationEngine};
use crate::entity::{Entity, EntityId, ViewFilter, any_field_contains};
use crate::errors::{Result, SyncError};
use crate::outcome::{LoadOutcome, MutationOutcome, Notice};
use crate::record::{LocalEdit, Operation};
use crate::source::CollectionSource;
use async_trait::async_trait;
use gateway::{ApiRequest, Gateway, GatewayError, GatewayExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

const GUARDIANS: &str = "guardians";
const CHILDREN: &str = "children";
const CHILD_DIRECTORY: &str = "admin/children";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Child {
    #[serde(rename = "_id", alias = "id")]
    pub id: EntityId,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
}

impl Child {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Guardian {
    #[serde(rename = "_id", alias = "id")]
    pub id: EntityId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub emergency_phone: Option<String>,
    pub relationship: Option<String>,
    /// Joined from `guardians/:id/children`, never part of the guardian body.
    #[serde(skip)]
    pub children: Vec<Child>,
}

impl Guardian {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    pub fn child_ids(&self) -> Vec<EntityId> {
        self.children.iter().map(|c| c.id.clone()).collect()
    }

    pub fn has_child(&self, child_id: &str) -> bool {
        self.children.iter().any(|c| c.id == child_id)
    }
}

impl Entity for Guardian {
    type Related = Vec<Child>;

    fn id(&self) -> &str {
        &self.id
    }

    fn related(&self) -> &Vec<Child> {
        &self.children
    }

    fn set_related(&mut self, related: Vec<Child>) {
        self.children = related;
    }

    fn matches_search(&self, needle: &str) -> bool {
        let full_name = self.full_name();
        any_field_contains(
            [
                Some(full_name.as_str()),
                Some(self.email.as_str()),
                self.phone.as_deref(),
            ],
            needle,
        )
    }
}

/// The editable part of a guardian.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

impl GuardianForm {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("first name", &self.first_name),
            ("last name", &self.last_name),
            ("email", &self.email),
        ] {
            if value.trim().is_empty() {
                return Err(SyncError::Invalid(format!("{field} is required")));
            }
        }
        Ok(())
    }

    fn apply_to(&self, guardian: &mut Guardian) {
        guardian.first_name = self.first_name.clone();
        guardian.last_name = self.last_name.clone();
        guardian.email = self.email.clone();
        guardian.phone = self.phone.clone();
        guardian.address = self.address.clone();
        guardian.emergency_contact = self.emergency_contact.clone();
        guardian.emergency_phone = self.emergency_phone.clone();
        guardian.relationship = self.relationship.clone();
    }
}

impl From<&Guardian> for GuardianForm {
    fn from(guardian: &Guardian) -> Self {
        GuardianForm {
            first_name: guardian.first_name.clone(),
            last_name: guardian.last_name.clone(),
            email: guardian.email.clone(),
            phone: guardian.phone.clone(),
            address: guardian.address.clone(),
            emergency_contact: guardian.emergency_contact.clone(),
            emergency_phone: guardian.emergency_phone.clone(),
            relationship: guardian.relationship.clone(),
        }
    }
}

pub struct GuardianSource {
    gateway: Arc<dyn Gateway>,
}

impl GuardianSource {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        GuardianSource { gateway }
    }
}

#[async_trait]
impl CollectionSource<Guardian> for GuardianSource {
    fn name(&self) -> &'static str {
        GUARDIANS
    }

    async fn list(&self, _filter: &ViewFilter) -> Result<Vec<Guardian>, GatewayError> {
        self.gateway.fetch(ApiRequest::list(GUARDIANS)).await
    }

    fn joins(&self) -> bool {
        true
    }

    async fn related(&self, id: &str) -> Result<Vec<Child>, GatewayError> {
        let children: Option<Vec<Child>> = self
            .gateway
            .fetch_optional(ApiRequest::list_related(GUARDIANS, id, CHILDREN))
            .await?;
        Ok(children.unwrap_or_default())
    }
}

/// The guardian management screen.
#[derive(Clone)]
pub struct GuardianScreen {
    engine: MutationEngine<Guardian>,
    gateway: Arc<dyn Gateway>,
    directory: Arc<Mutex<Vec<Child>>>,
}

impl GuardianScreen {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        let source = Arc::new(GuardianSource::new(gateway.clone()));
        GuardianScreen {
            engine: MutationEngine::new(RelationshipCache::new(source)),
            gateway,
            directory: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn cache(&self) -> &RelationshipCache<Guardian> {
        self.engine.cache()
    }

    pub async fn load(&self, filter: ViewFilter) -> Result<LoadOutcome> {
        self.cache().load(filter).await
    }

    pub fn view(&self) -> View<Guardian> {
        self.cache().view()
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        self.cache().take_notices()
    }

    pub fn close(&self) {
        self.cache().close();
    }

    /// Fetches the pool of children that can be assigned to a guardian.
    pub async fn load_child_directory(&self) -> Result<Vec<Child>> {
        let fetched: Result<Vec<Child>, GatewayError> =
            self.gateway.fetch(ApiRequest::list(CHILD_DIRECTORY)).await;
        match fetched {
            Ok(children) => {
                *self.directory.lock() = children.clone();
                Ok(children)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to fetch child directory");
                self.cache().notify(Notice::error("Failed to fetch children"));
                Err(err.into())
            }
        }
    }

    pub fn child_directory(&self) -> Vec<Child> {
        self.directory.lock().clone()
    }

    /// Directory children not currently shown under any guardian.
    pub fn unassigned_children(&self) -> Vec<Child> {
        let assigned: HashSet<EntityId> = self
            .cache()
            .read(|state| state.entities().flat_map(|g| g.child_ids()).collect());
        self.directory
            .lock()
            .iter()
            .filter(|c| !assigned.contains(&c.id))
            .cloned()
            .collect()
    }

    pub async fn create_guardian(&self, form: GuardianForm) -> Result<Guardian> {
        form.validate()?;
        let body = serde_json::to_value(&form).map_err(|e| SyncError::Invalid(e.to_string()))?;
        self.engine
            .create(
                "Guardian added successfully",
                "Failed to add guardian",
                |_| true,
                || self.gateway.fetch(ApiRequest::create(GUARDIANS, body)),
            )
            .await
    }

    /// Optimistic field update. The children shown stay as they are whatever
    /// the server echoes back.
    pub async fn update_guardian(&self, id: &str, form: GuardianForm) -> Result<MutationOutcome> {
        form.validate()?;
        let body = serde_json::to_value(&form).map_err(|e| SyncError::Invalid(e.to_string()))?;
        let intent = Intent::new(Operation::Update, id)
            .with_payload(body.clone())
            .on_success("Guardian updated successfully")
            .on_failure("Failed to update guardian");

        self.engine
            .mutate(
                intent,
                |edit| {
                    let guardian = edit
                        .get_mut(id)
                        .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
                    form.apply_to(guardian);
                    Ok(())
                },
                || async {
                    let response = self
                        .gateway
                        .execute(ApiRequest::update(GUARDIANS, id, body))
                        .await;
                    response.map(|echoed| {
                        echoed
                            .and_then(|value| serde_json::from_value::<Guardian>(value).ok())
                            .map_or(Confirmation::Keep, Confirmation::ReplaceFields)
                    })
                },
            )
            .await
    }

    pub async fn delete_guardian(&self, id: &str) -> Result<MutationOutcome> {
        let intent = Intent::new(Operation::Delete, id)
            .on_success("Guardian deleted successfully")
            .on_failure("Failed to delete guardian");
        self.engine
            .delete(intent, || self.gateway.send(ApiRequest::delete(GUARDIANS, id)))
            .await
    }

    /// Replaces a guardian's children with `child_ids`.
    ///
    /// Any of those children shown under another guardian leaves it in the
    /// same step, so a child is never displayed twice.
    pub async fn assign_children(
        &self,
        guardian_id: &str,
        child_ids: Vec<EntityId>,
    ) -> Result<MutationOutcome> {
        let children = self.resolve_children(&child_ids)?;
        let intent = Intent::new(Operation::AssignRelated, guardian_id)
            .with_payload(json!({ "childIds": child_ids }));
        self.assign(intent, guardian_id, Assignment::Replace(children)).await
    }

    /// Moves one child to `guardian_id`, keeping that guardian's current
    /// children.
    pub async fn reassign_child(&self, child_id: &str, guardian_id: &str) -> Result<MutationOutcome> {
        let child = self
            .resolve_children(&[child_id.to_string()])?
            .pop()
            .ok_or_else(|| SyncError::NotFound(child_id.to_string()))?;
        let intent = Intent::new(Operation::AssignRelated, guardian_id)
            .with_payload(json!({ "childId": child_id }));
        self.assign(intent, guardian_id, Assignment::Add(child)).await
    }

    async fn assign(
        &self,
        intent: Intent,
        guardian_id: &str,
        assignment: Assignment,
    ) -> Result<MutationOutcome> {
        let moving = assignment.moving();
        let intent = intent
            .on_success("Children updated successfully")
            .on_failure("Failed to update children");

        self.engine
            .mutate(
                intent,
                // Runs once this guardian's earlier mutations have settled
                |edit| {
                    let children = assignment.resolve(edit, guardian_id)?;
                    move_children(edit, guardian_id, &children, &moving)
                },
                || async {
                    let child_ids = self
                        .cache()
                        .read(|state| state.get(guardian_id).map(Guardian::child_ids))
                        .unwrap_or_default();
                    let request = ApiRequest::assign_related(
                        GUARDIANS,
                        guardian_id,
                        CHILDREN,
                        json!({ "childIds": child_ids }),
                    );
                    // The response shape varies. A list of children is taken
                    // as authoritative, anything else keeps the optimistic set.
                    self.gateway.execute(request).await.map(|response| {
                        response
                            .and_then(|value| serde_json::from_value::<Vec<Child>>(value).ok())
                            .map_or(Confirmation::Keep, Confirmation::Related)
                    })
                },
            )
            .await
    }

    pub async fn remove_child(&self, guardian_id: &str, child_id: &str) -> Result<MutationOutcome> {
        let intent = Intent::new(Operation::RemoveRelated, guardian_id)
            .with_payload(json!({ "childId": child_id }))
            .on_success("Child removed successfully")
            .on_failure("Failed to remove child");

        self.engine
            .mutate(
                intent,
                |edit| {
                    let guardian = edit
                        .get_mut(guardian_id)
                        .ok_or_else(|| SyncError::NotFound(guardian_id.to_string()))?;
                    if !guardian.has_child(child_id) {
                        return Err(SyncError::NotFound(child_id.to_string()));
                    }
                    guardian.children.retain(|c| c.id != child_id);
                    Ok(())
                },
                || async {
                    self.gateway
                        .send(ApiRequest::remove_related(
                            GUARDIANS,
                            guardian_id,
                            CHILDREN,
                            child_id,
                        ))
                        .await
                        .map(|()| Confirmation::Keep)
                },
            )
            .await
    }

    pub async fn reset_credentials(&self, guardian_id: &str) -> Result<()> {
        self.engine
            .perform(
                guardian_id,
                "Credentials reset successfully",
                "Failed to reset credentials",
                || {
                    self.gateway
                        .send(ApiRequest::action(GUARDIANS, guardian_id, "reset-password"))
                },
            )
            .await
    }

    /// Looks children up in the directory first, then under any guardian.
    fn resolve_children(&self, child_ids: &[EntityId]) -> Result<Vec<Child>> {
        let directory = self.directory.lock().clone();
        self.cache().read(|state| {
            child_ids
                .iter()
                .map(|id| {
                    directory
                        .iter()
                        .chain(state.entities().flat_map(|g| g.children.iter()))
                        .find(|c| &c.id == id)
                        .cloned()
                        .ok_or_else(|| SyncError::NotFound(id.clone()))
                })
                .collect()
        })
    }
}

enum Assignment {
    Replace(Vec<Child>),
    Add(Child),
}

impl Assignment {
    fn moving(&self) -> HashSet<EntityId> {
        match self {
            Assignment::Replace(children) => children.iter().map(|c| c.id.clone()).collect(),
            Assignment::Add(child) => HashSet::from([child.id.clone()]),
        }
    }

    /// The guardian's children once this assignment is applied, read from
    /// the cache as the mutator sees it.
    fn resolve(&self, edit: &LocalEdit<'_, Guardian>, guardian_id: &str) -> Result<Vec<Child>> {
        match self {
            Assignment::Replace(children) => Ok(children.clone()),
            Assignment::Add(child) => {
                let guardian = edit
                    .get(guardian_id)
                    .ok_or_else(|| SyncError::NotFound(guardian_id.to_string()))?;
                let mut children = guardian.children.clone();
                if !guardian.has_child(&child.id) {
                    children.push(child.clone());
                }
                Ok(children)
            }
        }
    }
}

fn move_children(
    edit: &mut LocalEdit<'_, Guardian>,
    guardian_id: &str,
    children: &[Child],
    moving: &HashSet<EntityId>,
) -> Result<()> {
    if edit.get(guardian_id).is_none() {
        return Err(SyncError::NotFound(guardian_id.to_string()));
    }

    let holders = edit.ids_where(|g| {
        g.id != guardian_id && g.children.iter().any(|c| moving.contains(&c.id))
    });
    for holder in holders {
        if let Some(other) = edit.get_mut(&holder) {
            other.children.retain(|c| !moving.contains(&c.id));
        }
    }

    if let Some(guardian) = edit.get_mut(guardian_id) {
        guardian.children = children.to_vec();
    }
    Ok(())
}
