//! Local group management
//!
//! Group membership reconciles as a set difference: members present on
//! the cluster but not in the desired list are removed, missing ones are
//! added. Membership changes go through the group's members collection,
//! not the group document itself.

use crate::client::{encode_segment, RestClient};
use crate::error::Result;
use crate::reconcile::{Delta, DeltaBuilder};
use crate::resources::{ResourceManager, validate_name, API_BASE};
use crate::types::{ApplyOutcome, CheckMode, ResourceState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info};

// =============================================================================
// Wire Types
// =============================================================================

/// One local group as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GroupEnvelope {
    groups: Vec<Group>,
}

// =============================================================================
// Parameters
// =============================================================================

/// Desired state of one local group
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupParams {
    pub name: String,
    #[serde(default)]
    pub state: ResourceState,
    pub access_zone: Option<String>,
    pub provider: Option<String>,
    pub gid: Option<u32>,
    /// Full desired member list; unset leaves membership alone
    pub members: Option<Vec<String>>,
}

// =============================================================================
// Group Manager
// =============================================================================

/// Reconciles one local group to its desired state
pub struct GroupManager<'a> {
    client: &'a RestClient,
}

impl<'a> GroupManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for GroupManager<'a> {
    type Params = GroupParams;
    type State = Group;

    async fn apply(
        &self,
        params: &GroupParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<Group>> {
        validate_name("Group", &params.name)?;

        let path = group_path(&params.name, params);
        let current = self
            .client
            .lookup::<GroupEnvelope>("Fetching group", &path)
            .await?
            .found()
            .and_then(|envelope| envelope.groups.into_iter().next());

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(group = %params.name, "group already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(group), ResourceState::Absent) => {
                info!(group = %params.name, "deleting group");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(group)));
                }
                self.client.delete("Deleting group", &path).await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                info!(group = %params.name, "creating group");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Creating group",
                        &format!("{}/auth/groups{}", API_BASE, identity_query(params)),
                        &group_create_body(params),
                    )
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
            (Some(group), ResourceState::Present) => {
                let delta = group_delta(params, &group);
                let membership = params
                    .members
                    .as_ref()
                    .map(|desired| membership_changes(desired, &group.members))
                    .unwrap_or_default();

                if delta.is_empty() && membership.is_unchanged() {
                    debug!(group = %params.name, "group already matches");
                    return Ok(ApplyOutcome::unchanged(Some(group)));
                }
                info!(
                    group = %params.name,
                    add = membership.add.len(),
                    remove = membership.remove.len(),
                    "modifying group"
                );
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(group)));
                }

                if !delta.is_empty() {
                    self.client
                        .put_json("Modifying group", &path, &delta.into_body())
                        .await?;
                }
                for member in &membership.add {
                    self.client
                        .post_json(
                            "Adding group member",
                            &format!(
                                "{}/auth/groups/{}/members{}",
                                API_BASE,
                                encode_segment(&params.name),
                                identity_query(params)
                            ),
                            &json!({ "name": member }),
                        )
                        .await?;
                }
                for member in &membership.remove {
                    self.client
                        .delete(
                            "Removing group member",
                            &format!(
                                "{}/auth/groups/{}/members/{}{}",
                                API_BASE,
                                encode_segment(&params.name),
                                encode_segment(member),
                                identity_query(params)
                            ),
                        )
                        .await?;
                }
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
        }
    }
}

impl<'a> GroupManager<'a> {
    async fn refetch(&self, path: &str) -> Result<Option<Group>> {
        let envelope: GroupEnvelope = self.client.get_json("Fetching group", path).await?;
        Ok(envelope.groups.into_iter().next())
    }
}

fn identity_query(params: &GroupParams) -> String {
    let mut query = Vec::new();
    if let Some(zone) = &params.access_zone {
        query.push(format!("zone={}", encode_segment(zone)));
    }
    if let Some(provider) = &params.provider {
        query.push(format!("provider={}", encode_segment(provider)));
    }
    if query.is_empty() {
        String::new()
    } else {
        format!("?{}", query.join("&"))
    }
}

fn group_path(name: &str, params: &GroupParams) -> String {
    format!(
        "{}/auth/groups/{}{}",
        API_BASE,
        encode_segment(name),
        identity_query(params)
    )
}

fn group_create_body(params: &GroupParams) -> serde_json::Value {
    let mut body = json!({ "name": params.name });
    let object = body.as_object_mut().unwrap();
    if let Some(gid) = params.gid {
        object.insert("gid".into(), json!(gid));
    }
    if let Some(members) = &params.members {
        object.insert("members".into(), json!(members));
    }
    body
}

fn group_delta(params: &GroupParams, current: &Group) -> Delta {
    DeltaBuilder::new()
        .field_opt("gid", params.gid.as_ref(), current.gid.as_ref())
        .build()
}

/// Members to add and remove to reach the desired list
#[derive(Debug, Default, PartialEq)]
pub(crate) struct MembershipChanges {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl MembershipChanges {
    pub fn is_unchanged(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

pub(crate) fn membership_changes(desired: &[String], current: &[String]) -> MembershipChanges {
    let want: BTreeSet<&str> = desired.iter().map(String::as_str).collect();
    let have: BTreeSet<&str> = current.iter().map(String::as_str).collect();
    MembershipChanges {
        add: want
            .difference(&have)
            .map(|member| member.to_string())
            .collect(),
        remove: have
            .difference(&want)
            .map(|member| member.to_string())
            .collect(),
    }
}
