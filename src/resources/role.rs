//! RBAC role management
//!
//! Roles bundle privileges and members. Member and privilege lists
//! reconcile order-insensitively and are written back whole. The
//! built-in roles are guarded against deletion locally.

use crate::client::{encode_segment, RestClient};
use crate::error::{Error, Result};
use crate::reconcile::{Delta, DeltaBuilder};
use crate::resources::{ResourceManager, validate_name, zone_query, API_BASE};
use crate::types::{ApplyOutcome, CheckMode, ResourceState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

/// Roles shipped with the cluster that must never be deleted.
const BUILTIN_ROLES: &[&str] = &[
    "SystemAdmin",
    "SecurityAdmin",
    "AuditAdmin",
    "BackupAdmin",
    "VMwareAdmin",
];

// =============================================================================
// Wire Types
// =============================================================================

/// One RBAC role as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub privileges: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RoleEnvelope {
    roles: Vec<Role>,
}

// =============================================================================
// Parameters
// =============================================================================

/// Desired state of one RBAC role
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleParams {
    pub name: String,
    #[serde(default)]
    pub state: ResourceState,
    pub access_zone: Option<String>,
    pub description: Option<String>,
    /// Full desired member list; unset leaves membership alone
    pub members: Option<Vec<String>>,
    /// Full desired privilege list; unset leaves privileges alone
    pub privileges: Option<Vec<String>>,
}

// =============================================================================
// Role Manager
// =============================================================================

/// Reconciles one RBAC role to its desired state
pub struct RoleManager<'a> {
    client: &'a RestClient,
}

impl<'a> RoleManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for RoleManager<'a> {
    type Params = RoleParams;
    type State = Role;

    async fn apply(&self, params: &RoleParams, mode: CheckMode) -> Result<ApplyOutcome<Role>> {
        validate_role_params(params)?;

        let path = format!(
            "{}/auth/roles/{}{}",
            API_BASE,
            encode_segment(&params.name),
            zone_query(params.access_zone.as_deref())
        );
        let current = self
            .client
            .lookup::<RoleEnvelope>("Fetching role", &path)
            .await?
            .found()
            .and_then(|envelope| envelope.roles.into_iter().next());

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(role = %params.name, "role already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(role), ResourceState::Absent) => {
                info!(role = %params.name, "deleting role");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(role)));
                }
                self.client.delete("Deleting role", &path).await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                info!(role = %params.name, "creating role");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Creating role",
                        &format!(
                            "{}/auth/roles{}",
                            API_BASE,
                            zone_query(params.access_zone.as_deref())
                        ),
                        &role_create_body(params),
                    )
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
            (Some(role), ResourceState::Present) => {
                let delta = role_delta(params, &role);
                if delta.is_empty() {
                    debug!(role = %params.name, "role already matches");
                    return Ok(ApplyOutcome::unchanged(Some(role)));
                }
                info!(
                    role = %params.name,
                    fields = %delta.field_names().collect::<Vec<_>>().join(","),
                    "modifying role"
                );
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(role)));
                }
                self.client
                    .put_json("Modifying role", &path, &delta.into_body())
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
        }
    }
}

impl<'a> RoleManager<'a> {
    async fn refetch(&self, path: &str) -> Result<Option<Role>> {
        let envelope: RoleEnvelope = self.client.get_json("Fetching role", path).await?;
        Ok(envelope.roles.into_iter().next())
    }
}

fn validate_role_params(params: &RoleParams) -> Result<()> {
    validate_name("Role", &params.name)?;
    if params.state == ResourceState::Absent && BUILTIN_ROLES.contains(&params.name.as_str()) {
        return Err(Error::validation(format!(
            "Built-in role {} cannot be deleted",
            params.name
        )));
    }
    Ok(())
}

fn role_create_body(params: &RoleParams) -> serde_json::Value {
    let mut body = json!({ "name": params.name });
    let object = body.as_object_mut().unwrap();
    if let Some(description) = &params.description {
        object.insert("description".into(), json!(description));
    }
    if let Some(members) = &params.members {
        object.insert("members".into(), json!(members));
    }
    if let Some(privileges) = &params.privileges {
        object.insert("privileges".into(), json!(privileges));
    }
    body
}

fn role_delta(params: &RoleParams, current: &Role) -> Delta {
    DeltaBuilder::new()
        .field(
            "description",
            params.description.as_ref(),
            &current.description,
        )
        .field_set("members", params.members.as_ref(), &current.members)
        .field_set(
            "privileges",
            params.privileges.as_ref(),
            &current.privileges,
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn params(name: &str) -> RoleParams {
        RoleParams {
            name: name.to_string(),
            state: ResourceState::Present,
            access_zone: None,
            description: None,
            members: None,
            privileges: None,
        }
    }

    fn current(name: &str) -> Role {
        Role {
            name: name.to_string(),
            description: "storage operators".to_string(),
            members: vec!["alice".to_string(), "bob".to_string()],
            privileges: vec![
                "ISI_PRIV_LOGIN_PAPI".to_string(),
                "ISI_PRIV_SNAPSHOT".to_string(),
            ],
        }
    }

    #[test]
    fn test_builtin_role_deletion_rejected() {
        let mut bad = params("SystemAdmin");
        bad.state = ResourceState::Absent;
        assert_matches!(validate_role_params(&bad), Err(Error::Validation(_)));

        // Modifying a built-in role is fine.
        let ok = params("SystemAdmin");
        assert!(validate_role_params(&ok).is_ok());
    }

    #[test]
    fn test_delta_idempotent_with_reordered_lists() {
        let mut desired = params("storage-ops");
        desired.members = Some(vec!["bob".to_string(), "alice".to_string()]);
        desired.privileges = Some(vec![
            "ISI_PRIV_SNAPSHOT".to_string(),
            "ISI_PRIV_LOGIN_PAPI".to_string(),
        ]);
        assert!(role_delta(&desired, &current("storage-ops")).is_empty());
    }

    #[test]
    fn test_privilege_change_detected() {
        let mut desired = params("storage-ops");
        desired.privileges = Some(vec!["ISI_PRIV_LOGIN_PAPI".to_string()]);

        let delta = role_delta(&desired, &current("storage-ops"));
        assert_eq!(delta.len(), 1);
        assert_eq!(
            delta.get("privileges"),
            Some(&json!(["ISI_PRIV_LOGIN_PAPI"]))
        );
    }
}
