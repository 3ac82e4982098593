//! Local user management
//!
//! Users live in an access zone under an authentication provider. The
//! cluster never returns passwords, so they cannot be diffed: a password
//! is sent on create, and again on modify only when `update_password`
//! is set to `always`.

use crate::client::{encode_segment, RestClient};
use crate::error::{Error, Result};
use crate::reconcile::{Delta, DeltaBuilder};
use crate::resources::{ResourceManager, validate_name, API_BASE};
use crate::types::{ApplyOutcome, CheckMode, ResourceState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

// =============================================================================
// Wire Types
// =============================================================================

/// One local user as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_directory: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    users: Vec<User>,
}

// =============================================================================
// Parameters
// =============================================================================

/// When to (re)send the password
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePassword {
    /// Only on create
    OnCreate,
    /// On create and on every modify
    Always,
}

impl Default for UpdatePassword {
    fn default() -> Self {
        UpdatePassword::OnCreate
    }
}

/// Desired state of one local user
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserParams {
    pub name: String,
    #[serde(default)]
    pub state: ResourceState,
    pub access_zone: Option<String>,
    /// Authentication provider, defaults to the local provider
    pub provider: Option<String>,
    pub uid: Option<u32>,
    pub primary_group: Option<String>,
    pub email: Option<String>,
    pub shell: Option<String>,
    pub home_directory: Option<String>,
    pub enabled: Option<bool>,
    pub password: Option<String>,
    #[serde(default)]
    pub update_password: UpdatePassword,
}

// =============================================================================
// User Manager
// =============================================================================

/// Reconciles one local user to its desired state
pub struct UserManager<'a> {
    client: &'a RestClient,
}

impl<'a> UserManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for UserManager<'a> {
    type Params = UserParams;
    type State = User;

    async fn apply(&self, params: &UserParams, mode: CheckMode) -> Result<ApplyOutcome<User>> {
        validate_name("User", &params.name)?;

        let path = user_path(&params.name, params);
        let current = self
            .client
            .lookup::<UserEnvelope>("Fetching user", &path)
            .await?
            .found()
            .and_then(|envelope| envelope.users.into_iter().next());

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(user = %params.name, "user already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(user), ResourceState::Absent) => {
                info!(user = %params.name, "deleting user");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(user)));
                }
                self.client.delete("Deleting user", &path).await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                if params.password.is_none() {
                    return Err(Error::validation(format!(
                        "User {} requires a password to be created",
                        params.name
                    )));
                }
                info!(user = %params.name, "creating user");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Creating user",
                        &format!("{}/auth/users{}", API_BASE, identity_query(params)),
                        &user_create_body(params),
                    )
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
            (Some(user), ResourceState::Present) => {
                let delta = user_delta(params, &user);
                if delta.is_empty() {
                    debug!(user = %params.name, "user already matches");
                    return Ok(ApplyOutcome::unchanged(Some(user)));
                }
                info!(
                    user = %params.name,
                    fields = %delta.field_names().collect::<Vec<_>>().join(","),
                    "modifying user"
                );
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(user)));
                }
                self.client
                    .put_json("Modifying user", &path, &delta.into_body())
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
        }
    }
}

impl<'a> UserManager<'a> {
    async fn refetch(&self, path: &str) -> Result<Option<User>> {
        let envelope: UserEnvelope = self.client.get_json("Fetching user", path).await?;
        Ok(envelope.users.into_iter().next())
    }
}

fn identity_query(params: &UserParams) -> String {
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

fn user_path(name: &str, params: &UserParams) -> String {
    format!(
        "{}/auth/users/{}{}",
        API_BASE,
        encode_segment(name),
        identity_query(params)
    )
}

fn user_create_body(params: &UserParams) -> serde_json::Value {
    let mut body = json!({
        "name": params.name,
        "password": params.password,
    });
    let object = body.as_object_mut().unwrap();
    if let Some(uid) = params.uid {
        object.insert("uid".into(), json!(uid));
    }
    if let Some(group) = &params.primary_group {
        object.insert("primary_group".into(), json!(group));
    }
    if let Some(email) = &params.email {
        object.insert("email".into(), json!(email));
    }
    if let Some(shell) = &params.shell {
        object.insert("shell".into(), json!(shell));
    }
    if let Some(home) = &params.home_directory {
        object.insert("home_directory".into(), json!(home));
    }
    if let Some(enabled) = params.enabled {
        object.insert("enabled".into(), json!(enabled));
    }
    body
}

fn user_delta(params: &UserParams, current: &User) -> Delta {
    let mut builder = DeltaBuilder::new()
        .field_opt("uid", params.uid.as_ref(), current.uid.as_ref())
        .field_opt(
            "primary_group",
            params.primary_group.as_ref(),
            current.primary_group.as_ref(),
        )
        .field_opt("email", params.email.as_ref(), current.email.as_ref())
        .field_opt("shell", params.shell.as_ref(), current.shell.as_ref())
        .field_opt(
            "home_directory",
            params.home_directory.as_ref(),
            current.home_directory.as_ref(),
        )
        .field("enabled", params.enabled.as_ref(), &current.enabled);

    // The wire never exposes the password, so "always" forces a set.
    if params.update_password == UpdatePassword::Always {
        if let Some(password) = &params.password {
            builder = builder.insert("password", json!(password));
        }
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(name: &str) -> UserParams {
        UserParams {
            name: name.to_string(),
            state: ResourceState::Present,
            access_zone: None,
            provider: None,
            uid: None,
            primary_group: None,
            email: None,
            shell: None,
            home_directory: None,
            enabled: None,
            password: None,
            update_password: UpdatePassword::OnCreate,
        }
    }

    fn current(name: &str) -> User {
        User {
            name: name.to_string(),
            uid: Some(2001),
            primary_group: Some("eng".to_string()),
            email: Some("jdoe@example.com".to_string()),
            shell: Some("/bin/zsh".to_string()),
            home_directory: Some("/ifs/home/jdoe".to_string()),
            enabled: true,
        }
    }

    #[test]
    fn test_delta_idempotent() {
        let mut desired = params("jdoe");
        desired.email = Some("jdoe@example.com".to_string());
        desired.enabled = Some(true);
        assert!(user_delta(&desired, &current("jdoe")).is_empty());
    }

    #[test]
    fn test_delta_single_field() {
        let mut desired = params("jdoe");
        desired.shell = Some("/bin/bash".to_string());

        let delta = user_delta(&desired, &current("jdoe"));
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("shell"), Some(&json!("/bin/bash")));
    }

    #[test]
    fn test_password_not_diffed_by_default() {
        let mut desired = params("jdoe");
        desired.password = Some("changed-it".to_string());
        assert!(user_delta(&desired, &current("jdoe")).is_empty());
    }

    #[test]
    fn test_password_forced_when_always() {
        let mut desired = params("jdoe");
        desired.password = Some("changed-it".to_string());
        desired.update_password = UpdatePassword::Always;

        let delta = user_delta(&desired, &current("jdoe"));
        assert_eq!(delta.get("password"), Some(&json!("changed-it")));
    }

    #[test]
    fn test_identity_query() {
        let mut desired = params("jdoe");
        assert_eq!(identity_query(&desired), "");

        desired.access_zone = Some("System".to_string());
        desired.provider = Some("local".to_string());
        assert_eq!(identity_query(&desired), "?zone=System&provider=local");
    }
}
