//! SmartQuota management
//!
//! Reconciles capacity quotas on directories, users and groups. The
//! enforcement itself happens inside the cluster; this module only
//! manages threshold configuration.
//!
//! Quotas are identified by (type, path, persona), not by name, so the
//! current state is located through a filtered, paginated listing. A
//! lookup failure is a failure: it is never collapsed into "no quota".

use crate::client::paging::drain_pages;
use crate::client::{encode_segment, RestClient};
use crate::error::{Error, Result};
use crate::reconcile::{Delta, DeltaBuilder};
use crate::resources::{ResourceManager, validate_ifs_path, API_BASE};
use crate::types::{ApplyOutcome, CheckMode, ResourceState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

// =============================================================================
// Wire Types
// =============================================================================

/// Quota scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaType {
    Directory,
    User,
    Group,
}

impl std::fmt::Display for QuotaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaType::Directory => write!(f, "directory"),
            QuotaType::User => write!(f, "user"),
            QuotaType::Group => write!(f, "group"),
        }
    }
}

/// Capacity thresholds in bytes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaThresholds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard: Option<u64>,
    /// Grace period before the soft threshold becomes enforcing, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft_grace: Option<u64>,
}

/// Identity a user/group quota applies to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One quota as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    pub id: String,
    #[serde(rename = "type")]
    pub quota_type: QuotaType,
    pub path: String,
    pub include_snapshots: bool,
    /// Directory quotas only: report the limit as the filesystem size
    pub container: bool,
    pub thresholds: QuotaThresholds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<Persona>,
}

#[derive(Debug, Deserialize)]
struct QuotaPage {
    quotas: Vec<Quota>,
    #[serde(default)]
    resume: Option<String>,
}

// =============================================================================
// Parameters
// =============================================================================

/// Desired state of one quota
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaParams {
    pub path: String,
    #[serde(default = "default_quota_type", rename = "type")]
    pub quota_type: QuotaType,
    #[serde(default)]
    pub state: ResourceState,
    /// User name, user quotas only
    pub user: Option<String>,
    /// Group name, group quotas only
    pub group: Option<String>,
    pub advisory: Option<u64>,
    pub soft: Option<u64>,
    pub hard: Option<u64>,
    pub soft_grace: Option<u64>,
    pub include_snapshots: Option<bool>,
    pub container: Option<bool>,
}

fn default_quota_type() -> QuotaType {
    QuotaType::Directory
}

// =============================================================================
// Quota Manager
// =============================================================================

/// Reconciles one quota to its desired state
pub struct QuotaManager<'a> {
    client: &'a RestClient,
}

impl<'a> QuotaManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for QuotaManager<'a> {
    type Params = QuotaParams;
    type State = Quota;

    async fn apply(
        &self,
        params: &QuotaParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<Quota>> {
        validate_quota_params(params)?;

        let current = self.find(params).await?;

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(path = %params.path, "quota already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(quota), ResourceState::Absent) => {
                info!(path = %params.path, id = %quota.id, "deleting quota");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(quota)));
                }
                self.client
                    .delete(
                        "Deleting quota",
                        &format!("{}/quota/quotas/{}", API_BASE, encode_segment(&quota.id)),
                    )
                    .await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                info!(path = %params.path, quota_type = %params.quota_type, "creating quota");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Creating quota",
                        &format!("{}/quota/quotas", API_BASE),
                        &quota_create_body(params),
                    )
                    .await?;
                self.find(params).await.map(ApplyOutcome::changed)
            }
            (Some(quota), ResourceState::Present) => {
                let delta = quota_delta(params, &quota);
                if delta.is_empty() {
                    debug!(path = %params.path, "quota already matches");
                    return Ok(ApplyOutcome::unchanged(Some(quota)));
                }
                info!(
                    path = %params.path,
                    fields = %delta.field_names().collect::<Vec<_>>().join(","),
                    "modifying quota"
                );
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(quota)));
                }
                self.client
                    .put_json(
                        "Modifying quota",
                        &format!("{}/quota/quotas/{}", API_BASE, encode_segment(&quota.id)),
                        &delta.into_body(),
                    )
                    .await?;
                self.find(params).await.map(ApplyOutcome::changed)
            }
        }
    }
}

impl<'a> QuotaManager<'a> {
    /// Locate the quota matching (type, path, persona) via the filtered
    /// listing. Errors propagate; only a clean empty listing means
    /// absent.
    async fn find(&self, params: &QuotaParams) -> Result<Option<Quota>> {
        let base = format!(
            "{}/quota/quotas?type={}&path={}",
            API_BASE,
            params.quota_type,
            encode_segment(&params.path)
        );

        let quotas: Vec<Quota> = drain_pages(|resume| {
            let path = match &resume {
                Some(token) => format!("{}&resume={}", base, encode_segment(token)),
                None => base.clone(),
            };
            async move {
                let page: QuotaPage = self.client.get_json("Listing quotas", &path).await?;
                Ok((page.quotas, page.resume))
            }
        })
        .await?;

        let wanted = persona_name(params);
        Ok(quotas.into_iter().find(|quota| {
            quota.path == params.path
                && quota.quota_type == params.quota_type
                && quota.persona.as_ref().and_then(|p| p.name.as_deref()) == wanted
        }))
    }
}

fn persona_name(params: &QuotaParams) -> Option<&str> {
    match params.quota_type {
        QuotaType::User => params.user.as_deref(),
        QuotaType::Group => params.group.as_deref(),
        QuotaType::Directory => None,
    }
}

fn validate_quota_params(params: &QuotaParams) -> Result<()> {
    validate_ifs_path("Quota", &params.path)?;

    if params.user.is_some() && params.group.is_some() {
        return Err(Error::validation(
            "Quota parameters user and group are mutually exclusive",
        ));
    }
    match params.quota_type {
        QuotaType::User if params.user.is_none() => {
            return Err(Error::validation("User quota requires the user parameter"));
        }
        QuotaType::Group if params.group.is_none() => {
            return Err(Error::validation(
                "Group quota requires the group parameter",
            ));
        }
        QuotaType::Directory if params.user.is_some() || params.group.is_some() => {
            return Err(Error::validation(
                "Directory quota takes neither user nor group",
            ));
        }
        _ => {}
    }

    // Threshold ordering is enforced remotely too, but rejecting locally
    // saves a round-trip and gives a clearer message.
    let ordered = [params.advisory, params.soft, params.hard];
    let set: Vec<u64> = ordered.iter().flatten().copied().collect();
    if set.windows(2).any(|pair| pair[0] > pair[1]) {
        return Err(Error::validation(format!(
            "Quota thresholds must satisfy advisory <= soft <= hard on {}",
            params.path
        )));
    }
    if set.iter().any(|&bytes| bytes == 0) {
        return Err(Error::validation("Quota thresholds must be non-zero"));
    }

    Ok(())
}

fn quota_create_body(params: &QuotaParams) -> serde_json::Value {
    let mut thresholds = serde_json::Map::new();
    for (name, value) in [
        ("advisory", params.advisory),
        ("soft", params.soft),
        ("hard", params.hard),
        ("soft_grace", params.soft_grace),
    ] {
        if let Some(value) = value {
            thresholds.insert(name.to_string(), json!(value));
        }
    }

    let mut body = json!({
        "type": params.quota_type,
        "path": params.path,
        "include_snapshots": params.include_snapshots.unwrap_or(false),
        "thresholds": thresholds,
    });
    let object = body.as_object_mut().unwrap();
    if let Some(container) = params.container {
        object.insert("container".into(), json!(container));
    }
    if let Some(name) = persona_name(params) {
        object.insert("persona".into(), json!({ "name": name }));
    }
    body
}

fn quota_delta(params: &QuotaParams, current: &Quota) -> Delta {
    let mut builder = DeltaBuilder::new()
        .field(
            "include_snapshots",
            params.include_snapshots.as_ref(),
            &current.include_snapshots,
        )
        .field("container", params.container.as_ref(), &current.container);

    let thresholds = DeltaBuilder::new()
        .field_opt(
            "advisory",
            params.advisory.as_ref(),
            current.thresholds.advisory.as_ref(),
        )
        .field_opt(
            "soft",
            params.soft.as_ref(),
            current.thresholds.soft.as_ref(),
        )
        .field_opt(
            "hard",
            params.hard.as_ref(),
            current.thresholds.hard.as_ref(),
        )
        .field_opt(
            "soft_grace",
            params.soft_grace.as_ref(),
            current.thresholds.soft_grace.as_ref(),
        )
        .build();
    if !thresholds.is_empty() {
        builder = builder.insert("thresholds", thresholds.into_body());
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn directory_params(path: &str) -> QuotaParams {
        QuotaParams {
            path: path.to_string(),
            quota_type: QuotaType::Directory,
            state: ResourceState::Present,
            user: None,
            group: None,
            advisory: None,
            soft: None,
            hard: None,
            soft_grace: None,
            include_snapshots: None,
            container: None,
        }
    }

    fn current_quota() -> Quota {
        Quota {
            id: "AABpAQEAAAAAAAAAAAAAQA0AAAAAAAAA".to_string(),
            quota_type: QuotaType::Directory,
            path: "/ifs/data/projects".to_string(),
            include_snapshots: false,
            container: true,
            thresholds: QuotaThresholds {
                advisory: Some(80 * 1024 * 1024 * 1024),
                soft: None,
                hard: Some(100 * 1024 * 1024 * 1024),
                soft_grace: None,
            },
            persona: None,
        }
    }

    #[test]
    fn test_threshold_ordering_rejected_locally() {
        let mut params = directory_params("/ifs/data");
        params.advisory = Some(200);
        params.hard = Some(100);
        assert_matches!(validate_quota_params(&params), Err(Error::Validation(_)));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut params = directory_params("/ifs/data");
        params.hard = Some(0);
        assert_matches!(validate_quota_params(&params), Err(Error::Validation(_)));
    }

    #[test]
    fn test_user_and_group_mutually_exclusive() {
        let mut params = directory_params("/ifs/home/jdoe");
        params.quota_type = QuotaType::User;
        params.user = Some("jdoe".to_string());
        params.group = Some("eng".to_string());
        assert_matches!(validate_quota_params(&params), Err(Error::Validation(_)));
    }

    #[test]
    fn test_user_quota_requires_user() {
        let mut params = directory_params("/ifs/home/jdoe");
        params.quota_type = QuotaType::User;
        assert_matches!(validate_quota_params(&params), Err(Error::Validation(_)));
    }

    #[test]
    fn test_path_outside_ifs_rejected() {
        let params = directory_params("/var/data");
        assert_matches!(validate_quota_params(&params), Err(Error::Validation(_)));
    }

    #[test]
    fn test_delta_idempotent_when_matching() {
        let mut params = directory_params("/ifs/data/projects");
        params.advisory = Some(80 * 1024 * 1024 * 1024);
        params.hard = Some(100 * 1024 * 1024 * 1024);
        params.container = Some(true);
        assert!(quota_delta(&params, &current_quota()).is_empty());
    }

    #[test]
    fn test_delta_nests_changed_thresholds() {
        let mut params = directory_params("/ifs/data/projects");
        params.hard = Some(200 * 1024 * 1024 * 1024);
        params.container = Some(true);

        let delta = quota_delta(&params, &current_quota());
        assert_eq!(delta.len(), 1);
        let body = delta.into_body();
        assert_eq!(body["thresholds"]["hard"], json!(200u64 * 1024 * 1024 * 1024));
        assert!(body["thresholds"].get("advisory").is_none());
    }

    #[test]
    fn test_create_body_includes_persona_for_user_quota() {
        let mut params = directory_params("/ifs/home/jdoe");
        params.quota_type = QuotaType::User;
        params.user = Some("jdoe".to_string());
        params.hard = Some(10 * 1024 * 1024 * 1024);

        let body = quota_create_body(&params);
        assert_eq!(body["persona"]["name"], "jdoe");
        assert_eq!(body["type"], "user");
        assert_eq!(body["thresholds"]["hard"], json!(10u64 * 1024 * 1024 * 1024));
    }
}
