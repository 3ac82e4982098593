//! SyncIQ replication management
//!
//! Three surfaces: the global replication settings (modify-only), the
//! replication policies (present/absent), and job control for a policy
//! (run/pause/cancel). The replication engine itself runs inside the
//! cluster; this module only reconciles its configuration.

use crate::client::RestClient;
use crate::error::{Error, Result};
use crate::reconcile::{Delta, DeltaBuilder};
use crate::resources::{ResourceManager, validate_ifs_path, validate_name, API_BASE};
use crate::types::{ApplyOutcome, CheckMode, ResourceState, ServiceMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

// =============================================================================
// Wire Types
// =============================================================================

/// Global replication settings as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncIqSettings {
    /// Service mode: "on", "off" or "paused"
    pub service: String,
    /// Whether policies must use encrypted target connections
    pub encryption_required: bool,
    /// Maximum age of replication reports, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_max_age: Option<u64>,
    /// Maximum number of retained reports per policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_max_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SettingsEnvelope {
    settings: SyncIqSettings,
}

/// One replication policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncIqPolicy {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// "copy" or "sync"
    pub action: String,
    pub source_root_path: String,
    pub target_host: String,
    pub target_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PolicyEnvelope {
    policies: Vec<SyncIqPolicy>,
}

/// A running (or paused) replication job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncIqJob {
    pub id: String,
    pub policy_name: String,
    /// "running", "paused", "canceled", "finished", "failed"
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    jobs: Vec<SyncIqJob>,
}

// =============================================================================
// Parameters
// =============================================================================

/// Desired global replication settings; unset fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncIqSettingsParams {
    pub service: Option<ServiceMode>,
    pub encryption_required: Option<bool>,
    pub report_max_age: Option<u64>,
    pub report_max_count: Option<u64>,
}

/// Replication action for a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Copy,
    Sync,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncAction::Copy => write!(f, "copy"),
            SyncAction::Sync => write!(f, "sync"),
        }
    }
}

/// Desired state of one replication policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncIqPolicyParams {
    pub name: String,
    #[serde(default)]
    pub state: ResourceState,
    pub source_root_path: Option<String>,
    pub target_host: Option<String>,
    pub target_path: Option<String>,
    pub action: Option<SyncAction>,
    pub enabled: Option<bool>,
    pub schedule: Option<String>,
    pub description: Option<String>,
}

/// Desired job state for a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncIqJobState {
    Running,
    Paused,
    Canceled,
}

/// Desired job control for one policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncIqJobParams {
    pub policy: String,
    pub job_state: SyncIqJobState,
}

// =============================================================================
// Settings Manager
// =============================================================================

/// Reconciles the global replication settings (modify-only)
pub struct SyncIqSettingsManager<'a> {
    client: &'a RestClient,
}

impl<'a> SyncIqSettingsManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for SyncIqSettingsManager<'a> {
    type Params = SyncIqSettingsParams;
    type State = SyncIqSettings;

    async fn apply(
        &self,
        params: &SyncIqSettingsParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<SyncIqSettings>> {
        let path = format!("{}/sync/settings", API_BASE);
        let envelope: SettingsEnvelope = self
            .client
            .get_json("Fetching replication settings", &path)
            .await?;
        let current = envelope.settings;

        let delta = settings_delta(params, &current);
        if delta.is_empty() {
            debug!("replication settings already match");
            return Ok(ApplyOutcome::unchanged(Some(current)));
        }

        info!(
            fields = %delta.field_names().collect::<Vec<_>>().join(","),
            "updating replication settings"
        );
        if mode.is_check() {
            return Ok(ApplyOutcome::changed(Some(current)));
        }

        self.client
            .put_json("Updating replication settings", &path, &delta.into_body())
            .await?;

        let envelope: SettingsEnvelope = self
            .client
            .get_json("Fetching replication settings", &path)
            .await?;
        Ok(ApplyOutcome::changed(Some(envelope.settings)))
    }
}

fn settings_delta(params: &SyncIqSettingsParams, current: &SyncIqSettings) -> Delta {
    let desired_service = params.service.map(|mode| mode.to_string());
    DeltaBuilder::new()
        .field("service", desired_service.as_ref(), &current.service)
        .field(
            "encryption_required",
            params.encryption_required.as_ref(),
            &current.encryption_required,
        )
        .field_opt(
            "report_max_age",
            params.report_max_age.as_ref(),
            current.report_max_age.as_ref(),
        )
        .field_opt(
            "report_max_count",
            params.report_max_count.as_ref(),
            current.report_max_count.as_ref(),
        )
        .build()
}

// =============================================================================
// Policy Manager
// =============================================================================

/// Reconciles one replication policy to its desired state
pub struct SyncIqPolicyManager<'a> {
    client: &'a RestClient,
}

impl<'a> SyncIqPolicyManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }

    async fn refetch(&self, path: &str) -> Result<Option<SyncIqPolicy>> {
        let envelope: PolicyEnvelope = self
            .client
            .get_json("Fetching replication policy", path)
            .await?;
        Ok(envelope.policies.into_iter().next())
    }
}

#[async_trait]
impl<'a> ResourceManager for SyncIqPolicyManager<'a> {
    type Params = SyncIqPolicyParams;
    type State = SyncIqPolicy;

    async fn apply(
        &self,
        params: &SyncIqPolicyParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<SyncIqPolicy>> {
        validate_policy_params(params)?;

        let path = format!(
            "{}/sync/policies/{}",
            API_BASE,
            crate::client::encode_segment(&params.name)
        );
        let current = self
            .client
            .lookup::<PolicyEnvelope>("Fetching replication policy", &path)
            .await?
            .found()
            .and_then(|envelope| envelope.policies.into_iter().next());

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(policy = %params.name, "policy already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(policy), ResourceState::Absent) => {
                info!(policy = %params.name, "deleting replication policy");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(policy)));
                }
                self.client
                    .delete("Deleting replication policy", &path)
                    .await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                validate_policy_create(params)?;
                info!(policy = %params.name, "creating replication policy");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                let body = policy_create_body(params);
                self.client
                    .post_json(
                        "Creating replication policy",
                        &format!("{}/sync/policies", API_BASE),
                        &body,
                    )
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
            (Some(policy), ResourceState::Present) => {
                let delta = policy_delta(params, &policy);
                if delta.is_empty() {
                    debug!(policy = %params.name, "policy already matches");
                    return Ok(ApplyOutcome::unchanged(Some(policy)));
                }
                info!(
                    policy = %params.name,
                    fields = %delta.field_names().collect::<Vec<_>>().join(","),
                    "modifying replication policy"
                );
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(policy)));
                }
                self.client
                    .put_json("Modifying replication policy", &path, &delta.into_body())
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
        }
    }
}

fn validate_policy_params(params: &SyncIqPolicyParams) -> Result<()> {
    validate_name("Replication policy", &params.name)?;
    if let Some(path) = &params.source_root_path {
        validate_ifs_path("Replication policy source", path)?;
    }
    Ok(())
}

fn validate_policy_create(params: &SyncIqPolicyParams) -> Result<()> {
    for (field, value) in [
        ("source_root_path", &params.source_root_path),
        ("target_host", &params.target_host),
        ("target_path", &params.target_path),
    ] {
        if value.is_none() {
            return Err(Error::validation(format!(
                "Replication policy {} requires {} to be created",
                params.name, field
            )));
        }
    }
    Ok(())
}

fn policy_create_body(params: &SyncIqPolicyParams) -> serde_json::Value {
    let mut body = json!({
        "name": params.name,
        "source_root_path": params.source_root_path,
        "target_host": params.target_host,
        "target_path": params.target_path,
        "action": params.action.unwrap_or(SyncAction::Sync).to_string(),
    });
    let object = body.as_object_mut().unwrap();
    if let Some(enabled) = params.enabled {
        object.insert("enabled".into(), json!(enabled));
    }
    if let Some(schedule) = &params.schedule {
        object.insert("schedule".into(), json!(schedule));
    }
    if let Some(description) = &params.description {
        object.insert("description".into(), json!(description));
    }
    body
}

fn policy_delta(params: &SyncIqPolicyParams, current: &SyncIqPolicy) -> Delta {
    let desired_action = params.action.map(|action| action.to_string());
    DeltaBuilder::new()
        .field("enabled", params.enabled.as_ref(), &current.enabled)
        .field("action", desired_action.as_ref(), &current.action)
        .field(
            "source_root_path",
            params.source_root_path.as_ref(),
            &current.source_root_path,
        )
        .field(
            "target_host",
            params.target_host.as_ref(),
            &current.target_host,
        )
        .field(
            "target_path",
            params.target_path.as_ref(),
            &current.target_path,
        )
        .field_opt(
            "schedule",
            params.schedule.as_ref(),
            current.schedule.as_ref(),
        )
        .field_opt(
            "description",
            params.description.as_ref(),
            current.description.as_ref(),
        )
        .build()
}

// =============================================================================
// Job Manager
// =============================================================================

/// Drives a policy's replication job toward a desired state
pub struct SyncIqJobManager<'a> {
    client: &'a RestClient,
}

impl<'a> SyncIqJobManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }

    async fn refetch(&self, path: &str) -> Result<Option<SyncIqJob>> {
        let envelope: JobEnvelope = self
            .client
            .get_json("Fetching replication job", path)
            .await?;
        Ok(envelope.jobs.into_iter().next())
    }
}

#[async_trait]
impl<'a> ResourceManager for SyncIqJobManager<'a> {
    type Params = SyncIqJobParams;
    type State = SyncIqJob;

    async fn apply(
        &self,
        params: &SyncIqJobParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<SyncIqJob>> {
        let policy_name = params.policy.as_str();
        let desired = params.job_state;
        validate_name("Replication policy", policy_name)?;

        let path = format!(
            "{}/sync/jobs/{}",
            API_BASE,
            crate::client::encode_segment(policy_name)
        );
        let current = self
            .client
            .lookup::<JobEnvelope>("Fetching replication job", &path)
            .await?
            .found()
            .and_then(|envelope| envelope.jobs.into_iter().next())
            // Finished and failed jobs linger in listings but are not
            // actionable.
            .filter(|job| matches!(job.state.as_str(), "running" | "paused"));

        match (current, desired) {
            (Some(job), SyncIqJobState::Running) if job.state == "running" => {
                debug!(policy = %policy_name, "job already running");
                Ok(ApplyOutcome::unchanged(Some(job)))
            }
            (Some(job), SyncIqJobState::Paused) if job.state == "paused" => {
                debug!(policy = %policy_name, "job already paused");
                Ok(ApplyOutcome::unchanged(Some(job)))
            }
            (None, SyncIqJobState::Canceled) => {
                debug!(policy = %policy_name, "no job to cancel");
                Ok(ApplyOutcome::unchanged(None))
            }
            (None, SyncIqJobState::Running) => {
                info!(policy = %policy_name, "starting replication job");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Starting replication job",
                        &format!("{}/sync/jobs", API_BASE),
                        &json!({ "id": policy_name }),
                    )
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
            (None, SyncIqJobState::Paused) => Err(Error::ResourceNotFound {
                kind: "replication job".to_string(),
                name: policy_name.to_string(),
            }),
            (Some(job), desired) => {
                let target = match desired {
                    SyncIqJobState::Running => "running",
                    SyncIqJobState::Paused => "paused",
                    SyncIqJobState::Canceled => "canceled",
                };
                info!(policy = %policy_name, from = %job.state, to = %target, "changing job state");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(job)));
                }
                self.client
                    .put_json(
                        "Changing replication job state",
                        &path,
                        &json!({ "state": target }),
                    )
                    .await?;
                if desired == SyncIqJobState::Canceled {
                    Ok(ApplyOutcome::changed(None))
                } else {
                    self.refetch(&path).await.map(ApplyOutcome::changed)
                }
            }
        }
    }
}
