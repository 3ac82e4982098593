//! Desired-state plan document
//!
//! A plan is a YAML list of resource entries, each tagged with a `kind`
//! discriminator and decoded into the matching manager's parameter
//! struct at the boundary. Entries apply in document order; the first
//! failure aborts the run (all-or-nothing, no compensating action).

use crate::client::RestClient;
use crate::error::Result;
use crate::resources::{
    AlertChannelManager, AlertChannelParams, CertificateManager, CertificateParams, GroupManager,
    GroupParams, NetworkPoolManager, NetworkPoolParams, NfsExportManager, NfsExportParams,
    QuotaManager, QuotaParams, ResourceManager, RoleManager, RoleParams, SmbShareManager,
    SmbShareParams, SnapshotManager, SnapshotParams, SyncIqJobManager, SyncIqJobParams,
    SyncIqPolicyManager, SyncIqPolicyParams, SyncIqSettingsManager, SyncIqSettingsParams,
    UserManager, UserParams,
};
use crate::types::{ApplyReport, CheckMode};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

// =============================================================================
// Plan Document
// =============================================================================

/// One entry in a plan, dispatched on its `kind` tag
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceEntry {
    AlertChannel(AlertChannelParams),
    Certificate(CertificateParams),
    Group(GroupParams),
    NetworkPool(NetworkPoolParams),
    NfsExport(NfsExportParams),
    Quota(QuotaParams),
    Role(RoleParams),
    SmbShare(SmbShareParams),
    Snapshot(SnapshotParams),
    SynciqJob(SyncIqJobParams),
    SynciqPolicy(SyncIqPolicyParams),
    SynciqSettings(SyncIqSettingsParams),
    User(UserParams),
}

impl ResourceEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceEntry::AlertChannel(_) => "alert_channel",
            ResourceEntry::Certificate(_) => "certificate",
            ResourceEntry::Group(_) => "group",
            ResourceEntry::NetworkPool(_) => "network_pool",
            ResourceEntry::NfsExport(_) => "nfs_export",
            ResourceEntry::Quota(_) => "quota",
            ResourceEntry::Role(_) => "role",
            ResourceEntry::SmbShare(_) => "smb_share",
            ResourceEntry::Snapshot(_) => "snapshot",
            ResourceEntry::SynciqJob(_) => "synciq_job",
            ResourceEntry::SynciqPolicy(_) => "synciq_policy",
            ResourceEntry::SynciqSettings(_) => "synciq_settings",
            ResourceEntry::User(_) => "user",
        }
    }

    /// Identity used in reports and logs.
    pub fn name(&self) -> String {
        match self {
            ResourceEntry::AlertChannel(p) => p.name.clone(),
            ResourceEntry::Certificate(p) => p.name.clone(),
            ResourceEntry::Group(p) => p.name.clone(),
            ResourceEntry::NetworkPool(p) => p.name.clone(),
            ResourceEntry::NfsExport(p) => p.paths.first().cloned().unwrap_or_default(),
            ResourceEntry::Quota(p) => p.path.clone(),
            ResourceEntry::Role(p) => p.name.clone(),
            ResourceEntry::SmbShare(p) => p.name.clone(),
            ResourceEntry::Snapshot(p) => p.name.clone(),
            ResourceEntry::SynciqJob(p) => p.policy.clone(),
            ResourceEntry::SynciqPolicy(p) => p.name.clone(),
            ResourceEntry::SynciqSettings(_) => "global".to_string(),
            ResourceEntry::User(p) => p.name.clone(),
        }
    }

    /// Reconcile this entry against the cluster.
    pub async fn apply(&self, client: &RestClient, mode: CheckMode) -> Result<ApplyReport> {
        let kind = self.kind();
        let name = self.name();
        let report = match self {
            ResourceEntry::AlertChannel(p) => AlertChannelManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::Certificate(p) => CertificateManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::Group(p) => GroupManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::NetworkPool(p) => NetworkPoolManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::NfsExport(p) => NfsExportManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::Quota(p) => QuotaManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::Role(p) => RoleManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::SmbShare(p) => SmbShareManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::Snapshot(p) => SnapshotManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::SynciqJob(p) => SyncIqJobManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::SynciqPolicy(p) => SyncIqPolicyManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::SynciqSettings(p) => SyncIqSettingsManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
            ResourceEntry::User(p) => UserManager::new(client)
                .apply(p, mode)
                .await?
                .into_report(kind, &name),
        };
        Ok(report)
    }
}

/// A desired-state document
#[derive(Debug, Deserialize)]
pub struct Plan {
    pub resources: Vec<ResourceEntry>,
}

impl Plan {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }
}

// =============================================================================
// Apply Loop
// =============================================================================

/// Apply every entry in document order; the first error aborts the run.
pub async fn apply_plan(
    client: &RestClient,
    plan: &Plan,
    mode: CheckMode,
) -> Result<Vec<ApplyReport>> {
    let mut reports = Vec::with_capacity(plan.resources.len());
    for entry in &plan.resources {
        info!(kind = entry.kind(), name = %entry.name(), "applying resource");
        reports.push(entry.apply(client, mode).await?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceState;
    use assert_matches::assert_matches;

    #[test]
    fn test_plan_parses_tagged_entries() {
        let plan = Plan::from_yaml(
            r#"
resources:
  - kind: smb_share
    name: projects
    path: /ifs/data/projects
    browsable: true
  - kind: quota
    path: /ifs/data/projects
    type: directory
    hard: 107374182400
  - kind: synciq_settings
    service: on
    encryption_required: true
  - kind: synciq_job
    policy: nightly-dr
    job_state: running
"#,
        )
        .unwrap();

        assert_eq!(plan.resources.len(), 4);
        assert_eq!(plan.resources[0].kind(), "smb_share");
        assert_eq!(plan.resources[0].name(), "projects");
        assert_eq!(plan.resources[1].name(), "/ifs/data/projects");
        assert_eq!(plan.resources[2].name(), "global");
        assert_matches!(
            &plan.resources[3],
            ResourceEntry::SynciqJob(p) if p.job_state == crate::resources::SyncIqJobState::Running
        );
    }

    #[test]
    fn test_plan_defaults_state_to_present() {
        let plan = Plan::from_yaml(
            r#"
resources:
  - kind: snapshot
    name: nightly
    path: /ifs/data
"#,
        )
        .unwrap();
        match &plan.resources[0] {
            ResourceEntry::Snapshot(params) => {
                assert_eq!(params.state, ResourceState::Present);
            }
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = Plan::from_yaml(
            r#"
resources:
  - kind: teleporter
    name: nope
"#,
        );
        assert_matches!(result, Err(crate::error::Error::PlanParse(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = Plan::from_yaml(
            r#"
resources:
  - kind: smb_share
    name: projects
    sharename: typo
"#,
        );
        assert_matches!(result, Err(crate::error::Error::PlanParse(_)));
    }
}
