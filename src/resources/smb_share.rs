//! SMB share management
//!
//! Shares are keyed by name within an access zone. The create-mask
//! fields come back as strings from older API releases, so they are
//! normalized before comparison.

use crate::client::{encode_segment, RestClient};
use crate::error::Result;
use crate::reconcile::{normalize_number, Delta, DeltaBuilder};
use crate::resources::{ResourceManager, validate_ifs_path, validate_name, zone_query, API_BASE};
use crate::types::{ApplyOutcome, CheckMode, ResourceState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

// =============================================================================
// Wire Types
// =============================================================================

/// One SMB share as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmbShare {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
    pub browsable: bool,
    #[serde(default)]
    pub access_based_enumeration: bool,
    /// Octal permission mask; string-typed on older API releases
    pub directory_create_mask: serde_json::Value,
    pub file_create_mask: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ShareEnvelope {
    shares: Vec<SmbShare>,
}

// =============================================================================
// Parameters
// =============================================================================

/// Desired state of one SMB share
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmbShareParams {
    pub name: String,
    #[serde(default)]
    pub state: ResourceState,
    pub access_zone: Option<String>,
    /// Required on create
    pub path: Option<String>,
    pub description: Option<String>,
    pub browsable: Option<bool>,
    pub access_based_enumeration: Option<bool>,
    pub directory_create_mask: Option<u32>,
    pub file_create_mask: Option<u32>,
}

// =============================================================================
// SMB Share Manager
// =============================================================================

/// Reconciles one SMB share to its desired state
pub struct SmbShareManager<'a> {
    client: &'a RestClient,
}

impl<'a> SmbShareManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for SmbShareManager<'a> {
    type Params = SmbShareParams;
    type State = SmbShare;

    async fn apply(
        &self,
        params: &SmbShareParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<SmbShare>> {
        validate_share_params(params)?;

        let path = self.share_path(&params.name, params);
        let current = self
            .client
            .lookup::<ShareEnvelope>("Fetching SMB share", &path)
            .await?
            .found()
            .and_then(|envelope| envelope.shares.into_iter().next());

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(share = %params.name, "share already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(share), ResourceState::Absent) => {
                info!(share = %params.name, "deleting SMB share");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(share)));
                }
                self.client.delete("Deleting SMB share", &path).await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                let share_path = params.path.as_deref().ok_or_else(|| {
                    crate::error::Error::validation(format!(
                        "SMB share {} requires path to be created",
                        params.name
                    ))
                })?;
                validate_ifs_path("SMB share", share_path)?;
                info!(share = %params.name, path = %share_path, "creating SMB share");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Creating SMB share",
                        &format!(
                            "{}/protocols/smb/shares{}",
                            API_BASE,
                            zone_query(params.access_zone.as_deref())
                        ),
                        &share_create_body(params),
                    )
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
            (Some(share), ResourceState::Present) => {
                if let Some(desired_path) = params.path.as_deref() {
                    validate_ifs_path("SMB share", desired_path)?;
                }
                let delta = share_delta(params, &share);
                if delta.is_empty() {
                    debug!(share = %params.name, "share already matches");
                    return Ok(ApplyOutcome::unchanged(Some(share)));
                }
                info!(
                    share = %params.name,
                    fields = %delta.field_names().collect::<Vec<_>>().join(","),
                    "modifying SMB share"
                );
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(share)));
                }
                self.client
                    .put_json("Modifying SMB share", &path, &delta.into_body())
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
        }
    }
}

impl<'a> SmbShareManager<'a> {
    fn share_path(&self, name: &str, params: &SmbShareParams) -> String {
        format!(
            "{}/protocols/smb/shares/{}{}",
            API_BASE,
            encode_segment(name),
            zone_query(params.access_zone.as_deref())
        )
    }

    async fn refetch(&self, path: &str) -> Result<Option<SmbShare>> {
        let envelope: ShareEnvelope = self.client.get_json("Fetching SMB share", path).await?;
        Ok(envelope.shares.into_iter().next())
    }
}

fn validate_share_params(params: &SmbShareParams) -> Result<()> {
    validate_name("SMB share", &params.name)
}

fn share_create_body(params: &SmbShareParams) -> serde_json::Value {
    let mut body = json!({
        "name": params.name,
        "path": params.path,
    });
    let object = body.as_object_mut().unwrap();
    if let Some(description) = &params.description {
        object.insert("description".into(), json!(description));
    }
    if let Some(browsable) = params.browsable {
        object.insert("browsable".into(), json!(browsable));
    }
    if let Some(abe) = params.access_based_enumeration {
        object.insert("access_based_enumeration".into(), json!(abe));
    }
    if let Some(mask) = params.directory_create_mask {
        object.insert("directory_create_mask".into(), json!(mask));
    }
    if let Some(mask) = params.file_create_mask {
        object.insert("file_create_mask".into(), json!(mask));
    }
    body
}

fn share_delta(params: &SmbShareParams, current: &SmbShare) -> Delta {
    let desired_dir_mask = params.directory_create_mask.map(|mask| json!(mask));
    let desired_file_mask = params.file_create_mask.map(|mask| json!(mask));
    DeltaBuilder::new()
        .field("path", params.path.as_ref(), &current.path)
        .field(
            "description",
            params.description.as_ref(),
            &current.description,
        )
        .field("browsable", params.browsable.as_ref(), &current.browsable)
        .field(
            "access_based_enumeration",
            params.access_based_enumeration.as_ref(),
            &current.access_based_enumeration,
        )
        .field_normalized(
            "directory_create_mask",
            desired_dir_mask.as_ref(),
            &current.directory_create_mask,
            normalize_number,
        )
        .field_normalized(
            "file_create_mask",
            desired_file_mask.as_ref(),
            &current.file_create_mask,
            normalize_number,
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::error::Error;

    fn params(name: &str) -> SmbShareParams {
        SmbShareParams {
            name: name.to_string(),
            state: ResourceState::Present,
            access_zone: None,
            path: None,
            description: None,
            browsable: None,
            access_based_enumeration: None,
            directory_create_mask: None,
            file_create_mask: None,
        }
    }

    fn current(name: &str) -> SmbShare {
        SmbShare {
            name: name.to_string(),
            path: "/ifs/data/team".to_string(),
            description: String::new(),
            browsable: true,
            access_based_enumeration: false,
            // Older release: masks come back as strings.
            directory_create_mask: json!("448"),
            file_create_mask: json!("448"),
        }
    }

    #[test]
    fn test_empty_name_rejected() {
        assert_matches!(validate_share_params(&params("")), Err(Error::Validation(_)));
    }

    #[test]
    fn test_mask_string_skew_is_not_a_change() {
        let mut desired = params("team");
        desired.directory_create_mask = Some(448);
        assert!(share_delta(&desired, &current("team")).is_empty());
    }

    #[test]
    fn test_mask_real_change_detected() {
        let mut desired = params("team");
        desired.directory_create_mask = Some(511);

        let delta = share_delta(&desired, &current("team"));
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("directory_create_mask"), Some(&json!(511)));
    }

    #[test]
    fn test_delta_single_browsable_change() {
        let mut desired = params("team");
        desired.browsable = Some(false);
        desired.path = Some("/ifs/data/team".to_string());

        let delta = share_delta(&desired, &current("team"));
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("browsable"), Some(&json!(false)));
    }
}
