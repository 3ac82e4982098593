//! NFS export management
//!
//! Exports are identified by their path set within an access zone, not by
//! name, so the current state is located through a filtered, paginated
//! listing. Client lists compare order-insensitively.

use crate::client::paging::drain_pages;
use crate::client::{encode_segment, RestClient};
use crate::error::{Error, Result};
use crate::reconcile::{Delta, DeltaBuilder};
use crate::resources::{ResourceManager, validate_ifs_path, API_BASE};
use crate::types::{ApplyOutcome, CheckMode, ResourceState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info};

// =============================================================================
// Wire Types
// =============================================================================

/// Root/non-root identity mapping on an export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NfsMapping {
    pub enabled: bool,
    pub user: String,
}

/// One NFS export as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NfsExport {
    pub id: u64,
    pub paths: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub read_only: bool,
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(default)]
    pub read_only_clients: Vec<String>,
    #[serde(default)]
    pub root_clients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_root: Option<NfsMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExportPage {
    exports: Vec<NfsExport>,
    #[serde(default)]
    resume: Option<String>,
}

// =============================================================================
// Parameters
// =============================================================================

/// Desired state of one NFS export
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NfsExportParams {
    /// Exported filesystem paths; the first path is the export identity
    pub paths: Vec<String>,
    #[serde(default)]
    pub state: ResourceState,
    pub access_zone: Option<String>,
    pub description: Option<String>,
    pub read_only: Option<bool>,
    pub clients: Option<Vec<String>>,
    pub read_only_clients: Option<Vec<String>>,
    pub root_clients: Option<Vec<String>>,
    /// User all root clients are mapped to (squashing)
    pub map_root_user: Option<String>,
}

// =============================================================================
// NFS Export Manager
// =============================================================================

/// Reconciles one NFS export to its desired state
pub struct NfsExportManager<'a> {
    client: &'a RestClient,
}

impl<'a> NfsExportManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for NfsExportManager<'a> {
    type Params = NfsExportParams;
    type State = NfsExport;

    async fn apply(
        &self,
        params: &NfsExportParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<NfsExport>> {
        validate_export_params(params)?;

        let current = self.find(params).await?;

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(path = %params.paths[0], "export already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(export), ResourceState::Absent) => {
                info!(path = %params.paths[0], id = export.id, "deleting NFS export");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(export)));
                }
                self.client
                    .delete("Deleting NFS export", &self.export_path(export.id, params))
                    .await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                info!(path = %params.paths[0], "creating NFS export");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Creating NFS export",
                        &format!(
                            "{}/protocols/nfs/exports{}",
                            API_BASE,
                            super::zone_query(params.access_zone.as_deref())
                        ),
                        &export_create_body(params),
                    )
                    .await?;
                self.find(params).await.map(ApplyOutcome::changed)
            }
            (Some(export), ResourceState::Present) => {
                let delta = export_delta(params, &export);
                if delta.is_empty() {
                    debug!(path = %params.paths[0], "export already matches");
                    return Ok(ApplyOutcome::unchanged(Some(export)));
                }
                info!(
                    path = %params.paths[0],
                    fields = %delta.field_names().collect::<Vec<_>>().join(","),
                    "modifying NFS export"
                );
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(export)));
                }
                self.client
                    .put_json(
                        "Modifying NFS export",
                        &self.export_path(export.id, params),
                        &delta.into_body(),
                    )
                    .await?;
                self.find(params).await.map(ApplyOutcome::changed)
            }
        }
    }
}

impl<'a> NfsExportManager<'a> {
    fn export_path(&self, id: u64, params: &NfsExportParams) -> String {
        format!(
            "{}/protocols/nfs/exports/{}{}",
            API_BASE,
            id,
            super::zone_query(params.access_zone.as_deref())
        )
    }

    /// Locate the export whose path set matches the desired paths.
    async fn find(&self, params: &NfsExportParams) -> Result<Option<NfsExport>> {
        let mut base = format!(
            "{}/protocols/nfs/exports?path={}",
            API_BASE,
            encode_segment(&params.paths[0])
        );
        if let Some(zone) = params.access_zone.as_deref() {
            base.push_str(&format!("&zone={}", encode_segment(zone)));
        }

        let exports: Vec<NfsExport> = drain_pages(|resume| {
            let path = match &resume {
                Some(token) => format!("{}&resume={}", base, encode_segment(token)),
                None => base.clone(),
            };
            async move {
                let page: ExportPage = self.client.get_json("Listing NFS exports", &path).await?;
                Ok((page.exports, page.resume))
            }
        })
        .await?;

        let wanted: BTreeSet<&str> = params.paths.iter().map(String::as_str).collect();
        let mut matches: Vec<NfsExport> = exports
            .into_iter()
            .filter(|export| {
                let have: BTreeSet<&str> = export.paths.iter().map(String::as_str).collect();
                have == wanted
            })
            .collect();

        if matches.len() > 1 {
            return Err(Error::validation(format!(
                "Multiple NFS exports match paths {:?}; cannot reconcile unambiguously",
                params.paths
            )));
        }
        Ok(matches.pop())
    }
}

fn validate_export_params(params: &NfsExportParams) -> Result<()> {
    if params.paths.is_empty() {
        return Err(Error::validation("NFS export requires at least one path"));
    }
    for path in &params.paths {
        validate_ifs_path("NFS export", path)?;
    }
    Ok(())
}

fn export_create_body(params: &NfsExportParams) -> serde_json::Value {
    let mut body = json!({ "paths": params.paths });
    let object = body.as_object_mut().unwrap();
    if let Some(description) = &params.description {
        object.insert("description".into(), json!(description));
    }
    if let Some(read_only) = params.read_only {
        object.insert("read_only".into(), json!(read_only));
    }
    for (name, clients) in [
        ("clients", &params.clients),
        ("read_only_clients", &params.read_only_clients),
        ("root_clients", &params.root_clients),
    ] {
        if let Some(clients) = clients {
            object.insert(name.into(), json!(clients));
        }
    }
    if let Some(user) = &params.map_root_user {
        object.insert(
            "map_root".into(),
            json!({ "enabled": true, "user": user }),
        );
    }
    body
}

fn export_delta(params: &NfsExportParams, current: &NfsExport) -> Delta {
    let desired_map_root = params.map_root_user.as_ref().map(|user| NfsMapping {
        enabled: true,
        user: user.clone(),
    });
    DeltaBuilder::new()
        .field(
            "description",
            params.description.as_ref(),
            &current.description,
        )
        .field("read_only", params.read_only.as_ref(), &current.read_only)
        .field_set("clients", params.clients.as_ref(), &current.clients)
        .field_set(
            "read_only_clients",
            params.read_only_clients.as_ref(),
            &current.read_only_clients,
        )
        .field_set(
            "root_clients",
            params.root_clients.as_ref(),
            &current.root_clients,
        )
        .field_opt(
            "map_root",
            desired_map_root.as_ref(),
            current.map_root.as_ref(),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn params(path: &str) -> NfsExportParams {
        NfsExportParams {
            paths: vec![path.to_string()],
            state: ResourceState::Present,
            access_zone: None,
            description: None,
            read_only: None,
            clients: None,
            read_only_clients: None,
            root_clients: None,
            map_root_user: None,
        }
    }

    fn current(path: &str) -> NfsExport {
        NfsExport {
            id: 17,
            paths: vec![path.to_string()],
            description: "project export".to_string(),
            read_only: false,
            clients: vec!["10.1.0.5".to_string(), "10.1.0.6".to_string()],
            read_only_clients: vec![],
            root_clients: vec![],
            map_root: Some(NfsMapping {
                enabled: true,
                user: "nobody".to_string(),
            }),
            zone: Some("System".to_string()),
        }
    }

    #[test]
    fn test_empty_paths_rejected() {
        let mut bad = params("/ifs/data");
        bad.paths.clear();
        assert_matches!(validate_export_params(&bad), Err(Error::Validation(_)));
    }

    #[test]
    fn test_delta_idempotent() {
        let mut desired = params("/ifs/data/projects");
        desired.description = Some("project export".to_string());
        desired.clients = Some(vec!["10.1.0.6".to_string(), "10.1.0.5".to_string()]);
        desired.map_root_user = Some("nobody".to_string());
        assert!(export_delta(&desired, &current("/ifs/data/projects")).is_empty());
    }

    #[test]
    fn test_delta_single_client_change() {
        let mut desired = params("/ifs/data/projects");
        desired.clients = Some(vec!["10.1.0.5".to_string()]);

        let delta = export_delta(&desired, &current("/ifs/data/projects"));
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("clients"), Some(&json!(["10.1.0.5"])));
    }

    #[test]
    fn test_delta_map_root_change() {
        let mut desired = params("/ifs/data/projects");
        desired.map_root_user = Some("root".to_string());

        let delta = export_delta(&desired, &current("/ifs/data/projects"));
        assert_eq!(
            delta.get("map_root"),
            Some(&json!({ "enabled": true, "user": "root" }))
        );
    }

    #[test]
    fn test_create_body_minimal() {
        let mut desired = params("/ifs/data/scratch");
        desired.read_only = Some(true);

        let body = export_create_body(&desired);
        assert_eq!(body["paths"], json!(["/ifs/data/scratch"]));
        assert_eq!(body["read_only"], json!(true));
        assert!(body.get("clients").is_none());
        assert!(body.get("map_root").is_none());
    }
}
