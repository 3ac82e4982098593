//! Snapshot management
//!
//! Snapshots are created on a filesystem path and are immutable in place:
//! name, expiration and alias can change, the path cannot. Expiration can
//! be given as an absolute epoch or as a retention duration, which is
//! anchored to the snapshot's creation time so repeated runs stay
//! idempotent.

use crate::client::{encode_segment, Lookup, RestClient};
use crate::error::{Error, Result};
use crate::reconcile::{Delta, DeltaBuilder};
use crate::resources::{ResourceManager, validate_ifs_path, validate_name, API_BASE};
use crate::types::{ApplyOutcome, CheckMode, ResourceState};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

// =============================================================================
// Wire Types
// =============================================================================

/// One snapshot as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: u64,
    pub name: String,
    pub path: String,
    /// Creation time, Unix epoch seconds
    pub created: i64,
    /// Expiration time, Unix epoch seconds; `None` keeps the snapshot
    /// until deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    snapshots: Vec<Snapshot>,
}

// =============================================================================
// Parameters
// =============================================================================

/// Desired expiration: absolute epoch seconds, or a retention duration
/// like "12h", "7d" or plain seconds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Expiration {
    Epoch(i64),
    Retention(String),
}

impl Expiration {
    /// Resolve to epoch seconds, anchoring retentions at `anchor`.
    fn resolve(&self, anchor: i64) -> Result<i64> {
        match self {
            Expiration::Epoch(epoch) => Ok(*epoch),
            Expiration::Retention(text) => Ok(anchor + parse_retention(text)?),
        }
    }
}

/// Parse "30m" / "12h" / "7d" / "3600" into seconds.
fn parse_retention(text: &str) -> Result<i64> {
    let text = text.trim();
    let (number, unit) = match text.char_indices().last() {
        Some((index, unit)) if unit.is_ascii_alphabetic() => (&text[..index], Some(unit)),
        _ => (text, None),
    };
    let value: i64 = number
        .parse()
        .map_err(|_| Error::validation(format!("Invalid retention duration: {}", text)))?;
    if value <= 0 {
        return Err(Error::validation(format!(
            "Retention duration must be positive: {}",
            text
        )));
    }
    let seconds = match unit {
        None | Some('s') => value,
        Some('m') => value * 60,
        Some('h') => value * 3600,
        Some('d') => value * 86400,
        Some(other) => {
            return Err(Error::validation(format!(
                "Unknown retention unit '{}' in {}",
                other, text
            )));
        }
    };
    Ok(seconds)
}

/// Desired state of one snapshot
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotParams {
    pub name: String,
    #[serde(default)]
    pub state: ResourceState,
    /// Required on create; immutable afterwards
    pub path: Option<String>,
    /// Rename target
    pub new_name: Option<String>,
    pub expiration: Option<Expiration>,
    pub alias: Option<String>,
}

// =============================================================================
// Snapshot Manager
// =============================================================================

/// Reconciles one snapshot to its desired state
pub struct SnapshotManager<'a> {
    client: &'a RestClient,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for SnapshotManager<'a> {
    type Params = SnapshotParams;
    type State = Snapshot;

    async fn apply(
        &self,
        params: &SnapshotParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<Snapshot>> {
        validate_snapshot_params(params)?;

        let mut current = self.fetch(&params.name).await?.found();
        let mut effective_name = params.name.clone();

        // A previous run may already have renamed the snapshot.
        if current.is_none() {
            if let Some(new_name) = &params.new_name {
                if let Some(renamed) = self.fetch(new_name).await?.found() {
                    current = Some(renamed);
                    effective_name = new_name.clone();
                }
            }
        }

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(snapshot = %params.name, "snapshot already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(snapshot), ResourceState::Absent) => {
                info!(snapshot = %effective_name, "deleting snapshot");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(snapshot)));
                }
                self.client
                    .delete("Deleting snapshot", &snapshot_path(&effective_name))
                    .await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                let fs_path = params.path.as_deref().ok_or_else(|| {
                    Error::validation(format!(
                        "Snapshot {} requires path to be created",
                        params.name
                    ))
                })?;
                validate_ifs_path("Snapshot", fs_path)?;
                info!(snapshot = %params.name, path = %fs_path, "creating snapshot");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Creating snapshot",
                        &format!("{}/snapshot/snapshots", API_BASE),
                        &snapshot_create_body(params)?,
                    )
                    .await?;
                Ok(ApplyOutcome::changed(
                    self.fetch(&params.name).await?.found(),
                ))
            }
            (Some(snapshot), ResourceState::Present) => {
                if let Some(desired_path) = params.path.as_deref() {
                    if desired_path != snapshot.path {
                        return Err(Error::validation(format!(
                            "Snapshot {} path cannot change (current {}, requested {})",
                            snapshot.name, snapshot.path, desired_path
                        )));
                    }
                }

                let delta = snapshot_delta(params, &snapshot)?;
                if delta.is_empty() {
                    debug!(snapshot = %effective_name, "snapshot already matches");
                    return Ok(ApplyOutcome::unchanged(Some(snapshot)));
                }
                info!(
                    snapshot = %effective_name,
                    fields = %delta.field_names().collect::<Vec<_>>().join(","),
                    "modifying snapshot"
                );
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(snapshot)));
                }

                let renamed = delta.contains("name");
                self.client
                    .put_json(
                        "Modifying snapshot",
                        &snapshot_path(&effective_name),
                        &delta.into_body(),
                    )
                    .await?;

                let final_name = if renamed {
                    params.new_name.as_deref().unwrap_or(&effective_name)
                } else {
                    &effective_name
                };
                Ok(ApplyOutcome::changed(self.fetch(final_name).await?.found()))
            }
        }
    }
}

impl<'a> SnapshotManager<'a> {
    async fn fetch(&self, name: &str) -> Result<Lookup<Snapshot>> {
        let lookup = self
            .client
            .lookup::<SnapshotEnvelope>("Fetching snapshot", &snapshot_path(name))
            .await?;
        Ok(match lookup {
            Lookup::Found(envelope) => match envelope.snapshots.into_iter().next() {
                Some(snapshot) => Lookup::Found(snapshot),
                None => Lookup::Absent,
            },
            Lookup::Absent => Lookup::Absent,
        })
    }
}

fn snapshot_path(name: &str) -> String {
    format!("{}/snapshot/snapshots/{}", API_BASE, encode_segment(name))
}

fn validate_snapshot_params(params: &SnapshotParams) -> Result<()> {
    validate_name("Snapshot", &params.name)?;
    if let Some(new_name) = &params.new_name {
        validate_name("Snapshot", new_name)?;
    }
    if let Some(Expiration::Retention(text)) = &params.expiration {
        parse_retention(text)?;
    }
    Ok(())
}

fn snapshot_create_body(params: &SnapshotParams) -> Result<serde_json::Value> {
    let mut body = json!({
        "name": params.name,
        "path": params.path,
    });
    let object = body.as_object_mut().unwrap();
    if let Some(expiration) = &params.expiration {
        object.insert(
            "expires".into(),
            json!(expiration.resolve(Utc::now().timestamp())?),
        );
    }
    if let Some(alias) = &params.alias {
        object.insert("alias".into(), json!(alias));
    }
    Ok(body)
}

fn snapshot_delta(params: &SnapshotParams, current: &Snapshot) -> Result<Delta> {
    let desired_expires = params
        .expiration
        .as_ref()
        .map(|expiration| expiration.resolve(current.created))
        .transpose()?;

    Ok(DeltaBuilder::new()
        .field("name", params.new_name.as_ref(), &current.name)
        .field_opt("expires", desired_expires.as_ref(), current.expires.as_ref())
        .field_opt("alias", params.alias.as_ref(), current.alias.as_ref())
        .build())
}
