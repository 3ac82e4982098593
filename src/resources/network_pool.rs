//! Network pool management
//!
//! IP pools live under a groupnet/subnet pair and carry address ranges,
//! member interfaces and SmartConnect settings. Ranges and interfaces
//! compare order-insensitively.
//!
//! The NFS-over-RDMA flag changed its wire name between API releases
//! (`nfsv3_rdma_enabled` before, `nfs_rdma_enabled` after); the desired
//! value is compared against whichever field the cluster reports and
//! written back under that same name.

use crate::client::{encode_segment, RestClient};
use crate::error::{Error, Result};
use crate::reconcile::{Delta, DeltaBuilder};
use crate::resources::{ResourceManager, validate_name, API_BASE};
use crate::types::{ApplyOutcome, CheckMode, ResourceState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::{debug, info};

// =============================================================================
// Wire Types
// =============================================================================

/// One address range in a pool
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IpRange {
    pub low: String,
    pub high: String,
}

/// One member interface (node logical number + interface name)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolInterface {
    pub iface: String,
    pub lnn: u32,
}

/// One network pool as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPool {
    pub groupnet: String,
    pub subnet: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ranges: Vec<IpRange>,
    #[serde(default)]
    pub ifaces: Vec<PoolInterface>,
    pub access_zone: String,
    /// "static" or "dynamic"
    pub alloc_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sc_dns_zone: Option<String>,
    /// RDMA flag, pre-move wire name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nfsv3_rdma_enabled: Option<bool>,
    /// RDMA flag, post-move wire name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nfs_rdma_enabled: Option<bool>,
}

impl NetworkPool {
    /// Effective RDMA setting regardless of which wire name the cluster
    /// reports.
    pub fn rdma_enabled(&self) -> Option<bool> {
        self.nfs_rdma_enabled.or(self.nfsv3_rdma_enabled)
    }

    /// Wire name the cluster expects the RDMA flag under.
    fn rdma_field(&self) -> &'static str {
        if self.nfs_rdma_enabled.is_some() {
            "nfs_rdma_enabled"
        } else {
            "nfsv3_rdma_enabled"
        }
    }
}

#[derive(Debug, Deserialize)]
struct PoolEnvelope {
    pools: Vec<NetworkPool>,
}

// =============================================================================
// Parameters
// =============================================================================

/// Allocation method for pool addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocMethod {
    Static,
    Dynamic,
}

impl std::fmt::Display for AllocMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocMethod::Static => write!(f, "static"),
            AllocMethod::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Desired state of one network pool
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkPoolParams {
    #[serde(default = "default_groupnet")]
    pub groupnet: String,
    pub subnet: String,
    pub name: String,
    #[serde(default)]
    pub state: ResourceState,
    pub description: Option<String>,
    pub ranges: Option<Vec<IpRange>>,
    pub ifaces: Option<Vec<PoolInterface>>,
    pub access_zone: Option<String>,
    pub alloc_method: Option<AllocMethod>,
    pub sc_dns_zone: Option<String>,
    pub nfs_rdma_enabled: Option<bool>,
}

fn default_groupnet() -> String {
    "groupnet0".to_string()
}

// =============================================================================
// Network Pool Manager
// =============================================================================

/// Reconciles one network pool to its desired state
pub struct NetworkPoolManager<'a> {
    client: &'a RestClient,
}

impl<'a> NetworkPoolManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for NetworkPoolManager<'a> {
    type Params = NetworkPoolParams;
    type State = NetworkPool;

    async fn apply(
        &self,
        params: &NetworkPoolParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<NetworkPool>> {
        validate_pool_params(params)?;

        let path = pool_path(params);
        let current = self
            .client
            .lookup::<PoolEnvelope>("Fetching network pool", &path)
            .await?
            .found()
            .and_then(|envelope| envelope.pools.into_iter().next());

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(pool = %params.name, "pool already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(pool), ResourceState::Absent) => {
                info!(pool = %params.name, "deleting network pool");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(pool)));
                }
                self.client.delete("Deleting network pool", &path).await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                info!(pool = %params.name, subnet = %params.subnet, "creating network pool");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Creating network pool",
                        &format!(
                            "{}/network/groupnets/{}/subnets/{}/pools",
                            API_BASE,
                            encode_segment(&params.groupnet),
                            encode_segment(&params.subnet)
                        ),
                        &pool_create_body(params),
                    )
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
            (Some(pool), ResourceState::Present) => {
                let delta = pool_delta(params, &pool);
                if delta.is_empty() {
                    debug!(pool = %params.name, "pool already matches");
                    return Ok(ApplyOutcome::unchanged(Some(pool)));
                }
                info!(
                    pool = %params.name,
                    fields = %delta.field_names().collect::<Vec<_>>().join(","),
                    "modifying network pool"
                );
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(pool)));
                }
                self.client
                    .put_json("Modifying network pool", &path, &delta.into_body())
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
        }
    }
}

impl<'a> NetworkPoolManager<'a> {
    async fn refetch(&self, path: &str) -> Result<Option<NetworkPool>> {
        let envelope: PoolEnvelope = self.client.get_json("Fetching network pool", path).await?;
        Ok(envelope.pools.into_iter().next())
    }
}

fn pool_path(params: &NetworkPoolParams) -> String {
    format!(
        "{}/network/groupnets/{}/subnets/{}/pools/{}",
        API_BASE,
        encode_segment(&params.groupnet),
        encode_segment(&params.subnet),
        encode_segment(&params.name)
    )
}

fn validate_pool_params(params: &NetworkPoolParams) -> Result<()> {
    validate_name("Network pool", &params.name)?;
    validate_name("Subnet", &params.subnet)?;

    if let Some(ranges) = &params.ranges {
        for range in ranges {
            let low: Ipv4Addr = range.low.parse().map_err(|_| {
                Error::validation(format!("Invalid range address: {}", range.low))
            })?;
            let high: Ipv4Addr = range.high.parse().map_err(|_| {
                Error::validation(format!("Invalid range address: {}", range.high))
            })?;
            if low > high {
                return Err(Error::validation(format!(
                    "Range low must not exceed high: {}-{}",
                    range.low, range.high
                )));
            }
        }
    }
    Ok(())
}

fn pool_create_body(params: &NetworkPoolParams) -> serde_json::Value {
    let mut body = json!({ "name": params.name });
    let object = body.as_object_mut().unwrap();
    if let Some(description) = &params.description {
        object.insert("description".into(), json!(description));
    }
    if let Some(ranges) = &params.ranges {
        object.insert("ranges".into(), json!(ranges));
    }
    if let Some(ifaces) = &params.ifaces {
        object.insert("ifaces".into(), json!(ifaces));
    }
    if let Some(zone) = &params.access_zone {
        object.insert("access_zone".into(), json!(zone));
    }
    if let Some(method) = params.alloc_method {
        object.insert("alloc_method".into(), json!(method.to_string()));
    }
    if let Some(dns_zone) = &params.sc_dns_zone {
        object.insert("sc_dns_zone".into(), json!(dns_zone));
    }
    if let Some(rdma) = params.nfs_rdma_enabled {
        // Creates always use the current wire name; only the modify path
        // has an observed server shape to follow.
        object.insert("nfs_rdma_enabled".into(), json!(rdma));
    }
    body
}

fn pool_delta(params: &NetworkPoolParams, current: &NetworkPool) -> Delta {
    let desired_alloc = params.alloc_method.map(|method| method.to_string());
    let mut builder = DeltaBuilder::new()
        .field(
            "description",
            params.description.as_ref(),
            &current.description,
        )
        .field(
            "access_zone",
            params.access_zone.as_ref(),
            &current.access_zone,
        )
        .field(
            "alloc_method",
            desired_alloc.as_ref(),
            &current.alloc_method,
        )
        .field_opt(
            "sc_dns_zone",
            params.sc_dns_zone.as_ref(),
            current.sc_dns_zone.as_ref(),
        );

    if let Some(desired) = &params.ranges {
        let want: BTreeSet<&IpRange> = desired.iter().collect();
        let have: BTreeSet<&IpRange> = current.ranges.iter().collect();
        if want != have {
            builder = builder.insert("ranges", json!(desired));
        }
    }
    if let Some(desired) = &params.ifaces {
        let want: BTreeSet<&PoolInterface> = desired.iter().collect();
        let have: BTreeSet<&PoolInterface> = current.ifaces.iter().collect();
        if want != have {
            builder = builder.insert("ifaces", json!(desired));
        }
    }
    if let Some(desired) = params.nfs_rdma_enabled {
        if current.rdma_enabled() != Some(desired) {
            builder = builder.insert(current.rdma_field(), json!(desired));
        }
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn params(name: &str) -> NetworkPoolParams {
        NetworkPoolParams {
            groupnet: "groupnet0".to_string(),
            subnet: "subnet0".to_string(),
            name: name.to_string(),
            state: ResourceState::Present,
            description: None,
            ranges: None,
            ifaces: None,
            access_zone: None,
            alloc_method: None,
            sc_dns_zone: None,
            nfs_rdma_enabled: None,
        }
    }

    fn current(name: &str) -> NetworkPool {
        NetworkPool {
            groupnet: "groupnet0".to_string(),
            subnet: "subnet0".to_string(),
            name: name.to_string(),
            description: String::new(),
            ranges: vec![IpRange {
                low: "10.1.0.10".to_string(),
                high: "10.1.0.20".to_string(),
            }],
            ifaces: vec![PoolInterface {
                iface: "ext-1".to_string(),
                lnn: 1,
            }],
            access_zone: "System".to_string(),
            alloc_method: "static".to_string(),
            sc_dns_zone: None,
            nfsv3_rdma_enabled: Some(false),
            nfs_rdma_enabled: None,
        }
    }

    #[test]
    fn test_invalid_range_address_rejected() {
        let mut bad = params("pool1");
        bad.ranges = Some(vec![IpRange {
            low: "10.1.0.300".to_string(),
            high: "10.1.0.20".to_string(),
        }]);
        assert_matches!(validate_pool_params(&bad), Err(Error::Validation(_)));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut bad = params("pool1");
        bad.ranges = Some(vec![IpRange {
            low: "10.1.0.20".to_string(),
            high: "10.1.0.10".to_string(),
        }]);
        assert_matches!(validate_pool_params(&bad), Err(Error::Validation(_)));
    }

    #[test]
    fn test_delta_idempotent_with_reordered_ranges() {
        let mut desired = params("pool1");
        desired.ranges = Some(vec![IpRange {
            low: "10.1.0.10".to_string(),
            high: "10.1.0.20".to_string(),
        }]);
        desired.access_zone = Some("System".to_string());
        assert!(pool_delta(&desired, &current("pool1")).is_empty());
    }

    #[test]
    fn test_rdma_written_under_old_wire_name() {
        // Cluster reports the pre-move field only.
        let mut desired = params("pool1");
        desired.nfs_rdma_enabled = Some(true);

        let delta = pool_delta(&desired, &current("pool1"));
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("nfsv3_rdma_enabled"), Some(&json!(true)));
    }

    #[test]
    fn test_rdma_written_under_new_wire_name() {
        let mut state = current("pool1");
        state.nfsv3_rdma_enabled = None;
        state.nfs_rdma_enabled = Some(false);

        let mut desired = params("pool1");
        desired.nfs_rdma_enabled = Some(true);

        let delta = pool_delta(&desired, &state);
        assert_eq!(delta.get("nfs_rdma_enabled"), Some(&json!(true)));
        assert!(delta.get("nfsv3_rdma_enabled").is_none());
    }

    #[test]
    fn test_rdma_matching_value_is_not_a_change() {
        let mut desired = params("pool1");
        desired.nfs_rdma_enabled = Some(false);
        assert!(pool_delta(&desired, &current("pool1")).is_empty());
    }
}
