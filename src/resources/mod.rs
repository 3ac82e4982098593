//! Resource managers
//!
//! One manager per cluster resource type. Every manager follows the same
//! contract: read current state, diff against the caller's parameters,
//! issue at most one mutating call carrying only the changed fields, then
//! re-fetch and report the outcome.
//!
//! Parameters are validated locally before any remote call; violations
//! surface as [`Error::Validation`](crate::error::Error) without touching
//! the cluster.

pub mod alert_channel;
pub mod certificate;
pub mod group;
pub mod network_pool;
pub mod nfs_export;
pub mod quota;
pub mod role;
pub mod smb_share;
pub mod snapshot;
pub mod synciq;
pub mod user;

pub use alert_channel::{AlertChannel, AlertChannelManager, AlertChannelParams, SmtpParameters};
pub use certificate::{Certificate, CertificateManager, CertificateParams};
pub use group::{Group, GroupManager, GroupParams};
pub use network_pool::{
    AllocMethod, IpRange, NetworkPool, NetworkPoolManager, NetworkPoolParams, PoolInterface,
};
pub use nfs_export::{NfsExport, NfsExportManager, NfsExportParams, NfsMapping};
pub use quota::{Quota, QuotaManager, QuotaParams, QuotaThresholds, QuotaType};
pub use role::{Role, RoleManager, RoleParams};
pub use smb_share::{SmbShare, SmbShareManager, SmbShareParams};
pub use snapshot::{Expiration, Snapshot, SnapshotManager, SnapshotParams};
pub use synciq::{
    SyncAction, SyncIqJob, SyncIqJobManager, SyncIqJobParams, SyncIqJobState, SyncIqPolicy,
    SyncIqPolicyManager, SyncIqPolicyParams, SyncIqSettings, SyncIqSettingsManager,
    SyncIqSettingsParams,
};
pub use user::{UpdatePassword, User, UserManager, UserParams};

use crate::error::{Error, Result};
use crate::types::{ApplyOutcome, CheckMode};
use async_trait::async_trait;

/// Common contract implemented by every resource manager.
///
/// `apply` drives one resource to its desired state: read current state,
/// diff, issue at most one mutating call carrying only the changed
/// fields, re-fetch, report.
#[async_trait]
pub trait ResourceManager {
    type Params;
    type State;

    async fn apply(
        &self,
        params: &Self::Params,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<Self::State>>;
}

/// Platform API namespace all resource paths hang off.
pub(crate) const API_BASE: &str = "/platform/12";

/// Longest name the cluster accepts for most named resources.
pub(crate) const MAX_NAME_LEN: usize = 255;

/// Reject empty or oversized resource names before any remote call.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation(format!("{} name must not be empty", kind)));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::validation(format!(
            "{} name exceeds {} characters: {}",
            kind, MAX_NAME_LEN, name
        )));
    }
    Ok(())
}

/// Filesystem paths handed to the cluster must live under /ifs.
pub(crate) fn validate_ifs_path(kind: &str, path: &str) -> Result<()> {
    if !path.starts_with("/ifs") {
        return Err(Error::validation(format!(
            "{} path must start with /ifs: {}",
            kind, path
        )));
    }
    Ok(())
}

/// Append a `zone=` query parameter when an access zone is set.
pub(crate) fn zone_query(zone: Option<&str>) -> String {
    match zone {
        Some(zone) => format!("?zone={}", crate::client::encode_segment(zone)),
        None => String::new(),
    }
}
