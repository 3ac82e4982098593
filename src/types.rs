//! Shared domain types
//!
//! Types crossing the boundary between the plan loader, the resource
//! managers, and the report printed back to the operator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Lifecycle State
// =============================================================================

/// Desired lifecycle state of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Present,
    Absent,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceState::Present => write!(f, "present"),
            ResourceState::Absent => write!(f, "absent"),
        }
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        ResourceState::Present
    }
}

/// Replication service mode
///
/// Richer than present/absent: `paused` keeps policies defined but stops
/// scheduling new jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    On,
    Off,
    Paused,
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceMode::On => write!(f, "on"),
            ServiceMode::Off => write!(f, "off"),
            ServiceMode::Paused => write!(f, "paused"),
        }
    }
}

// =============================================================================
// Check Mode
// =============================================================================

/// Whether mutating calls are actually issued
///
/// In check mode every manager computes its delta and predicts `changed`,
/// but no create/update/delete call reaches the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    Apply,
    Check,
}

impl CheckMode {
    pub fn is_check(self) -> bool {
        matches!(self, CheckMode::Check)
    }
}

// =============================================================================
// Apply Outcome / Report
// =============================================================================

/// Result of reconciling one resource
///
/// `state` is the re-fetched server-side snapshot after the operation,
/// `None` once the resource is absent (or in check mode for a pending
/// create).
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome<T> {
    /// Whether a remote change was made (or would be made, in check mode)
    pub changed: bool,
    /// Server-side representation after the operation
    pub state: Option<T>,
}

impl<T> ApplyOutcome<T> {
    pub fn unchanged(state: Option<T>) -> Self {
        Self {
            changed: false,
            state,
        }
    }

    pub fn changed(state: Option<T>) -> Self {
        Self {
            changed: true,
            state,
        }
    }

    /// Erase the snapshot type for reporting.
    pub fn into_report(self, kind: &str, name: &str) -> ApplyReport
    where
        T: Serialize,
    {
        ApplyReport {
            kind: kind.to_string(),
            name: name.to_string(),
            changed: self.changed,
            state: self
                .state
                .map(|s| serde_json::to_value(s).unwrap_or(serde_json::Value::Null)),
            applied_at: Utc::now(),
        }
    }
}

/// Result document for one plan entry
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// Resource kind (e.g. "nfs_export")
    pub kind: String,
    /// Resource identity within its kind
    pub name: String,
    /// Whether a remote change occurred
    pub changed: bool,
    /// Post-apply server-side snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    /// When the entry finished applying
    pub applied_at: DateTime<Utc>,
}
