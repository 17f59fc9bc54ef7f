//! JSON request and response bodies shared by the daemons and the CLI.
//!
//! Field names follow the established camelCase HTTP contract
//! (`srcMac`, `throttleRateBps`, `pod1`, ...).

use serde::{Deserialize, Serialize};

use crate::identity::EndpointIdentity;
use crate::mac::MacAddr;
use crate::wire::{ShapingParams, LOSS_SCALE};

// ── Agent rule surface ────────────────────────────────────────────────────────

/// `POST /api/ebpf/entry` body, also the item type of the rule listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEntry {
    pub ifindex: u32,
    pub src_mac: String,
    #[serde(default)]
    pub throttle_rate_bps: u32,
    #[serde(default)]
    pub delay: u32,
    #[serde(default)]
    pub loss_rate: u32,
    #[serde(default)]
    pub jitter: u32,
}

impl RuleEntry {
    pub fn new(ifindex: u32, src_mac: MacAddr, params: ShapingParams) -> Self {
        Self {
            ifindex,
            src_mac: src_mac.to_string(),
            throttle_rate_bps: params.throttle_rate_bps,
            delay: params.delay,
            loss_rate: params.loss_rate,
            jitter: params.jitter,
        }
    }

    pub fn params(&self) -> ShapingParams {
        ShapingParams {
            throttle_rate_bps: self.throttle_rate_bps,
            delay: self.delay,
            loss_rate: self.loss_rate,
            jitter: self.jitter,
        }
    }
}

/// `DELETE /api/ebpf/entry` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleKey {
    pub ifindex: u32,
    pub src_mac: String,
}

// ── Dispatcher pair surface ───────────────────────────────────────────────────

/// `POST /api/v1/ebpf/entry/by-pods` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequest {
    pub pod1: String,
    pub pod2: String,
    #[serde(default)]
    pub throttle_rate_bps: u32,
    #[serde(default)]
    pub delay: u32,
    #[serde(default)]
    pub loss_rate: u32,
    #[serde(default)]
    pub jitter: u32,
}

impl PairRequest {
    pub fn params(&self) -> ShapingParams {
        ShapingParams {
            throttle_rate_bps: self.throttle_rate_bps,
            delay: self.delay,
            loss_rate: self.loss_rate,
            jitter: self.jitter,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_pair(&self.pod1, &self.pod2)?;
        validate_loss_rate(self.loss_rate)
    }
}

/// `DELETE /api/v1/ebpf/entry/by-pods` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairDeleteRequest {
    pub pod1: String,
    pub pod2: String,
}

impl PairDeleteRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_pair(&self.pod1, &self.pod2)
    }
}

fn validate_pair(pod1: &str, pod2: &str) -> Result<(), String> {
    if pod1.is_empty() || pod2.is_empty() {
        return Err("pod1 and pod2 must be non-empty".into());
    }
    Ok(())
}

pub fn validate_loss_rate(loss_rate: u32) -> Result<(), String> {
    if loss_rate > LOSS_SCALE {
        return Err(format!("lossRate {loss_rate} exceeds {LOSS_SCALE}"));
    }
    Ok(())
}

/// Outcome body for accepted requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn queued() -> Self {
        Self {
            status: "queued".into(),
        }
    }

    /// Delete that queued nothing: an endpoint did not resolve or the
    /// dispatch queue was full.
    pub fn skipped() -> Self {
        Self {
            status: "skipped".into(),
        }
    }

    pub fn ok() -> Self {
        Self { status: "ok".into() }
    }
}

// ── Identity reporting ────────────────────────────────────────────────────────

/// `POST /api/podinfo/add` body, sent by the interface plumbing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityReport {
    pub pod_name: String,
    pub ifindex: u32,
    pub src_mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIdentity {
    pub pod_name: String,
    pub ifindex: u32,
    pub src_mac: MacAddr,
}

// ── Groups ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembers {
    pub group: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDeleted {
    pub group: String,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPods {
    pub group: String,
    pub pods: Vec<EndpointIdentity>,
}

// ── Health ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherHealth {
    pub status: String,
    pub workers: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub rejected: u64,
    pub cache_reachable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetricsSnapshot {
    pub total: u64,
    pub active: u64,
    pub success: u64,
    pub failed: u64,
    pub timed_out: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHealth {
    pub status: String,
    pub max_in_flight: usize,
    pub rule_table_loaded: bool,
    pub local_identities: usize,
    pub requests: AgentMetricsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    pub status: String,
    pub records: usize,
    pub groups: usize,
}
