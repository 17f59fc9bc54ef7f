//! Endpoint identity records.
//!
//! Two producers describe the same logical endpoint independently. The
//! host agent knows the data-link side (interface index, hardware address);
//! the orchestration side knows placement and lifecycle (host, ip, phase,
//! readiness). [`EndpointIdentity`] is the merged view the dispatcher reads.
//! Each producer only ever writes the fields it owns.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::mac::MacAddr;

/// Lifecycle phase as reported by the orchestration side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LifecyclePhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

/// Fields owned by the host agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkIdentity {
    pub ifindex: u32,
    pub mac: MacAddr,
}

/// Fields owned by the orchestration side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationIdentity {
    /// Emulated network the endpoint belongs to, as "namespace/name".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub host: String,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub phase: LifecyclePhase,
    #[serde(default)]
    pub ready: bool,
}

/// The merged per-endpoint record. Absent fields have not been reported yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub ifindex: Option<u32>,
    #[serde(default)]
    pub mac: Option<MacAddr>,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub phase: Option<LifecyclePhase>,
    #[serde(default)]
    pub ready: Option<bool>,
    /// Unix milliseconds of the most recent write by either producer.
    #[serde(default)]
    pub last_updated_ms: u64,
}

/// Everything needed to address a rule at an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalIdentity {
    pub host: String,
    pub ifindex: u32,
    pub mac: MacAddr,
}

/// A physical field that has not been reported for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Host,
    Ifindex,
    Mac,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissingField::Host => "host",
            MissingField::Ifindex => "ifindex",
            MissingField::Mac => "mac",
        })
    }
}

impl EndpointIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
            host: None,
            ifindex: None,
            mac: None,
            ip: None,
            phase: None,
            ready: None,
            last_updated_ms: 0,
        }
    }

    /// Overwrite the agent-owned fields. Orchestration fields are untouched.
    pub fn apply_network(&mut self, net: &NetworkIdentity, now_ms: u64) {
        self.ifindex = Some(net.ifindex);
        self.mac = Some(net.mac);
        self.last_updated_ms = now_ms;
    }

    /// Overwrite the orchestration-owned fields. Agent fields are untouched.
    pub fn apply_orchestration(&mut self, orch: &OrchestrationIdentity, now_ms: u64) {
        if orch.group.is_some() {
            self.group = orch.group.clone();
        }
        self.host = Some(orch.host.clone());
        self.ip = orch.ip;
        self.phase = Some(orch.phase);
        self.ready = Some(orch.ready);
        self.last_updated_ms = now_ms;
    }

    /// The (host, ifindex, mac) triple, or the first field still missing.
    pub fn physical(&self) -> Result<PhysicalIdentity, MissingField> {
        let host = self
            .host
            .as_ref()
            .filter(|h| !h.is_empty())
            .ok_or(MissingField::Host)?;
        let ifindex = self.ifindex.ok_or(MissingField::Ifindex)?;
        let mac = self.mac.ok_or(MissingField::Mac)?;
        Ok(PhysicalIdentity {
            host: host.clone(),
            ifindex,
            mac,
        })
    }
}
