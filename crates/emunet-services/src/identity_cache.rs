//! Identity cache: per-endpoint physical identity shared across the cluster.
//!
//! Layout, per endpoint name:
//!   - one raw record per producer (agent side, orchestration side), each
//!     with its own expiry
//!   - one flat merged record, rebuilt by whichever producer wrote last,
//!     so the dispatcher resolves a name with a single read
//!
//! and per group ("namespace/name" of an emulated network) an index set of
//! member names.
//!
//! Every write refreshes the TTL of what it touches. Expired entries are
//! invisible to reads and removed by [`MemoryIdentityCache::purge_expired`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use emunet_core::{EndpointIdentity, NetworkIdentity, OrchestrationIdentity};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("identity cache unavailable: {0}")]
    Unavailable(String),
    #[error("identity cache rejected request: {status} {body}")]
    Rejected { status: u16, body: String },
    #[error("identity cache returned malformed data: {0}")]
    Decode(String),
}

/// The operations every identity cache backend provides.
#[async_trait]
pub trait IdentityCache: Send + Sync {
    /// Agent-side write. Never touches orchestration-owned fields.
    async fn put_network_identity(
        &self,
        name: &str,
        identity: NetworkIdentity,
    ) -> Result<(), CacheError>;

    /// Orchestration-side write. Never touches agent-owned fields.
    async fn put_orchestration_identity(
        &self,
        name: &str,
        identity: OrchestrationIdentity,
    ) -> Result<(), CacheError>;

    async fn get_merged(&self, name: &str) -> Result<Option<EndpointIdentity>, CacheError>;

    /// Member names of a group, sorted.
    async fn list_by_group(&self, group: &str) -> Result<Vec<String>, CacheError>;

    /// Remove every record for `name`. Idempotent.
    async fn delete(&self, name: &str) -> Result<(), CacheError>;

    /// Remove a group index and every member's records. Returns members removed.
    async fn delete_group(&self, group: &str) -> Result<usize, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

// ── In-memory store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    written_ms: u64,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// In-process TTL store. Backs the cache service and tests.
#[derive(Clone)]
pub struct MemoryIdentityCache {
    /// name → agent-side raw record
    network: Arc<DashMap<String, Expiring<NetworkIdentity>>>,
    /// name → orchestration-side raw record
    orchestration: Arc<DashMap<String, Expiring<OrchestrationIdentity>>>,
    /// name → flat merged record
    merged: Arc<DashMap<String, Expiring<EndpointIdentity>>>,
    /// group → member names
    groups: Arc<DashMap<String, Expiring<BTreeSet<String>>>>,
    ttl: Duration,
}

impl MemoryIdentityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            network: Arc::new(DashMap::new()),
            orchestration: Arc::new(DashMap::new()),
            merged: Arc::new(DashMap::new()),
            groups: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Number of live-or-not-yet-purged merged records.
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Rebuild the merged record for `name` from the raw records.
    ///
    /// Runs while holding the merged entry's lock, after the caller's raw
    /// write has landed. Whichever writer rebuilds last sees both raw
    /// records, so concurrent producers never lose each other's fields.
    /// With no live raw record left (a delete won the race) the merged
    /// record is dropped rather than rebuilt empty.
    fn rebuild_merged(&self, name: &str, now: Instant) {
        let entry = self.merged.entry(name.to_owned());

        let net = self
            .network
            .get(name)
            .filter(|r| r.live(now))
            .map(|r| (r.value, r.written_ms));
        let orch = self
            .orchestration
            .get(name)
            .filter(|r| r.live(now))
            .map(|r| (r.value.clone(), r.written_ms));

        if net.is_none() && orch.is_none() {
            if let Entry::Occupied(slot) = entry {
                slot.remove();
            }
            return;
        }

        let mut record = EndpointIdentity::new(name);
        let mut written_ms = 0;
        if let Some((value, ms)) = &net {
            record.apply_network(value, *ms);
            written_ms = written_ms.max(*ms);
        }
        if let Some((value, ms)) = &orch {
            record.apply_orchestration(value, *ms);
            written_ms = written_ms.max(*ms);
        }
        record.last_updated_ms = written_ms;

        let merged = Expiring {
            value: record,
            written_ms,
            expires_at: now + self.ttl,
        };
        match entry {
            Entry::Occupied(mut slot) => {
                slot.insert(merged);
            }
            Entry::Vacant(slot) => {
                slot.insert(merged);
            }
        }
    }

    fn index_member(&self, group: &str, name: &str, now: Instant) {
        let expires_at = now + self.ttl;
        let mut slot = self
            .groups
            .entry(group.to_owned())
            .or_insert_with(|| Expiring {
                value: BTreeSet::new(),
                written_ms: 0,
                expires_at,
            });
        slot.value.insert(name.to_owned());
        slot.written_ms = now_ms();
        slot.expires_at = expires_at;
    }

    fn unindex_member(&self, group: &str, name: &str) {
        if let Some(mut slot) = self.groups.get_mut(group) {
            slot.value.remove(name);
        }
    }

    fn put_network_at(&self, name: &str, identity: NetworkIdentity, now: Instant) {
        self.network.insert(
            name.to_owned(),
            Expiring {
                value: identity,
                written_ms: now_ms(),
                expires_at: now + self.ttl,
            },
        );
        self.rebuild_merged(name, now);
    }

    fn put_orchestration_at(&self, name: &str, identity: OrchestrationIdentity, now: Instant) {
        let previous_group = self
            .orchestration
            .get(name)
            .and_then(|r| r.value.group.clone());
        let group = identity.group.clone();

        self.orchestration.insert(
            name.to_owned(),
            Expiring {
                value: identity,
                written_ms: now_ms(),
                expires_at: now + self.ttl,
            },
        );
        self.rebuild_merged(name, now);

        // Leaving a group, by moving or by dropping the field, unindexes.
        if let Some(prev) = previous_group.filter(|p| group.as_deref() != Some(p.as_str())) {
            self.unindex_member(&prev, name);
        }
        if let Some(group) = group {
            self.index_member(&group, name, now);
        }
    }

    fn get_at(&self, name: &str, now: Instant) -> Option<EndpointIdentity> {
        self.merged
            .get(name)
            .filter(|r| r.live(now))
            .map(|r| r.value.clone())
    }

    fn members_at(&self, group: &str, now: Instant) -> Vec<String> {
        self.groups
            .get(group)
            .filter(|r| r.live(now))
            .map(|r| r.value.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remove(&self, name: &str) {
        let group = self
            .orchestration
            .remove(name)
            .and_then(|(_, r)| r.value.group);
        self.network.remove(name);
        let merged_group = self.merged.remove(name).and_then(|(_, r)| r.value.group);
        for g in group.iter().chain(merged_group.iter()) {
            self.unindex_member(g, name);
        }
    }

    fn remove_group(&self, group: &str) -> usize {
        let Some((_, members)) = self.groups.remove(group) else {
            return 0;
        };
        for name in &members.value {
            self.remove(name);
        }
        members.value.len()
    }

    /// Drop every expired entry. Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let before =
            self.network.len() + self.orchestration.len() + self.merged.len() + self.groups.len();
        self.network.retain(|_, r| r.live(now));
        self.orchestration.retain(|_, r| r.live(now));
        self.merged.retain(|_, r| r.live(now));
        self.groups.retain(|_, r| r.live(now));
        let after =
            self.network.len() + self.orchestration.len() + self.merged.len() + self.groups.len();
        before.saturating_sub(after)
    }
}

#[async_trait]
impl IdentityCache for MemoryIdentityCache {
    async fn put_network_identity(
        &self,
        name: &str,
        identity: NetworkIdentity,
    ) -> Result<(), CacheError> {
        self.put_network_at(name, identity, Instant::now());
        Ok(())
    }

    async fn put_orchestration_identity(
        &self,
        name: &str,
        identity: OrchestrationIdentity,
    ) -> Result<(), CacheError> {
        self.put_orchestration_at(name, identity, Instant::now());
        Ok(())
    }

    async fn get_merged(&self, name: &str) -> Result<Option<EndpointIdentity>, CacheError> {
        Ok(self.get_at(name, Instant::now()))
    }

    async fn list_by_group(&self, group: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.members_at(group, Instant::now()))
    }

    async fn delete(&self, name: &str) -> Result<(), CacheError> {
        self.remove(name);
        Ok(())
    }

    async fn delete_group(&self, group: &str) -> Result<usize, CacheError> {
        Ok(self.remove_group(group))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
