//! Per-host agent: applies rule updates to the local rule table and
//! reports locally observed endpoint identity.
//!
//! Rule updates pass an admission gate: a counting semaphore sized to the
//! configured in-flight limit. A request that cannot get a permit within
//! the admission timeout is refused as busy instead of queueing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use emunet_core::api::{AgentHealth, AgentMetricsSnapshot, LocalIdentity};
use emunet_core::{FlowKey, MacAddr, MacParseError, NetworkIdentity, RuleOp, ShapingParams};
use emunet_dataplane::{FlowTable, RuleTable, TableError};
use tokio::sync::{OnceCell, Semaphore};

use crate::identity_cache::IdentityCache;
use crate::rule_loader::RuleTableLoader;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent busy")]
    Busy,
    #[error("rule table unavailable: {0}")]
    TableUnavailable(TableError),
    #[error("rule table update failed: {0}")]
    Table(TableError),
    #[error("invalid MAC address: {0}")]
    InvalidMac(#[from] MacParseError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Default)]
struct AgentMetrics {
    total: AtomicU64,
    active: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl AgentMetrics {
    fn snapshot(&self) -> AgentMetricsSnapshot {
        AgentMetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AgentSettings {
    pub max_in_flight: usize,
    pub admission_timeout: Duration,
}

#[derive(Clone)]
pub struct Agent {
    gate: Arc<Semaphore>,
    settings: AgentSettings,
    loader: Arc<dyn RuleTableLoader>,
    table: Arc<OnceCell<Arc<RuleTable>>>,
    /// endpoint name → identity reported on this host
    identities: Arc<DashMap<String, LocalIdentity>>,
    cache: Option<Arc<dyn IdentityCache>>,
    metrics: Arc<AgentMetrics>,
}

impl Agent {
    pub fn new(
        settings: AgentSettings,
        loader: Arc<dyn RuleTableLoader>,
        cache: Option<Arc<dyn IdentityCache>>,
    ) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
            settings,
            loader,
            table: Arc::new(OnceCell::new()),
            identities: Arc::new(DashMap::new()),
            cache,
            metrics: Arc::new(AgentMetrics::default()),
        }
    }

    /// The rule table, loaded on first use. A failed load is retried on
    /// the next call.
    async fn table(&self) -> Result<&Arc<RuleTable>, AgentError> {
        self.table
            .get_or_try_init(|| async {
                let table = self.loader.load()?;
                tracing::info!(backend = %self.loader.describe(), "rule table loaded");
                Ok::<_, TableError>(table)
            })
            .await
            .map_err(AgentError::TableUnavailable)
    }

    /// Apply one rule update behind the admission gate.
    pub async fn apply(&self, key: FlowKey, op: RuleOp) -> Result<(), AgentError> {
        self.metrics.total.fetch_add(1, Ordering::Relaxed);

        let permit =
            match tokio::time::timeout(self.settings.admission_timeout, self.gate.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) | Err(_) => {
                    self.metrics.timed_out.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(flow = %key, "admission timed out");
                    return Err(AgentError::Busy);
                }
            };

        self.metrics.active.fetch_add(1, Ordering::Relaxed);
        let result = self.apply_admitted(key, op).await;
        self.metrics.active.fetch_sub(1, Ordering::Relaxed);
        drop(permit);

        match &result {
            Ok(()) => self.metrics.success.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.metrics.failed.fetch_add(1, Ordering::Relaxed),
        };
        let m = self.metrics.snapshot();
        tracing::debug!(
            flow = %key,
            delete = op.is_delete(),
            total = m.total,
            active = m.active,
            success = m.success,
            failed = m.failed,
            timed_out = m.timed_out,
            "rule update"
        );
        result
    }

    async fn apply_admitted(&self, key: FlowKey, op: RuleOp) -> Result<(), AgentError> {
        let table = self.table().await?;
        let result = match op {
            RuleOp::Upsert(params) => table.update(key, params),
            RuleOp::Delete => table.remove(&key),
        };
        result.map_err(AgentError::Table)
    }

    /// Parse the textual form used on the wire and apply.
    pub async fn apply_entry(
        &self,
        ifindex: u32,
        src_mac: &str,
        op: RuleOp,
    ) -> Result<(), AgentError> {
        let mac: MacAddr = src_mac.parse()?;
        if let RuleOp::Upsert(params) = op {
            emunet_core::api::validate_loss_rate(params.loss_rate)
                .map_err(AgentError::InvalidRequest)?;
        }
        self.apply(FlowKey::new(ifindex, mac), op).await
    }

    /// Current rule table contents.
    pub async fn rules(&self) -> Result<Vec<(FlowKey, ShapingParams)>, AgentError> {
        self.table()
            .await?
            .entries()
            .map_err(AgentError::Table)
    }

    // ── Identity ──────────────────────────────────────────────────────────────

    /// Record an endpoint's data-link identity locally and publish it to the
    /// identity cache without waiting for the write.
    pub fn report_identity(&self, name: &str, mac: MacAddr, ifindex: u32) {
        self.identities.insert(
            name.to_owned(),
            LocalIdentity {
                pod_name: name.to_owned(),
                ifindex,
                src_mac: mac,
            },
        );

        if let Some(cache) = self.cache.clone() {
            let name = name.to_owned();
            tokio::spawn(async move {
                if let Err(e) = cache
                    .put_network_identity(&name, NetworkIdentity { ifindex, mac })
                    .await
                {
                    tracing::warn!(name = %name, error = %e, "identity cache write failed");
                }
            });
        }
    }

    pub fn identity(&self, name: &str) -> Option<LocalIdentity> {
        self.identities.get(name).map(|r| r.clone())
    }

    /// Forget a local identity. Returns whether it was present.
    pub fn forget_identity(&self, name: &str) -> bool {
        self.identities.remove(name).is_some()
    }

    pub fn health(&self) -> AgentHealth {
        AgentHealth {
            status: "ok".into(),
            max_in_flight: self.settings.max_in_flight,
            rule_table_loaded: self.table.initialized(),
            local_identities: self.identities.len(),
            requests: self.metrics.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity_cache::MemoryIdentityCache;
    use crate::rule_loader::{InProcessLoader, SharedTableLoader};
    use emunet_dataplane::MemoryFlowTable;
    use std::sync::atomic::AtomicUsize;

    fn settings(max_in_flight: usize) -> AgentSettings {
        AgentSettings {
            max_in_flight,
            admission_timeout: Duration::from_millis(50),
        }
    }

    fn params(delay: u32) -> ShapingParams {
        ShapingParams {
            throttle_rate_bps: 0,
            delay,
            loss_rate: 0,
            jitter: 0,
        }
    }

    /// Fails the first `failures` loads.
    struct FlakyLoader {
        failures: usize,
        calls: AtomicUsize,
    }

    impl RuleTableLoader for FlakyLoader {
        fn load(&self) -> Result<Arc<RuleTable>, TableError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(TableError::Backend("map not pinned yet".into()));
            }
            Ok(MemoryFlowTable::<ShapingParams>::shared(16))
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    #[tokio::test]
    async fn upsert_then_delete() {
        let table: Arc<RuleTable> = MemoryFlowTable::<ShapingParams>::shared(16);
        let agent = Agent::new(settings(4), Arc::new(SharedTableLoader(table.clone())), None);

        agent
            .apply_entry(7, "02:00:00:00:00:07", RuleOp::Upsert(params(100)))
            .await
            .unwrap();
        let key = FlowKey::new(7, "02:00:00:00:00:07".parse().unwrap());
        assert_eq!(table.lookup(&key), Some(params(100)));

        agent
            .apply_entry(7, "02:00:00:00:00:07", RuleOp::Upsert(params(200)))
            .await
            .unwrap();
        assert_eq!(table.lookup(&key), Some(params(200)));

        agent.apply_entry(7, "02:00:00:00:00:07", RuleOp::Delete).await.unwrap();
        agent.apply_entry(7, "02:00:00:00:00:07", RuleOp::Delete).await.unwrap();
        assert!(table.lookup(&key).is_none());

        let h = agent.health();
        assert_eq!(h.requests.total, 4);
        assert_eq!(h.requests.success, 4);
        assert!(h.rule_table_loaded);
    }

    #[tokio::test]
    async fn malformed_input_is_rejected() {
        let agent = Agent::new(settings(4), Arc::new(InProcessLoader { capacity: 4 }), None);
        assert!(matches!(
            agent.apply_entry(1, "02:00:00:00:00", RuleOp::Delete).await,
            Err(AgentError::InvalidMac(_))
        ));
        let mut bad = params(0);
        bad.loss_rate = 20_000;
        assert!(matches!(
            agent.apply_entry(1, "02:00:00:00:00:01", RuleOp::Upsert(bad)).await,
            Err(AgentError::InvalidRequest(_))
        ));
        assert!(!agent.health().rule_table_loaded);
    }

    #[tokio::test]
    async fn failed_table_load_is_retried() {
        let loader = Arc::new(FlakyLoader {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let agent = Agent::new(settings(4), loader.clone(), None);
        let key = FlowKey::new(1, MacAddr::default());

        assert!(matches!(
            agent.apply(key, RuleOp::Upsert(params(1))).await,
            Err(AgentError::TableUnavailable(_))
        ));
        agent.apply(key, RuleOp::Upsert(params(1))).await.unwrap();
        agent.apply(key, RuleOp::Delete).await.unwrap();
        // Loaded once successfully, never again.
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(agent.health().requests.failed, 1);
    }

    #[tokio::test]
    async fn saturated_gate_reports_busy() {
        let agent = Agent::new(settings(1), Arc::new(InProcessLoader { capacity: 4 }), None);
        let held = agent.gate.clone().acquire_owned().await.unwrap();

        let key = FlowKey::new(1, MacAddr::default());
        assert!(matches!(
            agent.apply(key, RuleOp::Delete).await,
            Err(AgentError::Busy)
        ));
        assert_eq!(agent.health().requests.timed_out, 1);

        drop(held);
        agent.apply(key, RuleOp::Delete).await.unwrap();
    }

    #[tokio::test]
    async fn table_full_is_a_table_error() {
        let agent = Agent::new(settings(1), Arc::new(InProcessLoader { capacity: 1 }), None);
        agent
            .apply(FlowKey::new(1, MacAddr::default()), RuleOp::Upsert(params(1)))
            .await
            .unwrap();
        assert!(matches!(
            agent
                .apply(FlowKey::new(2, MacAddr::default()), RuleOp::Upsert(params(1)))
                .await,
            Err(AgentError::Table(TableError::Full(1)))
        ));
        assert_eq!(agent.rules().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn report_identity_publishes_to_cache() {
        let cache = MemoryIdentityCache::new(Duration::from_secs(60));
        let agent = Agent::new(
            settings(1),
            Arc::new(InProcessLoader { capacity: 4 }),
            Some(Arc::new(cache.clone())),
        );
        let mac: MacAddr = "02:00:00:00:00:2a".parse().unwrap();
        agent.report_identity("pod-42", mac, 42);

        let local = agent.identity("pod-42").unwrap();
        assert_eq!(local.ifindex, 42);

        let mut published = None;
        for _ in 0..50 {
            published = cache.get_merged("pod-42").await.unwrap();
            if published.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let rec = published.unwrap();
        assert_eq!(rec.mac, Some(mac));
        assert_eq!(rec.ifindex, Some(42));

        assert!(agent.forget_identity("pod-42"));
        assert!(!agent.forget_identity("pod-42"));
        assert!(agent.identity("pod-42").is_none());
    }
}
