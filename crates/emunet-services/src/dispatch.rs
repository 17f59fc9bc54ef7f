//! Dispatch engine: turns an endpoint pair into two per-direction rule jobs
//! and fans them out to the owning hosts' agents.
//!
//! Jobs go through one bounded FIFO served by a fixed pool of workers.
//! Enqueue never blocks: a full queue is reported to the caller as
//! overload. Workers deliver each job once and drop it on failure; the
//! next create for the same pair converges the tables again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use emunet_core::api::{DispatcherHealth, RuleEntry, RuleKey};
use emunet_core::identity::{MissingField, PhysicalIdentity};
use emunet_core::{MacAddr, RuleOp, ShapingParams};
use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::identity_cache::{CacheError, IdentityCache};

// ── Jobs ──────────────────────────────────────────────────────────────────────

/// One rule update for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleJob {
    pub target_host: String,
    pub ifindex: u32,
    pub src_mac: MacAddr,
    pub op: RuleOp,
}

impl RuleJob {
    /// Rule for traffic from `src` arriving at `dst`: keyed by the
    /// destination's interface and the source's hardware address, installed
    /// on the destination's host.
    pub fn toward(src: &PhysicalIdentity, dst: &PhysicalIdentity, op: RuleOp) -> Self {
        Self {
            target_host: dst.host.clone(),
            ifindex: dst.ifindex,
            src_mac: src.mac,
            op,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("endpoint {0} not found")]
    NotFound(String),
    #[error("endpoint {name} is missing {field}")]
    NotSchedulable { name: String, field: MissingField },
    #[error("dispatch queue full")]
    Overloaded,
    #[error("dispatch queue closed")]
    Closed,
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Outcome of a pair delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Queued,
    /// Nothing to do: an endpoint did not resolve or the queue was full.
    Skipped,
}

// ── Transport ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("request to {host} failed: {reason}")]
    Request { host: String, reason: String },
    #[error("agent {host} answered {status}")]
    Status { host: String, status: u16 },
}

/// How a worker reaches a host agent.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn deliver(&self, job: &RuleJob) -> Result<(), DeliveryError>;
}

/// POST/DELETE `/api/ebpf/entry` on `http://{host}:{agent_port}`.
pub struct HttpAgentTransport {
    client: Client,
    agent_port: u16,
}

impl HttpAgentTransport {
    pub fn new(agent_port: u16, timeout: std::time::Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, agent_port })
    }

    fn entry_url(&self, host: &str) -> String {
        if host.contains(':') {
            format!("http://[{}]:{}/api/ebpf/entry", host, self.agent_port)
        } else {
            format!("http://{}:{}/api/ebpf/entry", host, self.agent_port)
        }
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn deliver(&self, job: &RuleJob) -> Result<(), DeliveryError> {
        let url = self.entry_url(&job.target_host);
        let request = match job.op {
            RuleOp::Upsert(params) => self
                .client
                .post(url)
                .json(&RuleEntry::new(job.ifindex, job.src_mac, params)),
            RuleOp::Delete => self.client.delete(url).json(&RuleKey {
                ifindex: job.ifindex,
                src_mac: job.src_mac.to_string(),
            }),
        };

        let resp = request.send().await.map_err(|e| DeliveryError::Request {
            host: job.target_host.clone(),
            reason: e.to_string(),
        })?;
        let status = resp.status();
        // Drain so the connection goes back to the pool.
        let _ = resp.bytes().await;
        if !status.is_success() {
            return Err(DeliveryError::Status {
                host: job.target_host.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DispatchStats {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub worker_count: usize,
    pub queue_capacity: usize,
}

/// Shared handle to the queue and worker pool.
#[derive(Clone)]
pub struct DispatchEngine {
    cache: Arc<dyn IdentityCache>,
    /// `None` once shut down; dropping the sender closes the queue.
    tx: Arc<RwLock<Option<mpsc::Sender<RuleJob>>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    stats: Arc<DispatchStats>,
    settings: DispatchSettings,
}

impl DispatchEngine {
    /// Create the queue and spawn the worker pool on the current runtime.
    pub fn start(
        cache: Arc<dyn IdentityCache>,
        transport: Arc<dyn AgentTransport>,
        settings: DispatchSettings,
    ) -> Self {
        let settings = DispatchSettings {
            worker_count: settings.worker_count.max(1),
            queue_capacity: settings.queue_capacity.max(1),
        };
        let (tx, rx) = mpsc::channel::<RuleJob>(settings.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(DispatchStats::default());

        let workers = (0..settings.worker_count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    rx.clone(),
                    transport.clone(),
                    stats.clone(),
                ))
            })
            .collect();

        tracing::info!(
            workers = settings.worker_count,
            queue_capacity = settings.queue_capacity,
            "dispatch workers started"
        );

        Self {
            cache,
            tx: Arc::new(RwLock::new(Some(tx))),
            workers: Arc::new(Mutex::new(workers)),
            stats,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<dyn IdentityCache> {
        &self.cache
    }

    /// Resolve a name to its physical identity.
    pub async fn resolve(&self, name: &str) -> Result<PhysicalIdentity, DispatchError> {
        let record = self
            .cache
            .get_merged(name)
            .await?
            .ok_or_else(|| DispatchError::NotFound(name.to_owned()))?;
        record
            .physical()
            .map_err(|field| DispatchError::NotSchedulable {
                name: name.to_owned(),
                field,
            })
    }

    /// Install `params` in both directions between `pod1` and `pod2`.
    ///
    /// Returns once both jobs are queued (or the second one has been
    /// dropped). Delivery happens later and is not reported.
    pub async fn create_or_update(
        &self,
        pod1: &str,
        pod2: &str,
        params: ShapingParams,
    ) -> Result<(), DispatchError> {
        let (e1, e2) = tokio::try_join!(self.resolve(pod1), self.resolve(pod2))?;
        let op = RuleOp::Upsert(params);

        self.enqueue(RuleJob::toward(&e1, &e2, op))?;
        if let Err(e) = self.enqueue(RuleJob::toward(&e2, &e1, op)) {
            tracing::warn!(pod1, pod2, error = %e, "reverse direction not queued");
        }
        Ok(())
    }

    /// Remove the rules between `pod1` and `pod2`. An unresolvable pair is
    /// not an error.
    pub async fn delete(&self, pod1: &str, pod2: &str) -> DeleteOutcome {
        let (e1, e2) = match tokio::try_join!(self.resolve(pod1), self.resolve(pod2)) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::debug!(pod1, pod2, error = %e, "delete skipped");
                return DeleteOutcome::Skipped;
            }
        };

        if let Err(e) = self.enqueue(RuleJob::toward(&e1, &e2, RuleOp::Delete)) {
            tracing::warn!(pod1, pod2, error = %e, "delete not queued");
            return DeleteOutcome::Skipped;
        }
        if let Err(e) = self.enqueue(RuleJob::toward(&e2, &e1, RuleOp::Delete)) {
            tracing::warn!(pod1, pod2, error = %e, "reverse delete not queued");
        }
        DeleteOutcome::Queued
    }

    /// Non-blocking enqueue.
    pub fn enqueue(&self, job: RuleJob) -> Result<(), DispatchError> {
        let guard = self.tx.read().unwrap_or_else(|p| p.into_inner());
        let Some(tx) = guard.as_ref() else {
            return Err(DispatchError::Closed);
        };
        match tx.try_send(job) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(host = %job.target_host, "dispatch queue full, job rejected");
                Err(DispatchError::Overloaded)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    pub fn queue_depth(&self) -> usize {
        let guard = self.tx.read().unwrap_or_else(|p| p.into_inner());
        guard
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    pub async fn health(&self) -> DispatcherHealth {
        let cache_reachable = self.cache.ping().await.is_ok();
        DispatcherHealth {
            status: if cache_reachable { "ok" } else { "degraded" }.into(),
            workers: self.settings.worker_count,
            queue_depth: self.queue_depth(),
            queue_capacity: self.settings.queue_capacity,
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            cache_reachable,
        }
    }

    pub fn print_stats(&self) {
        tracing::info!(
            queue_depth = self.queue_depth(),
            enqueued = self.stats.enqueued.load(Ordering::Relaxed),
            delivered = self.stats.delivered.load(Ordering::Relaxed),
            failed = self.stats.failed.load(Ordering::Relaxed),
            rejected = self.stats.rejected.load(Ordering::Relaxed),
            "dispatch stats"
        );
    }

    /// Close the queue, let the workers drain what is left, and wait for them.
    pub async fn shutdown(&self) {
        let sender = {
            let mut guard = self.tx.write().unwrap_or_else(|p| p.into_inner());
            guard.take()
        };
        drop(sender);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().await);
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "dispatch worker ended abnormally");
            }
        }
        tracing::info!(workers = count, "dispatch workers drained");
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<RuleJob>>>,
    transport: Arc<dyn AgentTransport>,
    stats: Arc<DispatchStats>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        match transport.deliver(&job).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker = id, error = %e, "rule delivery failed");
            }
        }
    }
}
