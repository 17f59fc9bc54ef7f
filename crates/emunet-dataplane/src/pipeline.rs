//! Two-stage egress shaping pipeline.
//!
//! Stages run in a fixed order, at most [`MAX_STAGES`] deep:
//!
//! 1. loss / rate: drop with probability `loss_rate / 10000`, then pace the
//!    flow through the EDT limiter when a rate is set.
//! 2. delay / jitter: push the departure time out by `delay` plus a uniform
//!    offset in `[-jitter, +jitter]`.
//!
//! Every failure path passes the packet. A missing rule, a missing table or
//! a frame too short to parse is never a reason to drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use emunet_core::wire::LOSS_SCALE;
use emunet_core::ShapingParams;

use crate::edt::{self, EdtOutcome};
use crate::packet::PacketContext;
use crate::source::{Clock, MonotonicClock, RandomSource, ThreadRandom};
use crate::table::{PacingTable, RuleTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Random loss.
    Loss,
    /// Rate limiter backlog beyond the horizon.
    Horizon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LossRate,
    DelayJitter,
}

/// Execution order. Later stages only run if earlier ones hand off.
pub const STAGES: [Stage; 2] = [Stage::LossRate, Stage::DelayJitter];
pub const MAX_STAGES: usize = STAGES.len();

enum StageOutcome {
    Next,
    Done(Verdict),
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub packets: AtomicU64,
    pub unmatched: AtomicU64,
    pub malformed: AtomicU64,
    pub loss_drops: AtomicU64,
    pub horizon_drops: AtomicU64,
    pub paced: AtomicU64,
    pub delayed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub packets: u64,
    pub unmatched: u64,
    pub malformed: u64,
    pub loss_drops: u64,
    pub horizon_drops: u64,
    pub paced: u64,
    pub delayed: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            loss_drops: self.loss_drops.load(Ordering::Relaxed),
            horizon_drops: self.horizon_drops.load(Ordering::Relaxed),
            paced: self.paced.load(Ordering::Relaxed),
            delayed: self.delayed.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    rules: Option<Arc<RuleTable>>,
    pacing: Option<Arc<PacingTable>>,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(rules: Arc<RuleTable>, pacing: Arc<PacingTable>) -> Self {
        Self {
            rules: Some(rules),
            pacing: Some(pacing),
            clock: Arc::new(MonotonicClock::new()),
            rng: Arc::new(ThreadRandom),
            stats: PipelineStats::default(),
        }
    }

    /// A pipeline whose tables are not (yet) available. Passes everything.
    pub fn detached() -> Self {
        Self {
            rules: None,
            pacing: None,
            clock: Arc::new(MonotonicClock::new()),
            rng: Arc::new(ThreadRandom),
            stats: PipelineStats::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_random(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one packet through every stage.
    pub fn process(&self, pkt: &mut PacketContext<'_>) -> Verdict {
        self.stats.packets.fetch_add(1, Ordering::Relaxed);
        for stage in STAGES {
            let outcome = match stage {
                Stage::LossRate => self.loss_rate(pkt),
                Stage::DelayJitter => self.delay_jitter(pkt),
            };
            if let StageOutcome::Done(verdict) = outcome {
                return verdict;
            }
        }
        Verdict::Pass
    }

    fn rule_for(&self, pkt: &PacketContext<'_>) -> Option<ShapingParams> {
        let Some(key) = pkt.flow_key() else {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.rules.as_ref()?.lookup(&key)
    }

    // ── Stage 1 ───────────────────────────────────────────────────────────────

    fn loss_rate(&self, pkt: &mut PacketContext<'_>) -> StageOutcome {
        let Some(params) = self.rule_for(pkt) else {
            self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            return StageOutcome::Done(Verdict::Pass);
        };

        if params.loss_rate > 0 && self.rng.next_u32() % LOSS_SCALE < params.loss_rate {
            self.stats.loss_drops.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(ifindex = pkt.ifindex, "loss drop");
            return StageOutcome::Done(Verdict::Drop(DropReason::Loss));
        }

        if params.is_rate_limited() {
            if let (Some(pacing), Some(key)) = (self.pacing.as_ref(), pkt.flow_key()) {
                let now = self.clock.now_ns();
                match edt::schedule(pacing.as_ref(), &key, params.throttle_rate_bps, now, pkt) {
                    EdtOutcome::Dropped => {
                        self.stats.horizon_drops.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(flow = %key, "horizon drop");
                        return StageOutcome::Done(Verdict::Drop(DropReason::Horizon));
                    }
                    EdtOutcome::Delayed(_) => {
                        self.stats.paced.fetch_add(1, Ordering::Relaxed);
                    }
                    EdtOutcome::Restarted => {}
                }
            }
        }

        StageOutcome::Next
    }

    // ── Stage 2 ───────────────────────────────────────────────────────────────

    fn delay_jitter(&self, pkt: &mut PacketContext<'_>) -> StageOutcome {
        // The rule is looked up again: stages share nothing but the packet.
        let Some(params) = self.rule_for(pkt) else {
            return StageOutcome::Done(Verdict::Pass);
        };

        let delay_ns = params.delay_ns();
        let offset = self.jitter_offset(params.jitter_ns());
        let base = match pkt.tstamp_ns {
            Some(stamp) => stamp,
            None => self.clock.now_ns(),
        };
        let stamp = (i128::from(base) + i128::from(delay_ns) + i128::from(offset)).max(0);
        pkt.tstamp_ns = Some(u64::try_from(stamp).unwrap_or(u64::MAX));
        self.stats.delayed.fetch_add(1, Ordering::Relaxed);

        StageOutcome::Done(Verdict::Pass)
    }

    /// Uniform in `[-jitter_ns, +jitter_ns]`.
    fn jitter_offset(&self, jitter_ns: u64) -> i64 {
        if jitter_ns == 0 {
            return 0;
        }
        let span = 2 * jitter_ns + 1;
        (self.rng.next_u64() % span) as i64 - jitter_ns as i64
    }
}
