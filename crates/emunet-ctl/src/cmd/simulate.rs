//! Offline pipeline run: one flow, synthetic traffic, deterministic clock.
//!
//! Useful for checking what a set of shaping parameters does to a stream
//! before pushing it to a live link.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use emunet_core::api::validate_loss_rate;
use emunet_core::wire::NS_PER_SEC;
use emunet_core::{FlowKey, MacAddr, ShapingParams};
use emunet_dataplane::packet::synthetic_frame;
use emunet_dataplane::pipeline::PipelineStatsSnapshot;
use emunet_dataplane::source::{ManualClock, SeededRandom};
use emunet_dataplane::{FlowTable, MemoryFlowTable, PacketContext, Pipeline, Verdict};

use super::Flags;

const SIM_IFINDEX: u32 = 1;
const SIM_MAC: MacAddr = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub params: ShapingParams,
    pub packets: u64,
    pub packet_len: usize,
    pub interval_ns: u64,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Outcome {
    pub stats: PipelineStatsSnapshot,
    pub passed: u64,
    pub passed_bytes: u64,
    /// Largest (departure - arrival) over passed packets.
    pub max_hold_ns: u64,
    pub total_hold_ns: u64,
    /// Departure of the last passed packet.
    pub last_departure_ns: u64,
}

impl Outcome {
    pub fn mean_hold_ns(&self) -> u64 {
        if self.passed == 0 { 0 } else { self.total_hold_ns / self.passed }
    }

    /// Bits per second seen at the egress side, first arrival to last departure.
    pub fn egress_bps(&self) -> u64 {
        if self.last_departure_ns == 0 {
            return 0;
        }
        (self.passed_bytes as u128 * 8 * NS_PER_SEC as u128 / self.last_departure_ns as u128) as u64
    }
}

pub fn scenario_from_flags(flags: &Flags<'_>) -> Result<Scenario> {
    let params = ShapingParams {
        throttle_rate_bps: flags.get("rate", 10_000_000)?,
        delay: flags.get("delay", 0)?,
        loss_rate: flags.get("loss", 0)?,
        jitter: flags.get("jitter", 0)?,
    };
    validate_loss_rate(params.loss_rate).map_err(|e| anyhow!(e))?;
    let interval_us: u64 = flags.get("interval-us", 100)?;
    let interval_ns = interval_us
        .checked_mul(1_000)
        .with_context(|| format!("--interval-us: {interval_us} is too large"))?;
    Ok(Scenario {
        params,
        packets: flags.get("packets", 1000)?,
        packet_len: flags.get("size", 1500)?,
        interval_ns,
        seed: flags.get("seed", 1)?,
    })
}

/// Feed `packets` frames at a fixed interval through a single-rule pipeline.
/// The clock starts at 1 ns so a zero departure never reads as "unset".
pub fn run(scenario: &Scenario) -> Result<Outcome> {
    let rules = MemoryFlowTable::<ShapingParams>::shared(1);
    let pacing = MemoryFlowTable::<u64>::shared(1);
    rules
        .update(FlowKey::new(SIM_IFINDEX, SIM_MAC), scenario.params)
        .map_err(|e| anyhow!("rule install failed: {e}"))?;

    let clock = Arc::new(ManualClock::new(1));
    let pipeline = Pipeline::new(rules, pacing)
        .with_clock(clock.clone())
        .with_random(Arc::new(SeededRandom::new(scenario.seed)));

    let frame = synthetic_frame(SIM_MAC, scenario.packet_len);
    let mut outcome = Outcome::default();
    let mut now = 1;

    for _ in 0..scenario.packets {
        let mut pkt = PacketContext::new(&frame, SIM_IFINDEX);
        if pipeline.process(&mut pkt) == Verdict::Pass {
            let departure = pkt.tstamp_ns.unwrap_or(now).max(now);
            let hold = departure - now;
            outcome.passed += 1;
            outcome.passed_bytes += u64::from(pkt.len);
            outcome.total_hold_ns += hold;
            outcome.max_hold_ns = outcome.max_hold_ns.max(hold);
            outcome.last_departure_ns = outcome.last_departure_ns.max(departure);
        }
        now = now.saturating_add(scenario.interval_ns);
        clock.set(now);
    }

    outcome.stats = pipeline.stats();
    Ok(outcome)
}

pub fn cmd_simulate(flags: &Flags<'_>) -> Result<()> {
    let scenario = scenario_from_flags(flags)?;
    let outcome = run(&scenario)?;
    let p = scenario.params;
    let ms = |ns: u64| ns as f64 / 1_000_000.0;

    println!("═══════════════════════════════════════");
    println!("  Pipeline simulation");
    println!("═══════════════════════════════════════");
    println!("  rate      : {} bit/s", p.throttle_rate_bps);
    println!("  delay     : {:.2} ms  jitter ±{:.2} ms", ms(p.delay_ns()), ms(p.jitter_ns()));
    println!("  loss      : {:.2}%", p.loss_rate as f64 / 100.0);
    println!("  traffic   : {} × {} B every {} µs", scenario.packets, scenario.packet_len, scenario.interval_ns / 1_000);
    println!();
    println!("  ┌─ passed        : {}", outcome.passed);
    println!("  │  loss drops    : {}", outcome.stats.loss_drops);
    println!("  │  horizon drops : {}", outcome.stats.horizon_drops);
    println!("  │  paced         : {}", outcome.stats.paced);
    println!("  │  mean hold     : {:.3} ms", ms(outcome.mean_hold_ns()));
    println!("  │  max hold      : {:.3} ms", ms(outcome.max_hold_ns));
    println!("  └─ egress rate   : {} bit/s", outcome.egress_bps());
    Ok(())
}
