//! Earliest-departure-time rate limiter.
//!
//! Each rate-limited flow keeps the departure time of its last scheduled
//! packet. A new packet departs one transmission time after that, unless
//! the flow has gone idle, in which case pacing restarts from now. There is
//! no credit for idle periods.

use emunet_core::wire::NS_PER_SEC;
use emunet_core::FlowKey;

use crate::packet::PacketContext;
use crate::table::PacingTable;

/// Packets scheduled further than this into the future are dropped.
pub const HORIZON_NS: u64 = 2 * NS_PER_SEC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdtOutcome {
    /// Flow was idle. Pacing restarted; packet timing unchanged.
    Restarted,
    /// Packet stamped with a later departure time.
    Delayed(u64),
    /// Departure would exceed the horizon. Pacing state left as it was.
    Dropped,
}

/// Time to put `len` bytes on a link of `rate_bps`.
pub fn transmit_ns(len: u32, rate_bps: u32) -> u64 {
    if rate_bps == 0 {
        return 0;
    }
    u64::from(len) * 8 * NS_PER_SEC / u64::from(rate_bps)
}

/// Schedule one packet of `key` at `rate_bps`.
///
/// A failed pacing update never drops the packet; it leaves the packet's
/// timing unchanged.
pub fn schedule(
    pacing: &PacingTable,
    key: &FlowKey,
    rate_bps: u32,
    now_ns: u64,
    pkt: &mut PacketContext<'_>,
) -> EdtOutcome {
    let delay = transmit_ns(pkt.len, rate_bps);
    let base = now_ns.max(pkt.tstamp_ns.unwrap_or(0));

    let last = match pacing.lookup(key) {
        Some(last) if last > base => last,
        _ => {
            if let Err(e) = pacing.update(*key, base + delay) {
                tracing::trace!(flow = %key, error = %e, "pacing restart not recorded");
            }
            return EdtOutcome::Restarted;
        }
    };

    let next = last + delay;
    if next - now_ns >= HORIZON_NS {
        return EdtOutcome::Dropped;
    }

    if let Err(e) = pacing.update(*key, next) {
        tracing::trace!(flow = %key, error = %e, "pacing update failed, passing unpaced");
        return EdtOutcome::Restarted;
    }
    pkt.tstamp_ns = Some(next);
    EdtOutcome::Delayed(next)
}
