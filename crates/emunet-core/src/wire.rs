//! emunet wire format: the byte-exact rule table key and value.
//!
//! These structs are shared verbatim with the kernel-resident hash maps.
//! Every field, every size is part of the layout agreement with the
//! tc programs. Changing anything here breaks rule installation on hosts
//! running an older pipeline.
//!
//! All types are #[repr(C)] (the key is additionally packed) and use
//! zerocopy derives for allocation-free conversion to and from map bytes.
//! Integers are host byte order, as the kernel stores them.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::mac::MacAddr;

/// Nanoseconds in one unit of `delay`/`jitter` (a hundredth of a millisecond).
pub const NS_PER_HUNDREDTH_MS: u64 = 10_000;

/// Loss rates are expressed on a 0..=10000 scale (hundredths of a percent).
pub const LOSS_SCALE: u32 = 10_000;

pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Default capacity of the rule table and the pacing table.
pub const DEFAULT_TABLE_CAPACITY: usize = 65_535;

// ── Flow key ──────────────────────────────────────────────────────────────────

/// One direction of one logical flow on one host.
///
/// Wire size: 10 bytes, no padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FlowKey {
    /// Interface index the packet was seen on (the endpoint's host-side veth).
    pub ifindex: u32,
    /// Source hardware address from the Ethernet header.
    pub src_mac: [u8; 6],
}

assert_eq_size!(FlowKey, [u8; 10]);

impl FlowKey {
    pub fn new(ifindex: u32, src_mac: MacAddr) -> Self {
        Self {
            ifindex,
            src_mac: src_mac.octets(),
        }
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn src_mac(&self) -> MacAddr {
        MacAddr::new(self.src_mac)
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ifindex(), self.src_mac())
    }
}

// ── Shaping parameters ────────────────────────────────────────────────────────

/// Impairment applied to every packet of a flow. Zero disables a dimension.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct ShapingParams {
    /// Bits per second. 0 = no rate limit (does not mean drop).
    pub throttle_rate_bps: u32,
    /// One-way delay in hundredths of a millisecond.
    pub delay: u32,
    /// Drop probability in hundredths of a percent, 0..=10000.
    pub loss_rate: u32,
    /// Jitter amplitude in hundredths of a millisecond.
    pub jitter: u32,
}

assert_eq_size!(ShapingParams, [u8; 16]);

impl ShapingParams {
    pub fn delay_ns(&self) -> u64 {
        u64::from(self.delay) * NS_PER_HUNDREDTH_MS
    }

    pub fn jitter_ns(&self) -> u64 {
        u64::from(self.jitter) * NS_PER_HUNDREDTH_MS
    }

    pub fn is_rate_limited(&self) -> bool {
        self.throttle_rate_bps > 0
    }

    /// True if every dimension is disabled.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

// ── Rule operation ────────────────────────────────────────────────────────────

/// What a rule-update job does to the target host's rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    /// Insert or overwrite the entry with the carried parameters.
    Upsert(ShapingParams),
    /// Remove the entry. Removing an absent entry is not an error.
    Delete,
}

impl RuleOp {
    pub fn is_delete(&self) -> bool {
        matches!(self, RuleOp::Delete)
    }
}
