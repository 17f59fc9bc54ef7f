//! emunet-dataplane: the per-packet shaping path.
//!
//! Shared flow tables, the EDT rate limiter and the two-stage pipeline that
//! applies loss, pacing, delay and jitter to egress packets.

pub mod edt;
pub mod packet;
#[cfg(feature = "pinned-maps")]
pub mod pinned;
pub mod pipeline;
pub mod source;
pub mod table;

pub use packet::PacketContext;
pub use pipeline::{DropReason, Pipeline, Verdict};
pub use table::{FlowTable, MemoryFlowTable, PacingTable, RuleTable, TableError};
