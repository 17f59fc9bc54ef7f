//! emunet-core: shared types, rule table wire format, and configuration.
//! All other emunet crates depend on this one.

pub mod api;
pub mod config;
pub mod identity;
pub mod mac;
pub mod wire;

pub use identity::{EndpointIdentity, LifecyclePhase, NetworkIdentity, OrchestrationIdentity};
pub use mac::{MacAddr, MacParseError};
pub use wire::{FlowKey, RuleOp, ShapingParams};
