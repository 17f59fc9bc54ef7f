//! emunet-services: identity cache, dispatch engine and host agent.

pub mod agent;
pub mod dispatch;
pub mod identity_cache;
pub mod remote_cache;
pub mod rule_loader;

pub use agent::{Agent, AgentError, AgentSettings};
pub use dispatch::{
    AgentTransport, DeleteOutcome, DispatchEngine, DispatchError, DispatchSettings,
    HttpAgentTransport, RuleJob,
};
pub use identity_cache::{CacheError, IdentityCache, MemoryIdentityCache};
pub use remote_cache::RemoteIdentityCache;
pub use rule_loader::RuleTableLoader;
pub use emunet_dataplane::TableError;
