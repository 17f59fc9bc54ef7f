//! Ways for an agent to obtain its rule table handle.

use std::sync::Arc;

use emunet_core::config::{AgentConfig, RuleTableBackend};
use emunet_core::ShapingParams;
use emunet_dataplane::{MemoryFlowTable, RuleTable, TableError};

/// Produces the rule table on first use.
pub trait RuleTableLoader: Send + Sync {
    fn load(&self) -> Result<Arc<RuleTable>, TableError>;

    fn describe(&self) -> String;
}

/// A fresh in-process table.
pub struct InProcessLoader {
    pub capacity: usize,
}

impl RuleTableLoader for InProcessLoader {
    fn load(&self) -> Result<Arc<RuleTable>, TableError> {
        Ok(MemoryFlowTable::<ShapingParams>::shared(self.capacity))
    }

    fn describe(&self) -> String {
        format!("in-process table ({} entries)", self.capacity)
    }
}

/// Hands out a table created elsewhere.
pub struct SharedTableLoader(pub Arc<RuleTable>);

impl RuleTableLoader for SharedTableLoader {
    fn load(&self) -> Result<Arc<RuleTable>, TableError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "shared table".into()
    }
}

/// Opens the pinned kernel map.
#[cfg(feature = "pinned-maps")]
pub struct PinnedLoader {
    pub path: std::path::PathBuf,
}

#[cfg(feature = "pinned-maps")]
impl RuleTableLoader for PinnedLoader {
    fn load(&self) -> Result<Arc<RuleTable>, TableError> {
        let table = emunet_dataplane::pinned::PinnedRuleTable::open(&self.path)?;
        Ok(Arc::new(table))
    }

    fn describe(&self) -> String {
        format!("pinned map {}", self.path.display())
    }
}

/// Loader for the configured backend.
pub fn from_config(config: &AgentConfig) -> Result<Box<dyn RuleTableLoader>, TableError> {
    match config.rule_table {
        RuleTableBackend::Memory => Ok(Box::new(InProcessLoader {
            capacity: config.table_capacity,
        })),
        #[cfg(feature = "pinned-maps")]
        RuleTableBackend::Pinned => Ok(Box::new(PinnedLoader {
            path: config.pin_path.clone(),
        })),
        #[cfg(not(feature = "pinned-maps"))]
        RuleTableBackend::Pinned => Err(TableError::Backend(
            "pinned rule table requires the pinned-maps feature".into(),
        )),
    }
}
