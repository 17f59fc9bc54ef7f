//! Rule table backed by the pinned kernel hash map the tc programs read.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use aya::maps::{HashMap, Map, MapData, MapError};
use aya::Pod;
use emunet_core::{FlowKey, ShapingParams};

use crate::table::{FlowTable, TableError};

#[derive(Clone, Copy)]
#[repr(transparent)]
struct PinnedKey(FlowKey);

#[derive(Clone, Copy)]
#[repr(transparent)]
struct PinnedParams(ShapingParams);

// SAFETY: both wrap plain-old-data #[repr(C)] structs with no padding
// (size asserted in emunet_core::wire).
unsafe impl Pod for PinnedKey {}
unsafe impl Pod for PinnedParams {}

pub struct PinnedRuleTable {
    map: Mutex<HashMap<MapData, PinnedKey, PinnedParams>>,
}

impl PinnedRuleTable {
    pub fn open(path: &Path) -> Result<Self, TableError> {
        let data = MapData::from_pin(path)
            .map_err(|e| TableError::Backend(format!("open {}: {e}", path.display())))?;
        let map = Map::from_map_data(data).map_err(backend)?;
        let map = HashMap::try_from(map).map_err(backend)?;
        Ok(Self {
            map: Mutex::new(map),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<MapData, PinnedKey, PinnedParams>>, TableError> {
        self.map
            .lock()
            .map_err(|_| TableError::Backend("map lock poisoned".into()))
    }
}

fn backend(e: MapError) -> TableError {
    TableError::Backend(e.to_string())
}

impl FlowTable<ShapingParams> for PinnedRuleTable {
    fn lookup(&self, key: &FlowKey) -> Option<ShapingParams> {
        let map = self.lock().ok()?;
        map.get(&PinnedKey(*key), 0).ok().map(|v| v.0)
    }

    fn update(&self, key: FlowKey, value: ShapingParams) -> Result<(), TableError> {
        let mut map = self.lock()?;
        map.insert(PinnedKey(key), PinnedParams(value), 0)
            .map_err(backend)
    }

    fn remove(&self, key: &FlowKey) -> Result<(), TableError> {
        let mut map = self.lock()?;
        match map.remove(&PinnedKey(*key)) {
            Ok(()) | Err(MapError::KeyNotFound) => Ok(()),
            Err(e) => Err(backend(e)),
        }
    }

    fn entries(&self) -> Result<Vec<(FlowKey, ShapingParams)>, TableError> {
        let map = self.lock()?;
        map.iter()
            .map(|item| item.map(|(k, v)| (k.0, v.0)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)
    }
}
