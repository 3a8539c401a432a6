//! Persisted allocator for single-use consumables (pipette tips).
//!
//! Units are handed out in fixed positional order. State is written to
//! `.benchrun/tips.json` after every allocation and refill so a restarted run
//! knows which tips are physically gone.

use crate::config::LabConfig;
use crate::deck::{Location, Mount};
use crate::error::{BenchError, Result};
use crate::operator::Operator;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// ConsumableUnit / ConsumablePool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumableUnit {
    /// Slot identity, `rack:well`.
    pub id: String,
    pub available: bool,
}

impl ConsumableUnit {
    pub fn location(&self) -> Result<Location> {
        self.id.parse()
    }
}

#[derive(Debug, Clone)]
pub struct ConsumablePool {
    name: String,
    units: Vec<ConsumableUnit>,
}

impl ConsumablePool {
    pub fn new(name: impl Into<String>, ids: Vec<String>) -> Self {
        Self {
            name: name.into(),
            units: ids
                .into_iter()
                .map(|id| ConsumableUnit {
                    id,
                    available: true,
                })
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units(&self) -> &[ConsumableUnit] {
        &self.units
    }

    pub fn capacity(&self) -> usize {
        self.units.len()
    }

    pub fn consumed(&self) -> usize {
        self.units.iter().filter(|u| !u.available).count()
    }

    pub fn next_available(&self) -> Option<&ConsumableUnit> {
        self.units.iter().find(|u| u.available)
    }

    fn mark_used(&mut self, id: &str) -> Result<()> {
        let unit = self
            .units
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| BenchError::PersistedStateMismatch {
                pool: self.name.clone(),
                reason: format!("unit '{id}' is not part of the pool"),
            })?;
        unit.available = false;
        Ok(())
    }

    fn refill(&mut self) {
        for unit in &mut self.units {
            unit.available = true;
        }
    }
}

// ---------------------------------------------------------------------------
// PersistedPoolState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPool {
    pub name: String,
    pub consumed: usize,
    pub next: Option<String>,
    pub units: Vec<ConsumableUnit>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersistedPoolState {
    pub pools: Vec<PersistedPool>,
}

impl PersistedPoolState {
    /// Read a snapshot; a missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        crate::io::read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::io::write_json(path, self)
    }
}

/// One row of the consumables summary shown by `status` and `tips show`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSummary {
    pub pool: String,
    pub consumed: usize,
    pub capacity: usize,
    pub next: Option<String>,
}

// ---------------------------------------------------------------------------
// ResourceAllocator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ResourceAllocator {
    pools: Vec<ConsumablePool>,
    mounts: BTreeMap<Mount, String>,
    state_path: Option<PathBuf>,
}

impl ResourceAllocator {
    /// `state_path` of `None` keeps everything in memory (dry walks, tests).
    pub fn new(
        pools: Vec<ConsumablePool>,
        mounts: BTreeMap<Mount, String>,
        state_path: Option<PathBuf>,
    ) -> Self {
        Self {
            pools,
            mounts,
            state_path,
        }
    }

    pub fn from_config(config: &LabConfig, root: Option<&Path>) -> Result<Self> {
        for pc in &config.consumables {
            paths::validate_name(&pc.name)?;
        }
        Ok(Self::new(
            config.consumable_pools()?,
            config.mounts.clone(),
            root.map(paths::tips_path),
        ))
    }

    pub fn pools(&self) -> &[ConsumablePool] {
        &self.pools
    }

    pub fn pool(&self, name: &str) -> Result<&ConsumablePool> {
        self.pools
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| BenchError::UnknownPool(name.to_string()))
    }

    fn pool_mut(&mut self, name: &str) -> Result<&mut ConsumablePool> {
        self.pools
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| BenchError::UnknownPool(name.to_string()))
    }

    /// Pool a mount draws its tips from.
    pub fn pool_for(&self, mount: Mount) -> Result<&str> {
        self.mounts
            .get(&mount)
            .map(String::as_str)
            .ok_or_else(|| BenchError::UnknownMount(mount.to_string()))
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Take the first available unit of `pool`, pausing for a refill through
    /// `operator` when the pool is empty. State is persisted before return.
    pub fn allocate(&mut self, pool: &str, operator: &mut dyn Operator) -> Result<ConsumableUnit> {
        let unit = self.peek(pool, operator)?;
        self.commit(pool, &unit.id)?;
        Ok(ConsumableUnit {
            available: false,
            ..unit
        })
    }

    /// The unit the next allocation will return, refilling first if the pool
    /// is empty. Nothing is marked used until [`commit`](Self::commit).
    pub fn peek(&mut self, pool: &str, operator: &mut dyn Operator) -> Result<ConsumableUnit> {
        if let Some(unit) = self.pool(pool)?.next_available() {
            return Ok(unit.clone());
        }
        let capacity = self.pool(pool)?.capacity();
        warn!(pool, capacity, "consumable pool empty, waiting for refill");
        operator.acknowledge(&format!(
            "Consumable pool '{pool}' is empty: replace all {capacity} units and confirm"
        ))?;
        self.refill(pool)?;
        self.pool(pool)?
            .next_available()
            .cloned()
            .ok_or_else(|| BenchError::UnknownPool(format!("{pool} (no units)")))
    }

    /// Record that `unit_id` has physically left the pool and persist.
    pub fn commit(&mut self, pool: &str, unit_id: &str) -> Result<()> {
        self.pool_mut(pool)?.mark_used(unit_id)?;
        debug!(pool, unit = unit_id, "consumable allocated");
        self.persist()
    }

    /// A used unit is gone for good; only a refill makes it available again.
    pub fn release(&mut self, unit: &ConsumableUnit) {
        debug!(unit = %unit.id, "consumable released");
    }

    pub fn refill(&mut self, pool: &str) -> Result<()> {
        self.pool_mut(pool)?.refill();
        info!(pool, "consumable pool refilled");
        self.persist()
    }

    pub fn refill_all(&mut self) -> Result<()> {
        for pool in &mut self.pools {
            pool.refill();
        }
        info!("all consumable pools refilled");
        self.persist()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> PersistedPoolState {
        PersistedPoolState {
            pools: self
                .pools
                .iter()
                .map(|p| PersistedPool {
                    name: p.name.clone(),
                    consumed: p.consumed(),
                    next: p.next_available().map(|u| u.id.clone()),
                    units: p.units.clone(),
                })
                .collect(),
        }
    }

    pub fn persist(&self) -> Result<()> {
        match &self.state_path {
            Some(path) => self.snapshot().save(path),
            None => Ok(()),
        }
    }

    /// Restore availability from the state file if one exists. Returns
    /// whether anything was restored.
    pub fn load_persisted_state(&mut self) -> Result<bool> {
        let Some(path) = self.state_path.clone() else {
            return Ok(false);
        };
        match PersistedPoolState::load(&path)? {
            Some(state) => {
                self.restore(&state)?;
                info!(path = %path.display(), "restored consumable state");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply a snapshot. The snapshot must describe exactly the live pools,
    /// unit for unit; anything else is rejected without touching state.
    pub fn restore(&mut self, state: &PersistedPoolState) -> Result<()> {
        if state.pools.len() != self.pools.len() {
            return Err(BenchError::PersistedStateMismatch {
                pool: "*".to_string(),
                reason: format!(
                    "snapshot has {} pools, configuration has {}",
                    state.pools.len(),
                    self.pools.len()
                ),
            });
        }
        for (saved, live) in state.pools.iter().zip(&self.pools) {
            check_shape(saved, live)?;
        }
        for (saved, live) in state.pools.iter().zip(&mut self.pools) {
            for (s, l) in saved.units.iter().zip(&mut live.units) {
                l.available = s.available;
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> Vec<PoolSummary> {
        self.pools
            .iter()
            .map(|p| PoolSummary {
                pool: p.name.clone(),
                consumed: p.consumed(),
                capacity: p.capacity(),
                next: p.next_available().map(|u| u.id.clone()),
            })
            .collect()
    }
}

fn check_shape(saved: &PersistedPool, live: &ConsumablePool) -> Result<()> {
    let mismatch = |reason: String| BenchError::PersistedStateMismatch {
        pool: live.name.clone(),
        reason,
    };
    if saved.name != live.name {
        return Err(mismatch(format!("snapshot pool is named '{}'", saved.name)));
    }
    if saved.units.len() != live.units.len() {
        return Err(mismatch(format!(
            "snapshot has {} units, pool has {}",
            saved.units.len(),
            live.units.len()
        )));
    }
    if let Some((i, (s, l))) = saved
        .units
        .iter()
        .zip(&live.units)
        .enumerate()
        .find(|(_, (s, l))| s.id != l.id)
    {
        return Err(mismatch(format!(
            "unit {i} is '{}' in snapshot but '{}' in pool",
            s.id, l.id
        )));
    }
    let unavailable = saved.units.iter().filter(|u| !u.available).count();
    if unavailable != saved.consumed {
        return Err(mismatch(format!(
            "consumed count {} disagrees with {unavailable} used units",
            saved.consumed
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::AutoOperator;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn rack_ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tips:{i}")).collect()
    }

    fn allocator(capacity: usize, path: Option<PathBuf>) -> ResourceAllocator {
        let mut mounts = BTreeMap::new();
        mounts.insert(Mount::Left, "p300".to_string());
        ResourceAllocator::new(
            vec![ConsumablePool::new("p300", rack_ids(capacity))],
            mounts,
            path,
        )
    }

    fn assert_invariant(a: &ResourceAllocator) {
        for pool in a.pools() {
            let unavailable = pool.units().iter().filter(|u| !u.available).count();
            assert_eq!(pool.consumed(), unavailable);
            assert!(pool.consumed() <= pool.capacity());
        }
    }

    #[test]
    fn allocates_in_positional_order() {
        let mut a = allocator(4, None);
        let mut op = AutoOperator::default();
        let ids: Vec<String> = (0..3)
            .map(|_| a.allocate("p300", &mut op).unwrap().id)
            .collect();
        assert_eq!(ids, vec!["tips:0", "tips:1", "tips:2"]);
        assert_eq!(a.pool("p300").unwrap().consumed(), 3);
        assert!(op.prompts().is_empty());
    }

    #[test]
    fn refill_wait_on_97th_of_96() {
        let mut a = allocator(96, None);
        let mut op = AutoOperator::default();
        for _ in 0..96 {
            a.allocate("p300", &mut op).unwrap();
        }
        assert!(op.prompts().is_empty());
        assert_eq!(a.pool("p300").unwrap().consumed(), 96);

        let unit = a.allocate("p300", &mut op).unwrap();
        assert_eq!(op.prompts().len(), 1);
        assert!(op.prompts()[0].contains("p300"));
        assert_eq!(unit.id, "tips:0");
        assert_eq!(a.pool("p300").unwrap().consumed(), 1);
        assert_invariant(&a);
    }

    #[test]
    fn aborted_refill_leaves_pool_empty() {
        let mut a = allocator(1, None);
        let mut op = AutoOperator::default();
        a.allocate("p300", &mut op).unwrap();
        let mut refuse = AutoOperator::refusing();
        let err = a.allocate("p300", &mut refuse).unwrap_err();
        assert!(matches!(err, BenchError::OperatorAborted(_)));
        assert_eq!(a.pool("p300").unwrap().consumed(), 1);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut a = allocator(2, None);
        let mut op = AutoOperator::default();
        let first = a.peek("p300", &mut op).unwrap();
        let again = a.peek("p300", &mut op).unwrap();
        assert_eq!(first, again);
        assert_eq!(a.pool("p300").unwrap().consumed(), 0);
        a.commit("p300", &first.id).unwrap();
        assert_eq!(a.peek("p300", &mut op).unwrap().id, "tips:1");
    }

    #[test]
    fn release_does_not_restore() {
        let mut a = allocator(2, None);
        let mut op = AutoOperator::default();
        let unit = a.allocate("p300", &mut op).unwrap();
        a.release(&unit);
        assert_eq!(a.pool("p300").unwrap().consumed(), 1);
    }

    #[test]
    fn every_allocation_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tips.json");
        let mut a = allocator(8, Some(path.clone()));
        let mut op = AutoOperator::default();
        a.allocate("p300", &mut op).unwrap();
        a.allocate("p300", &mut op).unwrap();

        let saved = PersistedPoolState::load(&path).unwrap().unwrap();
        assert_eq!(saved.pools[0].consumed, 2);
        assert_eq!(saved.pools[0].next.as_deref(), Some("tips:2"));
        assert!(!saved.pools[0].units[1].available);
        assert!(saved.pools[0].units[2].available);
    }

    #[test]
    fn persist_roundtrip_restores_availability() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tips.json");
        let mut a = allocator(8, Some(path.clone()));
        let mut op = AutoOperator::default();
        for _ in 0..5 {
            a.allocate("p300", &mut op).unwrap();
        }

        let mut b = allocator(8, Some(path));
        assert!(b.load_persisted_state().unwrap());
        assert_eq!(b.summary(), a.summary());
        assert_eq!(b.allocate("p300", &mut op).unwrap().id, "tips:5");
    }

    #[test]
    fn missing_state_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mut a = allocator(8, Some(dir.path().join("tips.json")));
        assert!(!a.load_persisted_state().unwrap());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let mut op = AutoOperator::default();
        let mut a = allocator(8, None);
        a.allocate("p300", &mut op).unwrap();
        let snapshot = a.snapshot();

        let mut b = allocator(96, None);
        let err = b.restore(&snapshot).unwrap_err();
        assert!(matches!(err, BenchError::PersistedStateMismatch { .. }));
        assert_eq!(b.pool("p300").unwrap().consumed(), 0);
    }

    #[test]
    fn reordered_identities_are_rejected() {
        let mut snapshot = allocator(4, None).snapshot();
        snapshot.pools[0].units.swap(0, 1);
        let mut b = allocator(4, None);
        let err = b.restore(&snapshot).unwrap_err();
        assert!(err.to_string().contains("unit 0"));
    }

    #[test]
    fn inconsistent_count_is_rejected() {
        let mut snapshot = allocator(4, None).snapshot();
        snapshot.pools[0].consumed = 3;
        assert!(allocator(4, None).restore(&snapshot).is_err());
    }

    #[test]
    fn pool_for_uses_mount_mapping() {
        let a = allocator(4, None);
        assert_eq!(a.pool_for(Mount::Left).unwrap(), "p300");
        assert!(matches!(
            a.pool_for(Mount::Right),
            Err(BenchError::UnknownMount(_))
        ));
        assert!(matches!(a.pool("p20"), Err(BenchError::UnknownPool(_))));
    }

    #[test]
    fn from_config_uses_tip_racks() {
        let cfg = LabConfig::new("bench");
        let a = ResourceAllocator::from_config(&cfg, None).unwrap();
        assert_eq!(a.pool_for(Mount::Right).unwrap(), "right");
        assert_eq!(a.pool("left").unwrap().capacity(), 96);
    }

    proptest! {
        #[test]
        fn consumed_matches_unavailable(capacity in 1usize..40, ops in proptest::collection::vec(0u8..6, 0..120)) {
            let mut a = allocator(capacity, None);
            let mut op = AutoOperator::default();
            for o in ops {
                if o == 0 {
                    a.refill("p300").unwrap();
                } else {
                    a.allocate("p300", &mut op).unwrap();
                }
                let pool = a.pool("p300").unwrap();
                let unavailable = pool.units().iter().filter(|u| !u.available).count();
                prop_assert_eq!(pool.consumed(), unavailable);
                prop_assert!(pool.consumed() <= capacity);
                prop_assert!(pool.consumed() >= 1 || o == 0);
            }
        }
    }
}
