//! Depletable multi-source reagent pools.
//!
//! A pool is an ordered list of vessels holding the same reagent. Planning a
//! draw walks the vessels in order, takes what each can give, and decrements
//! them as the plan is built so a second plan never sees the same volume.

use crate::deck::Location;
use crate::error::{BenchError, Result};
use crate::geometry::VesselGeometry;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSource {
    pub location: Location,
    /// Shape of this source's well; depths are computed from it.
    pub vessel: VesselGeometry,
    /// Remaining volume, uL.
    pub remaining: f64,
}

/// One step of an extraction plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub source: usize,
    pub location: Location,
    /// Volume to draw, uL.
    pub amount: f64,
    /// Tip depth above the vessel bottom, mm.
    pub depth: f64,
}

/// Where to put the tip relative to the liquid surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthPolicy {
    /// How far below the surface the tip goes, mm.
    pub immersion_mm: f64,
    /// Never go closer to the bottom than this, mm.
    pub bottom_clearance_mm: f64,
}

impl Default for DepthPolicy {
    fn default() -> Self {
        Self {
            immersion_mm: 2.0,
            bottom_clearance_mm: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepletablePool {
    name: String,
    depth: DepthPolicy,
    sources: Vec<ResourceSource>,
}

impl DepletablePool {
    pub fn new(name: impl Into<String>, depth: DepthPolicy, sources: Vec<ResourceSource>) -> Self {
        Self {
            name: name.into(),
            depth,
            sources,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sources(&self) -> &[ResourceSource] {
        &self.sources
    }

    pub fn remaining(&self) -> Vec<f64> {
        self.sources.iter().map(|s| s.remaining).collect()
    }

    pub fn total_remaining(&self) -> f64 {
        self.sources.iter().map(|s| s.remaining).sum()
    }

    pub fn is_exhausted(&self) -> bool {
        self.sources.iter().all(|s| s.remaining <= 0.0)
    }

    /// Plan a draw of `volume`, decrementing sources as the plan is built.
    ///
    /// The plan holds one entry per source in pool order; sources that give
    /// nothing appear with a zero amount and are skipped by the executor. On
    /// insufficient volume the pool is left untouched.
    pub fn plan_extraction(&mut self, volume: f64) -> Result<Vec<Extraction>> {
        self.ensure_available(volume)?;
        let mut plan = Vec::with_capacity(self.sources.len());
        let mut needed = volume;
        for (index, source) in self.sources.iter_mut().enumerate() {
            let amount = source.remaining.min(needed).max(0.0);
            source.remaining -= amount;
            needed -= amount;
            plan.push(Extraction {
                source: index,
                location: source.location.clone(),
                amount,
                depth: depth_for(&source.vessel, &self.depth, source.remaining),
            });
        }
        debug!(pool = %self.name, volume, "planned extraction");
        Ok(plan)
    }

    /// Apply the bookkeeping of a draw without producing a plan, for stages
    /// whose physical transfer is suppressed during resume.
    pub fn use_without_executing(&mut self, volume: f64) -> Result<()> {
        self.ensure_available(volume)?;
        let mut needed = volume;
        for source in &mut self.sources {
            if needed <= 0.0 {
                break;
            }
            let amount = source.remaining.min(needed).max(0.0);
            source.remaining -= amount;
            needed -= amount;
        }
        debug!(pool = %self.name, volume, "accounted suppressed extraction");
        Ok(())
    }

    /// Explicit operator refill of one source.
    pub fn refill(&mut self, source: usize, volume: f64) -> Result<()> {
        let s = self
            .sources
            .get_mut(source)
            .ok_or_else(|| BenchError::UnknownReagent(format!("{}[{source}]", self.name)))?;
        s.remaining = volume.max(s.remaining);
        Ok(())
    }

    fn ensure_available(&self, volume: f64) -> Result<()> {
        let available = self.total_remaining();
        if !volume.is_finite() || volume < 0.0 {
            return Err(BenchError::InvalidVolume {
                pool: self.name.clone(),
                volume,
            });
        }
        if volume > available + f64::EPSILON * volume.max(1.0) {
            return Err(BenchError::ReagentExhausted {
                pool: self.name.clone(),
                requested: volume,
                available,
            });
        }
        Ok(())
    }
}

fn depth_for(vessel: &VesselGeometry, policy: &DepthPolicy, volume: f64) -> f64 {
    let surface = vessel.height_for_volume(volume);
    (surface - policy.immersion_mm)
        .max(policy.bottom_clearance_mm)
        .max(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
