//! Fill-level model for conical-bottom vessels.
//!
//! A vessel is a cone of height `cone_height` and radius `radius` with a
//! cylinder of the same radius on top. Lengths are millimetres and volumes
//! are microlitres (1 uL = 1 mm^3), so no unit conversion is needed.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VesselGeometry {
    /// Height of the conical bottom section, mm.
    pub cone_height: f64,
    /// Radius of the cone mouth and of the cylinder above it, mm.
    pub radius: f64,
}

impl VesselGeometry {
    pub fn new(cone_height: f64, radius: f64) -> Self {
        Self {
            cone_height,
            radius,
        }
    }

    /// Volume held by the full cone, the breakpoint between the two regimes.
    pub fn cone_volume(&self) -> f64 {
        PI * self.radius * self.radius * self.cone_height / 3.0
    }

    /// Liquid height for `volume`.
    pub fn height_for_volume(&self, volume: f64) -> f64 {
        let volume = volume.max(0.0);
        if volume < self.cone_volume() {
            self.height_in_cone(volume)
        } else {
            self.height_above_cone(volume)
        }
    }

    /// Volume held when the liquid reaches `height`.
    pub fn volume_for_height(&self, height: f64) -> f64 {
        let height = height.max(0.0);
        let base = PI * self.radius * self.radius;
        if height < self.cone_height {
            base * height.powi(3) / (3.0 * self.cone_height * self.cone_height)
        } else {
            base * (height - 2.0 * self.cone_height / 3.0)
        }
    }

    fn height_in_cone(&self, volume: f64) -> f64 {
        let h = self.cone_height;
        (3.0 * h * h * volume / (PI * self.radius * self.radius)).cbrt()
    }

    fn height_above_cone(&self, volume: f64) -> f64 {
        volume / (PI * self.radius * self.radius) + 2.0 * self.cone_height / 3.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn tube() -> VesselGeometry {
        VesselGeometry::new(16.0, 10.0)
    }

    #[test]
    fn branches_agree_at_breakpoint() {
        let g = tube();
        let v = g.cone_volume();
        let below = g.height_in_cone(v);
        let above = g.height_above_cone(v);
        assert!((below - above).abs() < EPS, "{below} != {above}");
        assert!((below - g.cone_height).abs() < EPS);
    }

    #[test]
    fn inverse_agrees_at_breakpoint() {
        let g = tube();
        let v = g.cone_volume();
        assert!((g.volume_for_height(g.cone_height) - v).abs() < 1e-6);
    }

    #[test]
    fn empty_vessel_has_zero_height() {
        assert_eq!(tube().height_for_volume(0.0), 0.0);
        assert_eq!(tube().height_for_volume(-5.0), 0.0);
    }

    #[test]
    fn cylinder_region_is_linear() {
        let g = tube();
        let area = PI * 100.0;
        let h1 = g.height_for_volume(g.cone_volume() + area);
        assert!((h1 - (g.cone_height + 1.0)).abs() < EPS);
    }

    proptest! {
        #[test]
        fn height_volume_roundtrip(volume in 0.0f64..50_000.0) {
            let g = tube();
            let back = g.volume_for_height(g.height_for_volume(volume));
            prop_assert!((back - volume).abs() < 1e-6 * volume.max(1.0));
        }

        #[test]
        fn height_is_monotonic(a in 0.0f64..20_000.0, b in 0.0f64..20_000.0) {
            let g = tube();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(g.height_for_volume(lo) <= g.height_for_volume(hi) + EPS);
        }
    }
}
