//! The motion side of the bench, seen through a narrow interface.

use crate::deck::{Location, Mount};
use crate::error::{BenchError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

// ---------------------------------------------------------------------------
// Addr
// ---------------------------------------------------------------------------

/// Which actuators a command drives. A paired command moves both mounts in
/// one motion; the location given is the primary's, the secondary follows at
/// the fixed pairing offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Addr {
    Single(Mount),
    Paired { primary: Mount, secondary: Mount },
}

impl Addr {
    pub fn mounts(self) -> Vec<Mount> {
        match self {
            Addr::Single(m) => vec![m],
            Addr::Paired { primary, secondary } => vec![primary, secondary],
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Single(m) => write!(f, "{m}"),
            Addr::Paired { primary, secondary } => write!(f, "{primary}+{secondary}"),
        }
    }
}

// ---------------------------------------------------------------------------
// LiquidHandler
// ---------------------------------------------------------------------------

pub trait LiquidHandler {
    fn pick_up_tip(&mut self, mount: Mount, tip: &Location) -> Result<()>;
    fn drop_tip(&mut self, mount: Mount, location: &Location) -> Result<()>;
    /// `depth` is mm above the well bottom; `None` uses the handler default.
    fn aspirate(&mut self, addr: Addr, volume: f64, location: &Location, depth: Option<f64>) -> Result<()>;
    fn dispense(&mut self, addr: Addr, volume: f64, location: &Location) -> Result<()>;
    fn mix(&mut self, addr: Addr, repetitions: u32, volume: f64, location: &Location) -> Result<()>;
    fn air_gap(&mut self, addr: Addr, volume: f64) -> Result<()>;
    fn touch_tip(&mut self, addr: Addr, location: &Location) -> Result<()>;
    fn move_to(&mut self, addr: Addr, location: &Location, z: f64) -> Result<()>;
    /// Raise one mount to absolute height `z` above the deck, mm.
    fn retract(&mut self, mount: Mount, z: f64) -> Result<()>;
    fn comment(&mut self, text: &str) -> Result<()>;
    /// `Ok` when both mounts can reach `primary` and `secondary` in one
    /// motion, `PairingUnavailable` otherwise.
    fn check_pairing(&self, primary: &Location, secondary: &Location) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SimulatedHandler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum HandlerCall {
    PickUpTip {
        mount: Mount,
        tip: Location,
    },
    DropTip {
        mount: Mount,
        location: Location,
    },
    Aspirate {
        addr: Addr,
        volume: f64,
        location: Location,
        depth: Option<f64>,
    },
    Dispense {
        addr: Addr,
        volume: f64,
        location: Location,
    },
    Mix {
        addr: Addr,
        repetitions: u32,
        volume: f64,
        location: Location,
    },
    AirGap {
        addr: Addr,
        volume: f64,
    },
    TouchTip {
        addr: Addr,
        location: Location,
    },
    MoveTo {
        addr: Addr,
        location: Location,
        z: f64,
    },
    Retract {
        mount: Mount,
        z: f64,
    },
    Comment {
        text: String,
    },
}

impl fmt::Display for HandlerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerCall::PickUpTip { mount, tip } => write!(f, "{mount:<10} pick up tip {tip}"),
            HandlerCall::DropTip { mount, location } => write!(f, "{mount:<10} drop tip {location}"),
            HandlerCall::Aspirate {
                addr,
                volume,
                location,
                depth,
            } => {
                write!(f, "{:<10} aspirate {volume:.1} uL from {location}", addr.to_string())?;
                if let Some(d) = depth {
                    write!(f, " at {d:.2} mm")?;
                }
                Ok(())
            }
            HandlerCall::Dispense {
                addr,
                volume,
                location,
            } => write!(f, "{:<10} dispense {volume:.1} uL into {location}", addr.to_string()),
            HandlerCall::Mix {
                addr,
                repetitions,
                volume,
                location,
            } => write!(
                f,
                "{:<10} mix {repetitions}x {volume:.1} uL in {location}",
                addr.to_string()
            ),
            HandlerCall::AirGap { addr, volume } => {
                write!(f, "{:<10} air gap {volume:.1} uL", addr.to_string())
            }
            HandlerCall::TouchTip { addr, location } => {
                write!(f, "{:<10} touch tip {location}", addr.to_string())
            }
            HandlerCall::MoveTo { addr, location, z } => {
                write!(f, "{:<10} move to {location} z={z:.1}", addr.to_string())
            }
            HandlerCall::Retract { mount, z } => write!(f, "{mount:<10} retract to z={z:.1}"),
            HandlerCall::Comment { text } => write!(f, "# {text}"),
        }
    }
}

/// Records every call instead of moving hardware. Two wells pair when they
/// sit on the same labware and row, `pair_offset` columns apart.
#[derive(Debug, Clone, Default)]
pub struct SimulatedHandler {
    pair_offset: u32,
    calls: Vec<HandlerCall>,
}

impl SimulatedHandler {
    pub fn new(pair_offset: u32) -> Self {
        Self {
            pair_offset,
            calls: Vec::new(),
        }
    }

    pub fn calls(&self) -> &[HandlerCall] {
        &self.calls
    }

    pub fn into_calls(self) -> Vec<HandlerCall> {
        self.calls
    }

    fn record(&mut self, call: HandlerCall) -> Result<()> {
        debug!(call = %call, "handler");
        self.calls.push(call);
        Ok(())
    }
}

impl LiquidHandler for SimulatedHandler {
    fn pick_up_tip(&mut self, mount: Mount, tip: &Location) -> Result<()> {
        self.record(HandlerCall::PickUpTip {
            mount,
            tip: tip.clone(),
        })
    }

    fn drop_tip(&mut self, mount: Mount, location: &Location) -> Result<()> {
        self.record(HandlerCall::DropTip {
            mount,
            location: location.clone(),
        })
    }

    fn aspirate(&mut self, addr: Addr, volume: f64, location: &Location, depth: Option<f64>) -> Result<()> {
        self.record(HandlerCall::Aspirate {
            addr,
            volume,
            location: location.clone(),
            depth,
        })
    }

    fn dispense(&mut self, addr: Addr, volume: f64, location: &Location) -> Result<()> {
        self.record(HandlerCall::Dispense {
            addr,
            volume,
            location: location.clone(),
        })
    }

    fn mix(&mut self, addr: Addr, repetitions: u32, volume: f64, location: &Location) -> Result<()> {
        self.record(HandlerCall::Mix {
            addr,
            repetitions,
            volume,
            location: location.clone(),
        })
    }

    fn air_gap(&mut self, addr: Addr, volume: f64) -> Result<()> {
        self.record(HandlerCall::AirGap { addr, volume })
    }

    fn touch_tip(&mut self, addr: Addr, location: &Location) -> Result<()> {
        self.record(HandlerCall::TouchTip {
            addr,
            location: location.clone(),
        })
    }

    fn move_to(&mut self, addr: Addr, location: &Location, z: f64) -> Result<()> {
        self.record(HandlerCall::MoveTo {
            addr,
            location: location.clone(),
            z,
        })
    }

    fn retract(&mut self, mount: Mount, z: f64) -> Result<()> {
        self.record(HandlerCall::Retract { mount, z })
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.record(HandlerCall::Comment {
            text: text.to_string(),
        })
    }

    fn check_pairing(&self, primary: &Location, secondary: &Location) -> Result<()> {
        let unavailable = |reason: &str| BenchError::PairingUnavailable {
            primary: primary.to_string(),
            secondary: secondary.to_string(),
            reason: reason.to_string(),
        };
        if primary.labware != secondary.labware {
            return Err(unavailable("different labware"));
        }
        let (Some((pr, pc)), Some((sr, sc))) = (primary.row_col(), secondary.row_col()) else {
            return Err(BenchError::UnresolvedLocation(format!("{primary} / {secondary}")));
        };
        if pr != sr {
            return Err(unavailable("different rows"));
        }
        if self.pair_offset == 0 || sc != pc + self.pair_offset {
            return Err(unavailable("columns are not at the mount spacing"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Priming
// ---------------------------------------------------------------------------

/// Volume of the dummy aspirate/dispense, uL.
const PRIME_VOLUME: f64 = 1.0;

/// Issues a dummy aspirate/dispense before the first real aspirate of each
/// mount. Some plunger firmware takes a bad path on its very first move.
#[derive(Debug)]
pub struct Priming<H> {
    inner: H,
    enabled: bool,
    primed: BTreeSet<Mount>,
}

impl<H: LiquidHandler> Priming<H> {
    pub fn new(inner: H, enabled: bool) -> Self {
        Self {
            inner,
            enabled,
            primed: BTreeSet::new(),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H: LiquidHandler> LiquidHandler for Priming<H> {
    fn pick_up_tip(&mut self, mount: Mount, tip: &Location) -> Result<()> {
        self.inner.pick_up_tip(mount, tip)
    }

    fn drop_tip(&mut self, mount: Mount, location: &Location) -> Result<()> {
        self.inner.drop_tip(mount, location)
    }

    fn aspirate(&mut self, addr: Addr, volume: f64, location: &Location, depth: Option<f64>) -> Result<()> {
        if self.enabled {
            let fresh: Vec<Mount> = addr
                .mounts()
                .into_iter()
                .filter(|m| !self.primed.contains(m))
                .collect();
            // A paired address is primed as a pair: `location` is only the
            // primary's well, the secondary must stay over its own.
            if !fresh.is_empty() {
                self.inner.aspirate(addr, PRIME_VOLUME, location, None)?;
                self.inner.dispense(addr, PRIME_VOLUME, location)?;
                self.primed.extend(fresh);
            }
        }
        self.inner.aspirate(addr, volume, location, depth)
    }

    fn dispense(&mut self, addr: Addr, volume: f64, location: &Location) -> Result<()> {
        self.inner.dispense(addr, volume, location)
    }

    fn mix(&mut self, addr: Addr, repetitions: u32, volume: f64, location: &Location) -> Result<()> {
        self.inner.mix(addr, repetitions, volume, location)
    }

    fn air_gap(&mut self, addr: Addr, volume: f64) -> Result<()> {
        self.inner.air_gap(addr, volume)
    }

    fn touch_tip(&mut self, addr: Addr, location: &Location) -> Result<()> {
        self.inner.touch_tip(addr, location)
    }

    fn move_to(&mut self, addr: Addr, location: &Location, z: f64) -> Result<()> {
        self.inner.move_to(addr, location, z)
    }

    fn retract(&mut self, mount: Mount, z: f64) -> Result<()> {
        self.inner.retract(mount, z)
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.inner.comment(text)
    }

    fn check_pairing(&self, primary: &Location, secondary: &Location) -> Result<()> {
        self.inner.check_pairing(primary, secondary)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(s: &str) -> Location {
        s.parse().unwrap()
    }

    #[test]
    fn pairing_rule() {
        let h = SimulatedHandler::new(1);
        assert!(h.check_pairing(&loc("plate:A1"), &loc("plate:A2")).is_ok());
        for (a, b) in [
            ("plate:A1", "plate:A3"),
            ("plate:A1", "plate:B2"),
            ("plate:A2", "plate:A1"),
            ("plate:A1", "other:A2"),
        ] {
            assert!(
                matches!(
                    h.check_pairing(&loc(a), &loc(b)),
                    Err(BenchError::PairingUnavailable { .. })
                ),
                "{a} / {b} should not pair"
            );
        }
    }

    #[test]
    fn malformed_well_is_unresolved() {
        let h = SimulatedHandler::new(1);
        assert!(matches!(
            h.check_pairing(&loc("plate:XX"), &loc("plate:A2")),
            Err(BenchError::UnresolvedLocation(_))
        ));
    }

    #[test]
    fn records_calls_in_order() {
        let mut h = SimulatedHandler::new(1);
        h.pick_up_tip(Mount::Left, &loc("tips:A1")).unwrap();
        h.aspirate(Addr::Single(Mount::Left), 50.0, &loc("plate:A1"), Some(1.5))
            .unwrap();
        h.retract(Mount::Right, 92.0).unwrap();
        assert_eq!(h.calls().len(), 3);
        assert_eq!(
            h.calls()[2],
            HandlerCall::Retract {
                mount: Mount::Right,
                z: 92.0
            }
        );
        assert_eq!(
            h.calls()[1].to_string(),
            "left       aspirate 50.0 uL from plate:A1 at 1.50 mm"
        );
    }

    #[test]
    fn priming_happens_once_per_mount() {
        let mut h = Priming::new(SimulatedHandler::new(1), true);
        let paired = Addr::Paired {
            primary: Mount::Left,
            secondary: Mount::Right,
        };
        h.aspirate(Addr::Single(Mount::Left), 20.0, &loc("plate:A1"), None)
            .unwrap();
        h.aspirate(paired, 20.0, &loc("plate:A3"), None).unwrap();
        h.aspirate(paired, 20.0, &loc("plate:A5"), None).unwrap();

        let calls = h.into_inner().into_calls();
        let primes: Vec<&HandlerCall> = calls
            .iter()
            .filter(|c| matches!(c, HandlerCall::Aspirate { volume, .. } if *volume == PRIME_VOLUME))
            .collect();
        assert_eq!(primes.len(), 2);
        assert_eq!(
            *primes[1],
            HandlerCall::Aspirate {
                addr: paired,
                volume: PRIME_VOLUME,
                location: loc("plate:A3"),
                depth: None
            }
        );
        assert_eq!(calls.len(), 3 + 2 * 2);
    }

    #[test]
    fn secondary_is_never_primed_alone_in_the_primary_well() {
        let mut h = Priming::new(SimulatedHandler::new(1), true);
        let paired = Addr::Paired {
            primary: Mount::Left,
            secondary: Mount::Right,
        };
        h.aspirate(Addr::Single(Mount::Left), 20.0, &loc("plate:A1"), None)
            .unwrap();
        h.aspirate(paired, 20.0, &loc("plate:A3"), None).unwrap();

        let calls = h.into_inner().into_calls();
        assert!(!calls.iter().any(|c| matches!(
            c,
            HandlerCall::Aspirate { addr: Addr::Single(Mount::Right), .. }
                | HandlerCall::Dispense { addr: Addr::Single(Mount::Right), .. }
        )));
    }

    #[test]
    fn priming_disabled_passes_through() {
        let mut h = Priming::new(SimulatedHandler::new(1), false);
        h.aspirate(Addr::Single(Mount::Left), 20.0, &loc("plate:A1"), None)
            .unwrap();
        assert_eq!(h.inner().calls().len(), 1);
    }
}
