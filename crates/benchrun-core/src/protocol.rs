//! Built-in magnetic bead cleanup, the procedure `benchrun run` executes.

use crate::deck::Location;
use crate::error::Result;
use crate::paired::Loc;
use crate::run::{Protocol, RunContext};

/// Stage names in execution order.
pub const STAGES: [&str; 6] = ["bind", "wash-1", "wash-2", "dry", "elute", "transfer"];

#[derive(Debug, Clone)]
pub struct MagBeadCleanup {
    /// Sample labware; columns are processed two at a time.
    pub plate: String,
    /// Output labware for the eluate, same well layout as `plate`.
    pub output: String,
    /// Sample columns come in pairs, one column per mount.
    pub column_pairs: u32,
    pub sample_volume: f64,
    pub bead_volume: f64,
    pub wash_volume: f64,
    pub elution_volume: f64,
    pub bind_minutes: f64,
    pub settle_minutes: f64,
    pub dry_minutes: f64,
}

impl Default for MagBeadCleanup {
    fn default() -> Self {
        Self {
            plate: "samples".to_string(),
            output: "eluate".to_string(),
            column_pairs: 3,
            sample_volume: 50.0,
            bead_volume: 90.0,
            wash_volume: 150.0,
            elution_volume: 30.0,
            bind_minutes: 5.0,
            settle_minutes: 2.0,
            dry_minutes: 8.0,
        }
    }
}

impl MagBeadCleanup {
    /// Adjacent columns of row A: `(A1, A2), (A3, A4), ...`.
    fn pairs(&self) -> Vec<(Location, Location)> {
        (0..self.column_pairs)
            .map(|i| {
                let first = 2 * i + 1;
                (
                    Location::new(self.plate.clone(), format!("A{first}")),
                    Location::new(self.plate.clone(), format!("A{}", first + 1)),
                )
            })
            .collect()
    }

    fn wash(&self, ctx: &mut RunContext<'_>, stage: &str) -> Result<()> {
        ctx.stage(stage)?;
        let supernatant = if stage == "wash-1" {
            self.sample_volume + self.bead_volume
        } else {
            self.wash_volume
        };
        ctx.paired(self.pairs(), |rec| {
            rec.pick_up_tip()
                .aspirate(supernatant, Loc::Target)
                .dispense(supernatant, Loc::Named("waste".to_string()))
                .drop_tip();
        })?;
        let wash = self.wash_volume;
        ctx.paired(self.pairs(), |rec| {
            rec.pick_up_tip()
                .aspirate(wash, Loc::Reagent("ethanol".to_string()))
                .air_gap(10.0)
                .dispense(wash + 10.0, Loc::Target)
                .drop_tip();
        })?;
        ctx.delay(0.5)
    }
}

impl Protocol for MagBeadCleanup {
    fn name(&self) -> &str {
        "mag-bead-cleanup"
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let (bead, mix_volume) = (self.bead_volume, self.sample_volume + self.bead_volume);

        ctx.stage("bind")?;
        ctx.paired(self.pairs(), |rec| {
            rec.pick_up_tip()
                .aspirate(bead, Loc::Reagent("beads".to_string()))
                .dispense(bead, Loc::Target)
                .mix(10, mix_volume * 0.8, Loc::Target)
                .touch_tip(Loc::Target)
                .single()
                .drop_tip();
        })?;
        ctx.delay(self.bind_minutes)?;
        ctx.pause("Move the sample plate onto the magnet, then confirm")?;
        ctx.delay(self.settle_minutes)?;

        self.wash(ctx, "wash-1")?;
        self.wash(ctx, "wash-2")?;

        ctx.stage("dry")?;
        let last = self.wash_volume + 10.0;
        ctx.paired(self.pairs(), |rec| {
            rec.pick_up_tip()
                .aspirate(last, Loc::Target)
                .dispense(last, Loc::Named("waste".to_string()))
                .drop_tip();
        })?;
        ctx.delay(self.dry_minutes)?;

        ctx.stage("elute")?;
        ctx.pause("Take the sample plate off the magnet, then confirm")?;
        let elution = self.elution_volume;
        ctx.paired(self.pairs(), |rec| {
            rec.pick_up_tip()
                .aspirate(elution, Loc::Reagent("elution".to_string()))
                .dispense(elution, Loc::Target)
                .mix(10, elution * 0.8, Loc::Target)
                .drop_tip();
        })?;
        ctx.delay(self.settle_minutes)?;
        ctx.pause("Move the sample plate back onto the magnet, then confirm")?;
        ctx.delay(self.settle_minutes)?;

        ctx.stage("transfer")?;
        let eluate = self.elution_volume - 2.0;
        ctx.paired(self.pairs(), |rec| {
            rec.pick_up_tip()
                .aspirate(eluate, Loc::Target)
                .dispense(eluate, Loc::TargetOn(self.output.clone()))
                .touch_tip(Loc::TargetOn(self.output.clone()))
                .single()
                .drop_tip();
        })?;
        ctx.comment("cleanup complete")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
