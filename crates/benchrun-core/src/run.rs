//! Run context and protocol driver.
//!
//! `RunContext` is the only path from a protocol to the hardware. Every
//! physical action goes through it so stages before a resume point are
//! walked with their bookkeeping but without motion.

use crate::config::{LabConfig, RunConfig};
use crate::deck::{Deck, Location, Mount};
use crate::error::{BenchError, Result};
use crate::handler::{Addr, LiquidHandler, SimulatedHandler};
use crate::operator::{AutoOperator, ControlHandle, LogObserver, Operator, WaitEvent, WaitObserver};
use crate::paired::{PairedSession, Recorder};
use crate::reagent::DepletablePool;
use crate::stage::{StageController, StageRecord};
use crate::status::{RunStatus, StatusBoard};
use crate::tips::{ConsumableUnit, ResourceAllocator};
use crate::watchdog::Watchdog;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Stage name that never occurs in a protocol; used to walk every stage
/// with side effects suppressed.
const DRY_WALK_POINT: &str = "\u{0}dry-walk";

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stage to resume from; earlier stages are walked but not executed.
    pub start_at: Option<String>,
    /// Overrides `run.skip_delays` from the config when set.
    pub skip_delays: bool,
    /// Project root for `tips.json` and `status.json`. `None` keeps all
    /// state in memory.
    pub state_root: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Everything involved in waiting on the operator.
struct Gate<'a> {
    operator: &'a mut dyn Operator,
    observers: Vec<Box<dyn WaitObserver + 'a>>,
    board: StatusBoard,
    watchdog: Option<Watchdog>,
}

impl Gate<'_> {
    fn notify(&mut self, event: WaitEvent) {
        for obs in &mut self.observers {
            obs.on_wait(&event);
        }
    }

    fn begin(&mut self, reason: &str) -> Result<()> {
        self.board.waiting(reason)?;
        if let Some(dog) = &self.watchdog {
            dog.suspend();
        }
        self.notify(WaitEvent::Begin {
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.notify(WaitEvent::End);
        if let Some(dog) = &self.watchdog {
            dog.resume();
        }
        self.board.running()
    }

    fn hold(&mut self, control: &ControlHandle) -> Result<()> {
        self.begin("pause requested")?;
        control.wait_while_paused();
        self.end()
    }
}

impl Operator for Gate<'_> {
    fn acknowledge(&mut self, prompt: &str) -> Result<()> {
        self.begin(prompt)?;
        let answer = self.operator.acknowledge(prompt);
        self.end()?;
        answer
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

pub struct RunContext<'a> {
    controller: StageController,
    allocator: ResourceAllocator,
    reagents: BTreeMap<String, DepletablePool>,
    deck: Deck,
    options: RunConfig,
    handler: &'a mut dyn LiquidHandler,
    gate: Gate<'a>,
    control: ControlHandle,
    held: BTreeMap<Mount, ConsumableUnit>,
    sleep: fn(Duration),
}

impl<'a> RunContext<'a> {
    pub fn new(
        config: &LabConfig,
        protocol: &str,
        handler: &'a mut dyn LiquidHandler,
        operator: &'a mut dyn Operator,
        options: RunOptions,
    ) -> Result<Self> {
        let mut run = config.run.clone();
        run.skip_delays |= options.skip_delays;
        let status = RunStatus::new(protocol, options.start_at.clone());
        Ok(Self {
            controller: StageController::new(options.start_at),
            allocator: ResourceAllocator::from_config(config, options.state_root.as_deref())?,
            reagents: config.reagent_pools()?,
            deck: config.deck(),
            options: run,
            handler,
            gate: Gate {
                operator,
                observers: vec![Box::new(LogObserver) as Box<dyn WaitObserver + 'a>],
                board: StatusBoard::new(options.state_root, status),
                watchdog: None,
            },
            control: ControlHandle::default(),
            held: BTreeMap::new(),
            sleep: std::thread::sleep,
        })
    }

    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Self {
        self.gate.watchdog = Some(watchdog);
        self
    }

    pub fn with_control(mut self, control: ControlHandle) -> Self {
        self.control = control;
        self
    }

    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn WaitObserver + 'a>) {
        self.gate.observers.push(observer);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn controller(&self) -> &StageController {
        &self.controller
    }

    pub fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut ResourceAllocator {
        &mut self.allocator
    }

    pub fn reagent(&self, name: &str) -> Result<&DepletablePool> {
        self.reagents
            .get(name)
            .ok_or_else(|| BenchError::UnknownReagent(name.to_string()))
    }

    pub fn reagents(&self) -> &BTreeMap<String, DepletablePool> {
        &self.reagents
    }

    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    pub fn options(&self) -> &RunConfig {
        &self.options
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn status(&self) -> &RunStatus {
        self.gate.board.status()
    }

    pub fn held(&self, mount: Mount) -> Option<&ConsumableUnit> {
        self.held.get(&mount)
    }

    pub fn is_executing(&self) -> bool {
        self.controller.is_executing()
    }

    /// Height that clears every loaded labware by the safety margin.
    pub fn safe_height(&self) -> f64 {
        self.deck.tallest_mm() + self.options.safety_clearance_mm
    }

    // -----------------------------------------------------------------------
    // Stages, pauses, delays
    // -----------------------------------------------------------------------

    /// Enter a stage. Honors a pending operator pause first. Returns whether
    /// the stage's side effects run.
    pub fn stage(&mut self, name: &str) -> Result<bool> {
        if self.control.is_pause_requested() {
            self.gate.hold(&self.control)?;
        }
        let executing = self.controller.enter(name);
        if let Some(dog) = &self.gate.watchdog {
            dog.kick(name);
        }
        self.gate.board.stage(name, self.allocator.summary())?;
        if executing {
            self.handler.comment(&format!("stage {name}"))?;
        }
        Ok(executing)
    }

    /// Block until the operator confirms `reason`.
    pub fn pause(&mut self, reason: &str) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        self.gate.acknowledge(reason)
    }

    /// Wait `minutes`, or hand the wait to the operator when delays are
    /// skipped.
    pub fn delay(&mut self, minutes: f64) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        if self.options.skip_delays {
            return self.pause(&format!("{minutes} min delay skipped: confirm to continue"));
        }
        info!(minutes, "delay");
        if let Some(dog) = &self.gate.watchdog {
            dog.suspend();
        }
        (self.sleep)(Duration::from_secs_f64(minutes.max(0.0) * 60.0));
        if let Some(dog) = &self.gate.watchdog {
            dog.resume();
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tips
    // -----------------------------------------------------------------------

    /// Pick up the next tip from the mount's pool. The tip is only marked
    /// used once the handler reports the pick-up done.
    pub fn pick_up(&mut self, mount: Mount) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        if self.held.contains_key(&mount) {
            return Err(BenchError::TipState {
                mount: mount.to_string(),
                reason: "already holds a tip".to_string(),
            });
        }
        let pool = self.allocator.pool_for(mount)?.to_string();
        let unit = self.allocator.peek(&pool, &mut self.gate)?;
        self.handler.pick_up_tip(mount, &unit.location()?)?;
        self.allocator.commit(&pool, &unit.id)?;
        self.held.insert(
            mount,
            ConsumableUnit {
                available: false,
                ..unit
            },
        );
        Ok(())
    }

    pub fn drop_tip(&mut self, mount: Mount) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        let Some(unit) = self.held.remove(&mount) else {
            // Picked up in a stage walked before the resume point; the
            // mounts were homed bare, so there is nothing to drop.
            if self.controller.resume_point().is_some() {
                debug!(mount = %mount, "no tip held after resume, skipping drop");
                return Ok(());
            }
            return Err(BenchError::TipState {
                mount: mount.to_string(),
                reason: "holds no tip".to_string(),
            });
        };
        let trash = self.deck.resolve("trash")?.clone();
        self.handler.drop_tip(mount, &trash)?;
        self.allocator.release(&unit);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Liquid
    // -----------------------------------------------------------------------

    /// Draw `volume` of a reagent into `mount`'s tip, spread over as many
    /// sources as needed. Suppressed stages only do the bookkeeping.
    pub fn draw_reagent(&mut self, mount: Mount, reagent: &str, volume: f64) -> Result<()> {
        let executing = self.is_executing();
        let pool = self
            .reagents
            .get_mut(reagent)
            .ok_or_else(|| BenchError::UnknownReagent(reagent.to_string()))?;
        if !executing {
            return pool.use_without_executing(volume);
        }
        let plan = pool.plan_extraction(volume)?;
        for step in plan.into_iter().filter(|e| e.amount > 0.0) {
            self.handler
                .aspirate(Addr::Single(mount), step.amount, &step.location, Some(step.depth))?;
        }
        Ok(())
    }

    pub fn aspirate(&mut self, addr: Addr, volume: f64, location: &Location) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        self.handler.aspirate(addr, volume, location, None)
    }

    pub fn dispense(&mut self, addr: Addr, volume: f64, location: &Location) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        self.handler.dispense(addr, volume, location)
    }

    pub fn mix(&mut self, addr: Addr, repetitions: u32, volume: f64, location: &Location) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        self.handler.mix(addr, repetitions, volume, location)
    }

    pub fn air_gap(&mut self, addr: Addr, volume: f64) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        self.handler.air_gap(addr, volume)
    }

    pub fn touch_tip(&mut self, addr: Addr, location: &Location) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        self.handler.touch_tip(addr, location)
    }

    pub fn move_to(&mut self, addr: Addr, location: &Location, z: f64) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        self.handler.move_to(addr, location, z)
    }

    pub fn retract(&mut self, mount: Mount, z: f64) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        self.handler.retract(mount, z)
    }

    pub fn comment(&mut self, text: &str) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }
        self.handler.comment(text)
    }

    pub fn check_pairing(&self, primary: &Location, secondary: &Location) -> Result<()> {
        self.handler.check_pairing(primary, secondary)
    }

    /// Record commands once and replay them over `pairs`, left mount on the
    /// first location of each pair.
    pub fn paired(
        &mut self,
        pairs: Vec<(Location, Location)>,
        record: impl FnOnce(&mut Recorder),
    ) -> Result<()> {
        let mut session = PairedSession::new(pairs);
        record(session.record());
        session.replay(self)
    }

    // -----------------------------------------------------------------------
    // End of run
    // -----------------------------------------------------------------------

    fn log_trace(&self) {
        for rec in self.controller.trace() {
            info!(
                stage = %rec.name,
                index = rec.index,
                executed = rec.executed,
                "trace"
            );
        }
    }

    fn finish(&mut self, outcome: Option<&BenchError>) -> Result<()> {
        if let Some(mut dog) = self.gate.watchdog.take() {
            dog.disarm();
        }
        for (mount, unit) in &self.held {
            warn!(mount = %mount, tip = %unit.id, "run ended with a tip still attached");
        }
        self.gate
            .board
            .finish(outcome.map(|e| e.to_string()), self.allocator.summary())
    }
}

// ---------------------------------------------------------------------------
// Protocol / setup steps
// ---------------------------------------------------------------------------

pub type SetupFn = fn(&mut RunContext<'_>) -> Result<()>;

/// One named setup action, run in list order before the protocol body.
#[derive(Clone, Copy)]
pub struct SetupStep {
    pub name: &'static str,
    pub run: SetupFn,
}

pub trait Protocol {
    fn name(&self) -> &str;

    fn setup(&self) -> Vec<SetupStep> {
        standard_setup()
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<()>;
}

pub fn standard_setup() -> Vec<SetupStep> {
    vec![
        SetupStep {
            name: "restore-consumables",
            run: restore_consumables,
        },
        SetupStep {
            name: "check-deck",
            run: check_deck,
        },
        SetupStep {
            name: "home",
            run: home,
        },
    ]
}

fn restore_consumables(ctx: &mut RunContext<'_>) -> Result<()> {
    if !ctx.allocator.load_persisted_state()? {
        ctx.allocator.persist()?;
    }
    for row in ctx.allocator.summary() {
        info!(pool = %row.pool, consumed = row.consumed, capacity = row.capacity, "consumables");
    }
    Ok(())
}

fn check_deck(ctx: &mut RunContext<'_>) -> Result<()> {
    ctx.deck.resolve("trash")?;
    for pool in ctx.reagents.values() {
        for source in pool.sources() {
            ctx.deck.check(&source.location)?;
        }
    }
    for mount in [Mount::Left, Mount::Right] {
        if let Ok(pool) = ctx.allocator.pool_for(mount) {
            if let Some(unit) = ctx.allocator.pool(pool)?.units().first() {
                ctx.deck.check(&unit.location()?)?;
            }
        }
    }
    Ok(())
}

/// Raise both mounts clear of the deck. Runs even when resuming.
fn home(ctx: &mut RunContext<'_>) -> Result<()> {
    let z = ctx.safe_height();
    for mount in [Mount::Left, Mount::Right] {
        ctx.handler.retract(mount, z)?;
    }
    Ok(())
}

/// Run setup, the protocol, and the resume-point check, then write the
/// final status.
pub fn run_protocol(protocol: &dyn Protocol, ctx: &mut RunContext<'_>) -> Result<()> {
    info!(protocol = protocol.name(), resume_point = ?ctx.controller.resume_point(), "run starting");
    let result = drive(protocol, ctx);
    if let Err(e) = &result {
        error!(stage = ?ctx.controller.current(), "run failed: {e}");
    }
    let finished = ctx.finish(result.as_ref().err());
    result.and(finished)
}

fn drive(protocol: &dyn Protocol, ctx: &mut RunContext<'_>) -> Result<()> {
    for step in protocol.setup() {
        debug!(step = step.name, "setup");
        (step.run)(ctx)?;
    }
    protocol.run(ctx)?;
    ctx.log_trace();
    ctx.controller.assert_resume_point_seen()?;
    info!(stages = ctx.controller.trace().len(), "run finished");
    Ok(())
}

/// Walk the protocol with every side effect suppressed and return the stage
/// trace. Nothing is written to disk.
pub fn dry_walk(protocol: &dyn Protocol, config: &LabConfig) -> Result<Vec<StageRecord>> {
    let mut handler = SimulatedHandler::new(config.run.pair_offset);
    let mut operator = AutoOperator::default();
    let options = RunOptions {
        start_at: Some(DRY_WALK_POINT.to_string()),
        skip_delays: true,
        state_root: None,
    };
    let mut ctx = RunContext::new(config, protocol.name(), &mut handler, &mut operator, options)?;
    protocol.run(&mut ctx)?;
    Ok(ctx.controller.trace().to_vec())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
