//! Record-once, replay-per-pair command coordination for the two mounts.
//!
//! Commands are recorded against symbolic locations and replayed for every
//! target pair that has not been done yet. When the layout lets both mounts
//! reach their targets in one motion, each command is issued once for both;
//! otherwise each mount runs the whole list alone while the other waits
//! above the deck.

use crate::deck::{Location, Mount};
use crate::error::{BenchError, Result};
use crate::handler::Addr;
use crate::run::RunContext;
use std::collections::BTreeSet;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Loc
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Loc {
    /// The mount's own target from the current pair.
    Target,
    /// The target's well on another piece of labware.
    TargetOn(String),
    /// A named deck location, the same for both mounts.
    Named(String),
    Trash,
    /// Draw from a reagent pool; only valid for aspirate.
    Reagent(String),
}

impl Loc {
    /// Whether the secondary's location is derived from its own target.
    fn follows_target(&self) -> bool {
        matches!(self, Loc::Target | Loc::TargetOn(_))
    }

    fn resolve(&self, ctx: &RunContext<'_>, target: &Location) -> Result<Location> {
        match self {
            Loc::Target => Ok(target.clone()),
            Loc::TargetOn(labware) => {
                let loc = Location::new(labware.clone(), target.well.clone());
                ctx.deck().check(&loc)?;
                Ok(loc)
            }
            Loc::Named(name) => Ok(ctx.deck().resolve(name)?.clone()),
            Loc::Trash => Ok(ctx.deck().resolve("trash")?.clone()),
            Loc::Reagent(name) => Err(BenchError::UnresolvedLocation(format!(
                "reagent '{name}' can only be aspirated from"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Command / Recorder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PickUpTip,
    DropTip,
    Aspirate { volume: f64, loc: Loc },
    Dispense { volume: f64, loc: Loc },
    Mix { repetitions: u32, volume: f64, loc: Loc },
    AirGap { volume: f64 },
    TouchTip { loc: Loc },
    MoveTo { loc: Loc, z: f64 },
    Comment { text: String },
}

impl Command {
    /// Whether one paired call can stand in for both mounts.
    fn pairable(&self) -> bool {
        match self {
            Command::PickUpTip | Command::DropTip => false,
            Command::Aspirate { loc, .. }
            | Command::Dispense { loc, .. }
            | Command::Mix { loc, .. }
            | Command::TouchTip { loc }
            | Command::MoveTo { loc, .. } => loc.follows_target(),
            Command::AirGap { .. } | Command::Comment { .. } => true,
        }
    }

    fn loc(&self) -> Option<&Loc> {
        match self {
            Command::Aspirate { loc, .. }
            | Command::Dispense { loc, .. }
            | Command::Mix { loc, .. }
            | Command::TouchTip { loc }
            | Command::MoveTo { loc, .. } => Some(loc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub command: Command,
    /// Run once per mount even when the pair could move together.
    pub single: bool,
}

#[derive(Debug, Default)]
pub struct Recorder {
    commands: Vec<CommandRecord>,
}

impl Recorder {
    pub fn commands(&self) -> &[CommandRecord] {
        &self.commands
    }

    fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(CommandRecord {
            command,
            single: false,
        });
        self
    }

    /// Mark the last recorded command as single-mount.
    pub fn single(&mut self) -> &mut Self {
        if let Some(last) = self.commands.last_mut() {
            last.single = true;
        }
        self
    }

    pub fn pick_up_tip(&mut self) -> &mut Self {
        self.push(Command::PickUpTip)
    }

    pub fn drop_tip(&mut self) -> &mut Self {
        self.push(Command::DropTip)
    }

    pub fn aspirate(&mut self, volume: f64, loc: Loc) -> &mut Self {
        self.push(Command::Aspirate { volume, loc })
    }

    pub fn dispense(&mut self, volume: f64, loc: Loc) -> &mut Self {
        self.push(Command::Dispense { volume, loc })
    }

    pub fn mix(&mut self, repetitions: u32, volume: f64, loc: Loc) -> &mut Self {
        self.push(Command::Mix {
            repetitions,
            volume,
            loc,
        })
    }

    pub fn air_gap(&mut self, volume: f64) -> &mut Self {
        self.push(Command::AirGap { volume })
    }

    pub fn touch_tip(&mut self, loc: Loc) -> &mut Self {
        self.push(Command::TouchTip { loc })
    }

    pub fn move_to(&mut self, loc: Loc, z: f64) -> &mut Self {
        self.push(Command::MoveTo { loc, z })
    }

    pub fn comment(&mut self, text: impl Into<String>) -> &mut Self {
        self.push(Command::Comment { text: text.into() })
    }
}

// ---------------------------------------------------------------------------
// PairedSession
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PairedSession {
    primary: Mount,
    secondary: Mount,
    pairs: Vec<(Location, Location)>,
    completed: BTreeSet<Location>,
    recorder: Recorder,
}

impl PairedSession {
    /// Left mount on the first location of each pair, right on the second.
    pub fn new(pairs: Vec<(Location, Location)>) -> Self {
        Self {
            primary: Mount::Left,
            secondary: Mount::Right,
            pairs,
            completed: BTreeSet::new(),
            recorder: Recorder::default(),
        }
    }

    pub fn record(&mut self) -> &mut Recorder {
        &mut self.recorder
    }

    pub fn completed(&self) -> &BTreeSet<Location> {
        &self.completed
    }

    /// Treat `location` as already processed; its pair will be skipped.
    pub fn mark_completed(&mut self, location: Location) {
        self.completed.insert(location);
    }

    /// Run the recorded commands for every untouched pair.
    pub fn replay(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        if self.recorder.commands.is_empty() {
            return Err(BenchError::EmptyRecording);
        }
        self.check_locations(ctx)?;

        for (a, b) in self.pairs.clone() {
            if self.completed.contains(&a) || self.completed.contains(&b) {
                debug!(primary = %a, secondary = %b, "pair already done");
                continue;
            }
            match ctx.check_pairing(&a, &b) {
                Ok(()) => self.run_paired(ctx, &a, &b)?,
                Err(BenchError::PairingUnavailable { reason, .. }) => {
                    info!(primary = %a, secondary = %b, %reason, "cannot pair, running mounts one at a time");
                    self.run_serial(ctx, &a, &b)?;
                }
                Err(e) => return Err(e),
            }
            self.completed.insert(a);
            self.completed.insert(b);
        }
        Ok(())
    }

    /// Resolve fixed locations up front so a bad name fails before any
    /// motion.
    fn check_locations(&self, ctx: &RunContext<'_>) -> Result<()> {
        for rec in &self.recorder.commands {
            match rec.command.loc() {
                Some(Loc::Named(name)) => {
                    ctx.deck().resolve(name)?;
                }
                Some(Loc::Trash) => {
                    ctx.deck().resolve("trash")?;
                }
                Some(Loc::TargetOn(labware)) => {
                    ctx.deck().labware(labware)?;
                }
                Some(Loc::Reagent(name)) => {
                    if !matches!(rec.command, Command::Aspirate { .. }) {
                        return Err(BenchError::UnresolvedLocation(format!(
                            "reagent '{name}' can only be aspirated from"
                        )));
                    }
                    ctx.reagent(name)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn run_paired(&self, ctx: &mut RunContext<'_>, a: &Location, b: &Location) -> Result<()> {
        let both = Addr::Paired {
            primary: self.primary,
            secondary: self.secondary,
        };
        let each = [(self.primary, a), (self.secondary, b)];
        let cmds = &self.recorder.commands;
        let mut i = 0;
        while i < cmds.len() {
            let rec = &cmds[i];
            // Aspirate + air gap stay together on one mount at a time.
            let gap = cmds
                .get(i + 1)
                .filter(|next| matches!(next.command, Command::AirGap { .. }))
                .filter(|_| matches!(rec.command, Command::Aspirate { .. }));
            if let Some(gap) = gap {
                for (mount, target) in each {
                    execute(ctx, &rec.command, Addr::Single(mount), target)?;
                    execute(ctx, &gap.command, Addr::Single(mount), target)?;
                }
                i += 2;
                continue;
            }
            if rec.single || !rec.command.pairable() {
                for (mount, target) in each {
                    execute(ctx, &rec.command, Addr::Single(mount), target)?;
                }
            } else {
                execute(ctx, &rec.command, both, a)?;
            }
            i += 1;
        }
        Ok(())
    }

    fn run_serial(&self, ctx: &mut RunContext<'_>, a: &Location, b: &Location) -> Result<()> {
        let safe = ctx.safe_height();
        for (mount, target) in [(self.primary, a), (self.secondary, b)] {
            ctx.retract(mount.other(), safe)?;
            for rec in &self.recorder.commands {
                execute(ctx, &rec.command, Addr::Single(mount), target)?;
            }
        }
        Ok(())
    }
}

fn execute(ctx: &mut RunContext<'_>, command: &Command, addr: Addr, target: &Location) -> Result<()> {
    match command {
        Command::PickUpTip => {
            for mount in addr.mounts() {
                ctx.pick_up(mount)?;
            }
            Ok(())
        }
        Command::DropTip => {
            for mount in addr.mounts() {
                ctx.drop_tip(mount)?;
            }
            Ok(())
        }
        Command::Aspirate {
            volume,
            loc: Loc::Reagent(name),
        } => {
            for mount in addr.mounts() {
                ctx.draw_reagent(mount, name, *volume)?;
            }
            Ok(())
        }
        Command::Aspirate { volume, loc } => {
            let at = loc.resolve(ctx, target)?;
            ctx.aspirate(addr, *volume, &at)
        }
        Command::Dispense { volume, loc } => {
            let at = loc.resolve(ctx, target)?;
            ctx.dispense(addr, *volume, &at)
        }
        Command::Mix {
            repetitions,
            volume,
            loc,
        } => {
            let at = loc.resolve(ctx, target)?;
            ctx.mix(addr, *repetitions, *volume, &at)
        }
        Command::AirGap { volume } => ctx.air_gap(addr, *volume),
        Command::TouchTip { loc } => {
            let at = loc.resolve(ctx, target)?;
            ctx.touch_tip(addr, &at)
        }
        Command::MoveTo { loc, z } => {
            let at = loc.resolve(ctx, target)?;
            ctx.move_to(addr, &at, *z)
        }
        Command::Comment { text } => ctx.comment(text),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabConfig;
    use crate::handler::{HandlerCall, SimulatedHandler};
    use crate::operator::AutoOperator;
    use crate::run::RunOptions;

    fn loc(s: &str) -> Location {
        s.parse().unwrap()
    }

    fn pair(a: &str, b: &str) -> (Location, Location) {
        (loc(a), loc(b))
    }

    /// Replay `session` in a fresh in-memory run and return the handler
    /// calls.
    fn replay(mut session: PairedSession) -> Result<Vec<HandlerCall>> {
        let cfg = LabConfig::new("bench");
        let mut handler = SimulatedHandler::new(cfg.run.pair_offset);
        let mut operator = AutoOperator::default();
        {
            let mut ctx = RunContext::new(&cfg, "test", &mut handler, &mut operator, RunOptions::default())?;
            session.replay(&mut ctx)?;
        }
        Ok(handler.into_calls())
    }

    fn transfer(session: &mut PairedSession) {
        session
            .record()
            .pick_up_tip()
            .aspirate(20.0, Loc::Target)
            .air_gap(5.0)
            .single()
            .dispense(25.0, Loc::TargetOn("eluate".to_string()))
            .drop_tip();
    }

    fn single(mount: Mount) -> Addr {
        Addr::Single(mount)
    }

    #[test]
    fn pairable_targets_move_together() {
        let mut session = PairedSession::new(vec![pair("samples:A1", "samples:A2")]);
        transfer(&mut session);
        let calls = replay(session).unwrap();
        let both = Addr::Paired {
            primary: Mount::Left,
            secondary: Mount::Right,
        };
        assert_eq!(
            calls,
            vec![
                HandlerCall::PickUpTip {
                    mount: Mount::Left,
                    tip: loc("tips-left:A1")
                },
                HandlerCall::PickUpTip {
                    mount: Mount::Right,
                    tip: loc("tips-right:A1")
                },
                HandlerCall::Aspirate {
                    addr: single(Mount::Left),
                    volume: 20.0,
                    location: loc("samples:A1"),
                    depth: None
                },
                HandlerCall::AirGap {
                    addr: single(Mount::Left),
                    volume: 5.0
                },
                HandlerCall::Aspirate {
                    addr: single(Mount::Right),
                    volume: 20.0,
                    location: loc("samples:A2"),
                    depth: None
                },
                HandlerCall::AirGap {
                    addr: single(Mount::Right),
                    volume: 5.0
                },
                HandlerCall::Dispense {
                    addr: both,
                    volume: 25.0,
                    location: loc("eluate:A1")
                },
                HandlerCall::DropTip {
                    mount: Mount::Left,
                    location: loc("trash:A1")
                },
                HandlerCall::DropTip {
                    mount: Mount::Right,
                    location: loc("trash:A1")
                },
            ]
        );
    }

    #[test]
    fn unpairable_targets_fall_back_to_serial_with_safety_moves() {
        let mut session = PairedSession::new(vec![pair("samples:A1", "samples:A3")]);
        transfer(&mut session);
        let calls = replay(session).unwrap();
        let safe = 82.0 + 10.0;

        assert_eq!(calls.len(), 12);
        let (left, right) = calls.split_at(6);
        assert_eq!(
            left[0],
            HandlerCall::Retract {
                mount: Mount::Right,
                z: safe
            }
        );
        assert_eq!(
            right[0],
            HandlerCall::Retract {
                mount: Mount::Left,
                z: safe
            }
        );
        for (seq, mount, target, dest) in [
            (left, Mount::Left, "samples:A1", "eluate:A1"),
            (right, Mount::Right, "samples:A3", "eluate:A3"),
        ] {
            assert!(matches!(&seq[1], HandlerCall::PickUpTip { mount: m, .. } if *m == mount));
            assert_eq!(
                seq[2],
                HandlerCall::Aspirate {
                    addr: single(mount),
                    volume: 20.0,
                    location: loc(target),
                    depth: None
                }
            );
            assert_eq!(
                seq[3],
                HandlerCall::AirGap {
                    addr: single(mount),
                    volume: 5.0
                }
            );
            assert_eq!(
                seq[4],
                HandlerCall::Dispense {
                    addr: single(mount),
                    volume: 25.0,
                    location: loc(dest)
                }
            );
            assert!(matches!(&seq[5], HandlerCall::DropTip { mount: m, .. } if *m == mount));
        }
    }

    #[test]
    fn fixed_locations_are_issued_per_mount() {
        let mut session = PairedSession::new(vec![pair("samples:A1", "samples:A2")]);
        session
            .record()
            .aspirate(10.0, Loc::Target)
            .dispense(10.0, Loc::Named("waste".to_string()))
            .touch_tip(Loc::Target)
            .single();
        let calls = replay(session).unwrap();
        let addrs: Vec<String> = calls
            .iter()
            .map(|c| match c {
                HandlerCall::Aspirate { addr, .. }
                | HandlerCall::Dispense { addr, .. }
                | HandlerCall::TouchTip { addr, .. } => addr.to_string(),
                other => panic!("unexpected call {other:?}"),
            })
            .collect();
        assert_eq!(addrs, vec!["left+right", "left", "right", "left", "right"]);
        assert!(matches!(
            &calls[1],
            HandlerCall::Dispense { location, .. } if *location == loc("reservoir:A12")
        ));
        assert!(matches!(
            &calls[4],
            HandlerCall::TouchTip { location, .. } if *location == loc("samples:A2")
        ));
    }

    #[test]
    fn reagent_draws_plan_per_mount() {
        let mut session = PairedSession::new(vec![pair("samples:A1", "samples:A2")]);
        session
            .record()
            .aspirate(50.0, Loc::Reagent("beads".to_string()))
            .dispense(50.0, Loc::Target);
        let calls = replay(session).unwrap();
        let draws: Vec<(String, f64)> = calls
            .iter()
            .filter_map(|c| match c {
                HandlerCall::Aspirate {
                    addr,
                    volume,
                    depth: Some(_),
                    location,
                } if location.labware == "reservoir" => Some((addr.to_string(), *volume)),
                _ => None,
            })
            .collect();
        assert_eq!(
            draws,
            vec![("left".to_string(), 50.0), ("right".to_string(), 50.0)]
        );
    }

    #[test]
    fn completed_pairs_are_skipped() {
        let mut session = PairedSession::new(vec![
            pair("samples:A1", "samples:A2"),
            pair("samples:A3", "samples:A4"),
        ]);
        session.record().mix(3, 50.0, Loc::Target);
        session.mark_completed(loc("samples:A2"));
        let calls = replay(session).unwrap();
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            &calls[0],
            HandlerCall::Mix { location, .. } if *location == loc("samples:A3")
        ));
    }

    #[test]
    fn empty_recording_is_fatal() {
        let session = PairedSession::new(vec![pair("samples:A1", "samples:A2")]);
        assert!(matches!(replay(session), Err(BenchError::EmptyRecording)));
    }

    #[test]
    fn unknown_named_location_is_fatal_before_motion() {
        let mut session = PairedSession::new(vec![pair("samples:A1", "samples:A2")]);
        session
            .record()
            .pick_up_tip()
            .dispense(10.0, Loc::Named("nowhere".to_string()));
        assert!(matches!(
            replay(session),
            Err(BenchError::UnresolvedLocation(_))
        ));
    }

    #[test]
    fn unknown_target_labware_is_fatal_before_motion() {
        let mut session = PairedSession::new(vec![pair("samples:A1", "samples:A2")]);
        session
            .record()
            .pick_up_tip()
            .aspirate(10.0, Loc::Target)
            .dispense(10.0, Loc::TargetOn("no-such-plate".to_string()));
        let cfg = LabConfig::new("bench");
        let mut handler = SimulatedHandler::new(cfg.run.pair_offset);
        let mut operator = AutoOperator::default();
        {
            let mut ctx =
                RunContext::new(&cfg, "test", &mut handler, &mut operator, RunOptions::default()).unwrap();
            assert!(matches!(
                session.replay(&mut ctx),
                Err(BenchError::UnknownLabware(ref name)) if name == "no-such-plate"
            ));
            assert_eq!(ctx.allocator().pool("left").unwrap().consumed(), 0);
        }
        assert!(handler.calls().is_empty());
    }

    #[test]
    fn reagent_outside_aspirate_is_fatal() {
        let mut session = PairedSession::new(vec![pair("samples:A1", "samples:A2")]);
        session
            .record()
            .dispense(10.0, Loc::Reagent("beads".to_string()));
        assert!(matches!(
            replay(session),
            Err(BenchError::UnresolvedLocation(_))
        ));
    }
}
