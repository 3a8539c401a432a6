use crate::console::ConsoleOperator;
use crate::output::print_json;
use anyhow::Context;
use benchrun_core::{
    config::{LabConfig, WarnLevel},
    handler::{Priming, SimulatedHandler},
    operator::{AutoOperator, Operator},
    protocol::MagBeadCleanup,
    run::{run_protocol, Protocol, RunContext, RunOptions},
    watchdog::{self, Watchdog},
};
use std::path::Path;
use std::time::Duration;

pub fn run(
    root: &Path,
    start_at: Option<String>,
    skip_delays: bool,
    yes: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = LabConfig::load(root).context("failed to load config")?;
    let errors: Vec<String> = config
        .validate()
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .map(|w| w.message)
        .collect();
    if !errors.is_empty() {
        anyhow::bail!(
            "config has errors, run 'benchrun config validate':\n  {}",
            errors.join("\n  ")
        );
    }

    let protocol = MagBeadCleanup::default();
    let mut handler = Priming::new(
        SimulatedHandler::new(config.run.pair_offset),
        config.run.prime_before_aspirate,
    );
    let mut operator: Box<dyn Operator> = if yes {
        Box::new(AutoOperator::default())
    } else {
        Box::new(ConsoleOperator::new(std::io::stdin().lock()))
    };
    let options = RunOptions {
        start_at,
        skip_delays,
        state_root: Some(root.to_path_buf()),
    };
    let watchdog = Watchdog::start(
        Duration::from_secs(config.run.watchdog_minutes * 60),
        watchdog::exit_process(),
    );

    let result = {
        let mut ctx = RunContext::new(&config, protocol.name(), &mut handler, operator.as_mut(), options)
            .context("failed to prepare run")?
            .with_watchdog(watchdog);
        run_protocol(&protocol, &mut ctx)
    };

    let calls = handler.into_inner().into_calls();
    if json {
        print_json(&calls)?;
    } else {
        for call in &calls {
            println!("{call}");
        }
    }

    result.context("run failed")
}
