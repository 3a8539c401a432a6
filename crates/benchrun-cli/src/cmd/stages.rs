use crate::output::print_json;
use anyhow::Context;
use benchrun_core::{config::LabConfig, protocol::MagBeadCleanup, run::dry_walk};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = LabConfig::load(root).context("failed to load config")?;
    let trace = dry_walk(&MagBeadCleanup::default(), &config)
        .context("failed to walk protocol stages")?;

    if json {
        let names: Vec<&str> = trace.iter().map(|r| r.name.as_str()).collect();
        return print_json(&names);
    }
    for rec in &trace {
        println!("{:>2}. {}", rec.index + 1, rec.name);
    }
    Ok(())
}
