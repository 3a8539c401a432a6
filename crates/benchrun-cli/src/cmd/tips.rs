use crate::output::{print_json, print_table};
use anyhow::Context;
use benchrun_core::{config::LabConfig, tips::ResourceAllocator};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum TipsSubcommand {
    /// Show used and remaining tips per pool
    Show,

    /// Mark tips as replaced (all pools unless --pool is given)
    Reset {
        #[arg(long)]
        pool: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: TipsSubcommand, json: bool) -> anyhow::Result<()> {
    let config = LabConfig::load(root).context("failed to load config")?;
    let mut allocator = ResourceAllocator::from_config(&config, Some(root))?;
    allocator
        .load_persisted_state()
        .context("tips.json does not match the configured tip racks")?;

    match subcmd {
        TipsSubcommand::Show => show(&allocator, json),
        TipsSubcommand::Reset { pool } => {
            match pool.as_deref() {
                Some(name) => allocator.refill(name)?,
                None => allocator.refill_all()?,
            }
            if !json {
                println!("Refilled: {}", pool.as_deref().unwrap_or("all pools"));
            }
            show(&allocator, json)
        }
    }
}

fn show(allocator: &ResourceAllocator, json: bool) -> anyhow::Result<()> {
    let summary = allocator.summary();
    if json {
        return print_json(&summary);
    }
    let rows: Vec<Vec<String>> = summary
        .iter()
        .map(|s| {
            vec![
                s.pool.clone(),
                s.consumed.to_string(),
                (s.capacity - s.consumed).to_string(),
                s.next.clone().unwrap_or_else(|| "empty".to_string()),
            ]
        })
        .collect();
    print_table(&["POOL", "USED", "LEFT", "NEXT"], &rows);
    Ok(())
}
