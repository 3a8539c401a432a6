use anyhow::Context;
use benchrun_core::{config::LabConfig, io, paths, tips::ResourceAllocator};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bench".to_string());

    println!("Initializing benchrun in: {}", root.display());

    // 1. State directory
    let dir = paths::benchrun_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    // 2. config.yaml if missing
    let config = if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
        LabConfig::load(root).context("failed to load existing config.yaml")?
    } else {
        let cfg = LabConfig::new(&project_name);
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
        cfg
    };

    // 3. tips.json with every tip available, if missing
    if paths::tips_path(root).exists() {
        println!("  exists:  {}", paths::TIPS_FILE);
    } else {
        let allocator = ResourceAllocator::from_config(&config, Some(root))
            .context("config does not describe valid tip pools")?;
        allocator.persist().context("failed to write tips.json")?;
        println!("  created: {}", paths::TIPS_FILE);
    }

    println!("\nbenchrun initialized. Edit {} to describe your deck.", paths::CONFIG_FILE);
    Ok(())
}
