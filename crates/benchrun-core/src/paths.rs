use crate::error::{BenchError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const BENCHRUN_DIR: &str = ".benchrun";

pub const CONFIG_FILE: &str = ".benchrun/config.yaml";
pub const TIPS_FILE: &str = ".benchrun/tips.json";
pub const STATUS_FILE: &str = ".benchrun/status.json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn benchrun_dir(root: &Path) -> PathBuf {
    root.join(BENCHRUN_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn tips_path(root: &Path) -> PathBuf {
    root.join(TIPS_FILE)
}

pub fn status_path(root: &Path) -> PathBuf {
    root.join(STATUS_FILE)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

fn name_re() -> Option<&'static Regex> {
    NAME_RE
        .get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]*[a-z0-9]$|^[a-z0-9]$"))
        .as_ref()
        .ok()
}

/// Validate a pool, labware or reagent name used as a key in config and
/// persisted state.
pub fn validate_name(name: &str) -> Result<()> {
    let matches = name_re().is_some_and(|re| re.is_match(name));
    if name.is_empty() || name.len() > 64 || !matches {
        return Err(BenchError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
