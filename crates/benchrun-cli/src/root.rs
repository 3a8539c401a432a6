use benchrun_core::paths::BENCHRUN_DIR;
use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `BENCHRUN_ROOT` env var (passed in as `explicit`)
/// 2. Nearest ancestor of `cwd` holding `.benchrun/`
/// 3. Nearest ancestor of `cwd` holding `.git/`
/// 4. `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_marker(&cwd, BENCHRUN_DIR)
        .or_else(|| find_marker(&cwd, ".git"))
        .unwrap_or(cwd)
}

fn find_marker(start: &Path, marker: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(marker).is_dir())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_root(Some(dir.path())), dir.path());
    }

    #[test]
    fn finds_nearest_marker_above() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(BENCHRUN_DIR)).unwrap();
        let deep = dir.path().join("runs/2024/plate-3");
        std::fs::create_dir_all(&deep).unwrap();
        assert_eq!(find_marker(&deep, BENCHRUN_DIR).unwrap(), dir.path());
        assert!(find_marker(&deep, "no-such-marker").is_none());
    }
}
