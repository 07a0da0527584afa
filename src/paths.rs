use anyhow::bail;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static SKILLGATE_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Per-workspace state directory name.
pub const STATE_DIR_NAME: &str = ".skillgate";

/// Returns the Skillgate home directory (`~/.skillgate/`).
/// Supports `$SKILLGATE_HOME` env override. Cached via `OnceLock`.
pub fn skillgate_home() -> &'static PathBuf {
    SKILLGATE_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("SKILLGATE_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".skillgate")
    })
}

/// `~/.skillgate/config/`: global fallback for skills.yaml / profiles.yaml.
pub fn global_config_dir() -> PathBuf {
    skillgate_home().join("config")
}

/// `~/.skillgate/logs/`
pub fn logs_dir() -> PathBuf {
    skillgate_home().join("logs")
}

/// `<workspace>/.skillgate/`: session state, lock file, workspace config.
pub fn workspace_state_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join(STATE_DIR_NAME)
}

/// Locate a config file: `<workspace>/.skillgate/<name>` first, then
/// `~/.skillgate/config/<name>`. Returns None when neither exists.
pub fn find_config_file(workspace_root: &Path, name: &str) -> Option<PathBuf> {
    let ws = workspace_state_dir(workspace_root).join(name);
    if ws.exists() {
        return Some(ws);
    }
    let global = global_config_dir().join(name);
    if global.exists() {
        return Some(global);
    }
    None
}

/// Vector store artifact path: `$VECTOR_STORE` override, else
/// `<workspace>/.skillgate/vector_store.json`.
pub fn vector_store_path(workspace_root: &Path) -> PathBuf {
    if let Ok(val) = std::env::var("VECTOR_STORE") {
        if !val.is_empty() {
            return PathBuf::from(val);
        }
    }
    workspace_state_dir(workspace_root).join("vector_store.json")
}

/// Resolve the workspace root that owns the session state. An explicit
/// `--root` wins but must exist, since enforcement is keyed on it. Otherwise
/// the nearest ancestor of the current directory carrying a workspace marker
/// is used, so hooks fired from a subdirectory land on the same session
/// files; a bare directory is its own root.
pub fn resolve_workspace_root(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(root) = explicit {
        if !root.is_dir() {
            bail!("workspace root {} is not a directory", root.display());
        }
        return Ok(root);
    }
    let cwd = std::env::current_dir()?;
    Ok(workspace_marker_root(&cwd).unwrap_or(cwd))
}

/// Nearest ancestor (including `start`) that already holds a `.skillgate/`
/// state dir or is a `.git` checkout root. The state dir is checked first:
/// a nested crate with its own sessions must not inherit the outer repo's.
fn workspace_marker_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(STATE_DIR_NAME).is_dir() || dir.join(".git").exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_root_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let ok = resolve_workspace_root(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(ok, dir.path());
        assert!(resolve_workspace_root(Some(dir.path().join("missing"))).is_err());
    }

    #[test]
    fn test_marker_root_finds_git_checkout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(workspace_marker_root(&nested).unwrap(), dir.path());
    }

    #[test]
    fn test_marker_root_finds_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR_NAME)).unwrap();
        let nested = dir.path().join("pkg");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(workspace_marker_root(&nested).unwrap(), dir.path());
    }

    #[test]
    fn test_nearest_marker_wins() {
        // An inner workspace with its own state dir must not inherit the
        // outer git repo's sessions.
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let inner = dir.path().join("vendor/tool");
        std::fs::create_dir_all(inner.join(STATE_DIR_NAME)).unwrap();
        assert_eq!(workspace_marker_root(&inner).unwrap(), inner);
    }

    #[test]
    fn test_no_marker_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(workspace_marker_root(dir.path()).is_none());
    }
}
