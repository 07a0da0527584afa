use crate::errors::Result;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

static PROCESS_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

/// In-process mutex keyed on the normalised workspace state dir. Same-process
/// writers serialise here; cross-process writers serialise on the OS advisory
/// lock below.
pub fn process_lock_for(state_dir: &Path) -> Arc<Mutex<()>> {
    let key = state_dir
        .canonicalize()
        .unwrap_or_else(|_| state_dir.to_path_buf());
    let registry = PROCESS_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap_or_else(|e| e.into_inner());
    map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
}

/// OS advisory lock on `<state_dir>/.lock`. Held for the duration of a
/// read-modify-write; closing the descriptor on drop releases the flock.
struct FileLock {
    _file: File,
}

impl FileLock {
    fn acquire(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(".lock");
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        lock_exclusive(&file)?;
        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> Result<()> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> Result<()> {
    Ok(())
}

/// Run `f` with the workspace's in-process mutex and OS advisory lock held.
/// Readers do not need this; writers must not touch session files outside it.
pub fn with_workspace_lock<T>(state_dir: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    // The dir must exist before the mutex key is derived, so the same
    // canonical path is used on first and later acquisitions.
    std::fs::create_dir_all(state_dir)?;
    let mutex = process_lock_for(state_dir);
    let _guard = mutex.lock().unwrap_or_else(|e| e.into_inner());
    let _file = FileLock::acquire(state_dir)?;
    f()
}
