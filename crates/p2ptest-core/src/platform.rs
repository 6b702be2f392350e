//! Per-launch environment overrides for the supervised processes.
//!
//! Everything here is computed from a snapshot of the inherited environment
//! and returned as an override map. The orchestrator's own environment is
//! never modified.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};

/// Library search path variable on POSIX-like targets.
pub const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Binary search path variable, used for DLL lookup on windows.
pub const BINARY_PATH_VAR: &str = "PATH";

/// Append `dir` to a search path, keeping every inherited entry.
pub fn append_search_path(inherited: Option<&OsStr>, dir: &Path) -> Result<String> {
    let mut entries: Vec<PathBuf> = inherited
        .map(|value| std::env::split_paths(value).collect())
        .unwrap_or_default();
    entries.retain(|p| !p.as_os_str().is_empty());
    entries.push(dir.to_path_buf());
    join(entries)
}

/// Prepend `dirs` (in order) to a search path.
pub fn prepend_search_paths(inherited: Option<&OsStr>, dirs: &[PathBuf]) -> Result<String> {
    let mut entries = dirs.to_vec();
    if let Some(value) = inherited {
        entries.extend(std::env::split_paths(value).filter(|p| !p.as_os_str().is_empty()));
    }
    join(entries)
}

fn join(entries: Vec<PathBuf>) -> Result<String> {
    let joined = std::env::join_paths(entries)
        .map_err(|e| HarnessError::Config(format!("cannot build search path: {e}")))?;
    Ok(joined.to_string_lossy().into_owned())
}

/// Overrides that let children find shared libraries in the working
/// directory. Empty on targets without `LD_LIBRARY_PATH`.
pub fn library_path_overrides(inherited: Option<&OsStr>) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    if cfg!(unix) {
        env.insert(
            LIBRARY_PATH_VAR.to_string(),
            append_search_path(inherited, Path::new("."))?,
        );
    }
    Ok(env)
}

/// Architecture-specific binary directories below `bin_dir`.
pub fn bin_subdirs(bin_dir: &Path) -> Vec<PathBuf> {
    vec![bin_dir.join("win64"), bin_dir.join("win32")]
}

/// Overrides that put `bin_dir` on `PATH` when `shared_library` is not
/// colocated with the peer executable.
///
/// Returns an empty map when the library sits next to the executable.
/// Errors when neither location has it.
pub fn binary_path_overrides(
    peer_executable: &Path,
    shared_library: &str,
    bin_dir: &Path,
    inherited_path: Option<&OsStr>,
) -> Result<BTreeMap<String, String>> {
    let exe_dir = peer_executable
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut env = BTreeMap::new();
    if exe_dir.join(shared_library).exists() {
        return Ok(env);
    }
    if !bin_dir.is_dir() {
        return Err(HarnessError::Config(format!(
            "can't find {shared_library} next to {} or under {}",
            peer_executable.display(),
            bin_dir.display()
        )));
    }

    let bin_dir = if bin_dir.is_absolute() {
        bin_dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(bin_dir)
    };
    env.insert(
        BINARY_PATH_VAR.to_string(),
        prepend_search_paths(inherited_path, &bin_subdirs(&bin_dir))?,
    );
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn test_append_to_empty() {
        let value = append_search_path(None, Path::new(".")).unwrap();
        assert_eq!(value, ".");
    }

    #[cfg(unix)]
    #[test]
    fn test_append_keeps_inherited_entries() {
        let inherited = OsString::from("/opt/lib:/usr/local/lib");
        let value = append_search_path(Some(&inherited), Path::new(".")).unwrap();
        assert_eq!(value, "/opt/lib:/usr/local/lib:.");
    }

    #[cfg(unix)]
    #[test]
    fn test_append_skips_empty_entries() {
        let inherited = OsString::from("");
        let value = append_search_path(Some(&inherited), Path::new(".")).unwrap();
        assert_eq!(value, ".");
    }

    #[cfg(unix)]
    #[test]
    fn test_prepend_orders_dirs_first() {
        let inherited = OsString::from("/usr/bin");
        let value = prepend_search_paths(
            Some(&inherited),
            &[PathBuf::from("/b/win64"), PathBuf::from("/b/win32")],
        )
        .unwrap();
        assert_eq!(value, "/b/win64:/b/win32:/usr/bin");
    }

    #[cfg(unix)]
    #[test]
    fn test_library_overrides_on_unix() {
        let inherited = OsString::from("/opt/lib");
        let env = library_path_overrides(Some(&inherited)).unwrap();
        assert_eq!(env[LIBRARY_PATH_VAR], "/opt/lib:.");
    }

    #[test]
    fn test_binary_overrides_empty_when_colocated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("net.dll"), b"").unwrap();
        let exe = dir.path().join("test_p2p");
        let env =
            binary_path_overrides(&exe, "net.dll", Path::new("/nonexistent"), None).unwrap();
        assert!(env.is_empty());
    }

    #[test]
    fn test_binary_overrides_prepend_bin_dirs() {
        let exe_dir = tempfile::tempdir().unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        let exe = exe_dir.path().join("test_p2p");
        let env = binary_path_overrides(&exe, "net.dll", bin_dir.path(), None).unwrap();
        let path = &env[BINARY_PATH_VAR];
        let entries: Vec<PathBuf> = std::env::split_paths(path).collect();
        assert_eq!(entries, bin_subdirs(bin_dir.path()));
    }

    #[test]
    fn test_binary_overrides_error_without_bin_dir() {
        let exe_dir = tempfile::tempdir().unwrap();
        let exe = exe_dir.path().join("test_p2p");
        let missing = exe_dir.path().join("no-bin");
        let err = binary_path_overrides(&exe, "net.dll", &missing, None).unwrap_err();
        assert!(err.to_string().contains("net.dll"));
    }
}
