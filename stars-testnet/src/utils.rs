use std::{
    collections::BTreeSet,
    ffi::OsString,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::PathError;

pub const DIR_PERM: u32 = 0o755;
pub const FILE_PERM: u32 = 0o644;
pub const SECRET_FILE_PERM: u32 = 0o600;

pub fn ensure_dir(dir: &Path) -> Result<(), PathError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_PERM);
    }
    builder.create(dir).map_err(|e| PathError::new("create directory", dir, e))
}

fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> Result<(), PathError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    let mut file = options.open(path).map_err(|e| PathError::new("open", path, e))?;
    file.write_all(contents).map_err(|e| PathError::new("write", path, e))?;
    // `mode` only applies on creation.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| PathError::new("set permissions on", path, e))?;
    }
    Ok(())
}

/// Writes `dir/name`, creating `dir` first.
pub fn write_file(name: &str, dir: &Path, contents: &[u8]) -> Result<PathBuf, PathError> {
    ensure_dir(dir)?;
    let path = dir.join(name);
    write_with_mode(&path, contents, FILE_PERM)?;
    Ok(path)
}

/// Like [`write_file`] but readable by the owner only.
pub fn write_secret_file(name: &str, dir: &Path, contents: &[u8]) -> Result<PathBuf, PathError> {
    ensure_dir(dir)?;
    let path = dir.join(name);
    write_with_mode(&path, contents, SECRET_FILE_PERM)?;
    Ok(path)
}

/// Pretty JSON with two-space indentation.
pub fn to_json_pretty<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(value)
}

/// Compact JSON with object keys in sorted order.
pub fn to_sorted_json<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&serde_json::to_value(value)?)
}

/// Owns the output tree for the duration of a run.
///
/// On drop the guard removes what the run created, unless
/// [`OutputDirGuard::keep`] was called. A fresh directory is removed
/// entirely. In a pre-existing directory only the top-level entries that
/// were absent at [`OutputDirGuard::acquire`] are removed.
#[derive(Debug)]
pub struct OutputDirGuard {
    path: PathBuf,
    preexisting: Option<BTreeSet<OsString>>,
    keep: bool,
}

fn top_level_entries(dir: &Path) -> Result<BTreeSet<OsString>, PathError> {
    let entries = fs::read_dir(dir).map_err(|e| PathError::new("read", dir, e))?;
    entries
        .map(|entry| entry.map(|e| e.file_name()).map_err(|e| PathError::new("read", dir, e)))
        .collect()
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

impl OutputDirGuard {
    pub fn acquire(path: &Path) -> Result<Self, PathError> {
        let preexisting = path.exists().then(|| top_level_entries(path)).transpose()?;
        ensure_dir(path)?;
        Ok(Self { path: path.to_path_buf(), preexisting, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }

    fn remove_created(&self, preexisting: &BTreeSet<OsString>) {
        let created = match top_level_entries(&self.path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("failed to list partial output: {}", e);
                return;
            }
        };
        for name in created.difference(preexisting) {
            let entry = self.path.join(name);
            match remove_entry(&entry) {
                Ok(()) => info!("removed partial output {}", entry.display()),
                Err(e) => warn!("failed to remove partial output {}: {}", entry.display(), e),
            }
        }
    }
}

impl Drop for OutputDirGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Some(preexisting) = &self.preexisting {
            self.remove_created(preexisting);
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => info!("removed partial output {}", self.path.display()),
            Err(e) => warn!("failed to remove partial output {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_removes_tree_unless_kept() {
        let root = tempfile::tempdir().unwrap();
        let dropped = root.path().join("dropped");
        {
            let guard = OutputDirGuard::acquire(&dropped).unwrap();
            write_file("a.json", &guard.path().join("nested"), b"{}").unwrap();
        }
        assert!(!dropped.exists());

        let kept = root.path().join("kept");
        let guard = OutputDirGuard::acquire(&kept).unwrap();
        write_file("a.json", guard.path(), b"{}").unwrap();
        guard.keep();
        assert!(kept.join("a.json").exists());
    }

    #[test]
    fn guard_spares_entries_that_were_already_there() {
        let root = tempfile::tempdir().unwrap();
        write_file("notes.txt", root.path(), b"mine").unwrap();
        write_file("a.json", &root.path().join("node0"), b"{}").unwrap();
        {
            let guard = OutputDirGuard::acquire(root.path()).unwrap();
            write_file("b.json", &guard.path().join("node1/starsd"), b"{}").unwrap();
            write_file("docker-compose.yml", guard.path(), b"").unwrap();
        }
        assert!(root.path().join("notes.txt").is_file());
        assert!(root.path().join("node0/a.json").is_file());
        assert!(!root.path().join("node1").exists());
        assert!(!root.path().join("docker-compose.yml").exists());
    }

    #[cfg(unix)]
    #[test]
    fn secret_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = write_secret_file("key_seed.json", dir.path(), b"{}").unwrap();
        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, SECRET_FILE_PERM);
    }

    #[test]
    fn sorted_json_orders_keys() {
        #[derive(Serialize)]
        struct Doc {
            zeta: u8,
            alpha: u8,
        }
        let bytes = to_sorted_json(&Doc { zeta: 1, alpha: 2 }).unwrap();
        assert_eq!(bytes, br#"{"alpha":2,"zeta":1}"#);
    }
}
