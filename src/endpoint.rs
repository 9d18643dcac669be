//! Naming and discovery of mascot endpoints.
//!
//! Every running mascot listens on `<namespace>/gopher.<pid>`. On Unix the
//! namespace is a directory of socket files (`/tmp` by default); on Windows it
//! is the named pipe namespace `\\.\pipe\`, whose entries vanish with their
//! owner and therefore never need removing.

use std::io;
use std::path::{Path, PathBuf};

pub const ENDPOINT_PREFIX: &str = "gopher.";

#[cfg(unix)]
pub fn default_namespace_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

#[cfg(windows)]
pub fn default_namespace_dir() -> PathBuf {
    PathBuf::from(r"\\.\pipe\")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    dir: PathBuf,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(default_namespace_dir())
    }
}

impl Namespace {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn endpoint_for(&self, pid: u32) -> PathBuf {
        self.dir.join(format!("{ENDPOINT_PREFIX}{pid}"))
    }

    pub fn current_process(&self) -> PathBuf {
        self.endpoint_for(std::process::id())
    }

    /// All entries in the namespace that follow the naming convention, sorted.
    /// Liveness is not checked here; dead entries surface as send failures.
    pub fn discover(&self) -> io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_endpoint_name(name) {
                found.push(self.dir.join(name));
            }
        }
        found.sort();
        Ok(found)
    }
}

fn is_endpoint_name(name: &str) -> bool {
    name.len() > ENDPOINT_PREFIX.len() && name.starts_with(ENDPOINT_PREFIX)
}

/// Remove the registration of an endpoint whose owner is gone.
#[cfg(unix)]
pub fn remove_stale(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(windows)]
pub fn remove_stale(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
pub fn is_socket(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::FileTypeExt;
    Ok(std::fs::symlink_metadata(path)?.file_type().is_socket())
}

#[cfg(windows)]
pub fn is_socket(_path: &Path) -> io::Result<bool> {
    Ok(true)
}
