use std::fs::{self, File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use fs4::FileExt;

use crate::paths;

/// The advisory lock over the shared package cache. Held for the lifetime of
/// a verify run; package directories under `<home>/packages` may only be
/// mutated while it is held.
#[derive(Debug)]
pub struct RegistryLock {
    _file: File,
}

impl RegistryLock {
    pub fn acquire(home: &Path) -> Result<RegistryLock> {
        let path = paths::registry_lock_file(home);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("failed to lock {}", path.display()))?;
        Ok(RegistryLock { _file: file })
    }
}
