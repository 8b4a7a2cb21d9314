//! Thin, contextful wrappers over the filesystem operations the engine
//! performs. Writes always go through a temp file so partially-written
//! artifacts are never observed.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use loam_domain::Time;
use tempfile::NamedTempFile;

pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

pub fn read_utf8(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage a write in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to stage {}", path.display()))?;
    persist(tmp, path).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn persist(tmp: NamedTempFile, dest: &Path) -> io::Result<()> {
    match tmp.persist(dest) {
        Ok(_) => Ok(()),
        Err(err) if is_cross_device(&err.error) => {
            let mut reader = err.file.reopen()?;
            let mut writer = File::create(dest)?;
            io::copy(&mut reader, &mut writer)?;
            err.file.close().ok();
            Ok(())
        }
        Err(err) => Err(err.error),
    }
}

pub fn mtime(path: &Path) -> Result<Time> {
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(Time::from_system(modified))
}

/// Names of the immediate subdirectories of `path`; empty when `path` does
/// not exist.
pub fn list_dirs(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in
        fs::read_dir(path).with_context(|| format!("failed to list {}", path.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

pub fn remove_file_quiet(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Move a directory into place, falling back to a recursive copy when the
/// rename crosses filesystems.
pub fn move_dir(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device(&err) => copy_dir(src, dest),
        Err(err) => {
            Err(err).with_context(|| format!("failed to move {} into place", dest.display()))
        }
    }
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("failed to list {}", src.display()))? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy {}", target.display()))?;
        }
    }
    Ok(())
}

fn is_cross_device(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(18))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_writes_land_and_replace() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested/dir/out.dat");
        write_atomic(&path, b"first").unwrap();
        assert_eq!(read_bytes(&path).unwrap(), b"first");
        write_atomic(&path, b"second").unwrap();
        assert_eq!(read_bytes(&path).unwrap(), b"second");
    }

    #[test]
    fn mtime_is_stable_for_an_untouched_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("manifest.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(mtime(&path).unwrap(), mtime(&path).unwrap());
        assert!(mtime(&temp.path().join("missing")).is_err());
    }

    #[test]
    fn list_dirs_skips_files() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("1.0.0")).unwrap();
        fs::create_dir(temp.path().join("2.0.0")).unwrap();
        fs::write(temp.path().join("stray.txt"), b"x").unwrap();
        assert_eq!(list_dirs(temp.path()).unwrap(), vec!["1.0.0", "2.0.0"]);
        assert!(list_dirs(&temp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn move_dir_carries_nested_content() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("staging");
        fs::create_dir_all(src.join("src/Json")).unwrap();
        fs::write(src.join("src/Json/Decode.elm"), b"module Json.Decode").unwrap();
        let dest = temp.path().join("packages/elm/json/1.1.3");
        move_dir(&src, &dest).unwrap();
        assert!(dest.join("src/Json/Decode.elm").exists());
        assert!(!src.exists());
    }
}
