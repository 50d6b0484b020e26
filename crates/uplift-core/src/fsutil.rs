//! Crash-safe filesystem primitives shared by the stager, vault and apply
//! engine.
//!
//! Single files are replaced by writing a temporary sibling, fsyncing it and
//! renaming it over the destination, so a reader sees either the old or the
//! new content. Directory entries are fsynced after renames.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use uplift_common::{Error, RelPath, Result};
use walkdir::WalkDir;

fn temp_sibling(path: &Path, tag: &str) -> Result<PathBuf> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::disk(path, std::io::Error::other("path has no parent directory")))?;
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    Ok(dir.join(format!(".{}.{}.{}", name, tag, std::process::id())))
}

/// fsync a directory so renames inside it are durable.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let handle = File::open(dir).map_err(|e| Error::disk(dir, e))?;
        handle.sync_all().map_err(|e| Error::disk(dir, e))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::disk(parent, e))?;
    }
    let tmp_path = temp_sibling(path, "tmp")?;

    let written = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::disk(&tmp_path, e));
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::disk(path, e));
    }

    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Atomically replace `dest` with a copy of `src`, keeping `src`'s mode bits.
pub fn replace_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::disk(parent, e))?;
    }
    let tmp_path = temp_sibling(dest, "new")?;

    let copied = fs::copy(src, &tmp_path).and_then(|_| {
        let file = OpenOptions::new().write(true).open(&tmp_path)?;
        file.sync_all()
    });
    if let Err(e) = copied {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::disk(dest, e));
    }

    if let Err(e) = fs::rename(&tmp_path, dest) {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::disk(dest, e));
    }
    Ok(())
}

/// Copy `src` to `dest` (plain copy plus fsync), creating parents.
pub fn copy_file(src: &Path, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::disk(parent, e))?;
    }
    let bytes = fs::copy(src, dest).map_err(|e| Error::disk(dest, e))?;
    File::open(dest)
        .and_then(|f| f.sync_all())
        .map_err(|e| Error::disk(dest, e))?;
    Ok(bytes)
}

/// Write `bytes` to a fresh file, creating parents.
pub fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::disk(parent, e))?;
    }
    let mut file = File::create(path).map_err(|e| Error::disk(path, e))?;
    file.write_all(bytes).map_err(|e| Error::disk(path, e))?;
    file.sync_all().map_err(|e| Error::disk(path, e))
}

/// Remove a directory tree if it exists.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::disk(path, e)),
    }
}

/// Remove a file if it exists. Returns whether it existed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::disk(path, e)),
    }
}

/// All regular files under `root` as release-relative paths, sorted.
///
/// A missing root yields an empty list. Symlinks are not followed.
pub fn list_files(root: &Path) -> Result<Vec<RelPath>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            Error::disk(path, e.into())
        })?;
        if entry.file_type().is_file() {
            out.push(RelPath::from_path_under(root, entry.path())?);
        }
    }
    out.sort();
    Ok(out)
}

/// Remove empty directories below `dir` (deepest first), never `dir` itself.
pub fn prune_empty_dirs(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| Error::disk(dir, e.into()))?;
        if entry.file_type().is_dir() {
            dirs.insert(entry.into_path());
        }
    }

    let mut removed = 0;
    // Reverse lexical order visits children before their parents.
    for path in dirs.iter().rev() {
        let empty = fs::read_dir(path)
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if empty {
            fs::remove_dir(path).map_err(|e| Error::disk(path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Whether `name` is a `replace_file` temporary (`.<name>.new.<pid>`).
fn is_replace_temp(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('.') else {
        return false;
    };
    match rest.rsplit_once('.') {
        Some((stem, pid)) => {
            !pid.is_empty() && pid.bytes().all(|b| b.is_ascii_digit()) && stem.ends_with(".new")
        }
        None => false,
    }
}

/// Delete temporaries left behind by a `replace_file` that never finished,
/// skipping `skip` and everything below it. Returns how many were removed.
pub fn remove_stale_temps(root: &Path, skip: &Path) -> Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.path() != skip);
    for entry in walker {
        let entry = entry.map_err(|e| Error::disk(root, e.into()))?;
        let stale = entry.file_type().is_file()
            && entry.file_name().to_str().is_some_and(is_replace_temp);
        if stale && remove_file_if_exists(entry.path())? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Rename `from` to `to` and fsync the parent of `to`.
pub fn rename_durable(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| Error::disk(to, e))?;
    if let Some(parent) = to.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}
