//! Unpacking layer archives into a root directory
//!
//! Layers are plain or gzip-compressed tar files, applied on top of each
//! other. Whiteout entries remove content contributed by lower layers:
//! `.wh.<name>` deletes `<name>`, and `.wh..wh..opq` empties its directory.

use crate::filesystem::LAYER_TEMP_PREFIX;
use ::tar::{Archive, EntryType};
use flate2::read::GzDecoder;
use std::{
    collections::HashSet,
    fs::{self, File},
    io::{self, BufReader, Read, Seek, SeekFrom},
    path::{Component, Path, PathBuf},
};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Unpack one layer archive on top of the files already in `root`
pub fn extract(root: &Path, archive_path: &Path) -> io::Result<()> {
    let mut file = File::open(archive_path)?;
    let compressed = is_gzip(&mut file)?;
    let reader = BufReader::new(file);
    if compressed {
        log::debug!("{:?} is gzip compressed", archive_path);
        unpack(root, Archive::new(GzDecoder::new(reader)))
    } else {
        unpack(root, Archive::new(reader))
    }
}

fn is_gzip(file: &mut File) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let result = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(err) => return Err(err),
    };
    file.seek(SeekFrom::Start(0))?;
    Ok(result)
}

fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn unpack<R: Read>(root: &Path, mut archive: Archive<R>) -> io::Result<()> {
    let privileged = running_as_root();
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_preserve_ownerships(privileged);
    archive.set_unpack_xattrs(false);
    archive.set_overwrite(true);

    // Paths written by this layer, which its own opaque whiteouts must keep
    let mut unpacked: HashSet<PathBuf> = HashSet::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let relative = match sanitize(&path) {
            Some(relative) => relative,
            None => {
                log::warn!("skipping tar entry outside the root, {:?}", path);
                continue;
            }
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let file_name = relative.file_name().and_then(|name| name.to_str());
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));
        match file_name {
            Some(OPAQUE_WHITEOUT) => {
                log::trace!("opaque whiteout, {:?}", parent);
                if let Some(dir) = resolve_inside(root, parent)? {
                    clear_lower(&dir, parent, &unpacked)?;
                }
                continue;
            }
            Some(name) if name.starts_with(WHITEOUT_PREFIX) => {
                let hidden = &name[WHITEOUT_PREFIX.len()..];
                log::trace!("whiteout, {:?}", parent.join(hidden));
                if let Some(dir) = resolve_inside(root, parent)? {
                    match whiteout_target(&dir, hidden) {
                        Some(target) => remove_path(&target)?,
                        None => log::warn!("skipping invalid whiteout {:?}", relative),
                    }
                }
                continue;
            }
            _ => (),
        }

        let kind = entry.header().entry_type();
        match kind {
            EntryType::Regular
            | EntryType::Continuous
            | EntryType::GNUSparse
            | EntryType::Directory
            | EntryType::Symlink
            | EntryType::Link
            | EntryType::Fifo => (),
            EntryType::Char | EntryType::Block if privileged => (),
            EntryType::Char | EntryType::Block => {
                log::warn!("skipping device node {:?}, not running as root", relative);
                continue;
            }
            _ => {
                log::error!(
                    "skipping unsupported tar file entry type {:?}, {:?}",
                    kind,
                    relative
                );
                continue;
            }
        }

        if entry.unpack_in(root)? {
            unpacked.insert(relative);
        } else {
            log::warn!("tar entry {:?} was not unpacked", path);
        }
    }
    Ok(())
}

/// Normalize an archive path to plain components relative to the root
///
/// Returns `None` for paths that would climb out of the root.
fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir => (),
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}

/// Find a directory from an earlier layer, refusing any that resolve
/// outside the root through symlinks
fn resolve_inside(root: &Path, relative: &Path) -> io::Result<Option<PathBuf>> {
    let root = fs::canonicalize(root)?;
    match fs::canonicalize(root.join(relative)) {
        Ok(dir) if dir.starts_with(&root) => Ok(Some(dir)),
        Ok(dir) => {
            log::warn!("ignoring whiteout in {:?}, resolves to {:?}", relative, dir);
            Ok(None)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// The file a whiteout hides, which must be a direct child of `dir`
fn whiteout_target(dir: &Path, hidden: &str) -> Option<PathBuf> {
    if hidden.is_empty() || hidden == "." || hidden == ".." || hidden.contains('/') {
        return None;
    }
    let target = dir.join(hidden);
    match target.parent() {
        Some(parent) if parent == dir => Some(target),
        _ => None,
    }
}

/// Remove everything in `dir` that this layer did not put there
fn clear_lower(dir: &Path, relative: &Path, keep: &HashSet<PathBuf>) -> io::Result<()> {
    for child in fs::read_dir(dir)? {
        let child = child?;
        let name = child.file_name();
        let child_relative = relative.join(&name);
        if keep.contains(&child_relative) {
            if child.file_type()?.is_dir() {
                clear_lower(&child.path(), &child_relative, keep)?;
            }
            continue;
        }
        if relative.as_os_str().is_empty()
            && name.to_string_lossy().starts_with(LAYER_TEMP_PREFIX)
        {
            continue;
        }
        remove_path(&child.path())?;
    }
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) => Err(err),
    };
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
