use crate::errors::ScratchError;
use std::{
    env,
    ffi::OsString,
    fs::{self, File, Permissions},
    io,
    os::unix::{fs::PermissionsExt, io::AsRawFd},
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// An empty, writable directory that becomes the sandbox root
///
/// The directory is removed when this is dropped or [ScratchDir::remove()]
/// is called, including after the process has changed its root into it. For
/// that case a handle on the parent directory is opened up front, since the
/// scratch path means nothing once the root has moved.
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
    parent: File,
    name: OsString,
    root_changed: bool,
    removed: bool,
}

impl ScratchDir {
    /// Create a scratch directory under the system temporary directory
    pub fn new() -> Result<Self, ScratchError> {
        ScratchDir::new_in(&env::temp_dir())
    }

    /// Create a scratch directory under `base`
    pub fn new_in(base: &Path) -> Result<Self, ScratchError> {
        let dir = tempfile::Builder::new()
            .prefix("minibox-root-")
            .tempdir_in(base)
            .map_err(ScratchError::Create)?;
        fs::set_permissions(dir.path(), Permissions::from_mode(0o755))
            .map_err(ScratchError::Create)?;
        let path = dir.path().to_path_buf();
        let parent = File::open(path.parent().unwrap_or(base)).map_err(ScratchError::Create)?;
        let name = match path.file_name() {
            Some(name) => name.to_owned(),
            None => {
                return Err(ScratchError::Create(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "scratch directory has no file name",
                )))
            }
        };
        log::debug!("created scratch directory {:?}", path);
        Ok(ScratchDir {
            dir: Some(dir),
            path,
            parent,
            name,
            root_changed: false,
            removed: false,
        })
    }

    /// Location of the directory, as seen before any root change
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Note that the process root now lives inside this directory
    ///
    /// From here on removal goes through the parent directory handle.
    pub(crate) fn release_for_root_change(&mut self) {
        if let Some(dir) = self.dir.take() {
            let _ = dir.keep();
        }
        self.root_changed = true;
    }

    /// Remove the directory and everything in it
    pub fn remove(mut self) -> Result<(), ScratchError> {
        self.remove_now().map_err(ScratchError::Remove)
    }

    fn remove_now(&mut self) -> io::Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match self.dir.take() {
            Some(dir) => dir.close(),
            None if self.root_changed => self.remove_from_parent(),
            None => fs::remove_dir_all(&self.path),
        }
    }

    fn remove_from_parent(&self) -> io::Result<()> {
        if unsafe { libc::fchdir(self.parent.as_raw_fd()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let result = fs::remove_dir_all(&self.name);
        // Back to the process root, which is unaffected by fchdir
        if let Err(err) = env::set_current_dir("/") {
            log::warn!("could not return to the root directory, {}", err);
        }
        log::debug!("removed scratch directory {:?} after root change", self.name);
        result
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(err) = self.remove_now() {
            log::warn!("could not remove scratch directory {:?}, {}", self.path, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_on_drop() {
        let base = TempDir::new().unwrap();
        let scratch = ScratchDir::new_in(base.path()).unwrap();
        let path = scratch.path().to_path_buf();
        fs::write(path.join("file"), b"data").unwrap();
        assert!(path.is_dir());
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn explicit_remove() {
        let base = TempDir::new().unwrap();
        let scratch = ScratchDir::new_in(base.path()).unwrap();
        let path = scratch.path().to_path_buf();
        fs::create_dir_all(path.join("a/b/c")).unwrap();
        scratch.remove().unwrap();
        assert!(!path.exists());
        assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[test]
    fn removal_through_parent_returns_to_root() {
        let base = TempDir::new().unwrap();
        let mut scratch = ScratchDir::new_in(base.path()).unwrap();
        let path = scratch.path().to_path_buf();
        fs::write(path.join("file"), b"data").unwrap();
        scratch.release_for_root_change();
        scratch.remove().unwrap();
        assert!(!path.exists());
        assert_eq!(env::current_dir().unwrap(), Path::new("/"));
    }

    #[test]
    fn world_readable() {
        let base = TempDir::new().unwrap();
        let scratch = ScratchDir::new_in(base.path()).unwrap();
        let mode = fs::metadata(scratch.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn missing_base_is_create_error() {
        let base = TempDir::new().unwrap();
        let result = ScratchDir::new_in(&base.path().join("missing"));
        assert!(matches!(result, Err(ScratchError::Create(_))));
    }
}
