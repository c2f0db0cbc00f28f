use crate::{
    errors::{LayerError, LayerFailure, SandboxSetupError, ScratchError},
    filesystem::{tar, ScratchDir},
    image::ContentDigest,
};
use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};
use tempfile::TempPath;
use tokio::task;

/// A downloaded layer blob waiting to be extracted
///
/// The file lives inside the root it will be extracted into, and is deleted
/// when this is dropped.
#[derive(Debug)]
pub struct LayerArchive {
    pub(crate) digest: ContentDigest,
    pub(crate) path: TempPath,
    pub(crate) size: u64,
}

impl LayerArchive {
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    /// Bytes received for this blob
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A root filesystem under construction, one layer at a time
pub struct RootBuilder {
    scratch: ScratchDir,
    expected: usize,
    applied: usize,
}

impl RootBuilder {
    /// Start building a root that needs `expected` layers
    pub fn new(scratch: ScratchDir, expected: usize) -> Self {
        RootBuilder {
            scratch,
            expected,
            applied: 0,
        }
    }

    pub fn path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Extract the next layer on top of everything applied so far, then
    /// delete its archive
    pub async fn apply(&mut self, archive: LayerArchive) -> Result<(), LayerError> {
        let LayerArchive { digest, path, size } = archive;
        let root = self.path().to_path_buf();
        log::info!(
            "extracting layer {} of {}, {} ({} bytes)",
            self.applied + 1,
            self.expected,
            digest,
            size
        );
        let path = task::spawn_blocking(move || tar::extract(&root, &path).map(|()| path))
            .await
            .map_err(|err| LayerError::new(&digest, err.into()))?
            .map_err(|err| LayerError::new(&digest, LayerFailure::Extract(err)))?;
        path.close()
            .map_err(|err| LayerError::new(&digest, LayerFailure::Cleanup(err)))?;
        self.applied += 1;
        Ok(())
    }

    /// Stop building, with however many layers made it in
    pub fn finish(self) -> SandboxRoot {
        SandboxRoot {
            scratch: self.scratch,
            expected: self.expected,
            applied: self.applied,
        }
    }
}

/// The materialized root filesystem of an image
///
/// Only a complete root, with every layer of its manifest applied, passes
/// [SandboxRoot::validate()] and can be entered.
pub struct SandboxRoot {
    scratch: ScratchDir,
    expected: usize,
    applied: usize,
}

impl SandboxRoot {
    pub fn path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_complete(&self) -> bool {
        self.applied == self.expected
    }

    /// Check that this root can be entered
    pub fn validate(&self) -> Result<(), SandboxSetupError> {
        if !self.is_complete() {
            return Err(SandboxSetupError::IncompleteRoot {
                applied: self.applied,
                expected: self.expected,
            });
        }
        if !self.path().is_dir() {
            return Err(SandboxSetupError::NotADirectory(self.path().to_path_buf()));
        }
        Ok(())
    }

    /// Copy a file from the host to the same absolute path inside this root
    ///
    /// Parent directories are created as needed and permission bits are
    /// kept, so helper binaries stay executable. Returns the destination on
    /// the host side.
    pub fn copy_from_host(&self, host_path: &Path) -> Result<PathBuf, ScratchError> {
        let copy_error = |source| ScratchError::Copy {
            path: host_path.to_path_buf(),
            source,
        };
        if !host_path.is_absolute() {
            return Err(copy_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "host path must be absolute",
            )));
        }
        let mut dest = self.path().to_path_buf();
        for component in host_path.components() {
            match component {
                Component::RootDir => (),
                Component::Normal(part) => dest.push(part),
                _ => {
                    return Err(copy_error(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "host path must not contain relative components",
                    )))
                }
            }
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(copy_error)?;
        }
        fs::copy(host_path, &dest).map_err(copy_error)?;
        log::debug!("copied {:?} into the root filesystem", host_path);
        Ok(dest)
    }

    pub(crate) fn into_scratch(self) -> ScratchDir {
        self.scratch
    }
}
