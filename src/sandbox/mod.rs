//! Running a command confined to a materialized root filesystem
//!
//! Entering a sandbox changes the root directory of the whole process and
//! moves its future children into a new process-id namespace. Neither can be
//! undone, and both happen at most once per process.

mod builder;

pub use builder::CommandBuilder;

use crate::{
    errors::{SandboxSetupError, ScratchError},
    filesystem::{SandboxRoot, ScratchDir},
};
use std::{
    env,
    ffi::OsStr,
    io,
    os::unix::process::ExitStatusExt,
    path::Path,
    process,
    sync::atomic::{AtomicBool, Ordering},
};

static ROOT_CHANGED: AtomicBool = AtomicBool::new(false);

/// Has this process already changed its root directory?
pub fn root_changed() -> bool {
    ROOT_CHANGED.load(Ordering::SeqCst)
}

/// Make `path` the root directory of this process, and move into it
///
/// Only the first successful call in a process does anything; later calls
/// fail with [SandboxSetupError::RootAlreadyChanged]. A call the operating
/// system rejects can be tried again.
pub fn change_root(path: &Path) -> Result<(), SandboxSetupError> {
    if ROOT_CHANGED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(SandboxSetupError::RootAlreadyChanged);
    }
    if let Err(source) = std::os::unix::fs::chroot(path) {
        ROOT_CHANGED.store(false, Ordering::SeqCst);
        return Err(SandboxSetupError::RootChange {
            path: path.to_path_buf(),
            source,
        });
    }
    log::info!("changed root to {:?}", path);
    env::set_current_dir("/").map_err(SandboxSetupError::WorkingDirectory)
}

/// Put the next child of this process in a new process-id namespace
///
/// That child becomes process 1 there. The calling process itself stays
/// where it is.
pub fn new_pid_namespace() -> Result<(), SandboxSetupError> {
    if unsafe { libc::unshare(libc::CLONE_NEWPID) } != 0 {
        return Err(SandboxSetupError::PidNamespace(io::Error::last_os_error()));
    }
    log::debug!("created new pid namespace");
    Ok(())
}

/// A process that has entered an image's root filesystem
///
/// Created by [Sandbox::enter()], after which the command is run with
/// [Sandbox::command()]. The scratch directory holding the root is
/// removed by [Sandbox::close()] or when this is dropped.
pub struct Sandbox {
    scratch: ScratchDir,
}

impl Sandbox {
    /// Check the root is complete, change into it, and prepare a new
    /// process-id namespace
    pub fn enter(root: SandboxRoot) -> Result<Sandbox, SandboxSetupError> {
        root.validate()?;
        let mut scratch = root.into_scratch();
        let result = change_root(scratch.path());
        if root_changed() {
            scratch.release_for_root_change();
        }
        result?;
        new_pid_namespace()?;
        Ok(Sandbox { scratch })
    }

    /// Prepare the command to run inside the sandbox
    ///
    /// The first command started becomes process 1 of the new namespace.
    /// Once it exits the namespace is gone, and later commands fail to start.
    pub fn command<S: AsRef<OsStr>>(&self, program: S) -> CommandBuilder {
        CommandBuilder::new(program)
    }

    /// Remove the scratch directory that held the root filesystem
    pub fn close(self) -> Result<(), ScratchError> {
        self.scratch.remove()
    }
}

/// Status of an exited command
///
/// Much like [std::process::ExitStatus]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Signal that terminated the command, if any
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// Exit code to report for this status, following the shell convention
    /// of `128 + signal` for commands killed by a signal
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}

impl From<process::ExitStatus> for ExitStatus {
    fn from(status: process::ExitStatus) -> Self {
        ExitStatus {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_passthrough() {
        let status = ExitStatus::from(process::ExitStatus::from_raw(7 << 8));
        assert_eq!(status.code(), Some(7));
        assert_eq!(status.exit_code(), 7);
        assert!(!status.success());
        assert!(ExitStatus::from(process::ExitStatus::from_raw(0)).success());
    }

    #[test]
    fn signal_is_128_plus() {
        let status = ExitStatus::from(process::ExitStatus::from_raw(libc::SIGKILL));
        assert_eq!(status.code(), None);
        assert_eq!(status.signal(), Some(9));
        assert_eq!(status.exit_code(), 137);
        let status = ExitStatus::from(process::ExitStatus::from_raw(libc::SIGTERM));
        assert_eq!(status.exit_code(), 143);
    }
}
