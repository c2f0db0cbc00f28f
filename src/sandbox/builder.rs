use crate::{errors::ChildExecError, sandbox::ExitStatus};
use std::{
    ffi::{OsStr, OsString},
    process::{Command, Stdio},
};

/// Setup for the sandboxed command, starting at
/// [crate::Sandbox::command()] and ending with [CommandBuilder::status()]
///
/// The command inherits stdin, stdout, stderr, and the environment of the
/// calling process, plus any variables added here.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: OsString,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl CommandBuilder {
    pub(crate) fn new<S: AsRef<OsStr>>(program: S) -> Self {
        CommandBuilder {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument to the command line
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Append arguments to the command line
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Add or replace one environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .push((key.as_ref().to_owned(), val.as_ref().to_owned()));
        self
    }

    /// Add or replace several environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, val) in vars {
            self = self.env(key, val);
        }
        self
    }

    /// Start the command and wait for it to terminate
    pub fn status(self) -> Result<ExitStatus, ChildExecError> {
        let program = self.program.to_string_lossy().into_owned();
        log::debug!("starting {:?} with args {:?}", program, self.args);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| ChildExecError::from_spawn(&program, err))?;
        log::debug!("{:?} started, host pid {}", program, child.id());
        let status = child.wait().map_err(ChildExecError::Wait)?;
        log::info!("{:?} exited, {}", program, status);
        Ok(status.into())
    }
}
