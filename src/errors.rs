//! Error types you might see while pulling an image or running a sandbox

use crate::image::{ContentDigest, ImageName};
use reqwest::{StatusCode, Url};
use std::{fmt, io, path::PathBuf};
use thiserror::Error;

/// Errors parsing an image reference or one of its components
#[derive(Error, Debug)]
pub enum ReferenceError {
    /// invalid image reference format
    #[error("invalid image reference format: {0:?}")]
    InvalidReferenceFormat(String),
}

/// Errors in registry client configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// the http client could not be constructed
    #[error("http client could not be constructed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// a configured url did not parse
    #[error("invalid url {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },

    /// the async runtime for network requests could not be started
    #[error("async runtime could not be started: {0}")]
    Runtime(#[source] io::Error),
}

/// Errors while creating, populating, or removing the scratch root directory
#[derive(Error, Debug)]
pub enum ScratchError {
    /// could not create the scratch directory
    #[error("could not create scratch directory: {0}")]
    Create(#[source] io::Error),

    /// could not copy a host file into the scratch root
    #[error("could not copy {path:?} into the root filesystem: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// could not remove the scratch directory
    #[error("could not remove scratch directory: {0}")]
    Remove(#[source] io::Error),
}

/// Errors while obtaining a registry token
#[derive(Error, Debug)]
pub enum AuthError {
    /// network request error
    #[error("network request error: {0}")]
    NetworkRequest(#[from] reqwest::Error),

    /// token server answered with a non-success status
    #[error("token server returned {status} for {url}")]
    Status { status: StatusCode, url: Url },

    /// token response body could not be decoded
    #[error("token response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    /// token response had neither `token` nor `access_token`
    #[error("token response contained no token")]
    MissingToken,

    /// registry server requested an unsupported type of authentication
    #[error("registry server requested an unsupported type of authentication: {0:?}")]
    UnsupportedAuthentication(String),

    /// registry answered its version check with an unexpected status
    #[error("registry version check returned {status} for {url}")]
    Challenge { status: StatusCode, url: Url },

    /// token realm would downgrade an https registry to plain http
    #[error("token server {realm} would downgrade registry {registry} to plain http")]
    InsecureRealm { realm: Url, registry: Url },
}

/// Errors while retrieving or decoding an image manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    /// network request error
    #[error("network request error: {0}")]
    NetworkRequest(#[from] reqwest::Error),

    /// registry refused the bearer token
    #[error("registry refused authorization ({0})")]
    Unauthorized(StatusCode),

    /// no manifest exists for this tag
    #[error("no manifest found for {0}")]
    UnknownTag(ImageName),

    /// registry answered with another non-success status
    #[error("registry returned {status} for {url}")]
    Status { status: StatusCode, url: Url },

    /// manifest body could not be decoded
    #[error("manifest could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    /// only v2 schema2 image manifests are supported
    #[error("unsupported manifest, schema version {schema_version}, media type {media_type:?}")]
    UnsupportedManifest {
        schema_version: u32,
        media_type: Option<String>,
    },
}

/// A specific layer could not be materialized
#[derive(Error, Debug)]
#[error("layer {digest}: {reason}")]
pub struct LayerError {
    pub digest: ContentDigest,
    #[source]
    pub reason: LayerFailure,
}

impl LayerError {
    pub(crate) fn new(digest: &ContentDigest, reason: LayerFailure) -> Self {
        LayerError {
            digest: digest.clone(),
            reason,
        }
    }
}

/// What went wrong with one layer
#[derive(Error, Debug)]
pub enum LayerFailure {
    /// blob download failed in transit
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    /// blob server answered with a non-success status
    #[error("blob server returned {0}")]
    Status(StatusCode),

    /// an expired token could not be replaced
    #[error("token renewal failed: {0}")]
    Token(#[from] AuthError),

    /// temporary archive file could not be created or written
    #[error("temporary file error: {0}")]
    TempFile(#[source] io::Error),

    /// archive could not be unpacked
    #[error("extraction failed: {0}")]
    Extract(#[source] io::Error),

    /// temporary archive file could not be removed
    #[error("temporary file cleanup failed: {0}")]
    Cleanup(#[source] io::Error),

    /// asynchronous layer task failed
    #[error("layer task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// The operating system rejected entering the sandbox
#[derive(Error, Debug)]
pub enum SandboxSetupError {
    /// not every manifest layer made it into the root
    #[error("root filesystem is incomplete, {applied} of {expected} layers applied")]
    IncompleteRoot { applied: usize, expected: usize },

    /// root path is missing or not a directory
    #[error("root filesystem {0:?} is not a directory")]
    NotADirectory(PathBuf),

    /// this process has already changed its filesystem root
    #[error("filesystem root has already been changed in this process")]
    RootAlreadyChanged,

    /// chroot was rejected
    #[error("changing root to {path:?} was rejected: {source}")]
    RootChange {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// could not move into the new root
    #[error("could not enter the new root directory: {0}")]
    WorkingDirectory(#[source] io::Error),

    /// unshare(CLONE_NEWPID) was rejected
    #[error("creating a new process-id namespace was rejected: {0}")]
    PidNamespace(#[source] io::Error),
}

/// The sandboxed command could not be started or waited on
#[derive(Error, Debug)]
pub enum ChildExecError {
    /// command does not exist inside the root
    #[error("command not found: {0:?}")]
    NotFound(String),

    /// command exists but may not be executed
    #[error("command is not executable: {0:?}")]
    PermissionDenied(String),

    /// any other spawn failure
    #[error("failed to start {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// waiting for the child failed
    #[error("failed waiting for the command: {0}")]
    Wait(#[source] io::Error),
}

impl ChildExecError {
    pub(crate) fn from_spawn(command: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ChildExecError::NotFound(command.to_owned()),
            io::ErrorKind::PermissionDenied => ChildExecError::PermissionDenied(command.to_owned()),
            _ => ChildExecError::Spawn {
                command: command.to_owned(),
                source: err,
            },
        }
    }
}

/// Pipeline stage where a failure happened
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Stage {
    Configure,
    ParseReference,
    PrepareRoot,
    Authenticate,
    FetchManifest,
    MaterializeLayers,
    SandboxSetup,
    Exec,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Configure => "configuration",
            Stage::ParseReference => "parsing image reference",
            Stage::PrepareRoot => "preparing root directory",
            Stage::Authenticate => "registry authentication",
            Stage::FetchManifest => "manifest fetch",
            Stage::MaterializeLayers => "layer materialization",
            Stage::SandboxSetup => "sandbox setup",
            Stage::Exec => "command execution",
        })
    }
}

/// Any failure that ends the pull-and-run pipeline before the child's own
/// exit status is known
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Scratch(#[from] ScratchError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    SandboxSetup(#[from] SandboxSetupError),

    #[error(transparent)]
    ChildExec(#[from] ChildExecError),
}

impl PipelineError {
    /// Which stage of the pipeline failed
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Config(_) => Stage::Configure,
            PipelineError::Reference(_) => Stage::ParseReference,
            PipelineError::Scratch(_) => Stage::PrepareRoot,
            PipelineError::Auth(_) => Stage::Authenticate,
            PipelineError::Manifest(_) => Stage::FetchManifest,
            PipelineError::Layer(_) => Stage::MaterializeLayers,
            PipelineError::SandboxSetup(_) => Stage::SandboxSetup,
            PipelineError::ChildExec(_) => Stage::Exec,
        }
    }

    /// Process exit code reported for this failure
    ///
    /// | failure | code |
    /// |---|---|
    /// | invalid configuration or image reference | 2 |
    /// | authentication | 121 |
    /// | manifest | 122 |
    /// | layer | 123 |
    /// | scratch directory | 124 |
    /// | sandbox setup | 125 |
    /// | command not executable | 126 |
    /// | command not found | 127 |
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) | PipelineError::Reference(_) => 2,
            PipelineError::Auth(_) => 121,
            PipelineError::Manifest(_) => 122,
            PipelineError::Layer(_) => 123,
            PipelineError::Scratch(_) => 124,
            PipelineError::SandboxSetup(_) => 125,
            PipelineError::ChildExec(ChildExecError::NotFound(_)) => 127,
            PipelineError::ChildExec(_) => 126,
        }
    }
}
