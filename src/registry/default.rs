//! Settings for the registry server images are pulled from

use crate::{
    errors::ConfigError,
    image::{ContentDigest, ImageName, Repository, Tag},
};
use reqwest::Url;
use std::env;

/// Where to find the registry, its token server, and its official images
///
/// [DefaultRegistry::new()] describes Docker Hub. Other public registries can
/// be described by setting the fields directly, or by [DefaultRegistry::from_url]
/// which discovers the token server from the registry's own challenge.
#[derive(Clone, Debug)]
pub struct DefaultRegistry {
    /// Base url of the registry API; `/v2/...` paths are appended to it
    pub registry_url: Url,
    /// Token endpoint; when `None` it is discovered from the registry
    pub token_url: Option<Url>,
    /// `service` parameter for token requests
    pub service: Option<String>,
    /// Use this prefix when accessing an image repository with only a single
    /// path component
    pub library_prefix: Option<Repository>,
}

impl DefaultRegistry {
    /// Return the built-in defaults, Docker Hub
    pub fn new() -> Self {
        DefaultRegistry {
            registry_url: "https://registry-1.docker.io".parse().unwrap(),
            token_url: Some("https://auth.docker.io/token".parse().unwrap()),
            service: Some("registry.docker.io".to_owned()),
            library_prefix: Some("library".parse().unwrap()),
        }
    }

    /// Settings for a registry at this url, with token server discovery
    pub fn from_url(registry_url: Url) -> Self {
        DefaultRegistry {
            registry_url,
            token_url: None,
            service: None,
            library_prefix: None,
        }
    }

    /// Built-in defaults, overridden by the environment
    ///
    /// `$MINIBOX_REGISTRY` replaces the registry url and switches to token
    /// server discovery, and `$MINIBOX_AUTH_URL` names the token server
    /// explicitly.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = match env::var("MINIBOX_REGISTRY") {
            Ok(s) => DefaultRegistry::from_url(parse_url(&s)?),
            Err(_) => DefaultRegistry::new(),
        };
        if let Ok(s) = env::var("MINIBOX_AUTH_URL") {
            settings.token_url = Some(parse_url(&s)?);
        }
        Ok(settings)
    }

    /// Determine the repository path on this registry for an image
    ///
    /// Bare names like `alpine` are placed under the library prefix when
    /// there is one, `library/alpine` on Docker Hub.
    pub fn resolve(&self, image: &ImageName) -> Repository {
        let image_repo = image.repository();
        match &self.library_prefix {
            Some(prefix) if image_repo.is_bare() => prefix.join(&image_repo),
            _ => image_repo,
        }
    }

    /// Token scope granting pull access to one repository
    pub fn pull_scope(&self, repository: &Repository) -> String {
        format!("repository:{}:pull", repository)
    }

    fn base(&self) -> &str {
        self.registry_url.as_str().trim_end_matches('/')
    }

    pub(crate) fn version_url(&self) -> String {
        format!("{}/v2/", self.base())
    }

    pub(crate) fn manifest_url(&self, repository: &Repository, tag: &Tag) -> String {
        format!("{}/v2/{}/manifests/{}", self.base(), repository, tag)
    }

    pub(crate) fn blob_url(&self, repository: &Repository, digest: &ContentDigest) -> String {
        format!("{}/v2/{}/blobs/{}", self.base(), repository, digest)
    }
}

impl Default for DefaultRegistry {
    fn default() -> Self {
        DefaultRegistry::new()
    }
}

/// Parse a url from configuration, such as an environment variable
pub fn parse_url(s: &str) -> Result<Url, ConfigError> {
    s.parse::<Url>().map_err(|err| ConfigError::InvalidUrl {
        value: s.to_owned(),
        reason: err.to_string(),
    })
}
