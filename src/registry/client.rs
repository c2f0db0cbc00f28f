//! Support for downloading container images from a registry server

use crate::{
    errors::{AuthError, ConfigError, LayerError, LayerFailure, ManifestError, PipelineError},
    filesystem::{LayerArchive, RootBuilder, SandboxRoot, ScratchDir, LAYER_TEMP_PREFIX},
    image::{ContentDigest, ImageName, Repository},
    manifest::{media_types, Link, Manifest},
    registry::{auth, ClientBuilder, DefaultRegistry, Token},
};
use futures_util::{stream, StreamExt};
use http::header::HeaderValue;
use reqwest::{header, StatusCode};
use std::{
    future::Future,
    path::Path,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{io::AsyncWriteExt, task};

/// Registry clients pull images from one registry into a root directory
///
/// Each client carries network settings and the registry to talk to. Nothing
/// is cached between pulls.
#[derive(Clone)]
pub struct Client {
    req: reqwest::Client,
    registry: DefaultRegistry,
    max_concurrent_downloads: usize,
}

impl Client {
    /// Layer downloads in flight at once, unless configured otherwise
    pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 3;

    /// Construct a new registry client with default options
    pub fn new() -> Result<Client, ConfigError> {
        Client::builder().build()
    }

    /// Construct a registry client with custom options, via ClientBuilder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Return the default `User-Agent` that we use if no other is set
    pub fn default_user_agent() -> HeaderValue {
        static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
        HeaderValue::from_static(USER_AGENT)
    }

    /// Return the default registry server
    ///
    /// This is Docker Hub, unless overridden by `$MINIBOX_REGISTRY` or
    /// `$MINIBOX_AUTH_URL`. See [DefaultRegistry::from_env()].
    pub fn default_registry() -> Result<DefaultRegistry, ConfigError> {
        DefaultRegistry::from_env()
    }

    pub(crate) fn from_parts(
        req: reqwest::Client,
        registry: DefaultRegistry,
        max_concurrent_downloads: usize,
    ) -> Self {
        Client {
            req,
            registry,
            max_concurrent_downloads,
        }
    }

    /// The registry this client pulls from
    pub fn registry(&self) -> &DefaultRegistry {
        &self.registry
    }

    /// Obtain a pull-scoped token for an image's repository
    pub async fn authenticate(&self, image: &ImageName) -> Result<Token, AuthError> {
        let repository = self.registry.resolve(image);
        auth::authenticate(&self.req, &self.registry, &repository).await
    }

    async fn renew_if_expired(
        &self,
        repository: &Repository,
        token: Token,
    ) -> Result<Token, AuthError> {
        if token.is_expired() {
            log::debug!("token for {} expired, requesting a new one", repository);
            auth::authenticate(&self.req, &self.registry, repository).await
        } else {
            Ok(token)
        }
    }

    /// Retrieve the manifest for an image's tag
    pub async fn fetch_manifest(
        &self,
        image: &ImageName,
        token: &Token,
    ) -> Result<Manifest, ManifestError> {
        let repository = self.registry.resolve(image);
        let manifest_url = self.registry.manifest_url(&repository, &image.tag());
        log::info!("{} <{}> downloading manifest...", image, manifest_url);

        let request = self
            .req
            .get(&manifest_url)
            .header(header::ACCEPT, media_types::MANIFEST);
        let response = token.include_in(request).send().await?;
        match response.status() {
            status if status.is_success() => (),
            status @ StatusCode::UNAUTHORIZED | status @ StatusCode::FORBIDDEN => {
                return Err(ManifestError::Unauthorized(status))
            }
            StatusCode::NOT_FOUND => return Err(ManifestError::UnknownTag(image.clone())),
            status => {
                return Err(ManifestError::Status {
                    status,
                    url: response.url().clone(),
                })
            }
        }

        let body = response.bytes().await?;
        log::trace!("raw json manifest, {}", String::from_utf8_lossy(&body));
        let manifest = Manifest::from_slice(&body)?;
        log::debug!(
            "{} has {} layers, {} bytes",
            image,
            manifest.layers.len(),
            manifest.layers_size()
        );
        Ok(manifest)
    }

    /// Download one layer blob into a temporary file inside `root`
    async fn download_layer(
        &self,
        repository: &Repository,
        link: &Link,
        token: Token,
        root: &Path,
    ) -> Result<LayerArchive, LayerError> {
        let fail = |reason: LayerFailure| LayerError::new(&link.digest, reason);

        let token = self
            .renew_if_expired(repository, token)
            .await
            .map_err(|err| fail(err.into()))?;
        let blob_url = self.registry.blob_url(repository, &link.digest);
        log::info!("{} downloading {} bytes ...", link.digest, link.size);

        let mut response = token
            .include_in(self.req.get(&blob_url))
            .send()
            .await
            .map_err(|err| fail(err.into()))?;
        if !response.status().is_success() {
            return Err(fail(LayerFailure::Status(response.status())));
        }

        let prefix = format!("{}{}-", LAYER_TEMP_PREFIX, link.digest.short_hex());
        let (file, path) = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tar")
            .tempfile_in(root)
            .map_err(|err| fail(LayerFailure::TempFile(err)))?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut size = 0;
        while let Some(chunk) = response.chunk().await.map_err(|err| fail(err.into()))? {
            file.write_all(&chunk)
                .await
                .map_err(|err| fail(LayerFailure::TempFile(err)))?;
            size += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|err| fail(LayerFailure::TempFile(err)))?;
        log::debug!("{} downloaded, {} bytes", link.digest, size);

        Ok(LayerArchive {
            digest: link.digest.clone(),
            path,
            size,
        })
    }

    /// Download one layer and extract it on top of a root under construction
    ///
    /// The token is renewed first if it has expired.
    pub async fn materialize_layer(
        &self,
        image: &ImageName,
        link: &Link,
        token: &Token,
        root: &mut RootBuilder,
    ) -> Result<(), LayerError> {
        let repository = self.registry.resolve(image);
        let root_path = root.path().to_path_buf();
        let archive = self
            .download_layer(&repository, link, token.clone(), &root_path)
            .await?;
        root.apply(archive).await
    }

    /// Materialize every layer of a manifest, in order
    ///
    /// Downloads overlap up to the configured limit, but each layer is
    /// extracted only after all layers listed before it. The first failure
    /// stops everything; downloads still in flight are abandoned.
    pub async fn materialize_layers(
        &self,
        image: &ImageName,
        manifest: &Manifest,
        token: &Token,
        root: &mut RootBuilder,
    ) -> Result<(), LayerError> {
        if self.max_concurrent_downloads <= 1 {
            for link in &manifest.layers {
                self.materialize_layer(image, link, token, root).await?;
            }
            return Ok(());
        }

        let repository = self.registry.resolve(image);
        let root_path = root.path().to_path_buf();
        let downloads = manifest.layers.iter().map(|link| {
            let client = self.clone();
            let repository = repository.clone();
            let link = link.clone();
            let token = token.clone();
            let root_path = root_path.clone();
            let digest = link.digest.clone();
            DownloadTask {
                digest,
                handle: task::spawn(async move {
                    client
                        .download_layer(&repository, &link, token, &root_path)
                        .await
                }),
            }
        });

        let mut archives = stream::iter(downloads).buffered(self.max_concurrent_downloads);
        while let Some(archive) = archives.next().await {
            root.apply(archive?).await?;
        }
        Ok(())
    }

    /// Pull an image into a scratch directory, producing its root filesystem
    pub async fn pull(
        &self,
        image: &ImageName,
        scratch: ScratchDir,
    ) -> Result<SandboxRoot, PipelineError> {
        let token = self.authenticate(image).await?;
        let manifest = self.fetch_manifest(image, &token).await?;
        let mut root = RootBuilder::new(scratch, manifest.layers.len());
        self.materialize_layers(image, &manifest, &token, &mut root)
            .await?;
        log::info!("{} root filesystem complete, {} layers", image, root.applied());
        Ok(root.finish())
    }
}

/// A spawned layer download, aborted if dropped before it finishes
struct DownloadTask {
    digest: ContentDigest,
    handle: task::JoinHandle<Result<LayerArchive, LayerError>>,
}

impl Future for DownloadTask {
    type Output = Result<LayerArchive, LayerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) => Poll::Ready(Err(LayerError::new(&self.digest, err.into()))),
        }
    }
}

impl Drop for DownloadTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
