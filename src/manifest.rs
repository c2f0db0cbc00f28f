//! Image manifest documents, as served by the registry

use crate::{errors::ManifestError, image::ContentDigest};

/// Partial implementation of the image manifest v2 schema2 format
///
/// Reference: <https://docs.docker.com/registry/spec/manifest-v2-2/>
///
/// The order of `layers` is authoritative: applying them in any other order
/// builds a different filesystem than the one that was published.
#[derive(Clone, Debug, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default)]
    pub media_type: Option<String>,
    pub config: Option<Link>,
    #[serde(default)]
    pub layers: Vec<Link>,
}

/// Descriptor for one content-addressed blob referenced by a manifest
#[derive(Clone, Debug, Deserialize)]
pub struct Link {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    pub digest: ContentDigest,
}

pub mod media_types {
    pub const MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const LAYER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
}

impl Manifest {
    /// Decode a manifest body and check that it is the schema we asked for
    pub fn from_slice(slice: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_slice(slice)?;
        let media_type_ok = match &manifest.media_type {
            None => true,
            Some(media_type) => media_type == media_types::MANIFEST,
        };
        if manifest.schema_version == 2 && media_type_ok {
            Ok(manifest)
        } else {
            Err(ManifestError::UnsupportedManifest {
                schema_version: manifest.schema_version,
                media_type: manifest.media_type,
            })
        }
    }

    /// Total size of all layer blobs, as declared by the manifest
    pub fn layers_size(&self) -> u64 {
        self.layers.iter().map(|link| link.size).sum()
    }
}
