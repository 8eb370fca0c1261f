//! OCI image assembly and publishing.
//!
//! Submodules cover the pipeline stages after compilation: turning the
//! built binary into a layer, appending it to the base image, resolving
//! the base descriptor, and pushing the result to a registry or the local
//! Docker daemon.

pub mod client;
pub mod daemon;
pub mod estargz;
pub mod image;
pub mod keychain;
pub mod layer;
pub mod publish;
pub mod resolve;

pub use client::RegistryClient;
pub use image::{assemble, BaseImage, BuiltImage};
pub use layer::AppLayer;
pub use publish::publish;
pub use resolve::resolve_base;

/// Tag used when the user requests none.
pub const DEFAULT_TAG: &str = "latest";

/// Docker schema 2 image manifest. Single-image outputs are always
/// normalized to this media type.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Docker schema 2 manifest list.
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// OCI image manifest.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index.
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Gzipped layer, Docker flavor. The application layer is emitted with
/// this media type regardless of the base image's family, matching how
/// Docker-schema-2 outputs describe their layers.
pub const DOCKER_LAYER_GZIP_MEDIA_TYPE: &str =
    "application/vnd.docker.image.rootfs.diff.tar.gzip";
