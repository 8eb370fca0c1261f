use thiserror::Error;

use crate::platform::Platform;

/// gopack error types.
///
/// Every error aborts the run; there is no in-band recovery. The CLI prints
/// the rendered message as a single line on stderr.
#[derive(Error, Debug)]
pub enum PackError {
    /// Unparseable user input: main path, repository, reference, tag, label.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The Go compiler exited non-zero; carries its captured output.
    #[error("go: {0}")]
    Toolchain(String),

    /// The base manifest or index has no entry for a requested platform.
    #[error("base image: platform {0}: no matching image")]
    NoMatchingImage(Platform),

    /// The base descriptor is neither an image manifest nor an image index.
    #[error("base image: invalid type {0:?}")]
    InvalidBaseType(String),

    /// More than one platform was requested for a local daemon push.
    #[error("push: can only push a single image to the docker daemon")]
    MultiPlatformToDaemon,

    /// Registry or daemon I/O, authentication, or protocol failure.
    #[error("transport: {0}")]
    Transport(String),

    /// Filesystem or subprocess plumbing failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure on manifests or configs.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The root context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A per-platform build failed; wraps the underlying error.
    #[error("building {platform}: {source}")]
    Build {
        platform: Platform,
        #[source]
        source: Box<PackError>,
    },

    /// A per-tag push failed; wraps the underlying error.
    #[error("push {tag:?}: {source}")]
    Push {
        tag: String,
        #[source]
        source: Box<PackError>,
    },
}

impl PackError {
    /// Wrap an error with the platform whose build produced it.
    pub fn building(platform: Platform, source: PackError) -> Self {
        PackError::Build {
            platform,
            source: Box::new(source),
        }
    }

    /// Wrap an error with the tag whose push produced it.
    pub fn pushing(tag: impl Into<String>, source: PackError) -> Self {
        PackError::Push {
            tag: tag.into(),
            source: Box::new(source),
        }
    }
}

/// Result type alias for gopack operations.
pub type Result<T> = std::result::Result<T, PackError>;
