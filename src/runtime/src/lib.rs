//! gopack build and publish pipeline.
//!
//! Given a Go package, a base image reference, and a list of target
//! platforms, this crate cross-compiles the binary once per platform,
//! wraps each binary in a single OCI layer on top of the base image, and
//! publishes the result: a plain image for one platform, an image index
//! for several, or a stream into the local Docker daemon.
//!
//! The entry point is [`run`] with a [`RunConfig`]:
//!
//! ```no_run
//! use gopack_runtime::{run, RunConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> gopack_core::Result<()> {
//! let mut config = RunConfig::default();
//! config.repository = "example.com/app".to_string();
//! let reference = run(CancellationToken::new(), config).await?;
//! println!("{reference}");
//! # Ok(())
//! # }
//! ```

pub mod golang;
pub mod oci;
pub mod run;
pub mod scheduler;

pub use run::{run, RunConfig};
