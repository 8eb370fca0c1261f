//! Run orchestration.
//!
//! Applies option defaults, derives the binary name, and sequences the
//! pipeline: resolve the base, build every platform, publish the result.

use std::collections::BTreeMap;
use std::path::PathBuf;

use gopack_core::{platform::default_platform, Logger, PackError, Platform, Result};
use tokio_util::sync::CancellationToken;

use crate::golang::GoBuilder;
use crate::oci::{publish, resolve_base, RegistryClient, DEFAULT_TAG};
use crate::scheduler;

/// Base image used when none is requested.
pub const DEFAULT_BASE: &str = "gcr.io/distroless/static:nonroot";

/// Options for one run. All fields have workable defaults; the zero-value
/// `repository` falls back to the derived binary name.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum number of concurrent builds.
    pub concurrency: usize,
    /// Progress logger; swap in `Logger::nop()` to silence progress.
    pub logger: Logger,

    /// Enable CGO during compilation.
    pub cgo_enabled: bool,
    /// Linker flags handed to `go build -ldflags`.
    pub ldflags: String,
    /// Path to the package to build.
    pub main_path: PathBuf,
    /// Module mode handed to `go build -mod`; empty means unset.
    pub mod_flag: String,
    /// Pass `-trimpath` to the compiler.
    pub trimpath: bool,

    /// Base image reference.
    pub base: String,
    /// Gzip level for the application layer; negative means the library
    /// default.
    pub compression: i32,
    /// Local daemon to push to (`docker`); empty means a remote push.
    pub daemon: String,
    /// Encode the application layer as estargz.
    pub estargz: bool,
    /// Labels applied to the image config.
    pub labels: BTreeMap<String, String>,
    /// Target platforms in `os/arch[:variant]` syntax.
    pub platforms: Vec<String>,
    /// Destination repository; empty means the binary name.
    pub repository: String,
    /// Tags to publish under, in order.
    pub tags: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            concurrency: num_cpus::get(),
            logger: Logger::stderr(),

            cgo_enabled: false,
            ldflags: "-s -w".to_string(),
            main_path: PathBuf::from("."),
            mod_flag: String::new(),
            trimpath: true,

            base: DEFAULT_BASE.to_string(),
            compression: -1,
            daemon: String::new(),
            estargz: false,
            labels: BTreeMap::new(),
            platforms: vec![default_platform().to_string()],
            repository: String::new(),
            tags: vec![DEFAULT_TAG.to_string()],
        }
    }
}

/// Build and publish per the config, returning the output reference.
pub async fn run(cancel: CancellationToken, mut config: RunConfig) -> Result<String> {
    validate(&config)?;

    let bin_name = parse_bin_name(&config.main_path)?;
    if config.repository.is_empty() {
        config.repository = bin_name.clone();
    }

    let platforms = parse_platforms(&config.logger, &config.platforms);

    let client = RegistryClient::new();
    config
        .logger
        .println(&format!("Fetching manifest for base: {}", config.base));
    let (bases, base_media_type) = resolve_base(&client, &config.base, &platforms).await?;

    let builder = GoBuilder::new(
        config.main_path.clone(),
        config.cgo_enabled,
        config.ldflags.clone(),
        config.mod_flag.clone(),
        config.trimpath,
    );
    let images = scheduler::build_all(&cancel, builder, bases, &bin_name, &config).await?;

    publish(&client, &cancel, images, &base_media_type, &config).await
}

fn validate(config: &RunConfig) -> Result<()> {
    if config.platforms.is_empty() {
        return Err(PackError::InvalidInput("no platforms requested".to_string()));
    }
    if !config.daemon.is_empty() && config.daemon != "docker" {
        return Err(PackError::InvalidInput(format!(
            "unsupported daemon {:?} (only \"docker\" is supported)",
            config.daemon
        )));
    }
    if config.base.is_empty() {
        return Err(PackError::InvalidInput("no base image provided".to_string()));
    }
    Ok(())
}

/// The binary name is the base name of the absolute main path with any
/// extension stripped.
fn parse_bin_name(main_path: &std::path::Path) -> Result<String> {
    let absolute = std::fs::canonicalize(main_path)?;
    absolute
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            PackError::InvalidInput(format!(
                "cannot derive a binary name from {}",
                main_path.display()
            ))
        })
}

fn parse_platforms(logger: &Logger, raw: &[String]) -> Vec<Platform> {
    raw.iter()
        .map(|s| {
            let platform = Platform::parse(s);
            if !platform.is_supported() {
                logger.println(&format!(
                    "Warning: platform {s:?} is not officially supported"
                ));
            }
            platform
        })
        .collect()
}
