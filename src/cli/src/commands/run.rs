//! `gopack run`: build and publish a Go binary as a minimal OCI image.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;
use tokio_util::sync::CancellationToken;

use gopack_runtime::run::DEFAULT_BASE;
use gopack_runtime::RunConfig;

#[derive(Args)]
pub struct RunArgs {
    /// Path to the Go package to build
    #[arg(value_name = "package", default_value = ".")]
    pub package: PathBuf,

    /// Repository to use as the base image
    #[arg(short, long, default_value = DEFAULT_BASE)]
    pub base: String,

    /// Enable CGO during Go compilation
    #[arg(long)]
    pub cgo: bool,

    /// Gzip compression level of image layers (negative for the default)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub compression: i32,

    /// Number of concurrent builds (default: number of CPUs)
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Push image to a local daemon (only "docker" is supported)
    #[arg(short, long, default_value = "")]
    pub daemon: String,

    /// Encode the application layer as estargz
    #[arg(long)]
    pub estargz: bool,

    /// Labels to include in the image, as key or key=value
    #[arg(short = 'l', long = "label", value_name = "KEY[=VALUE]")]
    pub labels: Vec<String>,

    /// Linker flags used during Go compilation
    #[arg(long, default_value = "-s -w")]
    pub ldflags: String,

    /// Module mode flag used during Go compilation
    #[arg(long = "mod", value_name = "MODE", default_value = "")]
    pub mod_flag: String,

    /// Platforms to build for, as os/arch or os/arch:variant
    #[arg(short, long = "platform", default_value = "linux/amd64")]
    pub platforms: Vec<String>,

    /// Repository to push the image to (default: the binary name)
    #[arg(short, long, default_value = "")]
    pub repository: String,

    /// Tags to push the image with
    #[arg(short, long = "tag", default_value = "latest")]
    pub tags: Vec<String>,

    /// Pass -trimpath during Go compilation; disable with --trimpath=false
    #[arg(
        long,
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    pub trimpath: bool,
}

pub async fn execute(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let mut config = RunConfig::default();
    config.main_path = args.package;
    config.base = args.base;
    config.cgo_enabled = args.cgo;
    config.compression = args.compression;
    if let Some(concurrency) = args.concurrency {
        if concurrency > 0 {
            config.concurrency = concurrency;
        }
    }
    config.daemon = args.daemon;
    config.estargz = args.estargz;
    config.labels = parse_labels(&args.labels);
    config.ldflags = args.ldflags;
    config.mod_flag = args.mod_flag;
    config.platforms = args.platforms;
    config.repository = args.repository;
    config.tags = args.tags;
    config.trimpath = args.trimpath;

    let output = gopack_runtime::run(cancel, config).await?;
    println!("{output}");
    Ok(())
}

/// Split each label occurrence on the first `=`; a missing `=` means an
/// empty value. Later occurrences of the same key win.
fn parse_labels(raw: &[String]) -> BTreeMap<String, String> {
    raw.iter()
        .map(|label| match label.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (label.clone(), String::new()),
        })
        .collect()
}
