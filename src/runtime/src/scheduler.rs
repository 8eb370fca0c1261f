//! Parallel per-platform builds.
//!
//! Runs one build pipeline (compile, layer, assemble) per platform with
//! bounded concurrency: a permit is acquired before a task is spawned and
//! released when it exits, so at most `concurrency` builds hold memory at
//! once. The first failure cancels the shared token; peers abort and
//! pending builds never start.

use std::collections::HashMap;
use std::sync::Arc;

use gopack_core::{PackError, Platform, Result};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::golang::GoBuilder;
use crate::oci::image::{assemble, BaseImage, BuiltImage};
use crate::oci::layer::AppLayer;
use crate::run::RunConfig;

/// Build every platform in `bases`, returning the platform-to-image map.
pub async fn build_all(
    cancel: &CancellationToken,
    builder: GoBuilder,
    bases: HashMap<Platform, BaseImage>,
    bin_name: &str,
    config: &RunConfig,
) -> Result<HashMap<Platform, BuiltImage>> {
    let mut platforms: Vec<String> = bases.keys().map(Platform::to_string).collect();
    platforms.sort();
    if platforms.len() == 1 {
        config
            .logger
            .println(&format!("Building image for platform {}", platforms[0]));
    } else {
        config
            .logger
            .println(&format!("Building images for platforms {platforms:?}"));
    }

    let builder = Arc::new(builder);
    let labels = Arc::new(config.labels.clone());
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let out = Arc::new(Mutex::new(HashMap::with_capacity(bases.len())));
    let mut tasks = JoinSet::new();
    let mut first_err: Option<PackError> = None;

    let compression = config.compression;
    let estargz = config.estargz;

    for (platform, base) in bases {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = cancel.cancelled() => {
                first_err = Some(PackError::Cancelled);
                break;
            }
        };

        let cancel = cancel.clone();
        let builder = builder.clone();
        let labels = labels.clone();
        let out = out.clone();
        let bin_name = bin_name.to_string();
        tasks.spawn(async move {
            let _permit = permit;
            match build_one(
                &cancel,
                &builder,
                &bin_name,
                &platform,
                &base,
                compression,
                estargz,
                &labels,
            )
            .await
            {
                Ok(image) => {
                    out.lock().await.insert(platform, image);
                    Ok(())
                }
                Err(err) => {
                    cancel.cancel();
                    Err(PackError::building(platform, err))
                }
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(join_err) => {
                cancel.cancel();
                PackError::Io(std::io::Error::other(join_err))
            }
        };
        // A cancelled peer must not mask the error that caused the
        // cancellation.
        match &first_err {
            None => first_err = Some(err),
            Some(current) if is_cancellation(current) && !is_cancellation(&err) => {
                first_err = Some(err)
            }
            Some(_) => {}
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }

    let out = Arc::try_unwrap(out)
        .expect("all build tasks joined")
        .into_inner();
    Ok(out)
}

fn is_cancellation(err: &PackError) -> bool {
    match err {
        PackError::Cancelled => true,
        PackError::Build { source, .. } => matches!(**source, PackError::Cancelled),
        _ => false,
    }
}

/// One platform's pipeline: compile into a fresh temp dir, wrap the
/// binary into a layer, append it to the base. The temp dir is removed on
/// every exit path when it drops.
#[allow(clippy::too_many_arguments)]
async fn build_one(
    cancel: &CancellationToken,
    builder: &GoBuilder,
    bin_name: &str,
    platform: &Platform,
    base: &BaseImage,
    compression: i32,
    estargz: bool,
    labels: &std::collections::BTreeMap<String, String>,
) -> Result<BuiltImage> {
    let dir = tempfile::Builder::new().prefix("gopack-").tempdir()?;
    let bin_path = dir.path().join(bin_name);

    builder.build(cancel, &bin_path, platform).await?;

    let entrypoint = format!("/app/{bin_name}");
    let layer = AppLayer::from_file(&bin_path, &entrypoint, compression, estargz)?;
    assemble(base, layer, bin_name, labels)
}
