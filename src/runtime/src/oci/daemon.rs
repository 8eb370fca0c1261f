//! Local daemon publishing.
//!
//! Only the Docker daemon is supported. The image is serialized as a
//! `docker save`-style tarball, streamed into `docker load` under the
//! source tag `<repo>:<digest-hex>`, and then aliased to each requested
//! tag through `docker tag`.

use std::process::Stdio;

use gopack_core::{PackError, Result};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::client::RegistryClient;
use super::image::BuiltImage;
use crate::run::RunConfig;

/// Load the image into the local Docker daemon and apply the tags.
pub async fn push_daemon(
    client: &RegistryClient,
    cancel: &CancellationToken,
    image: &BuiltImage,
    config: &RunConfig,
) -> Result<()> {
    let digest_hex = image
        .digest()?
        .strip_prefix("sha256:")
        .expect("digest is sha256")
        .to_string();
    let source = format!("{}:{}", config.repository, digest_hex);

    // The daemon needs every layer locally, including the base's.
    client.auth_pull(&image.base_reference).await?;
    let mut layers = Vec::with_capacity(image.manifest.layers.len());
    for descriptor in image.base_layers() {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }
        layers.push(client.pull_blob(&image.base_reference, descriptor).await?);
    }
    layers.push(image.layer.compressed_bytes().to_vec());

    let tarball = docker_save_tarball(&image.config, &layers, &source)?;

    config.logger.println(&format!("Pushing digest {digest_hex}"));
    docker_load(cancel, &source, tarball).await?;

    for tag in &config.tags {
        config.logger.println(&format!("Pushing tag {tag}"));
        let target = format!("{}:{}", config.repository, tag);
        docker_tag(cancel, &source, &target)
            .await
            .map_err(|e| PackError::pushing(tag.clone(), e))?;
    }

    Ok(())
}

/// Build a `docker save`-compatible tarball: config blob, compressed
/// layer blobs, and a `manifest.json` binding them under the source tag.
fn docker_save_tarball(config: &[u8], layers: &[Vec<u8>], repo_tag: &str) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    append_file(&mut builder, "config.json", config)?;

    let mut layer_names = Vec::with_capacity(layers.len());
    for (i, layer) in layers.iter().enumerate() {
        let name = format!("layer-{i}.tar.gz");
        append_file(&mut builder, &name, layer)?;
        layer_names.push(name);
    }

    let manifest = serde_json::to_vec(&serde_json::json!([{
        "Config": "config.json",
        "RepoTags": [repo_tag],
        "Layers": layer_names,
    }]))?;
    append_file(&mut builder, "manifest.json", &manifest)?;

    Ok(builder.into_inner()?)
}

fn append_file(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_mode(0o644);
    header.set_size(data.len() as u64);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

async fn docker_load(cancel: &CancellationToken, source: &str, tarball: Vec<u8>) -> Result<()> {
    tracing::debug!(source = %source, bytes = tarball.len(), "loading image into daemon");

    let mut child = tokio::process::Command::new("docker")
        .args(["load", "--quiet"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PackError::Transport(format!("starting docker load: {e}")))?;

    let mut stdin = child.stdin.take().expect("stdin is piped");
    let write = async {
        stdin.write_all(&tarball).await?;
        stdin.shutdown().await?;
        drop(stdin);
        child.wait_with_output().await
    };

    let output = tokio::select! {
        output = write => output?,
        _ = cancel.cancelled() => return Err(PackError::Cancelled),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PackError::Transport(format!(
            "docker load {source}: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

async fn docker_tag(cancel: &CancellationToken, source: &str, target: &str) -> Result<()> {
    let mut cmd = tokio::process::Command::new("docker");
    cmd.args(["tag", source, target])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::select! {
        output = cmd.output() => output.map_err(|e| PackError::Transport(format!("starting docker tag: {e}")))?,
        _ = cancel.cancelled() => return Err(PackError::Cancelled),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PackError::Transport(format!(
            "docker tag {target}: {}",
            stderr.trim()
        )));
    }
    Ok(())
}
