//! Publishing built images.
//!
//! Two dispatch axes: destination (remote registry or local daemon) and
//! cardinality (one image or a multi-platform set). Remote pushes apply
//! tags sequentially in the order the user gave them; the first tag
//! uploads every blob, each later tag re-puts the manifest bytes only.

use std::collections::HashMap;

use gopack_core::{Logger, PackError, Platform, Result};
use oci_distribution::manifest::{ImageIndexEntry, OciImageIndex};
use oci_distribution::Reference;
use tokio_util::sync::CancellationToken;

use super::client::{parse_reference, RegistryClient};
use super::image::BuiltImage;
use super::layer::sha256_digest;
use super::{daemon, DEFAULT_TAG};
use crate::run::RunConfig;

/// Push the built images and return the user-facing output reference.
pub async fn publish(
    client: &RegistryClient,
    cancel: &CancellationToken,
    images: HashMap<Platform, BuiltImage>,
    base_media_type: &str,
    config: &RunConfig,
) -> Result<String> {
    if config.daemon == "docker" {
        if images.len() != 1 {
            return Err(PackError::MultiPlatformToDaemon);
        }
        let image = images.into_values().next().expect("one image");
        let digest = image.digest()?;
        daemon::push_daemon(client, cancel, &image, config).await?;
        return Ok(choose_output(&config.repository, &digest, &config.tags));
    }

    let repo = parse_reference(&config.repository, "repository")?;
    if config.tags.is_empty() {
        return Err(PackError::InvalidInput("push: no tags provided".to_string()));
    }

    if images.len() == 1 {
        let image = images.into_values().next().expect("one image");
        push_image_tags(client, cancel, &image, &repo, config).await?;
        return Ok(choose_output(&config.repository, &image.digest()?, &config.tags));
    }

    let mut sorted: Vec<(Platform, BuiltImage)> = images.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let (index_bytes, index_digest) = build_index(&sorted, base_media_type)?;
    push_index_tags(client, cancel, &sorted, index_bytes, base_media_type, &repo, config).await?;
    Ok(choose_output(&config.repository, &index_digest, &config.tags))
}

/// Push one image under every requested tag.
async fn push_image_tags(
    client: &RegistryClient,
    cancel: &CancellationToken,
    image: &BuiltImage,
    repo: &Reference,
    config: &RunConfig,
) -> Result<()> {
    let manifest_bytes = image.manifest_bytes()?;
    for (i, tag) in config.tags.iter().enumerate() {
        let tag_ref = tag_reference(repo, tag);
        let result: Result<()> = async {
            client.auth_push(&tag_ref).await?;
            if i == 0 {
                upload_image_blobs(client, cancel, image, &tag_ref, tag, &config.logger).await?;
            } else {
                config.logger.re_print(&format!("Pushing tag {tag}"));
            }
            client
                .push_manifest_raw(&tag_ref, manifest_bytes.clone(), image.media_type())
                .await?;
            config.logger.println("");
            Ok(())
        }
        .await;
        result.map_err(|e| PackError::pushing(tag.clone(), e))?;
        tracing::info!(reference = %tag_ref, "pushed image");
    }
    Ok(())
}

/// Upload every blob an image needs: base layers copied from the base
/// repository, the config blob, and the application layer.
async fn upload_image_blobs(
    client: &RegistryClient,
    cancel: &CancellationToken,
    image: &BuiltImage,
    dest: &Reference,
    tag: &str,
    logger: &Logger,
) -> Result<()> {
    client.auth_pull(&image.base_reference).await?;

    let total: u64 = image
        .base_layers()
        .iter()
        .map(|d| d.size.max(0) as u64)
        .sum::<u64>()
        + image.config.len() as u64
        + image.layer.size() as u64;
    let mut progress = Progress::new(logger, tag, total);
    progress.start();

    for descriptor in image.base_layers() {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }
        let data = client.pull_blob(&image.base_reference, descriptor).await?;
        client.push_blob(dest, &data, &descriptor.digest).await?;
        progress.add(descriptor.size.max(0) as u64);
    }

    if cancel.is_cancelled() {
        return Err(PackError::Cancelled);
    }
    client
        .push_blob(dest, &image.config, &image.manifest.config.digest)
        .await?;
    progress.add(image.config.len() as u64);

    client
        .push_blob(dest, image.layer.compressed_bytes(), image.layer.digest())
        .await?;
    progress.add(image.layer.size() as u64);

    Ok(())
}

/// Push a multi-platform set: the per-platform manifests go up by digest
/// under the first tag, then the index is put once per tag.
async fn push_index_tags(
    client: &RegistryClient,
    cancel: &CancellationToken,
    images: &[(Platform, BuiltImage)],
    index_bytes: Vec<u8>,
    media_type: &str,
    repo: &Reference,
    config: &RunConfig,
) -> Result<()> {
    for (i, tag) in config.tags.iter().enumerate() {
        let tag_ref = tag_reference(repo, tag);
        let result: Result<()> = async {
            client.auth_push(&tag_ref).await?;
            if i == 0 {
                for (platform, image) in images {
                    if cancel.is_cancelled() {
                        return Err(PackError::Cancelled);
                    }
                    tracing::debug!(platform = %platform, "uploading platform manifest");
                    upload_image_blobs(client, cancel, image, &tag_ref, tag, &config.logger)
                        .await?;
                    let digest_ref = Reference::with_digest(
                        repo.registry().to_string(),
                        repo.repository().to_string(),
                        image.digest()?,
                    );
                    client
                        .push_manifest_raw(&digest_ref, image.manifest_bytes()?, image.media_type())
                        .await?;
                }
            }
            config.logger.re_print(&format!("Pushing tag {tag}"));
            client
                .push_manifest_raw(&tag_ref, index_bytes.clone(), media_type)
                .await?;
            config.logger.println("");
            Ok(())
        }
        .await;
        result.map_err(|e| PackError::pushing(tag.clone(), e))?;
        tracing::info!(reference = %tag_ref, "pushed index");
    }
    Ok(())
}

/// Assemble the image index: one entry per platform, media type inherited
/// from the base descriptor. Entries are in the (sorted) order of the
/// input slice so the index bytes are deterministic.
fn build_index(
    images: &[(Platform, BuiltImage)],
    base_media_type: &str,
) -> Result<(Vec<u8>, String)> {
    let mut manifests = Vec::with_capacity(images.len());
    for (platform, image) in images {
        let manifest_bytes = image.manifest_bytes()?;
        manifests.push(ImageIndexEntry {
            media_type: image.media_type().to_string(),
            digest: image.digest()?,
            size: manifest_bytes.len() as i64,
            platform: Some(oci_distribution::manifest::Platform {
                architecture: platform.arch().to_string(),
                os: platform.os().to_string(),
                os_version: None,
                os_features: None,
                variant: if platform.variant().is_empty() {
                    None
                } else {
                    Some(platform.variant().to_string())
                },
                features: None,
            }),
            annotations: None,
        });
    }

    let index = OciImageIndex {
        schema_version: 2,
        media_type: Some(base_media_type.to_string()),
        manifests,
        annotations: None,
    };
    let bytes = serde_json::to_vec(&index)?;
    let digest = sha256_digest(&bytes);
    Ok((bytes, digest))
}

fn tag_reference(repo: &Reference, tag: &str) -> Reference {
    Reference::with_tag(
        repo.registry().to_string(),
        repo.repository().to_string(),
        tag.to_string(),
    )
}

/// Pick the reference reported to the user: the first tag that is not the
/// default `latest` wins even when several tags were pushed; with only
/// default tags the digest form is used instead.
fn choose_output(repository: &str, digest: &str, tags: &[String]) -> String {
    match tags.iter().find(|t| t.as_str() != DEFAULT_TAG) {
        Some(tag) => format!("{repository}:{tag}"),
        None => format!("{repository}@{digest}"),
    }
}

/// Per-tag push progress, rendered in decimal megabytes.
struct Progress<'a> {
    logger: &'a Logger,
    tag: &'a str,
    complete: u64,
    total: u64,
}

impl<'a> Progress<'a> {
    fn new(logger: &'a Logger, tag: &'a str, total: u64) -> Self {
        Progress {
            logger,
            tag,
            complete: 0,
            total,
        }
    }

    fn start(&self) {
        self.logger.re_print(&format!("Pushing tag {}", self.tag));
    }

    fn add(&mut self, bytes: u64) {
        self.complete += bytes;
        if !self.logger.is_nop() {
            self.logger
                .re_print(&format_progress(self.tag, self.complete, self.total));
        }
    }
}

fn format_progress(tag: &str, complete: u64, total: u64) -> String {
    format!(
        "Pushing tag {tag}: {} MB/{} MB",
        complete / 1_000_000,
        total / 1_000_000
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::image::fixtures::{base_image, sample_layer};
    use crate::oci::image::assemble;
    use crate::oci::{DOCKER_MANIFEST_MEDIA_TYPE, OCI_INDEX_MEDIA_TYPE};

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_choose_output_digest_for_default_tag() {
        let out = choose_output("example.com/app", "sha256:abc", &tags(&["latest"]));
        assert_eq!(out, "example.com/app@sha256:abc");
    }

    #[test]
    fn test_choose_output_first_non_default_tag() {
        let out = choose_output(
            "example.com/app",
            "sha256:abc",
            &tags(&["latest", "v1.0.0", "v1"]),
        );
        assert_eq!(out, "example.com/app:v1.0.0");
    }

    #[test]
    fn test_choose_output_empty_tags() {
        let out = choose_output("example.com/app", "sha256:abc", &[]);
        assert_eq!(out, "example.com/app@sha256:abc");
    }

    #[test]
    fn test_format_progress_decimal_megabytes() {
        assert_eq!(
            format_progress("latest", 1_500_000, 34_000_000),
            "Pushing tag latest: 1 MB/34 MB"
        );
        assert_eq!(
            format_progress("dev", 0, 999_999),
            "Pushing tag dev: 0 MB/0 MB"
        );
    }

    fn built(platform: &str) -> (Platform, BuiltImage) {
        let image = assemble(&base_image(), sample_layer(), "hello", &Default::default()).unwrap();
        (Platform::parse(platform), image)
    }

    #[test]
    fn test_build_index_inherits_media_type() {
        let images = vec![built("linux/amd64"), built("linux/arm64")];
        let (bytes, digest) = build_index(&images, OCI_INDEX_MEDIA_TYPE).unwrap();

        let index: OciImageIndex = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(index.media_type.as_deref(), Some(OCI_INDEX_MEDIA_TYPE));
        assert_eq!(index.schema_version, 2);
        assert_eq!(digest, sha256_digest(&bytes));
    }

    #[test]
    fn test_build_index_platform_triples() {
        let images = vec![built("linux/amd64"), built("linux/arm:7")];
        let (bytes, _) = build_index(&images, OCI_INDEX_MEDIA_TYPE).unwrap();
        let index: OciImageIndex = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(index.manifests.len(), 2);
        let amd64 = index.manifests[0].platform.as_ref().unwrap();
        assert_eq!((amd64.os.as_str(), amd64.architecture.as_str()), ("linux", "amd64"));
        assert_eq!(amd64.variant, None);

        let arm = index.manifests[1].platform.as_ref().unwrap();
        assert_eq!(arm.architecture, "arm");
        assert_eq!(arm.variant.as_deref(), Some("7"));

        for entry in &index.manifests {
            assert_eq!(entry.media_type, DOCKER_MANIFEST_MEDIA_TYPE);
            assert!(entry.digest.starts_with("sha256:"));
            assert!(entry.size > 0);
        }
    }

    #[test]
    fn test_build_index_deterministic() {
        let images = vec![built("linux/amd64"), built("linux/arm64")];
        let (a, _) = build_index(&images, OCI_INDEX_MEDIA_TYPE).unwrap();
        let (b, _) = build_index(&images, OCI_INDEX_MEDIA_TYPE).unwrap();
        assert_eq!(a, b);
    }
}
