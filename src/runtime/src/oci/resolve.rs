//! Base image resolution.
//!
//! Fetches the base reference's descriptor and expands it into one
//! `BaseImage` per requested platform. An image index is scanned linearly
//! and the first entry matching each platform wins; a plain image manifest
//! must itself match every requested platform, as recorded in its config
//! blob.

use std::collections::HashMap;

use gopack_core::{PackError, Platform, Result};
use oci_distribution::manifest::{OciImageIndex, OciImageManifest};
use oci_distribution::Reference;
use serde_json::Value;

use super::client::{parse_reference, RegistryClient};
use super::image::BaseImage;
use super::{
    DOCKER_MANIFEST_LIST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE, OCI_INDEX_MEDIA_TYPE,
    OCI_MANIFEST_MEDIA_TYPE,
};

/// A classified base descriptor.
#[derive(Debug)]
enum BaseDescriptor {
    Image(OciImageManifest),
    Index(OciImageIndex),
}

/// Fetch and expand the base reference. Returns the per-platform base
/// image map and the base descriptor's media type, which multi-platform
/// outputs inherit.
pub async fn resolve_base(
    client: &RegistryClient,
    base: &str,
    platforms: &[Platform],
) -> Result<(HashMap<Platform, BaseImage>, String)> {
    let reference = parse_reference(base, "base")?;
    let (bytes, digest) = client.fetch_manifest_raw(&reference).await?;
    tracing::debug!(base = %reference, digest = %digest, "fetched base descriptor");

    let (descriptor, media_type) = classify_manifest(&bytes)?;
    let mut out = HashMap::with_capacity(platforms.len());

    match descriptor {
        BaseDescriptor::Image(manifest) => {
            let config = client.pull_blob(&reference, &manifest.config).await?;
            let (os, arch, variant) = config_platform(&config)?;
            for platform in platforms {
                if !platform.matches_parts(&os, &arch, variant.as_deref()) {
                    return Err(PackError::NoMatchingImage(platform.clone()));
                }
                out.insert(
                    platform.clone(),
                    BaseImage {
                        reference: reference.clone(),
                        manifest: manifest.clone(),
                        config: config.clone(),
                    },
                );
            }
        }
        BaseDescriptor::Index(index) => {
            for platform in platforms {
                let entry = find_entry(platform, &index).ok_or_else(|| {
                    PackError::NoMatchingImage(platform.clone())
                })?;
                let child = Reference::with_digest(
                    reference.registry().to_string(),
                    reference.repository().to_string(),
                    entry.digest.clone(),
                );
                let (child_bytes, _) = client.fetch_manifest_raw(&child).await?;
                let manifest = match classify_manifest(&child_bytes)? {
                    (BaseDescriptor::Image(m), _) => m,
                    (BaseDescriptor::Index(_), mt) => {
                        return Err(PackError::InvalidBaseType(mt));
                    }
                };
                let config = client.pull_blob(&child, &manifest.config).await?;
                out.insert(
                    platform.clone(),
                    BaseImage {
                        reference: child,
                        manifest,
                        config,
                    },
                );
            }
        }
    }

    Ok((out, media_type))
}

/// First index entry whose platform triple matches.
fn find_entry<'a>(
    platform: &Platform,
    index: &'a OciImageIndex,
) -> Option<&'a oci_distribution::manifest::ImageIndexEntry> {
    index.manifests.iter().find(|entry| {
        entry.platform.as_ref().is_some_and(|p| {
            platform.matches_parts(&p.os, &p.architecture, p.variant.as_deref())
        })
    })
}

/// Decide whether manifest bytes describe an image or an index. The
/// declared `mediaType` wins; when absent, the JSON shape decides.
fn classify_manifest(bytes: &[u8]) -> Result<(BaseDescriptor, String)> {
    let value: Value = serde_json::from_slice(bytes)?;
    let declared = value
        .get("mediaType")
        .and_then(Value::as_str)
        .map(str::to_string);

    let kind = match declared.as_deref() {
        Some(DOCKER_MANIFEST_MEDIA_TYPE) | Some(OCI_MANIFEST_MEDIA_TYPE) => Kind::Image,
        Some(DOCKER_MANIFEST_LIST_MEDIA_TYPE) | Some(OCI_INDEX_MEDIA_TYPE) => Kind::Index,
        Some(other) => return Err(PackError::InvalidBaseType(other.to_string())),
        None if value.get("manifests").is_some() => Kind::Index,
        None if value.get("config").is_some() && value.get("layers").is_some() => Kind::Image,
        None => return Err(PackError::InvalidBaseType("unknown".to_string())),
    };

    match kind {
        Kind::Image => {
            let manifest: OciImageManifest = serde_json::from_slice(bytes)?;
            let media_type = declared.unwrap_or_else(|| OCI_MANIFEST_MEDIA_TYPE.to_string());
            Ok((BaseDescriptor::Image(manifest), media_type))
        }
        Kind::Index => {
            let index: OciImageIndex = serde_json::from_slice(bytes)?;
            let media_type = declared.unwrap_or_else(|| OCI_INDEX_MEDIA_TYPE.to_string());
            Ok((BaseDescriptor::Index(index), media_type))
        }
    }
}

enum Kind {
    Image,
    Index,
}

/// The platform an image manifest applies to, as recorded in its config.
fn config_platform(config: &[u8]) -> Result<(String, String, Option<String>)> {
    let value: Value = serde_json::from_slice(config)?;
    let os = value
        .get("os")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let arch = value
        .get("architecture")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let variant = value
        .get("variant")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok((os, arch, variant))
}
