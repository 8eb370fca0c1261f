//! Image assembly.
//!
//! Appends the application layer to a base image and rewrites the config:
//! author, entrypoint, cleared `Cmd`, requested labels, one new history
//! entry. Everything else in the base config passes through untouched,
//! which is why the config blob is handled as raw JSON rather than a
//! typed struct.

use std::collections::BTreeMap;

use gopack_core::{PackError, Result};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use oci_distribution::Reference;
use serde_json::{json, Value};

use super::layer::{sha256_digest, AppLayer};
use super::DOCKER_MANIFEST_MEDIA_TYPE;

/// History entries and the config author are attributed to the tool.
const AUTHOR: &str = "gopack";

/// Zero timestamp, kept constant so identical inputs produce identical
/// configs and layers.
const ZERO_TIME: &str = "0001-01-01T00:00:00Z";

/// A per-platform view of the base image: where its blobs live, its
/// manifest, and its raw config blob.
#[derive(Debug, Clone)]
pub struct BaseImage {
    pub reference: Reference,
    pub manifest: OciImageManifest,
    pub config: Vec<u8>,
}

/// A fully assembled output image: base layers plus the application
/// layer, with the mutated config attached.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    /// Repository the base layers can be pulled from.
    pub base_reference: Reference,
    pub manifest: OciImageManifest,
    pub config: Vec<u8>,
    pub layer: AppLayer,
}

impl BuiltImage {
    /// The manifest bytes exactly as they will be pushed.
    pub fn manifest_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.manifest)?)
    }

    /// Digest of the manifest bytes, `sha256:` prefixed.
    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.manifest_bytes()?))
    }

    /// Manifest media type; single-image outputs are always Docker
    /// schema 2.
    pub fn media_type(&self) -> &str {
        self.manifest
            .media_type
            .as_deref()
            .unwrap_or(DOCKER_MANIFEST_MEDIA_TYPE)
    }

    /// Descriptors of the inherited base layers, in order.
    pub fn base_layers(&self) -> &[OciDescriptor] {
        let n = self.manifest.layers.len();
        &self.manifest.layers[..n - 1]
    }
}

/// Append `layer` to `base` and rewrite the config for `bin_name`.
pub fn assemble(
    base: &BaseImage,
    layer: AppLayer,
    bin_name: &str,
    labels: &BTreeMap<String, String>,
) -> Result<BuiltImage> {
    let entrypoint = format!("/app/{bin_name}");

    let mut config: Value = serde_json::from_slice(&base.config)?;
    let root = config
        .as_object_mut()
        .ok_or_else(|| PackError::InvalidInput("base config is not a JSON object".to_string()))?;
    root.insert("author".to_string(), json!(AUTHOR));

    let runtime_config = root
        .entry("config")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| PackError::InvalidInput("base config.config is not an object".to_string()))?;
    runtime_config.remove("Cmd");
    runtime_config.insert("Entrypoint".to_string(), json!([entrypoint]));
    if !labels.is_empty() {
        let existing = runtime_config
            .entry("Labels")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| {
                PackError::InvalidInput("base config Labels is not an object".to_string())
            })?;
        for (key, value) in labels {
            existing.insert(key.clone(), json!(value));
        }
    }

    let rootfs = root
        .entry("rootfs")
        .or_insert_with(|| json!({"type": "layers", "diff_ids": []}));
    let diff_ids = rootfs
        .as_object_mut()
        .and_then(|r| r.entry("diff_ids").or_insert_with(|| json!([])).as_array_mut())
        .ok_or_else(|| PackError::InvalidInput("base config rootfs is malformed".to_string()))?;
    diff_ids.push(json!(layer.diff_id()));

    let history = root
        .entry("history")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| PackError::InvalidInput("base config history is not a list".to_string()))?;
    history.push(json!({
        "author": AUTHOR,
        "created": ZERO_TIME,
        "created_by": "gopack run ...",
    }));

    let config_bytes = serde_json::to_vec(&config)?;

    let mut manifest = base.manifest.clone();
    manifest.schema_version = 2;
    manifest.media_type = Some(DOCKER_MANIFEST_MEDIA_TYPE.to_string());
    manifest.config = OciDescriptor {
        media_type: base.manifest.config.media_type.clone(),
        digest: sha256_digest(&config_bytes),
        size: config_bytes.len() as i64,
        urls: None,
        annotations: None,
    };
    manifest.layers.push(layer.descriptor());

    Ok(BuiltImage {
        base_reference: base.reference.clone(),
        manifest,
        config: config_bytes,
        layer,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A one-layer base image with a typical distroless-style config.
    pub(crate) fn base_image() -> BaseImage {
        let config = serde_json::to_vec(&json!({
            "architecture": "amd64",
            "os": "linux",
            "config": {
                "Env": ["PATH=/usr/local/bin:/usr/bin"],
                "Cmd": ["/bin/sh"],
                "User": "nonroot",
            },
            "rootfs": {
                "type": "layers",
                "diff_ids": ["sha256:1111111111111111111111111111111111111111111111111111111111111111"],
            },
            "history": [{"created_by": "BASE", "created": "2023-01-01T00:00:00Z"}],
        }))
        .unwrap();

        let manifest = OciImageManifest {
            schema_version: 2,
            media_type: Some(super::super::OCI_MANIFEST_MEDIA_TYPE.to_string()),
            artifact_type: None,
            config: OciDescriptor {
                media_type: "application/vnd.oci.image.config.v1+json".to_string(),
                digest: sha256_digest(&config),
                size: config.len() as i64,
                urls: None,
                annotations: None,
            },
            layers: vec![OciDescriptor {
                media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
                digest: "sha256:2222222222222222222222222222222222222222222222222222222222222222"
                    .to_string(),
                size: 123,
                urls: None,
                annotations: None,
            }],
            annotations: None,
        };

        BaseImage {
            reference: "example.com/base:latest".parse().unwrap(),
            manifest,
            config,
        }
    }

    pub(crate) fn sample_layer() -> AppLayer {
        let dir = tempfile::TempDir::new().unwrap();
        let bin = dir.path().join("hello");
        std::fs::write(&bin, b"binary contents").unwrap();
        AppLayer::from_file(&bin, "/app/hello", -1, false).unwrap()
    }
}
