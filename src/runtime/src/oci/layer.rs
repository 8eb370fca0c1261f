//! Application layer construction.
//!
//! The layer holds exactly one file: the compiled binary at
//! `app/<name>`, mode `0o555`. The tar stream is gzipped at the requested
//! level, or re-encoded as estargz with the entrypoint prioritized.

use std::io::{Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use gopack_core::Result;
use oci_distribution::manifest::OciDescriptor;
use sha2::{Digest, Sha256};

use super::{estargz, DOCKER_LAYER_GZIP_MEDIA_TYPE};

/// A built application layer.
///
/// The compressed bytes are held in memory; `open` hands out a fresh
/// uncompressed reader every time, so the layer can be consumed more than
/// once (digest computation, upload, daemon tarball).
#[derive(Debug, Clone)]
pub struct AppLayer {
    compressed: Vec<u8>,
    diff_id: String,
    digest: String,
}

impl AppLayer {
    /// Build the layer for the binary at `bin_path`. The tar entry name is
    /// the entrypoint without its leading slash. A negative compression
    /// level means the gzip default.
    pub fn from_file(
        bin_path: &Path,
        entrypoint: &str,
        compression: i32,
        estargz_enabled: bool,
    ) -> Result<Self> {
        let file = std::fs::File::open(bin_path)?;
        let metadata = file.metadata()?;

        let mut header = tar::Header::new_gnu();
        header.set_mode(0o555);
        header.set_size(metadata.len());
        header.set_entry_type(tar::EntryType::Regular);

        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, entrypoint.trim_start_matches('/'), file)?;
        let tar_bytes = builder.into_inner()?;

        let level = gzip_level(compression);
        let compressed = if estargz_enabled {
            estargz::encode(&tar_bytes, entrypoint.trim_start_matches('/'), level)?
        } else {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(&tar_bytes)?;
            encoder.finish()?
        };

        // The diff-id covers whatever a runtime will see after gunzip. For
        // estargz that includes the landmark and TOC entries, so always
        // hash the decompressed stream rather than the input tar.
        let mut uncompressed = Vec::new();
        MultiGzDecoder::new(&compressed[..]).read_to_end(&mut uncompressed)?;

        Ok(AppLayer {
            diff_id: sha256_digest(&uncompressed),
            digest: sha256_digest(&compressed),
            compressed,
        })
    }

    /// Digest of the compressed bytes, `sha256:` prefixed.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Digest of the uncompressed tar, `sha256:` prefixed.
    pub fn diff_id(&self) -> &str {
        &self.diff_id
    }

    /// Compressed size in bytes.
    pub fn size(&self) -> i64 {
        self.compressed.len() as i64
    }

    /// The compressed blob, as uploaded.
    pub fn compressed_bytes(&self) -> &[u8] {
        &self.compressed
    }

    /// A fresh reader over the uncompressed tar stream.
    pub fn open(&self) -> impl Read + '_ {
        MultiGzDecoder::new(&self.compressed[..])
    }

    /// Manifest descriptor for this layer.
    pub fn descriptor(&self) -> OciDescriptor {
        OciDescriptor {
            media_type: DOCKER_LAYER_GZIP_MEDIA_TYPE.to_string(),
            digest: self.digest.clone(),
            size: self.size(),
            urls: None,
            annotations: None,
        }
    }
}

fn gzip_level(compression: i32) -> Compression {
    if compression < 0 {
        Compression::default()
    } else {
        Compression::new(compression.min(9) as u32)
    }
}

/// SHA-256 digest in OCI form: `sha256:<hex>`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_binary(dir: &TempDir, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("hello");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_single_entry_tar() {
        let dir = TempDir::new().unwrap();
        let bin = write_binary(&dir, b"#!binary");
        let layer = AppLayer::from_file(&bin, "/app/hello", -1, false).unwrap();

        let mut archive = tar::Archive::new(layer.open());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some("app/hello"));
        assert_eq!(entry.header().mode().unwrap(), 0o555);
        assert_eq!(entry.header().entry_type(), tar::EntryType::Regular);
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"#!binary");
        assert!(entries.next().is_none());
    }

    #[test]
    fn test_digests_and_size() {
        let dir = TempDir::new().unwrap();
        let bin = write_binary(&dir, b"payload");
        let layer = AppLayer::from_file(&bin, "/app/hello", -1, false).unwrap();

        assert!(layer.digest().starts_with("sha256:"));
        assert_eq!(layer.digest(), &sha256_digest(layer.compressed_bytes()));
        assert_eq!(layer.size(), layer.compressed_bytes().len() as i64);

        let mut uncompressed = Vec::new();
        layer.open().read_to_end(&mut uncompressed).unwrap();
        assert_eq!(layer.diff_id(), &sha256_digest(&uncompressed));
    }

    #[test]
    fn test_open_is_repeatable() {
        let dir = TempDir::new().unwrap();
        let bin = write_binary(&dir, b"payload");
        let layer = AppLayer::from_file(&bin, "/app/hello", -1, false).unwrap();

        let mut first = Vec::new();
        layer.open().read_to_end(&mut first).unwrap();
        let mut second = Vec::new();
        layer.open().read_to_end(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_deterministic() {
        let dir = TempDir::new().unwrap();
        let bin = write_binary(&dir, b"same bytes");
        let a = AppLayer::from_file(&bin, "/app/hello", -1, false).unwrap();
        let b = AppLayer::from_file(&bin, "/app/hello", -1, false).unwrap();
        assert_eq!(a.diff_id(), b.diff_id());
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_compression_level_zero_is_larger() {
        let dir = TempDir::new().unwrap();
        let bin = write_binary(&dir, &vec![0u8; 8192]);
        let stored = AppLayer::from_file(&bin, "/app/hello", 0, false).unwrap();
        let best = AppLayer::from_file(&bin, "/app/hello", 9, false).unwrap();
        assert!(stored.size() > best.size());
        // Same content, same diff-id, different blobs.
        assert_eq!(stored.diff_id(), best.diff_id());
        assert_ne!(stored.digest(), best.digest());
    }

    #[test]
    fn test_estargz_stream_contents() {
        let dir = TempDir::new().unwrap();
        let bin = write_binary(&dir, b"estargz payload");
        let layer = AppLayer::from_file(&bin, "/app/hello", -1, true).unwrap();

        let mut archive = tar::Archive::new(layer.open());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["app/hello", ".prefetch.landmark", "stargz.index.json"]
        );
    }

    #[test]
    fn test_descriptor() {
        let dir = TempDir::new().unwrap();
        let bin = write_binary(&dir, b"payload");
        let layer = AppLayer::from_file(&bin, "/app/hello", -1, false).unwrap();
        let desc = layer.descriptor();
        assert_eq!(desc.media_type, DOCKER_LAYER_GZIP_MEDIA_TYPE);
        assert_eq!(desc.digest, layer.digest());
        assert_eq!(desc.size, layer.size());
    }

    #[test]
    fn test_sha256_digest_known_value() {
        assert_eq!(
            sha256_digest(b"hello"),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
