//! estargz encoding.
//!
//! estargz is a gzip-compatible layer format with seekable entries: every
//! tar entry is compressed as its own gzip member, a table of contents is
//! appended as a `stargz.index.json` tar entry, and a fixed-size footer
//! records where the TOC starts. Prioritized files come first in the
//! stream, followed by a `.prefetch.landmark` entry marking the prefetch
//! boundary, so a lazy-pulling runtime fetches the entrypoint before
//! anything else.
//!
//! Decompressing the whole stream with a multi-member gzip reader yields a
//! plain tar archive, so the format stays valid for runtimes that know
//! nothing about estargz.

use std::io::{Read, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use gopack_core::{PackError, Result};
use serde::Serialize;

use super::layer::sha256_digest;

/// Name of the TOC entry.
const TOC_NAME: &str = "stargz.index.json";

/// Landmark entry separating prioritized files from the rest.
const PREFETCH_LANDMARK: &str = ".prefetch.landmark";

/// Contents of a landmark entry.
const LANDMARK_CONTENTS: u8 = 0xf;

/// Size of the fixed footer member.
const FOOTER_SIZE: usize = 51;

#[derive(Serialize)]
struct Toc {
    version: u32,
    entries: Vec<TocEntry>,
}

#[derive(Serialize)]
struct TocEntry {
    name: String,
    #[serde(rename = "type")]
    entry_type: String,
    size: u64,
    mode: u32,
    offset: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    digest: String,
}

struct ParsedEntry {
    name: String,
    header: Vec<u8>,
    data: Vec<u8>,
    mode: u32,
}

/// Re-encode a tar stream as estargz, listing `prioritized` first.
pub fn encode(tar_bytes: &[u8], prioritized: &str, level: Compression) -> Result<Vec<u8>> {
    let mut entries = parse_entries(tar_bytes)?;
    entries.sort_by_key(|e| usize::from(e.name != prioritized));

    let mut out = Vec::new();
    let mut toc_entries = Vec::with_capacity(entries.len() + 1);

    for entry in &entries {
        toc_entries.push(TocEntry {
            name: entry.name.clone(),
            entry_type: "reg".to_string(),
            size: entry.data.len() as u64,
            mode: entry.mode,
            offset: out.len() as u64,
            digest: sha256_digest(&entry.data),
        });
        let member = tar_member(&entry.header, &entry.data, level)?;
        out.extend_from_slice(&member);
    }

    let landmark = [LANDMARK_CONTENTS];
    toc_entries.push(TocEntry {
        name: PREFETCH_LANDMARK.to_string(),
        entry_type: "reg".to_string(),
        size: landmark.len() as u64,
        mode: 0o644,
        offset: out.len() as u64,
        digest: sha256_digest(&landmark),
    });
    let header = entry_header(PREFETCH_LANDMARK, landmark.len() as u64, 0o644)?;
    out.extend_from_slice(&tar_member(&header, &landmark, level)?);

    let toc_offset = out.len() as u64;
    let toc_json = serde_json::to_vec(&Toc {
        version: 1,
        entries: toc_entries,
    })?;
    let header = entry_header(TOC_NAME, toc_json.len() as u64, 0o644)?;
    // The TOC member also carries the tar end-of-archive trailer.
    let mut member = GzEncoder::new(Vec::new(), level);
    member.write_all(&header)?;
    member.write_all(&toc_json)?;
    member.write_all(&padding(toc_json.len()))?;
    member.write_all(&[0u8; 1024])?;
    out.extend_from_slice(&member.finish()?);

    out.extend_from_slice(&footer_bytes(toc_offset));
    Ok(out)
}

/// Split an archive into its entries, keeping the raw 512-byte headers so
/// re-emission is byte-exact.
fn parse_entries(tar_bytes: &[u8]) -> Result<Vec<ParsedEntry>> {
    let mut archive = tar::Archive::new(tar_bytes);
    let mut out = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mode = entry.header().mode()?;
        let header = entry.header().as_bytes().to_vec();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        out.push(ParsedEntry {
            name,
            header,
            data,
            mode,
        });
    }
    Ok(out)
}

/// One gzip member holding a tar header, its data, and block padding.
fn tar_member(header: &[u8], data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), level);
    encoder.write_all(header)?;
    encoder.write_all(data)?;
    encoder.write_all(&padding(data.len()))?;
    Ok(encoder.finish()?)
}

fn entry_header(name: &str, size: u64, mode: u32) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header
        .set_path(name)
        .map_err(|e| PackError::InvalidInput(format!("tar entry name {name:?}: {e}")))?;
    header.set_size(size);
    header.set_mode(mode);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    Ok(header.as_bytes().to_vec())
}

fn padding(len: usize) -> Vec<u8> {
    vec![0u8; (512 - len % 512) % 512]
}

/// The footer is an empty gzip member whose EXTRA field records the TOC
/// offset as `%016x` followed by the `STARGZ` magic, wrapped in an `SG`
/// subfield. Built by hand so the output is byte-stable.
fn footer_bytes(toc_offset: u64) -> Vec<u8> {
    let subfield = format!("{toc_offset:016x}STARGZ");
    let mut extra = Vec::with_capacity(4 + subfield.len());
    extra.extend_from_slice(b"SG");
    extra.extend_from_slice(&(subfield.len() as u16).to_le_bytes());
    extra.extend_from_slice(subfield.as_bytes());

    let mut out = Vec::with_capacity(FOOTER_SIZE);
    // Gzip header with FEXTRA set, zero mtime, unknown OS.
    out.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff]);
    out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
    out.extend_from_slice(&extra);
    // Empty stored deflate block.
    out.extend_from_slice(&[0x01, 0x00, 0x00, 0xff, 0xff]);
    // CRC32 and length of the empty payload.
    out.extend_from_slice(&[0u8; 8]);
    debug_assert_eq!(out.len(), FOOTER_SIZE);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::{GzDecoder, MultiGzDecoder};

    fn sample_tar(name: &str, contents: &[u8]) -> Vec<u8> {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o555);
        header.set_size(contents.len() as u64);
        header.set_entry_type(tar::EntryType::Regular);
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, name, contents).unwrap();
        builder.into_inner().unwrap()
    }

    fn decompress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        MultiGzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_stream_is_valid_tar() {
        let tar_bytes = sample_tar("app/hello", b"binary contents");
        let encoded = encode(&tar_bytes, "app/hello", Compression::default()).unwrap();

        let decompressed = decompress(&encoded);
        let mut archive = tar::Archive::new(&decompressed[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["app/hello", PREFETCH_LANDMARK, TOC_NAME]);
    }

    #[test]
    fn test_prioritized_entry_comes_first() {
        let tar_bytes = sample_tar("app/hello", b"x");
        let encoded = encode(&tar_bytes, "app/hello", Compression::default()).unwrap();
        // The first gzip member starts with the entry's own tar header.
        let mut first = Vec::new();
        GzDecoder::new(&encoded[..])
            .read_to_end(&mut first)
            .unwrap();
        assert_eq!(&first[..512], &tar_bytes[..512]);
    }

    #[test]
    fn test_footer_locates_toc() {
        let tar_bytes = sample_tar("app/hello", b"binary contents");
        let encoded = encode(&tar_bytes, "app/hello", Compression::default()).unwrap();

        let footer = &encoded[encoded.len() - FOOTER_SIZE..];
        assert_eq!(&footer[..4], &[0x1f, 0x8b, 0x08, 0x04]);
        assert_eq!(&footer[12..14], b"SG");
        let subfield = std::str::from_utf8(&footer[16..38]).unwrap();
        assert!(subfield.ends_with("STARGZ"));
        let toc_offset = u64::from_str_radix(&subfield[..16], 16).unwrap() as usize;

        // The member at the recorded offset decompresses to the TOC entry.
        let mut toc_member = Vec::new();
        GzDecoder::new(&encoded[toc_offset..])
            .read_to_end(&mut toc_member)
            .unwrap();
        let name = std::str::from_utf8(&toc_member[..TOC_NAME.len()]).unwrap();
        assert_eq!(name, TOC_NAME);
    }

    #[test]
    fn test_toc_lists_entries_with_offsets() {
        let tar_bytes = sample_tar("app/hello", b"binary contents");
        let encoded = encode(&tar_bytes, "app/hello", Compression::default()).unwrap();

        let decompressed = decompress(&encoded);
        let mut archive = tar::Archive::new(&decompressed[..]);
        let toc_entry = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().to_str() == Some(TOC_NAME))
            .unwrap();
        let toc: serde_json::Value = serde_json::from_reader(toc_entry).unwrap();

        assert_eq!(toc["version"], 1);
        let entries = toc["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["name"], "app/hello");
        assert_eq!(entries[0]["offset"], 0);
        assert_eq!(entries[0]["type"], "reg");
        assert!(entries[0]["digest"]
            .as_str()
            .unwrap()
            .starts_with("sha256:"));
        assert_eq!(entries[1]["name"], PREFETCH_LANDMARK);
        assert!(entries[1]["offset"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_deterministic() {
        let tar_bytes = sample_tar("app/hello", b"same");
        let a = encode(&tar_bytes, "app/hello", Compression::default()).unwrap();
        let b = encode(&tar_bytes, "app/hello", Compression::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_footer_size_is_fixed() {
        assert_eq!(footer_bytes(0).len(), FOOTER_SIZE);
        assert_eq!(footer_bytes(u64::MAX).len(), FOOTER_SIZE);
    }
}
