//! Target platform model.
//!
//! Platforms are written as `os/arch` or `os/arch:variant` on the command
//! line. The variant is stored without a leading `v`, so `linux/amd64:v3`
//! and `linux/amd64:3` are the same platform.

use std::fmt;

/// A build target: operating system, architecture, and optional CPU variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform {
    os: String,
    arch: String,
    variant: String,
}

/// The platform assumed when none is requested.
pub fn default_platform() -> Platform {
    Platform::new("linux", "amd64", "")
}

impl Platform {
    /// Create a platform from its parts. A leading `v` on the variant is
    /// stripped.
    pub fn new(os: impl Into<String>, arch: impl Into<String>, variant: &str) -> Self {
        Platform {
            os: os.into(),
            arch: arch.into(),
            variant: variant.strip_prefix('v').unwrap_or(variant).to_string(),
        }
    }

    /// Parse a platform string right to left: the text after the first `:`
    /// is the variant, the text after the first `/` in the remainder is the
    /// arch, and whatever is left is the os. Missing sections parse as
    /// empty strings rather than errors.
    pub fn parse(s: &str) -> Self {
        let (rest, variant) = match s.find(':') {
            Some(idx) => (&s[..idx], &s[idx + 1..]),
            None => (s, ""),
        };
        let (os, arch) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        Platform::new(os, arch, variant)
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// The CPU variant without a leading `v`, or an empty string.
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Whether this platform is in the officially supported set. Anything
    /// else still builds, with a warning.
    pub fn is_supported(&self) -> bool {
        SUPPORTED.iter().any(|(os, arch, variants)| {
            self.os == *os && self.arch == *arch && variants.contains(&self.variant.as_str())
        })
    }

    /// Componentwise comparison against a platform recorded in a manifest
    /// or config. Descriptor variants conventionally carry a leading `v`
    /// (`v7`), which is normalized away before comparing.
    pub fn matches_parts(&self, os: &str, arch: &str, variant: Option<&str>) -> bool {
        let theirs = variant.unwrap_or("");
        let theirs = theirs.strip_prefix('v').unwrap_or(theirs);
        self.os == os && self.arch == arch && self.variant == theirs
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if !self.variant.is_empty() {
            write!(f, ":{}", self.variant)?;
        }
        Ok(())
    }
}

/// Officially supported (os, arch, variants) combinations.
const SUPPORTED: &[(&str, &str, &[&str])] = &[
    ("linux", "amd64", &["", "1", "2", "3", "4"]),
    ("linux", "arm64", &[""]),
    ("linux", "386", &[""]),
    ("linux", "arm", &["", "5", "6", "7"]),
];
