//! Registry client.
//!
//! Thin wrapper around the `oci-distribution` client that resolves
//! credentials through the keychain once per registry and maps transport
//! failures into the domain error. Manifests are fetched and pushed as raw
//! bytes so digests and media types stay exactly as computed.

use gopack_core::{PackError, Result};
use http::HeaderValue;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::{Reference, RegistryOperation};

use super::keychain::Keychain;

/// Manifest media types requested when fetching a base descriptor.
const MANIFEST_ACCEPT: &[&str] = &[
    super::DOCKER_MANIFEST_MEDIA_TYPE,
    super::DOCKER_MANIFEST_LIST_MEDIA_TYPE,
    super::OCI_MANIFEST_MEDIA_TYPE,
    super::OCI_INDEX_MEDIA_TYPE,
];

/// Registry client with keychain-resolved credentials.
pub struct RegistryClient {
    client: Client,
    keychain: Keychain,
}

impl RegistryClient {
    pub fn new() -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        };
        RegistryClient {
            client: Client::new(config),
            keychain: Keychain::new(),
        }
    }

    /// Fetch the raw manifest bytes and digest for a reference.
    pub async fn fetch_manifest_raw(&self, reference: &Reference) -> Result<(Vec<u8>, String)> {
        let auth = self.keychain.resolve(reference.registry());
        self.client
            .pull_manifest_raw(reference, &auth, MANIFEST_ACCEPT)
            .await
            .map_err(|e| PackError::Transport(format!("fetching manifest {reference}: {e}")))
    }

    /// Authenticate for pulls against the reference's registry. Later
    /// blob pulls reuse the cached token.
    pub async fn auth_pull(&self, reference: &Reference) -> Result<()> {
        let auth = self.keychain.resolve(reference.registry());
        self.client
            .auth(reference, &auth, RegistryOperation::Pull)
            .await
            .map_err(|e| PackError::Transport(format!("authenticating to {}: {e}", reference.registry())))?;
        Ok(())
    }

    /// Authenticate for pushes against the reference's registry.
    pub async fn auth_push(&self, reference: &Reference) -> Result<()> {
        let auth = self.keychain.resolve(reference.registry());
        self.client
            .auth(reference, &auth, RegistryOperation::Push)
            .await
            .map_err(|e| PackError::Transport(format!("authenticating to {}: {e}", reference.registry())))?;
        Ok(())
    }

    /// Pull one blob into memory.
    pub async fn pull_blob(&self, reference: &Reference, descriptor: &OciDescriptor) -> Result<Vec<u8>> {
        let mut out: Vec<u8> = Vec::with_capacity(descriptor.size.max(0) as usize);
        self.client
            .pull_blob(reference, descriptor, &mut out)
            .await
            .map_err(|e| {
                PackError::Transport(format!("pulling blob {}: {e}", descriptor.digest))
            })?;
        Ok(out)
    }

    /// Upload one blob. Registries deduplicate by digest, so re-pushing an
    /// existing blob is harmless.
    pub async fn push_blob(&self, reference: &Reference, data: &[u8], digest: &str) -> Result<()> {
        self.client
            .push_blob(reference, data, digest)
            .await
            .map_err(|e| PackError::Transport(format!("pushing blob {digest}: {e}")))?;
        Ok(())
    }

    /// Upload manifest bytes under a tag or digest reference, with the
    /// given content type.
    pub async fn push_manifest_raw(
        &self,
        reference: &Reference,
        body: Vec<u8>,
        media_type: &str,
    ) -> Result<()> {
        let content_type = HeaderValue::from_str(media_type)
            .map_err(|e| PackError::InvalidInput(format!("media type {media_type:?}: {e}")))?;
        self.client
            .push_manifest_raw(reference, body, content_type)
            .await
            .map_err(|e| PackError::Transport(format!("pushing manifest {reference}: {e}")))?;
        Ok(())
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        RegistryClient::new()
    }
}

/// Parse a reference string, annotating failures with what was being
/// parsed.
pub fn parse_reference(raw: &str, what: &str) -> Result<Reference> {
    raw.parse()
        .map_err(|e| PackError::InvalidInput(format!("parsing {what} {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_valid() {
        let reference = parse_reference("example.com/app:latest", "repository").unwrap();
        assert_eq!(reference.registry(), "example.com");
        assert_eq!(reference.repository(), "app");
        assert_eq!(reference.tag(), Some("latest"));
    }

    #[test]
    fn test_parse_reference_invalid() {
        let err = parse_reference("UPPER CASE!!", "base").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("base"), "unexpected message: {msg}");
        assert!(matches!(err, PackError::InvalidInput(_)));
    }
}
