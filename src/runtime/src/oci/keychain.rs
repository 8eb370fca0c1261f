//! Registry credential resolution.
//!
//! Credentials come from an ordered chain of providers: the user's Docker
//! config file, a Google Cloud token helper, then a GitHub token helper.
//! The first provider with an entry for the registry wins; otherwise the
//! request is anonymous.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use oci_distribution::secrets::RegistryAuth;
use serde::Deserialize;

/// Ordered chain of credential providers.
pub struct Keychain {
    providers: Vec<Box<dyn CredentialProvider>>,
}

trait CredentialProvider: Send + Sync {
    fn resolve(&self, registry: &str) -> Option<RegistryAuth>;
}

impl Keychain {
    /// The default chain: Docker config, Google helper, GitHub helper.
    pub fn new() -> Self {
        Keychain {
            providers: vec![
                Box::new(DockerConfigProvider::from_home()),
                Box::new(GoogleProvider),
                Box::new(GithubProvider::from_env()),
            ],
        }
    }

    /// Resolve credentials for a registry host, falling back to anonymous.
    pub fn resolve(&self, registry: &str) -> RegistryAuth {
        let registry = normalize_registry(registry);
        for provider in &self.providers {
            if let Some(auth) = provider.resolve(&registry) {
                tracing::debug!(registry = %registry, "resolved registry credentials");
                return auth;
            }
        }
        RegistryAuth::Anonymous
    }
}

impl Default for Keychain {
    fn default() -> Self {
        Keychain::new()
    }
}

/// Docker Hub is addressed by several hostnames; credentials are stored
/// under one.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    if r == "docker.io" || r == "registry-1.docker.io" {
        "index.docker.io".to_string()
    } else {
        r
    }
}

// --- Docker config file -----------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Reads `~/.docker/config.json` `auths` entries, including base64
/// `user:pass` blobs.
struct DockerConfigProvider {
    path: Option<PathBuf>,
}

impl DockerConfigProvider {
    fn from_home() -> Self {
        DockerConfigProvider {
            path: dirs::home_dir().map(|h| h.join(".docker").join("config.json")),
        }
    }

    fn load(&self) -> Option<DockerConfigFile> {
        let path = self.path.as_ref()?;
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }
}

impl CredentialProvider for DockerConfigProvider {
    fn resolve(&self, registry: &str) -> Option<RegistryAuth> {
        let config = self.load()?;
        let entry = config
            .auths
            .iter()
            .find(|(host, _)| registry_host(host) == registry)
            .map(|(_, entry)| entry)?;
        entry_auth(entry)
    }
}

/// Docker config keys are sometimes full URLs (`https://index.docker.io/v1/`).
fn registry_host(key: &str) -> String {
    let key = key
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = key.split('/').next().unwrap_or(key);
    normalize_registry(host)
}

fn entry_auth(entry: &DockerAuthEntry) -> Option<RegistryAuth> {
    if let (Some(user), Some(pass)) = (&entry.username, &entry.password) {
        return Some(RegistryAuth::Basic(user.clone(), pass.clone()));
    }
    let blob = entry.auth.as_ref()?;
    let decoded = BASE64.decode(blob.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some(RegistryAuth::Basic(user.to_string(), pass.to_string()))
}

// --- Google Cloud helper ----------------------------------------------------

/// Obtains an access token from the `gcloud` CLI for Google registries.
/// Silently yields nothing when `gcloud` is unavailable or unauthenticated.
struct GoogleProvider;

fn is_google_registry(registry: &str) -> bool {
    registry == "gcr.io"
        || registry.ends_with(".gcr.io")
        || registry.ends_with(".pkg.dev")
}

impl CredentialProvider for GoogleProvider {
    fn resolve(&self, registry: &str) -> Option<RegistryAuth> {
        if !is_google_registry(registry) {
            return None;
        }
        let output = std::process::Command::new("gcloud")
            .args(["auth", "print-access-token"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let token = String::from_utf8(output.stdout).ok()?;
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        Some(RegistryAuth::Basic(
            "oauth2accesstoken".to_string(),
            token.to_string(),
        ))
    }
}

// --- GitHub helper ----------------------------------------------------------

/// Uses `GITHUB_TOKEN` (or `GH_TOKEN`) for `ghcr.io`.
struct GithubProvider {
    token: Option<String>,
    actor: Option<String>,
}

impl GithubProvider {
    fn from_env() -> Self {
        GithubProvider {
            token: std::env::var("GITHUB_TOKEN")
                .or_else(|_| std::env::var("GH_TOKEN"))
                .ok(),
            actor: std::env::var("GITHUB_ACTOR").ok(),
        }
    }
}

impl CredentialProvider for GithubProvider {
    fn resolve(&self, registry: &str) -> Option<RegistryAuth> {
        if registry != "ghcr.io" {
            return None;
        }
        let token = self.token.clone()?;
        let user = self.actor.clone().unwrap_or_else(|| "unset".to_string());
        Some(RegistryAuth::Basic(user, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider_with(dir: &TempDir, contents: &str) -> DockerConfigProvider {
        let path = dir.path().join("config.json");
        std::fs::write(&path, contents).unwrap();
        DockerConfigProvider { path: Some(path) }
    }

    fn basic_parts(auth: RegistryAuth) -> (String, String) {
        match auth {
            RegistryAuth::Basic(u, p) => (u, p),
            _ => panic!("expected basic auth"),
        }
    }

    #[test]
    fn test_docker_config_base64_auth() {
        let dir = TempDir::new().unwrap();
        let encoded = BASE64.encode("user:secret");
        let provider = provider_with(
            &dir,
            &format!(r#"{{"auths":{{"ghcr.io":{{"auth":"{encoded}"}}}}}}"#),
        );
        let (user, pass) = basic_parts(provider.resolve("ghcr.io").unwrap());
        assert_eq!(user, "user");
        assert_eq!(pass, "secret");
    }

    #[test]
    fn test_docker_config_plain_fields() {
        let dir = TempDir::new().unwrap();
        let provider = provider_with(
            &dir,
            r#"{"auths":{"quay.io":{"username":"bot","password":"pw"}}}"#,
        );
        let (user, pass) = basic_parts(provider.resolve("quay.io").unwrap());
        assert_eq!(user, "bot");
        assert_eq!(pass, "pw");
    }

    #[test]
    fn test_docker_config_url_key_and_hub_alias() {
        let dir = TempDir::new().unwrap();
        let encoded = BASE64.encode("hubuser:hubpass");
        let provider = provider_with(
            &dir,
            &format!(r#"{{"auths":{{"https://index.docker.io/v1/":{{"auth":"{encoded}"}}}}}}"#),
        );
        // docker.io lookups normalize to index.docker.io before matching.
        let auth = provider.resolve(&normalize_registry("docker.io")).unwrap();
        assert_eq!(basic_parts(auth).0, "hubuser");
    }

    #[test]
    fn test_docker_config_missing_registry() {
        let dir = TempDir::new().unwrap();
        let provider = provider_with(&dir, r#"{"auths":{}}"#);
        assert!(provider.resolve("ghcr.io").is_none());
    }

    #[test]
    fn test_docker_config_missing_file() {
        let provider = DockerConfigProvider {
            path: Some(PathBuf::from("/nonexistent/config.json")),
        };
        assert!(provider.resolve("ghcr.io").is_none());
    }

    #[test]
    fn test_github_provider() {
        let provider = GithubProvider {
            token: Some("tok".to_string()),
            actor: None,
        };
        let (user, pass) = basic_parts(provider.resolve("ghcr.io").unwrap());
        assert_eq!(user, "unset");
        assert_eq!(pass, "tok");
        assert!(provider.resolve("gcr.io").is_none());
    }

    #[test]
    fn test_github_provider_no_token() {
        let provider = GithubProvider {
            token: None,
            actor: None,
        };
        assert!(provider.resolve("ghcr.io").is_none());
    }

    #[test]
    fn test_google_registry_detection() {
        assert!(is_google_registry("gcr.io"));
        assert!(is_google_registry("eu.gcr.io"));
        assert!(is_google_registry("us-docker.pkg.dev"));
        assert!(!is_google_registry("ghcr.io"));
        assert!(!is_google_registry("index.docker.io"));
    }

    #[test]
    fn test_normalize_registry() {
        assert_eq!(normalize_registry("docker.io"), "index.docker.io");
        assert_eq!(normalize_registry("registry-1.docker.io"), "index.docker.io");
        assert_eq!(normalize_registry("GHCR.IO"), "ghcr.io");
    }
}
