//! Go toolchain driver.
//!
//! Invokes `go build` as a subprocess for one (output path, platform)
//! pair. Cross-compilation is steered entirely through the environment:
//! `GOOS`/`GOARCH`/`CGO_ENABLED`, plus `GOARM` or `GOAMD64` when the
//! requested variant applies to the architecture.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use gopack_core::{PackError, Platform, Result};
use tokio_util::sync::CancellationToken;

/// Builds Go binaries with a fixed set of compiler options.
#[derive(Debug, Clone)]
pub struct GoBuilder {
    go_bin: String,
    main_path: PathBuf,
    cgo_enabled: bool,
    ldflags: String,
    mod_flag: String,
    trimpath: bool,
}

impl GoBuilder {
    pub fn new(
        main_path: impl Into<PathBuf>,
        cgo_enabled: bool,
        ldflags: impl Into<String>,
        mod_flag: impl Into<String>,
        trimpath: bool,
    ) -> Self {
        GoBuilder {
            go_bin: "go".to_string(),
            main_path: main_path.into(),
            cgo_enabled,
            ldflags: ldflags.into(),
            mod_flag: mod_flag.into(),
            trimpath,
        }
    }

    /// Compile the package for `platform`, writing the binary to
    /// `out_path`. On a non-zero exit the captured stdout (or stderr when
    /// stdout is empty) is attached to the error.
    pub async fn build(
        &self,
        cancel: &CancellationToken,
        out_path: &Path,
        platform: &Platform,
    ) -> Result<()> {
        let args = self.args(out_path);
        tracing::debug!(platform = %platform, ?args, "running go build");

        let mut cmd = tokio::process::Command::new(&self.go_bin);
        cmd.args(&args)
            .envs(build_env(self.cgo_enabled, platform))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            output = cmd.output() => output?,
            _ = cancel.cancelled() => return Err(PackError::Cancelled),
        };

        if output.status.success() {
            return Ok(());
        }

        let msg = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        Err(PackError::Toolchain(format!(
            "{}: {}",
            output.status,
            msg.trim_end()
        )))
    }

    fn args(&self, out_path: &Path) -> Vec<String> {
        let mut args = vec!["build".to_string()];
        if self.trimpath {
            args.push("-trimpath".to_string());
        }
        if !self.ldflags.is_empty() {
            args.push("-ldflags".to_string());
            args.push(self.ldflags.clone());
        }
        if !self.mod_flag.is_empty() {
            args.push("-mod".to_string());
            args.push(self.mod_flag.clone());
        }
        args.push("-o".to_string());
        args.push(out_path.to_string_lossy().into_owned());
        args.push(self.main_path.to_string_lossy().into_owned());
        args
    }

    #[cfg(test)]
    pub(crate) fn with_go_bin(mut self, go_bin: impl Into<String>) -> Self {
        self.go_bin = go_bin.into();
        self
    }
}

/// Environment overrides for a cross-compilation. The subprocess inherits
/// the rest of the parent environment.
///
/// `GOARM` takes the bare variant digit (5 to 7); `GOAMD64` takes a `v`
/// prefix (v1 to v4). Variants outside those ranges, and variants on any
/// other architecture, are ignored.
fn build_env(cgo_enabled: bool, platform: &Platform) -> Vec<(String, String)> {
    let mut env = vec![
        ("GOOS".to_string(), platform.os().to_string()),
        ("GOARCH".to_string(), platform.arch().to_string()),
        (
            "CGO_ENABLED".to_string(),
            if cgo_enabled { "1" } else { "0" }.to_string(),
        ),
    ];

    let variant: u32 = match platform.variant().parse() {
        Ok(v) => v,
        Err(_) => return env,
    };
    match platform.arch() {
        "arm" if (5..=7).contains(&variant) => {
            env.push(("GOARM".to_string(), variant.to_string()));
        }
        "amd64" if (1..=4).contains(&variant) => {
            env.push(("GOAMD64".to_string(), format!("v{variant}")));
        }
        _ => {}
    }
    env
}
