//! Chrome process launcher.
//!
//! Spawns the configured executable with `--remote-debugging-port=0` and a
//! provisioned user-data directory, then reads the `DevTools listening on
//! ws://…` advertisement from stderr to obtain the browser-level WebSocket
//! endpoint. Ephemeral profiles are removed again when the process is
//! killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::BrowserError;

/// How long to wait for the DevTools endpoint advertisement.
pub const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

const ENDPOINT_PREFIX: &str = "DevTools listening on ";

/// Arguments every launch gets, before user-supplied ones are appended.
const BASE_ARGS: &[&str] = &[
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-default-apps",
    "--disable-extensions",
    "--disable-background-networking",
];

static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A launched Chrome process together with its DevTools endpoint.
#[derive(Debug)]
pub struct ChromeProcess {
    child: Child,
    ws_url: String,
    /// Set when the profile directory was provisioned by us and should be
    /// removed on kill.
    ephemeral_profile: Option<PathBuf>,
}

impl ChromeProcess {
    /// Launch the executable headful with a remote-debugging port.
    ///
    /// `extra_args` are appended after the base argument set (shallow
    /// merge: later flags win in Chrome). When `user_data_dir` is `None` a
    /// fresh profile directory is provisioned under the system temp dir.
    pub async fn launch(
        executable: &Path,
        extra_args: &[String],
        user_data_dir: Option<PathBuf>,
    ) -> Result<Self, BrowserError> {
        if !executable.exists() {
            return Err(BrowserError::LaunchFailed {
                reason: format!("executable not found: {}", executable.display()),
            });
        }

        let (profile_dir, ephemeral_profile) = match user_data_dir {
            Some(dir) => (dir, None),
            None => {
                let dir = provision_profile_dir()?;
                (dir.clone(), Some(dir))
            }
        };

        let mut command = Command::new(executable);
        command
            .arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .args(BASE_ARGS)
            .args(extra_args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            executable = %executable.display(),
            profile = %profile_dir.display(),
            "launching browser"
        );

        let mut child = command.spawn().map_err(|e| BrowserError::LaunchFailed {
            reason: format!("failed to spawn {}: {e}", executable.display()),
        })?;

        let stderr = child.stderr.take().ok_or_else(|| BrowserError::LaunchFailed {
            reason: "browser stderr was not captured".to_string(),
        })?;

        let ws_url =
            match wait_for_endpoint(BufReader::new(stderr), DEFAULT_ENDPOINT_TIMEOUT).await {
                Ok(url) => url,
                Err(e) => {
                    let _ = child.start_kill();
                    if let Some(dir) = &ephemeral_profile {
                        let _ = std::fs::remove_dir_all(dir);
                    }
                    return Err(e);
                }
            };

        tracing::info!(endpoint = %ws_url, "browser advertised DevTools endpoint");

        Ok(Self {
            child,
            ws_url,
            ephemeral_profile,
        })
    }

    /// Browser-level DevTools WebSocket URL.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// The `ws://host:port` origin, for building page endpoints.
    pub fn ws_origin(&self) -> Result<String, BrowserError> {
        ws_origin_of(&self.ws_url)
    }

    /// Kill the process and discard any ephemeral profile. Best effort;
    /// already-exited processes are fine.
    pub async fn kill(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        if let Some(dir) = self.ephemeral_profile.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

/// Read stderr lines until the DevTools advertisement shows up. The rest of
/// stderr keeps draining in the background so the child never blocks on a
/// full pipe.
async fn wait_for_endpoint<R>(mut reader: BufReader<R>, timeout: Duration) -> Result<String, BrowserError>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let scan = async {
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| BrowserError::LaunchFailed {
                    reason: format!("failed to read browser stderr: {e}"),
                })?;
            if n == 0 {
                return Err(BrowserError::LaunchFailed {
                    reason: "browser exited before advertising a DevTools endpoint".to_string(),
                });
            }
            tracing::trace!(line = line.trim_end(), "browser stderr");
            if let Some(url) = ws_endpoint_from_line(&line) {
                return Ok(url);
            }
        }
    };

    let url = tokio::time::timeout(timeout, scan)
        .await
        .map_err(|_| BrowserError::LaunchFailed {
            reason: format!("no DevTools endpoint within {timeout:?}"),
        })??;

    tokio::spawn(async move {
        let mut sink = String::new();
        while let Ok(n) = reader.read_line(&mut sink).await {
            if n == 0 {
                break;
            }
            sink.clear();
        }
    });

    Ok(url)
}

/// Extract the WebSocket URL from a `DevTools listening on ws://…` line.
pub fn ws_endpoint_from_line(line: &str) -> Option<String> {
    let rest = line.split(ENDPOINT_PREFIX).nth(1)?;
    let url = rest.trim();
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Some(url.to_string())
    } else {
        None
    }
}

/// Reduce a DevTools WebSocket URL to its `ws://host:port` origin.
pub fn ws_origin_of(ws_url: &str) -> Result<String, BrowserError> {
    let scheme_end = ws_url.find("://").ok_or_else(|| BrowserError::Protocol {
        detail: format!("not a WebSocket URL: {ws_url}"),
    })?;
    let after_scheme = &ws_url[scheme_end + 3..];
    let host_end = after_scheme.find('/').unwrap_or(after_scheme.len());
    Ok(format!(
        "{}://{}",
        &ws_url[..scheme_end],
        &after_scheme[..host_end]
    ))
}

/// Create a fresh owner-only profile directory under the system temp dir.
fn provision_profile_dir() -> Result<PathBuf, BrowserError> {
    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "relive-profile-{}-{}",
        std::process::id(),
        seq
    ));
    std::fs::create_dir_all(&dir).map_err(|e| BrowserError::LaunchFailed {
        reason: format!("failed to create profile dir {}: {e}", dir.display()),
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
    }

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_line_parses() {
        let line = "DevTools listening on ws://127.0.0.1:37411/devtools/browser/5a1e-99\n";
        assert_eq!(
            ws_endpoint_from_line(line).as_deref(),
            Some("ws://127.0.0.1:37411/devtools/browser/5a1e-99")
        );
    }

    #[test]
    fn unrelated_stderr_lines_are_ignored() {
        assert!(ws_endpoint_from_line("[4411:WARNING] fontconfig warning\n").is_none());
        assert!(ws_endpoint_from_line("DevTools listening on nothing useful\n").is_none());
        assert!(ws_endpoint_from_line("").is_none());
    }

    #[test]
    fn origin_extraction() {
        assert_eq!(
            ws_origin_of("ws://127.0.0.1:9222/devtools/browser/abc").unwrap(),
            "ws://127.0.0.1:9222"
        );
        assert_eq!(ws_origin_of("ws://localhost:41111").unwrap(), "ws://localhost:41111");
        assert!(ws_origin_of("not-a-url").is_err());
    }

    #[test]
    fn profile_dirs_are_unique() {
        let a = provision_profile_dir().unwrap();
        let b = provision_profile_dir().unwrap();
        assert_ne!(a, b);
        assert!(a.exists());
        assert!(b.exists());
        let _ = std::fs::remove_dir_all(&a);
        let _ = std::fs::remove_dir_all(&b);
    }

    #[tokio::test]
    async fn missing_executable_fails_fast() {
        let err = ChromeProcess::launch(Path::new("/nonexistent/chrome-binary"), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::LaunchFailed { .. }));
    }

    #[tokio::test]
    async fn endpoint_wait_times_out_on_silent_stderr() {
        // A reader that never produces the advertisement.
        let (_tx, rx) = tokio::io::duplex(64);
        let result = wait_for_endpoint(BufReader::new(rx), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(BrowserError::LaunchFailed { .. })));
    }

    #[tokio::test]
    async fn endpoint_wait_finds_url_after_noise() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = tx
                .write_all(b"[1:1:ERROR] something harmless\nDevTools listening on ws://127.0.0.1:7777/devtools/browser/xyz\n")
                .await;
        });
        let url = wait_for_endpoint(BufReader::new(rx), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(url, "ws://127.0.0.1:7777/devtools/browser/xyz");
    }
}
