//! Browser-level DevTools connection.
//!
//! Owns the launched Chrome process and the browser-target WebSocket.
//! Page discovery and creation go through the `Target` domain; window
//! geometry goes through the `Browser` domain.

use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cdp::CdpClient;
use crate::chrome::ChromeProcess;
use crate::error::BrowserError;

/// A page target known to the browser.
#[derive(Debug, Clone)]
pub struct PageTarget {
    pub target_id: String,
    pub url: String,
}

/// Handle over a launched browser: process + browser-level CDP connection.
#[derive(Debug)]
pub struct BrowserHandle {
    client: Arc<CdpClient>,
    ws_origin: String,
    process: Mutex<Option<ChromeProcess>>,
}

impl BrowserHandle {
    /// Connect to the browser endpoint of a freshly launched process. The
    /// process is killed again if the connection cannot be established.
    pub async fn connect(mut process: ChromeProcess) -> Result<Self, BrowserError> {
        let ws_origin = process.ws_origin()?;
        let client = match CdpClient::connect(process.ws_url()).await {
            Ok(client) => client,
            Err(e) => {
                process.kill().await;
                return Err(e);
            }
        };
        // The browser connection is command-only; drop the event stream so
        // stray target events are discarded instead of buffered.
        let _ = client.take_event_stream().await;

        Ok(Self {
            client: Arc::new(client),
            ws_origin,
            process: Mutex::new(Some(process)),
        })
    }

    /// Whether the browser connection is still up.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// The `ws://host:port` origin shared by all page endpoints.
    pub fn ws_origin(&self) -> &str {
        &self.ws_origin
    }

    /// Page WebSocket URL for a target id.
    pub fn page_ws_url(&self, target_id: &str) -> String {
        format!("{}/devtools/page/{target_id}", self.ws_origin)
    }

    /// List the open page targets.
    pub async fn pages(&self) -> Result<Vec<PageTarget>, BrowserError> {
        let result = self
            .client
            .send_command("Target.getTargets", json!({}))
            .await?;
        let infos = result
            .get("targetInfos")
            .and_then(Value::as_array)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "Target.getTargets returned no targetInfos".to_string(),
            })?;

        let pages = infos
            .iter()
            .filter(|info| info.get("type").and_then(Value::as_str) == Some("page"))
            .filter_map(|info| {
                Some(PageTarget {
                    target_id: info.get("targetId")?.as_str()?.to_string(),
                    url: info
                        .get("url")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect();
        Ok(pages)
    }

    /// Create a new page target and return its id.
    pub async fn create_page(&self, url: &str) -> Result<String, BrowserError> {
        let result = self
            .client
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        result
            .get("targetId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "Target.createTarget returned no targetId".to_string(),
            })
    }

    /// The first open tab, or a fresh blank one when none exists.
    pub async fn acquire_page(&self) -> Result<String, BrowserError> {
        if let Some(page) = self.pages().await?.into_iter().next() {
            return Ok(page.target_id);
        }
        self.create_page("about:blank").await
    }

    /// Close one page target.
    pub async fn close_target(&self, target_id: &str) -> Result<(), BrowserError> {
        self.client
            .send_command("Target.closeTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(())
    }

    /// Close every open page in parallel, ignoring per-page failures.
    pub async fn close_all_pages(&self) {
        let targets = match self.pages().await {
            Ok(targets) => targets,
            Err(e) => {
                tracing::debug!(error = %e, "could not list pages during teardown");
                return;
            }
        };
        let closes = targets
            .iter()
            .map(|target| self.close_target(&target.target_id));
        for result in join_all(closes).await {
            if let Err(e) = result {
                tracing::debug!(error = %e, "page close failed during teardown");
            }
        }
    }

    /// Resize the OS window hosting the given target.
    pub async fn set_window_bounds(
        &self,
        target_id: &str,
        width: i64,
        height: i64,
    ) -> Result<(), BrowserError> {
        let result = self
            .client
            .send_command(
                "Browser.getWindowForTarget",
                json!({ "targetId": target_id }),
            )
            .await?;
        let window_id = result
            .get("windowId")
            .and_then(Value::as_i64)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "Browser.getWindowForTarget returned no windowId".to_string(),
            })?;

        self.client
            .send_command(
                "Browser.setWindowBounds",
                json!({
                    "windowId": window_id,
                    "bounds": { "width": width, "height": height },
                }),
            )
            .await?;
        Ok(())
    }

    /// Read the outer bounds of the window hosting the given target.
    pub async fn window_bounds(&self, target_id: &str) -> Result<(i64, i64), BrowserError> {
        let result = self
            .client
            .send_command(
                "Browser.getWindowForTarget",
                json!({ "targetId": target_id }),
            )
            .await?;
        let bounds = result.get("bounds").ok_or_else(|| BrowserError::Protocol {
            detail: "Browser.getWindowForTarget returned no bounds".to_string(),
        })?;
        let width = bounds.get("width").and_then(Value::as_i64).unwrap_or(0);
        let height = bounds.get("height").and_then(Value::as_i64).unwrap_or(0);
        Ok((width, height))
    }

    /// Tear the browser down: polite `Browser.close`, then a process kill
    /// as backstop. Always succeeds.
    pub async fn close(&self) {
        if self.client.is_connected() {
            let _ = self
                .client
                .send_command_with_timeout(
                    "Browser.close",
                    json!({}),
                    std::time::Duration::from_secs(5),
                )
                .await;
        }
        self.client.shutdown().await;
        if let Some(mut process) = self.process.lock().await.take() {
            process.kill().await;
        }
    }
}
