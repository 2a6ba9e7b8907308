//! Page-level driver.
//!
//! One [`PageDriver`] per tab: navigation with a bounded load wait,
//! JavaScript evaluation, host bindings, new-document script registration,
//! selector waits, input synthesis, and screenshots. Cloneable; the single
//! event stream is handed to whichever task pumps page events.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::cdp::{CdpClient, CdpEvent};
use crate::error::BrowserError;

/// Poll interval for load and selector waits.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A synthesized key press, CDP `Input.dispatchKeyEvent` flavored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    /// DOM `key` value (`"Enter"`, `" "`, `"ArrowDown"`, ...).
    pub key: String,
    /// DOM `code` value (`"Enter"`, `"Space"`, ...).
    pub code: String,
    /// Legacy `keyCode`, still consulted by plenty of page handlers.
    pub key_code: i64,
    /// Committed text, when the key produces any (`"\r"` for Enter).
    pub text: Option<String>,
}

/// Driver over one page target.
#[derive(Debug, Clone)]
pub struct PageDriver {
    client: Arc<CdpClient>,
    target_id: String,
}

impl PageDriver {
    /// Connect to a page target and enable the domains the toolkit needs
    /// (`Page`, `Runtime`, `Network`, `DOM`).
    pub async fn connect(ws_origin: &str, target_id: &str) -> Result<Self, BrowserError> {
        let ws_url = format!("{ws_origin}/devtools/page/{target_id}");
        let client = CdpClient::connect(&ws_url).await?;
        for domain in ["Page", "Runtime", "Network", "DOM"] {
            client.enable_domain(domain).await?;
        }
        Ok(Self {
            client: Arc::new(client),
            target_id: target_id.to_string(),
        })
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Take the page event stream (once). The receiver yields `None` when
    /// the connection drops — that is the disconnect signal.
    pub async fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<CdpEvent>> {
        self.client.take_event_stream().await
    }

    /// Navigate and optionally wait for the document to finish loading.
    pub async fn navigate(
        &self,
        url: &str,
        wait_for_load: bool,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let result = self
            .client
            .send_command("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            return Err(BrowserError::NavigationFailed {
                reason: error_text.to_string(),
            });
        }
        if wait_for_load {
            self.wait_for_load(timeout).await?;
        }
        Ok(())
    }

    /// Reload the current document and wait for it to load.
    pub async fn reload(&self, timeout: Duration) -> Result<(), BrowserError> {
        self.client.send_command("Page.reload", json!({})).await?;
        self.wait_for_load(timeout).await
    }

    /// Wait for `document.readyState === "complete"`.
    ///
    /// Polled instead of listening for `Page.loadEventFired` so the event
    /// stream stays free for its owner. The initial sleep lets the new
    /// document replace the old one, whose readyState would satisfy the
    /// poll immediately.
    pub async fn wait_for_load(&self, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        tokio::time::sleep(POLL_INTERVAL).await;
        loop {
            match self.evaluate("document.readyState").await {
                Ok(value) if value.as_str() == Some("complete") => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_target_closed() => return Err(e),
                // Transient while the new execution context spins up.
                Err(e) => tracing::trace!(error = %e, "readyState probe failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::PageLoadTimeout { duration: timeout });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Evaluate an expression in the page (`returnByValue`, awaiting
    /// promises). Page exceptions surface as [`BrowserError::JsException`].
    pub async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let reply = self
            .client
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = reply.get("exceptionDetails") {
            return Err(BrowserError::JsException {
                message: exception_summary(details),
            });
        }
        Ok(reply.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// Expose a host binding callable from the page as
    /// `window.<name>(string)`. Re-registration is tolerated.
    pub async fn expose_binding(&self, name: &str) -> Result<(), BrowserError> {
        match self
            .client
            .send_command("Runtime.addBinding", json!({ "name": name }))
            .await
        {
            Ok(_) => Ok(()),
            Err(BrowserError::Cdp { message, .. }) if message.contains("already exists") => {
                tracing::debug!(binding = name, "binding already registered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Register a script that runs in every new document before page
    /// scripts do.
    pub async fn add_script_on_new_document(&self, source: &str) -> Result<(), BrowserError> {
        self.client
            .send_command(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
            )
            .await?;
        Ok(())
    }

    /// Poll until a selector matches, or fail with
    /// [`BrowserError::SelectorTimeout`].
    pub async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let probe = format!("!!document.querySelector({})", js_string(selector));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.evaluate(&probe).await {
                Ok(value) if value.as_bool() == Some(true) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_target_closed() => return Err(e),
                Err(e) => tracing::trace!(error = %e, selector, "selector probe failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::SelectorTimeout {
                    selector: selector.to_string(),
                    duration: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Click the center of the element matching a selector
    /// (`DOM.querySelector` → box model → synthesized mouse events).
    pub async fn click_selector(&self, selector: &str) -> Result<(), BrowserError> {
        let node_id = self
            .query_selector(selector)
            .await?
            .ok_or_else(|| BrowserError::ElementNotFound {
                selector: selector.to_string(),
            })?;

        // Best effort; off-screen elements still get a coordinate below.
        let _ = self
            .client
            .send_command("DOM.scrollIntoViewIfNeeded", json!({ "nodeId": node_id }))
            .await;

        let (x, y) = self.box_center(node_id, selector).await?;
        self.click_at(x, y).await
    }

    /// Synthesize a left click at viewport coordinates.
    pub async fn click_at(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        self.client
            .send_command(
                "Input.dispatchMouseEvent",
                json!({ "type": "mouseMoved", "x": x, "y": y }),
            )
            .await?;
        for event_type in ["mousePressed", "mouseReleased"] {
            self.client
                .send_command(
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": event_type,
                        "x": x,
                        "y": y,
                        "button": "left",
                        "clickCount": 1,
                    }),
                )
                .await?;
        }
        Ok(())
    }

    /// Synthesize a key press (down + up) toward the focused element.
    pub async fn press_key(&self, input: &KeyInput) -> Result<(), BrowserError> {
        let mut down = json!({
            "type": "keyDown",
            "key": input.key,
            "code": input.code,
            "windowsVirtualKeyCode": input.key_code,
            "nativeVirtualKeyCode": input.key_code,
        });
        if let Some(text) = &input.text {
            down["text"] = json!(text);
            down["unmodifiedText"] = json!(text);
        }
        self.client
            .send_command("Input.dispatchKeyEvent", down)
            .await?;
        self.client
            .send_command(
                "Input.dispatchKeyEvent",
                json!({
                    "type": "keyUp",
                    "key": input.key,
                    "code": input.code,
                    "windowsVirtualKeyCode": input.key_code,
                    "nativeVirtualKeyCode": input.key_code,
                }),
            )
            .await?;
        Ok(())
    }

    /// Set a `<select>`'s value and fire its `input`/`change` events.
    pub async fn select_value(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) throw new Error("element not found: " + {sel});
    el.value = {val};
    el.dispatchEvent(new Event("input", {{ bubbles: true }}));
    el.dispatchEvent(new Event("change", {{ bubbles: true }}));
}})()"#,
            sel = js_string(selector),
            val = js_string(value),
        );
        self.evaluate(&script).await?;
        Ok(())
    }

    /// Capture a screenshot. `format` is `"png"` or `"jpeg"`.
    pub async fn screenshot(&self, format: &str, full_page: bool) -> Result<Vec<u8>, BrowserError> {
        let mut params = json!({ "format": format });
        if full_page {
            params["captureBeyondViewport"] = json!(true);
        }
        let result = self
            .client
            .send_command("Page.captureScreenshot", params)
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "Page.captureScreenshot returned no data".to_string(),
            })?;
        B64.decode(data).map_err(|e| BrowserError::Protocol {
            detail: format!("failed to decode screenshot base64: {e}"),
        })
    }

    /// Best-effort close of the page connection (not the tab).
    pub async fn shutdown(&self) {
        self.client.shutdown().await;
    }

    async fn query_selector(&self, selector: &str) -> Result<Option<i64>, BrowserError> {
        let doc = self
            .client
            .send_command("DOM.getDocument", json!({}))
            .await?;
        let root_id = doc
            .get("root")
            .and_then(|r| r.get("nodeId"))
            .and_then(Value::as_i64)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "DOM.getDocument returned no root nodeId".to_string(),
            })?;

        let result = self
            .client
            .send_command(
                "DOM.querySelector",
                json!({ "nodeId": root_id, "selector": selector }),
            )
            .await?;
        let node_id = result.get("nodeId").and_then(Value::as_i64).unwrap_or(0);
        Ok((node_id != 0).then_some(node_id))
    }

    async fn box_center(&self, node_id: i64, selector: &str) -> Result<(f64, f64), BrowserError> {
        let reply = self
            .client
            .send_command("DOM.getBoxModel", json!({ "nodeId": node_id }))
            .await?;
        let quad: Vec<f64> = reply
            .pointer("/model/content")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        content_quad_center(&quad).ok_or_else(|| BrowserError::ElementNotFound {
            selector: selector.to_string(),
        })
    }
}

/// Embed a Rust string as a JS string literal (JSON escaping).
pub fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// One-line summary of CDP `exceptionDetails`: the thrown value's
/// description (first line) when present, the detail text otherwise, with
/// the script line appended when the protocol reports one.
fn exception_summary(details: &Value) -> String {
    let thrown = details
        .pointer("/exception/description")
        .or_else(|| details.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("uncaught exception");
    let headline = thrown.lines().next().unwrap_or(thrown);
    match details.get("lineNumber").and_then(Value::as_i64) {
        Some(line) => format!("{headline} (line {line})"),
        None => headline.to_string(),
    }
}

/// Centroid of a content quad's four `(x, y)` corners. `None` when the
/// quad is malformed or collapsed to a line or point — such an element
/// occupies no clickable area.
fn content_quad_center(quad: &[f64]) -> Option<(f64, f64)> {
    let corners: Vec<(f64, f64)> = quad.chunks_exact(2).map(|c| (c[0], c[1])).collect();
    if corners.len() != 4 {
        return None;
    }
    let collapsed = corners.iter().all(|c| c.0 == corners[0].0)
        || corners.iter().all(|c| c.1 == corners[0].1);
    if collapsed {
        return None;
    }
    let cx = corners.iter().map(|c| c.0).sum::<f64>() / 4.0;
    let cy = corners.iter().map(|c| c.1).sum::<f64>() / 4.0;
    Some((cx, cy))
}
