//! Chrome DevTools Protocol driver for the relive record & replay toolkit.
//!
//! This crate is the toolkit's browser collaborator: it launches a headful
//! Chrome, speaks raw CDP over WebSockets, and exposes the primitives the
//! recorder and replayer state machines are built on.
//!
//! # Architecture
//!
//! - **`chrome`** — process launcher: spawns the executable with
//!   `--remote-debugging-port=0` and a provisioned profile directory, and
//!   parses the advertised DevTools endpoint from stderr.
//! - **`cdp`** — low-level WebSocket client with JSON-RPC command/response
//!   correlation and a takeable event stream.
//! - **`browser`** — browser-level connection: target discovery/creation,
//!   OS window bounds, teardown.
//! - **`page`** — page-level driver: navigation with bounded load waits,
//!   JavaScript evaluation, host bindings, new-document scripts, selector
//!   waits, input synthesis, screenshots.
//!
//! # Example (conceptual)
//!
//! ```ignore
//! use relive_browser::{BrowserHandle, ChromeProcess, PageDriver};
//!
//! let process = ChromeProcess::launch(&executable, &[], None).await?;
//! let browser = BrowserHandle::connect(process).await?;
//! let target = browser.acquire_page().await?;
//! let page = PageDriver::connect(browser.ws_origin(), &target).await?;
//! page.navigate("https://example.com", true, timeout).await?;
//! ```

pub mod browser;
pub mod cdp;
pub mod chrome;
pub mod error;
pub mod page;

pub use browser::{BrowserHandle, PageTarget};
pub use cdp::{CdpClient, CdpEvent};
pub use chrome::ChromeProcess;
pub use error::BrowserError;
pub use page::{KeyInput, PageDriver};
