//! Browser session bring-up shared by both state machines.
//!
//! `open_session` performs the launch sequence — spawn the process, connect
//! the browser endpoint, acquire the first tab (or create one), connect the
//! page endpoint, navigate — with a cancellation checkpoint after every
//! awaited step. The checkpoint closure observes the owning machine's
//! state; `close()` flipping the state mid-launch is how an in-flight
//! launch gets aborted without preemption.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use relive_browser::{BrowserHandle, CdpEvent, ChromeProcess, PageDriver};

use crate::options::{GotoOptions, LaunchOptions};

/// Everything a successful launch yields.
pub(crate) struct SessionParts {
    pub browser: Arc<BrowserHandle>,
    pub page: PageDriver,
    pub events: mpsc::UnboundedReceiver<CdpEvent>,
}

/// Why a launch did not produce a session.
pub(crate) enum LaunchFailure {
    /// The owning machine left its `Launching` state (caller invoked
    /// `close()`).
    Aborted,
    Failed(String),
}

pub(crate) async fn open_session(
    launch: &LaunchOptions,
    url: &str,
    goto: &GotoOptions,
    cancelled: &(dyn Fn() -> bool + Sync),
) -> Result<SessionParts, LaunchFailure> {
    let mut process = ChromeProcess::launch(
        &launch.executable_path,
        &launch.args,
        launch.user_data_dir.clone(),
    )
    .await
    .map_err(|e| LaunchFailure::Failed(e.to_string()))?;

    if cancelled() {
        process.kill().await;
        return Err(LaunchFailure::Aborted);
    }

    let browser = match BrowserHandle::connect(process).await {
        Ok(browser) => Arc::new(browser),
        Err(e) => return Err(LaunchFailure::Failed(e.to_string())),
    };

    if cancelled() {
        browser.close().await;
        return Err(LaunchFailure::Aborted);
    }

    let target_id = match browser.acquire_page().await {
        Ok(target_id) => target_id,
        Err(e) => {
            browser.close().await;
            return Err(LaunchFailure::Failed(e.to_string()));
        }
    };

    if cancelled() {
        browser.close().await;
        return Err(LaunchFailure::Aborted);
    }

    let page = match PageDriver::connect(browser.ws_origin(), &target_id).await {
        Ok(page) => page,
        Err(e) => {
            browser.close().await;
            return Err(LaunchFailure::Failed(e.to_string()));
        }
    };

    if cancelled() {
        page.shutdown().await;
        browser.close().await;
        return Err(LaunchFailure::Aborted);
    }

    let Some(events) = page.take_event_stream().await else {
        page.shutdown().await;
        browser.close().await;
        return Err(LaunchFailure::Failed(
            "page event stream unavailable".to_string(),
        ));
    };

    let timeout = Duration::from_millis(goto.timeout_ms);
    if let Err(e) = page.navigate(url, goto.wait_until_load, timeout).await {
        let aborted = cancelled();
        page.shutdown().await;
        browser.close().await;
        return Err(if aborted {
            LaunchFailure::Aborted
        } else {
            LaunchFailure::Failed(format!("navigation to {url} failed: {e}"))
        });
    }

    if cancelled() {
        page.shutdown().await;
        browser.close().await;
        return Err(LaunchFailure::Aborted);
    }

    Ok(SessionParts {
        browser,
        page,
        events,
    })
}
