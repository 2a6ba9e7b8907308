//! Busy-indicator barrier.
//!
//! Between actions the replayer waits until no element matching the
//! configured selector list is visible. Visibility means rendered: an
//! element with `display:none`, `visibility:hidden`, or the `hidden`
//! attribute does not count.

use std::time::Duration;

use relive_browser::page::js_string;
use relive_browser::PageDriver;

use super::ReplayError;

/// Poll interval for the barrier.
pub const BUSY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Build the in-page probe: `true` while any busy indicator is visible.
fn visibility_probe(selector_list: &str) -> String {
    format!(
        r#"(() => {{
    const selectors = {list}.split(',').map(s => s.trim()).filter(Boolean);
    for (const selector of selectors) {{
        let matched;
        try {{ matched = document.querySelectorAll(selector); }} catch (err) {{ continue; }}
        for (const el of matched) {{
            const style = window.getComputedStyle(el);
            if (style.display !== 'none' && style.visibility !== 'hidden' && !el.hasAttribute('hidden')) {{
                return true;
            }}
        }}
    }}
    return false;
}})()"#,
        list = js_string(selector_list)
    )
}

/// Block until every configured busy indicator is gone.
///
/// Raises [`ReplayError::BusyTimeout`] after `timeout`, and propagates a
/// dead page immediately so a closed browser does not spin out the full
/// timeout.
pub async fn wait_until_idle(
    page: &PageDriver,
    selector_list: &str,
    timeout: Duration,
) -> Result<(), ReplayError> {
    if selector_list.trim().is_empty() {
        return Ok(());
    }
    let probe = visibility_probe(selector_list);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match page.evaluate(&probe).await {
            Ok(value) if value.as_bool() == Some(false) => return Ok(()),
            Ok(_) => {}
            Err(e) if e.is_target_closed() => return Err(ReplayError::Driver(e)),
            Err(e) => tracing::debug!(error = %e, "busy probe failed"),
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ReplayError::BusyTimeout {
                selector: selector_list.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(BUSY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_embeds_the_selector_list_safely() {
        let probe = visibility_probe(".spinner, [data-busy=\"1\"]");
        assert!(probe.contains(r#"".spinner, [data-busy=\"1\"]""#));
        assert!(probe.contains("split(',')"));
    }

    #[test]
    fn probe_checks_all_three_hidden_signals() {
        let probe = visibility_probe(".busy");
        assert!(probe.contains("display !== 'none'"));
        assert!(probe.contains("visibility !== 'hidden'"));
        assert!(probe.contains("hasAttribute('hidden')"));
    }

    #[test]
    fn busy_timeout_error_names_selector_and_timeout() {
        let err = ReplayError::BusyTimeout {
            selector: ".spinner".into(),
            timeout_ms: 300_000,
        };
        let message = err.to_string();
        assert!(message.contains(".spinner"));
        assert!(message.contains("300000"));
    }
}
