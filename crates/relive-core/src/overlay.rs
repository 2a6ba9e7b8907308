//! In-page replay overlay.
//!
//! A pure DOM widget injected into the target page: a replay indicator
//! badge, transient hints for clicks/inputs/keys/scrolls/resizes, and a
//! capped action history panel. Injection is idempotent
//! (`window.u4arecOverlay`) and must be repeated after every main-frame
//! navigation.
//!
//! Every call from the Rust side is guarded: visual effects must never
//! break the functional flow, so failures are swallowed and logged at
//! debug level, and everything is skipped when the option is off.

use relive_browser::page::js_string;
use relive_browser::PageDriver;

/// In-page marker object; exists exactly once per document.
pub const OVERLAY_FLAG: &str = "u4arecOverlay";

pub const OVERLAY_SCRIPT: &str = r##"(() => {
    if (window.u4arecOverlay) { return; }

    const Z = '2147483000';
    const HISTORY_LIMIT = 8;
    let indicator = null;
    let historyPanel = null;

    function make(tag, styles) {
        const node = document.createElement(tag);
        for (const key in styles) { node.style[key] = styles[key]; }
        node.setAttribute('data-u4arec-overlay', '1');
        node.style.pointerEvents = 'none';
        node.style.zIndex = Z;
        return node;
    }

    function fade(node, ms) {
        setTimeout(() => { try { node.remove(); } catch (err) {} }, ms);
    }

    function history(text) {
        try {
            if (!historyPanel || !document.body.contains(historyPanel)) {
                historyPanel = make('div', {
                    position: 'fixed', bottom: '12px', right: '12px',
                    maxWidth: '300px', padding: '6px 10px', borderRadius: '6px',
                    background: 'rgba(18,18,18,0.82)', color: '#e8e8e8',
                    font: '12px/1.5 monospace',
                });
                document.body.appendChild(historyPanel);
            }
            const line = document.createElement('div');
            line.textContent = text;
            historyPanel.appendChild(line);
            while (historyPanel.children.length > HISTORY_LIMIT) {
                historyPanel.removeChild(historyPanel.firstChild);
            }
        } catch (err) {}
    }

    function toast(text) {
        const node = make('div', {
            position: 'fixed', top: '48px', left: '50%',
            transform: 'translateX(-50%)', padding: '6px 14px',
            borderRadius: '14px', background: 'rgba(18,18,18,0.85)',
            color: '#fff', font: 'bold 13px sans-serif',
        });
        node.textContent = text;
        document.body.appendChild(node);
        fade(node, 900);
    }

    function centerOf(selector) {
        const el = selector && document.querySelector(selector);
        if (!el) { return null; }
        const rect = el.getBoundingClientRect();
        return { x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 };
    }

    window.u4arecOverlay = {
        showReplayIndicator() {
            if (indicator && document.body.contains(indicator)) { return; }
            indicator = make('div', {
                position: 'fixed', top: '12px', right: '12px',
                padding: '4px 12px', borderRadius: '12px',
                background: 'rgba(204,36,36,0.92)', color: '#fff',
                font: 'bold 12px sans-serif',
            });
            indicator.textContent = '● REPLAY';
            document.body.appendChild(indicator);
        },

        hideReplayIndicator() {
            if (indicator) { try { indicator.remove(); } catch (err) {} }
            indicator = null;
        },

        showClick(selector, x, y) {
            let point = (x == null || y == null) ? centerOf(selector) : { x: x, y: y };
            if (!point) { history('click ' + selector); return; }
            const ripple = make('div', {
                position: 'fixed',
                left: (point.x - 12) + 'px', top: (point.y - 12) + 'px',
                width: '24px', height: '24px', borderRadius: '50%',
                border: '2px solid rgba(204,36,36,0.9)',
                transition: 'transform 280ms ease-out, opacity 280ms ease-out',
            });
            document.body.appendChild(ripple);
            requestAnimationFrame(() => {
                ripple.style.transform = 'scale(1.9)';
                ripple.style.opacity = '0';
            });
            fade(ripple, 340);
            history('click ' + selector);
        },

        showInput(selector, value) {
            const el = selector && document.querySelector(selector);
            if (el) {
                const prev = el.style.outline;
                el.style.outline = '2px solid rgba(204,36,36,0.8)';
                setTimeout(() => { try { el.style.outline = prev; } catch (err) {} }, 500);
            }
            history('input ' + selector + ' = ' + value);
        },

        showKeyPress(key) {
            toast(key);
            history('keydown ' + key);
        },

        showScroll(selector) {
            history('scroll ' + selector);
        },

        showBrowserResize(fromWidth, fromHeight, toWidth, toHeight) {
            toast(fromWidth + '×' + fromHeight + ' → ' + toWidth + '×' + toHeight);
            history('resize ' + toWidth + '×' + toHeight);
        },
    };
})();"##;

/// Guarded driver for the overlay widget.
#[derive(Debug, Clone, Copy)]
pub struct Overlay {
    enabled: bool,
}

impl Overlay {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Install the widget into the current document. Idempotent; call
    /// again after every main-frame navigation.
    pub async fn inject(&self, page: &PageDriver) {
        self.run(page, OVERLAY_SCRIPT.to_string()).await;
    }

    pub async fn show_replay_indicator(&self, page: &PageDriver) {
        self.call(page, "showReplayIndicator()".to_string()).await;
    }

    pub async fn hide_replay_indicator(&self, page: &PageDriver) {
        self.call(page, "hideReplayIndicator()".to_string()).await;
    }

    pub async fn show_click(&self, page: &PageDriver, selector: &str, x: Option<i64>, y: Option<i64>) {
        let x = x.map_or("null".to_string(), |v| v.to_string());
        let y = y.map_or("null".to_string(), |v| v.to_string());
        self.call(
            page,
            format!("showClick({}, {x}, {y})", js_string(selector)),
        )
        .await;
    }

    pub async fn show_input(&self, page: &PageDriver, selector: &str, value: &str) {
        self.call(
            page,
            format!("showInput({}, {})", js_string(selector), js_string(value)),
        )
        .await;
    }

    pub async fn show_key_press(&self, page: &PageDriver, key: &str) {
        self.call(page, format!("showKeyPress({})", js_string(key))).await;
    }

    pub async fn show_scroll(&self, page: &PageDriver, selector: &str) {
        self.call(page, format!("showScroll({})", js_string(selector))).await;
    }

    pub async fn show_browser_resize(
        &self,
        page: &PageDriver,
        from_width: i64,
        from_height: i64,
        to_width: i64,
        to_height: i64,
    ) {
        self.call(
            page,
            format!("showBrowserResize({from_width}, {from_height}, {to_width}, {to_height})"),
        )
        .await;
    }

    async fn call(&self, page: &PageDriver, invocation: String) {
        self.run(
            page,
            format!("window.{OVERLAY_FLAG} && window.{OVERLAY_FLAG}.{invocation}"),
        )
        .await;
    }

    async fn run(&self, page: &PageDriver, script: String) {
        if !self.enabled {
            return;
        }
        if let Err(e) = page.evaluate(&script).await {
            tracing::debug!(error = %e, "overlay call swallowed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_is_idempotent() {
        assert!(OVERLAY_SCRIPT.contains("if (window.u4arecOverlay) { return; }"));
        assert!(OVERLAY_SCRIPT.contains("window.u4arecOverlay = {"));
    }

    #[test]
    fn script_exposes_every_hint_operation() {
        for op in [
            "showReplayIndicator",
            "hideReplayIndicator",
            "showClick",
            "showInput",
            "showKeyPress",
            "showScroll",
            "showBrowserResize",
        ] {
            assert!(OVERLAY_SCRIPT.contains(op), "missing {op}");
        }
    }

    #[test]
    fn widget_nodes_never_intercept_input() {
        assert!(OVERLAY_SCRIPT.contains("pointerEvents = 'none'"));
    }

    #[test]
    fn history_panel_is_capped() {
        assert!(OVERLAY_SCRIPT.contains("HISTORY_LIMIT = 8"));
        assert!(OVERLAY_SCRIPT.contains("children.length > HISTORY_LIMIT"));
    }

    #[test]
    fn disabled_overlay_reports_disabled() {
        assert!(!Overlay::new(false).enabled());
        assert!(Overlay::new(true).enabled());
    }
}
