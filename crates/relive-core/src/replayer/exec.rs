//! Per-action replay executors.
//!
//! A closed match on the action tag selects the right low-level primitive:
//! checkbox/radio state is restored by property set (a synthetic click
//! could toggle the wrong way), coordinate clicks replay raw gestures,
//! selector clicks fall back to the driver. Inputs set the final value
//! directly — the recording already captured it, and a property set is
//! idempotent where typed keystrokes are not.

use std::time::Duration;

use relive_browser::page::js_string;
use relive_browser::{BrowserHandle, KeyInput, PageDriver};
use relive_types::Action;

use super::ReplayError;
use crate::overlay::Overlay;

/// Bound on selector waits before an action is declared failed.
pub const SELECTOR_WAIT: Duration = Duration::from_secs(5);

/// Input `type`s that support a selection range.
const TEXT_LIKE_INPUTS: &[&str] = &["text", "search", "url", "tel", "password"];

/// Dispatch one action against the page, showing its overlay hint first.
pub async fn execute(
    page: &PageDriver,
    browser: &BrowserHandle,
    overlay: &Overlay,
    action: &Action,
) -> Result<(), ReplayError> {
    match action {
        Action::Click {
            selector, x, y, checked, ..
        } => {
            overlay.show_click(page, selector, *x, *y).await;
            if let Some(state) = checked {
                page.wait_for_selector(selector, SELECTOR_WAIT).await?;
                page.evaluate(&set_checked_script(selector, *state)).await?;
            } else if let (Some(x), Some(y)) = (x, y) {
                page.click_at(*x as f64, *y as f64).await?;
            } else {
                page.wait_for_selector(selector, SELECTOR_WAIT).await?;
                page.click_selector(selector).await?;
            }
        }
        Action::Input {
            selector,
            value,
            selection_start,
            selection_end,
            ..
        } => {
            overlay.show_input(page, selector, value).await;
            page.wait_for_selector(selector, SELECTOR_WAIT).await?;
            page.evaluate(&set_value_script(
                selector,
                value,
                *selection_start,
                *selection_end,
            ))
            .await?;
        }
        Action::Change {
            selector, checked, value, ..
        } => {
            page.wait_for_selector(selector, SELECTOR_WAIT).await?;
            if let Some(state) = checked {
                page.evaluate(&set_checked_change_script(selector, *state))
                    .await?;
            } else {
                let value = value.as_deref().unwrap_or_default();
                overlay.show_input(page, selector, value).await;
                let tag = page
                    .evaluate(&format!(
                        "(document.querySelector({sel}) || {{}}).tagName || ''",
                        sel = js_string(selector)
                    ))
                    .await?;
                if tag.as_str() == Some("SELECT") {
                    page.select_value(selector, value).await?;
                } else {
                    page.evaluate(&change_value_script(selector, value)).await?;
                }
            }
        }
        Action::Keydown { key, .. } => {
            overlay.show_key_press(page, key).await;
            page.press_key(&key_input_for(key)).await?;
        }
        Action::Scroll {
            selector,
            start_scroll_x,
            start_scroll_y,
            scroll_x,
            scroll_y,
            duration,
            ..
        } => {
            overlay.show_scroll(page, selector).await;
            page.evaluate(&scroll_animation_script(
                selector,
                (*start_scroll_x, *start_scroll_y),
                (*scroll_x, *scroll_y),
                *duration,
            ))
            .await?;
        }
        Action::BrowserResize {
            from_width,
            from_height,
            to_width,
            to_height,
            ..
        } => {
            overlay
                .show_browser_resize(page, *from_width, *from_height, *to_width, *to_height)
                .await;
            browser
                .set_window_bounds(page.target_id(), *to_width, *to_height)
                .await?;
        }
    }
    Ok(())
}

/// Restore a checkbox/radio from a recorded click: property set, then
/// DOM-level `change` and `click` events, in that order.
fn set_checked_script(selector: &str, checked: bool) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) {{ throw new Error('element not found: ' + {sel}); }}
    el.checked = {checked};
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    el.dispatchEvent(new Event('click', {{ bubbles: true }}));
}})()"#,
        sel = js_string(selector),
    )
}

/// Restore a checkbox/radio from a recorded `change`.
fn set_checked_change_script(selector: &str, checked: bool) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) {{ throw new Error('element not found: ' + {sel}); }}
    el.checked = {checked};
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
}})()"#,
        sel = js_string(selector),
    )
}

/// Set an input's final value, fire `input`, and restore the selection
/// range on text-like controls.
fn set_value_script(
    selector: &str,
    value: &str,
    selection_start: Option<i64>,
    selection_end: Option<i64>,
) -> String {
    let start = selection_start.map_or("null".to_string(), |v| v.to_string());
    let end = selection_end.map_or("null".to_string(), |v| v.to_string());
    format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) {{ throw new Error('element not found: ' + {sel}); }}
    if (el.focus) {{ el.focus(); }}
    el.value = {val};
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    const start = {start};
    const end = {end};
    if (start !== null && end !== null) {{
        const textLike = {text_like};
        const selectable = el.tagName === 'TEXTAREA' ||
            (el.tagName === 'INPUT' && textLike.indexOf(el.type) !== -1);
        if (selectable) {{
            try {{ el.setSelectionRange(start, end); }} catch (err) {{}}
        }}
    }}
}})()"#,
        sel = js_string(selector),
        val = js_string(value),
        text_like = serde_json::to_string(TEXT_LIKE_INPUTS).unwrap_or_else(|_| "[]".into()),
    )
}

/// Set a non-select control's value from a recorded `change`.
fn change_value_script(selector: &str, value: &str) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) {{ throw new Error('element not found: ' + {sel}); }}
    el.value = {val};
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
}})()"#,
        sel = js_string(selector),
        val = js_string(value),
    )
}

/// Animate a scroll from the recorded start to end position with cubic
/// ease-out over the recorded burst duration. Resolves when done.
fn scroll_animation_script(
    selector: &str,
    from: (i64, i64),
    to: (i64, i64),
    duration_ms: i64,
) -> String {
    let is_window = selector == "window";
    format!(
        r#"(() => new Promise((resolve, reject) => {{
    const isWindow = {is_window};
    const target = isWindow ? null : document.querySelector({sel});
    if (!isWindow && !target) {{ reject(new Error('element not found: ' + {sel})); return; }}
    const duration = Math.max({duration}, 1);
    const fromX = {fx}, fromY = {fy}, toX = {tx}, toY = {ty};
    const easeOut = (t) => 1 - Math.pow(1 - t, 3);
    function apply(x, y) {{
        if (target) {{ target.scrollLeft = x; target.scrollTop = y; }}
        else {{ window.scrollTo(x, y); }}
    }}
    const begin = performance.now();
    function step(now) {{
        const t = Math.min((now - begin) / duration, 1);
        const k = easeOut(t);
        apply(fromX + (toX - fromX) * k, fromY + (toY - fromY) * k);
        if (t < 1) {{ requestAnimationFrame(step); }} else {{ resolve(true); }}
    }}
    apply(fromX, fromY);
    requestAnimationFrame(step);
}}))()"#,
        is_window = is_window,
        sel = js_string(selector),
        duration = duration_ms,
        fx = from.0,
        fy = from.1,
        tx = to.0,
        ty = to.1,
    )
}

/// Key synthesis table for the capture whitelist. Unknown keys go through
/// with best-effort fields.
pub fn key_input_for(key: &str) -> KeyInput {
    let (dom_key, code, key_code, text): (&str, &str, i64, Option<&str>) = match key {
        "Enter" => ("Enter", "Enter", 13, Some("\r")),
        "Tab" => ("Tab", "Tab", 9, None),
        "Escape" => ("Escape", "Escape", 27, None),
        "Backspace" => ("Backspace", "Backspace", 8, None),
        "Delete" => ("Delete", "Delete", 46, None),
        "Home" => ("Home", "Home", 36, None),
        "End" => ("End", "End", 35, None),
        "PageUp" => ("PageUp", "PageUp", 33, None),
        "PageDown" => ("PageDown", "PageDown", 34, None),
        "Insert" => ("Insert", "Insert", 45, None),
        "Space" => (" ", "Space", 32, Some(" ")),
        "ArrowUp" => ("ArrowUp", "ArrowUp", 38, None),
        "ArrowDown" => ("ArrowDown", "ArrowDown", 40, None),
        "ArrowLeft" => ("ArrowLeft", "ArrowLeft", 37, None),
        "ArrowRight" => ("ArrowRight", "ArrowRight", 39, None),
        other => {
            return KeyInput {
                key: other.to_string(),
                code: other.to_string(),
                key_code: 0,
                text: None,
            }
        }
    };
    KeyInput {
        key: dom_key.to_string(),
        code: code.to_string(),
        key_code,
        text: text.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_table_covers_the_capture_whitelist() {
        for key in [
            "Enter", "Tab", "Escape", "Backspace", "Delete", "Home", "End", "PageUp", "PageDown",
            "Insert", "Space", "ArrowUp", "ArrowDown", "ArrowLeft", "ArrowRight",
        ] {
            let input = key_input_for(key);
            assert!(input.key_code > 0, "no keyCode for {key}");
        }
    }

    #[test]
    fn space_is_denormalized_back_to_the_dom_key() {
        let input = key_input_for("Space");
        assert_eq!(input.key, " ");
        assert_eq!(input.code, "Space");
        assert_eq!(input.key_code, 32);
        assert_eq!(input.text.as_deref(), Some(" "));
    }

    #[test]
    fn enter_commits_a_carriage_return() {
        let input = key_input_for("Enter");
        assert_eq!(input.text.as_deref(), Some("\r"));
        assert_eq!(input.key_code, 13);
    }

    #[test]
    fn unknown_keys_pass_through() {
        let input = key_input_for("F13");
        assert_eq!(input.key, "F13");
        assert_eq!(input.key_code, 0);
        assert!(input.text.is_none());
    }

    #[test]
    fn checked_script_orders_change_before_click() {
        let script = set_checked_script("#agree", true);
        assert!(script.contains("el.checked = true"));
        let change_at = script.find("new Event('change'").unwrap();
        let click_at = script.find("new Event('click'").unwrap();
        assert!(change_at < click_at);
    }

    #[test]
    fn value_script_guards_selection_by_input_type() {
        let script = set_value_script("#q", "hello", Some(2), Some(4));
        assert!(script.contains("el.value = \"hello\""));
        assert!(script.contains("setSelectionRange(start, end)"));
        for ty in TEXT_LIKE_INPUTS {
            assert!(script.contains(ty), "missing text-like type {ty}");
        }

        let script = set_value_script("#q", "hello", None, None);
        assert!(script.contains("const start = null"));
    }

    #[test]
    fn scroll_script_targets_window_or_element() {
        let script = scroll_animation_script("window", (0, 0), (0, 600), 400);
        assert!(script.contains("const isWindow = true"));
        assert!(script.contains("window.scrollTo"));
        assert!(script.contains("requestAnimationFrame"));
        assert!(script.contains("Math.pow(1 - t, 3)"));

        let script = scroll_animation_script("div.feed", (0, 10), (0, 900), 250);
        assert!(script.contains("const isWindow = false"));
        assert!(script.contains("\"div.feed\""));
        assert!(script.contains("scrollTop"));
    }

    #[test]
    fn scroll_script_clamps_zero_duration() {
        let script = scroll_animation_script("window", (0, 0), (0, 10), 0);
        assert!(script.contains("Math.max(0, 1)"));
    }

    #[test]
    fn selector_quoting_survives_hostile_input() {
        let script = change_value_script("input[name=\"a'b\"]", "x\"y");
        assert!(script.contains(r#""input[name=\"a'b\"]""#));
        assert!(script.contains(r#""x\"y""#));
    }
}
