//! In-page capture script.
//!
//! The script is a JavaScript literal compiled into the binary. It is
//! registered both on every new document (`Page.addScriptToEvaluateOnNewDocument`)
//! and evaluated immediately in the current one; the `window.u4arec` flag
//! makes re-injection a no-op. Captured gestures are delivered through the
//! host binding as one JSON action per call, already in canonical shape.

use relive_types::Action;

/// Host binding the script calls with each serialized action.
pub const CAPTURE_BINDING: &str = "u4arecEmit";

/// In-page flag guarding against double listener registration.
pub const INJECTED_FLAG: &str = "u4arec";

/// Quiescence window closing a scroll burst, in milliseconds.
pub const SCROLL_IDLE_MS: u64 = 150;

/// Quiescence window closing a resize burst, in milliseconds.
pub const RESIZE_IDLE_MS: u64 = 300;

/// Parse one binding payload into an [`Action`].
pub fn parse_captured_action(payload: &str) -> Result<Action, serde_json::Error> {
    serde_json::from_str(payload)
}

/// The capture listener set, installed in the document capture phase so
/// gestures are seen before page handlers can cancel them.
pub const CAPTURE_SCRIPT: &str = r##"(() => {
    if (window.u4arec) { return; }
    window.u4arec = true;

    const BINDING = 'u4arecEmit';
    const SCROLL_IDLE_MS = 150;
    const RESIZE_IDLE_MS = 300;
    const PLAIN_KEYS = ['Enter', 'Tab', 'Escape', 'Backspace', 'Delete',
                        'Home', 'End', 'PageUp', 'PageDown', 'Insert'];

    function emit(action) {
        try {
            const fn = window[BINDING];
            if (typeof fn === 'function') { fn(JSON.stringify(action)); }
        } catch (err) { /* context torn down mid-call */ }
    }

    function cssPath(el) {
        if (!el || el.nodeType !== 1) { return ''; }
        if (el.id) { return '#' + el.id; }
        const name = el.getAttribute && el.getAttribute('name');
        if (name) { return '[name="' + name + '"]'; }
        const tag = el.tagName.toLowerCase();
        if (typeof el.className === 'string' && el.className.trim()) {
            return tag + '.' + el.className.trim().split(/\s+/).join('.');
        }
        const parent = el.parentElement;
        if (!parent) { return tag; }
        const index = Array.prototype.indexOf.call(parent.children, el) + 1;
        return cssPath(parent) + ' > ' + tag + ':nth-child(' + index + ')';
    }

    function isToggle(el) {
        return el instanceof HTMLInputElement &&
            (el.type === 'checkbox' || el.type === 'radio');
    }

    document.addEventListener('click', (e) => {
        const el = e.target;
        const action = {
            type: 'click',
            timestamp: Date.now(),
            selector: cssPath(el),
            x: Math.round(e.clientX),
            y: Math.round(e.clientY),
        };
        if (isToggle(el)) { action.checked = el.checked; }
        emit(action);
    }, true);

    document.addEventListener('input', (e) => {
        const el = e.target;
        if (!el || typeof el.value !== 'string' || isToggle(el)) { return; }
        const action = {
            type: 'input',
            timestamp: Date.now(),
            selector: cssPath(el),
            value: el.value,
        };
        if (el instanceof HTMLInputElement || el instanceof HTMLTextAreaElement) {
            try {
                if (el.selectionStart !== null && el.selectionEnd !== null) {
                    action.selectionStart = el.selectionStart;
                    action.selectionEnd = el.selectionEnd;
                }
            } catch (err) { /* selection not supported for this input type */ }
        }
        emit(action);
    }, true);

    document.addEventListener('change', (e) => {
        const el = e.target;
        if (!el || !el.tagName) { return; }
        const action = {
            type: 'change',
            timestamp: Date.now(),
            selector: cssPath(el),
        };
        if (isToggle(el)) {
            action.checked = el.checked;
        } else {
            action.value = typeof el.value === 'string' ? el.value : '';
        }
        emit(action);
    }, true);

    document.addEventListener('keydown', (e) => {
        if (e.ctrlKey || e.altKey || e.metaKey) { return; }
        const key = e.key === ' ' ? 'Space' : e.key;
        const allowed = key === 'Space' ||
            key.indexOf('Arrow') === 0 ||
            PLAIN_KEYS.indexOf(key) !== -1;
        if (!allowed) { return; }
        emit({
            type: 'keydown',
            timestamp: Date.now(),
            selector: cssPath(e.target),
            key: key,
        });
    }, true);

    let scrollBurst = null;

    function scrollTargetOf(e) {
        const t = e.target;
        if (t === document || t === window || t === document.documentElement) {
            return null;
        }
        return t;
    }

    function scrollPosition(target) {
        if (!target) {
            return { x: Math.round(window.scrollX), y: Math.round(window.scrollY) };
        }
        return { x: Math.round(target.scrollLeft), y: Math.round(target.scrollTop) };
    }

    function flushScroll() {
        const burst = scrollBurst;
        scrollBurst = null;
        if (!burst) { return; }
        emit({
            type: 'scroll',
            timestamp: Date.now(),
            selector: burst.selector,
            startScrollX: burst.start.x,
            startScrollY: burst.start.y,
            scrollX: burst.last.x,
            scrollY: burst.last.y,
            duration: burst.lastAt - burst.startedAt,
        });
    }

    document.addEventListener('scroll', (e) => {
        const target = scrollTargetOf(e);
        const selector = target ? cssPath(target) : 'window';
        const now = Date.now();
        if (scrollBurst && scrollBurst.selector !== selector) {
            clearTimeout(scrollBurst.timer);
            flushScroll();
        }
        if (!scrollBurst) {
            scrollBurst = {
                selector: selector,
                start: scrollPosition(target),
                startedAt: now,
                last: null,
                lastAt: now,
                timer: null,
            };
        }
        scrollBurst.last = scrollPosition(target);
        scrollBurst.lastAt = now;
        clearTimeout(scrollBurst.timer);
        scrollBurst.timer = setTimeout(flushScroll, SCROLL_IDLE_MS);
    }, true);

    let outer = { width: window.outerWidth, height: window.outerHeight };
    let resizeTimer = null;

    window.addEventListener('resize', () => {
        clearTimeout(resizeTimer);
        resizeTimer = setTimeout(() => {
            const width = window.outerWidth;
            const height = window.outerHeight;
            if (width === outer.width && height === outer.height) { return; }
            emit({
                type: 'browser_resize',
                timestamp: Date.now(),
                fromWidth: outer.width,
                fromHeight: outer.height,
                toWidth: width,
                toHeight: height,
            });
            outer = { width: width, height: height };
        }, RESIZE_IDLE_MS);
    }, true);
})();"##;
