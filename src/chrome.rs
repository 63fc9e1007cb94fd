use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use headless_chrome::protocol::cdp::Page as cdp;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::debug;

use crate::error::PageError;
use crate::page::{Locator, Page, PageProvider};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches a throwaway headless Chrome per attempt. Nothing is shared
/// between pages; the process dies with the `ChromePage` that owns it.
pub struct ChromeBrowser {
    headless: bool,
}

impl ChromeBrowser {
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }
}

impl PageProvider for ChromeBrowser {
    type Page = ChromePage;

    fn open_page(&self) -> Result<ChromePage, PageError> {
        ChromePage::launch(self.headless)
    }
}

/// One Chrome tab plus the process behind it.
pub struct ChromePage {
    _browser: Browser,
    tab: Arc<Tab>,
    /// Message of a native dialog captured by the CDP event listener,
    /// waiting to be accepted.
    dialog: Arc<Mutex<Option<String>>>,
    /// When set, locators resolve inside this frame's document. The stored
    /// string is a JS expression for the frame's `contentDocument`.
    frame_root: Option<String>,
}

impl ChromePage {
    fn launch(headless: bool) -> Result<Self, PageError> {
        let options = LaunchOptions {
            headless,
            sandbox: false,
            window_size: Some((1920, 1080)),
            args: vec![
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
            ],
            idle_browser_timeout: Duration::from_secs(120),
            ..Default::default()
        };

        let browser = Browser::new(options).map_err(PageError::browser)?;
        let tab = browser.new_tab().map_err(PageError::browser)?;

        let dialog: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let captured = dialog.clone();
        tab.add_event_listener(Arc::new(move |event: &Event| {
            if let Event::PageJavascriptDialogOpening(ev) = event {
                debug!(message = %ev.params.message, "native dialog opened");
                *captured.lock().unwrap() = Some(ev.params.message.clone());
            }
        }))
        .map_err(PageError::browser)?;

        Ok(Self {
            _browser: browser,
            tab,
            dialog,
            frame_root: None,
        })
    }

    fn root_expr(&self) -> String {
        self.frame_root
            .clone()
            .unwrap_or_else(|| "document".to_string())
    }

    /// JS expression yielding the locator's element, or null.
    fn element_expr(&self, locator: &Locator) -> String {
        let root = self.root_expr();
        match to_query(locator) {
            Query::Css(sel) => format!("{root}.querySelector('{}')", escape(&sel)),
            Query::XPath(xp) => format!(
                "{root}.evaluate('{}', {root}, null, \
                 XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
                escape(&xp)
            ),
        }
    }

    fn eval_bool(&self, js: &str) -> Result<bool, PageError> {
        let result = self.tab.evaluate(js, false).map_err(PageError::browser)?;
        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// Poll the condition until it holds or the deadline passes.
    fn wait_until(&self, what: &str, timeout: Duration, js: &str) -> Result<(), PageError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.eval_bool(js)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PageError::timed_out(what, timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn clickable_js(&self, locator: &Locator) -> String {
        // Visibility check mirrors what the site itself uses to gate
        // interaction: attached, not disabled, not display:none/hidden.
        format!(
            "(() => {{ const el = {}; if (!el || el.disabled) return false; \
             const w = el.ownerDocument.defaultView || window; \
             const s = w.getComputedStyle(el); \
             return s.display !== 'none' && s.visibility !== 'hidden'; }})()",
            self.element_expr(locator)
        )
    }

    fn presence_js(&self, locator: &Locator) -> String {
        format!("!!({})", self.element_expr(locator))
    }
}

impl Page for ChromePage {
    fn load(&mut self, url: &str) -> Result<(), PageError> {
        self.frame_root = None;
        self.dialog.lock().unwrap().take();
        self.tab.navigate_to(url).map_err(PageError::browser)?;
        self.tab.wait_until_navigated().map_err(PageError::browser)?;
        Ok(())
    }

    fn click_when_clickable(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), PageError> {
        let what = locator.to_string();
        self.wait_until(&what, timeout, &self.clickable_js(locator))?;

        if self.frame_root.is_none() {
            // Direct click through the element handle; inside a frame only
            // the script path can reach the element.
            let result = match to_query(locator) {
                Query::Css(sel) => self.tab.find_element(&sel).and_then(|el| {
                    el.click()?;
                    Ok(())
                }),
                Query::XPath(xp) => self.tab.find_element_by_xpath(&xp).and_then(|el| {
                    el.click()?;
                    Ok(())
                }),
            };
            return result.map_err(PageError::browser);
        }

        let js = format!("(() => {{ const el = {}; el.click(); }})()", self.element_expr(locator));
        self.tab.evaluate(&js, false).map_err(PageError::browser)?;
        Ok(())
    }

    fn click_js_when_present(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), PageError> {
        let what = locator.to_string();
        self.wait_until(&what, timeout, &self.presence_js(locator))?;

        // The click is deferred so a dialog raised by its handler cannot
        // wedge this evaluate call.
        let js = format!(
            "(() => {{ const el = {}; setTimeout(() => el.click(), 0); }})()",
            self.element_expr(locator)
        );
        self.tab.evaluate(&js, false).map_err(PageError::browser)?;
        Ok(())
    }

    fn accept_alert(&mut self, timeout: Duration) -> Result<String, PageError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.dialog.lock().unwrap().take() {
                self.tab
                    .call_method(cdp::HandleJavaScriptDialog {
                        accept: true,
                        prompt_text: None,
                    })
                    .map_err(PageError::browser)?;
                return Ok(message);
            }
            if Instant::now() >= deadline {
                return Err(PageError::timed_out("native dialog", timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn enter_frame(&mut self, locator: &Locator, timeout: Duration) -> Result<(), PageError> {
        let elem = self.element_expr(locator);
        // Readable means same-origin and loaded; a frame that never becomes
        // readable times out here and the attempt is retried.
        let js = format!("(() => {{ const f = {elem}; return !!(f && f.contentDocument && f.contentDocument.body); }})()");
        self.wait_until(&locator.to_string(), timeout, &js)?;
        self.frame_root = Some(format!("{elem}.contentDocument"));
        Ok(())
    }

    fn text_present(&mut self, marker: &str, timeout: Duration) -> Result<bool, PageError> {
        let root = self.root_expr();
        let js = format!(
            "!!({root}.body && {root}.body.innerText.includes('{}'))",
            escape(marker)
        );
        let deadline = Instant::now() + timeout;
        loop {
            if self.eval_bool(&js)? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn collect_texts(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Vec<String>, PageError> {
        let root = self.root_expr();
        let js = match to_query(locator) {
            Query::Css(sel) => format!(
                "JSON.stringify([...{root}.querySelectorAll('{}')].map(el => el.textContent.trim()))",
                escape(&sel)
            ),
            Query::XPath(xp) => format!(
                "(() => {{ const out = []; \
                 const it = {root}.evaluate('{}', {root}, null, \
                 XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
                 for (let i = 0; i < it.snapshotLength; i++) \
                 out.push(it.snapshotItem(i).textContent.trim()); \
                 return JSON.stringify(out); }})()",
                escape(&xp)
            ),
        };

        // Wait for at least one match, but an empty set at the deadline is
        // a legitimate answer (an empty calendar), not a timeout.
        let deadline = Instant::now() + timeout;
        loop {
            let result = self.tab.evaluate(&js, false).map_err(PageError::browser)?;
            let raw = result
                .value
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| "[]".to_string());
            let texts: Vec<String> =
                serde_json::from_str(&raw).map_err(PageError::browser)?;
            if !texts.is_empty() || Instant::now() >= deadline {
                return Ok(texts);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn close(&mut self) -> Result<(), PageError> {
        // The Chrome process itself goes down when `_browser` drops.
        self.tab.close(true).map_err(PageError::browser)?;
        Ok(())
    }
}

enum Query {
    Css(String),
    XPath(String),
}

fn to_query(locator: &Locator) -> Query {
    match locator {
        Locator::Css(sel) => Query::Css(sel.clone()),
        Locator::XPath(xp) => Query::XPath(xp.clone()),
        Locator::Id(id) => Query::XPath(format!("//*[@id={}]", xpath_literal(id))),
        Locator::PartialLinkText(text) => Query::XPath(format!(
            "//a[contains(normalize-space(.), {})]",
            xpath_literal(text)
        )),
    }
}

/// Quote a value as an XPath 1.0 string literal. XPath has no escape
/// sequence inside literals, so a value holding both quote kinds must be
/// stitched together with concat().
fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else {
        let parts: Vec<String> = value.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_and_link_text_locators_become_xpath_queries() {
        match to_query(&Locator::id("idCaptchaButton")) {
            Query::XPath(xp) => assert_eq!(xp, "//*[@id='idCaptchaButton']"),
            Query::Css(_) => panic!("id locator should resolve via xpath"),
        }
        match to_query(&Locator::partial_link_text("ELEGIR FECHA")) {
            Query::XPath(xp) => assert!(xp.contains("contains(normalize-space(.), 'ELEGIR FECHA')")),
            Query::Css(_) => panic!("link text locator should resolve via xpath"),
        }
    }

    #[test]
    fn xpath_literal_handles_embedded_quotes() {
        assert_eq!(xpath_literal("plain"), "'plain'");
        assert_eq!(xpath_literal("O'HARA"), "\"O'HARA\"");
        assert_eq!(
            xpath_literal(r#"a'b"c"#),
            r#"concat('a', "'", 'b"c')"#
        );
    }

    #[test]
    fn link_text_with_apostrophe_builds_a_valid_xpath() {
        match to_query(&Locator::partial_link_text("L'HOSPITALET")) {
            Query::XPath(xp) => {
                assert_eq!(xp, "//a[contains(normalize-space(.), \"L'HOSPITALET\")]")
            }
            Query::Css(_) => panic!("link text locator should resolve via xpath"),
        }
    }

    #[test]
    fn escape_handles_quotes_and_backslashes() {
        assert_eq!(escape("a'b"), "a\\'b");
        assert_eq!(escape(r"a\b"), r"a\\b");
    }
}
