use std::time::Duration;

use crate::error::PageError;

/// How a step finds its target on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// CSS selector, e.g. `iframe[src*='citaconsular.es']`.
    Css(String),
    /// XPath expression, e.g. `//input[@value='Aceptar']`.
    XPath(String),
    /// Element id attribute.
    Id(String),
    /// Anchor whose visible text contains the given fragment.
    PartialLinkText(String),
}

impl Locator {
    pub fn css(s: impl Into<String>) -> Self {
        Self::Css(s.into())
    }

    pub fn xpath(s: impl Into<String>) -> Self {
        Self::XPath(s.into())
    }

    pub fn id(s: impl Into<String>) -> Self {
        Self::Id(s.into())
    }

    pub fn partial_link_text(s: impl Into<String>) -> Self {
        Self::PartialLinkText(s.into())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css '{s}'"),
            Self::XPath(s) => write!(f, "xpath '{s}'"),
            Self::Id(s) => write!(f, "id '{s}'"),
            Self::PartialLinkText(s) => write!(f, "link text containing '{s}'"),
        }
    }
}

/// One live browser page. Every wait is a bounded blocking wait; element
/// handles never cross this boundary, so each operation fuses the wait with
/// the action it gates.
pub trait Page {
    fn load(&mut self, url: &str) -> Result<(), PageError>;

    /// Wait until the element is present and interactable, then click it.
    fn click_when_clickable(&mut self, locator: &Locator, timeout: Duration)
    -> Result<(), PageError>;

    /// Wait for presence, then click via script. Bypasses overlays that
    /// would intercept a direct click.
    fn click_js_when_present(&mut self, locator: &Locator, timeout: Duration)
    -> Result<(), PageError>;

    /// Wait for a native alert/confirm dialog, accept it, and return its
    /// message text for diagnostics.
    fn accept_alert(&mut self, timeout: Duration) -> Result<String, PageError>;

    /// Wait for an embedded frame and shift interaction context into it;
    /// subsequent locators resolve inside the frame.
    fn enter_frame(&mut self, locator: &Locator, timeout: Duration) -> Result<(), PageError>;

    /// Bounded probe for a literal text marker anywhere on the page.
    /// Absence within the timeout is an expected branch, not an error.
    fn text_present(&mut self, marker: &str, timeout: Duration) -> Result<bool, PageError>;

    /// Wait for elements matching the locator and collect their text
    /// content. The set may legitimately be empty at the deadline.
    fn collect_texts(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Vec<String>, PageError>;

    /// Fixed settle pause between interactions.
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn close(&mut self) -> Result<(), PageError>;
}

/// Hands out a fresh `Page` for each flow attempt. Pages are never reused
/// across attempts.
pub trait PageProvider {
    type Page: Page;

    fn open_page(&self) -> Result<Self::Page, PageError>;
}
