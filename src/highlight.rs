//! Element Highlighting
//!
//! A single translucent overlay that can be placed over the element matching a
//! CSS selector. The overlay is owned by an [`Overlay`] value: it is installed
//! on demand and removed by [`Overlay::teardown`]. Snapshots never include it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::page::Page;
use crate::relay::Highlighter;
use crate::snapshot::OVERLAY_ATTRIBUTE;

/// Expression that finds or creates the overlay element
fn ensure_overlay_js() -> String {
    format!(
        r#"(() => {{
        let o = document.querySelector('[{attr}]');
        if (!o) {{
            o = document.createElement('div');
            o.setAttribute('{attr}', '');
            o.style.position = 'absolute';
            o.style.backgroundColor = 'rgba(0, 128, 255, 0.3)';
            o.style.border = '2px solid rgba(0, 128, 255, 0.8)';
            o.style.zIndex = '9999';
            o.style.pointerEvents = 'none';
            o.style.display = 'none';
            (document.body || document.documentElement).appendChild(o);
        }}
        return o;
    }})()"#,
        attr = OVERLAY_ATTRIBUTE
    )
}

fn install_script() -> String {
    format!("(() => {{ {}; return true; }})()", ensure_overlay_js())
}

/// Position the overlay over `selector`; evaluates to `false` when nothing matches
fn highlight_script(selector: &str) -> Result<String> {
    let selector = serde_json::to_string(selector)?;
    Ok(format!(
        r#"(() => {{
    const o = {ensure};
    const el = document.querySelector({selector});
    if (!el) {{
        o.style.display = 'none';
        return false;
    }}
    const r = el.getBoundingClientRect();
    o.style.width = `${{r.width}}px`;
    o.style.height = `${{r.height}}px`;
    o.style.top = `${{r.top + window.scrollY}}px`;
    o.style.left = `${{r.left + window.scrollX}}px`;
    o.style.display = 'block';
    return true;
}})()"#,
        ensure = ensure_overlay_js(),
        selector = selector,
    ))
}

fn clear_script() -> String {
    format!(
        "(() => {{ const o = document.querySelector('[{}]'); if (o) o.style.display = 'none'; return true; }})()",
        OVERLAY_ATTRIBUTE
    )
}

fn teardown_script() -> String {
    format!(
        "(() => {{ document.querySelectorAll('[{}]').forEach(o => o.remove()); return true; }})()",
        OVERLAY_ATTRIBUTE
    )
}

/// The highlight overlay of one page
pub struct Overlay {
    page: Arc<Page>,
    installed: AtomicBool,
}

impl Overlay {
    pub fn new(page: Arc<Page>) -> Self {
        Self {
            page,
            installed: AtomicBool::new(false),
        }
    }

    /// Whether the overlay may currently be present in the page
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Relaxed)
    }

    /// Add the (hidden) overlay element to the current document
    pub async fn install(&self) -> Result<()> {
        self.page.execute(&install_script()).await?;
        self.installed.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Cover the first element matching `selector`.
    ///
    /// Re-creates the overlay if a navigation removed it. An unmatched selector
    /// hides the overlay and returns [`Error::ElementNotFound`].
    pub async fn highlight(&self, selector: &str) -> Result<()> {
        let found: bool = self.page.evaluate(&highlight_script(selector)?).await?;
        self.installed.store(true, Ordering::Relaxed);
        if !found {
            return Err(Error::ElementNotFound(selector.to_string()));
        }
        tracing::debug!("Highlighted '{}'", selector);
        Ok(())
    }

    /// Hide the overlay
    pub async fn clear(&self) -> Result<()> {
        if self.is_installed() {
            self.page.execute(&clear_script()).await?;
        }
        Ok(())
    }

    /// Remove the overlay element from the page
    pub async fn teardown(&self) -> Result<()> {
        if self.installed.swap(false, Ordering::Relaxed) {
            self.page.execute(&teardown_script()).await?;
            tracing::debug!("Highlight overlay removed");
        }
        Ok(())
    }
}

#[async_trait]
impl Highlighter for Overlay {
    async fn highlight(&self, selector: &str) -> Result<()> {
        Overlay::highlight(self, selector).await
    }

    async fn clear(&self) -> Result<()> {
        Overlay::clear(self).await
    }

    async fn teardown(&self) -> Result<()> {
        Overlay::teardown(self).await
    }
}
