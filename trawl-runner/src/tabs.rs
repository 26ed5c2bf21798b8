//! Hidden Tab Manager
//!
//! Thin adapter over the browser's tab lifecycle API. Opens background tabs,
//! waits for their load-complete signal with a timeout and tears them down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};
use trawl_core::domain::task::TabId;
use trawl_core::{BatchError, Result};
use url::Url;

/// Schemes the browser refuses to inject scripts into
const UNSCRIPTABLE_SCHEMES: &[&str] = &[
    "about",
    "chrome",
    "chrome-extension",
    "chrome-search",
    "data",
    "devtools",
    "edge",
    "javascript",
    "moz-extension",
    "view-source",
];

/// Store pages are protected even over https
const UNSCRIPTABLE_PREFIXES: &[&str] = &[
    "https://chrome.google.com/webstore",
    "https://chromewebstore.google.com",
    "https://microsoftedge.microsoft.com/addons",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabOptions {
    /// Whether the tab takes focus
    pub active: bool,
    pub disable_javascript: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabLoadStatus {
    Loading,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
    pub status: TabLoadStatus,
}

/// Lifecycle notification emitted by the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabUpdate {
    Complete(TabId),
    Removed(TabId),
}

/// Browser-provided tab lifecycle API
#[async_trait]
pub trait TabDriver: Send + Sync {
    async fn create_tab(&self, url: &str, options: TabOptions) -> Result<TabId>;

    /// Closes the tab, returning whether it was still open
    async fn remove_tab(&self, tab_id: TabId) -> Result<bool>;

    async fn get_tab(&self, tab_id: TabId) -> Result<Option<TabInfo>>;

    /// Stream of lifecycle updates for every tab
    fn updates(&self) -> broadcast::Receiver<TabUpdate>;
}

/// A created tab whose load has not completed yet
///
/// Owns the update listener; dropping it releases the listener.
pub struct PendingTab {
    pub tab_id: TabId,
    updates: broadcast::Receiver<TabUpdate>,
}

pub struct HiddenTabManager {
    driver: Arc<dyn TabDriver>,
    load_timeout: Duration,
}

impl HiddenTabManager {
    pub fn new(driver: Arc<dyn TabDriver>, load_timeout: Duration) -> Self {
        Self {
            driver,
            load_timeout,
        }
    }

    /// Opens a non-focused tab without waiting for its load
    pub async fn open_tab(&self, url: &str, disable_javascript: bool) -> Result<PendingTab> {
        if !is_scriptable_url(url) {
            return Err(BatchError::UnscriptableUrl(url.to_string()));
        }

        // Listen before creating so an early completion is not missed
        let updates = self.driver.updates();
        let options = TabOptions {
            active: false,
            disable_javascript,
        };

        let tab_id = tokio::time::timeout(self.load_timeout, self.driver.create_tab(url, options))
            .await
            .map_err(|_| BatchError::TabCreation(format!("creating a tab for {} timed out", url)))?
            .map_err(|e| match e {
                BatchError::TabCreation(_) => e,
                other => BatchError::TabCreation(other.to_string()),
            })?;

        debug!("Opened hidden {} for {}", tab_id, url);
        Ok(PendingTab { tab_id, updates })
    }

    /// Waits for the page-complete signal of a freshly opened tab
    ///
    /// On timeout the tab is closed before the error is returned.
    pub async fn await_load(&self, pending: PendingTab) -> Result<TabId> {
        let PendingTab { tab_id, mut updates } = pending;
        let deadline = Instant::now() + self.load_timeout;

        loop {
            match tokio::time::timeout_at(deadline, updates.recv()).await {
                Err(_) => {
                    debug!("{} did not finish loading in {:?}", tab_id, self.load_timeout);
                    self.close_hidden_tab(tab_id).await;
                    return Err(BatchError::LoadTimeout(self.load_timeout));
                }
                Ok(Ok(TabUpdate::Complete(id))) if id == tab_id => return Ok(tab_id),
                Ok(Ok(TabUpdate::Removed(id))) if id == tab_id => {
                    return Err(BatchError::TabCreation(format!(
                        "{} was closed before it finished loading",
                        tab_id
                    )));
                }
                Ok(Ok(_)) => {}
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    debug!("Tab listener lagged by {} update(s), probing {}", skipped, tab_id);
                    match self.driver.get_tab(tab_id).await? {
                        Some(info) if info.status == TabLoadStatus::Complete => return Ok(tab_id),
                        Some(_) => {}
                        None => {
                            return Err(BatchError::TabCreation(format!(
                                "{} disappeared while loading",
                                tab_id
                            )));
                        }
                    }
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    self.close_hidden_tab(tab_id).await;
                    return Err(BatchError::TabCreation("tab updates are no longer available".to_string()));
                }
            }
        }
    }

    /// Opens a hidden tab and waits until its page has loaded
    pub async fn create_hidden_tab(&self, url: &str, disable_javascript: bool) -> Result<TabId> {
        let pending = self.open_tab(url, disable_javascript).await?;
        self.await_load(pending).await
    }

    /// Closes the tab; an already-closed tab is not an error
    pub async fn close_hidden_tab(&self, tab_id: TabId) {
        match self.driver.remove_tab(tab_id).await {
            Ok(true) => debug!("Closed {}", tab_id),
            Ok(false) => debug!("{} was already closed", tab_id),
            Err(e) => warn!("Failed to close {}: {}", tab_id, e),
        }
    }

    /// Liveness check used by the cleanup sweep
    pub async fn tab_exists(&self, tab_id: TabId) -> Result<bool> {
        Ok(self.driver.get_tab(tab_id).await?.is_some())
    }
}

/// Whether scripts may be injected into a page at `raw`
pub fn is_scriptable_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };

    if UNSCRIPTABLE_SCHEMES.contains(&url.scheme()) {
        return false;
    }

    !UNSCRIPTABLE_PREFIXES
        .iter()
        .any(|prefix| url.as_str().starts_with(prefix))
}
