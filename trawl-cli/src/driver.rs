//! HTTP-backed browser
//!
//! Stands in for a real browser on the command line: a "tab" is one HTTP
//! fetch of the page, and extraction runs CSS selectors over the fetched
//! HTML. Pages are never scripted, so `disable_javascript` has no effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;
use trawl_core::domain::extraction::{ExtractionConfig, Row};
use trawl_core::domain::task::TabId;
use trawl_core::{BatchError, Result};
use trawl_runner::{
    ExtractionOutcome, ExtractionRequest, ExtractionResponse, PageMessenger, TabDriver, TabInfo,
    TabLoadStatus, TabOptions, TabUpdate,
};

const USER_AGENT: &str = concat!("trawl/", env!("CARGO_PKG_VERSION"));

struct Page {
    url: String,
    html: Option<String>,
    fetch: Option<JoinHandle<()>>,
}

type Pages = Arc<Mutex<HashMap<TabId, Page>>>;

#[derive(Clone)]
pub struct HttpBrowser {
    client: reqwest::Client,
    next_id: Arc<AtomicU64>,
    pages: Pages,
    updates: broadcast::Sender<TabUpdate>,
    responses: mpsc::UnboundedSender<ExtractionResponse>,
}

impl HttpBrowser {
    /// Creates the browser and the channel its extraction responses arrive on
    pub fn new() -> anyhow::Result<(Self, mpsc::UnboundedReceiver<ExtractionResponse>)> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        let (responses, rx) = mpsc::unbounded_channel();

        let browser = Self {
            client,
            next_id: Arc::new(AtomicU64::new(1)),
            pages: Arc::new(Mutex::new(HashMap::new())),
            updates: broadcast::channel(256).0,
            responses,
        };
        Ok((browser, rx))
    }

    fn pages(&self) -> MutexGuard<'_, HashMap<TabId, Page>> {
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TabDriver for HttpBrowser {
    async fn create_tab(&self, url: &str, _options: TabOptions) -> Result<TabId> {
        let tab_id = TabId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.pages().insert(
            tab_id,
            Page {
                url: url.to_string(),
                html: None,
                fetch: None,
            },
        );

        let fetch = {
            let client = self.client.clone();
            let pages = Arc::clone(&self.pages);
            let updates = self.updates.clone();
            let url = url.to_string();

            tokio::spawn(async move {
                let body = fetch_page(&client, &url).await;
                let mut pages = pages.lock().unwrap_or_else(|e| e.into_inner());
                let update = match body {
                    Ok(html) => match pages.get_mut(&tab_id) {
                        Some(page) => {
                            page.html = Some(html);
                            page.fetch = None;
                            TabUpdate::Complete(tab_id)
                        }
                        None => return,
                    },
                    Err(e) => {
                        debug!("Fetching {} failed: {}", url, e);
                        pages.remove(&tab_id);
                        TabUpdate::Removed(tab_id)
                    }
                };
                drop(pages);
                let _ = updates.send(update);
            })
        };

        if let Some(page) = self.pages().get_mut(&tab_id) {
            if page.html.is_none() {
                page.fetch = Some(fetch);
            }
        }

        Ok(tab_id)
    }

    async fn remove_tab(&self, tab_id: TabId) -> Result<bool> {
        let removed = self.pages().remove(&tab_id);
        let Some(page) = removed else {
            return Ok(false);
        };

        if let Some(fetch) = page.fetch {
            fetch.abort();
        }
        let _ = self.updates.send(TabUpdate::Removed(tab_id));
        Ok(true)
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<Option<TabInfo>> {
        Ok(self.pages().get(&tab_id).map(|page| TabInfo {
            id: tab_id,
            url: page.url.clone(),
            status: if page.html.is_some() {
                TabLoadStatus::Complete
            } else {
                TabLoadStatus::Loading
            },
        }))
    }

    fn updates(&self) -> broadcast::Receiver<TabUpdate> {
        self.updates.subscribe()
    }
}

#[async_trait]
impl PageMessenger for HttpBrowser {
    async fn post(&self, request: ExtractionRequest) -> Result<()> {
        let outcome = {
            let pages = self.pages();
            let html = pages
                .get(&request.tab_id)
                .and_then(|page| page.html.as_deref())
                .ok_or_else(|| BatchError::Extraction(format!("{} has no loaded page", request.tab_id)))?;

            match extract_rows(html, &request.config) {
                Ok(rows) => ExtractionOutcome::Rows { rows },
                Err((code, message)) => ExtractionOutcome::Error {
                    code: code.to_string(),
                    message,
                },
            }
        };

        self.responses
            .send(ExtractionResponse {
                correlation_id: request.correlation_id,
                outcome,
            })
            .map_err(|_| BatchError::Extraction("extraction bridge is gone".to_string()))
    }
}

async fn fetch_page(client: &reqwest::Client, url: &str) -> reqwest::Result<String> {
    client.get(url).send().await?.error_for_status()?.text().await
}

/// Runs the extraction configuration over an HTML document
///
/// One row per container match; a column whose selector matches nothing
/// yields an empty string.
pub fn extract_rows(
    html: &str,
    config: &ExtractionConfig,
) -> std::result::Result<Vec<Row>, (&'static str, String)> {
    let container = parse_selector(&config.container_selector)?;
    let columns = config
        .columns
        .iter()
        .map(|column| {
            let selector = if column.selector.trim().is_empty() {
                None
            } else {
                Some(parse_selector(&column.selector)?)
            };
            Ok((column, selector))
        })
        .collect::<std::result::Result<Vec<_>, (&'static str, String)>>()?;

    let document = Html::parse_document(html);
    let rows = document
        .select(&container)
        .map(|element| {
            columns
                .iter()
                .map(|(column, selector)| {
                    let target = match selector {
                        Some(selector) => element.select(selector).next(),
                        None => Some(element),
                    };
                    let value = target
                        .map(|target| cell_value(target, column.attribute.as_deref()))
                        .unwrap_or_default();
                    (column.name.clone(), value)
                })
                .collect::<Row>()
        })
        .collect();

    Ok(rows)
}

fn parse_selector(raw: &str) -> std::result::Result<Selector, (&'static str, String)> {
    Selector::parse(raw).map_err(|e| ("INVALID_SELECTOR", format!("'{}': {}", raw, e)))
}

fn cell_value(element: ElementRef<'_>, attribute: Option<&str>) -> String {
    match attribute {
        Some(attribute) => element.value().attr(attribute).unwrap_or_default().to_string(),
        None => element
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trawl_core::domain::extraction::ColumnDefinition;

    const PAGE: &str = r#"
        <html><body>
          <ul>
            <li class="product"><a href="/a">Lamp</a> <span class="price"> 12 EUR </span></li>
            <li class="product"><a href="/b">Desk</a></li>
          </ul>
        </body></html>
    "#;

    fn column(name: &str, selector: &str, attribute: Option<&str>) -> ColumnDefinition {
        ColumnDefinition {
            name: name.to_string(),
            selector: selector.to_string(),
            attribute: attribute.map(str::to_string),
        }
    }

    #[test]
    fn test_extract_rows() {
        let config = ExtractionConfig {
            container_selector: "li.product".to_string(),
            columns: vec![
                column("name", "a", None),
                column("link", "a", Some("href")),
                column("price", ".price", None),
                column("class", "", Some("class")),
            ],
        };

        let rows = extract_rows(PAGE, &config).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "Lamp");
        assert_eq!(rows[0]["link"], "/a");
        assert_eq!(rows[0]["price"], "12 EUR");
        assert_eq!(rows[0]["class"], "product");
        assert_eq!(rows[1]["price"], "");
    }

    #[test]
    fn test_no_container_match_yields_no_rows() {
        let config = ExtractionConfig {
            container_selector: "table tr".to_string(),
            columns: vec![column("cell", "td", None)],
        };
        assert!(extract_rows(PAGE, &config).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let config = ExtractionConfig {
            container_selector: "li[".to_string(),
            columns: vec![column("x", "a", None)],
        };
        let (code, _) = extract_rows(PAGE, &config).unwrap_err();
        assert_eq!(code, "INVALID_SELECTOR");
    }
}
