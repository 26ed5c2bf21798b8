//! Scripted browser shared by the scenario tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use trawl_core::domain::extraction::{ColumnDefinition, ExtractionConfig, Row};
use trawl_core::domain::settings::BatchSettings;
use trawl_core::domain::task::TabId;
use trawl_core::dto::batch::CreateBatch;
use trawl_core::{BatchError, Result};
use trawl_runner::{
    BatchController, ExtractionBridge, ExtractionOutcome, ExtractionRequest, ExtractionResponse,
    HiddenTabManager, PageMessenger, RunnerConfig, TabDriver, TabInfo, TabLoadStatus, TabOptions,
    TabUpdate,
};
use trawl_store::{JobStore, MemoryRecordStore, RecordStore, StoreError, VersionedRecord};

/// How the fake page behind a URL behaves
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Loads, then extraction returns `rows` rows after `delay`
    Rows { rows: usize, delay: Duration },
    /// Never reports load completion
    NeverLoads,
    /// Loads, but extraction always answers with an error
    ExtractionFails,
    /// Loads, but extraction errors on the first `failures` attempts
    FlakyExtraction { failures: u32 },
    /// Loads, but the page never answers extraction requests
    Silent,
    /// Loads, but delivering an extraction request never completes
    Unreachable,
}

#[derive(Default)]
struct BrowserState {
    next_id: u64,
    open: HashMap<TabId, (String, TabLoadStatus)>,
    behaviors: HashMap<String, Behavior>,
    opened: Vec<String>,
    extraction_calls: HashMap<String, u32>,
    peak_open: usize,
}

#[derive(Clone)]
pub struct FakeBrowser {
    state: Arc<Mutex<BrowserState>>,
    default: Behavior,
    updates: broadcast::Sender<TabUpdate>,
    responses: mpsc::UnboundedSender<ExtractionResponse>,
}

impl FakeBrowser {
    pub fn new(default: Behavior) -> (Self, mpsc::UnboundedReceiver<ExtractionResponse>) {
        let (responses, rx) = mpsc::unbounded_channel();
        let browser = Self {
            state: Arc::new(Mutex::new(BrowserState {
                next_id: 1,
                ..Default::default()
            })),
            default,
            updates: broadcast::channel(1024).0,
            responses,
        };
        (browser, rx)
    }

    pub fn script(&self, url: &str, behavior: Behavior) {
        self.state.lock().unwrap().behaviors.insert(url.to_string(), behavior);
    }

    /// Opens a tab outside of any job, already loaded
    pub fn open_user_tab(&self, url: &str) -> TabId {
        let mut state = self.state.lock().unwrap();
        let id = TabId(state.next_id);
        state.next_id += 1;
        state.open.insert(id, (url.to_string(), TabLoadStatus::Complete));
        id
    }

    /// Simulates the user closing a tab
    pub fn close_externally(&self, tab_id: TabId) {
        if self.state.lock().unwrap().open.remove(&tab_id).is_some() {
            let _ = self.updates.send(TabUpdate::Removed(tab_id));
        }
    }

    pub fn open_tabs(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    pub fn peak_open_tabs(&self) -> usize {
        self.state.lock().unwrap().peak_open
    }

    /// Tabs opened for `url` so far
    pub fn opened_for(&self, url: &str) -> usize {
        self.state.lock().unwrap().opened.iter().filter(|u| *u == url).count()
    }

    pub fn total_opened(&self) -> usize {
        self.state.lock().unwrap().opened.len()
    }

    fn behavior(&self, url: &str) -> Behavior {
        self.state
            .lock()
            .unwrap()
            .behaviors
            .get(url)
            .copied()
            .unwrap_or(self.default)
    }
}

#[async_trait]
impl TabDriver for FakeBrowser {
    async fn create_tab(&self, url: &str, options: TabOptions) -> Result<TabId> {
        assert!(!options.active, "hidden tabs must not take focus");

        let id = {
            let mut state = self.state.lock().unwrap();
            let id = TabId(state.next_id);
            state.next_id += 1;
            state.open.insert(id, (url.to_string(), TabLoadStatus::Loading));
            state.opened.push(url.to_string());
            state.peak_open = state.peak_open.max(state.open.len());
            id
        };

        if !matches!(self.behavior(url), Behavior::NeverLoads) {
            let browser = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                let loaded = match browser.state.lock().unwrap().open.get_mut(&id) {
                    Some(entry) => {
                        entry.1 = TabLoadStatus::Complete;
                        true
                    }
                    None => false,
                };
                if loaded {
                    let _ = browser.updates.send(TabUpdate::Complete(id));
                }
            });
        }

        Ok(id)
    }

    async fn remove_tab(&self, tab_id: TabId) -> Result<bool> {
        let existed = self.state.lock().unwrap().open.remove(&tab_id).is_some();
        if existed {
            let _ = self.updates.send(TabUpdate::Removed(tab_id));
        }
        Ok(existed)
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<Option<TabInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .open
            .get(&tab_id)
            .map(|(url, status)| TabInfo {
                id: tab_id,
                url: url.clone(),
                status: *status,
            }))
    }

    fn updates(&self) -> broadcast::Receiver<TabUpdate> {
        self.updates.subscribe()
    }
}

#[async_trait]
impl PageMessenger for FakeBrowser {
    async fn post(&self, request: ExtractionRequest) -> Result<()> {
        let (url, calls) = {
            let mut state = self.state.lock().unwrap();
            let Some((url, _)) = state.open.get(&request.tab_id).cloned() else {
                return Err(BatchError::Extraction(format!("{} is gone", request.tab_id)));
            };
            let calls = state.extraction_calls.entry(url.clone()).or_insert(0);
            *calls += 1;
            (url, *calls)
        };

        let (outcome, delay) = match self.behavior(&url) {
            Behavior::Rows { rows, delay } => (rows_outcome(&request.config, &url, rows), delay),
            Behavior::FlakyExtraction { failures } if calls > failures => {
                (rows_outcome(&request.config, &url, 1), Duration::ZERO)
            }
            Behavior::ExtractionFails | Behavior::FlakyExtraction { .. } => (
                ExtractionOutcome::Error {
                    code: "NO_MATCH".to_string(),
                    message: "container selector matched nothing".to_string(),
                },
                Duration::ZERO,
            ),
            Behavior::Silent | Behavior::NeverLoads => return Ok(()),
            Behavior::Unreachable => {
                std::future::pending::<()>().await;
                return Ok(());
            }
        };

        let responses = self.responses.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A page that was closed meanwhile never answers
            if !state.lock().unwrap().open.contains_key(&request.tab_id) {
                return;
            }
            let _ = responses.send(ExtractionResponse {
                correlation_id: request.correlation_id,
                outcome,
            });
        });
        Ok(())
    }
}

fn rows_outcome(config: &ExtractionConfig, url: &str, rows: usize) -> ExtractionOutcome {
    let column = config.columns[0].name.clone();
    ExtractionOutcome::Rows {
        rows: (0..rows)
            .map(|i| Row::from([(column.clone(), format!("{}#{}", url, i))]))
            .collect(),
    }
}

/// Record store whose reads and writes can be made to fail
#[derive(Default)]
pub struct FlakyRecordStore {
    inner: MemoryRecordStore,
    failing: AtomicBool,
}

impl FlakyRecordStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> std::result::Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyRecordStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<VersionedRecord>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<i64>,
        value: &str,
    ) -> std::result::Result<Option<i64>, StoreError> {
        self.check()?;
        self.inner.compare_and_set(key, expected_version, value).await
    }

    async fn delete(&self, key: &str) -> std::result::Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn keys(&self) -> std::result::Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.keys().await
    }
}

pub fn test_config() -> RunnerConfig {
    RunnerConfig {
        page_load_timeout: Duration::from_millis(200),
        extraction_timeout: Duration::from_millis(200),
        retry_base: Duration::from_millis(5),
        retry_cap: Duration::from_millis(20),
        poll_interval: Duration::from_millis(10),
        sweep_interval: Duration::from_millis(50),
        ..RunnerConfig::new("sqlite::memory:".to_string())
    }
}

pub struct Harness {
    pub store: Arc<JobStore>,
    pub browser: FakeBrowser,
    pub controller: BatchController,
}

impl Harness {
    pub fn new(default: Behavior) -> Self {
        Self::with_store(default, Arc::new(JobStore::in_memory()), test_config())
    }

    pub fn with_store(default: Behavior, store: Arc<JobStore>, config: RunnerConfig) -> Self {
        let (browser, responses) = FakeBrowser::new(default);
        let tabs = Arc::new(HiddenTabManager::new(
            Arc::new(browser.clone()),
            config.page_load_timeout,
        ));
        let bridge = Arc::new(ExtractionBridge::new(
            Arc::new(browser.clone()),
            responses,
            config.extraction_timeout,
        ));
        let controller = BatchController::new(Arc::clone(&store), tabs, bridge, config);

        Self {
            store,
            browser,
            controller,
        }
    }
}

pub fn batch(urls: &[&str], settings: BatchSettings) -> CreateBatch {
    CreateBatch {
        urls: urls.iter().map(|u| u.to_string()).collect(),
        config: ExtractionConfig {
            container_selector: ".item".to_string(),
            columns: vec![ColumnDefinition {
                name: "title".to_string(),
                selector: "h2".to_string(),
                attribute: None,
            }],
        },
        settings,
        name: "test batch".to_string(),
        origin_tab: None,
    }
}

pub fn settings(max_concurrency: u32, max_retries: u32) -> BatchSettings {
    BatchSettings {
        max_concurrency,
        delay_between_requests_ms: 0,
        max_retries,
        disable_js_rendering: false,
    }
}

pub fn fast_rows() -> Behavior {
    Behavior::Rows {
        rows: 2,
        delay: Duration::from_millis(5),
    }
}

/// Polls `check` until it holds or `within` elapses
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check().await
}
