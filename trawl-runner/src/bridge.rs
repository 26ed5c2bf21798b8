//! Extraction Bridge
//!
//! Request/response protocol into a page's execution context. Each request
//! carries a correlation id; responses arrive on a separate channel and are
//! routed back to the waiting caller. At most one request is in flight per
//! tab, and every request is bounded by a timeout.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use trawl_core::domain::extraction::{ExtractionConfig, Row};
use trawl_core::domain::task::TabId;
use trawl_core::{BatchError, Result};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub correlation_id: Uuid,
    pub tab_id: TabId,
    pub config: ExtractionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResponse {
    pub correlation_id: Uuid,
    pub outcome: ExtractionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtractionOutcome {
    Rows { rows: Vec<Row> },
    Error { code: String, message: String },
}

/// Delivers requests into the page context of a tab
#[async_trait]
pub trait PageMessenger: Send + Sync {
    async fn post(&self, request: ExtractionRequest) -> Result<()>;
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<Uuid, oneshot::Sender<ExtractionOutcome>>,
    busy_tabs: HashSet<TabId>,
}

pub struct ExtractionBridge {
    messenger: Arc<dyn PageMessenger>,
    pending: Arc<Mutex<Pending>>,
    timeout: Duration,
    pump: JoinHandle<()>,
}

/// Releases the tab slot and the waiter on every exit path
struct InFlight<'a> {
    pending: &'a Mutex<Pending>,
    correlation_id: Uuid,
    tab_id: TabId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut pending = lock(self.pending);
        pending.waiters.remove(&self.correlation_id);
        pending.busy_tabs.remove(&self.tab_id);
    }
}

impl ExtractionBridge {
    /// Creates the bridge and starts routing `responses` to their callers
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        messenger: Arc<dyn PageMessenger>,
        mut responses: mpsc::UnboundedReceiver<ExtractionResponse>,
        timeout: Duration,
    ) -> Self {
        let pending = Arc::new(Mutex::new(Pending::default()));

        let pump = {
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                while let Some(response) = responses.recv().await {
                    let waiter = lock(&pending).waiters.remove(&response.correlation_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response.outcome);
                        }
                        None => debug!(
                            "Dropping extraction response {} with no waiter",
                            response.correlation_id
                        ),
                    }
                }
                debug!("Extraction response channel closed");
            })
        };

        Self {
            messenger,
            pending,
            timeout,
            pump,
        }
    }

    /// Runs the extraction configuration inside a loaded tab
    pub async fn extract(&self, tab_id: TabId, config: &ExtractionConfig) -> Result<Vec<Row>> {
        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        let _in_flight = {
            let mut pending = lock(&self.pending);
            if !pending.busy_tabs.insert(tab_id) {
                return Err(BatchError::Extraction(format!(
                    "an extraction is already in flight for {}",
                    tab_id
                )));
            }
            pending.waiters.insert(correlation_id, tx);
            InFlight {
                pending: &self.pending,
                correlation_id,
                tab_id,
            }
        };

        let request = ExtractionRequest {
            correlation_id,
            tab_id,
            config: config.clone(),
        };
        // One deadline covers delivery and the reply
        let deadline = tokio::time::Instant::now() + self.timeout;
        let exchange = async {
            if let Err(e) = self.messenger.post(request).await {
                return Err(match e {
                    BatchError::Extraction(_) => e,
                    other => BatchError::Extraction(other.to_string()),
                });
            }
            rx.await.map_err(|_| {
                warn!("Extraction response router stopped while {} was waiting", tab_id);
                BatchError::Extraction("response channel closed".to_string())
            })
        };

        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(Ok(ExtractionOutcome::Rows { rows })) => {
                debug!("{} returned {} row(s)", tab_id, rows.len());
                Ok(rows)
            }
            Ok(Ok(ExtractionOutcome::Error { code, message })) => {
                Err(BatchError::Extraction(format!("{}: {}", code, message)))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BatchError::Extraction(format!(
                "no response from {} within {}ms",
                tab_id,
                self.timeout.as_millis()
            ))),
        }
    }

    /// Number of requests still awaiting a response
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).waiters.len()
    }
}

impl Drop for ExtractionBridge {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trawl_core::domain::extraction::ColumnDefinition;

    enum Reply {
        Rows(usize),
        Error,
        Silent,
        /// Delivery itself never completes
        Hang,
    }

    struct EchoMessenger {
        reply: Reply,
        responses: mpsc::UnboundedSender<ExtractionResponse>,
    }

    #[async_trait]
    impl PageMessenger for EchoMessenger {
        async fn post(&self, request: ExtractionRequest) -> Result<()> {
            let outcome = match self.reply {
                Reply::Rows(n) => ExtractionOutcome::Rows {
                    rows: (0..n)
                        .map(|i| Row::from([(request.config.columns[0].name.clone(), i.to_string())]))
                        .collect(),
                },
                Reply::Error => ExtractionOutcome::Error {
                    code: "NO_CONTAINER".to_string(),
                    message: "container selector matched nothing".to_string(),
                },
                Reply::Silent => return Ok(()),
                Reply::Hang => {
                    std::future::pending::<()>().await;
                    return Ok(());
                }
            };
            let tx = self.responses.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = tx.send(ExtractionResponse {
                    correlation_id: request.correlation_id,
                    outcome,
                });
            });
            Ok(())
        }
    }

    fn bridge(reply: Reply, timeout: Duration) -> ExtractionBridge {
        let (tx, rx) = mpsc::unbounded_channel();
        let messenger = Arc::new(EchoMessenger {
            reply,
            responses: tx,
        });
        ExtractionBridge::new(messenger, rx, timeout)
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig {
            container_selector: "li".to_string(),
            columns: vec![ColumnDefinition {
                name: "item".to_string(),
                selector: String::new(),
                attribute: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_rows_are_routed_to_caller() {
        let bridge = bridge(Reply::Rows(3), Duration::from_secs(1));
        let rows = bridge.extract(TabId(1), &config()).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["item"], "2");
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_outcome_is_extraction_error() {
        let bridge = bridge(Reply::Error, Duration::from_secs(1));
        let err = bridge.extract(TabId(1), &config()).await.unwrap_err();
        assert!(matches!(err, BatchError::Extraction(ref m) if m.starts_with("NO_CONTAINER")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_timeout_releases_tab() {
        let bridge = bridge(Reply::Silent, Duration::from_millis(20));
        let err = bridge.extract(TabId(7), &config()).await.unwrap_err();
        assert!(matches!(err, BatchError::Extraction(_)));
        assert_eq!(bridge.in_flight(), 0);

        // The slot is free again after the timeout
        let err = bridge.extract(TabId(7), &config()).await.unwrap_err();
        assert!(!err.to_string().contains("already in flight"));
    }

    #[tokio::test]
    async fn test_hung_delivery_times_out() {
        let bridge = bridge(Reply::Hang, Duration::from_millis(30));

        let started = tokio::time::Instant::now();
        let err = bridge.extract(TabId(9), &config()).await.unwrap_err();
        assert!(matches!(err, BatchError::Extraction(ref m) if m.contains("within 30ms")));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_one_request_per_tab() {
        let bridge = Arc::new(bridge(Reply::Silent, Duration::from_millis(200)));

        let first = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.extract(TabId(3), &config()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = bridge.extract(TabId(3), &config()).await.unwrap_err();
        assert!(err.to_string().contains("already in flight"));
        assert!(bridge.extract(TabId(4), &config()).await.is_err());

        assert!(first.await.unwrap().is_err());
    }

    #[test]
    fn test_wire_format() {
        let response = ExtractionResponse {
            correlation_id: Uuid::nil(),
            outcome: ExtractionOutcome::Error {
                code: "TIMEOUT".to_string(),
                message: "slow".to_string(),
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["outcome"]["type"], "error");
        assert_eq!(json["correlationId"], Uuid::nil().to_string());
    }
}
