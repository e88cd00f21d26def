//! Refresh guard - at most one fetch in flight per refresher

use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::types::{AggregateResult, SentimentSource};

/// Result of one completed refresh cycle
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub updated_at: DateTime<Local>,
    pub result: AggregateResult,
}

/// What a call to [`Refresher::refresh`] did
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Completed(StatusReport),
    /// Another refresh was already in flight; nothing was fetched
    Skipped,
}

impl RefreshOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RefreshOutcome::Skipped)
    }
}

/// Owns the source and the in-flight guard shared by timer and manual refreshes
pub struct Refresher {
    source: Arc<dyn SentimentSource>,
    api_key: RwLock<Option<String>>,
    in_flight: Mutex<()>,
    last_report: RwLock<Option<StatusReport>>,
}

impl Refresher {
    pub fn new(source: Arc<dyn SentimentSource>, api_key: Option<String>) -> Self {
        Self {
            source,
            api_key: RwLock::new(api_key),
            in_flight: Mutex::new(()),
            last_report: RwLock::new(None),
        }
    }

    /// Replace the API key used by later refreshes
    pub async fn set_api_key(&self, api_key: Option<String>) {
        *self.api_key.write().await = api_key;
    }

    /// Whether a refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Run one fetch cycle unless one is already running.
    ///
    /// A concurrent caller is rejected with [`RefreshOutcome::Skipped`]; it
    /// neither waits for nor cancels the refresh in flight.
    pub async fn refresh(&self) -> RefreshOutcome {
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("An update is already in progress. Skipping this request.");
                return RefreshOutcome::Skipped;
            }
        };

        let api_key = self.api_key.read().await.clone();
        let result = self.source.fetch_aggregate(api_key.as_deref()).await;

        match &result {
            Ok(agg) if agg.triggered.is_empty() => info!("No indicators currently triggered."),
            Ok(agg) => info!("{} indicators triggered.", agg.triggered.len()),
            Err(e) => error!(
                "Failed to fetch data from {}. Reason: {}",
                self.source.name(),
                e
            ),
        }

        let report = StatusReport {
            updated_at: Local::now(),
            result,
        };
        *self.last_report.write().await = Some(report.clone());

        RefreshOutcome::Completed(report)
    }

    /// Most recent completed refresh, if any
    pub async fn last_report(&self) -> Option<StatusReport> {
        self.last_report.read().await.clone()
    }
}
