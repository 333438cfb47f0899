//! Metrics pushed in by clients.
//!
//! Each ingested category gets a bounded queue. Reports wait there until the
//! scheduler's next tick, when the category's [`IngestSource`] drains them
//! into one payload.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use vigil_alerts::{AlertCategory, AlertError, CollectFuture, MetricPayload, MetricSource};

use crate::error::{ServerError, ServerResult};

/// Sending side of the per-category report queues.
#[derive(Debug, Clone, Default)]
pub struct MetricIngest {
    queues: HashMap<AlertCategory, mpsc::Sender<MetricPayload>>,
}

impl MetricIngest {
    /// Creates a queue of `capacity` for each category, returning the
    /// sending side and one source per category.
    #[must_use]
    pub fn channel(categories: &[AlertCategory], capacity: usize) -> (Self, Vec<IngestSource>) {
        let mut queues = HashMap::new();
        let mut sources = Vec::new();
        for &category in categories {
            if queues.contains_key(&category) {
                continue;
            }
            let (tx, rx) = mpsc::channel(capacity.max(1));
            queues.insert(category, tx);
            sources.push(IngestSource {
                name: format!("ingest-{category}"),
                category,
                rx: Mutex::new(rx),
            });
        }
        (Self { queues }, sources)
    }

    /// Returns true if reports for `category` are accepted.
    #[must_use]
    pub fn accepts(&self, category: AlertCategory) -> bool {
        self.queues.contains_key(&category)
    }

    /// Queues a report for the next evaluation of `category`.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::MetricsRejected` if the category is not
    /// ingested, its queue is full, or its source is gone.
    pub fn submit(&self, category: AlertCategory, metrics: MetricPayload) -> ServerResult<()> {
        let queue = self
            .queues
            .get(&category)
            .ok_or_else(|| ServerError::MetricsRejected {
                category: category.to_string(),
                reason: "category not ingested".to_string(),
            })?;
        queue
            .try_send(metrics)
            .map_err(|e| ServerError::MetricsRejected {
                category: category.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Drains the reports queued for one category.
///
/// Several reports between ticks are merged in arrival order, so a later
/// value for a key replaces an earlier one. With nothing queued the payload
/// is empty.
#[derive(Debug)]
pub struct IngestSource {
    name: String,
    category: AlertCategory,
    rx: Mutex<mpsc::Receiver<MetricPayload>>,
}

impl IngestSource {
    fn drain(&self) -> (MetricPayload, usize) {
        let mut merged = MetricPayload::new();
        let mut reports = 0;
        let mut rx = self.rx.lock();
        while let Ok(report) = rx.try_recv() {
            merged.merge(report);
            reports += 1;
        }
        (merged, reports)
    }
}

impl MetricSource for IngestSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> AlertCategory {
        self.category
    }

    fn collect(&self) -> CollectFuture<'_> {
        let (payload, reports) = self.drain();
        if reports > 0 {
            debug!(source = %self.name, reports, metrics = payload.len(), "Drained metric reports");
        }
        Box::pin(std::future::ready(Ok::<_, AlertError>(payload)))
    }
}
