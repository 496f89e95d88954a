//! Batch runner
//!
//! Feeds harvested records through the reconciler with bounded concurrency.
//! A failing record never stops the batch. Transport failures are retried
//! with exponential backoff; since reconciliation is idempotent a retry
//! resumes from whatever the failed attempt already wrote.

use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::record::HarvestedRecord;
use backoff::ExponentialBackoffBuilder;
use compliance_common::config::ReconcileConfig;
use compliance_common::errors::{AppError, ErrorClass, ErrorCode, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One record that could not be reconciled
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub pmid: String,
    pub code: ErrorCode,
    pub class: ErrorClass,
    pub message: String,
}

impl RecordFailure {
    fn new(record: &HarvestedRecord, error: &AppError) -> Self {
        Self {
            pmid: record.pmid.clone(),
            code: error.code(),
            class: error.class(),
            message: error.to_string(),
        }
    }
}

/// Totals for one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Reconciled with at least one write
    pub changed: usize,
    /// Reconciled with nothing to write
    pub unchanged: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn succeeded(&self) -> usize {
        self.changed + self.unchanged
    }

    fn add(&mut self, record: &HarvestedRecord, result: &Result<ReconcileOutcome>) {
        self.total += 1;
        match result {
            Ok(outcome) if outcome.is_unchanged() => self.unchanged += 1,
            Ok(_) => self.changed += 1,
            Err(e) => self.failures.push(RecordFailure::new(record, e)),
        }
    }
}

pub struct BatchRunner {
    reconciler: Arc<Reconciler>,
    concurrency: usize,
    initial_retry_interval: Duration,
    retry_max_elapsed: Duration,
}

impl BatchRunner {
    pub fn new(reconciler: Arc<Reconciler>, concurrency: usize) -> Self {
        Self {
            reconciler,
            concurrency: concurrency.max(1),
            initial_retry_interval: Duration::from_millis(500),
            retry_max_elapsed: Duration::from_secs(120),
        }
    }

    pub fn from_config(reconciler: Arc<Reconciler>, config: &ReconcileConfig) -> Self {
        Self::new(reconciler, config.concurrency).with_retry(
            Duration::from_millis(500),
            config.retry_max_elapsed(),
        )
    }

    pub fn with_retry(mut self, initial_interval: Duration, max_elapsed: Duration) -> Self {
        self.initial_retry_interval = initial_interval;
        self.retry_max_elapsed = max_elapsed;
        self
    }

    /// Reconcile every record and tally the results
    pub async fn run(&self, records: Vec<HarvestedRecord>) -> BatchSummary {
        info!(records = records.len(), concurrency = self.concurrency, "Starting batch");

        let results: Vec<(HarvestedRecord, Result<ReconcileOutcome>)> = stream::iter(records)
            .map(move |record| async move {
                let result = self.reconcile_with_retry(&record).await;
                (record, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        self.reconciler.prune_locks().await;

        let mut summary = BatchSummary::default();
        for (record, result) in &results {
            summary.add(record, result);
        }

        info!(
            total = summary.total,
            changed = summary.changed,
            unchanged = summary.unchanged,
            failed = summary.failed(),
            "Batch complete"
        );
        summary
    }

    async fn reconcile_with_retry(&self, record: &HarvestedRecord) -> Result<ReconcileOutcome> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_retry_interval)
            .with_max_elapsed_time(Some(self.retry_max_elapsed))
            .build();

        let reconciler = &self.reconciler;
        backoff::future::retry(policy, move || async move {
            reconciler.reconcile(record).await.map_err(|e| {
                if e.is_retryable() {
                    warn!(pmid = %record.pmid, error = %e, "Transient failure, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }
}
