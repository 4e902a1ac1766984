// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Exporter chain.
//!
//! Every exporter of a provider runs on its own worker task with its own
//! FIFO queue. Dispatching a batch only enqueues it on each queue, so a slow
//! or failing exporter never delays delivery to the others, and each
//! exporter sees batches in the order the provider produced them.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, warn};

use crate::exporter::{retry_with_backoff, Batch, BoxedExporter};

/// Result of a flush or shutdown for one exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum ExporterOutcome {
    /// Every batch handed over so far was transmitted.
    Flushed,
    /// At least one batch was given up on, or the exporter failed to close.
    Failed(String),
    /// The exporter did not acknowledge before the deadline.
    TimedOut,
}

impl fmt::Display for ExporterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flushed => write!(f, "flushed"),
            Self::Failed(e) => write!(f, "failed: {}", e),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Outcome for a named exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExporterReport {
    pub exporter: String,
    #[serde(flatten)]
    pub outcome: ExporterOutcome,
}

enum Command<R> {
    Export(Batch<R>),
    /// Ack carries the last error since the previous ack.
    Flush(oneshot::Sender<Option<String>>),
    Shutdown(oneshot::Sender<Option<String>>),
}

struct Worker<R> {
    name: String,
    tx: mpsc::UnboundedSender<Command<R>>,
    task: JoinHandle<()>,
}

/// The fixed, ordered exporter list of one provider.
pub(crate) struct ExporterChain<R> {
    signal: &'static str,
    workers: Vec<Worker<R>>,
}

impl<R: Send + Sync + 'static> ExporterChain<R> {
    /// Start one worker per exporter. Must be called inside a Tokio runtime.
    pub(crate) fn spawn(signal: &'static str, exporters: Vec<BoxedExporter<R>>) -> Self {
        let workers = exporters
            .into_iter()
            .map(|exporter| {
                let name = exporter.name().to_string();
                let (tx, rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(run_worker(signal, exporter, rx));
                Worker { name, tx, task }
            })
            .collect();

        Self { signal, workers }
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name.clone()).collect()
    }

    /// Hand `batch` to every exporter. Never blocks.
    pub(crate) fn dispatch(&self, batch: Batch<R>) {
        debug!(signal = self.signal, batch = batch.sequence, records = batch.len(), "Dispatching batch");
        for worker in &self.workers {
            if worker.tx.send(Command::Export(batch.clone())).is_err() {
                warn!(signal = self.signal, exporter = %worker.name, "Exporter worker stopped, batch dropped");
            }
        }
    }

    /// Wait until every exporter has worked through its queue.
    pub(crate) async fn flush(&self, deadline: Instant) -> Vec<ExporterReport> {
        let pending: Vec<_> = self
            .workers
            .iter()
            .map(|worker| {
                let (ack, rx) = oneshot::channel();
                let sent = worker.tx.send(Command::Flush(ack)).is_ok();
                (worker.name.clone(), sent.then_some(rx))
            })
            .collect();

        let mut reports = Vec::with_capacity(pending.len());
        for (name, rx) in pending {
            let outcome = await_ack(rx, deadline).await;
            reports.push(ExporterReport { exporter: name, outcome });
        }
        reports
    }

    /// Drain every queue, close every exporter and stop the workers.
    ///
    /// All exporters share `deadline`; a worker that has not acknowledged by
    /// then is aborted and reported as timed out.
    pub(crate) async fn shutdown(self, deadline: Instant) -> Vec<ExporterReport> {
        let pending: Vec<_> = self
            .workers
            .into_iter()
            .map(|worker| {
                let (ack, rx) = oneshot::channel();
                let sent = worker.tx.send(Command::Shutdown(ack)).is_ok();
                (worker.name, sent.then_some(rx), worker.task)
            })
            .collect();

        let mut reports = Vec::with_capacity(pending.len());
        for (name, rx, task) in pending {
            let outcome = await_ack(rx, deadline).await;
            if outcome == ExporterOutcome::TimedOut {
                warn!(signal = self.signal, exporter = %name, "Exporter did not flush before the deadline");
                task.abort();
            }
            reports.push(ExporterReport { exporter: name, outcome });
        }
        reports
    }
}

async fn await_ack(rx: Option<oneshot::Receiver<Option<String>>>, deadline: Instant) -> ExporterOutcome {
    let Some(rx) = rx else {
        return ExporterOutcome::Failed("exporter worker stopped".to_string());
    };
    match timeout_at(deadline, rx).await {
        Ok(Ok(None)) => ExporterOutcome::Flushed,
        Ok(Ok(Some(error))) => ExporterOutcome::Failed(error),
        Ok(Err(_)) => ExporterOutcome::Failed("exporter worker stopped".to_string()),
        Err(_) => ExporterOutcome::TimedOut,
    }
}

async fn run_worker<R: Send + Sync + 'static>(
    signal: &'static str,
    exporter: BoxedExporter<R>,
    mut rx: mpsc::UnboundedReceiver<Command<R>>,
) {
    let policy = exporter.retry_policy();
    let mut last_error: Option<String> = None;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Export(batch) => {
                let target = &*exporter;
                let pending = &batch;
                let result = retry_with_backoff(target.name(), &policy, move || target.export(pending)).await;

                match result {
                    Ok(()) => debug!(
                        signal,
                        exporter = %exporter.name(),
                        batch = batch.sequence,
                        "Batch exported"
                    ),
                    Err(e) => {
                        error!(
                            signal,
                            exporter = %exporter.name(),
                            batch = batch.sequence,
                            records = batch.len(),
                            error = %e,
                            "Giving up on batch"
                        );
                        last_error = Some(e.to_string());
                    }
                }
            }
            Command::Flush(ack) => {
                let _ = ack.send(last_error.take());
            }
            Command::Shutdown(ack) => {
                if let Err(e) = exporter.shutdown().await {
                    warn!(signal, exporter = %exporter.name(), error = %e, "Exporter failed to shut down cleanly");
                    last_error.get_or_insert_with(|| e.to_string());
                }
                let _ = ack.send(last_error.take());
                return;
            }
        }
    }

    // Chain dropped without shutdown; queued batches were still delivered.
    debug!(signal, exporter = %exporter.name(), "Exporter worker exiting");
}

/// Deadline `timeout` from now.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout
}
