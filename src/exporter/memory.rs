// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory exporter.
//!
//! Keeps every batch it receives so tests can inspect exactly what a
//! provider exported. It can be told to fail or to stall, which is how
//! fan-out isolation and shutdown timeouts are exercised.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::retry::RetryPolicy;
use super::{Batch, Exporter};
use crate::error::ExportError;

#[derive(Debug)]
struct MemoryState<R> {
    batches: Mutex<Vec<Batch<R>>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
    shut_down: AtomicBool,
}

/// Exporter that stores batches in memory.
///
/// Clones share storage, so a test can keep one handle and give the other
/// to a provider.
#[derive(Debug)]
pub struct InMemoryExporter<R> {
    name: String,
    state: Arc<MemoryState<R>>,
    delay: Option<Duration>,
    retry: RetryPolicy,
}

impl<R> Clone for InMemoryExporter<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            state: Arc::clone(&self.state),
            delay: self.delay,
            retry: self.retry.clone(),
        }
    }
}

impl<R> InMemoryExporter<R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(MemoryState {
                batches: Mutex::new(Vec::new()),
                attempts: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
            delay: None,
            retry: RetryPolicy::none(),
        }
    }

    /// An exporter whose every export fails with a transport error.
    pub fn failing(name: impl Into<String>) -> Self {
        let exporter = Self::new(name);
        exporter.set_failing(true);
        exporter
    }

    /// Sleep this long inside every export and shutdown.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of export calls, including failed ones and retries.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.shut_down.load(Ordering::SeqCst)
    }

    /// Successfully exported batches, in arrival order.
    pub fn batches(&self) -> Vec<Batch<R>> {
        self.state
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn batch_count(&self) -> usize {
        self.state
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<R: Clone> InMemoryExporter<R> {
    /// Every exported record, flattened across batches.
    pub fn records(&self) -> Vec<R> {
        self.batches()
            .iter()
            .flat_map(|batch| batch.records.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl<R: Send + Sync + 'static> Exporter<R> for InMemoryExporter<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(&self, batch: &Batch<R>) -> Result<(), ExportError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.state.shut_down.load(Ordering::SeqCst) {
            return Err(ExportError::Shutdown);
        }
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(ExportError::Transport(format!("{}: connection refused", self.name)));
        }

        self.state
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch.clone());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.state.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    fn batch(records: Vec<u32>, sequence: u64) -> Batch<u32> {
        Batch::new(Arc::new(Resource::default()), records, sequence)
    }

    #[tokio::test]
    async fn test_stores_batches_in_order() {
        let exporter = InMemoryExporter::new("mem");
        let handle = exporter.clone();

        exporter.export(&batch(vec![1, 2], 1)).await.unwrap();
        exporter.export(&batch(vec![3], 2)).await.unwrap();

        assert_eq!(handle.records(), vec![1, 2, 3]);
        assert_eq!(handle.batch_count(), 2);
        assert_eq!(handle.batches()[1].sequence, 2);
    }

    #[tokio::test]
    async fn test_failing_exporter_records_attempts() {
        let exporter = InMemoryExporter::<u32>::failing("broken");
        let err = exporter.export(&batch(vec![1], 1)).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(exporter.attempts(), 1);
        assert_eq!(exporter.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let exporter = InMemoryExporter::<u32>::new("mem");
        exporter.shutdown().await.unwrap();

        assert!(exporter.is_shut_down());
        assert!(matches!(
            exporter.export(&batch(vec![1], 1)).await,
            Err(ExportError::Shutdown)
        ));
    }
}
