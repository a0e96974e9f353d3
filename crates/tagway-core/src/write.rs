// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bounded write queue with a batching background worker.
//!
//! Callers submit writes without blocking and get a [`WriteCompletion`] that
//! resolves to the item's own success flag. A single worker per driver drains
//! the queue in batches of at most `block_size` and issues one
//! [`BatchWriter::write_batch`] call per batch.
//!
//! ```text
//! submit ──try_send──▶ [ bounded queue ] ──▶ worker ──▶ write_batch(&[..K])
//!    │                                                      │
//!    └──────────── WriteCompletion ◀── per-item bool ◀──────┘
//! ```
//!
//! A full queue completes the write with `false` immediately. A failed or
//! panicking batch call completes every item of the batch with `false`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::error::DriverResult;

// =============================================================================
// Configuration
// =============================================================================

/// Write coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConfig {
    /// Queue capacity.
    pub queue_size: usize,
    /// Maximum items per backend call.
    pub block_size: usize,
    /// How long the worker waits for the first item of a batch.
    pub poll_timeout: Duration,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            block_size: 100,
            poll_timeout: Duration::from_secs(1),
        }
    }
}

impl WriteConfig {
    /// Sets the queue capacity.
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// Sets the batch size.
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the poll timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

// =============================================================================
// BatchWriter
// =============================================================================

/// Backend side of the write pipeline.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    /// Write target, e.g. a node identifier.
    type Target: Send + 'static;
    /// Value to write.
    type Value: Send + 'static;

    /// Writes a batch and returns one success flag per item, in order.
    ///
    /// Missing flags count as failures.
    async fn write_batch(&self, items: Vec<(Self::Target, Self::Value)>) -> DriverResult<Vec<bool>>;
}

// =============================================================================
// WriteCompletion
// =============================================================================

/// Resolves to the success flag of one submitted write.
///
/// Resolves to `false` if the write was dropped without an answer.
#[derive(Debug)]
pub struct WriteCompletion {
    rx: oneshot::Receiver<bool>,
}

impl WriteCompletion {
    /// Creates a pending completion and its sender.
    pub fn pending() -> (oneshot::Sender<bool>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Creates an already resolved completion.
    pub fn ready(ok: bool) -> Self {
        let (tx, completion) = Self::pending();
        let _ = tx.send(ok);
        completion
    }
}

impl Future for WriteCompletion {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        Pin::new(&mut self.rx).poll(cx).map(|r| r.unwrap_or(false))
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct WriteStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    batches: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Copy of the write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStatsSnapshot {
    /// Writes accepted into the queue.
    pub submitted: u64,
    /// Writes rejected because the queue was full or closed.
    pub rejected: u64,
    /// Backend batch calls.
    pub batches: u64,
    /// Items that completed `true`.
    pub succeeded: u64,
    /// Items that completed `false` after reaching the backend.
    pub failed: u64,
}

impl WriteStats {
    fn snapshot(&self) -> WriteStatsSnapshot {
        WriteStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// WriteCoordinator
// =============================================================================

struct PendingWrite<T, V> {
    target: T,
    value: V,
    reply: oneshot::Sender<bool>,
}

/// Bounded write queue with one batching worker.
pub struct WriteCoordinator<W: BatchWriter> {
    name: String,
    config: WriteConfig,
    sender: mpsc::Sender<PendingWrite<W::Target, W::Value>>,
    overflow: AtomicU64,
    stats: Arc<WriteStats>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<W: BatchWriter> WriteCoordinator<W> {
    /// Creates a coordinator and starts its worker.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(name: impl Into<String>, writer: W, config: WriteConfig) -> Self {
        let name = name.into();
        let config = WriteConfig {
            queue_size: config.queue_size.max(1),
            block_size: config.block_size.max(1),
            ..config
        };
        let (sender, receiver) = mpsc::channel(config.queue_size);
        let stats = Arc::new(WriteStats::default());
        let shutdown = Arc::new(Notify::new());

        let handle = tokio::spawn(Self::worker(
            name.clone(),
            Arc::new(writer),
            receiver,
            config.clone(),
            stats.clone(),
            shutdown.clone(),
        ));

        Self {
            name,
            config,
            sender,
            overflow: AtomicU64::new(0),
            stats,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueues a write without blocking.
    pub fn submit(&self, target: W::Target, value: W::Value) -> WriteCompletion {
        let (reply, completion) = WriteCompletion::pending();
        let pending = PendingWrite {
            target,
            value,
            reply,
        };

        match self.sender.try_send(pending) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                let missed = self.overflow.swap(0, Ordering::Relaxed);
                if missed > 0 {
                    error!(driver = %self.name, missed, "Write queue accepting again after overflow");
                }
            }
            Err(mpsc::error::TrySendError::Full(pending)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                if self.overflow.fetch_add(1, Ordering::Relaxed) == 0 {
                    error!(
                        driver = %self.name,
                        capacity = self.config.queue_size,
                        "Write queue full, rejecting writes"
                    );
                }
                let _ = pending.reply.send(false);
            }
            Err(mpsc::error::TrySendError::Closed(pending)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(driver = %self.name, "Write worker stopped, rejecting write");
                let _ = pending.reply.send(false);
            }
        }

        completion
    }

    /// Returns the effective configuration.
    pub fn config(&self) -> &WriteConfig {
        &self.config
    }

    /// Returns a copy of the counters.
    pub fn stats(&self) -> WriteStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the number of consecutive rejected writes since the last accepted one.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Stops the worker. Queued writes complete with `false`.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    #[instrument(skip_all, fields(driver = %name))]
    async fn worker(
        name: String,
        writer: Arc<W>,
        mut receiver: mpsc::Receiver<PendingWrite<W::Target, W::Value>>,
        config: WriteConfig,
        stats: Arc<WriteStats>,
        shutdown: Arc<Notify>,
    ) {
        debug!(block_size = config.block_size, "Write worker started");

        loop {
            let first = tokio::select! {
                biased;

                _ = shutdown.notified() => break,

                polled = tokio::time::timeout(config.poll_timeout, receiver.recv()) => match polled {
                    Ok(Some(pending)) => pending,
                    Ok(None) => break,
                    Err(_) => continue,
                },
            };

            let mut batch = Vec::with_capacity(config.block_size);
            batch.push(first);
            while batch.len() < config.block_size {
                match receiver.try_recv() {
                    Ok(pending) => batch.push(pending),
                    Err(_) => break,
                }
            }

            Self::flush(&writer, batch, &stats).await;
        }

        receiver.close();
        debug!("Write worker stopped");
    }

    async fn flush(
        writer: &Arc<W>,
        batch: Vec<PendingWrite<W::Target, W::Value>>,
        stats: &WriteStats,
    ) {
        let count = batch.len();
        let mut replies = Vec::with_capacity(count);
        let mut items = Vec::with_capacity(count);
        for pending in batch {
            replies.push(pending.reply);
            items.push((pending.target, pending.value));
        }

        stats.batches.fetch_add(1, Ordering::Relaxed);
        let task_writer = writer.clone();
        let outcome = tokio::spawn(async move { task_writer.write_batch(items).await }).await;

        let flags = match outcome {
            Ok(Ok(flags)) => flags,
            Ok(Err(e)) => {
                warn!(count, error = %e, "Batch write failed");
                Vec::new()
            }
            Err(e) => {
                warn!(count, error = %e, "Batch write aborted");
                Vec::new()
            }
        };

        for (i, reply) in replies.into_iter().enumerate() {
            let ok = flags.get(i).copied().unwrap_or(false);
            if ok {
                stats.succeeded.fetch_add(1, Ordering::Relaxed);
            } else {
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
            let _ = reply.send(ok);
        }
    }
}

impl<W: BatchWriter> std::fmt::Debug for WriteCoordinator<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<W: BatchWriter> Drop for WriteCoordinator<W> {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

// =============================================================================
// Tests
// =============================================================================
