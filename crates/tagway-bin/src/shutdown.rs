// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Graceful shutdown coordination.
//!
//! The gateway stops on SIGINT or SIGTERM (Ctrl+C on other platforms), or
//! when [`ShutdownCoordinator::initiate_shutdown`] is called by an embedding
//! application or a test.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// `initiate_shutdown` was called.
    Requested,
    /// The process received a termination signal.
    Signal,
}

/// Shared shutdown flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    state: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator in the running state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    /// Returns a receiver that changes once shutdown starts.
    pub fn subscribe(&self) -> watch::Receiver<Option<ShutdownReason>> {
        self.state.subscribe()
    }

    /// Starts shutdown. Only the first call has an effect.
    pub fn initiate_shutdown(&self) {
        self.trigger(ShutdownReason::Requested);
    }

    fn trigger(&self, reason: ShutdownReason) {
        let changed = self.state.send_if_modified(|state| match state {
            Some(_) => false,
            None => {
                *state = Some(reason);
                true
            }
        });
        if changed {
            info!(reason = ?reason, "Shutdown initiated");
        }
    }

    /// Returns why shutdown started, if it has.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.state.borrow()
    }

    /// Returns true once shutdown has started.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason().is_some()
    }

    /// Waits until shutdown starts through [`initiate_shutdown`](Self::initiate_shutdown).
    pub async fn wait(&self) -> ShutdownReason {
        let mut state = self.state.subscribe();
        let reason = match state.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => None,
        };
        reason.unwrap_or(ShutdownReason::Requested)
    }

    /// Waits for a termination signal or a requested shutdown.
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        tokio::select! {
            reason = self.wait() => reason,
            _ = wait_for_signal() => {
                self.trigger(ShutdownReason::Signal);
                self.reason().unwrap_or(ShutdownReason::Signal)
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Signals
// =============================================================================

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C only");
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = wait_for_ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_initiation_wins() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();
        assert!(!coordinator.is_shutdown_initiated());

        coordinator.initiate_shutdown();
        coordinator.initiate_shutdown();

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(ShutdownReason::Requested));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves_on_request() {
        let coordinator = ShutdownCoordinator::new();
        let trigger = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.initiate_shutdown();
        });

        let reason = tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_shutdown())
            .await
            .expect("shutdown should resolve");
        assert_eq!(reason, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn test_wait_after_initiation_returns() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate_shutdown();

        let reason = tokio::time::timeout(Duration::from_millis(100), coordinator.wait())
            .await
            .expect("already initiated");
        assert_eq!(reason, ShutdownReason::Requested);
    }
}
