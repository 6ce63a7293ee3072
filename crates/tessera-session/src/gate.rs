//! Readiness gate for the store lifecycle.
//!
//! The gate starts `Initializing` and settles exactly once, into either
//! `Initialized` or `Failed`. Every store operation waits on it; all
//! waiters parked before settlement are woken together and observe the
//! same outcome.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, ProvisionError, Result};

/// Lifecycle state of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// Provisioning has not finished.
    Initializing,
    /// The table is usable.
    Initialized,
    /// Provisioning failed; the store must be rebuilt.
    Failed(Arc<ProvisionError>),
}

impl Lifecycle {
    /// Whether the state is terminal.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Lifecycle::Initializing)
    }

    /// The outcome a waiter sees, once settled.
    fn outcome(&self) -> Option<Result<()>> {
        match self {
            Lifecycle::Initializing => None,
            Lifecycle::Initialized => Some(Ok(())),
            Lifecycle::Failed(err) => Some(Err(Error::Fatal(Arc::clone(err)))),
        }
    }
}

/// One-shot broadcast of the provisioning outcome.
///
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    state: Arc<watch::Sender<Lifecycle>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    /// Create a gate in the `Initializing` state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(Lifecycle::Initializing);
        Self {
            state: Arc::new(state),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> Lifecycle {
        self.state.borrow().clone()
    }

    /// Record the provisioning outcome and release all waiters.
    ///
    /// Only the first call has an effect; returns whether this call settled
    /// the gate.
    pub fn settle(&self, outcome: std::result::Result<(), ProvisionError>) -> bool {
        let next = match outcome {
            Ok(()) => Lifecycle::Initialized,
            Err(err) => Lifecycle::Failed(Arc::new(err)),
        };

        let settled = self.state.send_if_modified(|state| {
            if state.is_settled() {
                return false;
            }
            *state = next;
            true
        });

        if settled {
            let state = self.state();
            debug!(?state, "Readiness gate settled");
        } else {
            warn!("Readiness gate already settled, ignoring outcome");
        }
        settled
    }

    /// Wait until the gate settles.
    ///
    /// Returns immediately once settled. After a failure every call returns
    /// [`Error::Fatal`] carrying the same provisioning error.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(Lifecycle::is_settled)
            .await
            .map_err(|_| Error::Fatal(Arc::new(ProvisionError::Aborted("gate closed".into()))))?;

        state.outcome().unwrap_or_else(|| {
            Err(Error::Fatal(Arc::new(ProvisionError::Aborted(
                "gate woke before settling".into(),
            ))))
        })
    }
}

/// Settles the gate as failed if dropped before provisioning reports.
///
/// Held by the provisioning task so a panic or cancellation never leaves
/// waiters parked forever.
pub(crate) struct SettleOnDrop {
    gate: ReadinessGate,
}

impl SettleOnDrop {
    pub(crate) fn new(gate: ReadinessGate) -> Self {
        Self { gate }
    }
}

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        if !self.gate.state().is_settled() {
            self.gate.settle(Err(ProvisionError::Aborted(
                "provisioning task ended without an outcome".into(),
            )));
        }
    }
}
