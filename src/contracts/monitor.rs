// src/contracts/monitor.rs
//! Confirmation monitoring of submitted transactions.
//!
//! A monitor is a spawned task that owns the status receiver of one
//! submission and resolves to exactly one [`MonitorOutcome`]. It stops at the
//! first terminal event: finality, failure, deadline expiry, or explicit
//! cancellation through its [`MonitorHandle`]. When the task ends the
//! receiver is dropped, which releases the subscription; later status events
//! are never looked at.

use crate::blockchain::adapter::{BlockRef, TxStatus};
use crate::models::transaction::ChainEvent;
use log::{debug, warn};
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Stage of one registration pipeline run.
///
/// ```text
/// Prepared → FeeEstimated → Submitted → Broadcast → InBlock → Finalized
///                                 └──────────┴──────────┴──→ Failed | TimedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Prepared,
    FeeEstimated,
    Submitted,
    Broadcast,
    InBlock,
    Finalized,
    Failed,
    TimedOut,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Finalized | PipelineState::Failed | PipelineState::TimedOut
        )
    }

    /// Next state after observing `status`.
    ///
    /// # Returns
    /// `None` if the status is not a valid successor of the current state.
    /// `ready` keeps a submitted transaction in `Submitted`, and a repeated
    /// `inBlock` (re-inclusion after a fork) keeps it in `InBlock`.
    pub fn on_status(self, status: &TxStatus) -> Option<PipelineState> {
        use PipelineState::*;
        match (self, status) {
            (state, _) if state.is_terminal() => None,
            (Submitted, TxStatus::Ready) => Some(Submitted),
            (Submitted, TxStatus::Broadcast) => Some(Broadcast),
            (Broadcast | InBlock, TxStatus::InBlock(_)) => Some(InBlock),
            (InBlock, TxStatus::Finalized { .. }) => Some(Finalized),
            (Submitted | Broadcast | InBlock, TxStatus::Failed(_)) => Some(Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineState::Prepared => "PREPARED",
            PipelineState::FeeEstimated => "FEE_ESTIMATED",
            PipelineState::Submitted => "SUBMITTED",
            PipelineState::Broadcast => "BROADCAST",
            PipelineState::InBlock => "IN_BLOCK",
            PipelineState::Finalized => "FINALIZED",
            PipelineState::Failed => "FAILED",
            PipelineState::TimedOut => "TIMED_OUT",
        };
        f.write_str(label)
    }
}

/// Terminal result of monitoring one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    Finalized {
        block: BlockRef,
        events: Vec<ChainEvent>,
    },
    /// The ledger reported failure, the stream ended early, or the status
    /// sequence was invalid
    Failed { reason: String, last_state: PipelineState },
    /// The deadline passed before finality
    TimedOut { last_state: PipelineState },
    Cancelled { last_state: PipelineState },
}

/// Owner handle of a running monitor task.
///
/// Dropping the handle without awaiting [`MonitorHandle::outcome`] aborts the
/// task.
#[derive(Debug)]
pub struct MonitorHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<MonitorOutcome>>,
}

impl MonitorHandle {
    /// Starts monitoring `statuses` until `deadline`.
    ///
    /// # Arguments
    /// * `transaction_hash` - Hash of the submission, for logging
    /// * `statuses` - Receiver of the submission's status stream; moved into the task
    /// * `deadline` - Instant at which monitoring gives up
    pub fn spawn(
        transaction_hash: String,
        statuses: mpsc::Receiver<TxStatus>,
        deadline: Instant,
    ) -> Self {
        let (cancel, cancelled) = oneshot::channel();
        let task = tokio::spawn(monitor(transaction_hash, statuses, deadline, cancelled));
        MonitorHandle {
            cancel: Some(cancel),
            task: Some(task),
        }
    }

    /// Requests the monitor to stop. The outcome becomes `Cancelled` unless
    /// a terminal status was already processed.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Waits for the terminal outcome.
    pub async fn outcome(mut self) -> MonitorOutcome {
        // keep the cancel sender alive while waiting, dropping it would read as a cancellation
        let _cancel = self.cancel.take();
        let Some(task) = self.task.take() else {
            return MonitorOutcome::Cancelled {
                last_state: PipelineState::Submitted,
            };
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(join_error) => MonitorOutcome::Failed {
                reason: format!("monitor task ended abnormally: {join_error}"),
                last_state: PipelineState::Submitted,
            },
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn monitor(
    transaction_hash: String,
    mut statuses: mpsc::Receiver<TxStatus>,
    deadline: Instant,
    mut cancelled: oneshot::Receiver<()>,
) -> MonitorOutcome {
    let mut state = PipelineState::Submitted;
    loop {
        tokio::select! {
            biased;
            _ = &mut cancelled => {
                debug!("monitor for {transaction_hash} cancelled in {state}");
                return MonitorOutcome::Cancelled { last_state: state };
            }
            _ = sleep_until(deadline) => {
                warn!("transaction {transaction_hash} not finalized by deadline, last state {state}");
                return MonitorOutcome::TimedOut { last_state: state };
            }
            status = statuses.recv() => {
                let Some(status) = status else {
                    return MonitorOutcome::Failed {
                        reason: "status stream closed before finality".to_string(),
                        last_state: state,
                    };
                };
                let Some(next) = state.on_status(&status) else {
                    return MonitorOutcome::Failed {
                        reason: format!("unexpected status '{}' in state {state}", status.label()),
                        last_state: state,
                    };
                };
                debug!("transaction {transaction_hash}: {state} -> {next} ({})", status.label());
                state = next;
                match status {
                    TxStatus::Finalized { block, events } => {
                        return MonitorOutcome::Finalized { block, events };
                    }
                    TxStatus::Failed(reason) => {
                        return MonitorOutcome::Failed { reason, last_state: state };
                    }
                    _ => {}
                }
            }
        }
    }
}
