// src/contracts/registration.rs
//! Two-phase submission of identity registry transactions.
//!
//! [`RegistrationPipeline::prepare`] estimates the fee and runs the balance
//! pre-flight check without touching ledger state. The returned
//! [`PreparedTransaction`] exposes the estimate; calling
//! [`PreparedTransaction::submit`] performs the irreversible part, dropping it
//! aborts. Submission holds the fee-payer's lock from the nonce read until the
//! ledger accepted the transaction, then hands the status stream to a
//! [`MonitorHandle`] armed with the confirmation timeout.

use crate::blockchain::adapter::{BlockRef, ChainAdapter};
use crate::blockchain::nonce::AccountLocks;
use crate::blockchain::retry::RetryPolicy;
use crate::contracts::did_registry::{
    errors, events as event, DispatchError, Extrinsic, RuntimeCall, BALANCES_PALLET, DID_PALLET,
    PAYMENT_PALLET, SYSTEM_PALLET,
};
use crate::contracts::monitor::{MonitorHandle, MonitorOutcome, PipelineState};
use crate::error::{DidError, Result};
use crate::models::transaction::{ChainEvent, Fee, TransactionResult};
use chrono::Utc;
use log::{debug, error, info};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Submits registry calls through one chain adapter.
#[derive(Clone)]
pub struct RegistrationPipeline {
    adapter: Arc<dyn ChainAdapter>,
    locks: AccountLocks,
    retry: RetryPolicy,
    confirmation_timeout: Duration,
}

impl RegistrationPipeline {
    /// # Arguments
    /// * `adapter` - Ledger the transactions go to
    /// * `locks` - Per-account submission locks, shared by every pipeline on the same ledger
    /// * `retry` - Backoff for pre-submission queries
    /// * `confirmation_timeout` - Budget for finality, counted from submission
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        locks: AccountLocks,
        retry: RetryPolicy,
        confirmation_timeout: Duration,
    ) -> Self {
        RegistrationPipeline {
            adapter,
            locks,
            retry,
            confirmation_timeout,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn ChainAdapter> {
        &self.adapter
    }

    pub fn confirmation_timeout(&self) -> Duration {
        self.confirmation_timeout
    }

    /// Phase one: fee estimation and balance pre-flight.
    ///
    /// # Arguments
    /// * `subject` - DID the call mutates
    /// * `call` - Payload, already batched
    /// * `signer` - Account authorizing the call
    /// * `fee_payer` - Account debited for the fee
    ///
    /// # Errors
    /// - `Network` if the fee or account queries keep failing
    /// - `InsufficientBalance` if the fee payer cannot cover the estimate
    pub async fn prepare(
        &self,
        subject: &str,
        call: RuntimeCall,
        signer: &str,
        fee_payer: &str,
    ) -> Result<PreparedTransaction> {
        debug!(
            "{subject}: {} with {} mutation(s) for signer {signer}",
            PipelineState::Prepared,
            call.mutation_count()
        );

        let account = self
            .retry
            .run("account query", || self.adapter.account(fee_payer))
            .await
            .map_err(DidError::from_chain)?;
        let draft = Extrinsic {
            signer: signer.to_string(),
            fee_payer: fee_payer.to_string(),
            nonce: account.nonce,
            call,
        };
        let fee = self
            .retry
            .run("fee estimation", || self.adapter.estimate_fee(&draft))
            .await
            .map_err(DidError::from_chain)?;

        if account.free < fee.amount {
            return Err(DidError::InsufficientBalance {
                account: fee_payer.to_string(),
                required: fee.amount,
                available: account.free,
            });
        }
        debug!("{subject}: {} at {fee}", PipelineState::FeeEstimated);

        Ok(PreparedTransaction {
            pipeline: self.clone(),
            subject: subject.to_string(),
            draft,
            fee,
            state: PipelineState::FeeEstimated,
        })
    }
}

/// A transaction whose fee is known and which has not been submitted yet.
pub struct PreparedTransaction {
    pipeline: RegistrationPipeline,
    subject: String,
    draft: Extrinsic,
    fee: Fee,
    state: PipelineState,
}

impl PreparedTransaction {
    /// Estimated fee, debited from the fee payer on inclusion.
    pub fn fee(&self) -> &Fee {
        &self.fee
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn call(&self) -> &RuntimeCall {
        &self.draft.call
    }

    /// Phase two: submits and waits for finality.
    ///
    /// # Returns
    /// The assembled [`TransactionResult`], only once the transaction is
    /// finalized without a dispatch error.
    ///
    /// # Errors
    /// - `InsufficientBalance` or `Registration` if the ledger rejects the submission
    /// - `DuplicateDid`, `InsufficientBalance` or `Registration` for dispatch errors
    /// - `ConfirmationTimeout` with the transaction hash if finality is not
    ///   observed in time; the transaction is not resubmitted
    pub async fn submit(self) -> Result<TransactionResult> {
        let PreparedTransaction {
            pipeline,
            subject,
            mut draft,
            fee,
            ..
        } = self;
        let adapter = pipeline.adapter.clone();

        let submission = {
            let _guard = pipeline.locks.acquire(&draft.fee_payer).await;
            let account = pipeline
                .retry
                .run("nonce query", || adapter.account(&draft.fee_payer))
                .await
                .map_err(DidError::from_chain)?;
            draft.nonce = account.nonce;
            adapter.submit(draft.clone()).await.map_err(|e| {
                error!("submission for {subject} rejected: {e}");
                DidError::from_chain(e)
            })?
        };
        let transaction_hash = submission.transaction_hash;
        info!(
            "{subject}: {} {}.{} as {transaction_hash} (nonce {})",
            PipelineState::Submitted,
            draft.call.section(),
            draft.call.name(),
            draft.nonce
        );

        let deadline = Instant::now() + pipeline.confirmation_timeout;
        let monitor = MonitorHandle::spawn(transaction_hash.clone(), submission.statuses, deadline);

        match monitor.outcome().await {
            MonitorOutcome::Finalized { block, events } => {
                info!(
                    "{subject}: {} in block #{} ({})",
                    PipelineState::Finalized,
                    block.number,
                    block.hash
                );
                finalize(&pipeline, &subject, &draft, transaction_hash, block, events, fee).await
            }
            MonitorOutcome::TimedOut { last_state } => {
                error!(
                    "{subject}: {} after {:?} in {last_state}, transaction {transaction_hash} may still land",
                    PipelineState::TimedOut,
                    pipeline.confirmation_timeout
                );
                Err(DidError::ConfirmationTimeout {
                    transaction_hash,
                    timeout: pipeline.confirmation_timeout,
                })
            }
            MonitorOutcome::Failed { reason, last_state } => {
                error!("{subject}: {} after {last_state}: {reason}", PipelineState::Failed);
                Err(DidError::registration(format!(
                    "transaction {transaction_hash} failed: {reason}"
                )))
            }
            MonitorOutcome::Cancelled { .. } => Err(DidError::registration(format!(
                "monitoring of transaction {transaction_hash} was cancelled"
            ))),
        }
    }
}

async fn finalize(
    pipeline: &RegistrationPipeline,
    subject: &str,
    draft: &Extrinsic,
    transaction_hash: String,
    block: BlockRef,
    events: Vec<ChainEvent>,
    estimate: Fee,
) -> Result<TransactionResult> {
    if let Some(dispatch_error) = dispatch_error(&events)? {
        error!("{subject}: dispatch failed with {dispatch_error}");
        return Err(map_dispatch_error(pipeline, subject, draft, &estimate, dispatch_error).await);
    }

    let fee = realized_fee(&events)
        .map(|amount| Fee::new(amount, estimate.currency.clone()))
        .unwrap_or(estimate);

    Ok(TransactionResult {
        success: true,
        transaction_hash,
        block_number: block.number,
        block_hash: block.hash,
        events,
        fee,
        timestamp: Utc::now(),
    })
}

/// Dispatch error carried by a `system.ExtrinsicFailed` event, if any.
fn dispatch_error(events: &[ChainEvent]) -> Result<Option<DispatchError>> {
    let Some(failed) = events
        .iter()
        .find(|e| e.is(SYSTEM_PALLET, event::EXTRINSIC_FAILED))
    else {
        return Ok(None);
    };
    let raw = failed.data.get("dispatchError").cloned().unwrap_or(Value::Null);
    Ok(Some(serde_json::from_value(raw)?))
}

async fn map_dispatch_error(
    pipeline: &RegistrationPipeline,
    subject: &str,
    draft: &Extrinsic,
    estimate: &Fee,
    dispatch_error: DispatchError,
) -> DidError {
    if dispatch_error.is(DID_PALLET, errors::ALREADY_EXISTS) {
        return DidError::DuplicateDid(subject.to_string());
    }
    if dispatch_error.is(BALANCES_PALLET, errors::INSUFFICIENT_BALANCE) {
        // best effort, the available balance is informational only
        let available = pipeline
            .adapter
            .account(&draft.fee_payer)
            .await
            .map(|account| account.free)
            .unwrap_or(0);
        return DidError::InsufficientBalance {
            account: draft.fee_payer.clone(),
            required: estimate.amount,
            available,
        };
    }
    DidError::registration_with(
        format!("{} for {subject} failed on chain", draft.call.name()),
        dispatch_error,
    )
}

/// Fee from the `transactionPayment.TransactionFeePaid` event.
///
/// `actualFee` is accepted as a decimal string or a JSON number. Numbers
/// above `u64::MAX` are decoded as floats and taken when integral.
fn realized_fee(events: &[ChainEvent]) -> Option<u128> {
    let paid = events
        .iter()
        .find(|e| e.is(PAYMENT_PALLET, event::TRANSACTION_FEE_PAID))?;
    match paid.data.get("actualFee")? {
        Value::String(amount) => amount.parse().ok(),
        Value::Number(amount) => amount
            .as_u64()
            .map(u128::from)
            .or_else(|| amount.to_string().parse().ok())
            .or_else(|| {
                amount
                    .as_f64()
                    .filter(|fee| *fee >= 0.0 && fee.fract() == 0.0 && *fee < 2f64.powi(128))
                    .map(|fee| fee as u128)
            }),
        _ => None,
    }
}
