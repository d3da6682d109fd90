// src/blockchain/local_ledger.rs
//! In-process ledger with identity pallet semantics.
//!
//! Used by the binary's development mode and as the adapter double in
//! tests. It keeps DID records, balances and pool nonces in memory, applies
//! calls atomically, emits the same events a parachain would and drives each
//! submission through `ready → broadcast → inBlock → finalized` on a timer.
//!
//! State changes are applied when the pool accepts a submission; the status
//! stream only reports progress. A transaction whose finality is held back
//! has therefore already landed, the way a slow chain looks to a client that
//! timed out.
//!
//! Faults can be injected to exercise error paths:
//! - [`LocalLedger::hold_finality`] stops status streams after `inBlock`
//! - [`LocalLedger::fail_next_submission`] makes the next accepted
//!   transaction end in `failed` without being applied
//! - [`LocalLedger::inject_transient_failures`] makes the next queries fail
//!   with a connection error

use crate::blockchain::adapter::{
    AccountInfo, BlockRef, ChainAdapter, ChainInfo, StorageKey, Submission, TxStatus,
};
use crate::config::LocalLedgerSettings;
use crate::contracts::did_registry::{
    errors, events as event, extrinsic_failed, DidRecord, DispatchError, Extrinsic, Relationship,
    RuntimeCall, DID_PALLET, PAYMENT_PALLET, SYSTEM_PALLET, UTILITY_PALLET,
};
use crate::error::ChainError;
use crate::models::transaction::{ChainEvent, Fee};
use crate::utils::crypto::{blake2_256, to_hex_prefixed};
use crate::utils::serialization;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

const CHAIN_NAME: &str = "local-ledger";
const TOKEN_SYMBOL: &str = "KILT";
const TOKEN_DECIMALS: u8 = 15;
const SS58_PREFIX: u16 = 38;

#[derive(Debug, Clone, Copy)]
struct Account {
    nonce: u64,
    free: u128,
}

#[derive(Debug, Default)]
struct Faults {
    hold_finality: bool,
    fail_next_submission: Option<String>,
    transient_failures: u32,
}

#[derive(Debug, Default)]
struct LedgerState {
    connected: bool,
    best_block: u64,
    accounts: HashMap<String, Account>,
    records: HashMap<String, DidRecord>,
    submissions: u64,
    faults: Faults,
}

impl LedgerState {
    fn account(&mut self, address: &str, endowment: u128) -> &mut Account {
        self.accounts
            .entry(address.to_string())
            .or_insert(Account {
                nonce: 0,
                free: endowment,
            })
    }

    fn take_transient_failure(&mut self) -> bool {
        if self.faults.transient_failures > 0 {
            self.faults.transient_failures -= 1;
            true
        } else {
            false
        }
    }
}

/// In-memory [`ChainAdapter`].
#[derive(Clone)]
pub struct LocalLedger {
    state: Arc<Mutex<LedgerState>>,
    settings: LocalLedgerSettings,
    channel_capacity: usize,
    genesis_hash: String,
}

impl LocalLedger {
    /// # Arguments
    /// * `settings` - Block timing, endowment and fee parameters
    /// * `channel_capacity` - Capacity of each submission's status channel
    pub fn from_settings(settings: &LocalLedgerSettings, channel_capacity: usize) -> Self {
        LocalLedger {
            state: Arc::new(Mutex::new(LedgerState::default())),
            settings: settings.clone(),
            channel_capacity: channel_capacity.max(1),
            genesis_hash: to_hex_prefixed(&blake2_256(CHAIN_NAME.as_bytes())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn endowment(&self) -> u128 {
        u128::from(self.settings.endowment)
    }

    fn block_time(&self) -> Duration {
        Duration::from_millis(self.settings.block_time_ms)
    }

    /// Sets the free balance of `address`, creating the account if needed.
    pub fn set_balance(&self, address: &str, free: u128) {
        let endowment = self.endowment();
        self.lock().account(address, endowment).free = free;
    }

    pub fn balance(&self, address: &str) -> u128 {
        let endowment = self.endowment();
        self.lock().account(address, endowment).free
    }

    /// Stored record of `did`, bypassing the adapter interface.
    pub fn record(&self, did: &str) -> Option<DidRecord> {
        self.lock().records.get(did).cloned()
    }

    /// Number of submissions the pool has accepted.
    pub fn submission_count(&self) -> u64 {
        self.lock().submissions
    }

    pub fn hold_finality(&self, hold: bool) {
        self.lock().faults.hold_finality = hold;
    }

    pub fn fail_next_submission(&self, reason: impl Into<String>) {
        self.lock().faults.fail_next_submission = Some(reason.into());
    }

    /// Makes the next `count` connect, account, fee or storage calls fail
    /// with a transient connection error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.lock().faults.transient_failures = count;
    }

    fn fee_for(&self, extrinsic: &Extrinsic) -> Result<Fee, ChainError> {
        // the call alone determines the fee so the estimate stays valid across nonces
        let encoded = serialization::encode(&extrinsic.call)
            .map_err(|e| ChainError::Rejected {
                code: "Invalid".into(),
                message: e.to_string(),
            })?;
        let amount = u128::from(self.settings.base_fee)
            + u128::from(self.settings.byte_fee) * encoded.len() as u128;
        Ok(Fee::new(amount, TOKEN_SYMBOL))
    }

    fn block_ref(&self, number: u64) -> BlockRef {
        let mut seed = self.genesis_hash.as_bytes().to_vec();
        seed.extend_from_slice(&number.to_le_bytes());
        BlockRef {
            number,
            hash: to_hex_prefixed(&blake2_256(&seed)),
        }
    }

    fn drive(&self, statuses: mpsc::Sender<TxStatus>, progress: Progress) {
        let block_time = self.block_time();
        tokio::spawn(async move {
            if statuses.send(TxStatus::Ready).await.is_err()
                || statuses.send(TxStatus::Broadcast).await.is_err()
            {
                return;
            }
            match progress {
                Progress::Fail(reason) => {
                    tokio::time::sleep(block_time).await;
                    let _ = statuses.send(TxStatus::Failed(reason)).await;
                }
                Progress::Include {
                    block,
                    events,
                    hold_finality,
                } => {
                    tokio::time::sleep(block_time).await;
                    if statuses.send(TxStatus::InBlock(block.clone())).await.is_err() {
                        return;
                    }
                    if hold_finality {
                        // stays subscribed without ever finalizing
                        statuses.closed().await;
                        return;
                    }
                    tokio::time::sleep(block_time).await;
                    let _ = statuses.send(TxStatus::Finalized { block, events }).await;
                }
            }
        });
    }
}

enum Progress {
    Include {
        block: BlockRef,
        events: Vec<ChainEvent>,
        hold_finality: bool,
    },
    Fail(String),
}

#[async_trait]
impl ChainAdapter for LocalLedger {
    async fn connect(&self) -> Result<ChainInfo, ChainError> {
        let mut state = self.lock();
        if state.take_transient_failure() {
            return Err(ChainError::Connection("local ledger unavailable".into()));
        }
        state.connected = true;
        info!("connected to {CHAIN_NAME} at block #{}", state.best_block);
        Ok(ChainInfo {
            name: CHAIN_NAME.to_string(),
            genesis_hash: self.genesis_hash.clone(),
            token_symbol: TOKEN_SYMBOL.to_string(),
            token_decimals: TOKEN_DECIMALS,
            ss58_prefix: SS58_PREFIX,
            best_block: state.best_block,
        })
    }

    async fn disconnect(&self) -> Result<(), ChainError> {
        self.lock().connected = false;
        Ok(())
    }

    async fn account(&self, address: &str) -> Result<AccountInfo, ChainError> {
        let endowment = self.endowment();
        let mut state = self.lock();
        ensure_ready(&mut state)?;
        let account = *state.account(address, endowment);
        Ok(AccountInfo {
            nonce: account.nonce,
            free: account.free,
        })
    }

    async fn estimate_fee(&self, extrinsic: &Extrinsic) -> Result<Fee, ChainError> {
        ensure_ready(&mut self.lock())?;
        self.fee_for(extrinsic)
    }

    async fn submit(&self, extrinsic: Extrinsic) -> Result<Submission, ChainError> {
        let fee = self.fee_for(&extrinsic)?;
        let encoded = serialization::encode(&extrinsic).map_err(|e| ChainError::Rejected {
            code: "Invalid".into(),
            message: e.to_string(),
        })?;
        let transaction_hash = to_hex_prefixed(&blake2_256(&encoded));
        let endowment = self.endowment();

        let progress = {
            let mut state = self.lock();
            if !state.connected {
                return Err(ChainError::NotConnected);
            }
            let payer = *state.account(&extrinsic.fee_payer, endowment);
            if extrinsic.nonce < payer.nonce {
                return Err(ChainError::Rejected {
                    code: "Stale".into(),
                    message: format!("nonce {} already used", extrinsic.nonce),
                });
            }
            if extrinsic.nonce > payer.nonce {
                return Err(ChainError::Rejected {
                    code: "Future".into(),
                    message: format!("nonce {} ahead of {}", extrinsic.nonce, payer.nonce),
                });
            }
            if payer.free < fee.amount {
                return Err(ChainError::Payment {
                    account: extrinsic.fee_payer.clone(),
                    required: fee.amount,
                    available: payer.free,
                });
            }
            state.submissions += 1;

            if let Some(reason) = state.faults.fail_next_submission.take() {
                Progress::Fail(reason)
            } else {
                {
                    let payer = state.account(&extrinsic.fee_payer, endowment);
                    payer.nonce += 1;
                    payer.free -= fee.amount;
                }
                state.best_block += 1;
                let number = state.best_block;

                let mut staged = state.records.clone();
                let mut events = Vec::new();
                let outcome = apply(&mut staged, &extrinsic.signer, &extrinsic.call, number, &mut events);
                events.push(ChainEvent::new(
                    PAYMENT_PALLET,
                    event::TRANSACTION_FEE_PAID,
                    json!({
                        "who": extrinsic.fee_payer,
                        "actualFee": fee.amount.to_string(),
                        "tip": "0",
                    }),
                ));
                match outcome {
                    Ok(()) => {
                        state.records = staged;
                        events.push(ChainEvent::new(
                            SYSTEM_PALLET,
                            event::EXTRINSIC_SUCCESS,
                            json!({}),
                        ));
                    }
                    Err(dispatch_error) => {
                        debug!("{} dispatch failed: {dispatch_error}", extrinsic.call.name());
                        events.retain(|e| e.section == PAYMENT_PALLET);
                        events.push(extrinsic_failed(&dispatch_error));
                    }
                }
                Progress::Include {
                    block: self.block_ref(number),
                    events,
                    hold_finality: state.faults.hold_finality,
                }
            }
        };

        debug!(
            "pool accepted {transaction_hash} from {} (nonce {})",
            extrinsic.fee_payer, extrinsic.nonce
        );
        let (sender, statuses) = mpsc::channel(self.channel_capacity);
        self.drive(sender, progress);
        Ok(Submission {
            transaction_hash,
            statuses,
        })
    }

    async fn query_storage(&self, key: &StorageKey) -> Result<Option<Value>, ChainError> {
        let mut state = self.lock();
        ensure_ready(&mut state)?;
        if key.pallet != DID_PALLET || key.item != "did" {
            return Ok(None);
        }
        state
            .records
            .get(&key.key)
            .map(|record| {
                serde_json::to_value(record).map_err(|e| ChainError::Query(e.to_string()))
            })
            .transpose()
    }
}

fn ensure_ready(state: &mut LedgerState) -> Result<(), ChainError> {
    if state.take_transient_failure() {
        return Err(ChainError::Connection("connection reset".into()));
    }
    if !state.connected {
        return Err(ChainError::NotConnected);
    }
    Ok(())
}

/// Whether `signer` may mutate `record`: the subject itself or its controller.
fn authorized(did: &str, record: &DidRecord, signer: &str) -> bool {
    let signer_did = did.rsplit_once(':').map(|(prefix, _)| format!("{prefix}:{signer}"));
    let is_subject = signer_did.as_deref() == Some(did);
    is_subject
        || record.controller == signer
        || signer_did.as_deref() == Some(record.controller.as_str())
}

/// Applies `call` to `records`, pushing the emitted events.
///
/// On error `records` may be partially modified; callers apply calls to a
/// staged copy.
fn apply(
    records: &mut HashMap<String, DidRecord>,
    signer: &str,
    call: &RuntimeCall,
    block: u64,
    emitted: &mut Vec<ChainEvent>,
) -> Result<(), DispatchError> {
    let updated = |did: &str| ChainEvent::new(DID_PALLET, event::DID_UPDATED, json!({ "did": did }));

    match call {
        RuntimeCall::BatchAll { calls } => {
            for inner in calls {
                apply(records, signer, inner, block, emitted)?;
            }
            emitted.push(ChainEvent::new(
                UTILITY_PALLET,
                event::BATCH_COMPLETED,
                json!({ "calls": calls.len() }),
            ));
            return Ok(());
        }
        RuntimeCall::Create {
            did,
            controller,
            authentication_key,
        } => {
            if records.contains_key(did) {
                return Err(DispatchError::did(errors::ALREADY_EXISTS));
            }
            let record = DidRecord {
                controller: controller.clone(),
                verification_methods: vec![authentication_key.clone()],
                authentication: vec![authentication_key.id.clone()],
                created_at: block,
                updated_at: block,
                ..Default::default()
            };
            if !authorized(did, &record, signer) {
                return Err(DispatchError::did(errors::BAD_ORIGIN));
            }
            check_record(did, &record)?;
            records.insert(did.clone(), record);
            emitted.push(ChainEvent::new(
                DID_PALLET,
                event::DID_CREATED,
                json!({ "did": did, "controller": controller }),
            ));
            return Ok(());
        }
        _ => {}
    }

    let did = subject_of(call);
    let record = records
        .get_mut(did)
        .ok_or_else(|| DispatchError::did(errors::NOT_FOUND))?;
    if !authorized(did, record, signer) {
        return Err(DispatchError::did(errors::BAD_ORIGIN));
    }

    match call {
        RuntimeCall::AddVerificationMethod {
            method,
            relationship,
            ..
        } => {
            if record.verification_methods.iter().any(|vm| vm.id == method.id) {
                return Err(DispatchError::did(errors::VERIFICATION_METHOD_EXISTS));
            }
            match relationship {
                Relationship::Authentication => record.authentication.push(method.id.clone()),
                Relationship::KeyAgreement => record.key_agreement.push(method.id.clone()),
                Relationship::None => {}
            }
            record.verification_methods.push(method.clone());
        }
        RuntimeCall::RemoveVerificationMethod { method_id, .. } => {
            let position = record
                .verification_methods
                .iter()
                .position(|vm| &vm.id == method_id)
                .ok_or_else(|| DispatchError::did(errors::VERIFICATION_METHOD_NOT_FOUND))?;
            record.verification_methods.remove(position);
            record.authentication.retain(|r| r != method_id);
            record.key_agreement.retain(|r| r != method_id);
        }
        RuntimeCall::AddService { service, .. } => {
            if record.services.iter().any(|s| s.id == service.id) {
                return Err(DispatchError::did(errors::SERVICE_EXISTS));
            }
            record.services.push(service.clone());
        }
        RuntimeCall::RemoveService { service_id, .. } => {
            let position = record
                .services
                .iter()
                .position(|s| &s.id == service_id)
                .ok_or_else(|| DispatchError::did(errors::SERVICE_NOT_FOUND))?;
            record.services.remove(position);
        }
        RuntimeCall::SetMetadata { metadata, .. } => {
            record
                .metadata
                .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        RuntimeCall::SetController { controller, .. } => {
            record.controller = controller.clone();
        }
        RuntimeCall::Create { .. } | RuntimeCall::BatchAll { .. } => {}
    }
    record.updated_at = block;
    check_record(did, record)?;
    emitted.push(updated(did));
    Ok(())
}

fn subject_of(call: &RuntimeCall) -> &str {
    match call {
        RuntimeCall::Create { did, .. }
        | RuntimeCall::AddVerificationMethod { did, .. }
        | RuntimeCall::RemoveVerificationMethod { did, .. }
        | RuntimeCall::AddService { did, .. }
        | RuntimeCall::RemoveService { did, .. }
        | RuntimeCall::SetMetadata { did, .. }
        | RuntimeCall::SetController { did, .. } => did,
        RuntimeCall::BatchAll { .. } => "",
    }
}

fn check_record(did: &str, record: &DidRecord) -> Result<(), DispatchError> {
    record
        .to_document(did)
        .validate()
        .map_err(|_| DispatchError::did(errors::INVALID_RECORD))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::did_registry::did_record_key;
    use crate::models::did::{
        KeyMaterial, Service, ServiceEndpoint, ServiceType, VerificationMethod,
        VerificationMethodType,
    };

    const DID: &str = "did:kilt:4alice";

    fn ledger() -> LocalLedger {
        LocalLedger::from_settings(
            &LocalLedgerSettings {
                block_time_ms: 5,
                ..Default::default()
            },
            8,
        )
    }

    fn key(fragment: &str) -> VerificationMethod {
        VerificationMethod::new(
            format!("{DID}#{fragment}"),
            VerificationMethodType::Sr25519VerificationKey2020,
            DID,
            KeyMaterial::PublicKeyMultibase("z6QNmock".into()),
        )
    }

    fn create() -> RuntimeCall {
        RuntimeCall::Create {
            did: DID.into(),
            controller: DID.into(),
            authentication_key: key("authentication"),
        }
    }

    fn extrinsic(nonce: u64, call: RuntimeCall) -> Extrinsic {
        Extrinsic {
            signer: "4alice".into(),
            fee_payer: "4alice".into(),
            nonce,
            call,
        }
    }

    async fn finalized(submission: Submission) -> Vec<ChainEvent> {
        let mut statuses = submission.statuses;
        while let Some(status) = statuses.recv().await {
            if let TxStatus::Finalized { events, .. } = status {
                return events;
            }
        }
        panic!("stream ended without finality");
    }

    #[tokio::test]
    async fn test_create_and_query_record() {
        let ledger = ledger();
        ledger.connect().await.unwrap();

        let submission = ledger.submit(extrinsic(0, create())).await.unwrap();
        assert!(submission.transaction_hash.starts_with("0x"));
        let events = finalized(submission).await;
        assert!(events.iter().any(|e| e.is(DID_PALLET, event::DID_CREATED)));
        assert!(events.iter().any(|e| e.is(SYSTEM_PALLET, event::EXTRINSIC_SUCCESS)));

        let stored = ledger.query_storage(&did_record_key(DID)).await.unwrap();
        let record: DidRecord = serde_json::from_value(stored.unwrap()).unwrap();
        assert_eq!(record.authentication, vec![format!("{DID}#authentication")]);
        assert_eq!(ledger.account("4alice").await.unwrap().nonce, 1);
    }

    #[tokio::test]
    async fn test_nonce_must_match_pool() {
        let ledger = ledger();
        ledger.connect().await.unwrap();
        let error = ledger.submit(extrinsic(3, create())).await.unwrap_err();
        assert!(matches!(error, ChainError::Rejected { ref code, .. } if code == "Future"));
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let ledger = ledger();
        ledger.connect().await.unwrap();
        finalized(ledger.submit(extrinsic(0, create())).await.unwrap()).await;

        let service = Service::new(
            format!("{DID}#hub"),
            ServiceType::LinkedDomains,
            ServiceEndpoint::Uri("https://example.com".into()),
        );
        let batch = RuntimeCall::batch(vec![
            RuntimeCall::AddService {
                did: DID.into(),
                service,
            },
            RuntimeCall::RemoveVerificationMethod {
                did: DID.into(),
                method_id: format!("{DID}#missing"),
            },
        ]);
        let events = finalized(ledger.submit(extrinsic(1, batch)).await.unwrap()).await;
        assert!(events.iter().any(|e| e.is(SYSTEM_PALLET, event::EXTRINSIC_FAILED)));
        assert!(!events.iter().any(|e| e.is(DID_PALLET, event::DID_UPDATED)));
        assert!(ledger.record(DID).unwrap().services.is_empty());
    }

    #[tokio::test]
    async fn test_create_needs_subject_or_controller_signature() {
        let ledger = ledger();
        ledger.connect().await.unwrap();
        let by_bob = |nonce, call| Extrinsic {
            signer: "4bob".into(),
            fee_payer: "4bob".into(),
            nonce,
            call,
        };

        let events = finalized(ledger.submit(by_bob(0, create())).await.unwrap()).await;
        assert!(events.iter().any(|e| e.is(SYSTEM_PALLET, event::EXTRINSIC_FAILED)));
        assert!(ledger.record(DID).is_none());

        let delegated = RuntimeCall::Create {
            did: DID.into(),
            controller: "did:kilt:4bob".into(),
            authentication_key: key("authentication"),
        };
        let events = finalized(ledger.submit(by_bob(1, delegated)).await.unwrap()).await;
        assert!(events.iter().any(|e| e.is(SYSTEM_PALLET, event::EXTRINSIC_SUCCESS)));
        assert_eq!(ledger.record(DID).unwrap().controller, "did:kilt:4bob");
    }

    #[tokio::test]
    async fn test_payment_rejected_without_funds() {
        let ledger = ledger();
        ledger.connect().await.unwrap();
        ledger.set_balance("4alice", 10);
        let error = ledger.submit(extrinsic(0, create())).await.unwrap_err();
        assert!(matches!(error, ChainError::Payment { available: 10, .. }));
    }

    #[tokio::test]
    async fn test_transient_failures_then_recovery() {
        let ledger = ledger();
        ledger.inject_transient_failures(1);
        assert!(ledger.connect().await.unwrap_err().is_transient());
        assert!(ledger.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_unconnected_ledger_refuses_queries() {
        let ledger = ledger();
        assert_eq!(
            ledger.account("4alice").await.unwrap_err(),
            ChainError::NotConnected
        );
    }
}
