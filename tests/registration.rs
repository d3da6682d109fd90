//! On-chain registration against the in-process ledger.

use did_lifecycle::config::LocalLedgerSettings;
use did_lifecycle::contracts::monitor::PipelineState;
use did_lifecycle::models::did::{
    KeyMaterial, Service, ServiceEndpoint, ServiceType, VerificationMethod, VerificationMethodType,
};
use did_lifecycle::utils::crypto::{encode_multikey, KeyCodec};
use did_lifecycle::{CreationRequest, DidError, DidFactory, LocalLedger, Settings};
use std::sync::Arc;
use std::time::Duration;

const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
const BOB: &str = "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty";

fn setup_with(settings: Settings) -> (Arc<DidFactory>, LocalLedger) {
    let ledger = LocalLedger::from_settings(&settings.local_ledger, settings.status_channel_capacity);
    let factory = DidFactory::new(settings, Arc::new(ledger.clone()));
    (Arc::new(factory), ledger)
}

fn setup() -> (Arc<DidFactory>, LocalLedger) {
    setup_with(Settings {
        confirmation_timeout_secs: 5,
        local_ledger: LocalLedgerSettings {
            block_time_ms: 5,
            ..Default::default()
        },
        ..Default::default()
    })
}

fn alice_did() -> String {
    format!("did:kilt:{ALICE}")
}

fn ed25519_method(fragment: &str, seed: u8) -> VerificationMethod {
    VerificationMethod::new(
        format!("#{fragment}"),
        VerificationMethodType::Ed25519VerificationKey2020,
        alice_did(),
        KeyMaterial::PublicKeyMultibase(encode_multikey(KeyCodec::Ed25519, &[seed; 32])),
    )
}

fn linked_domain(fragment: &str) -> Service {
    Service::new(
        format!("#{fragment}"),
        ServiceType::LinkedDomains,
        ServiceEndpoint::Uri(format!("https://{fragment}.example")),
    )
}

#[tokio::test]
async fn test_register_then_duplicate() {
    let (factory, ledger) = setup();
    let request = CreationRequest::new(ALICE);

    let outcome = factory.register_did_onchain(&request, ALICE).await.unwrap();
    assert_eq!(outcome.did, alice_did());
    assert_eq!(outcome.did_document.id, alice_did());
    assert!(outcome.transaction_result.success);
    assert!(outcome.transaction_result.block_number > 0);
    assert!(outcome.transaction_result.transaction_hash.starts_with("0x"));

    let error = factory.register_did_onchain(&request, ALICE).await.unwrap_err();
    assert!(matches!(error, DidError::DuplicateDid(ref did) if did == &alice_did()));
    // rejected by the pre-flight check, nothing was submitted
    assert_eq!(ledger.submission_count(), 1);
}

#[tokio::test]
async fn test_ledger_side_duplicate_maps_to_duplicate_did() {
    let (factory, ledger) = setup();
    let request = CreationRequest::new(ALICE);

    let first = factory.prepare_registration(&request, ALICE).await.unwrap();
    let second = factory.prepare_registration(&request, ALICE).await.unwrap();
    first.submit().await.unwrap();

    let error = second.submit().await.unwrap_err();
    assert!(matches!(error, DidError::DuplicateDid(_)));
    assert_eq!(ledger.submission_count(), 2);
}

#[tokio::test]
async fn test_prepared_registration_exposes_fee_and_aborts_on_drop() {
    let (factory, ledger) = setup();
    let request = CreationRequest::new(ALICE).with_service(linked_domain("hub"));

    let prepared = factory.prepare_registration(&request, ALICE).await.unwrap();
    assert_eq!(prepared.state(), PipelineState::FeeEstimated);
    assert!(prepared.fee().amount > 0);
    assert_eq!(prepared.mutation_count(), 2);
    drop(prepared);

    assert_eq!(ledger.submission_count(), 0);
    assert!(!factory.check_did_exists(&alice_did()).await.unwrap());
}

#[tokio::test]
async fn test_realized_fee_is_what_the_ledger_charged() {
    let (factory, ledger) = setup();
    let before = ledger.balance(ALICE);
    let outcome = factory
        .register_did_onchain(&CreationRequest::new(ALICE), ALICE)
        .await
        .unwrap();
    let fee = outcome.transaction_result.fee;
    assert_eq!(fee.currency, "KILT");
    assert_eq!(before - ledger.balance(ALICE), fee.amount);
}

#[tokio::test]
async fn test_batch_registers_everything_atomically() {
    let (factory, ledger) = setup();
    let request = CreationRequest::new(ALICE)
        .with_verification_method(ed25519_method("key-1", 1))
        .with_verification_method(ed25519_method("key-2", 2))
        .with_service(linked_domain("hub"));

    let outcome = factory.register_did_onchain(&request, ALICE).await.unwrap();
    let record = ledger.record(&alice_did()).unwrap();
    assert_eq!(record.verification_methods.len(), 3);
    assert_eq!(record.services.len(), 1);
    assert!(outcome
        .transaction_result
        .events
        .iter()
        .any(|e| e.is("utility", "BatchCompleted")));
    assert_eq!(
        factory.resolve_did(&alice_did()).await.unwrap(),
        outcome.did_document
    );
}

#[tokio::test]
async fn test_failed_batch_applies_nothing() {
    let (factory, ledger) = setup();
    let batch = CreationRequest::new(ALICE)
        .with_verification_method(ed25519_method("key-1", 1))
        .with_verification_method(ed25519_method("key-2", 2))
        .with_service(linked_domain("hub"));

    let prepared = factory.prepare_registration(&batch, ALICE).await.unwrap();
    factory
        .register_did_onchain(&CreationRequest::new(ALICE), ALICE)
        .await
        .unwrap();

    assert!(matches!(
        prepared.submit().await,
        Err(DidError::DuplicateDid(_))
    ));
    let record = ledger.record(&alice_did()).unwrap();
    assert_eq!(record.verification_methods.len(), 1);
    assert!(record.services.is_empty());
}

#[tokio::test]
async fn test_invalid_request_never_reaches_the_ledger() {
    let (factory, ledger) = setup();
    let request = CreationRequest::new(ALICE)
        .with_service(linked_domain("hub"))
        .with_service(linked_domain("hub"));
    assert!(matches!(
        factory.register_did_onchain(&request, ALICE).await,
        Err(DidError::Validation(_))
    ));

    let empty_controller = CreationRequest::new(ALICE).with_controller(" ");
    assert!(matches!(
        factory.register_did_onchain(&empty_controller, ALICE).await,
        Err(DidError::Validation(_))
    ));
    assert!(matches!(
        factory
            .register_did_onchain(&CreationRequest::new("0xnot-ss58"), ALICE)
            .await,
        Err(DidError::Validation(_))
    ));
    assert_eq!(ledger.submission_count(), 0);
}

#[tokio::test]
async fn test_insufficient_balance_preflight() {
    let (factory, ledger) = setup();
    ledger.set_balance(ALICE, 0);
    let error = factory
        .register_did_onchain(&CreationRequest::new(ALICE), ALICE)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        DidError::InsufficientBalance { available: 0, .. }
    ));
    assert_eq!(ledger.submission_count(), 0);
}

#[tokio::test]
async fn test_insufficient_balance_rejected_by_ledger() {
    let (factory, ledger) = setup();
    let prepared = factory
        .prepare_registration(&CreationRequest::new(ALICE), ALICE)
        .await
        .unwrap();
    // drained between estimation and submission
    ledger.set_balance(ALICE, 1);

    let error = prepared.submit().await.unwrap_err();
    assert!(matches!(
        error,
        DidError::InsufficientBalance { available: 1, .. }
    ));
    assert!(ledger.record(&alice_did()).is_none());
}

#[tokio::test]
async fn test_fee_payer_override() {
    let (factory, ledger) = setup();
    let alice_before = ledger.balance(ALICE);
    let request = CreationRequest::new(ALICE).with_fee_payer(BOB);
    let outcome = factory.register_did_onchain(&request, ALICE).await.unwrap();

    assert_eq!(ledger.balance(ALICE), alice_before);
    assert!(outcome
        .transaction_result
        .events
        .iter()
        .any(|e| e.is("transactionPayment", "TransactionFeePaid") && e.data["who"] == BOB));
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_carries_hash() {
    let (factory, ledger) = setup_with(Settings {
        confirmation_timeout_secs: 30,
        ..Default::default()
    });
    ledger.hold_finality(true);

    let started = tokio::time::Instant::now();
    let error = factory
        .register_did_onchain(&CreationRequest::new(ALICE), ALICE)
        .await
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_secs(30));

    let hash = error.transaction_hash().unwrap().to_string();
    assert!(!hash.is_empty());
    assert!(matches!(error, DidError::ConfirmationTimeout { timeout, .. } if timeout == Duration::from_secs(30)));
    // the transaction was not resubmitted, and it did land
    assert_eq!(ledger.submission_count(), 1);
    assert!(ledger.record(&alice_did()).is_some());
}

#[tokio::test]
async fn test_failed_status_is_registration_error() {
    let (factory, ledger) = setup();
    ledger.fail_next_submission("dropped from pool");
    let error = factory
        .register_did_onchain(&CreationRequest::new(ALICE), ALICE)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "did_registration_error");
    assert!(error.to_string().contains("dropped from pool"));
    assert!(ledger.record(&alice_did()).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_transient_connect_failures_are_retried() {
    let (factory, ledger) = setup();
    ledger.inject_transient_failures(2);
    let outcome = factory
        .register_did_onchain(&CreationRequest::new(ALICE), ALICE)
        .await
        .unwrap();
    assert!(outcome.transaction_result.success);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_network_failure_surfaces() {
    let (factory, ledger) = setup();
    ledger.inject_transient_failures(10);
    let error = factory.check_did_exists(&alice_did()).await.unwrap_err();
    assert!(matches!(error, DidError::Network { .. }));
    assert!(error.is_retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_from_one_account() {
    let (factory, ledger) = setup();
    factory
        .register_did_onchain(&CreationRequest::new(ALICE), ALICE)
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for index in 0..5 {
        let factory = factory.clone();
        tasks.push(tokio::spawn(async move {
            factory
                .add_service(&alice_did(), linked_domain(&format!("svc-{index}")), ALICE)
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap().success);
    }

    assert_eq!(ledger.record(&alice_did()).unwrap().services.len(), 5);
    assert_eq!(ledger.submission_count(), 6);
}

#[tokio::test]
async fn test_mutations_after_registration() {
    let (factory, ledger) = setup();
    factory
        .register_did_onchain(&CreationRequest::new(ALICE), ALICE)
        .await
        .unwrap();
    let did = alice_did();

    factory
        .add_verification_method(&did, ed25519_method("key-2", 2), ALICE)
        .await
        .unwrap();
    factory.add_service(&did, linked_domain("hub"), ALICE).await.unwrap();
    let document = factory.query_did_document(&did).await.unwrap().unwrap();
    assert_eq!(document.verification_method.len(), 2);
    assert_eq!(document.authentication.len(), 2);

    factory.remove_verification_method(&did, "#key-2").await.unwrap();
    factory.remove_service(&did, "#hub").await.unwrap();
    let record = ledger.record(&did).unwrap();
    assert_eq!(record.verification_methods.len(), 1);
    assert!(record.services.is_empty());

    let missing = factory.remove_service(&did, "#hub").await.unwrap_err();
    assert_eq!(missing.kind(), "did_registration_error");
}

#[tokio::test]
async fn test_mutation_by_unrelated_signer_is_rejected() {
    let (factory, _) = setup();
    factory
        .register_did_onchain(&CreationRequest::new(ALICE), ALICE)
        .await
        .unwrap();
    let error = factory
        .add_service(&alice_did(), linked_domain("hub"), BOB)
        .await
        .unwrap_err();
    assert!(matches!(error, DidError::Registration { .. }));
}

#[tokio::test]
async fn test_registration_needs_subject_or_controller_signer() {
    let (factory, ledger) = setup();
    let error = factory
        .register_did_onchain(&CreationRequest::new(ALICE), BOB)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "did_registration_error");
    assert!(ledger.record(&alice_did()).is_none());

    let delegated = CreationRequest::new(ALICE)
        .with_controller(format!("did:kilt:{BOB}"))
        .with_service(linked_domain("hub"));
    factory.register_did_onchain(&delegated, BOB).await.unwrap();
    assert_eq!(ledger.record(&alice_did()).unwrap().services.len(), 1);
}
