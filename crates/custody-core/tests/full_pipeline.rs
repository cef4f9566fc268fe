//! End-to-end tests: primary key -> AuthContext -> derived wallet -> transfer
//! -> threshold signature -> broadcast or dry run.
//!
//! Everything runs in-process against `LocalKeyService` and an in-memory RPC.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chain_sol::{
    derive_associated_token_address, parse_spl_transfer, parse_system_transfer,
    split_wire_transaction, Pubkey, ASSOCIATED_TOKEN_PROGRAM_ID, SYSTEM_PROGRAM_ID,
    TOKEN_PROGRAM_ID,
};
use custody_core::{
    AuthContextBuilder, Broadcaster, CustodyConfig, CustodyWallet, ErrorKind, Failure, Lamports,
    NativeTransfer, Operation, OperationOutcome, SigningPipeline, Stage, TokenBaseUnits,
    TokenTransfer, TransactionBuilder, TransactionResult, ThresholdNetwork,
};
use ed25519_dalek::{Signature, VerifyingKey};

use common::*;

fn native(network: &str, broadcast: bool) -> NativeTransfer {
    NativeTransfer {
        to: RECIPIENT.into(),
        amount: Lamports(2_200_000),
        network: Some(network.into()),
        broadcast,
    }
}

fn token(broadcast: bool) -> TokenTransfer {
    TokenTransfer {
        to: RECIPIENT.into(),
        mint: BONK_MINT.into(),
        amount: TokenBaseUnits(200_000),
        network: Some("devnet".into()),
        broadcast,
    }
}

fn dry_run_bytes(result: &TransactionResult) -> Vec<u8> {
    match result {
        TransactionResult::DryRun { signed_bytes, .. } => signed_bytes.clone(),
        other => panic!("expected a dry run, got {other:?}"),
    }
}

/// Checks the single signature on `wire` against the wallet key.
fn assert_signed_by(wire: &[u8], public_key: &[u8; 32]) {
    let (signatures, message) = split_wire_transaction(wire).unwrap();
    assert_eq!(signatures.len(), 1);
    let key = VerifyingKey::from_bytes(public_key).unwrap();
    key.verify_strict(message, &Signature::from_bytes(&signatures[0]))
        .expect("threshold signature verifies against the derived key");
}

// ─── Native transfer ─────────────────────────────────────────────────

#[tokio::test]
async fn native_transfer_dry_run_verifies_against_derived_key() {
    let rpc = Arc::new(MockRpc::new());
    let custody = custody(local_service(), rpc.clone());
    let identity = owner();

    let wallet = custody.create_wallet(&identity).await.unwrap();
    assert_eq!(wallet.controlling_address, identity.address());
    assert_eq!(wallet.derived_address, Pubkey::new(wallet.derived_public_key));

    let result = custody
        .send_native(&identity, &wallet, &native("devnet", false))
        .await
        .unwrap();

    assert!(result.is_dry_run());
    let wire = dry_run_bytes(&result);
    assert_signed_by(&wire, &wallet.derived_public_key);

    let (signatures, _) = split_wire_transaction(&wire).unwrap();
    assert_eq!(result.signature(), bs58::encode(signatures[0]).into_string());
    assert_eq!(rpc.submit_count(), 0);
}

#[tokio::test]
async fn native_transfer_carries_exact_lamports() {
    let rpc = Arc::new(MockRpc::new());
    let custody = custody(local_service(), rpc.clone());
    let wallet = custody.create_wallet(&owner()).await.unwrap();

    let builder = TransactionBuilder::new(rpc, Duration::from_secs(5));
    let tx = builder
        .build_native_transfer(
            &wallet.derived_address,
            RECIPIENT,
            Lamports(2_200_000),
            custody_core::SolanaNetwork::Devnet,
        )
        .await
        .unwrap();

    let message = tx.message();
    assert_eq!(message.instructions.len(), 1);
    assert_eq!(message.fee_payer(), Some(&wallet.derived_address));
    assert_eq!(message.recent_blockhash, BLOCKHASH);
    assert_eq!(message.program_id(0), Some(&SYSTEM_PROGRAM_ID));
    assert_eq!(
        parse_system_transfer(&message.instructions[0].data),
        Some(2_200_000)
    );
    assert_eq!(
        message.instruction_accounts(0).unwrap(),
        vec![wallet.derived_address, RECIPIENT.parse().unwrap()]
    );
}

#[tokio::test]
async fn broadcast_submits_the_dry_run_bytes() {
    let rpc = Arc::new(MockRpc::new());
    let service = local_service();
    let custody = custody(service, rpc.clone());
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let dry = custody
        .send_native(&identity, &wallet, &native("devnet", false))
        .await
        .unwrap();
    assert_eq!(rpc.submit_count(), 0);

    let sent = custody
        .send_native(&identity, &wallet, &native("devnet", true))
        .await
        .unwrap();

    let TransactionResult::Submitted {
        signature,
        explorer_url,
    } = &sent
    else {
        panic!("expected submission, got {sent:?}");
    };
    assert!(explorer_url.ends_with(&format!("{signature}?cluster=devnet")));

    let submitted = rpc.submitted();
    assert_eq!(submitted.len(), 1);
    assert_signed_by(&submitted[0], &wallet.derived_public_key);

    // Same blockhash, same instructions: the message bytes are identical and
    // only the signature may differ between runs.
    let (_, dry_message) = split_wire_transaction(&dry_run_bytes(&dry)).unwrap();
    let (_, sent_message) = split_wire_transaction(&submitted[0]).unwrap();
    assert_eq!(dry_message, sent_message);
}

#[tokio::test]
async fn signing_same_message_twice_yields_valid_signatures() {
    let rpc = Arc::new(MockRpc::new());
    let custody = custody(local_service(), rpc);
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    for _ in 0..2 {
        let result = custody
            .send_native(&identity, &wallet, &native("devnet", false))
            .await
            .unwrap();
        assert_signed_by(&dry_run_bytes(&result), &wallet.derived_public_key);
    }
}

#[tokio::test]
async fn rejected_submission_is_broadcast_failure() {
    let rpc = Arc::new(MockRpc::rejecting());
    let custody = custody(local_service(), rpc);
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let err = custody
        .send_native(&identity, &wallet, &native("devnet", true))
        .await
        .unwrap_err();

    assert_eq!(err.operation(), Stage::Broadcast);
    assert!(matches!(err.failure(), Failure::BroadcastFailed(_)));
    assert_eq!(err.wallet_id(), Some(&wallet.wallet_id));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn submitting_to_another_cluster_is_network_mismatch() {
    let service = local_service();
    let rpc = Arc::new(MockRpc::new());
    let custody = custody(service.clone(), rpc.clone());
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let tx = TransactionBuilder::new(rpc.clone(), Duration::from_secs(5))
        .build_native_transfer(
            &wallet.derived_address,
            RECIPIENT,
            Lamports(2_200_000),
            custody_core::SolanaNetwork::Devnet,
        )
        .await
        .unwrap();
    let auth = AuthContextBuilder::new(ThresholdNetwork::DatilDev)
        .build(&identity, Duration::from_secs(60))
        .unwrap();
    let signed = SigningPipeline::new(service, 2, Duration::from_secs(5))
        .sign(&auth, &wallet, &tx)
        .await
        .unwrap();

    let err = Broadcaster::new(rpc.clone(), Duration::from_secs(5))
        .submit(&signed, custody_core::SolanaNetwork::MainnetBeta, true)
        .await
        .unwrap_err();

    assert_eq!(err.operation(), Stage::Broadcast);
    assert!(matches!(err.failure(), Failure::NetworkMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(rpc.submit_count(), 0);
}

// ─── Token transfer ──────────────────────────────────────────────────

#[tokio::test]
async fn token_transfer_creates_missing_recipient_account_first() {
    let rpc = Arc::new(MockRpc::new().with_account(BONK_MINT));
    let custody = custody(local_service(), rpc.clone());
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let mint: Pubkey = BONK_MINT.parse().unwrap();
    let recipient: Pubkey = RECIPIENT.parse().unwrap();
    let source = derive_associated_token_address(&wallet.derived_address, &mint).unwrap();
    let destination = derive_associated_token_address(&recipient, &mint).unwrap();
    rpc.add_account(source);

    let builder = TransactionBuilder::new(rpc.clone(), Duration::from_secs(5));
    let tx = builder
        .build_token_transfer(
            &wallet.derived_address,
            RECIPIENT,
            BONK_MINT,
            TokenBaseUnits(200_000),
            custody_core::SolanaNetwork::Devnet,
        )
        .await
        .unwrap();

    let message = tx.message();
    assert_eq!(message.instructions.len(), 2);
    assert_eq!(message.program_id(0), Some(&ASSOCIATED_TOKEN_PROGRAM_ID));
    assert_eq!(message.program_id(1), Some(&TOKEN_PROGRAM_ID));
    assert_eq!(
        message.instruction_accounts(0).unwrap()[1],
        destination,
        "creates the recipient's associated token account"
    );
    assert_eq!(parse_spl_transfer(&message.instructions[1].data), Some(200_000));
    assert_eq!(
        message.instruction_accounts(1).unwrap(),
        vec![source, destination, wallet.derived_address]
    );

    let result = custody.send_token(&identity, &wallet, &token(false)).await.unwrap();
    assert_signed_by(&dry_run_bytes(&result), &wallet.derived_public_key);
}

#[tokio::test]
async fn token_transfer_with_existing_accounts_is_single_instruction() {
    let rpc = Arc::new(MockRpc::new().with_account(BONK_MINT));
    let custody = custody(local_service(), rpc.clone());
    let wallet = custody.create_wallet(&owner()).await.unwrap();

    let mint: Pubkey = BONK_MINT.parse().unwrap();
    rpc.add_account(derive_associated_token_address(&wallet.derived_address, &mint).unwrap());
    rpc.add_account(derive_associated_token_address(&RECIPIENT.parse().unwrap(), &mint).unwrap());

    let builder = TransactionBuilder::new(rpc, Duration::from_secs(5));
    let tx = builder
        .build_token_transfer(
            &wallet.derived_address,
            RECIPIENT,
            BONK_MINT,
            TokenBaseUnits(200_000),
            custody_core::SolanaNetwork::Devnet,
        )
        .await
        .unwrap();

    assert_eq!(tx.message().instructions.len(), 1);
    assert_eq!(tx.message().program_id(0), Some(&TOKEN_PROGRAM_ID));
}

#[tokio::test]
async fn token_transfer_with_unknown_mint_fails_before_signing() {
    let service = Arc::new(CountingService::new(local_service()));
    let custody = custody(service.clone(), Arc::new(MockRpc::new()));
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let err = custody
        .send_token(&identity, &wallet, &token(false))
        .await
        .unwrap_err();

    assert_eq!(err.operation(), Stage::BuildTokenTransfer);
    assert!(matches!(err.failure(), Failure::UnknownMint(_)));
    assert_eq!(service.sign_calls(), 0);
}

// ─── Authorization and integrity ─────────────────────────────────────

#[tokio::test]
async fn foreign_identity_is_refused_without_contacting_service() {
    let service = Arc::new(CountingService::new(local_service()));
    let rpc = Arc::new(MockRpc::new());
    let custody = custody(service.clone(), rpc.clone());

    let wallet = custody.create_wallet(&owner()).await.unwrap();
    let err = custody
        .send_native(&other(), &wallet, &native("devnet", true))
        .await
        .unwrap_err();

    assert_eq!(err.operation(), Stage::Sign);
    assert!(matches!(err.failure(), Failure::Unauthorized(_)));
    assert_eq!(err.kind(), ErrorKind::AuthFailure);
    assert_eq!(service.sign_calls(), 0);
    assert_eq!(rpc.submit_count(), 0);
}

#[tokio::test]
async fn tampered_echo_is_payload_mismatch() {
    let service = Arc::new(TamperingService {
        inner: local_service(),
    });
    let rpc = Arc::new(MockRpc::new());
    let custody = custody(service, rpc.clone());
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let err = custody
        .send_native(&identity, &wallet, &native("devnet", true))
        .await
        .unwrap_err();

    assert!(matches!(err.failure(), Failure::PayloadMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert!(!err.is_retryable());
    assert_eq!(rpc.submit_count(), 0);
}

#[tokio::test]
async fn too_few_shares_fails_quorum() {
    let service = Arc::new(ShareDroppingService {
        inner: local_service(),
        keep: 1,
    });
    let rpc = Arc::new(MockRpc::new());
    let custody = custody(service, rpc.clone());
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let err = custody
        .send_native(&identity, &wallet, &native("devnet", true))
        .await
        .unwrap_err();

    assert_eq!(err.operation(), Stage::Sign);
    assert!(matches!(err.failure(), Failure::SigningFailed(_)));
    assert_eq!(rpc.submit_count(), 0);
}

#[tokio::test]
async fn nodes_offline_below_threshold_fails_signing() {
    let service = local_service();
    let custody = custody(service.clone(), Arc::new(MockRpc::new()));
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    service.set_online_nodes(1);
    let err = custody
        .send_native(&identity, &wallet, &native("devnet", false))
        .await
        .unwrap_err();
    assert!(matches!(err.failure(), Failure::SigningFailed(_)));

    service.set_online_nodes(2);
    let result = custody
        .send_native(&identity, &wallet, &native("devnet", false))
        .await
        .unwrap();
    assert_signed_by(&dry_run_bytes(&result), &wallet.derived_public_key);
}

#[tokio::test]
async fn quorum_above_threshold_requires_more_nodes() {
    let service = local_service();
    let config = CustodyConfig {
        quorum: 3,
        ..config()
    };
    let custody = CustodyWallet::new(config, service.clone(), Arc::new(MockRpc::new())).unwrap();
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    service.set_online_nodes(2);
    let err = custody
        .send_native(&identity, &wallet, &native("devnet", false))
        .await
        .unwrap_err();
    assert!(matches!(err.failure(), Failure::SigningFailed(_)));

    service.set_online_nodes(3);
    assert!(custody
        .send_native(&identity, &wallet, &native("devnet", false))
        .await
        .is_ok());
}

#[tokio::test]
async fn pipeline_rejects_credential_for_other_identity() {
    let service = local_service();
    let rpc = Arc::new(MockRpc::new());
    let custody = custody(service.clone(), rpc.clone());
    let wallet = custody.create_wallet(&owner()).await.unwrap();

    let builder = TransactionBuilder::new(rpc, Duration::from_secs(5));
    let tx = builder
        .build_native_transfer(
            &wallet.derived_address,
            RECIPIENT,
            Lamports(1),
            custody_core::SolanaNetwork::Devnet,
        )
        .await
        .unwrap();

    let foreign = AuthContextBuilder::new(ThresholdNetwork::DatilDev)
        .build(&other(), Duration::from_secs(60))
        .unwrap();
    let pipeline = SigningPipeline::new(service, 2, Duration::from_secs(5));
    let err = pipeline.sign(&foreign, &wallet, &tx).await.unwrap_err();
    assert!(matches!(err.failure(), Failure::Unauthorized(_)));
}

// ─── Input validation ────────────────────────────────────────────────

#[tokio::test]
async fn zero_amount_is_invalid() {
    let custody = custody(local_service(), Arc::new(MockRpc::new()));
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let mut transfer = native("devnet", false);
    transfer.amount = Lamports(0);
    let err = custody
        .send_native(&identity, &wallet, &transfer)
        .await
        .unwrap_err();
    assert!(matches!(err.failure(), Failure::InvalidAmount));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn bad_recipient_is_invalid_address() {
    let custody = custody(local_service(), Arc::new(MockRpc::new()));
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let mut transfer = native("devnet", false);
    transfer.to = "not-a-solana-address".into();
    let err = custody
        .send_native(&identity, &wallet, &transfer)
        .await
        .unwrap_err();
    assert!(matches!(err.failure(), Failure::InvalidAddress(_)));
}

#[tokio::test]
async fn unknown_network_fails_at_call_time() {
    let custody = custody(local_service(), Arc::new(MockRpc::new()));
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let err = custody
        .send_native(&identity, &wallet, &native("moonnet", false))
        .await
        .unwrap_err();
    assert!(matches!(err.failure(), Failure::UnknownNetwork(_)));
    assert_eq!(err.operation(), Stage::BuildNativeTransfer);
    assert_eq!(err.wallet_id(), Some(&wallet.wallet_id));

    let mut transfer = token(false);
    transfer.network = Some("moonnet".into());
    let err = custody
        .send_token(&identity, &wallet, &transfer)
        .await
        .unwrap_err();
    assert!(matches!(err.failure(), Failure::UnknownNetwork(_)));
    assert_eq!(err.wallet_id(), Some(&wallet.wallet_id));
}

#[tokio::test]
async fn unknown_threshold_network_fails_wallet_creation() {
    let config = CustodyConfig {
        threshold_network: "nowhere".into(),
        ..config()
    };
    let custody = CustodyWallet::new(config, local_service(), Arc::new(MockRpc::new())).unwrap();

    let err = custody.create_wallet(&owner()).await.unwrap_err();
    assert!(matches!(err.failure(), Failure::UnknownNetwork(_)));
}

#[tokio::test]
async fn invalid_config_is_rejected_up_front() {
    let config = CustodyConfig {
        quorum: 0,
        ..config()
    };
    let err = CustodyWallet::new(config, local_service(), Arc::new(MockRpc::new()))
        .err()
        .unwrap();
    assert_eq!(err.operation(), Stage::Config);
    assert!(matches!(err.failure(), Failure::InvalidConfig(_)));
}

// ─── Operations ──────────────────────────────────────────────────────

#[tokio::test]
async fn execute_dispatches_each_operation() {
    let service = local_service();
    let rpc = Arc::new(MockRpc::new());
    let custody = custody(service.clone(), rpc);
    let identity = owner();

    let OperationOutcome::WalletCreated { wallet } = custody
        .execute(&identity, Operation::CreateWallet)
        .await
        .unwrap()
    else {
        panic!("expected a wallet");
    };

    let outcome = custody
        .execute(
            &identity,
            Operation::SendNative {
                wallet: wallet.clone(),
                transfer: native("devnet", false),
            },
        )
        .await
        .unwrap();
    let OperationOutcome::Transfer { result } = outcome else {
        panic!("expected a transfer");
    };
    assert_signed_by(&dry_run_bytes(&result), &wallet.derived_public_key);

    let outcome = custody
        .execute(
            &identity,
            Operation::CreateWalletAndSendNative {
                transfer: native("devnet", false),
            },
        )
        .await
        .unwrap();
    let OperationOutcome::WalletCreatedAndTransfer { wallet: fresh, result } = outcome else {
        panic!("expected wallet and transfer");
    };
    assert_ne!(fresh.wallet_id, wallet.wallet_id);
    assert_signed_by(&dry_run_bytes(&result), &fresh.derived_public_key);
    assert_eq!(service.wallet_count().unwrap(), 2);
}

#[tokio::test]
async fn each_derivation_mints_a_new_wallet() {
    let custody = custody(local_service(), Arc::new(MockRpc::new()));
    let identity = owner();

    let first = custody.create_wallet(&identity).await.unwrap();
    let second = custody.create_wallet(&identity).await.unwrap();
    assert_ne!(first.wallet_id, second.wallet_id);
    assert_ne!(first.derived_address, second.derived_address);
}

#[tokio::test]
async fn wallet_record_round_trips_through_json() {
    let custody = custody(local_service(), Arc::new(MockRpc::new()));
    let identity = owner();
    let wallet = custody.create_wallet(&identity).await.unwrap();

    let stored = serde_json::to_string(&wallet).unwrap();
    let restored = serde_json::from_str(&stored).unwrap();

    let result = custody
        .send_native(&identity, &restored, &native("devnet", false))
        .await
        .unwrap();
    assert_signed_by(&dry_run_bytes(&result), &wallet.derived_public_key);
}
