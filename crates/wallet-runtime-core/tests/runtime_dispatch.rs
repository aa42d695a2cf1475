mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use alloy::primitives::{Bytes, U256};
use common::{confirmed, other_address, settle_until, ManualBlocks, StubAuth, StubBackend, TestClock};
use wallet_runtime_core::{
    AuthSettings, Authenticator, BackendKind, BundleId, BundleState, Call, CallsRoute,
    Capability, ConnectOptions, SendCallsRequest, SignableMessage, WaitOptions, Wallet,
    WalletBackend, WalletError, WalletRuntime,
};

fn runtime() -> (WalletRuntime, Arc<ManualBlocks>) {
    let blocks = Arc::new(ManualBlocks::default());
    (WalletRuntime::new(blocks.clone()), blocks)
}

fn wallet(kind: BackendKind) -> (Wallet, Arc<StubBackend>) {
    let backend = Arc::new(StubBackend::new("stub", kind));
    (Wallet::new(backend.clone() as Arc<dyn WalletBackend>), backend)
}

fn one_call(chain_id: u64) -> SendCallsRequest {
    SendCallsRequest {
        chain_id,
        calls: vec![Call {
            to: other_address(),
            value: U256::from(1u64),
            data: Bytes::new(),
        }],
        capabilities: None,
    }
}

#[tokio::test]
async fn every_operation_needs_an_account_before_touching_the_backend() {
    let (rt, blocks) = runtime();
    let (wallet, backend) = wallet(BackendKind::Injected);
    let id = BundleId("0x01".into());

    let errors = vec![
        rt.send_calls(&wallet, &one_call(1)).await.expect_err("send_calls"),
        rt.get_calls_status(&wallet, &id).await.expect_err("get_calls_status"),
        rt.wait_for_bundle(&wallet, &id, 1, None).await.expect_err("wait"),
        rt.switch_chain(&wallet, 137).await.expect_err("switch_chain"),
        rt.get_capabilities(&wallet, 1).await.expect_err("capabilities"),
    ];
    for err in errors {
        assert_eq!(err, WalletError::NoActiveAccount);
    }
    assert_eq!(backend.network_calls.load(Ordering::SeqCst), 0);
    assert_eq!(blocks.subscriber_count(), 0);
    assert!(rt.get_account(&wallet).is_none());
}

#[tokio::test]
async fn peer_relay_declines_batched_calls_without_a_network_call() {
    let (rt, _) = runtime();
    let (wallet, backend) = wallet(BackendKind::PeerRelay);
    rt.connect(&wallet, ConnectOptions::on_chain(1)).await.expect("connect");

    let err = rt.send_calls(&wallet, &one_call(1)).await.expect_err("declined");
    assert!(matches!(
        err,
        WalletError::CapabilityUnsupported {
            capability: Capability::BatchCalls,
            ..
        }
    ));
    assert!(err.to_string().contains("contact the wallet provider"));
    rt.get_calls_status(&wallet, &BundleId("0x01".into()))
        .await
        .expect_err("status declined too");
    assert_eq!(backend.network_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_call_list_is_rejected() {
    let (rt, _) = runtime();
    let (wallet, backend) = wallet(BackendKind::Injected);
    rt.connect(&wallet, ConnectOptions::default()).await.expect("connect");

    let mut request = one_call(1);
    request.calls.clear();
    let err = rt.send_calls(&wallet, &request).await.expect_err("empty");
    assert!(matches!(err, WalletError::Validation(_)));
    assert_eq!(backend.network_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn send_calls_then_wait_for_confirmation() {
    let (rt, blocks) = runtime();
    let backend = Arc::new(
        StubBackend::new("stub", BackendKind::Injected).with_statuses(vec![Ok(confirmed("bundle-1"))]),
    );
    let wallet = Wallet::new(backend.clone());
    rt.connect(&wallet, ConnectOptions::on_chain(8453)).await.expect("connect");

    let id = rt.send_calls(&wallet, &one_call(8453)).await.expect("send");
    assert_eq!(id, BundleId("bundle-1".into()));

    let emitter = async {
        settle_until(|| blocks.subscriber_count() == 1).await;
        blocks.emit(1);
    };
    let (status, _) = tokio::join!(rt.wait_for_bundle(&wallet, &id, 8453, None), emitter);
    let status = status.expect("confirmed");
    assert_eq!(status.status, BundleState::Confirmed);
    assert_eq!(backend.status_calls.load(Ordering::SeqCst), 1);
    assert_eq!(rt.in_flight_waits(), 0);
}

#[tokio::test]
async fn wait_uses_runtime_defaults_when_no_options_given() {
    let blocks = Arc::new(ManualBlocks::default());
    let rt = WalletRuntime::new(blocks.clone()).with_wait_defaults(WaitOptions {
        max_blocks_wait_time: 3,
    });
    let (wallet, backend) = wallet(BackendKind::Embedded);
    rt.connect(&wallet, ConnectOptions::default()).await.expect("connect");

    let emitter = async {
        settle_until(|| blocks.subscriber_count() == 1).await;
        for n in 1..=5 {
            blocks.emit(n);
        }
    };
    let id = BundleId("0xfeed".into());
    let (result, _) = tokio::join!(rt.wait_for_bundle(&wallet, &id, 1, None), emitter);
    assert!(matches!(result, Err(WalletError::BundleTimeout { blocks: 3, .. })));
    assert_eq!(backend.status_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn switch_chain_supersedes_the_account() {
    let (rt, _) = runtime();
    let (wallet, backend) = wallet(BackendKind::Injected);
    let first = rt.connect(&wallet, ConnectOptions::on_chain(1)).await.expect("connect");

    let same = rt.switch_chain(&wallet, 1).await.expect("no-op switch");
    assert_eq!(same.chain_id(), 1);
    assert_eq!(backend.network_calls.load(Ordering::SeqCst), 0);

    let next = rt.switch_chain(&wallet, 137).await.expect("switch");
    assert_eq!(next.chain_id(), 137);
    assert_eq!(next.address(), first.address());
    assert_eq!(first.chain_id(), 1);
    assert_eq!(rt.get_account(&wallet).expect("account").chain_id(), 137);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (rt, _) = runtime();
    let (wallet, backend) = wallet(BackendKind::Injected);
    rt.connect(&wallet, ConnectOptions::default()).await.expect("connect");

    rt.disconnect(&wallet).await.expect("first disconnect");
    rt.disconnect(&wallet).await.expect("second disconnect");
    assert_eq!(backend.disconnects.load(Ordering::SeqCst), 1);
    assert!(rt.get_account(&wallet).is_none());
}

#[tokio::test]
async fn capability_table_gates_account_methods() {
    let (rt, _) = runtime();
    let (wallet, backend) = wallet(BackendKind::SmartAccount);
    let account = rt.connect(&wallet, ConnectOptions::default()).await.expect("connect");

    account
        .sign_message(&SignableMessage::Text("hello".into()))
        .await
        .expect("smart accounts sign messages");
    let err = account
        .send_raw_transaction(&Bytes::from(vec![0x02]), 1)
        .await
        .expect_err("no raw transactions");
    assert!(matches!(
        err,
        WalletError::CapabilityUnsupported {
            capability: Capability::SendRawTransaction,
            ..
        }
    ));
    assert!(backend.signer.raw_sent.lock().expect("lock").is_empty());

    let caps = rt.get_capabilities(&wallet, 1).await.expect("capabilities");
    assert_eq!(caps.calls_route, CallsRoute::AccountBundler);
    assert!(caps.declared.contains(&Capability::AtomicBatch));
    assert_eq!(caps.reported, None);
}

#[tokio::test]
async fn authenticators_are_cached_per_client_id() {
    let (rt, _) = runtime();
    let make = || {
        Authenticator::new(
            "client-a",
            Arc::new(StubAuth::default()),
            Arc::new(TestClock::default()),
            AuthSettings::default(),
        )
    };
    let a = rt.authenticator("client-a", make).expect("create");
    let b = rt.authenticator("client-a", make).expect("reuse");
    assert!(Arc::ptr_eq(&a, &b));
    rt.authenticator("client-b", make).expect("second client");
    assert_eq!(rt.auth_client_count(), 2);
}
