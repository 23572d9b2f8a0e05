/*
[INPUT]:  Mock wallet providers, signers and identity responses
[OUTPUT]: Test results for wallet login and wallet session guarding
[POS]:    Integration tests - wallet layer
[UPDATE]: When wallet login or guard behaviour changes
*/

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{envelope, fresh_token, memory_storage, session_for, setup_mock_server, wallet_user};
use passage_client::{
    LocalWalletProvider, MockWalletSigner, Session, SessionState, WalletLoginCoordinator, WalletLoginOutcome,
    WalletProvider, WalletSessionGuard, WalletSigner,
};
use serde_json::json;
use tokio::time::timeout;
use tokio_test::assert_ok;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WALLET_A: &str = "0xAaAa000000000000000000000000000000000001";
/// Signer that takes a while to answer and counts signature requests
struct SlowSigner {
    address: String,
    delay: Duration,
    requests: Arc<AtomicUsize>,
}

#[async_trait]
impl WalletSigner for SlowSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign_message(&self, _message: &str) -> passage_client::Result<String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok("0xslow".to_string())
    }
}

const WALLET_B: &str = "0xbBbB000000000000000000000000000000000002";

async fn mount_wallet_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/auth/web3-login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "user": wallet_user("user-9", Some(WALLET_A)),
            "accessToken": fresh_token("user-9"),
        }))))
        .mount(server)
        .await;
}

async fn mount_logout(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(204))
        .expect(times)
        .mount(server)
        .await;
}

async fn wait_until_signed_out(session: &Session) {
    let mut state = session.subscribe();
    let signed_out = timeout(
        Duration::from_secs(5),
        state.wait_for(|state| *state == SessionState::Unauthenticated),
    )
    .await
    .is_ok();
    assert!(signed_out, "session was not signed out");
}

/// Wallet A connected and signed in, guard running
async fn guarded_wallet_session(server: &MockServer, debounce: Duration) -> (Session, Arc<LocalWalletProvider>) {
    mount_wallet_login(server).await;
    let session = session_for(server, memory_storage());
    let provider = Arc::new(LocalWalletProvider::new());
    provider.connect(Arc::new(MockWalletSigner::new(WALLET_A, "0xsig")));

    assert_ok!(session.login_with_wallet(WALLET_A, "0xsig", "challenge").await);
    WalletSessionGuard::new(session.clone())
        .with_debounce(debounce)
        .spawn(provider.connection());

    (session, provider)
}

#[tokio::test]
async fn test_account_switch_logs_out_exactly_once() {
    let server = setup_mock_server().await;
    mount_logout(&server, 1).await;
    let (session, provider) = guarded_wallet_session(&server, Duration::from_millis(50)).await;

    provider.connect(Arc::new(MockWalletSigner::new(WALLET_B, "0xsig")));
    wait_until_signed_out(&session).await;

    provider.reannounce();
    provider.reannounce();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!session.is_authenticated());
    assert!(session.tokens().get_token().is_none());
}

#[tokio::test]
async fn test_address_case_change_is_not_a_switch() {
    let server = setup_mock_server().await;
    mount_logout(&server, 0).await;
    let (session, provider) = guarded_wallet_session(&server, Duration::from_millis(50)).await;

    provider.connect(Arc::new(MockWalletSigner::new(&WALLET_A.to_lowercase(), "0xsig")));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_disconnect_logs_out_after_debounce() {
    let server = setup_mock_server().await;
    mount_logout(&server, 1).await;
    let (session, provider) = guarded_wallet_session(&server, Duration::from_millis(100)).await;

    provider.disconnect();
    assert!(session.is_authenticated());

    wait_until_signed_out(&session).await;
}

#[tokio::test]
async fn test_reconnect_within_debounce_keeps_session() {
    let server = setup_mock_server().await;
    mount_logout(&server, 0).await;
    let (session, provider) = guarded_wallet_session(&server, Duration::from_millis(300)).await;

    provider.disconnect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    provider.connect(Arc::new(MockWalletSigner::new(WALLET_A, "0xsig")));
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_email_session_ignores_wallet_events() {
    let server = setup_mock_server().await;
    mount_logout(&server, 0).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "user": common::email_user("user-1"),
            "accessToken": fresh_token("user-1"),
        }))))
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    let provider = Arc::new(LocalWalletProvider::new());
    assert_ok!(session.login("ada@example.com", "secret").await);
    WalletSessionGuard::new(session.clone())
        .with_debounce(Duration::from_millis(20))
        .spawn(provider.connection());

    provider.connect(Arc::new(MockWalletSigner::new(WALLET_B, "0xsig")));
    provider.disconnect();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_coordinator_signs_in_on_connect() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/web3-login"))
        .and(body_partial_json(json!({"walletAddress": WALLET_A, "signature": "0xsigned"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "user": wallet_user("user-9", None),
            "accessToken": fresh_token("user-9"),
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    let provider = Arc::new(LocalWalletProvider::new());
    let coordinator = WalletLoginCoordinator::new(session.clone(), provider.clone() as Arc<dyn WalletProvider>);
    let mut outcomes = coordinator.outcomes();
    coordinator.spawn();

    provider.connect(Arc::new(MockWalletSigner::new(WALLET_A, "0xsigned")));
    let outcome = assert_ok!(timeout(Duration::from_secs(5), outcomes.recv()).await);

    assert_eq!(
        assert_ok!(outcome),
        WalletLoginOutcome::Authenticated {
            address: WALLET_A.to_string(),
        }
    );
    let user = session.current_user().expect("signed in");
    assert!(user.is_wallet_session());
    assert_eq!(user.wallet_address.as_deref(), Some(WALLET_A));

    // already authenticated: re-announcing does not sign again
    provider.reannounce();
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_coordinator_reports_cancelled_signature() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/web3-login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    let provider = Arc::new(LocalWalletProvider::new());
    let coordinator = WalletLoginCoordinator::new(session.clone(), provider.clone() as Arc<dyn WalletProvider>);
    let mut outcomes = coordinator.outcomes();
    coordinator.spawn();

    provider.connect(Arc::new(MockWalletSigner::rejecting(WALLET_A)));
    let outcome = assert_ok!(timeout(Duration::from_secs(5), outcomes.recv()).await);

    assert_eq!(
        assert_ok!(outcome),
        WalletLoginOutcome::Cancelled {
            address: WALLET_A.to_string(),
        }
    );
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_coordinator_reports_server_rejection() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/web3-login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"code": "INVALID_SIGNATURE", "message": "Signature mismatch"})),
        )
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    let provider = Arc::new(LocalWalletProvider::new());
    let coordinator = WalletLoginCoordinator::new(session.clone(), provider.clone() as Arc<dyn WalletProvider>);
    let mut outcomes = coordinator.outcomes();
    coordinator.spawn();

    provider.connect(Arc::new(MockWalletSigner::new(WALLET_A, "0xbad")));
    let outcome = assert_ok!(assert_ok!(timeout(Duration::from_secs(5), outcomes.recv()).await));

    match outcome {
        WalletLoginOutcome::Failed { address, code, .. } => {
            assert_eq!(address, WALLET_A);
            assert_eq!(code.as_deref(), Some("INVALID_SIGNATURE"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_coordinator_does_not_refire_while_attempt_outstanding() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/web3-login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "user": wallet_user("user-9", Some(WALLET_A)),
            "accessToken": fresh_token("user-9"),
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    let provider = Arc::new(LocalWalletProvider::new());
    let coordinator = WalletLoginCoordinator::new(session.clone(), provider.clone() as Arc<dyn WalletProvider>);
    let mut outcomes = coordinator.outcomes();
    coordinator.spawn();

    let requests = Arc::new(AtomicUsize::new(0));
    let signer = |address: &str| {
        Arc::new(SlowSigner {
            address: address.to_string(),
            delay: Duration::from_millis(300),
            requests: requests.clone(),
        })
    };

    provider.connect(signer(WALLET_A));
    tokio::time::sleep(Duration::from_millis(50)).await;
    provider.reannounce();
    tokio::time::sleep(Duration::from_millis(50)).await;
    provider.connect(signer(&WALLET_A.to_lowercase()));

    let outcome = assert_ok!(assert_ok!(timeout(Duration::from_secs(5), outcomes.recv()).await));
    assert!(matches!(outcome, WalletLoginOutcome::Authenticated { .. }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert!(outcomes.try_recv().is_err());
}
