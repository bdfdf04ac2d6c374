use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use credentials::{
    Credential, CredentialError, CredentialManager, CredentialStore, MemoryCredentialStore, TokenRefresher,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use pretty_assertions::assert_eq;

struct CountingRefresher {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingRefresher {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for CountingRefresher {
    fn refresh(&self, credential: Credential) -> BoxFuture<'static, Result<Credential, CredentialError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            let mut refreshed = credential;
            refreshed.access_token = format!("access-{call}");
            refreshed.refresh_token = Some(format!("refresh-{call}"));
            refreshed.expires_at = Some(now() + 3_600);
            Ok(refreshed)
        }
        .boxed()
    }
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64
}

fn manager_with(
    credential: Credential,
    refresher: Arc<CountingRefresher>,
) -> (Arc<CredentialManager>, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::with_credentials([credential]));
    let manager = CredentialManager::new(store.clone()).with_refresher("codex", refresher);
    (Arc::new(manager), store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_callers_share_one_refresh() {
    let refresher = CountingRefresher::new(Duration::from_millis(100));
    let (manager, store) = manager_with(
        Credential::oauth("codex", "stale", "refresh-0", Some(now() - 10)),
        Arc::clone(&refresher),
    );

    let first = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.auth_header("codex").await }
    });
    let second = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.auth_header("codex").await }
    });

    let first = first.await.expect("join").expect("header");
    let second = second.await.expect("join").expect("header");

    assert_eq!(refresher.calls(), 1);
    assert_eq!(first.token, "access-1");
    assert_eq!(second.token, "access-1");

    let persisted = store.load("codex").expect("load").expect("stored");
    assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn fresh_tokens_are_returned_without_refresh() {
    let refresher = CountingRefresher::new(Duration::ZERO);
    let (manager, _store) = manager_with(
        Credential::oauth("codex", "fresh", "refresh-0", Some(now() + 3_600)),
        Arc::clone(&refresher),
    );

    let header = manager.auth_header("codex").await.expect("header");
    assert_eq!(header.token, "fresh");
    assert_eq!(refresher.calls(), 0);
}

#[tokio::test]
async fn rejected_token_is_refreshed_once() {
    let refresher = CountingRefresher::new(Duration::ZERO);
    let (manager, _store) = manager_with(
        Credential::oauth("codex", "revoked", "refresh-0", Some(now() + 3_600)),
        Arc::clone(&refresher),
    );

    let rejected = manager.auth_header("codex").await.expect("header");
    let replacement = manager
        .refresh_rejected("codex", &rejected)
        .await
        .expect("refreshed");
    assert_eq!(replacement.token, "access-1");

    // A second caller holding the same stale header reuses the replacement.
    let again = manager
        .refresh_rejected("codex", &rejected)
        .await
        .expect("reused");
    assert_eq!(again.token, "access-1");
    assert_eq!(refresher.calls(), 1);
}

#[tokio::test]
async fn refresh_completes_even_when_caller_is_dropped() {
    let refresher = CountingRefresher::new(Duration::from_millis(150));
    let (manager, store) = manager_with(
        Credential::oauth("codex", "stale", "refresh-0", Some(now() - 10)),
        Arc::clone(&refresher),
    );

    let caller = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.auth_header("codex").await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    caller.abort();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let persisted = store.load("codex").expect("load").expect("stored");
    assert_eq!(persisted.access_token, "access-1");
    assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn api_keys_pass_through_and_missing_providers_require_login() {
    let store = Arc::new(MemoryCredentialStore::with_credentials([Credential::api_key(
        "anthropic",
        "sk-ant",
    )]));
    let manager = CredentialManager::new(store);

    assert_eq!(manager.auth_header("anthropic").await.expect("header").token, "sk-ant");

    let error = manager.auth_header("glm").await.expect_err("missing");
    assert!(error.requires_login());
    assert_matches!(error, CredentialError::NotFound { provider } if provider == "glm");
}

#[tokio::test]
async fn expired_credential_without_refresher_is_not_refreshable() {
    let store = Arc::new(MemoryCredentialStore::with_credentials([Credential::oauth(
        "codex",
        "stale",
        "refresh-0",
        Some(now() - 10),
    )]));
    let manager = CredentialManager::new(store);

    assert_matches!(
        manager.auth_header("codex").await,
        Err(CredentialError::NotRefreshable { provider, .. }) if provider == "codex"
    );
}

#[tokio::test]
async fn authorization_flow_requires_registration() {
    let manager = CredentialManager::new(Arc::new(MemoryCredentialStore::default()));
    let presenter: credentials::UrlPresenter = Arc::new(|_url: &str| {});

    assert_matches!(
        manager.run_authorization_flow("codex", presenter).await,
        Err(CredentialError::NoAuthorizationFlow { .. })
    );
}
