use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::credential::{unix_now, AuthHeader, Credential};
use crate::error::CredentialError;
use crate::store::{lock_unpoisoned, CredentialStore};

pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Exchanges a credential's refresh token for a new credential.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, credential: Credential) -> BoxFuture<'static, Result<Credential, CredentialError>>;
}

/// Receives the URL the user must open to authorize.
pub type UrlPresenter = Arc<dyn Fn(&str) + Send + Sync>;

/// Interactive flow that produces a fresh credential.
pub trait AuthorizationFlow: Send + Sync {
    fn authorize(&self, present_url: UrlPresenter) -> BoxFuture<'static, Result<Credential, CredentialError>>;
}

/// Hands out auth headers and keeps OAuth credentials fresh.
///
/// Refreshes are serialized per provider: concurrent callers wait on the
/// provider's lock and reuse whatever the first refresh produced. A refresh
/// runs in its own task holding that lock, so dropping the caller never
/// abandons a rotated refresh token half-way.
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    refreshers: HashMap<String, Arc<dyn TokenRefresher>>,
    flows: HashMap<String, Arc<dyn AuthorizationFlow>>,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cache: Arc<Mutex<HashMap<String, Credential>>>,
    refresh_margin: Duration,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            refreshers: HashMap::new(),
            flows: HashMap::new(),
            refresh_locks: Mutex::new(HashMap::new()),
            cache: Arc::new(Mutex::new(HashMap::new())),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    #[must_use]
    pub fn with_refresher(mut self, provider: impl Into<String>, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refreshers.insert(provider.into(), refresher);
        self
    }

    #[must_use]
    pub fn with_authorization_flow(mut self, provider: impl Into<String>, flow: Arc<dyn AuthorizationFlow>) -> Self {
        self.flows.insert(provider.into(), flow);
        self
    }

    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    #[must_use]
    pub fn has_authorization_flow(&self, provider: &str) -> bool {
        self.flows.contains_key(provider)
    }

    pub fn credential(&self, provider: &str) -> Result<Option<Credential>, CredentialError> {
        if let Some(cached) = lock_unpoisoned(&self.cache).get(provider) {
            return Ok(Some(cached.clone()));
        }
        let loaded = self.store.load(provider)?;
        if let Some(credential) = &loaded {
            lock_unpoisoned(&self.cache).insert(provider.to_string(), credential.clone());
        }
        Ok(loaded)
    }

    /// Persists `credential`, replacing whatever the provider had.
    pub fn save(&self, credential: Credential) -> Result<(), CredentialError> {
        self.store.save(&credential)?;
        lock_unpoisoned(&self.cache).insert(credential.provider.clone(), credential);
        Ok(())
    }

    pub fn remove(&self, provider: &str) -> Result<(), CredentialError> {
        self.store.remove(provider)?;
        lock_unpoisoned(&self.cache).remove(provider);
        Ok(())
    }

    /// Current header for `provider`, refreshing first when the token is
    /// within the refresh margin of expiry.
    pub async fn auth_header(&self, provider: &str) -> Result<AuthHeader, CredentialError> {
        let credential = self.require(provider)?;
        if !self.needs_refresh(&credential) {
            return Ok(credential.auth_header());
        }

        let margin = self.refresh_margin;
        let refreshed = self
            .refresh_serialized(provider, move |current| current.expires_within(unix_now(), margin))
            .await?;
        Ok(refreshed.auth_header())
    }

    /// Reacts to the server rejecting `rejected`. If another caller already
    /// replaced that token the replacement is returned without a new refresh.
    pub async fn refresh_rejected(&self, provider: &str, rejected: &AuthHeader) -> Result<AuthHeader, CredentialError> {
        let rejected_token = rejected.token.clone();
        let refreshed = self
            .refresh_serialized(provider, move |current| current.access_token == rejected_token)
            .await?;
        Ok(refreshed.auth_header())
    }

    /// Runs the provider's interactive flow and persists the result.
    pub async fn run_authorization_flow(
        &self,
        provider: &str,
        present_url: UrlPresenter,
    ) -> Result<Credential, CredentialError> {
        let flow = self
            .flows
            .get(provider)
            .cloned()
            .ok_or_else(|| CredentialError::NoAuthorizationFlow {
                provider: provider.to_string(),
            })?;

        let lock = self.refresh_lock(provider);
        let _guard = lock.lock().await;
        let credential = flow.authorize(present_url).await?;
        self.save(credential.clone())?;
        tracing::info!(provider, "credential stored after authorization");
        Ok(credential)
    }

    fn require(&self, provider: &str) -> Result<Credential, CredentialError> {
        self.credential(provider)?
            .ok_or_else(|| CredentialError::NotFound {
                provider: provider.to_string(),
            })
    }

    fn needs_refresh(&self, credential: &Credential) -> bool {
        credential.expires_within(unix_now(), self.refresh_margin)
    }

    fn refresh_lock(&self, provider: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            lock_unpoisoned(&self.refresh_locks)
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    async fn refresh_serialized<F>(&self, provider: &str, still_stale: F) -> Result<Credential, CredentialError>
    where
        F: Fn(&Credential) -> bool,
    {
        let guard = self.refresh_lock(provider).lock_owned().await;

        // Re-read under the lock: a caller that waited may find the work done.
        let current = self.require(provider)?;
        if !still_stale(&current) {
            return Ok(current);
        }

        if !current.can_refresh() {
            return Err(CredentialError::NotRefreshable {
                provider: provider.to_string(),
                reason: "credential has no refresh token".to_string(),
            });
        }
        let refresher = self
            .refreshers
            .get(provider)
            .cloned()
            .ok_or_else(|| CredentialError::NotRefreshable {
                provider: provider.to_string(),
                reason: "no token refresher registered".to_string(),
            })?;

        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let provider_id = provider.to_string();
        let task = tokio::spawn(async move {
            let _guard = guard;
            tracing::info!(provider = %provider_id, "refreshing credential");
            let refreshed = match refresher.refresh(current).await {
                Ok(refreshed) => refreshed,
                Err(error) => {
                    tracing::warn!(provider = %provider_id, %error, "credential refresh failed");
                    return Err(error);
                }
            };
            lock_unpoisoned(&cache).insert(provider_id.clone(), refreshed.clone());
            store.save(&refreshed)?;
            tracing::info!(provider = %provider_id, expires_at = ?refreshed.expires_at, "credential refreshed");
            Ok(refreshed)
        });

        task.await
            .map_err(|error| CredentialError::RefreshTask(error.to_string()))?
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut refreshers: Vec<_> = self.refreshers.keys().collect();
        refreshers.sort();
        let mut flows: Vec<_> = self.flows.keys().collect();
        flows.sort();
        f.debug_struct("CredentialManager")
            .field("refreshers", &refreshers)
            .field("flows", &flows)
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}
