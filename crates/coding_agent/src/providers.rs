use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use agent_provider::ModelProvider;
use agent_providers::ProviderAdapter;
use credentials::{
    Credential, CredentialError, CredentialManager, CredentialStore, FileCredentialStore, MemoryCredentialStore,
    OAuthClient, OAuthSettings,
};

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Configured providers keyed by id. The key is the id recorded on reasoning
/// turns and used for switching.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ModelProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").field("ids", &self.ids()).finish()
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, id: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        self.insert(id, provider);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(id.into(), provider);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Builds one adapter per configured provider.
    pub fn from_config(
        config: &AgentConfig,
        credentials: &Arc<CredentialManager>,
        session_id: Option<&str>,
    ) -> Result<Self, AgentError> {
        let mut registry = Self::new();
        for id in config.providers.keys() {
            let Some(settings) = config.provider_settings(id, session_id) else {
                continue;
            };
            let adapter = ProviderAdapter::from_settings(&settings, Arc::clone(credentials))?;
            registry.insert(id.clone(), Arc::new(adapter));
        }
        Ok(registry)
    }
}

/// Credential manager backed by the file at `path`, with API keys from the
/// environment layered on top and OAuth wired up for providers that log in.
pub fn credential_manager(
    config: &AgentConfig,
    path: &Path,
    lookup_env: impl Fn(&str) -> Option<String>,
) -> Result<CredentialManager, AgentError> {
    let mut seeded = Vec::new();
    for (id, provider) in &config.providers {
        let Some(variable) = &provider.api_key_env else {
            continue;
        };
        match lookup_env(variable).map(|value| value.trim().to_string()) {
            Some(key) if !key.is_empty() => {
                tracing::debug!(provider = %id, variable = %variable, "using API key from environment");
                seeded.push(Credential::api_key(id.clone(), key));
            }
            _ => tracing::debug!(provider = %id, variable = %variable, "API key variable is not set"),
        }
    }

    let store = LayeredCredentialStore {
        overlay: MemoryCredentialStore::with_credentials(seeded),
        persistent: Arc::new(FileCredentialStore::new(path)),
    };
    let mut manager = CredentialManager::new(Arc::new(store));
    for (id, provider) in &config.providers {
        if provider.kind.uses_oauth() {
            let client = Arc::new(OAuthClient::new(id.clone(), OAuthSettings::default())?);
            manager = manager
                .with_refresher(id.clone(), client.clone())
                .with_authorization_flow(id.clone(), client);
        }
    }
    Ok(manager)
}

/// Reads prefer the in-memory overlay; writes always land in the persistent
/// store and drop any overlay entry they replace.
struct LayeredCredentialStore {
    overlay: MemoryCredentialStore,
    persistent: Arc<dyn CredentialStore>,
}

impl CredentialStore for LayeredCredentialStore {
    fn load(&self, provider: &str) -> Result<Option<Credential>, CredentialError> {
        match self.overlay.load(provider)? {
            Some(credential) => Ok(Some(credential)),
            None => self.persistent.load(provider),
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        self.overlay.remove(&credential.provider)?;
        self.persistent.save(credential)
    }

    fn remove(&self, provider: &str) -> Result<(), CredentialError> {
        self.overlay.remove(provider)?;
        self.persistent.remove(provider)
    }
}
