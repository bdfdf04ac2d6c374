//! Provider credential storage, refresh, and the PKCE authorization flow.

pub mod callback;
mod credential;
mod error;
pub mod jwt;
mod manager;
pub mod oauth;
mod store;

pub use credential::{AuthHeader, Credential, CredentialKind};
pub use error::CredentialError;
pub use manager::{AuthorizationFlow, CredentialManager, TokenRefresher, UrlPresenter, DEFAULT_REFRESH_MARGIN};
pub use oauth::{authorization_url, generate_state, OAuthClient, OAuthSettings, PkceCodes};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
