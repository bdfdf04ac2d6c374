use std::future::Future;

use agent_provider::{CancelSignal, ProviderError};
use provider_api::{ApiError, RequestAuth};

use crate::auth::CredentialSource;

/// Opens a request, refreshing the credential and retrying exactly once when
/// the server answers 401.
pub(crate) async fn open_with_reauth<S, F, Fut>(
    credentials: &CredentialSource,
    cancel: &CancelSignal,
    mut open: F,
) -> Result<S, ProviderError>
where
    F: FnMut(RequestAuth) -> Fut,
    Fut: Future<Output = Result<S, ApiError>>,
{
    let header = credentials.auth_header(cancel).await?;
    match open(credentials.request_auth(&header)).await {
        Err(ApiError::Unauthorized { status, message }) => {
            tracing::info!(
                provider = credentials.provider_id(),
                status = status.as_u16(),
                %message,
                "request rejected; refreshing credential and retrying once"
            );
            let refreshed = credentials.refresh_rejected(&header, cancel).await?;
            open(credentials.request_auth(&refreshed))
                .await
                .map_err(ProviderError::from)
        }
        Err(error) => {
            if error.is_transient() {
                tracing::warn!(provider = credentials.provider_id(), %error, "provider request failed (transient)");
            }
            Err(ProviderError::from(error))
        }
        Ok(stream) => Ok(stream),
    }
}
