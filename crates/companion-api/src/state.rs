use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use companion_gateway::hub::Hub;
use companion_store::{Store, StoreError};

use crate::error::ApiError;
use crate::session::TokenSigner;

/// Storage deadline applied to every request's store work.
pub const STORAGE_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub signer: TokenSigner,
    pub hub: Hub,
}

/// Run blocking store work off the async runtime, bounded by the storage
/// deadline. The closure's domain errors pass through the `ApiError`
/// mapping; deadline and executor failures become `Storage`.
pub async fn run_store<T, F>(store: &Arc<Store>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    let task = tokio::task::spawn_blocking(move || f(&store));

    match timeout(STORAGE_DEADLINE, task).await {
        Err(_) => Err(ApiError::storage("storage deadline exceeded")),
        Ok(Err(join_err)) => Err(ApiError::storage(format!("store task failed: {join_err}"))),
        Ok(Ok(result)) => result.map_err(ApiError::from),
    }
}
