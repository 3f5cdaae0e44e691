pub mod credentials;
pub mod s3;
pub mod system;

use std::sync::Arc;

use super::error::ApiError;
use super::store::{Store, StoreError};

/// Run a store operation off the async executor
async fn blocking<T, F>(store: &Arc<Store>, operation: F) -> Result<T, ApiError>
where
    F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    Ok(tokio::task::spawn_blocking(move || operation(&store)).await??)
}

/// Turn a store miss into `None`
fn optional<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
