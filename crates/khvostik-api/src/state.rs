use std::sync::Arc;

use tracing::error;

use khvostik_db::Database;
use khvostik_gateway::dispatcher::Dispatcher;
use khvostik_geocode::AddressResolver;

use crate::error::{ApiError, ApiResult};
use crate::storage::PhotoStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub resolver: AddressResolver,
    pub photos: PhotoStore,
    /// Accounts registered with this email start out as admins.
    pub admin_email: Option<String>,
    /// Base URL used when logging password reset links.
    pub public_url: String,
}

impl AppStateInner {
    /// Run blocking DB work off the async runtime.
    pub async fn with_db<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(e.into())
            })?
            .map_err(ApiError::from)
    }
}
