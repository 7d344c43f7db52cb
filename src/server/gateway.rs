use std::sync::Arc;

use serde_json::Value;

use super::error::PlutoError;
use super::identity::{IdentityKey, IdentityPool};
use super::session::{CachedSession, SessionCache};
use super::types::Region;
use super::upstream::UpstreamClient;

/// Couples the upstream client with the shared session cache and identity
/// pool, so callers ask for "a session for this identity" and never
/// authenticate directly.
pub struct Gateway {
    upstream: Arc<UpstreamClient>,
    sessions: Arc<SessionCache>,
    pool: Arc<IdentityPool>,
}

impl Gateway {
    pub fn new(
        upstream: Arc<UpstreamClient>,
        sessions: Arc<SessionCache>,
        pool: Arc<IdentityPool>,
    ) -> Self {
        Self {
            upstream,
            sessions,
            pool,
        }
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn pool(&self) -> &IdentityPool {
        &self.pool
    }

    /// Cached or freshly booted session for the given slots in `region`.
    pub async fn session(
        &self,
        region: Region,
        account_slot: usize,
        device_slot: usize,
    ) -> Result<Arc<CachedSession>, PlutoError> {
        let key = self.pool.identity_key(region, account_slot, device_slot);
        self.session_for(key).await
    }

    pub async fn session_for(&self, key: IdentityKey) -> Result<Arc<CachedSession>, PlutoError> {
        let credential = self.pool.account_for_slot(key.account_slot);
        let device = self.pool.device_for_slot(key.device_slot).to_string();
        let upstream = Arc::clone(&self.upstream);
        self.sessions
            .get_session(key, || async move {
                upstream.authenticate(key.region, &credential, &device).await
            })
            .await
    }

    /// Fetches a guide resource with the region's primary identity (slot 0).
    pub async fn fetch_guide(
        &self,
        region: Region,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, PlutoError> {
        let session = self.session(region, 0, 0).await?;
        let token = session.token().ok_or(PlutoError::MissingSessionToken)?;
        self.upstream.fetch_resource(region, token, path, params).await
    }
}
