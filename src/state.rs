//! Auth-state facade: credentials plus categorized key records over one
//! storage backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::codec::StoredValue;
use crate::config::{PostgresConfig, RedisConfig, WorkerConfig};
use crate::domain::{
    init_auth_creds, AppStateSyncKeyData, AuthenticationCreds, SignalDataCategory,
    SignalDataPatch, SignalKey, CREDS_ID,
};
use crate::error::{Result, StoreError};
use crate::store::{KeyRecordStore, PostgresStore, RedisStore, WorkerStore};

/// Categorized key-record view over the backing store.
#[derive(Clone)]
pub struct SignalKeys {
    store: Arc<dyn KeyRecordStore>,
}

impl SignalKeys {
    pub fn new(store: Arc<dyn KeyRecordStore>) -> Self {
        Self { store }
    }

    /// Fetch the records for `ids` within one category. Every requested id
    /// is present in the result; absent records map to `None`.
    #[instrument(skip(self, ids))]
    pub async fn get(
        &self,
        category: SignalDataCategory,
        ids: &[&str],
    ) -> Result<HashMap<String, Option<StoredValue>>> {
        let mut data = HashMap::with_capacity(ids.len());
        for id in ids {
            let record_id = SignalKey::new(category, *id).record_id();
            let mut value = self.store.read(&record_id).await?;
            if category == SignalDataCategory::AppStateSyncKey {
                // Normalize loosely-shaped stored copies into the canonical
                // message form before handing them out.
                if let Some(raw) = &value {
                    let message = AppStateSyncKeyData::from_stored(raw)
                        .map_err(|e| StoreError::corrupt(&record_id, e))?;
                    value = Some(
                        message
                            .to_stored()
                            .map_err(|e| StoreError::corrupt(&record_id, e))?,
                    );
                }
            }
            data.insert((*id).to_string(), value);
        }
        Ok(data)
    }

    /// Apply a batch of staged writes and deletes. Falsy values delete the
    /// record, everything else upserts it.
    #[instrument(skip(self, patch), fields(entries = patch.len()))]
    pub async fn set(&self, patch: &SignalDataPatch) -> Result<()> {
        for (category, id, value) in patch.iter() {
            let record_id = SignalKey::new(category, id).record_id();
            match value {
                Some(value) if !value.is_falsy() => {
                    self.store.write(&record_id, value).await?;
                }
                _ => self.store.remove(&record_id).await?,
            }
        }
        Ok(())
    }
}

/// Credentials plus key records bound to one session's storage.
pub struct AuthState {
    pub creds: AuthenticationCreds,
    pub keys: SignalKeys,
    store: Arc<dyn KeyRecordStore>,
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("creds", &self.creds)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    /// Load existing credentials from the store, or generate a fresh set
    /// when the session has none yet.
    pub async fn load(store: Arc<dyn KeyRecordStore>) -> Result<Self> {
        let creds = match store.read(CREDS_ID).await? {
            Some(value) => serde_json::from_value(value.to_json())
                .map_err(|e| StoreError::corrupt(CREDS_ID, e))?,
            None => {
                info!(
                    session = store.session(),
                    "No stored credentials; generating a fresh set"
                );
                init_auth_creds()
            }
        };
        Ok(Self {
            creds,
            keys: SignalKeys::new(store.clone()),
            store,
        })
    }

    /// Persist the current credentials.
    pub async fn save_creds(&self) -> Result<()> {
        let value = StoredValue::from_serialize(&self.creds)?;
        self.store.write(CREDS_ID, &value).await
    }

    /// Delete all key records, keeping the credentials.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear_all().await
    }

    /// Delete the whole session, credentials included.
    pub async fn remove_creds(&self) -> Result<()> {
        self.store.remove_all().await
    }

    /// The underlying record store.
    pub fn store(&self) -> &Arc<dyn KeyRecordStore> {
        &self.store
    }
}

/// Open a PostgreSQL-backed auth state.
pub async fn use_postgres_auth_state(config: &PostgresConfig) -> Result<AuthState> {
    let store = PostgresStore::connect(config).await?;
    AuthState::load(Arc::new(store)).await
}

/// Open a Redis-backed auth state.
pub async fn use_redis_auth_state(config: &RedisConfig) -> Result<AuthState> {
    let store = RedisStore::connect(config).await?;
    AuthState::load(Arc::new(store)).await
}

/// Open an auth state proxied through a worker process.
pub async fn use_worker_auth_state(config: &WorkerConfig) -> Result<AuthState> {
    let store = WorkerStore::connect(config)?;
    AuthState::load(Arc::new(store)).await
}
