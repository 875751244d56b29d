use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use authkeep::{codec, KeyRecordStore, Result, StoreError, StoredValue, CREDS_ID};

/// Env-filtered subscriber for test runs; repeat calls are no-ops.
/// `RUST_LOG=debug` surfaces store and facade activity.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,authkeep=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// In-memory record store honoring the per-session backend contract,
/// holding records in their encoded text form like a real backend.
pub struct MemoryStore {
    session: String,
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new(session: &str) -> Self {
        Self {
            session: session.to_string(),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.lock().unwrap().contains_key(id)
    }

    /// Seed a raw record, bypassing the codec.
    pub fn put_raw(&self, id: &str, text: &str) {
        self.records
            .lock()
            .unwrap()
            .insert(id.to_string(), text.to_string());
    }

    pub fn raw(&self, id: &str) -> Option<String> {
        self.records.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl KeyRecordStore for MemoryStore {
    async fn read(&self, id: &str) -> Result<Option<StoredValue>> {
        let records = self.records.lock().unwrap();
        match records.get(id) {
            Some(text) => codec::decode(text)
                .map(Some)
                .map_err(|e| StoreError::corrupt(id, e)),
            None => Ok(None),
        }
    }

    async fn write(&self, id: &str, value: &StoredValue) -> Result<()> {
        let text = codec::encode(value)?;
        self.records.lock().unwrap().insert(id.to_string(), text);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.records.lock().unwrap().remove(id);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .retain(|id, _| id == CREDS_ID);
        Ok(())
    }

    async fn remove_all(&self) -> Result<()> {
        self.records.lock().unwrap().clear();
        Ok(())
    }

    fn session(&self) -> &str {
        &self.session
    }
}
