//! Storage backends for auth records.
//!
//! Every backend stores flat `(session, id) -> value` records behind the
//! [`KeyRecordStore`] trait. A store owns its connection and is built from
//! caller-supplied configuration; nothing here is process-global.

use async_trait::async_trait;

use crate::codec::StoredValue;
use crate::error::Result;

pub mod postgres;
pub mod redis;
pub mod worker;

pub use self::postgres::PostgresStore;
pub use self::redis::RedisStore;
pub use self::worker::{WorkerOp, WorkerRequest, WorkerResponse, WorkerStore, WorkerValues};

/// Uniform contract over the flat per-session record space.
///
/// `read` distinguishes a missing record (`Ok(None)`) from a backend that
/// stayed unreachable through the whole retry budget (an error).
#[async_trait]
pub trait KeyRecordStore: Send + Sync {
    /// Fetch and decode one record, `None` when absent.
    async fn read(&self, id: &str) -> Result<Option<StoredValue>>;

    /// Insert or overwrite one record.
    async fn write(&self, id: &str, value: &StoredValue) -> Result<()>;

    /// Delete one record; deleting an absent record is not an error.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Delete every record in the session except the credentials record.
    async fn clear_all(&self) -> Result<()>;

    /// Delete every record in the session, credentials included.
    async fn remove_all(&self) -> Result<()>;

    /// Session namespace this store operates in.
    fn session(&self) -> &str;
}

/// Fully-qualified key for backends that share one keyspace.
pub fn qualified_key(session: &str, id: &str) -> String {
    format!("session:{session}:{id}")
}
