use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::{info, instrument};

use crate::codec::{self, StoredValue};
use crate::config::RedisConfig;
use crate::domain::CREDS_ID;
use crate::error::{Result, StoreError};
use crate::retry::RetryPolicy;

use super::{qualified_key, KeyRecordStore};

/// Redis storage adapter
///
/// Records are plain string values in a shared keyspace, namespaced as
/// `session:<session>:<record id>`. Bulk deletes walk the namespace with
/// a cursor scan rather than blocking the server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    session: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("session", &self.session)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect with caller-supplied settings
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        if config.session.is_empty() {
            return Err(StoreError::MissingSession { backend: "redis" });
        }

        let addr = if config.tls {
            ConnectionAddr::TcpTls {
                host: config.host.clone(),
                port: config.port,
                insecure: false,
                tls_params: None,
            }
        } else {
            ConnectionAddr::Tcp(config.host.clone(), config.port)
        };
        let client = Client::open(ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: config.db,
                username: config.username.clone(),
                password: config.password.clone(),
                ..Default::default()
            },
        })?;
        // The manager re-dials on connection loss, so transient drops show
        // up as retryable command errors instead of a dead store.
        let conn = ConnectionManager::new(client).await?;
        info!(host = %config.host, port = config.port, "Connected to Redis");

        Ok(Self {
            conn,
            session: config.session.clone(),
            retry: config.retry_policy(),
        })
    }

    fn key(&self, id: &str) -> String {
        qualified_key(&self.session, id)
    }

    /// Delete every key under the session prefix, optionally sparing the
    /// credentials record.
    async fn purge(&self, what: &str, keep_creds: bool) -> Result<()> {
        let creds_key = self.key(CREDS_ID);
        let pattern = self.key("*");
        self.retry
            .run(what, || async {
                let mut conn = self.conn.clone();
                let mut keys: Vec<String> = Vec::new();
                {
                    let mut iter = conn.scan_match::<_, String>(&pattern).await?;
                    while let Some(key) = iter.next_item().await {
                        keys.push(key);
                    }
                }
                if keep_creds {
                    keys.retain(|key| key != &creds_key);
                }
                if !keys.is_empty() {
                    let _: () = conn.del(&keys).await?;
                }
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl KeyRecordStore for RedisStore {
    #[instrument(skip(self))]
    async fn read(&self, id: &str) -> Result<Option<StoredValue>> {
        let key = self.key(id);
        let raw = self
            .retry
            .run("redis read", || async {
                let mut conn = self.conn.clone();
                let value: Option<String> = conn.get(&key).await?;
                Ok(value)
            })
            .await?;

        match raw {
            Some(text) => codec::decode(&text)
                .map(Some)
                .map_err(|e| StoreError::corrupt(id, e)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value))]
    async fn write(&self, id: &str, value: &StoredValue) -> Result<()> {
        let key = self.key(id);
        let payload = codec::encode(value)?;
        self.retry
            .run("redis write", || async {
                let mut conn = self.conn.clone();
                let _: () = conn.set(&key, &payload).await?;
                Ok(())
            })
            .await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let key = self.key(id);
        self.retry
            .run("redis remove", || async {
                let mut conn = self.conn.clone();
                let _: () = conn.del(&key).await?;
                Ok(())
            })
            .await
    }

    async fn clear_all(&self) -> Result<()> {
        self.purge("redis clear", true).await
    }

    async fn remove_all(&self) -> Result<()> {
        self.purge("redis remove all", false).await
    }

    fn session(&self) -> &str {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_requires_a_session() {
        let err = RedisStore::connect(&RedisConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::MissingSession { backend: "redis" }
        ));
    }
}
