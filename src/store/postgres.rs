use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::Row;
use tracing::{info, instrument};

use crate::codec::StoredValue;
use crate::config::PostgresConfig;
use crate::domain::CREDS_ID;
use crate::error::{Result, StoreError};
use crate::retry::RetryPolicy;

use super::KeyRecordStore;

/// PostgreSQL storage adapter
///
/// Records live in a single table keyed by `(session, id)` with the value
/// held as JSONB. The table name comes from configuration and is validated
/// as a bare identifier before it is ever interpolated into SQL.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    table: String,
    session: String,
    retry: RetryPolicy,
}

impl PostgresStore {
    /// Connect with caller-supplied settings and ensure the schema exists
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(Self::connect_options(config))
            .await?;

        info!(database = %config.database, "Connected to PostgreSQL");
        let store = Self::from_pool(pool, config)?;
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create a store from an existing connection pool (zero-cost reuse).
    /// The schema is not touched; call [`ensure_schema`](Self::ensure_schema)
    /// if the table may be missing.
    pub fn from_pool(pool: PgPool, config: &PostgresConfig) -> Result<Self> {
        if !config.table_name_valid() {
            return Err(StoreError::InvalidTable(config.table_name.clone()));
        }
        if config.session.is_empty() {
            return Err(StoreError::MissingSession {
                backend: "postgres",
            });
        }

        Ok(Self {
            pool,
            table: config.table_name.clone(),
            session: config.session.clone(),
            retry: config.retry_policy(),
        })
    }

    fn connect_options(config: &PostgresConfig) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .database(&config.database)
            .ssl_mode(if config.ssl {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
            });
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        options
    }

    /// Create the auth table when it does not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                "session" VARCHAR(50) NOT NULL,
                "id" VARCHAR(80) NOT NULL,
                "value" JSONB DEFAULT NULL,
                CONSTRAINT "{table}_session_id_key" UNIQUE ("session", "id")
            )
            "#,
            table = self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl KeyRecordStore for PostgresStore {
    #[instrument(skip(self))]
    async fn read(&self, id: &str) -> Result<Option<StoredValue>> {
        let sql = format!(
            r#"SELECT "value" FROM "{}" WHERE "id" = $1 AND "session" = $2"#,
            self.table
        );
        let row = self
            .retry
            .run("postgres read", || async {
                sqlx::query(&sql)
                    .bind(id)
                    .bind(&self.session)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(StoreError::from)
            })
            .await?;

        let value: Option<serde_json::Value> = match row {
            Some(row) => row.try_get("value")?,
            None => return Ok(None),
        };
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(raw) => StoredValue::from_json(raw)
                .map(Some)
                .map_err(|e| StoreError::corrupt(id, e)),
        }
    }

    #[instrument(skip(self, value))]
    async fn write(&self, id: &str, value: &StoredValue) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO "{}" ("session", "id", "value")
            VALUES ($1, $2, $3)
            ON CONFLICT ("session", "id") DO UPDATE SET "value" = EXCLUDED."value"
            "#,
            self.table
        );
        let payload = value.to_json();
        self.retry
            .run("postgres write", || async {
                sqlx::query(&sql)
                    .bind(&self.session)
                    .bind(id)
                    .bind(&payload)
                    .execute(&self.pool)
                    .await
                    .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let sql = format!(
            r#"DELETE FROM "{}" WHERE "id" = $1 AND "session" = $2"#,
            self.table
        );
        self.retry
            .run("postgres remove", || async {
                sqlx::query(&sql)
                    .bind(id)
                    .bind(&self.session)
                    .execute(&self.pool)
                    .await
                    .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    async fn clear_all(&self) -> Result<()> {
        let sql = format!(
            r#"DELETE FROM "{}" WHERE "id" <> $1 AND "session" = $2"#,
            self.table
        );
        self.retry
            .run("postgres clear", || async {
                sqlx::query(&sql)
                    .bind(CREDS_ID)
                    .bind(&self.session)
                    .execute(&self.pool)
                    .await
                    .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    async fn remove_all(&self) -> Result<()> {
        let sql = format!(r#"DELETE FROM "{}" WHERE "session" = $1"#, self.table);
        self.retry
            .run("postgres remove all", || async {
                sqlx::query(&sql)
                    .bind(&self.session)
                    .execute(&self.pool)
                    .await
                    .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    fn session(&self) -> &str {
        &self.session
    }
}
