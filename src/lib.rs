pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod retry;
pub mod state;
pub mod store;

pub use codec::StoredValue;
pub use config::{AuthConfig, BackendKind, PostgresConfig, RedisConfig, WorkerConfig};
pub use domain::{
    generate_key_pair, generate_registration_id, init_auth_creds, AccountSettings,
    AppStateSyncKeyData, AppStateSyncKeyFingerprint, AuthenticationCreds, KeyPair,
    SignalDataCategory, SignalDataPatch, SignalKey, SignedKeyPair, CREDS_ID,
};
pub use error::{Result, StoreError};
pub use retry::RetryPolicy;
pub use state::{
    use_postgres_auth_state, use_redis_auth_state, use_worker_auth_state, AuthState, SignalKeys,
};
pub use store::{qualified_key, KeyRecordStore, PostgresStore, RedisStore, WorkerStore};
