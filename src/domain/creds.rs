use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::codec::{self, StoredValue};

/// Record id under which session credentials are persisted
pub const CREDS_ID: &str = "creds";

/// X25519 key pair in raw byte form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    #[serde(with = "codec::buffer")]
    pub private: Vec<u8>,
    #[serde(with = "codec::buffer")]
    pub public: Vec<u8>,
}

/// Pre-key pair whose public half is signed by the identity key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedKeyPair {
    pub key_pair: KeyPair,
    #[serde(with = "codec::buffer")]
    pub signature: Vec<u8>,
    pub key_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettings {
    #[serde(default)]
    pub unarchive_chats: bool,
}

/// Long-lived credential material for one session.
///
/// Field names follow the wire format of the protocol clients these records
/// are shared with, so documents written here stay readable by them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationCreds {
    pub noise_key: KeyPair,
    pub pairing_ephemeral_key_pair: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedKeyPair,
    pub registration_id: u32,
    pub adv_secret_key: String,
    #[serde(default)]
    pub processed_history_messages: Vec<StoredValue>,
    pub next_pre_key_id: u32,
    pub first_unuploaded_pre_key_id: u32,
    pub account_sync_counter: u32,
    pub account_settings: AccountSettings,
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prop_hash: Option<String>,
    #[serde(
        default,
        with = "codec::buffer_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub routing_info: Option<Vec<u8>>,
    // Populated after pairing; carried opaquely by this layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<StoredValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<StoredValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_identities: Option<StoredValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_app_state_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_account_sync_timestamp: Option<u64>,
}

/// Generate a fresh X25519 key pair.
pub fn generate_key_pair() -> KeyPair {
    into_key_pair(&StaticSecret::random_from_rng(OsRng))
}

fn into_key_pair(secret: &StaticSecret) -> KeyPair {
    KeyPair {
        private: secret.to_bytes().to_vec(),
        public: PublicKey::from(secret).as_bytes().to_vec(),
    }
}

fn signed_pre_key(identity: &StaticSecret, key_id: u32) -> SignedKeyPair {
    let key_pair = into_key_pair(&StaticSecret::random_from_rng(OsRng));
    let signing = SigningKey::from_bytes(&identity.to_bytes());
    let signature = signing.sign(&key_pair.public);
    SignedKeyPair {
        key_pair,
        signature: signature.to_bytes().to_vec(),
        key_id,
    }
}

/// Registration ids live in a 14-bit space.
pub fn generate_registration_id() -> u32 {
    OsRng.next_u32() & 0x3fff
}

/// Build the credential set for a brand-new, unregistered session.
pub fn init_auth_creds() -> AuthenticationCreds {
    let identity_secret = StaticSecret::random_from_rng(OsRng);
    let mut adv_secret = [0u8; 32];
    OsRng.fill_bytes(&mut adv_secret);

    AuthenticationCreds {
        noise_key: generate_key_pair(),
        pairing_ephemeral_key_pair: generate_key_pair(),
        signed_pre_key: signed_pre_key(&identity_secret, 1),
        signed_identity_key: into_key_pair(&identity_secret),
        registration_id: generate_registration_id(),
        adv_secret_key: STANDARD.encode(adv_secret),
        processed_history_messages: Vec::new(),
        next_pre_key_id: 1,
        first_unuploaded_pre_key_id: 1,
        account_sync_counter: 0,
        account_settings: AccountSettings {
            unarchive_chats: false,
        },
        registered: false,
        pairing_code: None,
        last_prop_hash: None,
        routing_info: None,
        me: None,
        account: None,
        signal_identities: None,
        platform: None,
        my_app_state_key_id: None,
        last_account_sync_timestamp: None,
    }
}
