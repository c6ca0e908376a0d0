//! API key generation and verification.
//!
//! A generated key has the form `sk_<32 random bytes, base64url>`. Only its
//! SHA-256 hash is ever persisted, alongside an 8-character display prefix
//! (e.g. `sk_3f9a2b`) so a tenant can recognize a key in a list without the
//! full secret ever round-tripping back from storage. Verification hashes
//! the presented bearer token and looks it up by hash — the same
//! digest-before-lookup shape the provider-credential codec in [`crate::crypto`]
//! uses for ciphertext, but here there is no decrypt path at all, since the
//! plaintext is never stored.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

const KEY_PREFIX: &str = "sk_";
const RANDOM_BYTES: usize = 32;
const DISPLAY_PREFIX_LEN: usize = 8;

/// A freshly generated API key: the plaintext (shown to the caller exactly
/// once), its hash (what gets persisted), and the display prefix (what
/// shows up in a key-management UI afterward).
#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    pub plaintext: String,
    pub hash: String,
    pub display_prefix: String,
}

pub fn generate() -> GeneratedApiKey {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext = format!("{KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes));
    let hash = hash(&plaintext);
    let display_prefix = plaintext.chars().take(DISPLAY_PREFIX_LEN).collect();
    GeneratedApiKey {
        plaintext,
        hash,
        display_prefix,
    }
}

/// SHA-256 hash of a presented bearer token, hex-encoded. Used both to
/// persist a newly generated key and to look one up at auth time.
pub fn hash(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}
