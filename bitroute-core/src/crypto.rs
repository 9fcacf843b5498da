//! Key pairs and per-chunk hybrid encryption.
//!
//! Every chunk gets a fresh AES-256-GCM key and IV. The AES key is wrapped for the
//! recipient with an ephemeral X25519 exchange: HKDF-SHA256 over the shared secret
//! yields a single-use key that seals the AES key with ChaCha20-Poly1305.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};

/// AES-GCM initialization vector length.
pub const IV_LEN: usize = 12;

const SYMMETRIC_KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;
const HKDF_INFO: &[u8] = b"bitroute-key-wrap-v1";

/// Length of the wrapped-key prefix: ephemeral public key + sealed AES key + tag.
pub const WRAPPED_KEY_LEN: usize = 32 + SYMMETRIC_KEY_LEN + TAG_LEN;

/// X25519 public key. Travels over signaling as a JWK-style JSON object.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PublicKeyJwk", into = "PublicKeyJwk")]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// JSON form of a [`PublicKey`]: `{"kty":"OKP","crv":"X25519","x":"<base64url>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
}

impl From<PublicKey> for PublicKeyJwk {
    fn from(key: PublicKey) -> Self {
        Self {
            kty: "OKP".into(),
            crv: "X25519".into(),
            x: URL_SAFE_NO_PAD.encode(key.0),
        }
    }
}

impl TryFrom<PublicKeyJwk> for PublicKey {
    type Error = CryptoError;

    fn try_from(jwk: PublicKeyJwk) -> Result<Self, Self::Error> {
        if jwk.kty != "OKP" || jwk.crv != "X25519" {
            return Err(CryptoError::InvalidPublicKey);
        }
        let raw = URL_SAFE_NO_PAD
            .decode(jwk.x.as_bytes())
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let bytes: [u8; 32] = raw.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(PublicKey(bytes))
    }
}

/// Session key pair. The secret half never leaves this struct.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

/// Output of [`encrypt`]: the IV for the header and `wrapped_key ‖ ciphertext` for the binary frame.
#[derive(Debug, Clone)]
pub struct EncryptedChunk {
    pub iv: [u8; IV_LEN],
    pub payload: Vec<u8>,
}

/// Encrypt `plaintext` for the holder of `peer`'s secret key under a fresh symmetric key.
pub fn encrypt(plaintext: &[u8], peer: &PublicKey) -> Result<EncryptedChunk, CryptoError> {
    let mut key = [0u8; SYMMETRIC_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::EncryptionFailed)?;
    let ciphertext = cipher
        .encrypt(aes_gcm::Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let wrapped = wrap_key(&key, peer)?;
    let mut payload = Vec::with_capacity(WRAPPED_KEY_LEN + ciphertext.len());
    payload.extend_from_slice(&wrapped);
    payload.extend_from_slice(&ciphertext);
    Ok(EncryptedChunk { iv, payload })
}

/// Split the wrapped-key prefix from `payload`, unwrap it with `keypair`, and decrypt.
pub fn decrypt(iv: &[u8], payload: &[u8], keypair: &KeyPair) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_LEN || payload.len() < WRAPPED_KEY_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let (wrapped, ciphertext) = payload.split_at(WRAPPED_KEY_LEN);
    let key = unwrap_key(wrapped, keypair)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::DecryptionFailed)?;
    cipher
        .decrypt(aes_gcm::Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

fn key_encryption_key(
    shared: &[u8; 32],
    ephemeral: &[u8; 32],
    recipient: &[u8; 32],
) -> Result<[u8; 32], CryptoError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral);
    salt[32..].copy_from_slice(recipient);
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut kek = [0u8; 32];
    hk.expand(HKDF_INFO, &mut kek)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(kek)
}

fn wrap_key(key: &[u8; SYMMETRIC_KEY_LEN], peer: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral).to_bytes();
    let shared = ephemeral.diffie_hellman(&X25519PublicKey::from(peer.0));
    let kek = key_encryption_key(shared.as_bytes(), &ephemeral_public, &peer.0)?;

    // The KEK is derived from a one-time ephemeral secret, so a fixed nonce is never reused.
    let sealer =
        ChaCha20Poly1305::new_from_slice(&kek).map_err(|_| CryptoError::EncryptionFailed)?;
    let sealed = sealer
        .encrypt(chacha20poly1305::Nonce::from_slice(&[0u8; 12]), key.as_slice())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(WRAPPED_KEY_LEN);
    out.extend_from_slice(&ephemeral_public);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn unwrap_key(wrapped: &[u8], keypair: &KeyPair) -> Result<[u8; SYMMETRIC_KEY_LEN], CryptoError> {
    let (ephemeral, sealed) = wrapped.split_at(32);
    let ephemeral: [u8; 32] = ephemeral
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let shared = keypair
        .secret
        .diffie_hellman(&X25519PublicKey::from(ephemeral));
    let kek = key_encryption_key(shared.as_bytes(), &ephemeral, keypair.public.as_bytes())
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let opener =
        ChaCha20Poly1305::new_from_slice(&kek).map_err(|_| CryptoError::DecryptionFailed)?;
    let key = opener
        .decrypt(chacha20poly1305::Nonce::from_slice(&[0u8; 12]), sealed)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    key.try_into().map_err(|_| CryptoError::DecryptionFailed)
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid public key")]
    InvalidPublicKey,
}
