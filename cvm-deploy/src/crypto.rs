use crate::{error::Error, types::SecretEntry};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use curve25519_dalek::montgomery::MontgomeryPoint;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use zeroize::Zeroizing;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Wire shape the VM expects after decryption: `{"env": [{"key", "value"}, ...]}`.
#[derive(Serialize)]
struct EnvPayload<'a> {
    env: &'a [SecretEntry],
}

/// Decode a hex X25519 public key, with or without a `0x` prefix.
pub fn parse_public_key(pubkey_hex: &str) -> Result<MontgomeryPoint, Error> {
    let trimmed = pubkey_hex.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|e| Error::InvalidKey(e.to_string()))?;

    let bytes: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::InvalidKey(format!(
            "expected {PUBLIC_KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;

    Ok(MontgomeryPoint(bytes))
}

/// Encrypt environment variables for a TEE holding the private half of `remote_pubkey_hex`.
///
/// A fresh X25519 key pair is generated for every call. The shared secret is used directly
/// as the AES-256-GCM key, and the result is
/// `hex(ephemeral_public || nonce || ciphertext || tag)`.
///
/// The ephemeral scalar, the shared secret and the plaintext JSON are held in
/// [`Zeroizing`] buffers and wiped when the call returns, on success or error.
pub fn encrypt_env_vars(secrets: &[SecretEntry], remote_pubkey_hex: &str) -> Result<String, Error> {
    let remote_pubkey = parse_public_key(remote_pubkey_hex)?;

    let env_data = Zeroizing::new(
        serde_json::to_vec(&EnvPayload { env: secrets })
            .map_err(|e| Error::Encryption(e.to_string()))?,
    );

    let mut ephemeral_secret = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(ephemeral_secret.as_mut());
    let ephemeral_public = MontgomeryPoint::mul_base_clamped(*ephemeral_secret);
    let shared_secret = Zeroizing::new(remote_pubkey.mul_clamped(*ephemeral_secret));

    // All-zero output means the remote key is a low-order point.
    if shared_secret.as_bytes().iter().all(|b| *b == 0) {
        return Err(Error::InvalidKey("remote public key is a low-order point".into()));
    }

    let mut iv = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(shared_secret.as_bytes())
        .map_err(|e| Error::Encryption(e.to_string()))?;
    let encrypted = cipher
        .encrypt(Nonce::from_slice(&iv), env_data.as_slice())
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(PUBLIC_KEY_LEN + NONCE_LEN + encrypted.len());
    result.extend_from_slice(ephemeral_public.as_bytes());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&encrypted);

    Ok(hex::encode(result))
}
