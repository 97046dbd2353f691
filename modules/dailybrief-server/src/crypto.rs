// Webhook signature verification and event decryption for the chat platform:
// sha256(timestamp + nonce + encrypt_key + body) as the signature, and
// AES-256-CBC (key = sha256(encrypt_key), IV = leading 16 ciphertext bytes,
// PKCS7) for encrypted event bodies.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use sha2::{Digest, Sha256};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Hex sha256 over the concatenated signature inputs.
pub fn compute_signature(timestamp: &str, nonce: &str, encrypt_key: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher.update(encrypt_key.as_bytes());
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn verify_signature(
    timestamp: &str,
    nonce: &str,
    encrypt_key: &str,
    body: &str,
    signature: &str,
) -> bool {
    compute_signature(timestamp, nonce, encrypt_key, body) == signature
}

/// Decrypt a base64 `encrypt` field into its plaintext JSON.
pub fn decrypt_event(encrypted_b64: &str, encrypt_key: &str) -> Result<serde_json::Value> {
    let data = base64::engine::general_purpose::STANDARD
        .decode(encrypted_b64.trim())
        .context("Encrypted payload is not valid base64")?;
    if data.len() <= 16 {
        bail!("Encrypted payload too short");
    }

    let key = Sha256::digest(encrypt_key.as_bytes());
    let (iv, ciphertext) = data.split_at(16);

    let mut buffer = ciphertext.to_vec();
    let plaintext = Aes256CbcDec::new_from_slices(&key, iv)
        .map_err(|e| anyhow!("Bad key/IV length: {e}"))?
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| anyhow!("Decryption failed: {e}"))?;

    serde_json::from_slice(plaintext).context("Decrypted payload is not valid JSON")
}
