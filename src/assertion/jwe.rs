//! Compact JWE with direct key agreement and AES-256-GCM content encryption.
//!
//! Only the `alg=dir`, `enc=A256GCM` combination used by the identity broker
//! is supported. The base64url protected header segment is the AAD.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

/// Content encryption key size in bytes.
pub const KEY_SIZE: usize = 32;

/// AES-GCM IV size in bytes.
const IV_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
const TAG_SIZE: usize = 16;

/// JWE protected header.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
}

/// Encrypt `plaintext` into a compact JWE string.
pub fn encrypt_compact(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> Result<String> {
    let header = JweHeader {
        alg: "dir".to_string(),
        enc: "A256GCM".to_string(),
    };
    let header_json = serde_json::to_vec(&header).context("Failed to serialize JWE header")?;
    let header_b64 = URL_SAFE_NO_PAD.encode(header_json);

    let iv: [u8; IV_SIZE] = rand::random();
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid JWE key: {}", e))?;
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: header_b64.as_bytes(),
            },
        )
        .map_err(|_| anyhow!("JWE encryption failed"))?;

    // aes-gcm appends the tag to the ciphertext
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

    Ok(format!(
        "{}..{}.{}.{}",
        header_b64,
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag),
    ))
}

/// Decrypt a compact JWE string.
pub fn decrypt_compact(token: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>> {
    let token = std::str::from_utf8(token).context("JWE is not valid UTF-8")?.trim();

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 5 {
        return Err(anyhow!("JWE must have 5 segments, got {}", parts.len()));
    }
    let (header_b64, encrypted_key, iv_b64, ciphertext_b64, tag_b64) =
        (parts[0], parts[1], parts[2], parts[3], parts[4]);

    let header_json = decode_segment(header_b64).context("Invalid JWE header encoding")?;
    let header: JweHeader =
        serde_json::from_slice(&header_json).context("Invalid JWE header")?;
    if header.alg != "dir" || header.enc != "A256GCM" {
        return Err(anyhow!(
            "Unsupported JWE algorithm: alg={} enc={}",
            header.alg,
            header.enc
        ));
    }
    if !encrypted_key.is_empty() {
        return Err(anyhow!("Direct key agreement must not carry an encrypted key"));
    }

    let iv = decode_segment(iv_b64).context("Invalid JWE IV encoding")?;
    if iv.len() != IV_SIZE {
        return Err(anyhow!("JWE IV must be {} bytes, got {}", IV_SIZE, iv.len()));
    }
    let mut sealed = decode_segment(ciphertext_b64).context("Invalid JWE ciphertext encoding")?;
    let tag = decode_segment(tag_b64).context("Invalid JWE tag encoding")?;
    if tag.len() != TAG_SIZE {
        return Err(anyhow!("JWE tag must be {} bytes, got {}", TAG_SIZE, tag.len()));
    }
    sealed.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid JWE key: {}", e))?;
    cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: header_b64.as_bytes(),
            },
        )
        .map_err(|_| anyhow!("JWE decryption failed"))
}

/// Decode a base64url segment, tolerating padding.
fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    Ok(URL_SAFE_NO_PAD.decode(segment.trim_end_matches('='))?)
}
