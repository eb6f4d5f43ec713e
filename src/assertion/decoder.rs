//! Broker assertion decryption, signature verification and payload extraction.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

use super::jwe::{self, KEY_SIZE};
use super::types::{non_empty, BrokerClaims, BrokerPayload, InboundAssertion};

/// Shared secrets agreed with the identity broker.
#[derive(Clone)]
pub struct AssertionKeys {
    /// AES-256-GCM content encryption key.
    encryption_key: [u8; KEY_SIZE],
    /// HS256 signing secret.
    signing_secret: Vec<u8>,
}

impl std::fmt::Debug for AssertionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionKeys").finish_non_exhaustive()
    }
}

impl AssertionKeys {
    pub fn new(encryption_key: [u8; KEY_SIZE], signing_secret: Vec<u8>) -> Self {
        Self {
            encryption_key,
            signing_secret,
        }
    }

    /// Build keys from configured secret strings.
    ///
    /// The encryption secret is used verbatim when it is exactly 32 bytes,
    /// otherwise it must be base64 for 32 bytes.
    pub fn from_secrets(encryption_secret: &str, signing_secret: &str) -> Result<Self> {
        let encryption_key = parse_encryption_key(encryption_secret)?;
        if signing_secret.is_empty() {
            return Err(anyhow!("Signing secret must not be empty"));
        }
        Ok(Self::new(encryption_key, signing_secret.as_bytes().to_vec()))
    }
}

/// Parse a 32-byte encryption key from raw or base64 text.
pub fn parse_encryption_key(secret: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = if secret.len() == KEY_SIZE {
        secret.as_bytes().to_vec()
    } else {
        BASE64
            .decode(secret.trim())
            .context("Encryption secret must be 32 raw bytes or base64")?
    };

    if bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes, got {}",
            KEY_SIZE,
            bytes.len()
        ));
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Turns raw request bodies into [`InboundAssertion`]s.
#[derive(Debug, Clone)]
pub struct AssertionDecoder {
    keys: AssertionKeys,
}

impl AssertionDecoder {
    pub fn new(keys: AssertionKeys) -> Self {
        Self { keys }
    }

    /// Decrypt, verify and parse a request body.
    ///
    /// Expiry is not checked: the broker controls assertion freshness.
    pub fn decode(&self, raw_body: &[u8]) -> Result<InboundAssertion> {
        let signed = jwe::decrypt_compact(raw_body, &self.keys.encryption_key)?;
        let signed = String::from_utf8(signed).context("Signed token is not valid UTF-8")?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token = decode::<BrokerClaims>(
            signed.trim(),
            &DecodingKey::from_secret(&self.keys.signing_secret),
            &validation,
        )
        .context("Signed token verification failed")?;

        let payload: BrokerPayload =
            serde_json::from_str(&token.claims.data).context("Invalid assertion payload")?;

        let provider = payload.provider;
        if provider.id.trim().is_empty() {
            return Err(anyhow!("Assertion payload has an empty provider id"));
        }
        let user = provider.user;
        let username = non_empty(user.username)
            .ok_or_else(|| anyhow!("Assertion payload has no username"))?;

        debug!(
            institution = %provider.id,
            idp = ?provider.idp,
            username = %username,
            "Decoded institution assertion"
        );

        Ok(InboundAssertion {
            institution_id: provider.id,
            username: username.trim().to_string(),
            fullname: non_empty(user.fullname),
            given_name: non_empty(user.given_name),
            family_name: non_empty(user.family_name),
            middle_names: non_empty(user.middle_names),
            suffix: non_empty(user.suffix),
        })
    }

    /// Sign and encrypt a payload the way the broker does.
    pub fn seal(&self, payload: &BrokerPayload) -> Result<String> {
        let claims = BrokerClaims {
            data: serde_json::to_string(payload).context("Failed to serialize payload")?,
        };
        let signed = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.keys.signing_secret),
        )
        .context("Failed to sign assertion")?;

        jwe::encrypt_compact(signed.as_bytes(), &self.keys.encryption_key)
    }
}
