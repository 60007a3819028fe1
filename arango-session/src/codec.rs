//! Authenticated, optionally encrypted cookie values.
//!
//! A [`SecureCookie`] turns any serializable value into a cookie-safe string
//! that carries a timestamp and an HMAC-SHA256 signature bound to the cookie
//! name. When a block key is configured, the serialized value is additionally
//! encrypted with AES-GCM before it is signed.
//!
//! [`Codecs`] is an ordered chain of codecs built from [`KeyPair`]s. Values are
//! encoded with the first codec that succeeds and decoded by trying every codec
//! in order, which allows keys to be rotated: put the new key pair first and
//! keep the old ones around until every cookie signed with them has expired.
//!
//! # Examples
//!
//! ```
//! use arango_session::codec::{Codecs, KeyPair};
//!
//! let codecs = Codecs::from_pairs(&[KeyPair::new(b"signing-key".to_vec())]).unwrap();
//! let encoded = codecs.encode("session", &"42").unwrap();
//! let decoded: String = codecs.decode("session", &encoded).unwrap();
//! assert_eq!(decoded, "42");
//! ```

use std::fmt;

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Default maximum age of a signed value, in seconds (30 days).
pub const DEFAULT_MAX_AGE: i64 = 86400 * 30;

/// Default maximum length of an encoded value, in bytes.
pub const DEFAULT_MAX_LENGTH: usize = 4096;

const NONCE_LENGTH: usize = 12;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur while encoding or decoding a value.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The hash key used to sign values is empty.
    #[error("hash key is not set")]
    HashKeyNotSet,
    /// The block key has a length that no supported cipher accepts.
    #[error("invalid block key length: {0} bytes (expected 16 or 32)")]
    InvalidBlockKey(usize),
    /// The codec chain is empty.
    #[error("no codecs were provided")]
    NoCodecs,
    /// The value could not be serialized to JSON.
    #[error("failed to serialize value: {0}")]
    Serialize(#[source] serde_json::Error),
    /// The decoded payload is not valid JSON for the requested type.
    #[error("failed to deserialize value: {0}")]
    Deserialize(#[source] serde_json::Error),
    /// The value could not be encrypted.
    #[error("failed to encrypt value")]
    Encrypt,
    /// The value could not be decrypted.
    #[error("failed to decrypt value")]
    Decrypt,
    /// The encoded value is longer than the configured maximum length.
    #[error("the encoded value is too long")]
    EncodedValueTooLong,
    /// The value to decode is longer than the configured maximum length.
    #[error("the value is too long")]
    ValueTooLong,
    /// The value is not valid base64.
    #[error("the value is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The value does not have the `timestamp|value|mac` shape.
    #[error("the value is not valid")]
    InvalidValue,
    /// The signature does not match the value and cookie name.
    #[error("the value could not be verified using HMAC")]
    MacInvalid,
    /// The embedded timestamp is not a number.
    #[error("invalid timestamp")]
    TimestampInvalid,
    /// The embedded timestamp is older than the configured maximum age.
    #[error("expired timestamp")]
    TimestampExpired,
    /// Every codec in a chain failed.
    #[error("{}", format_multi(.0))]
    Multi(Vec<CodecError>),
}

fn format_multi(errors: &[CodecError]) -> String {
    match errors {
        [] => "no errors".to_owned(),
        [error] => error.to_string(),
        [error, rest @ ..] => format!("{error} (and {} other errors)", rest.len()),
    }
}

/// A hash key and an optional block key.
///
/// The hash key authenticates values and may have any non-zero length; 32 or
/// 64 bytes are recommended. The block key, when present, enables encryption
/// and must be 16 bytes (AES-128) or 32 bytes (AES-256).
///
/// Key pairs can be deserialized from hex-encoded strings:
///
/// ```
/// use arango_session::codec::KeyPair;
///
/// let pair: KeyPair = toml::from_str(
///     r#"
///     hash_key = "00112233445566778899aabbccddeeff"
///     block_key = "000102030405060708090a0b0c0d0e0f"
///     "#,
/// )
/// .unwrap();
/// assert_eq!(pair.block_key.map(|key| key.len()), Some(16));
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "HexKeyPair")]
pub struct KeyPair {
    /// Key used to authenticate values.
    pub hash_key: Vec<u8>,
    /// Key used to encrypt values, if encryption is enabled.
    pub block_key: Option<Vec<u8>>,
}

impl KeyPair {
    /// Creates a key pair that only authenticates values.
    #[must_use]
    pub fn new(hash_key: impl Into<Vec<u8>>) -> Self {
        Self {
            hash_key: hash_key.into(),
            block_key: None,
        }
    }

    /// Enables encryption with the given block key.
    #[must_use]
    pub fn with_block_key(mut self, block_key: impl Into<Vec<u8>>) -> Self {
        self.block_key = Some(block_key.into());
        self
    }

    /// Creates a key pair from hex-encoded keys.
    ///
    /// # Errors
    ///
    /// Returns an error if either key is not valid hex.
    pub fn from_hex(hash_key: &str, block_key: Option<&str>) -> Result<Self, hex::FromHexError> {
        Ok(Self {
            hash_key: hex::decode(hash_key)?,
            block_key: block_key.map(hex::decode).transpose()?,
        })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("hash_key", &"..")
            .field("block_key", &self.block_key.as_ref().map(|_| ".."))
            .finish()
    }
}

#[derive(Deserialize)]
struct HexKeyPair {
    hash_key: String,
    #[serde(default)]
    block_key: Option<String>,
}

impl TryFrom<HexKeyPair> for KeyPair {
    type Error = hex::FromHexError;

    fn try_from(value: HexKeyPair) -> Result<Self, Self::Error> {
        KeyPair::from_hex(&value.hash_key, value.block_key.as_deref())
    }
}

#[derive(Clone)]
enum BlockCipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self, CodecError> {
        let invalid = |_| CodecError::InvalidBlockKey(key.len());
        match key.len() {
            16 => Ok(Self::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(invalid)?,
            ))),
            32 => Ok(Self::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(invalid)?,
            ))),
            len => Err(CodecError::InvalidBlockKey(len)),
        }
    }

    /// Encrypts `plaintext`, returning the nonce followed by the ciphertext.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = match self {
            Self::Aes128(cipher) => cipher.encrypt(&nonce, plaintext),
            Self::Aes256(cipher) => cipher.encrypt(&nonce, plaintext),
        }
        .map_err(|_| CodecError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
        if sealed.len() < NONCE_LENGTH {
            return Err(CodecError::Decrypt);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
        let nonce: &Nonce<U12> = Nonce::from_slice(nonce);
        match self {
            Self::Aes128(cipher) => cipher.decrypt(nonce, ciphertext),
            Self::Aes256(cipher) => cipher.decrypt(nonce, ciphertext),
        }
        .map_err(|_| CodecError::Decrypt)
    }
}

/// A single codec that signs and optionally encrypts values.
#[derive(Clone, derive_more::Debug)]
pub struct SecureCookie {
    #[debug(skip)]
    mac: HmacSha256,
    #[debug(skip)]
    cipher: Option<BlockCipher>,
    max_age: i64,
    max_length: usize,
}

impl SecureCookie {
    /// Creates a codec from a hash key and an optional block key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::HashKeyNotSet`] if the hash key is empty and
    /// [`CodecError::InvalidBlockKey`] if the block key is neither 16 nor 32
    /// bytes long.
    pub fn new(hash_key: &[u8], block_key: Option<&[u8]>) -> Result<Self, CodecError> {
        if hash_key.is_empty() {
            return Err(CodecError::HashKeyNotSet);
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(hash_key)
            .map_err(|_| CodecError::HashKeyNotSet)?;
        let cipher = block_key.map(BlockCipher::new).transpose()?;

        Ok(Self {
            mac,
            cipher,
            max_age: DEFAULT_MAX_AGE,
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    /// Returns the maximum age of a value accepted by [`Self::decode`], in
    /// seconds.
    #[must_use]
    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    /// Sets the maximum age of a value accepted by [`Self::decode`], in
    /// seconds. `0` disables the check.
    pub fn set_max_age(&mut self, max_age: i64) {
        self.max_age = max_age;
    }

    /// Returns the maximum length of an encoded value.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Sets the maximum length of an encoded value. `0` disables the check.
    pub fn set_max_length(&mut self, max_length: usize) {
        self.max_length = max_length;
    }

    /// Encodes `value` for a cookie called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized or encrypted, or if
    /// the result exceeds the maximum length.
    pub fn encode<T>(&self, name: &str, value: &T) -> Result<String, CodecError>
    where
        T: Serialize + ?Sized,
    {
        self.encode_at(name, value, chrono::Utc::now().timestamp())
    }

    fn encode_at<T>(&self, name: &str, value: &T, timestamp: i64) -> Result<String, CodecError>
    where
        T: Serialize + ?Sized,
    {
        let mut payload = serde_json::to_vec(value).map_err(CodecError::Serialize)?;
        if let Some(cipher) = &self.cipher {
            payload = cipher.encrypt(&payload)?;
        }
        let payload = URL_SAFE.encode(payload);

        let mut signed = format!("{name}|{timestamp}|{payload}|").into_bytes();
        let mut mac = self.mac.clone();
        mac.update(&signed[..signed.len() - 1]);
        signed.extend_from_slice(&mac.finalize().into_bytes());

        let encoded = URL_SAFE.encode(&signed[name.len() + 1..]);
        if self.max_length != 0 && encoded.len() > self.max_length {
            return Err(CodecError::EncodedValueTooLong);
        }
        Ok(encoded)
    }

    /// Decodes a value previously produced by [`Self::encode`] for a cookie
    /// called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is malformed, was signed for a different
    /// name or with a different key, has expired, or cannot be decrypted or
    /// deserialized.
    pub fn decode<T>(&self, name: &str, value: &str) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        if self.max_length != 0 && value.len() > self.max_length {
            return Err(CodecError::ValueTooLong);
        }
        let decoded = URL_SAFE.decode(value)?;

        let mut parts = decoded.splitn(3, |byte| *byte == b'|');
        let (Some(timestamp), Some(payload), Some(tag)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CodecError::InvalidValue);
        };

        let signed_length = decoded.len() - tag.len() - 1;
        let mut mac = self.mac.clone();
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(&decoded[..signed_length]);
        mac.verify_slice(tag).map_err(|_| CodecError::MacInvalid)?;

        let timestamp: i64 = std::str::from_utf8(timestamp)
            .ok()
            .and_then(|timestamp| timestamp.parse().ok())
            .ok_or(CodecError::TimestampInvalid)?;
        let now = chrono::Utc::now().timestamp();
        if self.max_age != 0 && timestamp < now - self.max_age {
            return Err(CodecError::TimestampExpired);
        }

        let mut payload = URL_SAFE.decode(payload)?;
        if let Some(cipher) = &self.cipher {
            payload = cipher.decrypt(&payload)?;
        }
        serde_json::from_slice(&payload).map_err(CodecError::Deserialize)
    }
}

/// An ordered chain of codecs supporting key rotation.
#[derive(Debug, Clone)]
pub struct Codecs(Vec<SecureCookie>);

impl Codecs {
    /// Builds one codec per key pair, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NoCodecs`] if `pairs` is empty, or the error of
    /// the first key pair that does not form a valid codec.
    pub fn from_pairs(pairs: &[KeyPair]) -> Result<Self, CodecError> {
        if pairs.is_empty() {
            return Err(CodecError::NoCodecs);
        }
        pairs
            .iter()
            .map(|pair| SecureCookie::new(&pair.hash_key, pair.block_key.as_deref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Encodes `value` with the first codec that succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error of the only codec, or [`CodecError::Multi`] with the
    /// errors of every codec if there is more than one.
    pub fn encode<T>(&self, name: &str, value: &T) -> Result<String, CodecError>
    where
        T: Serialize + ?Sized,
    {
        self.first_success(|codec| codec.encode(name, value))
    }

    /// Decodes `value` with the first codec that succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error of the only codec, or [`CodecError::Multi`] with the
    /// errors of every codec if there is more than one.
    pub fn decode<T>(&self, name: &str, value: &str) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        self.first_success(|codec| codec.decode(name, value))
    }

    fn first_success<T>(
        &self,
        mut operation: impl FnMut(&SecureCookie) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        let mut errors = Vec::new();
        for codec in &self.0 {
            match operation(codec) {
                Ok(value) => return Ok(value),
                Err(error) => errors.push(error),
            }
        }
        match errors.len() {
            0 => Err(CodecError::NoCodecs),
            1 => Err(errors.remove(0)),
            _ => Err(CodecError::Multi(errors)),
        }
    }

    /// Sets the maximum age on every codec in the chain.
    pub fn set_max_age(&mut self, max_age: i64) {
        for codec in &mut self.0 {
            codec.set_max_age(max_age);
        }
    }

    /// Sets the maximum encoded length on every codec in the chain.
    pub fn set_max_length(&mut self, max_length: usize) {
        for codec in &mut self.0 {
            codec.set_max_length(max_length);
        }
    }

    /// Returns the number of codecs in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the chain has no codecs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the codecs in the chain, in order.
    pub fn iter(&self) -> impl Iterator<Item = &SecureCookie> {
        self.0.iter()
    }
}
