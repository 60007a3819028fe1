//! Errors returned by the session store.

use http::header::InvalidHeaderValue;
use thiserror::Error;

use crate::codec::CodecError;
use crate::db::DatabaseError;

/// A type alias for a result that can return an [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that can occur while creating the store or while loading or
/// saving a session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The store was constructed without a configuration.
    #[error("no store configuration was provided")]
    MissingConfiguration,
    /// The key pairs do not form a valid codec chain.
    #[error("invalid codec keys: {0}")]
    InvalidKeys(#[source] CodecError),
    /// Connecting to the database failed.
    #[error("failed to connect to the database: {0}")]
    Connection(#[source] DatabaseError),
    /// The session collection could not be looked up.
    #[error("failed to look up collection `{collection}`: {source}")]
    CollectionLookup {
        /// The name of the collection.
        collection: String,
        /// The underlying database error.
        source: DatabaseError,
    },
    /// The session cookie could not be decoded into a session ID.
    #[error("failed to decode session cookie: {0}")]
    CookieDecode(#[source] CodecError),
    /// The cookie referred to a session document that does not exist.
    #[error("session `{key}` not found in collection `{collection}`")]
    DocumentNotFound {
        /// The name of the collection.
        collection: String,
        /// The session ID taken from the cookie.
        key: String,
    },
    /// The stored session data could not be decoded.
    #[error("failed to decode session data: {0}")]
    PayloadDecode(#[source] CodecError),
    /// The session values or the session ID could not be encoded.
    #[error("failed to encode session: {0}")]
    Encode(#[source] CodecError),
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    /// The encoded cookie is not a valid `Set-Cookie` header value.
    #[error("invalid Set-Cookie header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

impl Error {
    /// Returns `true` if the error means the session referred to by the
    /// cookie no longer exists.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DocumentNotFound { .. })
    }

    pub(crate) fn from_load(error: DatabaseError) -> Self {
        match error {
            DatabaseError::DocumentNotFound { collection, key } => {
                Self::DocumentNotFound { collection, key }
            }
            error => Self::Database(error),
        }
    }
}
