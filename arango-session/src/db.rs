//! Document database collaborators.
//!
//! The session store only needs a handful of document operations, described
//! by the [`DocumentDatabase`] and [`DocumentCollection`] traits. Two
//! implementations are provided: [`arango`], which talks to an `ArangoDB` server
//! over its HTTP API, and [`memory`], which keeps documents in process memory
//! and is mostly useful for tests and local development.

#[cfg(feature = "arangodb")]
pub mod arango;
pub mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the document field that holds the encoded session values.
pub const SESSION_DATA_FIELD: &str = "session-data";

/// A session as it is stored in a collection: one document per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDocument {
    /// The document key. `None` lets the database assign one on save.
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// The codec-encoded session values.
    #[serde(rename = "session-data")]
    pub session_data: String,
}

impl SessionDocument {
    /// Creates a document. A `None` key lets the database assign one on
    /// save.
    #[must_use]
    pub fn new(key: Option<String>, session_data: impl Into<String>) -> Self {
        Self {
            key,
            session_data: session_data.into(),
        }
    }
}

/// Errors returned by the database collaborators.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DatabaseError {
    /// No document with the given key exists in the collection.
    #[error("document `{key}` not found in collection `{collection}`")]
    DocumentNotFound {
        /// The collection that was searched.
        collection: String,
        /// The key that was not found.
        key: String,
    },
    /// The collection does not exist.
    #[error("collection `{0}` not found")]
    CollectionNotFound(String),
    /// The database does not exist.
    #[error("database `{0}` not found")]
    DatabaseNotFound(String),
    /// The server rejected the credentials.
    #[error("authentication failed for user `{0}`")]
    Unauthorized(String),
    /// The configured host is not a usable base URL.
    #[error("invalid database URL `{0}`")]
    InvalidUrl(String),
    /// The HTTP request could not be performed or its body could not be read.
    #[cfg(feature = "arangodb")]
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    /// Connecting to a server needs the `arangodb` feature.
    #[error("cannot connect to `{0}`: the `arangodb` feature is disabled")]
    ClientDisabled(String),
    /// The server answered with an error.
    #[error("database error {code} (HTTP {status}): {message}")]
    Server {
        /// The HTTP status code.
        status: u16,
        /// The `ArangoDB` error number, or `0` if the body did not contain one.
        code: u32,
        /// The error message reported by the server.
        message: String,
    },
}

impl DatabaseError {
    /// Returns `true` if the error means the requested document does not
    /// exist.
    #[must_use]
    pub fn is_document_not_found(&self) -> bool {
        matches!(self, Self::DocumentNotFound { .. })
    }
}

/// A collection of session documents.
#[async_trait]
pub trait DocumentCollection: Send + Sync + Debug {
    /// The name of the collection.
    fn name(&self) -> &str;

    /// Fetches the document with the given key.
    ///
    /// Returns [`DatabaseError::DocumentNotFound`] if there is none.
    async fn document(&self, key: &str) -> Result<SessionDocument, DatabaseError>;

    /// Writes a document and returns its key.
    ///
    /// A document without a key is created under a key chosen by the
    /// database. A document with a key replaces any existing document with
    /// that key, or is created under it.
    async fn save(&self, document: &SessionDocument) -> Result<String, DatabaseError>;

    /// Removes the document with the given key.
    ///
    /// Returns [`DatabaseError::DocumentNotFound`] if there is none.
    async fn remove(&self, key: &str) -> Result<(), DatabaseError>;
}

/// A database that contains collections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentDatabase: Send + Sync + Debug {
    /// Looks up an existing collection by name.
    async fn collection(&self, name: &str) -> Result<Arc<dyn DocumentCollection>, DatabaseError>;
}
