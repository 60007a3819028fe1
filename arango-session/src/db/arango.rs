//! `ArangoDB` client over the HTTP API.
//!
//! Only the endpoints needed to keep one document per session are used:
//!
//! | operation                  | endpoint                                           |
//! |----------------------------|----------------------------------------------------|
//! | [`Database::connect`]      | `GET /_db/{db}/_api/database/current`              |
//! | [`Database::collection`]   | `GET /_db/{db}/_api/collection/{name}`             |
//! | [`Collection::document`]   | `GET /_db/{db}/_api/document/{name}/{key}`         |
//! | [`Collection::save`]       | `POST /_db/{db}/_api/document/{name}?overwriteMode=replace` |
//! | [`Collection::remove`]     | `DELETE /_db/{db}/_api/document/{name}/{key}`      |
//!
//! Every request is sent with HTTP basic authentication.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::db::{DatabaseError, DocumentCollection, DocumentDatabase, SessionDocument};

#[derive(derive_more::Debug)]
struct Connection {
    client: Client,
    base_url: Url,
    database: String,
    user: String,
    #[debug(skip)]
    password: String,
}

impl Connection {
    fn new(host: &str, database: &str, user: &str, password: &str) -> Result<Self, DatabaseError> {
        let base_url = Url::parse(host).map_err(|_| DatabaseError::InvalidUrl(host.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(DatabaseError::InvalidUrl(host.to_owned()));
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            database: database.to_owned(),
            user: user.to_owned(),
            password: password.to_owned(),
        })
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, DatabaseError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| DatabaseError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("_db")
            .push(&self.database)
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, DatabaseError> {
        let response = request
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;
        Ok(response)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    error_num: u32,
    #[serde(default)]
    error_message: String,
}

async fn server_error(response: Response) -> DatabaseError {
    let status = response.status();
    let body: ErrorBody = response.json().await.unwrap_or_default();
    let message = if body.error_message.is_empty() {
        status.canonical_reason().unwrap_or_default().to_owned()
    } else {
        body.error_message
    };

    DatabaseError::Server {
        status: status.as_u16(),
        code: body.error_num,
        message,
    }
}

/// A connection to one `ArangoDB` database.
///
/// Cloning is cheap; clones share the underlying HTTP client.
#[derive(Debug, Clone)]
pub struct Database {
    connection: Arc<Connection>,
}

impl Database {
    /// Connects to `database` on the server at `host` and checks that it
    /// exists and that the credentials are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidUrl`] if `host` is not an absolute URL,
    /// [`DatabaseError::Unauthorized`] if the server rejects the credentials,
    /// [`DatabaseError::DatabaseNotFound`] if the database does not exist, and
    /// [`DatabaseError::Request`] if the server cannot be reached.
    pub async fn connect(
        host: &str,
        database: &str,
        user: &str,
        password: &str,
    ) -> Result<Self, DatabaseError> {
        let connection = Connection::new(host, database, user, password)?;
        let url = connection.url(["_api", "database", "current"])?;
        let response = connection.send(connection.client.get(url)).await?;

        match response.status() {
            status if status.is_success() => {
                debug!(host, database, user, "connected to ArangoDB");
                Ok(Self {
                    connection: Arc::new(connection),
                })
            }
            StatusCode::UNAUTHORIZED => Err(DatabaseError::Unauthorized(user.to_owned())),
            StatusCode::NOT_FOUND => Err(DatabaseError::DatabaseNotFound(database.to_owned())),
            _ => Err(server_error(response).await),
        }
    }

    /// Returns the name of the database.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.connection.database
    }

    /// Looks up an existing collection.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::CollectionNotFound`] if there is no collection
    /// called `name`.
    pub async fn collection(&self, name: &str) -> Result<Collection, DatabaseError> {
        let connection = &self.connection;
        let url = connection.url(["_api", "collection", name])?;
        let response = connection.send(connection.client.get(url)).await?;

        match response.status() {
            status if status.is_success() => Ok(Collection {
                connection: Arc::clone(connection),
                name: name.to_owned(),
            }),
            StatusCode::NOT_FOUND => Err(DatabaseError::CollectionNotFound(name.to_owned())),
            StatusCode::UNAUTHORIZED => Err(DatabaseError::Unauthorized(connection.user.clone())),
            _ => Err(server_error(response).await),
        }
    }
}

#[async_trait]
impl DocumentDatabase for Database {
    async fn collection(&self, name: &str) -> Result<Arc<dyn DocumentCollection>, DatabaseError> {
        let collection = Database::collection(self, name).await?;
        Ok(Arc::new(collection))
    }
}

/// A document collection in an `ArangoDB` database.
#[derive(Debug, Clone)]
pub struct Collection {
    connection: Arc<Connection>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DocumentMeta {
    #[serde(rename = "_key")]
    key: String,
}

impl Collection {
    fn document_url(&self, key: Option<&str>) -> Result<Url, DatabaseError> {
        let segments = ["_api", "document", self.name.as_str()];
        match key {
            Some(key) => self.connection.url(segments.into_iter().chain([key])),
            None => self.connection.url(segments),
        }
    }

    fn not_found(&self, key: &str) -> DatabaseError {
        DatabaseError::DocumentNotFound {
            collection: self.name.clone(),
            key: key.to_owned(),
        }
    }
}

#[async_trait]
impl DocumentCollection for Collection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn document(&self, key: &str) -> Result<SessionDocument, DatabaseError> {
        let url = self.document_url(Some(key))?;
        let response = self.connection.send(self.connection.client.get(url)).await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(self.not_found(key)),
            _ => Err(server_error(response).await),
        }
    }

    async fn save(&self, document: &SessionDocument) -> Result<String, DatabaseError> {
        let mut url = self.document_url(None)?;
        url.query_pairs_mut().append_pair("overwriteMode", "replace");
        let response = self
            .connection
            .send(self.connection.client.post(url).json(document))
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        let meta: DocumentMeta = response.json().await?;
        debug!(collection = %self.name, key = %meta.key, "saved session document");
        Ok(meta.key)
    }

    async fn remove(&self, key: &str) -> Result<(), DatabaseError> {
        let url = self.document_url(Some(key))?;
        let response = self
            .connection
            .send(self.connection.client.delete(url))
            .await?;

        match response.status() {
            status if status.is_success() => {
                debug!(collection = %self.name, key, "removed session document");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(self.not_found(key)),
            _ => Err(server_error(response).await),
        }
    }
}
