//! `ArangoDB`-backed session store.
//!
//! Session values are encoded with the store's codec chain and kept in a
//! collection, one document per session. The cookie only carries the
//! document key, also encoded with the codec chain.
//!
//! # Examples
//!
//! ```
//! use arango_session::codec::KeyPair;
//! use arango_session::config::StoreConfig;
//! use arango_session::db::memory::MemoryCollection;
//! use arango_session::store::{ArangoStore, Store};
//! use http::{Request, Response};
//!
//! #[tokio::main]
//! async fn main() -> arango_session::Result<()> {
//!     let config = StoreConfig::builder()
//!         .collection(MemoryCollection::new("sessions"))
//!         .build();
//!     let store = ArangoStore::new(config, &[KeyPair::new(b"secret-hash-key".to_vec())]).await?;
//!
//!     let mut request = Request::new(());
//!     let session = store.get(&mut request, "app").await.into_session();
//!     session.insert("user_id", 42).unwrap();
//!
//!     let mut response = Response::new(());
//!     store.save(&request, &mut response, &session).await?;
//!     assert!(response.headers().contains_key(http::header::SET_COOKIE));
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::SET_COOKIE;
use http::{HeaderValue, Request, Response};
use serde_json::Value;
use tracing::debug;

use crate::codec::{Codecs, KeyPair};
use crate::config::StoreConfig;
use crate::db::{DocumentCollection, DocumentDatabase, SessionDocument};
use crate::error::{Error, Result};
use crate::session::{Session, SessionOptions, request_cookie};
use crate::store::{SessionLookup, Store};

/// A [`Store`] that persists sessions in an `ArangoDB` collection.
#[derive(Debug, Clone)]
pub struct ArangoStore {
    codecs: Codecs,
    collection: Arc<dyn DocumentCollection>,
    session_options: SessionOptions,
}

impl ArangoStore {
    /// Creates a store from a configuration and a list of key pairs.
    ///
    /// The first key pair is used to encode values; all of them are tried
    /// when decoding, so keys can be rotated by putting a new pair first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingConfiguration`] if `config` is `None`,
    /// [`Error::InvalidKeys`] if the key pairs do not form a codec chain,
    /// [`Error::Connection`] if connecting to the database fails and
    /// [`Error::CollectionLookup`] if the collection does not exist.
    pub async fn new(
        config: impl Into<Option<StoreConfig>> + Send,
        key_pairs: &[KeyPair],
    ) -> Result<Self> {
        let config = config.into().ok_or(Error::MissingConfiguration)?;
        let codecs = Codecs::from_pairs(key_pairs).map_err(Error::InvalidKeys)?;
        let collection = resolve_collection(&config).await?;
        debug!(collection = collection.name(), "created session store");

        Ok(Self {
            codecs,
            collection,
            session_options: config.session_options.unwrap_or_default(),
        })
    }

    /// The options given to sessions created from now on.
    #[must_use]
    pub fn session_options(&self) -> &SessionOptions {
        &self.session_options
    }

    /// Mutable access to the options given to sessions created from now on.
    ///
    /// Sessions that already exist keep their own copy.
    pub fn session_options_mut(&mut self) -> &mut SessionOptions {
        &mut self.session_options
    }

    /// Sets the lifetime of new session cookies and the maximum age of
    /// values accepted by the codecs, in seconds.
    pub fn set_max_age(&mut self, max_age: i64) {
        self.session_options.max_age = max_age;
        self.codecs.set_max_age(max_age);
    }

    /// Sets the maximum length of encoded values. `0` disables the check.
    pub fn set_max_length(&mut self, max_length: usize) {
        self.codecs.set_max_length(max_length);
    }

    /// The collection sessions are stored in.
    #[must_use]
    pub fn collection(&self) -> &Arc<dyn DocumentCollection> {
        &self.collection
    }

    async fn load(&self, session: &Session) -> Result<()> {
        let document = self
            .collection
            .document(&session.id())
            .await
            .map_err(Error::from_load)?;
        let values: HashMap<String, Value> = self
            .codecs
            .decode(session.name(), &document.session_data)
            .map_err(Error::PayloadDecode)?;
        session.replace_values(values);
        Ok(())
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        let session_data = self
            .codecs
            .encode(session.name(), &session.values())
            .map_err(Error::Encode)?;

        let id = session.id();
        let key = (!id.is_empty()).then_some(id);
        let is_insert = key.is_none();
        let saved_key = self
            .collection
            .save(&SessionDocument::new(key, session_data))
            .await?;

        if is_insert {
            session.set_id(saved_key);
        }
        Ok(())
    }

    async fn delete(&self, session: &Session) -> Result<()> {
        let id = session.id();
        if !id.is_empty() {
            match self.collection.remove(&id).await {
                Ok(()) => debug!(session = session.name(), id = %id, "deleted session"),
                Err(error) if error.is_document_not_found() => {}
                Err(error) => return Err(error.into()),
            }
        }
        session.clear();
        Ok(())
    }
}

async fn resolve_collection(config: &StoreConfig) -> Result<Arc<dyn DocumentCollection>> {
    if let Some(collection) = &config.collection {
        return Ok(Arc::clone(collection));
    }

    let database = match &config.database {
        Some(database) => Arc::clone(database),
        None => connect(config).await?,
    };

    let name = config.resolved_collection_name();
    database
        .collection(name)
        .await
        .map_err(|source| Error::CollectionLookup {
            collection: name.to_owned(),
            source,
        })
}

#[cfg(feature = "arangodb")]
async fn connect(config: &StoreConfig) -> Result<Arc<dyn DocumentDatabase>> {
    let params = config.connection_params();
    let database = crate::db::arango::Database::connect(
        &params.host,
        &params.database_name,
        &params.user,
        &params.password,
    )
    .await
    .map_err(Error::Connection)?;
    Ok(Arc::new(database))
}

#[cfg(not(feature = "arangodb"))]
#[expect(clippy::unused_async, reason = "mirrors the signature with the client enabled")]
async fn connect(config: &StoreConfig) -> Result<Arc<dyn DocumentDatabase>> {
    Err(Error::Connection(
        crate::db::DatabaseError::ClientDisabled(config.resolved_host().to_owned()),
    ))
}

fn append_cookie<B>(response: &mut Response<B>, session: &Session, value: &str) -> Result<()> {
    let cookie = session.options().to_cookie(session.name(), value);
    let header = HeaderValue::from_str(&cookie.to_string())?;
    response.headers_mut().append(SET_COOKIE, header);
    Ok(())
}

#[async_trait]
impl Store for ArangoStore {
    async fn new_session<B>(&self, request: &Request<B>, name: &str) -> SessionLookup
    where
        B: Sync,
    {
        let session = Session::new(name, self.session_options.clone());
        let Some(cookie) = request_cookie(request, name) else {
            return SessionLookup::new(session, None);
        };

        let id: String = match self.codecs.decode(name, &cookie) {
            Ok(id) => id,
            Err(error) => {
                debug!(session = name, %error, "failed to decode session cookie");
                return SessionLookup::new(session, Some(Error::CookieDecode(error)));
            }
        };
        session.set_id(id);

        match self.load(&session).await {
            Ok(()) => {
                session.set_is_new(false);
                debug!(session = name, id = %session.id(), "loaded session");
                SessionLookup::new(session, None)
            }
            Err(error) => {
                debug!(session = name, %error, "failed to load session");
                SessionLookup::new(session, Some(error))
            }
        }
    }

    async fn save<ReqB, ResB>(
        &self,
        _request: &Request<ReqB>,
        response: &mut Response<ResB>,
        session: &Session,
    ) -> Result<()>
    where
        ReqB: Sync,
        ResB: Send,
    {
        if session.options().max_age < 0 {
            self.delete(session).await?;
            return append_cookie(response, session, "");
        }

        self.persist(session).await?;
        let encoded = self
            .codecs
            .encode(session.name(), &session.id())
            .map_err(Error::Encode)?;
        append_cookie(response, session, &encoded)?;
        debug!(session = session.name(), id = %session.id(), "saved session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::header::COOKIE;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::codec::CodecError;
    use crate::config::DEFAULT_COLLECTION_NAME;
    use crate::db::{DatabaseError, MockDocumentDatabase};
    use crate::db::memory::{MemoryCollection, MemoryDatabase};

    const NAME: &str = "test";

    fn keys() -> Vec<KeyPair> {
        vec![KeyPair::new(b"secret-hash-key".to_vec())]
    }

    fn encrypted_keys() -> Vec<KeyPair> {
        vec![KeyPair::new(b"another-hash-key".to_vec()).with_block_key([7_u8; 32].to_vec())]
    }

    async fn store_with(collection: &MemoryCollection, key_pairs: &[KeyPair]) -> ArangoStore {
        let config = StoreConfig::builder()
            .collection(collection.clone())
            .build();
        ArangoStore::new(config, key_pairs).await.unwrap()
    }

    fn set_cookie<B>(response: &Response<B>) -> Option<String> {
        response
            .headers()
            .get(SET_COOKIE)
            .map(|value| value.to_str().unwrap().to_owned())
    }

    /// Turns the `Set-Cookie` header of `response` into a request carrying
    /// that cookie.
    fn follow_up<B>(response: &Response<B>) -> Request<()> {
        let set_cookie = set_cookie(response).unwrap();
        let pair = set_cookie.split(';').next().unwrap();
        Request::builder().header(COOKIE, pair).body(()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_configuration() {
        let error = ArangoStore::new(None, &keys()).await.unwrap_err();

        assert!(matches!(error, Error::MissingConfiguration));
    }

    #[tokio::test]
    async fn test_invalid_keys() {
        let config = StoreConfig::builder()
            .collection(MemoryCollection::new("sessions"))
            .build();
        let error = ArangoStore::new(config.clone(), &[]).await.unwrap_err();
        assert!(matches!(error, Error::InvalidKeys(CodecError::NoCodecs)));

        let error = ArangoStore::new(config, &[KeyPair::new(Vec::new())])
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidKeys(CodecError::HashKeyNotSet)));
    }

    #[tokio::test]
    async fn test_collection_takes_precedence() {
        let mut database = MockDocumentDatabase::new();
        database.expect_collection().never();
        let config = StoreConfig::builder()
            .collection(MemoryCollection::new("explicit"))
            .database(database)
            .collection_name("ignored")
            .build();

        let store = ArangoStore::new(config, &keys()).await.unwrap();

        assert_eq!(store.collection().name(), "explicit");
    }

    #[tokio::test]
    async fn test_database_lookup_uses_default_name() {
        let mut database = MockDocumentDatabase::new();
        database
            .expect_collection()
            .withf(|name: &str| name == DEFAULT_COLLECTION_NAME)
            .times(1)
            .returning(|name| Ok(Arc::new(MemoryCollection::new(name))));
        let config = StoreConfig::builder().database(database).build();

        let store = ArangoStore::new(config, &keys()).await.unwrap();

        assert_eq!(store.collection().name(), "sessions");
    }

    #[tokio::test]
    async fn test_database_lookup_failure() {
        let database = MemoryDatabase::new();
        let config = StoreConfig::builder()
            .database(database)
            .collection_name("missing")
            .build();

        let error = ArangoStore::new(config, &keys()).await.unwrap_err();

        assert!(matches!(
            error,
            Error::CollectionLookup {
                ref collection,
                source: DatabaseError::CollectionNotFound(_),
            } if collection == "missing"
        ));
    }

    #[cfg(feature = "arangodb")]
    #[tokio::test]
    async fn test_connection_failure() {
        let config = StoreConfig::builder().host("http://127.0.0.1:1").build();

        let error = ArangoStore::new(config, &keys()).await.unwrap_err();

        assert!(matches!(error, Error::Connection(DatabaseError::Request(_))));
    }

    #[cfg(not(feature = "arangodb"))]
    #[tokio::test]
    async fn test_connection_without_client() {
        let config = StoreConfig::builder().database_name("app").build();

        let error = ArangoStore::new(config, &keys()).await.unwrap_err();

        assert!(matches!(
            error,
            Error::Connection(DatabaseError::ClientDisabled(ref host))
                if host == "http://localhost:8529"
        ));
    }

    #[tokio::test]
    async fn test_new_without_cookie() {
        let collection = MemoryCollection::new("sessions");
        let store = store_with(&collection, &keys()).await;

        let lookup = store.new_session(&Request::new(()), NAME).await;

        assert!(lookup.error().is_none());
        let session = lookup.session();
        assert!(session.is_new());
        assert_eq!(session.id(), "");
        assert!(session.values().is_empty());
        assert_eq!(session.options(), SessionOptions::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let collection = MemoryCollection::new("sessions");
        let store = store_with(&collection, &keys()).await;
        let request = Request::new(());

        let session = store.new_session(&request, NAME).await.into_session();
        session.insert("test", "test").unwrap();
        let mut response = Response::new(());
        store.save(&request, &mut response, &session).await.unwrap();

        assert!(!session.id().is_empty());
        assert_eq!(collection.len().await, 1);

        let lookup = store.new_session(&follow_up(&response), NAME).await;
        assert!(lookup.error().is_none());
        let loaded = lookup.session();
        assert!(!loaded.is_new());
        assert_eq!(loaded.id(), session.id());
        assert_eq!(loaded.values(), HashMap::from([("test".to_owned(), json!("test"))]));
    }

    #[tokio::test]
    async fn test_save_and_load_encrypted() {
        let collection = MemoryCollection::new("sessions");
        let store = store_with(&collection, &encrypted_keys()).await;
        let request = Request::new(());

        let session = store.new_session(&request, NAME).await.into_session();
        session.insert("secret", "plaintext-marker").unwrap();
        let mut response = Response::new(());
        store.save(&request, &mut response, &session).await.unwrap();

        let stored = collection.document(&session.id()).await.unwrap();
        assert!(!stored.session_data.contains("plaintext-marker"));

        let loaded = store.new_session(&follow_up(&response), NAME).await;
        assert_eq!(
            loaded.session().get::<String>("secret").unwrap().as_deref(),
            Some("plaintext-marker")
        );
    }

    #[tokio::test]
    async fn test_set_cookie_uses_session_options() {
        let collection = MemoryCollection::new("sessions");
        let config = StoreConfig::builder()
            .collection(collection.clone())
            .session_options(SessionOptions {
                path: "/app".to_owned(),
                http_only: true,
                ..SessionOptions::default()
            })
            .build();
        let store = ArangoStore::new(config, &keys()).await.unwrap();
        let request = Request::new(());

        let session = store.new_session(&request, NAME).await.into_session();
        let mut response = Response::new(());
        store.save(&request, &mut response, &session).await.unwrap();

        let header = set_cookie(&response).unwrap();
        assert!(header.starts_with("test="));
        assert!(header.contains("Path=/app"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Max-Age=604800"));

        let value = header.split(';').next().unwrap().trim_start_matches("test=");
        let id: String = store.codecs.decode(NAME, value).unwrap();
        assert_eq!(id, session.id());
    }

    #[tokio::test]
    async fn test_options_are_copied() {
        let collection = MemoryCollection::new("sessions");
        let mut store = store_with(&collection, &keys()).await;
        let request = Request::new(());

        let before = store.new_session(&request, NAME).await.into_session();
        store.session_options_mut().path = "/changed".to_owned();
        let after = store.new_session(&request, NAME).await.into_session();
        after.set_options(SessionOptions {
            max_age: 60,
            ..after.options()
        });

        assert_eq!(before.options().path, "/");
        assert_eq!(after.options().path, "/changed");
        assert_eq!(store.session_options().max_age, 604_800);
    }

    #[tokio::test]
    async fn test_cookie_from_other_keys() {
        let collection = MemoryCollection::new("sessions");
        let writer = store_with(&collection, &keys()).await;
        let reader = store_with(&collection, &encrypted_keys()).await;
        let request = Request::new(());

        let session = writer.new_session(&request, NAME).await.into_session();
        let mut response = Response::new(());
        writer.save(&request, &mut response, &session).await.unwrap();

        let lookup = reader.new_session(&follow_up(&response), NAME).await;

        assert!(matches!(lookup.error(), Some(Error::CookieDecode(CodecError::MacInvalid))));
        assert!(lookup.session().is_new());
        assert_eq!(lookup.session().id(), "");
    }

    #[tokio::test]
    async fn test_cookie_for_missing_document() {
        let collection = MemoryCollection::new("sessions");
        let store = store_with(&collection, &keys()).await;
        let request = Request::new(());

        let session = store.new_session(&request, NAME).await.into_session();
        let mut response = Response::new(());
        store.save(&request, &mut response, &session).await.unwrap();
        collection.remove(&session.id()).await.unwrap();

        let lookup = store.new_session(&follow_up(&response), NAME).await;

        let error = lookup.error().unwrap();
        assert!(error.is_not_found());
        assert!(lookup.session().is_new());
        assert!(lookup.session().values().is_empty());
        assert_eq!(lookup.session().id(), session.id());
    }

    #[tokio::test]
    async fn test_undecodable_document() {
        let collection = MemoryCollection::new("sessions");
        let store = store_with(&collection, &keys()).await;
        collection.insert_raw("42", "not encoded").await;
        let cookie = store.codecs.encode(NAME, "42").unwrap();
        let request = Request::builder()
            .header(COOKIE, format!("{NAME}={cookie}"))
            .body(())
            .unwrap();

        let lookup = store.new_session(&request, NAME).await;

        assert!(matches!(lookup.error(), Some(Error::PayloadDecode(_))));
        assert!(lookup.session().is_new());
    }

    #[tokio::test]
    async fn test_resave_replaces_document() {
        let collection = MemoryCollection::new("sessions");
        let store = store_with(&collection, &keys()).await;
        let request = Request::new(());

        let session = store.new_session(&request, NAME).await.into_session();
        session.insert("count", 1).unwrap();
        store.save(&request, &mut Response::new(()), &session).await.unwrap();
        let id = session.id();
        session.insert("count", 2).unwrap();
        store.save(&request, &mut Response::new(()), &session).await.unwrap();

        assert_eq!(session.id(), id);
        assert_eq!(collection.len().await, 1);
    }

    #[tokio::test]
    async fn test_encode_failure_is_reported() {
        let collection = MemoryCollection::new("sessions");
        let mut store = store_with(&collection, &keys()).await;
        store.set_max_length(64);
        let request = Request::new(());

        let session = store.new_session(&request, NAME).await.into_session();
        session.insert("large", "x".repeat(256)).unwrap();
        let mut response = Response::new(());
        let error = store.save(&request, &mut response, &session).await.unwrap_err();

        assert!(matches!(error, Error::Encode(CodecError::EncodedValueTooLong)));
        assert!(set_cookie(&response).is_none());
        assert!(collection.is_empty().await);
    }

    #[tokio::test]
    async fn test_negative_max_age_deletes() {
        let collection = MemoryCollection::new("sessions");
        let store = store_with(&collection, &keys()).await;
        let request = Request::new(());
        let session = store.new_session(&request, NAME).await.into_session();
        session.insert("key", "value").unwrap();
        store.save(&request, &mut Response::new(()), &session).await.unwrap();

        session.set_options(SessionOptions {
            max_age: -1,
            ..session.options()
        });
        let mut response = Response::new(());
        store.save(&request, &mut response, &session).await.unwrap();

        assert!(collection.is_empty().await);
        assert!(session.values().is_empty());
        let header = set_cookie(&response).unwrap();
        assert!(header.starts_with("test=;"));
        assert!(header.contains("Max-Age=0"));

        // Deleting again is not an error.
        store.save(&request, &mut Response::new(()), &session).await.unwrap();
    }

    #[tokio::test]
    async fn test_key_rotation() {
        let collection = MemoryCollection::new("sessions");
        let old = store_with(&collection, &keys()).await;
        let rotated_keys: Vec<KeyPair> = encrypted_keys().into_iter().chain(keys()).collect();
        let rotated = store_with(&collection, &rotated_keys).await;
        let request = Request::new(());

        let session = old.new_session(&request, NAME).await.into_session();
        session.insert("user", "alice").unwrap();
        let mut response = Response::new(());
        old.save(&request, &mut response, &session).await.unwrap();

        let lookup = rotated.new_session(&follow_up(&response), NAME).await;
        assert!(lookup.error().is_none());
        let session = lookup.into_session();
        assert_eq!(session.get::<String>("user").unwrap().as_deref(), Some("alice"));

        let mut response = Response::new(());
        rotated.save(&request, &mut response, &session).await.unwrap();
        let lookup = old.new_session(&follow_up(&response), NAME).await;
        assert!(matches!(lookup.error(), Some(Error::CookieDecode(_))));
    }

    #[tokio::test]
    async fn test_set_max_age() {
        let collection = MemoryCollection::new("sessions");
        let mut store = store_with(&collection, &keys()).await;

        store.set_max_age(120);

        assert_eq!(store.session_options().max_age, 120);
        assert!(store.codecs.iter().all(|codec| codec.max_age() == 120));
    }

    #[tokio::test]
    async fn test_get_uses_registry() {
        let collection = MemoryCollection::new("sessions");
        let store = store_with(&collection, &keys()).await;
        let mut request = Request::new(());

        let first = store.get(&mut request, NAME).await.into_session();
        first.insert("key", "value").unwrap();
        let second = store.get(&mut request, NAME).await.into_session();

        assert_eq!(second.get::<String>("key").unwrap().as_deref(), Some("value"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_logs_cookie_decode_failure() {
        let collection = MemoryCollection::new("sessions");
        let store = store_with(&collection, &keys()).await;
        let request = Request::builder()
            .header(COOKIE, format!("{NAME}=garbage"))
            .body(())
            .unwrap();

        let lookup = store.new_session(&request, NAME).await;

        assert!(lookup.error().is_some());
        assert!(logs_contain("failed to decode session cookie"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_logs_load_failure() {
        let collection = MemoryCollection::new("sessions");
        let store = store_with(&collection, &keys()).await;
        let cookie = store.codecs.encode(NAME, "missing").unwrap();
        let request = Request::builder()
            .header(COOKIE, format!("{NAME}={cookie}"))
            .body(())
            .unwrap();

        let lookup = store.new_session(&request, NAME).await;

        assert!(lookup.error().is_some_and(Error::is_not_found));
        assert!(logs_contain("failed to load session"));
        assert!(!logs_contain("failed to decode session cookie"));
    }
}
