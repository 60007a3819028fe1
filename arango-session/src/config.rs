//! Configuration for [`ArangoStore`](crate::store::ArangoStore).
//!
//! A store needs a collection to keep its documents in. There are three ways
//! to provide one, tried in this order:
//!
//! 1. an existing collection handle ([`StoreConfigBuilder::collection`]),
//! 2. an existing database handle plus a collection name
//!    ([`StoreConfigBuilder::database`]),
//! 3. connection parameters, used to connect to an `ArangoDB` server when the
//!    store is created.
//!
//! Connection parameters can also be read from TOML:
//!
//! ```
//! use arango_session::config::StoreConfig;
//!
//! let config = StoreConfig::from_toml(
//!     r#"
//!     host = "http://arangodb:8529"
//!     database_name = "app"
//!     user = "app"
//!     password = "secret"
//!
//!     [session_options]
//!     max_age = 3600
//!     http_only = true
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.database_name, "app");
//! assert_eq!(config.collection_name, "");
//! assert_eq!(config.session_options.unwrap().max_age, 3600);
//! ```

use std::sync::Arc;

use derive_builder::Builder;
use serde::Deserialize;

use crate::db::{DocumentCollection, DocumentDatabase};
use crate::session::SessionOptions;

/// Default name of the session collection.
pub const DEFAULT_COLLECTION_NAME: &str = "sessions";
/// Default `ArangoDB` endpoint.
pub const DEFAULT_HOST: &str = "http://localhost:8529";
/// Default database name.
pub const DEFAULT_DATABASE_NAME: &str = "_system";
/// Default user.
pub const DEFAULT_USER: &str = "root";

/// How an [`ArangoStore`](crate::store::ArangoStore) finds its collection and
/// which options its sessions get.
///
/// Blank strings are replaced with defaults when the store is created: the
/// collection name with [`DEFAULT_COLLECTION_NAME`], the host with
/// [`DEFAULT_HOST`], the database name with [`DEFAULT_DATABASE_NAME`] and the
/// user with [`DEFAULT_USER`]. A blank user also resets the password to an
/// empty one.
///
/// # Examples
///
/// ```
/// use arango_session::config::StoreConfig;
/// use arango_session::db::memory::MemoryCollection;
///
/// let config = StoreConfig::builder()
///     .collection(MemoryCollection::new("sessions"))
///     .build();
/// assert!(config.collection.is_some());
/// ```
#[derive(Clone, Default, derive_more::Debug, Builder, Deserialize)]
#[builder(build_fn(skip, error = std::convert::Infallible), derive(Debug))]
#[serde(default)]
pub struct StoreConfig {
    /// Name of the session collection.
    #[builder(setter(into))]
    pub collection_name: String,
    /// `ArangoDB` endpoint, such as `http://localhost:8529`.
    #[builder(setter(into))]
    pub host: String,
    /// Name of the database holding the session collection.
    #[builder(setter(into))]
    pub database_name: String,
    /// User to authenticate as.
    #[builder(setter(into))]
    pub user: String,
    /// Password of the user.
    #[builder(setter(into))]
    #[debug(skip)]
    pub password: String,
    /// An existing database connection. Takes precedence over the connection
    /// parameters.
    #[builder(setter(custom))]
    #[serde(skip)]
    pub database: Option<Arc<dyn DocumentDatabase>>,
    /// An existing collection. Takes precedence over everything else.
    #[builder(setter(custom))]
    #[serde(skip)]
    pub collection: Option<Arc<dyn DocumentCollection>>,
    /// Options given to every new session. Defaults to
    /// [`SessionOptions::default`].
    #[builder(setter(strip_option))]
    pub session_options: Option<SessionOptions>,
}

impl StoreConfig {
    /// Returns a builder for the store configuration.
    #[must_use]
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Parses a configuration from TOML.
    ///
    /// Database and collection handles cannot be given in TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or has fields of the wrong
    /// type.
    pub fn from_toml(toml_content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_content)
    }
}

impl StoreConfigBuilder {
    /// Uses an existing collection.
    pub fn collection(&mut self, collection: impl DocumentCollection + 'static) -> &mut Self {
        self.collection = Some(Some(Arc::new(collection)));
        self
    }

    /// Uses an existing database; the collection is looked up by name.
    pub fn database(&mut self, database: impl DocumentDatabase + 'static) -> &mut Self {
        self.database = Some(Some(Arc::new(database)));
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(&self) -> StoreConfig {
        StoreConfig {
            collection_name: self.collection_name.clone().unwrap_or_default(),
            host: self.host.clone().unwrap_or_default(),
            database_name: self.database_name.clone().unwrap_or_default(),
            user: self.user.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            database: self.database.clone().flatten(),
            collection: self.collection.clone().flatten(),
            session_options: self.session_options.clone().flatten(),
        }
    }
}

#[cfg(feature = "arangodb")]
#[derive(Debug)]
pub(crate) struct ConnectionParams {
    pub(crate) host: String,
    pub(crate) database_name: String,
    pub(crate) user: String,
    pub(crate) password: String,
}

impl StoreConfig {
    pub(crate) fn resolved_collection_name(&self) -> &str {
        non_blank(&self.collection_name).unwrap_or(DEFAULT_COLLECTION_NAME)
    }

    pub(crate) fn resolved_host(&self) -> &str {
        non_blank(&self.host).unwrap_or(DEFAULT_HOST)
    }

    #[cfg(feature = "arangodb")]
    pub(crate) fn connection_params(&self) -> ConnectionParams {
        let (user, password) = match non_blank(&self.user) {
            Some(user) => (user.to_owned(), self.password.clone()),
            None => (DEFAULT_USER.to_owned(), String::new()),
        };

        ConnectionParams {
            host: self.resolved_host().to_owned(),
            database_name: non_blank(&self.database_name)
                .unwrap_or(DEFAULT_DATABASE_NAME)
                .to_owned(),
            user,
            password,
        }
    }
}

fn non_blank(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
