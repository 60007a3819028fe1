//! HTTP sessions stored in `ArangoDB`.
//!
//! `arango-session` keeps session values in an `ArangoDB` collection, one
//! document per session, and hands the client a cookie holding nothing but
//! the signed (and optionally encrypted) document key.
//!
//! The main entry point is [`ArangoStore`], which implements the [`Store`]
//! trait:
//!
//! - [`Store::get`] returns the session for a request, loading it at most
//!   once per request,
//! - [`Store::new_session`] always builds a session from the request cookie,
//! - [`Store::save`] writes the session document and sets the cookie.
//!
//! Cookies and stored values are protected by a chain of codecs built from
//! [`KeyPair`]s; see [`codec`] for the format and for key rotation.

pub use crate::error::{Error, Result};

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod session;
pub mod store;

pub use crate::codec::KeyPair;
pub use crate::config::StoreConfig;
pub use crate::session::{Session, SessionOptions};
pub use crate::store::{ArangoStore, SessionLookup, Store};
