//! The session store interface.
//!
//! A [`Store`] creates sessions from incoming requests and persists them
//! when the response is written. [`ArangoStore`] keeps session values in an
//! `ArangoDB` collection and only puts the session ID in the cookie.

mod arango;

pub use arango::ArangoStore;
use async_trait::async_trait;
use http::{Request, Response};

use crate::error::{Error, Result};
use crate::session::{Registry, Session};

/// The outcome of looking up a session.
///
/// A lookup always yields a usable session. When the request carried a
/// cookie that could not be decoded, or that referred to a session that
/// could not be loaded, a fresh session is returned together with the error
/// that caused it.
#[derive(Debug)]
pub struct SessionLookup {
    session: Session,
    error: Option<Error>,
}

impl SessionLookup {
    /// Pairs a session with the error that replaced it by a fresh one, if
    /// any.
    #[must_use]
    pub fn new(session: Session, error: Option<Error>) -> Self {
        Self { session, error }
    }

    /// The session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The error encountered while loading the session, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Discards the error and returns the session.
    #[must_use]
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Splits the lookup into the session and the error.
    #[must_use]
    pub fn into_parts(self) -> (Session, Option<Error>) {
        (self.session, self.error)
    }

    /// Returns the session, or the error if one was encountered.
    ///
    /// # Errors
    ///
    /// Returns the error encountered while loading the session.
    pub fn into_result(self) -> Result<Session> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.session),
        }
    }
}

/// A backend that loads and persists sessions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the session called `name` for this request.
    ///
    /// The first call for a given request and name creates the session with
    /// [`Store::new_session`]; later calls return the same session from the
    /// request's [`Registry`].
    async fn get<B>(&self, request: &mut Request<B>, name: &str) -> SessionLookup
    where
        B: Send + Sync,
    {
        let registry = Registry::from_request(request);
        registry.get(self, request, name).await
    }

    /// Creates the session called `name` from the request's cookie, without
    /// consulting the registry.
    ///
    /// The returned session is new unless it was loaded from the store.
    async fn new_session<B>(&self, request: &Request<B>, name: &str) -> SessionLookup
    where
        B: Sync;

    /// Persists `session` and adds its cookie to `response`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session could not be encoded or written.
    async fn save<ReqB, ResB>(
        &self,
        request: &Request<ReqB>,
        response: &mut Response<ResB>,
        session: &Session,
    ) -> Result<()>
    where
        ReqB: Sync,
        ResB: Send;
}
