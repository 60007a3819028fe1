use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::{Request, Response};
use indexmap::IndexMap;
use tracing::warn;

use crate::error::Result;
use crate::session::Session;
use crate::store::{SessionLookup, Store};

/// Sessions loaded during one request, keyed by name.
///
/// The registry lives in the request extensions, so every call to
/// [`Store::get`] with the same request and name returns the same
/// [`Session`]. Errors reported while a session was first loaded are only
/// returned by that first call.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sessions: Arc<Mutex<IndexMap<String, Session>>>,
}

impl Registry {
    /// Returns the registry attached to `request`, attaching an empty one if
    /// there is none yet.
    pub fn from_request<B>(request: &mut Request<B>) -> Self {
        request
            .extensions_mut()
            .get_or_insert_default::<Self>()
            .clone()
    }

    fn sessions(&self) -> MutexGuard<'_, IndexMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached session called `name`, or creates it with
    /// [`Store::new_session`] and caches it.
    pub async fn get<S, B>(&self, store: &S, request: &Request<B>, name: &str) -> SessionLookup
    where
        S: Store + ?Sized,
        B: Sync,
    {
        if let Some(session) = self.session(name) {
            return SessionLookup::new(session, None);
        }

        let lookup = store.new_session(request, name).await;
        self.sessions()
            .entry(name.to_owned())
            .or_insert_with(|| lookup.session().clone());
        lookup
    }

    /// Returns the cached session called `name`, if any.
    #[must_use]
    pub fn session(&self, name: &str) -> Option<Session> {
        self.sessions().get(name).cloned()
    }

    /// Returns the number of cached sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Returns `true` if no session has been loaded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Saves every cached session, in the order they were loaded.
    ///
    /// Every session is saved even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub async fn save_all<S, ReqB, ResB>(
        &self,
        store: &S,
        request: &Request<ReqB>,
        response: &mut Response<ResB>,
    ) -> Result<()>
    where
        S: Store + ?Sized,
        ReqB: Sync,
        ResB: Send,
    {
        let sessions: Vec<Session> = self.sessions().values().cloned().collect();

        let mut first_error = None;
        for session in sessions {
            if let Err(error) = store.save(request, response, &session).await {
                warn!(session = session.name(), %error, "failed to save session");
                first_error.get_or_insert(error);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
