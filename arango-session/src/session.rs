//! Sessions and their cookie options.
//!
//! A [`Session`] is a named bag of JSON values together with the
//! [`SessionOptions`] used to build its cookie. Sessions are created by a
//! [`Store`](crate::store::Store) and cached for the duration of a request by
//! a [`Registry`].

mod registry;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cookie::Cookie;
use cookie::time::{Duration, OffsetDateTime};
use http::Request;
use http::header::COOKIE;
pub use registry::Registry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default lifetime of a session cookie, in seconds (7 days).
pub const DEFAULT_SESSION_MAX_AGE: i64 = 86400 * 7;

/// The session value key under which flash messages are kept.
pub const FLASHES_KEY: &str = "_flash";

/// The `SameSite` attribute of a session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    /// `SameSite=Strict`
    Strict,
    /// `SameSite=Lax`
    Lax,
    /// `SameSite=None`
    None,
}

impl From<SameSite> for cookie::SameSite {
    fn from(value: SameSite) -> Self {
        match value {
            SameSite::Strict => Self::Strict,
            SameSite::Lax => Self::Lax,
            SameSite::None => Self::None,
        }
    }
}

/// Attributes of the cookie that carries a session.
///
/// `max_age` is in seconds: a positive value sets both `Max-Age` and
/// `Expires`, zero makes the cookie last for the browser session, and a
/// negative value expires the cookie immediately (which also deletes the
/// session when it is saved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// The cookie `Path`.
    pub path: String,
    /// The cookie `Domain`, if any.
    pub domain: Option<String>,
    /// Lifetime of the cookie in seconds.
    pub max_age: i64,
    /// Whether to set the `Secure` attribute.
    pub secure: bool,
    /// Whether to set the `HttpOnly` attribute.
    pub http_only: bool,
    /// The `SameSite` attribute, if any.
    pub same_site: Option<SameSite>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            path: "/".to_owned(),
            domain: None,
            max_age: DEFAULT_SESSION_MAX_AGE,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }
}

impl SessionOptions {
    /// Builds the cookie called `name` holding `value` with these options.
    #[must_use]
    pub fn to_cookie(&self, name: &str, value: &str) -> Cookie<'static> {
        let mut cookie = Cookie::build((name.to_owned(), value.to_owned()))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only);
        if let Some(domain) = &self.domain {
            cookie = cookie.domain(domain.clone());
        }
        if let Some(same_site) = self.same_site {
            cookie = cookie.same_site(same_site.into());
        }

        match self.max_age.cmp(&0) {
            Ordering::Greater => {
                let max_age = Duration::seconds(self.max_age);
                cookie = cookie.max_age(max_age);
                if let Some(expires) = OffsetDateTime::now_utc().checked_add(max_age) {
                    cookie = cookie.expires(expires);
                }
            }
            Ordering::Less => {
                cookie = cookie
                    .max_age(Duration::ZERO)
                    .expires(OffsetDateTime::UNIX_EPOCH);
            }
            Ordering::Equal => {}
        }

        cookie.build()
    }
}

/// Returns the value of the first cookie called `name` sent with the request.
pub(crate) fn request_cookie<B>(request: &Request<B>, name: &str) -> Option<String> {
    request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_owned())
}

#[derive(Debug)]
struct SessionState {
    id: String,
    values: HashMap<String, Value>,
    options: SessionOptions,
    is_new: bool,
}

/// A session.
///
/// `Session` is a handle: clones refer to the same session, so a value
/// inserted through one clone is visible through every other and is
/// persisted when any of them is saved.
///
/// # Examples
///
/// ```
/// use arango_session::session::{Session, SessionOptions};
///
/// let session = Session::new("app", SessionOptions::default());
/// session.insert("user_id", 42).unwrap();
///
/// assert_eq!(session.get::<u32>("user_id").unwrap(), Some(42));
/// assert!(session.is_new());
/// ```
#[derive(Debug, Clone)]
pub struct Session {
    name: Arc<str>,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    /// Creates a new, empty session without an ID.
    #[must_use]
    pub fn new(name: &str, options: SessionOptions) -> Self {
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(SessionState {
                id: String::new(),
                values: HashMap::new(),
                options,
                is_new: true,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The name of the session, which is also the name of its cookie.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The session ID, or an empty string if the session has never been
    /// saved.
    #[must_use]
    pub fn id(&self) -> String {
        self.state().id.clone()
    }

    pub(crate) fn set_id(&self, id: String) {
        self.state().id = id;
    }

    /// Returns `true` if the session was not loaded from the store.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.state().is_new
    }

    pub(crate) fn set_is_new(&self, is_new: bool) {
        self.state().is_new = is_new;
    }

    /// Returns the value stored under `key`, deserialized as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value cannot be deserialized as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        let value = self.state().values.get(key).cloned();
        value.map(serde_json::from_value).transpose()
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized to JSON.
    pub fn insert<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.state().values.insert(key.into(), value);
        Ok(())
    }

    /// Removes the value stored under `key` and returns it.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.state().values.remove(key)
    }

    /// Returns `true` if a value is stored under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.state().values.contains_key(key)
    }

    /// Removes every value.
    pub fn clear(&self) {
        self.state().values.clear();
    }

    /// Returns a copy of all values.
    #[must_use]
    pub fn values(&self) -> HashMap<String, Value> {
        self.state().values.clone()
    }

    pub(crate) fn replace_values(&self, values: HashMap<String, Value>) {
        self.state().values = values;
    }

    /// Returns a copy of the session's cookie options.
    #[must_use]
    pub fn options(&self) -> SessionOptions {
        self.state().options.clone()
    }

    /// Replaces the session's cookie options.
    ///
    /// Setting a negative `max_age` deletes the session the next time it is
    /// saved.
    pub fn set_options(&self, options: SessionOptions) {
        self.state().options = options;
    }

    /// Appends a flash message.
    ///
    /// Flash messages are kept until they are read with [`Self::flashes`].
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized to JSON.
    pub fn add_flash<T: Serialize>(&self, value: T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        let mut state = self.state();
        match state.values.get_mut(FLASHES_KEY) {
            Some(Value::Array(flashes)) => flashes.push(value),
            _ => {
                state
                    .values
                    .insert(FLASHES_KEY.to_owned(), Value::Array(vec![value]));
            }
        }
        Ok(())
    }

    /// Returns the pending flash messages and removes them from the session.
    #[must_use]
    pub fn flashes(&self) -> Vec<Value> {
        match self.state().values.remove(FLASHES_KEY) {
            Some(Value::Array(flashes)) => flashes,
            Some(value) => vec![value],
            None => Vec::new(),
        }
    }
}
