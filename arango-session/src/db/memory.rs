//! In-memory document database.
//!
//! Documents live in a `Mutex<HashMap<..>>` and are lost when the process
//! exits. Keys are assigned from a counter, so they look like the numeric keys
//! `ArangoDB` generates by default.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::{DatabaseError, DocumentCollection, DocumentDatabase, SessionDocument};

/// A process-local database holding [`MemoryCollection`]s.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    collections: Arc<Mutex<HashMap<String, MemoryCollection>>>,
}

impl MemoryDatabase {
    /// Creates a database with no collections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collection, or returns the existing one with the same name.
    pub async fn create_collection(&self, name: &str) -> MemoryCollection {
        self.collections
            .lock()
            .await
            .entry(name.to_owned())
            .or_insert_with(|| MemoryCollection::new(name))
            .clone()
    }
}

#[async_trait]
impl DocumentDatabase for MemoryDatabase {
    async fn collection(&self, name: &str) -> Result<Arc<dyn DocumentCollection>, DatabaseError> {
        let collections = self.collections.lock().await;
        match collections.get(name) {
            Some(collection) => Ok(Arc::new(collection.clone())),
            None => Err(DatabaseError::CollectionNotFound(name.to_owned())),
        }
    }
}

/// A process-local collection. Clones share the same documents.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    name: Arc<str>,
    documents: Arc<Mutex<HashMap<String, String>>>,
    next_key: Arc<AtomicU64>,
}

impl MemoryCollection {
    /// Creates an empty collection called `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            documents: Arc::new(Mutex::new(HashMap::new())),
            next_key: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the number of documents in the collection.
    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }

    /// Returns `true` if the collection holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.documents.lock().await.is_empty()
    }

    /// Stores `session_data` under `key` without going through the
    /// [`DocumentCollection`] interface.
    pub async fn insert_raw(&self, key: &str, session_data: &str) {
        self.documents
            .lock()
            .await
            .insert(key.to_owned(), session_data.to_owned());
    }

    fn not_found(&self, key: &str) -> DatabaseError {
        DatabaseError::DocumentNotFound {
            collection: self.name.to_string(),
            key: key.to_owned(),
        }
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn document(&self, key: &str) -> Result<SessionDocument, DatabaseError> {
        let documents = self.documents.lock().await;
        documents
            .get(key)
            .map(|data| SessionDocument::new(Some(key.to_owned()), data.clone()))
            .ok_or_else(|| self.not_found(key))
    }

    async fn save(&self, document: &SessionDocument) -> Result<String, DatabaseError> {
        let mut documents = self.documents.lock().await;
        let key = match &document.key {
            Some(key) => key.clone(),
            None => self.next_key.fetch_add(1, Ordering::Relaxed).to_string(),
        };
        documents.insert(key.clone(), document.session_data.clone());
        Ok(key)
    }

    async fn remove(&self, key: &str) -> Result<(), DatabaseError> {
        let mut documents = self.documents.lock().await;
        documents
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| self.not_found(key))
    }
}
