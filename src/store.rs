//! Document store seam.
//!
//! Services hold one shared store handle (`Arc<S>`) and borrow a
//! [`Collection`] per call. [`MemoryStore`] is the in-process backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};

use crate::error::{StoreError, StoreResult};
use crate::object_id::ObjectId;
use crate::pipeline::Pipeline;
use crate::query;
use crate::update::apply_update;

/// Fully qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Sibling collection in the same database, used to resolve `$lookup`.
    pub fn sibling(&self, collection: &str) -> Self {
        Self::new(self.database.clone(), collection)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}

/// Operations the record services need from a document database.
pub trait DocumentStore: Send + Sync {
    fn aggregate(&self, ns: &Namespace, pipeline: &[Value]) -> StoreResult<Vec<Value>>;

    /// Insert `doc`, assigning a fresh `_id` when it has none.
    fn insert_one(&self, ns: &Namespace, doc: Value) -> StoreResult<ObjectId>;

    /// Apply `update` to the first document matching `filter`.
    fn update_one(&self, ns: &Namespace, filter: &Value, update: &Value) -> StoreResult<UpdateResult>;
}

/// A named database on a shared store handle.
pub struct Database<'a, S: ?Sized> {
    store: &'a S,
    name: &'a str,
}

impl<'a, S: DocumentStore + ?Sized> Database<'a, S> {
    pub fn new(store: &'a S, name: &'a str) -> Self {
        Self { store, name }
    }

    pub fn collection(&self, name: &str) -> Collection<'a, S> {
        Collection {
            store: self.store,
            ns: Namespace::new(self.name, name),
        }
    }
}

/// A collection borrowed from a store for the duration of one call.
pub struct Collection<'a, S: ?Sized> {
    store: &'a S,
    ns: Namespace,
}

impl<S: DocumentStore + ?Sized> Collection<'_, S> {
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    pub fn aggregate(&self, pipeline: &[Value]) -> StoreResult<Vec<Value>> {
        tracing::debug!(ns = %self.ns, stages = pipeline.len(), "aggregate");
        self.store.aggregate(&self.ns, pipeline)
    }

    pub fn insert_one(&self, doc: Value) -> StoreResult<ObjectId> {
        let id = self.store.insert_one(&self.ns, doc)?;
        tracing::debug!(ns = %self.ns, %id, "insert_one");
        Ok(id)
    }

    pub fn update_one(&self, filter: &Value, update: &Value) -> StoreResult<UpdateResult> {
        let res = self.store.update_one(&self.ns, filter, update)?;
        tracing::debug!(
            ns = %self.ns,
            matched = res.matched,
            modified = res.modified,
            "update_one"
        );
        Ok(res)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

type Docs = Arc<RwLock<Vec<Value>>>;

/// Thread-safe in-memory document store.
///
/// Uses a `RwLock` on the namespace map and one per collection, so reads of
/// different collections never block each other and reads of the same
/// collection proceed concurrently.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Namespace, Docs>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, ns: &Namespace) -> StoreResult<Docs> {
        {
            let cols = self.collections.read().map_err(|_| StoreError::Poisoned)?;
            if let Some(col) = cols.get(ns) {
                return Ok(Arc::clone(col));
            }
        }
        let mut cols = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        Ok(Arc::clone(cols.entry(ns.clone()).or_default()))
    }

    /// The collection if it exists. Reads never create collections.
    fn existing(&self, ns: &Namespace) -> StoreResult<Option<Docs>> {
        let cols = self.collections.read().map_err(|_| StoreError::Poisoned)?;
        Ok(cols.get(ns).map(Arc::clone))
    }

    fn find(&self, ns: &Namespace, filter: &Value) -> StoreResult<Vec<Value>> {
        let q = query::parse_query(filter)?;
        let Some(col) = self.existing(ns)? else {
            return Ok(Vec::new());
        };
        let docs = col.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs
            .iter()
            .filter(|d| query::matches_value(&q, d))
            .cloned()
            .collect())
    }

    /// Number of documents in a collection, regardless of status.
    pub fn len(&self, ns: &Namespace) -> StoreResult<usize> {
        let Some(col) = self.existing(ns)? else {
            return Ok(0);
        };
        let docs = col.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.len())
    }

    /// Fetch a raw stored document by `_id`.
    pub fn get(&self, ns: &Namespace, id: ObjectId) -> StoreResult<Option<Value>> {
        Ok(self.find(ns, &json!({"_id": id}))?.into_iter().next())
    }
}

impl DocumentStore for MemoryStore {
    fn aggregate(&self, ns: &Namespace, pipeline: &[Value]) -> StoreResult<Vec<Value>> {
        let pipeline = Pipeline::parse(pipeline)?;
        let (leading_match, start) = pipeline.take_leading_match();
        let initial = self.find(ns, leading_match.unwrap_or(&json!({})))?;

        let lookup_fn =
            |foreign: &str, filter: &Value| -> StoreResult<Vec<Value>> { self.find(&ns.sibling(foreign), filter) };

        pipeline.execute_from(start, initial, &lookup_fn)
    }

    fn insert_one(&self, ns: &Namespace, mut doc: Value) -> StoreResult<ObjectId> {
        let map = doc.as_object_mut().ok_or(StoreError::NotAnObject)?;
        let id = match map.get("_id") {
            Some(existing) => serde_json::from_value(existing.clone())?,
            None => {
                let id = ObjectId::new();
                map.insert("_id".to_string(), id.into());
                id
            }
        };
        let col = self.get_or_create(ns)?;
        col.write().map_err(|_| StoreError::Poisoned)?.push(doc);
        Ok(id)
    }

    fn update_one(&self, ns: &Namespace, filter: &Value, update: &Value) -> StoreResult<UpdateResult> {
        let q = query::parse_query(filter)?;
        let Some(col) = self.existing(ns)? else {
            return Ok(UpdateResult::default());
        };
        let mut docs = col.write().map_err(|_| StoreError::Poisoned)?;
        let Some(doc) = docs.iter_mut().find(|d| query::matches_value(&q, d)) else {
            return Ok(UpdateResult::default());
        };
        let mut updated = doc.clone();
        apply_update(&mut updated, update)?;
        let modified = u64::from(updated != *doc);
        *doc = updated;
        Ok(UpdateResult {
            matched: 1,
            modified,
        })
    }
}
