//! An in-process [`ObjectStore`].
//!
//! [`MemoryStore`] mimics the parts of the API server the controller relies
//! on: unique names per kind and namespace, label filtering on list, JSON
//! merge patches, and deletion that is deferred while an object still has
//! finalizers. Kinds can additionally be registered for graceful deletion,
//! in which case a deleted object stays visible with a deletion timestamp
//! until [`MemoryStore::complete_terminations`] is called.
//!
//! Every write is recorded in a journal and writes can be made to fail, which
//! makes it possible to assert what a reconciliation pass did.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde_json::{Value, json};
use snafu::ResultExt;
use strum::{Display, IntoStaticStr};

use super::{
    AlreadyExistsSnafu, ConvertSnafu, NotFoundSnafu, ObjectStore, RejectedSnafu, Result,
    StoreObject,
};
use crate::labels;

/// A write performed against a [`MemoryStore`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    Create,
    Delete,
    Patch,
}

/// A journal entry of a [`MemoryStore`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Operation {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

impl Operation {
    pub fn new(verb: Verb, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            verb,
            kind: kind.into(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct ObjectId {
    kind: String,
    namespace: String,
    name: String,
}

#[derive(Clone, Debug)]
struct Fault {
    verb: Verb,
    kind: String,
    name: Option<String>,
    message: String,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectId, Value>,
    revision: u64,
    graceful_kinds: BTreeSet<String>,
    faults: Vec<Fault>,
    journal: Vec<Operation>,
}

/// An [`ObjectStore`] keeping all objects in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps deleted objects of kind `K` around in a terminating state
    /// until [`MemoryStore::complete_terminations`] is called.
    pub fn with_graceful_deletion<K: StoreObject>(self) -> Self {
        self.lock().graceful_kinds.insert(kind_of::<K>());
        self
    }

    /// Makes every following `verb` on objects of kind `K` fail. If `name` is
    /// given, only writes to that object fail.
    pub fn fail_on<K: StoreObject>(&self, verb: Verb, name: Option<&str>, message: &str) {
        self.lock().faults.push(Fault {
            verb,
            kind: kind_of::<K>(),
            name: name.map(str::to_owned),
            message: message.to_owned(),
        });
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Stores `object` without journaling it, as if it had existed before.
    pub fn seed<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<()> {
        let mut state = self.lock();
        let id = object_id::<K>(namespace, object.meta().name.as_deref().unwrap_or_default());
        let value = state.admit(&id, object)?;
        state.objects.insert(id, value);
        Ok(())
    }

    /// Returns all objects of kind `K` in `namespace`, ordered by name.
    pub fn objects<K: StoreObject>(&self, namespace: &str) -> Result<Vec<K>> {
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|(id, _)| id.kind == kind_of::<K>() && id.namespace == namespace)
            .map(|(id, value)| decode(id, value))
            .collect()
    }

    /// Returns the names of all objects of kind `K` in `namespace`.
    pub fn names<K: StoreObject>(&self, namespace: &str) -> Vec<String> {
        let kind = kind_of::<K>();
        self.lock()
            .objects
            .keys()
            .filter(|id| id.kind == kind && id.namespace == namespace)
            .map(|id| id.name.clone())
            .collect()
    }

    /// Physically removes all objects which are terminating and have no
    /// finalizers left. Returns the number of removed objects.
    pub fn complete_terminations(&self) -> usize {
        let mut state = self.lock();
        let before = state.objects.len();
        state.objects.retain(|_, value| !is_removable(value));
        before - state.objects.len()
    }

    /// All writes performed so far, in order.
    pub fn journal(&self) -> Vec<Operation> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn check_faults(&self, verb: Verb, id: &ObjectId) -> Result<()> {
        let fault = self.faults.iter().find(|fault| {
            fault.verb == verb
                && fault.kind == id.kind
                && fault.name.as_ref().is_none_or(|name| *name == id.name)
        });

        match fault {
            Some(fault) => RejectedSnafu {
                verb: <&'static str>::from(verb),
                kind: &id.kind,
                namespace: &id.namespace,
                name: &id.name,
                message: &fault.message,
            }
            .fail(),
            None => Ok(()),
        }
    }

    /// Serializes `object` and fills in the metadata the server owns.
    fn admit<K: StoreObject>(&mut self, id: &ObjectId, object: &K) -> Result<Value> {
        let mut value = serde_json::to_value(object).context(ConvertSnafu {
            kind: &id.kind,
            namespace: &id.namespace,
            name: &id.name,
        })?;

        self.revision += 1;
        let metadata = &mut value["metadata"];
        metadata["namespace"] = json!(id.namespace);
        metadata["resourceVersion"] = json!(self.revision.to_string());
        if metadata.get("uid").is_none_or(Value::is_null) {
            metadata["uid"] = json!(format!("uid-{revision}", revision = self.revision));
        }

        Ok(value)
    }

    fn journal(&mut self, verb: Verb, id: &ObjectId) {
        self.journal
            .push(Operation::new(verb, id.kind.clone(), id.name.clone()));
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K> {
        let id = object_id::<K>(namespace, name);
        let state = self.lock();
        match state.objects.get(&id) {
            Some(value) => decode(&id, value),
            None => not_found(&id),
        }
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let objects = self.objects::<K>(namespace)?;
        Ok(objects
            .into_iter()
            .filter(|object| labels::matches(selector, object.meta().labels.as_ref()))
            .collect())
    }

    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let id = object_id::<K>(namespace, object.meta().name.as_deref().unwrap_or_default());
        let mut state = self.lock();
        state.check_faults(Verb::Create, &id)?;

        if state.objects.contains_key(&id) {
            return AlreadyExistsSnafu {
                kind: id.kind,
                namespace: id.namespace,
                name: id.name,
            }
            .fail();
        }

        let value = state.admit(&id, object)?;
        let created = decode(&id, &value)?;
        state.journal(Verb::Create, &id);
        state.objects.insert(id, value);
        Ok(created)
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<()> {
        let id = object_id::<K>(namespace, name);
        let mut state = self.lock();
        state.check_faults(Verb::Delete, &id)?;

        let graceful = state.graceful_kinds.contains(&id.kind);
        let Some(value) = state.objects.get_mut(&id) else {
            return not_found(&id);
        };

        let has_finalizers = value["metadata"]["finalizers"]
            .as_array()
            .is_some_and(|finalizers| !finalizers.is_empty());

        if graceful || has_finalizers {
            if value["metadata"]["deletionTimestamp"].is_null() {
                value["metadata"]["deletionTimestamp"] = serde_json::to_value(Time(
                    jiff::Timestamp::now(),
                ))
                .context(ConvertSnafu {
                    kind: &id.kind,
                    namespace: &id.namespace,
                    name: &id.name,
                })?;
            }
        } else {
            state.objects.remove(&id);
        }

        state.journal(Verb::Delete, &id);
        Ok(())
    }

    async fn merge_patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        let id = object_id::<K>(namespace, name);
        let mut state = self.lock();
        state.check_faults(Verb::Patch, &id)?;

        let Some(value) = state.objects.get_mut(&id) else {
            return not_found(&id);
        };

        json_patch::merge(value, patch);
        let patched = decode(&id, value)?;

        // Removing the last finalizer of a terminating object releases it
        let removable = is_removable(value);
        state.journal(Verb::Patch, &id);
        if removable {
            state.objects.remove(&id);
        }

        Ok(patched)
    }
}

fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).into_owned()
}

fn object_id<K: StoreObject>(namespace: &str, name: &str) -> ObjectId {
    ObjectId {
        kind: kind_of::<K>(),
        namespace: namespace.to_owned(),
        name: name.to_owned(),
    }
}

fn decode<K: StoreObject>(id: &ObjectId, value: &Value) -> Result<K> {
    serde_json::from_value(value.clone()).context(ConvertSnafu {
        kind: &id.kind,
        namespace: &id.namespace,
        name: &id.name,
    })
}

fn not_found<T>(id: &ObjectId) -> Result<T> {
    NotFoundSnafu {
        kind: &id.kind,
        namespace: &id.namespace,
        name: &id.name,
    }
    .fail()
}

fn is_removable(value: &Value) -> bool {
    let metadata = &value["metadata"];
    !metadata["deletionTimestamp"].is_null()
        && metadata["finalizers"]
            .as_array()
            .is_none_or(Vec::is_empty)
}
