use super::{object_name, Object, ObjectStore, StoreError};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc};

/// An in-process [`ObjectStore`] following the API server's write semantics:
/// resource versions, conflicts on stale writes, a status subresource that
/// plain updates cannot change, and deletion held back by finalizers.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    version: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

// === impl MemoryStore ===

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains<K: Object>(&self, namespace: &str, name: &str) -> bool {
        self.inner
            .lock()
            .objects
            .contains_key(&Key::of::<K>(namespace, name))
    }

    /// Lists the names of stored objects of kind `K` in `namespace`.
    pub fn names<K: Object>(&self, namespace: &str) -> Vec<String> {
        let kind = Key::of::<K>(namespace, "");
        self.inner
            .lock()
            .objects
            .keys()
            .filter(|k| {
                k.api_version == kind.api_version
                    && k.kind == kind.kind
                    && k.namespace == kind.namespace
            })
            .map(|k| k.name.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        let value = self
            .inner
            .lock()
            .objects
            .get(&Key::of::<K>(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::not_found::<K>(namespace, name))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = object_name(obj)?;
        let key = Key::of::<K>(namespace, &name);
        let mut value = serde_json::to_value(obj)?;

        let mut inner = self.inner.lock();
        if inner.objects.contains_key(&key) {
            return Err(StoreError::already_exists::<K>(namespace, &name));
        }

        let version = inner.next_version();
        let meta = metadata_mut(&mut value)?;
        meta.insert("namespace".into(), namespace.into());
        meta.insert("resourceVersion".into(), version.clone().into());
        meta.insert("uid".into(), format!("uid-{version}").into());
        meta.insert("creationTimestamp".into(), now().into());
        meta.remove("deletionTimestamp");
        if let Some(obj) = value.as_object_mut() {
            obj.remove("status");
        }

        inner.objects.insert(key, value.clone());
        drop(inner);
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = object_name(obj)?;
        let key = Key::of::<K>(namespace, &name);
        let mut value = serde_json::to_value(obj)?;

        let mut inner = self.inner.lock();
        let stored = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found::<K>(namespace, &name))?;
        if !precondition_holds(&value, &stored) {
            return Err(StoreError::conflict::<K>(namespace, &name));
        }

        let version = inner.next_version();
        let meta = metadata_mut(&mut value)?;
        meta.insert("namespace".into(), namespace.into());
        meta.insert("resourceVersion".into(), version.into());
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            match stored.pointer(&format!("/metadata/{field}")) {
                Some(v) => meta.insert(field.into(), v.clone()),
                None => meta.remove(field),
            };
        }
        let deleting = meta.contains_key("deletionTimestamp");
        let finalized = meta
            .get("finalizers")
            .and_then(Value::as_array)
            .map_or(true, |f| f.is_empty());
        if let Some(obj) = value.as_object_mut() {
            match stored.get("status") {
                Some(status) => obj.insert("status".into(), status.clone()),
                None => obj.remove("status"),
            };
        }

        if deleting && finalized {
            inner.objects.remove(&key);
        } else {
            inner.objects.insert(key, value.clone());
        }
        drop(inner);
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = object_name(obj)?;
        let key = Key::of::<K>(namespace, &name);
        let value = serde_json::to_value(obj)?;

        let mut inner = self.inner.lock();
        let mut stored = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found::<K>(namespace, &name))?;
        if !precondition_holds(&value, &stored) {
            return Err(StoreError::conflict::<K>(namespace, &name));
        }

        let version = inner.next_version();
        metadata_mut(&mut stored)?.insert("resourceVersion".into(), version.into());
        if let Some(obj) = stored.as_object_mut() {
            match value.get("status") {
                Some(status) if !status.is_null() => obj.insert("status".into(), status.clone()),
                _ => obj.remove("status"),
            };
        }

        inner.objects.insert(key, stored.clone());
        drop(inner);
        Ok(serde_json::from_value(stored)?)
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = Key::of::<K>(namespace, name);

        let mut inner = self.inner.lock();
        let mut stored = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found::<K>(namespace, name))?;
        let finalized = stored
            .pointer("/metadata/finalizers")
            .and_then(Value::as_array)
            .map_or(true, |f| f.is_empty());
        if finalized {
            inner.objects.remove(&key);
            return Ok(());
        }

        if stored.pointer("/metadata/deletionTimestamp").is_none() {
            let version = inner.next_version();
            let meta = metadata_mut(&mut stored)?;
            meta.insert("deletionTimestamp".into(), now().into());
            meta.insert("resourceVersion".into(), version.into());
            inner.objects.insert(key, stored);
        }
        Ok(())
    }
}

// === impl Inner ===

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

// === impl Key ===

impl Key {
    fn of<K: Object>(namespace: &str, name: &str) -> Self {
        Self {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// A write without a resource version is unconditional.
fn precondition_holds(update: &Value, stored: &Value) -> bool {
    match resource_version(update).filter(|v| !v.is_empty()) {
        Some(version) => resource_version(stored) == Some(version),
        None => true,
    }
}

fn resource_version(value: &Value) -> Option<&str> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}

fn metadata_mut(value: &mut Value) -> Result<&mut Map<String, Value>, StoreError> {
    value
        .as_object_mut()
        .ok_or(StoreError::Invalid("object is not a map"))?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or(StoreError::Invalid("metadata is not a map"))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
