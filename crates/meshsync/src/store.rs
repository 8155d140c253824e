//! Configuration store interfaces and the in-memory store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::error::{ConfigError, Result, ValidationErrors};
use crate::lifecycle::StopSignal;
use crate::model::{Config, ConfigDescriptor, ConfigPayload};
use crate::registry::Handler;

/// A typed configuration backend.
///
/// Object references are `(type, key)` pairs. Writes carry the payload only;
/// the store derives the type and key from its descriptor.
pub trait ConfigStore: Send + Sync {
    /// The kinds this store understands.
    fn descriptor(&self) -> &ConfigDescriptor;

    /// Fetches one object.
    fn get(&self, type_name: &str, key: &str) -> Option<Config>;

    /// Lists every object of a type.
    fn list(&self, type_name: &str) -> Result<Vec<Config>>;

    /// Adds a new object, returning its revision.
    fn post(&self, payload: ConfigPayload) -> Result<String>;

    /// Replaces an existing object at the given revision, returning the new revision.
    fn put(&self, payload: ConfigPayload, revision: &str) -> Result<String>;

    /// Removes an object.
    fn delete(&self, type_name: &str, key: &str) -> Result<()>;
}

/// A store that keeps a local replica and notifies handlers about changes.
pub trait ConfigStoreCache: ConfigStore {
    /// Appends a handler for changes of a type.
    fn register_event_handler(&self, type_name: &str, handler: Handler);

    /// Returns true once the local replica reflects the backend.
    fn has_synced(&self) -> bool;

    /// Runs the cache until the stop signal fires.
    fn run(&self, stop: StopSignal);
}

// ============================================================================
// In-memory store
// ============================================================================

/// Pull-style store holding every object in memory.
///
/// Payloads are validated on every write; a rejected write changes nothing.
pub struct MemoryStore {
    descriptor: ConfigDescriptor,
    data: RwLock<HashMap<String, HashMap<String, Config>>>,
    revision: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store for the kinds of `descriptor`.
    ///
    /// An invalid descriptor is logged; writes of a kind without a key
    /// function are rejected.
    pub fn new(descriptor: ConfigDescriptor) -> Self {
        if let Err(errs) = descriptor.validate() {
            log::error!("Memory store created with an invalid descriptor: {}", errs);
        }
        let data = descriptor
            .types()
            .into_iter()
            .map(|t| (t.to_string(), HashMap::new()))
            .collect();
        Self {
            descriptor,
            data: RwLock::new(data),
            revision: AtomicU64::new(0),
        }
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Resolves the type and key of a payload and validates it.
    fn admit(&self, payload: &ConfigPayload) -> Result<(String, String)> {
        let kind = self
            .descriptor
            .kind_for(payload)
            .ok_or_else(|| ConfigError::UnknownType(payload.schema().to_string()))?;
        self.descriptor
            .validate_config(&kind.type_name, Some(payload))?;
        let key = kind.key_of(payload).ok_or_else(|| {
            ValidationErrors::from(format!("kind {} has no key function", kind.type_name))
        })?;
        Ok((kind.type_name.clone(), key))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, HashMap<String, Config>>> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, HashMap<String, Config>>> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn descriptor(&self) -> &ConfigDescriptor {
        &self.descriptor
    }

    fn get(&self, type_name: &str, key: &str) -> Option<Config> {
        self.read().get(type_name)?.get(key).cloned()
    }

    fn list(&self, type_name: &str) -> Result<Vec<Config>> {
        let data = self.read();
        let objects = data
            .get(type_name)
            .ok_or_else(|| ConfigError::UnknownType(type_name.to_string()))?;
        Ok(objects.values().cloned().collect())
    }

    fn post(&self, payload: ConfigPayload) -> Result<String> {
        let (type_name, key) = self.admit(&payload)?;
        let mut data = self.write();
        let objects = data.entry(type_name.clone()).or_default();
        if objects.contains_key(&key) {
            return Err(ConfigError::AlreadyExists {
                kind: type_name,
                key,
            });
        }

        let revision = self.next_revision();
        log::debug!("Created {}/{} at revision {}", type_name, key, revision);
        objects.insert(
            key.clone(),
            Config::new(type_name, key, revision.clone(), payload),
        );
        Ok(revision)
    }

    fn put(&self, payload: ConfigPayload, revision: &str) -> Result<String> {
        let (type_name, key) = self.admit(&payload)?;
        let mut data = self.write();
        let objects = data.entry(type_name.clone()).or_default();
        let current = objects.get(&key).ok_or_else(|| ConfigError::NotFound {
            kind: type_name.clone(),
            key: key.clone(),
        })?;
        if current.revision != revision {
            return Err(ConfigError::RevisionConflict {
                kind: type_name,
                key,
                expected: revision.to_string(),
                actual: current.revision.clone(),
            });
        }

        let next = self.next_revision();
        log::debug!("Updated {}/{} to revision {}", type_name, key, next);
        objects.insert(key.clone(), Config::new(type_name, key, next.clone(), payload));
        Ok(next)
    }

    fn delete(&self, type_name: &str, key: &str) -> Result<()> {
        let mut data = self.write();
        let objects = data
            .get_mut(type_name)
            .ok_or_else(|| ConfigError::UnknownType(type_name.to_string()))?;
        if objects.remove(key).is_none() {
            return Err(ConfigError::NotFound {
                kind: type_name.to_string(),
                key: key.to_string(),
            });
        }
        log::debug!("Deleted {}/{}", type_name, key);
        Ok(())
    }
}
