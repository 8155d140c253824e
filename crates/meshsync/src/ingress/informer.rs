//! List+watch informer keeping a local replica of the cluster ingresses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crossbeam_channel::{select, Receiver};

use super::resource::{Ingress, IngressList, WatchEvent};
use crate::error::Result;
use crate::lifecycle::StopSignal;

/// Upper bound of the delay between failed list or watch attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Source of ingress resources: a full listing plus a stream of changes.
pub trait ListWatch: Send + Sync {
    /// Lists every ingress.
    fn list(&self) -> Result<IngressList>;

    /// Streams changes after the given resource version. The stream ends when
    /// the sender is dropped, which makes the informer list again.
    fn watch(&self, resource_version: &str) -> Result<Receiver<WatchEvent>>;
}

/// Change observed by the informer.
#[derive(Debug, Clone, PartialEq)]
pub enum InformerEvent {
    Add(Ingress),
    Update { old: Ingress, new: Ingress },
    Delete(Ingress),
}

/// Callback receiving informer events.
pub type EventCallback = Arc<dyn Fn(InformerEvent) + Send + Sync>;

/// Keeps a replica of the source, readable concurrently, and reports changes.
pub struct Informer {
    source: Arc<dyn ListWatch>,
    store: RwLock<HashMap<String, Ingress>>,
    synced: AtomicBool,
    callbacks: RwLock<Vec<EventCallback>>,
    retry_delay: Duration,
}

impl Informer {
    pub fn new(source: Arc<dyn ListWatch>, retry_delay: Duration) -> Self {
        Self {
            source,
            store: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
            callbacks: RwLock::new(Vec::new()),
            retry_delay,
        }
    }

    /// Registers a callback for every subsequent change.
    pub fn add_event_handler(&self, callback: EventCallback) {
        let mut callbacks = match self.callbacks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        callbacks.push(callback);
    }

    /// Returns true once the first listing has been stored and reported.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Looks up an object by its store key (`namespace/name`).
    pub fn get_by_key(&self, key: &str) -> Option<Ingress> {
        self.read_store().get(key).cloned()
    }

    /// Every stored object, ordered by store key.
    pub fn list(&self) -> Vec<Ingress> {
        let store = self.read_store();
        let mut items: Vec<Ingress> = store.values().cloned().collect();
        items.sort_by_key(Ingress::store_key);
        items
    }

    /// Lists and watches the source until the stop signal fires.
    pub fn run(&self, stop: StopSignal) {
        log::info!("Ingress informer started");
        let mut backoff = self.retry_delay;

        'outer: while !stop.is_stopped() {
            let listing = match self.source.list() {
                Ok(listing) => listing,
                Err(e) => {
                    log::warn!("Failed to list ingresses, retrying in {:?}: {}", backoff, e);
                    if stop.wait_timeout(backoff) {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            let resource_version = listing.resource_version.clone();
            self.replace(listing);

            let changes = match self.source.watch(&resource_version) {
                Ok(changes) => changes,
                Err(e) => {
                    log::warn!("Failed to watch ingresses, retrying in {:?}: {}", backoff, e);
                    if stop.wait_timeout(backoff) {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };
            backoff = self.retry_delay;

            loop {
                select! {
                    recv(changes) -> msg => match msg {
                        Ok(event) => self.apply(event),
                        Err(_) => {
                            log::debug!("Ingress watch closed, listing again");
                            break;
                        }
                    },
                    recv(stop.receiver()) -> _ => break 'outer,
                }
            }
        }

        log::info!("Ingress informer stopped");
    }

    /// Replaces the replica with a full listing.
    ///
    /// New objects are reported as adds, known ones as updates and objects
    /// missing from the listing as deletes.
    fn replace(&self, listing: IngressList) {
        let events = {
            let mut store = self.write_store();
            let mut previous = std::mem::take(&mut *store);
            let mut events = Vec::with_capacity(listing.items.len());

            for item in listing.items {
                let key = item.store_key();
                match previous.remove(&key) {
                    Some(old) => events.push(InformerEvent::Update {
                        old,
                        new: item.clone(),
                    }),
                    None => events.push(InformerEvent::Add(item.clone())),
                }
                store.insert(key, item);
            }

            let mut vanished: Vec<Ingress> = previous.into_values().collect();
            vanished.sort_by_key(Ingress::store_key);
            events.extend(vanished.into_iter().map(InformerEvent::Delete));
            events
        };

        log::debug!("Ingress listing replaced the store ({} change(s))", events.len());
        for event in events {
            self.notify(event);
        }

        if !self.synced.swap(true, Ordering::AcqRel) {
            log::info!("Ingress informer synchronized");
        }
    }

    fn apply(&self, event: WatchEvent) {
        log::trace!("Watch event for {}", event.object().store_key());
        let change = {
            let mut store = self.write_store();
            match event {
                WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                    match store.insert(obj.store_key(), obj.clone()) {
                        Some(old) => InformerEvent::Update { old, new: obj },
                        None => InformerEvent::Add(obj),
                    }
                }
                WatchEvent::Deleted(obj) => {
                    let last = store.remove(&obj.store_key()).unwrap_or(obj);
                    InformerEvent::Delete(last)
                }
            }
        };
        self.notify(change);
    }

    fn notify(&self, event: InformerEvent) {
        let callbacks: Vec<EventCallback> = match self.callbacks.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for callback in callbacks {
            callback(event.clone());
        }
    }

    fn read_store(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Ingress>> {
        match self.store.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_store(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Ingress>> {
        match self.store.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory list+watch source for tests.

    use std::sync::Mutex;

    use crossbeam_channel::{unbounded, Sender};

    use super::*;
    use crate::error::ConfigError;

    /// Serves a fixed listing and hands out watch streams fed by the test.
    #[derive(Default)]
    pub struct FakeSource {
        pub items: Mutex<Vec<Ingress>>,
        pub fail_lists: Mutex<u32>,
        watchers: Mutex<Vec<Sender<WatchEvent>>>,
    }

    impl FakeSource {
        pub fn with_items(items: Vec<Ingress>) -> Self {
            Self {
                items: Mutex::new(items),
                ..Self::default()
            }
        }

        /// Sends an event to every open watch.
        pub fn send(&self, event: WatchEvent) {
            let watchers = self.watchers.lock().unwrap();
            for tx in watchers.iter() {
                let _ = tx.send(event.clone());
            }
        }

        /// Closes every open watch.
        pub fn close_watches(&self) {
            self.watchers.lock().unwrap().clear();
        }

        pub fn watch_count(&self) -> usize {
            self.watchers.lock().unwrap().len()
        }
    }

    impl ListWatch for FakeSource {
        fn list(&self) -> Result<IngressList> {
            let mut fail = self.fail_lists.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(ConfigError::TransientBackend("list refused".to_string()));
            }
            Ok(IngressList {
                items: self.items.lock().unwrap().clone(),
                resource_version: "1".to_string(),
            })
        }

        fn watch(&self, _resource_version: &str) -> Result<Receiver<WatchEvent>> {
            let (tx, rx) = unbounded();
            self.watchers.lock().unwrap().push(tx);
            Ok(rx)
        }
    }
}
