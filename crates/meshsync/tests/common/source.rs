//! In-memory list+watch source.

use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use meshsync::ingress::{Ingress, IngressList, ListWatch, WatchEvent};
use meshsync::{ConfigError, Result};

/// Serves the current object set and feeds watch streams from the test.
#[derive(Default)]
pub struct ChannelSource {
    items: Mutex<Vec<Ingress>>,
    version: Mutex<u64>,
    watchers: Mutex<Vec<Sender<WatchEvent>>>,
    failures: Mutex<u32>,
}

impl ChannelSource {
    pub fn new(items: Vec<Ingress>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    /// Makes the next `n` listings fail.
    pub fn fail_next_lists(&self, n: u32) {
        *self.failures.lock().unwrap() = n;
    }

    /// Applies an event to the object set and sends it to every open watch.
    pub fn emit(&self, event: WatchEvent) {
        {
            let mut items = self.items.lock().unwrap();
            let key = event.object().store_key();
            items.retain(|i| i.store_key() != key);
            if !matches!(event, WatchEvent::Deleted(_)) {
                items.push(event.object().clone());
            }
            *self.version.lock().unwrap() += 1;
        }
        for tx in self.watchers.lock().unwrap().iter() {
            let _ = tx.send(event.clone());
        }
    }

    pub fn watch_count(&self) -> usize {
        self.watchers.lock().unwrap().len()
    }
}

impl ListWatch for ChannelSource {
    fn list(&self) -> Result<IngressList> {
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(ConfigError::TransientBackend("connection refused".to_string()));
        }
        Ok(IngressList {
            items: self.items.lock().unwrap().clone(),
            resource_version: self.version.lock().unwrap().to_string(),
        })
    }

    fn watch(&self, _resource_version: &str) -> Result<Receiver<WatchEvent>> {
        let (tx, rx) = unbounded();
        self.watchers.lock().unwrap().push(tx);
        Ok(rx)
    }
}
