//! Polling monitor that turns periodic store listings into change events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crossbeam_channel::select;

use crate::lifecycle::StopSignal;
use crate::model::snapshot;
use crate::model::{Config, ConfigDescriptor};
use crate::registry::{Handler, HandlerRegistry};
use crate::store::ConfigStore;

/// Lifecycle of a [`ConfigsMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Created,
    Running,
    Stopped,
}

/// Periodically lists a store and dispatches the differences since the last cycle.
///
/// Each cycle lists every kind of the descriptor, sorts the listing by key,
/// diffs it against the cached snapshot, dispatches the resulting events and
/// then replaces the cache.
pub struct ConfigsMonitor {
    store: Arc<dyn ConfigStore>,
    descriptor: ConfigDescriptor,
    period: Duration,
    cache: RwLock<HashMap<String, Vec<Config>>>,
    handlers: HandlerRegistry,
    state: Mutex<MonitorState>,
    // serializes cycles; readers only take the cache lock
    cycle: Mutex<()>,
}

impl ConfigsMonitor {
    /// Creates a monitor with an empty snapshot for every kind.
    pub fn new(store: Arc<dyn ConfigStore>, descriptor: ConfigDescriptor, period: Duration) -> Self {
        let cache = descriptor
            .types()
            .into_iter()
            .map(|t| (t.to_string(), Vec::new()))
            .collect();
        Self {
            store,
            descriptor,
            period,
            cache: RwLock::new(cache),
            handlers: HandlerRegistry::new(),
            state: Mutex::new(MonitorState::Created),
            cycle: Mutex::new(()),
        }
    }

    /// Appends a handler for changes of a type.
    pub fn append_event_handler(&self, type_name: &str, handler: Handler) {
        self.handlers.register(type_name, handler);
    }

    /// Returns the registry the monitor dispatches through.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn state(&self) -> MonitorState {
        *self.lock_state()
    }

    /// Runs cycles every period until the stop signal fires.
    ///
    /// Blocks the calling thread. A monitor runs at most once.
    pub fn start(&self, stop: StopSignal) {
        {
            let mut state = self.lock_state();
            if *state != MonitorState::Created {
                log::warn!("Config monitor already started (state {:?})", *state);
                return;
            }
            *state = MonitorState::Running;
        }

        log::info!(
            "Config monitor started for {:?} every {:?}",
            self.descriptor.types(),
            self.period
        );

        let ticker = crossbeam_channel::tick(self.period);
        loop {
            select! {
                recv(ticker) -> _ => self.update_config_record(),
                recv(stop.receiver()) -> _ => break,
            }
        }

        *self.lock_state() = MonitorState::Stopped;
        log::info!("Config monitor stopped");
    }

    /// Runs a single cycle over every kind.
    ///
    /// A kind whose listing fails keeps its cached snapshot; the other kinds
    /// are still processed.
    pub fn update_config_record(&self) {
        let _cycle = match self.cycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _span = tracing::debug_span!("monitor.cycle").entered();

        for type_name in self.descriptor.types() {
            let listing = match self.store.list(type_name) {
                Ok(listing) => listing,
                Err(e) => {
                    log::warn!("Unable to fetch configs of type {}: {}", type_name, e);
                    continue;
                }
            };
            let new = snapshot::normalize(listing);
            let old = self.cached(type_name);

            let events = snapshot::diff(&old, &new);
            if !events.is_empty() {
                log::debug!("{} change(s) detected for type {}", events.len(), type_name);
            }
            for (event, config) in &events {
                self.handlers.dispatch(type_name, config, *event);
            }

            let mut cache = match self.cache.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            cache.insert(type_name.to_string(), new);
        }
    }

    /// The last committed snapshot of a type, sorted by key.
    pub fn cached(&self, type_name: &str) -> Vec<Config> {
        let cache = match self.cache.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.get(type_name).cloned().unwrap_or_default()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
