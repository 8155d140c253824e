//! Read-only ingress rule store backed by cluster ingress resources.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::chain::ChainHandler;
use super::conversion::{convert_ingress, decode_ingress_rule_name, should_process_ingress};
use super::informer::{Informer, InformerEvent, ListWatch};
use super::queue::{RetryQueue, Task, TaskError, TaskFn};
use super::resource::{store_key, Ingress};
use crate::error::{ConfigError, Result};
use crate::lifecycle::StopSignal;
use crate::model::snapshot;
use crate::model::{
    Config, ConfigDescriptor, ConfigKind, ConfigPayload, Event, ProxyMeshConfig, INGRESS_RULE,
};
use crate::registry::{Handler, HandlerRegistry};
use crate::store::{ConfigStore, ConfigStoreCache};

const READ_ONLY: &str = "the ingress config store is a read-only view";
const INGRESS_RULES_ONLY: &str = "the ingress config store only serves ingress rules";

/// Options of an [`IngressController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Namespace whose ingresses are translated. Empty means every namespace.
    pub namespace: String,
    /// Suffix of service hostnames, e.g. `cluster.local`.
    pub domain_suffix: String,
    /// Delay before a failed task is retried.
    pub retry_delay: Duration,
    /// Attempts after which a failing task is dropped. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            domain_suffix: "cluster.local".to_string(),
            retry_delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// Derived ingress rules last dispatched, per ingress store key, sorted by key.
type DerivedRules = Mutex<HashMap<String, Vec<Config>>>;

/// Which ingresses the controller translates.
#[derive(Debug)]
struct Scope {
    mesh: ProxyMeshConfig,
    namespace: String,
}

impl Scope {
    fn owns(&self, ingress: &Ingress) -> bool {
        (self.namespace.is_empty() || ingress.metadata.namespace == self.namespace)
            && should_process_ingress(&self.mesh, ingress)
    }
}

/// Presents cluster ingresses as a read-only store of ingress rules.
///
/// Informer events are queued and handled by a chain whose first step holds
/// every event back until the informer synchronized. The translation step
/// converts the ingress into rules and dispatches one event per derived rule
/// that was added, changed or removed since the previous version.
pub struct IngressController {
    scope: Arc<Scope>,
    domain_suffix: String,
    descriptor: ConfigDescriptor,
    informer: Arc<Informer>,
    queue: Arc<RetryQueue<Ingress>>,
    handler: Arc<ChainHandler<Ingress>>,
    registry: Arc<HandlerRegistry>,
}

impl IngressController {
    pub fn new(source: Arc<dyn ListWatch>, mesh: ProxyMeshConfig, options: ControllerOptions) -> Self {
        let scope = Arc::new(Scope {
            mesh,
            namespace: options.namespace.clone(),
        });
        let informer = Arc::new(Informer::new(source, options.retry_delay));
        let queue = Arc::new(RetryQueue::new(options.retry_delay, options.max_attempts));
        let handler = Arc::new(ChainHandler::new());
        let registry = Arc::new(HandlerRegistry::new());

        // first step holds every event back until the replica is complete
        let gate = Arc::clone(&informer);
        handler.append(Arc::new(move |ingress: &Ingress, event: Event| {
            if !gate.has_synced() {
                return Err(TaskError::NotSynchronized);
            }
            log::debug!("Ingress event {} for {}", event, ingress.store_key());
            Ok(())
        }));

        handler.append(translation_step(
            Arc::clone(&scope),
            options.domain_suffix.clone(),
            Arc::clone(&registry),
        ));

        let apply: TaskFn<Ingress> = {
            let chain = Arc::clone(&handler);
            Arc::new(move |ingress: &Ingress, event: Event| chain.apply(ingress, event))
        };
        let tasks = Arc::clone(&queue);
        informer.add_event_handler(Arc::new(move |change: InformerEvent| match change {
            InformerEvent::Add(obj) => tasks.push(Task::new(Arc::clone(&apply), obj, Event::Add)),
            InformerEvent::Update { old, new } => {
                if old != new {
                    tasks.push(Task::new(Arc::clone(&apply), new, Event::Update));
                }
            }
            InformerEvent::Delete(obj) => {
                tasks.push(Task::new(Arc::clone(&apply), obj, Event::Delete))
            }
        }));

        Self {
            scope,
            domain_suffix: options.domain_suffix,
            descriptor: ConfigDescriptor::new(vec![ConfigKind::ingress_rule()]),
            informer,
            queue,
            handler,
            registry,
        }
    }

    /// Number of steps in the handler chain, the sync gate included.
    pub fn chain_len(&self) -> usize {
        self.handler.len()
    }

    /// Derives the ingress rules of an ingress this controller owns.
    fn derive(&self, ingress: &Ingress) -> Vec<Config> {
        if !self.scope.owns(ingress) {
            return Vec::new();
        }
        derived_configs(ingress, &self.domain_suffix)
    }
}

/// Converts an ingress into key-sorted ingress rule records.
fn derived_configs(ingress: &Ingress, domain_suffix: &str) -> Vec<Config> {
    let revision = &ingress.metadata.resource_version;
    convert_ingress(ingress, domain_suffix)
        .into_iter()
        .map(|(key, rule)| Config::new(INGRESS_RULE, key, revision.clone(), rule))
        .collect()
}

/// Builds the chain step that dispatches derived ingress rule changes.
fn translation_step(
    scope: Arc<Scope>,
    domain_suffix: String,
    registry: Arc<HandlerRegistry>,
) -> TaskFn<Ingress> {
    let derived: Arc<DerivedRules> = Arc::new(Mutex::new(HashMap::new()));

    Arc::new(move |ingress: &Ingress, event: Event| {
        let _span = tracing::debug_span!("ingress.translate", event = %event).entered();
        let new = if event == Event::Delete || !scope.owns(ingress) {
            Vec::new()
        } else {
            derived_configs(ingress, &domain_suffix)
        };

        let key = ingress.store_key();
        let events = {
            let mut derived = match derived.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let old = derived.remove(&key).unwrap_or_default();
            // a resource version bump alone does not change a derived rule
            let events = snapshot::diff_with(&old, &new, |o, n| o.payload != n.payload);
            if !new.is_empty() {
                derived.insert(key, new);
            }
            events
        };

        for (change, config) in &events {
            registry.dispatch(INGRESS_RULE, config, *change);
        }
        Ok(())
    })
}

impl ConfigStore for IngressController {
    fn descriptor(&self) -> &ConfigDescriptor {
        &self.descriptor
    }

    fn get(&self, type_name: &str, key: &str) -> Option<Config> {
        if type_name != INGRESS_RULE {
            return None;
        }

        let name = match decode_ingress_rule_name(key) {
            Ok(name) => name,
            Err(e) => {
                log::debug!("get ingress rule {}: {}", key, e);
                return None;
            }
        };
        let ingress = self
            .informer
            .get_by_key(&store_key(&name.name, &name.namespace))?;

        self.derive(&ingress).into_iter().find(|c| c.key == key)
    }

    fn list(&self, type_name: &str) -> Result<Vec<Config>> {
        if type_name != INGRESS_RULE {
            return Err(ConfigError::UnsupportedOperation(INGRESS_RULES_ONLY));
        }

        Ok(self
            .informer
            .list()
            .iter()
            .flat_map(|ingress| self.derive(ingress))
            .collect())
    }

    fn post(&self, _payload: ConfigPayload) -> Result<String> {
        Err(ConfigError::UnsupportedOperation(READ_ONLY))
    }

    fn put(&self, _payload: ConfigPayload, _revision: &str) -> Result<String> {
        Err(ConfigError::UnsupportedOperation(READ_ONLY))
    }

    fn delete(&self, _type_name: &str, _key: &str) -> Result<()> {
        Err(ConfigError::UnsupportedOperation(READ_ONLY))
    }
}

impl ConfigStoreCache for IngressController {
    fn register_event_handler(&self, type_name: &str, handler: Handler) {
        if type_name != INGRESS_RULE {
            log::warn!(
                "Ingress controller only emits {} events, handler for {} will never fire",
                INGRESS_RULE,
                type_name
            );
        }
        self.registry.register(type_name, handler);
    }

    fn has_synced(&self) -> bool {
        self.informer.has_synced()
    }

    /// Runs the informer and the queue on their own threads until stopped.
    fn run(&self, stop: StopSignal) {
        let informer = Arc::clone(&self.informer);
        let informer_stop = stop.clone();
        let informer_thread = thread::spawn(move || informer.run(informer_stop));

        let queue = Arc::clone(&self.queue);
        let queue_stop = stop.clone();
        let queue_thread = thread::spawn(move || queue.run(queue_stop));

        stop.wait();

        for (name, handle) in [("informer", informer_thread), ("queue", queue_thread)] {
            if let Err(e) = handle.join() {
                log::error!("Ingress {} thread panicked: {:?}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingress::informer::testing::FakeSource;
    use crate::ingress::resource::{
        HttpIngressPath, HttpIngressRuleValue, IngressBackend, IngressHostRule, IngressSpec,
        IntOrString, ObjectMeta, WatchEvent, INGRESS_CLASS_ANNOTATION,
    };
    use crate::lifecycle::Shutdown;
    use crate::model::{IngressControllerMode, IngressRule};
    use std::collections::BTreeMap;
    use std::time::Instant;

    fn ingress(name: &str, version: &str, paths: &[(&str, &str)]) -> Ingress {
        Ingress::new(
            ObjectMeta::new(name, "shop").with_resource_version(version),
            IngressSpec {
                rules: vec![IngressHostRule {
                    host: "shop.example.com".to_string(),
                    http: Some(HttpIngressRuleValue {
                        paths: paths
                            .iter()
                            .map(|(path, service)| HttpIngressPath {
                                path: path.to_string(),
                                backend: IngressBackend {
                                    service_name: service.to_string(),
                                    service_port: IntOrString::Int(80),
                                },
                            })
                            .collect(),
                    }),
                }],
                ..IngressSpec::default()
            },
        )
    }

    fn options() -> ControllerOptions {
        ControllerOptions {
            retry_delay: Duration::from_millis(5),
            ..ControllerOptions::default()
        }
    }

    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    type Seen = Arc<Mutex<Vec<(Event, String)>>>;

    fn record(controller: &IngressController) -> Seen {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        controller.register_event_handler(
            INGRESS_RULE,
            Arc::new(move |c: &Config, e: Event| {
                sink.lock().unwrap().push((e, c.key.clone()));
            }),
        );
        seen
    }

    fn run(controller: &Arc<IngressController>) -> (Shutdown, thread::JoinHandle<()>) {
        let shutdown = Shutdown::new();
        let stop = shutdown.subscribe();
        let runner = Arc::clone(controller);
        let handle = thread::spawn(move || runner.run(stop));
        (shutdown, handle)
    }

    #[test]
    fn test_writes_are_rejected() {
        let controller = IngressController::new(
            Arc::new(FakeSource::default()),
            ProxyMeshConfig::default(),
            options(),
        );
        let payload = ConfigPayload::IngressRule(IngressRule::default());

        assert_eq!(
            controller.post(payload.clone()),
            Err(ConfigError::UnsupportedOperation(READ_ONLY))
        );
        assert_eq!(
            controller.put(payload, "1"),
            Err(ConfigError::UnsupportedOperation(READ_ONLY))
        );
        assert_eq!(
            controller.delete(INGRESS_RULE, "web.shop.1-1"),
            Err(ConfigError::UnsupportedOperation(READ_ONLY))
        );
        assert!(matches!(
            controller.list("route-rule"),
            Err(ConfigError::UnsupportedOperation(_))
        ));
        assert_eq!(controller.descriptor().types(), vec![INGRESS_RULE]);
        assert_eq!(controller.chain_len(), 2);
    }

    #[test]
    fn test_events_dispatched_after_sync() {
        let source = Arc::new(FakeSource::with_items(vec![ingress(
            "web",
            "1",
            &[("/cart.*", "cart"), ("/login", "auth")],
        )]));
        let controller = Arc::new(IngressController::new(
            source.clone(),
            ProxyMeshConfig::default(),
            options(),
        ));
        let seen = record(&controller);
        assert!(!controller.has_synced());

        let (shutdown, handle) = run(&controller);
        wait_until(|| seen.lock().unwrap().len() == 2);
        assert!(controller.has_synced());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Event::Add, "web.shop.1-1".to_string()),
                (Event::Add, "web.shop.1-2".to_string()),
            ]
        );

        let listed = controller.list(INGRESS_RULE).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|c| c.revision == "1"));

        let rule = controller.get(INGRESS_RULE, "web.shop.1-2").unwrap();
        assert_eq!(rule.revision, "1");
        match &rule.payload {
            ConfigPayload::IngressRule(r) => {
                assert_eq!(r.destination, "auth.shop.svc.cluster.local")
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(controller.get(INGRESS_RULE, "web.shop.1-3").is_none());
        assert!(controller.get(INGRESS_RULE, "garbage").is_none());
        assert!(controller.get("route-rule", "web.shop.1-1").is_none());

        shutdown.trigger();
        handle.join().unwrap();
    }

    #[test]
    fn test_update_dispatches_precise_changes() {
        let source = Arc::new(FakeSource::with_items(vec![ingress(
            "web",
            "1",
            &[("/cart.*", "cart"), ("/login", "auth")],
        )]));
        let controller = Arc::new(IngressController::new(
            source.clone(),
            ProxyMeshConfig::default(),
            options(),
        ));
        let seen = record(&controller);
        let (shutdown, handle) = run(&controller);
        wait_until(|| seen.lock().unwrap().len() == 2);
        seen.lock().unwrap().clear();

        // path 1 unchanged, path 2 retargeted, path 3 added
        source.send(WatchEvent::Modified(ingress(
            "web",
            "2",
            &[("/cart.*", "cart"), ("/login", "sso"), ("/help", "docs")],
        )));
        wait_until(|| seen.lock().unwrap().len() == 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Event::Update, "web.shop.1-2".to_string()),
                (Event::Add, "web.shop.1-3".to_string()),
            ]
        );
        seen.lock().unwrap().clear();

        source.send(WatchEvent::Deleted(ingress("web", "3", &[])));
        wait_until(|| seen.lock().unwrap().len() == 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Event::Delete, "web.shop.1-1".to_string()),
                (Event::Delete, "web.shop.1-2".to_string()),
                (Event::Delete, "web.shop.1-3".to_string()),
            ]
        );

        shutdown.trigger();
        handle.join().unwrap();
    }

    #[test]
    fn test_foreign_ingress_class_is_ignored() {
        let mut foreign = ingress("other", "1", &[("/", "web")]);
        foreign.metadata = foreign
            .metadata
            .with_annotation(INGRESS_CLASS_ANNOTATION, "nginx");
        let ours = ingress("web", "1", &[("/", "web")]);
        let source = Arc::new(FakeSource::with_items(vec![foreign, ours]));

        let mesh = ProxyMeshConfig {
            ingress_controller_mode: IngressControllerMode::Default,
            ..ProxyMeshConfig::default()
        };
        let controller = Arc::new(IngressController::new(source.clone(), mesh, options()));
        let seen = record(&controller);
        let (shutdown, handle) = run(&controller);

        wait_until(|| controller.has_synced() && !seen.lock().unwrap().is_empty());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Event::Add, "web.shop.1-1".to_string())]
        );
        assert!(controller.get(INGRESS_RULE, "other.shop.1-1").is_none());
        assert_eq!(controller.list(INGRESS_RULE).unwrap().len(), 1);

        shutdown.trigger();
        handle.join().unwrap();
    }

    #[test]
    fn test_other_namespaces_are_ignored() {
        let mut elsewhere = ingress("web", "1", &[("/", "web")]);
        elsewhere.metadata.namespace = "billing".to_string();
        let ours = ingress("web", "1", &[("/", "web")]);
        let source = Arc::new(FakeSource::with_items(vec![elsewhere, ours]));

        let controller = Arc::new(IngressController::new(
            source,
            ProxyMeshConfig::default(),
            ControllerOptions {
                namespace: "shop".to_string(),
                ..options()
            },
        ));
        let seen = record(&controller);
        let (shutdown, handle) = run(&controller);

        wait_until(|| controller.has_synced() && !seen.lock().unwrap().is_empty());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Event::Add, "web.shop.1-1".to_string())]
        );
        assert!(controller.get(INGRESS_RULE, "web.billing.1-1").is_none());

        shutdown.trigger();
        handle.join().unwrap();
    }

    /// Handler-side view of the derived rules, built from dispatched events only.
    fn track(controller: &IngressController) -> Arc<Mutex<BTreeMap<String, ConfigPayload>>> {
        let state = Arc::new(Mutex::new(BTreeMap::new()));
        let sink = Arc::clone(&state);
        controller.register_event_handler(
            INGRESS_RULE,
            Arc::new(move |c: &Config, e: Event| {
                let mut state = sink.lock().unwrap();
                match e {
                    Event::Add | Event::Update => {
                        state.insert(c.key.clone(), c.payload.clone());
                    }
                    Event::Delete => {
                        state.remove(&c.key);
                    }
                }
            }),
        );
        state
    }

    fn listed(controller: &IngressController) -> BTreeMap<String, ConfigPayload> {
        controller
            .list(INGRESS_RULE)
            .unwrap()
            .into_iter()
            .map(|c| (c.key, c.payload))
            .collect()
    }

    /// Starts a controller whose initial adds reach the queue before the
    /// informer reports synchronized, so they wait a full retry delay.
    fn start_with_deferred_adds(
        items: Vec<Ingress>,
    ) -> (
        Arc<FakeSource>,
        Arc<IngressController>,
        Seen,
        Arc<Mutex<BTreeMap<String, ConfigPayload>>>,
        Shutdown,
        thread::JoinHandle<()>,
    ) {
        let source = Arc::new(FakeSource::with_items(items));
        let controller = Arc::new(IngressController::new(
            source.clone(),
            ProxyMeshConfig::default(),
            ControllerOptions {
                retry_delay: Duration::from_millis(300),
                ..ControllerOptions::default()
            },
        ));
        controller
            .informer
            .add_event_handler(Arc::new(|_: InformerEvent| {
                thread::sleep(Duration::from_millis(50))
            }));
        let seen = record(&controller);
        let state = track(&controller);
        let (shutdown, handle) = run(&controller);

        wait_until(|| controller.has_synced() && source.watch_count() == 1);
        (source, controller, seen, state, shutdown, handle)
    }

    #[test]
    fn test_delete_after_sync_does_not_overtake_deferred_add() {
        let (source, controller, seen, state, shutdown, handle) =
            start_with_deferred_adds(vec![ingress("web", "1", &[("/", "web")])]);

        source.send(WatchEvent::Deleted(ingress("web", "1", &[("/", "web")])));
        wait_until(|| seen.lock().unwrap().len() == 2);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Event::Add, "web.shop.1-1".to_string()),
                (Event::Delete, "web.shop.1-1".to_string()),
            ]
        );
        assert!(listed(&controller).is_empty());
        assert_eq!(*state.lock().unwrap(), listed(&controller));

        shutdown.trigger();
        handle.join().unwrap();
    }

    #[test]
    fn test_modify_after_sync_does_not_overtake_deferred_add() {
        let (source, controller, seen, state, shutdown, handle) =
            start_with_deferred_adds(vec![ingress("web", "1", &[("/", "web")])]);

        source.send(WatchEvent::Modified(ingress("web", "2", &[("/", "api")])));
        wait_until(|| seen.lock().unwrap().len() == 2);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Event::Add, "web.shop.1-1".to_string()),
                (Event::Update, "web.shop.1-1".to_string()),
            ]
        );
        let current = listed(&controller);
        match current.get("web.shop.1-1") {
            Some(ConfigPayload::IngressRule(r)) => {
                assert_eq!(r.destination, "api.shop.svc.cluster.local")
            }
            other => panic!("unexpected rule {:?}", other),
        }
        assert_eq!(*state.lock().unwrap(), current);

        shutdown.trigger();
        handle.join().unwrap();
    }
}
