//! Bridges the cluster watch stream to the registry and the resource surface
//!
//! Events for one object arrive in order, so each event is applied on its
//! own: add/update put the fresh snapshot and advertise the key, delete
//! retracts the key and drops the snapshot. Failures are logged and never
//! escape the handler.

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    cache::{
        key::ResourceKey,
        registry::{ResourceRegistry, Snapshot},
    },
    errors::CacheError,
};

/// Resolves a key against live state at call time.
pub type LookupFn = Arc<dyn Fn(&ResourceKey) -> Result<String, CacheError> + Send + Sync>;

/// Objects that can be mirrored into the registry.
pub trait Mirrored: Serialize + Send + Sync {
    fn namespace(&self) -> &str;
    fn name(&self) -> &str;
}

/// Receiver of ordered per-object change notifications.
pub trait EventHandler<T>: Send + Sync {
    fn on_added(&self, object: &T);
    fn on_updated(&self, old: &T, new: &T);
    fn on_deleted(&self, object: &T);
}

/// The protocol-side listing of readable resources.
pub trait ExposureSurface: Send + Sync {
    fn advertise(
        &self,
        key: &ResourceKey,
        display_name: &str,
        lookup: LookupFn,
    ) -> Result<(), CacheError>;

    fn retract(&self, key: &ResourceKey) -> Result<(), CacheError>;
}

pub struct Synchronizer<T> {
    kind: &'static str,
    registry: Arc<ResourceRegistry>,
    surface: Arc<dyn ExposureSurface>,
    sequence: AtomicU64,
    _object: PhantomData<fn(&T)>,
}

impl<T: Mirrored> Synchronizer<T> {
    pub fn new(
        kind: &'static str,
        registry: Arc<ResourceRegistry>,
        surface: Arc<dyn ExposureSurface>,
    ) -> Self {
        Self {
            kind,
            registry,
            surface,
            sequence: AtomicU64::new(0),
            _object: PhantomData,
        }
    }

    fn key_for(&self, object: &T) -> Option<ResourceKey> {
        if object.namespace().is_empty() || object.name().is_empty() {
            warn!(
                kind = self.kind,
                namespace = object.namespace(),
                name = object.name(),
                "ignoring event for object without namespace or name"
            );
            return None;
        }

        Some(ResourceKey::new(self.kind, object.namespace(), object.name()))
    }

    fn lookup_fn(&self) -> LookupFn {
        let registry = Arc::clone(&self.registry);
        Arc::new(move |key: &ResourceKey| registry.lookup(key))
    }

    fn upsert(&self, object: &T) {
        let Some(key) = self.key_for(object) else {
            return;
        };

        let payload = match serde_json::to_value(object) {
            Ok(payload) => payload,
            Err(source) => {
                let err = CacheError::Serialization {
                    key: key.to_string(),
                    source,
                };
                warn!(key = %key, error = %err, "dropping event, keeping previous snapshot");
                return;
            }
        };

        let observed_at = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Snapshot::new(key.clone(), object.name(), payload, observed_at);
        let replaced = self.registry.put(key.clone(), snapshot);

        if let Err(err) = self
            .surface
            .advertise(&key, object.name(), self.lookup_fn())
        {
            warn!(key = %key, error = %err, "failed to advertise resource");
        }

        if replaced.is_some() {
            debug!(key = %key, observed_at, "resource updated");
        } else {
            info!(key = %key, observed_at, "resource added");
        }
    }

    fn delete(&self, object: &T) {
        let Some(key) = self.key_for(object) else {
            return;
        };

        if let Err(err) = self.surface.retract(&key) {
            warn!(key = %key, error = %err, "failed to retract resource");
        }

        match self.registry.remove(&key) {
            Some(_) => info!(key = %key, "resource removed"),
            None => debug!(key = %key, "delete for unknown resource ignored"),
        }
    }
}

impl<T: Mirrored> EventHandler<T> for Synchronizer<T> {
    fn on_added(&self, object: &T) {
        self.upsert(object);
    }

    fn on_updated(&self, _old: &T, new: &T) {
        self.upsert(new);
    }

    fn on_deleted(&self, object: &T) {
        self.delete(object);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
        thread,
    };

    use serde::{Serialize, Serializer};
    use serde_json::{json, Value};

    use super::{EventHandler, ExposureSurface, LookupFn, Mirrored, Synchronizer};
    use crate::{
        cache::{
            key::{ResourceKey, PIPELINE_RUN_KIND},
            registry::ResourceRegistry,
        },
        errors::CacheError,
    };

    #[derive(Debug, Clone, Serialize)]
    struct Run {
        namespace: String,
        name: String,
        body: Value,
    }

    impl Mirrored for Run {
        fn namespace(&self) -> &str {
            &self.namespace
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn run(namespace: &str, name: &str, body: Value) -> Run {
        Run {
            namespace: namespace.to_string(),
            name: name.to_string(),
            body,
        }
    }

    /// Serializes only while `healthy` is true.
    struct Flaky {
        namespace: String,
        name: String,
        healthy: bool,
    }

    impl Serialize for Flaky {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            if self.healthy {
                serializer.serialize_str(&self.name)
            } else {
                Err(serde::ser::Error::custom("unrepresentable payload"))
            }
        }
    }

    impl Mirrored for Flaky {
        fn namespace(&self) -> &str {
            &self.namespace
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[derive(Default)]
    struct RecordingSurface {
        advertised: Mutex<BTreeMap<String, (String, LookupFn)>>,
        retracted: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingSurface {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn read(&self, uri: &str) -> Result<String, CacheError> {
            let key: ResourceKey = uri.parse()?;
            let lookup = self
                .advertised
                .lock()
                .expect("surface lock")
                .get(uri)
                .map(|(_, lookup)| Arc::clone(lookup))
                .ok_or(CacheError::NotFound {
                    key: uri.to_string(),
                })?;
            lookup(&key)
        }
    }

    impl ExposureSurface for RecordingSurface {
        fn advertise(
            &self,
            key: &ResourceKey,
            display_name: &str,
            lookup: LookupFn,
        ) -> Result<(), CacheError> {
            if self.fail {
                return Err(CacheError::Exposure {
                    key: key.to_string(),
                    message: "surface offline".to_string(),
                });
            }
            self.advertised
                .lock()
                .expect("surface lock")
                .insert(key.to_string(), (display_name.to_string(), lookup));
            Ok(())
        }

        fn retract(&self, key: &ResourceKey) -> Result<(), CacheError> {
            self.retracted
                .lock()
                .expect("surface lock")
                .push(key.to_string());
            if self.fail {
                return Err(CacheError::Exposure {
                    key: key.to_string(),
                    message: "surface offline".to_string(),
                });
            }
            self.advertised
                .lock()
                .expect("surface lock")
                .remove(&key.to_string());
            Ok(())
        }
    }

    fn synchronizer<T: Mirrored>(
        surface: Arc<RecordingSurface>,
    ) -> (Synchronizer<T>, Arc<ResourceRegistry>) {
        let registry = ResourceRegistry::new_shared();
        let sync = Synchronizer::new(PIPELINE_RUN_KIND, Arc::clone(&registry), surface);
        (sync, registry)
    }

    const BUILD_1: &str = "tekton://ns1/pipelinerun/build-1";

    #[test]
    fn added_object_is_readable_by_key() {
        let surface = Arc::new(RecordingSurface::default());
        let (sync, registry) = synchronizer(Arc::clone(&surface));

        sync.on_added(&run("ns1", "build-1", json!("P1")));

        let key: ResourceKey = BUILD_1.parse().expect("valid key");
        assert_eq!(registry.get(&key).expect("present").payload["body"], json!("P1"));
        assert_eq!(
            surface.advertised.lock().expect("lock")[BUILD_1].0,
            "build-1"
        );
    }

    #[test]
    fn update_replaces_payload() {
        let surface = Arc::new(RecordingSurface::default());
        let (sync, registry) = synchronizer(Arc::clone(&surface));
        let first = run("ns1", "build-1", json!("P1"));
        let second = run("ns1", "build-1", json!("P2"));

        sync.on_added(&first);
        sync.on_updated(&first, &second);

        let key = ResourceKey::pipeline_run("ns1", "build-1");
        assert_eq!(registry.get(&key).expect("present").payload["body"], json!("P2"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn advertised_lookup_serves_current_state() {
        let surface = Arc::new(RecordingSurface::default());
        let (sync, _registry) = synchronizer(Arc::clone(&surface));
        let first = run("ns1", "build-1", json!("P1"));

        sync.on_added(&first);
        let before = surface.read(BUILD_1).expect("readable");
        sync.on_updated(&first, &run("ns1", "build-1", json!("P2")));
        let after = surface.read(BUILD_1).expect("readable");

        assert!(before.contains("P1"));
        assert!(after.contains("P2"));
    }

    #[test]
    fn delete_removes_and_retracts() {
        let surface = Arc::new(RecordingSurface::default());
        let (sync, registry) = synchronizer(Arc::clone(&surface));
        let object = run("ns1", "build-1", json!("P1"));

        sync.on_added(&object);
        sync.on_deleted(&object);

        let key = ResourceKey::pipeline_run("ns1", "build-1");
        assert!(matches!(
            registry.get(&key),
            Err(CacheError::NotFound { .. })
        ));
        assert_eq!(
            *surface.retracted.lock().expect("lock"),
            vec![BUILD_1.to_string()]
        );
        assert!(surface.advertised.lock().expect("lock").is_empty());
    }

    #[test]
    fn delete_without_add_is_noop() {
        let surface = Arc::new(RecordingSurface::default());
        let (sync, registry) = synchronizer(Arc::clone(&surface));

        sync.on_deleted(&run("ns1", "build-1", json!("P1")));

        assert!(registry.is_empty());
    }

    #[test]
    fn replayed_add_is_idempotent() {
        let surface = Arc::new(RecordingSurface::default());
        let (sync, registry) = synchronizer(Arc::clone(&surface));
        let object = run("ns1", "build-1", json!("P1"));

        sync.on_added(&object);
        let once = registry.snapshots();
        sync.on_added(&object);
        let twice = registry.snapshots();

        assert_eq!(once.len(), 1);
        assert_eq!(twice.len(), 1);
        assert_eq!(once[0].key, twice[0].key);
        assert_eq!(once[0].display_name, twice[0].display_name);
        assert_eq!(once[0].payload, twice[0].payload);
        assert_eq!(surface.advertised.lock().expect("lock").len(), 1);
    }

    #[test]
    fn final_state_is_fold_of_events_per_key() {
        let surface = Arc::new(RecordingSurface::default());
        let (sync, registry) = synchronizer(Arc::clone(&surface));
        let a1 = run("ns1", "a", json!(1));
        let a2 = run("ns1", "a", json!(2));
        let b1 = run("ns1", "b", json!(1));
        let b2 = run("ns1", "b", json!(2));

        sync.on_added(&a1);
        sync.on_added(&b1);
        sync.on_updated(&a1, &a2);
        sync.on_deleted(&b1);
        sync.on_added(&b2);
        sync.on_deleted(&a2);

        assert!(registry.get(&ResourceKey::pipeline_run("ns1", "a")).is_err());
        assert_eq!(
            registry
                .get(&ResourceKey::pipeline_run("ns1", "b"))
                .expect("present")
                .payload["body"],
            json!(2)
        );
    }

    #[test]
    fn serialization_failure_keeps_previous_snapshot() {
        let surface = Arc::new(RecordingSurface::default());
        let (sync, registry) = synchronizer::<Flaky>(Arc::clone(&surface));

        sync.on_added(&Flaky {
            namespace: "ns1".to_string(),
            name: "build-1".to_string(),
            healthy: true,
        });
        let broken = Flaky {
            namespace: "ns1".to_string(),
            name: "build-1".to_string(),
            healthy: false,
        };
        sync.on_updated(&broken, &broken);

        let key = ResourceKey::pipeline_run("ns1", "build-1");
        let snapshot = registry.get(&key).expect("still present");
        assert_eq!(*snapshot.payload, json!("build-1"));
        assert_eq!(snapshot.observed_at, 1);
    }

    #[test]
    fn surface_failure_does_not_roll_back_registry() {
        let surface = Arc::new(RecordingSurface::failing());
        let (sync, registry) = synchronizer(Arc::clone(&surface));
        let object = run("ns1", "build-1", json!("P1"));
        let key = ResourceKey::pipeline_run("ns1", "build-1");

        sync.on_added(&object);
        assert!(registry.contains(&key));

        sync.on_deleted(&object);
        assert!(!registry.contains(&key));
    }

    #[test]
    fn objects_without_name_are_ignored() {
        let surface = Arc::new(RecordingSurface::default());
        let (sync, registry) = synchronizer(Arc::clone(&surface));

        sync.on_added(&run("ns1", "", json!("P1")));
        sync.on_added(&run("", "build-1", json!("P1")));

        assert!(registry.is_empty());
        assert!(surface.advertised.lock().expect("lock").is_empty());
    }

    #[test]
    fn concurrent_sources_keep_keys_independent() {
        let surface = Arc::new(RecordingSurface::default());
        let (sync, registry) = synchronizer(Arc::clone(&surface));
        let sync = Arc::new(sync);

        let workers: Vec<_> = ["k1", "k2"]
            .into_iter()
            .map(|name| {
                let sync = Arc::clone(&sync);
                thread::spawn(move || {
                    let mut previous = run("ns1", name, json!(0));
                    sync.on_added(&previous);
                    for step in 1..=200 {
                        let next = run("ns1", name, json!(format!("{name}-{step}")));
                        sync.on_updated(&previous, &next);
                        previous = next;
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().expect("worker thread");
        }

        for name in ["k1", "k2"] {
            let snapshot = registry
                .get(&ResourceKey::pipeline_run("ns1", name))
                .expect("present");
            assert_eq!(snapshot.payload["body"], json!(format!("{name}-200")));
        }
        assert_eq!(registry.len(), 2);
    }
}
