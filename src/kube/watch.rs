//! List-then-watch event source for mirrored objects
//!
//! The watcher lists the collection once, then follows the watch stream from
//! the list's resourceVersion. Streams the API server closes are resumed
//! from the last seen version; an expired version triggers a relist, and the
//! tracker turns the relist into adds, updates and deletes so the handler
//! sees a consistent per-object sequence.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Response;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cache::EventHandler,
    kube::{
        client::{KubeClient, KubeError, TektonResource},
        models::{ObjectList, TektonObject, WatchEvent},
    },
};

/// Ordered watch events of one watch request; `None` once the server closes it.
#[async_trait]
pub trait EventStream: Send {
    async fn next_event(&mut self) -> Result<Option<WatchEvent>, KubeError>;
}

/// The list and watch calls the watcher is driven by.
#[async_trait]
pub trait WatchSource: Send + Sync {
    async fn list_objects(
        &self,
        resource: TektonResource,
        namespace: Option<&str>,
    ) -> Result<ObjectList, KubeError>;

    async fn watch_events(
        &self,
        resource: TektonResource,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<Box<dyn EventStream>, KubeError>;
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch of {resource} failed after {attempts} attempts: {source}")]
    Exhausted {
        resource: &'static str,
        attempts: u32,
        #[source]
        source: KubeError,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_retries: 10,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

type ObjectId = (String, String);

fn object_id(object: &TektonObject) -> ObjectId {
    (
        object.metadata.namespace.clone(),
        object.metadata.name.clone(),
    )
}

/// Last delivered state of every object, used to pair updates with their
/// previous version and to detect deletions across a relist.
#[derive(Debug, Default)]
pub struct ObjectTracker {
    known: HashMap<ObjectId, TektonObject>,
}

impl ObjectTracker {
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn relist(&mut self, items: Vec<TektonObject>, handler: &dyn EventHandler<TektonObject>) {
        let mut current = HashMap::with_capacity(items.len());

        for item in items {
            let id = object_id(&item);
            match self.known.remove(&id) {
                Some(old) if old.metadata.resource_version == item.metadata.resource_version => {}
                Some(old) => handler.on_updated(&old, &item),
                None => handler.on_added(&item),
            }
            current.insert(id, item);
        }

        for gone in self.known.values() {
            handler.on_deleted(gone);
        }

        self.known = current;
    }

    /// Apply one watch event, returning the resourceVersion to resume from.
    pub fn apply(
        &mut self,
        event: WatchEvent,
        handler: &dyn EventHandler<TektonObject>,
    ) -> Result<Option<String>, KubeError> {
        match event {
            WatchEvent::Added(object) | WatchEvent::Modified(object) => {
                let version = object.metadata.resource_version.clone();
                match self.known.insert(object_id(&object), object.clone()) {
                    Some(old) => handler.on_updated(&old, &object),
                    None => handler.on_added(&object),
                }
                Ok(version)
            }
            WatchEvent::Deleted(object) => {
                let version = object.metadata.resource_version.clone();
                self.known.remove(&object_id(&object));
                handler.on_deleted(&object);
                Ok(version)
            }
            WatchEvent::Bookmark(object) => Ok(object.metadata.resource_version),
            WatchEvent::Error(status) => Err(status.into()),
        }
    }
}

/// Newline-delimited watch events read off a streaming response.
pub struct WatchLines {
    response: Response,
    buffer: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
}

impl WatchLines {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            buffer: Vec::new(),
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl EventStream for WatchLines {
    async fn next_event(&mut self) -> Result<Option<WatchEvent>, KubeError> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(serde_json::from_slice(&line)?));
            }

            match self.response.chunk().await? {
                Some(chunk) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.pending.extend(drain_lines(&mut self.buffer));
                }
                None => return Ok(None),
            }
        }
    }
}

#[async_trait]
impl WatchSource for KubeClient {
    async fn list_objects(
        &self,
        resource: TektonResource,
        namespace: Option<&str>,
    ) -> Result<ObjectList, KubeError> {
        self.list(resource, namespace, None).await
    }

    async fn watch_events(
        &self,
        resource: TektonResource,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<Box<dyn EventStream>, KubeError> {
        let response = self.watch(resource, namespace, resource_version).await?;
        Ok(Box::new(WatchLines::new(response)))
    }
}

/// Split complete lines off the front of `buffer`.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(position) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=position).collect();
        line.pop();
        if !line.iter().all(u8::is_ascii_whitespace) {
            lines.push(line);
        }
    }
    lines
}

pub struct Watcher {
    source: Arc<dyn WatchSource>,
    resource: TektonResource,
    namespace: Option<String>,
    backoff: Backoff,
}

impl Watcher {
    pub fn new(
        source: Arc<dyn WatchSource>,
        resource: TektonResource,
        namespace: Option<String>,
    ) -> Self {
        Self {
            source,
            resource,
            namespace,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs until `shutdown` is cancelled or the API server stays unreachable
    /// for more than `max_retries` consecutive attempts. A successful list or
    /// any delivered event resets the count.
    pub async fn run(
        self,
        handler: Arc<dyn EventHandler<TektonObject>>,
        shutdown: CancellationToken,
    ) -> Result<(), WatchError> {
        let mut tracker = ObjectTracker::default();
        let mut resource_version: Option<String> = None;
        let mut failures = 0u32;

        info!(
            resource = self.resource.plural(),
            namespace = self.namespace.as_deref().unwrap_or("*"),
            "watcher starting"
        );

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.cycle(
                    &mut tracker,
                    &mut resource_version,
                    &mut failures,
                    handler.as_ref(),
                ) => result,
            };

            match result {
                Ok(()) => {
                    failures = 0;
                    debug!(resource = self.resource.plural(), "watch stream closed, resuming");
                }
                Err(err) if err.is_gone() => {
                    info!(resource = self.resource.plural(), "resource version expired, relisting");
                    resource_version = None;
                }
                Err(err) => {
                    failures += 1;
                    if failures > self.backoff.max_retries {
                        return Err(WatchError::Exhausted {
                            resource: self.resource.plural(),
                            attempts: failures,
                            source: err,
                        });
                    }

                    let delay = self.backoff.delay(failures);
                    warn!(
                        resource = self.resource.plural(),
                        error = %err,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "watch failed, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(resource = self.resource.plural(), "watcher stopped");
        Ok(())
    }

    async fn cycle(
        &self,
        tracker: &mut ObjectTracker,
        resource_version: &mut Option<String>,
        failures: &mut u32,
        handler: &dyn EventHandler<TektonObject>,
    ) -> Result<(), KubeError> {
        let namespace = self.namespace.as_deref();

        let version = match resource_version.clone() {
            Some(version) => version,
            None => {
                let list = self.source.list_objects(self.resource, namespace).await?;
                let version = list.metadata.resource_version.unwrap_or_default();
                tracker.relist(list.items, handler);
                *failures = 0;
                info!(
                    resource = self.resource.plural(),
                    objects = tracker.len(),
                    resource_version = %version,
                    "initial sync complete"
                );
                *resource_version = Some(version.clone());
                version
            }
        };

        let mut events = self
            .source
            .watch_events(self.resource, namespace, &version)
            .await?;
        while let Some(event) = events.next_event().await? {
            if let Some(version) = tracker.apply(event, handler)? {
                *resource_version = Some(version);
            }
            *failures = 0;
        }

        Ok(())
    }
}
