//! Dynamically advertised MCP resources
//!
//! The synchronizer advertises and retracts keys here as pipeline runs come
//! and go; `resources/list` and `resources/read` are served from this table.

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use rust_mcp_sdk::schema::{ReadResourceContent, ReadResourceResult, Resource, TextResourceContents};
use tracing::debug;

use crate::{
    cache::{ExposureSurface, LookupFn, ResourceKey},
    errors::CacheError,
};

struct Advertised {
    name: String,
    lookup: LookupFn,
}

#[derive(Default)]
pub struct ResourceSurface {
    resources: RwLock<BTreeMap<ResourceKey, Advertised>>,
}

pub fn mime_type_for(key: &ResourceKey) -> String {
    format!("application/json;type={}", key.kind())
}

impl ResourceSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<Resource> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, advertised)| Resource {
                annotations: None,
                description: Some(format!(
                    "Tekton {} {} in namespace {}",
                    key.kind(),
                    key.name(),
                    key.namespace()
                )),
                icons: vec![],
                meta: None,
                mime_type: Some(mime_type_for(key)),
                name: advertised.name.clone(),
                size: None,
                title: None,
                uri: key.to_string(),
            })
            .collect()
    }

    /// Resolve `uri` through the lookup it was advertised with.
    pub fn read(&self, uri: &str) -> Result<ReadResourceResult, CacheError> {
        let key: ResourceKey = uri.parse()?;
        let lookup = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map(|advertised| Arc::clone(&advertised.lookup))
            .ok_or_else(|| CacheError::NotFound {
                key: uri.to_string(),
            })?;

        let text = lookup(&key)?;
        Ok(ReadResourceResult {
            contents: vec![ReadResourceContent::from(TextResourceContents {
                meta: None,
                mime_type: Some(mime_type_for(&key)),
                text,
                uri: key.to_string(),
            })],
            meta: None,
        })
    }
}

impl ExposureSurface for ResourceSurface {
    fn advertise(
        &self,
        key: &ResourceKey,
        display_name: &str,
        lookup: LookupFn,
    ) -> Result<(), CacheError> {
        if display_name.trim().is_empty() {
            return Err(CacheError::Exposure {
                key: key.to_string(),
                message: "resource name must not be empty".to_string(),
            });
        }

        let previous = self
            .resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.clone(),
                Advertised {
                    name: display_name.to_string(),
                    lookup,
                },
            );
        if previous.is_none() {
            debug!(key = %key, "resource advertised");
        }
        Ok(())
    }

    fn retract(&self, key: &ResourceKey) -> Result<(), CacheError> {
        let removed = self
            .resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if removed.is_some() {
            debug!(key = %key, "resource retracted");
        }
        Ok(())
    }
}
