//! Backend registry
//!
//! Maps backend names to their plugin info and a constructor. Volumes name
//! their backend in the superblock; the registry turns that name into a
//! fresh, detached backend instance.

use crate::backend::StorageBackend;
use crate::object_backend::ObjectStoreBackend;
use crate::object_store::ObjectStoreConnector;
use mtfs_common::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name of a backend and the parameters it needs to attach
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    /// Required attach parameter names
    pub params: Vec<String>,
}

impl PluginInfo {
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.params.join(", "))
    }
}

/// Constructor of detached backend instances
pub type BackendConstructor = Box<dyn Fn() -> Box<dyn StorageBackend> + Send + Sync>;

struct Entry {
    info: PluginInfo,
    constructor: BackendConstructor,
}

/// Registry of available storage backends
#[derive(Default)]
pub struct BackendRegistry {
    entries: BTreeMap<String, Entry>,
}

impl BackendRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends, opening buckets through `connector`
    #[must_use]
    pub fn with_defaults(connector: Arc<dyn ObjectStoreConnector>) -> Self {
        let mut registry = Self::new();
        registry.register(
            ObjectStoreBackend::plugin_info(),
            move || -> Box<dyn StorageBackend> {
                Box::new(ObjectStoreBackend::new(connector.clone()))
            },
        );
        registry
    }

    /// Register a backend, replacing any previous one with the same name
    pub fn register<F>(&mut self, info: PluginInfo, constructor: F)
    where
        F: Fn() -> Box<dyn StorageBackend> + Send + Sync + 'static,
    {
        self.entries.insert(
            info.name.clone(),
            Entry {
                info,
                constructor: Box::new(constructor),
            },
        );
    }

    /// Plugin info of a backend
    #[must_use]
    pub fn info(&self, name: &str) -> Option<&PluginInfo> {
        self.entries.get(name).map(|e| &e.info)
    }

    /// All registered backends, by name
    pub fn backends(&self) -> impl Iterator<Item = &PluginInfo> {
        self.entries.values().map(|e| &e.info)
    }

    /// Create a detached backend instance
    pub fn create(&self, name: &str) -> Result<Box<dyn StorageBackend>> {
        let entry = self.entries.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.entries.keys().map(String::as_str).collect();
            Error::configuration(format!(
                "unknown backend {name:?}, available: {}",
                known.join(", ")
            ))
        })?;
        Ok((entry.constructor)())
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.backends()).finish()
    }
}
