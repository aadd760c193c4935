//! Bidirectional index of merged capabilities and their owning backends.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use posuer_config::CapabilityType;

/// Identifies a capability in the merged namespace.
///
/// `name` is the qualified (post-rewrite) name, not the backend's raw name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityKey {
    pub kind: CapabilityType,
    pub name: String,
}

#[derive(Debug, Default)]
struct Indices {
    /// Qualified capability to its providing backend.
    capabilities: HashMap<CapabilityKey, String>,
    /// Backend to the capabilities it provides.
    by_backend: HashMap<String, HashSet<CapabilityKey>>,
}

/// Tracks which backend owns each merged capability.
///
/// Both indices live behind one lock, so readers always observe them in a
/// mutually consistent state.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    inner: RwLock<Indices>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability as provided by `backend`.
    ///
    /// A prior owner of the same key is silently replaced; the name
    /// rewriter keeps distinct backends collision-free.
    pub fn add(&self, backend: &str, kind: CapabilityType, name: impl Into<String>) {
        let key = CapabilityKey {
            kind,
            name: name.into(),
        };

        let mut inner = self.inner.write();

        if let Some(previous) = inner.capabilities.insert(key.clone(), backend.to_string()) {
            if previous != backend {
                if let Some(keys) = inner.by_backend.get_mut(&previous) {
                    keys.remove(&key);
                }
            }
        }

        inner
            .by_backend
            .entry(backend.to_string())
            .or_default()
            .insert(key);
    }

    /// Remove one capability, returning its former owner.
    pub fn remove(&self, kind: CapabilityType, name: &str) -> Option<String> {
        let key = CapabilityKey {
            kind,
            name: name.to_string(),
        };

        let mut inner = self.inner.write();
        let backend = inner.capabilities.remove(&key)?;

        if let Some(keys) = inner.by_backend.get_mut(&backend) {
            keys.remove(&key);
            if keys.is_empty() {
                inner.by_backend.remove(&backend);
            }
        }

        Some(backend)
    }

    /// Remove every capability owned by `backend`, grouped by kind.
    pub fn remove_backend(&self, backend: &str) -> HashMap<CapabilityType, Vec<String>> {
        let mut inner = self.inner.write();

        let Some(keys) = inner.by_backend.remove(backend) else {
            return HashMap::new();
        };

        let mut removed: HashMap<CapabilityType, Vec<String>> = HashMap::new();
        for key in keys {
            inner.capabilities.remove(&key);
            removed.entry(key.kind).or_default().push(key.name);
        }

        removed
    }

    /// The backend providing a capability, if any.
    pub fn backend_for(&self, kind: CapabilityType, name: &str) -> Option<String> {
        let key = CapabilityKey {
            kind,
            name: name.to_string(),
        };

        self.inner.read().capabilities.get(&key).cloned()
    }

    /// All capabilities provided by `backend`, grouped by kind.
    pub fn for_backend(&self, backend: &str) -> HashMap<CapabilityType, Vec<String>> {
        let inner = self.inner.read();

        let Some(keys) = inner.by_backend.get(backend) else {
            return HashMap::new();
        };

        let mut result: HashMap<CapabilityType, Vec<String>> = HashMap::new();
        for key in keys {
            result.entry(key.kind).or_default().push(key.name.clone());
        }

        result
    }

    /// True if `backend` provides any capability of `kind`.
    pub fn has_kind(&self, backend: &str, kind: CapabilityType) -> bool {
        self.inner
            .read()
            .by_backend
            .get(backend)
            .is_some_and(|keys| keys.iter().any(|key| key.kind == kind))
    }

    /// All capabilities of one kind, grouped by backend.
    pub fn by_kind(&self, kind: CapabilityType) -> HashMap<String, Vec<String>> {
        let inner = self.inner.read();

        let mut result: HashMap<String, Vec<String>> = HashMap::new();
        for (key, backend) in &inner.capabilities {
            if key.kind == kind {
                result
                    .entry(backend.clone())
                    .or_default()
                    .push(key.name.clone());
            }
        }

        result
    }

    /// Every backend with at least one registered capability.
    pub fn backends(&self) -> Vec<String> {
        self.inner.read().by_backend.keys().cloned().collect()
    }

    /// Every capability kind currently registered.
    pub fn kinds(&self) -> HashSet<CapabilityType> {
        self.inner
            .read()
            .capabilities
            .keys()
            .map(|key| key.kind)
            .collect()
    }
}
