//! Node type registry.
//!
//! Process-wide lookup from `(type name, version)` to behavior. The
//! registry is populated by the embedder before workflows are built or
//! imported; there is no hidden mutation outside `register`/`shutdown`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::behavior::NodeBehavior;
use crate::error::NodeError;

#[derive(Default)]
pub struct NodeTypeRegistry {
  // type name -> version -> behavior; BTreeMap keeps versions ordered so
  // "latest" is the last entry.
  entries: RwLock<HashMap<String, BTreeMap<u32, Arc<dyn NodeBehavior>>>>,
}

impl NodeTypeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a registry pre-populated with the given behaviors.
  pub fn init(
    behaviors: impl IntoIterator<Item = Arc<dyn NodeBehavior>>,
  ) -> Result<Self, NodeError> {
    let registry = Self::new();
    for behavior in behaviors {
      registry.register(behavior)?;
    }
    Ok(registry)
  }

  /// Register a node type. Each `(type name, version)` pair may be
  /// registered once.
  pub fn register(&self, behavior: Arc<dyn NodeBehavior>) -> Result<(), NodeError> {
    let node_type = behavior.type_name().to_string();
    let version = behavior.version();

    let mut entries = self.entries.write().unwrap();
    let versions = entries.entry(node_type.clone()).or_default();
    if versions.contains_key(&version) {
      return Err(NodeError::TypeAlreadyRegistered { node_type, version });
    }
    versions.insert(version, behavior);
    Ok(())
  }

  /// Look up a node type. Without a version, the latest registered version
  /// is returned.
  pub fn get(&self, name: &str, version: Option<u32>) -> Option<Arc<dyn NodeBehavior>> {
    let entries = self.entries.read().unwrap();
    let versions = entries.get(name)?;
    match version {
      Some(version) => versions.get(&version).cloned(),
      None => versions.values().next_back().cloned(),
    }
  }

  /// List registered `(type name, version)` pairs.
  pub fn list(&self) -> Vec<(String, u32)> {
    let entries = self.entries.read().unwrap();
    entries
      .iter()
      .flat_map(|(name, versions)| versions.keys().map(|v| (name.clone(), *v)))
      .collect()
  }

  /// Drop every registration.
  pub fn shutdown(&self) {
    let mut entries = self.entries.write().unwrap();
    entries.clear();
  }
}

#[cfg(test)]
mod tests {
  use async_trait::async_trait;

  use super::*;
  use crate::behavior::{NodeContext, OutputMap};
  use crate::error::ProcessError;

  struct Versioned(u32);

  #[async_trait]
  impl NodeBehavior for Versioned {
    fn type_name(&self) -> &str {
      "transform"
    }

    fn version(&self) -> u32 {
      self.0
    }

    async fn process(
      &self,
      _config: &serde_json::Value,
      _ctx: &NodeContext,
    ) -> Result<OutputMap, ProcessError> {
      Ok(OutputMap::new())
    }
  }

  #[test]
  fn unversioned_get_returns_latest() {
    let registry = NodeTypeRegistry::new();
    registry.register(Arc::new(Versioned(1))).unwrap();
    registry.register(Arc::new(Versioned(3))).unwrap();
    registry.register(Arc::new(Versioned(2))).unwrap();

    assert_eq!(registry.get("transform", None).unwrap().version(), 3);
    assert_eq!(registry.get("transform", Some(1)).unwrap().version(), 1);
    assert!(registry.get("transform", Some(4)).is_none());
    assert!(registry.get("missing", None).is_none());
  }

  #[test]
  fn duplicate_registration_is_rejected() {
    let registry = NodeTypeRegistry::new();
    registry.register(Arc::new(Versioned(1))).unwrap();
    let err = registry.register(Arc::new(Versioned(1))).unwrap_err();
    assert!(matches!(err, NodeError::TypeAlreadyRegistered { .. }));
  }

  #[test]
  fn shutdown_clears_registrations() {
    let registry = NodeTypeRegistry::new();
    registry.register(Arc::new(Versioned(1))).unwrap();
    registry.shutdown();
    assert!(registry.get("transform", None).is_none());
    assert!(registry.list().is_empty());
  }
}
