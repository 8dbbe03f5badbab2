//! Local secret registry.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

/// The local secret store consulted when no external provider resolves a
/// reference. Implementations own storage; the engine only reads.
#[async_trait]
pub trait SecretRegistry: Send + Sync {
  /// Look up a secret record by name.
  async fn get(&self, name: &str) -> Option<serde_json::Value>;
}

/// An in-memory registry for embedders and tests.
///
/// Encrypted file or database backends live outside the core and implement
/// the same trait.
#[derive(Default)]
pub struct MemorySecretRegistry {
  secrets: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemorySecretRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert or replace a secret record.
  pub fn insert(&self, name: impl Into<String>, value: serde_json::Value) {
    let mut secrets = self.secrets.write().unwrap();
    secrets.insert(name.into(), value);
  }

  /// Remove a secret record.
  pub fn remove(&self, name: &str) {
    let mut secrets = self.secrets.write().unwrap();
    secrets.remove(name);
  }
}

#[async_trait]
impl SecretRegistry for MemorySecretRegistry {
  async fn get(&self, name: &str) -> Option<serde_json::Value> {
    let secrets = self.secrets.read().unwrap();
    secrets.get(name).cloned()
  }
}
