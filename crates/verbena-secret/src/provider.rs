//! External secret providers.

use async_trait::async_trait;

use crate::error::SecretError;

/// A remote secret source (vault, cloud secret manager, environment
/// bridge). Providers are queried in registration order, before the local
/// registry; the first available provider that returns a value wins.
#[async_trait]
pub trait ExternalSecretProvider: Send + Sync {
  /// Provider name for diagnostics.
  fn name(&self) -> &str;

  /// Whether the provider can currently serve lookups.
  async fn is_available(&self) -> bool;

  /// Fetch a secret record by name. `Ok(None)` means the provider is
  /// healthy but has no such secret.
  async fn fetch(&self, name: &str) -> Result<Option<serde_json::Value>, SecretError>;
}
