//! Secret resolution against providers and the local registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::error::SecretError;
use crate::provider::ExternalSecretProvider;
use crate::reference::{parse_reference, references_in};
use crate::registry::SecretRegistry;

/// Resolves secret references for one workflow at a time.
///
/// Resolved records are cached by secret name; the cache lives for the
/// duration of one workflow execution and is cleared by the engine at
/// completion or reset.
pub struct SecretResolver {
  registry: Arc<dyn SecretRegistry>,
  providers: Vec<Arc<dyn ExternalSecretProvider>>,
  cache: Mutex<HashMap<String, serde_json::Value>>,
}

impl SecretResolver {
  pub fn new(registry: Arc<dyn SecretRegistry>) -> Self {
    Self {
      registry,
      providers: Vec::new(),
      cache: Mutex::new(HashMap::new()),
    }
  }

  /// Append an external provider. Providers are consulted in the order
  /// they were added.
  pub fn with_provider(mut self, provider: Arc<dyn ExternalSecretProvider>) -> Self {
    self.providers.push(provider);
    self
  }

  /// Resolve a secret by name, optionally narrowing to one field.
  pub async fn resolve(
    &self,
    name: &str,
    field: Option<&str>,
  ) -> Result<serde_json::Value, SecretError> {
    let record = self.record(name).await?;
    match field {
      None => Ok(record),
      Some(field) => record
        .get(field)
        .cloned()
        .ok_or_else(|| SecretError::FieldNotFound {
          name: name.to_string(),
          field: field.to_string(),
        }),
    }
  }

  /// Substitute every secret reference in a config tree.
  ///
  /// A string leaf that is exactly one reference is replaced by the
  /// resolved value with its native type preserved; references embedded in
  /// surrounding text are substituted as their string form.
  pub async fn resolve_config(
    &self,
    config: &serde_json::Value,
  ) -> Result<serde_json::Value, SecretError> {
    match config {
      serde_json::Value::String(text) => self.resolve_string(text).await,
      serde_json::Value::Array(items) => {
        let mut resolved = Vec::with_capacity(items.len());
        for item in items {
          resolved.push(Box::pin(self.resolve_config(item)).await?);
        }
        Ok(serde_json::Value::Array(resolved))
      }
      serde_json::Value::Object(map) => {
        let mut resolved = serde_json::Map::with_capacity(map.len());
        for (key, value) in map {
          resolved.insert(key.clone(), Box::pin(self.resolve_config(value)).await?);
        }
        Ok(serde_json::Value::Object(resolved))
      }
      other => Ok(other.clone()),
    }
  }

  /// Drop all cached records. Called at workflow completion and reset.
  pub async fn clear_cache(&self) {
    let mut cache = self.cache.lock().await;
    cache.clear();
  }

  async fn resolve_string(&self, text: &str) -> Result<serde_json::Value, SecretError> {
    if let Some(reference) = parse_reference(text) {
      return self.resolve(&reference.name, reference.field.as_deref()).await;
    }

    let references: Vec<_> = references_in(text).collect();
    if references.is_empty() {
      return Ok(serde_json::Value::String(text.to_string()));
    }

    let mut rendered = String::with_capacity(text.len());
    let mut cursor = 0;
    for (range, reference) in references {
      rendered.push_str(&text[cursor..range.start]);
      let value = self.resolve(&reference.name, reference.field.as_deref()).await?;
      rendered.push_str(&stringify(&value));
      cursor = range.end;
    }
    rendered.push_str(&text[cursor..]);
    Ok(serde_json::Value::String(rendered))
  }

  /// Fetch the whole record for a secret, consulting the cache, then the
  /// providers, then the registry.
  async fn record(&self, name: &str) -> Result<serde_json::Value, SecretError> {
    {
      let cache = self.cache.lock().await;
      if let Some(record) = cache.get(name) {
        return Ok(record.clone());
      }
    }

    let record = self.fetch_uncached(name).await?;

    let mut cache = self.cache.lock().await;
    cache.insert(name.to_string(), record.clone());
    Ok(record)
  }

  async fn fetch_uncached(&self, name: &str) -> Result<serde_json::Value, SecretError> {
    for provider in &self.providers {
      if !provider.is_available().await {
        continue;
      }
      match provider.fetch(name).await {
        Ok(Some(record)) => return Ok(record),
        Ok(None) => {}
        Err(error) => {
          warn!(provider = provider.name(), secret = name, error = %error, "secret provider failed; falling through");
        }
      }
    }

    self
      .registry
      .get(name)
      .await
      .ok_or_else(|| SecretError::NotFound {
        name: name.to_string(),
      })
  }
}

/// String form of a resolved value for interpolation into text.
fn stringify(value: &serde_json::Value) -> String {
  match value {
    serde_json::Value::String(text) => text.clone(),
    other => other.to_string(),
  }
}
