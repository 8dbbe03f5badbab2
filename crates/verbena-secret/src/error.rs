//! Secret resolution errors.

/// Errors that can occur while parsing or resolving secret references.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SecretError {
  /// No provider or registry entry exists for the referenced secret.
  #[error("secret '{name}' not found")]
  NotFound { name: String },

  /// The secret exists but has no such field.
  #[error("secret '{name}' has no field '{field}'")]
  FieldNotFound { name: String, field: String },

  /// A string looked like a secret reference but did not parse.
  #[error("invalid secret reference '{reference}'")]
  InvalidReference { reference: String },

  /// An external provider failed while fetching.
  #[error("secret provider '{provider}' failed: {message}")]
  Provider { provider: String, message: String },
}
