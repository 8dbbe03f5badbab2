//! Verbena Secret
//!
//! Secret reference resolution for node configurations. Config values may
//! contain references of the form `{{secrets.<name>.<field>?}}`; before a
//! node processes, each reference is substituted with the resolved value.
//!
//! Resolution order: external providers (in registration order) are queried
//! first; the local registry is the fallback. Resolved secrets are cached
//! per resolver instance for the duration of one workflow execution.
//!
//! Storage-at-rest backends are external - this crate only defines the
//! `SecretRegistry` and `ExternalSecretProvider` interfaces plus an
//! in-memory registry for embedders and tests.

mod error;
mod provider;
mod reference;
mod registry;
mod resolver;

pub use error::SecretError;
pub use provider::ExternalSecretProvider;
pub use reference::{SecretReference, parse_reference, validate_references};
pub use registry::{MemorySecretRegistry, SecretRegistry};
pub use resolver::SecretResolver;
