//! Trow configuration generator
//!
//! Turns a declarative list of upstream container registries into the
//! registry-proxy configuration of a Trow instance. Credentials are resolved
//! live (static values, GitHub App installation tokens, ECR tokens through
//! STS web-identity federation) and the result is stored as a Kubernetes
//! secret.

pub mod assembler;
pub mod error;
pub mod registry;
pub mod secret_store;
pub mod settings;

pub use assembler::{Assembler, RunPolicy};
pub use error::{AssemblyError, RegistryError, ResolveError};
pub use registry::{RegistryList, RegistrySpec, RegistryType, TrowConfiguration};
