//! Common types and errors shared across `keyman` crates.

pub mod error;
pub mod registry;

pub use error::KeyError;
pub use registry::{RegistryDocument, RegistryEntry};
