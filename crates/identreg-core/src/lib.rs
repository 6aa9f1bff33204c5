//! Small integer identifiers for `Arc`-managed objects.
//!
//! - `registry`: [`IdentRegistry`], weak-keyed allocation with smallest-first reuse
//! - `free_pool`: min-heap of returned identifiers
//! - `trackable`: identity keys and liveness probes for object handles
//! - `config`: registry tuning loaded from TOML and environment

pub mod config;
pub mod error;
pub mod free_pool;
pub mod ident;
pub mod registry;
pub mod trackable;

pub use config::{ConfigError, RegistryConfig};
pub use error::*;
pub use free_pool::FreePool;
pub use ident::Ident;
pub use registry::{IdentRegistry, RegistrySnapshot};
pub use trackable::{Liveness, ObjectKey, Trackable};
