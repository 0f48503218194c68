//! Resolve person names to structured Wikidata records.
//!
//! A batch of names goes through up to three query rounds (batch, single,
//! language fallback) against the SPARQL endpoint. Every distinct name ends
//! up either resolved to an [`EntityRecord`] or listed as unresolved.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod sparql;
pub mod temporal;
pub mod types;

pub use config::{load_config, load_config_from, ResolverConfig};
pub use error::{ErrorClass, ResolveError};
pub use reconcile::{BatchOptions, Resolver};
pub use types::{EntityRecord, ResolutionResult, ResolvedName, WorkLocationEntry};
