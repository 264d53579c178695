//! The mutator side of the collector's plan: the per-thread mutator record and the inline
//! allocation path over it.

pub mod mutator_context;

pub use self::mutator_context::{AllocationConfig, Mutator, MutatorConfig, MutatorContext};
