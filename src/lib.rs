//! Mutator-side runtime support for embedding the MMTk collector in a managed runtime.
//!
//! The collector core lives in a separate native module. This crate sits between it and
//! the VM and provides what the VM's threads need while running application code:
//!
//! -   per-thread [mutator contexts](plan::MutatorContext) with an inline bump-pointer
//!     allocation path,
//! -   the [reference barriers](barrier) of the field-logging collector, in a direct-call
//!     rendering and two compiler renderings,
//! -   [root scanning closures](scanning) that move root slots to the collector in buffers,
//! -   the [stop-the-world protocol](scheduler) driven by the collector through the
//!     [upcalls](upcalls).
//!
//! A VM initializes the crate with [`api::mmtk_runtime_init`] and hands the table from
//! [`api::mmtk_runtime_upcalls`] to the collector.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod abi;
pub mod api;
pub mod barrier;
pub mod build_info;
pub mod global_state;
pub mod plan;
pub mod runtime;
pub mod scanning;
pub mod scheduler;
pub mod upcalls;
pub mod util;
pub mod vm;

pub use crate::plan::{Mutator, MutatorContext};
pub use crate::runtime::{InitError, Runtime, RuntimeBuilder};
