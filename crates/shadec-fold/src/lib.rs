//! Program instancing and function folding for shadec.
//!
//! [`InstanceCache::create_program_instance`] binds a program to fully
//! resolved compile-time constants. A [`FunctionFolder`] then specializes
//! functions against such an instance, producing code that only touches
//! runtime values and is ready for a backend.

mod eval;
mod folder;
mod instance;

pub use eval::{EvalError, Evaluator, STEP_LIMIT, access_components, fold_native};
pub use folder::{ENTRY_POINT, FunctionFolder, MAX_SPECIALIZATION_DEPTH};
pub use instance::{InstanceCache, instance_key, program_constants};
