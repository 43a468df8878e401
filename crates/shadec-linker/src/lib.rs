//! Linker for shadec.
//!
//! Turns exported stage sets into shader bundles: folds every entry point
//! through a session [`LinkerCache`], works out which vertex streams and
//! resource tables the bundle touches, asks an
//! [`OpcodeGenerator`](shadec_backend_core::OpcodeGenerator) for code stage
//! by stage and interns the result in a
//! [`ShaderLibraryBuilder`](shadec_library::ShaderLibraryBuilder).

mod bundle;
mod cache;
mod driver;
mod usage;

pub use bundle::{StageEntry, assemble_shader_bundle, validate_stage_attributes};
pub use cache::LinkerCache;
pub use driver::{LinkedLibrary, LinkerOptions, compile_library};
pub use usage::{used_resource_tables, vertex_streams};
