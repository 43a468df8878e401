//! Shadec program model.
//!
//! Everything the front end produces lives in a [`CodeLibrary`]: programs
//! composed from parent programs, their parameters and functions, code
//! trees of [`CodeNode`]s, user structures and descriptor resource tables.
//! Model objects are stored in append-only [`Arena`]s and reference each
//! other by [`Handle`], so later stages (instancing, folding, linking) can
//! share a library immutably.

pub mod arena;
mod builtin;
mod descriptor;
mod display;
mod error;
mod function;
mod hash;
mod instance;
mod layout;
mod library;
mod native;
mod node;
mod param;
mod program;
mod stage;
mod types;
mod value;

pub use arena::{Arena, Handle};
pub use builtin::{BUILTINS, BuiltinVariable, find_builtin};
pub use descriptor::{CONSTANTS_ENTRY, ResourceTable, ResourceTableEntry};
pub use display::{dump_code, dump_library};
pub use error::{
    CollectingReporter, Diagnostic, ErrorReported, ErrorReporter, Location, LogReporter, Severity,
};
pub use function::{FoldedFunction, FoldedFunctionKey, Function};
pub use hash::{KeyBuilder, crc64};
pub use instance::{ProgramConstants, ProgramInstance};
pub use layout::compute_layout;
pub use library::{CodeLibrary, DescriptorMatch};
pub use native::NativeFunction;
pub use node::{Callee, CodeNode, LoopKind, NodeExtra, OpCode, Swizzle};
pub use param::{AttributeList, DataParameter, DescriptorElement, ParameterScope};
pub use program::{ExportedBundle, ExportedStage, Program};
pub use stage::ShaderStage;
pub use types::{
    ArrayCounts, BaseType, CompositeMember, CompositeType, DataType, FormatClass, ImageFormat,
    ImageViewType, MemberLayout, PackingRule, ResourceAccess, ResourceKind, ResourceType,
    ScalarKind,
};
pub use value::{Component, DataValue};
