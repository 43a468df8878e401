//! Functions and their folded specializations.

use std::sync::Arc;

use crate::arena::Handle;
use crate::error::Location;
use crate::instance::ProgramInstance;
use crate::node::CodeNode;
use crate::param::{AttributeList, DataParameter};
use crate::program::Program;
use crate::types::DataType;
use crate::value::DataValue;

/// A function as declared in source.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    /// Declaring program, `None` for global functions.
    pub program: Option<Handle<Program>>,
    pub return_type: DataType,
    pub inputs: Vec<Handle<DataParameter>>,
    /// Body root (a `Scope`), `None` for prototypes.
    pub code: Option<Handle<CodeNode>>,
    pub attributes: AttributeList,
    pub location: Location,
}

/// Identity of one folded specialization.
///
/// Keys compare field by field, so two distinct specializations can never
/// share a map entry even if their hashes collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FoldedFunctionKey {
    pub function: Handle<Function>,
    /// Key of the program instance the function was folded against.
    pub instance: u64,
    /// Inputs bound to constants at the call site, sorted by parameter.
    pub constant_args: Vec<(Handle<DataParameter>, DataValue)>,
}

/// A function specialized against a program instance and constant
/// call-site arguments. Its code only references runtime values.
#[derive(Clone, Debug)]
pub struct FoldedFunction {
    pub key: FoldedFunctionKey,
    /// Deterministic unique name (`<function>_<hash>`).
    pub name: String,
    pub original: Handle<Function>,
    pub instance: Arc<ProgramInstance>,
    /// Remaining runtime inputs.
    pub inputs: Vec<Handle<DataParameter>>,
    pub return_type: DataType,
    /// Folded body inside the folding session's arena.
    pub code: Option<Handle<CodeNode>>,
    pub attributes: AttributeList,
    pub location: Location,
}
