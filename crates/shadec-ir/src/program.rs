//! Programs: named shader templates composed from parent programs.

use crate::arena::Handle;
use crate::descriptor::ResourceTable;
use crate::error::Location;
use crate::function::Function;
use crate::param::{AttributeList, DataParameter};

/// A named template of parameters and functions.
///
/// Parents are an ordered list of composed programs, not a class
/// hierarchy: name lookups scan this program first, then each parent
/// depth-first in declaration order, and the first match wins.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub name: String,
    pub attributes: AttributeList,
    pub location: Location,
    pub parents: Vec<Handle<Program>>,
    pub parameters: Vec<Handle<DataParameter>>,
    pub functions: Vec<Handle<Function>>,
    /// Resource tables referenced from this program's code.
    pub descriptors: Vec<Handle<ResourceTable>>,
    /// Built-ins materialized on first use.
    pub builtins: Vec<Handle<DataParameter>>,
    /// Descriptor members materialized on first use.
    pub descriptor_elements: Vec<Handle<DataParameter>>,
}

impl Program {
    pub fn new(name: impl Into<String>, attributes: AttributeList, location: Location) -> Self {
        Self {
            name: name.into(),
            attributes,
            location,
            parents: Vec::new(),
            parameters: Vec::new(),
            functions: Vec::new(),
            descriptors: Vec::new(),
            builtins: Vec::new(),
            descriptor_elements: Vec::new(),
        }
    }
}

/// One stage of an exported bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportedStage {
    pub stage: crate::ShaderStage,
    pub program: Handle<Program>,
    /// Constant overrides given in the export statement.
    pub constants: Vec<(Handle<DataParameter>, crate::DataValue)>,
    pub location: Location,
}

/// A named set of stages linked into one shader bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportedBundle {
    pub name: String,
    pub stages: Vec<ExportedStage>,
    pub location: Location,
}
