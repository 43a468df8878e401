//! Data parameters: every named value a piece of code can reference.

use std::fmt;

use crate::arena::Handle;
use crate::descriptor::ResourceTable;
use crate::error::Location;
use crate::node::CodeNode;
use crate::types::DataType;

/// Where a parameter lives and who provides its value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ParameterScope {
    /// Argument of a function.
    FunctionInput,
    /// Varying read from the previous pipeline stage.
    StageInput,
    /// Varying written for the next pipeline stage.
    StageOutput,
    /// Vertex stream structure.
    VertexInput,
    /// Compute shared memory.
    GroupShared,
    /// Compile-time constant, resolved per program instance.
    GlobalConst,
    /// Descriptor resource or constant buffer member.
    GlobalParameter,
    /// Stage built-in (`gl_Position`, `gl_FragCoord`, ...).
    GlobalBuiltin,
    /// Local variable of a scope.
    ScopeLocal,
}

impl fmt::Display for ParameterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FunctionInput => "input",
            Self::StageInput => "in",
            Self::StageOutput => "out",
            Self::VertexInput => "vertex",
            Self::GroupShared => "shared",
            Self::GlobalConst => "const",
            Self::GlobalParameter => "descriptor",
            Self::GlobalBuiltin => "builtin",
            Self::ScopeLocal => "local",
        })
    }
}

/// `attribute(key=value, flag)` list attached to declarations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AttributeList {
    entries: Vec<(String, String)>,
}

impl AttributeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an attribute. Flags use an empty value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn value_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.value(key).unwrap_or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for AttributeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attribute(")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if v.is_empty() {
                write!(f, "{k}")?;
            } else {
                write!(f, "{k}={v}")?;
            }
        }
        write!(f, ")")
    }
}

/// Descriptor entry a `GlobalParameter` resolves to.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct DescriptorElement {
    pub table: Handle<ResourceTable>,
    /// Index of the entry inside the table.
    pub entry: u32,
    /// Member index inside the entry's constant buffer layout.
    pub member: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataParameter {
    pub name: String,
    pub scope: ParameterScope,
    pub ty: DataType,
    /// Initializer of a `GlobalConst`.
    pub initializer: Option<Handle<CodeNode>>,
    pub attributes: AttributeList,
    pub location: Location,
    /// Writes are legal (outputs, locals, shared memory, writable built-ins).
    pub assignable: bool,
    pub descriptor: Option<DescriptorElement>,
}

impl DataParameter {
    pub fn new(name: impl Into<String>, scope: ParameterScope, ty: DataType, location: Location) -> Self {
        let assignable = matches!(
            scope,
            ParameterScope::StageOutput
                | ParameterScope::GroupShared
                | ParameterScope::ScopeLocal
                | ParameterScope::FunctionInput
        );
        Self {
            name: name.into(),
            scope,
            ty,
            initializer: None,
            attributes: AttributeList::new(),
            location,
            assignable,
            descriptor: None,
        }
    }
}
