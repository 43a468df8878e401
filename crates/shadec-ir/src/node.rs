//! Code tree nodes.
//!
//! A function body is an owning tree of [`CodeNode`]s stored in an
//! [`Arena`](crate::Arena): each node lists its children by handle and no
//! node is reachable from two parents. Child layout per opcode:
//!
//! | opcode         | children                                  |
//! |----------------|-------------------------------------------|
//! | `Scope`        | statements                                |
//! | `Loop`         | condition (or `Nop`), body, step (or `Nop`) |
//! | `IfElse`       | condition, then, else (or `Nop`)          |
//! | `Return`       | optional value                            |
//! | `Store`        | target, value                             |
//! | `Load`         | target                                    |
//! | `NativeCall`   | arguments                                 |
//! | `Call`         | arguments (program member calls: object first) |
//! | `ReadSwizzle`  | vector                                    |
//! | `AccessArray`  | base, index                               |
//! | `AccessMember` | base                                      |

use std::fmt;

use crate::arena::Handle;
use crate::error::Location;
use crate::function::{FoldedFunction, Function};
use crate::native::NativeFunction;
use crate::param::DataParameter;
use crate::types::DataType;
use crate::value::DataValue;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum OpCode {
    Nop,
    Scope,
    Break,
    Continue,
    Loop,
    /// Terminates the invocation (`discard`).
    Exit,
    Return,
    IfElse,
    Load,
    Store,
    NativeCall,
    Const,
    ParamRef,
    ReadSwizzle,
    AccessArray,
    AccessMember,
    Call,
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Up to four component selectors (`0..=3` for `x..w`).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Swizzle {
    components: [u8; 4],
    len: u8,
}

impl Swizzle {
    /// Parses `xyzw` / `rgba` selectors.
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() || text.len() > 4 {
            return None;
        }
        let mut out = Self {
            components: [0; 4],
            len: 0,
        };
        let rgba = text.chars().all(|c| "rgba".contains(c));
        for c in text.chars() {
            let index = if rgba {
                "rgba".find(c)?
            } else {
                "xyzw".find(c)?
            };
            out.components[out.len as usize] = index as u8;
            out.len += 1;
        }
        Some(out)
    }

    pub fn components(&self) -> &[u8] {
        &self.components[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Highest component index referenced, plus one.
    pub fn required_width(&self) -> u8 {
        self.components().iter().max().map_or(0, |m| m + 1)
    }

    /// A swizzle used as a store target may not repeat components.
    pub fn has_duplicates(&self) -> bool {
        let c = self.components();
        (0..c.len()).any(|i| c[i + 1..].contains(&c[i]))
    }
}

impl fmt::Display for Swizzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &c in self.components() {
            f.write_str(&"xyzw"[c as usize..c as usize + 1])?;
        }
        Ok(())
    }
}

/// Target of a `Call` node.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Callee {
    /// A global (program-less) function.
    Global(Handle<Function>),
    /// A program function, re-resolved by name against the instantiated
    /// program when folding so derived programs can override it.
    Program { name: String },
    /// A function of the program referenced by the first child, which is a
    /// program-typed expression.
    ProgramMember { name: String },
    /// A folded specialization (only in folded code).
    Folded(Handle<FoldedFunction>),
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum LoopKind {
    /// Condition checked before each iteration (`for`, `while`).
    PreCondition,
    /// Condition checked after each iteration (`do`/`while`).
    PostCondition,
}

/// Opcode specific payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum NodeExtra {
    #[default]
    None,
    Param(Handle<DataParameter>),
    Native(NativeFunction),
    Call(Callee),
    Swizzle(Swizzle),
    /// Member name and its index inside the structure.
    Member { name: String, index: u32 },
    /// Scope-local parameters declared by a `Scope`.
    Locals(Vec<Handle<DataParameter>>),
    Loop(LoopKind),
}

/// One node of a code tree.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeNode {
    pub op: OpCode,
    pub children: Vec<Handle<CodeNode>>,
    /// Resolved type of the value this node produces.
    pub ty: DataType,
    /// Known constant value; always set on `Const` nodes.
    pub value: Option<DataValue>,
    pub extra: NodeExtra,
    pub location: Location,
}

impl CodeNode {
    pub fn new(op: OpCode, location: Location) -> Self {
        Self {
            op,
            children: Vec::new(),
            ty: DataType::VOID,
            value: None,
            extra: NodeExtra::None,
            location,
        }
    }

    pub fn with_children(mut self, children: Vec<Handle<CodeNode>>) -> Self {
        self.children = children;
        self
    }

    pub fn with_type(mut self, ty: DataType) -> Self {
        self.ty = ty;
        self
    }

    pub fn with_extra(mut self, extra: NodeExtra) -> Self {
        self.extra = extra;
        self
    }

    pub fn constant(value: DataValue, ty: DataType, location: Location) -> Self {
        Self {
            value: Some(value),
            ..Self::new(OpCode::Const, location).with_type(ty)
        }
    }

    pub fn param(&self) -> Option<Handle<DataParameter>> {
        match self.extra {
            NodeExtra::Param(p) => Some(p),
            _ => None,
        }
    }

    pub fn native(&self) -> Option<NativeFunction> {
        match self.extra {
            NodeExtra::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn callee(&self) -> Option<&Callee> {
        match &self.extra {
            NodeExtra::Call(c) => Some(c),
            _ => None,
        }
    }

    pub fn swizzle(&self) -> Option<Swizzle> {
        match self.extra {
            NodeExtra::Swizzle(s) => Some(s),
            _ => None,
        }
    }

    pub fn member(&self) -> Option<(&str, u32)> {
        match &self.extra {
            NodeExtra::Member { name, index } => Some((name, *index)),
            _ => None,
        }
    }

    pub fn locals(&self) -> &[Handle<DataParameter>] {
        match &self.extra {
            NodeExtra::Locals(l) => l,
            _ => &[],
        }
    }

    pub fn loop_kind(&self) -> LoopKind {
        match self.extra {
            NodeExtra::Loop(k) => k,
            _ => LoopKind::PreCondition,
        }
    }

    pub fn is_nop(&self) -> bool {
        self.op == OpCode::Nop
    }
}
