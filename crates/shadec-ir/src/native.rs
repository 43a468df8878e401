//! Native (built-in) functions and operators.
//!
//! Operators are lowered to `NativeCall` nodes as well, so constant folding
//! and backends see a single uniform call shape.

use std::fmt;

macro_rules! natives {
    ($($variant:ident => $name:literal,)*) => {
        /// A built-in operation.
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
        pub enum NativeFunction {
            $($variant,)*
        }

        impl NativeFunction {
            /// Canonical name; operators use `__` prefixed names that
            /// cannot appear in source.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }

            fn lookup(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

natives! {
    Add => "__add",
    Sub => "__sub",
    Mul => "__mul",
    Div => "__div",
    Mod => "__mod",
    Neg => "__neg",
    LogicalNot => "__logicalNot",
    BitNot => "__not",
    BitAnd => "__and",
    BitOr => "__or",
    BitXor => "__xor",
    Shl => "__shl",
    Shr => "__shr",
    LogicAnd => "__logicAnd",
    LogicOr => "__logicOr",
    Eq => "__eq",
    Ne => "__neq",
    Lt => "__lt",
    Le => "__le",
    Gt => "__gt",
    Ge => "__ge",
    Select => "__select",
    Construct => "__construct",
    Abs => "abs",
    Sign => "sign",
    Floor => "floor",
    Ceil => "ceil",
    Round => "round",
    Fract => "fract",
    Sqrt => "sqrt",
    Rsqrt => "rsqrt",
    Pow => "pow",
    Exp => "exp",
    Exp2 => "exp2",
    Log => "log",
    Log2 => "log2",
    Sin => "sin",
    Cos => "cos",
    Tan => "tan",
    Asin => "asin",
    Acos => "acos",
    Atan => "atan",
    Atan2 => "atan2",
    Min => "min",
    Max => "max",
    Clamp => "clamp",
    Saturate => "saturate",
    Mix => "mix",
    Step => "step",
    SmoothStep => "smoothstep",
    Dot => "dot",
    Cross => "cross",
    Length => "length",
    Distance => "distance",
    Normalize => "normalize",
    Reflect => "reflect",
    Transpose => "transpose",
    Ddx => "ddx",
    Ddy => "ddy",
    Any => "any",
    All => "all",
    AsFloat => "asfloat",
    AsInt => "asint",
    AsUint => "asuint",
    PackUnorm4x8 => "packUnorm4x8",
    PackSnorm4x8 => "packSnorm4x8",
    UnpackUnorm4x8 => "unpackUnorm4x8",
    UnpackSnorm4x8 => "unpackSnorm4x8",
    PackHalf2x16 => "packHalf2x16",
    UnpackHalf2x16 => "unpackHalf2x16",
    Texture => "texture",
    TextureLod => "textureLod",
    TextureBias => "textureBias",
    TextureGather => "textureGather",
    TextureSize => "textureSize",
    TexelLoad => "texelLoad",
    TexelLoadSample => "texelLoadSample",
    TexelStore => "texelStore",
    AtomicAdd => "atomicAdd",
    AtomicMin => "atomicMin",
    AtomicMax => "atomicMax",
    AtomicAnd => "atomicAnd",
    AtomicOr => "atomicOr",
    AtomicXor => "atomicXor",
    AtomicExchange => "atomicExchange",
    AtomicCompSwap => "atomicCompSwap",
    AtomicIncrement => "atomicIncrement",
    Barrier => "barrier",
    GroupMemoryBarrier => "groupMemoryBarrier",
    EmitVertex => "EmitVertex",
    EndPrimitive => "EndPrimitive",
}

impl NativeFunction {
    /// Looks up a function callable from source by name. Operator names
    /// and aliases (`lerp`, `frac`) are resolved here too.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "lerp" => Some(Self::Mix),
            "frac" => Some(Self::Fract),
            "inversesqrt" => Some(Self::Rsqrt),
            "dFdx" => Some(Self::Ddx),
            "dFdy" => Some(Self::Ddy),
            n if n.starts_with("__") => None,
            n => Self::lookup(n),
        }
    }

    /// Operators and constructors, as opposed to named intrinsics.
    pub fn is_operator(self) -> bool {
        self.name().starts_with("__")
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Atomics need an lvalue as their first argument.
    pub fn is_atomic(self) -> bool {
        matches!(
            self,
            Self::AtomicAdd
                | Self::AtomicMin
                | Self::AtomicMax
                | Self::AtomicAnd
                | Self::AtomicOr
                | Self::AtomicXor
                | Self::AtomicExchange
                | Self::AtomicCompSwap
                | Self::AtomicIncrement
        )
    }

    /// Calls whose result must never be folded away, even with constant
    /// arguments.
    pub fn has_side_effects(self) -> bool {
        self.is_atomic()
            || matches!(
                self,
                Self::TexelStore
                    | Self::Barrier
                    | Self::GroupMemoryBarrier
                    | Self::EmitVertex
                    | Self::EndPrimitive
            )
    }

    /// Derivatives and texture reads depend on runtime state.
    pub fn is_runtime_only(self) -> bool {
        self.has_side_effects()
            || matches!(
                self,
                Self::Ddx
                    | Self::Ddy
                    | Self::Texture
                    | Self::TextureLod
                    | Self::TextureBias
                    | Self::TextureGather
                    | Self::TextureSize
                    | Self::TexelLoad
                    | Self::TexelLoadSample
            )
    }
}

impl fmt::Display for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
