//! Compile-time evaluation of code trees.
//!
//! [`fold_native`] computes built-in operations over constant operands and
//! is shared by the [`Evaluator`] (which runs whole initializers, calls
//! and loops) and the function folder (which folds one node at a time).

use rustc_hash::FxHashMap;
use shadec_ir::{
    BaseType, Callee, CodeLibrary, CodeNode, Component, DataParameter, DataType, DataValue, Handle,
    Location, NativeFunction, OpCode, ParameterScope, Program, ProgramConstants,
};

/// Node visits allowed for one evaluation.
pub const STEP_LIMIT: u32 = 100_000;

/// Nested user calls allowed for one evaluation.
const CALL_DEPTH_LIMIT: usize = 64;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("evaluation exceeded {0} steps")]
    StepLimit(u32),
    #[error("'{name}' is not a compile-time constant")]
    NotConstant { name: String, location: Location },
    #[error("{what} cannot be evaluated at compile time")]
    Unsupported { what: String, location: Location },
}

impl EvalError {
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::StepLimit(_) => None,
            Self::NotConstant { location, .. } | Self::Unsupported { location, .. } => Some(location),
        }
    }
}

fn unsupported(what: impl Into<String>, location: &Location) -> EvalError {
    EvalError::Unsupported {
        what: what.into(),
        location: location.clone(),
    }
}

/// Flattened component count of a non-array scalar, vector or matrix.
fn width(ty: &DataType) -> Option<usize> {
    if ty.is_array() {
        return None;
    }
    match ty.base {
        BaseType::Scalar(_) => Some(1),
        BaseType::Vector(_, n) => Some(n as usize),
        BaseType::Matrix { cols, rows } => Some(cols as usize * rows as usize),
        _ => None,
    }
}

fn matrix_shape(ty: &DataType) -> Option<(usize, usize)> {
    match ty.base {
        BaseType::Matrix { cols, rows } if !ty.is_array() => Some((cols as usize, rows as usize)),
        _ => None,
    }
}

/// Component `i` of an operand, broadcasting scalars.
fn at(c: &[Component], i: usize) -> Component {
    if c.len() == 1 {
        c[0]
    } else {
        c.get(i).copied().unwrap_or(Component::Undefined)
    }
}

fn float(v: f32) -> Component {
    Component::Float(v)
}

fn float_unary(a: Component, f: impl Fn(f32) -> f32) -> Component {
    match a {
        Component::Float(x) => float(f(x)),
        _ => Component::Undefined,
    }
}

fn arith(native: NativeFunction, a: Component, b: Component) -> Component {
    use Component::{Bool, Float, Int, Uint, Undefined};
    use NativeFunction as N;
    match (a, b) {
        (Int(x), Int(y)) => match native {
            N::Add => Int(x.wrapping_add(y)),
            N::Sub => Int(x.wrapping_sub(y)),
            N::Mul => Int(x.wrapping_mul(y)),
            N::Div if y != 0 => Int(x.wrapping_div(y)),
            N::Mod if y != 0 => Int(x.wrapping_rem(y)),
            N::BitAnd => Int(x & y),
            N::BitOr => Int(x | y),
            N::BitXor => Int(x ^ y),
            N::Shl => Int(x.wrapping_shl(y as u32)),
            N::Shr => Int(x.wrapping_shr(y as u32)),
            N::Min => Int(x.min(y)),
            N::Max => Int(x.max(y)),
            _ => Undefined,
        },
        (Uint(x), Uint(y)) => match native {
            N::Add => Uint(x.wrapping_add(y)),
            N::Sub => Uint(x.wrapping_sub(y)),
            N::Mul => Uint(x.wrapping_mul(y)),
            N::Div if y != 0 => Uint(x / y),
            N::Mod if y != 0 => Uint(x % y),
            N::BitAnd => Uint(x & y),
            N::BitOr => Uint(x | y),
            N::BitXor => Uint(x ^ y),
            N::Shl => Uint(x.wrapping_shl(y)),
            N::Shr => Uint(x.wrapping_shr(y)),
            N::Min => Uint(x.min(y)),
            N::Max => Uint(x.max(y)),
            _ => Undefined,
        },
        (Float(x), Float(y)) => match native {
            N::Add => Float(x + y),
            N::Sub => Float(x - y),
            N::Mul => Float(x * y),
            N::Div if y != 0.0 => Float(x / y),
            N::Mod if y != 0.0 => Float(x - y * (x / y).floor()),
            N::Min => Float(x.min(y)),
            N::Max => Float(x.max(y)),
            N::Pow => Float(x.powf(y)),
            N::Atan2 => Float(x.atan2(y)),
            N::Step => Float(if y < x { 0.0 } else { 1.0 }),
            _ => Undefined,
        },
        (Bool(x), Bool(y)) => match native {
            N::LogicAnd => Bool(x && y),
            N::LogicOr => Bool(x || y),
            _ => Undefined,
        },
        _ => Undefined,
    }
}

fn compare(native: NativeFunction, a: Component, b: Component) -> Component {
    use NativeFunction as N;
    if !a.is_defined() || !b.is_defined() {
        return Component::Undefined;
    }
    let ordering = match (a, b) {
        (Component::Int(x), Component::Int(y)) => x.partial_cmp(&y),
        (Component::Uint(x), Component::Uint(y)) => x.partial_cmp(&y),
        (Component::Float(x), Component::Float(y)) => x.partial_cmp(&y),
        (Component::Bool(x), Component::Bool(y)) => x.partial_cmp(&y),
        _ => return Component::Undefined,
    };
    let Some(ordering) = ordering else {
        // NaN compares unequal to everything.
        return Component::Bool(native == N::Ne);
    };
    Component::Bool(match native {
        N::Eq => ordering.is_eq(),
        N::Ne => ordering.is_ne(),
        N::Lt => ordering.is_lt(),
        N::Le => ordering.is_le(),
        N::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

fn unary(native: NativeFunction, a: Component) -> Component {
    use Component::{Bool, Float, Int, Uint, Undefined};
    use NativeFunction as N;
    match (native, a) {
        (N::Neg, Int(x)) => Int(x.wrapping_neg()),
        (N::Neg, Uint(x)) => Uint(x.wrapping_neg()),
        (N::Neg, Float(x)) => Float(-x),
        (N::LogicalNot, Bool(x)) => Bool(!x),
        (N::BitNot, Int(x)) => Int(!x),
        (N::BitNot, Uint(x)) => Uint(!x),
        (N::Abs, Int(x)) => Int(x.wrapping_abs()),
        (N::Abs, Uint(x)) => Uint(x),
        (N::Abs, Float(x)) => Float(x.abs()),
        (N::Sign, Int(x)) => Int(x.signum()),
        (N::Sign, Uint(x)) => Uint(x.min(1)),
        (N::Sign, Float(x)) => Float(if x > 0.0 {
            1.0
        } else if x < 0.0 {
            -1.0
        } else {
            0.0
        }),
        (N::Floor, _) => float_unary(a, f32::floor),
        (N::Ceil, _) => float_unary(a, f32::ceil),
        (N::Round, _) => float_unary(a, f32::round),
        (N::Fract, _) => float_unary(a, |x| x - x.floor()),
        (N::Sqrt, Float(x)) if x >= 0.0 => Float(x.sqrt()),
        (N::Rsqrt, Float(x)) if x > 0.0 => Float(1.0 / x.sqrt()),
        (N::Exp, _) => float_unary(a, f32::exp),
        (N::Exp2, _) => float_unary(a, f32::exp2),
        (N::Log, Float(x)) if x > 0.0 => Float(x.ln()),
        (N::Log2, Float(x)) if x > 0.0 => Float(x.log2()),
        (N::Sin, _) => float_unary(a, f32::sin),
        (N::Cos, _) => float_unary(a, f32::cos),
        (N::Tan, _) => float_unary(a, f32::tan),
        (N::Asin, Float(x)) if x.abs() <= 1.0 => Float(x.asin()),
        (N::Acos, Float(x)) if x.abs() <= 1.0 => Float(x.acos()),
        (N::Atan, _) => float_unary(a, f32::atan),
        (N::Saturate, _) => float_unary(a, |x| x.clamp(0.0, 1.0)),
        _ => Undefined,
    }
}

fn bitcast(native: NativeFunction, a: Component) -> Component {
    use Component::{Float, Int, Uint, Undefined};
    let bits = match a {
        Int(x) => x as u32,
        Uint(x) => x,
        Float(x) => x.to_bits(),
        _ => return Undefined,
    };
    match native {
        NativeFunction::AsFloat => Float(f32::from_bits(bits)),
        NativeFunction::AsInt => Int(bits as i32),
        _ => Uint(bits),
    }
}

fn floats(c: &[Component]) -> Option<Vec<f32>> {
    c.iter()
        .map(|c| match c {
            Component::Float(f) => Some(*f),
            _ => None,
        })
        .collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Column-major product of an `a_cols x a_rows` and a `b_cols x b_rows`
/// matrix. Vectors on the left are rows, on the right columns.
fn matmul(a: &[f32], (a_cols, a_rows): (usize, usize), b: &[f32], (b_cols, b_rows): (usize, usize)) -> Option<Vec<Component>> {
    if a_cols != b_rows || a.len() != a_cols * a_rows || b.len() != b_cols * b_rows {
        return None;
    }
    let mut out = Vec::with_capacity(b_cols * a_rows);
    for col in 0..b_cols {
        for row in 0..a_rows {
            let sum = (0..a_cols).map(|k| a[k * a_rows + row] * b[col * b_rows + k]).sum();
            out.push(float(sum));
        }
    }
    Some(out)
}

fn multiply(types: &[DataType], args: &[&[Component]], result: &DataType) -> Option<Vec<Component>> {
    let (lhs, rhs) = (&types[0], &types[1]);
    let matrix = matrix_shape(lhs).is_some() || matrix_shape(rhs).is_some();
    if !matrix || lhs.is_scalar() || rhs.is_scalar() {
        let n = width(result)?;
        return Some((0..n).map(|i| arith(NativeFunction::Mul, at(args[0], i), at(args[1], i))).collect());
    }
    let (a, b) = (floats(args[0])?, floats(args[1])?);
    let a_shape = matrix_shape(lhs).unwrap_or((a.len(), 1));
    let b_shape = matrix_shape(rhs).unwrap_or((1, b.len()));
    matmul(&a, a_shape, &b, b_shape)
}

fn pack_4x8(v: &[f32], signed: bool) -> Component {
    let mut packed = 0u32;
    for (i, x) in v.iter().enumerate() {
        let byte = if signed {
            ((x.clamp(-1.0, 1.0) * 127.0).round() as i8) as u8
        } else {
            (x.clamp(0.0, 1.0) * 255.0).round() as u8
        };
        packed |= (byte as u32) << (8 * i);
    }
    Component::Uint(packed)
}

fn unpack_4x8(packed: u32, signed: bool) -> Vec<Component> {
    (0..4)
        .map(|i| {
            let byte = (packed >> (8 * i)) as u8;
            if signed {
                float(((byte as i8) as f32 / 127.0).max(-1.0))
            } else {
                float(byte as f32 / 255.0)
            }
        })
        .collect()
}

/// Evaluates a built-in over constant operands.
///
/// `types` are the operand types and `result` the call's type. Returns
/// `None` when the operation is not statically evaluable (texture reads,
/// atomics, derivatives, constructors, half packing). Components that have
/// no defined value (undefined inputs, integer division by zero) come back
/// as [`Component::Undefined`].
pub fn fold_native(
    native: NativeFunction,
    types: &[DataType],
    values: &[DataValue],
    result: &DataType,
) -> Option<DataValue> {
    use NativeFunction as N;
    if native.is_runtime_only() || native == N::Construct || types.len() != values.len() {
        return None;
    }
    if native == N::Select {
        let cond = values.first()?.as_scalar()?;
        return match cond.as_bool() {
            Some(true) => values.get(1).cloned(),
            Some(false) => values.get(2).cloned(),
            None => width(result).map(DataValue::undefined),
        };
    }
    if values.iter().any(|v| !matches!(v, DataValue::Components(_))) {
        return None;
    }
    let args: Vec<&[Component]> = values.iter().map(DataValue::components).collect();
    let arg = |i: usize| args.get(i).copied().unwrap_or(&[]);
    let n = width(result)?;

    let out: Vec<Component> = match native {
        N::Mul => multiply(types, &args, result)?,
        N::Add
        | N::Sub
        | N::Div
        | N::Mod
        | N::BitAnd
        | N::BitOr
        | N::BitXor
        | N::Shl
        | N::Shr
        | N::LogicAnd
        | N::LogicOr
        | N::Min
        | N::Max
        | N::Pow
        | N::Atan2
        | N::Step => (0..n).map(|i| arith(native, at(arg(0), i), at(arg(1), i))).collect(),
        N::Eq | N::Ne | N::Lt | N::Le | N::Gt | N::Ge => {
            (0..n).map(|i| compare(native, at(arg(0), i), at(arg(1), i))).collect()
        }
        N::Clamp => (0..n)
            .map(|i| {
                let lo = arith(N::Max, at(arg(0), i), at(arg(1), i));
                arith(N::Min, lo, at(arg(2), i))
            })
            .collect(),
        N::Mix => (0..n)
            .map(|i| {
                let (a, b, t) = (at(arg(0), i), at(arg(1), i), at(arg(2), i));
                match (a, b, t) {
                    (Component::Float(a), Component::Float(b), Component::Float(t)) => float(a + (b - a) * t),
                    _ => Component::Undefined,
                }
            })
            .collect(),
        N::SmoothStep => (0..n)
            .map(|i| match (at(arg(0), i), at(arg(1), i), at(arg(2), i)) {
                (Component::Float(e0), Component::Float(e1), Component::Float(x)) if e0 != e1 => {
                    let t = ((x - e0) / (e1 - e0)).clamp(0.0, 1.0);
                    float(t * t * (3.0 - 2.0 * t))
                }
                _ => Component::Undefined,
            })
            .collect(),
        N::AsFloat | N::AsInt | N::AsUint => (0..n).map(|i| bitcast(native, at(arg(0), i))).collect(),
        N::Transpose => {
            let (cols, rows) = matrix_shape(types.first()?)?;
            let m = arg(0);
            (0..n).map(|i| at(m, (i % cols) * rows + i / cols)).collect()
        }
        N::Any | N::All => {
            let mut bools = arg(0).iter().map(Component::as_bool);
            let value = if native == N::Any {
                bools.try_fold(false, |acc, b| Some(acc || b?))
            } else {
                bools.try_fold(true, |acc, b| Some(acc && b?))
            };
            vec![value.map_or(Component::Undefined, Component::Bool)]
        }
        N::Dot | N::Length | N::Distance | N::Normalize | N::Cross | N::Reflect => {
            let Some(a) = floats(arg(0)) else {
                return Some(DataValue::undefined(n));
            };
            let b = if native == N::Length || native == N::Normalize {
                Vec::new()
            } else {
                match floats(arg(1)) {
                    Some(b) => b,
                    None => return Some(DataValue::undefined(n)),
                }
            };
            match native {
                N::Dot => vec![float(dot(&a, &b))],
                N::Length => vec![float(dot(&a, &a).sqrt())],
                N::Distance => {
                    let d: Vec<f32> = a.iter().zip(&b).map(|(x, y)| x - y).collect();
                    vec![float(dot(&d, &d).sqrt())]
                }
                N::Normalize => {
                    let len = dot(&a, &a).sqrt();
                    if len == 0.0 {
                        vec![Component::Undefined; n]
                    } else {
                        a.iter().map(|x| float(x / len)).collect()
                    }
                }
                N::Cross => vec![
                    float(a[1] * b[2] - a[2] * b[1]),
                    float(a[2] * b[0] - a[0] * b[2]),
                    float(a[0] * b[1] - a[1] * b[0]),
                ],
                _ => {
                    let d = 2.0 * dot(&b, &a);
                    a.iter().zip(&b).map(|(i, n)| float(i - d * n)).collect()
                }
            }
        }
        N::PackUnorm4x8 | N::PackSnorm4x8 => match floats(arg(0)) {
            Some(v) => vec![pack_4x8(&v, native == N::PackSnorm4x8)],
            None => vec![Component::Undefined],
        },
        N::UnpackUnorm4x8 | N::UnpackSnorm4x8 => match arg(0).first() {
            Some(Component::Uint(p)) => unpack_4x8(*p, native == N::UnpackSnorm4x8),
            _ => vec![Component::Undefined; 4],
        },
        N::PackHalf2x16 | N::UnpackHalf2x16 => return None,
        _ => (0..n).map(|i| unary(native, at(arg(0), i))).collect(),
    };
    if out.len() != n {
        return None;
    }
    Some(DataValue::Components(out))
}

/// Components of the base value selected by one access step
/// (`AccessMember`, `ReadSwizzle`, or `AccessArray` with an evaluated
/// index), as indices into the base's flattened components.
pub fn access_components(
    lib: &CodeLibrary,
    node: &CodeNode,
    base_ty: &DataType,
    index: Option<&DataValue>,
) -> Result<Vec<usize>, String> {
    match node.op {
        OpCode::AccessMember => {
            let composite = base_ty
                .composite()
                .ok_or_else(|| format!("member access on '{}'", lib.type_name(base_ty)))?;
            let (name, member) = node.member().ok_or("member access without a member")?;
            let members = &lib.composites[composite].members;
            let mut offset = 0;
            for m in &members[..member as usize] {
                offset += lib.flat_component_count(&m.ty).ok_or("unsized member")?;
            }
            let target = members
                .get(member as usize)
                .ok_or_else(|| format!("no member '{name}'"))?;
            let len = lib.flat_component_count(&target.ty).ok_or("unsized member")?;
            Ok((offset..offset + len).collect())
        }
        OpCode::ReadSwizzle => {
            let swizzle = node.swizzle().ok_or("swizzle without selectors")?;
            Ok(swizzle.components().iter().map(|&c| c as usize).collect())
        }
        OpCode::AccessArray => {
            let i = index
                .and_then(DataValue::as_scalar)
                .and_then(|c| c.as_i64())
                .ok_or("index is not constant")?;
            let (count, stride) = if base_ty.is_array() {
                let count = base_ty.array.outer().unwrap_or(0) as usize;
                let stride = lib
                    .flat_component_count(&base_ty.element())
                    .ok_or("unsized array element")?;
                (count, stride)
            } else if let Some((cols, rows)) = matrix_shape(base_ty) {
                (cols, rows)
            } else if base_ty.is_vector() {
                (base_ty.component_count().unwrap_or(0) as usize, 1)
            } else {
                return Err(format!("cannot index '{}'", lib.type_name(base_ty)));
            };
            if i < 0 || i as usize >= count {
                return Err(format!("index {i} is out of range"));
            }
            let start = i as usize * stride;
            Ok((start..start + stride).collect())
        }
        op => Err(format!("'{op}' is not an access")),
    }
}

enum Flow {
    Next,
    Break,
    Continue,
    Return(Option<DataValue>),
    Exit,
}

/// Runs code at compile time against a set of resolved constants.
///
/// Locals and inputs live in per-call frames. Global constants and other
/// programs' constants that are not in `constants` are evaluated from
/// their initializers on first use and cached.
pub struct Evaluator<'a> {
    lib: &'a CodeLibrary,
    constants: &'a ProgramConstants,
    program: Option<Handle<Program>>,
    globals: FxHashMap<Handle<DataParameter>, DataValue>,
    in_progress: Vec<Handle<DataParameter>>,
    frames: Vec<FxHashMap<Handle<DataParameter>, DataValue>>,
    steps: u32,
    limit: u32,
}

impl<'a> Evaluator<'a> {
    pub fn new(lib: &'a CodeLibrary, program: Option<Handle<Program>>, constants: &'a ProgramConstants) -> Self {
        Self {
            lib,
            constants,
            program,
            globals: FxHashMap::default(),
            in_progress: Vec::new(),
            frames: Vec::new(),
            steps: 0,
            limit: STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Evaluates an expression node with a fresh step budget.
    pub fn evaluate(&mut self, node: Handle<CodeNode>) -> Result<DataValue, EvalError> {
        self.steps = 0;
        self.frames.push(FxHashMap::default());
        let result = self.eval(node);
        self.frames.pop();
        result
    }

    /// Value of a constant parameter as code inside the current program
    /// would see it.
    pub fn constant_value(&mut self, param: Handle<DataParameter>, location: &Location) -> Result<DataValue, EvalError> {
        self.steps = 0;
        self.read_constant(param, location)
    }

    fn step(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        if self.steps > self.limit {
            return Err(EvalError::StepLimit(self.limit));
        }
        Ok(())
    }

    fn flat_count(&self, ty: &DataType, location: &Location) -> Result<usize, EvalError> {
        self.lib
            .flat_component_count(ty)
            .ok_or_else(|| unsupported(format!("a value of type '{}'", self.lib.type_name(ty)), location))
    }

    fn read_constant(&mut self, p: Handle<DataParameter>, location: &Location) -> Result<DataValue, EvalError> {
        if let Some(v) = self.constants.get(p) {
            return Ok(v.clone());
        }
        if let Some(v) = self.globals.get(&p) {
            return Ok(v.clone());
        }
        let lib = self.lib;
        let param = lib.param(p);
        let not_constant = || EvalError::NotConstant {
            name: param.name.clone(),
            location: location.clone(),
        };
        let Some(init) = param.initializer else {
            return Err(not_constant());
        };
        if self.in_progress.contains(&p) {
            return Err(not_constant());
        }
        self.in_progress.push(p);
        self.frames.push(FxHashMap::default());
        let value = self.eval(init);
        self.frames.pop();
        self.in_progress.pop();
        let value = value?;
        self.globals.insert(p, value.clone());
        Ok(value)
    }

    fn read_param(&mut self, p: Handle<DataParameter>, location: &Location) -> Result<DataValue, EvalError> {
        if let Some(v) = self.frames.last().and_then(|f| f.get(&p)) {
            return Ok(v.clone());
        }
        let param = self.lib.param(p);
        match param.scope {
            ParameterScope::ScopeLocal | ParameterScope::FunctionInput => {
                Ok(DataValue::undefined(self.flat_count(&param.ty, location)?))
            }
            ParameterScope::GlobalConst => self.read_constant(p, location),
            _ => Err(EvalError::NotConstant {
                name: param.name.clone(),
                location: location.clone(),
            }),
        }
    }

    fn eval(&mut self, node: Handle<CodeNode>) -> Result<DataValue, EvalError> {
        self.step()?;
        let lib = self.lib;
        let n = lib.node(node);
        match n.op {
            OpCode::Const => n.value.clone().ok_or_else(|| unsupported("an empty constant", &n.location)),
            OpCode::Load => self.eval(n.children[0]),
            OpCode::ParamRef => {
                let Some(p) = n.param() else {
                    panic!("ParamRef node without a parameter at {}", n.location);
                };
                self.read_param(p, &n.location)
            }
            OpCode::AccessMember | OpCode::AccessArray | OpCode::ReadSwizzle => {
                let base = self.eval(n.children[0])?;
                let index = match n.op {
                    OpCode::AccessArray => Some(self.eval(n.children[1])?),
                    _ => None,
                };
                let base_ty = lib.node(n.children[0]).ty;
                let DataValue::Components(components) = base else {
                    return Err(unsupported("access into a non-numeric value", &n.location));
                };
                let indices = access_components(lib, n, &base_ty, index.as_ref())
                    .map_err(|what| unsupported(what, &n.location))?;
                Ok(DataValue::Components(
                    indices
                        .into_iter()
                        .map(|i| components.get(i).copied().unwrap_or(Component::Undefined))
                        .collect(),
                ))
            }
            OpCode::NativeCall => self.native_call(n),
            OpCode::Call => self.call(n),
            OpCode::Store => {
                self.exec(node)?;
                Ok(DataValue::Components(Vec::new()))
            }
            op => Err(unsupported(format!("'{op}'"), &n.location)),
        }
    }

    fn native_call(&mut self, n: &CodeNode) -> Result<DataValue, EvalError> {
        let lib = self.lib;
        let Some(native) = n.native() else {
            panic!("NativeCall node without a function at {}", n.location);
        };
        match native {
            NativeFunction::LogicAnd | NativeFunction::LogicOr => {
                let lhs = self.eval(n.children[0])?;
                let short = native == NativeFunction::LogicOr;
                if lhs.as_scalar().and_then(|c| c.as_bool()) == Some(short) {
                    return Ok(DataValue::bool(short));
                }
                return self.eval(n.children[1]);
            }
            NativeFunction::Select => {
                let cond = self.eval(n.children[0])?;
                return match cond.as_scalar().and_then(|c| c.as_bool()) {
                    Some(true) => self.eval(n.children[1]),
                    Some(false) => self.eval(n.children[2]),
                    None => Ok(DataValue::undefined(self.flat_count(&n.ty, &n.location)?)),
                };
            }
            _ => {}
        }

        let mut values = Vec::with_capacity(n.children.len());
        for &child in &n.children {
            values.push(self.eval(child)?);
        }
        let result = if native == NativeFunction::Construct {
            lib.construct_value(&n.ty, &values)
        } else {
            let types: Vec<DataType> = n.children.iter().map(|&c| lib.node(c).ty).collect();
            fold_native(native, &types, &values, &n.ty)
        };
        result.ok_or_else(|| unsupported(format!("'{native}'"), &n.location))
    }

    fn call(&mut self, n: &CodeNode) -> Result<DataValue, EvalError> {
        let lib = self.lib;
        let (function, program, first_arg) = match n.callee() {
            Some(Callee::Global(f)) => (*f, self.program, 0),
            Some(Callee::Program { name }) => {
                let program = self
                    .program
                    .ok_or_else(|| unsupported(format!("call to '{name}' outside a shader"), &n.location))?;
                let f = lib
                    .find_function(program, name, true)
                    .ok_or_else(|| unsupported(format!("call to unknown '{name}'"), &n.location))?;
                (f, Some(program), 0)
            }
            Some(Callee::ProgramMember { name }) => {
                let DataValue::Program(target) = self.eval(n.children[0])? else {
                    return Err(unsupported(format!("call to '{name}' on a non-shader value"), &n.location));
                };
                let f = lib
                    .find_function(target, name, true)
                    .ok_or_else(|| unsupported(format!("call to unknown '{name}'"), &n.location))?;
                (f, Some(target), 1)
            }
            Some(Callee::Folded(_)) | None => return Err(unsupported("a folded call", &n.location)),
        };
        if self.frames.len() > CALL_DEPTH_LIMIT {
            return Err(unsupported("deep recursion", &n.location));
        }

        let func = lib.function(function);
        let Some(body) = func.code else {
            return Err(unsupported(format!("'{}' without a body", func.name), &n.location));
        };
        let mut frame = FxHashMap::default();
        for (&input, &arg) in func.inputs.iter().zip(&n.children[first_arg..]) {
            let value = self.eval(arg)?;
            frame.insert(input, value);
        }

        let saved = std::mem::replace(&mut self.program, program);
        self.frames.push(frame);
        let flow = self.exec(body);
        self.frames.pop();
        self.program = saved;

        match flow? {
            Flow::Return(Some(v)) => Ok(v),
            Flow::Exit => Err(unsupported("'discard'", &n.location)),
            _ => Ok(DataValue::Components(Vec::new())),
        }
    }

    fn condition(&mut self, node: Handle<CodeNode>) -> Result<bool, EvalError> {
        let n = self.lib.node(node);
        if n.is_nop() {
            return Ok(true);
        }
        let location = n.location.clone();
        self.eval(node)?
            .as_scalar()
            .and_then(|c| c.as_bool())
            .ok_or_else(|| unsupported("an undefined condition", &location))
    }

    fn exec(&mut self, node: Handle<CodeNode>) -> Result<Flow, EvalError> {
        self.step()?;
        let lib = self.lib;
        let n = lib.node(node);
        match n.op {
            OpCode::Nop => Ok(Flow::Next),
            OpCode::Scope => {
                for &child in &n.children {
                    let flow = self.exec(child)?;
                    if !matches!(flow, Flow::Next) {
                        return Ok(flow);
                    }
                }
                Ok(Flow::Next)
            }
            OpCode::Store => {
                let (target, indices) = self.place(n.children[0])?;
                let value = self.eval(n.children[1])?;
                self.write(target, &indices, value, &n.location)?;
                Ok(Flow::Next)
            }
            OpCode::IfElse => {
                if self.condition(n.children[0])? {
                    self.exec(n.children[1])
                } else {
                    self.exec(n.children[2])
                }
            }
            OpCode::Loop => {
                let (cond, body, step) = (n.children[0], n.children[1], n.children[2]);
                let post = n.loop_kind() == shadec_ir::LoopKind::PostCondition;
                loop {
                    if !post && !self.condition(cond)? {
                        break;
                    }
                    match self.exec(body)? {
                        Flow::Break => break,
                        flow @ (Flow::Return(_) | Flow::Exit) => return Ok(flow),
                        Flow::Next | Flow::Continue => {}
                    }
                    self.exec(step)?;
                    if post && !self.condition(cond)? {
                        break;
                    }
                }
                Ok(Flow::Next)
            }
            OpCode::Break => Ok(Flow::Break),
            OpCode::Continue => Ok(Flow::Continue),
            OpCode::Exit => Ok(Flow::Exit),
            OpCode::Return => match n.children.first() {
                Some(&value) => Ok(Flow::Return(Some(self.eval(value)?))),
                None => Ok(Flow::Return(None)),
            },
            _ => {
                self.eval(node)?;
                Ok(Flow::Next)
            }
        }
    }

    /// Root parameter of a store target and the flattened components the
    /// target covers.
    fn place(&mut self, node: Handle<CodeNode>) -> Result<(Handle<DataParameter>, Vec<usize>), EvalError> {
        let lib = self.lib;
        let n = lib.node(node);
        match n.op {
            OpCode::ParamRef => {
                let Some(p) = n.param() else {
                    panic!("ParamRef node without a parameter at {}", n.location);
                };
                let count = self.flat_count(&lib.param(p).ty, &n.location)?;
                Ok((p, (0..count).collect()))
            }
            OpCode::AccessMember | OpCode::AccessArray | OpCode::ReadSwizzle => {
                let (root, outer) = self.place(n.children[0])?;
                let index = match n.op {
                    OpCode::AccessArray => Some(self.eval(n.children[1])?),
                    _ => None,
                };
                let base_ty = lib.node(n.children[0]).ty;
                let inner = access_components(lib, n, &base_ty, index.as_ref())
                    .map_err(|what| unsupported(what, &n.location))?;
                let indices = inner
                    .into_iter()
                    .map(|i| outer.get(i).copied().ok_or_else(|| unsupported("an access", &n.location)))
                    .collect::<Result<_, _>>()?;
                Ok((root, indices))
            }
            op => Err(unsupported(format!("a store through '{op}'"), &n.location)),
        }
    }

    fn write(
        &mut self,
        target: Handle<DataParameter>,
        indices: &[usize],
        value: DataValue,
        location: &Location,
    ) -> Result<(), EvalError> {
        let param = self.lib.param(target);
        if !matches!(param.scope, ParameterScope::ScopeLocal | ParameterScope::FunctionInput) {
            return Err(unsupported(format!("a store to '{}'", param.name), location));
        }
        let count = self.flat_count(&param.ty, location)?;
        let frame = self.frames.last_mut().ok_or_else(|| unsupported("a store", location))?;
        let current = frame.entry(target).or_insert_with(|| DataValue::undefined(count));
        let DataValue::Components(slots) = current else {
            return Err(unsupported(format!("a store to '{}'", param.name), location));
        };
        let source = value.components();
        if source.len() != indices.len() {
            return Err(unsupported(format!("a store to '{}'", param.name), location));
        }
        for (&slot, &c) in indices.iter().zip(source) {
            if let Some(s) = slots.get_mut(slot) {
                *s = c;
            }
        }
        Ok(())
    }
}
