//! Result types of native functions and operators.

use shadec_ir::{BaseType, DataType, NativeFunction, ResourceKind, ScalarKind};

type TypeResult = Result<DataType, String>;

fn kind_of(ty: &DataType) -> Option<ScalarKind> {
    if ty.is_numeric() { ty.scalar_kind() } else { None }
}

fn is_float(ty: &DataType) -> bool {
    kind_of(ty) == Some(ScalarKind::Float)
}

fn is_integer(ty: &DataType) -> bool {
    matches!(kind_of(ty), Some(ScalarKind::Int | ScalarKind::Uint))
}

fn is_arithmetic(ty: &DataType) -> bool {
    matches!(kind_of(ty), Some(k) if k != ScalarKind::Bool)
}

/// Shape shared by two component-wise operands; a scalar broadcasts to
/// the other operand's vector width.
pub fn common_shape(a: &DataType, b: &DataType) -> TypeResult {
    if a.is_matrix() && a == b {
        return Ok(*a);
    }
    match (kind_of(a), kind_of(b)) {
        (Some(ka), Some(kb)) if ka == kb => {
            if a == b || b.is_scalar() {
                Ok(*a)
            } else if a.is_scalar() {
                Ok(*b)
            } else {
                Err(format!("operand widths differ ({} vs {})", width(a), width(b)))
            }
        }
        (Some(ka), Some(kb)) => Err(format!(
            "operand kinds differ ({} vs {})",
            ka.scalar_name(),
            kb.scalar_name()
        )),
        _ => Err("operands must be scalars or vectors".into()),
    }
}

fn width(ty: &DataType) -> u8 {
    ty.component_count().unwrap_or(0)
}

fn bool_shape(ty: &DataType) -> DataType {
    DataType::numeric(ScalarKind::Bool, width(ty))
}

fn expect_args(native: NativeFunction, args: &[DataType], n: usize) -> Result<(), String> {
    if args.len() == n {
        Ok(())
    } else {
        Err(format!("'{native}' expects {n} argument(s), got {}", args.len()))
    }
}

fn multiply(a: &DataType, b: &DataType) -> TypeResult {
    match (a.base, b.base, a.is_array() || b.is_array()) {
        (_, _, true) => Err("cannot multiply arrays".into()),
        (BaseType::Matrix { cols, rows }, BaseType::Vector(ScalarKind::Float, n), _) if n == cols => {
            Ok(DataType::vec(rows))
        }
        (BaseType::Vector(ScalarKind::Float, n), BaseType::Matrix { cols, rows }, _) if n == rows => {
            Ok(DataType::vec(cols))
        }
        (BaseType::Matrix { cols: ca, rows: ra }, BaseType::Matrix { cols: cb, rows: rb }, _) if ca == rb => {
            Ok(DataType::new(BaseType::Matrix { cols: cb, rows: ra }))
        }
        (BaseType::Matrix { .. }, BaseType::Scalar(ScalarKind::Float), _) => Ok(*a),
        (BaseType::Scalar(ScalarKind::Float), BaseType::Matrix { .. }, _) => Ok(*b),
        (BaseType::Matrix { .. }, _, _) | (_, BaseType::Matrix { .. }, _) => {
            Err("matrix product dimensions do not match".into())
        }
        _ if is_arithmetic(a) && is_arithmetic(b) => common_shape(a, b),
        _ => Err("'*' needs numeric operands".into()),
    }
}

fn texture_arg(native: NativeFunction, ty: &DataType) -> Result<shadec_ir::ResourceType, String> {
    match ty.resource() {
        Some(r) if r.kind != ResourceKind::ConstantBuffer => Ok(*r),
        _ => Err(format!("'{native}' expects a texture or buffer as first argument")),
    }
}

fn coordinate_ok(r: &shadec_ir::ResourceType, ty: &DataType, float: bool) -> bool {
    let want = r.coordinate_count();
    let kind_ok = if float { is_float(ty) } else { is_integer(ty) };
    kind_ok && width(ty) == want
}

/// Checks the argument types of `native` and returns its result type.
/// Constructors are typed by the parser, which knows the target type.
pub fn native_result_type(native: NativeFunction, args: &[DataType]) -> TypeResult {
    use NativeFunction as N;
    let arg = |i: usize| args.get(i).copied().unwrap_or(DataType::VOID);

    match native {
        N::Add | N::Sub | N::Div | N::Mod => {
            expect_args(native, args, 2)?;
            if !(is_arithmetic(&arg(0)) || arg(0).is_matrix()) {
                return Err(format!("'{native}' needs numeric operands"));
            }
            common_shape(&arg(0), &arg(1))
        }
        N::Mul => {
            expect_args(native, args, 2)?;
            multiply(&arg(0), &arg(1))
        }
        N::Neg => {
            expect_args(native, args, 1)?;
            if is_arithmetic(&arg(0)) || arg(0).is_matrix() {
                Ok(arg(0))
            } else {
                Err("unary '-' needs a numeric operand".into())
            }
        }
        N::LogicalNot => {
            expect_args(native, args, 1)?;
            if arg(0) == DataType::BOOL {
                Ok(DataType::BOOL)
            } else {
                Err("'!' needs a bool operand".into())
            }
        }
        N::BitNot => {
            expect_args(native, args, 1)?;
            if is_integer(&arg(0)) {
                Ok(arg(0))
            } else {
                Err("'~' needs an integer operand".into())
            }
        }
        N::BitAnd | N::BitOr | N::BitXor | N::Shl | N::Shr => {
            expect_args(native, args, 2)?;
            if !is_integer(&arg(0)) || !is_integer(&arg(1)) {
                return Err("bitwise operators need integer operands".into());
            }
            common_shape(&arg(0), &arg(1))
        }
        N::LogicAnd | N::LogicOr => {
            expect_args(native, args, 2)?;
            if arg(0) == DataType::BOOL && arg(1) == DataType::BOOL {
                Ok(DataType::BOOL)
            } else {
                Err("logical operators need bool operands".into())
            }
        }
        N::Eq | N::Ne => {
            expect_args(native, args, 2)?;
            Ok(bool_shape(&common_shape(&arg(0), &arg(1))?))
        }
        N::Lt | N::Le | N::Gt | N::Ge => {
            expect_args(native, args, 2)?;
            if !is_arithmetic(&arg(0)) {
                return Err("comparisons need numeric operands".into());
            }
            Ok(bool_shape(&common_shape(&arg(0), &arg(1))?))
        }
        N::Select => {
            expect_args(native, args, 3)?;
            if arg(0) != DataType::BOOL {
                return Err("condition of '?:' must be bool".into());
            }
            if arg(1) != arg(2) {
                return Err("branches of '?:' have different types".into());
            }
            Ok(arg(1))
        }
        N::Construct => Err("constructors are typed by their target".into()),

        N::Floor
        | N::Ceil
        | N::Round
        | N::Fract
        | N::Sqrt
        | N::Rsqrt
        | N::Exp
        | N::Exp2
        | N::Log
        | N::Log2
        | N::Sin
        | N::Cos
        | N::Tan
        | N::Asin
        | N::Acos
        | N::Atan
        | N::Ddx
        | N::Ddy
        | N::Saturate
        | N::Normalize => {
            expect_args(native, args, 1)?;
            if is_float(&arg(0)) {
                Ok(arg(0))
            } else {
                Err(format!("'{native}' needs a float argument"))
            }
        }
        N::Abs | N::Sign => {
            expect_args(native, args, 1)?;
            if is_arithmetic(&arg(0)) {
                Ok(arg(0))
            } else {
                Err(format!("'{native}' needs a numeric argument"))
            }
        }
        N::Pow | N::Atan2 | N::Step => {
            expect_args(native, args, 2)?;
            if !is_float(&arg(0)) || !is_float(&arg(1)) {
                return Err(format!("'{native}' needs float arguments"));
            }
            common_shape(&arg(1), &arg(0))
        }
        N::Min | N::Max => {
            expect_args(native, args, 2)?;
            if !is_arithmetic(&arg(0)) {
                return Err(format!("'{native}' needs numeric arguments"));
            }
            common_shape(&arg(0), &arg(1))
        }
        N::Clamp => {
            expect_args(native, args, 3)?;
            if !is_arithmetic(&arg(0)) {
                return Err("'clamp' needs numeric arguments".into());
            }
            common_shape(&arg(0), &arg(1))?;
            common_shape(&arg(0), &arg(2))
        }
        N::Mix | N::SmoothStep => {
            expect_args(native, args, 3)?;
            if !args.iter().all(is_float) {
                return Err(format!("'{native}' needs float arguments"));
            }
            // mix(a, b, t) and smoothstep(e0, e1, x): the result has the
            // shape of `a` / `x`, the other two may be scalars.
            let (result, others) = if native == N::Mix {
                if arg(0) != arg(1) {
                    return Err("'mix' needs two values of the same type".into());
                }
                (arg(0), [arg(2), arg(2)])
            } else {
                (arg(2), [arg(0), arg(1)])
            };
            for other in others {
                if other != result && !other.is_scalar() {
                    return Err(format!("'{native}' arguments have different widths"));
                }
            }
            Ok(result)
        }
        N::Dot | N::Distance => {
            expect_args(native, args, 2)?;
            if !is_float(&arg(0)) || arg(0) != arg(1) {
                return Err(format!("'{native}' needs two float vectors of the same width"));
            }
            Ok(DataType::FLOAT)
        }
        N::Length => {
            expect_args(native, args, 1)?;
            if is_float(&arg(0)) {
                Ok(DataType::FLOAT)
            } else {
                Err("'length' needs a float argument".into())
            }
        }
        N::Cross => {
            expect_args(native, args, 2)?;
            if arg(0) == DataType::vec(3) && arg(1) == DataType::vec(3) {
                Ok(DataType::vec(3))
            } else {
                Err("'cross' needs two vec3 arguments".into())
            }
        }
        N::Reflect => {
            expect_args(native, args, 2)?;
            if is_float(&arg(0)) && arg(0) == arg(1) {
                Ok(arg(0))
            } else {
                Err("'reflect' needs two float arguments of the same width".into())
            }
        }
        N::Transpose => {
            expect_args(native, args, 1)?;
            match arg(0).base {
                BaseType::Matrix { cols, rows } if !arg(0).is_array() => {
                    Ok(DataType::new(BaseType::Matrix { cols: rows, rows: cols }))
                }
                _ => Err("'transpose' needs a matrix".into()),
            }
        }
        N::Any | N::All => {
            expect_args(native, args, 1)?;
            if kind_of(&arg(0)) == Some(ScalarKind::Bool) {
                Ok(DataType::BOOL)
            } else {
                Err(format!("'{native}' needs a bool vector"))
            }
        }
        N::AsFloat | N::AsInt | N::AsUint => {
            expect_args(native, args, 1)?;
            let target = match native {
                N::AsFloat => ScalarKind::Float,
                N::AsInt => ScalarKind::Int,
                _ => ScalarKind::Uint,
            };
            if is_arithmetic(&arg(0)) {
                Ok(arg(0).with_kind(target))
            } else {
                Err(format!("'{native}' needs a numeric argument"))
            }
        }
        N::PackUnorm4x8 | N::PackSnorm4x8 => {
            expect_args(native, args, 1)?;
            if arg(0) == DataType::vec(4) {
                Ok(DataType::UINT)
            } else {
                Err(format!("'{native}' needs a vec4"))
            }
        }
        N::PackHalf2x16 => {
            expect_args(native, args, 1)?;
            if arg(0) == DataType::vec(2) {
                Ok(DataType::UINT)
            } else {
                Err("'packHalf2x16' needs a vec2".into())
            }
        }
        N::UnpackUnorm4x8 | N::UnpackSnorm4x8 | N::UnpackHalf2x16 => {
            expect_args(native, args, 1)?;
            if arg(0) != DataType::UINT {
                return Err(format!("'{native}' needs a uint"));
            }
            Ok(DataType::vec(if native == N::UnpackHalf2x16 { 2 } else { 4 }))
        }

        N::Texture | N::TextureLod | N::TextureBias | N::TextureGather => {
            let extra = usize::from(matches!(native, N::TextureLod | N::TextureBias));
            expect_args(native, args, 2 + extra)?;
            let r = texture_arg(native, &arg(0))?;
            if r.kind != ResourceKind::Texture || r.uav || r.multisampled {
                return Err(format!("'{native}' needs a sampled, single-sample texture"));
            }
            if !coordinate_ok(&r, &arg(1), true) {
                return Err(format!(
                    "'{native}' needs a float coordinate with {} component(s)",
                    r.coordinate_count()
                ));
            }
            if extra == 1 && arg(2) != DataType::FLOAT {
                return Err(format!("'{native}' needs a float level"));
            }
            Ok(if r.depth && native != N::TextureGather {
                DataType::FLOAT
            } else {
                DataType::vec(4)
            })
        }
        N::TextureSize => {
            let r = texture_arg(native, &arg(0))?;
            let with_lod = r.kind == ResourceKind::Texture && !r.uav && !r.multisampled;
            expect_args(native, args, if with_lod { 2 } else { 1 })?;
            if with_lod && arg(1) != DataType::INT {
                return Err("'textureSize' needs an int level".into());
            }
            Ok(DataType::numeric(ScalarKind::Int, r.coordinate_count()))
        }
        N::TexelLoad | N::TexelLoadSample => {
            let sampled = native == N::TexelLoadSample;
            expect_args(native, args, if sampled { 3 } else { 2 })?;
            let r = texture_arg(native, &arg(0))?;
            if r.is_structured_buffer() {
                return Err(format!("'{native}' cannot read structured buffers, index them instead"));
            }
            if sampled != r.multisampled {
                return Err(if sampled {
                    "'texelLoadSample' needs a multisampled texture".into()
                } else {
                    "multisampled textures are read with 'texelLoadSample'".into()
                });
            }
            if !coordinate_ok(&r, &arg(1), false) {
                return Err(format!("'{native}' needs an integer coordinate"));
            }
            Ok(r.element_type())
        }
        N::TexelStore => {
            expect_args(native, args, 3)?;
            let r = texture_arg(native, &arg(0))?;
            if !r.is_image() {
                return Err("'texelStore' needs a writable image or formatted buffer".into());
            }
            if !coordinate_ok(&r, &arg(1), false) {
                return Err("'texelStore' needs an integer coordinate".into());
            }
            if arg(2) != r.element_type() {
                return Err("'texelStore' value does not match the image format".into());
            }
            Ok(DataType::VOID)
        }

        N::AtomicAdd
        | N::AtomicMin
        | N::AtomicMax
        | N::AtomicAnd
        | N::AtomicOr
        | N::AtomicXor
        | N::AtomicExchange
        | N::AtomicCompSwap
        | N::AtomicIncrement => {
            let n = match native {
                N::AtomicIncrement => 1,
                N::AtomicCompSwap => 3,
                _ => 2,
            };
            expect_args(native, args, n)?;
            let target = arg(0);
            if !(is_integer(&target) && target.is_scalar()) {
                return Err(format!("'{native}' needs an int or uint target"));
            }
            if args[1..].iter().any(|a| *a != target) {
                return Err(format!("'{native}' operands must match the target type"));
            }
            Ok(target)
        }
        N::Barrier | N::GroupMemoryBarrier | N::EmitVertex | N::EndPrimitive => {
            expect_args(native, args, 0)?;
            Ok(DataType::VOID)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadec_ir::{ImageFormat, ImageViewType, ResourceType};

    #[test]
    fn scalar_broadcasts_in_arithmetic() {
        let v3 = DataType::vec(3);
        assert_eq!(native_result_type(NativeFunction::Mul, &[v3, DataType::FLOAT]), Ok(v3));
        assert_eq!(native_result_type(NativeFunction::Add, &[DataType::FLOAT, v3]), Ok(v3));
        assert!(native_result_type(NativeFunction::Add, &[DataType::vec(2), v3]).is_err());
        assert!(native_result_type(NativeFunction::Add, &[DataType::INT, DataType::FLOAT]).is_err());
    }

    #[test]
    fn matrix_products() {
        let m = DataType::new(BaseType::Matrix { cols: 4, rows: 4 });
        assert_eq!(native_result_type(NativeFunction::Mul, &[m, DataType::vec(4)]), Ok(DataType::vec(4)));
        assert_eq!(native_result_type(NativeFunction::Mul, &[m, m]), Ok(m));
        assert!(native_result_type(NativeFunction::Mul, &[m, DataType::vec(3)]).is_err());
    }

    #[test]
    fn vector_comparison_yields_bool_vector() {
        let ty = native_result_type(NativeFunction::Lt, &[DataType::vec(3), DataType::vec(3)]).unwrap();
        assert_eq!(ty, DataType::numeric(ScalarKind::Bool, 3));
        assert_eq!(native_result_type(NativeFunction::All, &[ty]), Ok(DataType::BOOL));
    }

    #[test]
    fn mix_accepts_scalar_blend() {
        let v = DataType::vec(3);
        assert_eq!(native_result_type(NativeFunction::Mix, &[v, v, DataType::FLOAT]), Ok(v));
        assert!(native_result_type(NativeFunction::Mix, &[v, DataType::vec(2), DataType::FLOAT]).is_err());
    }

    #[test]
    fn texture_sampling_checks_coordinates() {
        let tex = DataType::new(BaseType::Resource(ResourceType::texture(ImageViewType::View2D)));
        assert_eq!(
            native_result_type(NativeFunction::Texture, &[tex, DataType::vec(2)]),
            Ok(DataType::vec(4))
        );
        assert!(native_result_type(NativeFunction::Texture, &[tex, DataType::vec(3)]).is_err());
        assert_eq!(
            native_result_type(NativeFunction::TextureSize, &[tex, DataType::INT]),
            Ok(DataType::numeric(ScalarKind::Int, 2))
        );
    }

    #[test]
    fn image_store_matches_format() {
        let mut image = ResourceType::texture(ImageViewType::View2D);
        image.uav = true;
        image.format = ImageFormat::R32F;
        let ty = DataType::new(BaseType::Resource(image));
        let coord = DataType::numeric(ScalarKind::Int, 2);
        assert_eq!(
            native_result_type(NativeFunction::TexelStore, &[ty, coord, DataType::FLOAT]),
            Ok(DataType::VOID)
        );
        assert!(native_result_type(NativeFunction::TexelStore, &[ty, coord, DataType::vec(4)]).is_err());
    }

    #[test]
    fn atomics_need_integer_targets() {
        assert_eq!(
            native_result_type(NativeFunction::AtomicAdd, &[DataType::UINT, DataType::UINT]),
            Ok(DataType::UINT)
        );
        assert!(native_result_type(NativeFunction::AtomicAdd, &[DataType::FLOAT, DataType::FLOAT]).is_err());
    }
}
