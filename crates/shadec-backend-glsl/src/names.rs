//! GLSL spelling of types, literals, identifiers and built-ins.

use shadec_ir::{
    BaseType, CodeLibrary, Component, DataType, DataValue, FormatClass, ImageFormat, ImageViewType, ResourceAccess,
    ResourceKind, ResourceType, ScalarKind, ShaderStage,
};

const RESERVED: &[&str] = &[
    "active", "asm", "attribute", "buffer", "cast", "centroid", "class", "coherent", "common", "const", "discard",
    "double", "enum", "extern", "external", "filter", "fixed", "flat", "half", "highp", "image", "in", "inline",
    "inout", "input", "interface", "invariant", "layout", "long", "lowp", "mediump", "namespace", "noinline",
    "noperspective", "out", "output", "packed", "partition", "patch", "precise", "precision", "public", "readonly",
    "resource", "restrict", "sample", "sampler", "shared", "short", "sizeof", "smooth", "static", "subroutine",
    "superp", "template", "this", "typedef", "uniform", "union", "unsigned", "using", "varying", "volatile",
    "writeonly",
];

/// A source identifier made safe to use in GLSL.
pub fn identifier(name: &str) -> String {
    if RESERVED.contains(&name) || name.starts_with("gl_") || name.contains("__") {
        format!("{}_", name.replace("__", "_"))
    } else {
        name.to_string()
    }
}

/// Type without array dimensions.
pub fn base_type(lib: &CodeLibrary, ty: &DataType) -> String {
    match ty.base {
        BaseType::Struct(c) => identifier(&lib.composites[c].name),
        _ => lib.type_name(&ty.without_array()),
    }
}

/// `[3][2]` suffix of an array type, empty for non-arrays.
pub fn array_suffix(ty: &DataType) -> String {
    ty.array
        .dimensions()
        .iter()
        .map(|&d| if d == 0 { "[]".to_string() } else { format!("[{d}]") })
        .collect()
}

/// Type usable as a constructor (`float[3]`, `vec4`).
pub fn constructor(lib: &CodeLibrary, ty: &DataType) -> String {
    format!("{}{}", base_type(lib, ty), array_suffix(ty))
}

/// `T name[N]` declaration.
pub fn declaration(lib: &CodeLibrary, ty: &DataType, name: &str) -> String {
    format!("{} {name}{}", base_type(lib, ty), array_suffix(ty))
}

fn float_literal(f: f32) -> String {
    if f.is_nan() {
        return "uintBitsToFloat(0x7fc00000u)".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "uintBitsToFloat(0x7f800000u)".into() } else { "uintBitsToFloat(0xff800000u)".into() };
    }
    let text = format!("{f:?}");
    let text = if text.contains(['.', 'e', 'E']) { text } else { format!("{text}.0") };
    if f.is_sign_negative() { format!("({text})") } else { text }
}

/// Literal of one scalar converted to `kind`.
pub fn scalar_literal(c: Component, kind: ScalarKind) -> String {
    match c.convert(kind) {
        Component::Bool(b) => b.to_string(),
        Component::Int(i32::MIN) => "(-2147483647 - 1)".into(),
        Component::Int(i) if i < 0 => format!("({i})"),
        Component::Int(i) => i.to_string(),
        Component::Uint(u) => format!("{u}u"),
        Component::Float(f) => float_literal(f),
        Component::Undefined => scalar_literal(Component::Int(0), kind),
    }
}

/// Literal expression of a constant of type `ty`.
pub fn value_literal(lib: &CodeLibrary, ty: &DataType, value: &DataValue) -> String {
    let mut components = value.components().iter().copied();
    literal_from(lib, ty, &mut components)
}

fn literal_from(lib: &CodeLibrary, ty: &DataType, components: &mut dyn Iterator<Item = Component>) -> String {
    if ty.is_array() {
        let element = ty.element();
        let count = ty.array.outer().unwrap_or(0);
        let parts: Vec<_> = (0..count).map(|_| literal_from(lib, &element, components)).collect();
        return format!("{}({})", constructor(lib, ty), parts.join(", "));
    }
    match ty.base {
        BaseType::Scalar(kind) => scalar_literal(components.next().unwrap_or(Component::Undefined), kind),
        BaseType::Vector(kind, n) => {
            let parts: Vec<_> = (0..n)
                .map(|_| scalar_literal(components.next().unwrap_or(Component::Undefined), kind))
                .collect();
            if parts.windows(2).all(|w| w[0] == w[1]) {
                format!("{}({})", base_type(lib, ty), parts[0])
            } else {
                format!("{}({})", base_type(lib, ty), parts.join(", "))
            }
        }
        BaseType::Matrix { cols, rows } => {
            let parts: Vec<_> = (0..cols as usize * rows as usize)
                .map(|_| scalar_literal(components.next().unwrap_or(Component::Undefined), ScalarKind::Float))
                .collect();
            format!("{}({})", base_type(lib, ty), parts.join(", "))
        }
        BaseType::Struct(c) => {
            let parts: Vec<_> = lib.composites[c]
                .members
                .iter()
                .map(|m| literal_from(lib, &m.ty, components))
                .collect();
            format!("{}({})", base_type(lib, ty), parts.join(", "))
        }
        BaseType::Void | BaseType::Resource(_) | BaseType::Program(_) => String::new(),
    }
}

fn format_prefix(format: ImageFormat) -> &'static str {
    match format.class() {
        FormatClass::Float => "",
        FormatClass::Int => "i",
        FormatClass::Uint => "u",
    }
}

fn view_suffix(view: ImageViewType) -> &'static str {
    match view {
        ImageViewType::View1D => "1D",
        ImageViewType::View1DArray => "1DArray",
        ImageViewType::View2D => "2D",
        ImageViewType::View2DArray => "2DArray",
        ImageViewType::View3D => "3D",
        ImageViewType::ViewCube => "Cube",
        ImageViewType::ViewCubeArray => "CubeArray",
    }
}

/// Opaque type of a sampled texture or an image.
pub fn opaque_type(r: &ResourceType) -> String {
    let prefix = format_prefix(r.format);
    if r.is_formatted_buffer() {
        return format!("{prefix}imageBuffer");
    }
    if r.uav {
        return format!("{prefix}image{}", view_suffix(r.view));
    }
    if r.multisampled {
        let array = if r.view.is_array() { "Array" } else { "" };
        return format!("{prefix}sampler2DMS{array}");
    }
    format!("{prefix}sampler{}", view_suffix(r.view))
}

/// Memory qualifier of a writable resource.
pub fn access_qualifier(r: &ResourceType) -> &'static str {
    match r.access {
        ResourceAccess::ReadOnly | ResourceAccess::UavReadOnly => "readonly ",
        ResourceAccess::UavWriteOnly => "writeonly ",
        ResourceAccess::UavReadWrite => "",
    }
}

/// Layout format of an image; read-only formatted buffers default to
/// `rgba32f`.
pub fn image_format(r: &ResourceType) -> &'static str {
    match r.format {
        ImageFormat::Unknown | ImageFormat::Rgb32F => "rgba32f",
        // three-component formats have no image layout qualifier
        ImageFormat::Rgb32Ui => "rgba32ui",
        ImageFormat::Rgb32I => "rgba32i",
        format => format.name(),
    }
}

/// Components of the `vec4` returned by `imageLoad`/`texelFetch` that make
/// up one element.
pub fn element_swizzle(r: &ResourceType) -> &'static str {
    match r.element_type().component_count() {
        Some(1) => ".x",
        Some(2) => ".xy",
        Some(3) => ".xyz",
        _ => "",
    }
}

/// Widens an element value to the four components `imageStore` takes.
pub fn widen_to_vec4(r: &ResourceType, value: &str) -> String {
    let ty = r.element_type();
    let kind = ty.scalar_kind().unwrap_or(ScalarKind::Float);
    let zero = scalar_literal(Component::Int(0), kind);
    let one = scalar_literal(Component::Int(1), kind);
    let prefix = kind.vector_prefix();
    match ty.component_count() {
        Some(1) => format!("{prefix}vec4({value}, {zero}, {zero}, {one})"),
        Some(2) => format!("{prefix}vec4({value}, {zero}, {one})"),
        Some(3) => format!("{prefix}vec4({value}, {one})"),
        _ => value.to_string(),
    }
}

/// How a built-in variable is spelled in one stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuiltinSpelling {
    /// Used as is.
    Name(&'static str),
    /// Per-vertex input read as `gl_in[i].<member>`.
    PerVertex(&'static str),
    /// Render target `i`, declared as a fragment output.
    Target(u32),
}

/// Spelling of a built-in in `stage`, `None` when the stage has no such
/// variable.
pub fn builtin(name: &str, stage: ShaderStage) -> Option<BuiltinSpelling> {
    use BuiltinSpelling::{Name, PerVertex, Target};
    use ShaderStage::{Compute, Domain, Geometry, Hull, Pixel, Vertex};

    let in_stage = |stages: &[ShaderStage]| stages.contains(&stage);
    let spelling = match name {
        "gl_Position" if in_stage(&[Vertex, Geometry, Domain]) => Name("gl_Position"),
        "gl_PositionIn" if in_stage(&[Geometry, Hull, Domain]) => PerVertex("gl_Position"),
        "gl_PointSize" if in_stage(&[Vertex, Geometry, Domain]) => Name("gl_PointSize"),
        "gl_PointSizeIn" if in_stage(&[Geometry, Hull, Domain]) => PerVertex("gl_PointSize"),
        "gl_ClipDistance" if in_stage(&[Vertex, Geometry, Domain]) => Name("gl_ClipDistance"),
        "gl_VertexID" if stage == Vertex => Name("gl_VertexIndex"),
        "gl_InstanceID" if stage == Vertex => Name("gl_InstanceIndex"),
        "gl_DrawID" if stage == Vertex => Name("gl_DrawID"),
        "gl_BaseVertex" if stage == Vertex => Name("gl_BaseVertex"),
        "gl_BaseInstance" if stage == Vertex => Name("gl_BaseInstance"),
        "gl_PatchVerticesIn" if in_stage(&[Hull, Domain]) => Name("gl_PatchVerticesIn"),
        "gl_PrimitiveID" if in_stage(&[Hull, Domain, Pixel]) => Name("gl_PrimitiveID"),
        "gl_PrimitiveIDIn" if stage == Geometry => Name("gl_PrimitiveIDIn"),
        "gl_InvocationID" if in_stage(&[Hull, Geometry]) => Name("gl_InvocationID"),
        "gl_Layer" if in_stage(&[Geometry, Pixel]) => Name("gl_Layer"),
        "gl_ViewportIndex" if in_stage(&[Geometry, Pixel]) => Name("gl_ViewportIndex"),
        "gl_TessLevelOuter" if in_stage(&[Hull, Domain]) => Name("gl_TessLevelOuter"),
        "gl_TessLevelInner" if in_stage(&[Hull, Domain]) => Name("gl_TessLevelInner"),
        "gl_TessCoord" if stage == Domain => Name("gl_TessCoord"),
        "gl_FragCoord" if stage == Pixel => Name("gl_FragCoord"),
        "gl_FrontFacing" if stage == Pixel => Name("gl_FrontFacing"),
        "gl_PointCoord" if stage == Pixel => Name("gl_PointCoord"),
        "gl_SampleID" if stage == Pixel => Name("gl_SampleID"),
        "gl_SamplePosition" if stage == Pixel => Name("gl_SamplePosition"),
        "gl_SampleMaskIn" if stage == Pixel => Name("gl_SampleMaskIn"),
        "gl_SampleMask" if stage == Pixel => Name("gl_SampleMask"),
        "gl_FragDepth" if stage == Pixel => Name("gl_FragDepth"),
        "gl_NumWorkGroups" if stage == Compute => Name("gl_NumWorkGroups"),
        "gl_GlobalInvocationID" if stage == Compute => Name("gl_GlobalInvocationID"),
        "gl_LocalInvocationID" if stage == Compute => Name("gl_LocalInvocationID"),
        "gl_WorkGroupID" if stage == Compute => Name("gl_WorkGroupID"),
        "gl_LocalInvocationIndex" if stage == Compute => Name("gl_LocalInvocationIndex"),
        _ if stage == Pixel => {
            let index = name.strip_prefix("gl_Target")?.parse::<u32>().ok()?;
            Target(index)
        }
        _ => return None,
    };
    Some(spelling)
}

/// Built-ins that need `GL_ARB_shader_draw_parameters`.
pub fn needs_draw_parameters(name: &str) -> bool {
    matches!(name, "gl_DrawID" | "gl_BaseVertex" | "gl_BaseInstance")
}

/// True for resources read through a uniform block.
pub fn is_constant_buffer(r: &ResourceType) -> bool {
    r.kind == ResourceKind::ConstantBuffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_keep_their_kind() {
        assert_eq!(scalar_literal(Component::Float(1.0), ScalarKind::Float), "1.0");
        assert_eq!(scalar_literal(Component::Float(0.25), ScalarKind::Float), "0.25");
        assert_eq!(scalar_literal(Component::Float(-2.0), ScalarKind::Float), "(-2.0)");
        assert_eq!(scalar_literal(Component::Int(3), ScalarKind::Uint), "3u");
        assert_eq!(scalar_literal(Component::Int(-4), ScalarKind::Int), "(-4)");
        assert_eq!(scalar_literal(Component::Float(f32::NAN), ScalarKind::Float), "uintBitsToFloat(0x7fc00000u)");
    }

    #[test]
    fn vector_literals_collapse_splats() {
        let lib = CodeLibrary::new();
        let v = DataValue::Components(vec![Component::Float(1.0); 4]);
        assert_eq!(value_literal(&lib, &DataType::vec(4), &v), "vec4(1.0)");
        let v = DataValue::Components(vec![Component::Float(1.0), Component::Float(0.5)]);
        assert_eq!(value_literal(&lib, &DataType::vec(2), &v), "vec2(1.0, 0.5)");
    }

    #[test]
    fn reserved_identifiers_are_renamed() {
        assert_eq!(identifier("sample"), "sample_");
        assert_eq!(identifier("gl_Mine"), "gl_Mine_");
        assert_eq!(identifier("uv"), "uv");
    }

    #[test]
    fn builtins_depend_on_stage() {
        assert_eq!(builtin("gl_VertexID", ShaderStage::Vertex), Some(BuiltinSpelling::Name("gl_VertexIndex")));
        assert_eq!(builtin("gl_FragCoord", ShaderStage::Vertex), None);
        assert_eq!(builtin("gl_Target2", ShaderStage::Pixel), Some(BuiltinSpelling::Target(2)));
        assert_eq!(builtin("gl_Target2", ShaderStage::Vertex), None);
        assert_eq!(
            builtin("gl_PositionIn", ShaderStage::Geometry),
            Some(BuiltinSpelling::PerVertex("gl_Position"))
        );
    }

    #[test]
    fn opaque_types_follow_view_and_format() {
        let mut r = ResourceType::texture(ImageViewType::View2DArray);
        assert_eq!(opaque_type(&r), "sampler2DArray");
        r.uav = true;
        r.format = ImageFormat::R32Ui;
        assert_eq!(opaque_type(&r), "uimage2DArray");
        let mut b = ResourceType::buffer();
        b.format = ImageFormat::Rgba32F;
        assert_eq!(opaque_type(&b), "imageBuffer");
    }
}
