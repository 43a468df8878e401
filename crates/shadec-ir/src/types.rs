//! Data types of the shading language.

use crate::arena::Handle;
use crate::program::Program;

/// The kind of a scalar component.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Float,
}

impl ScalarKind {
    /// GLSL-style vector prefix (`b`, `i`, `u`, empty for float).
    pub fn vector_prefix(self) -> &'static str {
        match self {
            Self::Bool => "b",
            Self::Int => "i",
            Self::Uint => "u",
            Self::Float => "",
        }
    }

    pub fn scalar_name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Float => "float",
        }
    }
}

/// Array dimensions, outermost first. A zero count marks an unsized
/// (runtime) dimension, which is only legal in the outermost position.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct ArrayCounts {
    dims: [u32; Self::MAX_DIMS],
    len: u8,
}

impl ArrayCounts {
    pub const MAX_DIMS: usize = 3;

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dimensions(&self) -> &[u32] {
        &self.dims[..self.len as usize]
    }

    /// Appends an inner dimension. Returns `None` past [`Self::MAX_DIMS`].
    pub fn append(self, count: u32) -> Option<Self> {
        if self.len as usize >= Self::MAX_DIMS {
            return None;
        }
        let mut out = self;
        out.dims[out.len as usize] = count;
        out.len += 1;
        Some(out)
    }

    /// Removes the outermost dimension.
    pub fn pop_outer(self) -> Self {
        if self.len == 0 {
            return self;
        }
        let mut out = Self::default();
        for &d in &self.dims[1..self.len as usize] {
            out.dims[out.len as usize] = d;
            out.len += 1;
        }
        out
    }

    /// Total number of elements, `None` when any dimension is unsized.
    pub fn total(&self) -> Option<u32> {
        self.dimensions()
            .iter()
            .try_fold(1u32, |acc, &d| (d != 0).then(|| acc.saturating_mul(d)))
    }

    pub fn outer(&self) -> Option<u32> {
        self.dimensions().first().copied()
    }
}

/// View dimensionality of a texture resource.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[repr(u8)]
pub enum ImageViewType {
    View1D = 0,
    View1DArray,
    View2D,
    View2DArray,
    View3D,
    ViewCube,
    ViewCubeArray,
}

impl ImageViewType {
    /// Number of coordinate components needed to address one texel.
    pub fn coordinate_count(self) -> u8 {
        match self {
            Self::View1D => 1,
            Self::View1DArray | Self::View2D => 2,
            Self::View2DArray | Self::View3D | Self::ViewCube => 3,
            Self::ViewCubeArray => 4,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(self, Self::View1DArray | Self::View2DArray | Self::ViewCubeArray)
    }
}

/// Component class of an [`ImageFormat`].
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum FormatClass {
    Float,
    Int,
    Uint,
}

macro_rules! image_formats {
    ($($variant:ident = $value:literal, $name:literal, $class:ident, $comps:literal;)*) => {
        /// Storage format of images, formatted buffers and data elements.
        #[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
        #[repr(u16)]
        pub enum ImageFormat {
            #[default]
            Unknown = 0,
            $($variant = $value,)*
        }

        impl ImageFormat {
            /// Layout qualifier spelling (`rgba8`, `r32f`, ...).
            pub fn name(self) -> &'static str {
                match self {
                    Self::Unknown => "unknown",
                    $(Self::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)*
                    _ => None,
                }
            }

            pub fn class(self) -> FormatClass {
                match self {
                    Self::Unknown => FormatClass::Float,
                    $(Self::$variant => FormatClass::$class,)*
                }
            }

            pub fn component_count(self) -> u8 {
                match self {
                    Self::Unknown => 0,
                    $(Self::$variant => $comps,)*
                }
            }

            pub fn from_raw(raw: u16) -> Option<Self> {
                match raw {
                    0 => Some(Self::Unknown),
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

image_formats! {
    R8 = 1, "r8", Float, 1;
    Rg8 = 2, "rg8", Float, 2;
    Rgba8 = 3, "rgba8", Float, 4;
    Rgba8Snorm = 4, "rgba8_snorm", Float, 4;
    R16F = 5, "r16f", Float, 1;
    Rg16F = 6, "rg16f", Float, 2;
    Rgba16F = 7, "rgba16f", Float, 4;
    R32F = 8, "r32f", Float, 1;
    Rg32F = 9, "rg32f", Float, 2;
    Rgb32F = 10, "rgb32f", Float, 3;
    Rgba32F = 11, "rgba32f", Float, 4;
    R32Ui = 12, "r32ui", Uint, 1;
    Rg32Ui = 13, "rg32ui", Uint, 2;
    Rgb32Ui = 14, "rgb32ui", Uint, 3;
    Rgba32Ui = 15, "rgba32ui", Uint, 4;
    R32I = 16, "r32i", Int, 1;
    Rg32I = 17, "rg32i", Int, 2;
    Rgb32I = 18, "rgb32i", Int, 3;
    Rgba32I = 19, "rgba32i", Int, 4;
    Rgba8Ui = 20, "rgba8ui", Uint, 4;
    Rgba16Ui = 21, "rgba16ui", Uint, 4;
}

impl ImageFormat {
    /// The 32-bit format that stores one value of the given shape.
    pub fn for_components(kind: ScalarKind, count: u8) -> Self {
        match (kind, count) {
            (ScalarKind::Float, 1) => Self::R32F,
            (ScalarKind::Float, 2) => Self::Rg32F,
            (ScalarKind::Float, 3) => Self::Rgb32F,
            (ScalarKind::Float, 4) => Self::Rgba32F,
            (ScalarKind::Int, 1) => Self::R32I,
            (ScalarKind::Int, 2) => Self::Rg32I,
            (ScalarKind::Int, 3) => Self::Rgb32I,
            (ScalarKind::Int, 4) => Self::Rgba32I,
            (ScalarKind::Uint | ScalarKind::Bool, 1) => Self::R32Ui,
            (ScalarKind::Uint | ScalarKind::Bool, 2) => Self::Rg32Ui,
            (ScalarKind::Uint | ScalarKind::Bool, 3) => Self::Rgb32Ui,
            (ScalarKind::Uint | ScalarKind::Bool, 4) => Self::Rgba32Ui,
            _ => Self::Unknown,
        }
    }
}

/// Category of a descriptor resource.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[repr(u8)]
pub enum ResourceKind {
    ConstantBuffer = 1,
    Texture = 2,
    Buffer = 3,
}

/// Access mode of a resource as seen by shaders.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
#[repr(u8)]
pub enum ResourceAccess {
    #[default]
    ReadOnly = 0,
    UavReadOnly,
    UavReadWrite,
    UavWriteOnly,
}

/// Full description of a resource-typed value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ResourceType {
    pub kind: ResourceKind,
    pub view: ImageViewType,
    pub multisampled: bool,
    pub depth: bool,
    pub uav: bool,
    pub access: ResourceAccess,
    pub format: ImageFormat,
    /// Element structure of constant buffers and structured buffers.
    pub layout: Option<Handle<CompositeType>>,
}

impl ResourceType {
    pub fn constant_buffer(layout: Handle<CompositeType>) -> Self {
        Self {
            kind: ResourceKind::ConstantBuffer,
            view: ImageViewType::View1D,
            multisampled: false,
            depth: false,
            uav: false,
            access: ResourceAccess::ReadOnly,
            format: ImageFormat::Unknown,
            layout: Some(layout),
        }
    }

    pub fn texture(view: ImageViewType) -> Self {
        Self {
            kind: ResourceKind::Texture,
            view,
            multisampled: false,
            depth: false,
            uav: false,
            access: ResourceAccess::ReadOnly,
            format: ImageFormat::Unknown,
            layout: None,
        }
    }

    pub fn buffer() -> Self {
        Self {
            kind: ResourceKind::Buffer,
            ..Self::texture(ImageViewType::View1D)
        }
    }

    /// Formatted buffers are addressed like 1D images.
    pub fn is_formatted_buffer(&self) -> bool {
        self.kind == ResourceKind::Buffer && self.layout.is_none()
    }

    pub fn is_structured_buffer(&self) -> bool {
        self.kind == ResourceKind::Buffer && self.layout.is_some()
    }

    /// Images and formatted buffers are read and written through
    /// `imageLoad`/`imageStore`.
    pub fn is_image(&self) -> bool {
        (self.kind == ResourceKind::Texture && self.uav) || self.is_formatted_buffer()
    }

    /// Components of the integer coordinate that indexes one element.
    pub fn coordinate_count(&self) -> u8 {
        match self.kind {
            ResourceKind::Texture => self.view.coordinate_count(),
            ResourceKind::Buffer | ResourceKind::ConstantBuffer => 1,
        }
    }

    /// Type of one element read by indexing (`tex[c]`, `buf[i]`).
    pub fn element_type(&self) -> DataType {
        if let Some(layout) = self.layout.filter(|_| self.kind == ResourceKind::Buffer) {
            return DataType::new(BaseType::Struct(layout));
        }
        if self.is_image() && self.format != ImageFormat::Unknown {
            let kind = match self.format.class() {
                FormatClass::Float => ScalarKind::Float,
                FormatClass::Int => ScalarKind::Int,
                FormatClass::Uint => ScalarKind::Uint,
            };
            return DataType::numeric(kind, self.format.component_count());
        }
        DataType::vec(4)
    }
}

/// Base shape of a type, without array dimensions.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BaseType {
    Void,
    Scalar(ScalarKind),
    /// Vector of 2..=4 components.
    Vector(ScalarKind, u8),
    /// Float matrix with `cols` columns of `rows` components.
    Matrix { cols: u8, rows: u8 },
    Struct(Handle<CompositeType>),
    Resource(ResourceType),
    /// Reference to a program, used for program-typed constants.
    Program(Handle<Program>),
}

/// A complete data type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct DataType {
    pub base: BaseType,
    pub array: ArrayCounts,
}

impl DataType {
    pub const VOID: Self = Self::new(BaseType::Void);
    pub const BOOL: Self = Self::new(BaseType::Scalar(ScalarKind::Bool));
    pub const INT: Self = Self::new(BaseType::Scalar(ScalarKind::Int));
    pub const UINT: Self = Self::new(BaseType::Scalar(ScalarKind::Uint));
    pub const FLOAT: Self = Self::new(BaseType::Scalar(ScalarKind::Float));

    pub const fn new(base: BaseType) -> Self {
        Self {
            base,
            array: ArrayCounts {
                dims: [0; ArrayCounts::MAX_DIMS],
                len: 0,
            },
        }
    }

    /// Scalar for `count == 1`, vector otherwise.
    pub fn numeric(kind: ScalarKind, count: u8) -> Self {
        if count <= 1 {
            Self::new(BaseType::Scalar(kind))
        } else {
            Self::new(BaseType::Vector(kind, count))
        }
    }

    pub fn vec(count: u8) -> Self {
        Self::numeric(ScalarKind::Float, count)
    }

    pub fn with_array(self, array: ArrayCounts) -> Self {
        Self { array, ..self }
    }

    pub fn is_void(&self) -> bool {
        self.base == BaseType::Void && self.array.is_empty()
    }

    pub fn is_array(&self) -> bool {
        !self.array.is_empty()
    }

    /// Type of one element of the outermost array dimension.
    pub fn element(&self) -> Self {
        Self {
            base: self.base,
            array: self.array.pop_outer(),
        }
    }

    pub fn without_array(&self) -> Self {
        Self::new(self.base)
    }

    /// Scalar kind of a non-array scalar or vector.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        if self.is_array() {
            return None;
        }
        match self.base {
            BaseType::Scalar(k) | BaseType::Vector(k, _) => Some(k),
            BaseType::Matrix { .. } => Some(ScalarKind::Float),
            _ => None,
        }
    }

    /// Component count of a non-array scalar or vector.
    pub fn component_count(&self) -> Option<u8> {
        if self.is_array() {
            return None;
        }
        match self.base {
            BaseType::Scalar(_) => Some(1),
            BaseType::Vector(_, n) => Some(n),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !self.is_array() && matches!(self.base, BaseType::Scalar(_))
    }

    pub fn is_vector(&self) -> bool {
        !self.is_array() && matches!(self.base, BaseType::Vector(..))
    }

    /// Scalar or vector, the shapes arithmetic works on component-wise.
    pub fn is_numeric(&self) -> bool {
        self.is_scalar() || self.is_vector()
    }

    pub fn is_matrix(&self) -> bool {
        !self.is_array() && matches!(self.base, BaseType::Matrix { .. })
    }

    pub fn resource(&self) -> Option<&ResourceType> {
        match &self.base {
            BaseType::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_resource(&self) -> bool {
        matches!(self.base, BaseType::Resource(_))
    }

    pub fn program(&self) -> Option<Handle<Program>> {
        match self.base {
            BaseType::Program(p) if self.array.is_empty() => Some(p),
            _ => None,
        }
    }

    pub fn composite(&self) -> Option<Handle<CompositeType>> {
        match self.base {
            BaseType::Struct(c) => Some(c),
            _ => None,
        }
    }

    /// Same shape with a different scalar kind.
    pub fn with_kind(&self, kind: ScalarKind) -> Self {
        match self.base {
            BaseType::Scalar(_) => Self::new(BaseType::Scalar(kind)).with_array(self.array),
            BaseType::Vector(_, n) => Self::new(BaseType::Vector(kind, n)).with_array(self.array),
            _ => *self,
        }
    }

    /// Parses a built-in type keyword (`float`, `uvec3`, `mat3x4`, ...).
    pub fn from_keyword(word: &str) -> Option<Self> {
        let ty = match word {
            "void" => Self::VOID,
            "bool" => Self::BOOL,
            "int" => Self::INT,
            "uint" => Self::UINT,
            "float" => Self::FLOAT,
            _ => {
                if let Some(rest) = word.strip_prefix("mat") {
                    let (cols, rows) = match rest.split_once('x') {
                        Some((c, r)) => (c.parse().ok()?, r.parse().ok()?),
                        None => {
                            let n: u8 = rest.parse().ok()?;
                            (n, n)
                        }
                    };
                    if !(2..=4).contains(&cols) || !(2..=4).contains(&rows) {
                        return None;
                    }
                    return Some(Self::new(BaseType::Matrix { cols, rows }));
                }
                let (kind, rest) = match word.as_bytes().first()? {
                    b'b' => (ScalarKind::Bool, word.strip_prefix("bvec")?),
                    b'i' => (ScalarKind::Int, word.strip_prefix("ivec")?),
                    b'u' => (ScalarKind::Uint, word.strip_prefix("uvec")?),
                    _ => (ScalarKind::Float, word.strip_prefix("vec")?),
                };
                let n: u8 = rest.parse().ok()?;
                if !(2..=4).contains(&n) {
                    return None;
                }
                Self::new(BaseType::Vector(kind, n))
            }
        };
        Some(ty)
    }
}

/// Packing rule for the linear layout of a structure.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum PackingRule {
    /// std140, used for constant buffers and plain structs.
    #[default]
    Uniform,
    /// std430, used for structured buffers.
    Storage,
    /// Tightly packed vertex stream layout.
    Vertex,
}

/// Linear placement of one structure member.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct MemberLayout {
    pub offset: u32,
    pub size: u32,
    pub alignment: u32,
    pub array_count: u32,
    pub array_stride: u32,
    pub format: ImageFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeMember {
    pub name: String,
    pub ty: DataType,
    /// Explicit `offset=` attribute, if any.
    pub explicit_offset: Option<u32>,
    pub layout: MemberLayout,
}

/// A user structure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeType {
    pub name: String,
    pub packing: PackingRule,
    pub members: Vec<CompositeMember>,
    pub size: u32,
    pub alignment: u32,
}

impl CompositeType {
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    pub fn member(&self, name: &str) -> Option<&CompositeMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_parse_to_shapes() {
        assert_eq!(DataType::from_keyword("float"), Some(DataType::FLOAT));
        assert_eq!(
            DataType::from_keyword("uvec3"),
            Some(DataType::new(BaseType::Vector(ScalarKind::Uint, 3)))
        );
        assert_eq!(
            DataType::from_keyword("mat3x4"),
            Some(DataType::new(BaseType::Matrix { cols: 3, rows: 4 }))
        );
        assert_eq!(
            DataType::from_keyword("mat4"),
            Some(DataType::new(BaseType::Matrix { cols: 4, rows: 4 }))
        );
        assert_eq!(DataType::from_keyword("vec5"), None);
        assert_eq!(DataType::from_keyword("Material"), None);
    }

    #[test]
    fn array_counts_total_and_pop() {
        let counts = ArrayCounts::default().append(4).unwrap().append(3).unwrap();
        assert_eq!(counts.total(), Some(12));
        assert_eq!(counts.pop_outer().dimensions(), &[3]);
        let unsized_outer = ArrayCounts::default().append(0).unwrap();
        assert_eq!(unsized_outer.total(), None);
    }

    #[test]
    fn element_of_array_drops_outer_dimension() {
        let arr = DataType::FLOAT.with_array(ArrayCounts::default().append(6).unwrap());
        assert!(arr.is_array());
        assert_eq!(arr.element(), DataType::FLOAT);
        assert_eq!(arr.component_count(), None);
    }

    #[test]
    fn image_format_names_round_trip() {
        for raw in 1..=21u16 {
            let f = ImageFormat::from_raw(raw).unwrap();
            assert_eq!(ImageFormat::from_name(f.name()), Some(f));
        }
        assert_eq!(ImageFormat::R32Ui.class(), FormatClass::Uint);
    }
}
