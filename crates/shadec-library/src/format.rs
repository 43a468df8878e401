//! Records of the structure blob.
//!
//! Every table is an array of `#[repr(C)]` plain-old-data records written
//! as raw bytes. Cross references are [`PipelineIndex`] values, and lists
//! are `(first, count)` ranges into the indirect index table, so a loaded
//! blob needs no relocation.

use std::fmt;

use bytemuck::{Pod, Zeroable};

#[cfg(target_endian = "big")]
compile_error!("the shader library format is little-endian and written as raw memory");

/// Index into one of the library tables.
pub type PipelineIndex = u32;

/// Marks an absent reference or an empty range.
pub const INVALID_PIPELINE_INDEX: PipelineIndex = u32::MAX;

/// One member of a data layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DataLayoutElement {
    pub name: PipelineIndex,
    pub offset: u32,
    pub size: u32,
    pub alignment: u32,
    /// 0 for non-arrays.
    pub array_count: u32,
    pub array_stride: u32,
    /// Raw `ImageFormat` of scalar and vector members, 0 for structures.
    pub format: u32,
    /// Nested structure layout, or [`INVALID_PIPELINE_INDEX`].
    pub structure: PipelineIndex,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DataLayoutStructure {
    pub name: PipelineIndex,
    pub alignment: u32,
    pub size: u32,
    pub first_element: PipelineIndex,
    pub element_count: u32,
}

/// One vertex stream: a bind point fed by a buffer of `structure`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct VertexInputLayout {
    pub name: PipelineIndex,
    pub structure: PipelineIndex,
    /// 0 uses the structure size.
    pub custom_stride: u32,
    pub instanced: u32,
}

/// The vertex streams a vertex shader reads.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct VertexInputState {
    pub first_stream_layout: PipelineIndex,
    pub stream_layout_count: u32,
    /// CRC64 over the layouts, ignoring names.
    pub structure_key: u64,
}

/// One resource of a parameter table.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ParameterResourceLayoutElement {
    pub name: PipelineIndex,
    /// Data layout of constant and structured buffers.
    pub layout: PipelineIndex,
    /// Raw `ResourceKind`.
    pub kind: u8,
    /// Raw `ResourceAccess`.
    pub access: u8,
    /// Raw `ImageFormat` of images and formatted buffers.
    pub format: u16,
    pub max_array_count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ParameterResourceLayoutTable {
    pub name: PipelineIndex,
    pub first_element: PipelineIndex,
    pub element_count: u32,
    pub reserved: u32,
    pub structure_key: u64,
}

/// The ordered resource tables a bundle binds.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ParameterBindingState {
    pub first_parameter_layout: PipelineIndex,
    pub parameter_layout_count: u32,
    pub structure_key: u64,
}

/// One compiled shader inside the shader-data blob.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ShaderBlob {
    /// Raw `ShaderStage`.
    pub stage: u8,
    pub reserved: [u8; 3],
    pub offset: u32,
    /// Stored size; smaller than `unpacked_size` when LZ4 compressed.
    pub packed_size: u32,
    pub unpacked_size: u32,
    /// CRC64 of the unpacked bytes.
    pub data_hash: u64,
}

impl ShaderBlob {
    pub fn is_compressed(&self) -> bool {
        self.packed_size < self.unpacked_size
    }
}

/// Per-stage shaders plus the binding and vertex state they share.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ShaderBundle {
    /// Only set when the bundle has a vertex shader.
    pub vertex_input_state: PipelineIndex,
    pub parameter_binding_state: PipelineIndex,
    pub first_shader: PipelineIndex,
    pub shader_count: u32,
    /// Identifies the combination of shaders and states.
    pub bundle_key: u64,
}

/// Location of one table inside the structure blob.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ChunkInfo {
    pub offset: u32,
    pub count: u32,
}

/// Directory at the start of the structure blob.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Header {
    pub chunks: [ChunkInfo; Chunk::COUNT],
}

impl Header {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn chunk(&self, chunk: Chunk) -> ChunkInfo {
        self.chunks[chunk as usize]
    }
}

/// Tables of the structure blob, in directory order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Chunk {
    StringTable = 0,
    Names,
    IndirectIndices,
    DataElements,
    DataStructures,
    ParameterBindingStates,
    ParameterResourceElements,
    ParameterResourceTables,
    VertexInputLayouts,
    VertexInputStates,
    ShaderBlobs,
    ShaderBundles,
}

impl Chunk {
    pub const COUNT: usize = 12;

    /// Directory order.
    pub const ALL: [Chunk; Self::COUNT] = [
        Self::StringTable,
        Self::Names,
        Self::IndirectIndices,
        Self::DataElements,
        Self::DataStructures,
        Self::ParameterBindingStates,
        Self::ParameterResourceElements,
        Self::ParameterResourceTables,
        Self::VertexInputLayouts,
        Self::VertexInputStates,
        Self::ShaderBlobs,
        Self::ShaderBundles,
    ];

    /// Order in which chunk bytes follow the header.
    pub const WRITE_ORDER: [Chunk; Self::COUNT] = [
        Self::StringTable,
        Self::Names,
        Self::IndirectIndices,
        Self::DataElements,
        Self::DataStructures,
        Self::VertexInputLayouts,
        Self::VertexInputStates,
        Self::ParameterResourceElements,
        Self::ParameterResourceTables,
        Self::ParameterBindingStates,
        Self::ShaderBlobs,
        Self::ShaderBundles,
    ];

    /// Size of one record of this table in bytes.
    pub fn record_size(self) -> usize {
        use std::mem::size_of;
        match self {
            Self::StringTable => 1,
            Self::Names | Self::IndirectIndices => size_of::<u32>(),
            Self::DataElements => size_of::<DataLayoutElement>(),
            Self::DataStructures => size_of::<DataLayoutStructure>(),
            Self::ParameterBindingStates => size_of::<ParameterBindingState>(),
            Self::ParameterResourceElements => size_of::<ParameterResourceLayoutElement>(),
            Self::ParameterResourceTables => size_of::<ParameterResourceLayoutTable>(),
            Self::VertexInputLayouts => size_of::<VertexInputLayout>(),
            Self::VertexInputStates => size_of::<VertexInputState>(),
            Self::ShaderBlobs => size_of::<ShaderBlob>(),
            Self::ShaderBundles => size_of::<ShaderBundle>(),
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_are_stable() {
        assert_eq!(Header::SIZE, 96);
        assert_eq!(Chunk::DataElements.record_size(), 32);
        assert_eq!(Chunk::DataStructures.record_size(), 20);
        assert_eq!(Chunk::VertexInputStates.record_size(), 16);
        assert_eq!(Chunk::ParameterResourceTables.record_size(), 24);
        assert_eq!(Chunk::ShaderBlobs.record_size(), 24);
        assert_eq!(Chunk::ShaderBundles.record_size(), 24);
    }

    #[test]
    fn write_order_covers_every_chunk() {
        let mut sorted = Chunk::WRITE_ORDER;
        sorted.sort();
        assert_eq!(sorted, Chunk::ALL);
    }
}
