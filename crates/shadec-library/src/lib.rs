//! Binary shader library: a structure blob of deduplicated tables plus a
//! shader-data blob of (optionally LZ4 compressed) compiled shaders.

pub mod builder;
pub mod format;
pub mod reader;

pub use builder::ShaderLibraryBuilder;
pub use format::{
    Chunk, ChunkInfo, DataLayoutElement, DataLayoutStructure, Header, INVALID_PIPELINE_INDEX, ParameterBindingState,
    ParameterResourceLayoutElement, ParameterResourceLayoutTable, PipelineIndex, ShaderBlob, ShaderBundle,
    VertexInputLayout, VertexInputState,
};
pub use reader::{LibraryDataError, ShaderLibraryData};
