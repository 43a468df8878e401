//! Loading of a structure blob and its shader-data blob.

use std::borrow::Cow;
use std::ops::Range;

use bytemuck::Pod;

use crate::format::{
    Chunk, DataLayoutElement, DataLayoutStructure, Header, INVALID_PIPELINE_INDEX, ParameterBindingState,
    ParameterResourceLayoutElement, ParameterResourceLayoutTable, PipelineIndex, ShaderBlob, ShaderBundle,
    VertexInputLayout, VertexInputState,
};

#[derive(Debug, thiserror::Error)]
pub enum LibraryDataError {
    #[error("structure data is {0} bytes, shorter than its header")]
    TooShort(usize),
    #[error("chunk {chunk} ({count} records at offset {offset}) is outside the {len}-byte structure data")]
    ChunkOutOfBounds {
        chunk: Chunk,
        offset: u32,
        count: u32,
        len: usize,
    },
    #[error("chunks {0} and {1} overlap")]
    ChunkOverlap(Chunk, Chunk),
    #[error("shader blob {index} is outside the {len}-byte shader data")]
    BlobOutOfBounds { index: PipelineIndex, len: usize },
    #[error("{table} index {index} is out of range")]
    InvalidIndex { table: &'static str, index: PipelineIndex },
    #[error("shader blob does not decompress")]
    Decompress(#[from] lz4_flex::block::DecompressError),
}

/// A loaded shader library.
#[derive(Debug, Clone)]
pub struct ShaderLibraryData {
    strings: Vec<u8>,
    names: Vec<u32>,
    indirect_indices: Vec<PipelineIndex>,
    pub data_elements: Vec<DataLayoutElement>,
    pub data_structures: Vec<DataLayoutStructure>,
    pub binding_states: Vec<ParameterBindingState>,
    pub resource_elements: Vec<ParameterResourceLayoutElement>,
    pub resource_tables: Vec<ParameterResourceLayoutTable>,
    pub vertex_layouts: Vec<VertexInputLayout>,
    pub vertex_states: Vec<VertexInputState>,
    pub blobs: Vec<ShaderBlob>,
    pub bundles: Vec<ShaderBundle>,
    shader_data: Vec<u8>,
}

impl ShaderLibraryData {
    /// Validates the directory and copies every table out of `structure`.
    pub fn from_buffers(structure: &[u8], shader_data: &[u8]) -> Result<Self, LibraryDataError> {
        if structure.len() < Header::SIZE {
            return Err(LibraryDataError::TooShort(structure.len()));
        }
        let header: Header = bytemuck::pod_read_unaligned(&structure[..Header::SIZE]);

        let mut ranges: Vec<(Chunk, Range<usize>)> = Vec::with_capacity(Chunk::COUNT);
        for chunk in Chunk::ALL {
            let info = header.chunk(chunk);
            let out_of_bounds = || LibraryDataError::ChunkOutOfBounds {
                chunk,
                offset: info.offset,
                count: info.count,
                len: structure.len(),
            };
            let start = info.offset as usize;
            let end = (info.count as usize)
                .checked_mul(chunk.record_size())
                .and_then(|size| start.checked_add(size))
                .ok_or_else(out_of_bounds)?;
            if start < Header::SIZE || end > structure.len() {
                return Err(out_of_bounds());
            }
            ranges.push((chunk, start..end));
        }

        let mut sorted: Vec<_> = ranges.iter().filter(|(_, r)| !r.is_empty()).collect();
        sorted.sort_by_key(|(_, r)| r.start);
        for pair in sorted.windows(2) {
            if pair[0].1.end > pair[1].1.start {
                return Err(LibraryDataError::ChunkOverlap(pair[0].0, pair[1].0));
            }
        }

        let range = |chunk: Chunk| &structure[ranges[chunk as usize].1.clone()];
        let data = Self {
            strings: range(Chunk::StringTable).to_vec(),
            names: records(range(Chunk::Names)),
            indirect_indices: records(range(Chunk::IndirectIndices)),
            data_elements: records(range(Chunk::DataElements)),
            data_structures: records(range(Chunk::DataStructures)),
            binding_states: records(range(Chunk::ParameterBindingStates)),
            resource_elements: records(range(Chunk::ParameterResourceElements)),
            resource_tables: records(range(Chunk::ParameterResourceTables)),
            vertex_layouts: records(range(Chunk::VertexInputLayouts)),
            vertex_states: records(range(Chunk::VertexInputStates)),
            blobs: records(range(Chunk::ShaderBlobs)),
            bundles: records(range(Chunk::ShaderBundles)),
            shader_data: shader_data.to_vec(),
        };

        for (index, blob) in data.blobs.iter().enumerate() {
            let end = blob.offset as usize + blob.packed_size as usize;
            if end > shader_data.len() {
                return Err(LibraryDataError::BlobOutOfBounds {
                    index: index as PipelineIndex,
                    len: shader_data.len(),
                });
            }
        }
        log::debug!(
            "loaded shader library: {} bundles, {} blobs",
            data.bundles.len(),
            data.blobs.len()
        );
        Ok(data)
    }

    /// NUL-terminated string at `offset` of the string table.
    pub fn string(&self, offset: u32) -> Option<&str> {
        let tail = self.strings.get(offset as usize..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..end]).ok()
    }

    pub fn name(&self, index: PipelineIndex) -> Option<&str> {
        self.string(*self.names.get(index as usize)?)
    }

    /// Entries of an index run; empty for `INVALID_PIPELINE_INDEX`.
    pub fn indirect(&self, first: PipelineIndex, count: u32) -> Result<&[PipelineIndex], LibraryDataError> {
        if first == INVALID_PIPELINE_INDEX || count == 0 {
            return Ok(&[]);
        }
        let start = first as usize;
        self.indirect_indices
            .get(start..start + count as usize)
            .ok_or(LibraryDataError::InvalidIndex {
                table: "indirect index",
                index: first,
            })
    }

    /// Blob indices of a bundle, in stage generation order.
    pub fn bundle_shaders(&self, bundle: &ShaderBundle) -> Result<&[PipelineIndex], LibraryDataError> {
        self.indirect(bundle.first_shader, bundle.shader_count)
    }

    /// The original bytes of a shader blob.
    pub fn unpack_shader(&self, index: PipelineIndex) -> Result<Cow<'_, [u8]>, LibraryDataError> {
        let blob = self.blobs.get(index as usize).ok_or(LibraryDataError::InvalidIndex {
            table: "shader blob",
            index,
        })?;
        let start = blob.offset as usize;
        let stored = &self.shader_data[start..start + blob.packed_size as usize];
        if blob.is_compressed() {
            Ok(Cow::Owned(lz4_flex::block::decompress(stored, blob.unpacked_size as usize)?))
        } else {
            Ok(Cow::Borrowed(stored))
        }
    }
}

fn records<T: Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}
