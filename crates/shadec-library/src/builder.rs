use std::hash::Hash;

use bytemuck::Pod;
use rustc_hash::FxHashMap;
use shadec_ir::{CodeLibrary, CompositeType, Handle, KeyBuilder, ResourceTable, ShaderStage, crc64};

use crate::format::{
    Chunk, ChunkInfo, DataLayoutElement, DataLayoutStructure, Header, INVALID_PIPELINE_INDEX,
    ParameterBindingState, ParameterResourceLayoutElement, ParameterResourceLayoutTable, PipelineIndex,
    ShaderBlob, ShaderBundle, VertexInputLayout, VertexInputState,
};

/// Compressed blobs are kept only when at most this share of the original.
const COMPRESSION_CUTOFF: (usize, usize) = (9, 10);

/// Append-only table that hands out one index per distinct record.
#[derive(Debug)]
struct Table<T> {
    records: Vec<T>,
    index: FxHashMap<T, PipelineIndex>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

impl<T: Copy + Eq + Hash> Table<T> {
    fn intern(&mut self, record: T) -> PipelineIndex {
        if let Some(&index) = self.index.get(&record) {
            return index;
        }
        let index = to_index(self.records.len());
        self.records.push(record);
        self.index.insert(record, index);
        index
    }
}

fn to_index(len: usize) -> PipelineIndex {
    match u32::try_from(len) {
        Ok(index) if index != INVALID_PIPELINE_INDEX => index,
        _ => panic!("shader library table overflow"),
    }
}

/// Interns layouts, binding states and compiled shaders into the tables of
/// the binary library format.
///
/// Every `map_*` call is idempotent on content: structurally equal inputs
/// return the same [`PipelineIndex`] regardless of where they came from.
#[derive(Debug)]
pub struct ShaderLibraryBuilder {
    compress: bool,
    strings: Vec<u8>,
    string_map: FxHashMap<String, u32>,
    names: Table<u32>,
    indirect_indices: Vec<PipelineIndex>,
    indirect_runs: FxHashMap<Vec<PipelineIndex>, PipelineIndex>,
    data_elements: Table<DataLayoutElement>,
    data_structures: Table<DataLayoutStructure>,
    vertex_layouts: Table<VertexInputLayout>,
    vertex_states: Table<VertexInputState>,
    resource_elements: Table<ParameterResourceLayoutElement>,
    resource_tables: Table<ParameterResourceLayoutTable>,
    binding_states: Table<ParameterBindingState>,
    blobs: Vec<ShaderBlob>,
    blob_map: FxHashMap<u64, PipelineIndex>,
    shader_data: Vec<u8>,
    bundles: Table<ShaderBundle>,
}

impl Default for ShaderLibraryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderLibraryBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            compress: true,
            strings: Vec::new(),
            string_map: FxHashMap::default(),
            names: Table::default(),
            indirect_indices: Vec::new(),
            indirect_runs: FxHashMap::default(),
            data_elements: Table::default(),
            data_structures: Table::default(),
            vertex_layouts: Table::default(),
            vertex_states: Table::default(),
            resource_elements: Table::default(),
            resource_tables: Table::default(),
            binding_states: Table::default(),
            blobs: Vec::new(),
            blob_map: FxHashMap::default(),
            shader_data: Vec::new(),
            bundles: Table::default(),
        };
        // The empty string sits at offset 0 and the empty name at index 0.
        builder.strings.push(0);
        builder.string_map.insert(String::new(), 0);
        builder.names.intern(0);
        builder
    }

    /// Disables LZ4 compression of shader blobs.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Offset of `text` in the string table.
    pub fn map_string(&mut self, text: &str) -> u32 {
        if let Some(&offset) = self.string_map.get(text) {
            return offset;
        }
        let offset = to_index(self.strings.len());
        self.strings.extend_from_slice(text.as_bytes());
        self.strings.push(0);
        self.string_map.insert(text.to_owned(), offset);
        offset
    }

    /// Index of `text` in the name table; 0 for the empty name.
    pub fn map_name(&mut self, text: &str) -> PipelineIndex {
        let offset = self.map_string(text);
        self.names.intern(offset)
    }

    /// Stores an index run and returns `(first, count)`. Equal runs are
    /// stored once, so records built from them compare equal.
    pub fn map_indirect_indices(&mut self, indices: &[PipelineIndex]) -> (PipelineIndex, u32) {
        if indices.is_empty() {
            return (INVALID_PIPELINE_INDEX, 0);
        }
        let count = to_index(indices.len());
        if let Some(&first) = self.indirect_runs.get(indices) {
            return (first, count);
        }
        let first = to_index(self.indirect_indices.len());
        self.indirect_indices.extend_from_slice(indices);
        self.indirect_runs.insert(indices.to_vec(), first);
        (first, count)
    }

    /// Maps a structure and every structure nested in it.
    pub fn map_data_layout(&mut self, lib: &CodeLibrary, composite: Handle<CompositeType>) -> PipelineIndex {
        let ty = &lib.composites[composite];
        let mut elements = Vec::with_capacity(ty.members.len());
        for member in &ty.members {
            let structure = match member.ty.composite() {
                Some(nested) => self.map_data_layout(lib, nested),
                None => INVALID_PIPELINE_INDEX,
            };
            let layout = &member.layout;
            let element = DataLayoutElement {
                name: self.map_name(&member.name),
                offset: layout.offset,
                size: layout.size,
                alignment: layout.alignment,
                array_count: layout.array_count,
                array_stride: layout.array_stride,
                format: layout.format as u32,
                structure,
            };
            elements.push(self.data_elements.intern(element));
        }
        let (first_element, element_count) = self.map_indirect_indices(&elements);
        let structure = DataLayoutStructure {
            name: self.map_name(&ty.name),
            alignment: ty.alignment,
            size: ty.size,
            first_element,
            element_count,
        };
        self.data_structures.intern(structure)
    }

    pub fn map_vertex_input_layout(
        &mut self,
        name: &str,
        structure: PipelineIndex,
        custom_stride: u32,
        instanced: bool,
    ) -> PipelineIndex {
        let layout = VertexInputLayout {
            name: self.map_name(name),
            structure,
            custom_stride,
            instanced: u32::from(instanced),
        };
        self.vertex_layouts.intern(layout)
    }

    /// Maps the ordered vertex streams of one vertex shader.
    pub fn map_vertex_input_state(&mut self, layouts: &[PipelineIndex]) -> PipelineIndex {
        let (first_stream_layout, stream_layout_count) = self.map_indirect_indices(layouts);
        let mut state = VertexInputState {
            first_stream_layout,
            stream_layout_count,
            structure_key: 0,
        };
        state.structure_key = self.vertex_state_key(&state);
        self.vertex_states.intern(state)
    }

    /// Maps every resource of `table`, in declaration order.
    pub fn map_parameter_layout(&mut self, lib: &CodeLibrary, table: &ResourceTable) -> PipelineIndex {
        let mut elements = Vec::with_capacity(table.entries.len());
        for entry in &table.entries {
            let layout = match entry.ty.layout {
                Some(layout) => self.map_data_layout(lib, layout),
                None => INVALID_PIPELINE_INDEX,
            };
            let element = ParameterResourceLayoutElement {
                name: self.map_name(&entry.name),
                layout,
                kind: entry.ty.kind as u8,
                access: entry.ty.access as u8,
                format: entry.ty.format as u16,
                max_array_count: 0,
            };
            elements.push(self.resource_elements.intern(element));
        }
        let (first_element, element_count) = self.map_indirect_indices(&elements);
        let mut record = ParameterResourceLayoutTable {
            name: self.map_name(&table.name),
            first_element,
            element_count,
            reserved: 0,
            structure_key: 0,
        };
        record.structure_key = self.resource_table_key(&record);
        self.resource_tables.intern(record)
    }

    /// Maps the ordered resource tables bound by one bundle.
    pub fn map_parameter_binding_state(&mut self, tables: &[PipelineIndex]) -> PipelineIndex {
        let (first_parameter_layout, parameter_layout_count) = self.map_indirect_indices(tables);
        let mut state = ParameterBindingState {
            first_parameter_layout,
            parameter_layout_count,
            structure_key: 0,
        };
        state.structure_key = self.binding_state_key(&state);
        self.binding_states.intern(state)
    }

    /// Stores a compiled shader, deduplicated by content.
    ///
    /// # Panics
    ///
    /// When two different blobs share a CRC64.
    pub fn map_shader_data_blob(&mut self, stage: ShaderStage, data: &[u8]) -> PipelineIndex {
        if data.is_empty() {
            return INVALID_PIPELINE_INDEX;
        }
        let data_hash = crc64(data);
        if let Some(&index) = self.blob_map.get(&data_hash) {
            let stored = self.unpacked_blob(index);
            if stored.as_deref() != Some(data) {
                panic!("shader blob hash collision for {data_hash:016x}");
            }
            log::trace!("reusing shader blob {index} ({data_hash:016x})");
            return index;
        }

        let unpacked_size = to_index(data.len());
        let offset = to_index(self.shader_data.len());
        let packed = self.compress.then(|| lz4_flex::block::compress(data));
        let packed_size = match packed {
            Some(packed) if packed.len() <= data.len() * COMPRESSION_CUTOFF.0 / COMPRESSION_CUTOFF.1 => {
                self.shader_data.extend_from_slice(&packed);
                to_index(packed.len())
            }
            _ => {
                self.shader_data.extend_from_slice(data);
                unpacked_size
            }
        };
        log::debug!("stored {stage} blob: {unpacked_size} bytes, {packed_size} packed");

        let index = to_index(self.blobs.len());
        self.blobs.push(ShaderBlob {
            stage: stage as u8,
            reserved: [0; 3],
            offset,
            packed_size,
            unpacked_size,
            data_hash,
        });
        self.blob_map.insert(data_hash, index);
        index
    }

    /// Maps a bundle of stage blobs sharing one binding and vertex state.
    pub fn map_shader_bundle(
        &mut self,
        vertex_input_state: PipelineIndex,
        parameter_binding_state: PipelineIndex,
        shaders: &[PipelineIndex],
    ) -> PipelineIndex {
        let (first_shader, shader_count) = self.map_indirect_indices(shaders);
        let mut bundle = ShaderBundle {
            vertex_input_state,
            parameter_binding_state,
            first_shader,
            shader_count,
            bundle_key: 0,
        };
        bundle.bundle_key = self.bundle_key(&bundle);
        self.bundles.intern(bundle)
    }

    pub fn bundle(&self, index: PipelineIndex) -> &ShaderBundle {
        &self.bundles.records[index as usize]
    }

    pub fn blob(&self, index: PipelineIndex) -> &ShaderBlob {
        &self.blobs[index as usize]
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn bundle_count(&self) -> usize {
        self.bundles.records.len()
    }

    pub fn shader_data_len(&self) -> usize {
        self.shader_data.len()
    }

    /// The header and every table, ready to be written out.
    pub fn extract_structure_data(&self) -> Vec<u8> {
        let chunks: [(Chunk, &[u8], usize); Chunk::COUNT] = [
            (Chunk::StringTable, &self.strings, self.strings.len()),
            (Chunk::Names, bytes(&self.names.records), self.names.records.len()),
            (Chunk::IndirectIndices, bytes(&self.indirect_indices), self.indirect_indices.len()),
            (Chunk::DataElements, bytes(&self.data_elements.records), self.data_elements.records.len()),
            (Chunk::DataStructures, bytes(&self.data_structures.records), self.data_structures.records.len()),
            (Chunk::VertexInputLayouts, bytes(&self.vertex_layouts.records), self.vertex_layouts.records.len()),
            (Chunk::VertexInputStates, bytes(&self.vertex_states.records), self.vertex_states.records.len()),
            (
                Chunk::ParameterResourceElements,
                bytes(&self.resource_elements.records),
                self.resource_elements.records.len(),
            ),
            (
                Chunk::ParameterResourceTables,
                bytes(&self.resource_tables.records),
                self.resource_tables.records.len(),
            ),
            (Chunk::ParameterBindingStates, bytes(&self.binding_states.records), self.binding_states.records.len()),
            (Chunk::ShaderBlobs, bytes(&self.blobs), self.blobs.len()),
            (Chunk::ShaderBundles, bytes(&self.bundles.records), self.bundles.records.len()),
        ];
        debug_assert!(chunks.iter().map(|c| c.0).eq(Chunk::WRITE_ORDER));

        let mut header = Header::default();
        let mut out = vec![0u8; Header::SIZE];
        for (chunk, data, count) in chunks {
            header.chunks[chunk as usize] = ChunkInfo {
                offset: to_index(out.len()),
                count: to_index(count),
            };
            out.extend_from_slice(data);
        }
        out[..Header::SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        log::debug!("structure data: {} bytes, {} bundles", out.len(), self.bundles.records.len());
        out
    }

    /// Concatenated shader blobs, as referenced by [`ShaderBlob::offset`].
    pub fn extract_shader_data(&self) -> Vec<u8> {
        self.shader_data.clone()
    }

    fn unpacked_blob(&self, index: PipelineIndex) -> Option<Vec<u8>> {
        let blob = &self.blobs[index as usize];
        let start = blob.offset as usize;
        let stored = &self.shader_data[start..start + blob.packed_size as usize];
        if blob.is_compressed() {
            lz4_flex::block::decompress(stored, blob.unpacked_size as usize).ok()
        } else {
            Some(stored.to_vec())
        }
    }

    fn indirect(&self, first: PipelineIndex, count: u32) -> &[PipelineIndex] {
        if count == 0 {
            return &[];
        }
        &self.indirect_indices[first as usize..first as usize + count as usize]
    }

    fn data_structure_key(&self, key: &mut KeyBuilder, structure: PipelineIndex) {
        let s = self.data_structures.records[structure as usize];
        key.u32(s.size).u32(s.alignment).u32(s.element_count);
        for &e in self.indirect(s.first_element, s.element_count) {
            let e = self.data_elements.records[e as usize];
            key.u32(e.alignment)
                .u32(e.array_count)
                .u32(e.array_stride)
                .u32(e.format)
                .u32(e.offset)
                .u32(e.size);
            if e.structure != INVALID_PIPELINE_INDEX {
                self.data_structure_key(key, e.structure);
            }
        }
    }

    fn write_vertex_state_key(&self, key: &mut KeyBuilder, state: &VertexInputState) {
        key.u32(state.stream_layout_count);
        for &l in self.indirect(state.first_stream_layout, state.stream_layout_count) {
            let layout = self.vertex_layouts.records[l as usize];
            key.u32(layout.instanced).u32(layout.custom_stride);
            self.data_structure_key(key, layout.structure);
        }
    }

    fn vertex_state_key(&self, state: &VertexInputState) -> u64 {
        let mut key = KeyBuilder::new();
        self.write_vertex_state_key(&mut key, state);
        key.finish()
    }

    fn write_resource_table_key(&self, key: &mut KeyBuilder, table: &ParameterResourceLayoutTable) {
        key.u32(table.element_count);
        for &e in self.indirect(table.first_element, table.element_count) {
            let e = self.resource_elements.records[e as usize];
            key.u8(e.kind).u16(e.format).u8(e.access).u32(e.max_array_count);
            if e.layout != INVALID_PIPELINE_INDEX {
                self.data_structure_key(key, e.layout);
            }
        }
    }

    fn resource_table_key(&self, table: &ParameterResourceLayoutTable) -> u64 {
        let mut key = KeyBuilder::new();
        self.write_resource_table_key(&mut key, table);
        key.finish()
    }

    fn write_binding_state_key(&self, key: &mut KeyBuilder, state: &ParameterBindingState) {
        key.u32(state.parameter_layout_count);
        for &t in self.indirect(state.first_parameter_layout, state.parameter_layout_count) {
            let table = self.resource_tables.records[t as usize];
            self.write_resource_table_key(key, &table);
        }
    }

    fn binding_state_key(&self, state: &ParameterBindingState) -> u64 {
        let mut key = KeyBuilder::new();
        self.write_binding_state_key(&mut key, state);
        key.finish()
    }

    fn bundle_key(&self, bundle: &ShaderBundle) -> u64 {
        let mut key = KeyBuilder::new();
        if bundle.parameter_binding_state != INVALID_PIPELINE_INDEX {
            let state = self.binding_states.records[bundle.parameter_binding_state as usize];
            self.write_binding_state_key(&mut key, &state);
        }
        if bundle.vertex_input_state != INVALID_PIPELINE_INDEX {
            let state = self.vertex_states.records[bundle.vertex_input_state as usize];
            self.write_vertex_state_key(&mut key, &state);
        }
        key.u32(bundle.shader_count);
        for &b in self.indirect(bundle.first_shader, bundle.shader_count) {
            let blob = self.blobs[b as usize];
            key.u8(blob.stage).u32(blob.unpacked_size).u64(blob.data_hash);
        }
        key.finish()
    }
}

fn bytes<T: Pod>(records: &[T]) -> &[u8] {
    bytemuck::cast_slice(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadec_ir::{CompositeMember, DataType, PackingRule};

    fn composite(name: &str, members: &[(&str, DataType)]) -> CompositeType {
        CompositeType {
            name: name.into(),
            packing: PackingRule::Uniform,
            members: members
                .iter()
                .map(|(n, ty)| CompositeMember {
                    name: (*n).into(),
                    ty: ty.clone(),
                    explicit_offset: None,
                    layout: Default::default(),
                })
                .collect(),
            size: 0,
            alignment: 0,
        }
    }

    #[test]
    fn names_start_with_the_empty_entry() {
        let mut b = ShaderLibraryBuilder::new();
        assert_eq!(b.map_name(""), 0);
        assert_eq!(b.map_name("Albedo"), 1);
        assert_eq!(b.map_name("Albedo"), 1);
        assert_eq!(b.map_string("Albedo"), 1);
        assert_eq!(b.map_indirect_indices(&[]), (INVALID_PIPELINE_INDEX, 0));
        assert_eq!(b.map_indirect_indices(&[4, 5]), (0, 2));
        assert_eq!(b.map_indirect_indices(&[6]), (2, 1));
        assert_eq!(b.map_indirect_indices(&[4, 5]), (0, 2));
    }

    #[test]
    fn identical_structures_share_an_index() {
        let mut lib = CodeLibrary::new();
        let a = lib.add_composite(composite("A", &[("x", DataType::FLOAT), ("y", DataType::vec(4))])).unwrap();
        let b = lib.add_composite(composite("A", &[("x", DataType::FLOAT), ("y", DataType::vec(4))])).unwrap();
        let c = lib.add_composite(composite("A", &[("x", DataType::vec(4)), ("y", DataType::FLOAT)])).unwrap();

        let mut builder = ShaderLibraryBuilder::new();
        let ia = builder.map_data_layout(&lib, a);
        assert_eq!(builder.map_data_layout(&lib, b), ia);
        assert_ne!(builder.map_data_layout(&lib, c), ia);
    }

    #[test]
    fn vertex_state_keys_ignore_names() {
        let mut lib = CodeLibrary::new();
        let a = lib.add_composite(composite("A", &[("p", DataType::vec(3))])).unwrap();
        let b = lib.add_composite(composite("B", &[("q", DataType::vec(3))])).unwrap();

        let mut builder = ShaderLibraryBuilder::new();
        let sa = builder.map_data_layout(&lib, a);
        let sb = builder.map_data_layout(&lib, b);
        assert_ne!(sa, sb);
        let la = builder.map_vertex_input_layout("a", sa, 0, false);
        let lb = builder.map_vertex_input_layout("b", sb, 0, false);
        let va = builder.map_vertex_input_state(&[la]);
        let vb = builder.map_vertex_input_state(&[lb]);
        assert_ne!(va, vb);
        assert_eq!(
            builder.vertex_states.records[va as usize].structure_key,
            builder.vertex_states.records[vb as usize].structure_key
        );
    }

    #[test]
    fn blobs_dedup_and_compress() {
        let mut builder = ShaderLibraryBuilder::new();
        let text = "void main() { gl_FragColor = vec4(1.0); }\n".repeat(32);
        let first = builder.map_shader_data_blob(ShaderStage::Pixel, text.as_bytes());
        let size = builder.shader_data_len();
        assert_eq!(builder.map_shader_data_blob(ShaderStage::Pixel, text.as_bytes()), first);
        assert_eq!(builder.shader_data_len(), size);
        assert!(builder.blob(first).is_compressed());
        assert_eq!(builder.unpacked_blob(first).as_deref(), Some(text.as_bytes()));

        assert_eq!(builder.map_shader_data_blob(ShaderStage::Pixel, &[]), INVALID_PIPELINE_INDEX);

        let mut raw = ShaderLibraryBuilder::new().with_compression(false);
        let index = raw.map_shader_data_blob(ShaderStage::Vertex, text.as_bytes());
        assert!(!raw.blob(index).is_compressed());
        assert_eq!(raw.shader_data_len(), text.len());
    }

    #[test]
    fn incompressible_blobs_are_stored_raw() {
        let mut builder = ShaderLibraryBuilder::new();
        let index = builder.map_shader_data_blob(ShaderStage::Compute, b"abc");
        let blob = builder.blob(index);
        assert_eq!(blob.packed_size, 3);
        assert_eq!(blob.unpacked_size, 3);
        assert_eq!(blob.stage, ShaderStage::Compute as u8);
    }
}
