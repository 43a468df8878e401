#![warn(missing_docs)]
//! Opcode generator interface for shadec.
//!
//! Defines the [`OpcodeGenerator`] trait that every target language backend
//! implements, the per-stage [`GenerationContext`] handed to it, and an
//! explicit [`GeneratorRegistry`] that the driver populates at startup and
//! queries by name.

use std::collections::BTreeMap;
use std::fmt::{self, Debug};

use rustc_hash::FxHashSet;
use shadec_fold::FunctionFolder;
use shadec_ir::{
    Callee, CodeLibrary, CodeNode, CompositeType, DataParameter, DataType, ErrorReported, ErrorReporter,
    FoldedFunction, Handle, Location, Program, ResourceKind, ResourceTable, ResourceType, ShaderStage,
};

/// Options shared by every generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationOptions {
    /// Target language version (`#version` for GLSL).
    pub glsl_version: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { glsl_version: 450 }
    }
}

/// One resource of a bound table, with the slot the generator gave it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BoundEntry {
    /// `<Table>_<entry>` identifier.
    pub merged_name: String,
    /// Category of the resource.
    pub kind: ResourceKind,
    /// Binding slot.
    pub slot: u32,
}

/// A resource table placed in a binding layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BoundTable {
    /// Table name.
    pub name: String,
    /// Entries in declaration order.
    pub entries: Vec<BoundEntry>,
}

/// Binding namespaces a generator may number independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingCategory {
    /// One namespace for everything.
    Any,
    /// Constant buffers.
    UniformBuffer,
    /// Structured buffers, formatted buffers and writable textures.
    Storage,
    /// Sampled textures.
    Texture,
}

impl BindingCategory {
    /// Category of a resource.
    pub fn of(ty: &ResourceType) -> Self {
        match ty.kind {
            ResourceKind::ConstantBuffer => Self::UniformBuffer,
            ResourceKind::Buffer => Self::Storage,
            ResourceKind::Texture if ty.uav => Self::Storage,
            ResourceKind::Texture => Self::Texture,
        }
    }
}

/// Binding slots for the resource tables of one shader bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourceBindingSetup {
    /// Tables in binding order.
    pub tables: Vec<BoundTable>,
}

impl ResourceBindingSetup {
    /// Numbers every entry of every table consecutively, tables in the
    /// given order.
    pub fn sequential(tables: &[&ResourceTable]) -> Self {
        Self::numbered(tables, |_| BindingCategory::Any)
    }

    /// Numbers entries with one counter per [`BindingCategory`], the way
    /// OpenGL keeps separate uniform-block, storage and texture units.
    pub fn per_category(tables: &[&ResourceTable]) -> Self {
        Self::numbered(tables, BindingCategory::of)
    }

    fn numbered(tables: &[&ResourceTable], category: impl Fn(&ResourceType) -> BindingCategory) -> Self {
        let mut counters = [0u32; 4];
        let tables = tables
            .iter()
            .map(|table| BoundTable {
                name: table.name.clone(),
                entries: table
                    .entries
                    .iter()
                    .map(|entry| {
                        let counter = &mut counters[category(&entry.ty) as usize];
                        let bound = BoundEntry {
                            merged_name: entry.merged_name.clone(),
                            kind: entry.ty.kind,
                            slot: *counter,
                        };
                        *counter += 1;
                        bound
                    })
                    .collect(),
            })
            .collect();
        Self { tables }
    }

    /// Slot of a resource by its merged name.
    pub fn slot(&self, merged_name: &str) -> Option<u32> {
        self.tables
            .iter()
            .flat_map(|t| &t.entries)
            .find(|e| e.merged_name == merged_name)
            .map(|e| e.slot)
    }

    /// Position of a table in binding order.
    pub fn table_index(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.name == name)
    }
}

/// A value one stage hands to the next through the stage interface.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StageDependency {
    /// Source name of the input.
    pub name: String,
    /// Type, without the per-vertex array of geometry inputs.
    pub ty: DataType,
    /// Interface location.
    pub location: u32,
}

/// Inputs a stage reads from the previous pipeline stage, by name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StageDependencies {
    entries: BTreeMap<String, StageDependency>,
}

impl StageDependencies {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an input.
    pub fn insert(&mut self, dependency: StageDependency) {
        self.entries.insert(dependency.name.clone(), dependency);
    }

    /// Looks up an input by name.
    pub fn get(&self, name: &str) -> Option<&StageDependency> {
        self.entries.get(name)
    }

    /// Inputs in name order.
    pub fn iter(&self) -> impl Iterator<Item = &StageDependency> {
        self.entries.values()
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the stage reads nothing from the previous stage.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A vertex buffer bind point read by a vertex shader.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexStream {
    /// The `vertex` parameter the shader reads through.
    pub param: Handle<DataParameter>,
    /// Bind point name.
    pub bind_point: String,
    /// Element structure of the stream.
    pub layout: Handle<CompositeType>,
    /// Distance between elements in bytes.
    pub stride: u32,
    /// Advances per instance instead of per vertex.
    pub instanced: bool,
    /// Declaration of the parameter.
    pub location: Location,
}

/// Everything a generator needs to emit one stage.
#[derive(Clone, Copy, Debug)]
pub struct GenerationContext<'a> {
    /// Folding session owning the entry function and everything it calls.
    pub folder: &'a FunctionFolder<'a>,
    /// Folded entry point.
    pub entry: Handle<FoldedFunction>,
    /// Stage being generated.
    pub stage: ShaderStage,
    /// Binding layout shared by every stage of the bundle.
    pub binding: &'a ResourceBindingSetup,
    /// Inputs the next pipeline stage reads, `None` when no stage follows.
    pub required_outputs: Option<&'a StageDependencies>,
    /// Vertex buffer streams, only for vertex shaders.
    pub vertex_streams: &'a [VertexStream],
    /// Generator options.
    pub options: &'a GenerationOptions,
}

impl<'a> GenerationContext<'a> {
    /// The parsed library.
    pub fn library(&self) -> &'a CodeLibrary {
        self.folder.library()
    }

    /// The folded entry point.
    pub fn entry_function(&self) -> &'a FoldedFunction {
        self.folder.function(self.entry)
    }

    /// Program the entry point was instanced from.
    pub fn program(&self) -> Handle<Program> {
        self.entry_function().instance.program
    }
}

/// Output of one stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratedShader {
    /// Compiled stage, stored as one shader blob.
    pub code: Vec<u8>,
    /// What this stage reads from the previous one.
    pub dependencies: StageDependencies,
}

/// A backend translating folded code into one target language.
///
/// Generators are shared between concurrently linked bundles, so per-call
/// state lives in locals of [`generate_opcodes`](Self::generate_opcodes).
pub trait OpcodeGenerator: Debug + Send + Sync {
    /// Registry name (e.g. "glsl").
    fn name(&self) -> &str;

    /// Assigns binding slots to the resource tables of a bundle.
    fn build_resource_binding(&self, tables: &[&ResourceTable]) -> ResourceBindingSetup;

    /// Emits one stage.
    fn generate_opcodes(
        &self,
        ctx: &GenerationContext<'_>,
        err: &mut dyn ErrorReporter,
    ) -> Result<GeneratedShader, ErrorReported>;
}

/// Generators available to a driver, looked up by name.
#[derive(Debug, Default)]
pub struct GeneratorRegistry {
    generators: Vec<Box<dyn OpcodeGenerator>>,
}

impl GeneratorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in [`NullGenerator`].
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(NullGenerator));
        reg
    }

    /// Registers a generator; a later registration with the same name
    /// replaces the earlier one.
    pub fn register(&mut self, generator: Box<dyn OpcodeGenerator>) {
        self.generators.retain(|g| g.name() != generator.name());
        self.generators.push(generator);
    }

    /// Finds a generator by name.
    pub fn find(&self, name: &str) -> Option<&dyn OpcodeGenerator> {
        self.generators.iter().find(|g| g.name() == name).map(|g| &**g)
    }

    /// Names of every registered generator.
    pub fn names(&self) -> Vec<&str> {
        self.generators.iter().map(|g| g.name()).collect()
    }
}

impl fmt::Display for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(", "))
    }
}

/// Dry-compile generator: produces no code and no dependencies, only a
/// one-byte marker so the bundle still links.
#[derive(Debug, Default)]
pub struct NullGenerator;

impl OpcodeGenerator for NullGenerator {
    fn name(&self) -> &str {
        "null"
    }

    fn build_resource_binding(&self, tables: &[&ResourceTable]) -> ResourceBindingSetup {
        ResourceBindingSetup::sequential(tables)
    }

    fn generate_opcodes(
        &self,
        ctx: &GenerationContext<'_>,
        _err: &mut dyn ErrorReporter,
    ) -> Result<GeneratedShader, ErrorReported> {
        log::trace!("null generator: skipping {} stage", ctx.stage);
        Ok(GeneratedShader {
            code: vec![ctx.stage as u8],
            dependencies: StageDependencies::new(),
        })
    }
}

/// Folded functions reachable from `entry`, entry first, each once.
pub fn reachable_functions(folder: &FunctionFolder<'_>, entry: Handle<FoldedFunction>) -> Vec<Handle<FoldedFunction>> {
    let mut order = vec![entry];
    let mut seen = FxHashSet::from_iter([entry]);
    let mut next = 0;
    while let Some(&function) = order.get(next) {
        next += 1;
        if let Some(code) = folder.function(function).code {
            visit_nodes(folder, code, &mut |node| {
                if let Some(Callee::Folded(callee)) = node.callee() {
                    if seen.insert(*callee) {
                        order.push(*callee);
                    }
                }
            });
        }
    }
    order
}

/// Parameters referenced by the code of `functions`, in first-use order.
pub fn referenced_parameters(
    folder: &FunctionFolder<'_>,
    functions: &[Handle<FoldedFunction>],
) -> Vec<Handle<DataParameter>> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for &function in functions {
        let Some(code) = folder.function(function).code else {
            continue;
        };
        visit_nodes(folder, code, &mut |node| {
            if let Some(param) = node.param() {
                if seen.insert(param) {
                    out.push(param);
                }
            }
        });
    }
    out
}

/// Pre-order walk over a folded code tree.
pub fn visit_nodes(folder: &FunctionFolder<'_>, root: Handle<CodeNode>, visit: &mut dyn FnMut(&CodeNode)) {
    let node = folder.node(root);
    visit(node);
    for &child in &node.children {
        visit_nodes(folder, child, visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadec_ir::{AttributeList, ImageViewType, ResourceTableEntry, ResourceType};

    fn table(name: &str, entries: &[&str]) -> ResourceTable {
        ResourceTable {
            name: name.into(),
            entries: entries
                .iter()
                .map(|e| ResourceTableEntry {
                    name: (*e).into(),
                    merged_name: ResourceTable::merged_name(name, e),
                    ty: ResourceType::buffer(),
                    attributes: AttributeList::new(),
                    location: Location::internal(),
                })
                .collect(),
            location: Location::internal(),
        }
    }

    #[test]
    fn sequential_binding_numbers_across_tables() {
        let frame = table("Frame", &["A", "B"]);
        let material = table("Material", &["C"]);
        let setup = ResourceBindingSetup::sequential(&[&frame, &material]);
        assert_eq!(setup.slot("Frame_B"), Some(1));
        assert_eq!(setup.slot("Material_C"), Some(2));
        assert_eq!(setup.slot("Material_D"), None);
        assert_eq!(setup.table_index("Material"), Some(1));
    }

    #[test]
    fn per_category_counters_are_independent() {
        let mut frame = table("Frame", &["Constants", "Albedo", "Particles"]);
        frame.entries[0].ty.kind = ResourceKind::ConstantBuffer;
        frame.entries[1].ty = ResourceType::texture(ImageViewType::View2D);
        let mut material = table("Material", &["Normal", "Out"]);
        material.entries[0].ty = ResourceType::texture(ImageViewType::View2D);
        material.entries[1].ty = ResourceType::texture(ImageViewType::View2D);
        material.entries[1].ty.uav = true;

        let setup = ResourceBindingSetup::per_category(&[&frame, &material]);
        assert_eq!(setup.slot("Frame_Constants"), Some(0));
        assert_eq!(setup.slot("Frame_Albedo"), Some(0));
        assert_eq!(setup.slot("Frame_Particles"), Some(0));
        assert_eq!(setup.slot("Material_Normal"), Some(1));
        assert_eq!(setup.slot("Material_Out"), Some(1));
    }

    #[test]
    fn registry_finds_builtins_by_name() {
        let reg = GeneratorRegistry::with_builtins();
        assert!(reg.find("null").is_some());
        assert!(reg.find("glsl").is_none());
        assert_eq!(reg.names(), vec!["null"]);
    }

    #[test]
    fn registering_a_name_twice_replaces() {
        let mut reg = GeneratorRegistry::with_builtins();
        reg.register(Box::new(NullGenerator));
        assert_eq!(reg.names().len(), 1);
        assert_eq!(reg.to_string(), "null");
    }

    #[test]
    fn dependencies_are_ordered_by_name() {
        let mut deps = StageDependencies::new();
        for (name, location) in [("uv", 1), ("color", 0)] {
            deps.insert(StageDependency {
                name: name.into(),
                ty: DataType::vec(2),
                location,
            });
        }
        let names: Vec<_> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["color", "uv"]);
        assert_eq!(deps.get("uv").map(|d| d.location), Some(1));
    }
}
