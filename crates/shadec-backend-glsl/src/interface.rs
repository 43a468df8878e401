//! Global declarations of one stage: descriptors, vertex streams, stage
//! inputs and outputs, group-shared memory and built-ins.

use rustc_hash::{FxHashMap, FxHashSet};
use shadec_backend_core::{GenerationContext, StageDependencies, StageDependency};
use shadec_ir::{
    BaseType, CodeLibrary, CompositeType, DataParameter, DataType, ErrorReported, ErrorReporter, Handle, Location,
    ParameterScope, ResourceType, ScalarKind, ShaderStage,
};

use crate::names::{self, BuiltinSpelling};

/// How code refers to a global parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Spelling {
    /// A plain identifier.
    Name(String),
    /// A per-vertex built-in input, only readable as `gl_in[i].<member>`.
    PerVertex(&'static str),
    /// A vertex stream structure flattened into one input per member.
    VertexStruct {
        layout: Handle<CompositeType>,
        members: Vec<String>,
    },
}

/// Declarations and spellings of every global a stage uses.
#[derive(Debug, Default)]
pub(crate) struct Interface {
    pub extensions: Vec<&'static str>,
    pub declarations: String,
    pub spellings: FxHashMap<Handle<DataParameter>, Spelling>,
    pub dependencies: StageDependencies,
    /// Structure layouts referenced from the declarations.
    pub layouts: Vec<Handle<CompositeType>>,
}

fn slot_count(ty: &DataType) -> u32 {
    let per_element = match ty.base {
        BaseType::Matrix { cols, .. } => cols as u32,
        _ => 1,
    };
    per_element * ty.array.total().unwrap_or(1).max(1)
}

/// First run of `count` free locations.
fn allocate(taken: &mut FxHashSet<u32>, count: u32) -> u32 {
    let mut start = 0;
    while (start..start + count).any(|l| taken.contains(&l)) {
        start += 1;
    }
    taken.extend(start..start + count);
    start
}

fn reserve(taken: &mut FxHashSet<u32>, start: u32, count: u32) -> bool {
    let range = start..start + count;
    if range.clone().any(|l| taken.contains(&l)) {
        return false;
    }
    taken.extend(range);
    true
}

fn interpolation(stage: ShaderStage, param: &DataParameter) -> &'static str {
    let integer = matches!(
        param.ty.without_array().scalar_kind(),
        Some(ScalarKind::Int | ScalarKind::Uint | ScalarKind::Bool)
    );
    if param.attributes.has("flat") || (stage == ShaderStage::Pixel && integer) {
        "flat "
    } else {
        ""
    }
}

struct Builder<'c, 'a> {
    ctx: &'c GenerationContext<'a>,
    lib: &'a CodeLibrary,
    out: Interface,
    /// Uniform block members by constant buffer merged name.
    blocks: Vec<(String, u32, Vec<Handle<DataParameter>>)>,
    declared: FxHashSet<String>,
    failed: bool,
}

impl Interface {
    /// Plans the declarations for the globals in `params` (first-use
    /// order).
    pub fn build(
        ctx: &GenerationContext<'_>,
        params: &[Handle<DataParameter>],
        err: &mut dyn ErrorReporter,
    ) -> Result<Self, ErrorReported> {
        let mut b = Builder {
            ctx,
            lib: ctx.library(),
            out: Interface::default(),
            blocks: Vec::new(),
            declared: FxHashSet::default(),
            failed: false,
        };
        let entry_location = &ctx.entry_function().location;

        let globals: Vec<_> = params
            .iter()
            .copied()
            .filter(|&p| !matches!(b.lib.param(p).scope, ParameterScope::FunctionInput | ParameterScope::ScopeLocal))
            .collect();

        if ctx.stage == ShaderStage::Compute {
            if let Some(&p) = globals.iter().find(|&&p| {
                matches!(b.lib.param(p).scope, ParameterScope::StageInput | ParameterScope::StageOutput)
            }) {
                let param = b.lib.param(p);
                err.report_error(
                    &param.location,
                    &format!("compute shaders have no stage inputs or outputs, found '{}'", param.name),
                );
                return Err(ErrorReported);
            }
        }

        // Render target locations are fixed, user outputs fill the gaps.
        let mut output_locations = FxHashSet::default();
        let mut input_locations = FxHashSet::default();
        for &p in &globals {
            let param = b.lib.param(p);
            if param.scope == ParameterScope::GlobalBuiltin {
                if let Some(BuiltinSpelling::Target(i)) = names::builtin(&param.name, ctx.stage) {
                    output_locations.insert(i);
                }
            }
        }

        if ctx.stage == ShaderStage::Vertex {
            b.vertex_streams(&mut input_locations);
        }

        for &p in &globals {
            let param = b.lib.param(p);
            match param.scope {
                ParameterScope::GlobalBuiltin => b.builtin(p, entry_location, err),
                ParameterScope::GlobalParameter => b.descriptor(p, entry_location, err),
                ParameterScope::StageInput => b.stage_input(p, &mut input_locations),
                ParameterScope::StageOutput => b.stage_output(p, &mut output_locations, err),
                ParameterScope::VertexInput => {
                    if !b.out.spellings.contains_key(&p) {
                        let stage = ctx.stage;
                        err.report_error(
                            &param.location,
                            &format!("vertex input '{}' is not bound to a stream in the {stage} stage", param.name),
                        );
                        b.failed = true;
                    }
                }
                ParameterScope::GroupShared => {
                    if ctx.stage != ShaderStage::Compute {
                        err.report_error(
                            &param.location,
                            &format!("group-shared '{}' is only available to compute shaders", param.name),
                        );
                        b.failed = true;
                        continue;
                    }
                    b.note_layout(&param.ty);
                    let name = names::identifier(&param.name);
                    b.out.declarations.push_str(&format!("shared {};\n", names::declaration(b.lib, &param.ty, &name)));
                    b.out.spellings.insert(p, Spelling::Name(name));
                }
                ParameterScope::GlobalConst | ParameterScope::FunctionInput | ParameterScope::ScopeLocal => {}
            }
        }

        if let Some(required) = ctx.required_outputs {
            let written: FxHashSet<&str> = globals
                .iter()
                .map(|&p| b.lib.param(p))
                .filter(|p| p.scope == ParameterScope::StageOutput)
                .map(|p| p.name.as_str())
                .collect();
            for dependency in required.iter().filter(|d| !written.contains(d.name.as_str())) {
                err.report_error(
                    entry_location,
                    &format!(
                        "the next stage reads '{}', which the {} stage never writes",
                        dependency.name, ctx.stage
                    ),
                );
                b.failed = true;
            }
        }

        b.uniform_blocks();
        if b.failed {
            return Err(ErrorReported);
        }
        Ok(b.out)
    }
}

impl Builder<'_, '_> {
    fn note_layout(&mut self, ty: &DataType) {
        if let Some(layout) = ty.composite() {
            if !self.out.layouts.contains(&layout) {
                self.out.layouts.push(layout);
            }
        }
    }

    fn vertex_streams(&mut self, taken: &mut FxHashSet<u32>) {
        let lib = self.lib;
        for stream in self.ctx.vertex_streams {
            let composite = &lib.composites[stream.layout];
            let mut members = Vec::with_capacity(composite.members.len());
            for member in &composite.members {
                let name = format!("_{}_{}", stream.bind_point, member.name);
                let location = allocate(taken, slot_count(&member.ty));
                self.out.declarations.push_str(&format!(
                    "layout(location = {location}) in {};\n",
                    names::declaration(lib, &member.ty, &name)
                ));
                members.push(name);
            }
            self.out.spellings.insert(
                stream.param,
                Spelling::VertexStruct {
                    layout: stream.layout,
                    members,
                },
            );
            self.note_layout(&DataType::new(BaseType::Struct(stream.layout)));
        }
    }

    fn builtin(&mut self, p: Handle<DataParameter>, entry_location: &Location, err: &mut dyn ErrorReporter) {
        let param = self.lib.param(p);
        let stage = self.ctx.stage;
        let spelling = match names::builtin(&param.name, stage) {
            None => {
                err.report_error(
                    entry_location,
                    &format!("built-in '{}' is not available in the {stage} stage", param.name),
                );
                self.failed = true;
                return;
            }
            Some(BuiltinSpelling::PerVertex(member)) => Spelling::PerVertex(member),
            Some(BuiltinSpelling::Target(i)) => {
                let name = format!("_Target{i}");
                self.out
                    .declarations
                    .push_str(&format!("layout(location = {i}) out vec4 {name};\n"));
                Spelling::Name(name)
            }
            Some(BuiltinSpelling::Name(name)) if names::needs_draw_parameters(name) => {
                if self.ctx.options.glsl_version >= 460 {
                    Spelling::Name(name.to_string())
                } else {
                    if !self.out.extensions.contains(&"GL_ARB_shader_draw_parameters") {
                        self.out.extensions.push("GL_ARB_shader_draw_parameters");
                    }
                    Spelling::Name(format!("{name}ARB"))
                }
            }
            Some(BuiltinSpelling::Name(name)) => Spelling::Name(name.to_string()),
        };
        self.out.spellings.insert(p, spelling);
    }

    fn descriptor(&mut self, p: Handle<DataParameter>, entry_location: &Location, err: &mut dyn ErrorReporter) {
        let lib = self.lib;
        let param = lib.param(p);
        let Some(element) = param.descriptor else {
            panic!("descriptor parameter '{}' without a table entry", param.name);
        };
        let entry = &lib.tables[element.table].entries[element.entry as usize];
        let Some(slot) = self.ctx.binding.slot(&entry.merged_name) else {
            err.report_error(
                entry_location,
                &format!("resource '{}' is missing from the bundle's binding layout", entry.merged_name),
            );
            self.failed = true;
            return;
        };

        if element.member.is_some() {
            self.note_layout(&param.ty);
            match self.blocks.iter_mut().find(|(name, _, _)| *name == entry.merged_name) {
                Some((_, _, members)) => members.push(p),
                None => self.blocks.push((entry.merged_name.clone(), slot, vec![p])),
            }
            self.out.spellings.insert(p, Spelling::Name(names::identifier(&param.name)));
            return;
        }

        let name = names::identifier(&entry.merged_name);
        if self.declared.insert(name.clone()) {
            let declaration = resource_declaration(lib, &entry.ty, &name, slot);
            if let Some(layout) = entry.ty.layout.filter(|_| entry.ty.is_structured_buffer()) {
                self.note_layout(&DataType::new(BaseType::Struct(layout)));
            }
            self.out.declarations.push_str(&declaration);
        }
        self.out.spellings.insert(p, Spelling::Name(name));
    }

    fn stage_input(&mut self, p: Handle<DataParameter>, taken: &mut FxHashSet<u32>) {
        let param = self.lib.param(p);
        let stage = self.ctx.stage;
        let location = allocate(taken, slot_count(&param.ty));
        let name = names::identifier(&param.name);
        self.out.declarations.push_str(&format!(
            "layout(location = {location}) {}in {};\n",
            interpolation(stage, param),
            names::declaration(self.lib, &param.ty, &name)
        ));
        let per_vertex = matches!(stage, ShaderStage::Geometry | ShaderStage::Hull | ShaderStage::Domain);
        let ty = if per_vertex && param.ty.is_array() { param.ty.element() } else { param.ty };
        self.out.dependencies.insert(StageDependency {
            name: param.name.clone(),
            ty,
            location,
        });
        self.out.spellings.insert(p, Spelling::Name(name));
    }

    fn stage_output(&mut self, p: Handle<DataParameter>, taken: &mut FxHashSet<u32>, err: &mut dyn ErrorReporter) {
        let lib = self.lib;
        let param = lib.param(p);
        let name = names::identifier(&param.name);
        let declaration = names::declaration(lib, &param.ty, &name);
        let flat = interpolation(self.ctx.stage, param);
        self.out.spellings.insert(p, Spelling::Name(name));

        let Some(required) = self.ctx.required_outputs else {
            let location = allocate(taken, slot_count(&param.ty));
            self.out
                .declarations
                .push_str(&format!("layout(location = {location}) {flat}out {declaration};\n"));
            return;
        };
        let Some(dependency) = required.get(&param.name) else {
            // nothing downstream reads it
            self.out.declarations.push_str(&format!("{declaration};\n"));
            return;
        };
        if dependency.ty != param.ty {
            err.report_error(
                &param.location,
                &format!(
                    "'{}' is written as {} but the next stage reads it as {}",
                    param.name,
                    lib.type_name(&param.ty),
                    lib.type_name(&dependency.ty)
                ),
            );
            self.failed = true;
            return;
        }
        if !reserve(taken, dependency.location, slot_count(&param.ty)) {
            err.report_error(
                &param.location,
                &format!("location {} of '{}' is already in use", dependency.location, param.name),
            );
            self.failed = true;
            return;
        }
        self.out.declarations.push_str(&format!(
            "layout(location = {}) {flat}out {declaration};\n",
            dependency.location
        ));
    }

    /// One `std140` block per constant buffer, declaring only the members
    /// the stage reads, at their offsets.
    fn uniform_blocks(&mut self) {
        let lib = self.lib;
        for (block, slot, members) in std::mem::take(&mut self.blocks) {
            let mut fields: Vec<(u32, String)> = members
                .iter()
                .map(|&p| {
                    let param = lib.param(p);
                    let offset = param
                        .descriptor
                        .and_then(|d| {
                            let entry = &lib.tables[d.table].entries[d.entry as usize];
                            let layout = &lib.composites[entry.ty.layout?];
                            Some(layout.members.get(d.member? as usize)?.layout.offset)
                        })
                        .unwrap_or(0);
                    let name = names::identifier(&param.name);
                    (offset, names::declaration(lib, &param.ty, &name))
                })
                .collect();
            fields.sort();
            fields.dedup();
            let mut text = format!("layout(std140, binding = {slot}) uniform {} {{\n", names::identifier(&block));
            for (offset, field) in fields {
                text.push_str(&format!("    layout(offset = {offset}) {field};\n"));
            }
            text.push_str("};\n");
            self.out.declarations.push_str(&text);
        }
    }
}

fn resource_declaration(lib: &CodeLibrary, r: &ResourceType, name: &str, slot: u32) -> String {
    if r.is_structured_buffer() {
        let element = r.element_type();
        return format!(
            "layout(std430, binding = {slot}) {}buffer {name}_Block {{\n    {} data[];\n}} {name};\n",
            names::access_qualifier(r),
            names::base_type(lib, &element)
        );
    }
    if r.is_image() {
        return format!(
            "layout(binding = {slot}, {}) uniform {}{} {name};\n",
            names::image_format(r),
            names::access_qualifier(r),
            names::opaque_type(r)
        );
    }
    format!("layout(binding = {slot}) uniform {} {name};\n", names::opaque_type(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_skips_taken_locations() {
        let mut taken = FxHashSet::from_iter([0, 2]);
        assert_eq!(allocate(&mut taken, 1), 1);
        assert_eq!(allocate(&mut taken, 2), 3);
        assert!(!reserve(&mut taken, 4, 1));
        assert!(reserve(&mut taken, 5, 1));
    }

    #[test]
    fn matrices_and_arrays_take_several_slots() {
        let mat = DataType::new(BaseType::Matrix { cols: 4, rows: 4 });
        assert_eq!(slot_count(&mat), 4);
        let array = DataType::vec(2).with_array(shadec_ir::ArrayCounts::default().append(3).unwrap());
        assert_eq!(slot_count(&array), 3);
    }
}
