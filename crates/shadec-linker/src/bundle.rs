//! Shader bundle assembly.

use std::path::Path;
use std::sync::Arc;

use shadec_backend_core::{GenerationContext, OpcodeGenerator, StageDependencies};
use shadec_ir::{
    AttributeList, ErrorReported, ErrorReporter, FoldedFunction, Handle, Location, ProgramInstance, ShaderStage,
};
use shadec_library::{INVALID_PIPELINE_INDEX, PipelineIndex, ShaderLibraryBuilder};

use crate::cache::LinkerCache;
use crate::driver::LinkerOptions;
use crate::usage::{used_resource_tables, vertex_streams};

/// One stage of a bundle: the instance whose `main` runs in `stage`.
#[derive(Clone, Debug)]
pub struct StageEntry {
    pub stage: ShaderStage,
    pub instance: Arc<ProgramInstance>,
    /// Where the stage was requested, for diagnostics.
    pub location: Location,
}

const GEOMETRY_INPUTS: &[&str] = &["points", "lines", "lines_adjacency", "triangles", "triangles_adjacency"];
const GEOMETRY_OUTPUTS: &[&str] = &["points", "line_strip", "triangle_strip"];

fn positive(
    attrs: &AttributeList,
    key: &str,
    required: bool,
    location: &Location,
    err: &mut dyn ErrorReporter,
) -> Result<(), ErrorReported> {
    match attrs.value(key) {
        None if !required => Ok(()),
        None => {
            err.report_error(location, &format!("entry point needs attribute '{key}'"));
            Err(ErrorReported)
        }
        Some(text) => match text.parse::<u32>() {
            Ok(n) if n > 0 => Ok(()),
            _ => {
                err.report_error(location, &format!("attribute '{key}' must be a positive integer, got '{text}'"));
                Err(ErrorReported)
            }
        },
    }
}

fn one_of(
    attrs: &AttributeList,
    key: &str,
    allowed: &[&str],
    location: &Location,
    err: &mut dyn ErrorReporter,
) -> Result<(), ErrorReported> {
    match attrs.value(key) {
        Some(value) if allowed.contains(&value) => Ok(()),
        Some(value) => {
            err.report_error(
                location,
                &format!("attribute '{key}' must be one of {}, got '{value}'", allowed.join(", ")),
            );
            Err(ErrorReported)
        }
        None => {
            err.report_error(location, &format!("entry point needs attribute '{key}'"));
            Err(ErrorReported)
        }
    }
}

/// Checks the attributes a stage needs on its entry point: the workgroup
/// size of compute shaders and the primitive setup of geometry shaders.
pub fn validate_stage_attributes(
    entry: &FoldedFunction,
    stage: ShaderStage,
    err: &mut dyn ErrorReporter,
) -> Result<(), ErrorReported> {
    let attrs = &entry.attributes;
    let at = &entry.location;
    match stage {
        ShaderStage::Compute => {
            let x = positive(attrs, "local_size_x", true, at, err);
            let y = positive(attrs, "local_size_y", false, at, err);
            let z = positive(attrs, "local_size_z", false, at, err);
            x.and(y).and(z)
        }
        ShaderStage::Geometry => {
            let input = one_of(attrs, "input", GEOMETRY_INPUTS, at, err);
            let output = one_of(attrs, "output", GEOMETRY_OUTPUTS, at, err);
            let max = positive(attrs, "max_vertices", true, at, err);
            input.and(output).and(max)
        }
        _ => Ok(()),
    }
}

fn dump_stage(dir: &Path, bundle: &str, stage: ShaderStage, generator: &str, code: &[u8], location: &Location, err: &mut dyn ErrorReporter) {
    let path = dir.join(format!("{bundle}.{stage}.{generator}"));
    if let Err(e) = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, code)) {
        err.report_warning(location, &format!("cannot write {}: {e}", path.display()));
    }
}

/// Links the stages of one bundle and interns it in `builder`.
///
/// Stages are generated in [`ShaderStage`] order, so each stage learns
/// which of its outputs the stage after it reads. Any error abandons the
/// whole bundle; tables interned before the failure stay in `builder` but
/// no bundle references them.
pub fn assemble_shader_bundle(
    cache: &mut LinkerCache<'_>,
    builder: &mut ShaderLibraryBuilder,
    generator: &dyn OpcodeGenerator,
    name: &str,
    stages: &[StageEntry],
    options: &LinkerOptions,
    err: &mut dyn ErrorReporter,
) -> Result<PipelineIndex, ErrorReported> {
    let lib = cache.library();
    let mut stages: Vec<&StageEntry> = stages.iter().collect();
    stages.sort_by_key(|s| s.stage);
    for pair in stages.windows(2) {
        if pair[0].stage == pair[1].stage {
            err.report_error(
                &pair[1].location,
                &format!("bundle '{name}' has two {} stages, the other at {}", pair[1].stage, pair[0].location),
            );
            return Err(ErrorReported);
        }
    }
    let Some(first) = stages.first() else {
        panic!("bundle '{name}' has no stages");
    };
    if stages.len() > 1 && stages.iter().any(|s| s.stage == ShaderStage::Compute) {
        err.report_error(&first.location, &format!("bundle '{name}' mixes a compute stage with graphics stages"));
        return Err(ErrorReported);
    }

    let mut folded: Vec<(ShaderStage, Handle<FoldedFunction>, &Location)> = Vec::with_capacity(stages.len());
    let mut failed = false;
    for entry in &stages {
        let program = &lib.program(entry.instance.program).name;
        match cache.fold_entry_point(&entry.instance, &entry.location, err) {
            Ok(function) => {
                if validate_stage_attributes(cache.folder().function(function), entry.stage, err).is_err() {
                    failed = true;
                }
                folded.push((entry.stage, function, &entry.location));
            }
            Err(ErrorReported) => {
                err.report_error(
                    &entry.location,
                    &format!("cannot link the {} stage of '{name}': 'main' of shader '{program}' failed", entry.stage),
                );
                failed = true;
            }
        }
    }
    if failed {
        return Err(ErrorReported);
    }

    let streams = match folded.iter().find(|(stage, ..)| *stage == ShaderStage::Vertex) {
        Some(&(_, vertex, _)) => vertex_streams(cache.folder(), vertex, err)?,
        None => Vec::new(),
    };
    let vertex_state = if streams.is_empty() {
        INVALID_PIPELINE_INDEX
    } else {
        let layouts: Vec<_> = streams
            .iter()
            .map(|s| {
                let structure = builder.map_data_layout(lib, s.layout);
                let custom = if s.stride == lib.composites[s.layout].size { 0 } else { s.stride };
                builder.map_vertex_input_layout(&s.bind_point, structure, custom, s.instanced)
            })
            .collect();
        builder.map_vertex_input_state(&layouts)
    };

    let entries: Vec<_> = folded.iter().map(|&(_, f, _)| f).collect();
    let tables = used_resource_tables(cache.folder(), &entries, err)?;
    let table_layouts: Vec<_> = tables.iter().map(|&t| builder.map_parameter_layout(lib, &lib.tables[t])).collect();
    let binding_state = builder.map_parameter_binding_state(&table_layouts);
    let table_refs: Vec<_> = tables.iter().map(|&t| &lib.tables[t]).collect();
    let binding = generator.build_resource_binding(&table_refs);

    let mut blobs = Vec::with_capacity(folded.len());
    let mut required: Option<StageDependencies> = None;
    for &(stage, function, location) in &folded {
        let stage_streams = if stage == ShaderStage::Vertex { streams.as_slice() } else { &[] };
        let generated = cache.generated_stage(stage, function, &binding, stage_streams, required.as_ref(), |folder| {
            let ctx = GenerationContext {
                folder,
                entry: function,
                stage,
                binding: &binding,
                required_outputs: required.as_ref(),
                vertex_streams: stage_streams,
                options: &options.generation,
            };
            generator.generate_opcodes(&ctx, &mut *err)
        })?;
        if let Some(dir) = &options.dump_dir {
            dump_stage(dir, name, stage, generator.name(), &generated.code, location, err);
        }
        let blob = builder.map_shader_data_blob(stage, &generated.code);
        if blob == INVALID_PIPELINE_INDEX {
            err.report_error(location, &format!("generator '{}' produced no code for the {stage} stage", generator.name()));
            return Err(ErrorReported);
        }
        blobs.push(blob);
        required = Some(generated.dependencies);
    }

    let bundle = builder.map_shader_bundle(vertex_state, binding_state, &blobs);
    log::info!(
        "linked bundle '{name}': {} stage(s), {} table(s), {} vertex stream(s) -> #{bundle}",
        blobs.len(),
        tables.len(),
        streams.len()
    );
    Ok(bundle)
}
