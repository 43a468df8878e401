//! Whole-library compilation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use shadec_backend_core::{GenerationOptions, OpcodeGenerator};
use shadec_fold::InstanceCache;
use shadec_ir::{CodeLibrary, ErrorReported, ErrorReporter, ExportedBundle, ProgramConstants};
use shadec_library::{PipelineIndex, ShaderLibraryBuilder};

use crate::bundle::{StageEntry, assemble_shader_bundle};
use crate::cache::LinkerCache;

/// Linker configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkerOptions {
    /// LZ4-compress shader blobs when that saves enough space.
    pub compress: bool,
    /// Directory receiving every generated stage as `<bundle>.<stage>.<generator>`.
    pub dump_dir: Option<PathBuf>,
    pub generation: GenerationOptions,
}

impl Default for LinkerOptions {
    fn default() -> Self {
        Self {
            compress: true,
            dump_dir: None,
            generation: GenerationOptions::default(),
        }
    }
}

/// A library whose exports all linked.
#[derive(Debug)]
pub struct LinkedLibrary {
    pub builder: ShaderLibraryBuilder,
    /// Bundle index of every export, by export name.
    pub bundles: BTreeMap<String, PipelineIndex>,
}

/// Instances and links every bundle in `exports`.
///
/// Every export is attempted so one run reports all failing bundles; if
/// any fails the result is `Err` and nothing should be serialized.
pub fn compile_library(
    lib: &CodeLibrary,
    exports: &[ExportedBundle],
    generator: &dyn OpcodeGenerator,
    options: &LinkerOptions,
    err: &mut dyn ErrorReporter,
) -> Result<LinkedLibrary, ErrorReported> {
    let instances = InstanceCache::global();
    let mut cache = LinkerCache::new(lib, instances);
    let mut builder = ShaderLibraryBuilder::new().with_compression(options.compress);
    let mut bundles = BTreeMap::new();
    let mut failed = false;

    for export in exports {
        let mut stages = Vec::with_capacity(export.stages.len());
        for stage in &export.stages {
            let mut constants = ProgramConstants::new();
            for (param, value) in &stage.constants {
                constants.set(*param, value.clone());
            }
            match instances.create_program_instance(lib, stage.program, &constants, &stage.location, err) {
                Ok(instance) => stages.push(StageEntry {
                    stage: stage.stage,
                    instance,
                    location: stage.location.clone(),
                }),
                Err(ErrorReported) => failed = true,
            }
        }
        if stages.len() != export.stages.len() {
            continue;
        }
        match assemble_shader_bundle(&mut cache, &mut builder, generator, &export.name, &stages, options, err) {
            Ok(index) => {
                bundles.insert(export.name.clone(), index);
            }
            Err(ErrorReported) => failed = true,
        }
    }

    if failed {
        return Err(ErrorReported);
    }
    log::info!(
        "compiled {} bundle(s) with '{}': {} blob(s), {} generated stage(s), {} reused",
        bundles.len(),
        generator.name(),
        builder.blob_count(),
        cache.len(),
        cache.hits()
    );
    Ok(LinkedLibrary { builder, bundles })
}
