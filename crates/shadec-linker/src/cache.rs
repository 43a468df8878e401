//! Session cache of folded entry points and generated stages.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use shadec_backend_core::{GeneratedShader, ResourceBindingSetup, StageDependencies, VertexStream};
use shadec_fold::{FunctionFolder, InstanceCache};
use shadec_ir::{CodeLibrary, ErrorReported, ErrorReporter, FoldedFunction, Handle, Location, ProgramInstance, ShaderStage};

/// Everything a generated stage depends on.
///
/// Compared in full: two stages share a blob only when every component is
/// equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct StageKey {
    stage: ShaderStage,
    function: Handle<FoldedFunction>,
    binding: ResourceBindingSetup,
    vertex_setup: Vec<VertexStream>,
    required_outputs: Option<StageDependencies>,
}

/// Folding session plus the stages generated from it.
///
/// One cache serves every bundle of a library, so entry points and helper
/// functions shared between bundles are folded and generated once.
pub struct LinkerCache<'a> {
    folder: FunctionFolder<'a>,
    entries: FxHashMap<(u64, Location), Handle<FoldedFunction>>,
    stages: FxHashMap<StageKey, GeneratedShader>,
    hits: usize,
}

impl<'a> LinkerCache<'a> {
    pub fn new(lib: &'a CodeLibrary, instances: &'a InstanceCache) -> Self {
        Self {
            folder: FunctionFolder::new(lib, instances),
            entries: FxHashMap::default(),
            stages: FxHashMap::default(),
            hits: 0,
        }
    }

    pub fn library(&self) -> &'a CodeLibrary {
        self.folder.library()
    }

    pub fn folder(&self) -> &FunctionFolder<'a> {
        &self.folder
    }

    /// Folds the `main` function of `instance`, once per instance.
    pub fn fold_entry_point(
        &mut self,
        instance: &Arc<ProgramInstance>,
        use_site: &Location,
        err: &mut dyn ErrorReporter,
    ) -> Result<Handle<FoldedFunction>, ErrorReported> {
        // Errors name the use site, so a failed fold is retried per site.
        let slot = (instance.key, use_site.clone());
        if let Some(&entry) = self.entries.get(&slot) {
            return Ok(entry);
        }
        let entry = self.folder.fold_entry_point(instance, use_site, err)?;
        self.entries.insert(slot, entry);
        Ok(entry)
    }

    /// Returns the stage generated for these inputs, running `generate` on
    /// the first request.
    ///
    /// A hit returns the dependency set stored with the blob, so the next
    /// stage sees the same context it would after a miss.
    pub fn generated_stage(
        &mut self,
        stage: ShaderStage,
        function: Handle<FoldedFunction>,
        binding: &ResourceBindingSetup,
        vertex_setup: &[VertexStream],
        required_outputs: Option<&StageDependencies>,
        generate: impl FnOnce(&FunctionFolder<'a>) -> Result<GeneratedShader, ErrorReported>,
    ) -> Result<GeneratedShader, ErrorReported> {
        let key = StageKey {
            stage,
            function,
            binding: binding.clone(),
            vertex_setup: vertex_setup.to_vec(),
            required_outputs: required_outputs.cloned(),
        };
        if let Some(hit) = self.stages.get(&key) {
            self.hits += 1;
            log::debug!("linker cache hit: {stage} stage of '{}'", self.folder.function(function).name);
            return Ok(hit.clone());
        }
        log::debug!("linker cache miss: {stage} stage of '{}'", self.folder.function(function).name);
        let generated = generate(&self.folder)?;
        self.stages.insert(key, generated.clone());
        Ok(generated)
    }

    /// Number of generated stages held.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage requests answered without running a generator.
    pub fn hits(&self) -> usize {
        self.hits
    }
}
