//! GLSL backend for shadec.
//!
//! Emits GLSL 4.50: descriptors use explicit `binding` layouts numbered per
//! binding category, stage varyings explicit `location`s, and every stage
//! gets a `main` entry point.

mod interface;
mod names;
mod writer;

use shadec_backend_core::{
    GeneratedShader, GenerationContext, OpcodeGenerator, ResourceBindingSetup,
};
use shadec_ir::{ErrorReported, ErrorReporter, ResourceTable};

/// The `"glsl"` opcode generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlslGenerator;

impl OpcodeGenerator for GlslGenerator {
    fn name(&self) -> &str {
        "glsl"
    }

    fn build_resource_binding(&self, tables: &[&ResourceTable]) -> ResourceBindingSetup {
        ResourceBindingSetup::per_category(tables)
    }

    fn generate_opcodes(
        &self,
        ctx: &GenerationContext<'_>,
        err: &mut dyn ErrorReporter,
    ) -> Result<GeneratedShader, ErrorReported> {
        writer::generate(ctx, err)
    }
}
