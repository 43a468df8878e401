use shadec_backend_core::OpcodeGenerator;
use shadec_ir::{CodeLibrary, CollectingReporter, ShaderStage};
use shadec_library::{PipelineIndex, ShaderLibraryData};
use shadec_linker::{LinkedLibrary, LinkerOptions, compile_library};
use shadec_parser::{IncludeHandler, NoIncludes, ParseOptions, parse_library};

/// Parse a library, panicking with the diagnostics on failure.
#[allow(dead_code)]
pub fn parse(source: &str) -> CodeLibrary {
    parse_with(source, &NoIncludes, &ParseOptions::default())
}

#[allow(dead_code)]
pub fn parse_with(source: &str, includes: &dyn IncludeHandler, options: &ParseOptions) -> CodeLibrary {
    let mut err = CollectingReporter::new();
    parse_library(source, "main.csl", includes, &mut err, options)
        .unwrap_or_else(|_| panic!("parse failed:\n{}", err.error_text()))
}

/// Parse errors of a library that must not parse.
#[allow(dead_code)]
pub fn parse_errors(source: &str) -> String {
    let mut err = CollectingReporter::new();
    assert!(
        parse_library(source, "main.csl", &NoIncludes, &mut err, &ParseOptions::default()).is_err(),
        "expected a parse error"
    );
    err.error_text()
}

/// Link every export of `lib`.
#[allow(dead_code)]
pub fn compile(lib: &CodeLibrary, generator: &dyn OpcodeGenerator) -> LinkedLibrary {
    let mut err = CollectingReporter::new();
    compile_library(lib, &lib.exports, generator, &LinkerOptions::default(), &mut err)
        .unwrap_or_else(|_| panic!("compilation failed:\n{}", err.error_text()))
}

/// Diagnostics of a library whose exports must fail to link.
#[allow(dead_code)]
pub fn compile_errors(lib: &CodeLibrary, generator: &dyn OpcodeGenerator) -> String {
    let mut err = CollectingReporter::new();
    assert!(
        compile_library(lib, &lib.exports, generator, &LinkerOptions::default(), &mut err).is_err(),
        "expected a link error"
    );
    err.error_text()
}

/// Serialize and read back a linked library.
#[allow(dead_code)]
pub fn round_trip(linked: &LinkedLibrary) -> ShaderLibraryData {
    let structure = linked.builder.extract_structure_data();
    let shader = linked.builder.extract_shader_data();
    ShaderLibraryData::from_buffers(&structure, &shader).expect("library does not read back")
}

/// Stage and text of every shader of a bundle, in generation order.
#[allow(dead_code)]
pub fn bundle_code(data: &ShaderLibraryData, bundle: PipelineIndex) -> Vec<(ShaderStage, String)> {
    let bundle = data.bundles[bundle as usize];
    data.bundle_shaders(&bundle)
        .expect("bundle shaders")
        .iter()
        .map(|&blob| {
            let stage = ShaderStage::from_raw(data.blobs[blob as usize].stage).expect("stage");
            let code = data.unpack_shader(blob).expect("unpack");
            (stage, String::from_utf8(code.into_owned()).expect("utf-8"))
        })
        .collect()
}

/// Check a generated GLSL stage with naga's GLSL front end.
#[allow(dead_code)]
pub fn naga_accepts(source: &str, stage: naga::ShaderStage) {
    let mut frontend = naga::front::glsl::Frontend::default();
    if let Err(errors) = frontend.parse(&naga::front::glsl::Options::from(stage), source) {
        panic!("naga rejected the shader: {errors:?}\n{source}");
    }
}
