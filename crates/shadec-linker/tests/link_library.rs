use pretty_assertions::assert_eq;
use shadec_backend_core::NullGenerator;
use shadec_backend_glsl::GlslGenerator;
use shadec_fold::InstanceCache;
use shadec_ir::{CodeLibrary, CollectingReporter, Location, ProgramConstants, ShaderStage};
use shadec_library::{INVALID_PIPELINE_INDEX, ShaderLibraryData};
use shadec_linker::{LinkerCache, LinkerOptions, StageEntry, assemble_shader_bundle, compile_library};
use shadec_parser::{NoIncludes, ParseOptions, parse_library};

fn parse(src: &str) -> CodeLibrary {
    let mut err = CollectingReporter::new();
    parse_library(src, "link.csl", &NoIncludes, &mut err, &ParseOptions::default())
        .unwrap_or_else(|_| panic!("unexpected errors:\n{}", err.error_text()))
}

const FORWARD: &str = r#"
attribute(packing=vertex)
struct Vertex {
    vec3 position;
    vec2 uv;
};

descriptor Frame {
    ConstantBuffer {
        mat4 ViewProj;
        float Time;
    }
    Texture2D Albedo;
}

descriptor Unused {
    Texture2D Nothing;
}

shader Base {
    const float Intensity = 1.0;
    vec4 shade(vec2 uv) { return texture(Albedo, uv) * Intensity; }
}

shader Surface : Base {
    vertex Vertex v;
    out vec2 uv;
    void main() {
        uv = v.uv;
        gl_Position = ViewProj * vec4(v.position, 1.0);
    }
}

shader Lit : Base {
    in vec2 uv;
    void main() { gl_Target0 = shade(uv); }
}

export Forward {
    vertex Surface;
    pixel Lit(Intensity = 0.5);
}

export Again {
    pixel Lit(Intensity = 0.5);
    vertex Surface;
}

export Brighter {
    vertex Surface;
    pixel Lit(Intensity = 2.0);
}
"#;

#[test]
fn exports_link_into_deduplicated_bundles() {
    let lib = parse(FORWARD);
    let mut err = CollectingReporter::new();
    let linked = compile_library(&lib, &lib.exports, &GlslGenerator, &LinkerOptions::default(), &mut err)
        .unwrap_or_else(|_| panic!("{}", err.error_text()));

    assert_eq!(linked.bundles.len(), 3);
    assert_eq!(linked.bundles["Forward"], linked.bundles["Again"]);
    assert_ne!(linked.bundles["Forward"], linked.bundles["Brighter"]);
    // Both pixel variants plus one shared vertex stage.
    assert_eq!(linked.builder.blob_count(), 3);

    let structure = linked.builder.extract_structure_data();
    let shader = linked.builder.extract_shader_data();
    let data = ShaderLibraryData::from_buffers(&structure, &shader).unwrap();
    let bundle = data.bundles[linked.bundles["Forward"] as usize];
    assert_ne!(bundle.vertex_input_state, INVALID_PIPELINE_INDEX);

    let stages: Vec<_> = data
        .bundle_shaders(&bundle)
        .unwrap()
        .iter()
        .map(|&b| ShaderStage::from_raw(data.blobs[b as usize].stage).unwrap())
        .collect();
    assert_eq!(stages, vec![ShaderStage::Pixel, ShaderStage::Vertex]);

    let binding = data.binding_states[bundle.parameter_binding_state as usize];
    let tables = data.indirect(binding.first_parameter_layout, binding.parameter_layout_count).unwrap();
    let names: Vec<_> = tables
        .iter()
        .map(|&t| data.name(data.resource_tables[t as usize].name).unwrap())
        .collect();
    assert_eq!(names, vec!["Frame"]);

    let vertex_blob = data.bundle_shaders(&bundle).unwrap()[1];
    let vertex_text = String::from_utf8(data.unpack_shader(vertex_blob).unwrap().into_owned()).unwrap();
    assert!(vertex_text.contains("layout(location = 0) out vec2 uv;"), "{vertex_text}");
}

#[test]
fn shared_stages_are_generated_once() {
    let lib = parse(FORWARD);
    let instances = InstanceCache::new();
    let mut cache = LinkerCache::new(&lib, &instances);
    let mut builder = shadec_library::ShaderLibraryBuilder::new();
    let mut err = CollectingReporter::new();

    let entry = |name: &str, stage: ShaderStage, err: &mut CollectingReporter| {
        let program = lib.find_program(name).unwrap();
        let instance = instances
            .create_program_instance(&lib, program, &ProgramConstants::new(), &Location::internal(), err)
            .unwrap();
        StageEntry {
            stage,
            instance,
            location: Location::internal(),
        }
    };
    let stages = vec![entry("Surface", ShaderStage::Vertex, &mut err), entry("Lit", ShaderStage::Pixel, &mut err)];

    let options = LinkerOptions::default();
    let first = assemble_shader_bundle(&mut cache, &mut builder, &GlslGenerator, "A", &stages, &options, &mut err).unwrap();
    let second = assemble_shader_bundle(&mut cache, &mut builder, &GlslGenerator, "B", &stages, &options, &mut err).unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.hits(), 2);
}

#[test]
fn compute_cannot_join_graphics_stages() {
    let lib = parse(
        r#"
        shader C { attribute(local_size_x=8) void main() { barrier(); } }
        shader P { void main() { gl_Target0 = vec4(1.0); } }
        export Mixed { compute C; pixel P; }
        "#,
    );
    let mut err = CollectingReporter::new();
    assert!(compile_library(&lib, &lib.exports, &NullGenerator, &LinkerOptions::default(), &mut err).is_err());
    assert!(err.error_text().contains("bundle 'Mixed' mixes a compute stage with graphics stages"), "{}", err.error_text());
}

#[test]
fn missing_main_fails_the_bundle_only() {
    let lib = parse(
        r#"
        shader Helper { float f() { return 1.0; } }
        shader P { void main() { gl_Target0 = vec4(1.0); } }
        export Broken { pixel Helper; }
        export Fine { pixel P; }
        "#,
    );
    let mut err = CollectingReporter::new();
    assert!(compile_library(&lib, &lib.exports, &NullGenerator, &LinkerOptions::default(), &mut err).is_err());
    let text = err.error_text();
    assert!(text.contains("shader 'Helper' has no 'main' function"), "{text}");
    assert!(text.contains("cannot link the pixel stage of 'Broken'"), "{text}");
    assert!(!text.contains("'Fine'"), "{text}");
}

#[test]
fn stage_attributes_are_validated() {
    let lib = parse(
        r#"
        shader G {
            attribute(input=quads, max_vertices=0)
            void main() { EmitVertex(); }
        }
        export Geo { geometry G; }
        "#,
    );
    let mut err = CollectingReporter::new();
    assert!(compile_library(&lib, &lib.exports, &NullGenerator, &LinkerOptions::default(), &mut err).is_err());
    let text = err.error_text();
    assert!(text.contains("attribute 'input' must be one of points, lines"), "{text}");
    assert!(text.contains("entry point needs attribute 'output'"), "{text}");
    assert!(text.contains("attribute 'max_vertices' must be a positive integer, got '0'"), "{text}");
}

#[test]
fn null_generator_links_without_code() {
    let lib = parse(
        r#"
        shader C { attribute(local_size_x=64, local_size_y=2) void main() { barrier(); } }
        export Dispatch { compute C; }
        "#,
    );
    let mut err = CollectingReporter::new();
    let linked = compile_library(&lib, &lib.exports, &NullGenerator, &LinkerOptions::default(), &mut err).unwrap();
    let bundle = linked.builder.bundle(linked.bundles["Dispatch"]);
    assert_eq!(bundle.vertex_input_state, INVALID_PIPELINE_INDEX);
    assert_eq!(bundle.shader_count, 1);
    assert_eq!(linked.builder.blob(0).stage, ShaderStage::Compute as u8);
}

#[test]
fn dump_dir_receives_every_stage() {
    let lib = parse(FORWARD);
    let dir = std::env::temp_dir().join(format!("shadec-link-dump-{}", std::process::id()));
    let options = LinkerOptions {
        dump_dir: Some(dir.clone()),
        ..LinkerOptions::default()
    };
    let mut err = CollectingReporter::new();
    compile_library(&lib, &lib.exports[..1], &GlslGenerator, &options, &mut err).unwrap();
    let pixel = std::fs::read_to_string(dir.join("Forward.pixel.glsl")).unwrap();
    assert!(pixel.starts_with("#version 450\n"));
    assert!(dir.join("Forward.vertex.glsl").exists());
    std::fs::remove_dir_all(&dir).unwrap();
}
