//! GLSL generation from parsed and folded libraries.

use pretty_assertions::assert_eq;
use shadec_backend_core::{
    GeneratedShader, GenerationContext, GenerationOptions, OpcodeGenerator, StageDependencies, VertexStream,
};
use shadec_backend_glsl::GlslGenerator;
use shadec_fold::{FunctionFolder, InstanceCache};
use shadec_ir::{
    CodeLibrary, CollectingReporter, DataType, DataValue, Location, ParameterScope, ProgramConstants, ShaderStage,
};
use shadec_parser::{NoIncludes, ParseOptions, parse_library};

fn parse(src: &str) -> CodeLibrary {
    let mut err = CollectingReporter::new();
    parse_library(src, "test.csl", &NoIncludes, &mut err, &ParseOptions::default())
        .unwrap_or_else(|_| panic!("unexpected errors:\n{}", err.error_text()))
}

fn vertex_streams(lib: &CodeLibrary, program: &str) -> Vec<VertexStream> {
    let program = lib.find_program(program).unwrap();
    lib.program(program)
        .parameters
        .iter()
        .copied()
        .filter(|&p| lib.param(p).scope == ParameterScope::VertexInput)
        .map(|p| {
            let layout = lib.param(p).ty.composite().unwrap();
            VertexStream {
                param: p,
                bind_point: lib.composites[layout].name.clone(),
                layout,
                stride: lib.composites[layout].size,
                instanced: false,
                location: lib.param(p).location.clone(),
            }
        })
        .collect()
}

/// Instances, folds and generates one stage; `Err` holds the reported
/// diagnostics.
fn generate(
    lib: &CodeLibrary,
    program: &str,
    stage: ShaderStage,
    constants: &[(&str, DataValue)],
    required: Option<&StageDependencies>,
) -> Result<GeneratedShader, String> {
    let handle = lib.find_program(program).unwrap();
    let mut values = ProgramConstants::new();
    for (name, value) in constants {
        values.set(lib.find_parameter(handle, name, true).unwrap(), value.clone());
    }
    let cache = InstanceCache::new();
    let mut err = CollectingReporter::new();
    let instance = cache
        .create_program_instance(lib, handle, &values, &Location::internal(), &mut err)
        .map_err(|_| err.error_text())?;
    let mut folder = FunctionFolder::new(lib, &cache);
    let entry = folder
        .fold_entry_point(&instance, &Location::internal(), &mut err)
        .map_err(|_| err.error_text())?;

    let tables: Vec<_> = lib.tables.iter().map(|(_, t)| t).collect();
    let generator = GlslGenerator;
    let binding = generator.build_resource_binding(&tables);
    let streams = if stage == ShaderStage::Vertex { vertex_streams(lib, program) } else { Vec::new() };
    let options = GenerationOptions::default();
    let ctx = GenerationContext {
        folder: &folder,
        entry,
        stage,
        binding: &binding,
        required_outputs: required,
        vertex_streams: &streams,
        options: &options,
    };
    generator.generate_opcodes(&ctx, &mut err).map_err(|_| err.error_text())
}

fn text(shader: &GeneratedShader) -> String {
    String::from_utf8(shader.code.clone()).unwrap()
}

fn naga_parses(source: &str, stage: naga::ShaderStage) {
    let mut frontend = naga::front::glsl::Frontend::default();
    if let Err(errors) = frontend.parse(&naga::front::glsl::Options::from(stage), source) {
        panic!("naga rejected the shader:\n{errors:?}\n{source}");
    }
}

const FLAT: &str = r#"
shader Flat {
    void main() { gl_Target0 = vec4(1.0, 0.5, 0.25, 1.0); }
}
"#;

#[test]
fn literal_pixel_shader() {
    let lib = parse(FLAT);
    let shader = generate(&lib, "Flat", ShaderStage::Pixel, &[], None).unwrap();
    let glsl = text(&shader);
    assert_eq!(
        glsl,
        "#version 450\n\
         \n\
         layout(location = 0) out vec4 _Target0;\n\
         \n\
         void main() {\n    _Target0 = vec4(1.0, 0.5, 0.25, 1.0);\n}\n"
    );
    assert!(shader.dependencies.is_empty());
    naga_parses(&glsl, naga::ShaderStage::Fragment);
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

shader Base {
    const float Intensity = 1.0;
    vec4 shade(vec2 uv) { return texture(Albedo, uv) * Intensity; }
}

shader Surface : Base {
    vertex Vertex v;
    out vec2 uv;
    out float unused;
    void main() {
        uv = v.uv;
        unused = 1.0;
        gl_Position = ViewProj * vec4(v.position, 1.0);
    }
}

shader Lit : Base {
    in vec2 uv;
    void main() { gl_Target0 = shade(uv); }
}

shader Blank {
    out vec2 other;
    void main() { other = vec2(0.0); gl_Position = vec4(0.0); }
}
"#;

#[test]
fn pixel_inputs_drive_vertex_outputs() {
    let lib = parse(FORWARD);
    let pixel = generate(&lib, "Lit", ShaderStage::Pixel, &[("Intensity", DataValue::float(0.5))], None).unwrap();
    let ps = text(&pixel);
    assert!(ps.contains("layout(binding = 0) uniform sampler2D Frame_Albedo;\n"), "{ps}");
    assert!(ps.contains("layout(location = 0) in vec2 uv;\n"), "{ps}");
    assert!(ps.contains("(texture(Frame_Albedo, uv) * 0.5)"), "{ps}");
    assert!(!ps.contains("Frame_Constants"), "{ps}");
    let shade = ps.find("vec4 shade_").unwrap();
    assert!(shade < ps.find("void main()").unwrap(), "callee must precede its caller:\n{ps}");

    let dependency = pixel.dependencies.get("uv").unwrap();
    assert_eq!(dependency.location, 0);
    assert_eq!(dependency.ty, DataType::vec(2));

    let vertex = generate(&lib, "Surface", ShaderStage::Vertex, &[], Some(&pixel.dependencies)).unwrap();
    let vs = text(&vertex);
    assert!(vs.contains("layout(location = 0) in vec3 _Vertex_position;\n"), "{vs}");
    assert!(vs.contains("layout(location = 1) in vec2 _Vertex_uv;\n"), "{vs}");
    assert!(vs.contains("layout(location = 0) out vec2 uv;\n"), "{vs}");
    assert!(vs.contains("\nfloat unused;\n"), "outputs nobody reads stay private:\n{vs}");
    assert!(
        vs.contains("layout(std140, binding = 0) uniform Frame_Constants {\n    layout(offset = 0) mat4 Frame_ViewProj;\n};\n"),
        "{vs}"
    );
    assert!(!vs.contains("Frame_Time"), "{vs}");
    assert!(!vs.contains("Frame_Albedo"), "{vs}");
    assert!(vs.contains("uv = _Vertex_uv;"), "{vs}");
    assert!(vs.contains("gl_Position = (Frame_ViewProj * vec4(_Vertex_position, 1.0));"), "{vs}");
    assert!(vertex.dependencies.is_empty());
}

#[test]
fn unwritten_required_output_is_an_error() {
    let lib = parse(FORWARD);
    let pixel = generate(&lib, "Lit", ShaderStage::Pixel, &[], None).unwrap();
    let err = generate(&lib, "Blank", ShaderStage::Vertex, &[], Some(&pixel.dependencies)).unwrap_err();
    assert!(err.contains("reads 'uv', which the vertex stage never writes"), "{err}");
}

#[test]
fn stage_specific_builtins_are_checked() {
    let lib = parse("shader P { out vec4 c; void main() { c = gl_FragCoord; gl_Position = vec4(1.0); } }");
    let err = generate(&lib, "P", ShaderStage::Vertex, &[], None).unwrap_err();
    assert!(err.contains("'gl_FragCoord' is not available in the vertex stage"), "{err}");
}

#[test]
fn mutual_recursion_gets_a_prototype() {
    let lib = parse(
        r#"
        shader R {
            in float x;
            out float o;
            float even(float n);
            float odd(float n) { if (n <= 0.0) { return 0.0; } return even(n - 1.0); }
            float even(float n) { if (n <= 0.0) { return 1.0; } return odd(n - 1.0); }
            void main() { o = odd(x); }
        }
        "#,
    );
    let glsl = text(&generate(&lib, "R", ShaderStage::Pixel, &[], None).unwrap());
    let prototype_end = glsl.find("(float n);\n").expect("prototype");
    let prototype_start = glsl[..prototype_end].rfind('\n').unwrap() + 1;
    let prototype = &glsl[prototype_start..prototype_end];
    assert!(prototype.starts_with("float odd_"), "{glsl}");
    let definition = glsl.find(&format!("{prototype}(float n) {{")).unwrap();
    let even = glsl.find("float even_").unwrap();
    assert!(prototype_end < even && even < definition, "{glsl}");
    assert_eq!(glsl.matches("(float n);\n").count(), 1, "{glsl}");
}

#[test]
fn long_call_chains_are_emitted_callee_first() {
    const LINKS: usize = 200;
    let mut functions = String::from("float link0(float v) { return v; }\n");
    for i in 1..LINKS {
        functions.push_str(&format!("float link{i}(float v) {{ return link{}(v) + 1.0; }}\n", i - 1));
    }
    let source = format!(
        "shader Chain {{ in float x; out float o; {functions} void main() {{ o = link{}(x); }} }}",
        LINKS - 1
    );
    let lib = parse(&source);
    let glsl = text(&generate(&lib, "Chain", ShaderStage::Pixel, &[], None).unwrap());
    assert_eq!(glsl.matches("(float v);\n").count(), 0, "{glsl}");
    let mut previous = 0;
    for i in 0..LINKS {
        let at = glsl.find(&format!("float link{i}_")).unwrap_or_else(|| panic!("link{i} missing"));
        assert!(previous <= at, "link{i} precedes its callee");
        previous = at;
    }
    assert!(previous < glsl.find("void main()").unwrap());
}

#[test]
fn compute_lowers_buffers_images_and_atomics() {
    let lib = parse(
        r#"
        struct Particle { vec4 position; float life; };
        descriptor Sim {
            attribute(format=r32f) RWBuffer Values;
            RWBuffer<Particle> Particles;
        }
        shader Step {
            shared uint Count;
            attribute(local_size_x=64) void main() {
                uint i = gl_GlobalInvocationID.x;
                Particles[i].life = Particles[i].life - 1.0;
                Values[i] = 2.0;
                atomicAdd(Count, 1u);
                barrier();
            }
        }
        "#,
    );
    let glsl = text(&generate(&lib, "Step", ShaderStage::Compute, &[], None).unwrap());
    assert!(glsl.contains("layout(local_size_x = 64, local_size_y = 1, local_size_z = 1) in;\n"), "{glsl}");
    assert!(glsl.contains("struct Particle {\n    vec4 position;\n    float life;\n};\n"), "{glsl}");
    assert!(glsl.contains("shared uint Count;\n"), "{glsl}");
    assert!(glsl.contains("uniform imageBuffer Sim_Values;\n"), "{glsl}");
    assert!(glsl.contains("layout(binding = 0, r32f)"), "{glsl}");
    assert!(glsl.contains("layout(std430, binding = 1) buffer Sim_Particles_Block {\n    Particle data[];\n} Sim_Particles;\n"), "{glsl}");
    assert!(glsl.contains("Sim_Particles.data[i].life = (Sim_Particles.data[i].life - 1.0);"), "{glsl}");
    assert!(glsl.contains("imageStore(Sim_Values, int(i), vec4(2.0, 0.0, 0.0, 1.0));"), "{glsl}");
    assert!(glsl.contains("atomicAdd(Count, 1u);"), "{glsl}");
    assert!(glsl.contains("barrier();"), "{glsl}");
}

#[test]
fn compute_entry_needs_a_workgroup_size() {
    let lib = parse("shader C { void main() { barrier(); } }");
    let err = generate(&lib, "C", ShaderStage::Compute, &[], None).unwrap_err();
    assert!(err.contains("needs attribute 'local_size_x'"), "{err}");
}
