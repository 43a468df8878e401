mod common;

use pretty_assertions::assert_eq;
use shadec_backend_core::NullGenerator;
use shadec_backend_glsl::GlslGenerator;
use shadec_ir::ShaderStage;
use shadec_library::INVALID_PIPELINE_INDEX;
use shadec_parser::{MemoryIncludes, ParseOptions};

#[test]
fn literal_color_pixel_shader() {
    let lib = common::parse(
        r#"
        shader Solid {
            void main() { gl_Target0 = vec4(1.0, 0.0, 0.0, 1.0); }
        }
        export Red { pixel Solid; }
        "#,
    );
    let linked = common::compile(&lib, &GlslGenerator);
    let data = common::round_trip(&linked);

    let bundle = data.bundles[linked.bundles["Red"] as usize];
    assert_eq!(bundle.shader_count, 1);
    assert_eq!(bundle.vertex_input_state, INVALID_PIPELINE_INDEX);
    let binding = data.binding_states[bundle.parameter_binding_state as usize];
    assert_eq!(binding.parameter_layout_count, 0);

    let code = common::bundle_code(&data, linked.bundles["Red"]);
    assert_eq!(code.len(), 1);
    assert_eq!(code[0].0, ShaderStage::Pixel);
    assert!(code[0].1.contains("_Target0 = vec4(1.0, 0.0, 0.0, 1.0);"), "{}", code[0].1);
    common::naga_accepts(&code[0].1, naga::ShaderStage::Fragment);
}

#[test]
fn uniform_read_by_pixel_stage_only() {
    let lib = common::parse(
        r#"
        attribute(packing=vertex) struct Point { vec3 position; };
        descriptor Scene {
            ConstantBuffer {
                mat4 Transform;
                float Exposure;
            }
        }
        shader Project {
            vertex Point p;
            void main() { gl_Position = Transform * vec4(p.position, 1.0); }
        }
        shader Expose {
            void main() { gl_Target0 = vec4(Exposure); }
        }
        export Draw { vertex Project; pixel Expose; }
        "#,
    );
    let linked = common::compile(&lib, &GlslGenerator);
    let data = common::round_trip(&linked);

    let bundle = data.bundles[linked.bundles["Draw"] as usize];
    let binding = data.binding_states[bundle.parameter_binding_state as usize];
    let tables = data.indirect(binding.first_parameter_layout, binding.parameter_layout_count).unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(data.name(data.resource_tables[tables[0] as usize].name), Some("Scene"));

    let code = common::bundle_code(&data, linked.bundles["Draw"]);
    let (pixel, vertex) = (&code[0], &code[1]);
    assert_eq!((pixel.0, vertex.0), (ShaderStage::Pixel, ShaderStage::Vertex));
    assert!(pixel.1.contains("Scene_Exposure"), "{}", pixel.1);
    assert!(!vertex.1.contains("Scene_Exposure"), "{}", vertex.1);
    assert!(vertex.1.contains("Scene_Transform"), "{}", vertex.1);
}

#[test]
fn constants_specialize_the_generated_code() {
    let lib = common::parse(
        r#"
        shader Tint {
            const float Strength = 1.0;
            vec4 tint() { return vec4(Strength, Strength * 2.0, 0.0, 1.0); }
            void main() { gl_Target0 = tint(); }
        }
        export Faint { pixel Tint(Strength = 0.25); }
        export Strong { pixel Tint(Strength = 0.75); }
        "#,
    );
    let linked = common::compile(&lib, &GlslGenerator);
    assert_eq!(linked.builder.blob_count(), 2);
    let data = common::round_trip(&linked);

    let faint = &common::bundle_code(&data, linked.bundles["Faint"])[0].1;
    let strong = &common::bundle_code(&data, linked.bundles["Strong"])[0].1;
    assert!(faint.contains("vec4(0.25, 0.5, 0.0, 1.0)"), "{faint}");
    assert!(strong.contains("vec4(0.75, 1.5, 0.0, 1.0)"), "{strong}");
    assert!(!faint.contains("Strength"), "{faint}");
}

#[test]
fn compiling_twice_is_byte_identical() {
    let source = r#"
        shader Wave {
            in float phase;
            float wave(float x) { return sin(x) * 0.5 + 0.5; }
            void main() { gl_Target0 = vec4(wave(phase), wave(phase + 1.0), 0.0, 1.0); }
        }
        export W { pixel Wave; }
    "#;
    let first = common::compile(&common::parse(source), &GlslGenerator);
    let second = common::compile(&common::parse(source), &GlslGenerator);
    assert_eq!(first.builder.extract_structure_data(), second.builder.extract_structure_data());
    assert_eq!(first.builder.extract_shader_data(), second.builder.extract_shader_data());
}

#[test]
fn vertex_streams_feed_pixel_inputs() {
    let lib = common::parse(
        r#"
        attribute(packing=vertex) struct Vertex { vec3 position; vec3 color; };
        shader Pass {
            vertex Vertex v;
            out vec3 color;
            void main() {
                color = v.color;
                gl_Position = vec4(v.position, 1.0);
            }
        }
        shader Paint {
            in vec3 color;
            void main() { gl_Target0 = vec4(color, 1.0); }
        }
        export Colored { vertex Pass; pixel Paint; }
        "#,
    );
    let linked = common::compile(&lib, &GlslGenerator);
    let data = common::round_trip(&linked);
    let bundle = data.bundles[linked.bundles["Colored"] as usize];

    let state = data.vertex_states[bundle.vertex_input_state as usize];
    let streams = data.indirect(state.first_stream_layout, state.stream_layout_count).unwrap();
    assert_eq!(streams.len(), 1);
    let stream = data.vertex_layouts[streams[0] as usize];
    assert_eq!(data.name(stream.name), Some("Vertex"));
    assert_eq!(data.data_structures[stream.structure as usize].size, 24);

    let code = common::bundle_code(&data, linked.bundles["Colored"]);
    let vertex = &code[1].1;
    assert!(vertex.contains("layout(location = 0) out vec3 color;"), "{vertex}");
    assert!(vertex.contains("color = _Vertex_color;"), "{vertex}");
    common::naga_accepts(&code[0].1, naga::ShaderStage::Fragment);
    common::naga_accepts(vertex, naga::ShaderStage::Vertex);
}

#[test]
fn geometry_stage_reads_per_vertex_positions() {
    let lib = common::parse(
        r#"
        shader Points {
            void main() { gl_Position = vec4(0.0, 0.0, 0.0, 1.0); }
        }
        shader Expand {
            attribute(input=points, output=triangle_strip, max_vertices=3)
            void main() {
                gl_Position = gl_PositionIn[0] + vec4(-0.1, 0.0, 0.0, 0.0);
                EmitVertex();
                gl_Position = gl_PositionIn[0] + vec4(0.1, 0.0, 0.0, 0.0);
                EmitVertex();
                gl_Position = gl_PositionIn[0] + vec4(0.0, 0.1, 0.0, 0.0);
                EmitVertex();
                EndPrimitive();
            }
        }
        shader White {
            void main() { gl_Target0 = vec4(1.0); }
        }
        export Sprites { vertex Points; geometry Expand; pixel White; }
        "#,
    );
    let linked = common::compile(&lib, &GlslGenerator);
    let data = common::round_trip(&linked);
    let code = common::bundle_code(&data, linked.bundles["Sprites"]);
    let stages: Vec<_> = code.iter().map(|(stage, _)| *stage).collect();
    assert_eq!(stages, vec![ShaderStage::Pixel, ShaderStage::Geometry, ShaderStage::Vertex]);

    let geometry = &code[1].1;
    assert!(geometry.contains("layout(points) in;\nlayout(triangle_strip, max_vertices = 3) out;\n"), "{geometry}");
    assert!(geometry.contains("gl_Position = (gl_in[0].gl_Position + vec4(-0.1, 0.0, 0.0, 0.0));"), "{geometry}");
    assert_eq!(geometry.matches("EmitVertex();").count(), 3);
    assert!(geometry.contains("EndPrimitive();"), "{geometry}");
}

#[test]
fn includes_and_defines_reach_the_output() {
    let includes = MemoryIncludes::new().with_file("palette.h", "const vec4 ACCENT = vec4(0.5, 0.25, 1.0, 1.0);\n");
    let options = ParseOptions {
        defines: vec![("USE_ACCENT".into(), "1".into())],
    };
    let lib = common::parse_with(
        r#"
        #include "palette.h"
        shader Flat {
            void main() {
        #ifdef USE_ACCENT
                gl_Target0 = ACCENT;
        #else
                gl_Target0 = vec4(0.0);
        #endif
            }
        }
        export F { pixel Flat; }
        "#,
        &includes,
        &options,
    );
    let linked = common::compile(&lib, &GlslGenerator);
    let data = common::round_trip(&linked);
    let code = common::bundle_code(&data, linked.bundles["F"]);
    assert!(code[0].1.contains("_Target0 = vec4(0.5, 0.25, 1.0, 1.0);"), "{}", code[0].1);
}

#[test]
fn mutually_recursive_helpers_are_forward_declared() {
    let lib = common::parse(
        r#"
        shader Parity {
            in float n;
            float isEven(float x);
            float isOdd(float x) { if (x <= 0.0) { return 0.0; } return isEven(x - 1.0); }
            float isEven(float x) { if (x <= 0.0) { return 1.0; } return isOdd(x - 1.0); }
            void main() { gl_Target0 = vec4(isEven(n)); }
        }
        export P { pixel Parity; }
        "#,
    );
    let linked = common::compile(&lib, &GlslGenerator);
    let data = common::round_trip(&linked);
    let text = &common::bundle_code(&data, linked.bundles["P"])[0].1;
    let prototype = text.find("(float x);\n").expect("forward declaration");
    let first_body = text.find("(float x) {").unwrap();
    assert!(prototype < first_body, "{text}");
}

#[test]
fn null_target_links_every_export() {
    let lib = common::parse(
        r#"
        shader C { attribute(local_size_x=32) void main() { barrier(); } }
        shader P { void main() { gl_Target0 = vec4(1.0); } }
        export Dispatch { compute C; }
        export Draw { pixel P; }
        "#,
    );
    let linked = common::compile(&lib, &NullGenerator);
    assert_eq!(linked.bundles.len(), 2);
    assert_eq!(linked.builder.blob_count(), 2);
}
