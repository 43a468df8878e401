mod common;

use shadec_backend_core::NullGenerator;
use shadec_backend_glsl::GlslGenerator;

#[test]
fn unknown_symbol_is_a_parse_error() {
    let text = common::parse_errors("shader P { void main() { gl_Target0 = Missing; } }");
    assert!(text.starts_with("main.csl:1:"), "{text}");
    assert!(text.contains("Missing"), "{text}");
}

#[test]
fn conflicting_vertex_streams_cite_both_declarations() {
    let lib = common::parse(
        r#"
attribute(packing=vertex) struct Mesh { vec3 position; };
attribute(packing=vertex) struct Skinned { vec3 position; vec4 weights; };
shader Base {
    vertex Mesh mesh;
    vec4 base() { return vec4(mesh.position, 1.0); }
}
shader Deform : Base {
    attribute(binding=Mesh) vertex Skinned skin;
    void main() { gl_Position = base() + skin.weights; }
}
export Broken { vertex Deform; }
"#,
    );
    let text = common::compile_errors(&lib, &NullGenerator);
    assert!(text.contains("vertex stream 'Mesh'"), "{text}");
    // The message sits at one declaration and names the other.
    assert!(text.contains("main.csl:5:"), "{text}");
    assert!(text.contains("main.csl:9:"), "{text}");
}

#[test]
fn unset_constant_cites_export_and_declaration() {
    let lib = common::parse(
        r#"
shader Scaled {
    const float Scale;
    void main() { gl_Target0 = vec4(Scale); }
}
export Missing { pixel Scaled; }
"#,
    );
    let text = common::compile_errors(&lib, &GlslGenerator);
    assert!(text.contains("constant 'Scale' of 'Scaled' has no value (declared at main.csl:3:"), "{text}");
    assert!(text.starts_with("main.csl:6:"), "{text}");
}

#[test]
fn export_without_main_fails() {
    let lib = common::parse(
        r#"
shader Library { float half(float x) { return x * 0.5; } }
export Nothing { pixel Library; }
"#,
    );
    let text = common::compile_errors(&lib, &GlslGenerator);
    assert!(text.contains("shader 'Library' has no 'main' function"), "{text}");
}

#[test]
fn vertex_output_the_pixel_stage_needs_is_missing() {
    let lib = common::parse(
        r#"
shader Pass { void main() { gl_Position = vec4(0.0); } }
shader Shade { in vec3 normal; void main() { gl_Target0 = vec4(normal, 1.0); } }
export Draw { vertex Pass; pixel Shade; }
"#,
    );
    let text = common::compile_errors(&lib, &GlslGenerator);
    assert!(text.contains("the next stage reads 'normal', which the vertex stage never writes"), "{text}");
}

#[test]
fn mismatched_stage_interface_types_fail() {
    let lib = common::parse(
        r#"
shader Pass { out vec2 normal; void main() { normal = vec2(0.0); gl_Position = vec4(0.0); } }
shader Shade { in vec3 normal; void main() { gl_Target0 = vec4(normal, 1.0); } }
export Draw { vertex Pass; pixel Shade; }
"#,
    );
    let text = common::compile_errors(&lib, &GlslGenerator);
    assert!(text.contains("'normal' is written as vec2 but the next stage reads it as vec3"), "{text}");
}

#[test]
fn pixel_builtins_are_rejected_in_compute() {
    let lib = common::parse(
        r#"
shader C {
    shared vec4 c;
    attribute(local_size_x=1)
    void main() { c = gl_FragCoord; }
}
export K { compute C; }
"#,
    );
    let text = common::compile_errors(&lib, &GlslGenerator);
    assert!(text.contains("built-in 'gl_FragCoord' is not available in the compute stage"), "{text}");
}

#[test]
fn one_failing_export_fails_the_library() {
    let lib = common::parse(
        r#"
shader Good { void main() { gl_Target0 = vec4(1.0); } }
shader Bad { attribute(local_size_y=4) void main() { barrier(); } }
export A { pixel Good; }
export B { compute Bad; }
"#,
    );
    let text = common::compile_errors(&lib, &NullGenerator);
    assert!(text.contains("entry point needs attribute 'local_size_x'"), "{text}");
}
