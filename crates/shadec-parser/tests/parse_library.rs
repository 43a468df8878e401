//! End-to-end tests of the shading-language front end.

use pretty_assertions::assert_eq;
use shadec_ir::{
    Callee, CodeLibrary, CollectingReporter, DataValue, LoopKind, OpCode, ParameterScope, ShaderStage,
};
use shadec_parser::{MemoryIncludes, NoIncludes, ParseOptions, parse_library};

fn parse_with(src: &str, options: &ParseOptions) -> CodeLibrary {
    let mut err = CollectingReporter::new();
    let result = parse_library(src, "test.csl", &NoIncludes, &mut err, options);
    result.unwrap_or_else(|_| panic!("unexpected errors:\n{}", err.error_text()))
}

fn parse(src: &str) -> CodeLibrary {
    parse_with(src, &ParseOptions::default())
}

fn parse_err(src: &str) -> String {
    let mut err = CollectingReporter::new();
    let result = parse_library(src, "test.csl", &NoIncludes, &mut err, &ParseOptions::default());
    assert!(result.is_err(), "source parsed without errors");
    assert!(err.has_errors());
    err.error_text()
}

const FORWARD: &str = r#"
const float PI = 3.14159;

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
"#;

#[test]
fn forward_library_resolves_everything() {
    let lib = parse(FORWARD);
    let base = lib.find_program("Base").unwrap();
    let surface = lib.find_program("Surface").unwrap();
    let lit = lib.find_program("Lit").unwrap();

    assert_eq!(lib.program(lit).parents, vec![base]);
    assert!(lib.find_composite("Frame_Constants").is_some());
    assert!(lib.find_global_constant("PI").is_some());

    let names = |p| {
        lib.program(p)
            .descriptor_elements
            .iter()
            .map(|&h| lib.param(h).name.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(base), vec!["Frame_Albedo".to_string()]);
    assert_eq!(names(surface), vec!["Frame_ViewProj".to_string()]);
    assert_eq!(lib.program(surface).descriptors, vec![lib.find_resource_table("Frame").unwrap()]);

    let vertex = lib.find_parameter(surface, "v", false).unwrap();
    assert_eq!(lib.param(vertex).scope, ParameterScope::VertexInput);
    let intensity = lib.find_parameter(lit, "Intensity", true).unwrap();
    assert_eq!(lib.param(intensity).scope, ParameterScope::GlobalConst);

    assert_eq!(lib.exports.len(), 1);
    let export = &lib.exports[0];
    assert_eq!(export.name, "Forward");
    assert_eq!(export.stages[0].stage, ShaderStage::Vertex);
    assert_eq!(export.stages[1].stage, ShaderStage::Pixel);
    assert_eq!(export.stages[1].constants, vec![(intensity, DataValue::float(0.5))]);
}

#[test]
fn inherited_function_calls_resolve_by_name() {
    let lib = parse(FORWARD);
    let lit = lib.find_program("Lit").unwrap();
    let main = lib.find_function(lit, "main", false).unwrap();
    let body = lib.function(main).code.unwrap();
    let store = lib.node(body).children[0];
    let call = lib.node(store).children[1];
    assert_eq!(lib.node(call).op, OpCode::Call);
    assert_eq!(lib.node(call).callee(), Some(&Callee::Program { name: "shade".into() }));
}

#[test]
fn unknown_identifier_reports_location() {
    let text = parse_err("void f()\n{\n    float x = missing;\n}\n");
    assert!(text.contains("test.csl:3:15"), "{text}");
    assert!(text.contains("unknown identifier 'missing'"), "{text}");
}

#[test]
fn ambiguous_descriptor_members_need_qualification() {
    let tables = r#"
        descriptor Material { Texture2D Albedo; }
        descriptor Detail { Texture2D Albedo; }
    "#;
    let text = parse_err(&format!("{tables} vec4 f(vec2 uv) {{ return texture(Albedo, uv); }}"));
    assert!(text.contains("ambiguous"), "{text}");

    let lib = parse(&format!("{tables} vec4 f(vec2 uv) {{ return texture(Detail_Albedo, uv); }}"));
    assert!(lib.find_global_function("f").is_some());
}

#[test]
fn literals_convert_only_losslessly() {
    parse("void f() { uint a = 3; float b = 2; int c = 4u; vec2 d = vec2(1, 2) * 0.5; }");
    let text = parse_err("void f() { int i = 1.5; }");
    assert!(text.contains("cannot convert 'float' to 'int'"), "{text}");
}

#[test]
fn negative_literals_fold() {
    let lib = parse("const int K = -3;");
    let k = lib.find_global_constant("K").unwrap();
    let init = lib.param(k).initializer.unwrap();
    assert_eq!(lib.node(init).op, OpCode::Const);
    assert_eq!(lib.node(init).value, Some(DataValue::int(-3)));
}

#[test]
fn stores_need_assignable_targets() {
    let text = parse_err("shader S { in float a; void main() { a = 1.0; } }");
    assert!(text.contains("cannot assign to 'a'"), "{text}");

    let text = parse_err("shader S { out vec2 o; void main() { o.xx = vec2(1.0); } }");
    assert!(text.contains("repeated components"), "{text}");
}

#[test]
fn prototypes_are_completed_in_place() {
    let lib = parse(
        r#"
        float helper(float x);
        float user(float x) { return helper(x); }
        float helper(float x) { return x * 2.0; }
        "#,
    );
    assert_eq!(lib.global_functions().len(), 2);
    let helper = lib.find_global_function("helper").unwrap();
    assert!(lib.function(helper).code.is_some());

    let user = lib.find_global_function("user").unwrap();
    let ret = lib.node(lib.function(user).code.unwrap()).children[0];
    let call = lib.node(ret).children[0];
    assert_eq!(lib.node(call).callee(), Some(&Callee::Global(helper)));
}

#[test]
fn for_loops_lower_to_scoped_loops() {
    let lib = parse("void f() { int s = 0; for (int i = 0; i < 4; i++) { s += i; } }");
    let f = lib.find_global_function("f").unwrap();
    let body = lib.node(lib.function(f).code.unwrap());
    assert_eq!(body.children.len(), 2);

    let scope = lib.node(body.children[1]);
    assert_eq!(scope.op, OpCode::Scope);
    assert_eq!(scope.locals().len(), 1);
    let lp = lib.node(*scope.children.last().unwrap());
    assert_eq!(lp.op, OpCode::Loop);
    assert_eq!(lp.loop_kind(), LoopKind::PreCondition);
    assert_eq!(lp.children.len(), 3);
    assert_eq!(lib.node(lp.children[2]).op, OpCode::Store);
}

#[test]
fn program_typed_constants_accept_derived_programs() {
    let shaders = r#"
        shader Lighting { vec3 light(vec3 n) { return n; } }
        shader Fancy : Lighting { vec3 light(vec3 n) { return normalize(n); } }
        shader Other { }
    "#;
    let lib = parse(&format!(
        "{shaders} shader Surf {{ const Lighting L = Fancy; out vec3 o; void main() {{ o = L.light(vec3(0.0, 1.0, 0.0)); }} }}"
    ));
    let surf = lib.find_program("Surf").unwrap();
    let l = lib.find_parameter(surf, "L", false).unwrap();
    let init = lib.param(l).initializer.unwrap();
    assert_eq!(lib.node(init).value, Some(DataValue::Program(lib.find_program("Fancy").unwrap())));

    let text = parse_err(&format!("{shaders} shader Bad {{ const Lighting L = Other; }}"));
    assert!(text.contains("cannot convert 'Other' to 'Lighting'"), "{text}");
}

#[test]
fn export_errors() {
    let shaders = "const float PI = 3.0; shader P { const float K = 1.0; void main() { } }";
    let text = parse_err(&format!("{shaders} export E {{ pixel P; pixel P; }}"));
    assert!(text.contains("exported twice"), "{text}");

    let text = parse_err(&format!("{shaders} export E {{ pixel P(K = PI); }}"));
    assert!(text.contains("must be a literal"), "{text}");

    let text = parse_err(&format!("{shaders} export E {{ pixel Missing; }}"));
    assert!(text.contains("unknown shader 'Missing'"), "{text}");
}

#[test]
fn defines_and_includes_feed_the_parser() {
    let src = "#include \"common.h\"\n#ifdef FAST\nconst float Q = 1.0;\n#else\nconst float Q = 2.0;\n#endif\n";
    let includes = MemoryIncludes::new().with_file("common.h", "const float SCALE = 4.0;");
    let options = ParseOptions {
        defines: vec![("FAST".into(), String::new())],
    };
    let mut err = CollectingReporter::new();
    let lib = parse_library(src, "main.csl", &includes, &mut err, &options).unwrap();
    assert!(lib.find_global_constant("SCALE").is_some());
    let q = lib.find_global_constant("Q").unwrap();
    let init = lib.param(q).initializer.unwrap();
    assert_eq!(lib.node(init).value, Some(DataValue::float(1.0)));

    let lib = parse_with("#ifdef FAST\nconst float Q = 1.0;\n#endif\n", &ParseOptions::default());
    assert!(lib.find_global_constant("Q").is_none());
}

#[test]
fn descriptor_names_reject_underscores() {
    let text = parse_err("descriptor My_Table { Texture2D T; }");
    assert!(text.contains("must not contain '_'"), "{text}");
}

#[test]
fn writable_images_need_a_format() {
    let text = parse_err("descriptor T { RWTexture2D Out; }");
    assert!(text.contains("needs attribute(format=...)"), "{text}");
    parse("descriptor T { attribute(format=rgba8) RWTexture2D Out; RWBuffer<Particle> P; }".replace(
        "descriptor",
        "struct Particle { vec4 p; }; descriptor",
    ).as_str());
}
