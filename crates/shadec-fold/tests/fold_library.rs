//! Instancing and folding of parsed libraries.

use pretty_assertions::assert_eq;
use shadec_fold::{FunctionFolder, InstanceCache};
use shadec_ir::{
    Callee, CodeLibrary, CollectingReporter, DataValue, FoldedFunction, Handle, Location, NativeFunction, OpCode,
    ProgramConstants,
};
use shadec_parser::{NoIncludes, ParseOptions, parse_library};

fn parse(src: &str) -> CodeLibrary {
    let mut err = CollectingReporter::new();
    parse_library(src, "test.csl", &NoIncludes, &mut err, &ParseOptions::default())
        .unwrap_or_else(|_| panic!("unexpected errors:\n{}", err.error_text()))
}

fn fold_main<'a>(
    lib: &'a CodeLibrary,
    cache: &'a InstanceCache,
    program: &str,
    constants: &ProgramConstants,
) -> (FunctionFolder<'a>, Handle<FoldedFunction>) {
    let program = lib.find_program(program).unwrap();
    let mut err = CollectingReporter::new();
    let instance = cache
        .create_program_instance(lib, program, constants, &Location::internal(), &mut err)
        .unwrap_or_else(|_| panic!("instancing failed:\n{}", err.error_text()));
    let mut folder = FunctionFolder::new(lib, cache);
    let main = folder
        .fold_entry_point(&instance, &Location::internal(), &mut err)
        .unwrap_or_else(|_| panic!("folding failed:\n{}", err.error_text()));
    (folder, main)
}

/// Value side of the `index`-th statement of a folded body, which must be
/// a store.
fn stored_value<'f>(folder: &'f FunctionFolder<'_>, main: Handle<FoldedFunction>, index: usize) -> &'f shadec_ir::CodeNode {
    let body = folder.node(folder.function(main).code.unwrap());
    let store = folder.node(body.children[index]);
    assert_eq!(store.op, OpCode::Store);
    folder.node(store.children[1])
}

const SCALED: &str = r#"
shader P {
    const float K = 2.0;
    out float o;
    void main() { o = K * 3.0; }
}
"#;

#[test]
fn constants_fold_into_literals() {
    let lib = parse(SCALED);
    let cache = InstanceCache::new();
    let (folder, main) = fold_main(&lib, &cache, "P", &ProgramConstants::new());
    let value = stored_value(&folder, main, 0);
    assert_eq!(value.op, OpCode::Const);
    assert_eq!(value.value, Some(DataValue::float(6.0)));
}

#[test]
fn caller_constants_override_defaults() {
    let lib = parse(SCALED);
    let p = lib.find_program("P").unwrap();
    let k = lib.find_parameter(p, "K", false).unwrap();
    let mut constants = ProgramConstants::new();
    constants.set(k, DataValue::float(0.5));

    let cache = InstanceCache::new();
    let (folder, main) = fold_main(&lib, &cache, "P", &constants);
    assert_eq!(stored_value(&folder, main, 0).value, Some(DataValue::float(1.5)));
}

#[test]
fn constant_arguments_specialize_callees() {
    let lib = parse(
        r#"
        shader P {
            in float v;
            out float o;
            float scale(float x, float f) { return x * f; }
            void main() { o = scale(v, 2.0) + scale(v, 2.0) + scale(v, 3.0); }
        }
        "#,
    );
    let cache = InstanceCache::new();
    let (folder, main) = fold_main(&lib, &cache, "P", &ProgramConstants::new());

    let mut callees = Vec::new();
    let mut pending = vec![stored_value(&folder, main, 0)];
    while let Some(node) = pending.pop() {
        match node.op {
            OpCode::Call => {
                assert_eq!(node.children.len(), 1, "constant argument was not bound");
                if let Some(&Callee::Folded(f)) = node.callee() {
                    callees.push(f);
                }
            }
            OpCode::NativeCall => {
                assert_eq!(node.native(), Some(NativeFunction::Add));
                pending.extend(node.children.iter().map(|&c| folder.node(c)));
            }
            op => panic!("unexpected {op}"),
        }
    }
    callees.sort();
    callees.dedup();
    assert_eq!(callees.len(), 2, "equal specializations must be shared");
    for f in callees {
        let folded = folder.function(f);
        assert!(folded.name.starts_with("scale_"), "{}", folded.name);
        assert_eq!(folded.inputs.len(), 1);
    }
}

#[test]
fn constant_conditions_keep_only_the_taken_branch() {
    let lib = parse(
        r#"
        shader P {
            const bool FAST = true;
            out float o;
            void main() { if (FAST) { o = 1.0; } else { o = 2.0; } }
        }
        "#,
    );
    let cache = InstanceCache::new();
    let (folder, main) = fold_main(&lib, &cache, "P", &ProgramConstants::new());
    let body = folder.node(folder.function(main).code.unwrap());
    let taken = folder.node(body.children[0]);
    assert_eq!(taken.op, OpCode::Scope);
    let store = folder.node(taken.children[0]);
    assert_eq!(folder.node(store.children[1]).value, Some(DataValue::float(1.0)));
}

#[test]
fn shader_constants_dispatch_member_calls() {
    let lib = parse(
        r#"
        shader Lighting { vec3 light(vec3 n) { return n; } }
        shader Fancy : Lighting { vec3 light(vec3 n) { return normalize(n); } }
        shader Surf {
            const Lighting L = Fancy;
            in vec3 n;
            out vec3 o;
            void main() { o = L.light(n); }
        }
        "#,
    );
    let cache = InstanceCache::new();
    let (folder, main) = fold_main(&lib, &cache, "Surf", &ProgramConstants::new());
    let call = stored_value(&folder, main, 0);
    assert_eq!(call.op, OpCode::Call);
    let Some(&Callee::Folded(f)) = call.callee() else {
        panic!("call was not folded");
    };
    let fancy = lib.find_program("Fancy").unwrap();
    assert_eq!(lib.function(folder.function(f).original).program, Some(fancy));
    assert_eq!(folder.function(f).instance.program, fancy);
}

#[test]
fn initializers_run_loops_and_calls() {
    let lib = parse(
        r#"
        int triangle(int n) {
            int s = 0;
            for (int i = 0; i < n; i++) { s += i; }
            return s;
        }
        shader P {
            const int N = triangle(4);
            out int o;
            void main() { o = N; }
        }
        "#,
    );
    let cache = InstanceCache::new();
    let (folder, main) = fold_main(&lib, &cache, "P", &ProgramConstants::new());
    assert_eq!(stored_value(&folder, main, 0).value, Some(DataValue::int(6)));
}

#[test]
fn runaway_initializers_hit_the_step_limit() {
    let lib = parse(
        r#"
        int spin() { int s = 0; while (true) { s += 1; } return s; }
        shader P { const int N = spin(); void main() { } }
        "#,
    );
    let p = lib.find_program("P").unwrap();
    let mut err = CollectingReporter::new();
    let result = InstanceCache::new().create_program_instance(
        &lib,
        p,
        &ProgramConstants::new(),
        &Location::internal(),
        &mut err,
    );
    assert!(result.is_err());
    assert!(err.error_text().contains("exceeded"), "{}", err.error_text());
}

#[test]
fn unbound_shader_constants_are_errors() {
    let lib = parse(
        r#"
        shader Lighting { vec3 light(vec3 n) { return n; } }
        shader Surf {
            const Lighting L;
            void main() { }
        }
        "#,
    );
    let surf = lib.find_program("Surf").unwrap();
    let mut err = CollectingReporter::new();
    let site = Location::new("export.csl".into(), 12, 5);
    let result =
        InstanceCache::new().create_program_instance(&lib, surf, &ProgramConstants::new(), &site, &mut err);
    assert!(result.is_err());
    let text = err.error_text();
    assert!(text.contains("export.csl:12:5"), "{text}");
    assert!(text.contains("'L'"), "{text}");
}

#[test]
fn recursion_through_a_constant_select_reaches_its_base_case() {
    let lib = parse(
        r#"
        shader P {
            out int o;
            int depth(int n) { return n <= 0 ? 0 : depth(n - 1) + 1; }
            void main() { o = depth(3); }
        }
        "#,
    );
    let cache = InstanceCache::new();
    let (folder, _) = fold_main(&lib, &cache, "P", &ProgramConstants::new());
    // main plus depth(3), depth(2), depth(1) and depth(0)
    assert_eq!(folder.functions().len(), 5);
    let base = folder
        .functions()
        .iter()
        .map(|(_, f)| f)
        .find(|f| f.key.constant_args.iter().any(|(_, v)| *v == DataValue::int(0)))
        .expect("depth(0)");
    let ret = folder.node(folder.node(base.code.unwrap()).children[0]);
    assert_eq!(ret.op, OpCode::Return);
    assert_eq!(folder.node(ret.children[0]).value, Some(DataValue::int(0)));
}

#[test]
fn endless_specialization_is_an_error() {
    let lib = parse(
        r#"
        shader P {
            out int o;
            int up(int n) { return up(n + 1); }
            void main() { o = up(0); }
        }
        "#,
    );
    let p = lib.find_program("P").unwrap();
    let cache = InstanceCache::new();
    let mut err = CollectingReporter::new();
    let instance = cache
        .create_program_instance(&lib, p, &ProgramConstants::new(), &Location::internal(), &mut err)
        .unwrap();
    let mut folder = FunctionFolder::new(&lib, &cache);
    assert!(folder.fold_entry_point(&instance, &Location::internal(), &mut err).is_err());
    let text = err.error_text();
    assert!(text.contains("specialization of 'up' does not terminate"), "{text}");
}
