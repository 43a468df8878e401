//! Text dump of a library and its code trees, for debugging.

use std::fmt::Write as _;

use crate::arena::{Arena, Handle};
use crate::library::CodeLibrary;
use crate::node::{Callee, CodeNode, LoopKind, OpCode};

/// Dumps every type, descriptor, constant, program and export.
pub fn dump_library(lib: &CodeLibrary) -> String {
    let mut out = String::new();

    if !lib.composites.is_empty() {
        out.push_str("Structures:\n");
        for (handle, c) in lib.composites.iter() {
            let _ = writeln!(
                out,
                "  {handle:?} {} ({:?}, size {}, align {})",
                c.name, c.packing, c.size, c.alignment
            );
            for m in &c.members {
                let _ = writeln!(
                    out,
                    "    +{:<4} {} {}",
                    m.layout.offset,
                    lib.type_name(&m.ty),
                    m.name
                );
            }
        }
    }

    if !lib.tables.is_empty() {
        out.push_str("\nDescriptors:\n");
        for (handle, t) in lib.tables.iter() {
            let _ = writeln!(out, "  {handle:?} {}", t.name);
            for e in &t.entries {
                let _ = writeln!(out, "    {:?} {}", e.ty.kind, e.merged_name);
            }
        }
    }

    if !lib.global_constants().is_empty() {
        out.push_str("\nConstants:\n");
        for &c in lib.global_constants() {
            let p = lib.param(c);
            let _ = writeln!(out, "  {} {}", lib.type_name(&p.ty), p.name);
            if let Some(init) = p.initializer {
                dump_code_into(&mut out, lib, &lib.nodes, init, 2);
            }
        }
    }

    if !lib.global_functions().is_empty() {
        out.push_str("\nFunctions:\n");
        for &f in lib.global_functions() {
            dump_function(&mut out, lib, f, 1);
        }
    }

    if !lib.programs.is_empty() {
        out.push_str("\nPrograms:\n");
        for (handle, p) in lib.programs.iter() {
            let parents: Vec<&str> = p
                .parents
                .iter()
                .map(|&h| lib.program(h).name.as_str())
                .collect();
            let _ = write!(out, "  {handle:?} {}", p.name);
            if !parents.is_empty() {
                let _ = write!(out, " : {}", parents.join(", "));
            }
            out.push('\n');
            for &param in &p.parameters {
                let d = lib.param(param);
                let _ = writeln!(out, "    {} {} {}", d.scope, lib.type_name(&d.ty), d.name);
            }
            for &f in &p.functions {
                dump_function(&mut out, lib, f, 2);
            }
        }
    }

    if !lib.exports.is_empty() {
        out.push_str("\nExports:\n");
        for bundle in &lib.exports {
            let _ = writeln!(out, "  {}", bundle.name);
            for stage in &bundle.stages {
                let _ = write!(out, "    {} {}", stage.stage, lib.program(stage.program).name);
                for (param, value) in &stage.constants {
                    let _ = write!(out, " {}={value}", lib.param(*param).name);
                }
                out.push('\n');
            }
        }
    }

    out
}

fn dump_function(out: &mut String, lib: &CodeLibrary, handle: Handle<crate::Function>, depth: usize) {
    let f = lib.function(handle);
    let inputs: Vec<String> = f
        .inputs
        .iter()
        .map(|&i| {
            let p = lib.param(i);
            format!("{} {}", lib.type_name(&p.ty), p.name)
        })
        .collect();
    let _ = writeln!(
        out,
        "{}fn {}({}) -> {}",
        "  ".repeat(depth),
        f.name,
        inputs.join(", "),
        lib.type_name(&f.return_type)
    );
    if let Some(code) = f.code {
        dump_code_into(out, lib, &lib.nodes, code, depth + 1);
    }
}

/// Dumps a code tree stored in `nodes`, which is either the library's
/// own arena or a folding session's.
pub fn dump_code(lib: &CodeLibrary, nodes: &Arena<CodeNode>, root: Handle<CodeNode>) -> String {
    let mut out = String::new();
    dump_code_into(&mut out, lib, nodes, root, 0);
    out
}

fn dump_code_into(
    out: &mut String,
    lib: &CodeLibrary,
    nodes: &Arena<CodeNode>,
    handle: Handle<CodeNode>,
    depth: usize,
) {
    let node = &nodes[handle];
    let _ = write!(out, "{}{}", "  ".repeat(depth), node.op);
    match node.op {
        OpCode::Const => {
            if let Some(v) = &node.value {
                let _ = write!(out, " {v}");
            }
        }
        OpCode::ParamRef => {
            if let Some(p) = node.param() {
                let _ = write!(out, " {}", lib.param(p).name);
            }
        }
        OpCode::NativeCall => {
            if let Some(n) = node.native() {
                let _ = write!(out, " {n}");
            }
        }
        OpCode::Call => match node.callee() {
            Some(Callee::Global(f)) => {
                let _ = write!(out, " {}", lib.function(*f).name);
            }
            Some(Callee::Program { name }) => {
                let _ = write!(out, " self.{name}");
            }
            Some(Callee::ProgramMember { name }) => {
                let _ = write!(out, " .{name}");
            }
            Some(Callee::Folded(f)) => {
                let _ = write!(out, " folded{f:?}");
            }
            None => {}
        },
        OpCode::ReadSwizzle => {
            if let Some(s) = node.swizzle() {
                let _ = write!(out, " .{s}");
            }
        }
        OpCode::AccessMember => {
            if let Some((name, _)) = node.member() {
                let _ = write!(out, " .{name}");
            }
        }
        OpCode::Loop => {
            if node.loop_kind() == LoopKind::PostCondition {
                out.push_str(" post");
            }
        }
        OpCode::Scope => {
            for &local in node.locals() {
                let p = lib.param(local);
                let _ = write!(out, " [{} {}]", lib.type_name(&p.ty), p.name);
            }
        }
        _ => {}
    }
    if !node.ty.is_void() && node.op != OpCode::Scope {
        let _ = write!(out, " : {}", lib.type_name(&node.ty));
    }
    out.push('\n');
    for &child in &node.children {
        dump_code_into(out, lib, nodes, child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Location;
    use crate::native::NativeFunction;
    use crate::node::NodeExtra;
    use crate::param::AttributeList;
    use crate::types::DataType;
    use crate::value::DataValue;

    #[test]
    fn dump_empty_library() {
        assert_eq!(dump_library(&CodeLibrary::new()), "");
    }

    #[test]
    fn code_dump_is_indented_by_depth() {
        let mut lib = CodeLibrary::new();
        let one = lib.add_node(CodeNode::constant(DataValue::float(1.0), DataType::FLOAT, Location::internal()));
        let two = lib.add_node(CodeNode::constant(DataValue::float(2.0), DataType::FLOAT, Location::internal()));
        let add = lib.add_node(
            CodeNode::new(OpCode::NativeCall, Location::internal())
                .with_children(vec![one, two])
                .with_type(DataType::FLOAT)
                .with_extra(NodeExtra::Native(NativeFunction::Add)),
        );
        let text = dump_code(&lib, &lib.nodes, add);
        assert_eq!(
            text,
            "NativeCall __add : float\n  Const 1.0 : float\n  Const 2.0 : float\n"
        );
    }

    #[test]
    fn library_dump_lists_programs_with_parents() {
        let mut lib = CodeLibrary::new();
        let base = lib.create_program("Base", AttributeList::new(), Location::internal());
        let derived = lib.create_program("Derived", AttributeList::new(), Location::internal());
        lib.add_parent_program(derived, base);
        let text = dump_library(&lib);
        assert!(text.contains("Derived : Base"), "{text}");
    }
}
