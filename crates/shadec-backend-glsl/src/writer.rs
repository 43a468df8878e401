//! Emission of one stage as GLSL source.
//!
//! Functions are scheduled from an explicit work stack rooted at the entry
//! point. A function is emitted once every callee it reaches is `Done` or
//! `InProgress`, so callees precede callers. A call to a function that is
//! still `InProgress` (recursion) marks it for a prototype at the top of
//! the file.

use rustc_hash::FxHashMap;
use shadec_backend_core::{GeneratedShader, GenerationContext, reachable_functions, referenced_parameters, visit_nodes};
use shadec_fold::FunctionFolder;
use shadec_ir::{
    BaseType, Callee, CodeLibrary, CodeNode, Component, CompositeType, DataType, DataValue, ErrorReported,
    ErrorReporter, FoldedFunction, Handle, Location, LoopKind, NativeFunction, OpCode, ParameterScope, ResourceType,
    ScalarKind, ShaderStage,
};

use crate::interface::{Interface, Spelling};
use crate::names;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GenState {
    Pending,
    InProgress,
    Done,
}

type GenResult<T> = Result<T, ErrorReported>;

struct Writer<'c, 'a> {
    ctx: &'c GenerationContext<'a>,
    lib: &'a CodeLibrary,
    folder: &'a FunctionFolder<'a>,
    interface: &'c Interface,
    states: FxHashMap<Handle<FoldedFunction>, GenState>,
    forward: Vec<Handle<FoldedFunction>>,
    functions: String,
}

/// Generates the GLSL text of the stage described by `ctx`.
pub(crate) fn generate(ctx: &GenerationContext<'_>, err: &mut dyn ErrorReporter) -> GenResult<GeneratedShader> {
    let folder = ctx.folder;
    let lib = ctx.library();
    let reachable = reachable_functions(folder, ctx.entry);
    let params = referenced_parameters(folder, &reachable);
    let interface = Interface::build(ctx, &params, err)?;
    let stage_layout = stage_layout(ctx, err)?;

    let mut writer = Writer {
        ctx,
        lib,
        folder,
        interface: &interface,
        states: reachable.iter().map(|&f| (f, GenState::Pending)).collect(),
        forward: Vec::new(),
        functions: String::new(),
    };
    writer.emit_all(ctx.entry, err)?;

    let mut text = format!("#version {}\n", ctx.options.glsl_version);
    for extension in &interface.extensions {
        text.push_str(&format!("#extension {extension} : require\n"));
    }
    text.push_str(&stage_layout);
    text.push('\n');
    for layout in used_structs(folder, &reachable, &interface) {
        text.push_str(&struct_declaration(lib, &lib.composites[layout]));
    }
    text.push_str(&interface.declarations);
    if !writer.forward.is_empty() {
        text.push('\n');
        for &function in &writer.forward {
            text.push_str(&format!("{};\n", writer.signature(function)));
        }
    }
    text.push_str(&writer.functions);

    log::debug!(
        "glsl: {} stage of '{}': {} function(s), {} bytes",
        ctx.stage,
        lib.program(ctx.program()).name,
        reachable.len(),
        text.len()
    );
    Ok(GeneratedShader {
        code: text.into_bytes(),
        dependencies: interface.dependencies,
    })
}

fn missing_attribute(err: &mut dyn ErrorReporter, location: &Location, stage: ShaderStage, key: &str) -> ErrorReported {
    err.report_error(location, &format!("{stage} entry point needs attribute '{key}'"));
    ErrorReported
}

fn stage_layout(ctx: &GenerationContext<'_>, err: &mut dyn ErrorReporter) -> GenResult<String> {
    let entry = ctx.entry_function();
    let attrs = &entry.attributes;
    let mut required = |key: &str| match attrs.value(key) {
        Some(value) => Ok(value),
        None => Err(missing_attribute(&mut *err, &entry.location, ctx.stage, key)),
    };
    Ok(match ctx.stage {
        ShaderStage::Compute => {
            let x = required("local_size_x")?;
            format!(
                "layout(local_size_x = {x}, local_size_y = {}, local_size_z = {}) in;\n",
                attrs.value_or("local_size_y", "1"),
                attrs.value_or("local_size_z", "1")
            )
        }
        ShaderStage::Geometry => {
            let input = required("input")?;
            let output = required("output")?;
            let max = required("max_vertices")?;
            format!("layout({input}) in;\nlayout({output}, max_vertices = {max}) out;\n")
        }
        ShaderStage::Pixel if attrs.has("early_fragment_tests") => "layout(early_fragment_tests) in;\n".to_string(),
        _ => String::new(),
    })
}

fn collect_struct(lib: &CodeLibrary, ty: &DataType, order: &mut Vec<Handle<CompositeType>>) {
    let Some(layout) = ty.composite() else {
        return;
    };
    if order.contains(&layout) {
        return;
    }
    for member in &lib.composites[layout].members {
        collect_struct(lib, &member.ty, order);
    }
    order.push(layout);
}

/// Structures the stage mentions, each after the structures it contains.
fn used_structs(
    folder: &FunctionFolder<'_>,
    functions: &[Handle<FoldedFunction>],
    interface: &Interface,
) -> Vec<Handle<CompositeType>> {
    let lib = folder.library();
    let mut order = Vec::new();
    for &layout in &interface.layouts {
        collect_struct(lib, &DataType::new(BaseType::Struct(layout)), &mut order);
    }
    for &function in functions {
        let f = folder.function(function);
        collect_struct(lib, &f.return_type, &mut order);
        for &input in &f.inputs {
            collect_struct(lib, &lib.param(input).ty, &mut order);
        }
        if let Some(code) = f.code {
            visit_nodes(folder, code, &mut |node| {
                collect_struct(lib, &node.ty, &mut order);
                for &local in node.locals() {
                    collect_struct(lib, &lib.param(local).ty, &mut order);
                }
            });
        }
    }
    order
}

fn struct_declaration(lib: &CodeLibrary, composite: &CompositeType) -> String {
    let mut text = format!("struct {} {{\n", names::identifier(&composite.name));
    for member in &composite.members {
        let name = names::identifier(&member.name);
        text.push_str(&format!("    {};\n", names::declaration(lib, &member.ty, &name)));
    }
    text.push_str("};\n");
    text
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

impl<'c, 'a> Writer<'c, 'a> {
    fn node(&self, handle: Handle<CodeNode>) -> &'a CodeNode {
        self.folder.node(handle)
    }

    /// Spelling of the global a `ParamRef` names.
    fn spelling(&self, n: &CodeNode) -> Option<&'c Spelling> {
        let interface: &'c Interface = self.interface;
        n.param().filter(|_| n.op == OpCode::ParamRef).and_then(|p| interface.spellings.get(&p))
    }

    fn function_name(&self, function: Handle<FoldedFunction>) -> String {
        if function == self.ctx.entry {
            "main".to_string()
        } else {
            names::identifier(&self.folder.function(function).name)
        }
    }

    fn signature(&self, function: Handle<FoldedFunction>) -> String {
        let f = self.folder.function(function);
        let inputs: Vec<_> = f
            .inputs
            .iter()
            .map(|&i| {
                let param = self.lib.param(i);
                names::declaration(self.lib, &param.ty, &names::identifier(&param.name))
            })
            .collect();
        format!(
            "{} {}({})",
            names::constructor(self.lib, &f.return_type),
            self.function_name(function),
            inputs.join(", ")
        )
    }

    /// Callees of `function` in order of first appearance.
    fn callees(&self, function: Handle<FoldedFunction>) -> Vec<Handle<FoldedFunction>> {
        let mut out = Vec::new();
        if let Some(code) = self.folder.function(function).code {
            visit_nodes(self.folder, code, &mut |node| {
                if let Some(Callee::Folded(callee)) = node.callee() {
                    if !out.contains(callee) {
                        out.push(*callee);
                    }
                }
            });
        }
        out
    }

    /// Emits every function reachable from `entry`, callees first.
    fn emit_all(&mut self, entry: Handle<FoldedFunction>, err: &mut dyn ErrorReporter) -> GenResult<()> {
        let mut stack = vec![(entry, self.callees(entry), 0usize)];
        self.states.insert(entry, GenState::InProgress);
        while let Some((function, callees, next)) = stack.last_mut() {
            let Some(&callee) = callees.get(*next) else {
                let function = *function;
                stack.pop();
                self.emit_function(function, err)?;
                continue;
            };
            *next += 1;
            match self.states.get(&callee).copied() {
                Some(GenState::Pending) => {
                    self.states.insert(callee, GenState::InProgress);
                    let callees = self.callees(callee);
                    stack.push((callee, callees, 0));
                }
                Some(GenState::InProgress) => {
                    if !self.forward.contains(&callee) {
                        self.forward.push(callee);
                    }
                }
                Some(GenState::Done) => {}
                None => panic!(
                    "call to '{}' which is not reachable from the entry point",
                    self.folder.function(callee).name
                ),
            }
        }
        Ok(())
    }

    fn emit_function(&mut self, function: Handle<FoldedFunction>, err: &mut dyn ErrorReporter) -> GenResult<()> {
        let f = self.folder.function(function);
        let mut text = format!("\n{} {{\n", self.signature(function));
        if let Some(code) = f.code {
            self.block(code, &mut text, 1, err)?;
        }
        text.push_str("}\n");
        self.functions.push_str(&text);
        self.states.insert(function, GenState::Done);
        Ok(())
    }

    // -- statements --

    /// Contents of a block: a `Scope`'s locals and statements, or a single
    /// statement.
    fn block(&mut self, handle: Handle<CodeNode>, out: &mut String, depth: usize, err: &mut dyn ErrorReporter) -> GenResult<()> {
        let n = self.node(handle);
        if n.op != OpCode::Scope {
            return self.statement(handle, out, depth, err);
        }
        for &local in n.locals() {
            let param = self.lib.param(local);
            let name = names::identifier(&param.name);
            out.push_str(&format!("{}{};\n", indent(depth), names::declaration(self.lib, &param.ty, &name)));
        }
        for &child in &n.children {
            self.statement(child, out, depth, err)?;
        }
        Ok(())
    }

    fn statement(&mut self, handle: Handle<CodeNode>, out: &mut String, depth: usize, err: &mut dyn ErrorReporter) -> GenResult<()> {
        let n = self.node(handle);
        let pad = indent(depth);
        match n.op {
            OpCode::Nop => {}
            OpCode::Scope => {
                out.push_str(&format!("{pad}{{\n"));
                self.block(handle, out, depth + 1, err)?;
                out.push_str(&format!("{pad}}}\n"));
            }
            OpCode::Break => out.push_str(&format!("{pad}break;\n")),
            OpCode::Continue => out.push_str(&format!("{pad}continue;\n")),
            OpCode::Exit => out.push_str(&format!("{pad}discard;\n")),
            OpCode::Return => match n.children.first() {
                Some(&value) => {
                    let value = self.expr(value, err)?;
                    out.push_str(&format!("{pad}return {value};\n"));
                }
                None => out.push_str(&format!("{pad}return;\n")),
            },
            OpCode::IfElse => {
                let cond = self.expr(n.children[0], err)?;
                out.push_str(&format!("{pad}if ({cond}) {{\n"));
                self.block(n.children[1], out, depth + 1, err)?;
                if self.node(n.children[2]).is_nop() {
                    out.push_str(&format!("{pad}}}\n"));
                } else {
                    out.push_str(&format!("{pad}}} else {{\n"));
                    self.block(n.children[2], out, depth + 1, err)?;
                    out.push_str(&format!("{pad}}}\n"));
                }
            }
            OpCode::Loop => self.loop_statement(n, out, depth, err)?,
            OpCode::Store => {
                let store = self.store(n, err)?;
                out.push_str(&format!("{pad}{store};\n"));
            }
            OpCode::Call => {
                let call = self.expr(handle, err)?;
                out.push_str(&format!("{pad}{call};\n"));
            }
            OpCode::NativeCall if n.native().is_some_and(NativeFunction::has_side_effects) => {
                let call = self.expr(handle, err)?;
                out.push_str(&format!("{pad}{call};\n"));
            }
            // value without effects
            _ => {}
        }
        Ok(())
    }

    fn loop_statement(&mut self, n: &'a CodeNode, out: &mut String, depth: usize, err: &mut dyn ErrorReporter) -> GenResult<()> {
        let pad = indent(depth);
        let [cond, body, step] = [n.children[0], n.children[1], n.children[2]];
        let cond = if self.node(cond).is_nop() { "true".to_string() } else { self.expr(cond, err)? };
        match n.loop_kind() {
            LoopKind::PreCondition => {
                let step = self.step_expression(step, err)?;
                out.push_str(&format!("{pad}for (; {cond}; {step}) {{\n"));
                self.block(body, out, depth + 1, err)?;
                out.push_str(&format!("{pad}}}\n"));
            }
            LoopKind::PostCondition => {
                out.push_str(&format!("{pad}do {{\n"));
                self.block(body, out, depth + 1, err)?;
                self.statement(step, out, depth + 1, err)?;
                out.push_str(&format!("{pad}}} while ({cond});\n"));
            }
        }
        Ok(())
    }

    /// The step of a `for` loop as a comma expression.
    fn step_expression(&mut self, handle: Handle<CodeNode>, err: &mut dyn ErrorReporter) -> GenResult<String> {
        let n = self.node(handle);
        match n.op {
            OpCode::Nop => Ok(String::new()),
            OpCode::Store => self.store(n, err),
            OpCode::Scope if n.locals().is_empty() => {
                let parts = n
                    .children
                    .iter()
                    .map(|&c| self.step_expression(c, err))
                    .collect::<GenResult<Vec<_>>>()?;
                Ok(parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join(", "))
            }
            OpCode::Call | OpCode::NativeCall => self.expr(handle, err),
            _ => {
                err.report_error(&n.location, "loop step must be an assignment or a call");
                Err(ErrorReported)
            }
        }
    }

    // -- places --

    /// `(image, coordinate)` when `handle` addresses one element of an
    /// image or formatted buffer.
    fn image_element(&self, handle: Handle<CodeNode>) -> Option<(Handle<CodeNode>, Handle<CodeNode>)> {
        let n = self.node(handle);
        if n.op != OpCode::AccessArray {
            return None;
        }
        let base = self.node(n.children[0]);
        base.ty.resource().filter(|r| r.is_image()).map(|_| (n.children[0], n.children[1]))
    }

    /// True when a proper part of an image element is addressed.
    fn inside_image_element(&self, handle: Handle<CodeNode>) -> bool {
        let mut current = handle;
        loop {
            let n = self.node(current);
            if !matches!(n.op, OpCode::AccessArray | OpCode::AccessMember | OpCode::ReadSwizzle) {
                return false;
            }
            current = n.children[0];
            if self.image_element(current).is_some() {
                return true;
            }
        }
    }

    fn store(&mut self, n: &'a CodeNode, err: &mut dyn ErrorReporter) -> GenResult<String> {
        let [target, value] = [n.children[0], n.children[1]];
        let rhs = self.expr(value, err)?;
        if let Some((image, coordinate)) = self.image_element(target) {
            let r = self.resource_of(image);
            let name = self.expr(image, err)?;
            let coordinate = self.coordinate(coordinate, err)?;
            return Ok(format!("imageStore({name}, {coordinate}, {})", names::widen_to_vec4(&r, &rhs)));
        }
        if self.inside_image_element(target) {
            err.report_error(&n.location, "image elements can only be written as a whole");
            return Err(ErrorReported);
        }
        let lhs = self.expr(target, err)?;
        Ok(format!("{lhs} = {rhs}"))
    }

    fn resource_of(&self, handle: Handle<CodeNode>) -> ResourceType {
        match self.node(handle).ty.resource() {
            Some(r) => *r,
            None => panic!("expected a resource operand at {}", self.node(handle).location),
        }
    }

    /// Integer coordinate, converting unsigned ones to the signed form the
    /// image functions take.
    fn coordinate(&mut self, handle: Handle<CodeNode>, err: &mut dyn ErrorReporter) -> GenResult<String> {
        let ty = self.node(handle).ty;
        let text = self.expr(handle, err)?;
        Ok(match ty.scalar_kind() {
            Some(ScalarKind::Uint) => format!("{}({text})", self.lib.type_name(&ty.with_kind(ScalarKind::Int))),
            _ => text,
        })
    }

    // -- expressions --

    fn param_expr(&self, n: &CodeNode, err: &mut dyn ErrorReporter) -> GenResult<String> {
        let Some(p) = n.param() else {
            panic!("ParamRef without a parameter at {}", n.location);
        };
        let param = self.lib.param(p);
        match self.interface.spellings.get(&p) {
            Some(Spelling::Name(name)) => Ok(name.clone()),
            Some(Spelling::PerVertex(_)) => {
                err.report_error(&n.location, &format!("'{}' can only be read one vertex at a time", param.name));
                Err(ErrorReported)
            }
            Some(Spelling::VertexStruct { layout, members }) => Ok(format!(
                "{}({})",
                names::identifier(&self.lib.composites[*layout].name),
                members.join(", ")
            )),
            None if matches!(param.scope, ParameterScope::FunctionInput | ParameterScope::ScopeLocal) => {
                Ok(names::identifier(&param.name))
            }
            None => panic!("parameter '{}' has no declaration in the {} stage", param.name, self.ctx.stage),
        }
    }

    fn expr(&mut self, handle: Handle<CodeNode>, err: &mut dyn ErrorReporter) -> GenResult<String> {
        let n = self.node(handle);
        match n.op {
            OpCode::Const => match &n.value {
                Some(value @ DataValue::Components(_)) => Ok(names::value_literal(self.lib, &n.ty, value)),
                Some(DataValue::Resource(p)) => match self.interface.spellings.get(p) {
                    Some(Spelling::Name(name)) => Ok(name.clone()),
                    _ => panic!("bound resource '{}' was not declared", self.lib.param(*p).name),
                },
                _ => panic!("constant without a runtime value at {}", n.location),
            },
            OpCode::ParamRef => self.param_expr(n, err),
            OpCode::Load => self.expr(n.children[0], err),
            OpCode::ReadSwizzle => {
                let Some(swizzle) = n.swizzle() else {
                    panic!("ReadSwizzle without components at {}", n.location);
                };
                let base_ty = self.node(n.children[0]).ty;
                let base = self.expr(n.children[0], err)?;
                if base_ty.is_scalar() {
                    return Ok(if swizzle.len() == 1 {
                        base
                    } else {
                        format!("{}({base})", self.lib.type_name(&n.ty))
                    });
                }
                Ok(format!("{base}.{swizzle}"))
            }
            OpCode::AccessMember => {
                let Some((member, index)) = n.member() else {
                    panic!("AccessMember without a member at {}", n.location);
                };
                if let Some(Spelling::VertexStruct { members, .. }) = self.spelling(self.node(n.children[0])) {
                    return Ok(members[index as usize].clone());
                }
                let base = self.expr(n.children[0], err)?;
                Ok(format!("{base}.{}", names::identifier(member)))
            }
            OpCode::AccessArray => self.access_array(n, err),
            OpCode::NativeCall => self.native_call(n, err),
            OpCode::Call => {
                let Some(Callee::Folded(callee)) = n.callee() else {
                    panic!("unfolded call at {}", n.location);
                };
                let args = self.exprs(&n.children, err)?;
                Ok(format!("{}({})", self.function_name(*callee), args.join(", ")))
            }
            OpCode::Store => self.store(n, err),
            op => panic!("{op} is not an expression (at {})", n.location),
        }
    }

    fn exprs(&mut self, handles: &[Handle<CodeNode>], err: &mut dyn ErrorReporter) -> GenResult<Vec<String>> {
        handles.iter().map(|&h| self.expr(h, err)).collect()
    }

    fn access_array(&mut self, n: &'a CodeNode, err: &mut dyn ErrorReporter) -> GenResult<String> {
        let [base, index] = [n.children[0], n.children[1]];
        let base_node = self.node(base);
        if let Some(r) = base_node.ty.resource().copied() {
            let name = self.expr(base, err)?;
            if r.is_structured_buffer() {
                let index = self.expr(index, err)?;
                return Ok(format!("{name}.data[{index}]"));
            }
            let coordinate = self.coordinate(index, err)?;
            if r.is_image() {
                return Ok(format!("imageLoad({name}, {coordinate}){}", names::element_swizzle(&r)));
            }
            if r.multisampled || names::is_constant_buffer(&r) {
                err.report_error(&n.location, "this resource cannot be indexed");
                return Err(ErrorReported);
            }
            return Ok(format!("texelFetch({name}, {coordinate}, 0)"));
        }
        if let Some(&Spelling::PerVertex(member)) = self.spelling(base_node) {
            let index = self.expr(index, err)?;
            return Ok(format!("gl_in[{index}].{member}"));
        }
        let base = self.expr(base, err)?;
        let index = self.expr(index, err)?;
        Ok(format!("{base}[{index}]"))
    }

    /// Widens scalar arguments to the vector width of the result.
    fn splat(&self, arg: String, arg_ty: &DataType, width: Option<u8>) -> String {
        match (arg_ty.scalar_kind(), width) {
            (Some(kind), Some(n)) if arg_ty.is_scalar() && n > 1 => format!("{}vec{n}({arg})", kind.vector_prefix()),
            _ => arg,
        }
    }

    fn native_call(&mut self, n: &'a CodeNode, err: &mut dyn ErrorReporter) -> GenResult<String> {
        use NativeFunction as N;

        let Some(native) = n.native() else {
            panic!("NativeCall without a function at {}", n.location);
        };
        if native.is_atomic() {
            return self.atomic(n, native, err);
        }
        let types: Vec<DataType> = n.children.iter().map(|&c| self.node(c).ty).collect();
        let width = n.ty.component_count();
        let call = |name: &str, args: &[String]| format!("{name}({})", args.join(", "));

        // texture operations take the resource by name
        match native {
            N::Texture | N::TextureLod | N::TextureBias | N::TextureGather => {
                let r = self.resource_of(n.children[0]);
                let args = self.exprs(&n.children, err)?;
                let name = match native {
                    N::TextureLod => "textureLod",
                    N::TextureGather => "textureGather",
                    _ => "texture",
                };
                let depth = if r.depth && native != N::TextureGather { ".x" } else { "" };
                return Ok(format!("{}{depth}", call(name, &args)));
            }
            N::TextureSize => {
                let r = self.resource_of(n.children[0]);
                let args = self.exprs(&n.children, err)?;
                return Ok(if r.is_structured_buffer() {
                    format!("int({}.data.length())", args[0])
                } else if r.is_image() {
                    call("imageSize", &args[..1])
                } else {
                    call("textureSize", &args)
                });
            }
            N::TexelLoad | N::TexelLoadSample => {
                let r = self.resource_of(n.children[0]);
                let name = self.expr(n.children[0], err)?;
                let coordinate = self.coordinate(n.children[1], err)?;
                if r.is_image() {
                    return Ok(format!("imageLoad({name}, {coordinate}){}", names::element_swizzle(&r)));
                }
                let sample = match n.children.get(2) {
                    Some(&s) => self.expr(s, err)?,
                    None => "0".to_string(),
                };
                return Ok(format!("texelFetch({name}, {coordinate}, {sample})"));
            }
            N::TexelStore => {
                let r = self.resource_of(n.children[0]);
                let name = self.expr(n.children[0], err)?;
                let coordinate = self.coordinate(n.children[1], err)?;
                let value = self.expr(n.children[2], err)?;
                return Ok(format!("imageStore({name}, {coordinate}, {})", names::widen_to_vec4(&r, &value)));
            }
            _ => {}
        }

        let args = self.exprs(&n.children, err)?;
        let binary = |op: &str| format!("({} {op} {})", args[0], args[1]);
        let vector_result = n.ty.is_vector();
        let text = match native {
            N::Add => binary("+"),
            N::Sub => binary("-"),
            N::Mul => binary("*"),
            N::Div => binary("/"),
            N::Mod if n.ty.scalar_kind() == Some(ScalarKind::Float) => call("mod", &args),
            N::Mod => binary("%"),
            N::Neg => format!("(-{})", args[0]),
            N::LogicalNot if types[0].is_vector() => call("not", &args),
            N::LogicalNot => format!("(!{})", args[0]),
            N::BitNot => format!("(~{})", args[0]),
            N::BitAnd => binary("&"),
            N::BitOr => binary("|"),
            N::BitXor => binary("^"),
            N::Shl => binary("<<"),
            N::Shr => binary(">>"),
            N::LogicAnd => binary("&&"),
            N::LogicOr => binary("||"),
            N::Eq | N::Ne | N::Lt | N::Le | N::Gt | N::Ge if vector_result => {
                let name = match native {
                    N::Eq => "equal",
                    N::Ne => "notEqual",
                    N::Lt => "lessThan",
                    N::Le => "lessThanEqual",
                    N::Gt => "greaterThan",
                    _ => "greaterThanEqual",
                };
                let args: Vec<_> = args
                    .into_iter()
                    .zip(&types)
                    .map(|(a, ty)| self.splat(a, ty, width))
                    .collect();
                call(name, &args)
            }
            N::Eq => binary("=="),
            N::Ne => binary("!="),
            N::Lt => binary("<"),
            N::Le => binary("<="),
            N::Gt => binary(">"),
            N::Ge => binary(">="),
            N::Select if types[0].is_vector() => {
                format!("mix({}, {}, {})", args[2], args[1], args[0])
            }
            N::Select => format!("({} ? {} : {})", args[0], args[1], args[2]),
            N::Construct => call(&names::constructor(self.lib, &n.ty), &args),

            N::Pow | N::Atan2 | N::Min | N::Max | N::Clamp => {
                let name = match native {
                    N::Pow => "pow",
                    N::Atan2 => "atan",
                    N::Min => "min",
                    N::Max => "max",
                    _ => "clamp",
                };
                let args: Vec<_> = args
                    .into_iter()
                    .zip(&types)
                    .map(|(a, ty)| self.splat(a, ty, width))
                    .collect();
                call(name, &args)
            }
            N::Mix => {
                let mut args = args;
                for (i, ty) in types.iter().enumerate().take(2) {
                    args[i] = self.splat(std::mem::take(&mut args[i]), ty, width);
                }
                call("mix", &args)
            }
            N::Saturate => format!("clamp({}, 0.0, 1.0)", args[0]),
            N::Rsqrt => call("inversesqrt", &args),
            N::Ddx => call("dFdx", &args),
            N::Ddy => call("dFdy", &args),
            N::Any | N::All if types[0].is_scalar() => args[0].clone(),
            N::AsFloat | N::AsInt | N::AsUint => self.bit_cast(native, &types[0], &n.ty, &args[0]),
            N::Barrier => "barrier()".to_string(),
            N::GroupMemoryBarrier => "groupMemoryBarrier()".to_string(),
            N::EmitVertex => "EmitVertex()".to_string(),
            N::EndPrimitive => "EndPrimitive()".to_string(),
            // remaining intrinsics share their GLSL name
            other => call(other.name(), &args),
        };
        Ok(text)
    }

    fn bit_cast(&self, native: NativeFunction, from: &DataType, to: &DataType, arg: &str) -> String {
        let from_kind = from.scalar_kind().unwrap_or(ScalarKind::Float);
        let convert = || format!("{}({arg})", self.lib.type_name(to));
        match (native, from_kind) {
            (NativeFunction::AsFloat, ScalarKind::Int) => format!("intBitsToFloat({arg})"),
            (NativeFunction::AsFloat, ScalarKind::Uint) => format!("uintBitsToFloat({arg})"),
            (NativeFunction::AsInt, ScalarKind::Float) => format!("floatBitsToInt({arg})"),
            (NativeFunction::AsUint, ScalarKind::Float) => format!("floatBitsToUint({arg})"),
            (NativeFunction::AsFloat, ScalarKind::Float)
            | (NativeFunction::AsInt, ScalarKind::Int)
            | (NativeFunction::AsUint, ScalarKind::Uint) => arg.to_string(),
            _ => convert(),
        }
    }

    fn atomic(&mut self, n: &'a CodeNode, native: NativeFunction, err: &mut dyn ErrorReporter) -> GenResult<String> {
        use NativeFunction as N;

        let op = match native {
            N::AtomicAdd | N::AtomicIncrement => "Add",
            N::AtomicMin => "Min",
            N::AtomicMax => "Max",
            N::AtomicAnd => "And",
            N::AtomicOr => "Or",
            N::AtomicXor => "Xor",
            N::AtomicExchange => "Exchange",
            _ => "CompSwap",
        };
        let target = n.children[0];
        let mut operands = self.exprs(&n.children[1..], err)?;
        if native == N::AtomicIncrement {
            let kind = self.node(target).ty.scalar_kind().unwrap_or(ScalarKind::Int);
            operands.push(names::scalar_literal(Component::Int(1), kind));
        }
        if let Some((image, coordinate)) = self.image_element(target) {
            let name = self.expr(image, err)?;
            let coordinate = self.coordinate(coordinate, err)?;
            return Ok(format!("imageAtomic{op}({name}, {coordinate}, {})", operands.join(", ")));
        }
        if self.inside_image_element(target) {
            err.report_error(&n.location, "atomics on image elements need the whole element");
            return Err(ErrorReported);
        }
        let place = self.expr(target, err)?;
        Ok(format!("atomic{op}({place}, {})", operands.join(", ")))
    }
}
