//! Function folding: specializing functions against a program instance.
//!
//! A folded function is a copy of a source function in which every
//! compile-time constant has been replaced by its value, calls have been
//! bound to folded callees, constant call arguments have moved into the
//! callee's key, and every constant sub-expression has been evaluated.
//! The remaining code only touches runtime values.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use shadec_ir::{
    Arena, Callee, CodeLibrary, CodeNode, DataParameter, DataType, DataValue, ErrorReported, ErrorReporter,
    FoldedFunction, FoldedFunctionKey, Function, Handle, KeyBuilder, Location, LoopKind, NativeFunction,
    NodeExtra, OpCode, ParameterScope, ProgramConstants, ProgramInstance,
};

use crate::eval::{Evaluator, access_components, fold_native};
use crate::instance::InstanceCache;

/// Name of the stage entry point every exported shader provides.
pub const ENTRY_POINT: &str = "main";

/// Nested specializations of one function allowed while folding.
pub const MAX_SPECIALIZATION_DEPTH: usize = 64;

#[derive(Debug)]
struct Context {
    function: Handle<Function>,
    instance: Arc<ProgramInstance>,
    bindings: FxHashMap<Handle<DataParameter>, DataValue>,
}

/// A folding session over one library. Folded code lives in the
/// session's own node arena; parameters are shared with the library.
#[derive(Debug)]
pub struct FunctionFolder<'a> {
    lib: &'a CodeLibrary,
    instances: &'a InstanceCache,
    nodes: Arena<CodeNode>,
    functions: Arena<FoldedFunction>,
    memo: FxHashMap<FoldedFunctionKey, Handle<FoldedFunction>>,
    resolved: FxHashMap<(u64, Handle<DataParameter>), DataValue>,
    /// Source functions whose folding has started but not finished.
    in_progress: Vec<Handle<Function>>,
}

impl<'a> FunctionFolder<'a> {
    pub fn new(lib: &'a CodeLibrary, instances: &'a InstanceCache) -> Self {
        Self {
            lib,
            instances,
            nodes: Arena::new(),
            functions: Arena::new(),
            memo: FxHashMap::default(),
            resolved: FxHashMap::default(),
            in_progress: Vec::new(),
        }
    }

    pub fn library(&self) -> &'a CodeLibrary {
        self.lib
    }

    pub fn node(&self, handle: Handle<CodeNode>) -> &CodeNode {
        &self.nodes[handle]
    }

    pub fn nodes(&self) -> &Arena<CodeNode> {
        &self.nodes
    }

    pub fn function(&self, handle: Handle<FoldedFunction>) -> &FoldedFunction {
        &self.functions[handle]
    }

    pub fn functions(&self) -> &Arena<FoldedFunction> {
        &self.functions
    }

    /// Folds the entry point of an instanced program.
    pub fn fold_entry_point(
        &mut self,
        instance: &Arc<ProgramInstance>,
        use_site: &Location,
        err: &mut dyn ErrorReporter,
    ) -> Result<Handle<FoldedFunction>, ErrorReported> {
        let program = self.lib.program(instance.program);
        let Some(main) = self.lib.find_function(instance.program, ENTRY_POINT, true) else {
            err.report_error(use_site, &format!("shader '{}' has no '{ENTRY_POINT}' function", program.name));
            return Err(ErrorReported);
        };
        let func = self.lib.function(main);
        if !func.inputs.is_empty() || !func.return_type.is_void() {
            err.report_error(
                &func.location,
                &format!("'{ENTRY_POINT}' of '{}' must take no arguments and return void", program.name),
            );
            return Err(ErrorReported);
        }
        self.fold_function(main, instance, Vec::new(), err)
    }

    /// Folds `function` against `instance` with some inputs bound to
    /// constants. Equal requests return the same folded function.
    pub fn fold_function(
        &mut self,
        function: Handle<Function>,
        instance: &Arc<ProgramInstance>,
        mut constant_args: Vec<(Handle<DataParameter>, DataValue)>,
        err: &mut dyn ErrorReporter,
    ) -> Result<Handle<FoldedFunction>, ErrorReported> {
        constant_args.sort_by_key(|(p, _)| *p);
        let key = FoldedFunctionKey {
            function,
            instance: instance.key,
            constant_args,
        };
        if let Some(&folded) = self.memo.get(&key) {
            return Ok(folded);
        }

        let lib = self.lib;
        let func = lib.function(function);
        let Some(body) = func.code else {
            err.report_error(&func.location, &format!("function '{}' is declared but never defined", func.name));
            return Err(ErrorReported);
        };
        let depth = self.in_progress.iter().filter(|&&f| f == function).count();
        if depth >= MAX_SPECIALIZATION_DEPTH {
            err.report_error(
                &func.location,
                &format!(
                    "specialization of '{}' does not terminate ({MAX_SPECIALIZATION_DEPTH} nested constant-argument variants)",
                    func.name
                ),
            );
            return Err(ErrorReported);
        }
        let name = format!("{}_{:016x}", func.name, folded_key_hash(lib, &key));
        let inputs = func
            .inputs
            .iter()
            .copied()
            .filter(|i| !key.constant_args.iter().any(|(p, _)| p == i))
            .collect();
        let handle = self.functions.append(FoldedFunction {
            key: key.clone(),
            name,
            original: function,
            instance: instance.clone(),
            inputs,
            return_type: func.return_type,
            code: None,
            attributes: func.attributes.clone(),
            location: func.location.clone(),
        });
        // Registered before the body so recursive calls find it.
        self.memo.insert(key.clone(), handle);

        let ctx = Context {
            function,
            instance: instance.clone(),
            bindings: key.constant_args.iter().cloned().collect(),
        };
        self.in_progress.push(function);
        let folded = self.fold_node(&ctx, body, err);
        self.in_progress.pop();
        match folded {
            Ok(code) => {
                self.functions[handle].code = Some(code);
                log::trace!("folded '{}'", self.functions[handle].name);
                Ok(handle)
            }
            Err(e) => {
                self.memo.remove(&key);
                Err(e)
            }
        }
    }

    fn error(&self, ctx: &Context, err: &mut dyn ErrorReporter, location: &Location, message: &str) -> ErrorReported {
        let func = self.lib.function(ctx.function);
        let program = &self.lib.program(ctx.instance.program).name;
        err.report_error(location, &format!("{message} (in '{}' of '{program}')", func.name));
        ErrorReported
    }

    fn push(&mut self, node: CodeNode) -> Handle<CodeNode> {
        self.nodes.append(node)
    }

    fn constant_node(&mut self, value: DataValue, ty: DataType, location: &Location) -> Handle<CodeNode> {
        self.push(CodeNode::constant(value, ty, location.clone()))
    }

    fn const_value(&self, node: Handle<CodeNode>) -> Option<&DataValue> {
        let n = &self.nodes[node];
        match n.op {
            OpCode::Const => n.value.as_ref(),
            _ => None,
        }
    }

    fn rebuild(&mut self, n: &CodeNode, children: Vec<Handle<CodeNode>>) -> Handle<CodeNode> {
        let mut copy = n.clone();
        copy.children = children;
        self.push(copy)
    }

    fn fold_children(
        &mut self,
        ctx: &Context,
        n: &CodeNode,
        err: &mut dyn ErrorReporter,
    ) -> Result<Vec<Handle<CodeNode>>, ErrorReported> {
        n.children.iter().map(|&c| self.fold_node(ctx, c, err)).collect()
    }

    fn fold_node(
        &mut self,
        ctx: &Context,
        node: Handle<CodeNode>,
        err: &mut dyn ErrorReporter,
    ) -> Result<Handle<CodeNode>, ErrorReported> {
        let lib = self.lib;
        let n = lib.node(node);
        match n.op {
            OpCode::Nop | OpCode::Const | OpCode::Break | OpCode::Continue | OpCode::Exit => Ok(self.push(n.clone())),
            OpCode::ParamRef => self.fold_param_ref(ctx, n, err),
            OpCode::Load => {
                let target = self.fold_node(ctx, n.children[0], err)?;
                if self.const_value(target).is_some() {
                    return Ok(target);
                }
                Ok(self.rebuild(n, vec![target]))
            }
            OpCode::AccessMember | OpCode::AccessArray | OpCode::ReadSwizzle => {
                let children = self.fold_children(ctx, n, err)?;
                if let Some(DataValue::Components(base)) = self.const_value(children[0]) {
                    let index = children.get(1).map(|&i| self.const_value(i));
                    if index != Some(None) {
                        let base_ty = self.nodes[children[0]].ty;
                        if let Ok(indices) = access_components(lib, n, &base_ty, index.flatten()) {
                            let picked = indices.iter().filter_map(|&i| base.get(i).copied()).collect::<Vec<_>>();
                            if picked.len() == indices.len() {
                                return Ok(self.constant_node(DataValue::Components(picked), n.ty, &n.location));
                            }
                        }
                    }
                }
                Ok(self.rebuild(n, children))
            }
            OpCode::NativeCall => self.fold_native_call(ctx, n, err),
            OpCode::Call => self.fold_call(ctx, n, err),
            OpCode::IfElse => {
                let cond = self.fold_node(ctx, n.children[0], err)?;
                match self.const_value(cond).and_then(DataValue::as_scalar).and_then(|c| c.as_bool()) {
                    Some(true) => self.fold_node(ctx, n.children[1], err),
                    Some(false) => self.fold_node(ctx, n.children[2], err),
                    None => {
                        let then = self.fold_node(ctx, n.children[1], err)?;
                        let other = self.fold_node(ctx, n.children[2], err)?;
                        Ok(self.rebuild(n, vec![cond, then, other]))
                    }
                }
            }
            OpCode::Loop => {
                let cond = self.fold_node(ctx, n.children[0], err)?;
                let never = n.loop_kind() == LoopKind::PreCondition
                    && self.const_value(cond).and_then(DataValue::as_scalar).and_then(|c| c.as_bool()) == Some(false);
                if never {
                    return Ok(self.push(CodeNode::new(OpCode::Nop, n.location.clone())));
                }
                let body = self.fold_node(ctx, n.children[1], err)?;
                let step = self.fold_node(ctx, n.children[2], err)?;
                Ok(self.rebuild(n, vec![cond, body, step]))
            }
            OpCode::Scope | OpCode::Store | OpCode::Return => {
                let children = self.fold_children(ctx, n, err)?;
                Ok(self.rebuild(n, children))
            }
        }
    }

    fn fold_param_ref(
        &mut self,
        ctx: &Context,
        n: &CodeNode,
        err: &mut dyn ErrorReporter,
    ) -> Result<Handle<CodeNode>, ErrorReported> {
        let lib = self.lib;
        let Some(p) = n.param() else {
            panic!("ParamRef node without a parameter at {}", n.location);
        };
        if let Some(bound) = ctx.bindings.get(&p) {
            return Ok(match bound {
                DataValue::Resource(r) => self.push(
                    CodeNode::new(OpCode::ParamRef, n.location.clone())
                        .with_type(lib.param(*r).ty)
                        .with_extra(NodeExtra::Param(*r)),
                ),
                value => self.constant_node(value.clone(), n.ty, &n.location),
            });
        }
        if lib.param(p).scope == ParameterScope::GlobalConst {
            let value = self.constant(ctx, p, &n.location, err)?;
            return Ok(self.constant_node(value, n.ty, &n.location));
        }
        Ok(self.push(n.clone()))
    }

    /// Value of a constant as seen from the instance being folded:
    /// instance constants directly, anything else (global constants,
    /// other programs' defaults) evaluated once per instance.
    fn constant(
        &mut self,
        ctx: &Context,
        param: Handle<DataParameter>,
        location: &Location,
        err: &mut dyn ErrorReporter,
    ) -> Result<DataValue, ErrorReported> {
        let instance = &ctx.instance;
        if let Some(v) = instance.constants.get(param).filter(|v| v.is_defined()) {
            return Ok(v.clone());
        }
        let slot = (instance.key, param);
        if let Some(v) = self.resolved.get(&slot) {
            return Ok(v.clone());
        }
        let lib = self.lib;
        let name = &lib.param(param).name;
        match Evaluator::new(lib, Some(instance.program), &instance.constants).constant_value(param, location) {
            Ok(v) if v.is_defined() => {
                self.resolved.insert(slot, v.clone());
                Ok(v)
            }
            Ok(_) => Err(self.error(ctx, err, location, &format!("constant '{name}' has no defined value"))),
            Err(e) => Err(self.error(ctx, err, location, &e.to_string())),
        }
    }

    fn fold_native_call(
        &mut self,
        ctx: &Context,
        n: &CodeNode,
        err: &mut dyn ErrorReporter,
    ) -> Result<Handle<CodeNode>, ErrorReported> {
        let Some(native) = n.native() else {
            panic!("NativeCall node without a function at {}", n.location);
        };
        let as_bool = |this: &Self, h: Handle<CodeNode>| {
            this.const_value(h).and_then(DataValue::as_scalar).and_then(|c| c.as_bool())
        };
        // Only the taken operand of a constant condition is folded.
        let mut children = Vec::with_capacity(n.children.len());
        match native {
            NativeFunction::Select => {
                let cond = self.fold_node(ctx, n.children[0], err)?;
                match as_bool(self, cond) {
                    Some(true) => return self.fold_node(ctx, n.children[1], err),
                    Some(false) => return self.fold_node(ctx, n.children[2], err),
                    None => children.push(cond),
                }
            }
            NativeFunction::LogicAnd | NativeFunction::LogicOr => {
                let short = native == NativeFunction::LogicOr;
                let lhs = self.fold_node(ctx, n.children[0], err)?;
                match as_bool(self, lhs) {
                    Some(b) if b == short => return Ok(self.constant_node(DataValue::bool(short), n.ty, &n.location)),
                    Some(_) => return self.fold_node(ctx, n.children[1], err),
                    None => children.push(lhs),
                }
            }
            _ => {}
        }
        for &c in &n.children[children.len()..] {
            children.push(self.fold_node(ctx, c, err)?);
        }

        if !native.has_side_effects() {
            let values: Option<Vec<DataValue>> = children.iter().map(|&c| self.const_value(c).cloned()).collect();
            if let Some(values) = values {
                let folded = if native == NativeFunction::Construct {
                    self.lib.construct_value(&n.ty, &values)
                } else {
                    let types: Vec<DataType> = children.iter().map(|&c| self.nodes[c].ty).collect();
                    fold_native(native, &types, &values, &n.ty)
                };
                if let Some(value) = folded.filter(DataValue::is_defined) {
                    return Ok(self.constant_node(value, n.ty, &n.location));
                }
            }
        }
        Ok(self.rebuild(n, children))
    }

    fn fold_call(
        &mut self,
        ctx: &Context,
        n: &CodeNode,
        err: &mut dyn ErrorReporter,
    ) -> Result<Handle<CodeNode>, ErrorReported> {
        let lib = self.lib;
        let program = ctx.instance.program;
        let (function, instance, args) = match n.callee() {
            Some(Callee::Global(f)) => (*f, ctx.instance.clone(), &n.children[..]),
            Some(Callee::Program { name }) => {
                let Some(f) = lib.find_function(program, name, true) else {
                    let message = format!("no function '{name}' in '{}'", lib.program(program).name);
                    return Err(self.error(ctx, err, &n.location, &message));
                };
                (f, ctx.instance.clone(), &n.children[..])
            }
            Some(Callee::ProgramMember { name }) => {
                let object = self.fold_node(ctx, n.children[0], err)?;
                let Some(&DataValue::Program(target)) = self.const_value(object) else {
                    let message = format!("'{name}' is called on a shader that is not a compile-time constant");
                    return Err(self.error(ctx, err, &n.location, &message));
                };
                let Some(f) = lib.find_function(target, name, true) else {
                    let message = format!("no function '{name}' in '{}'", lib.program(target).name);
                    return Err(self.error(ctx, err, &n.location, &message));
                };
                let instance =
                    self.instances
                        .create_program_instance(lib, target, &ProgramConstants::new(), &n.location, err)?;
                (f, instance, &n.children[1..])
            }
            Some(Callee::Folded(_)) | None => panic!("unresolved call in source code at {}", n.location),
        };

        let func = lib.function(function);
        let mut constant_args = Vec::new();
        let mut runtime = Vec::new();
        for (&input, &arg) in func.inputs.iter().zip(args) {
            let folded = self.fold_node(ctx, arg, err)?;
            let f = &self.nodes[folded];
            if let Some(value) = self.const_value(folded).filter(|v| v.is_defined()) {
                constant_args.push((input, value.clone()));
            } else if f.ty.is_resource() {
                let static_ref = f
                    .param()
                    .filter(|&p| f.op == OpCode::ParamRef && lib.param(p).scope == ParameterScope::GlobalParameter);
                let Some(resource) = static_ref else {
                    let message = format!(
                        "resource argument '{}' of '{}' must be a descriptor resource, not a runtime value",
                        lib.param(input).name,
                        func.name
                    );
                    return Err(self.error(ctx, err, &lib.node(arg).location, &message));
                };
                constant_args.push((input, DataValue::Resource(resource)));
            } else {
                runtime.push(folded);
            }
        }

        let callee = self.fold_function(function, &instance, constant_args, err)?;
        Ok(self.push(
            CodeNode::new(OpCode::Call, n.location.clone())
                .with_children(runtime)
                .with_type(n.ty)
                .with_extra(NodeExtra::Call(Callee::Folded(callee))),
        ))
    }
}

fn folded_key_hash(lib: &CodeLibrary, key: &FoldedFunctionKey) -> u64 {
    let mut builder = KeyBuilder::new();
    builder
        .str(&lib.function(key.function).name)
        .u32(key.function.raw())
        .u64(key.instance)
        .u32(key.constant_args.len() as u32);
    for (param, value) in &key.constant_args {
        builder.u32(param.raw());
        value.write_key(&mut builder, |p| lib.program(p).name.clone());
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use shadec_ir::CollectingReporter;

    #[test]
    fn folded_names_are_stable() {
        let mut lib = CodeLibrary::new();
        let program = lib.create_program("P", Default::default(), Location::internal());
        let body = lib.add_node(CodeNode::new(OpCode::Scope, Location::internal()));
        let main = lib.add_function(
            program,
            Function {
                name: ENTRY_POINT.into(),
                program: Some(program),
                return_type: DataType::VOID,
                inputs: Vec::new(),
                code: Some(body),
                attributes: Default::default(),
                location: Location::internal(),
            },
        );
        let cache = InstanceCache::new();
        let mut err = CollectingReporter::new();
        let instance = cache
            .create_program_instance(&lib, program, &ProgramConstants::new(), &Location::internal(), &mut err)
            .unwrap();

        let mut folder = FunctionFolder::new(&lib, &cache);
        let a = folder.fold_entry_point(&instance, &Location::internal(), &mut err).unwrap();
        let b = folder.fold_function(main, &instance, Vec::new(), &mut err).unwrap();
        assert_eq!(a, b);
        let name = &folder.function(a).name;
        assert!(name.starts_with("main_"), "{name}");
        assert_eq!(name.len(), "main_".len() + 16);
    }
}
