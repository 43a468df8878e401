//! Function bodies: statements and expressions.
//!
//! Expressions are typed as they are built. A value that names storage
//! (a parameter, a member or element of one, a swizzle of one) is a
//! *place*; reading it wraps the access chain in a `Load`, writing it makes
//! the chain the first child of a `Store`. Resources and program references
//! are never loaded.

use shadec_ir::{
    BaseType, Callee, CodeNode, Component, DataParameter, DataType, DataValue, DescriptorElement,
    Handle, Location, LoopKind, NativeFunction, NodeExtra, OpCode, ParameterScope, Program,
    ResourceAccess, ResourceKind, ScalarKind, Swizzle,
};

use crate::lexer::TokenKind;
use crate::parser::{PResult, Parser};
use crate::typeck::native_result_type;

/// A typed expression and whether it denotes storage.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Expr {
    pub node: Handle<CodeNode>,
    pub place: bool,
}

impl Expr {
    fn value(node: Handle<CodeNode>) -> Self {
        Self { node, place: false }
    }
}

fn binary_op(p: &str) -> Option<(u8, NativeFunction)> {
    use NativeFunction as N;
    Some(match p {
        "||" => (1, N::LogicOr),
        "&&" => (2, N::LogicAnd),
        "|" => (3, N::BitOr),
        "^" => (4, N::BitXor),
        "&" => (5, N::BitAnd),
        "==" => (6, N::Eq),
        "!=" => (6, N::Ne),
        "<" => (7, N::Lt),
        ">" => (7, N::Gt),
        "<=" => (7, N::Le),
        ">=" => (7, N::Ge),
        "<<" => (8, N::Shl),
        ">>" => (8, N::Shr),
        "+" => (9, N::Add),
        "-" => (9, N::Sub),
        "*" => (10, N::Mul),
        "/" => (10, N::Div),
        "%" => (10, N::Mod),
        _ => return None,
    })
}

/// `Some(None)` for plain `=`, `Some(Some(op))` for compound assignment.
fn assign_op(p: &str) -> Option<Option<NativeFunction>> {
    use NativeFunction as N;
    Some(match p {
        "=" => None,
        "+=" => Some(N::Add),
        "-=" => Some(N::Sub),
        "*=" => Some(N::Mul),
        "/=" => Some(N::Div),
        "%=" => Some(N::Mod),
        "&=" => Some(N::BitAnd),
        "|=" => Some(N::BitOr),
        "^=" => Some(N::BitXor),
        "<<=" => Some(N::Shl),
        ">>=" => Some(N::Shr),
        _ => return None,
    })
}

/// Literal kind conversions applied implicitly. Floats never become
/// integers and bools never convert.
fn literal_converts(from: ScalarKind, to: ScalarKind) -> bool {
    use ScalarKind::*;
    from == to || matches!((from, to), (Int, Uint) | (Int, Float) | (Uint, Float) | (Uint, Int))
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

impl Parser<'_> {
    fn scope_node(
        &mut self,
        statements: Vec<Handle<CodeNode>>,
        locals: Vec<Handle<DataParameter>>,
        location: Location,
    ) -> Handle<CodeNode> {
        self.add_node(
            CodeNode::new(OpCode::Scope, location)
                .with_children(statements)
                .with_extra(NodeExtra::Locals(locals)),
        )
    }

    fn nop(&mut self, location: Location) -> Handle<CodeNode> {
        self.add_node(CodeNode::new(OpCode::Nop, location))
    }

    /// `{ statements }` as a `Scope` node.
    pub(crate) fn parse_block(&mut self) -> PResult<Handle<CodeNode>> {
        let loc = self.expect_punct("{")?;
        self.scopes.push(Vec::new());
        let mut body = Vec::new();
        let result = loop {
            if self.eat_punct("}") {
                break Ok(());
            }
            if self.at_eof() {
                break Err(self.error(&loc, "unterminated block"));
            }
            if let Err(e) = self.parse_statement(&mut body) {
                break Err(e);
            }
        };
        let locals = self.scopes.pop().unwrap_or_default();
        result?;
        Ok(self.scope_node(body, locals, loc))
    }

    /// Body of `if`, `for` and friends, always as its own scope.
    fn parse_sub_statement(&mut self) -> PResult<Handle<CodeNode>> {
        if self.peek().is_punct("{") {
            return self.parse_block();
        }
        let loc = self.location();
        self.scopes.push(Vec::new());
        let mut body = Vec::new();
        let result = self.parse_statement(&mut body);
        let locals = self.scopes.pop().unwrap_or_default();
        result?;
        Ok(self.scope_node(body, locals, loc))
    }

    fn parse_condition(&mut self) -> PResult<Handle<CodeNode>> {
        let expr = self.parse_expression()?;
        let cond = self.value(expr);
        let n = self.node(cond);
        if n.ty != DataType::BOOL {
            let (loc, ty) = (n.location.clone(), self.lib.type_name(&n.ty));
            return Err(self.error(&loc, format!("condition must be bool, found '{ty}'")));
        }
        Ok(cond)
    }

    fn starts_declaration(&self) -> bool {
        let tok = self.peek();
        if tok.is_ident("const") {
            return true;
        }
        match tok.ident() {
            Some(word) => {
                (DataType::from_keyword(word).is_some() || self.lib.find_composite(word).is_some())
                    && self.peek_at(1).ident().is_some()
            }
            None => false,
        }
    }

    /// A declaration or expression statement, including its `;`.
    fn parse_simple_statement(&mut self, out: &mut Vec<Handle<CodeNode>>) -> PResult<()> {
        if self.starts_declaration() {
            let constant = self.eat_ident("const");
            return self.parse_local_declaration(out, constant);
        }
        let expr = self.parse_expression()?;
        out.push(self.value(expr));
        self.expect_punct(";")?;
        Ok(())
    }

    fn parse_statement(&mut self, out: &mut Vec<Handle<CodeNode>>) -> PResult<()> {
        let tok = self.peek().clone();
        let loc = tok.location.clone();
        match tok.ident() {
            Some("if") => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.parse_condition()?;
                self.expect_punct(")")?;
                let then = self.parse_sub_statement()?;
                let otherwise = if self.eat_ident("else") {
                    self.parse_sub_statement()?
                } else {
                    self.nop(loc.clone())
                };
                out.push(self.add_node(
                    CodeNode::new(OpCode::IfElse, loc).with_children(vec![cond, then, otherwise]),
                ));
            }
            Some("for") => {
                self.advance();
                self.expect_punct("(")?;
                self.scopes.push(Vec::new());
                let mut init = Vec::new();
                let result = self.parse_for(&mut init, loc.clone());
                let locals = self.scopes.pop().unwrap_or_default();
                init.push(result?);
                out.push(self.scope_node(init, locals, loc));
            }
            Some("while") => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.parse_condition()?;
                self.expect_punct(")")?;
                let body = self.parse_loop_body()?;
                let step = self.nop(loc.clone());
                out.push(self.loop_node(LoopKind::PreCondition, cond, body, step, loc));
            }
            Some("do") => {
                self.advance();
                let body = self.parse_loop_body()?;
                if !self.eat_ident("while") {
                    let here = self.location();
                    return Err(self.error(&here, "expected 'while' after do body"));
                }
                self.expect_punct("(")?;
                let cond = self.parse_condition()?;
                self.expect_punct(")")?;
                self.expect_punct(";")?;
                let step = self.nop(loc.clone());
                out.push(self.loop_node(LoopKind::PostCondition, cond, body, step, loc));
            }
            Some(word @ ("break" | "continue")) => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(self.error(&loc, format!("'{word}' outside of a loop")));
                }
                self.expect_punct(";")?;
                let op = if word == "break" { OpCode::Break } else { OpCode::Continue };
                out.push(self.add_node(CodeNode::new(op, loc)));
            }
            Some("return") => {
                self.advance();
                let node = self.parse_return(loc)?;
                out.push(node);
            }
            Some("discard") => {
                self.advance();
                self.expect_punct(";")?;
                out.push(self.add_node(CodeNode::new(OpCode::Exit, loc)));
            }
            _ if tok.is_punct("{") => {
                let block = self.parse_block()?;
                out.push(block);
            }
            _ if tok.is_punct(";") => {
                self.advance();
            }
            _ => self.parse_simple_statement(out)?,
        }
        Ok(())
    }

    fn parse_loop_body(&mut self) -> PResult<Handle<CodeNode>> {
        self.loop_depth += 1;
        let body = self.parse_sub_statement();
        self.loop_depth -= 1;
        body
    }

    fn loop_node(
        &mut self,
        kind: LoopKind,
        cond: Handle<CodeNode>,
        body: Handle<CodeNode>,
        step: Handle<CodeNode>,
        loc: Location,
    ) -> Handle<CodeNode> {
        self.add_node(
            CodeNode::new(OpCode::Loop, loc)
                .with_children(vec![cond, body, step])
                .with_extra(NodeExtra::Loop(kind)),
        )
    }

    /// The part of `for (...)` after the opening parenthesis.
    fn parse_for(&mut self, init: &mut Vec<Handle<CodeNode>>, loc: Location) -> PResult<Handle<CodeNode>> {
        if !self.eat_punct(";") {
            self.parse_simple_statement(init)?;
        }
        let cond = if self.peek().is_punct(";") {
            self.nop(loc.clone())
        } else {
            self.parse_condition()?
        };
        self.expect_punct(";")?;
        let step = if self.peek().is_punct(")") {
            self.nop(loc.clone())
        } else {
            let expr = self.parse_expression()?;
            self.value(expr)
        };
        self.expect_punct(")")?;
        let body = self.parse_loop_body()?;
        Ok(self.loop_node(LoopKind::PreCondition, cond, body, step, loc))
    }

    fn parse_return(&mut self, loc: Location) -> PResult<Handle<CodeNode>> {
        let return_type = self.return_type;
        if self.eat_punct(";") {
            if !return_type.is_void() {
                return Err(self.error(&loc, "missing return value"));
            }
            return Ok(self.add_node(CodeNode::new(OpCode::Return, loc)));
        }
        if return_type.is_void() {
            return Err(self.error(&loc, "void function cannot return a value"));
        }
        let expr = self.parse_expression()?;
        let value = self.value(expr);
        let value = self.coerce_to(value, &return_type)?;
        self.expect_punct(";")?;
        Ok(self.add_node(
            CodeNode::new(OpCode::Return, loc)
                .with_children(vec![value])
                .with_type(return_type),
        ))
    }

    /// `[const] Type a [= init], b[N];`
    fn parse_local_declaration(&mut self, out: &mut Vec<Handle<CodeNode>>, constant: bool) -> PResult<()> {
        let type_loc = self.location();
        let base = self.parse_type()?;
        if base.is_void() || base.is_resource() || base.program().is_some() {
            let name = self.lib.type_name(&base);
            return Err(self.error(&type_loc, format!("cannot declare a local of type '{name}'")));
        }
        loop {
            let (name, loc) = self.expect_ident()?;
            let ty = self.parse_array_suffix(base, false)?;
            let init = if self.eat_punct("=") {
                let expr = self.parse_expression()?;
                let value = self.value(expr);
                Some(self.coerce_to(value, &ty)?)
            } else if constant {
                return Err(self.error(&loc, format!("constant '{name}' needs an initializer")));
            } else {
                None
            };

            let duplicate = self
                .scopes
                .last()
                .is_some_and(|s| s.iter().any(|&h| self.lib.param(h).name == name));
            if duplicate {
                return Err(self.error(&loc, format!("'{name}' is already declared in this scope")));
            }
            let mut param = DataParameter::new(name, ParameterScope::ScopeLocal, ty, loc.clone());
            param.assignable = !constant;
            let local = self.lib.add_param(param);
            // Declared after the initializer so `float x = x;` sees the outer x.
            if let Some(scope) = self.scopes.last_mut() {
                scope.push(local);
            }
            if let Some(init) = init {
                let target = self.param_ref(local, loc.clone());
                out.push(self.add_node(
                    CodeNode::new(OpCode::Store, loc).with_children(vec![target.node, init]),
                ));
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(";")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

impl Parser<'_> {
    pub(crate) fn parse_expression(&mut self) -> PResult<Expr> {
        let lhs = self.parse_ternary()?;
        let tok = self.peek().clone();
        let op = match tok.kind {
            TokenKind::Punct(p) => assign_op(p),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(lhs);
        };
        self.advance();
        let rhs = self.parse_expression()?;
        let rhs = self.value(rhs);
        self.build_store(lhs, op, rhs, tok.location)
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let cond = self.parse_binary(1)?;
        if !self.peek().is_punct("?") {
            return Ok(cond);
        }
        let loc = self.advance().location;
        let cond = self.value(cond);
        let a = self.parse_expression()?;
        let a = self.value(a);
        self.expect_punct(":")?;
        let b = self.parse_ternary()?;
        let b = self.value(b);
        Ok(Expr::value(self.native_call(NativeFunction::Select, vec![cond, a, b], loc)?))
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Punct(p) => binary_op(p),
                _ => None,
            };
            let Some((prec, native)) = op.filter(|(prec, _)| *prec >= min_prec) else {
                break;
            };
            let loc = self.advance().location;
            let rhs = self.parse_binary(prec + 1)?;
            let l = self.value(lhs);
            let r = self.value(rhs);
            lhs = Expr::value(self.native_call(native, vec![l, r], loc)?);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        let TokenKind::Punct(p) = tok.kind else {
            return self.parse_postfix();
        };
        let native = match p {
            "+" => {
                self.advance();
                return self.parse_unary();
            }
            "++" | "--" => {
                self.advance();
                let target = self.parse_unary()?;
                return self.increment(target, p == "++", tok.location);
            }
            "-" => NativeFunction::Neg,
            "!" => NativeFunction::LogicalNot,
            "~" => NativeFunction::BitNot,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        let operand = self.value(operand);
        if native == NativeFunction::Neg && self.negate_literal(operand) {
            return Ok(Expr::value(operand));
        }
        Ok(Expr::value(self.native_call(native, vec![operand], tok.location)?))
    }

    /// Folds `-literal` into the literal itself.
    fn negate_literal(&mut self, node: Handle<CodeNode>) -> bool {
        if !self.is_literal(node) {
            return false;
        }
        let Some(DataValue::Components(comps)) = self.node(node).value.clone() else {
            return false;
        };
        let mut negated = Vec::with_capacity(comps.len());
        for c in comps {
            negated.push(match c {
                Component::Int(i) => Component::Int(i.wrapping_neg()),
                Component::Uint(u) => Component::Uint(u.wrapping_neg()),
                Component::Float(f) => Component::Float(-f),
                _ => return false,
            });
        }
        self.lib.nodes[node].value = Some(DataValue::Components(negated));
        true
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let tok = self.peek().clone();
            if tok.is_punct(".") {
                self.advance();
                let (name, loc) = self.expect_ident()?;
                expr = if self.peek().is_punct("(") {
                    self.member_call(expr, name, loc)?
                } else {
                    self.member_access(expr, &name, loc)?
                };
            } else if tok.is_punct("[") {
                self.advance();
                let index = self.parse_expression()?;
                self.expect_punct("]")?;
                expr = self.index(expr, index, tok.location)?;
            } else if tok.is_punct("++") || tok.is_punct("--") {
                self.advance();
                expr = self.increment(expr, tok.is_punct("++"), tok.location)?;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let tok = self.advance();
        let loc = tok.location.clone();
        match tok.kind {
            TokenKind::Int { value, unsigned } => {
                let (value, ty) = if unsigned || value > i32::MAX as u64 {
                    let v = u32::try_from(value)
                        .map_err(|_| self.error(&loc, format!("integer literal {value} is out of range")))?;
                    (DataValue::uint(v), DataType::UINT)
                } else {
                    (DataValue::int(value as i32), DataType::INT)
                };
                Ok(self.constant(value, ty, loc))
            }
            TokenKind::Float(v) => Ok(self.constant(DataValue::float(v as f32), DataType::FLOAT, loc)),
            TokenKind::Punct("(") => {
                let expr = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Ident(word) => match word.as_str() {
                "true" | "false" => Ok(self.constant(DataValue::bool(word == "true"), DataType::BOOL, loc)),
                _ if self.peek().is_punct("(") => self.parse_call(&word, loc),
                _ => self.resolve_name(&word, loc),
            },
            _ => Err(self.error(&loc, format!("expected an expression, found '{}'", tok.spelling()))),
        }
    }

    fn constant(&mut self, value: DataValue, ty: DataType, loc: Location) -> Expr {
        Expr::value(self.add_node(CodeNode::constant(value, ty, loc)))
    }

    /// `( expr, ... )`
    fn parse_arguments(&mut self) -> PResult<Vec<Expr>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn parse_argument_values(&mut self) -> PResult<Vec<Handle<CodeNode>>> {
        let args = self.parse_arguments()?;
        Ok(args.into_iter().map(|a| self.value(a)).collect())
    }
}

// ---------------------------------------------------------------------------
// Places and values
// ---------------------------------------------------------------------------

impl Parser<'_> {
    /// Reads an expression: places become `Load`s of their access chain.
    pub(crate) fn value(&mut self, expr: Expr) -> Handle<CodeNode> {
        if !expr.place {
            return expr.node;
        }
        let n = self.node(expr.node);
        if n.ty.is_resource() || n.ty.program().is_some() {
            return expr.node;
        }
        let (ty, loc) = (n.ty, n.location.clone());
        self.add_node(
            CodeNode::new(OpCode::Load, loc)
                .with_type(ty)
                .with_children(vec![expr.node]),
        )
    }

    fn param_ref(&mut self, param: Handle<DataParameter>, loc: Location) -> Expr {
        let ty = self.lib.param(param).ty;
        let node = self.add_node(
            CodeNode::new(OpCode::ParamRef, loc)
                .with_type(ty)
                .with_extra(NodeExtra::Param(param)),
        );
        Expr { node, place: true }
    }

    /// Deep copy of a code tree, for compound assignments that read and
    /// write the same place.
    fn clone_tree(&mut self, root: Handle<CodeNode>) -> Handle<CodeNode> {
        let mut node = self.node(root).clone();
        let children: Vec<_> = node.children.iter().map(|&c| self.clone_tree(c)).collect();
        node.children = children;
        self.add_node(node)
    }

    /// The parameter at the root of an access chain.
    fn root_param(&self, mut node: Handle<CodeNode>) -> Option<Handle<DataParameter>> {
        loop {
            let n = self.node(node);
            match n.op {
                OpCode::ParamRef => return n.param(),
                OpCode::AccessArray | OpCode::AccessMember | OpCode::ReadSwizzle => node = n.children[0],
                _ => return None,
            }
        }
    }

    fn check_store_target(&mut self, target: Expr, loc: &Location) -> PResult<()> {
        if !target.place {
            return Err(self.error(loc, "expression is not assignable"));
        }
        let mut node = target.node;
        while self.node(node).op != OpCode::ParamRef {
            let n = self.node(node);
            if n.swizzle().is_some_and(|s| s.has_duplicates()) {
                return Err(self.error(loc, "cannot assign to a swizzle with repeated components"));
            }
            node = n.children[0];
        }
        let Some(param) = self.root_param(target.node) else {
            return Err(self.error(loc, "expression is not assignable"));
        };
        let p = self.lib.param(param);
        let read_only = p.ty.resource().is_some_and(|r| r.access == ResourceAccess::UavReadOnly);
        if !p.assignable || read_only {
            let name = p.name.clone();
            return Err(self.error(loc, format!("cannot assign to '{name}'")));
        }
        Ok(())
    }

    fn build_store(
        &mut self,
        target: Expr,
        op: Option<NativeFunction>,
        rhs: Handle<CodeNode>,
        loc: Location,
    ) -> PResult<Expr> {
        self.check_store_target(target, &loc)?;
        let target_ty = self.node(target.node).ty;
        let value = match op {
            None => self.coerce_to(rhs, &target_ty)?,
            Some(native) => {
                let copy = self.clone_tree(target.node);
                let current = self.value(Expr { node: copy, place: true });
                let combined = self.native_call(native, vec![current, rhs], loc.clone())?;
                self.coerce_to(combined, &target_ty)?
            }
        };
        Ok(Expr::value(self.add_node(
            CodeNode::new(OpCode::Store, loc).with_children(vec![target.node, value]),
        )))
    }

    /// `++x`, `x--`: a store of `x +/- 1`; the expression itself is void.
    fn increment(&mut self, target: Expr, up: bool, loc: Location) -> PResult<Expr> {
        let ty = self.node(target.node).ty;
        let one = match ty.scalar_kind().filter(|_| ty.is_numeric()) {
            Some(ScalarKind::Int) => DataValue::int(1),
            Some(ScalarKind::Uint) => DataValue::uint(1),
            Some(ScalarKind::Float) => DataValue::float(1.0),
            _ => {
                let name = self.lib.type_name(&ty);
                return Err(self.error(&loc, format!("cannot increment a value of type '{name}'")));
            }
        };
        let one_ty = DataType::numeric(ty.scalar_kind().unwrap_or(ScalarKind::Int), 1);
        let one = self.add_node(CodeNode::constant(one, one_ty, loc.clone()));
        let native = if up { NativeFunction::Add } else { NativeFunction::Sub };
        self.build_store(target, Some(native), one, loc)
    }
}

// ---------------------------------------------------------------------------
// Literal coercion
// ---------------------------------------------------------------------------

impl Parser<'_> {
    fn is_literal(&self, node: Handle<CodeNode>) -> bool {
        let n = self.node(node);
        n.op == OpCode::Const && n.ty.is_numeric() && matches!(n.value, Some(DataValue::Components(_)))
    }

    /// Retypes a numeric literal in place. Returns `false` if the
    /// conversion is not implicit.
    fn convert_literal(&mut self, node: Handle<CodeNode>, kind: ScalarKind) -> bool {
        let n = &self.lib.nodes[node];
        let Some(from) = n.ty.scalar_kind() else {
            return false;
        };
        if !literal_converts(from, kind) {
            return false;
        }
        if from == kind {
            return true;
        }
        let ty = n.ty.with_kind(kind);
        let value = n.value.as_ref().map(|v| {
            DataValue::Components(v.components().iter().map(|c| c.convert(kind)).collect())
        });
        let n = &mut self.lib.nodes[node];
        n.ty = ty;
        n.value = value;
        true
    }

    fn derives_from(&self, program: Handle<Program>, base: Handle<Program>) -> bool {
        program == base
            || self
                .lib
                .program(program)
                .parents
                .iter()
                .any(|&p| self.derives_from(p, base))
    }

    /// Checks that `node` can be used as a `target` value, converting
    /// literals as needed.
    pub(crate) fn coerce_to(&mut self, node: Handle<CodeNode>, target: &DataType) -> PResult<Handle<CodeNode>> {
        let ty = self.node(node).ty;
        if ty == *target {
            return Ok(node);
        }
        if let (Some(from), Some(to)) = (ty.program(), target.program()) {
            if self.derives_from(from, to) {
                return Ok(node);
            }
        }
        if let Some(kind) = target.scalar_kind() {
            if self.is_literal(node) && ty.with_kind(kind) == *target && self.convert_literal(node, kind) {
                return Ok(node);
            }
        }
        let loc = self.node(node).location.clone();
        let (from, to) = (self.lib.type_name(&ty), self.lib.type_name(target));
        Err(self.error(&loc, format!("cannot convert '{from}' to '{to}'")))
    }

    /// Converts literal arguments to the kind of the first non-literal
    /// numeric argument (or to float if any literal is a float).
    fn unify_literals(&mut self, native: NativeFunction, args: &[Handle<CodeNode>]) {
        if args.first().is_some_and(|&a| self.node(a).ty.is_resource()) {
            return;
        }
        let skip = usize::from(native == NativeFunction::Select);
        let candidates = &args[skip.min(args.len())..];
        let dominant = candidates
            .iter()
            .filter(|&&a| !self.is_literal(a))
            .find_map(|&a| self.node(a).ty.scalar_kind())
            .or_else(|| {
                candidates
                    .iter()
                    .any(|&a| self.node(a).ty.scalar_kind() == Some(ScalarKind::Float))
                    .then_some(ScalarKind::Float)
            });
        let Some(kind) = dominant else {
            return;
        };
        for &a in candidates {
            if self.is_literal(a) {
                self.convert_literal(a, kind);
            }
        }
    }

    pub(crate) fn native_call(
        &mut self,
        native: NativeFunction,
        args: Vec<Handle<CodeNode>>,
        loc: Location,
    ) -> PResult<Handle<CodeNode>> {
        self.unify_literals(native, &args);
        if matches!(native, NativeFunction::TextureLod | NativeFunction::TextureBias) && args.len() == 3 {
            if self.is_literal(args[2]) {
                self.convert_literal(args[2], ScalarKind::Float);
            }
        }
        let types: Vec<DataType> = args.iter().map(|&a| self.node(a).ty).collect();
        let ty = native_result_type(native, &types).map_err(|msg| self.error(&loc, msg))?;
        Ok(self.add_node(
            CodeNode::new(OpCode::NativeCall, loc)
                .with_type(ty)
                .with_children(args)
                .with_extra(NodeExtra::Native(native)),
        ))
    }
}

// ---------------------------------------------------------------------------
// Names, members, calls
// ---------------------------------------------------------------------------

impl Parser<'_> {
    fn resolve_name(&mut self, name: &str, loc: Location) -> PResult<Expr> {
        let found = self
            .scopes
            .iter()
            .rev()
            .flat_map(|s| s.iter().rev())
            .chain(self.inputs.iter())
            .copied()
            .find(|&h| self.lib.param(h).name == name)
            .or_else(|| self.program.and_then(|p| self.lib.find_parameter(p, name, true)))
            .or_else(|| self.lib.find_global_constant(name));
        if let Some(param) = found {
            return Ok(self.param_ref(param, loc));
        }

        let matches = self.lib.find_descriptor_members(name);
        match matches.as_slice() {
            [only] => return Ok(self.descriptor_ref(only.element, loc)),
            [] => {}
            many => {
                let tables: Vec<&str> = many
                    .iter()
                    .map(|m| self.lib.tables[m.element.table].name.as_str())
                    .collect();
                let message = format!(
                    "'{name}' is ambiguous between descriptors {}; qualify it as <Descriptor>_{name}",
                    tables.join(", ")
                );
                return Err(self.error(&loc, message));
            }
        }
        if let Some(element) = self.qualified_descriptor_member(name) {
            return Ok(self.descriptor_ref(element, loc));
        }
        if let Some(param) = self.lib.create_builtin_parameter_reference(self.program, name) {
            return Ok(self.param_ref(param, loc));
        }
        if let Some(program) = self.lib.find_program(name) {
            let ty = DataType::new(BaseType::Program(program));
            return Ok(self.constant(DataValue::Program(program), ty, loc));
        }
        Err(self.error(&loc, format!("unknown identifier '{name}'")))
    }

    fn descriptor_ref(&mut self, element: DescriptorElement, loc: Location) -> Expr {
        let param = self.lib.create_descriptor_element_reference(self.program, element);
        self.param_ref(param, loc)
    }

    /// `Table_Member` spelled out explicitly.
    fn qualified_descriptor_member(&self, name: &str) -> Option<DescriptorElement> {
        let (table_name, member) = name.split_once('_')?;
        let table = self.lib.find_resource_table(table_name)?;
        let t = &self.lib.tables[table];
        if let Some((entry, e)) = t.entry(member) {
            if e.ty.kind != ResourceKind::ConstantBuffer {
                return Some(DescriptorElement {
                    table,
                    entry: entry as u32,
                    member: None,
                });
            }
        }
        let (entry, e) = t.constant_buffer()?;
        let index = self.lib.composites[e.ty.layout?].member_index(member)?;
        Some(DescriptorElement {
            table,
            entry: entry as u32,
            member: Some(index as u32),
        })
    }

    fn member_access(&mut self, base: Expr, name: &str, loc: Location) -> PResult<Expr> {
        let ty = self.node(base.node).ty;
        if let Some(c) = ty.composite().filter(|_| !ty.is_array()) {
            let composite = &self.lib.composites[c];
            let Some(index) = composite.member_index(name) else {
                let message = format!("'{}' has no member '{name}'", composite.name);
                return Err(self.error(&loc, message));
            };
            let member_ty = composite.members[index].ty;
            let node = self.add_node(
                CodeNode::new(OpCode::AccessMember, loc)
                    .with_type(member_ty)
                    .with_children(vec![base.node])
                    .with_extra(NodeExtra::Member {
                        name: name.to_string(),
                        index: index as u32,
                    }),
            );
            return Ok(Expr { node, place: base.place });
        }
        if ty.is_numeric() {
            let width = ty.component_count().unwrap_or(1);
            let swizzle = Swizzle::parse(name).filter(|s| s.required_width() <= width);
            let Some(swizzle) = swizzle else {
                let type_name = self.lib.type_name(&ty);
                return Err(self.error(&loc, format!("invalid swizzle '{name}' on '{type_name}'")));
            };
            let kind = ty.scalar_kind().unwrap_or(ScalarKind::Float);
            let node = self.add_node(
                CodeNode::new(OpCode::ReadSwizzle, loc)
                    .with_type(DataType::numeric(kind, swizzle.len() as u8))
                    .with_children(vec![base.node])
                    .with_extra(NodeExtra::Swizzle(swizzle)),
            );
            return Ok(Expr { node, place: base.place });
        }
        let type_name = self.lib.type_name(&ty);
        Err(self.error(&loc, format!("cannot access '{name}' on a value of type '{type_name}'")))
    }

    fn index(&mut self, base: Expr, index: Expr, loc: Location) -> PResult<Expr> {
        let ty = self.node(base.node).ty;
        let index = self.value(index);
        let index_ty = self.node(index).ty;
        let integer = |t: &DataType| matches!(t.scalar_kind(), Some(ScalarKind::Int | ScalarKind::Uint)) && t.is_numeric();

        let (element, place) = if ty.is_array() {
            (ty.element(), base.place)
        } else if let Some(r) = ty.resource() {
            if r.kind == ResourceKind::ConstantBuffer || r.multisampled {
                return Err(self.error(&loc, "this resource cannot be indexed"));
            }
            if !integer(&index_ty) || index_ty.component_count() != Some(r.coordinate_count()) {
                let n = r.coordinate_count();
                return Err(self.error(&loc, format!("resource index needs {n} integer component(s)")));
            }
            (r.element_type(), r.uav)
        } else if ty.is_vector() {
            (DataType::numeric(ty.scalar_kind().unwrap_or(ScalarKind::Float), 1), base.place)
        } else if let BaseType::Matrix { rows, .. } = ty.base {
            (DataType::vec(rows), base.place)
        } else {
            let type_name = self.lib.type_name(&ty);
            return Err(self.error(&loc, format!("cannot index a value of type '{type_name}'")));
        };
        if !ty.is_resource() && !(integer(&index_ty) && index_ty.is_scalar()) {
            return Err(self.error(&loc, "array index must be an int or uint scalar"));
        }
        let node = self.add_node(
            CodeNode::new(OpCode::AccessArray, loc)
                .with_type(element)
                .with_children(vec![base.node, index]),
        );
        Ok(Expr { node, place })
    }

    fn parse_call(&mut self, name: &str, loc: Location) -> PResult<Expr> {
        let constructed = DataType::from_keyword(name)
            .or_else(|| self.lib.find_composite(name).map(|c| DataType::new(BaseType::Struct(c))));
        if let Some(ty) = constructed {
            let args = self.parse_argument_values()?;
            return self.construct(ty, args, loc);
        }

        if let Some(native) = NativeFunction::from_name(name) {
            let mut exprs = self.parse_arguments()?.into_iter();
            let mut args = Vec::new();
            if native.is_atomic() {
                if let Some(target) = exprs.next() {
                    self.check_atomic_target(target, &loc)?;
                    args.push(target.node);
                }
            }
            args.extend(exprs.map(|e| self.value(e)));
            return Ok(Expr::value(self.native_call(native, args, loc)?));
        }

        let function = self
            .program
            .and_then(|p| self.lib.find_function(p, name, true))
            .map(|f| (f, Callee::Program { name: name.to_string() }))
            .or_else(|| self.lib.find_global_function(name).map(|f| (f, Callee::Global(f))));
        let Some((function, callee)) = function else {
            return Err(self.error(&loc, format!("unknown function '{name}'")));
        };
        let args = self.parse_argument_values()?;
        self.user_call(function, callee, Vec::new(), args, loc)
    }

    fn check_atomic_target(&mut self, target: Expr, loc: &Location) -> PResult<()> {
        let root = self.root_param(target.node).filter(|_| target.place);
        let ok = root.is_some_and(|p| {
            let p = self.lib.param(p);
            p.scope == ParameterScope::GroupShared || p.ty.resource().is_some_and(|r| r.uav)
        });
        if !ok {
            return Err(self.error(loc, "atomic operations need shared memory or a writable buffer"));
        }
        self.check_store_target(target, loc)
    }

    /// `object.function(args)` on a program-typed value.
    fn member_call(&mut self, object: Expr, name: String, loc: Location) -> PResult<Expr> {
        let ty = self.node(object.node).ty;
        let Some(program) = ty.program() else {
            let type_name = self.lib.type_name(&ty);
            return Err(self.error(&loc, format!("'{type_name}' has no member functions")));
        };
        let Some(function) = self.lib.find_function(program, &name, true) else {
            let program_name = self.lib.program(program).name.clone();
            return Err(self.error(&loc, format!("shader '{program_name}' has no function '{name}'")));
        };
        let object = self.value(object);
        let args = self.parse_argument_values()?;
        self.user_call(function, Callee::ProgramMember { name }, vec![object], args, loc)
    }

    fn user_call(
        &mut self,
        function: Handle<shadec_ir::Function>,
        callee: Callee,
        mut children: Vec<Handle<CodeNode>>,
        args: Vec<Handle<CodeNode>>,
        loc: Location,
    ) -> PResult<Expr> {
        let f = self.lib.function(function);
        let (inputs, return_type, fname) = (f.inputs.clone(), f.return_type, f.name.clone());
        if inputs.len() != args.len() {
            return Err(self.error(
                &loc,
                format!("'{fname}' takes {} argument(s), {} given", inputs.len(), args.len()),
            ));
        }
        for (arg, input) in args.into_iter().zip(inputs) {
            let ty = self.lib.param(input).ty;
            children.push(self.coerce_to(arg, &ty)?);
        }
        Ok(Expr::value(self.add_node(
            CodeNode::new(OpCode::Call, loc)
                .with_type(return_type)
                .with_children(children)
                .with_extra(NodeExtra::Call(callee)),
        )))
    }

    /// `T(args)`. Constructors over literals fold to a constant.
    fn construct(&mut self, ty: DataType, args: Vec<Handle<CodeNode>>, loc: Location) -> PResult<Expr> {
        let type_name = self.lib.type_name(&ty);
        let args = match ty.base {
            _ if ty.is_array() || ty.is_void() => {
                return Err(self.error(&loc, format!("cannot construct '{type_name}'")));
            }
            BaseType::Struct(c) => {
                let members: Vec<DataType> = self.lib.composites[c].members.iter().map(|m| m.ty).collect();
                if members.len() != args.len() {
                    return Err(self.error(
                        &loc,
                        format!("'{type_name}' has {} member(s), {} given", members.len(), args.len()),
                    ));
                }
                let mut typed = Vec::with_capacity(args.len());
                for (arg, member) in args.into_iter().zip(members) {
                    typed.push(self.coerce_to(arg, &member)?);
                }
                typed
            }
            BaseType::Scalar(_) | BaseType::Vector(..) | BaseType::Matrix { .. } => {
                let mut total = 0usize;
                for &a in &args {
                    let at = self.node(a).ty;
                    total += match at.base {
                        _ if at.is_array() => 0,
                        BaseType::Scalar(_) => 1,
                        BaseType::Vector(_, n) => n as usize,
                        BaseType::Matrix { cols, rows } => cols as usize * rows as usize,
                        _ => 0,
                    };
                    if !(at.is_numeric() || at.is_matrix()) {
                        let arg_name = self.lib.type_name(&at);
                        return Err(self.error(&loc, format!("cannot construct '{type_name}' from '{arg_name}'")));
                    }
                }
                let width = self.lib.flat_component_count(&ty).unwrap_or(0);
                let ok = total == width
                    || (args.len() == 1 && (total == 1 || (total > width && !ty.is_matrix())));
                if !ok {
                    return Err(self.error(
                        &loc,
                        format!("'{type_name}' needs {width} component(s), {total} given"),
                    ));
                }
                args
            }
            _ => return Err(self.error(&loc, format!("cannot construct '{type_name}'"))),
        };

        let literals: Option<Vec<DataValue>> = args
            .iter()
            .map(|&a| {
                let n = self.node(a);
                (n.op == OpCode::Const).then(|| n.value.clone()).flatten()
            })
            .collect();
        if let Some(value) = literals.and_then(|values| self.lib.construct_value(&ty, &values)) {
            return Ok(self.constant(value, ty, loc));
        }
        Ok(Expr::value(self.add_node(
            CodeNode::new(OpCode::NativeCall, loc)
                .with_type(ty)
                .with_children(args)
                .with_extra(NodeExtra::Native(NativeFunction::Construct)),
        )))
    }
}
