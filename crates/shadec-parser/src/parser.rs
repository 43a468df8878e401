//! Declarations: structures, descriptors, programs, functions, exports.

use shadec_ir::{
    ArrayCounts, AttributeList, BaseType, CONSTANTS_ENTRY, CodeLibrary, CodeNode, CompositeMember,
    CompositeType, DataParameter, DataType, DataValue, ErrorReported, ErrorReporter,
    ExportedBundle, ExportedStage, Function, Handle, ImageFormat, ImageViewType, Location,
    MemberLayout, OpCode, PackingRule, ParameterScope, Program, ResourceAccess, ResourceKind,
    ResourceTable, ResourceTableEntry, ResourceType, ShaderStage,
};

use crate::lexer::{Token, TokenKind};

pub(crate) type PResult<T> = Result<T, ErrorReported>;

/// Recursive-descent parser building straight into a [`CodeLibrary`].
/// Names and types are resolved while parsing, so every declaration must
/// precede its uses (prototypes allow forward references).
pub(crate) struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    pub(crate) lib: CodeLibrary,
    err: &'a mut dyn ErrorReporter,

    // Function context.
    pub(crate) program: Option<Handle<Program>>,
    pub(crate) inputs: Vec<Handle<DataParameter>>,
    pub(crate) scopes: Vec<Vec<Handle<DataParameter>>>,
    pub(crate) return_type: DataType,
    pub(crate) loop_depth: u32,
}

// ---------------------------------------------------------------------------
// Token plumbing
// ---------------------------------------------------------------------------

impl<'a> Parser<'a> {
    pub(crate) fn new(tokens: Vec<Token>, err: &'a mut dyn ErrorReporter) -> Self {
        Self {
            tokens,
            pos: 0,
            lib: CodeLibrary::new(),
            err,
            program: None,
            inputs: Vec::new(),
            scopes: Vec::new(),
            return_type: DataType::VOID,
            loop_depth: 0,
        }
    }

    pub(crate) fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    pub(crate) fn peek_at(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    pub(crate) fn location(&self) -> Location {
        self.peek().location.clone()
    }

    pub(crate) fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    pub(crate) fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_ident(&mut self, word: &str) -> bool {
        if self.peek().is_ident(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_punct(&mut self, p: &str) -> PResult<Location> {
        if self.peek().is_punct(p) {
            Ok(self.advance().location)
        } else {
            let tok = self.peek().clone();
            Err(self.error(&tok.location, format!("expected '{p}', found '{}'", tok.spelling())))
        }
    }

    pub(crate) fn expect_ident(&mut self) -> PResult<(String, Location)> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Ident(word) => {
                self.advance();
                Ok((word, tok.location))
            }
            _ => Err(self.error(&tok.location, format!("expected a name, found '{}'", tok.spelling()))),
        }
    }

    /// Reports an error and returns the marker to propagate.
    pub(crate) fn error(&mut self, location: &Location, message: impl AsRef<str>) -> ErrorReported {
        self.err.report_error(location, message.as_ref());
        ErrorReported
    }

    /// Reports an error that refers to a second location.
    pub(crate) fn error_with(
        &mut self,
        location: &Location,
        message: impl AsRef<str>,
        other: &Location,
        note: &str,
    ) -> ErrorReported {
        let text = format!("{} ({note}: {other})", message.as_ref());
        self.err.report_error(location, &text);
        ErrorReported
    }

    pub(crate) fn add_node(&mut self, node: CodeNode) -> Handle<CodeNode> {
        self.lib.add_node(node)
    }

    pub(crate) fn node(&self, h: Handle<CodeNode>) -> &CodeNode {
        self.lib.node(h)
    }
}

// ---------------------------------------------------------------------------
// Attributes and types
// ---------------------------------------------------------------------------

impl Parser<'_> {
    /// Parses zero or more `attribute(key=value, flag)` groups.
    pub(crate) fn parse_attributes(&mut self) -> PResult<AttributeList> {
        let mut attrs = AttributeList::new();
        while self.eat_ident("attribute") {
            self.expect_punct("(")?;
            if !self.eat_punct(")") {
                loop {
                    let (key, _) = self.expect_ident()?;
                    let value = if self.eat_punct("=") {
                        let tok = self.advance();
                        match tok.kind {
                            TokenKind::Ident(w) => w,
                            TokenKind::Int { value, .. } => value.to_string(),
                            TokenKind::Float(v) => format!("{v}"),
                            TokenKind::Str { text, .. } => text,
                            _ => {
                                return Err(self.error(
                                    &tok.location,
                                    format!("invalid value '{}' for attribute '{key}'", tok.spelling()),
                                ));
                            }
                        }
                    } else {
                        String::new()
                    };
                    attrs.set(key, value);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;
            }
        }
        Ok(attrs)
    }

    /// The current token names a value type (keyword, structure or
    /// program).
    pub(crate) fn is_type_name(&self, word: &str) -> bool {
        DataType::from_keyword(word).is_some()
            || self.lib.find_composite(word).is_some()
            || self.lib.find_program(word).is_some()
    }

    pub(crate) fn parse_type(&mut self) -> PResult<DataType> {
        let (word, loc) = self.expect_ident()?;
        if let Some(ty) = DataType::from_keyword(&word) {
            return Ok(ty);
        }
        if let Some(c) = self.lib.find_composite(&word) {
            return Ok(DataType::new(BaseType::Struct(c)));
        }
        if let Some(p) = self.lib.find_program(&word) {
            return Ok(DataType::new(BaseType::Program(p)));
        }
        Err(self.error(&loc, format!("unknown type '{word}'")))
    }

    /// Parses `[N][M]...` after a declarator name. `allow_unsized` permits
    /// an empty outermost `[]`.
    pub(crate) fn parse_array_suffix(&mut self, ty: DataType, allow_unsized: bool) -> PResult<DataType> {
        let mut counts = ArrayCounts::default();
        while self.peek().is_punct("[") {
            let loc = self.advance().location;
            let count = if self.peek().is_punct("]") {
                if !allow_unsized || !counts.is_empty() {
                    return Err(self.error(&loc, "only the outermost array dimension may be unsized"));
                }
                0
            } else {
                let tok = self.advance();
                match tok.kind {
                    TokenKind::Int { value, .. } if value > 0 && value <= u32::MAX as u64 => value as u32,
                    _ => {
                        return Err(self.error(&tok.location, "array size must be a positive integer literal"));
                    }
                }
            };
            self.expect_punct("]")?;
            counts = counts
                .append(count)
                .ok_or_else(|| self.error(&loc, "too many array dimensions"))?;
        }
        if counts.is_empty() {
            Ok(ty)
        } else if ty.is_array() {
            let loc = self.location();
            Err(self.error(&loc, "nested array types are not supported"))
        } else {
            Ok(ty.with_array(counts))
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

impl Parser<'_> {
    pub(crate) fn parse_library(mut self) -> PResult<CodeLibrary> {
        while !self.at_eof() {
            let attrs = self.parse_attributes()?;
            let tok = self.peek().clone();
            match tok.ident() {
                Some("const") => {
                    self.advance();
                    self.parse_global_constant()?;
                }
                Some("struct") => {
                    self.advance();
                    self.parse_struct(attrs)?;
                }
                Some("descriptor") => {
                    self.advance();
                    self.parse_descriptor(attrs)?;
                }
                Some("shader") => {
                    self.advance();
                    self.parse_program(attrs)?;
                }
                Some("export") => {
                    self.advance();
                    self.parse_export()?;
                }
                Some(_) => self.parse_function(attrs)?,
                None => {
                    return Err(self.error(
                        &tok.location,
                        format!("expected a declaration, found '{}'", tok.spelling()),
                    ));
                }
            }
        }
        Ok(self.lib)
    }

    fn check_new_global_name(&mut self, name: &str, loc: &Location) -> PResult<()> {
        let taken = self.lib.find_composite(name).is_some()
            || self.lib.find_program(name).is_some()
            || self.lib.find_resource_table(name).is_some()
            || DataType::from_keyword(name).is_some();
        if taken {
            return Err(self.error(loc, format!("'{name}' is already declared")));
        }
        Ok(())
    }

    fn parse_global_constant(&mut self) -> PResult<()> {
        let ty = self.parse_type()?;
        let (name, loc) = self.expect_ident()?;
        let ty = self.parse_array_suffix(ty, false)?;
        if ty.program().is_some() {
            return Err(self.error(&loc, "program-typed constants must be declared inside a shader"));
        }
        if !self.eat_punct("=") {
            return Err(self.error(&loc, format!("global constant '{name}' needs an initializer")));
        }
        let init = self.parse_constant_initializer(ty)?;
        self.expect_punct(";")?;

        let mut param = DataParameter::new(name.clone(), ParameterScope::GlobalConst, ty, loc.clone());
        param.initializer = Some(init);
        if let Err(existing) = self.lib.add_global_constant(param) {
            let other = self.lib.param(existing).location.clone();
            return Err(self.error_with(&loc, format!("constant '{name}' is already declared"), &other, "previous declaration"));
        }
        Ok(())
    }

    /// Parses an initializer expression and converts it to `ty`.
    fn parse_constant_initializer(&mut self, ty: DataType) -> PResult<Handle<CodeNode>> {
        let expr = self.parse_expression()?;
        let value = self.value(expr);
        self.coerce_to(value, &ty)
    }

    fn parse_struct(&mut self, attrs: AttributeList) -> PResult<()> {
        let (name, loc) = self.expect_ident()?;
        self.check_new_global_name(&name, &loc)?;
        let packing = match attrs.value("packing") {
            None | Some("uniform") | Some("std140") => PackingRule::Uniform,
            Some("storage") | Some("std430") => PackingRule::Storage,
            Some("vertex") => PackingRule::Vertex,
            Some(other) => return Err(self.error(&loc, format!("unknown packing '{other}'"))),
        };
        let members = self.parse_member_list()?;
        self.eat_punct(";");
        self.add_composite(name, packing, members, &loc)?;
        Ok(())
    }

    /// `{ [attribute(offset=N)] Type name[N]; ... }`
    fn parse_member_list(&mut self) -> PResult<Vec<CompositeMember>> {
        self.expect_punct("{")?;
        let mut members: Vec<CompositeMember> = Vec::new();
        while !self.eat_punct("}") {
            let attrs = self.parse_attributes()?;
            let ty = self.parse_type()?;
            let (name, loc) = self.expect_ident()?;
            let ty = self.parse_array_suffix(ty, false)?;
            self.expect_punct(";")?;
            if members.iter().any(|m| m.name == name) {
                return Err(self.error(&loc, format!("duplicate member '{name}'")));
            }
            let explicit_offset = match attrs.value("offset") {
                Some(v) => Some(
                    v.parse::<u32>()
                        .map_err(|_| self.error(&loc, format!("invalid offset '{v}'")))?,
                ),
                None => None,
            };
            members.push(CompositeMember {
                name,
                ty,
                explicit_offset,
                layout: MemberLayout::default(),
            });
        }
        Ok(members)
    }

    fn add_composite(
        &mut self,
        name: String,
        packing: PackingRule,
        members: Vec<CompositeMember>,
        loc: &Location,
    ) -> PResult<Handle<CompositeType>> {
        let composite = CompositeType {
            name: name.clone(),
            packing,
            members,
            size: 0,
            alignment: 0,
        };
        self.lib
            .add_composite(composite)
            .map_err(|msg| self.error(loc, format!("structure '{name}': {msg}")))
    }

    fn parse_descriptor(&mut self, _attrs: AttributeList) -> PResult<()> {
        let (name, loc) = self.expect_ident()?;
        self.check_new_global_name(&name, &loc)?;
        if name.contains('_') {
            return Err(self.error(&loc, format!("descriptor name '{name}' must not contain '_'")));
        }
        self.expect_punct("{")?;
        let mut entries: Vec<ResourceTableEntry> = Vec::new();
        while !self.eat_punct("}") {
            let attrs = self.parse_attributes()?;
            let (kind_word, entry_loc) = self.expect_ident()?;

            let (entry_name, ty) = if kind_word == "ConstantBuffer" {
                if entries.iter().any(|e| e.ty.kind == ResourceKind::ConstantBuffer) {
                    return Err(self.error(&entry_loc, "a descriptor has at most one constant buffer"));
                }
                let members = self.parse_member_list()?;
                self.eat_punct(";");
                let layout = self.add_composite(
                    ResourceTable::merged_name(&name, CONSTANTS_ENTRY),
                    PackingRule::Uniform,
                    members,
                    &entry_loc,
                )?;
                (CONSTANTS_ENTRY.to_string(), ResourceType::constant_buffer(layout))
            } else {
                let ty = self.parse_resource_type(&kind_word, &attrs, &entry_loc)?;
                let (entry_name, _) = self.expect_ident()?;
                self.expect_punct(";")?;
                (entry_name, ty)
            };

            if entries.iter().any(|e| e.name == entry_name) {
                return Err(self.error(&entry_loc, format!("duplicate descriptor entry '{entry_name}'")));
            }
            entries.push(ResourceTableEntry {
                merged_name: ResourceTable::merged_name(&name, &entry_name),
                name: entry_name,
                ty,
                attributes: attrs,
                location: entry_loc,
            });
        }
        self.eat_punct(";");
        self.lib.add_resource_table(ResourceTable {
            name,
            entries,
            location: loc,
        });
        Ok(())
    }

    fn parse_resource_type(&mut self, word: &str, attrs: &AttributeList, loc: &Location) -> PResult<ResourceType> {
        let format = match attrs.value("format") {
            Some(f) => Some(
                ImageFormat::from_name(f).ok_or_else(|| self.error(loc, format!("unknown image format '{f}'")))?,
            ),
            None => None,
        };
        let (uav, base) = match word.strip_prefix("RW") {
            Some(rest) => (true, rest),
            None => (false, word),
        };
        let access = if uav {
            match attrs.value("access") {
                None | Some("readwrite") => ResourceAccess::UavReadWrite,
                Some("read") => ResourceAccess::UavReadOnly,
                Some("write") => ResourceAccess::UavWriteOnly,
                Some(other) => return Err(self.error(loc, format!("unknown access '{other}'"))),
            }
        } else {
            ResourceAccess::ReadOnly
        };

        let mut ty = if base == "Buffer" {
            let mut ty = ResourceType::buffer();
            if self.eat_punct("<") {
                let (struct_name, struct_loc) = self.expect_ident()?;
                let layout = self
                    .lib
                    .find_composite(&struct_name)
                    .ok_or_else(|| self.error(&struct_loc, format!("unknown structure '{struct_name}'")))?;
                self.expect_punct(">")?;
                ty.layout = Some(layout);
            }
            ty
        } else {
            let (depth, rest) = match base.strip_prefix("Depth") {
                Some(rest) => (true, rest),
                None => (false, base),
            };
            let (view, multisampled) = match rest {
                "Texture1D" => (ImageViewType::View1D, false),
                "Texture1DArray" => (ImageViewType::View1DArray, false),
                "Texture2D" => (ImageViewType::View2D, false),
                "Texture2DArray" => (ImageViewType::View2DArray, false),
                "Texture2DMS" => (ImageViewType::View2D, true),
                "Texture2DMSArray" => (ImageViewType::View2DArray, true),
                "Texture3D" => (ImageViewType::View3D, false),
                "TextureCube" => (ImageViewType::ViewCube, false),
                "TextureCubeArray" => (ImageViewType::ViewCubeArray, false),
                _ => return Err(self.error(loc, format!("unknown resource type '{word}'"))),
            };
            if uav && (depth || multisampled) {
                return Err(self.error(loc, format!("'{word}' cannot be writable")));
            }
            let mut ty = ResourceType::texture(view);
            ty.depth = depth;
            ty.multisampled = multisampled;
            ty
        };

        ty.uav = uav;
        ty.access = access;
        ty.format = format.unwrap_or_default();
        if ty.is_image() && ty.format == ImageFormat::Unknown {
            return Err(self.error(loc, format!("'{word}' needs attribute(format=...)")));
        }
        Ok(ty)
    }
}

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

impl Parser<'_> {
    fn parse_program(&mut self, attrs: AttributeList) -> PResult<()> {
        let (name, loc) = self.expect_ident()?;
        self.check_new_global_name(&name, &loc)?;
        let program = self.lib.create_program(&name, attrs, loc);

        if self.eat_punct(":") {
            loop {
                let (parent_name, parent_loc) = self.expect_ident()?;
                let Some(parent) = self.lib.find_program(&parent_name) else {
                    return Err(self.error(&parent_loc, format!("unknown parent shader '{parent_name}'")));
                };
                if parent == program {
                    return Err(self.error(&parent_loc, "a shader cannot be its own parent"));
                }
                if !self.lib.add_parent_program(program, parent) {
                    self.err.report_warning(&parent_loc, &format!("'{parent_name}' is listed twice"));
                }
                if !self.eat_punct(",") {
                    break;
                }
            }
        }

        self.expect_punct("{")?;
        self.program = Some(program);
        let result = self.parse_program_body(program);
        self.program = None;
        result?;
        self.eat_punct(";");
        Ok(())
    }

    fn parse_program_body(&mut self, program: Handle<Program>) -> PResult<()> {
        while !self.eat_punct("}") {
            let attrs = self.parse_attributes()?;
            let tok = self.peek().clone();
            let scope = match tok.ident() {
                Some("const") => Some(ParameterScope::GlobalConst),
                Some("in") => Some(ParameterScope::StageInput),
                Some("out") => Some(ParameterScope::StageOutput),
                Some("vertex") => Some(ParameterScope::VertexInput),
                Some("shared") => Some(ParameterScope::GroupShared),
                Some(_) => None,
                None => {
                    return Err(self.error(&tok.location, format!("expected a shader member, found '{}'", tok.spelling())));
                }
            };
            match scope {
                Some(scope) => {
                    self.advance();
                    self.parse_program_parameter(program, scope, attrs)?;
                }
                None => self.parse_function(attrs)?,
            }
        }
        Ok(())
    }

    fn parse_program_parameter(
        &mut self,
        program: Handle<Program>,
        scope: ParameterScope,
        attrs: AttributeList,
    ) -> PResult<()> {
        let ty = self.parse_type()?;
        let (name, loc) = self.expect_ident()?;
        let ty = self.parse_array_suffix(ty, false)?;

        match scope {
            ParameterScope::VertexInput if ty.composite().is_none() || ty.is_array() => {
                return Err(self.error(&loc, "vertex inputs must be a structure"));
            }
            ParameterScope::StageInput | ParameterScope::StageOutput
                if !(ty.without_array().is_numeric() || ty.without_array().is_matrix()) =>
            {
                return Err(self.error(&loc, "stage inputs and outputs must be scalars, vectors or matrices"));
            }
            _ if ty.is_resource() => {
                return Err(self.error(&loc, "resources are declared in descriptors"));
            }
            _ if ty.program().is_some() && scope != ParameterScope::GlobalConst => {
                return Err(self.error(&loc, "only constants can reference shaders"));
            }
            _ => {}
        }

        let mut param = DataParameter::new(name.clone(), scope, ty, loc.clone());
        param.attributes = attrs;
        if scope == ParameterScope::GlobalConst && self.eat_punct("=") {
            param.initializer = Some(self.parse_constant_initializer(ty)?);
        }
        self.expect_punct(";")?;

        if let Err(existing) = self.lib.add_parameter(program, param) {
            let other = self.lib.param(existing).location.clone();
            return Err(self.error_with(&loc, format!("'{name}' is already declared in this shader"), &other, "previous declaration"));
        }
        Ok(())
    }

    /// `Type name(params) { body }` or a prototype ending in `;`.
    fn parse_function(&mut self, attrs: AttributeList) -> PResult<()> {
        let return_type = self.parse_type()?;
        let (name, loc) = self.expect_ident()?;
        if return_type.is_resource() || return_type.program().is_some() {
            return Err(self.error(&loc, "functions cannot return resources or shaders"));
        }
        if shadec_ir::NativeFunction::from_name(&name).is_some() {
            return Err(self.error(&loc, format!("'{name}' is a built-in function")));
        }

        self.expect_punct("(")?;
        let mut inputs = Vec::new();
        if !self.eat_punct(")") {
            loop {
                let ty = self.parse_type()?;
                let (input_name, input_loc) = self.expect_ident()?;
                let ty = self.parse_array_suffix(ty, false)?;
                if ty.program().is_some() {
                    return Err(self.error(&input_loc, "shaders cannot be passed as arguments"));
                }
                if inputs.iter().any(|&h| self.lib.param(h).name == input_name) {
                    return Err(self.error(&input_loc, format!("duplicate parameter '{input_name}'")));
                }
                inputs.push(self.lib.add_param(DataParameter::new(
                    input_name,
                    ParameterScope::FunctionInput,
                    ty,
                    input_loc,
                )));
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
        }

        // A definition completes an earlier prototype in place so calls
        // already bound to it see the body.
        let existing = match self.program {
            Some(p) => self.lib.find_function(p, &name, false),
            None => self.lib.find_global_function(&name),
        };
        if let Some(f) = existing.filter(|&f| self.lib.function(f).code.is_some()) {
            if self.eat_punct(";") {
                return Ok(());
            }
            let other = self.lib.function(f).location.clone();
            return Err(self.error_with(&loc, format!("function '{name}' is already defined"), &other, "previous definition"));
        }
        let prototype = existing.filter(|&f| self.lib.function(f).code.is_none());
        let handle = match prototype {
            Some(f) => {
                let same_signature = {
                    let proto = self.lib.function(f);
                    proto.return_type == return_type
                        && proto.inputs.len() == inputs.len()
                        && proto
                            .inputs
                            .iter()
                            .zip(&inputs)
                            .all(|(&a, &b)| self.lib.param(a).ty == self.lib.param(b).ty)
                };
                if !same_signature {
                    let other = self.lib.function(f).location.clone();
                    return Err(self.error_with(&loc, format!("'{name}' does not match its prototype"), &other, "prototype"));
                }
                let function = &mut self.lib.functions[f];
                function.inputs = inputs.clone();
                function.attributes = attrs;
                function.location = loc.clone();
                f
            }
            None => {
                let function = Function {
                    name: name.clone(),
                    program: self.program,
                    return_type,
                    inputs: inputs.clone(),
                    code: None,
                    attributes: attrs,
                    location: loc.clone(),
                };
                match self.program {
                    Some(p) => self.lib.add_function(p, function),
                    None => self.lib.add_global_function(function),
                }
            }
        };

        if self.eat_punct(";") {
            return Ok(());
        }

        self.inputs = inputs;
        self.return_type = return_type;
        self.scopes.clear();
        self.loop_depth = 0;
        let body = self.parse_block();
        self.inputs.clear();
        let body = body?;
        self.lib.functions[handle].code = Some(body);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Exports
// ---------------------------------------------------------------------------

impl Parser<'_> {
    fn parse_export(&mut self) -> PResult<()> {
        let (name, loc) = self.expect_ident()?;
        if self.lib.exports.iter().any(|e| e.name == name) {
            return Err(self.error(&loc, format!("export '{name}' is already declared")));
        }
        self.expect_punct("{")?;
        let mut stages: Vec<ExportedStage> = Vec::new();
        while !self.eat_punct("}") {
            let (stage_word, stage_loc) = self.expect_ident()?;
            let Some(stage) = ShaderStage::from_keyword(&stage_word) else {
                return Err(self.error(&stage_loc, format!("unknown stage '{stage_word}'")));
            };
            if stages.iter().any(|s| s.stage == stage) {
                return Err(self.error(&stage_loc, format!("stage '{stage}' is exported twice")));
            }
            let (program_name, program_loc) = self.expect_ident()?;
            let Some(program) = self.lib.find_program(&program_name) else {
                return Err(self.error(&program_loc, format!("unknown shader '{program_name}'")));
            };

            let mut constants = Vec::new();
            if self.eat_punct("(") && !self.eat_punct(")") {
                loop {
                    let (const_name, const_loc) = self.expect_ident()?;
                    let param = self
                        .lib
                        .find_parameter(program, &const_name, true)
                        .filter(|&p| self.lib.param(p).scope == ParameterScope::GlobalConst)
                        .ok_or_else(|| {
                            self.error(&const_loc, format!("'{program_name}' has no constant '{const_name}'"))
                        })?;
                    self.expect_punct("=")?;
                    let ty = self.lib.param(param).ty;
                    let node = self.parse_constant_initializer(ty)?;
                    let value = self
                        .literal_value(node)
                        .ok_or_else(|| self.error(&const_loc, format!("value of '{const_name}' must be a literal")))?;
                    constants.push((param, value));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;
            }
            self.expect_punct(";")?;
            stages.push(ExportedStage {
                stage,
                program,
                constants,
                location: stage_loc,
            });
        }
        self.eat_punct(";");
        if stages.is_empty() {
            return Err(self.error(&loc, format!("export '{name}' has no stages")));
        }
        self.lib.exports.push(ExportedBundle {
            name,
            stages,
            location: loc,
        });
        Ok(())
    }

    /// Value of a literal expression: constants and constructors over
    /// constants.
    pub(crate) fn literal_value(&self, node: Handle<CodeNode>) -> Option<DataValue> {
        let n = self.node(node);
        match n.op {
            OpCode::Const => n.value.clone(),
            OpCode::NativeCall if n.native() == Some(shadec_ir::NativeFunction::Construct) => {
                let args = n
                    .children
                    .iter()
                    .map(|&c| self.literal_value(c))
                    .collect::<Option<Vec<_>>>()?;
                self.lib.construct_value(&n.ty, &args)
            }
            _ => None,
        }
    }
}
