//! The code library: owner of every parsed model object.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use rustc_hash::FxHashMap;

use crate::arena::{Arena, Handle};
use crate::builtin::find_builtin;
use crate::descriptor::ResourceTable;
use crate::error::Location;
use crate::function::Function;
use crate::layout::compute_layout;
use crate::node::CodeNode;
use crate::param::{AttributeList, DataParameter, DescriptorElement, ParameterScope};
use crate::program::{ExportedBundle, Program};
use crate::types::{BaseType, CompositeType, DataType, ResourceKind, ScalarKind};
use crate::value::{Component, DataValue};

static NEXT_LIBRARY_ID: AtomicU64 = AtomicU64::new(1);

/// A descriptor member matching a name lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub element: DescriptorElement,
}

/// Programs, global functions and constants, types and resource tables of
/// one compilation unit, plus the arenas their code lives in.
#[derive(Debug)]
pub struct CodeLibrary {
    id: u64,
    alive: Arc<()>,
    pub nodes: Arena<CodeNode>,
    pub params: Arena<DataParameter>,
    pub functions: Arena<Function>,
    pub programs: Arena<Program>,
    pub composites: Arena<CompositeType>,
    pub tables: Arena<ResourceTable>,
    pub exports: Vec<ExportedBundle>,
    program_map: FxHashMap<String, Handle<Program>>,
    global_constants: Vec<Handle<DataParameter>>,
    global_functions: Vec<Handle<Function>>,
    global_builtins: Vec<Handle<DataParameter>>,
    global_descriptor_elements: Vec<Handle<DataParameter>>,
}

impl Default for CodeLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeLibrary {
    pub fn new() -> Self {
        Self {
            id: NEXT_LIBRARY_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
            nodes: Arena::new(),
            params: Arena::new(),
            functions: Arena::new(),
            programs: Arena::new(),
            composites: Arena::new(),
            tables: Arena::new(),
            exports: Vec::new(),
            program_map: FxHashMap::default(),
            global_constants: Vec::new(),
            global_functions: Vec::new(),
            global_builtins: Vec::new(),
            global_descriptor_elements: Vec::new(),
        }
    }

    /// Process-unique identity of this library.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Upgrades only while this library exists.
    pub fn liveness(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    // -- programs --

    /// Creates an empty program.
    ///
    /// # Panics
    ///
    /// Panics if a program with this name already exists; callers check
    /// [`Self::find_program`] first and report a proper error.
    pub fn create_program(
        &mut self,
        name: &str,
        attributes: AttributeList,
        location: Location,
    ) -> Handle<Program> {
        assert!(
            !self.program_map.contains_key(name),
            "program '{name}' created twice"
        );
        let handle = self.programs.append(Program::new(name, attributes, location));
        self.program_map.insert(name.to_string(), handle);
        handle
    }

    pub fn find_program(&self, name: &str) -> Option<Handle<Program>> {
        self.program_map.get(name).copied()
    }

    pub fn program(&self, handle: Handle<Program>) -> &Program {
        &self.programs[handle]
    }

    /// Appends a parent. Returns `false` if it was already listed.
    pub fn add_parent_program(&mut self, program: Handle<Program>, parent: Handle<Program>) -> bool {
        let parents = &mut self.programs[program].parents;
        if parents.contains(&parent) {
            return false;
        }
        parents.push(parent);
        true
    }

    /// Declares a parameter on a program. Fails with the existing handle
    /// if the name is already declared at this level.
    pub fn add_parameter(
        &mut self,
        program: Handle<Program>,
        param: DataParameter,
    ) -> Result<Handle<DataParameter>, Handle<DataParameter>> {
        if let Some(existing) = self.programs[program]
            .parameters
            .iter()
            .copied()
            .find(|&p| self.params[p].name == param.name)
        {
            return Err(existing);
        }
        let handle = self.params.append(param);
        self.programs[program].parameters.push(handle);
        Ok(handle)
    }

    /// Declares a function on a program, replacing a same-named function
    /// previously declared at this level.
    pub fn add_function(&mut self, program: Handle<Program>, mut function: Function) -> Handle<Function> {
        function.program = Some(program);
        let name = function.name.clone();
        let handle = self.functions.append(function);
        let list = &mut self.programs[program].functions;
        match list.iter().position(|&f| self.functions[f].name == name) {
            Some(i) => list[i] = handle,
            None => list.push(handle),
        }
        handle
    }

    /// Looks a parameter up by name: this program first, then parents
    /// depth-first in declaration order.
    pub fn find_parameter(
        &self,
        program: Handle<Program>,
        name: &str,
        recurse_to_parents: bool,
    ) -> Option<Handle<DataParameter>> {
        let p = &self.programs[program];
        if let Some(found) = p.parameters.iter().copied().find(|&h| self.params[h].name == name) {
            return Some(found);
        }
        if recurse_to_parents {
            for &parent in &p.parents {
                if let Some(found) = self.find_parameter(parent, name, true) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Looks a function up by name with the same rules as
    /// [`Self::find_parameter`].
    pub fn find_function(
        &self,
        program: Handle<Program>,
        name: &str,
        recurse_to_parents: bool,
    ) -> Option<Handle<Function>> {
        let p = &self.programs[program];
        if let Some(found) = p.functions.iter().copied().find(|&h| self.functions[h].name == name) {
            return Some(found);
        }
        if recurse_to_parents {
            for &parent in &p.parents {
                if let Some(found) = self.find_function(parent, name, true) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Materializes the named built-in as a `GlobalBuiltin` parameter of
    /// `program` (or of the global scope), reusing an earlier reference.
    pub fn create_builtin_parameter_reference(
        &mut self,
        program: Option<Handle<Program>>,
        name: &str,
    ) -> Option<Handle<DataParameter>> {
        let existing = match program {
            Some(p) => &self.programs[p].builtins,
            None => &self.global_builtins,
        };
        if let Some(found) = existing.iter().copied().find(|&h| self.params[h].name == name) {
            return Some(found);
        }

        let builtin = find_builtin(name)?;
        let mut param = DataParameter::new(
            name,
            ParameterScope::GlobalBuiltin,
            builtin.data_type(),
            Location::internal(),
        );
        param.assignable = builtin.assignable;
        let handle = self.params.append(param);
        match program {
            Some(p) => self.programs[p].builtins.push(handle),
            None => self.global_builtins.push(handle),
        }
        Some(handle)
    }

    /// Materializes a descriptor member (a resource, or one constant
    /// buffer member) as a `GlobalParameter` named `<Table>_<Member>`,
    /// and records the table as used by `program`.
    pub fn create_descriptor_element_reference(
        &mut self,
        program: Option<Handle<Program>>,
        element: DescriptorElement,
    ) -> Handle<DataParameter> {
        let existing = match program {
            Some(p) => &self.programs[p].descriptor_elements,
            None => &self.global_descriptor_elements,
        };
        if let Some(found) = existing.iter().copied().find(|&h| self.params[h].descriptor == Some(element)) {
            return found;
        }

        let table = &self.tables[element.table];
        let entry = &table.entries[element.entry as usize];
        let (name, ty, location) = match element.member {
            Some(m) => {
                let layout = entry
                    .ty
                    .layout
                    .map(|l| &self.composites[l])
                    .and_then(|c| c.members.get(m as usize));
                match layout {
                    Some(member) => (
                        ResourceTable::merged_name(&table.name, &member.name),
                        member.ty,
                        entry.location.clone(),
                    ),
                    None => panic!(
                        "descriptor member {m} out of range in '{}'",
                        entry.merged_name
                    ),
                }
            }
            None => (
                entry.merged_name.clone(),
                DataType::new(BaseType::Resource(entry.ty)),
                entry.location.clone(),
            ),
        };

        let mut param = DataParameter::new(name, ParameterScope::GlobalParameter, ty, location);
        param.descriptor = Some(element);
        param.assignable = entry.ty.uav;
        let handle = self.params.append(param);
        match program {
            Some(p) => {
                let prog = &mut self.programs[p];
                prog.descriptor_elements.push(handle);
                if !prog.descriptors.contains(&element.table) {
                    prog.descriptors.push(element.table);
                }
            }
            None => self.global_descriptor_elements.push(handle),
        }
        handle
    }

    // -- global scope --

    pub fn add_global_constant(&mut self, param: DataParameter) -> Result<Handle<DataParameter>, Handle<DataParameter>> {
        if let Some(existing) = self.find_global_constant(&param.name) {
            return Err(existing);
        }
        let handle = self.params.append(param);
        self.global_constants.push(handle);
        Ok(handle)
    }

    pub fn find_global_constant(&self, name: &str) -> Option<Handle<DataParameter>> {
        self.global_constants
            .iter()
            .copied()
            .find(|&h| self.params[h].name == name)
    }

    pub fn global_constants(&self) -> &[Handle<DataParameter>] {
        &self.global_constants
    }

    /// Declares a global function, replacing a same-named one.
    pub fn add_global_function(&mut self, function: Function) -> Handle<Function> {
        let name = function.name.clone();
        let handle = self.functions.append(function);
        match self
            .global_functions
            .iter()
            .position(|&f| self.functions[f].name == name)
        {
            Some(i) => self.global_functions[i] = handle,
            None => self.global_functions.push(handle),
        }
        handle
    }

    pub fn find_global_function(&self, name: &str) -> Option<Handle<Function>> {
        self.global_functions
            .iter()
            .copied()
            .find(|&h| self.functions[h].name == name)
    }

    pub fn global_functions(&self) -> &[Handle<Function>] {
        &self.global_functions
    }

    // -- types and descriptors --

    /// Lays the structure out under its packing rule and stores it.
    /// Layout failures (overlapping offsets, resources inside structures)
    /// come back as a message for the caller to report.
    pub fn add_composite(&mut self, mut composite: CompositeType) -> Result<Handle<CompositeType>, String> {
        let (size, alignment) =
            compute_layout(&mut composite.members, composite.packing, &self.composites)?;
        composite.size = size;
        composite.alignment = alignment;
        Ok(self.composites.append(composite))
    }

    pub fn find_composite(&self, name: &str) -> Option<Handle<CompositeType>> {
        self.composites
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(h, _)| h)
    }

    pub fn add_resource_table(&mut self, table: ResourceTable) -> Handle<ResourceTable> {
        self.tables.append(table)
    }

    pub fn find_resource_table(&self, name: &str) -> Option<Handle<ResourceTable>> {
        self.tables.iter().find(|(_, t)| t.name == name).map(|(h, _)| h)
    }

    /// Every descriptor member named `name`: resource entries by name and
    /// constant buffer members by member name, across all tables.
    pub fn find_descriptor_members(&self, name: &str) -> Vec<DescriptorMatch> {
        let mut out = Vec::new();
        for (table, t) in self.tables.iter() {
            for (entry, e) in t.entries.iter().enumerate() {
                if e.ty.kind == ResourceKind::ConstantBuffer {
                    if let Some(layout) = e.ty.layout {
                        if let Some(m) = self.composites[layout].member_index(name) {
                            out.push(DescriptorMatch {
                                element: DescriptorElement {
                                    table,
                                    entry: entry as u32,
                                    member: Some(m as u32),
                                },
                            });
                        }
                    }
                } else if e.name == name {
                    out.push(DescriptorMatch {
                        element: DescriptorElement {
                            table,
                            entry: entry as u32,
                            member: None,
                        },
                    });
                }
            }
        }
        out
    }

    // -- code --

    pub fn add_node(&mut self, node: CodeNode) -> Handle<CodeNode> {
        self.nodes.append(node)
    }

    pub fn node(&self, handle: Handle<CodeNode>) -> &CodeNode {
        &self.nodes[handle]
    }

    pub fn add_param(&mut self, param: DataParameter) -> Handle<DataParameter> {
        self.params.append(param)
    }

    pub fn param(&self, handle: Handle<DataParameter>) -> &DataParameter {
        &self.params[handle]
    }

    pub fn function(&self, handle: Handle<Function>) -> &Function {
        &self.functions[handle]
    }

    /// Source-level spelling of a type (`vec3`, `Material`, `float[4]`).
    pub fn type_name(&self, ty: &DataType) -> String {
        let mut out = match ty.base {
            BaseType::Void => "void".to_string(),
            BaseType::Scalar(k) => k.scalar_name().to_string(),
            BaseType::Vector(k, n) => format!("{}vec{n}", k.vector_prefix()),
            BaseType::Matrix { cols, rows } if cols == rows => format!("mat{cols}"),
            BaseType::Matrix { cols, rows } => format!("mat{cols}x{rows}"),
            BaseType::Struct(c) => self.composites[c].name.clone(),
            BaseType::Resource(r) => format!("{:?}", r.kind),
            BaseType::Program(p) => self.programs[p].name.clone(),
        };
        for &d in ty.array.dimensions() {
            if d == 0 {
                out.push_str("[]");
            } else {
                out.push_str(&format!("[{d}]"));
            }
        }
        out
    }

    /// Number of scalar components a constant of this type flattens to,
    /// `None` for resources, programs and unsized arrays.
    pub fn flat_component_count(&self, ty: &DataType) -> Option<usize> {
        let base = match ty.base {
            BaseType::Scalar(_) => 1,
            BaseType::Vector(_, n) => n as usize,
            BaseType::Matrix { cols, rows } => cols as usize * rows as usize,
            BaseType::Struct(c) => {
                let mut total = 0;
                for m in &self.composites[c].members {
                    total += self.flat_component_count(&m.ty)?;
                }
                total
            }
            BaseType::Void | BaseType::Resource(_) | BaseType::Program(_) => return None,
        };
        let count = if ty.is_array() {
            ty.array.total()? as usize
        } else {
            1
        };
        Some(base * count)
    }

    /// Value of the constructor `ty(args...)` over constant arguments.
    ///
    /// Numeric targets take a single scalar as a splat and otherwise the
    /// first `width` flattened components, converted to the target kind.
    /// Matrices take a scalar as diagonal or exactly `cols * rows`
    /// components; structures concatenate their (already typed) members.
    pub fn construct_value(&self, ty: &DataType, args: &[DataValue]) -> Option<DataValue> {
        if ty.is_array() {
            return None;
        }
        let flat: Vec<Component> = args.iter().flat_map(|a| a.components().iter().copied()).collect();
        if args.iter().any(|a| !matches!(a, DataValue::Components(_))) {
            return None;
        }
        let out = match ty.base {
            BaseType::Scalar(kind) | BaseType::Vector(kind, _) => {
                let width = ty.component_count()? as usize;
                if flat.len() == 1 {
                    vec![flat[0].convert(kind); width]
                } else if flat.len() >= width && (args.len() == 1 || flat.len() == width) {
                    flat[..width].iter().map(|c| c.convert(kind)).collect()
                } else {
                    return None;
                }
            }
            BaseType::Matrix { cols, rows } => {
                let (cols, rows) = (cols as usize, rows as usize);
                if flat.len() == 1 {
                    let diagonal = flat[0].convert(ScalarKind::Float);
                    (0..cols * rows)
                        .map(|i| {
                            if i / rows == i % rows {
                                diagonal
                            } else {
                                Component::Float(0.0)
                            }
                        })
                        .collect()
                } else if flat.len() == cols * rows {
                    flat.iter().map(|c| c.convert(ScalarKind::Float)).collect()
                } else {
                    return None;
                }
            }
            BaseType::Struct(_) => {
                if flat.len() != self.flat_component_count(ty)? {
                    return None;
                }
                flat
            }
            _ => return None,
        };
        Some(DataValue::Components(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn param(name: &str) -> DataParameter {
        DataParameter::new(name, ParameterScope::GlobalConst, DataType::FLOAT, Location::internal())
    }

    fn function(name: &str) -> Function {
        Function {
            name: name.into(),
            program: None,
            return_type: DataType::VOID,
            inputs: Vec::new(),
            code: None,
            attributes: AttributeList::new(),
            location: Location::internal(),
        }
    }

    #[test]
    #[should_panic(expected = "created twice")]
    fn duplicate_program_is_fatal() {
        let mut lib = CodeLibrary::new();
        lib.create_program("A", AttributeList::new(), Location::internal());
        lib.create_program("A", AttributeList::new(), Location::internal());
    }

    #[test]
    fn lookup_is_depth_first_in_declaration_order() {
        let mut lib = CodeLibrary::new();
        let base_a = lib.create_program("BaseA", AttributeList::new(), Location::internal());
        let root = lib.create_program("Root", AttributeList::new(), Location::internal());
        let base_b = lib.create_program("BaseB", AttributeList::new(), Location::internal());
        let derived = lib.create_program("Derived", AttributeList::new(), Location::internal());

        let from_root = lib.add_parameter(root, param("Scale")).unwrap();
        let from_b = lib.add_parameter(base_b, param("Scale")).unwrap();
        lib.add_parent_program(base_a, root);
        lib.add_parent_program(derived, base_a);
        lib.add_parent_program(derived, base_b);

        // BaseA's subtree (including Root) is searched before BaseB.
        assert_eq!(lib.find_parameter(derived, "Scale", true), Some(from_root));
        assert_ne!(lib.find_parameter(derived, "Scale", true), Some(from_b));
        assert_eq!(lib.find_parameter(derived, "Scale", false), None);
    }

    #[test]
    fn duplicate_parent_is_ignored() {
        let mut lib = CodeLibrary::new();
        let a = lib.create_program("A", AttributeList::new(), Location::internal());
        let b = lib.create_program("B", AttributeList::new(), Location::internal());
        assert!(lib.add_parent_program(b, a));
        assert!(!lib.add_parent_program(b, a));
        assert_eq!(lib.program(b).parents.len(), 1);
    }

    #[test]
    fn parameter_names_are_unique_per_level() {
        let mut lib = CodeLibrary::new();
        let p = lib.create_program("P", AttributeList::new(), Location::internal());
        let first = lib.add_parameter(p, param("X")).unwrap();
        assert_eq!(lib.add_parameter(p, param("X")), Err(first));
    }

    #[test]
    fn redeclared_function_replaces_previous() {
        let mut lib = CodeLibrary::new();
        let p = lib.create_program("P", AttributeList::new(), Location::internal());
        let first = lib.add_function(p, function("shade"));
        let second = lib.add_function(p, function("shade"));
        assert_ne!(first, second);
        assert_eq!(lib.program(p).functions, vec![second]);
        assert_eq!(lib.find_function(p, "shade", false), Some(second));
    }

    #[test]
    fn constructors_splat_truncate_and_build_diagonals() {
        let lib = CodeLibrary::new();
        let v3 = lib.construct_value(&DataType::vec(3), &[DataValue::int(2)]).unwrap();
        assert_eq!(v3, DataValue::Components(vec![Component::Float(2.0); 3]));

        let xy = DataValue::Components(vec![Component::Float(1.0), Component::Float(2.0)]);
        let v4 = lib
            .construct_value(&DataType::vec(4), &[xy.clone(), DataValue::float(3.0), DataValue::float(4.0)])
            .unwrap();
        assert_eq!(v4.components().len(), 4);
        assert!(lib.construct_value(&DataType::vec(4), &[xy.clone()]).is_none());

        let m = DataType::new(BaseType::Matrix { cols: 2, rows: 2 });
        let identity = lib.construct_value(&m, &[DataValue::float(1.0)]).unwrap();
        assert_eq!(
            identity.components(),
            &[Component::Float(1.0), Component::Float(0.0), Component::Float(0.0), Component::Float(1.0)]
        );
    }

    #[test]
    fn builtins_are_materialized_once() {
        let mut lib = CodeLibrary::new();
        let p = lib.create_program("P", AttributeList::new(), Location::internal());
        let a = lib.create_builtin_parameter_reference(Some(p), "gl_Position").unwrap();
        let b = lib.create_builtin_parameter_reference(Some(p), "gl_Position").unwrap();
        assert_eq!(a, b);
        assert!(lib.param(a).assignable);
        assert!(lib.create_builtin_parameter_reference(Some(p), "gl_Unknown").is_none());
    }
}
