//! Integration test: build a small library programmatically (a structure,
//! a descriptor table and two composed programs) and check lookups.

use pretty_assertions::assert_eq;
use shadec_ir::*;

fn loc() -> Location {
    Location::internal()
}

fn member(name: &str, ty: DataType) -> CompositeMember {
    CompositeMember {
        name: name.into(),
        ty,
        explicit_offset: None,
        layout: MemberLayout::default(),
    }
}

/// ```text
/// descriptor Material {
///     ConstantBuffer { vec4 Tint; float Roughness; }
///     Texture2D Albedo;
/// }
/// ```
fn material_library() -> (CodeLibrary, Handle<ResourceTable>) {
    let mut lib = CodeLibrary::new();
    let constants = lib
        .add_composite(CompositeType {
            name: "Material_Constants".into(),
            packing: PackingRule::Uniform,
            members: vec![member("Tint", DataType::vec(4)), member("Roughness", DataType::FLOAT)],
            size: 0,
            alignment: 0,
        })
        .unwrap();
    let table = lib.add_resource_table(ResourceTable {
        name: "Material".into(),
        entries: vec![
            ResourceTableEntry {
                name: CONSTANTS_ENTRY.into(),
                merged_name: ResourceTable::merged_name("Material", CONSTANTS_ENTRY),
                ty: ResourceType::constant_buffer(constants),
                attributes: AttributeList::new(),
                location: loc(),
            },
            ResourceTableEntry {
                name: "Albedo".into(),
                merged_name: ResourceTable::merged_name("Material", "Albedo"),
                ty: ResourceType::texture(ImageViewType::View2D),
                attributes: AttributeList::new(),
                location: loc(),
            },
        ],
        location: loc(),
    });
    (lib, table)
}

#[test]
fn composite_layout_is_computed_on_insert() {
    let (lib, _) = material_library();
    let c = &lib.composites[lib.find_composite("Material_Constants").unwrap()];
    assert_eq!(c.size, 32);
    assert_eq!(c.member("Roughness").unwrap().layout.offset, 16);
}

#[test]
fn descriptor_members_resolve_by_member_name() {
    let (mut lib, table) = material_library();
    let found = lib.find_descriptor_members("Roughness");
    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].element,
        DescriptorElement {
            table,
            entry: 0,
            member: Some(1)
        }
    );

    let program = lib.create_program("Surface", AttributeList::new(), loc());
    let param = lib.create_descriptor_element_reference(Some(program), found[0].element);
    let again = lib.create_descriptor_element_reference(Some(program), found[0].element);
    assert_eq!(param, again);
    assert_eq!(lib.param(param).name, "Material_Roughness");
    assert_eq!(lib.param(param).scope, ParameterScope::GlobalParameter);
    assert_eq!(lib.program(program).descriptors, vec![table]);
}

#[test]
fn resources_resolve_by_entry_name() {
    let (mut lib, _) = material_library();
    let found = lib.find_descriptor_members("Albedo");
    assert_eq!(found.len(), 1);
    let param = lib.create_descriptor_element_reference(None, found[0].element);
    let p = lib.param(param);
    assert_eq!(p.name, "Material_Albedo");
    assert!(p.ty.is_resource());
    assert!(lib.find_descriptor_members("Missing").is_empty());
}

#[test]
fn global_descriptor_references_are_reused() {
    let (mut lib, _) = material_library();
    let element = lib.find_descriptor_members("Roughness")[0].element;
    let first = lib.create_descriptor_element_reference(None, element);
    let params = lib.params.len();
    for _ in 0..8 {
        assert_eq!(lib.create_descriptor_element_reference(None, element), first);
    }
    assert_eq!(lib.params.len(), params);

    let program = lib.create_program("Surface", AttributeList::new(), loc());
    let scoped = lib.create_descriptor_element_reference(Some(program), element);
    assert_ne!(scoped, first);
    assert_eq!(lib.param(scoped).name, lib.param(first).name);
}

#[test]
fn override_in_derived_program_shadows_parent() {
    let mut lib = CodeLibrary::new();
    let base = lib.create_program("Base", AttributeList::new(), loc());
    let derived = lib.create_program("Derived", AttributeList::new(), loc());
    lib.add_parent_program(derived, base);

    let shade = |lib: &mut CodeLibrary, program| {
        lib.add_function(
            program,
            Function {
                name: "shade".into(),
                program: None,
                return_type: DataType::vec(3),
                inputs: Vec::new(),
                code: None,
                attributes: AttributeList::new(),
                location: loc(),
            },
        )
    };
    let in_base = shade(&mut lib, base);
    let in_derived = shade(&mut lib, derived);

    assert_eq!(lib.find_function(base, "shade", true), Some(in_base));
    assert_eq!(lib.find_function(derived, "shade", true), Some(in_derived));
    assert_eq!(lib.function(in_derived).program, Some(derived));
    assert_eq!(lib.type_name(&lib.function(in_derived).return_type), "vec3");
}

#[test]
fn flat_component_counts() {
    let (lib, _) = material_library();
    let c = lib.find_composite("Material_Constants").unwrap();
    let arr = DataType::new(BaseType::Struct(c)).with_array(ArrayCounts::default().append(2).unwrap());
    assert_eq!(lib.flat_component_count(&arr), Some(10));
    assert_eq!(lib.flat_component_count(&DataType::new(BaseType::Matrix { cols: 4, rows: 4 })), Some(16));
    assert_eq!(lib.type_name(&arr), "Material_Constants[2]");
}
