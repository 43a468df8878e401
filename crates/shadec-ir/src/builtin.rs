//! Stage built-in variables.
//!
//! Built-ins are not declared in source; the first reference to one of
//! these names materializes a `GlobalBuiltin` parameter on the program.
//! Which stage may read or write which built-in is a backend decision.

use crate::types::{ArrayCounts, DataType, ScalarKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltinVariable {
    pub name: &'static str,
    pub kind: ScalarKind,
    pub components: u8,
    /// Array length; `0` for non-arrays, `u32::MAX` for unsized inputs.
    pub array: u32,
    pub assignable: bool,
}

impl BuiltinVariable {
    pub fn data_type(&self) -> DataType {
        let base = DataType::numeric(self.kind, self.components);
        match self.array {
            0 => base,
            u32::MAX => base.with_array(ArrayCounts::default().append(0).unwrap_or_default()),
            n => base.with_array(ArrayCounts::default().append(n).unwrap_or_default()),
        }
    }
}

const fn var(name: &'static str, kind: ScalarKind, components: u8, array: u32, assignable: bool) -> BuiltinVariable {
    BuiltinVariable {
        name,
        kind,
        components,
        array,
        assignable,
    }
}

use ScalarKind::{Bool, Float, Int, Uint};

pub static BUILTINS: &[BuiltinVariable] = &[
    var("gl_Position", Float, 4, 0, true),
    var("gl_PositionIn", Float, 4, u32::MAX, false),
    var("gl_PointSize", Float, 1, 0, true),
    var("gl_PointSizeIn", Float, 1, u32::MAX, false),
    var("gl_ClipDistance", Float, 1, 6, true),
    var("gl_VertexID", Int, 1, 0, false),
    var("gl_InstanceID", Int, 1, 0, false),
    var("gl_DrawID", Int, 1, 0, false),
    var("gl_BaseVertex", Int, 1, 0, false),
    var("gl_BaseInstance", Int, 1, 0, false),
    var("gl_PatchVerticesIn", Int, 1, 0, false),
    var("gl_PrimitiveID", Int, 1, 0, false),
    var("gl_PrimitiveIDIn", Int, 1, 0, false),
    var("gl_InvocationID", Int, 1, 0, false),
    var("gl_Layer", Int, 1, 0, true),
    var("gl_ViewportIndex", Int, 1, 0, true),
    var("gl_TessLevelOuter", Float, 1, 4, true),
    var("gl_TessLevelInner", Float, 1, 2, true),
    var("gl_TessCoord", Float, 3, 0, false),
    var("gl_FragCoord", Float, 4, 0, false),
    var("gl_FrontFacing", Bool, 1, 0, false),
    var("gl_PointCoord", Float, 2, 0, false),
    var("gl_SampleID", Int, 1, 0, false),
    var("gl_SamplePosition", Float, 2, 0, false),
    var("gl_SampleMaskIn", Int, 1, 1, false),
    var("gl_SampleMask", Int, 1, 1, true),
    var("gl_Target0", Float, 4, 0, true),
    var("gl_Target1", Float, 4, 0, true),
    var("gl_Target2", Float, 4, 0, true),
    var("gl_Target3", Float, 4, 0, true),
    var("gl_Target4", Float, 4, 0, true),
    var("gl_Target5", Float, 4, 0, true),
    var("gl_Target6", Float, 4, 0, true),
    var("gl_Target7", Float, 4, 0, true),
    var("gl_FragDepth", Float, 1, 0, true),
    var("gl_NumWorkGroups", Uint, 3, 0, false),
    var("gl_GlobalInvocationID", Uint, 3, 0, false),
    var("gl_LocalInvocationID", Uint, 3, 0, false),
    var("gl_WorkGroupID", Uint, 3, 0, false),
    var("gl_LocalInvocationIndex", Uint, 1, 0, false),
];

pub fn find_builtin(name: &str) -> Option<&'static BuiltinVariable> {
    BUILTINS.iter().find(|b| b.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_targets_are_writable_vec4() {
        let t = find_builtin("gl_Target3").unwrap();
        assert!(t.assignable);
        assert_eq!(t.data_type(), DataType::vec(4));
    }

    #[test]
    fn geometry_inputs_are_unsized_arrays() {
        let p = find_builtin("gl_PositionIn").unwrap();
        let ty = p.data_type();
        assert!(ty.is_array());
        assert_eq!(ty.array.outer(), Some(0));
        assert!(find_builtin("gl_Nope").is_none());
    }
}
