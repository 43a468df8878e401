//! Resource tables (`descriptor` blocks).

use crate::error::Location;
use crate::param::AttributeList;
use crate::types::{ResourceKind, ResourceType};

/// Entry name used for the anonymous constant buffer of a descriptor.
pub const CONSTANTS_ENTRY: &str = "Constants";

/// One resource of a table.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceTableEntry {
    pub name: String,
    /// `<Table>_<name>`, the identifier backends declare.
    pub merged_name: String,
    pub ty: ResourceType,
    pub attributes: AttributeList,
    pub location: Location,
}

/// A named group of resources bound together.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceTable {
    pub name: String,
    pub entries: Vec<ResourceTableEntry>,
    pub location: Location,
}

impl ResourceTable {
    /// Merged identifier of a table member.
    pub fn merged_name(table: &str, member: &str) -> String {
        format!("{table}_{member}")
    }

    /// Table name encoded in a merged identifier: everything before the
    /// first `_`.
    pub fn table_name_of(merged: &str) -> &str {
        merged.split_once('_').map_or(merged, |(table, _)| table)
    }

    pub fn entry(&self, name: &str) -> Option<(usize, &ResourceTableEntry)> {
        self.entries.iter().enumerate().find(|(_, e)| e.name == name)
    }

    pub fn constant_buffer(&self) -> Option<(usize, &ResourceTableEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.ty.kind == ResourceKind::ConstantBuffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_is_text_before_first_underscore() {
        assert_eq!(ResourceTable::table_name_of("Material_Base_Color"), "Material");
        assert_eq!(ResourceTable::table_name_of("NoUnderscore"), "NoUnderscore");
        assert_eq!(ResourceTable::merged_name("Frame", "Time"), "Frame_Time");
    }
}
