//! Linear memory layout of structures (std140, std430, vertex packing).

use crate::arena::Arena;
use crate::types::{BaseType, CompositeMember, CompositeType, DataType, ImageFormat, PackingRule};

fn round_up(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Size and alignment of one (non-array) value.
fn base_size_align(
    ty: &DataType,
    packing: PackingRule,
    composites: &Arena<CompositeType>,
) -> Result<(u32, u32), String> {
    let vertex = packing == PackingRule::Vertex;
    Ok(match ty.base {
        BaseType::Scalar(_) => (4, 4),
        BaseType::Vector(_, n) => {
            let size = 4 * n as u32;
            let align = if vertex {
                4
            } else if n == 2 {
                8
            } else {
                16
            };
            (size, align)
        }
        BaseType::Matrix { cols, rows } => {
            if vertex {
                (4 * cols as u32 * rows as u32, 4)
            } else {
                let column_align = if rows == 2 && packing == PackingRule::Storage {
                    8
                } else {
                    16
                };
                (column_align * cols as u32, column_align)
            }
        }
        BaseType::Struct(handle) => {
            let composite = &composites[handle];
            (composite.size, composite.alignment)
        }
        BaseType::Void => return Err("void members are not allowed".into()),
        BaseType::Resource(_) => {
            return Err("resources cannot be placed inside structures".into());
        }
        BaseType::Program(_) => {
            return Err("program references cannot be placed inside structures".into());
        }
    })
}

/// Computes member placements in declaration order and returns
/// `(size, alignment)` of the whole structure.
pub fn compute_layout(
    members: &mut [CompositeMember],
    packing: PackingRule,
    composites: &Arena<CompositeType>,
) -> Result<(u32, u32), String> {
    let mut cursor = 0u32;
    let mut struct_align = match packing {
        PackingRule::Uniform => 16,
        PackingRule::Storage | PackingRule::Vertex => 4,
    };

    for member in members.iter_mut() {
        let (base_size, base_align) = base_size_align(&member.ty, packing, composites)
            .map_err(|e| format!("member '{}': {e}", member.name))?;

        let (size, align, array_count, array_stride) = if member.ty.is_array() {
            let count = member.ty.array.total().ok_or_else(|| {
                format!("member '{}': unsized arrays are not allowed in structures", member.name)
            })?;
            let (align, stride) = match packing {
                PackingRule::Uniform => {
                    let a = round_up(base_align, 16);
                    (a, round_up(base_size, a))
                }
                PackingRule::Storage => (base_align, round_up(base_size, base_align)),
                PackingRule::Vertex => (base_align, base_size),
            };
            let size = stride
                .checked_mul(count)
                .ok_or_else(|| too_large(&member.name))?;
            (size, align, count, stride)
        } else {
            (base_size, base_align, 0, 0)
        };

        let offset = match member.explicit_offset {
            Some(offset) => {
                if offset < cursor {
                    return Err(format!(
                        "member '{}': explicit offset {offset} overlaps previous member ending at {cursor}",
                        member.name
                    ));
                }
                if offset % align.min(4) != 0 {
                    return Err(format!(
                        "member '{}': explicit offset {offset} is not aligned",
                        member.name
                    ));
                }
                offset
            }
            None => cursor
                .checked_next_multiple_of(align.max(1))
                .ok_or_else(|| too_large(&member.name))?,
        };

        let format = match (member.ty.scalar_kind(), member.ty.component_count()) {
            (Some(kind), Some(n)) => ImageFormat::for_components(kind, n),
            _ => ImageFormat::Unknown,
        };

        member.layout.offset = offset;
        member.layout.size = size;
        member.layout.alignment = align;
        member.layout.array_count = array_count;
        member.layout.array_stride = array_stride;
        member.layout.format = format;

        cursor = offset.checked_add(size).ok_or_else(|| too_large(&member.name))?;
        struct_align = struct_align.max(align);
    }

    let size = match packing {
        PackingRule::Vertex => cursor,
        _ => cursor
            .checked_next_multiple_of(struct_align)
            .ok_or_else(|| "structure exceeds 4 GiB".to_string())?,
    };
    Ok((size, struct_align))
}

fn too_large(member: &str) -> String {
    format!("member '{member}': structure exceeds 4 GiB")
}
