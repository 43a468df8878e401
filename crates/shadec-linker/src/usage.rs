//! What a bundle reads from outside: vertex streams and resource tables.

use shadec_backend_core::{VertexStream, reachable_functions, referenced_parameters};
use shadec_fold::FunctionFolder;
use shadec_ir::{
    DataParameter, ErrorReported, ErrorReporter, FoldedFunction, Handle, ParameterScope, ResourceTable,
};

fn stride_attribute(param: &DataParameter, default: u32, err: &mut dyn ErrorReporter) -> Result<u32, ErrorReported> {
    let Some(text) = param.attributes.value("stride") else {
        return Ok(default);
    };
    match text.parse::<u32>() {
        Ok(stride) if stride > 0 => Ok(stride),
        _ => {
            err.report_error(
                &param.location,
                &format!("stride of vertex input '{}' must be a positive integer, got '{text}'", param.name),
            );
            Err(ErrorReported)
        }
    }
}

/// Vertex streams read by a vertex entry point and everything it calls.
///
/// Streams are keyed by bind point: the `binding` attribute of the
/// parameter, or the name of its structure. Two parameters sharing a bind
/// point must agree on layout, stride and instancing. The result lists
/// per-vertex streams before instanced ones, each group by name.
pub fn vertex_streams(
    folder: &FunctionFolder<'_>,
    entry: Handle<FoldedFunction>,
    err: &mut dyn ErrorReporter,
) -> Result<Vec<VertexStream>, ErrorReported> {
    let lib = folder.library();
    let functions = reachable_functions(folder, entry);
    let mut streams: Vec<VertexStream> = Vec::new();
    let mut failed = false;
    for p in referenced_parameters(folder, &functions) {
        let param = lib.param(p);
        if param.scope != ParameterScope::VertexInput {
            continue;
        }
        let Some(layout) = param.ty.composite() else {
            panic!("vertex input '{}' is not a structure", param.name);
        };
        let composite = &lib.composites[layout];
        let Ok(stride) = stride_attribute(param, composite.size, err) else {
            failed = true;
            continue;
        };
        let stream = VertexStream {
            param: p,
            bind_point: param.attributes.value_or("binding", &composite.name).to_string(),
            layout,
            stride,
            instanced: param.attributes.has("instanced"),
            location: param.location.clone(),
        };

        match streams.iter().find(|s| s.bind_point == stream.bind_point) {
            None => streams.push(stream),
            Some(seen) if seen.layout == stream.layout && seen.stride == stream.stride && seen.instanced == stream.instanced => {}
            Some(seen) => {
                err.report_error(
                    &stream.location,
                    &format!(
                        "vertex stream '{}' is declared as {} (stride {}{}) here and as {} (stride {}{}) at {}",
                        stream.bind_point,
                        composite.name,
                        stream.stride,
                        if stream.instanced { ", instanced" } else { "" },
                        lib.composites[seen.layout].name,
                        seen.stride,
                        if seen.instanced { ", instanced" } else { "" },
                        seen.location
                    ),
                );
                failed = true;
            }
        }
    }
    if failed {
        return Err(ErrorReported);
    }
    streams.sort_by(|a, b| (a.instanced, &a.bind_point).cmp(&(b.instanced, &b.bind_point)));
    Ok(streams)
}

/// Resource tables whose members the given entry points read, largest
/// first, ties by name.
///
/// A descriptor member is named `<Table>_<Member>` and table names carry no
/// underscore, so the table is the text before the first `_`.
pub fn used_resource_tables(
    folder: &FunctionFolder<'_>,
    entries: &[Handle<FoldedFunction>],
    err: &mut dyn ErrorReporter,
) -> Result<Vec<Handle<ResourceTable>>, ErrorReported> {
    let lib = folder.library();
    let mut functions = Vec::new();
    for &entry in entries {
        for function in reachable_functions(folder, entry) {
            if !functions.contains(&function) {
                functions.push(function);
            }
        }
    }

    let mut tables = Vec::new();
    for p in referenced_parameters(folder, &functions) {
        let param = lib.param(p);
        if param.scope != ParameterScope::GlobalParameter {
            continue;
        }
        let table_name = param.name.split('_').next().unwrap_or_default();
        let Some(table) = lib.find_resource_table(table_name) else {
            err.report_error(&param.location, &format!("'{}' names no descriptor", param.name));
            return Err(ErrorReported);
        };
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
    tables.sort_by(|&a, &b| {
        let (a, b) = (&lib.tables[a], &lib.tables[b]);
        b.entries.len().cmp(&a.entries.len()).then_with(|| a.name.cmp(&b.name))
    });
    Ok(tables)
}
