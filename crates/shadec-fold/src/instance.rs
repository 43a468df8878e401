//! Program instancing: binding a program to fully resolved constants.

use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use shadec_ir::{
    CodeLibrary, DataParameter, DataValue, ErrorReported, ErrorReporter, Handle, KeyBuilder, Location,
    ParameterScope, Program, ProgramConstants, ProgramInstance,
};

use crate::eval::Evaluator;

/// Process-wide memo of program instances, keyed by library and
/// instance key. Hits are verified against the stored instance.
///
/// Entries of a dropped library are evicted the next time a library the
/// cache has not seen yet instances a program.
#[derive(Debug, Default)]
pub struct InstanceCache {
    entries: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    instances: FxHashMap<(u64, u64), Arc<ProgramInstance>>,
    libraries: FxHashMap<u64, Weak<()>>,
}

impl Entries {
    fn register_library(&mut self, lib: &CodeLibrary) {
        if self.libraries.contains_key(&lib.id()) {
            return;
        }
        self.evict_dropped();
        self.libraries.insert(lib.id(), lib.liveness());
    }

    fn evict_dropped(&mut self) {
        let before = self.instances.len();
        self.libraries.retain(|_, alive| alive.strong_count() > 0);
        let libraries = &self.libraries;
        self.instances.retain(|(id, _), _| libraries.contains_key(id));
        let evicted = before - self.instances.len();
        if evicted > 0 {
            log::debug!("evicted {evicted} instances of dropped libraries");
        }
    }
}

static GLOBAL: LazyLock<InstanceCache> = LazyLock::new(InstanceCache::new);

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every compilation in the process.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    pub fn len(&self) -> usize {
        self.entries.lock().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().instances.is_empty()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.instances.clear();
        entries.libraries.clear();
    }

    /// Drops the instances of every library that no longer exists.
    pub fn evict_dropped(&self) {
        self.entries.lock().evict_dropped();
    }

    /// Resolves every constant `program` declares or inherits, with
    /// `source_constants` overriding declared defaults.
    ///
    /// Errors are reported at `use_site`, the export or call that asked
    /// for the instance.
    pub fn create_program_instance(
        &self,
        lib: &CodeLibrary,
        program: Handle<Program>,
        source_constants: &ProgramConstants,
        use_site: &Location,
        err: &mut dyn ErrorReporter,
    ) -> Result<Arc<ProgramInstance>, ErrorReported> {
        let key = instance_key(lib, program, source_constants);
        let slot = (lib.id(), key);
        if let Some(hit) = self.entries.lock().instances.get(&slot) {
            verify_hit(hit, program, source_constants);
            log::trace!("instance cache hit for '{}' ({key:016x})", lib.program(program).name);
            return Ok(hit.clone());
        }

        let instance = Arc::new(build_instance(lib, program, source_constants, key, use_site, err)?);
        log::debug!(
            "instanced '{}' with {} constants ({key:016x})",
            lib.program(program).name,
            instance.constants.len()
        );
        let mut entries = self.entries.lock();
        entries.register_library(lib);
        let stored = entries.instances.entry(slot).or_insert(instance);
        verify_hit(stored, program, source_constants);
        Ok(stored.clone())
    }
}

fn verify_hit(hit: &ProgramInstance, program: Handle<Program>, source_constants: &ProgramConstants) {
    if hit.program != program || hit.source_constants != *source_constants {
        panic!("program instance key collision for {:016x}", hit.key);
    }
}

/// CRC64 over the program name and the caller supplied constants.
pub fn instance_key(lib: &CodeLibrary, program: Handle<Program>, source_constants: &ProgramConstants) -> u64 {
    let mut key = KeyBuilder::new();
    key.str(&lib.program(program).name).u32(source_constants.len() as u32);
    for (param, value) in source_constants.iter() {
        key.u32(param.raw()).str(&lib.param(param).name);
        value.write_key(&mut key, |p| lib.program(p).name.clone());
    }
    key.finish()
}

/// Every `GlobalConst` a program can see through composition, parents
/// first and each program once.
pub fn program_constants(lib: &CodeLibrary, program: Handle<Program>) -> Vec<Handle<DataParameter>> {
    fn visit(
        lib: &CodeLibrary,
        program: Handle<Program>,
        seen: &mut FxHashSet<Handle<Program>>,
        out: &mut Vec<Handle<DataParameter>>,
    ) {
        if !seen.insert(program) {
            return;
        }
        let p = lib.program(program);
        for &parent in &p.parents {
            visit(lib, parent, seen, out);
        }
        out.extend(
            p.parameters
                .iter()
                .copied()
                .filter(|&h| lib.param(h).scope == ParameterScope::GlobalConst),
        );
    }
    let mut out = Vec::new();
    visit(lib, program, &mut FxHashSet::default(), &mut out);
    out
}

fn value_fits(lib: &CodeLibrary, param: &DataParameter, value: &DataValue) -> bool {
    match (value, param.ty.program()) {
        (DataValue::Program(p), Some(declared)) => *p == declared || derives_from(lib, *p, declared),
        (DataValue::Components(c), None) => {
            let Some(count) = lib.flat_component_count(&param.ty) else {
                return false;
            };
            let kind = param.ty.without_array().scalar_kind();
            c.len() == count
                && c.iter()
                    .all(|c| !c.is_defined() || kind.is_none() || c.kind() == kind)
        }
        _ => false,
    }
}

fn derives_from(lib: &CodeLibrary, program: Handle<Program>, ancestor: Handle<Program>) -> bool {
    lib.program(program)
        .parents
        .iter()
        .any(|&p| p == ancestor || derives_from(lib, p, ancestor))
}

fn build_instance(
    lib: &CodeLibrary,
    program: Handle<Program>,
    source_constants: &ProgramConstants,
    key: u64,
    use_site: &Location,
    err: &mut dyn ErrorReporter,
) -> Result<ProgramInstance, ErrorReported> {
    let program_name = &lib.program(program).name;
    let declared = program_constants(lib, program);

    let mut failed = false;
    for (param, value) in source_constants.iter() {
        let p = lib.param(param);
        if !declared.contains(&param) {
            err.report_error(use_site, &format!("'{}' is not a constant of '{program_name}'", p.name));
            failed = true;
        } else if !value_fits(lib, p, value) {
            err.report_error(
                use_site,
                &format!("value {value} does not fit constant '{}' of type '{}'", p.name, lib.type_name(&p.ty)),
            );
            failed = true;
        }
    }
    if failed {
        return Err(ErrorReported);
    }

    // Placeholders first, so evaluation order never reads a missing entry.
    let mut constants = ProgramConstants::new();
    for &param in &declared {
        let count = lib.flat_component_count(&lib.param(param).ty).unwrap_or(1);
        constants.set(param, DataValue::undefined(count));
    }
    for (param, value) in source_constants.iter() {
        constants.set(param, value.clone());
    }

    // Numeric constants before shader references.
    let (numeric, programs): (Vec<_>, Vec<_>) =
        declared.iter().copied().partition(|&h| lib.param(h).ty.program().is_none());
    for param in numeric.into_iter().chain(programs) {
        if source_constants.get(param).is_some() {
            continue;
        }
        let p = lib.param(param);
        let Some(init) = p.initializer else {
            err.report_error(
                use_site,
                &format!(
                    "constant '{}' of '{program_name}' has no value (declared at {})",
                    p.name, p.location
                ),
            );
            failed = true;
            continue;
        };
        let value = Evaluator::new(lib, Some(program), &constants).evaluate(init);
        match value {
            Ok(value) if value.is_defined() => constants.set(param, value),
            Ok(_) => {
                err.report_error(
                    use_site,
                    &format!(
                        "constant '{}' of '{program_name}' is not fully defined (declared at {})",
                        p.name, p.location
                    ),
                );
                failed = true;
            }
            Err(e) => {
                err.report_error(
                    use_site,
                    &format!("constant '{}' of '{program_name}': {e} (declared at {})", p.name, p.location),
                );
                failed = true;
            }
        }
    }
    if failed {
        return Err(ErrorReported);
    }

    Ok(ProgramInstance {
        program,
        source_constants: source_constants.clone(),
        constants,
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadec_ir::{CollectingReporter, DataType, ParameterScope};

    fn library() -> (CodeLibrary, Handle<Program>, Handle<DataParameter>) {
        let mut lib = CodeLibrary::new();
        let program = lib.create_program("P", Default::default(), Location::internal());
        let k = DataParameter::new("K", ParameterScope::GlobalConst, DataType::FLOAT, Location::internal());
        let k = lib.add_parameter(program, k).unwrap();
        (lib, program, k)
    }

    #[test]
    fn missing_constant_cites_use_site() {
        let (lib, program, _) = library();
        let cache = InstanceCache::new();
        let mut err = CollectingReporter::new();
        let site = Location::new("lib.csl".into(), 9, 4);
        let result = cache.create_program_instance(&lib, program, &ProgramConstants::new(), &site, &mut err);
        assert!(result.is_err());
        let text = err.error_text();
        assert!(text.contains("lib.csl:9:4"), "{text}");
        assert!(text.contains("constant 'K' of 'P' has no value"), "{text}");
        assert!(cache.is_empty());
    }

    #[test]
    fn equal_requests_share_one_instance() {
        let (lib, program, k) = library();
        let cache = InstanceCache::new();
        let mut err = CollectingReporter::new();
        let mut constants = ProgramConstants::new();
        constants.set(k, DataValue::float(2.0));
        let a = cache
            .create_program_instance(&lib, program, &constants, &Location::internal(), &mut err)
            .unwrap();
        let b = cache
            .create_program_instance(&lib, program, &constants.clone(), &Location::internal(), &mut err)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(a.constants.get(k), Some(&DataValue::float(2.0)));
    }

    #[test]
    fn mistyped_values_are_rejected() {
        let (lib, program, k) = library();
        let mut err = CollectingReporter::new();
        let mut constants = ProgramConstants::new();
        constants.set(k, DataValue::int(2));
        let result =
            InstanceCache::new().create_program_instance(&lib, program, &constants, &Location::internal(), &mut err);
        assert!(result.is_err());
        assert!(err.error_text().contains("does not fit"));
    }

    #[test]
    fn dropped_libraries_leave_the_cache() {
        let cache = InstanceCache::new();
        let mut err = CollectingReporter::new();
        for round in 0..5 {
            let (lib, program, k) = library();
            let mut constants = ProgramConstants::new();
            constants.set(k, DataValue::float(round as f32));
            cache
                .create_program_instance(&lib, program, &constants, &Location::internal(), &mut err)
                .unwrap();
            assert_eq!(cache.len(), 1, "round {round}");
        }
        cache.evict_dropped();
        assert!(cache.is_empty());
    }

    #[test]
    fn live_libraries_keep_their_instances() {
        let (first, program, _) = library();
        let (second, _, _) = library();
        let cache = InstanceCache::new();
        let mut err = CollectingReporter::new();
        let mut constants = ProgramConstants::new();
        constants.set(first.find_parameter(program, "K", false).unwrap(), DataValue::float(1.0));
        for lib in [&first, &second] {
            cache
                .create_program_instance(lib, program, &constants, &Location::internal(), &mut err)
                .unwrap();
        }
        cache.evict_dropped();
        assert_eq!(cache.len(), 2);
    }
}
