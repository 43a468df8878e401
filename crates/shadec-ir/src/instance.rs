//! Program instances: a program bound to resolved compile-time constants.

use crate::arena::Handle;
use crate::param::DataParameter;
use crate::program::Program;
use crate::value::DataValue;

/// Constant values keyed by parameter, kept sorted by handle so two maps
/// with the same content compare and iterate identically.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ProgramConstants {
    entries: Vec<(Handle<DataParameter>, DataValue)>,
}

impl ProgramConstants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, param: Handle<DataParameter>, value: DataValue) {
        match self.entries.binary_search_by_key(&param, |(p, _)| *p) {
            Ok(i) => self.entries[i].1 = value,
            Err(i) => self.entries.insert(i, (param, value)),
        }
    }

    pub fn get(&self, param: Handle<DataParameter>) -> Option<&DataValue> {
        self.entries
            .binary_search_by_key(&param, |(p, _)| *p)
            .ok()
            .map(|i| &self.entries[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<DataParameter>, &DataValue)> {
        self.entries.iter().map(|(p, v)| (*p, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A program with every `GlobalConst` it (transitively) declares resolved
/// to a fully defined value.
#[derive(Debug, PartialEq, Eq)]
pub struct ProgramInstance {
    pub program: Handle<Program>,
    /// Caller supplied values the instance was requested with.
    pub source_constants: ProgramConstants,
    /// Every resolved constant, including evaluated defaults.
    pub constants: ProgramConstants,
    /// CRC64 over the program name and the source constants.
    pub key: u64,
}
