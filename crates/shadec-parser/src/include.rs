//! `#include` resolution.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

#[derive(Debug, thiserror::Error)]
pub enum IncludeError {
    #[error("include file '{0}' not found")]
    NotFound(String),
    #[error("failed to read '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{0}' is not valid UTF-8")]
    Encoding(String),
}

/// Loads the text of an included file.
///
/// `global` is true for `#include <path>` and false for `#include "path"`;
/// `reference_path` is the resolved path of the including file. Returns
/// the file bytes and the resolved path used for diagnostics and for
/// nested includes.
pub trait IncludeHandler {
    fn load_include(
        &self,
        global: bool,
        path: &str,
        reference_path: &str,
    ) -> Result<(Vec<u8>, String), IncludeError>;
}

/// Rejects every include.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIncludes;

impl IncludeHandler for NoIncludes {
    fn load_include(&self, _global: bool, path: &str, _reference_path: &str) -> Result<(Vec<u8>, String), IncludeError> {
        Err(IncludeError::NotFound(path.to_string()))
    }
}

/// Resolves quoted includes relative to the including file first, then
/// through the search paths in order. Angle-bracket includes only use the
/// search paths.
#[derive(Debug, Default, Clone)]
pub struct FileSystemIncludes {
    pub search_paths: Vec<PathBuf>,
}

impl FileSystemIncludes {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }
}

impl IncludeHandler for FileSystemIncludes {
    fn load_include(
        &self,
        global: bool,
        path: &str,
        reference_path: &str,
    ) -> Result<(Vec<u8>, String), IncludeError> {
        let mut candidates = Vec::new();
        if !global {
            let base = Path::new(reference_path).parent().unwrap_or(Path::new(""));
            candidates.push(base.join(path));
        }
        candidates.extend(self.search_paths.iter().map(|dir| dir.join(path)));

        for candidate in candidates {
            if candidate.is_file() {
                let resolved = candidate.to_string_lossy().into_owned();
                let bytes = std::fs::read(&candidate).map_err(|source| IncludeError::Io {
                    path: resolved.clone(),
                    source,
                })?;
                log::debug!("include '{path}' resolved to {resolved}");
                return Ok((bytes, resolved));
            }
        }
        Err(IncludeError::NotFound(path.to_string()))
    }
}

/// In-memory include files keyed by include path.
#[derive(Debug, Default, Clone)]
pub struct MemoryIncludes {
    files: FxHashMap<String, String>,
}

impl MemoryIncludes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.files.insert(path.into(), text.into());
        self
    }
}

impl IncludeHandler for MemoryIncludes {
    fn load_include(&self, _global: bool, path: &str, _reference_path: &str) -> Result<(Vec<u8>, String), IncludeError> {
        self.files
            .get(path)
            .map(|text| (text.as_bytes().to_vec(), path.to_string()))
            .ok_or_else(|| IncludeError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_includes_resolve_by_exact_path() {
        let inc = MemoryIncludes::new().with_file("common.h", "const float Pi = 3.14;");
        let (bytes, resolved) = inc.load_include(false, "common.h", "main.sh").unwrap();
        assert_eq!(resolved, "common.h");
        assert_eq!(bytes, b"const float Pi = 3.14;");
        assert!(matches!(
            inc.load_include(false, "other.h", "main.sh"),
            Err(IncludeError::NotFound(_))
        ));
    }

    #[test]
    fn no_includes_rejects_everything() {
        let err = NoIncludes.load_include(true, "a.h", "").unwrap_err();
        assert_eq!(err.to_string(), "include file 'a.h' not found");
    }

    #[test]
    fn file_system_includes_search_relative_then_paths() {
        let dir = std::env::temp_dir().join(format!("shadec-include-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("lib")).unwrap();
        std::fs::write(dir.join("lib").join("light.h"), "// light").unwrap();

        let inc = FileSystemIncludes::new(vec![dir.join("lib")]);
        let main = dir.join("main.sh").to_string_lossy().into_owned();
        let (bytes, resolved) = inc.load_include(false, "light.h", &main).unwrap();
        assert_eq!(bytes, b"// light");
        assert!(resolved.ends_with("light.h"));
        assert!(inc.load_include(true, "missing.h", &main).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
