//! Module resolvers turn an import specifier into a canonical filename and
//! the module's source text.
//!
//! Canonical filenames are `/`-separated paths relative to the resolver's
//! root, with `.` and `..` segments folded away. Specifiers starting with
//! `./` or `../` resolve against the importing module's directory, a leading
//! `/` against the root and anything else (a bare specifier) against the
//! library directory.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::runner::plugin::config::ModulesConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModule {
    pub filename: String,
    pub source: String,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot find module '{specifier}'")]
    NotFound { specifier: String },
    #[error("cannot read module '{filename}': {source}")]
    Io {
        filename: String,
        #[source]
        source: io::Error,
    },
}

/// Source of module text for the loader.
pub trait ModuleResolver {
    /// `importer` is the canonical filename of the importing module, `None`
    /// for root modules and dynamic imports.
    fn resolve(&self, specifier: &str, importer: Option<&str>) -> Result<ResolvedModule, ResolveError>;

    /// Human-readable name for this resolver (for logging).
    fn name(&self) -> &str;
}

/// Folds `.` and `..` segments and drops empty ones.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = vec![];
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// The canonical path a specifier names before any suffix is tried.
pub fn join_specifier(specifier: &str, importer: Option<&str>, lib_dir: &str) -> String {
    let joined = if specifier.starts_with("./") || specifier.starts_with("../") {
        let dir = importer
            .and_then(|i| i.rfind('/').map(|at| &i[..at]))
            .unwrap_or("");
        format!("{}/{}", dir, specifier)
    } else if let Some(rooted) = specifier.strip_prefix('/') {
        rooted.to_string()
    } else {
        format!("{}/{}", lib_dir, specifier)
    };
    normalize_path(&joined)
}

/// Files to try, in order.
fn candidate_files(base: &str, extensions: &[String], index_files: &[String]) -> Vec<String> {
    let mut out: Vec<String> = extensions
        .iter()
        .map(|ext| format!("{}{}", base, ext))
        .collect();
    for index in index_files {
        if base.is_empty() {
            out.push(index.clone());
        } else {
            out.push(format!("{}/{}", base, index));
        }
    }
    out
}

/// Reads modules from a directory tree.
pub struct FsResolver {
    root: PathBuf,
    lib_dir: String,
    extensions: Vec<String>,
    index_files: Vec<String>,
}

impl FsResolver {
    pub fn new(root: impl Into<PathBuf>, config: &ModulesConfig) -> Self {
        FsResolver {
            root: root.into(),
            lib_dir: config.lib_dir.clone(),
            extensions: config.extensions.clone(),
            index_files: config.index_files.clone(),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

impl ModuleResolver for FsResolver {
    fn resolve(&self, specifier: &str, importer: Option<&str>) -> Result<ResolvedModule, ResolveError> {
        let base = join_specifier(specifier, importer, &self.lib_dir);
        for filename in candidate_files(&base, &self.extensions, &self.index_files) {
            if filename.is_empty() {
                continue;
            }
            let path = self.root.join(&filename);
            if !path.is_file() {
                continue;
            }
            return match fs::read_to_string(&path) {
                Ok(source) => Ok(ResolvedModule { filename, source }),
                Err(source) => Err(ResolveError::Io { filename, source }),
            };
        }
        Err(ResolveError::NotFound {
            specifier: specifier.to_string(),
        })
    }

    fn name(&self) -> &str {
        "fs"
    }
}

/// Serves modules from memory, keyed by canonical filename.
pub struct MemoryResolver {
    sources: HashMap<String, String>,
    lib_dir: String,
    extensions: Vec<String>,
    index_files: Vec<String>,
}

impl Default for MemoryResolver {
    fn default() -> Self {
        MemoryResolver::new(&ModulesConfig::default())
    }
}

impl MemoryResolver {
    pub fn new(config: &ModulesConfig) -> Self {
        MemoryResolver {
            sources: HashMap::new(),
            lib_dir: config.lib_dir.clone(),
            extensions: config.extensions.clone(),
            index_files: config.index_files.clone(),
        }
    }

    pub fn insert(&mut self, filename: &str, source: &str) {
        self.sources
            .insert(normalize_path(filename), source.to_string());
    }

    pub fn with_module(mut self, filename: &str, source: &str) -> Self {
        self.insert(filename, source);
        self
    }
}

impl ModuleResolver for MemoryResolver {
    fn resolve(&self, specifier: &str, importer: Option<&str>) -> Result<ResolvedModule, ResolveError> {
        let base = join_specifier(specifier, importer, &self.lib_dir);
        candidate_files(&base, &self.extensions, &self.index_files)
            .into_iter()
            .find_map(|filename| {
                self.sources.get(&filename).map(|source| ResolvedModule {
                    source: source.clone(),
                    filename,
                })
            })
            .ok_or_else(|| ResolveError::NotFound {
                specifier: specifier.to_string(),
            })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a/./b/../c.js"), "a/c.js");
        assert_eq!(normalize_path("/x//y/"), "x/y");
        assert_eq!(normalize_path("../../up.js"), "up.js");
    }

    #[test]
    fn test_join_specifier() {
        assert_eq!(join_specifier("./b.mjs", Some("src/a.mjs"), "lib"), "src/b.mjs");
        assert_eq!(join_specifier("../b", Some("src/deep/a.mjs"), "lib"), "src/b");
        assert_eq!(join_specifier("/top.mjs", Some("src/a.mjs"), "lib"), "top.mjs");
        assert_eq!(join_specifier("util", None, "lib"), "lib/util");
        assert_eq!(join_specifier("./main.mjs", None, "lib"), "main.mjs");
    }

    #[test]
    fn test_memory_resolver_tries_suffixes_and_index() {
        let resolver = MemoryResolver::default()
            .with_module("src/a.mjs", "export let a = 1;")
            .with_module("lib/util/index.js", "export let u = 2;");
        let a = resolver.resolve("./a", Some("src/main.mjs")).map(|r| r.filename);
        assert_eq!(a.ok().as_deref(), Some("src/a.mjs"));
        let util = resolver.resolve("util", Some("src/main.mjs")).map(|r| r.filename);
        assert_eq!(util.ok().as_deref(), Some("lib/util/index.js"));
        assert!(matches!(
            resolver.resolve("./missing", None),
            Err(ResolveError::NotFound { .. })
        ));
    }
}
