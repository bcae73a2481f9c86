use std::collections::HashMap;

use crate::engine::ModuleId;
use crate::runner::ds::error::Exception;

/// Host-side state of one module.
#[derive(Debug)]
pub struct ModuleRecord {
    /// Canonical filename, or the raw specifier when resolution failed.
    pub filename: String,
    pub module: ModuleId,
    /// The first failure seen while resolving, parsing or evaluating.
    pub exception: Option<Exception>,
}

/// Importing file (if any) and specifier of a failed resolution.
type FailureKey = (Option<String>, String);

/// At most one record per canonical filename, and one per failed
/// resolution.
#[derive(Default)]
pub struct ModuleCache {
    records: Vec<ModuleRecord>,
    by_filename: HashMap<String, usize>,
    by_module: HashMap<ModuleId, usize>,
    failed: HashMap<FailureKey, usize>,
}

impl ModuleCache {
    pub fn get(&self, filename: &str) -> Option<&ModuleRecord> {
        self.by_filename.get(filename).map(|&i| &self.records[i])
    }

    pub fn by_module(&self, module: ModuleId) -> Option<&ModuleRecord> {
        self.by_module.get(&module).map(|&i| &self.records[i])
    }

    pub fn by_module_mut(&mut self, module: ModuleId) -> Option<&mut ModuleRecord> {
        match self.by_module.get(&module) {
            Some(&i) => self.records.get_mut(i),
            None => None,
        }
    }

    /// The record of an earlier failed resolution of `specifier` from
    /// `importer`.
    pub fn failed(&self, importer: Option<&str>, specifier: &str) -> Option<&ModuleRecord> {
        let key = (importer.map(str::to_string), specifier.to_string());
        self.failed.get(&key).map(|&i| &self.records[i])
    }

    /// Adds a record reachable by filename and by module id.
    pub fn insert(&mut self, record: ModuleRecord) {
        let at = self.records.len();
        self.by_filename.insert(record.filename.clone(), at);
        self.push(record);
    }

    /// Adds the record of a specifier that never resolved to a filename.
    pub fn insert_failed(&mut self, importer: Option<String>, record: ModuleRecord) {
        let at = self.records.len();
        self.failed.insert((importer, record.filename.clone()), at);
        self.push(record);
    }

    fn push(&mut self, record: ModuleRecord) {
        let at = self.records.len();
        self.by_module.insert(record.module, at);
        self.records.push(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.by_filename.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_filename.is_empty()
    }

    pub fn failed_len(&self) -> usize {
        self.failed.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_filename.clear();
        self.by_module.clear();
        self.failed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(filename: &str, id: u32) -> ModuleRecord {
        ModuleRecord {
            filename: filename.to_string(),
            module: ModuleId(id),
            exception: None,
        }
    }

    #[test]
    fn test_failures_are_keyed_by_importer() {
        let mut cache = ModuleCache::default();
        cache.insert(record("/app/main.mjs", 1));
        cache.insert_failed(Some("/app/main.mjs".to_string()), record("./gone.mjs", 2));
        cache.insert_failed(None, record("./gone.mjs", 3));
        let from_main = cache.failed(Some("/app/main.mjs"), "./gone.mjs");
        assert_eq!(from_main.map(|r| r.module), Some(ModuleId(2)));
        assert_eq!(cache.failed(None, "./gone.mjs").map(|r| r.module), Some(ModuleId(3)));
        assert!(cache.failed(Some("/app/other.mjs"), "./gone.mjs").is_none());
        let by_id = cache.by_module(ModuleId(3)).map(|r| r.filename.as_str());
        assert_eq!(by_id, Some("./gone.mjs"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.failed_len(), 2);
        cache.clear();
        assert_eq!(cache.failed_len(), 0);
    }
}
