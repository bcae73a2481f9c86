//! Module loading.
//!
//! Resolving a specifier consults the cache first. A miss creates an engine
//! module record, reads the source right away and queues a parse job. The
//! engine asks for every static import while parsing, so parse jobs pull in
//! the whole dependency graph; once a root graph has settled, the engine
//! notifies the host, which queues an evaluate job for the root. A single
//! [`Session::drain_jobs`] runs all of it, including jobs queued on the way.
//!
//! Failures stick: the first exception seen for a record is stored on it and
//! handed to anyone who asks for the module later.

pub mod cache;
pub mod jobs;
pub mod resolver;

use std::rc::Rc;

use tracing::{debug, warn};

use crate::engine::{ModuleId, RawValue};
use crate::runner::ds::error::{ErrorKind, ErrorType, Exception, JsResult};
use crate::runner::ds::handle::{Handle, Owned};
use crate::runner::session::Session;

use self::cache::{ModuleCache, ModuleRecord};
use self::jobs::{JobQueue, ModuleJob};
use self::resolver::{normalize_path, ModuleResolver};

pub struct ModuleLoader {
    resolver: Box<dyn ModuleResolver>,
    cache: ModuleCache,
    jobs: JobQueue,
}

impl ModuleLoader {
    pub fn new(resolver: Box<dyn ModuleResolver>) -> Self {
        ModuleLoader {
            resolver,
            cache: ModuleCache::default(),
            jobs: JobQueue::default(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.jobs.clear();
        self.cache.clear();
    }
}

impl Session {
    pub fn set_resolver(&mut self, resolver: impl ModuleResolver + 'static) {
        debug!(resolver = resolver.name(), "module resolver installed");
        self.modules.resolver = Box::new(resolver);
    }

    /// Evaluates `[source]` as the root module `filename`, running its whole
    /// dependency graph: `[source] -> [namespace]`.
    ///
    /// A filename already in the cache is not parsed again. Compile errors in
    /// the root clear the job queue.
    pub fn eval_module(&mut self, filename: &str) -> JsResult<()> {
        let source = self.require_string(-1)?;
        let filename = normalize_path(filename);
        let engine = Rc::clone(self.engine());

        let module = match self.modules.cache.get(&filename) {
            Some(record) => record.module,
            None => {
                let module = engine.create_module(None, &filename);
                self.modules.cache.insert(ModuleRecord {
                    filename: filename.clone(),
                    module,
                    exception: None,
                });
                let context = self.next_source_context();
                if let Err(err) = engine.parse_module(self, module, &source, &filename, context) {
                    let e = self.engine_failure(err);
                    self.store_module_failure(module, &e);
                    self.modules.jobs.clear();
                    self.pop(1)?;
                    return Err(e);
                }
                module
            }
        };

        self.drain_jobs();

        if let Some(e) = self.stored_exception(module) {
            self.pop(1)?;
            return Err(e);
        }
        let outcome = engine
            .evaluate_module(self, module)
            .map(|ns| Owned::new(&engine, ns))
            .map_err(|err| self.engine_failure(err));
        self.pop(1)?;
        match outcome {
            Ok(namespace) => {
                self.stack.push(Handle::Owned(namespace));
                Ok(())
            }
            Err(e) => {
                self.store_module_failure(module, &e);
                Err(e)
            }
        }
    }

    /// Resolves `specifier` as a root module and queues its parse without
    /// draining. Loading the same file twice yields the same record.
    pub fn load_module(&mut self, specifier: &str) -> JsResult<ModuleId> {
        let module = self.enqueue_module(None, specifier);
        match self.stored_exception(module) {
            Some(e) => Err(e),
            None => Ok(module),
        }
    }

    /// Runs queued module jobs until none are left; returns how many ran.
    pub fn drain_jobs(&mut self) -> usize {
        let mut processed = 0;
        while let Some(job) = self.modules.jobs.pop() {
            processed += 1;
            let engine = Rc::clone(self.engine());
            match job {
                ModuleJob::Parse {
                    module,
                    filename,
                    source,
                } => {
                    debug!(filename = %filename, "parse job");
                    let context = self.next_source_context();
                    if let Err(err) = engine.parse_module(self, module, &source, &filename, context) {
                        let e = self.engine_failure(err);
                        self.store_module_failure(module, &e);
                    }
                }
                ModuleJob::Evaluate { module } => {
                    debug!(module = module.0, "evaluate job");
                    if let Err(err) = engine.evaluate_module(self, module) {
                        let e = self.engine_failure(err);
                        self.store_module_failure(module, &e);
                    }
                }
            }
        }
        processed
    }

    /// True while module jobs are waiting.
    pub fn is_busy(&self) -> bool {
        !self.modules.jobs.is_empty()
    }

    pub fn pending_jobs(&self) -> usize {
        self.modules.jobs.len()
    }

    /// Number of cached module files.
    pub fn module_count(&self) -> usize {
        self.modules.cache.len()
    }

    /// Number of distinct specifiers that failed to resolve.
    pub fn failed_module_count(&self) -> usize {
        self.modules.cache.failed_len()
    }

    /// The failure stored for a cached file, if any.
    pub fn module_error(&self, filename: &str) -> Option<&Exception> {
        self.modules
            .cache
            .get(&normalize_path(filename))
            .and_then(|r| r.exception.as_ref())
    }

    fn stored_exception(&self, module: ModuleId) -> Option<Exception> {
        self.modules
            .cache
            .by_module(module)
            .and_then(|r| r.exception.clone())
    }

    fn store_module_failure(&mut self, module: ModuleId, e: &Exception) {
        self.engine().set_module_exception(module, e.raw());
        if let Some(record) = self.modules.cache.by_module_mut(module) {
            if record.exception.is_none() {
                record.exception = Some(e.clone());
            }
        }
    }

    fn enqueue_module(&mut self, importer: Option<ModuleId>, specifier: &str) -> ModuleId {
        let importer_name = importer
            .and_then(|m| self.modules.cache.by_module(m))
            .map(|r| r.filename.clone());
        let engine = Rc::clone(self.engine());
        match self
            .modules
            .resolver
            .resolve(specifier, importer_name.as_deref())
        {
            Ok(resolved) => {
                if let Some(record) = self.modules.cache.get(&resolved.filename) {
                    return record.module;
                }
                let module = engine.create_module(importer, &resolved.filename);
                debug!(specifier, filename = %resolved.filename, "module resolved");
                self.modules.cache.insert(ModuleRecord {
                    filename: resolved.filename.clone(),
                    module,
                    exception: None,
                });
                self.modules.jobs.push(ModuleJob::Parse {
                    module,
                    filename: resolved.filename,
                    source: resolved.source,
                });
                module
            }
            Err(err) => {
                if let Some(record) = self
                    .modules
                    .cache
                    .failed(importer_name.as_deref(), specifier)
                {
                    return record.module;
                }
                warn!(specifier, "module resolution failed: {}", err);
                let module = engine.create_module(importer, specifier);
                let e = self.fail(ErrorKind::ModuleResolution, ErrorType::Error, &err.to_string());
                engine.set_module_exception(module, e.raw());
                self.modules.cache.insert_failed(
                    importer_name,
                    ModuleRecord {
                        filename: specifier.to_string(),
                        module,
                        exception: Some(e),
                    },
                );
                module
            }
        }
    }

    /// Engine request for a module record; dynamic imports (no importer) are
    /// loaded and run before returning.
    pub(crate) fn fetch_module(&mut self, importer: Option<ModuleId>, specifier: &str) -> ModuleId {
        let module = self.enqueue_module(importer, specifier);
        if importer.is_none() {
            self.drain_jobs();
        }
        module
    }

    /// A root graph has settled: queue its evaluation, or record why it
    /// cannot run.
    pub(crate) fn module_ready(&mut self, module: ModuleId, exception: Option<RawValue>) {
        let raw = match exception {
            None => {
                self.modules.jobs.push(ModuleJob::Evaluate { module });
                return;
            }
            Some(raw) => raw,
        };
        let e = match self.recorded_failure(raw) {
            Some(e) => e,
            None => self.wrap(raw, ErrorKind::Compile),
        };
        self.store_module_failure(module, &e);
    }

    /// A stored exception carrying exactly this value, so a dependency's
    /// failure keeps its original kind when it surfaces on the root.
    fn recorded_failure(&self, raw: RawValue) -> Option<Exception> {
        self.modules
            .cache
            .iter()
            .filter_map(|r| r.exception.as_ref())
            .find(|e| e.raw() == raw)
            .cloned()
    }
}
