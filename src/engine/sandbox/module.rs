//! Module records of the sandbox engine.
//!
//! A record goes `Created -> Parsed -> Evaluating -> Evaluated`, or ends up
//! `Errored` with an exception attached. Parsing a record asks the host for
//! every static import; once a root record (one created without a parent)
//! and all records below it are parsed or failed, the host is notified.

use std::collections::HashSet;
use std::rc::Rc;

use super::ast::{ImportBinding, Pos, Program, StmtKind};
use super::heap::{Internal, Key, UNDEFINED};
use super::interp::{Cx, Flow, Frame, Scope, ScopeRef, Thrown};
use super::parser::{parse_program, Goal};
use super::SandboxEngine;
use crate::engine::{EngineError, EngineHost, EngineResult, ModuleId, RawValue};
use crate::runner::ds::error::ErrorType;
use crate::runner::ds::value::ObjectClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Created,
    Parsed,
    Evaluating,
    Evaluated,
    Errored,
}

pub struct ModuleEntry {
    pub specifier: String,
    pub parent: Option<ModuleId>,
    pub state: ModuleState,
    pub program: Option<Rc<Program>>,
    pub requested: Vec<(String, ModuleId)>,
    pub namespace: RawValue,
    pub scope: ScopeRef,
    pub exception: Option<RawValue>,
    pub notified: bool,
    pub script_id: u32,
}

impl SandboxEngine {
    pub(super) fn new_module(&self, parent: Option<ModuleId>, specifier: &str) -> ModuleId {
        let namespace = self.alloc_object(ObjectClass::Plain, Internal::None);
        let scope = Scope::new_ref(Some(Rc::clone(&self.global_scope.borrow())));
        let mut modules = self.modules.borrow_mut();
        modules.push(ModuleEntry {
            specifier: specifier.to_string(),
            parent,
            state: ModuleState::Created,
            program: None,
            requested: vec![],
            namespace,
            scope,
            exception: None,
            notified: false,
            script_id: 0,
        });
        ModuleId(modules.len() as u32 - 1)
    }

    fn module_field<T>(&self, id: ModuleId, f: impl FnOnce(&ModuleEntry) -> T) -> Option<T> {
        self.modules.borrow().get(id.0 as usize).map(f)
    }

    pub(super) fn namespace_of(&self, id: ModuleId) -> Option<RawValue> {
        self.module_field(id, |m| m.namespace)
    }

    pub(super) fn fail_module(&self, id: ModuleId, exception: RawValue) {
        if let Some(m) = self.modules.borrow_mut().get_mut(id.0 as usize) {
            m.state = ModuleState::Errored;
            m.exception = Some(exception);
        }
    }

    pub(super) fn store_module_exception(&self, id: ModuleId, exception: RawValue) {
        if let Some(m) = self.modules.borrow_mut().get_mut(id.0 as usize) {
            m.exception = Some(exception);
        }
    }

    pub(super) fn exception_of(&self, id: ModuleId) -> Option<RawValue> {
        self.module_field(id, |m| m.exception).flatten()
    }

    pub(super) fn parse_module_source(
        &self,
        host: &mut dyn EngineHost,
        id: ModuleId,
        source: &str,
        filename: &str,
    ) -> EngineResult<()> {
        match self.module_field(id, |m| m.state) {
            Some(ModuleState::Created) => {}
            Some(_) => {
                return Err(EngineError::InvalidArgument(format!(
                    "module {} is already parsed",
                    id.0
                )))
            }
            None => return Err(EngineError::InvalidArgument(format!("no module {}", id.0))),
        }
        let script_id = self.register_script(host, filename, source);
        let program = match parse_program(source, Goal::Module) {
            Ok(p) => p,
            Err(e) => {
                let error = self.new_error(ErrorType::SyntaxError, &format!("{} in {}", e, filename));
                self.fail_module(id, error);
                self.exception.set(Some(error));
                self.check_ready(host);
                return Err(EngineError::Compile);
            }
        };
        let imports = program.imports.clone();
        if let Some(m) = self.modules.borrow_mut().get_mut(id.0 as usize) {
            m.state = ModuleState::Parsed;
            m.program = Some(Rc::new(program));
            m.script_id = script_id;
        }
        for specifier in imports {
            let dependency = host.fetch_imported_module(id, &specifier);
            if let Some(m) = self.modules.borrow_mut().get_mut(id.0 as usize) {
                m.requested.push((specifier, dependency));
            }
        }
        self.check_ready(host);
        Ok(())
    }

    /// Notifies the host about every root whose graph has settled.
    pub(super) fn check_ready(&self, host: &mut dyn EngineHost) {
        let roots: Vec<ModuleId> = self
            .modules
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, m)| m.parent.is_none() && !m.notified)
            .map(|(i, _)| ModuleId(i as u32))
            .collect();
        for root in roots {
            if !self.settled(root, &mut HashSet::new()) {
                continue;
            }
            let exception = self.first_exception(root, &mut HashSet::new());
            if let Some(m) = self.modules.borrow_mut().get_mut(root.0 as usize) {
                m.notified = true;
            }
            host.notify_module_ready(root, exception);
        }
    }

    fn settled(&self, id: ModuleId, visited: &mut HashSet<u32>) -> bool {
        if !visited.insert(id.0) {
            return true;
        }
        let (state, failed, deps) = match self.module_field(id, |m| {
            (
                m.state,
                m.exception.is_some(),
                m.requested.iter().map(|(_, d)| *d).collect::<Vec<_>>(),
            )
        }) {
            Some(fields) => fields,
            None => return true,
        };
        if failed {
            return true;
        }
        state != ModuleState::Created && deps.into_iter().all(|d| self.settled(d, visited))
    }

    fn first_exception(&self, id: ModuleId, visited: &mut HashSet<u32>) -> Option<RawValue> {
        if !visited.insert(id.0) {
            return None;
        }
        let (exception, deps) = self.module_field(id, |m| {
            (
                m.exception,
                m.requested.iter().map(|(_, d)| *d).collect::<Vec<_>>(),
            )
        })?;
        exception.or_else(|| deps.into_iter().find_map(|d| self.first_exception(d, visited)))
    }

    /// Runs a record's dependencies and then its body, once.
    pub(super) fn evaluate_record(&self, host: &mut dyn EngineHost, id: ModuleId) -> Flow<()> {
        let (state, exception, specifier) =
            match self.module_field(id, |m| (m.state, m.exception, m.specifier.clone())) {
                Some(fields) => fields,
                None => {
                    let message = format!("no module {}", id.0);
                    return Err(self.throw_error(host, ErrorType::Error, &message));
                }
            };
        if let Some(e) = exception {
            return Err(Thrown(e));
        }
        match state {
            ModuleState::Evaluated | ModuleState::Evaluating => return Ok(()),
            ModuleState::Created | ModuleState::Errored => {
                let message = format!("module '{}' is not linked", specifier);
                return Err(self.throw_error(host, ErrorType::Error, &message));
            }
            ModuleState::Parsed => {}
        }
        if let Some(m) = self.modules.borrow_mut().get_mut(id.0 as usize) {
            m.state = ModuleState::Evaluating;
        }

        let deps: Vec<ModuleId> = self
            .module_field(id, |m| m.requested.iter().map(|(_, d)| *d).collect())
            .unwrap_or_default();
        for dep in deps {
            if let Err(t) = self.evaluate_record(host, dep) {
                self.fail_module(id, t.0);
                return Err(t);
            }
        }
        if let Err(t) = self.bind_imports(host, id) {
            self.fail_module(id, t.0);
            return Err(t);
        }

        let (program, scope, namespace, script_id) = match self.module_field(id, |m| {
            (
                m.program.clone(),
                Rc::clone(&m.scope),
                m.namespace,
                m.script_id,
            )
        }) {
            Some((Some(program), scope, namespace, script_id)) => {
                (program, scope, namespace, script_id)
            }
            _ => return Ok(()),
        };
        let frame = Frame {
            function_name: "(module)".to_string(),
            function: UNDEFINED,
            script_id,
            pos: Pos::default(),
            scope: Rc::clone(&scope),
            this: UNDEFINED,
        };
        let cx = Cx {
            scope,
            this: UNDEFINED,
            script_id,
            exports: Some(namespace),
        };
        match self.in_frame(frame, || self.run_body(host, &program.body, &cx)) {
            Ok(_) => {
                if let Some(m) = self.modules.borrow_mut().get_mut(id.0 as usize) {
                    m.state = ModuleState::Evaluated;
                }
                Ok(())
            }
            Err(t) => {
                self.fail_module(id, t.0);
                Err(t)
            }
        }
    }

    fn bind_imports(&self, host: &mut dyn EngineHost, id: ModuleId) -> Flow<()> {
        let (program, scope, requested) = match self.module_field(id, |m| {
            (m.program.clone(), Rc::clone(&m.scope), m.requested.clone())
        }) {
            Some((Some(program), scope, requested)) => (program, scope, requested),
            _ => return Ok(()),
        };
        for stmt in &program.body {
            let (specifier, binding) = match &stmt.kind {
                StmtKind::Import { specifier, binding } => (specifier, binding),
                _ => continue,
            };
            let namespace = match requested
                .iter()
                .find(|(s, _)| s == specifier)
                .and_then(|(_, d)| self.namespace_of(*d))
            {
                Some(ns) => ns,
                None => continue,
            };
            match binding {
                ImportBinding::Bare => {}
                ImportBinding::Namespace(name) => {
                    scope.borrow_mut().vars.insert(name.clone(), namespace);
                }
                ImportBinding::Named(names) => {
                    for name in names {
                        let value = self
                            .heap
                            .borrow()
                            .object(namespace)
                            .and_then(|o| o.get(&Key::Name(name.clone())));
                        match value {
                            Some(v) => {
                                scope.borrow_mut().vars.insert(name.clone(), v);
                            }
                            None => {
                                let message = format!(
                                    "module '{}' has no export named '{}'",
                                    specifier, name
                                );
                                return Err(self.throw_error(host, ErrorType::SyntaxError, &message));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
