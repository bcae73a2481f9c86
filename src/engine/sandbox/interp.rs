//! Tree-walking evaluation of the sandbox dialect.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::ast::*;
use super::heap::{CellData, Internal, Key, FALSE, NULL, TRUE, UNDEFINED};
use super::values::{Lookup, Store};
use super::SandboxEngine;
use crate::engine::{EngineHost, FunctionId, NativeCall, RawValue};
use crate::runner::ds::error::ErrorType;
use crate::runner::ds::value::{JsValue, ObjectClass};

/// Deepest script call nesting before a `RangeError`.
const MAX_CALL_DEPTH: usize = 128;

pub struct Scope {
    pub vars: HashMap<String, RawValue>,
    pub parent: Option<ScopeRef>,
}

pub type ScopeRef = Rc<RefCell<Scope>>;

impl Scope {
    pub fn new_ref(parent: Option<ScopeRef>) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent,
        }))
    }

    fn lookup(scope: &ScopeRef, name: &str) -> Option<RawValue> {
        let mut current = Some(Rc::clone(scope));
        while let Some(s) = current {
            let s = s.borrow();
            if let Some(v) = s.vars.get(name) {
                return Some(*v);
            }
            current = s.parent.clone();
        }
        None
    }

    fn assign(scope: &ScopeRef, name: &str, value: RawValue) -> bool {
        let mut current = Some(Rc::clone(scope));
        while let Some(s) = current {
            let mut s = s.borrow_mut();
            if let Some(slot) = s.vars.get_mut(name) {
                *slot = value;
                return true;
            }
            current = s.parent.clone();
        }
        false
    }
}

/// A script activation, as the diagnostics API sees it.
pub struct Frame {
    pub function_name: String,
    pub function: RawValue,
    pub script_id: u32,
    pub pos: Pos,
    pub scope: ScopeRef,
    pub this: RawValue,
}

/// A value thrown by script or by a host function.
#[derive(Debug, Clone, Copy)]
pub struct Thrown(pub RawValue);

pub type Flow<T> = Result<T, Thrown>;

/// How a statement list finished.
pub enum Completion {
    Normal(Option<RawValue>),
    Return(RawValue),
}

/// Where a statement list runs.
pub struct Cx {
    pub scope: ScopeRef,
    pub this: RawValue,
    pub script_id: u32,
    /// Namespace object receiving `export`s, for module bodies.
    pub exports: Option<RawValue>,
}

pub enum Callable {
    Host(FunctionId),
    Script {
        decl: Rc<FunctionDecl>,
        scope: ScopeRef,
        script_id: u32,
    },
    Compiled {
        program: Rc<Program>,
        script_id: u32,
    },
    ErrorConstructor(ErrorType),
    NotCallable,
}

impl SandboxEngine {
    pub(super) fn callable(&self, f: RawValue) -> Callable {
        let heap = self.heap.borrow();
        match heap.object(f).map(|o| &o.internal) {
            Some(Internal::HostFunction(id)) => Callable::Host(*id),
            Some(Internal::ScriptFunction {
                decl,
                scope,
                script_id,
            }) => Callable::Script {
                decl: Rc::clone(decl),
                scope: Rc::clone(scope),
                script_id: *script_id,
            },
            Some(Internal::CompiledScript { program, script_id }) => Callable::Compiled {
                program: Rc::clone(program),
                script_id: *script_id,
            },
            Some(Internal::ErrorConstructor(kind)) => Callable::ErrorConstructor(*kind),
            _ => Callable::NotCallable,
        }
    }

    pub(super) fn is_callable(&self, f: RawValue) -> bool {
        !matches!(self.callable(f), Callable::NotCallable)
    }

    pub(super) fn is_object(&self, v: RawValue) -> bool {
        self.heap.borrow().object(v).is_some()
    }

    /// Raises `value`, letting the debugger see it first.
    pub(super) fn raise(&self, host: &mut dyn EngineHost, value: RawValue) -> Thrown {
        self.report_throw(host, value);
        Thrown(value)
    }

    pub(super) fn throw_error(
        &self,
        host: &mut dyn EngineHost,
        kind: ErrorType,
        message: &str,
    ) -> Thrown {
        let error = self.new_error(kind, message);
        self.raise(host, error)
    }

    pub(super) fn in_frame<T>(&self, frame: Frame, f: impl FnOnce() -> T) -> T {
        self.frames.borrow_mut().push(frame);
        let result = f();
        self.frames.borrow_mut().pop();
        result
    }

    pub(super) fn run_body(
        &self,
        host: &mut dyn EngineHost,
        body: &[Stmt],
        cx: &Cx,
    ) -> Flow<Completion> {
        self.hoist(body, cx);
        let mut last = None;
        for stmt in body {
            self.before_statement(host, stmt.pos, cx.script_id);
            match self.exec(host, stmt, cx)? {
                Completion::Normal(Some(v)) => last = Some(v),
                Completion::Normal(None) => {}
                ret @ Completion::Return(_) => return Ok(ret),
            }
        }
        Ok(Completion::Normal(last))
    }

    fn hoist(&self, body: &[Stmt], cx: &Cx) {
        for stmt in body {
            if let StmtKind::Function { decl, exported } = &stmt.kind {
                if let Some(name) = &decl.name {
                    let f = self.make_function(decl, cx);
                    self.declare(cx, name, f);
                    if *exported {
                        self.export(cx, name, f);
                    }
                }
            }
        }
    }

    fn is_global_scope(&self, scope: &ScopeRef) -> bool {
        Rc::ptr_eq(scope, &self.global_scope.borrow())
    }

    fn declare(&self, cx: &Cx, name: &str, value: RawValue) {
        if self.is_global_scope(&cx.scope) {
            let global = self.global.get();
            if let Some(o) = self.heap.borrow_mut().object_mut(global) {
                o.set(Key::Name(name.to_string()), value);
            }
        } else {
            cx.scope.borrow_mut().vars.insert(name.to_string(), value);
        }
    }

    fn export(&self, cx: &Cx, name: &str, value: RawValue) {
        if let Some(ns) = cx.exports {
            if let Some(o) = self.heap.borrow_mut().object_mut(ns) {
                o.set(Key::Name(name.to_string()), value);
            }
        }
    }

    fn exec(&self, host: &mut dyn EngineHost, stmt: &Stmt, cx: &Cx) -> Flow<Completion> {
        match &stmt.kind {
            StmtKind::Import { .. } | StmtKind::Function { .. } => Ok(Completion::Normal(None)),
            StmtKind::Let {
                name,
                init,
                exported,
            } => {
                let value = match init {
                    Some(e) => self.eval(host, e, cx)?,
                    None => UNDEFINED,
                };
                self.declare(cx, name, value);
                if *exported {
                    self.export(cx, name, value);
                }
                Ok(Completion::Normal(None))
            }
            StmtKind::Return(e) => {
                let value = match e {
                    Some(e) => self.eval(host, e, cx)?,
                    None => UNDEFINED,
                };
                Ok(Completion::Return(value))
            }
            StmtKind::Throw(e) => {
                let value = self.eval(host, e, cx)?;
                Err(self.raise(host, value))
            }
            StmtKind::Debugger => {
                self.debugger_statement(host, stmt.pos, cx.script_id);
                Ok(Completion::Normal(None))
            }
            StmtKind::If {
                test,
                then,
                otherwise,
            } => {
                let t = self.eval(host, test, cx)?;
                if self.truthy(t) {
                    self.run_body(host, then, cx)
                } else {
                    self.run_body(host, otherwise, cx)
                }
            }
            StmtKind::Expr(e) => Ok(Completion::Normal(Some(self.eval(host, e, cx)?))),
        }
    }

    pub(super) fn eval(&self, host: &mut dyn EngineHost, expr: &Expr, cx: &Cx) -> Flow<RawValue> {
        match expr {
            Expr::Number(n) => Ok(self.alloc(CellData::Number(*n))),
            Expr::Str(s) => Ok(self.alloc(CellData::Str(s.clone()))),
            Expr::Bool(b) => Ok(if *b { TRUE } else { FALSE }),
            Expr::Null => Ok(NULL),
            Expr::Undefined => Ok(UNDEFINED),
            Expr::This => Ok(cx.this),
            Expr::Ident(name) => self.resolve(host, cx, name),
            Expr::Member(object, name) => {
                let o = self.eval(host, object, cx)?;
                self.member(host, o, name)
            }
            Expr::Call { callee, args } => {
                let (f, this) = match &**callee {
                    Expr::Member(object, name) => {
                        let o = self.eval(host, object, cx)?;
                        (self.member(host, o, name)?, o)
                    }
                    other => (self.eval(host, other, cx)?, UNDEFINED),
                };
                let argv = self.eval_args(host, args, cx)?;
                if !self.is_callable(f) {
                    let message = format!("{} is not a function", callee.describe());
                    return Err(self.throw_error(host, ErrorType::TypeError, &message));
                }
                self.call_value(host, f, this, &argv)
            }
            Expr::New { callee, args } => {
                let f = self.eval(host, callee, cx)?;
                let argv = self.eval_args(host, args, cx)?;
                self.construct_value(host, f, &argv, &callee.describe())
            }
            Expr::Assign { target, value } => match &**target {
                Expr::Ident(name) => {
                    let v = self.eval(host, value, cx)?;
                    if !Scope::assign(&cx.scope, name, v) {
                        let global = self.global.get();
                        if let Some(o) = self.heap.borrow_mut().object_mut(global) {
                            o.set(Key::Name(name.clone()), v);
                        }
                    }
                    Ok(v)
                }
                Expr::Member(object, name) => {
                    let o = self.eval(host, object, cx)?;
                    let v = self.eval(host, value, cx)?;
                    self.assign_prop(host, o, Key::Name(name.clone()), v)?;
                    Ok(v)
                }
                _ => Err(self.throw_error(host, ErrorType::SyntaxError, "invalid assignment target")),
            },
            Expr::Binary { op, left, right } => {
                let l = self.eval(host, left, cx)?;
                let r = self.eval(host, right, cx)?;
                self.binary(host, *op, l, r)
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(host, operand, cx)?;
                match op {
                    UnaryOp::Neg => {
                        let n = self.number_or_throw(host, v)?;
                        Ok(self.alloc(CellData::Number(-n)))
                    }
                    UnaryOp::Not => Ok(if self.truthy(v) { FALSE } else { TRUE }),
                }
            }
            Expr::Function(decl) => Ok(self.make_function(decl, cx)),
            Expr::Object(props) => {
                let o = self.alloc_object(ObjectClass::Plain, Internal::None);
                for (key, e) in props {
                    let v = self.eval(host, e, cx)?;
                    if let Some(obj) = self.heap.borrow_mut().object_mut(o) {
                        obj.set(Key::Name(key.clone()), v);
                    }
                }
                Ok(o)
            }
            Expr::Array(items) => {
                let a = self.alloc_object(ObjectClass::Array, Internal::None);
                for (i, e) in items.iter().enumerate() {
                    let v = self.eval(host, e, cx)?;
                    if let Some(obj) = self.heap.borrow_mut().object_mut(a) {
                        obj.set(Key::Name(i.to_string()), v);
                    }
                }
                Ok(a)
            }
            Expr::DynamicImport(specifier) => {
                let s = self.eval(host, specifier, cx)?;
                let specifier = self.display(s);
                let module = host.fetch_dynamic_import(&specifier);
                if let Some(e) = self.exception_of(module) {
                    return Err(self.raise(host, e));
                }
                match self.namespace_of(module) {
                    Some(ns) => Ok(ns),
                    None => {
                        let message = format!("cannot import '{}'", specifier);
                        Err(self.throw_error(host, ErrorType::Error, &message))
                    }
                }
            }
        }
    }

    fn eval_args(&self, host: &mut dyn EngineHost, args: &[Expr], cx: &Cx) -> Flow<Vec<RawValue>> {
        let mut argv = Vec::with_capacity(args.len());
        for a in args {
            argv.push(self.eval(host, a, cx)?);
        }
        Ok(argv)
    }

    fn resolve(&self, host: &mut dyn EngineHost, cx: &Cx, name: &str) -> Flow<RawValue> {
        if let Some(v) = Scope::lookup(&cx.scope, name) {
            return Ok(v);
        }
        if let Some(v) = self.read_prop(host, self.global.get(), &Key::Name(name.to_string()))? {
            return Ok(v);
        }
        let message = format!("{} is not defined", name);
        Err(self.throw_error(host, ErrorType::ReferenceError, &message))
    }

    fn member(&self, host: &mut dyn EngineHost, object: RawValue, name: &str) -> Flow<RawValue> {
        match self.inspect_value(object) {
            JsValue::Undefined | JsValue::Null => {
                let message = format!(
                    "cannot read property '{}' of {}",
                    name,
                    self.inspect_value(object).type_name()
                );
                Err(self.throw_error(host, ErrorType::TypeError, &message))
            }
            _ => Ok(self
                .read_prop(host, object, &Key::Name(name.to_string()))?
                .unwrap_or(UNDEFINED)),
        }
    }

    /// Reads a property through the prototype chain, calling getters.
    pub(super) fn read_prop(
        &self,
        host: &mut dyn EngineHost,
        target: RawValue,
        key: &Key,
    ) -> Flow<Option<RawValue>> {
        match self.lookup(target, key) {
            Lookup::Found(v) => Ok(Some(v)),
            Lookup::Number(n) => Ok(Some(self.alloc(CellData::Number(n)))),
            Lookup::Getter(Some(getter)) => self.call_value(host, getter, target, &[]).map(Some),
            Lookup::Getter(None) => Ok(Some(UNDEFINED)),
            Lookup::Missing => Ok(None),
        }
    }

    /// Writes a property, calling a setter found on the chain.
    pub(super) fn assign_prop(
        &self,
        host: &mut dyn EngineHost,
        target: RawValue,
        key: Key,
        value: RawValue,
    ) -> Flow<()> {
        match self.put_prop(target, key, value) {
            Ok(Store::Done) => Ok(()),
            Ok(Store::Setter(setter)) => self.call_value(host, setter, target, &[value]).map(|_| ()),
            Err(message) => Err(self.throw_error(host, ErrorType::TypeError, &message)),
        }
    }

    fn number_or_throw(&self, host: &mut dyn EngineHost, v: RawValue) -> Flow<f64> {
        match self.number_of(v) {
            Ok(n) => Ok(n),
            Err(message) => Err(self.throw_error(host, ErrorType::TypeError, &message)),
        }
    }

    fn binary(&self, host: &mut dyn EngineHost, op: BinaryOp, l: RawValue, r: RawValue) -> Flow<RawValue> {
        let result = match op {
            BinaryOp::Add => {
                let stringy = |v: RawValue| {
                    matches!(
                        self.inspect_value(v),
                        JsValue::String(_) | JsValue::Object(_)
                    )
                };
                if stringy(l) || stringy(r) {
                    let s = format!("{}{}", self.display(l), self.display(r));
                    return Ok(self.alloc(CellData::Str(s)));
                }
                self.number_or_throw(host, l)? + self.number_or_throw(host, r)?
            }
            BinaryOp::Sub => self.number_or_throw(host, l)? - self.number_or_throw(host, r)?,
            BinaryOp::Mul => self.number_or_throw(host, l)? * self.number_or_throw(host, r)?,
            BinaryOp::Div => self.number_or_throw(host, l)? / self.number_or_throw(host, r)?,
            BinaryOp::StrictEq => return Ok(if self.same_value(l, r) { TRUE } else { FALSE }),
            BinaryOp::StrictNe => return Ok(if self.same_value(l, r) { FALSE } else { TRUE }),
        };
        Ok(self.alloc(CellData::Number(result)))
    }

    fn make_function(&self, decl: &Rc<FunctionDecl>, cx: &Cx) -> RawValue {
        let f = self.alloc_object(
            ObjectClass::Function,
            Internal::ScriptFunction {
                decl: Rc::clone(decl),
                scope: Rc::clone(&cx.scope),
                script_id: cx.script_id,
            },
        );
        let name = self.alloc(CellData::Str(decl.name.clone().unwrap_or_default()));
        let prototype = self.alloc_object(ObjectClass::Plain, Internal::None);
        if let Some(o) = self.heap.borrow_mut().object_mut(f) {
            o.set(Key::Name("name".to_string()), name);
            o.set(Key::Name("prototype".to_string()), prototype);
        }
        f
    }

    pub(super) fn call_value(
        &self,
        host: &mut dyn EngineHost,
        f: RawValue,
        this: RawValue,
        args: &[RawValue],
    ) -> Flow<RawValue> {
        match self.callable(f) {
            Callable::Host(id) => self.call_host(host, id, f, this, args, false),
            Callable::Script {
                decl,
                scope,
                script_id,
            } => self.call_script(host, f, &decl, scope, script_id, this, args),
            Callable::Compiled { program, script_id } => {
                self.run_compiled(host, f, &program, script_id)
            }
            Callable::ErrorConstructor(kind) => Ok(self.error_from_args(kind, args)),
            Callable::NotCallable => {
                Err(self.throw_error(host, ErrorType::TypeError, "value is not a function"))
            }
        }
    }

    pub(super) fn construct_value(
        &self,
        host: &mut dyn EngineHost,
        f: RawValue,
        args: &[RawValue],
        what: &str,
    ) -> Flow<RawValue> {
        match self.callable(f) {
            Callable::Host(id) => {
                let this = self.new_instance(f);
                let result = self.call_host(host, id, f, this, args, true)?;
                Ok(if self.is_object(result) { result } else { this })
            }
            Callable::Script {
                decl,
                scope,
                script_id,
            } => {
                let this = self.new_instance(f);
                let result = self.call_script(host, f, &decl, scope, script_id, this, args)?;
                Ok(if self.is_object(result) { result } else { this })
            }
            Callable::ErrorConstructor(kind) => Ok(self.error_from_args(kind, args)),
            Callable::Compiled { .. } | Callable::NotCallable => {
                let message = format!("{} is not a constructor", what);
                Err(self.throw_error(host, ErrorType::TypeError, &message))
            }
        }
    }

    /// A fresh `this` for `new f(...)`, inheriting from `f.prototype` when
    /// that is an object.
    fn new_instance(&self, f: RawValue) -> RawValue {
        let this = self.alloc_object(ObjectClass::Plain, Internal::None);
        let prototype = self
            .get_prop(f, &Key::Name("prototype".to_string()))
            .filter(|p| self.is_object(*p))
            .unwrap_or_else(|| self.object_prototype.get());
        if let Some(o) = self.heap.borrow_mut().object_mut(this) {
            o.prototype = Some(prototype);
        }
        this
    }

    fn error_from_args(&self, kind: ErrorType, args: &[RawValue]) -> RawValue {
        let message = match args.first() {
            Some(v) if *v != UNDEFINED => self.display(*v),
            _ => String::new(),
        };
        self.new_error(kind, &message)
    }

    fn call_host(
        &self,
        host: &mut dyn EngineHost,
        function: FunctionId,
        callee: RawValue,
        this: RawValue,
        args: &[RawValue],
        is_construct: bool,
    ) -> Flow<RawValue> {
        let call = NativeCall {
            function,
            callee,
            this,
            args,
            is_construct,
        };
        match host.call_native(call) {
            Ok(v) => Ok(v),
            Err(e) => Err(self.raise(host, e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn call_script(
        &self,
        host: &mut dyn EngineHost,
        f: RawValue,
        decl: &FunctionDecl,
        closure: ScopeRef,
        script_id: u32,
        this: RawValue,
        args: &[RawValue],
    ) -> Flow<RawValue> {
        if self.frames.borrow().len() >= MAX_CALL_DEPTH {
            return Err(self.throw_error(host, ErrorType::RangeError, "call stack size exceeded"));
        }
        let scope = Scope::new_ref(Some(closure));
        {
            let mut s = scope.borrow_mut();
            for (i, p) in decl.params.iter().enumerate() {
                s.vars.insert(p.clone(), args.get(i).copied().unwrap_or(UNDEFINED));
            }
        }
        let frame = Frame {
            function_name: decl
                .name
                .clone()
                .unwrap_or_else(|| "(anonymous)".to_string()),
            function: f,
            script_id,
            pos: decl.pos,
            scope: Rc::clone(&scope),
            this,
        };
        let cx = Cx {
            scope,
            this,
            script_id,
            exports: None,
        };
        match self.in_frame(frame, || self.run_body(host, &decl.body, &cx))? {
            Completion::Return(v) => Ok(v),
            Completion::Normal(_) => Ok(UNDEFINED),
        }
    }

    pub(super) fn run_compiled(
        &self,
        host: &mut dyn EngineHost,
        f: RawValue,
        program: &Program,
        script_id: u32,
    ) -> Flow<RawValue> {
        let scope = Rc::clone(&self.global_scope.borrow());
        let frame = Frame {
            function_name: "(global code)".to_string(),
            function: f,
            script_id,
            pos: Pos::default(),
            scope: Rc::clone(&scope),
            this: UNDEFINED,
        };
        let cx = Cx {
            scope,
            this: UNDEFINED,
            script_id,
            exports: None,
        };
        match self.in_frame(frame, || self.run_body(host, &program.body, &cx))? {
            Completion::Normal(Some(v)) | Completion::Return(v) => Ok(v),
            Completion::Normal(None) => Ok(UNDEFINED),
        }
    }
}
