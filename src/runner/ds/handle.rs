//! Strong and weak handles to engine values.
//!
//! An [`Owned`] handle holds one engine reference and gives it back exactly
//! once, when dropped. A [`Borrowed`] handle never touches the reference count;
//! it can only be made inside the crate, for values something else is already
//! keeping alive (the current call's receiver and arguments, the global
//! object, the `undefined`/`null` sentinels).

use std::fmt;
use std::rc::Rc;

use crate::engine::{Engine, RawValue};

pub struct Owned {
    raw: RawValue,
    engine: Rc<dyn Engine>,
}

impl Owned {
    pub(crate) fn new(engine: &Rc<dyn Engine>, raw: RawValue) -> Self {
        engine.add_ref(raw);
        Owned {
            raw,
            engine: Rc::clone(engine),
        }
    }

    pub fn raw(&self) -> RawValue {
        self.raw
    }

    pub fn ref_count(&self) -> u32 {
        self.engine.ref_count(self.raw)
    }
}

impl Clone for Owned {
    fn clone(&self) -> Self {
        Owned::new(&self.engine, self.raw)
    }
}

impl Drop for Owned {
    fn drop(&mut self) {
        self.engine.release(self.raw);
    }
}

impl fmt::Debug for Owned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owned({:?})", self.raw)
    }
}

#[derive(Debug, Clone)]
pub struct Borrowed {
    raw: RawValue,
}

impl Borrowed {
    pub(crate) fn new(raw: RawValue) -> Self {
        Borrowed { raw }
    }

    pub fn raw(&self) -> RawValue {
        self.raw
    }
}

/// What a stack slot holds. Cloning an owned handle takes another reference.
#[derive(Debug, Clone)]
pub enum Handle {
    Owned(Owned),
    Borrowed(Borrowed),
}

impl Handle {
    pub(crate) fn owned(engine: &Rc<dyn Engine>, raw: RawValue) -> Self {
        Handle::Owned(Owned::new(engine, raw))
    }

    pub(crate) fn borrowed(raw: RawValue) -> Self {
        Handle::Borrowed(Borrowed::new(raw))
    }

    pub fn raw(&self) -> RawValue {
        match self {
            Handle::Owned(o) => o.raw(),
            Handle::Borrowed(b) => b.raw(),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Handle::Owned(_))
    }
}

/// A reference exported from the stack that outlives its slot. Dropping it,
/// or calling [`Persistent::release`], gives the reference back.
#[derive(Debug, Clone)]
pub struct Persistent(Owned);

impl Persistent {
    pub(crate) fn new(owned: Owned) -> Self {
        Persistent(owned)
    }

    pub fn raw(&self) -> RawValue {
        self.0.raw()
    }

    pub fn ref_count(&self) -> u32 {
        self.0.ref_count()
    }

    pub fn release(self) {}
}
