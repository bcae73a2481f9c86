//! Registry of native function records.

use std::rc::Rc;

use super::types::NativeFunction;
use crate::engine::FunctionId;

/// Every native function registered with a session. Records are never
/// removed, so a [`FunctionId`] stays valid for the session's lifetime.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: Vec<Rc<NativeFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry { functions: vec![] }
    }

    pub fn register(&mut self, function: NativeFunction) -> FunctionId {
        self.functions.push(Rc::new(function));
        FunctionId(self.functions.len() as u32 - 1)
    }

    pub fn get(&self, id: FunctionId) -> Option<Rc<NativeFunction>> {
        self.functions.get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
