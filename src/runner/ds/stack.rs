//! The value stack shared by native code and the engine.
//!
//! Indices handed to callers are relative to the current frame base; a
//! negative index counts down from the top. Growing the stack fills new slots
//! with a borrowed `undefined`, shrinking it drops the truncated handles and
//! with them every engine reference they held.

use crate::engine::RawValue;
use crate::runner::ds::error::StackError;
use crate::runner::ds::handle::Handle;

pub struct ValueStack {
    slots: Vec<Handle>,
    base: usize,
    undefined: RawValue,
}

impl ValueStack {
    pub fn new(undefined: RawValue, reserve: usize) -> Self {
        ValueStack {
            slots: Vec::with_capacity(reserve),
            base: 0,
            undefined,
        }
    }

    /// Number of slots visible to the current frame.
    pub fn top(&self) -> usize {
        self.slots.len() - self.base
    }

    /// Absolute slot count, frames included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// Turns a possibly negative index into a frame-relative one.
    pub fn normalize(&self, index: i32) -> Result<usize, StackError> {
        let top = self.top() as i64;
        let i = index as i64;
        let resolved = if i < 0 { top + i } else { i };
        if resolved < 0 || resolved >= top {
            Err(StackError::InvalidIndex { index: i })
        } else {
            Ok(resolved as usize)
        }
    }

    fn absolute(&self, index: i32) -> Result<usize, StackError> {
        Ok(self.base + self.normalize(index)?)
    }

    /// Pushes a handle and returns its frame-relative index.
    pub fn push(&mut self, handle: Handle) -> usize {
        self.slots.push(handle);
        self.top() - 1
    }

    pub fn pop(&mut self, count: usize) -> Result<(), StackError> {
        let top = self.top();
        if count > top {
            return Err(StackError::Underflow { count, top });
        }
        self.resize(self.slots.len() - count);
        Ok(())
    }

    /// Removes the top slot and hands its handle over.
    pub fn pop_handle(&mut self) -> Option<Handle> {
        if self.top() == 0 {
            return None;
        }
        self.slots.pop()
    }

    pub fn get(&self, index: i32) -> Result<RawValue, StackError> {
        Ok(self.handle(index)?.raw())
    }

    pub fn handle(&self, index: i32) -> Result<&Handle, StackError> {
        let at = self.absolute(index)?;
        Ok(&self.slots[at])
    }

    /// Overwrites a slot in place, dropping what was there.
    pub fn set(&mut self, index: i32, handle: Handle) -> Result<(), StackError> {
        let at = self.absolute(index)?;
        self.slots[at] = handle;
        Ok(())
    }

    pub fn set_top(&mut self, new_top: usize) {
        let len = self.base + new_top;
        self.resize(len);
    }

    /// Moves the top slot down to `index`, shifting the ones above it up.
    pub fn insert(&mut self, index: i32) -> Result<(), StackError> {
        let at = self.absolute(index)?;
        if let Some(handle) = self.slots.pop() {
            self.slots.insert(at, handle);
        }
        Ok(())
    }

    /// Moves the slot at `index` to the top.
    pub fn pull(&mut self, index: i32) -> Result<(), StackError> {
        let at = self.absolute(index)?;
        let handle = self.slots.remove(at);
        self.slots.push(handle);
        Ok(())
    }

    pub fn remove(&mut self, index: i32) -> Result<(), StackError> {
        let at = self.absolute(index)?;
        self.slots.remove(at);
        Ok(())
    }

    /// Pops the top slot and stores it at `index`.
    pub fn replace(&mut self, index: i32) -> Result<(), StackError> {
        let at = self.absolute(index)?;
        if at + 1 == self.slots.len() {
            return Ok(());
        }
        if let Some(handle) = self.slots.pop() {
            self.slots[at] = handle;
        }
        Ok(())
    }

    pub(crate) fn resize(&mut self, len: usize) {
        if len < self.slots.len() {
            self.slots.truncate(len);
        } else {
            let undefined = self.undefined;
            self.slots.resize_with(len, || Handle::borrowed(undefined));
        }
    }

    /// Opens a frame at the current top and returns the caller's base.
    pub(crate) fn enter_frame(&mut self) -> usize {
        let previous = self.base;
        self.base = self.slots.len();
        previous
    }

    /// Drops the current frame's slots and restores the caller's base.
    pub(crate) fn leave_frame(&mut self, previous_base: usize) {
        self.resize(self.base);
        self.base = previous_base;
    }

    /// Cuts back (or pads with `undefined`) to a saved length and base after
    /// an error.
    pub(crate) fn unwind_to(&mut self, len: usize, base: usize) {
        self.resize(len);
        self.base = base;
    }

    /// Retargets the sentinel used to fill grown slots, after an engine reset.
    pub(crate) fn set_undefined(&mut self, undefined: RawValue) {
        self.undefined = undefined;
    }
}
