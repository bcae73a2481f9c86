/// A pause location set by the debugger client. Lines and columns are
/// 1-based; `id` is 0 until the engine has accepted the breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointEntry {
    pub filename: String,
    pub line: u32,
    pub column: u32,
    pub id: u32,
}

impl BreakpointEntry {
    pub fn is_resolved(&self) -> bool {
        self.id != 0
    }
}

#[derive(Debug, Default)]
pub struct BreakpointTable {
    entries: Vec<BreakpointEntry>,
}

impl BreakpointTable {
    /// Adds a pending entry and returns its index.
    pub fn add(&mut self, filename: &str, line: u32, column: u32) -> usize {
        self.entries.push(BreakpointEntry {
            filename: filename.to_string(),
            line,
            column,
            id: 0,
        });
        self.entries.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Option<BreakpointEntry> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> Option<&BreakpointEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut BreakpointEntry> {
        self.entries.get_mut(index)
    }

    /// Indices of unresolved entries for `filename`.
    pub fn pending_for(&self, filename: &str) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_resolved() && e.filename == filename)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreakpointEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
