use std::collections::VecDeque;

use crate::engine::ModuleId;

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleJob {
    /// Source read from the resolver, waiting to be parsed into its record.
    Parse {
        module: ModuleId,
        filename: String,
        source: String,
    },
    /// A root record whose graph is parsed and whose body has not run yet.
    Evaluate { module: ModuleId },
}

/// FIFO of module work. A job is dequeued before it runs, so jobs it
/// enqueues land behind everything already waiting.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<ModuleJob>,
}

impl JobQueue {
    pub fn push(&mut self, job: ModuleJob) {
        self.jobs.push_back(job);
    }

    pub fn pop(&mut self) -> Option<ModuleJob> {
        self.jobs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo() {
        let mut q = JobQueue::default();
        q.push(ModuleJob::Evaluate { module: ModuleId(1) });
        q.push(ModuleJob::Evaluate { module: ModuleId(2) });
        assert_eq!(q.pop(), Some(ModuleJob::Evaluate { module: ModuleId(1) }));
        assert_eq!(q.len(), 1);
        q.clear();
        assert!(q.pop().is_none());
    }
}
