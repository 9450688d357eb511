//! Shared scope stack
//!
//! Every logger of a sink sees the same stack, so a scope opened by one
//! operation shows up in log calls from concurrent, unrelated operations
//! until it is closed.

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ScopeStack {
    names: Mutex<Vec<String>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, name: impl Into<String>) {
        self.names.lock().push(name.into());
    }

    /// Remove the most recently pushed name
    pub fn pop(&self) -> Option<String> {
        self.names.lock().pop()
    }

    pub fn depth(&self) -> usize {
        self.names.lock().len()
    }

    /// Outermost and innermost open scope, at most two names.
    pub fn snapshot(&self) -> Vec<String> {
        let names = self.names.lock();
        match names.len() {
            0 => Vec::new(),
            1 => vec![names[0].clone()],
            n => vec![names[0].clone(), names[n - 1].clone()],
        }
    }
}

/// Closes a scope when dropped
#[must_use = "the scope closes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ScopeGuard {
    stack: Arc<ScopeStack>,
}

impl ScopeGuard {
    pub(crate) fn open(stack: Arc<ScopeStack>, name: impl Into<String>) -> Self {
        stack.push(name);
        Self { stack }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_keeps_first_and_last() {
        let stack = Arc::new(ScopeStack::new());
        let _a = ScopeGuard::open(stack.clone(), "A");
        assert_eq!(stack.snapshot(), vec!["A"]);

        let _b = ScopeGuard::open(stack.clone(), "B");
        let _c = ScopeGuard::open(stack.clone(), "C");
        assert_eq!(stack.snapshot(), vec!["A", "C"]);
    }

    #[test]
    fn test_guard_pops_on_drop() {
        let stack = Arc::new(ScopeStack::new());
        let a = ScopeGuard::open(stack.clone(), "A");
        {
            let _b = ScopeGuard::open(stack.clone(), "B");
            assert_eq!(stack.depth(), 2);
        }
        assert_eq!(stack.snapshot(), vec!["A"]);
        drop(a);
        assert!(stack.snapshot().is_empty());
    }

    #[test]
    fn test_guard_pops_during_unwind() {
        let stack = Arc::new(ScopeStack::new());
        let inner = stack.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = ScopeGuard::open(inner, "doomed");
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(stack.depth(), 0);
    }
}
