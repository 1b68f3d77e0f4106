//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag. Observers poll it between units of work.
///
/// A child flag reports cancelled when either it or any ancestor was
/// cancelled; cancelling a child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancellationFlag>>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_sees_parent_cancel() {
        let root = CancellationFlag::new();
        let child = root.child();
        assert!(!child.is_cancelled());

        root.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_propagate_up() {
        let root = CancellationFlag::new();
        let child = root.child();
        let clone = child.clone();

        clone.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }
}
