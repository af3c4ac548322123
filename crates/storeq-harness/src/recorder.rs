#![forbid(unsafe_code)]

//! Collects emissions for later assertions.

use std::cell::RefCell;
use std::rc::Rc;

/// A shared, append-only log of values.
#[derive(Debug)]
pub struct Recorder<T> {
    items: Rc<RefCell<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            items: Rc::clone(&self.items),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            items: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<T: Clone + 'static> Recorder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback appending every value it sees.
    pub fn sink(&self) -> impl Fn(&T) + 'static {
        let items = Rc::clone(&self.items);
        move |value: &T| items.borrow_mut().push(value.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.items.borrow().clone()
    }

    #[must_use]
    pub fn last(&self) -> Option<T> {
        self.items.borrow().last().cloned()
    }

    /// Map every recorded value, e.g. to a comparable summary.
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> Vec<U> {
        self.items.borrow().iter().map(f).collect()
    }

    pub fn clear(&self) {
        self.items.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_appends_clones() {
        let recorder = Recorder::new();
        let sink = recorder.sink();
        sink(&1);
        sink(&2);
        assert_eq!(recorder.items(), vec![1, 2]);
        assert_eq!(recorder.last(), Some(2));
        assert_eq!(recorder.map(|v| v * 10), vec![10, 20]);
        recorder.clear();
        assert!(recorder.is_empty());
    }
}
