#![forbid(unsafe_code)]

//! One memoization stage.
//!
//! A [`SelectorMemo`] remembers its last `(input, output)` pair. It
//! recomputes only when the input changes under [`ShallowEq`], and when a
//! recomputation produces an output shallow-equal to the previous one it
//! hands back the previous output, so identity-keyed consumers downstream see
//! no change.
//!
//! Stages are owned by one invocation; there is no global cache.

use storeq_core::ShallowEq;

/// A single `(input, output)` memo slot.
#[derive(Debug)]
pub struct SelectorMemo<I, O> {
    last: Option<(I, O)>,
    recomputations: u64,
}

impl<I: ShallowEq, O: ShallowEq + Clone> SelectorMemo<I, O> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: None,
            recomputations: 0,
        }
    }

    /// Return the memoized output for `input`, computing it if needed.
    pub fn get_or_compute(&mut self, input: I, compute: impl FnOnce(&I) -> O) -> O {
        if let Some((last_input, last_output)) = &self.last
            && last_input.shallow_eq(&input)
        {
            return last_output.clone();
        }

        self.recomputations += 1;
        let computed = compute(&input);
        let output = match self.last.take() {
            Some((_, previous)) if previous.shallow_eq(&computed) => previous,
            _ => computed,
        };
        self.last = Some((input, output.clone()));
        output
    }

    /// How many times `compute` actually ran.
    #[must_use]
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    /// Last output, if any.
    #[must_use]
    pub fn last_output(&self) -> Option<&O> {
        self.last.as_ref().map(|(_, output)| output)
    }

    pub fn clear(&mut self) {
        self.last = None;
    }
}

impl<I: ShallowEq, O: ShallowEq + Clone> Default for SelectorMemo<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn same_input_skips_compute() {
        let mut memo = SelectorMemo::new();
        let input = Rc::new(3u32);
        let a = memo.get_or_compute(Rc::clone(&input), |v| **v * 2);
        let b = memo.get_or_compute(Rc::clone(&input), |_| unreachable!("memoized"));
        assert_eq!((a, b), (6, 6));
        assert_eq!(memo.recomputations(), 1);
    }

    #[test]
    fn new_input_recomputes() {
        let mut memo = SelectorMemo::new();
        memo.get_or_compute(Rc::new(1u32), |v| **v);
        let out = memo.get_or_compute(Rc::new(1u32), |v| **v + 1);
        assert_eq!(out, 2, "distinct allocation is a new input");
        assert_eq!(memo.recomputations(), 2);
    }

    #[test]
    fn equal_output_keeps_previous_identity() {
        let mut memo: SelectorMemo<u32, Rc<String>> = SelectorMemo::new();
        let first = memo.get_or_compute(1, |_| Rc::new("same".to_string()));
        let second = memo.get_or_compute(2, |_| Rc::clone(&first));
        assert!(Rc::ptr_eq(&first, &second));

        let third = memo.get_or_compute(3, |_| Rc::new("same".to_string()));
        assert!(!Rc::ptr_eq(&first, &third), "Rc outputs compare by identity");
        assert_eq!(memo.last_output().map(|s| s.as_str()), Some("same"));
    }
}
