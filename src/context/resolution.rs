//! Resolution cycle guard.
//!
//! Mods may declare each other as dependencies, and resolution may add implicit edges at
//! runtime, so the dependency graph can contain cycles. A [`ResolutionStack`] records the
//! contexts that are currently resolving on behalf of one request. A context on the stack is
//! never considered as a dependency candidate again until it has been popped.
//!
//! The stack is an explicit value threaded through every resolution call rather than ambient
//! per-thread state, so one request's guard can never leak into another's.

use crate::{context::ContextId, Error, Result};

/// Stack of contexts currently resolving for one request.
#[derive(Debug, Default, Clone)]
pub struct ResolutionStack {
    frames: Vec<ContextId>,
}

impl ResolutionStack {
    /// An empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `id` onto the stack.
    pub fn push(&mut self, id: ContextId) {
        self.frames.push(id);
    }

    /// Pop the top frame, which must be `expected`.
    ///
    /// # Errors
    /// Returns the fatal [`crate::Error::ResolutionStack`] if the stack is empty or another
    /// context is on top. The stack is left unchanged in that case.
    pub fn pop(&mut self, expected: ContextId) -> Result<()> {
        match self.frames.last() {
            Some(&top) if top == expected => {
                self.frames.pop();
                Ok(())
            }
            top => Err(Error::ResolutionStack {
                expected: expected.to_string(),
                found: top.map_or_else(|| "<empty>".to_string(), ToString::to_string),
            }),
        }
    }

    /// Returns `true` if `id` is currently resolving.
    #[must_use]
    pub fn contains(&self, id: ContextId) -> bool {
        self.frames.contains(&id)
    }

    /// Returns `true` if no context is resolving.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Run `f` with `id` pushed, popping it again on every exit path.
    ///
    /// # Errors
    /// Returns the error of `f`, or [`crate::Error::ResolutionStack`] if `f` left the stack
    /// unbalanced. An unbalanced stack takes precedence over the result of `f`.
    pub fn scoped<T>(
        &mut self,
        id: ContextId,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.push(id);
        let result = f(self);
        self.pop(id)?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = ResolutionStack::new();
        stack.push(ContextId(1));
        stack.push(ContextId(2));
        assert!(stack.contains(ContextId(1)));
        assert_eq!(stack.depth(), 2);

        stack.pop(ContextId(2)).unwrap();
        stack.pop(ContextId(1)).unwrap();
        assert!(stack.is_empty());
    }

    #[test]
    fn test_pop_mismatch_is_fatal() {
        let mut stack = ResolutionStack::new();
        stack.push(ContextId(1));

        let err = stack.pop(ContextId(2)).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(stack.depth(), 1);

        let mut empty = ResolutionStack::new();
        assert!(matches!(
            empty.pop(ContextId(1)),
            Err(Error::ResolutionStack { .. })
        ));
    }

    #[test]
    fn test_scoped_pops_on_error() {
        let mut stack = ResolutionStack::new();
        let result: Result<()> = stack.scoped(ContextId(7), |inner| {
            assert!(inner.contains(ContextId(7)));
            Err(Error::Error("boom".into()))
        });

        assert!(result.is_err());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_scoped_detects_unbalanced_body() {
        let mut stack = ResolutionStack::new();
        let result = stack.scoped(ContextId(1), |inner| {
            inner.push(ContextId(2));
            Ok(5)
        });

        assert!(result.unwrap_err().is_fatal());
    }
}
