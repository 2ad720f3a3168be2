//! Stack safety for nested evaluation.
//!
//! Every non-tail entry into the evaluator holds a [`DepthGuard`] and runs
//! under [`ensure_sufficient_stack`]. The guard enforces
//! [`MAX_EVAL_DEPTH`](crate::MAX_EVAL_DEPTH); `stacker` makes sure the host
//! stack never runs out before that limit is reached.

use std::cell::Cell;

use crate::{Error, MAX_EVAL_DEPTH};

thread_local! {
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Ensure sufficient stack space is available before executing `f`.
#[inline]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    /// Minimum stack space to keep available (100KB red zone).
    const RED_ZONE: usize = 100 * 1024;

    /// Stack space to allocate when growing (1MB).
    const STACK_PER_RECURSION: usize = 1024 * 1024;

    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// One level of nested evaluation, released on drop
pub(crate) struct DepthGuard(());

impl DepthGuard {
    pub(crate) fn enter() -> Result<Self, Error> {
        EVAL_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= MAX_EVAL_DEPTH {
                return Err(Error::DepthExceeded(MAX_EVAL_DEPTH));
            }
            depth.set(current + 1);
            Ok(DepthGuard(()))
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
