//! Dynamic Enable Scope
//!
//! A per-thread counter that re-enables caching for sites declared with
//! `enabled = false`. Scopes nest; the counter is restored on every exit
//! path, unwinding included.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static ENABLE_COUNT: Cell<usize> = const { Cell::new(0) };
}

/// RAII scope; caching is dynamically enabled while any guard is alive
///
/// Not `Send`: the counter belongs to the thread that entered the scope.
#[must_use = "the scope ends when the guard is dropped"]
pub struct EnableGuard {
    _thread_bound: PhantomData<*const ()>,
}

impl EnableGuard {
    /// Enter a scope on the current thread
    pub fn enter() -> Self {
        ENABLE_COUNT.with(|count| count.set(count.get() + 1));
        Self {
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for EnableGuard {
    fn drop(&mut self) {
        ENABLE_COUNT.with(|count| count.set(count.get().saturating_sub(1)));
    }
}

/// Run `callback` with caching dynamically enabled on this thread
pub fn enable_cache<T>(callback: impl FnOnce() -> T) -> T {
    let _guard = EnableGuard::enter();
    callback()
}

/// Whether the current thread is inside an enable scope
pub fn is_enabled() -> bool {
    enable_depth() > 0
}

/// Nesting depth of enable scopes on the current thread
pub fn enable_depth() -> usize {
    ENABLE_COUNT.with(Cell::get)
}

// =============================================================================
// Tests
// =============================================================================
