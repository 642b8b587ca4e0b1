//! Cancellation tokens for background tasks
//!
//! A task submitted to the worker pool carries a token; the owner thread
//! cancels it when the task's result is no longer wanted (a newer composite
//! for the same page was submitted, the page was released, the engine is
//! shutting down). Workers check the token before and during execution.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token for cooperative task cancellation
///
/// Clones share the same state, so the owner can keep one half and hand the
/// other to the worker.
///
/// # Example
///
/// ```
/// use pdf_markup_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Latest-wins token table keyed by an owner-side identity (usually a page).
///
/// Lives on the owner thread only; workers just see the tokens.
#[derive(Debug)]
pub struct SupersedeRegistry<K> {
    tokens: HashMap<K, CancellationToken>,
}

impl<K: Eq + Hash + Copy> SupersedeRegistry<K> {
    pub fn new() -> Self {
        Self { tokens: HashMap::new() }
    }

    /// Issue a fresh token for `key`, cancelling whichever token it replaces
    pub fn issue(&mut self, key: K) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.insert(key, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel and forget the token for `key`.
    ///
    /// Returns `true` if a token was registered.
    pub fn cancel(&mut self, key: K) -> bool {
        match self.tokens.remove(&key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget the token for `key` without cancelling it (its task completed)
    pub fn retire(&mut self, key: K, token: &CancellationToken) {
        if let Some(current) = self.tokens.get(&key) {
            if Arc::ptr_eq(&current.cancelled, &token.cancelled) {
                self.tokens.remove(&key);
            }
        }
    }

    /// Cancel every registered token
    pub fn cancel_all(&mut self) -> usize {
        let count = self.tokens.len();
        for (_, token) in self.tokens.drain() {
            token.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<K: Eq + Hash + Copy> Default for SupersedeRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
