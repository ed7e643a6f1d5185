//! A minimal cooperative-shutdown primitive.
//!
//! [`Closer`] is owned by whatever spawns a long-running thread (a
//! [`Verifier`](crate::verifier::Verifier), the hot-plug watcher, the
//! periodic broadcaster). Calling [`Closer::close`] — or dropping the
//! `Closer` — flips a shared flag that any number of cloned [`Closable`]
//! handles can cheaply poll without additional synchronization.
//!
//! This is a trimmed-down version of `maviola::core::utils::closable`: that
//! module also models shared multi-owner closers (`SharedCloser`) for
//! library consumers who hold onto a connection from several places at
//! once. Every stoppable task here has exactly one owner (the supervisor),
//! so that machinery is unnecessary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owns the "please stop" flag for a spawned thread.
#[derive(Debug)]
pub struct Closer(Arc<AtomicBool>);

impl Closer {
    /// Creates a new, open closer.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Returns a read-only handle that can be polled from the owned thread.
    pub fn to_closable(&self) -> Closable {
        Closable(self.0.clone())
    }

    /// Requests that the owned thread stop.
    pub fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` if [`Closer::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for Closer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read-only view of a [`Closer`]'s stop flag.
#[derive(Clone, Debug)]
pub struct Closable(Arc<AtomicBool>);

impl Closable {
    /// Returns `true` if the owning [`Closer`] requested a stop (or was dropped).
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_is_observed_by_clones() {
        let closer = Closer::new();
        let a = closer.to_closable();
        let b = a.clone();

        assert!(!a.is_closed());
        assert!(!b.is_closed());

        closer.close();

        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[test]
    fn drop_closes() {
        let closer = Closer::new();
        let handle = closer.to_closable();
        drop(closer);
        assert!(handle.is_closed());
    }
}
