//! Reusable per-call objects.

use core::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicUsize, Ordering},
};
use std::sync::{Mutex, PoisonError};

/// Objects that can be returned to a [`Pool`].
pub trait Reset {
    /// Clears any per-call state, keeping allocations.
    fn reset(&mut self);
}

/// Thread-safe free list of reusable objects.
#[derive(Debug)]
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    in_use: AtomicUsize,
    new: fn() -> T,
}

impl<T> Pool<T>
where
    T: Reset,
{
    /// Constructs an empty pool, using the given constructor when no free
    /// object is available.
    pub const fn new(new: fn() -> T) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            in_use: AtomicUsize::new(0),
            new,
        }
    }

    /// Takes an object from the pool, creating one if the pool is empty.
    ///
    /// The object returns to the pool when the guard is dropped.
    #[inline]
    pub fn acquire(&self) -> Pooled<'_, T> {
        let value = self.free.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let value = value.unwrap_or_else(self.new);
        self.in_use.fetch_add(1, Ordering::Relaxed);

        Pooled { pool: self, value: Some(value) }
    }

    /// Number of objects currently acquired.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Number of objects waiting for reuse.
    #[inline]
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[inline]
    fn release(&self, mut value: T) {
        value.reset();
        self.free.lock().unwrap_or_else(PoisonError::into_inner).push(value);
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Exclusive handle to a pooled object.
#[derive(Debug)]
pub struct Pooled<'a, T>
where
    T: Reset,
{
    pool: &'a Pool<T>,
    /// Always `Some` until dropped.
    value: Option<T>,
}

impl<T> Deref for Pooled<'_, T>
where
    T: Reset,
{
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        match &self.value {
            Some(value) => value,
            None => unreachable!("pooled value is taken only on drop"),
        }
    }
}

impl<T> DerefMut for Pooled<'_, T>
where
    T: Reset,
{
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("pooled value is taken only on drop"),
        }
    }
}

impl<T> Drop for Pooled<'_, T>
where
    T: Reset,
{
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}
