use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// An enumeration of possible errors associated while trying to acquire a lock,
/// from the [`try_lock`] method on a [`SpinLock`].
///
/// [`try_lock`]: SpinLock::try_lock
#[derive(Debug, PartialEq, Eq)]
pub enum TryLockError {
    /// The lock could not be acquired at this time because the operation would
    /// otherwise block.
    WouldBlock,
}

/// A mutual exclusion primitive protecting shared kernel data.
///
/// The data can only be accessed through the RAII guards returned from
/// [`lock`] and [`try_lock`]. Dropping the guard releases the lock.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the lock, spinning until it is available.
    ///
    /// Locking a spinlock already held by the caller never returns.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            match self.try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::WouldBlock) => {
                    while self.locked.load(Ordering::Relaxed) {
                        core::hint::spin_loop()
                    }
                }
            }
        }
    }

    /// Attempts to acquire this lock without spinning.
    ///
    /// # Errors
    ///
    /// Returns [`TryLockError::WouldBlock`] if the lock is already held.
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, TryLockError> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(SpinLockGuard {
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            Err(TryLockError::WouldBlock)
        }
    }

    /// Returns true if some guard currently holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// No locking is needed: the `&mut` borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized + Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// An RAII implementation of a "scoped lock" of a spinlock. When this structure is
/// dropped (falls out of scope), the lock will be unlocked.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`SpinLock`].
///
/// [`lock`]: SpinLock::lock
/// [`try_lock`]: SpinLock::try_lock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    lock: &'a SpinLock<T>,
    // The guard must be released by the path that took it.
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use crate::{SpinLock, TryLockError};
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use std::thread::scope;

    #[test]
    pub fn smoke() {
        const LENGTH: usize = 256;
        let lock = SpinLock::new(vec![]);
        let start = Arc::new(AtomicBool::new(true));

        scope(|s| {
            for i in 0..LENGTH {
                let d = &lock;
                let start = start.clone();
                s.spawn(move || {
                    while start.load(Ordering::SeqCst) {}
                    let mut d = d.lock();
                    d.push(i);
                });
            }
            start.store(false, Ordering::SeqCst);
        });

        lock.lock().sort();
        assert_eq!(lock.into_inner(), (0..LENGTH).collect::<Vec<_>>());
    }

    #[test]
    fn try_lock_reports_contention() {
        let lock = SpinLock::new(0u32);
        let guard = lock.try_lock().unwrap();
        assert!(lock.is_locked());
        assert_eq!(lock.try_lock().err(), Some(TryLockError::WouldBlock));
        drop(guard);
        assert!(!lock.is_locked());
        *lock.try_lock().unwrap() += 1;
        assert_eq!(*lock.lock(), 1);
    }
}
