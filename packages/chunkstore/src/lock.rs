//! Fail-fast per-column read/write locks.
//!
//! Nothing here ever blocks. Any number of readers may hold a column at once,
//! a writer needs the column to itself, and a thread may not take a second
//! read lock on a column it is already reading. Every violation is reported
//! straight away as a `StoreError::LockViolation`.

use std::cell::RefCell;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::component::ComponentTypeID;
use crate::error::{LockViolationReason, Result, StoreError};

const UNLOCKED: usize = 0;
const WRITE_LOCKED: usize = usize::MAX;

thread_local! {
    /// Addresses of the column locks this thread holds for reading.
    static HELD_READS: RefCell<Vec<usize>> = RefCell::new(Vec::new());
}

fn held_by_this_thread(addr: usize) -> bool {
    HELD_READS.with(|held| held.borrow().contains(&addr))
}

/// The lock state of a single column.
pub struct ColumnLock {
    state: AtomicUsize,
}

impl ColumnLock {
    pub const fn new() -> ColumnLock {
        ColumnLock {
            state: AtomicUsize::new(UNLOCKED),
        }
    }

    fn addr(&self) -> usize {
        self as *const ColumnLock as usize
    }

    /// Try to take a shared lock.
    pub fn try_read(&self, component: ComponentTypeID) -> Result<ReadToken<'_>> {
        let addr = self.addr();
        if held_by_this_thread(addr) {
            return Err(StoreError::lock(component, LockViolationReason::ReentrantRead));
        }

        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            if current == WRITE_LOCKED {
                return Err(StoreError::lock(component, LockViolationReason::WriteHeld));
            }

            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        HELD_READS.with(|held| held.borrow_mut().push(addr));
        Ok(ReadToken {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Try to take the exclusive lock.
    pub fn try_write(&self, component: ComponentTypeID) -> Result<WriteToken<'_>> {
        match self.state.compare_exchange(
            UNLOCKED,
            WRITE_LOCKED,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => Ok(WriteToken {
                lock: self,
                _not_send: PhantomData,
            }),
            Err(WRITE_LOCKED) => Err(StoreError::lock(component, LockViolationReason::WriteHeld)),
            Err(_) => Err(StoreError::lock(component, LockViolationReason::ReadHeld)),
        }
    }

    /// Return the number of readers, or `None` while write-locked.
    pub fn readers(&self) -> Option<usize> {
        match self.state.load(Ordering::Relaxed) {
            WRITE_LOCKED => None,
            n => Some(n),
        }
    }

    /// Returns true if nobody holds the lock.
    pub fn is_free(&self) -> bool {
        self.state.load(Ordering::Relaxed) == UNLOCKED
    }
}

impl Default for ColumnLock {
    fn default() -> Self {
        ColumnLock::new()
    }
}

impl Debug for ColumnLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.readers() {
            None => write!(f, "ColumnLock(write)"),
            Some(0) => write!(f, "ColumnLock(free)"),
            Some(n) => write!(f, "ColumnLock({} readers)", n),
        }
    }
}

/// Proof of a shared lock. Released on drop, on the thread that took it.
pub struct ReadToken<'a> {
    lock: &'a ColumnLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Drop for ReadToken<'a> {
    fn drop(&mut self) {
        let addr = self.lock.addr();
        HELD_READS.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(idx) = held.iter().rposition(|a| *a == addr) {
                held.swap_remove(idx);
            }
        });
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

/// Proof of the exclusive lock. Released on drop.
pub struct WriteToken<'a> {
    lock: &'a ColumnLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Drop for WriteToken<'a> {
    fn drop(&mut self) {
        self.lock.state.store(UNLOCKED, Ordering::Release);
    }
}

/// A read-locked view of one component column.
pub struct ColumnRef<'a, T> {
    slice: &'a [T],
    _token: ReadToken<'a>,
}

impl<'a, T> ColumnRef<'a, T> {
    pub(crate) fn new(slice: &'a [T], token: ReadToken<'a>) -> ColumnRef<'a, T> {
        ColumnRef {
            slice,
            _token: token,
        }
    }
}

impl<'a, T> Deref for ColumnRef<'a, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.slice
    }
}

impl<'a, T: Debug> Debug for ColumnRef<'a, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slice.iter()).finish()
    }
}

/// A write-locked view of one component column.
pub struct ColumnMut<'a, T> {
    slice: &'a mut [T],
    _token: WriteToken<'a>,
}

impl<'a, T> ColumnMut<'a, T> {
    pub(crate) fn new(slice: &'a mut [T], token: WriteToken<'a>) -> ColumnMut<'a, T> {
        ColumnMut {
            slice,
            _token: token,
        }
    }
}

impl<'a, T> Deref for ColumnMut<'a, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.slice
    }
}

impl<'a, T> DerefMut for ColumnMut<'a, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.slice
    }
}

impl<'a, T: Debug> Debug for ColumnMut<'a, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slice.iter()).finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    const ID: ComponentTypeID = ComponentTypeID::new(1);

    fn reason(err: StoreError) -> LockViolationReason {
        match err {
            StoreError::LockViolation { reason, .. } => reason,
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_shared_reads_across_threads() {
        let lock = Arc::new(ColumnLock::new());
        let barrier = Arc::new(Barrier::new(2));

        let handles = (0..2)
            .map(|_| {
                let lock = lock.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let token = lock.try_read(ID);
                    barrier.wait();
                    let ok = token.is_ok();
                    barrier.wait();
                    ok
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert!(lock.is_free());
    }

    #[test]
    fn test_write_under_read_fails() {
        let lock = ColumnLock::new();
        let read = lock.try_read(ID).unwrap();
        assert_eq!(reason(lock.try_write(ID).err().unwrap()), LockViolationReason::ReadHeld);
        drop(read);
        assert!(lock.try_write(ID).is_ok());
    }

    #[test]
    fn test_write_under_foreign_read_fails() {
        let lock = Arc::new(ColumnLock::new());
        let barrier = Arc::new(Barrier::new(2));

        let reader = {
            let lock = lock.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let _token = lock.try_read(ID).unwrap();
                barrier.wait();
                barrier.wait();
            })
        };

        barrier.wait();
        assert!(lock.try_write(ID).is_err());
        barrier.wait();
        reader.join().unwrap();
        assert!(lock.try_write(ID).is_ok());
    }

    #[test]
    fn test_reentrant_read_fails() {
        let lock = ColumnLock::new();
        let _first = lock.try_read(ID).unwrap();
        assert_eq!(reason(lock.try_read(ID).err().unwrap()), LockViolationReason::ReentrantRead);
        assert_eq!(lock.readers(), Some(1));
    }

    #[test]
    fn test_read_under_write_fails() {
        let lock = ColumnLock::new();
        let write = lock.try_write(ID).unwrap();
        assert_eq!(reason(lock.try_read(ID).err().unwrap()), LockViolationReason::WriteHeld);
        assert_eq!(reason(lock.try_write(ID).err().unwrap()), LockViolationReason::WriteHeld);
        assert_eq!(lock.readers(), None);
        drop(write);
        assert!(lock.is_free());
        assert!(lock.try_read(ID).is_ok());
    }

    #[test]
    fn test_distinct_columns_independent() {
        let a = ColumnLock::new();
        let b = ColumnLock::new();
        let _read = a.try_read(ID).unwrap();
        let _write = b.try_write(ID).unwrap();
        assert!(a.try_write(ID).is_err());
    }
}
