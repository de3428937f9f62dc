//! Read Permits
//!
//! Counting permit pool bounding simultaneous `get` operations.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{KvError, Result};

/// Bounded pool of read permits
///
/// Caps concurrent seeks/file-handle pressure, not logical concurrency.
/// Waiters honor an optional deadline and are released with
/// `StoreClosed` when the pool is closed.
pub struct ReadPermits {
    state: Mutex<PermitState>,
    released: Condvar,
    capacity: usize,
}

struct PermitState {
    available: usize,
    closed: bool,
}

/// A held permit; returned to the pool on drop
pub struct ReadPermit<'a> {
    pool: &'a ReadPermits,
}

impl ReadPermits {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PermitState {
                available: capacity,
                closed: false,
            }),
            released: Condvar::new(),
            capacity,
        }
    }

    /// Take a permit, waiting until one frees up or `deadline` passes
    pub fn acquire(&self, deadline: Option<Instant>) -> Result<ReadPermit<'_>> {
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(KvError::StoreClosed);
            }
            if state.available > 0 {
                state.available -= 1;
                return Ok(ReadPermit { pool: self });
            }

            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut state, deadline).timed_out() {
                        // One last look: a release may have raced the timeout
                        if !state.closed && state.available > 0 {
                            state.available -= 1;
                            return Ok(ReadPermit { pool: self });
                        }
                        return Err(KvError::ReadTimeout);
                    }
                }
                None => self.released.wait(&mut state),
            }
        }
    }

    /// Refuse new permits and wake every waiter
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.released.notify_all();
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self) {
        self.state.lock().available += 1;
        self.released.notify_one();
    }
}

impl Drop for ReadPermit<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}
