// SPDX-License-Identifier: MPL-2.0

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicI32, Ordering};

use spin::Once;

use crate::{
    prelude::*,
    thread::{Thread, ThreadState},
    time,
};

/// The wake code stored while a waiter is still asleep.
const WAIT_PENDING: i32 = i32::MIN;

static YIELD_HOOK: Once<fn()> = Once::new();

/// Installs the relax function used while a waiter spins.
///
/// The kernel runtime installs a halt-until-interrupt here; hosted tests
/// install `std::thread::yield_now`.
pub fn set_yield_hook(f: fn()) {
    YIELD_HOOK.call_once(|| f);
}

fn relax() {
    if let Some(f) = YIELD_HOOK.get() {
        f();
    } else {
        core::hint::spin_loop();
    }
}

/// A single sleeping thread parked on a [`WaitQueue`].
pub struct Waiter {
    thread: Weak<Thread>,
    status: AtomicI32,
}

impl Waiter {
    fn new(thread: &Arc<Thread>) -> Arc<Self> {
        Arc::new(Self {
            thread: Arc::downgrade(thread),
            status: AtomicI32::new(WAIT_PENDING),
        })
    }

    fn wake(&self, code: i32) {
        self.status.store(code, Ordering::Release);
    }

    fn poll(&self) -> Option<i32> {
        match self.status.load(Ordering::Acquire) {
            WAIT_PENDING => None,
            code => Some(code),
        }
    }
}

/// A queue of threads blocked on a condition.
///
/// Waking never blocks and is safe from IRQ context; waiting is only legal
/// in task context. A thread parked here is in the `Waiting` state and has
/// its `waitq` back-pointer set; the transition back to running clears the
/// pointer before the wait returns.
pub struct WaitQueue {
    waiters: SpinLock<VecDeque<Arc<Waiter>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Parks `thread` until woken, interrupted, or past the timeout.
    ///
    /// Returns `Ok(())` on a plain wake, `Err(EINTR)` when woken by a
    /// signal, and `Err(ETIMEDOUT)` when the timeout expires first.
    pub fn wait(
        self: &Arc<Self>,
        thread: &Arc<Thread>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = timeout.map(|t| time::now() + t);
        let waiter = self.enqueue(thread);
        let code = self.park(thread, &waiter, deadline);
        code_to_result(code)
    }

    /// Parks `thread` until `cond` yields a value.
    ///
    /// The waiter is enqueued *before* every re-check of `cond`, so a wake
    /// racing with the check is never lost. A plain wake merely re-checks;
    /// `EINTR` and `ETIMEDOUT` abort the wait.
    pub fn wait_until<F, R>(
        self: &Arc<Self>,
        thread: &Arc<Thread>,
        mut cond: F,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        F: FnMut() -> Option<R>,
    {
        let deadline = timeout.map(|t| time::now() + t);
        loop {
            let waiter = self.enqueue(thread);
            if let Some(res) = cond() {
                self.unlink(&waiter);
                thread.set_waitq(None);
                if thread.state() == ThreadState::Waiting {
                    thread.transition(ThreadState::Running);
                }
                return Ok(res);
            }
            let code = self.park(thread, &waiter, deadline);
            code_to_result(code)?;
        }
    }

    fn enqueue(self: &Arc<Self>, thread: &Arc<Thread>) -> Arc<Waiter> {
        let waiter = Waiter::new(thread);
        self.waiters.lock().push_back(waiter.clone());
        thread.set_waitq(Some(Arc::downgrade(self)));
        thread.transition(ThreadState::Waiting);
        waiter
    }

    fn park(&self, thread: &Arc<Thread>, waiter: &Arc<Waiter>, deadline: Option<Duration>) -> i32 {
        let code = loop {
            if let Some(code) = waiter.poll() {
                break code;
            }
            if let Some(deadline) = deadline {
                if time::now() >= deadline {
                    // Only times out if nobody woke us while we raced to
                    // remove ourselves from the queue.
                    if self.unlink(waiter) {
                        break -(Errno::ETIMEDOUT as i32);
                    }
                    break waiter.poll().unwrap_or(0);
                }
            }
            relax();
        };

        thread.set_waitq(None);
        if thread.state() == ThreadState::Waiting {
            thread.transition(ThreadState::Running);
        }
        code
    }

    /// Wakes every parked thread with `code` (0 or a negative errno).
    pub fn wake_all(&self, code: i32) {
        let mut waiters = self.waiters.lock();
        while let Some(waiter) = waiters.pop_front() {
            waiter.wake(code);
        }
    }

    /// Wakes the longest-parked thread, if any.
    pub fn wake_one(&self, code: i32) -> bool {
        let Some(waiter) = self.waiters.lock().pop_front() else {
            return false;
        };
        waiter.wake(code);
        true
    }

    /// Wakes a specific thread parked on this queue.
    pub fn wake_thread(&self, thread: &Arc<Thread>, code: i32) -> bool {
        let mut waiters = self.waiters.lock();
        let Some(pos) = waiters.iter().position(|w| {
            w.thread
                .upgrade()
                .is_some_and(|t| t.tid() == thread.tid())
        }) else {
            return false;
        };
        let waiter = waiters.remove(pos).unwrap();
        waiter.wake(code);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    fn unlink(&self, waiter: &Arc<Waiter>) -> bool {
        let mut waiters = self.waiters.lock();
        let Some(pos) = waiters.iter().position(|w| Arc::ptr_eq(w, waiter)) else {
            return false;
        };
        waiters.remove(pos);
        true
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn code_to_result(code: i32) -> Result<()> {
    match code {
        c if c == -(Errno::EINTR as i32) => {
            Err(Error::with_message(Errno::EINTR, "interrupted wait"))
        }
        c if c == -(Errno::ETIMEDOUT as i32) => {
            Err(Error::with_message(Errno::ETIMEDOUT, "wait timed out"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::thread::Thread;

    #[test]
    fn timeout_elapses() {
        let queue = Arc::new(WaitQueue::new());
        let thread = Thread::new_for_test(1);
        let err = queue
            .wait(&thread, Some(Duration::from_nanos(1)))
            .unwrap_err();
        assert_eq!(err.error(), Errno::ETIMEDOUT);
        assert!(thread.waitq().is_none());
        assert_eq!(thread.state(), ThreadState::Running);
    }

    #[test]
    fn targeted_wake_interrupts() {
        let queue = Arc::new(WaitQueue::new());
        let thread = Thread::new_for_test(2);
        let queue2 = queue.clone();
        let thread2 = thread.clone();
        let waker = std::thread::spawn(move || {
            while !queue2.wake_thread(&thread2, -(Errno::EINTR as i32)) {
                std::thread::yield_now();
            }
        });
        let err = queue.wait(&thread, None).unwrap_err();
        assert_eq!(err.error(), Errno::EINTR);
        waker.join().unwrap();
    }

    #[test]
    fn wake_all_releases_every_waiter() {
        let queue = Arc::new(WaitQueue::new());
        let mut joins = Vec::new();
        for tid in 10..14 {
            let queue = queue.clone();
            joins.push(std::thread::spawn(move || {
                let thread = Thread::new_for_test(tid);
                queue.wait(&thread, None)
            }));
        }
        while queue.waiters.lock().len() < 4 {
            std::thread::yield_now();
        }
        queue.wake_all(0);
        for join in joins {
            assert!(join.join().unwrap().is_ok());
        }
    }
}
