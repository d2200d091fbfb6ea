// SPDX-License-Identifier: MPL-2.0

//! Fast userspace mutex support: a bucketed table of waiters keyed by
//! address-space identity and user address.

use crate::{prelude::*, sync::WaitQueue, thread::Thread, vm::VmSpace};

const BUCKET_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FutexKey {
    space: usize,
    addr: Vaddr,
}

impl FutexKey {
    fn new(vm: &Arc<VmSpace>, addr: Vaddr) -> Self {
        Self {
            space: Arc::as_ptr(vm) as usize,
            addr,
        }
    }

    fn bucket(&self) -> usize {
        (self.addr / core::mem::size_of::<u32>()) % BUCKET_COUNT
    }
}

struct FutexItem {
    key: FutexKey,
    waitq: Arc<WaitQueue>,
}

struct FutexBucket {
    items: Vec<Arc<FutexItem>>,
}

static BUCKETS: [Mutex<FutexBucket>; BUCKET_COUNT] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY: Mutex<FutexBucket> = Mutex::new(FutexBucket { items: Vec::new() });
    [EMPTY; BUCKET_COUNT]
};

/// `futex(FUTEX_WAIT)`: sleeps while `*addr == expected`.
pub fn futex_wait(
    thread: &Arc<Thread>,
    vm: &Arc<VmSpace>,
    addr: Vaddr,
    expected: i32,
    timeout: Option<Duration>,
) -> Result<()> {
    let key = FutexKey::new(vm, addr);
    let item = {
        let mut bucket = BUCKETS[key.bucket()].lock();
        // The value check happens under the bucket lock so a concurrent
        // wake after a store cannot be missed.
        let current: i32 = vm.read_val(addr)?;
        if current != expected {
            return_errno_with_message!(Errno::EAGAIN, "futex value changed");
        }
        let item = Arc::new(FutexItem {
            key,
            waitq: Arc::new(WaitQueue::new()),
        });
        bucket.items.push(item.clone());
        item
    };

    let res = item.waitq.wait(thread, timeout);
    let mut bucket = BUCKETS[key.bucket()].lock();
    bucket.items.retain(|i| !Arc::ptr_eq(i, &item));
    res
}

/// `futex(FUTEX_WAKE)`: wakes up to `max_count` waiters on `addr`.
pub fn futex_wake(vm: &Arc<VmSpace>, addr: Vaddr, max_count: usize) -> Result<usize> {
    let key = FutexKey::new(vm, addr);
    let woken_items: Vec<Arc<FutexItem>> = {
        let mut bucket = BUCKETS[key.bucket()].lock();
        let mut woken = Vec::new();
        let mut kept = Vec::new();
        for item in bucket.items.drain(..) {
            if woken.len() < max_count && item.key == key {
                woken.push(item);
            } else {
                kept.push(item);
            }
        }
        bucket.items = kept;
        woken
    };
    for item in &woken_items {
        item.waitq.wake_all(0);
    }
    Ok(woken_items.len())
}

/// `futex(FUTEX_REQUEUE)`: wakes `max_wake` waiters and moves up to
/// `max_requeue` of the rest onto `new_addr`.
pub fn futex_requeue(
    vm: &Arc<VmSpace>,
    addr: Vaddr,
    max_wake: usize,
    max_requeue: usize,
    new_addr: Vaddr,
) -> Result<usize> {
    if new_addr == addr {
        return futex_wake(vm, addr, max_wake);
    }
    let woken = futex_wake(vm, addr, max_wake)?;

    let old_key = FutexKey::new(vm, addr);
    let new_key = FutexKey::new(vm, new_addr);
    let (from, to) = (old_key.bucket(), new_key.bucket());
    let mut moved = Vec::new();
    {
        let mut bucket = BUCKETS[from].lock();
        let mut kept = Vec::new();
        for item in bucket.items.drain(..) {
            if moved.len() < max_requeue && item.key == old_key {
                moved.push(Arc::new(FutexItem {
                    key: new_key,
                    waitq: item.waitq.clone(),
                }));
            } else {
                kept.push(item);
            }
        }
        bucket.items = kept;
    }
    if !moved.is_empty() {
        BUCKETS[to].lock().items.extend(moved);
    }
    Ok(woken)
}
