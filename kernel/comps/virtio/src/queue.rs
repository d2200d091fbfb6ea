// SPDX-License-Identifier: MPL-2.0

//! The split virtqueue: descriptor table, available ring, used ring, one
//! DMA page each.

use core::sync::atomic::{fence, Ordering};

use bytemuck_derive::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use crate::{
    dma::{DmaBuf, DmaPage},
    transport::VirtioTransport,
};

/// Queues never exceed this many descriptors, whatever the device offers.
pub const QUEUE_SIZE_MAX: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    InvalidArgs,
    /// No room left in the descriptor table for the chain.
    BufferTooSmall,
    /// Nothing in the used ring.
    NotReady,
}

pub const VIRTQ_DESC_F_NEXT: u16 = 1;
pub const VIRTQ_DESC_F_WRITE: u16 = 2;
pub const VIRTQ_DESC_F_INDIRECT: u16 = 4;

const VIRTQ_USED_F_NO_NOTIFY: u16 = 1;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
struct Descriptor {
    addr: u64,
    size: u32,
    flags: u16,
    next: u16,
}

const_assert_eq!(core::mem::size_of::<Descriptor>(), 16);

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
struct UsedElem {
    id: u32,
    len: u32,
}

// Ring layout offsets within their pages.
const RING_FLAGS: usize = 0;
const RING_INDEX: usize = 2;
const RING_BASE: usize = 4;

/// One buffer of a request chain.
#[derive(Debug, Clone, Copy)]
pub struct VirtqBuf {
    pub addr: u64,
    pub size: u32,
}

impl VirtqBuf {
    pub fn from_dma(buf: &dyn DmaBuf) -> Self {
        Self {
            addr: buf.daddr(),
            size: buf.len() as u32,
        }
    }
}

/// A split virtqueue bound to one transport queue slot.
pub struct VirtQueue {
    id: u16,
    size: u16,
    desc_page: DmaPage,
    avail_page: DmaPage,
    used_page: DmaPage,
    /// Next free descriptor slot.
    desc_head: u16,
    /// Next used-ring entry the driver has not consumed.
    used_tail: u16,
    /// Published available index (mirrors the ring field).
    avail_idx: u16,
    /// Descriptors currently owned by the device.
    in_flight: u16,
}

impl VirtQueue {
    /// Configures transport queue `id` and allocates its three rings.
    ///
    /// The negotiated size is clamped to [`QUEUE_SIZE_MAX`].
    pub fn new(id: u16, transport: &mut dyn VirtioTransport) -> Result<Self, QueueError> {
        let device_size = transport.max_queue_size(id);
        if device_size == 0 {
            return Err(QueueError::InvalidArgs);
        }
        let size = device_size.min(QUEUE_SIZE_MAX);

        let desc_page = DmaPage::alloc();
        let avail_page = DmaPage::alloc();
        let used_page = DmaPage::alloc();

        transport.set_queue(
            id,
            size,
            desc_page.daddr(),
            avail_page.daddr(),
            used_page.daddr(),
        );

        avail_page.write_at::<u16>(RING_FLAGS, &0);
        used_page.write_at::<u16>(RING_FLAGS, &VIRTQ_USED_F_NO_NOTIFY);

        Ok(Self {
            id,
            size,
            desc_page,
            avail_page,
            used_page,
            desc_head: 0,
            used_tail: 0,
            avail_idx: 0,
            in_flight: 0,
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn num_free(&self) -> u16 {
        self.size - self.in_flight
    }

    fn desc_offset(slot: u16) -> usize {
        slot as usize * core::mem::size_of::<Descriptor>()
    }

    /// Queues one request chain: `nread` device-readable buffers followed
    /// by `nwrite` device-writable ones. Returns the head token.
    pub fn send(&mut self, bufs: &[VirtqBuf], nread: usize, nwrite: usize) -> Result<u16, QueueError> {
        let total = nread + nwrite;
        if total == 0 || total != bufs.len() {
            return Err(QueueError::InvalidArgs);
        }
        if total > self.num_free() as usize {
            return Err(QueueError::BufferTooSmall);
        }

        let head = self.desc_head;
        for (i, buf) in bufs.iter().enumerate() {
            let slot = self.desc_head;
            let next = (slot + 1) % self.size;
            let mut desc = Descriptor {
                addr: buf.addr,
                size: buf.size,
                flags: if i < nread { 0 } else { VIRTQ_DESC_F_WRITE },
                next: 0,
            };
            if i != total - 1 {
                desc.flags |= VIRTQ_DESC_F_NEXT;
                desc.next = next;
            }
            self.desc_page.write_at(Self::desc_offset(slot), &desc);
            self.desc_head = next;
        }
        self.in_flight += total as u16;

        let ring_slot = (self.avail_idx % self.size) as usize;
        self.avail_page
            .write_at::<u16>(RING_BASE + ring_slot * 2, &head);
        // The device must observe the ring entry before the index bump.
        fence(Ordering::Release);
        self.avail_idx = self.avail_idx.wrapping_add(1);
        self.avail_page.write_at::<u16>(RING_INDEX, &self.avail_idx);
        Ok(head)
    }

    /// Rings the doorbell for this queue.
    pub fn notify(&self, transport: &mut dyn VirtioTransport) {
        fence(Ordering::Release);
        transport.notify_queue(self.id);
    }

    pub fn can_pop(&self) -> bool {
        fence(Ordering::Acquire);
        self.used_tail != self.used_page.read_at::<u16>(RING_INDEX)
    }

    /// Takes one completion off the used ring.
    pub fn pop_used(&mut self) -> Result<(u16, u32), QueueError> {
        fence(Ordering::Acquire);
        let used_idx = self.used_page.read_at::<u16>(RING_INDEX);
        if self.used_tail == used_idx {
            return Err(QueueError::NotReady);
        }
        let slot = (self.used_tail % self.size) as usize;
        let elem: UsedElem = self
            .used_page
            .read_at(RING_BASE + slot * core::mem::size_of::<UsedElem>());
        self.used_tail = self.used_tail.wrapping_add(1);
        self.reclaim_chain(elem.id as u16);
        Ok((elem.id as u16, elem.len))
    }

    /// IRQ path: drains every pending completion into `on_msg`.
    pub fn drain_used(&mut self, mut on_msg: impl FnMut(u16, u32)) {
        while let Ok((id, len)) = self.pop_used() {
            on_msg(id, len);
        }
    }

    /// Completions pending between the device index and our tail.
    pub fn pending_completions(&self) -> u16 {
        fence(Ordering::Acquire);
        self.used_page
            .read_at::<u16>(RING_INDEX)
            .wrapping_sub(self.used_tail)
    }

    /// The buffer address a descriptor currently points at. Drivers that
    /// prepost receive buffers use this to map completions back to their
    /// buffers, independent of descriptor-slot reuse order.
    pub fn desc_addr(&self, slot: u16) -> u64 {
        let desc: Descriptor = self.desc_page.read_at(Self::desc_offset(slot % self.size));
        desc.addr
    }

    fn reclaim_chain(&mut self, mut slot: u16) {
        loop {
            let desc: Descriptor = self.desc_page.read_at(Self::desc_offset(slot));
            if self.in_flight > 0 {
                self.in_flight -= 1;
            }
            if desc.flags & VIRTQ_DESC_F_NEXT == 0 {
                break;
            }
            slot = desc.next;
        }
    }

    /// The raw pages, for device models in tests.
    #[cfg(test)]
    pub(crate) fn pages(&self) -> (&DmaPage, &DmaPage, &DmaPage) {
        (&self.desc_page, &self.avail_page, &self.used_page)
    }
}
