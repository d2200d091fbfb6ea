// SPDX-License-Identifier: MPL-2.0

//! Test doubles: an in-memory transport and a device model that services
//! rings the way real hardware would.

#![allow(unsafe_code)]

use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use spin::Mutex;

use super::{DeviceStatus, IrqCallback, VirtioTransport};
use crate::{device::VirtioDeviceType, queue::VirtQueue};

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueConfig {
    pub size: u16,
    pub desc: u64,
    pub avail: u64,
    pub used: u64,
    pub enabled: bool,
}

pub struct FakeTransport {
    device_type: VirtioDeviceType,
    pub device_features: u64,
    pub driver_features: u64,
    pub status: DeviceStatus,
    pub queue_size: u16,
    pub num_queues: u16,
    pub queues: Vec<QueueConfig>,
    pub notifications: Mutex<Vec<u16>>,
    pub isr_status: u8,
    pub config_space: Mutex<Vec<u8>>,
    pub reject_features: bool,
    queue_callbacks: Vec<Option<IrqCallback>>,
}

impl FakeTransport {
    pub fn new(device_type: VirtioDeviceType, num_queues: u16) -> Self {
        let mut queues = Vec::new();
        let mut queue_callbacks = Vec::new();
        for _ in 0..num_queues {
            queues.push(QueueConfig::default());
            queue_callbacks.push(None);
        }
        Self {
            device_type,
            device_features: u64::MAX,
            driver_features: 0,
            status: DeviceStatus::empty(),
            queue_size: 128,
            num_queues,
            queues,
            notifications: Mutex::new(Vec::new()),
            // Queue-interrupt bit permanently raised: tests drive the IRQ
            // handlers directly.
            isr_status: 1,
            config_space: Mutex::new(alloc::vec![0u8; 256]),
            reject_features: false,
            queue_callbacks,
        }
    }

    /// Fires the registered queue interrupt handler, as the device would.
    pub fn raise_queue_irq(&self, idx: u16) {
        if let Some(Some(callback)) = self.queue_callbacks.get(idx as usize) {
            callback();
        }
    }
}

impl VirtioTransport for FakeTransport {
    fn device_type(&self) -> VirtioDeviceType {
        self.device_type
    }

    fn read_device_features(&mut self) -> u64 {
        self.device_features
    }

    fn write_driver_features(&mut self, features: u64) {
        self.driver_features = features;
    }

    fn read_device_status(&self) -> DeviceStatus {
        if self.reject_features {
            self.status - DeviceStatus::FEATURES_OK
        } else {
            self.status
        }
    }

    fn write_device_status(&mut self, status: DeviceStatus) {
        self.status = status;
    }

    fn num_queues(&self) -> u16 {
        self.num_queues
    }

    fn max_queue_size(&mut self, _idx: u16) -> u16 {
        self.queue_size
    }

    fn set_queue(&mut self, idx: u16, size: u16, desc: u64, avail: u64, used: u64) {
        self.queues[idx as usize] = QueueConfig {
            size,
            desc,
            avail,
            used,
            enabled: true,
        };
    }

    fn notify_queue(&mut self, idx: u16) {
        self.notifications.lock().push(idx);
    }

    fn read_isr_status(&self) -> u8 {
        self.isr_status
    }

    fn register_queue_callback(&mut self, idx: u16, callback: IrqCallback) {
        self.queue_callbacks[idx as usize] = Some(callback);
    }

    fn register_cfg_callback(&mut self, _callback: IrqCallback) {}

    fn read_device_config(&self, offset: usize, buf: &mut [u8]) {
        let space = self.config_space.lock();
        buf.copy_from_slice(&space[offset..offset + buf.len()]);
    }

    fn write_device_config(&mut self, offset: usize, buf: &[u8]) {
        let mut space = self.config_space.lock();
        space[offset..offset + buf.len()].copy_from_slice(buf);
    }
}

/// One buffer of a chain as the device model sees it.
#[derive(Debug, Clone, Copy)]
pub struct FakeChainBuf {
    pub addr: u64,
    pub size: u32,
    pub device_writable: bool,
}

/// A descriptor chain handed to the model's service closure.
pub struct FakeChain {
    pub bufs: Vec<FakeChainBuf>,
}

impl FakeChain {
    /// Bytes of the `n`th buffer.
    pub fn read(&self, n: usize) -> Vec<u8> {
        let buf = self.bufs[n];
        let mut out = alloc::vec![0u8; buf.size as usize];
        for (i, b) in out.iter_mut().enumerate() {
            // SAFETY: test buffers are live DMA pages with identity
            // device addressing.
            *b = unsafe { (buf.addr as usize as *const u8).add(i).read_volatile() };
        }
        out
    }

    /// Fills the `n`th buffer (which must be device-writable).
    pub fn write(&self, n: usize, bytes: &[u8]) {
        let buf = self.bufs[n];
        assert!(buf.device_writable, "writing a device-readable buffer");
        assert!(bytes.len() <= buf.size as usize);
        for (i, b) in bytes.iter().enumerate() {
            // SAFETY: as in `read`.
            unsafe { (buf.addr as usize as *mut u8).add(i).write_volatile(*b) };
        }
    }
}

/// A minimal device model driving one queue's rings from "the other
/// side": it consumes available entries and produces used entries.
pub struct FakeDeviceModel {
    desc: u64,
    avail: u64,
    used: u64,
    size: u16,
    last_avail: Mutex<u16>,
}

impl FakeDeviceModel {
    pub fn attach(queue: &VirtQueue) -> Self {
        let (desc, avail, used) = queue.pages();
        Self {
            desc: desc.daddr(),
            avail: avail.daddr(),
            used: used.daddr(),
            size: queue.size(),
            last_avail: Mutex::new(0),
        }
    }

    fn read_u16(addr: u64) -> u16 {
        // SAFETY: addresses point into live DMA pages.
        unsafe { (addr as usize as *const u16).read_volatile() }
    }

    fn write_u16(addr: u64, val: u16) {
        // SAFETY: as above.
        unsafe { (addr as usize as *mut u16).write_volatile(val) }
    }

    fn read_desc(&self, slot: u16) -> (u64, u32, u16, u16) {
        let base = self.desc + slot as u64 * 16;
        // SAFETY: the descriptor table is one live DMA page.
        unsafe {
            (
                (base as usize as *const u64).read_volatile(),
                ((base + 8) as usize as *const u32).read_volatile(),
                ((base + 12) as usize as *const u16).read_volatile(),
                ((base + 14) as usize as *const u16).read_volatile(),
            )
        }
    }

    /// Services every outstanding available entry. The closure inspects
    /// (and may fill) the chain and returns the written byte count.
    pub fn service(&self, mut handler: impl FnMut(&FakeChain) -> u32) {
        fence(Ordering::Acquire);
        let avail_idx = Self::read_u16(self.avail + 2);
        let mut last = self.last_avail.lock();
        while *last != avail_idx {
            let ring_slot = (*last % self.size) as u64;
            let head = Self::read_u16(self.avail + 4 + ring_slot * 2);

            let mut bufs = Vec::new();
            let mut slot = head;
            loop {
                let (addr, size, flags, next) = self.read_desc(slot);
                bufs.push(FakeChainBuf {
                    addr,
                    size,
                    device_writable: flags & crate::queue::VIRTQ_DESC_F_WRITE != 0,
                });
                if flags & crate::queue::VIRTQ_DESC_F_NEXT == 0 {
                    break;
                }
                slot = next;
            }
            let written = handler(&FakeChain { bufs });

            let used_idx = Self::read_u16(self.used + 2);
            let used_slot = (used_idx % self.size) as u64;
            let elem = self.used + 4 + used_slot * 8;
            // SAFETY: the used ring is one live DMA page.
            unsafe {
                (elem as usize as *mut u32).write_volatile(head as u32);
                ((elem + 4) as usize as *mut u32).write_volatile(written);
            }
            fence(Ordering::Release);
            Self::write_u16(self.used + 2, used_idx.wrapping_add(1));

            *last = last.wrapping_add(1);
        }
    }
}
