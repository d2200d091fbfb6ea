// SPDX-License-Identifier: MPL-2.0

//! Device transports.
//!
//! A transport gives the framework status/feature registers, virtqueue
//! configuration, doorbells, interrupt routing and device config space.
//! The device adapters never touch PCI (or anything else) directly.

pub mod pci;

#[cfg(test)]
pub mod fake;

use alloc::boxed::Box;

use bitflags::bitflags;

use crate::device::VirtioDeviceType;

bitflags! {
    /// The DEVICE_STATUS register.
    pub struct DeviceStatus: u8 {
        const ACKNOWLEDGE        = 1;
        const DRIVER             = 2;
        const DRIVER_OK          = 4;
        const FEATURES_OK        = 8;
        const DEVICE_NEEDS_RESET = 64;
        const FAILED             = 128;
    }
}

/// Runs in interrupt context: no allocation, no blocking, bounded work.
pub type IrqCallback = Box<dyn Fn() + Send + Sync>;

pub trait VirtioTransport: Send {
    fn device_type(&self) -> VirtioDeviceType;

    // ==================== Device-level registers ====================

    fn read_device_features(&mut self) -> u64;
    fn write_driver_features(&mut self, features: u64);
    fn read_device_status(&self) -> DeviceStatus;
    fn write_device_status(&mut self, status: DeviceStatus);

    /// Final step of initialization: DRIVER_OK.
    fn finish_init(&mut self) {
        self.write_device_status(
            DeviceStatus::ACKNOWLEDGE
                | DeviceStatus::DRIVER
                | DeviceStatus::FEATURES_OK
                | DeviceStatus::DRIVER_OK,
        );
    }

    // ==================== Virtqueue configuration ====================

    fn num_queues(&self) -> u16;
    fn max_queue_size(&mut self, idx: u16) -> u16;
    /// Writes the ring addresses and enables the queue.
    fn set_queue(&mut self, idx: u16, size: u16, desc: u64, avail: u64, used: u64);
    fn notify_queue(&mut self, idx: u16);

    // ==================== Interrupts ====================

    /// The ISR status byte (bit 0: queue interrupt, bit 1: config change).
    fn read_isr_status(&self) -> u8;
    fn register_queue_callback(&mut self, idx: u16, callback: IrqCallback);
    fn register_cfg_callback(&mut self, callback: IrqCallback);

    // ==================== Device config space ====================

    fn read_device_config(&self, offset: usize, buf: &mut [u8]);
    fn write_device_config(&mut self, offset: usize, buf: &[u8]);
}
