// SPDX-License-Identifier: MPL-2.0

//! The VirtIO-over-PCI modern transport.
//!
//! Vendor capabilities in config space point at register blocks inside
//! BARs: the common configuration block, the notify window (with its
//! per-queue multiplier), the ISR byte and the device config block.

use alloc::{boxed::Box, sync::Arc, vec::Vec};

use log::warn;

use super::{DeviceStatus, IrqCallback, VirtioTransport};
use crate::device::{VirtioDeviceError, VirtioDeviceType};

/// The slice of PCI the transport consumes: config-space access, BAR
/// region mapping and interrupt plumbing. The PCI bus driver implements
/// this; tests fake it.
pub trait PciDevice: Send + Sync {
    /// The PCI device id (0x1040 + virtio device type for modern devices).
    fn device_id(&self) -> u16;
    fn config_read_u32(&self, offset: u8) -> u32;
    fn config_write_u32(&self, offset: u8, value: u32);
    fn enable_bus_mastering(&self);
    /// Maps `length` bytes at `offset` inside `bar`.
    fn map_bar(&self, bar: u8, offset: u32, length: u32) -> Result<Arc<dyn PciRegion>, VirtioDeviceError>;
    /// Allocates an MSI-X vector routed to `handler`; `None` when MSI-X
    /// is unavailable and legacy INTx is used instead.
    fn register_msix(&self, handler: IrqCallback) -> Option<u16>;
    /// Registers the legacy shared interrupt handler.
    fn register_intx(&self, handler: IrqCallback);
}

/// A mapped BAR register block.
pub trait PciRegion: Send + Sync {
    fn read_u8(&self, offset: usize) -> u8;
    fn read_u16(&self, offset: usize) -> u16;
    fn read_u32(&self, offset: usize) -> u32;
    fn write_u8(&self, offset: usize, value: u8);
    fn write_u16(&self, offset: usize, value: u16);
    fn write_u32(&self, offset: usize, value: u32);

    fn read_u64(&self, offset: usize) -> u64 {
        self.read_u32(offset) as u64 | (self.read_u32(offset + 4) as u64) << 32
    }

    fn write_u64(&self, offset: usize, value: u64) {
        self.write_u32(offset, value as u32);
        self.write_u32(offset + 4, (value >> 32) as u32);
    }
}

// PCI capability plumbing.
const PCI_STATUS_CAP_LIST: u32 = 1 << 4;
const PCI_CFG_STATUS: u8 = 0x04;
const PCI_CFG_CAP_PTR: u8 = 0x34;
const PCI_CAP_ID_VNDR: u8 = 0x09;

// cfg_type values of the vendor capabilities.
const VIRTIO_PCI_CAP_COMMON_CFG: u8 = 1;
const VIRTIO_PCI_CAP_NOTIFY_CFG: u8 = 2;
const VIRTIO_PCI_CAP_ISR_CFG: u8 = 3;
const VIRTIO_PCI_CAP_DEVICE_CFG: u8 = 4;

// Register offsets inside the common configuration block (VirtIO 1.1
// §4.1.4.3).
const COMMON_DEVICE_FEATURE_SELECT: usize = 0x00;
const COMMON_DEVICE_FEATURE: usize = 0x04;
const COMMON_DRIVER_FEATURE_SELECT: usize = 0x08;
const COMMON_DRIVER_FEATURE: usize = 0x0C;
const COMMON_MSIX_CONFIG: usize = 0x10;
const COMMON_NUM_QUEUES: usize = 0x12;
const COMMON_DEVICE_STATUS: usize = 0x14;
const COMMON_QUEUE_SELECT: usize = 0x16;
const COMMON_QUEUE_SIZE: usize = 0x18;
const COMMON_QUEUE_MSIX_VECTOR: usize = 0x1A;
const COMMON_QUEUE_ENABLE: usize = 0x1C;
const COMMON_QUEUE_DESC: usize = 0x20;
const COMMON_QUEUE_DRIVER: usize = 0x28;
const COMMON_QUEUE_DEVICE: usize = 0x30;

/// The vector written when no MSI-X vector is assigned.
const VIRTIO_MSI_NO_VECTOR: u16 = 0xFFFF;

struct VendorCap {
    cfg_type: u8,
    bar: u8,
    offset: u32,
    length: u32,
    /// Config offset of the capability itself (the notify capability
    /// carries its multiplier right behind the header).
    cap_offset: u8,
}

fn walk_vendor_caps(device: &dyn PciDevice) -> Result<Vec<VendorCap>, VirtioDeviceError> {
    if device.config_read_u32(PCI_CFG_STATUS) >> 16 & PCI_STATUS_CAP_LIST == 0 {
        return Err(VirtioDeviceError::CapabilityMissing);
    }
    let mut caps = Vec::new();
    let mut ptr = (device.config_read_u32(PCI_CFG_CAP_PTR) & 0xFC) as u8;
    while ptr != 0 {
        let header = device.config_read_u32(ptr);
        let cap_id = (header & 0xFF) as u8;
        let next = ((header >> 8) & 0xFC) as u8;
        if cap_id == PCI_CAP_ID_VNDR {
            let cfg_type = ((header >> 24) & 0xFF) as u8;
            let bar_word = device.config_read_u32(ptr + 0x4);
            let bar = (bar_word & 0xFF) as u8;
            let offset = device.config_read_u32(ptr + 0x8);
            let length = device.config_read_u32(ptr + 0xC);
            caps.push(VendorCap {
                cfg_type,
                bar,
                offset,
                length,
                cap_offset: ptr,
            });
        }
        ptr = next;
    }
    Ok(caps)
}

/// The modern PCI transport.
pub struct PciTransport {
    device_type: VirtioDeviceType,
    device: Box<dyn PciDevice>,
    common: Arc<dyn PciRegion>,
    isr: Arc<dyn PciRegion>,
    device_cfg: Option<Arc<dyn PciRegion>>,
    notify: Arc<dyn PciRegion>,
    notify_multiplier: u32,
    /// Per-queue notify offsets are resolved at set_queue time.
    queue_notify_off: Vec<u16>,
    msix_available: bool,
}

impl PciTransport {
    /// Probes a PCI device and maps its register blocks.
    pub fn new(device: Box<dyn PciDevice>) -> Result<Self, VirtioDeviceError> {
        let device_id = device.device_id();
        if device_id < 0x1040 {
            return Err(VirtioDeviceError::NoDevice);
        }
        let device_type = VirtioDeviceType::try_from((device_id - 0x1040) as u8)
            .map_err(|_| VirtioDeviceError::NoDevice)?;

        device.enable_bus_mastering();

        let mut common = None;
        let mut notify = None;
        let mut isr = None;
        let mut device_cfg = None;
        let mut notify_multiplier = 0;
        for cap in walk_vendor_caps(device.as_ref())? {
            match cap.cfg_type {
                VIRTIO_PCI_CAP_COMMON_CFG => {
                    common = Some(device.map_bar(cap.bar, cap.offset, cap.length)?);
                }
                VIRTIO_PCI_CAP_NOTIFY_CFG => {
                    notify_multiplier = device.config_read_u32(cap.cap_offset + 0x10);
                    notify = Some(device.map_bar(cap.bar, cap.offset, cap.length)?);
                }
                VIRTIO_PCI_CAP_ISR_CFG => {
                    isr = Some(device.map_bar(cap.bar, cap.offset, cap.length.max(1))?);
                }
                VIRTIO_PCI_CAP_DEVICE_CFG => {
                    device_cfg = Some(device.map_bar(cap.bar, cap.offset, cap.length)?);
                }
                other => {
                    warn!("ignoring virtio pci capability type {}", other);
                }
            }
        }
        let common = common.ok_or(VirtioDeviceError::CapabilityMissing)?;
        let notify = notify.ok_or(VirtioDeviceError::CapabilityMissing)?;
        let isr = isr.ok_or(VirtioDeviceError::CapabilityMissing)?;

        Ok(Self {
            device_type,
            device,
            common,
            isr,
            device_cfg,
            notify,
            notify_multiplier,
            queue_notify_off: Vec::new(),
            msix_available: true,
        })
    }

    fn select_queue(&self, idx: u16) {
        self.common.write_u16(COMMON_QUEUE_SELECT, idx);
    }
}

impl VirtioTransport for PciTransport {
    fn device_type(&self) -> VirtioDeviceType {
        self.device_type
    }

    fn read_device_features(&mut self) -> u64 {
        self.common.write_u32(COMMON_DEVICE_FEATURE_SELECT, 0);
        let low = self.common.read_u32(COMMON_DEVICE_FEATURE) as u64;
        self.common.write_u32(COMMON_DEVICE_FEATURE_SELECT, 1);
        let high = self.common.read_u32(COMMON_DEVICE_FEATURE) as u64;
        high << 32 | low
    }

    fn write_driver_features(&mut self, features: u64) {
        self.common.write_u32(COMMON_DRIVER_FEATURE_SELECT, 0);
        self.common.write_u32(COMMON_DRIVER_FEATURE, features as u32);
        self.common.write_u32(COMMON_DRIVER_FEATURE_SELECT, 1);
        self.common
            .write_u32(COMMON_DRIVER_FEATURE, (features >> 32) as u32);
    }

    fn read_device_status(&self) -> DeviceStatus {
        DeviceStatus::from_bits_truncate(self.common.read_u8(COMMON_DEVICE_STATUS))
    }

    fn write_device_status(&mut self, status: DeviceStatus) {
        self.common.write_u8(COMMON_DEVICE_STATUS, status.bits());
    }

    fn num_queues(&self) -> u16 {
        self.common.read_u16(COMMON_NUM_QUEUES)
    }

    fn max_queue_size(&mut self, idx: u16) -> u16 {
        self.select_queue(idx);
        self.common.read_u16(COMMON_QUEUE_SIZE)
    }

    fn set_queue(&mut self, idx: u16, size: u16, desc: u64, avail: u64, used: u64) {
        self.select_queue(idx);
        self.common.write_u16(COMMON_QUEUE_SIZE, size);
        self.common.write_u64(COMMON_QUEUE_DESC, desc);
        self.common.write_u64(COMMON_QUEUE_DRIVER, avail);
        self.common.write_u64(COMMON_QUEUE_DEVICE, used);
        let notify_off = self.common.read_u16(0x1E);
        if self.queue_notify_off.len() <= idx as usize {
            self.queue_notify_off.resize(idx as usize + 1, 0);
        }
        self.queue_notify_off[idx as usize] = notify_off;
        self.common.write_u16(COMMON_QUEUE_ENABLE, 1);
    }

    fn notify_queue(&mut self, idx: u16) {
        let off = self
            .queue_notify_off
            .get(idx as usize)
            .copied()
            .unwrap_or(idx);
        self.notify
            .write_u16(off as usize * self.notify_multiplier as usize, idx);
    }

    fn read_isr_status(&self) -> u8 {
        self.isr.read_u8(0)
    }

    fn register_queue_callback(&mut self, idx: u16, callback: IrqCallback) {
        // MSI-X preferred; the assigned vector is routed to this queue.
        // Without MSI-X the no-vector sentinel is written and the shared
        // INTx line dispatches through the ISR byte.
        let vector = if self.msix_available {
            self.device.register_msix(callback)
        } else {
            None
        };
        let vector = match vector {
            Some(vector) => vector,
            None => {
                self.msix_available = false;
                self.device.register_intx(callback_placeholder());
                VIRTIO_MSI_NO_VECTOR
            }
        };
        self.select_queue(idx);
        self.common.write_u16(COMMON_QUEUE_MSIX_VECTOR, vector);
    }

    fn register_cfg_callback(&mut self, callback: IrqCallback) {
        let vector = self
            .device
            .register_msix(callback)
            .unwrap_or(VIRTIO_MSI_NO_VECTOR);
        self.common.write_u16(COMMON_MSIX_CONFIG, vector);
    }

    fn read_device_config(&self, offset: usize, buf: &mut [u8]) {
        let Some(cfg) = &self.device_cfg else {
            buf.fill(0);
            return;
        };
        for (i, b) in buf.iter_mut().enumerate() {
            *b = cfg.read_u8(offset + i);
        }
    }

    fn write_device_config(&mut self, offset: usize, buf: &[u8]) {
        let Some(cfg) = &self.device_cfg else {
            return;
        };
        for (i, b) in buf.iter().enumerate() {
            cfg.write_u8(offset + i, *b);
        }
    }
}

fn callback_placeholder() -> IrqCallback {
    Box::new(|| {})
}
