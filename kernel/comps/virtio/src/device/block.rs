// SPDX-License-Identifier: MPL-2.0

//! The VirtIO block device.
//!
//! One request queue. Every request is a three-buffer chain: a 16-byte
//! header, the 512-byte data sector, and one writeback status byte.

use alloc::{boxed::Box, sync::Arc, vec::Vec};

use bytemuck_derive::{Pod, Zeroable};
use log::debug;
use spin::Mutex;

use super::{VirtioDeviceError, VirtioDeviceType};
use crate::{
    dma::{DmaPage, DmaSlice},
    queue::{QueueError, VirtQueue, VirtqBuf},
    transport::VirtioTransport,
};

pub const SECTOR_SIZE: usize = 512;

pub const VIRTIO_BLK_T_IN: u32 = 0;
pub const VIRTIO_BLK_T_OUT: u32 = 1;
pub const VIRTIO_BLK_T_FLUSH: u32 = 4;

pub const VIRTIO_BLK_S_OK: u8 = 0;
pub const VIRTIO_BLK_S_IOERR: u8 = 1;
pub const VIRTIO_BLK_S_UNSUPP: u8 = 2;

/// Feature bits the driver understands (none of the optional ones yet).
pub fn negotiate_features(offered: u64) -> u64 {
    const VIRTIO_BLK_F_MQ: u64 = 1 << 12;
    offered & !VIRTIO_BLK_F_MQ
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub struct BlockReqHeader {
    pub type_: u32,
    pub reserved: u32,
    pub sector: u64,
}

/// Offsets within the request page: header, sector data, status byte.
const HDR_OFF: usize = 0;
const DATA_OFF: usize = 16;
const STATUS_OFF: usize = DATA_OFF + SECTOR_SIZE;

pub struct BlockDevice {
    transport: Mutex<Box<dyn VirtioTransport>>,
    queue: Mutex<VirtQueue>,
    /// One in-flight request at a time; the chain lives in this page.
    request_page: DmaPage,
    /// Serializes submitters; completion is signalled through `done`.
    io_lock: Mutex<()>,
    done: CompletionFlag,
    capacity_sectors: u64,
}

/// Completion handoff between the IRQ path and the sleeping submitter.
/// The kernel wraps this in its waitqueue; the driver only needs the
/// store/load pair.
#[derive(Default)]
struct CompletionFlag(core::sync::atomic::AtomicBool);

impl CompletionFlag {
    fn signal(&self) {
        self.0.store(true, core::sync::atomic::Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, core::sync::atomic::Ordering::Acquire)
    }
}

static DEVICES: Mutex<Vec<Arc<BlockDevice>>> = Mutex::new(Vec::new());

pub fn get_device(index: usize) -> Option<Arc<BlockDevice>> {
    DEVICES.lock().get(index).cloned()
}

impl BlockDevice {
    /// Brings the device up and registers it.
    pub fn init(transport: Box<dyn VirtioTransport>) -> Result<(), VirtioDeviceError> {
        let device = Arc::new(Self::new(transport)?);

        let irq_device = device.clone();
        device
            .transport
            .lock()
            .register_queue_callback(0, Box::new(move || irq_device.handle_irq()));
        device.transport.lock().finish_init();
        DEVICES.lock().push(device);
        Ok(())
    }

    fn new(mut transport: Box<dyn VirtioTransport>) -> Result<Self, VirtioDeviceError> {
        debug_assert_eq!(transport.device_type(), VirtioDeviceType::Block);
        if transport.num_queues() < 1 {
            return Err(VirtioDeviceError::QueuesAmountDoNotMatch);
        }
        let queue = VirtQueue::new(0, transport.as_mut())
            .map_err(|_| VirtioDeviceError::InitFailed)?;

        let mut capacity = [0u8; 8];
        transport.read_device_config(0, &mut capacity);
        let capacity_sectors = u64::from_le_bytes(capacity);
        debug!("virtio-blk capacity: {} sectors", capacity_sectors);

        Ok(Self {
            transport: Mutex::new(transport),
            queue: Mutex::new(queue),
            request_page: DmaPage::alloc(),
            io_lock: Mutex::new(()),
            done: CompletionFlag::default(),
            capacity_sectors,
        })
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    /// IRQ path: bounded ring drain, completion signalling only.
    pub fn handle_irq(&self) {
        let isr = self.transport.lock().read_isr_status();
        if isr & 0x1 == 0 {
            return;
        }
        let mut queue = self.queue.lock();
        queue.drain_used(|_id, _len| {
            self.done.signal();
        });
    }

    fn submit(&self, header: BlockReqHeader, data_readable: bool) -> Result<u32, VirtioDeviceError> {
        self.request_page.write_at(HDR_OFF, &header);
        self.request_page.write_at::<u8>(STATUS_OFF, &0xFF);

        let hdr = DmaSlice {
            page: &self.request_page,
            offset: HDR_OFF,
            len: core::mem::size_of::<BlockReqHeader>(),
        };
        let data = DmaSlice {
            page: &self.request_page,
            offset: DATA_OFF,
            len: SECTOR_SIZE,
        };
        let status = DmaSlice {
            page: &self.request_page,
            offset: STATUS_OFF,
            len: 1,
        };

        let bufs = [
            VirtqBuf::from_dma(&hdr),
            VirtqBuf::from_dma(&data),
            VirtqBuf::from_dma(&status),
        ];
        let (nread, nwrite) = if data_readable { (2, 1) } else { (1, 2) };

        {
            // Lock order: transport before queue, as on the IRQ path.
            let mut transport = self.transport.lock();
            let mut queue = self.queue.lock();
            match queue.send(&bufs, nread, nwrite) {
                Ok(_) => {}
                Err(QueueError::BufferTooSmall) => return Err(VirtioDeviceError::DeviceBusy),
                Err(_) => return Err(VirtioDeviceError::IoError),
            }
            queue.notify(transport.as_mut());
        }

        // The kernel parks the caller on the driver waitqueue here; the
        // flag is the wakeup condition.
        let mut completed_len = 0;
        loop {
            if self.done.take() {
                break;
            }
            // Poll path for environments without delivered interrupts.
            let mut queue = self.queue.lock();
            if let Ok((_id, len)) = queue.pop_used() {
                completed_len = len;
                break;
            }
            drop(queue);
            core::hint::spin_loop();
        }

        let status: u8 = self.request_page.read_at(STATUS_OFF);
        if status != VIRTIO_BLK_S_OK {
            return Err(VirtioDeviceError::IoError);
        }
        Ok(completed_len)
    }

    /// Reads one 512-byte sector.
    pub fn read_sector(&self, sector: u64, buf: &mut [u8]) -> Result<(), VirtioDeviceError> {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let _io = self.io_lock.lock();
        self.submit(
            BlockReqHeader {
                type_: VIRTIO_BLK_T_IN,
                reserved: 0,
                sector,
            },
            false,
        )?;
        self.request_page.read_bytes(DATA_OFF, buf);
        Ok(())
    }

    /// Writes one 512-byte sector.
    pub fn write_sector(&self, sector: u64, buf: &[u8]) -> Result<(), VirtioDeviceError> {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let _io = self.io_lock.lock();
        self.request_page.write_bytes(DATA_OFF, buf);
        self.submit(
            BlockReqHeader {
                type_: VIRTIO_BLK_T_OUT,
                reserved: 0,
                sector,
            },
            true,
        )?;
        Ok(())
    }

    /// Flushes the device write cache.
    pub fn flush(&self) -> Result<(), VirtioDeviceError> {
        let _io = self.io_lock.lock();
        self.submit(
            BlockReqHeader {
                type_: VIRTIO_BLK_T_FLUSH,
                reserved: 0,
                sector: 0,
            },
            true,
        )?;
        Ok(())
    }
}
