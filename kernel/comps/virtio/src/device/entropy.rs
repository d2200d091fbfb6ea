// SPDX-License-Identifier: MPL-2.0

//! The VirtIO entropy device: one queue, writable buffers only.

use alloc::{boxed::Box, sync::Arc, vec::Vec};

use spin::Mutex;

use super::{VirtioDeviceError, VirtioDeviceType};
use crate::{
    dma::{DmaPage, PAGE_SIZE},
    queue::{QueueError, VirtQueue, VirtqBuf},
    transport::VirtioTransport,
};

pub struct EntropyDevice {
    transport: Mutex<Box<dyn VirtioTransport>>,
    queue: Mutex<VirtQueue>,
    buffer_page: DmaPage,
    /// Serializes collectors; the device fills one buffer at a time.
    io_lock: Mutex<()>,
}

static DEVICES: Mutex<Vec<Arc<EntropyDevice>>> = Mutex::new(Vec::new());

pub fn get_device(index: usize) -> Option<Arc<EntropyDevice>> {
    DEVICES.lock().get(index).cloned()
}

impl EntropyDevice {
    pub fn init(transport: Box<dyn VirtioTransport>) -> Result<(), VirtioDeviceError> {
        let device = Arc::new(Self::new(transport)?);
        device.transport.lock().finish_init();
        DEVICES.lock().push(device);
        Ok(())
    }

    fn new(mut transport: Box<dyn VirtioTransport>) -> Result<Self, VirtioDeviceError> {
        debug_assert_eq!(transport.device_type(), VirtioDeviceType::Entropy);
        if transport.num_queues() < 1 {
            return Err(VirtioDeviceError::QueuesAmountDoNotMatch);
        }
        let queue =
            VirtQueue::new(0, transport.as_mut()).map_err(|_| VirtioDeviceError::InitFailed)?;
        Ok(Self {
            transport: Mutex::new(transport),
            queue: Mutex::new(queue),
            buffer_page: DmaPage::alloc(),
            io_lock: Mutex::new(()),
        })
    }

    /// Collects up to a page of hardware entropy into `buf`, blocking
    /// until the device delivers. Returns the byte count.
    pub fn request_entropy(&self, buf: &mut [u8]) -> Result<usize, VirtioDeviceError> {
        let _io = self.io_lock.lock();
        let size = buf.len().min(PAGE_SIZE);

        {
            let mut transport = self.transport.lock();
            let mut queue = self.queue.lock();
            let vq_buf = [VirtqBuf {
                addr: self.buffer_page.daddr(),
                size: size as u32,
            }];
            match queue.send(&vq_buf, 0, 1) {
                Ok(_) => {}
                Err(QueueError::BufferTooSmall) => return Err(VirtioDeviceError::DeviceBusy),
                Err(_) => return Err(VirtioDeviceError::IoError),
            }
            queue.notify(transport.as_mut());
        }

        // The kernel parks the caller on the driver waitqueue; completion
        // arrives through the queue interrupt.
        let len = loop {
            let mut queue = self.queue.lock();
            if let Ok((_id, len)) = queue.pop_used() {
                break len as usize;
            }
            drop(queue);
            core::hint::spin_loop();
        };

        let len = len.min(size);
        self.buffer_page.read_bytes(0, &mut buf[..len]);
        Ok(len)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::fake::{FakeDeviceModel, FakeTransport};

    #[test]
    fn collect_blocks_until_the_device_fills() {
        let fake = FakeTransport::new(VirtioDeviceType::Entropy, 1);
        let device = Arc::new(EntropyDevice::new(Box::new(fake)).unwrap());
        let model = FakeDeviceModel::attach(&device.queue.lock());

        let done = Arc::new(core::sync::atomic::AtomicBool::new(false));
        let done2 = done.clone();
        let feeder = std::thread::spawn(move || {
            while !done2.load(core::sync::atomic::Ordering::Acquire) {
                model.service(|chain| {
                    assert!(chain.bufs[0].device_writable);
                    let n = chain.bufs[0].size as usize;
                    let bytes: Vec<u8> = (0..n).map(|i| i as u8 ^ 0x5a).collect();
                    chain.write(0, &bytes);
                    n as u32
                });
                std::thread::yield_now();
            }
        });

        let mut buf = [0u8; 32];
        let n = device.request_entropy(&mut buf).unwrap();
        assert_eq!(n, 32);
        assert_eq!(buf[0], 0x5a);
        assert_eq!(buf[1], 1 ^ 0x5a);

        done.store(true, core::sync::atomic::Ordering::Release);
        feeder.join().unwrap();
    }
}
