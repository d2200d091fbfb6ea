// SPDX-License-Identifier: MPL-2.0

//! The VirtIO network device.
//!
//! Three queues: receive, transmit and control. Receive buffers are
//! preposted page-sized; each frame carries a 12-byte header. The IRQ
//! path only copies the payload out and reposts the buffer; pushing the
//! packet up the stack happens in task context.

use alloc::{boxed::Box, collections::VecDeque, sync::Arc, vec::Vec};

use bytemuck_derive::{Pod, Zeroable};
use log::debug;
use spin::Mutex;

use super::{VirtioDeviceError, VirtioDeviceType};
use crate::{
    dma::{DmaPage, DmaSlice, PAGE_SIZE},
    queue::{QueueError, VirtQueue, VirtqBuf},
    transport::VirtioTransport,
};

pub const QUEUE_RECV: u16 = 0;
pub const QUEUE_SEND: u16 = 1;
pub const QUEUE_CTRL: u16 = 2;

/// Preposted receive buffers per queue.
const RX_BUFFERS: usize = 32;

/// The per-packet header (VIRTIO_NET_F_MRG_RXBUF off).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub struct VirtioNetHdr {
    pub flags: u8,
    pub gso_type: u8,
    pub hdr_len: u16,
    pub gso_size: u16,
    pub csum_start: u16,
    pub csum_offset: u16,
    pub num_buffers: u16,
}

pub const NET_HDR_SIZE: usize = core::mem::size_of::<VirtioNetHdr>();

pub fn negotiate_features(offered: u64) -> u64 {
    const VIRTIO_NET_F_MAC: u64 = 1 << 5;
    const VIRTIO_NET_F_STATUS: u64 = 1 << 16;
    offered & (VIRTIO_NET_F_MAC | VIRTIO_NET_F_STATUS)
}

/// A received frame, headerless, ready for the network stack.
pub struct NetPacket {
    pub data: Vec<u8>,
}

pub struct NetworkDevice {
    transport: Mutex<Box<dyn VirtioTransport>>,
    recv_queue: Mutex<VirtQueue>,
    send_queue: Mutex<VirtQueue>,
    #[allow(dead_code)]
    ctrl_queue: Mutex<VirtQueue>,
    rx_buffers: Vec<DmaPage>,
    tx_page: DmaPage,
    mac: [u8; 6],
    /// Frames copied out of the ring, awaiting task-context delivery.
    rx_pending: Mutex<VecDeque<NetPacket>>,
}

static DEVICES: Mutex<Vec<Arc<NetworkDevice>>> = Mutex::new(Vec::new());

pub fn get_device(index: usize) -> Option<Arc<NetworkDevice>> {
    DEVICES.lock().get(index).cloned()
}

impl NetworkDevice {
    pub fn init(transport: Box<dyn VirtioTransport>) -> Result<(), VirtioDeviceError> {
        let device = Arc::new(Self::new(transport)?);
        let irq_device = device.clone();
        device
            .transport
            .lock()
            .register_queue_callback(QUEUE_RECV, Box::new(move || irq_device.handle_recv_irq()));
        device.transport.lock().finish_init();
        DEVICES.lock().push(device);
        Ok(())
    }

    fn new(mut transport: Box<dyn VirtioTransport>) -> Result<Self, VirtioDeviceError> {
        debug_assert_eq!(transport.device_type(), VirtioDeviceType::Network);
        if transport.num_queues() < 3 {
            return Err(VirtioDeviceError::QueuesAmountDoNotMatch);
        }
        let mut recv_queue = VirtQueue::new(QUEUE_RECV, transport.as_mut())
            .map_err(|_| VirtioDeviceError::InitFailed)?;
        let send_queue = VirtQueue::new(QUEUE_SEND, transport.as_mut())
            .map_err(|_| VirtioDeviceError::InitFailed)?;
        let ctrl_queue = VirtQueue::new(QUEUE_CTRL, transport.as_mut())
            .map_err(|_| VirtioDeviceError::InitFailed)?;

        let mut mac = [0u8; 6];
        transport.read_device_config(0, &mut mac);
        debug!("virtio-net mac: {:02x?}", mac);

        // Prepost the whole receive ring.
        let mut rx_buffers = Vec::with_capacity(RX_BUFFERS);
        for _ in 0..RX_BUFFERS {
            let page = DmaPage::alloc();
            let buf = [VirtqBuf {
                addr: page.daddr(),
                size: PAGE_SIZE as u32,
            }];
            recv_queue
                .send(&buf, 0, 1)
                .map_err(|_| VirtioDeviceError::InitFailed)?;
            rx_buffers.push(page);
        }

        Ok(Self {
            transport: Mutex::new(transport),
            recv_queue: Mutex::new(recv_queue),
            send_queue: Mutex::new(send_queue),
            ctrl_queue: Mutex::new(ctrl_queue),
            rx_buffers,
            tx_page: DmaPage::alloc(),
            mac,
            rx_pending: Mutex::new(VecDeque::new()),
        })
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// IRQ path: copy each completion out, repost its buffer, defer the
    /// upstream handoff.
    pub fn handle_recv_irq(&self) {
        let isr = self.transport.lock().read_isr_status();
        if isr & 0x1 == 0 {
            return;
        }
        let mut queue = self.recv_queue.lock();
        let mut completed = Vec::new();
        queue.drain_used(|id, len| {
            completed.push((id, len));
        });
        for (id, len) in completed {
            let addr = queue.desc_addr(id);
            let Some(page) = self.rx_buffers.iter().find(|p| p.daddr() == addr) else {
                continue;
            };
            let payload_len = (len as usize).saturating_sub(NET_HDR_SIZE);
            let mut data = alloc::vec![0u8; payload_len];
            page.read_bytes(NET_HDR_SIZE, &mut data);
            self.rx_pending.lock().push_back(NetPacket { data });

            let buf = [VirtqBuf {
                addr: page.daddr(),
                size: PAGE_SIZE as u32,
            }];
            let _ = queue.send(&buf, 0, 1);
        }
    }

    /// Task-context half of receive: hands one pending frame upstream.
    pub fn pop_received(&self) -> Option<NetPacket> {
        self.rx_pending.lock().pop_front()
    }

    /// Transmits one frame.
    pub fn send(&self, frame: &[u8]) -> Result<(), VirtioDeviceError> {
        if frame.len() > PAGE_SIZE - NET_HDR_SIZE {
            return Err(VirtioDeviceError::IoError);
        }
        let mut transport = self.transport.lock();
        let mut queue = self.send_queue.lock();

        // Reclaim finished transmissions before queueing more.
        queue.drain_used(|_, _| {});

        self.tx_page.write_at(0, &VirtioNetHdr::default());
        self.tx_page.write_bytes(NET_HDR_SIZE, frame);
        let whole = DmaSlice {
            page: &self.tx_page,
            offset: 0,
            len: NET_HDR_SIZE + frame.len(),
        };
        match queue.send(&[VirtqBuf::from_dma(&whole)], 1, 0) {
            Ok(_) => {}
            Err(QueueError::BufferTooSmall) => return Err(VirtioDeviceError::DeviceBusy),
            Err(_) => return Err(VirtioDeviceError::IoError),
        }
        queue.notify(transport.as_mut());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::fake::{FakeDeviceModel, FakeTransport};

    fn make_device() -> (Arc<NetworkDevice>, FakeDeviceModel, FakeDeviceModel) {
        let mut fake = FakeTransport::new(VirtioDeviceType::Network, 3);
        fake.queue_size = 64;
        // MAC in config space.
        fake.config_space.lock()[..6].copy_from_slice(&[2, 0, 0, 0, 0, 1]);
        let device = Arc::new(NetworkDevice::new(Box::new(fake)).unwrap());
        let rx_model = FakeDeviceModel::attach(&device.recv_queue.lock());
        let tx_model = FakeDeviceModel::attach(&device.send_queue.lock());
        (device, rx_model, tx_model)
    }

    #[test]
    fn receive_copies_payload_and_reposts() {
        let (device, rx_model, _tx) = make_device();
        assert_eq!(device.mac(), [2, 0, 0, 0, 0, 1]);

        // The device writes one frame into the first preposted buffer.
        let mut served = 0;
        rx_model.service(|chain| {
            served += 1;
            if served == 1 {
                let mut frame = alloc::vec![0u8; NET_HDR_SIZE];
                frame.extend_from_slice(b"ping!");
                chain.write(0, &frame);
                frame.len() as u32
            } else {
                0
            }
        });

        device.handle_recv_irq();

        let pkt = device.pop_received().expect("frame was delivered");
        assert_eq!(&pkt.data, b"ping!");

        // All other completions were zero-length frames.
        while let Some(pkt) = device.pop_received() {
            assert!(pkt.data.is_empty());
        }
    }

    #[test]
    fn send_prefixes_the_net_header() {
        let (device, _rx, tx_model) = make_device();
        device.send(b"hello").unwrap();
        let mut seen = None;
        tx_model.service(|chain| {
            assert_eq!(chain.bufs.len(), 1);
            assert!(!chain.bufs[0].device_writable);
            seen = Some(chain.read(0));
            0
        });
        let bytes = seen.unwrap();
        assert_eq!(bytes.len(), NET_HDR_SIZE + 5);
        assert_eq!(&bytes[NET_HDR_SIZE..], b"hello");
    }
}
