// SPDX-License-Identifier: MPL-2.0

//! The VirtIO GPU device, 2D scanout only.
//!
//! Two queues (control, cursor). Every command is a synchronous
//! request/response round-trip on the control queue. The framebuffer is
//! a host-visible BGRA resource backed by an array of pages.

use alloc::{boxed::Box, sync::Arc, vec::Vec};

use bytemuck_derive::{Pod, Zeroable};
use log::debug;
use spin::Mutex;

use super::{VirtioDeviceError, VirtioDeviceType};
use crate::{
    dma::{DmaPage, DmaSlice, PAGE_SIZE},
    queue::{VirtQueue, VirtqBuf},
    transport::VirtioTransport,
};

pub const QUEUE_CONTROL: u16 = 0;
pub const QUEUE_CURSOR: u16 = 1;

// Command/response types.
pub const VIRTIO_GPU_CMD_GET_DISPLAY_INFO: u32 = 0x0100;
pub const VIRTIO_GPU_CMD_RESOURCE_CREATE_2D: u32 = 0x0101;
pub const VIRTIO_GPU_CMD_SET_SCANOUT: u32 = 0x0103;
pub const VIRTIO_GPU_CMD_RESOURCE_FLUSH: u32 = 0x0104;
pub const VIRTIO_GPU_CMD_TRANSFER_TO_HOST_2D: u32 = 0x0105;
pub const VIRTIO_GPU_CMD_RESOURCE_ATTACH_BACKING: u32 = 0x0106;
pub const VIRTIO_GPU_RESP_OK_NODATA: u32 = 0x1100;
pub const VIRTIO_GPU_RESP_OK_DISPLAY_INFO: u32 = 0x1101;

pub const VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM: u32 = 1;

const MAX_SCANOUTS: usize = 16;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub struct CtrlHeader {
    pub type_: u32,
    pub flags: u32,
    pub fence_id: u64,
    pub ctx_id: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub struct GpuRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
struct DisplayOne {
    r: GpuRect,
    enabled: u32,
    flags: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
struct RespDisplayInfo {
    hdr: CtrlHeader,
    pmodes: [DisplayOne; MAX_SCANOUTS],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
struct ResourceCreate2d {
    hdr: CtrlHeader,
    resource_id: u32,
    format: u32,
    width: u32,
    height: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
struct SetScanout {
    hdr: CtrlHeader,
    r: GpuRect,
    scanout_id: u32,
    resource_id: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
struct ResourceFlush {
    hdr: CtrlHeader,
    r: GpuRect,
    resource_id: u32,
    padding: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
struct TransferToHost2d {
    hdr: CtrlHeader,
    r: GpuRect,
    offset: u64,
    resource_id: u32,
    padding: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
struct AttachBacking {
    hdr: CtrlHeader,
    resource_id: u32,
    nr_entries: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
struct MemEntry {
    addr: u64,
    length: u32,
    padding: u32,
}

pub fn negotiate_features(_offered: u64) -> u64 {
    0
}

const FB_RESOURCE_ID: u32 = 1;
/// Bytes per BGRA pixel.
const BPP: usize = 4;

pub struct GpuDevice {
    transport: Mutex<Box<dyn VirtioTransport>>,
    control_queue: Mutex<VirtQueue>,
    #[allow(dead_code)]
    cursor_queue: Mutex<VirtQueue>,
    /// One page for the request, one for the response.
    request_page: DmaPage,
    response_page: DmaPage,
    framebuffer: Mutex<Vec<DmaPage>>,
    mode: Mutex<Option<(u32, u32)>>,
}

static DEVICES: Mutex<Vec<Arc<GpuDevice>>> = Mutex::new(Vec::new());

pub fn get_device(index: usize) -> Option<Arc<GpuDevice>> {
    DEVICES.lock().get(index).cloned()
}

impl GpuDevice {
    pub fn init(transport: Box<dyn VirtioTransport>) -> Result<(), VirtioDeviceError> {
        let device = Arc::new(Self::new(transport)?);
        device.transport.lock().finish_init();
        device.setup_framebuffer()?;
        DEVICES.lock().push(device);
        Ok(())
    }

    fn new(mut transport: Box<dyn VirtioTransport>) -> Result<Self, VirtioDeviceError> {
        debug_assert_eq!(transport.device_type(), VirtioDeviceType::Gpu);
        if transport.num_queues() < 2 {
            return Err(VirtioDeviceError::QueuesAmountDoNotMatch);
        }
        let control_queue = VirtQueue::new(QUEUE_CONTROL, transport.as_mut())
            .map_err(|_| VirtioDeviceError::InitFailed)?;
        let cursor_queue = VirtQueue::new(QUEUE_CURSOR, transport.as_mut())
            .map_err(|_| VirtioDeviceError::InitFailed)?;
        Ok(Self {
            transport: Mutex::new(transport),
            control_queue: Mutex::new(control_queue),
            cursor_queue: Mutex::new(cursor_queue),
            request_page: DmaPage::alloc(),
            response_page: DmaPage::alloc(),
            framebuffer: Mutex::new(Vec::new()),
            mode: Mutex::new(None),
        })
    }

    /// One synchronous control round-trip. The request is serialized into
    /// the request page; the device response lands in the response page.
    fn control_request<Req: bytemuck::Pod, Resp: bytemuck::Pod>(
        &self,
        request: &Req,
    ) -> Result<Resp, VirtioDeviceError> {
        let req_len = core::mem::size_of::<Req>();
        let resp_len = core::mem::size_of::<Resp>();
        assert!(req_len <= PAGE_SIZE && resp_len <= PAGE_SIZE);
        self.request_page.write_at(0, request);

        {
            let mut transport = self.transport.lock();
            let mut queue = self.control_queue.lock();
            let req = DmaSlice {
                page: &self.request_page,
                offset: 0,
                len: req_len,
            };
            let resp = DmaSlice {
                page: &self.response_page,
                offset: 0,
                len: resp_len,
            };
            queue
                .send(&[VirtqBuf::from_dma(&req), VirtqBuf::from_dma(&resp)], 1, 1)
                .map_err(|_| VirtioDeviceError::DeviceBusy)?;
            queue.notify(transport.as_mut());
        }

        loop {
            let mut queue = self.control_queue.lock();
            if queue.pop_used().is_ok() {
                break;
            }
            drop(queue);
            core::hint::spin_loop();
        }
        Ok(self.response_page.read_at(0))
    }

    fn check_nodata(&self, resp: CtrlHeader) -> Result<(), VirtioDeviceError> {
        if resp.type_ != VIRTIO_GPU_RESP_OK_NODATA {
            return Err(VirtioDeviceError::IoError);
        }
        Ok(())
    }

    /// The first enabled scanout's mode.
    pub fn query_display_info(&self) -> Result<GpuRect, VirtioDeviceError> {
        let resp: RespDisplayInfo = self.control_request(&CtrlHeader {
            type_: VIRTIO_GPU_CMD_GET_DISPLAY_INFO,
            ..Default::default()
        })?;
        if resp.hdr.type_ != VIRTIO_GPU_RESP_OK_DISPLAY_INFO {
            return Err(VirtioDeviceError::IoError);
        }
        let mode = resp
            .pmodes
            .iter()
            .find(|m| m.enabled != 0)
            .ok_or(VirtioDeviceError::IoError)?;
        Ok(mode.r)
    }

    /// Creates the BGRA framebuffer resource, attaches page backing and
    /// points scanout 0 at it.
    pub fn setup_framebuffer(&self) -> Result<(), VirtioDeviceError> {
        let rect = self.query_display_info()?;
        debug!("virtio-gpu scanout: {}x{}", rect.width, rect.height);

        let resp: CtrlHeader = self.control_request(&ResourceCreate2d {
            hdr: CtrlHeader {
                type_: VIRTIO_GPU_CMD_RESOURCE_CREATE_2D,
                ..Default::default()
            },
            resource_id: FB_RESOURCE_ID,
            format: VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM,
            width: rect.width,
            height: rect.height,
        })?;
        self.check_nodata(resp)?;

        let fb_bytes = rect.width as usize * rect.height as usize * BPP;
        let page_count = fb_bytes.div_ceil(PAGE_SIZE);
        let pages: Vec<DmaPage> = (0..page_count).map(|_| DmaPage::alloc()).collect();

        // AttachBacking carries its scatter list inline after the header.
        let attach = AttachBacking {
            hdr: CtrlHeader {
                type_: VIRTIO_GPU_CMD_RESOURCE_ATTACH_BACKING,
                ..Default::default()
            },
            resource_id: FB_RESOURCE_ID,
            nr_entries: page_count as u32,
        };
        self.request_page.write_at(0, &attach);
        let mut offset = core::mem::size_of::<AttachBacking>();
        for page in &pages {
            let entry = MemEntry {
                addr: page.daddr(),
                length: PAGE_SIZE as u32,
                padding: 0,
            };
            self.request_page.write_at(offset, &entry);
            offset += core::mem::size_of::<MemEntry>();
        }
        let resp: CtrlHeader = self.raw_control_request(offset)?;
        self.check_nodata(resp)?;

        let resp: CtrlHeader = self.control_request(&SetScanout {
            hdr: CtrlHeader {
                type_: VIRTIO_GPU_CMD_SET_SCANOUT,
                ..Default::default()
            },
            r: rect,
            scanout_id: 0,
            resource_id: FB_RESOURCE_ID,
        })?;
        self.check_nodata(resp)?;

        *self.framebuffer.lock() = pages;
        *self.mode.lock() = Some((rect.width, rect.height));
        Ok(())
    }

    /// Sends the already-serialized request in the request page.
    fn raw_control_request<Resp: bytemuck::Pod>(
        &self,
        req_len: usize,
    ) -> Result<Resp, VirtioDeviceError> {
        {
            let mut transport = self.transport.lock();
            let mut queue = self.control_queue.lock();
            let req = DmaSlice {
                page: &self.request_page,
                offset: 0,
                len: req_len,
            };
            let resp = DmaSlice {
                page: &self.response_page,
                offset: 0,
                len: core::mem::size_of::<Resp>(),
            };
            queue
                .send(&[VirtqBuf::from_dma(&req), VirtqBuf::from_dma(&resp)], 1, 1)
                .map_err(|_| VirtioDeviceError::DeviceBusy)?;
            queue.notify(transport.as_mut());
        }
        loop {
            let mut queue = self.control_queue.lock();
            if queue.pop_used().is_ok() {
                break;
            }
            drop(queue);
            core::hint::spin_loop();
        }
        Ok(self.response_page.read_at(0))
    }

    pub fn mode(&self) -> Option<(u32, u32)> {
        *self.mode.lock()
    }

    /// Writes one BGRA pixel into the backing pages.
    pub fn put_pixel(&self, x: u32, y: u32, bgra: u32) -> Result<(), VirtioDeviceError> {
        let (width, _height) = self.mode().ok_or(VirtioDeviceError::IoError)?;
        let byte_off = (y as usize * width as usize + x as usize) * BPP;
        let fb = self.framebuffer.lock();
        let page = fb
            .get(byte_off / PAGE_SIZE)
            .ok_or(VirtioDeviceError::IoError)?;
        page.write_at(byte_off % PAGE_SIZE, &bgra);
        Ok(())
    }

    /// Pushes a rectangle to the host and flushes the scanout.
    pub fn flush(&self, r: GpuRect) -> Result<(), VirtioDeviceError> {
        let resp: CtrlHeader = self.control_request(&TransferToHost2d {
            hdr: CtrlHeader {
                type_: VIRTIO_GPU_CMD_TRANSFER_TO_HOST_2D,
                ..Default::default()
            },
            r,
            offset: 0,
            resource_id: FB_RESOURCE_ID,
            padding: 0,
        })?;
        self.check_nodata(resp)?;
        let resp: CtrlHeader = self.control_request(&ResourceFlush {
            hdr: CtrlHeader {
                type_: VIRTIO_GPU_CMD_RESOURCE_FLUSH,
                ..Default::default()
            },
            r,
            resource_id: FB_RESOURCE_ID,
            padding: 0,
        })?;
        self.check_nodata(resp)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::fake::{FakeChain, FakeDeviceModel, FakeTransport};

    /// Replies like a one-scanout 64x32 GPU.
    fn gpu_model_reply(chain: &FakeChain) -> u32 {
        let req = chain.read(0);
        let cmd = u32::from_le_bytes(req[0..4].try_into().unwrap());
        match cmd {
            VIRTIO_GPU_CMD_GET_DISPLAY_INFO => {
                let mut resp = RespDisplayInfo {
                    hdr: CtrlHeader {
                        type_: VIRTIO_GPU_RESP_OK_DISPLAY_INFO,
                        ..Default::default()
                    },
                    ..Default::default()
                };
                resp.pmodes[0] = DisplayOne {
                    r: GpuRect {
                        x: 0,
                        y: 0,
                        width: 64,
                        height: 32,
                    },
                    enabled: 1,
                    flags: 0,
                };
                chain.write(1, bytemuck::bytes_of(&resp));
                core::mem::size_of::<RespDisplayInfo>() as u32
            }
            _ => {
                let resp = CtrlHeader {
                    type_: VIRTIO_GPU_RESP_OK_NODATA,
                    ..Default::default()
                };
                chain.write(1, bytemuck::bytes_of(&resp));
                core::mem::size_of::<CtrlHeader>() as u32
            }
        }
    }

    fn with_model<R>(device: &Arc<GpuDevice>, f: impl FnOnce() -> R) -> R {
        let model = FakeDeviceModel::attach(&device.control_queue.lock());
        let done = Arc::new(core::sync::atomic::AtomicBool::new(false));
        let done2 = done.clone();
        let servicer = std::thread::spawn(move || {
            while !done2.load(core::sync::atomic::Ordering::Acquire) {
                model.service(gpu_model_reply);
                std::thread::yield_now();
            }
        });
        let res = f();
        done.store(true, core::sync::atomic::Ordering::Release);
        servicer.join().unwrap();
        res
    }

    fn make_device() -> Arc<GpuDevice> {
        let mut fake = FakeTransport::new(VirtioDeviceType::Gpu, 2);
        fake.queue_size = 64;
        Arc::new(GpuDevice::new(Box::new(fake)).unwrap())
    }

    #[test]
    fn display_info_round_trip() {
        let device = make_device();
        let rect = with_model(&device, || device.query_display_info().unwrap());
        assert_eq!((rect.width, rect.height), (64, 32));
    }

    #[test]
    fn framebuffer_setup_allocates_page_backing() {
        let device = make_device();
        with_model(&device, || device.setup_framebuffer().unwrap());
        assert_eq!(device.mode(), Some((64, 32)));
        // 64*32*4 = 8192 bytes = 2 pages.
        assert_eq!(device.framebuffer.lock().len(), 2);
        device.put_pixel(1, 0, 0x00ff_00ff).unwrap();
        let fb = device.framebuffer.lock();
        assert_eq!(fb[0].read_at::<u32>(4), 0x00ff_00ff);
    }

    #[test]
    fn flush_round_trip() {
        let device = make_device();
        with_model(&device, || {
            device.setup_framebuffer().unwrap();
            device
                .flush(GpuRect {
                    x: 0,
                    y: 0,
                    width: 64,
                    height: 32,
                })
                .unwrap();
        });
    }
}
