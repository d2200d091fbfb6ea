// SPDX-License-Identifier: MPL-2.0

//! The VirtIO input device (keyboards, mice, tablets).
//!
//! Two queues: events and status. Event buffers are preposted 8-byte
//! `{type, code, value}` records; completions are demultiplexed into
//! keyboard and pointer events.

use alloc::{boxed::Box, collections::VecDeque, sync::Arc, vec::Vec};

use bytemuck_derive::{Pod, Zeroable};
use spin::Mutex;

use super::{VirtioDeviceError, VirtioDeviceType};
use crate::{
    dma::{DmaPage, PAGE_SIZE},
    queue::{VirtQueue, VirtqBuf},
    transport::VirtioTransport,
};

pub const QUEUE_EVENT: u16 = 0;
pub const QUEUE_STATUS: u16 = 1;

/// Preposted event records.
const EVENT_SLOTS: usize = 64;

// Linux evdev event types.
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;

// Relative axes.
pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;
pub const REL_WHEEL: u16 = 0x08;

// Mouse button key codes.
pub const BTN_LEFT: u16 = 0x110;
pub const BTN_RIGHT: u16 = 0x111;
pub const BTN_MIDDLE: u16 = 0x112;

pub fn negotiate_features(_offered: u64) -> u64 {
    0
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct VirtioInputEvent {
    pub type_: u16,
    pub code: u16,
    pub value: u32,
}

const EVENT_SIZE: usize = core::mem::size_of::<VirtioInputEvent>();

/// A decoded event handed to the input layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Key { code: u16, pressed: bool },
    Button { button: u16, pressed: bool },
    RelMotion { dx: i32, dy: i32 },
    Scroll { delta: i32 },
}

pub struct InputDevice {
    transport: Mutex<Box<dyn VirtioTransport>>,
    event_queue: Mutex<VirtQueue>,
    #[allow(dead_code)]
    status_queue: Mutex<VirtQueue>,
    event_page: DmaPage,
    /// Pressed mouse buttons, to collapse repeated press reports.
    mouse_state: Mutex<u32>,
    pending: Mutex<VecDeque<InputEvent>>,
}

static DEVICES: Mutex<Vec<Arc<InputDevice>>> = Mutex::new(Vec::new());

pub fn get_device(index: usize) -> Option<Arc<InputDevice>> {
    DEVICES.lock().get(index).cloned()
}

impl InputDevice {
    pub fn init(transport: Box<dyn VirtioTransport>) -> Result<(), VirtioDeviceError> {
        let device = Arc::new(Self::new(transport)?);
        let irq_device = device.clone();
        device
            .transport
            .lock()
            .register_queue_callback(QUEUE_EVENT, Box::new(move || irq_device.handle_irq()));
        device.transport.lock().finish_init();
        DEVICES.lock().push(device);
        Ok(())
    }

    fn new(mut transport: Box<dyn VirtioTransport>) -> Result<Self, VirtioDeviceError> {
        debug_assert_eq!(transport.device_type(), VirtioDeviceType::Input);
        if transport.num_queues() < 2 {
            return Err(VirtioDeviceError::QueuesAmountDoNotMatch);
        }
        let mut event_queue = VirtQueue::new(QUEUE_EVENT, transport.as_mut())
            .map_err(|_| VirtioDeviceError::InitFailed)?;
        let status_queue = VirtQueue::new(QUEUE_STATUS, transport.as_mut())
            .map_err(|_| VirtioDeviceError::InitFailed)?;

        let event_page = DmaPage::alloc();
        assert!(EVENT_SLOTS * EVENT_SIZE <= PAGE_SIZE);
        for slot in 0..EVENT_SLOTS {
            let buf = [VirtqBuf {
                addr: event_page.daddr() + (slot * EVENT_SIZE) as u64,
                size: EVENT_SIZE as u32,
            }];
            event_queue
                .send(&buf, 0, 1)
                .map_err(|_| VirtioDeviceError::InitFailed)?;
        }

        Ok(Self {
            transport: Mutex::new(transport),
            event_queue: Mutex::new(event_queue),
            status_queue: Mutex::new(status_queue),
            event_page,
            mouse_state: Mutex::new(0),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// IRQ path: demultiplex completed records and repost their slots.
    pub fn handle_irq(&self) {
        let isr = self.transport.lock().read_isr_status();
        if isr & 0x1 == 0 {
            return;
        }
        let mut queue = self.event_queue.lock();
        let mut completed = Vec::new();
        queue.drain_used(|id, _len| completed.push(id));
        for id in completed {
            let addr = queue.desc_addr(id);
            let offset = (addr - self.event_page.daddr()) as usize;
            if offset + EVENT_SIZE > crate::dma::PAGE_SIZE {
                continue;
            }
            let event: VirtioInputEvent = self.event_page.read_at(offset);
            if let Some(decoded) = self.demux(&event) {
                self.pending.lock().push_back(decoded);
            }
            let buf = [VirtqBuf {
                addr,
                size: EVENT_SIZE as u32,
            }];
            let _ = queue.send(&buf, 0, 1);
        }
    }

    fn demux(&self, event: &VirtioInputEvent) -> Option<InputEvent> {
        match event.type_ {
            EV_KEY => {
                let pressed = event.value != 0;
                if (BTN_LEFT..=BTN_MIDDLE + 5).contains(&event.code) {
                    // Collapse redundant press reports per button.
                    let bit = 1u32 << (event.code - BTN_LEFT);
                    let mut state = self.mouse_state.lock();
                    let was_pressed = *state & bit != 0;
                    if pressed == was_pressed {
                        return None;
                    }
                    if pressed {
                        *state |= bit;
                    } else {
                        *state &= !bit;
                    }
                    Some(InputEvent::Button {
                        button: event.code,
                        pressed,
                    })
                } else {
                    Some(InputEvent::Key {
                        code: event.code,
                        pressed,
                    })
                }
            }
            EV_REL => match event.code {
                REL_X => Some(InputEvent::RelMotion {
                    dx: event.value as i32,
                    dy: 0,
                }),
                REL_Y => Some(InputEvent::RelMotion {
                    dx: 0,
                    dy: event.value as i32,
                }),
                REL_WHEEL => Some(InputEvent::Scroll {
                    delta: event.value as i32,
                }),
                _ => None,
            },
            // SYN markers and unknown types carry no event of their own.
            _ => None,
        }
    }

    pub fn pop_event(&self) -> Option<InputEvent> {
        self.pending.lock().pop_front()
    }
}
