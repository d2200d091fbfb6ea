// SPDX-License-Identifier: MPL-2.0

//! The VirtIO device framework: split-virtqueue transport, PCI modern
//! transport, and the device adapters (block, network, GPU, input,
//! entropy).

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

pub mod device;
pub mod dma;
pub mod queue;
pub mod transport;

use alloc::boxed::Box;

use bitflags::bitflags;
use log::{error, info, warn};

use device::{
    block::BlockDevice, entropy::EntropyDevice, gpu::GpuDevice, input::InputDevice,
    network::NetworkDevice, VirtioDeviceError, VirtioDeviceType,
};
use transport::{DeviceStatus, VirtioTransport};

bitflags! {
    /// Device-independent feature bits. Bits 0..24 and 50..64 belong to
    /// the device type.
    pub struct Feature: u64 {
        const RING_INDIRECT_DESC    = 1 << 28;
        const RING_EVENT_IDX        = 1 << 29;
        const VERSION_1             = 1 << 32;
        const ACCESS_PLATFORM       = 1 << 33;
        const RING_PACKED           = 1 << 34;
        const IN_ORDER              = 1 << 35;
        const ORDER_PLATFORM        = 1 << 36;
        const SR_IOV                = 1 << 37;
        const NOTIFICATION_DATA     = 1 << 38;
    }
}

/// Drives one discovered device through the initialization sequence and
/// hands it to its adapter.
///
/// A failure is fatal for that device only; the transport is dropped and
/// the machine keeps the rest of its devices.
pub fn init_device(mut transport: Box<dyn VirtioTransport>) -> Result<(), VirtioDeviceError> {
    let device_type = transport.device_type();
    info!("found virtio device: {:?}", device_type);

    // Reset, then announce ourselves.
    transport.write_device_status(DeviceStatus::empty());
    if transport.read_device_status().contains(DeviceStatus::FAILED) {
        error!("virtio device reset failed");
        return Err(VirtioDeviceError::InitFailed);
    }
    transport.write_device_status(DeviceStatus::ACKNOWLEDGE | DeviceStatus::DRIVER);

    negotiate_features(transport.as_mut())?;

    let res = match device_type {
        VirtioDeviceType::Block => BlockDevice::init(transport),
        VirtioDeviceType::Network => NetworkDevice::init(transport),
        VirtioDeviceType::Gpu => GpuDevice::init(transport),
        VirtioDeviceType::Input => InputDevice::init(transport),
        VirtioDeviceType::Entropy => EntropyDevice::init(transport),
        other => {
            warn!("unimplemented virtio device type {:?}", other);
            Ok(())
        }
    };
    if let Err(e) = &res {
        error!("virtio device initialization failed: {:?}", e);
    }
    res
}

/// Feature negotiation: offer ∩ support, `VERSION_1` always on, then the
/// FEATURES_OK handshake.
pub fn negotiate_features(transport: &mut dyn VirtioTransport) -> Result<u64, VirtioDeviceError> {
    let offered = transport.read_device_features();
    let supported = match transport.device_type() {
        VirtioDeviceType::Block => device::block::negotiate_features(offered),
        VirtioDeviceType::Network => device::network::negotiate_features(offered),
        VirtioDeviceType::Gpu => device::gpu::negotiate_features(offered),
        VirtioDeviceType::Input => device::input::negotiate_features(offered),
        VirtioDeviceType::Entropy => offered,
        _ => offered,
    };
    let chosen = (offered & supported) | Feature::VERSION_1.bits();
    transport.write_driver_features(chosen);

    transport.write_device_status(
        DeviceStatus::ACKNOWLEDGE | DeviceStatus::DRIVER | DeviceStatus::FEATURES_OK,
    );
    if !transport
        .read_device_status()
        .contains(DeviceStatus::FEATURES_OK)
    {
        error!("virtio feature negotiation rejected by the device");
        return Err(VirtioDeviceError::FeaturesNotSupported);
    }
    Ok(chosen)
}
