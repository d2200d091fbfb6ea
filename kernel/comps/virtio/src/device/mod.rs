// SPDX-License-Identifier: MPL-2.0

pub mod block;
pub mod entropy;
pub mod gpu;
pub mod input;
pub mod network;

/// Device types by their VirtIO device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VirtioDeviceType {
    Network = 1,
    Block = 2,
    Console = 3,
    Entropy = 4,
    Balloon = 5,
    ScsiHost = 8,
    Gpu = 16,
    Input = 18,
    Socket = 19,
    Crypto = 20,
}

impl TryFrom<u8> for VirtioDeviceType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        Ok(match value {
            1 => Self::Network,
            2 => Self::Block,
            3 => Self::Console,
            4 => Self::Entropy,
            5 => Self::Balloon,
            8 => Self::ScsiHost,
            16 => Self::Gpu,
            18 => Self::Input,
            19 => Self::Socket,
            20 => Self::Crypto,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtioDeviceError {
    /// The initialization handshake failed.
    InitFailed,
    /// The device rejected our feature selection.
    FeaturesNotSupported,
    /// A mandatory PCI capability was absent.
    CapabilityMissing,
    /// The device reported fewer queues than the driver needs.
    QueuesAmountDoNotMatch,
    /// No such device behind the transport.
    NoDevice,
    /// A request ring has no room.
    DeviceBusy,
    /// The device reported an I/O failure.
    IoError,
}
