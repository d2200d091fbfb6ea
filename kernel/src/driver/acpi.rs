// SPDX-License-Identifier: MPL-2.0

//! Boot-time device discovery from the ACPI namespace.
//!
//! The firmware's definition blocks are interpreted once at boot; devices
//! found in the resulting namespace (with their `_HID` identifiers) seed
//! bus probing, which in turn instantiates the VirtIO drivers on matching
//! PCI ids.

use vesper_aml::{AcpiObject, DataValue, Interpreter, NodeId};

use crate::prelude::*;

/// One device found in the namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Dotted path from the root, e.g. `_SB_.PCI0`.
    pub path: String,
    /// The `_HID` value, when one is declared.
    pub hid: Option<HardwareId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareId {
    /// An EISA-style numeric id.
    Numeric(u64),
    /// A string id such as `"PNP0A08"`.
    Name(String),
}

/// Interprets a definition block and lists the devices it declares.
pub fn scan_definition_block(interp: &mut Interpreter, aml: &[u8]) -> Result<Vec<DiscoveredDevice>> {
    interp
        .parse(aml)
        .map_err(|e| {
            warn!("ACPI table rejected: {}", e);
            Error::with_message(Errno::EINVAL, "malformed ACPI definition block")
        })?;

    let ns = interp.namespace();
    let mut devices = Vec::new();
    collect_devices(ns, ns.root(), &mut String::new(), &mut devices);
    for device in &devices {
        debug!("acpi device: {} ({:?})", device.path, device.hid);
    }
    Ok(devices)
}

fn collect_devices(
    ns: &vesper_aml::Namespace,
    node: NodeId,
    prefix: &mut String,
    out: &mut Vec<DiscoveredDevice>,
) {
    for child in ns.children(node) {
        let name = ns.name_of(*child);
        let path = if prefix.is_empty() {
            alloc::format!("{}", name)
        } else {
            alloc::format!("{}.{}", prefix, name)
        };
        if matches!(ns.object(*child), AcpiObject::Device) {
            out.push(DiscoveredDevice {
                path: path.clone(),
                hid: device_hid(ns, *child),
            });
        }
        if ns.object(*child).has_namespace() {
            let mut sub_prefix = path;
            collect_devices(ns, *child, &mut sub_prefix, out);
        }
    }
}

fn device_hid(ns: &vesper_aml::Namespace, device: NodeId) -> Option<HardwareId> {
    let hid_node = ns.children(device).iter().copied().find(|c| {
        ns.name_of(*c).0 == *b"_HID"
    })?;
    let AcpiObject::Name { data: Some(data) } = ns.object(hid_node) else {
        return None;
    };
    match data {
        DataValue::Byte(v) => Some(HardwareId::Numeric(*v as u64)),
        DataValue::Word(v) => Some(HardwareId::Numeric(*v as u64)),
        DataValue::DWord(v) => Some(HardwareId::Numeric(*v as u64)),
        DataValue::QWord(v) => Some(HardwareId::Numeric(*v)),
        DataValue::String(s) => Some(HardwareId::Name(s.clone())),
        _ => None,
    }
}
