// SPDX-License-Identifier: MPL-2.0

//! The ACPI namespace: a tree of named, typed objects.

use alloc::{string::String, vec::Vec};
use core::fmt;

use log::debug;

use crate::AmlError;

/// A four-character name segment. Short names are padded with `_`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NameSeg(pub [u8; 4]);

impl NameSeg {
    pub const ROOT: NameSeg = NameSeg(*b"____");

    pub fn from_str(name: &str) -> Self {
        let mut seg = *b"____";
        for (i, b) in name.bytes().take(4).enumerate() {
            seg[i] = b;
        }
        NameSeg(seg)
    }

    pub fn is_valid(&self) -> bool {
        let lead_ok = self.0[0].is_ascii_uppercase() || self.0[0] == b'_';
        lead_ok
            && self.0[1..]
                .iter()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
    }
}

impl fmt::Display for NameSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NameSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A parsed name string: optional root/parent prefixes plus segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmlName {
    pub root: bool,
    pub parent_hops: usize,
    pub segs: Vec<NameSeg>,
}

impl AmlName {
    pub fn display(&self) -> String {
        use core::fmt::Write;
        let mut out = String::new();
        if self.root {
            out.push('\\');
        }
        for _ in 0..self.parent_hops {
            out.push('^');
        }
        for (i, seg) in self.segs.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            let _ = write!(out, "{}", seg);
        }
        out
    }

    /// Parses a dotted textual path like `\_SB_.PCI0.RES_`.
    pub fn parse_str(path: &str) -> Self {
        let mut root = false;
        let mut parent_hops = 0;
        let mut rest = path;
        if let Some(r) = rest.strip_prefix('\\') {
            root = true;
            rest = r;
        }
        while let Some(r) = rest.strip_prefix('^') {
            parent_hops += 1;
            rest = r;
        }
        let segs = rest
            .split('.')
            .filter(|s| !s.is_empty())
            .map(NameSeg::from_str)
            .collect();
        AmlName {
            root,
            parent_hops,
            segs,
        }
    }

    fn is_simple(&self) -> bool {
        !self.root && self.parent_hops == 0 && self.segs.len() <= 1
    }
}

/// A fully parsed data value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    Zero,
    One,
    Ones,
    Byte(u8),
    Word(u16),
    DWord(u32),
    QWord(u64),
    String(String),
    Buffer(Vec<u8>),
    Package(Vec<DataValue>),
}

impl DataValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::Zero => "Zero",
            DataValue::One => "One",
            DataValue::Ones => "Ones",
            DataValue::Byte(_) => "Byte",
            DataValue::Word(_) => "Word",
            DataValue::DWord(_) => "DWord",
            DataValue::QWord(_) => "QWord",
            DataValue::String(_) => "String",
            DataValue::Buffer(_) => "Buffer",
            DataValue::Package(_) => "Package",
        }
    }
}

/// The typed payload of a namespace node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcpiObject {
    Alias,
    Name { data: Option<DataValue> },
    Scope,
    Device,
    Processor {
        proc_id: u8,
        pblk_addr: u32,
        pblk_len: u8,
    },
    PowerResource {
        system_level: u8,
        resource_order: u16,
    },
    ThermalZone,
    Method {
        offset: usize,
        length: usize,
        flags: u8,
    },
    Mutex { sync_level: u8 },
    Event,
    OpRegion { space: u8 },
    Field,
    IndexField,
    FieldUnit { bit_len: u32 },
    BufferField,
}

impl AcpiObject {
    /// Whether objects of this type carry a namespace of their own. Only
    /// these may host a `Scope`.
    pub fn has_namespace(&self) -> bool {
        matches!(
            self,
            AcpiObject::Scope
                | AcpiObject::Device
                | AcpiObject::Processor { .. }
                | AcpiObject::PowerResource { .. }
                | AcpiObject::ThermalZone
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AcpiObject::Alias => "Alias",
            AcpiObject::Name { .. } => "Name",
            AcpiObject::Scope => "Scope",
            AcpiObject::Device => "Device",
            AcpiObject::Processor { .. } => "Processor",
            AcpiObject::PowerResource { .. } => "PowerResource",
            AcpiObject::ThermalZone => "ThermalZone",
            AcpiObject::Method { .. } => "Method",
            AcpiObject::Mutex { .. } => "Mutex",
            AcpiObject::Event => "Event",
            AcpiObject::OpRegion { .. } => "OperationRegion",
            AcpiObject::Field => "Field",
            AcpiObject::IndexField => "IndexField",
            AcpiObject::FieldUnit { .. } => "FieldUnit",
            AcpiObject::BufferField => "BufferField",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub usize);

pub(crate) struct Node {
    pub name: NameSeg,
    pub parent: Option<NodeId>,
    pub object: AcpiObject,
    /// Set for objects fabricated from `External` declarations or from
    /// path segments that were never defined in this table.
    pub external: bool,
    pub children: Vec<NodeId>,
}

/// The namespace tree. Nodes live in an arena; children keep insertion
/// order.
pub struct Namespace {
    nodes: Vec<Node>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    pub fn new() -> Self {
        let root = Node {
            name: NameSeg::ROOT,
            parent: None,
            object: AcpiObject::Scope,
            external: false,
            children: Vec::new(),
        };
        Self { nodes: alloc::vec![root] }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn object(&self, id: NodeId) -> &AcpiObject {
        &self.nodes[id.0].object
    }

    pub fn name_of(&self, id: NodeId) -> NameSeg {
        self.nodes[id.0].name
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn is_external(&self, id: NodeId) -> bool {
        self.nodes[id.0].external
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn get_child(&self, id: NodeId, name: NameSeg) -> Option<NodeId> {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].name == name)
    }

    fn insert(&mut self, parent: NodeId, name: NameSeg, object: AcpiObject, external: bool) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name,
            parent: Some(parent),
            object,
            external,
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    fn ascend(&self, mut id: NodeId, hops: usize) -> NodeId {
        for _ in 0..hops {
            match self.nodes[id.0].parent {
                Some(parent) => id = parent,
                // Saturates at the root.
                None => return self.root(),
            }
        }
        id
    }

    /// Resolves the namespace a path's final segment lives in.
    ///
    /// With `create`, missing intermediate segments become external Scope
    /// placeholders, later promotable to a real device-like type.
    pub(crate) fn get_ns(
        &mut self,
        cur: NodeId,
        path: &AmlName,
        create: bool,
    ) -> Result<NodeId, AmlError> {
        let mut ns = if path.root { self.root() } else { cur };
        ns = self.ascend(ns, path.parent_hops);
        if path.segs.is_empty() {
            return Ok(ns);
        }
        for seg in &path.segs[..path.segs.len() - 1] {
            let next = match self.get_child(ns, *seg) {
                Some(id) => id,
                None => {
                    if !create {
                        return Err(AmlError::InvalidName);
                    }
                    self.insert(ns, *seg, AcpiObject::Scope, true)
                }
            };
            if !self.nodes[next.0].object.has_namespace() {
                return Err(AmlError::NotNamespaceCapable);
            }
            ns = next;
        }
        Ok(ns)
    }

    /// Looks a path up for reading. Single-segment relative names search
    /// upward through the enclosing scopes.
    pub fn get_obj(&self, cur: NodeId, path: &AmlName) -> Option<NodeId> {
        let simple = path.is_simple();
        let mut ns = if path.root { self.root() } else { cur };
        ns = self.ascend(ns, path.parent_hops);
        if path.segs.is_empty() {
            return Some(ns);
        }
        let mut iter = path.segs.iter();
        let first = *iter.next().unwrap();
        let mut obj = match self.get_child(ns, first) {
            Some(id) => id,
            None if simple => {
                let mut scope = self.nodes[ns.0].parent;
                loop {
                    let id = scope?;
                    if let Some(found) = self.get_child(id, first) {
                        return Some(found);
                    }
                    scope = self.nodes[id.0].parent;
                }
            }
            None => return None,
        };
        for seg in iter {
            if !self.nodes[obj.0].object.has_namespace() {
                return None;
            }
            obj = self.get_child(obj, *seg)?;
        }
        Some(obj)
    }

    /// Resolves a textual path like `\_SB_.PCI0`.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.get_obj(self.root(), &AmlName::parse_str(path))
    }

    /// Registers an object at `path`, applying the duplicate and
    /// external-promotion rules.
    pub(crate) fn register_obj(
        &mut self,
        cur: NodeId,
        object: AcpiObject,
        path: &AmlName,
        external: bool,
    ) -> Result<NodeId, AmlError> {
        let ns = self.get_ns(cur, path, true)?;
        let name = *path.segs.last().ok_or(AmlError::InvalidName)?;
        if let Some(existing) = self.get_child(ns, name) {
            let node = &self.nodes[existing.0];
            if node.object.type_name() == object.type_name() {
                if !external && !node.external {
                    debug!(
                        "duplicate object definition of {} {}",
                        object.type_name(),
                        name
                    );
                }
                return Ok(existing);
            }
            // An external Scope placeholder may become any of the
            // device-like containers, in place.
            if node.external && matches!(node.object, AcpiObject::Scope) {
                if matches!(
                    object,
                    AcpiObject::Device
                        | AcpiObject::PowerResource { .. }
                        | AcpiObject::Processor { .. }
                        | AcpiObject::ThermalZone
                ) {
                    let node = self.node_mut(existing);
                    node.object = object;
                    node.external = external;
                    return Ok(existing);
                }
            }
            debug!(
                "object already exists: {} (want {}, existing {})",
                name,
                object.type_name(),
                self.nodes[existing.0].object.type_name()
            );
            return Err(AmlError::DuplicateDefinition);
        }
        Ok(self.insert(ns, name, object, external))
    }

    /// Renders the namespace in an indented brace format.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root(), 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        use core::fmt::Write;
        let node = &self.nodes[id.0];
        for _ in 0..depth {
            out.push('\t');
        }
        let _ = write!(out, "{}: {}", node.name, node.object.type_name());
        if let AcpiObject::Name { data } = &node.object {
            let _ = write!(
                out,
                " {}",
                data.as_ref().map(|d| d.type_name()).unwrap_or("Empty")
            );
        }
        if node.external {
            let _ = write!(out, " (external)");
        }
        out.push('\n');
        if !node.children.is_empty() {
            for _ in 0..depth {
                out.push('\t');
            }
            out.push_str("{\n");
            for child in &node.children {
                self.dump_node(*child, depth + 1, out);
            }
            for _ in 0..depth {
                out.push('\t');
            }
            out.push_str("}\n");
        }
    }
}
