// SPDX-License-Identifier: MPL-2.0

//! The three-mode AML walker.
//!
//! One recursive-descent grammar serves the load-time parse (namespace
//! construction), the ASL-like listing, and method execution. Opcode
//! dispatch is table-driven: one 256-entry table per grammar category,
//! with secondary tables for the `0x5B` extension prefix.

use alloc::{string::String, vec::Vec};
use core::fmt::Write;

use bitflags::bitflags;
use log::warn;

use crate::{
    cursor::Cursor,
    namespace::{AcpiObject, AmlName, DataValue, NameSeg, Namespace, NodeId},
    AmlError,
};

bitflags! {
    struct Mode: u32 {
        const PARSE = 1 << 0;
        const PRINT = 1 << 1;
        const EXEC  = 1 << 3;
    }
}

/// The AML interpreter: owns the namespace built from parsed tables.
pub struct Interpreter {
    ns: Namespace,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            ns: Namespace::new(),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Load-time pass: builds the namespace, registers methods.
    ///
    /// On error the namespace built so far is retained.
    pub fn parse(&mut self, bytecode: &[u8]) -> Result<(), AmlError> {
        let root = self.ns.root();
        let mut ctx = Ctx {
            it: Cursor::new(bytecode),
            ns: &mut self.ns,
            cur_ns: root,
            mode: Mode::PARSE,
            out: String::new(),
            indent: 0,
            display_inline: false,
        };
        let size = ctx.it.remaining();
        parse_termlist(&mut ctx, size)
    }

    /// Renders an ASL-like listing without touching the namespace.
    pub fn print_asl(&mut self, bytecode: &[u8]) -> Result<String, AmlError> {
        let root = self.ns.root();
        let mut ctx = Ctx {
            it: Cursor::new(bytecode),
            ns: &mut self.ns,
            cur_ns: root,
            mode: Mode::PRINT,
            out: String::new(),
            indent: 0,
            display_inline: false,
        };
        let size = ctx.it.remaining();
        parse_termlist(&mut ctx, size)?;
        let mut out = core::mem::take(&mut ctx.out);
        if !out.is_empty() {
            out.push('\n');
        }
        Ok(out)
    }

    /// Runs a method registered by a previous [`Interpreter::parse`] of
    /// the same `bytecode`.
    pub fn exec(&mut self, bytecode: &[u8], method: NodeId) -> Result<(), AmlError> {
        let AcpiObject::Method { offset, length, .. } = *self.ns.object(method) else {
            return Err(AmlError::InvalidArgument);
        };
        let cur_ns = self.ns.parent_of(method).unwrap_or(self.ns.root());
        let mut ctx = Ctx {
            it: Cursor::window(bytecode, offset, length)?,
            ns: &mut self.ns,
            cur_ns,
            mode: Mode::EXEC,
            out: String::new(),
            indent: 0,
            display_inline: false,
        };
        parse_termlist(&mut ctx, length)
    }

    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.ns.lookup(path)
    }

    pub fn dump(&self) -> String {
        self.ns.dump()
    }
}

struct Ctx<'ns, 'bc> {
    it: Cursor<'bc>,
    ns: &'ns mut Namespace,
    cur_ns: NodeId,
    mode: Mode,
    out: String,
    indent: usize,
    display_inline: bool,
}

impl Ctx<'_, '_> {
    fn printing(&self) -> bool {
        self.mode.contains(Mode::PRINT)
    }

    fn parsing(&self) -> bool {
        self.mode.contains(Mode::PARSE)
    }

    fn op_begin(&mut self, name: &str) -> bool {
        let prev = self.display_inline;
        if self.printing() {
            if !prev {
                self.out.push('\n');
                for _ in 0..self.indent {
                    self.out.push('\t');
                }
            }
            self.out.push_str(name);
            self.out.push_str(" (");
            self.display_inline = true;
        }
        prev
    }

    fn op_sep(&mut self) {
        if self.printing() {
            self.out.push_str(", ");
        }
    }

    fn op_end(&mut self, prev: bool) {
        if self.printing() {
            self.out.push(')');
            self.display_inline = prev;
        }
    }

    fn print_path(&mut self, name: &AmlName) {
        if self.printing() {
            let text = name.display();
            self.out.push_str(&text);
        }
    }

    fn print_number(&mut self, val: u64) {
        if self.printing() {
            let _ = write!(self.out, "{:#x}", val);
        }
    }

    fn print_text(&mut self, text: &str) {
        if self.printing() {
            self.out.push_str(text);
        }
    }
}

type Handler = fn(&mut Ctx<'_, '_>) -> Result<(), AmlError>;

// ************ Package length, name strings ************

fn parse_pkglength(ctx: &mut Ctx) -> Result<usize, AmlError> {
    let lead = ctx.it.get_u8()?;
    let length = match lead & 0xC0 {
        0x00 => lead as usize,
        0x40 => {
            let b1 = ctx.it.get_u8()?;
            (lead & 0x0F) as usize | (b1 as usize) << 4
        }
        0x80 => {
            let b1 = ctx.it.get_u8()?;
            let b2 = ctx.it.get_u8()?;
            (lead & 0x0F) as usize | (b1 as usize) << 4 | (b2 as usize) << 12
        }
        _ => {
            let b1 = ctx.it.get_u8()?;
            let b2 = ctx.it.get_u8()?;
            let b3 = ctx.it.get_u8()?;
            (lead & 0x0F) as usize
                | (b1 as usize) << 4
                | (b2 as usize) << 12
                | (b3 as usize) << 20
        }
    };
    Ok(length)
}

/// Reads a package length and checks it against the bytes that remain.
/// The returned size is the body length after the length encoding itself.
fn parse_sized_pkg(ctx: &mut Ctx) -> Result<usize, AmlError> {
    let org_size = ctx.it.remaining();
    let length = parse_pkglength(ctx)?;
    if length > org_size {
        return Err(AmlError::LengthOverflow);
    }
    length
        .checked_sub(org_size - ctx.it.remaining())
        .ok_or(AmlError::LengthOverflow)
}

/// Like [`parse_sized_pkg`] but clamped to the enclosing construct.
///
/// Data packages from real tables occasionally overclaim; their element
/// lists are read to the end of the region either way, so the advisory
/// length is capped instead of rejected.
fn parse_sized_pkg_clamped(ctx: &mut Ctx) -> Result<usize, AmlError> {
    let org_size = ctx.it.remaining();
    let length = parse_pkglength(ctx)?.min(org_size);
    Ok(length.saturating_sub(org_size - ctx.it.remaining()))
}

/// The body bytes left after a construct's fixed fields; a construct
/// whose fields spill past its own package length is malformed.
fn body_after(body: usize, consumed: usize) -> Result<usize, AmlError> {
    body.checked_sub(consumed).ok_or(AmlError::LengthOverflow)
}

fn parse_nameseg(ctx: &mut Ctx) -> Result<NameSeg, AmlError> {
    let mut chars = [0u8; 4];
    ctx.it.get_bytes(&mut chars)?;
    let seg = NameSeg(chars);
    if !seg.is_valid() {
        return Err(AmlError::InvalidName);
    }
    Ok(seg)
}

fn parse_namestring(ctx: &mut Ctx) -> Result<AmlName, AmlError> {
    let mut root = false;
    let mut parent_hops = 0;
    let mut c = ctx.it.get_u8()?;
    if c == b'\\' {
        root = true;
        c = ctx.it.get_u8()?;
    } else if c == b'^' {
        while c == b'^' {
            parent_hops += 1;
            c = ctx.it.get_u8()?;
        }
    }
    if c == 0 {
        // A lone NullName addresses the enclosing scope itself.
        return Ok(AmlName {
            root,
            parent_hops,
            segs: Vec::new(),
        });
    }
    let count = match c {
        0x2E => 2,
        0x2F => ctx.it.get_u8()? as usize,
        _ => {
            ctx.it.unget_u8()?;
            1
        }
    };
    let mut segs = Vec::with_capacity(count);
    for _ in 0..count {
        segs.push(parse_nameseg(ctx)?);
    }
    Ok(AmlName {
        root,
        parent_hops,
        segs,
    })
}

// ************ Computational data ************

fn parse_computational(ctx: &mut Ctx, opcode: u8) -> Result<Option<DataValue>, AmlError> {
    let data = match opcode {
        0x00 => {
            ctx.print_text("Zero");
            DataValue::Zero
        }
        0x01 => {
            ctx.print_text("One");
            DataValue::One
        }
        0xFF => {
            ctx.print_text("Ones");
            DataValue::Ones
        }
        0x0A => {
            let v = ctx.it.get_u8()?;
            ctx.print_number(v as u64);
            DataValue::Byte(v)
        }
        0x0B => {
            let v = ctx.it.get_u16()?;
            ctx.print_number(v as u64);
            DataValue::Word(v)
        }
        0x0C => {
            let v = ctx.it.get_u32()?;
            ctx.print_number(v as u64);
            DataValue::DWord(v)
        }
        0x0E => {
            let v = ctx.it.get_u64()?;
            ctx.print_number(v);
            DataValue::QWord(v)
        }
        0x0D => {
            let mut bytes = Vec::new();
            loop {
                let b = ctx.it.get_u8()?;
                if b == 0 {
                    break;
                }
                bytes.push(b);
            }
            let s = String::from_utf8_lossy(&bytes).into_owned();
            if ctx.printing() {
                let _ = write!(ctx.out, "\"{}\"", s);
            }
            DataValue::String(s)
        }
        _ => return Ok(None),
    };
    Ok(Some(data))
}

// ************ Buffer / Package ************

fn parse_buffer(ctx: &mut Ctx) -> Result<DataValue, AmlError> {
    let body = parse_sized_pkg_clamped(ctx)?;
    let saved = ctx.it.limit(body);
    let prev = ctx.op_begin("Buffer");
    parse_termarg(ctx)?; // BufferSize
    let raw = ctx.it.get_slice(ctx.it.remaining())?;
    if ctx.printing() {
        let _ = write!(ctx.out, ") {{ /* {} bytes */ }}", raw.len());
        // op_end would close the paren again.
        ctx.display_inline = prev;
        ctx.it.set_remaining(saved);
        return Ok(DataValue::Buffer(raw.to_vec()));
    }
    ctx.op_end(prev);
    ctx.it.set_remaining(saved);
    Ok(DataValue::Buffer(raw.to_vec()))
}

fn parse_package_element(ctx: &mut Ctx) -> Result<Option<DataValue>, AmlError> {
    let opcode = ctx.it.peek_u8()?;
    if opcode == b'\\' || opcode == b'^' || opcode == b'_' || opcode.is_ascii_uppercase() {
        ctx.it.skip(1)?;
        parse_simplename(ctx)?;
        // A named reference contributes no parsed data.
        return Ok(None);
    }
    parse_datarefobject(ctx)
}

fn parse_package_body(ctx: &mut Ctx, body: usize) -> Result<Vec<DataValue>, AmlError> {
    let saved = ctx.it.limit(body);
    if ctx.printing() {
        ctx.indent += 1;
    }
    let mut elements = Vec::new();
    while ctx.it.remaining() > 0 {
        if let Some(element) = parse_package_element(ctx)? {
            elements.push(element);
        }
        if ctx.printing() && ctx.it.remaining() > 0 {
            ctx.op_sep();
        }
    }
    if ctx.printing() {
        ctx.indent -= 1;
    }
    ctx.it.set_remaining(saved);
    Ok(elements)
}

fn parse_package(ctx: &mut Ctx) -> Result<DataValue, AmlError> {
    let body = parse_sized_pkg_clamped(ctx)?;
    let prev = ctx.op_begin("Package");
    let saved_for_count = ctx.it.remaining();
    let num_elements = ctx.it.get_u8()?;
    ctx.print_number(num_elements as u64);
    ctx.op_sep();
    let consumed = saved_for_count - ctx.it.remaining();
    let elements = parse_package_body(ctx, body_after(body, consumed)?)?;
    ctx.op_end(prev);
    Ok(DataValue::Package(elements))
}

fn parse_var_package(ctx: &mut Ctx) -> Result<DataValue, AmlError> {
    let body = parse_sized_pkg_clamped(ctx)?;
    let prev = ctx.op_begin("VarPackage");
    let saved_for_count = ctx.it.remaining();
    parse_termarg(ctx)?; // VarNumElements
    ctx.op_sep();
    let consumed = saved_for_count - ctx.it.remaining();
    let elements = parse_package_body(ctx, body_after(body, consumed)?)?;
    ctx.op_end(prev);
    Ok(DataValue::Package(elements))
}

fn parse_datarefobject(ctx: &mut Ctx) -> Result<Option<DataValue>, AmlError> {
    let opcode = ctx.it.get_u8()?;
    if let Some(data) = parse_computational(ctx, opcode)? {
        return Ok(Some(data));
    }
    match opcode {
        0x11 => Ok(Some(parse_buffer(ctx)?)),
        0x12 => Ok(Some(parse_package(ctx)?)),
        0x13 => Ok(Some(parse_var_package(ctx)?)),
        _ => Err(AmlError::InvalidOpcode {
            opcode,
            extended: false,
            offset: ctx.it.offset(),
        }),
    }
}

// ************ SuperName / Target ************

fn parse_simplename(ctx: &mut Ctx) -> Result<(), AmlError> {
    ctx.it.unget_u8()?;
    let name = parse_namestring(ctx)?;
    ctx.print_path(&name);
    Ok(())
}

fn parse_local(ctx: &mut Ctx, opcode: u8) -> Result<(), AmlError> {
    if ctx.printing() {
        let _ = write!(ctx.out, "Local{}", opcode - 0x60);
    }
    Ok(())
}

fn parse_arg(ctx: &mut Ctx, opcode: u8) -> Result<(), AmlError> {
    if ctx.printing() {
        let _ = write!(ctx.out, "Arg{}", opcode - 0x68);
    }
    Ok(())
}

fn parse_supername(ctx: &mut Ctx) -> Result<(), AmlError> {
    let opcode = ctx.it.get_u8()?;
    match opcode {
        0x60..=0x67 => parse_local(ctx, opcode),
        0x68..=0x6E => parse_arg(ctx, opcode),
        0x83 => parse_deref_of(ctx),
        0x88 => parse_index(ctx),
        0x5B => {
            let ext = ctx.it.get_u8()?;
            if ext == 0x31 {
                ctx.print_text("DebugObj");
                Ok(())
            } else {
                Err(AmlError::InvalidOpcode {
                    opcode: ext,
                    extended: true,
                    offset: ctx.it.offset(),
                })
            }
        }
        b'\\' | b'^' | b'_' | b'A'..=b'Z' => parse_method_invocation(ctx),
        _ => Err(AmlError::InvalidOpcode {
            opcode,
            extended: false,
            offset: ctx.it.offset(),
        }),
    }
}

fn parse_target(ctx: &mut Ctx) -> Result<(), AmlError> {
    let opcode = ctx.it.get_u8()?;
    if opcode == 0x00 {
        // NullName: result discarded.
        ctx.print_text("Zero");
        return Ok(());
    }
    ctx.it.unget_u8()?;
    parse_supername(ctx)
}

// ************ Method invocation ************

fn parse_method_invocation(ctx: &mut Ctx) -> Result<(), AmlError> {
    ctx.it.unget_u8()?;
    let name = parse_namestring(ctx)?;
    if ctx.printing() && !ctx.display_inline {
        ctx.out.push('\n');
        for _ in 0..ctx.indent {
            ctx.out.push('\t');
        }
    }
    ctx.print_path(&name);
    let obj = ctx.ns.get_obj(ctx.cur_ns, &name);
    if let Some(obj) = obj {
        if let AcpiObject::Method { flags, .. } = *ctx.ns.object(obj) {
            let prev = ctx.display_inline;
            ctx.print_text("(");
            if ctx.printing() {
                ctx.display_inline = true;
            }
            for i in 0..(flags & 0x7) {
                if i > 0 {
                    ctx.op_sep();
                }
                parse_termarg(ctx)?;
            }
            ctx.print_text(")");
            if ctx.printing() {
                ctx.display_inline = prev;
            }
        }
    }
    Ok(())
}

// ************ Namespace modifier objects ************

fn parse_alias(ctx: &mut Ctx) -> Result<(), AmlError> {
    let name = parse_namestring(ctx)?;
    let alias = parse_namestring(ctx)?;
    let prev = ctx.op_begin("Alias");
    ctx.print_path(&name);
    ctx.op_sep();
    ctx.print_path(&alias);
    ctx.op_end(prev);
    if ctx.parsing() {
        ctx.ns
            .register_obj(ctx.cur_ns, AcpiObject::Alias, &alias, false)?;
    }
    Ok(())
}

fn parse_name(ctx: &mut Ctx) -> Result<(), AmlError> {
    let name = parse_namestring(ctx)?;
    let prev = ctx.op_begin("Name");
    ctx.print_path(&name);
    ctx.op_sep();
    let data = parse_datarefobject(ctx)?;
    ctx.op_end(prev);
    if ctx.parsing() {
        ctx.ns
            .register_obj(ctx.cur_ns, AcpiObject::Name { data }, &name, false)?;
    }
    Ok(())
}

fn parse_scope(ctx: &mut Ctx) -> Result<(), AmlError> {
    let body = parse_sized_pkg(ctx)?;
    let after_pkg = ctx.it.remaining();
    let name = parse_namestring(ctx)?;
    let prev = ctx.op_begin("Scope");
    ctx.print_path(&name);
    ctx.op_end(prev);

    let prev_ns = ctx.cur_ns;
    match ctx.ns.get_obj(ctx.cur_ns, &name) {
        Some(obj) => {
            if !ctx.ns.object(obj).has_namespace() {
                return Err(AmlError::NotNamespaceCapable);
            }
            ctx.cur_ns = obj;
        }
        None => {
            if ctx.parsing() {
                let obj = ctx
                    .ns
                    .register_obj(ctx.cur_ns, AcpiObject::Scope, &name, false)?;
                ctx.cur_ns = obj;
            }
        }
    }
    let consumed = after_pkg - ctx.it.remaining();
    let res = parse_termlist(ctx, body_after(body, consumed)?);
    ctx.cur_ns = prev_ns;
    res
}

// ************ Named objects ************

fn parse_container(
    ctx: &mut Ctx,
    op_name: &str,
    make_obj: fn(&mut Ctx) -> Result<AcpiObject, AmlError>,
) -> Result<(), AmlError> {
    let body = parse_sized_pkg(ctx)?;
    let after_pkg = ctx.it.remaining();
    let name = parse_namestring(ctx)?;
    let prev = ctx.op_begin(op_name);
    ctx.print_path(&name);
    let object = make_obj(ctx)?;
    ctx.op_end(prev);

    let prev_ns = ctx.cur_ns;
    if ctx.parsing() {
        let obj = ctx.ns.register_obj(ctx.cur_ns, object, &name, false)?;
        ctx.cur_ns = obj;
    } else if let Some(obj) = ctx.ns.get_obj(ctx.cur_ns, &name) {
        if ctx.ns.object(obj).has_namespace() {
            ctx.cur_ns = obj;
        }
    }
    let consumed = after_pkg - ctx.it.remaining();
    let res = parse_termlist(ctx, body_after(body, consumed)?);
    ctx.cur_ns = prev_ns;
    res
}

fn parse_device(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_container(ctx, "Device", |_| Ok(AcpiObject::Device))
}

fn parse_processor(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_container(ctx, "Processor", |ctx| {
        let proc_id = ctx.it.get_u8()?;
        let pblk_addr = ctx.it.get_u32()?;
        let pblk_len = ctx.it.get_u8()?;
        ctx.op_sep();
        ctx.print_number(proc_id as u64);
        ctx.op_sep();
        ctx.print_number(pblk_addr as u64);
        ctx.op_sep();
        ctx.print_number(pblk_len as u64);
        Ok(AcpiObject::Processor {
            proc_id,
            pblk_addr,
            pblk_len,
        })
    })
}

fn parse_power_res(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_container(ctx, "PowerResource", |ctx| {
        let system_level = ctx.it.get_u8()?;
        let resource_order = ctx.it.get_u16()?;
        ctx.op_sep();
        ctx.print_number(system_level as u64);
        ctx.op_sep();
        ctx.print_number(resource_order as u64);
        Ok(AcpiObject::PowerResource {
            system_level,
            resource_order,
        })
    })
}

fn parse_thermal_zone(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_container(ctx, "ThermalZone", |_| Ok(AcpiObject::ThermalZone))
}

fn parse_method(ctx: &mut Ctx) -> Result<(), AmlError> {
    let body = parse_sized_pkg(ctx)?;
    let after_pkg = ctx.it.remaining();
    let name = parse_namestring(ctx)?;
    let flags = ctx.it.get_u8()?;
    let prev = ctx.op_begin("Method");
    ctx.print_path(&name);
    ctx.op_sep();
    ctx.print_number(flags as u64);
    ctx.op_end(prev);

    let consumed = after_pkg - ctx.it.remaining();
    let length = body_after(body, consumed)?;
    if ctx.parsing() {
        ctx.ns.register_obj(
            ctx.cur_ns,
            AcpiObject::Method {
                offset: ctx.it.offset(),
                length,
                flags,
            },
            &name,
            false,
        )?;
    }
    if ctx.printing() {
        // Bodies are rendered in place but with their own cursor window so
        // the outer walk is unaffected.
        let saved = ctx.it.limit(length);
        ctx.indent += 1;
        let res = parse_termlist(ctx, length);
        ctx.indent -= 1;
        ctx.it.set_remaining(saved);
        res?;
        return Ok(());
    }
    ctx.it.skip(length)?;
    Ok(())
}

fn parse_external(ctx: &mut Ctx) -> Result<(), AmlError> {
    let name = parse_namestring(ctx)?;
    let object_type = ctx.it.get_u8()?;
    let argument_count = ctx.it.get_u8()?;
    let prev = ctx.op_begin("External");
    ctx.print_path(&name);
    ctx.op_sep();
    ctx.print_number(object_type as u64);
    ctx.op_sep();
    ctx.print_number(argument_count as u64);
    ctx.op_end(prev);
    if ctx.parsing() {
        match object_type {
            6 => {
                ctx.ns
                    .register_obj(ctx.cur_ns, AcpiObject::Device, &name, true)?;
            }
            8 => {
                ctx.ns.register_obj(
                    ctx.cur_ns,
                    AcpiObject::Method {
                        offset: 0,
                        length: 0,
                        flags: argument_count,
                    },
                    &name,
                    true,
                )?;
            }
            other => {
                warn!("unhandled external object type {}", other);
            }
        }
    }
    Ok(())
}

fn parse_op_region(ctx: &mut Ctx) -> Result<(), AmlError> {
    let name = parse_namestring(ctx)?;
    let space = ctx.it.get_u8()?;
    let prev = ctx.op_begin("OperationRegion");
    ctx.print_path(&name);
    ctx.op_sep();
    ctx.print_number(space as u64);
    ctx.op_sep();
    parse_termarg(ctx)?; // RegionOffset
    ctx.op_sep();
    parse_termarg(ctx)?; // RegionLen
    ctx.op_end(prev);
    if ctx.parsing() {
        ctx.ns
            .register_obj(ctx.cur_ns, AcpiObject::OpRegion { space }, &name, false)?;
    }
    Ok(())
}

fn parse_mutex(ctx: &mut Ctx) -> Result<(), AmlError> {
    let name = parse_namestring(ctx)?;
    let sync_level = ctx.it.get_u8()? & 0x0F;
    let prev = ctx.op_begin("Mutex");
    ctx.print_path(&name);
    ctx.op_sep();
    ctx.print_number(sync_level as u64);
    ctx.op_end(prev);
    if ctx.parsing() {
        ctx.ns
            .register_obj(ctx.cur_ns, AcpiObject::Mutex { sync_level }, &name, false)?;
    }
    Ok(())
}

fn parse_event(ctx: &mut Ctx) -> Result<(), AmlError> {
    let name = parse_namestring(ctx)?;
    let prev = ctx.op_begin("Event");
    ctx.print_path(&name);
    ctx.op_end(prev);
    if ctx.parsing() {
        ctx.ns
            .register_obj(ctx.cur_ns, AcpiObject::Event, &name, false)?;
    }
    Ok(())
}

// ************ Field lists ************

fn parse_field_list(ctx: &mut Ctx, body: usize) -> Result<(), AmlError> {
    let saved = ctx.it.limit(body);
    if ctx.printing() {
        ctx.indent += 1;
    }
    while ctx.it.remaining() > 0 {
        let opcode = ctx.it.get_u8()?;
        match opcode {
            0x00 => {
                // ReservedField
                let bits = parse_pkglength(ctx)?;
                let prev = ctx.op_begin("ReservedField");
                ctx.print_number(bits as u64);
                ctx.op_end(prev);
            }
            0x01 => {
                // AccessField
                let access_type = ctx.it.get_u8()?;
                let access_attrib = ctx.it.get_u8()?;
                let prev = ctx.op_begin("AccessField");
                ctx.print_number(access_type as u64);
                ctx.op_sep();
                ctx.print_number(access_attrib as u64);
                ctx.op_end(prev);
            }
            0x02 => {
                // ConnectField
                let name = parse_namestring(ctx)?;
                let prev = ctx.op_begin("ConnectField");
                ctx.print_path(&name);
                ctx.op_end(prev);
            }
            0x03 => {
                // ExtendedAccessField
                let access_type = ctx.it.get_u8()?;
                let access_attrib = ctx.it.get_u8()?;
                let access_length = ctx.it.get_u8()?;
                let prev = ctx.op_begin("ExtendedAccessField");
                ctx.print_number(access_type as u64);
                ctx.op_sep();
                ctx.print_number(access_attrib as u64);
                ctx.op_sep();
                ctx.print_number(access_length as u64);
                ctx.op_end(prev);
            }
            _ => {
                // NamedField
                ctx.it.unget_u8()?;
                let seg = parse_nameseg(ctx)?;
                let bits = parse_pkglength(ctx)?;
                let prev = ctx.op_begin("NamedField");
                if ctx.printing() {
                    let _ = write!(ctx.out, "{}", seg);
                }
                ctx.op_sep();
                ctx.print_number(bits as u64);
                ctx.op_end(prev);
                if ctx.parsing() {
                    let name = AmlName {
                        root: false,
                        parent_hops: 0,
                        segs: alloc::vec![seg],
                    };
                    ctx.ns.register_obj(
                        ctx.cur_ns,
                        AcpiObject::FieldUnit {
                            bit_len: bits as u32,
                        },
                        &name,
                        false,
                    )?;
                }
            }
        }
    }
    if ctx.printing() {
        ctx.indent -= 1;
    }
    ctx.it.set_remaining(saved);
    Ok(())
}

fn parse_field(ctx: &mut Ctx) -> Result<(), AmlError> {
    let body = parse_sized_pkg(ctx)?;
    let after_pkg = ctx.it.remaining();
    let name = parse_namestring(ctx)?;
    let flags = ctx.it.get_u8()?;
    let prev = ctx.op_begin("Field");
    ctx.print_path(&name);
    ctx.op_sep();
    ctx.print_number(flags as u64);
    ctx.op_end(prev);
    let consumed = after_pkg - ctx.it.remaining();
    parse_field_list(ctx, body_after(body, consumed)?)
}

fn parse_index_field(ctx: &mut Ctx) -> Result<(), AmlError> {
    let body = parse_sized_pkg(ctx)?;
    let after_pkg = ctx.it.remaining();
    let index_name = parse_namestring(ctx)?;
    let data_name = parse_namestring(ctx)?;
    let flags = ctx.it.get_u8()?;
    let prev = ctx.op_begin("IndexField");
    ctx.print_path(&index_name);
    ctx.op_sep();
    ctx.print_path(&data_name);
    ctx.op_sep();
    ctx.print_number(flags as u64);
    ctx.op_end(prev);
    let consumed = after_pkg - ctx.it.remaining();
    parse_field_list(ctx, body_after(body, consumed)?)
}

fn parse_create_sized_field(ctx: &mut Ctx, op_name: &str) -> Result<(), AmlError> {
    let prev = ctx.op_begin(op_name);
    parse_termarg(ctx)?; // SourceBuff
    ctx.op_sep();
    parse_termarg(ctx)?; // ByteIndex / BitIndex
    ctx.op_sep();
    let name = parse_namestring(ctx)?;
    ctx.print_path(&name);
    ctx.op_end(prev);
    if ctx.parsing() {
        ctx.ns
            .register_obj(ctx.cur_ns, AcpiObject::BufferField, &name, false)?;
    }
    Ok(())
}

fn parse_create_field(ctx: &mut Ctx) -> Result<(), AmlError> {
    let prev = ctx.op_begin("CreateField");
    parse_termarg(ctx)?; // SourceBuff
    ctx.op_sep();
    parse_termarg(ctx)?; // BitIndex
    ctx.op_sep();
    parse_termarg(ctx)?; // NumBits
    ctx.op_sep();
    let name = parse_namestring(ctx)?;
    ctx.print_path(&name);
    ctx.op_end(prev);
    if ctx.parsing() {
        ctx.ns
            .register_obj(ctx.cur_ns, AcpiObject::BufferField, &name, false)?;
    }
    Ok(())
}

// ************ Expressions ************

fn op_unary_target(ctx: &mut Ctx, name: &str) -> Result<(), AmlError> {
    let prev = ctx.op_begin(name);
    parse_termarg(ctx)?;
    ctx.op_sep();
    parse_target(ctx)?;
    ctx.op_end(prev);
    Ok(())
}

fn op_binary_target(ctx: &mut Ctx, name: &str) -> Result<(), AmlError> {
    let prev = ctx.op_begin(name);
    parse_termarg(ctx)?;
    ctx.op_sep();
    parse_termarg(ctx)?;
    ctx.op_sep();
    parse_target(ctx)?;
    ctx.op_end(prev);
    Ok(())
}

fn op_binary(ctx: &mut Ctx, name: &str) -> Result<(), AmlError> {
    let prev = ctx.op_begin(name);
    parse_termarg(ctx)?;
    ctx.op_sep();
    parse_termarg(ctx)?;
    ctx.op_end(prev);
    Ok(())
}

fn op_unary(ctx: &mut Ctx, name: &str) -> Result<(), AmlError> {
    let prev = ctx.op_begin(name);
    parse_termarg(ctx)?;
    ctx.op_end(prev);
    Ok(())
}

fn op_supername(ctx: &mut Ctx, name: &str) -> Result<(), AmlError> {
    let prev = ctx.op_begin(name);
    parse_supername(ctx)?;
    ctx.op_end(prev);
    Ok(())
}

fn parse_store(ctx: &mut Ctx) -> Result<(), AmlError> {
    let prev = ctx.op_begin("Store");
    parse_termarg(ctx)?;
    ctx.op_sep();
    parse_supername(ctx)?;
    ctx.op_end(prev);
    Ok(())
}

fn parse_notify(ctx: &mut Ctx) -> Result<(), AmlError> {
    let prev = ctx.op_begin("Notify");
    parse_supername(ctx)?;
    ctx.op_sep();
    parse_termarg(ctx)?;
    ctx.op_end(prev);
    Ok(())
}

fn parse_index(ctx: &mut Ctx) -> Result<(), AmlError> {
    op_binary_target(ctx, "Index")
}

fn parse_deref_of(ctx: &mut Ctx) -> Result<(), AmlError> {
    op_unary(ctx, "DerefOf")
}

fn parse_divide(ctx: &mut Ctx) -> Result<(), AmlError> {
    let prev = ctx.op_begin("Divide");
    parse_termarg(ctx)?;
    ctx.op_sep();
    parse_termarg(ctx)?;
    ctx.op_sep();
    parse_target(ctx)?; // Remainder
    ctx.op_sep();
    parse_target(ctx)?; // Quotient
    ctx.op_end(prev);
    Ok(())
}

fn parse_match(ctx: &mut Ctx) -> Result<(), AmlError> {
    let prev = ctx.op_begin("Match");
    parse_termarg(ctx)?; // SearchPkg
    ctx.op_sep();
    let op1 = ctx.it.get_u8()?;
    ctx.print_number(op1 as u64);
    ctx.op_sep();
    parse_termarg(ctx)?;
    ctx.op_sep();
    let op2 = ctx.it.get_u8()?;
    ctx.print_number(op2 as u64);
    ctx.op_sep();
    parse_termarg(ctx)?;
    ctx.op_sep();
    parse_termarg(ctx)?; // StartIndex
    ctx.op_end(prev);
    Ok(())
}

fn parse_to_string(ctx: &mut Ctx) -> Result<(), AmlError> {
    let prev = ctx.op_begin("ToString");
    parse_termarg(ctx)?;
    ctx.op_sep();
    parse_termarg(ctx)?;
    ctx.op_sep();
    parse_target(ctx)?;
    ctx.op_end(prev);
    Ok(())
}

fn parse_acquire(ctx: &mut Ctx) -> Result<(), AmlError> {
    let prev = ctx.op_begin("Acquire");
    parse_supername(ctx)?;
    ctx.op_sep();
    let timeout = ctx.it.get_u16()?;
    ctx.print_number(timeout as u64);
    ctx.op_end(prev);
    Ok(())
}

fn parse_timer(ctx: &mut Ctx) -> Result<(), AmlError> {
    let prev = ctx.op_begin("Timer");
    ctx.op_end(prev);
    Ok(())
}

// ************ Statements ************

fn parse_if(ctx: &mut Ctx) -> Result<(), AmlError> {
    let body = parse_sized_pkg(ctx)?;
    let after_pkg = ctx.it.remaining();
    let prev = ctx.op_begin("If");
    parse_termarg(ctx)?; // Predicate
    ctx.op_end(prev);
    let consumed = after_pkg - ctx.it.remaining();
    parse_termlist(ctx, body_after(body, consumed)?)?;
    // An optional Else block follows the If package.
    if ctx.it.remaining() > 0 && ctx.it.peek_u8()? == 0xA1 {
        ctx.it.skip(1)?;
        let body = parse_sized_pkg(ctx)?;
        let prev = ctx.op_begin("Else");
        ctx.op_end(prev);
        parse_termlist(ctx, body)?;
    }
    Ok(())
}

fn parse_while(ctx: &mut Ctx) -> Result<(), AmlError> {
    let body = parse_sized_pkg(ctx)?;
    let after_pkg = ctx.it.remaining();
    let prev = ctx.op_begin("While");
    parse_termarg(ctx)?; // Predicate
    ctx.op_end(prev);
    let consumed = after_pkg - ctx.it.remaining();
    parse_termlist(ctx, body_after(body, consumed)?)
}

fn parse_return(ctx: &mut Ctx) -> Result<(), AmlError> {
    op_unary(ctx, "Return")
}

fn parse_bare(ctx: &mut Ctx, name: &str) -> Result<(), AmlError> {
    let prev = ctx.op_begin(name);
    ctx.op_end(prev);
    Ok(())
}

// ************ TermArg ************

fn parse_termarg(ctx: &mut Ctx) -> Result<(), AmlError> {
    let opcode = ctx.it.get_u8()?;
    if parse_computational(ctx, opcode)?.is_some() {
        return Ok(());
    }
    match opcode {
        0x60..=0x67 => parse_local(ctx, opcode),
        0x68..=0x6E => parse_arg(ctx, opcode),
        0x11 => parse_buffer(ctx).map(|_| ()),
        0x12 => parse_package(ctx).map(|_| ()),
        0x13 => parse_var_package(ctx).map(|_| ()),
        0x5B => {
            let ext = ctx.it.get_u8()?;
            match ext {
                0x12 => {
                    let prev = ctx.op_begin("CondRefOf");
                    parse_supername(ctx)?;
                    ctx.op_sep();
                    parse_target(ctx)?;
                    ctx.op_end(prev);
                    Ok(())
                }
                0x23 => parse_acquire(ctx),
                0x27 => op_supername(ctx, "Release"),
                0x28 => op_unary_target(ctx, "FromBCD"),
                0x29 => op_unary_target(ctx, "ToBCD"),
                0x33 => parse_timer(ctx),
                0x81 => parse_field(ctx),
                _ => Err(AmlError::InvalidOpcode {
                    opcode: ext,
                    extended: true,
                    offset: ctx.it.offset(),
                }),
            }
        }
        _ => dispatch_expression(ctx, opcode),
    }
}

fn dispatch_expression(ctx: &mut Ctx, opcode: u8) -> Result<(), AmlError> {
    match opcode {
        0x70 => parse_store(ctx),
        0x71 => op_supername(ctx, "RefOf"),
        0x72 => op_binary_target(ctx, "Add"),
        0x73 => op_binary_target(ctx, "Concatenate"),
        0x74 => op_binary_target(ctx, "Subtract"),
        0x75 => op_supername(ctx, "Increment"),
        0x76 => op_supername(ctx, "Decrement"),
        0x77 => op_binary_target(ctx, "Multiply"),
        0x78 => parse_divide(ctx),
        0x79 => op_binary_target(ctx, "ShiftLeft"),
        0x7A => op_binary_target(ctx, "ShiftRight"),
        0x7B => op_binary_target(ctx, "And"),
        0x7C => op_binary_target(ctx, "Nand"),
        0x7D => op_binary_target(ctx, "Or"),
        0x7E => op_binary_target(ctx, "Nor"),
        0x7F => op_binary_target(ctx, "Xor"),
        0x80 => op_unary_target(ctx, "Not"),
        0x81 => op_unary_target(ctx, "FindSetLeftBit"),
        0x82 => op_unary_target(ctx, "FindSetRightBit"),
        0x83 => parse_deref_of(ctx),
        0x84 => op_binary_target(ctx, "ConcatenateResTemplate"),
        0x86 => parse_notify(ctx),
        0x87 => op_supername(ctx, "SizeOf"),
        0x88 => parse_index(ctx),
        0x89 => parse_match(ctx),
        0x8E => op_supername(ctx, "ObjectType"),
        0x90 => op_binary(ctx, "LAnd"),
        0x91 => op_binary(ctx, "LOr"),
        0x92 => op_unary(ctx, "LNot"),
        0x93 => op_binary(ctx, "LEqual"),
        0x94 => op_binary(ctx, "LGreater"),
        0x95 => op_binary(ctx, "LLess"),
        0x96 => op_unary_target(ctx, "ToBuffer"),
        0x97 => op_unary_target(ctx, "ToDecimalString"),
        0x98 => op_unary_target(ctx, "ToHexString"),
        0x99 => op_unary_target(ctx, "ToInteger"),
        0x9C => parse_to_string(ctx),
        b'\\' | b'^' | b'_' | b'A'..=b'Z' => parse_method_invocation(ctx),
        _ => Err(AmlError::InvalidOpcode {
            opcode,
            extended: false,
            offset: ctx.it.offset(),
        }),
    }
}

// ************ TermObj / TermList ************

fn parse_ext_termobj(ctx: &mut Ctx) -> Result<(), AmlError> {
    let ext = ctx.it.get_u8()?;
    match EXT_TERMOBJ_HANDLERS[ext as usize] {
        Some(handler) => handler(ctx),
        None => Err(AmlError::InvalidOpcode {
            opcode: ext,
            extended: true,
            offset: ctx.it.offset(),
        }),
    }
}

fn parse_stray_one(ctx: &mut Ctx) -> Result<(), AmlError> {
    // Some BIOSes emit a stray 0x01 byte at definition-block level; it is
    // tolerated for compatibility but reported.
    warn!(
        "skipping stray 0x01 opcode at offset {:#x}",
        ctx.it.offset()
    );
    Ok(())
}

fn h_buffer(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_buffer(ctx).map(|_| ())
}

fn h_package(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_package(ctx).map(|_| ())
}

fn h_continue(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_bare(ctx, "Continue")
}

fn h_break(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_bare(ctx, "Break")
}

fn h_expression(ctx: &mut Ctx) -> Result<(), AmlError> {
    // The expression opcode was already consumed by the table walk; put
    // it back for the shared dispatcher.
    ctx.it.unget_u8()?;
    let opcode = ctx.it.get_u8()?;
    dispatch_expression(ctx, opcode)
}

fn h_method_invocation(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_method_invocation(ctx)
}

fn h_release(ctx: &mut Ctx) -> Result<(), AmlError> {
    op_supername(ctx, "Release")
}

fn h_from_bcd(ctx: &mut Ctx) -> Result<(), AmlError> {
    op_unary_target(ctx, "FromBCD")
}

fn h_to_bcd(ctx: &mut Ctx) -> Result<(), AmlError> {
    op_unary_target(ctx, "ToBCD")
}

fn h_stall(ctx: &mut Ctx) -> Result<(), AmlError> {
    op_unary(ctx, "Stall")
}

fn h_sleep(ctx: &mut Ctx) -> Result<(), AmlError> {
    op_unary(ctx, "Sleep")
}

fn h_create_bit_field(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_create_sized_field(ctx, "CreateBitField")
}

fn h_create_byte_field(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_create_sized_field(ctx, "CreateByteField")
}

fn h_create_word_field(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_create_sized_field(ctx, "CreateWordField")
}

fn h_create_dword_field(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_create_sized_field(ctx, "CreateDWordField")
}

fn h_create_qword_field(ctx: &mut Ctx) -> Result<(), AmlError> {
    parse_create_sized_field(ctx, "CreateQWordField")
}

const fn termobj_table() -> [Option<Handler>; 256] {
    let mut t: [Option<Handler>; 256] = [None; 256];
    t[0x01] = Some(parse_stray_one as Handler);
    t[0x06] = Some(parse_alias as Handler);
    t[0x08] = Some(parse_name as Handler);
    t[0x10] = Some(parse_scope as Handler);
    t[0x11] = Some(h_buffer as Handler);
    t[0x12] = Some(h_package as Handler);
    t[0x14] = Some(parse_method as Handler);
    t[0x15] = Some(parse_external as Handler);
    t[0x5B] = Some(parse_ext_termobj as Handler);
    t[0x8A] = Some(h_create_dword_field as Handler);
    t[0x8B] = Some(h_create_word_field as Handler);
    t[0x8C] = Some(h_create_byte_field as Handler);
    t[0x8D] = Some(h_create_bit_field as Handler);
    t[0x8F] = Some(h_create_qword_field as Handler);
    // Expression opcodes share one dispatcher.
    let mut op: usize = 0x70;
    while op <= 0x9C {
        if matches!(
            op,
            0x70..=0x84 | 0x86..=0x89 | 0x8E | 0x90..=0x99 | 0x9C
        ) {
            t[op] = Some(h_expression as Handler);
        }
        op += 1;
    }
    // Statements.
    t[0x9F] = Some(h_continue as Handler);
    t[0xA0] = Some(parse_if as Handler);
    t[0xA2] = Some(parse_while as Handler);
    t[0xA4] = Some(parse_return as Handler);
    t[0xA5] = Some(h_break as Handler);
    // Method invocation lead characters.
    t[b'\\' as usize] = Some(h_method_invocation as Handler);
    t[b'^' as usize] = Some(h_method_invocation as Handler);
    t[b'_' as usize] = Some(h_method_invocation as Handler);
    let mut c = b'A' as usize;
    while c <= b'Z' as usize {
        if c != 0x5B {
            t[c] = Some(h_method_invocation as Handler);
        }
        c += 1;
    }
    t
}

const fn ext_termobj_table() -> [Option<Handler>; 256] {
    let mut t: [Option<Handler>; 256] = [None; 256];
    t[0x01] = Some(parse_mutex as Handler);
    t[0x02] = Some(parse_event as Handler);
    t[0x13] = Some(parse_create_field as Handler);
    t[0x21] = Some(h_stall as Handler);
    t[0x22] = Some(h_sleep as Handler);
    t[0x23] = Some(parse_acquire as Handler);
    t[0x27] = Some(h_release as Handler);
    t[0x28] = Some(h_from_bcd as Handler);
    t[0x29] = Some(h_to_bcd as Handler);
    t[0x33] = Some(parse_timer as Handler);
    t[0x80] = Some(parse_op_region as Handler);
    t[0x81] = Some(parse_field as Handler);
    t[0x82] = Some(parse_device as Handler);
    t[0x83] = Some(parse_processor as Handler);
    t[0x84] = Some(parse_power_res as Handler);
    t[0x85] = Some(parse_thermal_zone as Handler);
    t[0x86] = Some(parse_index_field as Handler);
    t
}

static TERMOBJ_HANDLERS: [Option<Handler>; 256] = termobj_table();
static EXT_TERMOBJ_HANDLERS: [Option<Handler>; 256] = ext_termobj_table();

fn parse_termobj(ctx: &mut Ctx, opcode: u8) -> Result<(), AmlError> {
    match TERMOBJ_HANDLERS[opcode as usize] {
        Some(handler) => handler(ctx),
        None => Err(AmlError::InvalidOpcode {
            opcode,
            extended: false,
            offset: ctx.it.offset(),
        }),
    }
}

fn parse_termlist(ctx: &mut Ctx, size: usize) -> Result<(), AmlError> {
    if size > ctx.it.remaining() {
        return Err(AmlError::LengthOverflow);
    }
    let saved = ctx.it.limit(size);
    if ctx.printing() {
        ctx.indent += 1;
    }
    while ctx.it.remaining() > 0 {
        let opcode = ctx.it.get_u8()?;
        parse_termobj(ctx, opcode)?;
    }
    if ctx.printing() {
        ctx.indent -= 1;
    }
    ctx.it.set_remaining(saved);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    // Name (\_SB_.PCI0.RES_, Package (1) { Zero })
    const MINIMAL_TABLE: &[u8] = &[
        0x08, 0x5C, 0x2F, 0x03, 0x5F, 0x53, 0x42, 0x5F, 0x50, 0x43, 0x49, 0x30, 0x52, 0x45,
        0x53, 0x5F, 0x12, 0x06, 0x01, 0x0A, 0x00,
    ];

    #[test]
    fn minimal_table_builds_package_name() {
        let mut interp = Interpreter::new();
        interp.parse(MINIMAL_TABLE).unwrap();
        let res = interp.lookup("\\_SB_.PCI0.RES_").unwrap();
        let AcpiObject::Name { data } = interp.namespace().object(res) else {
            panic!("RES_ is not a Name object");
        };
        // Package (1) with one Byte(0) element.
        let Some(DataValue::Package(elements)) = data else {
            panic!("RES_ does not carry a package");
        };
        assert_eq!(elements.as_slice(), &[DataValue::Byte(0)]);
        // Intermediate scopes were fabricated as external.
        let sb = interp.lookup("\\_SB_").unwrap();
        assert!(interp.namespace().is_external(sb));
    }

    #[test]
    fn parse_print_reparse_is_stable() {
        let mut interp = Interpreter::new();
        interp.parse(MINIMAL_TABLE).unwrap();
        let dump_before = interp.dump();
        let listing = interp.print_asl(MINIMAL_TABLE).unwrap();
        assert!(listing.contains("Name"));
        assert!(listing.contains("\\_SB_.PCI0.RES_"));
        interp.parse(MINIMAL_TABLE).unwrap();
        assert_eq!(interp.dump(), dump_before);
    }

    #[test]
    fn pkglength_boundaries() {
        // One-byte form: top bits 00, six-bit value.
        let mut interp = Interpreter::new();
        // Device "DEV0" whose body holds a bare Name opcode that then
        // runs out of operand bytes.
        let table = [0x5B, 0x82, 0x06, b'D', b'E', b'V', b'0', 0x08];
        let err = interp.parse(&table).unwrap_err();
        assert_eq!(err, AmlError::TruncatedInput);
        assert!(interp.lookup("\\DEV0").is_some());

        // A length claiming more than the input is rejected.
        let mut interp = Interpreter::new();
        let table = [0x10, 0x3F, b'S', b'C', b'P', b'0'];
        let err = interp.parse(&table).unwrap_err();
        assert_eq!(err, AmlError::LengthOverflow);
    }

    #[test]
    fn pkglength_four_byte_form() {
        // 0xC0-prefixed lengths use the low nibble plus three bytes.
        let mut interp = Interpreter::new();
        let root = interp.ns.root();
        let mut ctx = Ctx {
            it: Cursor::new(&[0xC4, 0x32, 0x01, 0x00]),
            ns: &mut interp.ns,
            cur_ns: root,
            mode: Mode::PARSE,
            out: String::new(),
            indent: 0,
            display_inline: false,
        };
        let len = parse_pkglength(&mut ctx).unwrap();
        assert_eq!(len, 0x4 | (0x32 << 4) | (0x01 << 12));
    }

    #[test]
    fn stray_one_at_top_level_is_skipped() {
        let mut interp = Interpreter::new();
        // 0x01 then a valid Event declaration.
        let table = [0x01, 0x5B, 0x02, b'E', b'V', b'T', b'0'];
        interp.parse(&table).unwrap();
        assert!(interp.lookup("\\EVT0").is_some());
    }

    #[test]
    fn method_registration_and_invocation() {
        // Method (MTH0, 2) { } followed by Name (NAM0, MTH0 (Zero, One))
        let table = [
            0x14, 0x06, b'M', b'T', b'H', b'0', 0x02, // Method, flags=2 args
            0x08, b'N', b'A', b'M', b'0', // Name (NAM0, ...)
            b'M', b'T', b'H', b'0', // method invocation (not data!)
        ];
        // A method invocation is not a datarefobject, so Name rejects it;
        // the method itself must have been registered first.
        let mut interp = Interpreter::new();
        let err = interp.parse(&table).unwrap_err();
        assert!(matches!(err, AmlError::InvalidOpcode { .. }));
        let mth = interp.lookup("\\MTH0").unwrap();
        let AcpiObject::Method { flags, length, .. } = interp.namespace().object(mth) else {
            panic!("MTH0 is not a method");
        };
        assert_eq!(*flags, 2);
        assert_eq!(*length, 0);
    }

    #[test]
    fn method_invocation_consumes_declared_args() {
        // Method (MTH2, 1) { } then a top-level invocation MTH2 (Zero).
        let table = [
            0x14, 0x06, b'M', b'T', b'H', b'2', 0x01, //
            b'M', b'T', b'H', b'2', 0x00, // MTH2 (Zero)
        ];
        let mut interp = Interpreter::new();
        interp.parse(&table).unwrap();
        assert!(interp.lookup("\\MTH2").is_some());
    }

    #[test]
    fn exec_walks_method_body() {
        // Method (MTH1, 0) { Store (One, Local0) }
        let table = [
            0x14, 0x09, b'M', b'T', b'H', b'1', 0x00, // Method header
            0x70, 0x01, 0x60, // Store (One, Local0)
        ];
        let mut interp = Interpreter::new();
        interp.parse(&table).unwrap();
        let method = interp.lookup("\\MTH1").unwrap();
        interp.exec(&table, method).unwrap();
        // Executing a non-method is refused.
        let root = interp.namespace().root();
        assert_eq!(
            interp.exec(&table, root).unwrap_err(),
            AmlError::InvalidArgument
        );
    }

    #[test]
    fn scope_into_device_and_duplicate_sibling() {
        // Device (DEVA) {}; Scope (DEVA) { Event (EVTA) }
        let table = [
            0x5B, 0x82, 0x05, b'D', b'E', b'V', b'A', // Device
            0x10, 0x0B, b'D', b'E', b'V', b'A', // Scope (DEVA)
            0x5B, 0x02, b'E', b'V', b'T', b'A', // Event
        ];
        let mut interp = Interpreter::new();
        interp.parse(&table).unwrap();
        let evt = interp.lookup("\\DEVA.EVTA").unwrap();
        assert_eq!(interp.namespace().object(evt), &AcpiObject::Event);
    }

    #[test]
    fn scoping_into_an_event_fails() {
        // Event (EVTB); Scope (EVTB) { ... }
        let table = [
            0x5B, 0x02, b'E', b'V', b'T', b'B', //
            0x10, 0x05, b'E', b'V', b'T', b'B', //
        ];
        let mut interp = Interpreter::new();
        let err = interp.parse(&table).unwrap_err();
        assert_eq!(err, AmlError::NotNamespaceCapable);
    }

    #[test]
    fn field_list_registers_field_units() {
        // OperationRegion (GPIO, SystemIO (1), 0x10, 0x4) then
        // Field (GPIO, 0) { ReservedField(8), FLD0 (8), AccessField }
        let table = [
            0x5B, 0x80, b'G', b'P', b'I', b'O', 0x01, 0x0A, 0x10, 0x0A, 0x04, //
            0x5B, 0x81, 0x10, b'G', b'P', b'I', b'O', 0x00, // Field header
            0x00, 0x08, // ReservedField, 8 bits
            b'F', b'L', b'D', b'0', 0x08, // NamedField FLD0, 8 bits
            0x01, 0x02, 0x03, // AccessField
        ];
        let mut interp = Interpreter::new();
        interp.parse(&table).unwrap();
        let fld = interp.lookup("\\FLD0").unwrap();
        assert_eq!(
            interp.namespace().object(fld),
            &AcpiObject::FieldUnit { bit_len: 8 }
        );
        let gpio = interp.lookup("\\GPIO").unwrap();
        assert_eq!(interp.namespace().object(gpio), &AcpiObject::OpRegion { space: 1 });
    }

    #[test]
    fn external_method_and_device() {
        // External (EXTM, 8 /* method */, 3 args)
        // External (EXTD, 6 /* device */, 0)
        let table = [
            0x15, b'E', b'X', b'T', b'M', 0x08, 0x03, //
            0x15, b'E', b'X', b'T', b'D', 0x06, 0x00, //
        ];
        let mut interp = Interpreter::new();
        interp.parse(&table).unwrap();
        let m = interp.lookup("\\EXTM").unwrap();
        assert!(interp.namespace().is_external(m));
        let AcpiObject::Method { flags, .. } = interp.namespace().object(m) else {
            panic!("EXTM is not a method");
        };
        assert_eq!(*flags, 3);
        let d = interp.lookup("\\EXTD").unwrap();
        assert_eq!(interp.namespace().object(d), &AcpiObject::Device);
    }

    #[test]
    fn if_else_and_while_statements() {
        // If (One) { Event(EVC0) } Else { Event(EVC1) }
        // While (Zero) { Break }
        let table = [
            0xA0, 0x08, 0x01, 0x5B, 0x02, b'E', b'V', b'C', b'0', // If
            0xA1, 0x07, 0x5B, 0x02, b'E', b'V', b'C', b'1', // Else
            0xA2, 0x03, 0x00, 0xA5, // While (Zero) { Break }
        ];
        let mut interp = Interpreter::new();
        interp.parse(&table).unwrap();
        assert!(interp.lookup("\\EVC0").is_some());
        assert!(interp.lookup("\\EVC1").is_some());
    }

    #[test]
    fn invalid_nameseg_is_rejected() {
        // Lowercase lead character in a name segment.
        let table = [0x08, b'a', b'b', b'c', b'd', 0x00];
        let mut interp = Interpreter::new();
        assert_eq!(interp.parse(&table).unwrap_err(), AmlError::InvalidName);
    }

    #[test]
    fn namespace_survives_a_failed_parse() {
        let good = [0x5B, 0x02, b'E', b'V', b'O', b'K']; // Event (EVOK)
        let bad = [0x5B, 0x02, b'E', b'V', b'N', b'O', 0xEE]; // Event then junk
        let mut interp = Interpreter::new();
        interp.parse(&good).unwrap();
        assert!(interp.parse(&bad).is_err());
        // Both the old object and the one parsed before the failure stay.
        assert!(interp.lookup("\\EVOK").is_some());
        assert!(interp.lookup("\\EVNO").is_some());
    }
}
