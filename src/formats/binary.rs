//! Compact binary codec.
//!
//! Every item starts with a marker byte and a control byte. The control
//! byte's low nibble selects the item variant, the high bits flag optional
//! header fields. Payload-bearing items carry a size field; a size of zero
//! encodes the type's zero value and loads as a null item. Multi-byte
//! payloads are host-endian; the stream's byte order is recorded in a
//! protocol meta record and a mismatch with the reading host is a hard
//! error.
//!
//! Item layout:
//!
//! ```text
//! marker control [size] [type] [version] [addr] [name] [payload]
//! ```
//!
//! where `type`, `addr` and `name` are length-prefixed UTF-8 and `size` is
//! one byte for payloads under 128 bytes, otherwise `0x80 | n` followed by
//! an `n`-byte host-endian length.

use crate::address::AddressString;
use crate::context::{ParserContext, ParserState};
use crate::descriptor::{AtomicValue, IntWidth};
use crate::error::{Error, Result};
use crate::formats::{FormatParser, FormatWriter, ItemMeta, OwnedMeta, ParseEvent};

/// Leading byte of every item.
const MARKER: u8 = 0xAB;

/// Wire protocol revision carried by the leading meta record.
const PROTOCOL_VERSION: u8 = 1;

// Item variants (control low nibble).
const V_SIGNED: u8 = 0;
const V_UNSIGNED: u8 = 1;
const V_REAL: u8 = 2;
const V_STRING: u8 = 3;
const V_VALUE: u8 = 4;
const V_POINTER: u8 = 5;
const V_BOOL: u8 = 6;
const V_ENUM: u8 = 7;
const V_CHAR: u8 = 8;
const V_BLOCK_BEGIN: u8 = 9;
const V_BLOCK_END: u8 = 10;
const V_LIST_BEGIN: u8 = 11;
const V_LIST_END: u8 = 12;
const V_MAP_BEGIN: u8 = 13;
const V_MAP_END: u8 = 14;

// Control flags (high nibble).
const F_HAS_TYPE: u8 = 0x10;
const F_HAS_VERSION: u8 = 0x20;
const F_HAS_ADDRESS: u8 = 0x40;
const F_META: u8 = 0x80;

// Meta record kinds (low nibble when F_META is set).
const META_PROTOCOL: u8 = 0;
const META_COMMENT: u8 = 1;

fn host_endian() -> u8 {
    if cfg!(target_endian = "big") { 1 } else { 0 }
}

fn endian_name(flag: u8) -> &'static str {
    if flag == 1 { "big-endian" } else { "little-endian" }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Renders items into an in-memory byte buffer.
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn control_flags(meta: &ItemMeta<'_>) -> u8 {
        let mut flags = 0;
        if meta.type_name.is_some() {
            flags |= F_HAS_TYPE;
        }
        if meta.version.is_some() {
            flags |= F_HAS_VERSION;
        }
        if meta.address.is_some() {
            flags |= F_HAS_ADDRESS;
        }
        flags
    }

    fn put_size(&mut self, size: usize) {
        if size < 0x80 {
            self.buf.push(size as u8);
        } else if size <= u16::MAX as usize {
            self.buf.push(0x80 | 2);
            self.buf.extend_from_slice(&(size as u16).to_ne_bytes());
        } else if size <= u32::MAX as usize {
            self.buf.push(0x80 | 4);
            self.buf.extend_from_slice(&(size as u32).to_ne_bytes());
        } else {
            self.buf.push(0x80 | 8);
            self.buf.extend_from_slice(&(size as u64).to_ne_bytes());
        }
    }

    fn put_str(&mut self, s: &str) -> Result<()> {
        if s.len() > u8::MAX as usize {
            return Err(Error::protocol(format!("name '{s}' exceeds 255 bytes")));
        }
        self.buf.push(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn put_header_fields(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        if let Some(type_name) = meta.type_name {
            self.put_str(type_name)?;
        }
        if let Some(version) = meta.version {
            self.buf.push(version);
        }
        if let Some(address) = meta.address {
            self.put_str(address.as_str())?;
        }
        self.put_str(meta.property_name)
    }

    fn put_item(&mut self, variant: u8, meta: &ItemMeta<'_>, payload: &[u8]) -> Result<()> {
        self.buf.push(MARKER);
        self.buf.push(variant | Self::control_flags(meta));
        self.put_size(payload.len());
        self.put_header_fields(meta)?;
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    fn put_begin(&mut self, variant: u8, meta: &ItemMeta<'_>) -> Result<()> {
        self.buf.push(MARKER);
        self.buf.push(variant | Self::control_flags(meta));
        self.put_header_fields(meta)
    }

    fn put_end(&mut self, variant: u8) {
        self.buf.push(MARKER);
        self.buf.push(variant);
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatWriter for BinaryWriter {
    fn begin_stream(&mut self) -> Result<()> {
        self.buf.push(MARKER);
        self.buf.push(F_META | META_PROTOCOL);
        self.put_size(2);
        self.buf.push(PROTOCOL_VERSION);
        self.buf.push(host_endian());
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.buf.push(MARKER);
        self.buf.push(F_META | META_COMMENT);
        self.put_size(text.len());
        self.buf.extend_from_slice(text.as_bytes());
        Ok(())
    }

    fn atomic(&mut self, meta: &ItemMeta<'_>, value: &AtomicValue) -> Result<()> {
        let (variant, payload): (u8, Vec<u8>) = match value {
            AtomicValue::Bool(false) => (V_BOOL, Vec::new()),
            AtomicValue::Bool(true) => (V_BOOL, vec![1]),
            AtomicValue::Char(c) => {
                if *c == '\0' {
                    (V_CHAR, Vec::new())
                } else {
                    (V_CHAR, (*c as u32).to_ne_bytes().to_vec())
                }
            }
            AtomicValue::Signed(0, _) => (V_SIGNED, Vec::new()),
            AtomicValue::Signed(v, w) => {
                let bytes = v.to_ne_bytes();
                let slice = if cfg!(target_endian = "big") {
                    &bytes[8 - w.bytes()..]
                } else {
                    &bytes[..w.bytes()]
                };
                (V_SIGNED, slice.to_vec())
            }
            AtomicValue::Unsigned(0, _) => (V_UNSIGNED, Vec::new()),
            AtomicValue::Unsigned(v, w) => {
                let bytes = v.to_ne_bytes();
                let slice = if cfg!(target_endian = "big") {
                    &bytes[8 - w.bytes()..]
                } else {
                    &bytes[..w.bytes()]
                };
                (V_UNSIGNED, slice.to_vec())
            }
            // Only +0.0 gets the empty payload; -0.0 must keep its sign bit.
            AtomicValue::F32(v) => {
                if v.to_bits() == 0 {
                    (V_REAL, Vec::new())
                } else {
                    (V_REAL, v.to_ne_bytes().to_vec())
                }
            }
            AtomicValue::F64(v) => {
                if v.to_bits() == 0 {
                    (V_REAL, Vec::new())
                } else {
                    (V_REAL, v.to_ne_bytes().to_vec())
                }
            }
            AtomicValue::Str(s) => (V_STRING, s.as_bytes().to_vec()),
            AtomicValue::Enum { value, .. } => {
                if *value == 0 {
                    (V_ENUM, Vec::new())
                } else {
                    let v = i32::try_from(*value).map_err(|_| {
                        Error::protocol(format!("enum value {value} exceeds 32 bits"))
                    })?;
                    (V_ENUM, v.to_ne_bytes().to_vec())
                }
            }
        };
        self.put_item(variant, meta, &payload)
    }

    fn null(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.put_item(V_VALUE, meta, &[])
    }

    fn pointer(&mut self, meta: &ItemMeta<'_>, target: AddressString) -> Result<()> {
        self.put_item(V_POINTER, meta, target.as_str().as_bytes())
    }

    fn begin_block(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.put_begin(V_BLOCK_BEGIN, meta)
    }

    fn end_block(&mut self) -> Result<()> {
        self.put_end(V_BLOCK_END);
        Ok(())
    }

    fn begin_list(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.put_begin(V_LIST_BEGIN, meta)
    }

    fn end_list(&mut self) -> Result<()> {
        self.put_end(V_LIST_END);
        Ok(())
    }

    fn begin_map(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.put_begin(V_MAP_BEGIN, meta)
    }

    fn end_map(&mut self) -> Result<()> {
        self.put_end(V_MAP_END);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Decodes items from a byte slice.
pub struct BinaryParser<'b> {
    data: &'b [u8],
    pos: usize,
    ctx: ParserContext,
    done: bool,
}

impl<'b> BinaryParser<'b> {
    pub fn new(data: &'b [u8]) -> Self {
        let mut ctx = ParserContext::new("<binary>");
        ctx.line = 0;
        Self {
            data,
            pos: 0,
            ctx,
            done: false,
        }
    }

    /// Comments collected so far from meta records.
    pub fn comments(&self) -> &[String] {
        &self.ctx.comments
    }

    fn truncated(&self) -> Error {
        Error::protocol(format!("stream truncated at byte {}", self.pos))
    }

    fn take(&mut self, n: usize) -> Result<&'b [u8]> {
        if self.pos + n > self.data.len() {
            return Err(self.truncated());
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_size(&mut self) -> Result<usize> {
        self.ctx.push_state(ParserState::Size);
        let head = self.take_u8()?;
        let size = if head < 0x80 {
            head as usize
        } else {
            match head & 0x0F {
                2 => {
                    let b: [u8; 2] = self.take(2)?.try_into().expect("slice length checked");
                    u16::from_ne_bytes(b) as usize
                }
                4 => {
                    let b: [u8; 4] = self.take(4)?.try_into().expect("slice length checked");
                    u32::from_ne_bytes(b) as usize
                }
                8 => {
                    let b: [u8; 8] = self.take(8)?.try_into().expect("slice length checked");
                    let v = u64::from_ne_bytes(b);
                    usize::try_from(v)
                        .map_err(|_| Error::protocol(format!("payload size {v} exceeds usize")))?
                }
                other => {
                    return Err(Error::protocol(format!(
                        "invalid size-control byte 0x{:02x} (width {other})",
                        head
                    )));
                }
            }
        };
        self.ctx.pop_state(ParserState::Size)?;
        Ok(size)
    }

    fn take_str(&mut self) -> Result<&'b str> {
        let len = self.take_u8()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map_err(|_| Error::protocol("name field is not valid UTF-8".to_owned()))
    }

    fn take_header(&mut self, flags: u8, with_size: bool) -> Result<(OwnedMeta, usize)> {
        let size = if with_size { self.take_size()? } else { 0 };
        let mut meta = OwnedMeta::default();
        if flags & F_HAS_TYPE != 0 {
            meta.type_name = Some(self.take_str()?.to_owned());
        }
        if flags & F_HAS_VERSION != 0 {
            meta.version = Some(self.take_u8()?);
        }
        if flags & F_HAS_ADDRESS != 0 {
            meta.address = Some(AddressString::from_token(self.take_str()?)?);
        }
        meta.property_name = self.take_str()?.to_owned();
        Ok((meta, size))
    }

    fn decode_payload(&mut self, variant: u8, meta: OwnedMeta, size: usize) -> Result<ParseEvent> {
        self.ctx.push_state(ParserState::Value);
        if size == 0 && variant != V_POINTER {
            self.ctx.pop_state(ParserState::Value)?;
            return Ok(ParseEvent::Null(meta));
        }
        let payload = self.take(size)?;
        let event = match variant {
            V_SIGNED => {
                let width = IntWidth::from_bytes(size).ok_or_else(|| {
                    Error::protocol(format!("unsupported signed integer width {size}"))
                })?;
                let mut bytes = if payload[if cfg!(target_endian = "big") { 0 } else { size - 1 }]
                    & 0x80
                    != 0
                {
                    [0xFF; 8]
                } else {
                    [0u8; 8]
                };
                if cfg!(target_endian = "big") {
                    bytes[8 - size..].copy_from_slice(payload);
                } else {
                    bytes[..size].copy_from_slice(payload);
                }
                ParseEvent::Atomic(meta, AtomicValue::Signed(i64::from_ne_bytes(bytes), width))
            }
            V_UNSIGNED => {
                let width = IntWidth::from_bytes(size).ok_or_else(|| {
                    Error::protocol(format!("unsupported unsigned integer width {size}"))
                })?;
                let mut bytes = [0u8; 8];
                if cfg!(target_endian = "big") {
                    bytes[8 - size..].copy_from_slice(payload);
                } else {
                    bytes[..size].copy_from_slice(payload);
                }
                ParseEvent::Atomic(meta, AtomicValue::Unsigned(u64::from_ne_bytes(bytes), width))
            }
            V_REAL => match size {
                4 => {
                    let b: [u8; 4] = payload.try_into().expect("size checked");
                    ParseEvent::Atomic(meta, AtomicValue::F32(f32::from_ne_bytes(b)))
                }
                8 => {
                    let b: [u8; 8] = payload.try_into().expect("size checked");
                    ParseEvent::Atomic(meta, AtomicValue::F64(f64::from_ne_bytes(b)))
                }
                other => {
                    return Err(Error::protocol(format!("unsupported real width {other}")));
                }
            },
            V_STRING => {
                let text = std::str::from_utf8(payload)
                    .map_err(|_| Error::protocol("string payload is not valid UTF-8"))?;
                ParseEvent::Atomic(meta, AtomicValue::Str(text.to_owned()))
            }
            V_BOOL => {
                if size != 1 {
                    return Err(Error::protocol(format!("unsupported bool width {size}")));
                }
                ParseEvent::Atomic(meta, AtomicValue::Bool(payload[0] != 0))
            }
            V_ENUM => {
                if size != 4 {
                    return Err(Error::protocol(format!("unsupported enum width {size}")));
                }
                let b: [u8; 4] = payload.try_into().expect("size checked");
                ParseEvent::Atomic(
                    meta,
                    AtomicValue::Enum {
                        name: String::new(),
                        value: i32::from_ne_bytes(b) as i64,
                    },
                )
            }
            V_CHAR => {
                if size != 4 {
                    return Err(Error::protocol(format!("unsupported char width {size}")));
                }
                let b: [u8; 4] = payload.try_into().expect("size checked");
                let c = char::from_u32(u32::from_ne_bytes(b))
                    .ok_or_else(|| Error::protocol("char payload is not a Unicode scalar"))?;
                ParseEvent::Atomic(meta, AtomicValue::Char(c))
            }
            V_VALUE => {
                return Err(Error::protocol(
                    "opaque value payloads are not supported by this revision",
                ));
            }
            V_POINTER => {
                let token = std::str::from_utf8(payload)
                    .map_err(|_| Error::protocol("address payload is not valid UTF-8"))?;
                ParseEvent::Pointer(meta, AddressString::from_token(token)?)
            }
            _ => unreachable!("payload variants are filtered by the caller"),
        };
        self.ctx.pop_state(ParserState::Value)?;
        Ok(event)
    }

    fn meta_record(&mut self, kind: u8) -> Result<()> {
        let size = self.take_size()?;
        let payload = self.take(size)?;
        match kind {
            META_PROTOCOL => {
                if payload.len() != 2 {
                    return Err(Error::protocol("malformed protocol meta record"));
                }
                if payload[0] != PROTOCOL_VERSION {
                    return Err(Error::protocol(format!(
                        "unsupported protocol revision {}",
                        payload[0]
                    )));
                }
                if payload[1] != host_endian() {
                    return Err(Error::UnsupportedEndianness {
                        stream: endian_name(payload[1]),
                        host: endian_name(host_endian()),
                    });
                }
                Ok(())
            }
            META_COMMENT => {
                let text = std::str::from_utf8(payload)
                    .map_err(|_| Error::protocol("comment payload is not valid UTF-8"))?;
                self.ctx.comments.push(text.to_owned());
                Ok(())
            }
            other => Err(Error::protocol(format!("unknown meta record kind {other}"))),
        }
    }
}

impl FormatParser for BinaryParser<'_> {
    fn next_event(&mut self) -> Result<ParseEvent> {
        loop {
            if self.done || self.pos >= self.data.len() {
                self.done = true;
                if self.ctx.depth() > 1 {
                    return Err(Error::protocol("stream ends inside an open structure"));
                }
                return Ok(ParseEvent::End);
            }

            let marker = self.take_u8()?;
            if marker != MARKER {
                return Err(Error::protocol(format!(
                    "bad item marker 0x{marker:02x} at byte {}",
                    self.pos - 1
                )));
            }
            let control = self.take_u8()?;
            if control & F_META != 0 {
                self.meta_record(control & 0x0F)?;
                continue;
            }

            self.ctx.line += 1;
            let variant = control & 0x0F;
            let flags = control & 0x70;
            return match variant {
                V_BLOCK_END => {
                    self.ctx.pop_state(ParserState::Block)?;
                    Ok(ParseEvent::BlockEnd)
                }
                V_LIST_END => {
                    self.ctx.pop_state(ParserState::List)?;
                    Ok(ParseEvent::ListEnd)
                }
                V_MAP_END => {
                    self.ctx.pop_state(ParserState::Map)?;
                    Ok(ParseEvent::MapEnd)
                }
                V_BLOCK_BEGIN => {
                    let (meta, _) = self.take_header(flags, false)?;
                    self.ctx.push_state(ParserState::Block);
                    Ok(ParseEvent::BlockBegin(meta))
                }
                V_LIST_BEGIN => {
                    let (meta, _) = self.take_header(flags, false)?;
                    self.ctx.push_state(ParserState::List);
                    Ok(ParseEvent::ListBegin(meta))
                }
                V_MAP_BEGIN => {
                    let (meta, _) = self.take_header(flags, false)?;
                    self.ctx.push_state(ParserState::Map);
                    Ok(ParseEvent::MapBegin(meta))
                }
                V_SIGNED | V_UNSIGNED | V_REAL | V_STRING | V_VALUE | V_POINTER | V_BOOL
                | V_ENUM | V_CHAR => {
                    let (meta, size) = self.take_header(flags, true)?;
                    self.decode_payload(variant, meta, size)
                }
                other => Err(Error::protocol(format!(
                    "unknown control variant {other} at item {}",
                    self.ctx.line
                ))),
            };
        }
    }

    fn position(&self) -> (String, u32) {
        (self.ctx.file.to_string(), self.ctx.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> ItemMeta<'static> {
        // Leaked names keep the test metas simple.
        ItemMeta {
            property_name: Box::leak(name.to_owned().into_boxed_str()),
            ..ItemMeta::default()
        }
    }

    #[test]
    fn scalar_items_round_trip() {
        let mut w = BinaryWriter::new();
        w.begin_stream().unwrap();
        w.atomic(&meta("count"), &AtomicValue::Signed(-7, IntWidth::W2))
            .unwrap();
        w.atomic(&meta("mass"), &AtomicValue::F32(1.5)).unwrap();
        w.atomic(&meta("name"), &AtomicValue::Str("hub".into()))
            .unwrap();
        w.atomic(&meta("live"), &AtomicValue::Bool(true)).unwrap();
        let bytes = w.into_bytes();

        let mut p = BinaryParser::new(&bytes);
        match p.next_event().unwrap() {
            ParseEvent::Atomic(m, AtomicValue::Signed(v, IntWidth::W2)) => {
                assert_eq!(m.property_name, "count");
                assert_eq!(v, -7);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match p.next_event().unwrap() {
            ParseEvent::Atomic(_, AtomicValue::F32(v)) => assert_eq!(v, 1.5),
            other => panic!("unexpected event {other:?}"),
        }
        match p.next_event().unwrap() {
            ParseEvent::Atomic(_, AtomicValue::Str(s)) => assert_eq!(s, "hub"),
            other => panic!("unexpected event {other:?}"),
        }
        match p.next_event().unwrap() {
            ParseEvent::Atomic(_, AtomicValue::Bool(v)) => assert!(v),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(p.next_event().unwrap(), ParseEvent::End));
    }

    #[test]
    fn zero_payload_parses_as_null() {
        let mut w = BinaryWriter::new();
        w.atomic(&meta("n"), &AtomicValue::Signed(0, IntWidth::W4))
            .unwrap();
        w.atomic(&meta("s"), &AtomicValue::Str(String::new()))
            .unwrap();
        let bytes = w.into_bytes();

        let mut p = BinaryParser::new(&bytes);
        assert!(matches!(p.next_event().unwrap(), ParseEvent::Null(_)));
        assert!(matches!(p.next_event().unwrap(), ParseEvent::Null(_)));
    }

    #[test]
    fn negative_zero_keeps_its_sign_bit() {
        let mut w = BinaryWriter::new();
        w.atomic(&meta("a"), &AtomicValue::F32(-0.0)).unwrap();
        w.atomic(&meta("b"), &AtomicValue::F64(-0.0)).unwrap();
        let bytes = w.into_bytes();

        let mut p = BinaryParser::new(&bytes);
        match p.next_event().unwrap() {
            ParseEvent::Atomic(_, AtomicValue::F32(v)) => {
                assert_eq!(v.to_bits(), (-0.0f32).to_bits());
            }
            other => panic!("unexpected event {other:?}"),
        }
        match p.next_event().unwrap() {
            ParseEvent::Atomic(_, AtomicValue::F64(v)) => {
                assert_eq!(v.to_bits(), (-0.0f64).to_bits());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn nested_structure_round_trips() {
        let root = ItemMeta {
            property_name: "scene",
            type_name: Some("Scene"),
            version: Some(3),
            address: None,
        };
        let mut w = BinaryWriter::new();
        w.begin_block(&root).unwrap();
        w.begin_list(&meta("items")).unwrap();
        w.atomic(&ItemMeta::default(), &AtomicValue::Unsigned(9, IntWidth::W8))
            .unwrap();
        w.end_list().unwrap();
        w.end_block().unwrap();
        let bytes = w.into_bytes();

        let mut p = BinaryParser::new(&bytes);
        match p.next_event().unwrap() {
            ParseEvent::BlockBegin(m) => {
                assert_eq!(m.property_name, "scene");
                assert_eq!(m.type_name.as_deref(), Some("Scene"));
                assert_eq!(m.version, Some(3));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(p.next_event().unwrap(), ParseEvent::ListBegin(_)));
        assert!(matches!(
            p.next_event().unwrap(),
            ParseEvent::Atomic(_, AtomicValue::Unsigned(9, IntWidth::W8))
        ));
        assert!(matches!(p.next_event().unwrap(), ParseEvent::ListEnd));
        assert!(matches!(p.next_event().unwrap(), ParseEvent::BlockEnd));
        assert!(matches!(p.next_event().unwrap(), ParseEvent::End));
    }

    #[test]
    fn pointer_and_address_round_trip() {
        let addr = AddressString::from_token("5a3f").unwrap();
        let record = ItemMeta {
            property_name: "",
            type_name: Some("Node"),
            version: Some(0),
            address: Some(addr),
        };
        let mut w = BinaryWriter::new();
        w.pointer(&meta("next"), addr).unwrap();
        w.begin_block(&record).unwrap();
        w.end_block().unwrap();
        let bytes = w.into_bytes();

        let mut p = BinaryParser::new(&bytes);
        match p.next_event().unwrap() {
            ParseEvent::Pointer(m, target) => {
                assert_eq!(m.property_name, "next");
                assert_eq!(target, addr);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match p.next_event().unwrap() {
            ParseEvent::BlockBegin(m) => assert_eq!(m.address, Some(addr)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn foreign_endianness_is_rejected() {
        let mut w = BinaryWriter::new();
        w.begin_stream().unwrap();
        let mut bytes = w.into_bytes();
        // Flip the endianness flag in the protocol meta record.
        let last = bytes.len() - 1;
        bytes[last] ^= 1;

        let mut p = BinaryParser::new(&bytes);
        let err = p.next_event().unwrap_err();
        assert!(matches!(err, Error::UnsupportedEndianness { .. }));
    }

    #[test]
    fn unknown_control_variant_is_rejected() {
        let bytes = [MARKER, 0x0F];
        let mut p = BinaryParser::new(&bytes);
        assert!(matches!(p.next_event(), Err(Error::Protocol(_))));
    }

    #[test]
    fn bad_marker_is_rejected() {
        let bytes = [0x00, V_BLOCK_END];
        let mut p = BinaryParser::new(&bytes);
        assert!(matches!(p.next_event(), Err(Error::Protocol(_))));
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let mut w = BinaryWriter::new();
        w.atomic(&meta("x"), &AtomicValue::Str("hello".into()))
            .unwrap();
        let bytes = w.into_bytes();
        let mut p = BinaryParser::new(&bytes[..bytes.len() - 2]);
        assert!(p.next_event().is_err());
    }

    #[test]
    fn unterminated_block_is_rejected() {
        let mut w = BinaryWriter::new();
        w.begin_block(&meta("b")).unwrap();
        let bytes = w.into_bytes();
        let mut p = BinaryParser::new(&bytes);
        assert!(matches!(p.next_event().unwrap(), ParseEvent::BlockBegin(_)));
        assert!(p.next_event().is_err());
    }

    #[test]
    fn comments_are_collected_out_of_band() {
        let mut w = BinaryWriter::new();
        w.comment("generated by the exporter").unwrap();
        w.atomic(&meta("x"), &AtomicValue::Bool(true)).unwrap();
        let bytes = w.into_bytes();

        let mut p = BinaryParser::new(&bytes);
        assert!(matches!(p.next_event().unwrap(), ParseEvent::Atomic(_, _)));
        assert_eq!(p.comments(), ["generated by the exporter"]);
    }
}
