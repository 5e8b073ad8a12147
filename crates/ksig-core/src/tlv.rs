//! Type-length-value wire codec.
//!
//! Every persisted or transmitted structure in the calendar infrastructure
//! is framed as a TLV element. Two header encodings exist:
//!
//! - **TLV8** — 2-byte header: type in the low 5 bits of byte 0, length in
//!   byte 1; payloads up to 255 bytes.
//! - **TLV16** — 4-byte header: bit 7 of byte 0 set, 13-bit type split
//!   across bytes 0–1, 16-bit big-endian length in bytes 2–3; payloads up
//!   to 65535 bytes.
//!
//! Bit 6 of the first byte flags the element *non-critical* (an unknown
//! element may be ignored), bit 5 flags it *forwardable*. Writers always
//! pick the shortest header that fits: TLV8 iff `tag <= 0x1f` and
//! `length <= 0xff`.
//!
//! Parsing is lazy like the original codec: a freshly parsed element holds
//! its payload as raw bytes, and [`Tlv::into_nested`] re-parses those bytes
//! as a run of adjacent child elements on demand. Casting is expressed as a
//! consuming conversion returning a new element rather than in-place
//! mutation; payload bytes are preserved exactly in both directions.
//!
//! Elements parsed from a stream remember their absolute offset in the root
//! buffer and their offset inside the parent payload. Offsets are purely
//! diagnostic: they make error reports addressable but never participate in
//! comparison or verification.

use std::fmt;
use std::fmt::Write as _;

use crate::error::{KsiError, KsiResult};

/// First-byte mask selecting the TLV16 encoding.
pub const MASK_TLV16: u8 = 0x80;
/// First-byte mask of the non-critical flag.
pub const MASK_NON_CRITICAL: u8 = 0x40;
/// First-byte mask of the forwardable flag.
pub const MASK_FORWARD: u8 = 0x20;
/// Mask of the tag bits within the first byte.
pub const MASK_TLV8_TAG: u8 = 0x1f;

/// Largest representable tag (13 bits).
pub const MAX_TAG: u16 = 0x1fff;
/// Largest representable payload length (16-bit length field).
pub const MAX_PAYLOAD_LEN: usize = 0xffff;

/// Payload of a TLV element: opaque bytes or parsed child elements.
///
/// Unsigned integers are carried as raw big-endian bytes in minimal form
/// and read through [`Tlv::get_uint`]; see [`Tlv::from_uint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvPayload {
    Raw(Vec<u8>),
    Nested(Vec<Tlv>),
}

/// A single TLV element owning its payload.
#[derive(Debug, Clone)]
pub struct Tlv {
    tag: u16,
    non_critical: bool,
    forwardable: bool,
    payload: TlvPayload,
    absolute_offset: Option<usize>,
    relative_offset: Option<usize>,
    /// Absolute offset of the payload start, used to position children
    /// when the raw payload is cast to nested form.
    payload_offset: Option<usize>,
}

/// Structural equality: tag, flags and payload. Offsets are diagnostic
/// bookkeeping and deliberately excluded, so `parse(serialize(t)) == t`
/// holds for constructed elements as well as parsed ones.
impl PartialEq for Tlv {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.non_critical == other.non_critical
            && self.forwardable == other.forwardable
            && self.payload == other.payload
    }
}

impl Eq for Tlv {}

impl Tlv {
    fn validate_tag(tag: u16) -> KsiResult<()> {
        if tag > MAX_TAG {
            return Err(KsiError::InvalidArgument);
        }
        Ok(())
    }

    /// Builds an element with a raw payload.
    pub fn from_raw(tag: u16, payload: Vec<u8>) -> KsiResult<Self> {
        Self::validate_tag(tag)?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(KsiError::BufferOverflow);
        }
        Ok(Tlv {
            tag,
            non_critical: false,
            forwardable: false,
            payload: TlvPayload::Raw(payload),
            absolute_offset: None,
            relative_offset: None,
            payload_offset: None,
        })
    }

    /// Builds an element with child elements.
    pub fn from_nested(tag: u16, children: Vec<Tlv>) -> KsiResult<Self> {
        Self::validate_tag(tag)?;
        Ok(Tlv {
            tag,
            non_critical: false,
            forwardable: false,
            payload: TlvPayload::Nested(children),
            absolute_offset: None,
            relative_offset: None,
            payload_offset: None,
        })
    }

    /// Builds an element carrying an unsigned integer in minimal
    /// big-endian form: no leading zero byte, and the value 0 encodes to an
    /// empty payload.
    pub fn from_uint(tag: u16, value: u64) -> KsiResult<Self> {
        let mut bytes = value.to_be_bytes().to_vec();
        while bytes.first() == Some(&0) {
            bytes.remove(0);
        }
        Self::from_raw(tag, bytes)
    }

    /// Sets both flags, consuming and returning the element.
    pub fn with_flags(mut self, non_critical: bool, forwardable: bool) -> Self {
        self.non_critical = non_critical;
        self.forwardable = forwardable;
        self
    }

    /// Parses exactly one element from `data`, failing if bytes remain.
    pub fn parse(data: &[u8]) -> KsiResult<Self> {
        let (tlv, consumed) = Self::parse_at(data, Some(0), 0)?;
        if consumed != data.len() {
            return Err(KsiError::invalid_format(format!(
                "{} trailing bytes after top-level element",
                data.len() - consumed
            )));
        }
        Ok(tlv)
    }

    /// Parses one element from the front of `data`, returning it together
    /// with the number of bytes consumed.
    pub fn parse_prefix(data: &[u8]) -> KsiResult<(Self, usize)> {
        Self::parse_at(data, Some(0), 0)
    }

    /// Parses a run of adjacent elements consuming the whole buffer.
    pub fn parse_sequence(data: &[u8]) -> KsiResult<Vec<Self>> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let (tlv, consumed) = Self::parse_at(&data[offset..], Some(offset), offset)?;
            out.push(tlv);
            offset += consumed;
        }
        Ok(out)
    }

    fn parse_at(data: &[u8], absolute: Option<usize>, relative: usize) -> KsiResult<(Self, usize)> {
        if data.len() < 2 {
            return Err(KsiError::invalid_format("truncated TLV header"));
        }
        let b0 = data[0];
        let non_critical = b0 & MASK_NON_CRITICAL != 0;
        let forwardable = b0 & MASK_FORWARD != 0;

        let (tag, length, header_len) = if b0 & MASK_TLV16 != 0 {
            if data.len() < 4 {
                return Err(KsiError::invalid_format("truncated TLV16 header"));
            }
            let tag = u16::from(b0 & MASK_TLV8_TAG) << 8 | u16::from(data[1]);
            let length = usize::from(u16::from_be_bytes([data[2], data[3]]));
            (tag, length, 4usize)
        } else {
            (u16::from(b0 & MASK_TLV8_TAG), usize::from(data[1]), 2usize)
        };

        if data.len() < header_len + length {
            return Err(KsiError::invalid_format(format!(
                "declared payload length {} exceeds remaining {} bytes",
                length,
                data.len() - header_len
            )));
        }

        let tlv = Tlv {
            tag,
            non_critical,
            forwardable,
            payload: TlvPayload::Raw(data[header_len..header_len + length].to_vec()),
            absolute_offset: absolute,
            relative_offset: Some(relative),
            payload_offset: absolute.map(|a| a + header_len),
        };
        Ok((tlv, header_len + length))
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn is_non_critical(&self) -> bool {
        self.non_critical
    }

    pub fn is_forwardable(&self) -> bool {
        self.forwardable
    }

    /// Absolute offset in the root stream, if this element was parsed.
    pub fn absolute_offset(&self) -> Option<usize> {
        self.absolute_offset
    }

    /// Offset inside the parent payload, if this element was parsed.
    pub fn relative_offset(&self) -> Option<usize> {
        self.relative_offset
    }

    pub fn payload(&self) -> &TlvPayload {
        &self.payload
    }

    /// Borrows the raw payload bytes; fails on nested payloads.
    pub fn raw(&self) -> KsiResult<&[u8]> {
        match &self.payload {
            TlvPayload::Raw(bytes) => Ok(bytes),
            TlvPayload::Nested(_) => Err(KsiError::PayloadTypeMismatch),
        }
    }

    /// Borrows the child elements; fails on raw payloads.
    pub fn nested(&self) -> KsiResult<&[Tlv]> {
        match &self.payload {
            TlvPayload::Nested(children) => Ok(children),
            TlvPayload::Raw(_) => Err(KsiError::PayloadTypeMismatch),
        }
    }

    /// Reads the payload as a UTF-8 string.
    pub fn get_utf8(&self) -> KsiResult<String> {
        String::from_utf8(self.raw()?.to_vec())
            .map_err(|_| KsiError::invalid_format("payload is not valid UTF-8"))
    }

    /// Guards the handling of an element a parser does not recognize:
    /// non-critical elements may be skipped, critical ones are a format
    /// error.
    pub fn ensure_skippable(&self) -> KsiResult<()> {
        if self.non_critical {
            Ok(())
        } else {
            Err(KsiError::invalid_format(format!(
                "unknown critical element TLV[{:#06x}]",
                self.tag
            )))
        }
    }

    /// Reads the payload as a minimally-encoded big-endian unsigned
    /// integer. A leading zero byte is a format error; an empty payload is
    /// the value 0.
    pub fn get_uint(&self) -> KsiResult<u64> {
        let bytes = self.raw()?;
        if bytes.len() > 8 {
            return Err(KsiError::invalid_format(format!(
                "integer payload of {} bytes is too long",
                bytes.len()
            )));
        }
        if bytes.first() == Some(&0) {
            return Err(KsiError::invalid_format(
                "integer payload has a leading zero byte",
            ));
        }
        let mut value = 0u64;
        for &b in bytes {
            value = value << 8 | u64::from(b);
        }
        Ok(value)
    }

    /// Casts a raw payload into nested form by parsing it as a run of
    /// adjacent child elements; the children must consume the payload
    /// exactly. A no-op on elements already nested.
    pub fn into_nested(self) -> KsiResult<Self> {
        let bytes = match self.payload {
            TlvPayload::Nested(_) => return Ok(self),
            TlvPayload::Raw(ref bytes) => bytes,
        };

        let mut children = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let absolute = self.payload_offset.map(|p| p + offset);
            let (child, consumed) = Self::parse_at(&bytes[offset..], absolute, offset)?;
            children.push(child);
            offset += consumed;
        }

        Ok(Tlv {
            payload: TlvPayload::Nested(children),
            ..self
        })
    }

    /// Casts nested children back into a raw payload by serializing them
    /// in order. A no-op on elements already raw.
    pub fn into_raw(self) -> KsiResult<Self> {
        if matches!(self.payload, TlvPayload::Raw(_)) {
            return Ok(self);
        }
        let bytes = self.serialize_payload()?;
        Ok(Tlv {
            payload: TlvPayload::Raw(bytes),
            ..self
        })
    }

    /// Consumes the element and yields its children, casting first if the
    /// payload is still raw.
    pub fn into_children(self) -> KsiResult<Vec<Tlv>> {
        match self.into_nested()?.payload {
            TlvPayload::Nested(children) => Ok(children),
            TlvPayload::Raw(_) => unreachable!("into_nested returned a raw payload"),
        }
    }

    /// Appends a child element; fails on raw payloads.
    pub fn append_nested(&mut self, child: Tlv) -> KsiResult<()> {
        match &mut self.payload {
            TlvPayload::Nested(children) => {
                children.push(child);
                Ok(())
            }
            TlvPayload::Raw(_) => Err(KsiError::PayloadTypeMismatch),
        }
    }

    /// Replaces the child at `index`; fails on raw payloads or when the
    /// index is out of bounds.
    pub fn replace_nested(&mut self, index: usize, child: Tlv) -> KsiResult<()> {
        match &mut self.payload {
            TlvPayload::Nested(children) => {
                let slot = children.get_mut(index).ok_or(KsiError::InvalidArgument)?;
                *slot = child;
                Ok(())
            }
            TlvPayload::Raw(_) => Err(KsiError::PayloadTypeMismatch),
        }
    }

    /// Removes and returns the child at `index`; fails on raw payloads or
    /// when the index is out of bounds.
    pub fn remove_nested(&mut self, index: usize) -> KsiResult<Tlv> {
        match &mut self.payload {
            TlvPayload::Nested(children) => {
                if index >= children.len() {
                    return Err(KsiError::InvalidArgument);
                }
                Ok(children.remove(index))
            }
            TlvPayload::Raw(_) => Err(KsiError::PayloadTypeMismatch),
        }
    }

    fn payload_len(&self) -> KsiResult<usize> {
        match &self.payload {
            TlvPayload::Raw(bytes) => Ok(bytes.len()),
            TlvPayload::Nested(children) => {
                let mut total = 0usize;
                for child in children {
                    total += child.header_len()? + child.payload_len()?;
                }
                Ok(total)
            }
        }
    }

    fn header_len(&self) -> KsiResult<usize> {
        let len = self.payload_len()?;
        Ok(if self.tag <= u16::from(MASK_TLV8_TAG) && len <= 0xff {
            2
        } else {
            4
        })
    }

    /// Serializes header and payload, recursively, using the shortest
    /// header form for every element.
    pub fn serialize(&self) -> KsiResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Serializes the payload only.
    pub fn serialize_payload(&self) -> KsiResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_payload_to(&mut out)?;
        Ok(out)
    }

    fn write_to(&self, out: &mut Vec<u8>) -> KsiResult<()> {
        let length = self.payload_len()?;
        if length > MAX_PAYLOAD_LEN {
            return Err(KsiError::BufferOverflow);
        }
        let flags = if self.non_critical { MASK_NON_CRITICAL } else { 0 }
            | if self.forwardable { MASK_FORWARD } else { 0 };

        if self.tag <= u16::from(MASK_TLV8_TAG) && length <= 0xff {
            out.push(flags | self.tag as u8);
            out.push(length as u8);
        } else {
            out.push(MASK_TLV16 | flags | (self.tag >> 8) as u8);
            out.push((self.tag & 0xff) as u8);
            out.push((length >> 8) as u8);
            out.push((length & 0xff) as u8);
        }
        self.write_payload_to(out)
    }

    fn write_payload_to(&self, out: &mut Vec<u8>) -> KsiResult<()> {
        match &self.payload {
            TlvPayload::Raw(bytes) => out.extend_from_slice(bytes),
            TlvPayload::Nested(children) => {
                for child in children {
                    child.write_to(out)?;
                }
            }
        }
        Ok(())
    }

    /// Renders a human-readable multi-line dump. Never a verification
    /// input; intended for logs and error reports.
    pub fn to_string_indented(&self, indent: usize) -> String {
        let mut out = String::new();
        self.stringify(indent, &mut out);
        out
    }

    fn stringify(&self, indent: usize, out: &mut String) {
        if indent != 0 {
            let _ = write!(out, "\n{:indent$}", "", indent = indent);
        }
        if self.tag > 0xff {
            let _ = write!(out, "TLV[{:#06x}]", self.tag);
        } else {
            let _ = write!(out, "TLV[{:#04x}]", self.tag);
        }
        let _ = write!(
            out,
            " {} {}",
            if self.non_critical { 'N' } else { '-' },
            if self.forwardable { 'F' } else { '-' }
        );
        match &self.payload {
            TlvPayload::Raw(bytes) => {
                let _ = write!(out, " len = {} : {}", bytes.len(), hex::encode(bytes));
            }
            TlvPayload::Nested(children) => {
                out.push(':');
                for child in children {
                    child.stringify(indent + 2, out);
                }
            }
        }
    }
}

impl fmt::Display for Tlv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_indented(0))
    }
}
