// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal DER (ITU-T X.690) reader and writer.
//
// Covers exactly the universal types the Time-Stamp Protocol needs. The
// reader is strict: indefinite lengths, non-minimal lengths, high-tag-number
// forms, truncated values and trailing bytes are all rejected, so anything
// that parses has a single canonical encoding.
//
// TLV layout:
//
// ```text
// tag:     1 byte  (class | constructed | number, number < 31)
// length:  1 byte if < 0x80, else 0x80|n followed by n big-endian bytes
// content: length bytes
// ```

use std::fmt;

use notarium_core::error::{NotariumError, ProtocolReason};

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_UTF8_STRING: u8 = 0x0C;
pub const TAG_GENERALIZED_TIME: u8 = 0x18;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;
/// `[0]` constructed (EXPLICIT tagging or IMPLICIT constructed types).
pub const TAG_CONTEXT_0: u8 = 0xA0;
/// `[1]` constructed.
pub const TAG_CONTEXT_1: u8 = 0xA1;

/// Longest length prefix we accept (4 bytes, i.e. < 4 GiB of content).
const MAX_LENGTH_OCTETS: usize = 4;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A structural DER problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerError(pub String);

impl DerError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for DerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DerError {}

impl From<DerError> for NotariumError {
    fn from(e: DerError) -> Self {
        NotariumError::protocol(ProtocolReason::MalformedDer, e.0)
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Builder for DER structures.
///
/// Constructed values are written through closures so nesting in code
/// mirrors nesting on the wire.
#[derive(Debug, Default)]
pub struct DerWriter {
    buf: Vec<u8>,
}

impl DerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a TLV with the given tag and content.
    pub fn tlv(&mut self, tag: u8, content: &[u8]) -> &mut Self {
        self.buf.push(tag);
        push_length(&mut self.buf, content.len());
        self.buf.extend_from_slice(content);
        self
    }

    /// Write a constructed value whose content is produced by `f`.
    pub fn constructed(&mut self, tag: u8, f: impl FnOnce(&mut DerWriter)) -> &mut Self {
        let mut inner = DerWriter::new();
        f(&mut inner);
        self.tlv(tag, &inner.buf)
    }

    pub fn sequence(&mut self, f: impl FnOnce(&mut DerWriter)) -> &mut Self {
        self.constructed(TAG_SEQUENCE, f)
    }

    pub fn integer_u64(&mut self, value: u64) -> &mut Self {
        self.tlv(TAG_INTEGER, &minimal_unsigned(&value.to_be_bytes()))
    }

    pub fn boolean(&mut self, value: bool) -> &mut Self {
        self.tlv(TAG_BOOLEAN, &[if value { 0xFF } else { 0x00 }])
    }

    pub fn null(&mut self) -> &mut Self {
        self.tlv(TAG_NULL, &[])
    }

    pub fn octet_string(&mut self, bytes: &[u8]) -> &mut Self {
        self.tlv(TAG_OCTET_STRING, bytes)
    }

    /// Write an OBJECT IDENTIFIER from its encoded content bytes.
    pub fn oid(&mut self, encoded: &[u8]) -> &mut Self {
        self.tlv(TAG_OID, encoded)
    }

    pub fn utf8_string(&mut self, s: &str) -> &mut Self {
        self.tlv(TAG_UTF8_STRING, s.as_bytes())
    }

    pub fn generalized_time(&mut self, s: &str) -> &mut Self {
        self.tlv(TAG_GENERALIZED_TIME, s.as_bytes())
    }

    /// Append an already-encoded TLV verbatim.
    pub fn raw(&mut self, der: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(der);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

fn push_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    buf.push(0x80 | significant.len() as u8);
    buf.extend_from_slice(significant);
}

/// Minimal two's-complement content for a non-negative integer given as
/// big-endian magnitude bytes.
///
/// Leading zero bytes are stripped; a single 0x00 is prepended when the top
/// bit would otherwise read as a sign bit. Zero encodes as `[0x00]`.
pub fn minimal_unsigned(magnitude: &[u8]) -> Vec<u8> {
    let skip = magnitude.iter().take_while(|b| **b == 0).count();
    let significant = &magnitude[skip..];
    let mut out = Vec::with_capacity(significant.len() + 1);
    if significant.first().is_none_or(|b| b & 0x80 != 0) {
        out.push(0x00);
    }
    out.extend_from_slice(significant);
    out
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// One decoded TLV, borrowing from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub content: &'a [u8],
    /// The complete encoding including tag and length.
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Reader over this value's content (for constructed types).
    pub fn reader(&self) -> DerReader<'a> {
        DerReader::new(self.content)
    }

    /// Interpret as a non-negative INTEGER that fits in a `u64`.
    ///
    /// `Ok(None)` for negative or oversized values.
    pub fn as_u64(&self) -> Result<Option<u64>, DerError> {
        self.expect_tag(TAG_INTEGER)?;
        integer_as_u64(self.content)
    }

    pub fn as_bool(&self) -> Result<bool, DerError> {
        self.expect_tag(TAG_BOOLEAN)?;
        match self.content {
            [0x00] => Ok(false),
            [0xFF] => Ok(true),
            other => Err(DerError::new(format!(
                "BOOLEAN must be a single 0x00 or 0xFF byte, got {other:02x?}"
            ))),
        }
    }

    pub fn as_utf8(&self) -> Result<&'a str, DerError> {
        self.expect_tag(TAG_UTF8_STRING)?;
        std::str::from_utf8(self.content).map_err(|e| DerError::new(format!("UTF8String: {e}")))
    }

    fn expect_tag(&self, tag: u8) -> Result<(), DerError> {
        if self.tag == tag {
            Ok(())
        } else {
            Err(DerError::new(format!(
                "expected tag 0x{tag:02X}, found 0x{:02X}",
                self.tag
            )))
        }
    }
}

/// Sequential reader over concatenated TLVs.
#[derive(Debug, Clone)]
pub struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read the next TLV whatever its tag.
    pub fn read_any(&mut self) -> Result<Tlv<'a>, DerError> {
        let start = self.pos;
        let tag = *self
            .data
            .get(self.pos)
            .ok_or_else(|| DerError::new("unexpected end of input (tag)"))?;
        if tag & 0x1F == 0x1F {
            return Err(DerError::new(format!(
                "high-tag-number form not supported (tag 0x{tag:02X})"
            )));
        }
        self.pos += 1;

        let len = self.read_length()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                DerError::new(format!(
                    "truncated value: tag 0x{tag:02X} declares {len} bytes, {} available",
                    self.data.len() - self.pos
                ))
            })?;

        let content = &self.data[self.pos..end];
        self.pos = end;
        Ok(Tlv {
            tag,
            content,
            raw: &self.data[start..end],
        })
    }

    /// Read the next TLV, which must carry `tag`.
    pub fn read(&mut self, tag: u8) -> Result<Tlv<'a>, DerError> {
        match self.peek_tag() {
            Some(found) if found == tag => self.read_any(),
            Some(found) => Err(DerError::new(format!(
                "expected tag 0x{tag:02X}, found 0x{found:02X}"
            ))),
            None => Err(DerError::new(format!(
                "expected tag 0x{tag:02X}, found end of input"
            ))),
        }
    }

    /// Read the next TLV only if it carries `tag`.
    pub fn read_optional(&mut self, tag: u8) -> Result<Option<Tlv<'a>>, DerError> {
        if self.peek_tag() == Some(tag) {
            self.read_any().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Fail if anything is left unread.
    pub fn finish(&self) -> Result<(), DerError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DerError::new(format!(
                "{} trailing byte(s) after structure",
                self.data.len() - self.pos
            )))
        }
    }

    fn read_length(&mut self) -> Result<usize, DerError> {
        let first = *self
            .data
            .get(self.pos)
            .ok_or_else(|| DerError::new("unexpected end of input (length)"))?;
        self.pos += 1;

        if first < 0x80 {
            return Ok(first as usize);
        }
        if first == 0x80 {
            return Err(DerError::new("indefinite length is not allowed in DER"));
        }

        let n = (first & 0x7F) as usize;
        if n > MAX_LENGTH_OCTETS {
            return Err(DerError::new(format!("length uses {n} octets")));
        }
        let bytes = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or_else(|| DerError::new("truncated length"))?;
        self.pos += n;

        if bytes[0] == 0 {
            return Err(DerError::new("non-minimal length encoding"));
        }
        let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        if len < 0x80 {
            return Err(DerError::new("long-form length used for short value"));
        }
        Ok(len)
    }
}

/// Parse `data` as exactly one TLV with the given tag.
pub fn parse_single(data: &[u8], tag: u8) -> Result<Tlv<'_>, DerError> {
    let mut reader = DerReader::new(data);
    let tlv = reader.read(tag)?;
    reader.finish()?;
    Ok(tlv)
}

// ---------------------------------------------------------------------------
// INTEGER helpers
// ---------------------------------------------------------------------------

/// Decode INTEGER content as a `u64`, rejecting non-minimal encodings.
pub fn integer_as_u64(content: &[u8]) -> Result<Option<u64>, DerError> {
    check_minimal_integer(content)?;
    if content[0] & 0x80 != 0 {
        return Ok(None);
    }
    let magnitude = if content[0] == 0 { &content[1..] } else { content };
    if magnitude.len() > 8 {
        return Ok(None);
    }
    Ok(Some(
        magnitude.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64),
    ))
}

/// Reject empty or redundantly padded INTEGER content.
pub fn check_minimal_integer(content: &[u8]) -> Result<(), DerError> {
    match content {
        [] => Err(DerError::new("empty INTEGER")),
        [0x00, next, ..] if next & 0x80 == 0 => Err(DerError::new("non-minimal INTEGER")),
        [0xFF, next, ..] if next & 0x80 != 0 => Err(DerError::new("non-minimal INTEGER")),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// OBJECT IDENTIFIER helpers
// ---------------------------------------------------------------------------

/// Encode a dotted OID (e.g. `"2.16.840.1.101.3.4.2.1"`) to content bytes.
pub fn encode_oid(dotted: &str) -> Result<Vec<u8>, DerError> {
    let arcs = dotted
        .split('.')
        .map(|arc| {
            arc.parse::<u64>()
                .map_err(|_| DerError::new(format!("invalid OID arc '{arc}' in '{dotted}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if arcs.len() < 2 {
        return Err(DerError::new(format!("OID '{dotted}' needs at least two arcs")));
    }
    if arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(DerError::new(format!("OID '{dotted}' has invalid leading arcs")));
    }

    let first = arcs[0]
        .checked_mul(40)
        .and_then(|v| v.checked_add(arcs[1]))
        .ok_or_else(|| DerError::new(format!("OID '{dotted}' overflows")))?;

    let mut out = Vec::new();
    push_base128(&mut out, first);
    for arc in &arcs[2..] {
        push_base128(&mut out, *arc);
    }
    Ok(out)
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = [0u8; 10];
    let mut n = 0;
    loop {
        groups[n] = (value & 0x7F) as u8;
        n += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let continuation = if i > 0 { 0x80 } else { 0x00 };
        out.push(groups[i] | continuation);
    }
}

/// Decode OID content bytes to dotted form.
pub fn decode_oid(content: &[u8]) -> Result<String, DerError> {
    if content.is_empty() {
        return Err(DerError::new("empty OBJECT IDENTIFIER"));
    }
    let mut arcs: Vec<u64> = Vec::new();
    let mut value: u64 = 0;
    let mut in_arc = false;
    for &byte in content {
        if !in_arc && byte == 0x80 {
            return Err(DerError::new("non-minimal OID sub-identifier"));
        }
        if value > (u64::MAX >> 7) {
            return Err(DerError::new("OID sub-identifier overflows"));
        }
        value = (value << 7) | (byte & 0x7F) as u64;
        in_arc = byte & 0x80 != 0;
        if !in_arc {
            if arcs.is_empty() {
                let (a, b) = match value {
                    0..=39 => (0, value),
                    40..=79 => (1, value - 40),
                    _ => (2, value - 80),
                };
                arcs.push(a);
                arcs.push(b);
            } else {
                arcs.push(value);
            }
            value = 0;
        }
    }
    if in_arc {
        return Err(DerError::new("truncated OID sub-identifier"));
    }
    Ok(arcs
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_len(len: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        push_length(&mut buf, len);
        buf
    }

    #[test]
    fn length_short_and_long_forms() {
        assert_eq!(encode_len(0), [0x00]);
        assert_eq!(encode_len(0x7F), [0x7F]);
        assert_eq!(encode_len(0x80), [0x81, 0x80]);
        assert_eq!(encode_len(0xFF), [0x81, 0xFF]);
        assert_eq!(encode_len(0x100), [0x82, 0x01, 0x00]);
    }

    #[test]
    fn long_values_read_back() {
        let content = vec![0x42u8; 300];
        let mut w = DerWriter::new();
        w.octet_string(&content);
        let der = w.finish();
        assert_eq!(&der[..4], &[TAG_OCTET_STRING, 0x82, 0x01, 0x2C]);

        let tlv = parse_single(&der, TAG_OCTET_STRING).unwrap();
        assert_eq!(tlv.content, &content[..]);
        assert_eq!(tlv.raw, &der[..]);
    }

    #[test]
    fn integer_minimal_encodings() {
        let enc = |v: u64| {
            let mut w = DerWriter::new();
            w.integer_u64(v);
            w.finish()
        };
        assert_eq!(enc(0), [0x02, 0x01, 0x00]);
        assert_eq!(enc(127), [0x02, 0x01, 0x7F]);
        assert_eq!(enc(128), [0x02, 0x02, 0x00, 0x80]);
        assert_eq!(enc(256), [0x02, 0x02, 0x01, 0x00]);
        assert_eq!(
            enc(u64::MAX),
            [0x02, 0x09, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn integer_decoding() {
        assert_eq!(integer_as_u64(&[0x00]).unwrap(), Some(0));
        assert_eq!(integer_as_u64(&[0x00, 0x80]).unwrap(), Some(128));
        assert_eq!(
            integer_as_u64(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap(),
            Some(u64::MAX)
        );
        // Negative.
        assert_eq!(integer_as_u64(&[0x80]).unwrap(), None);
        // 2^64 does not fit.
        assert_eq!(
            integer_as_u64(&[0x01, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap(),
            None
        );
        assert!(integer_as_u64(&[]).is_err());
        assert!(integer_as_u64(&[0x00, 0x01]).is_err());
        assert!(integer_as_u64(&[0xFF, 0x80]).is_err());
    }

    #[test]
    fn rejects_indefinite_length() {
        let err = parse_single(&[0x30, 0x80, 0x00, 0x00], TAG_SEQUENCE).unwrap_err();
        assert!(err.0.contains("indefinite"));
    }

    #[test]
    fn rejects_non_minimal_length() {
        assert!(parse_single(&[0x04, 0x81, 0x05, 1, 2, 3, 4, 5], TAG_OCTET_STRING).is_err());
        assert!(parse_single(&[0x04, 0x82, 0x00, 0x81], TAG_OCTET_STRING).is_err());
    }

    #[test]
    fn rejects_truncation_and_trailing_bytes() {
        assert!(parse_single(&[0x04, 0x05, 1, 2], TAG_OCTET_STRING).is_err());
        assert!(parse_single(&[0x04, 0x01, 1, 0xEE], TAG_OCTET_STRING).is_err());
        assert!(parse_single(&[], TAG_OCTET_STRING).is_err());
    }

    #[test]
    fn rejects_high_tag_numbers() {
        assert!(DerReader::new(&[0x1F, 0x81, 0x00, 0x00]).read_any().is_err());
    }

    #[test]
    fn wrong_tag_is_reported() {
        let err = parse_single(&[0x05, 0x00], TAG_INTEGER).unwrap_err();
        assert!(err.0.contains("0x02"));
    }

    #[test]
    fn booleans_are_strict() {
        let tlv = parse_single(&[0x01, 0x01, 0xFF], TAG_BOOLEAN).unwrap();
        assert!(tlv.as_bool().unwrap());
        let tlv = parse_single(&[0x01, 0x01, 0x01], TAG_BOOLEAN).unwrap();
        assert!(tlv.as_bool().is_err());
    }

    #[test]
    fn sha256_oid_encoding() {
        assert_eq!(
            encode_oid("2.16.840.1.101.3.4.2.1").unwrap(),
            [0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01]
        );
        assert_eq!(
            decode_oid(&[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02]).unwrap(),
            "1.2.840.113549.1.7.2"
        );
    }

    #[test]
    fn oid_validation() {
        assert!(encode_oid("1").is_err());
        assert!(encode_oid("3.1").is_err());
        assert!(encode_oid("1.40").is_err());
        assert!(encode_oid("1.2.x").is_err());
        assert!(decode_oid(&[]).is_err());
        assert!(decode_oid(&[0x2A, 0x86]).is_err());
        assert!(decode_oid(&[0x2A, 0x80, 0x01]).is_err());
    }

    #[test]
    fn nested_structures() {
        let mut w = DerWriter::new();
        w.sequence(|s| {
            s.integer_u64(1);
            s.sequence(|inner| {
                inner.null();
            });
            s.boolean(true);
        });
        let der = w.finish();
        assert_eq!(
            der,
            [0x30, 0x0A, 0x02, 0x01, 0x01, 0x30, 0x02, 0x05, 0x00, 0x01, 0x01, 0xFF]
        );

        let outer = parse_single(&der, TAG_SEQUENCE).unwrap();
        let mut r = outer.reader();
        assert_eq!(r.read(TAG_INTEGER).unwrap().as_u64().unwrap(), Some(1));
        assert!(r.read_optional(TAG_OCTET_STRING).unwrap().is_none());
        let inner = r.read(TAG_SEQUENCE).unwrap();
        assert_eq!(inner.content, [0x05, 0x00]);
        assert!(r.read(TAG_BOOLEAN).unwrap().as_bool().unwrap());
        r.finish().unwrap();
    }
}
