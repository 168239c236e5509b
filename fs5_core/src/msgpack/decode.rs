//! MessagePack decoder over a borrowed byte slice.

use super::value::Value;
use bytes::Bytes;

/// Maximum nesting depth accepted when decoding a value tree. Deep nesting
/// from untrusted input would otherwise recurse without bound.
const MAX_DEPTH: u32 = 128;

/// Errors raised while decoding, carrying the byte offset of the failure.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    #[error("unknown or unsupported tag 0x{tag:02x} at byte {at}")]
    UnknownTag { tag: u8, at: usize },

    #[error("type mismatch at byte {at}: expected {expected}")]
    TypeMismatch { expected: &'static str, at: usize },

    #[error("nesting depth exceeds limit at byte {at}")]
    DepthLimit { at: usize },

    #[error("invalid utf-8 in string at byte {at}")]
    InvalidUtf8 { at: usize },
}

/// Reads MessagePack tokens from a byte slice, tracking the current offset.
#[derive(Debug)]
pub struct Decoder<'b> {
    buf: &'b [u8],
    pos: usize,
}

impl<'b> Decoder<'b> {
    pub fn new(buf: &'b [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset into the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'b [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof(self.buf.len()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn take_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    /// Reads a string token.
    pub fn str(&mut self) -> Result<&'b str, DecodeError> {
        let at = self.pos;
        let tag = self.byte()?;
        let len = match tag {
            0xa0..=0xbf => (tag & 0x1f) as usize,
            0xd9 => self.byte()? as usize,
            0xda => self.take_u16()? as usize,
            0xdb => self.take_u32()? as usize,
            _ => {
                self.pos = at;
                return Err(DecodeError::TypeMismatch {
                    expected: "string",
                    at,
                });
            }
        };
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { at })
    }

    /// Reads a byte-string token.
    pub fn bin(&mut self) -> Result<&'b [u8], DecodeError> {
        let at = self.pos;
        let tag = self.byte()?;
        let len = match tag {
            0xc4 => self.byte()? as usize,
            0xc5 => self.take_u16()? as usize,
            0xc6 => self.take_u32()? as usize,
            _ => {
                self.pos = at;
                return Err(DecodeError::TypeMismatch {
                    expected: "byte string",
                    at,
                });
            }
        };
        self.take(len)
    }

    /// Reads an unsigned integer token.
    pub fn uint(&mut self) -> Result<u64, DecodeError> {
        let at = self.pos;
        match self.value()? {
            Value::Uint(n) => Ok(n),
            _ => {
                self.pos = at;
                Err(DecodeError::TypeMismatch {
                    expected: "unsigned integer",
                    at,
                })
            }
        }
    }

    /// Reads a map header, returning the entry count.
    pub fn map_header(&mut self) -> Result<usize, DecodeError> {
        let at = self.pos;
        let tag = self.byte()?;
        match tag {
            0x80..=0x8f => Ok((tag & 0x0f) as usize),
            0xde => Ok(self.take_u16()? as usize),
            0xdf => Ok(self.take_u32()? as usize),
            _ => {
                self.pos = at;
                Err(DecodeError::TypeMismatch { expected: "map", at })
            }
        }
    }

    /// Reads an array header, returning the element count.
    pub fn array_header(&mut self) -> Result<usize, DecodeError> {
        let at = self.pos;
        let tag = self.byte()?;
        match tag {
            0x90..=0x9f => Ok((tag & 0x0f) as usize),
            0xdc => Ok(self.take_u16()? as usize),
            0xdd => Ok(self.take_u32()? as usize),
            _ => {
                self.pos = at;
                Err(DecodeError::TypeMismatch {
                    expected: "array",
                    at,
                })
            }
        }
    }

    /// Reads a complete value tree.
    pub fn value(&mut self) -> Result<Value, DecodeError> {
        self.value_at_depth(0)
    }

    fn value_at_depth(&mut self, depth: u32) -> Result<Value, DecodeError> {
        let at = self.pos;
        if depth > MAX_DEPTH {
            return Err(DecodeError::DepthLimit { at });
        }
        let tag = self.byte()?;
        let value = match tag {
            0x00..=0x7f => Value::Uint(u64::from(tag)),
            0xe0..=0xff => Value::Int(i64::from(tag as i8)),
            0xc0 => Value::Nil,
            0xc2 => Value::Bool(false),
            0xc3 => Value::Bool(true),
            0xcc => Value::Uint(u64::from(self.byte()?)),
            0xcd => Value::Uint(u64::from(self.take_u16()?)),
            0xce => Value::Uint(u64::from(self.take_u32()?)),
            0xcf => Value::Uint(self.take_u64()?),
            0xd0 => normalize_int(i64::from(self.byte()? as i8)),
            0xd1 => normalize_int(i64::from(self.take_u16()? as i16)),
            0xd2 => normalize_int(i64::from(self.take_u32()? as i32)),
            0xd3 => normalize_int(self.take_u64()? as i64),
            0xca => {
                let bits = self.take_u32()?;
                Value::F64(f64::from(f32::from_bits(bits)))
            }
            0xcb => Value::F64(f64::from_bits(self.take_u64()?)),
            0xa0..=0xbf | 0xd9 | 0xda | 0xdb => {
                self.pos = at;
                Value::Str(self.str()?.to_owned())
            }
            0xc4 | 0xc5 | 0xc6 => {
                self.pos = at;
                Value::Bin(Bytes::copy_from_slice(self.bin()?))
            }
            0x90..=0x9f | 0xdc | 0xdd => {
                self.pos = at;
                let n = self.array_header()?;
                let mut items = Vec::with_capacity(n.min(1024));
                for _ in 0..n {
                    items.push(self.value_at_depth(depth + 1)?);
                }
                Value::Array(items)
            }
            0x80..=0x8f | 0xde | 0xdf => {
                self.pos = at;
                let n = self.map_header()?;
                let mut entries = Vec::with_capacity(n.min(1024));
                for _ in 0..n {
                    let k = self.value_at_depth(depth + 1)?;
                    let v = self.value_at_depth(depth + 1)?;
                    entries.push((k, v));
                }
                Value::Map(entries)
            }
            _ => return Err(DecodeError::UnknownTag { tag, at }),
        };
        Ok(value)
    }
}

/// Signed decode paths normalize non-negative results to `Uint` so that
/// decoded values re-encode canonically.
fn normalize_int(v: i64) -> Value {
    if v >= 0 {
        Value::Uint(v as u64)
    } else {
        Value::Int(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgpack::Encoder;

    fn round_trip(v: &Value) {
        let mut enc = Encoder::new();
        enc.value(v);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(&dec.value().unwrap(), v);
        assert!(dec.is_empty());

        // Canonical: re-encoding the decoded value reproduces the bytes.
        let mut dec = Decoder::new(&bytes);
        let decoded = dec.value().unwrap();
        let mut enc2 = Encoder::new();
        enc2.value(&decoded);
        assert_eq!(enc2.into_bytes(), bytes);
    }

    #[test]
    fn value_round_trips() {
        round_trip(&Value::Nil);
        round_trip(&Value::Bool(true));
        round_trip(&Value::Uint(0));
        round_trip(&Value::Uint(5_050_505_050_505));
        round_trip(&Value::Int(-77));
        round_trip(&Value::Str("file.txt".into()));
        round_trip(&Value::Bin(Bytes::from_static(&[0x1e; 33])));
        round_trip(&Value::Array(vec![
            Value::Uint(1),
            Value::Str("a".into()),
            Value::Map(vec![(Value::Str("2".into()), Value::Uint(9))]),
        ]));
    }

    #[test]
    fn positive_signed_input_normalizes() {
        // int8 encoding of +5 is non-canonical; decoding normalizes it.
        let bytes = [0xd0, 0x05];
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.value().unwrap(), Value::Uint(5));
    }

    #[test]
    fn truncated_input_fails() {
        let bytes = [0xc5, 0x01, 0x00];
        let mut dec = Decoder::new(&bytes);
        assert!(matches!(
            dec.value(),
            Err(DecodeError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn ext_types_are_rejected() {
        let bytes = [0xd4, 0x01, 0x00];
        let mut dec = Decoder::new(&bytes);
        assert_eq!(
            dec.value(),
            Err(DecodeError::UnknownTag { tag: 0xd4, at: 0 })
        );
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let mut bytes = vec![0x91u8; 200];
        bytes.push(0x00);
        let mut dec = Decoder::new(&bytes);
        assert!(matches!(dec.value(), Err(DecodeError::DepthLimit { .. })));
    }
}
