//! Canonical MessagePack encoder.

use super::value::Value;
use bytes::{BufMut, Bytes, BytesMut};

/// Writes MessagePack tokens into an in-memory buffer.
///
/// All integer and length headers use the shortest available encoding, which
/// makes the output canonical: equal logical input produces equal bytes.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// Appends raw bytes without any tag. Used for format magic prefixes.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn nil(&mut self) -> &mut Self {
        self.buf.put_u8(0xc0);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.buf.put_u8(if v { 0xc3 } else { 0xc2 });
        self
    }

    /// Writes an unsigned integer in its shortest form.
    pub fn uint(&mut self, v: u64) -> &mut Self {
        match v {
            0..=0x7f => self.buf.put_u8(v as u8),
            0x80..=0xff => {
                self.buf.put_u8(0xcc);
                self.buf.put_u8(v as u8);
            }
            0x100..=0xffff => {
                self.buf.put_u8(0xcd);
                self.buf.put_u16(v as u16);
            }
            0x1_0000..=0xffff_ffff => {
                self.buf.put_u8(0xce);
                self.buf.put_u32(v as u32);
            }
            _ => {
                self.buf.put_u8(0xcf);
                self.buf.put_u64(v);
            }
        }
        self
    }

    /// Writes a signed integer in its shortest form. Non-negative values are
    /// written through [`Encoder::uint`].
    pub fn int(&mut self, v: i64) -> &mut Self {
        if v >= 0 {
            return self.uint(v as u64);
        }
        if v >= -32 {
            self.buf.put_u8(v as u8);
        } else if v >= i64::from(i8::MIN) {
            self.buf.put_u8(0xd0);
            self.buf.put_i8(v as i8);
        } else if v >= i64::from(i16::MIN) {
            self.buf.put_u8(0xd1);
            self.buf.put_i16(v as i16);
        } else if v >= i64::from(i32::MIN) {
            self.buf.put_u8(0xd2);
            self.buf.put_i32(v as i32);
        } else {
            self.buf.put_u8(0xd3);
            self.buf.put_i64(v);
        }
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.put_u8(0xcb);
        self.buf.put_f64(v);
        self
    }

    pub fn str(&mut self, v: &str) -> &mut Self {
        let len = v.len();
        match len {
            0..=31 => self.buf.put_u8(0xa0 | len as u8),
            32..=0xff => {
                self.buf.put_u8(0xd9);
                self.buf.put_u8(len as u8);
            }
            0x100..=0xffff => {
                self.buf.put_u8(0xda);
                self.buf.put_u16(len as u16);
            }
            _ => {
                assert!(len <= u32::MAX as usize, "string too long for msgpack");
                self.buf.put_u8(0xdb);
                self.buf.put_u32(len as u32);
            }
        }
        self.buf.put_slice(v.as_bytes());
        self
    }

    pub fn bin(&mut self, v: &[u8]) -> &mut Self {
        let len = v.len();
        match len {
            0..=0xff => {
                self.buf.put_u8(0xc4);
                self.buf.put_u8(len as u8);
            }
            0x100..=0xffff => {
                self.buf.put_u8(0xc5);
                self.buf.put_u16(len as u16);
            }
            _ => {
                assert!(len <= u32::MAX as usize, "byte string too long for msgpack");
                self.buf.put_u8(0xc6);
                self.buf.put_u32(len as u32);
            }
        }
        self.buf.put_slice(v);
        self
    }

    /// Writes an array header; the caller emits `n` elements afterwards.
    pub fn array_len(&mut self, n: usize) -> &mut Self {
        match n {
            0..=15 => self.buf.put_u8(0x90 | n as u8),
            16..=0xffff => {
                self.buf.put_u8(0xdc);
                self.buf.put_u16(n as u16);
            }
            _ => {
                assert!(n <= u32::MAX as usize, "array too long for msgpack");
                self.buf.put_u8(0xdd);
                self.buf.put_u32(n as u32);
            }
        }
        self
    }

    /// Writes a map header; the caller emits `n` key/value pairs afterwards.
    pub fn map_len(&mut self, n: usize) -> &mut Self {
        match n {
            0..=15 => self.buf.put_u8(0x80 | n as u8),
            16..=0xffff => {
                self.buf.put_u8(0xde);
                self.buf.put_u16(n as u16);
            }
            _ => {
                assert!(n <= u32::MAX as usize, "map too long for msgpack");
                self.buf.put_u8(0xdf);
                self.buf.put_u32(n as u32);
            }
        }
        self
    }

    /// Writes a complete value tree.
    pub fn value(&mut self, v: &Value) -> &mut Self {
        match v {
            Value::Nil => self.nil(),
            Value::Bool(b) => self.bool(*b),
            Value::Uint(n) => self.uint(*n),
            Value::Int(n) => self.int(*n),
            Value::F64(n) => self.f64(*n),
            Value::Str(s) => self.str(s),
            Value::Bin(b) => self.bin(b),
            Value::Array(items) => {
                self.array_len(items.len());
                for item in items {
                    self.value(item);
                }
                self
            }
            Value::Map(entries) => {
                self.map_len(entries.len());
                for (k, val) in entries {
                    self.value(k);
                    self.value(val);
                }
                self
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(f: impl FnOnce(&mut Encoder)) -> Vec<u8> {
        let mut enc = Encoder::new();
        f(&mut enc);
        enc.into_bytes().to_vec()
    }

    #[test]
    fn uint_shortest_forms() {
        assert_eq!(bytes_of(|e| {
            e.uint(0);
        }), vec![0x00]);
        assert_eq!(bytes_of(|e| {
            e.uint(127);
        }), vec![0x7f]);
        assert_eq!(bytes_of(|e| {
            e.uint(128);
        }), vec![0xcc, 0x80]);
        assert_eq!(bytes_of(|e| {
            e.uint(256);
        }), vec![0xcd, 0x01, 0x00]);
        assert_eq!(
            bytes_of(|e| {
                e.uint(0x1_0000);
            }),
            vec![0xce, 0x00, 0x01, 0x00, 0x00]
        );
        assert_eq!(
            bytes_of(|e| {
                e.uint(0x1_0000_0000);
            }),
            vec![0xcf, 0, 0, 0, 1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn int_forms() {
        assert_eq!(bytes_of(|e| {
            e.int(-1);
        }), vec![0xff]);
        assert_eq!(bytes_of(|e| {
            e.int(-32);
        }), vec![0xe0]);
        assert_eq!(bytes_of(|e| {
            e.int(-33);
        }), vec![0xd0, 0xdf]);
        assert_eq!(bytes_of(|e| {
            e.int(-300);
        }), vec![0xd1, 0xfe, 0xd4]);
        // Non-negative inputs normalize to the uint form.
        assert_eq!(bytes_of(|e| {
            e.int(5);
        }), vec![0x05]);
    }

    #[test]
    fn str_and_bin_headers() {
        assert_eq!(bytes_of(|e| {
            e.str("");
        }), vec![0xa0]);
        assert_eq!(bytes_of(|e| {
            e.str("ab");
        }), vec![0xa2, b'a', b'b']);
        let long = "x".repeat(32);
        assert_eq!(&bytes_of(|e| {
            e.str(&long);
        })[..2], &[0xd9, 32]);
        assert_eq!(bytes_of(|e| {
            e.bin(&[1, 2]);
        }), vec![0xc4, 2, 1, 2]);
    }

    #[test]
    fn container_headers() {
        assert_eq!(bytes_of(|e| {
            e.map_len(0);
        }), vec![0x80]);
        assert_eq!(bytes_of(|e| {
            e.array_len(3);
        }), vec![0x93]);
        assert_eq!(bytes_of(|e| {
            e.map_len(16);
        }), vec![0xde, 0x00, 0x10]);
        assert_eq!(bytes_of(|e| {
            e.array_len(16);
        }), vec![0xdc, 0x00, 0x10]);
    }
}
