//! Value converters - Rust values ↔ FFI representations
//!
//! Every type that crosses the boundary has a converter with two levels:
//! - `lift` / `lower`: the value ↔ its FFI representation (scalar, pointer,
//!   handle or [`ForeignBuffer`])
//! - `read` / `write`: the value ↔ its embedded encoding inside a byte stream
//!
//! Compound converters hold their element converters by value, so a
//! `SequenceConverter<OptionalConverter<StringConverter>>` is a complete
//! description of how a `Vec<Option<String>>` is marshaled.

use crate::codec::stream::{StreamReader, StreamWriter};
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::buffer::{BufferApi, ForeignBuffer, OwnedBuffer};
use std::collections::HashMap;
use std::hash::Hash;

/// Marshals one Rust type across the boundary
pub trait FfiConverter {
    /// The Rust-side value
    type Value;
    /// The representation passed through the C ABI
    type Ffi;

    /// FFI representation → value (consumes owned FFI resources)
    fn lift(&self, api: &BufferApi, value: Self::Ffi) -> BridgeResult<Self::Value>;

    /// Value → FFI representation
    fn lower(&self, api: &BufferApi, value: &Self::Value) -> BridgeResult<Self::Ffi>;

    /// Decode the embedded encoding from a stream
    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<Self::Value>;

    /// Encode into a stream
    fn write(&self, value: &Self::Value, stream: &mut StreamWriter<'_>) -> BridgeResult<()>;

    /// Upper bound on the bytes `write` produces for `value`
    fn allocation_size(&self, value: &Self::Value) -> usize;
}

/// Serialize `value` into a freshly allocated native buffer
///
/// The buffer is freed again if writing fails.
pub fn lower_into_buffer<C>(
    converter: &C,
    api: &BufferApi,
    value: &C::Value,
) -> BridgeResult<ForeignBuffer>
where
    C: FfiConverter + ?Sized,
{
    let mut buffer = api.alloc(converter.allocation_size(value))?;
    let written = {
        let mut writer = buffer.writer();
        converter.write(value, &mut writer)?;
        writer.position()
    };
    buffer.set_len(written)?;
    Ok(buffer.into_raw())
}

/// Deserialize one value from a native buffer and free it
///
/// Bytes left over after the value are a protocol violation.
pub fn lift_from_buffer<C>(
    converter: &C,
    api: &BufferApi,
    buffer: ForeignBuffer,
) -> BridgeResult<C::Value>
where
    C: FfiConverter + ?Sized,
{
    let owned = OwnedBuffer::from_raw(*api, buffer);
    let value = {
        let mut reader = owned.reader();
        let value = converter.read(&mut reader)?;
        if reader.has_remaining() {
            return Err(BridgeError::internal(format!(
                "junk remaining in buffer after lifting: {} bytes",
                reader.remaining()
            )));
        }
        value
    };
    owned.free()?;
    Ok(value)
}

/// Lift a top-level string buffer: `len` is the byte count, no prefix
pub fn lift_string(api: &BufferApi, buffer: ForeignBuffer) -> BridgeResult<String> {
    let owned = OwnedBuffer::from_raw(*api, buffer);
    let value = decode_utf8(owned.as_slice())?;
    owned.free()?;
    Ok(value)
}

fn decode_utf8(bytes: &[u8]) -> BridgeResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| BridgeError::internal(format!("invalid UTF-8 in string: {}", e)))
}

fn read_count(stream: &mut StreamReader<'_>) -> BridgeResult<usize> {
    let count = stream.read_i32()?;
    usize::try_from(count)
        .map_err(|_| BridgeError::internal(format!("negative length prefix: {}", count)))
}

fn write_count(count: usize, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
    let count = i32::try_from(count)
        .map_err(|_| BridgeError::internal(format!("length {} exceeds i32::MAX", count)))?;
    stream.write_i32(count)
}

macro_rules! scalar_converter {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $read:ident, $write:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl FfiConverter for $name {
            type Value = $ty;
            type Ffi = $ty;

            fn lift(&self, _api: &BufferApi, value: $ty) -> BridgeResult<$ty> {
                Ok(value)
            }

            fn lower(&self, _api: &BufferApi, value: &$ty) -> BridgeResult<$ty> {
                Ok(*value)
            }

            fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<$ty> {
                stream.$read()
            }

            fn write(&self, value: &$ty, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
                stream.$write(*value)
            }

            fn allocation_size(&self, _value: &$ty) -> usize {
                std::mem::size_of::<$ty>()
            }
        }
    };
}

scalar_converter!(U8Converter, u8, read_u8, write_u8);
scalar_converter!(U16Converter, u16, read_u16, write_u16);
scalar_converter!(U32Converter, u32, read_u32, write_u32);
scalar_converter!(U64Converter, u64, read_u64, write_u64);
scalar_converter!(I8Converter, i8, read_i8, write_i8);
scalar_converter!(I16Converter, i16, read_i16, write_i16);
scalar_converter!(I32Converter, i32, read_i32, write_i32);
scalar_converter!(I64Converter, i64, read_i64, write_i64);
scalar_converter!(F32Converter, f32, read_f32, write_f32);
scalar_converter!(F64Converter, f64, read_f64, write_f64);

/// No value: void returns
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitConverter;

impl FfiConverter for UnitConverter {
    type Value = ();
    type Ffi = ();

    fn lift(&self, _api: &BufferApi, _value: ()) -> BridgeResult<()> {
        Ok(())
    }

    fn lower(&self, _api: &BufferApi, _value: &()) -> BridgeResult<()> {
        Ok(())
    }

    fn read(&self, _stream: &mut StreamReader<'_>) -> BridgeResult<()> {
        Ok(())
    }

    fn write(&self, _value: &(), _stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        Ok(())
    }

    fn allocation_size(&self, _value: &()) -> usize {
        0
    }
}

/// `bool` travels as an `i8` of 0 or 1
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolConverter;

impl BoolConverter {
    fn from_byte(byte: i8) -> BridgeResult<bool> {
        match byte {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(BridgeError::internal(format!(
                "unexpected byte for boolean: {}",
                other
            ))),
        }
    }
}

impl FfiConverter for BoolConverter {
    type Value = bool;
    type Ffi = i8;

    fn lift(&self, _api: &BufferApi, value: i8) -> BridgeResult<bool> {
        Self::from_byte(value)
    }

    fn lower(&self, _api: &BufferApi, value: &bool) -> BridgeResult<i8> {
        Ok(*value as i8)
    }

    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<bool> {
        Self::from_byte(stream.read_i8()?)
    }

    fn write(&self, value: &bool, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        stream.write_i8(*value as i8)
    }

    fn allocation_size(&self, _value: &bool) -> usize {
        1
    }
}

/// UTF-8 strings
///
/// Embedded: `i32` byte length then the bytes. Top level: the buffer's `len`
/// carries the byte count and nothing else is written.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringConverter;

impl FfiConverter for StringConverter {
    type Value = String;
    type Ffi = ForeignBuffer;

    fn lift(&self, api: &BufferApi, value: ForeignBuffer) -> BridgeResult<String> {
        lift_string(api, value)
    }

    fn lower(&self, api: &BufferApi, value: &String) -> BridgeResult<ForeignBuffer> {
        let bytes = value.as_bytes();
        let mut buffer = api.alloc(bytes.len())?;
        buffer.writer().write_bytes(bytes)?;
        buffer.set_len(bytes.len())?;
        Ok(buffer.into_raw())
    }

    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<String> {
        let len = read_count(stream)?;
        decode_utf8(stream.read_bytes(len)?)
    }

    fn write(&self, value: &String, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        write_count(value.len(), stream)?;
        stream.write_bytes(value.as_bytes())
    }

    fn allocation_size(&self, value: &String) -> usize {
        4 + value.len()
    }
}

/// Raw byte arrays: `i32` length then the bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesConverter;

impl FfiConverter for BytesConverter {
    type Value = Vec<u8>;
    type Ffi = ForeignBuffer;

    fn lift(&self, api: &BufferApi, value: ForeignBuffer) -> BridgeResult<Vec<u8>> {
        lift_from_buffer(self, api, value)
    }

    fn lower(&self, api: &BufferApi, value: &Vec<u8>) -> BridgeResult<ForeignBuffer> {
        lower_into_buffer(self, api, value)
    }

    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<Vec<u8>> {
        let len = read_count(stream)?;
        Ok(stream.read_bytes(len)?.to_vec())
    }

    fn write(&self, value: &Vec<u8>, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        write_count(value.len(), stream)?;
        stream.write_bytes(value)
    }

    fn allocation_size(&self, value: &Vec<u8>) -> usize {
        4 + value.len()
    }
}

/// `Option<T>`: a 0/1 discriminant byte, then the value when present
#[derive(Debug, Clone, Default)]
pub struct OptionalConverter<C> {
    inner: C,
}

impl<C> OptionalConverter<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: FfiConverter> FfiConverter for OptionalConverter<C> {
    type Value = Option<C::Value>;
    type Ffi = ForeignBuffer;

    fn lift(&self, api: &BufferApi, value: ForeignBuffer) -> BridgeResult<Self::Value> {
        lift_from_buffer(self, api, value)
    }

    fn lower(&self, api: &BufferApi, value: &Self::Value) -> BridgeResult<ForeignBuffer> {
        lower_into_buffer(self, api, value)
    }

    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<Self::Value> {
        match stream.read_u8()? {
            0 => Ok(None),
            1 => self.inner.read(stream).map(Some),
            other => Err(BridgeError::internal(format!(
                "unexpected optional discriminant: {}",
                other
            ))),
        }
    }

    fn write(&self, value: &Self::Value, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        match value {
            None => stream.write_u8(0),
            Some(inner) => {
                stream.write_u8(1)?;
                self.inner.write(inner, stream)
            }
        }
    }

    fn allocation_size(&self, value: &Self::Value) -> usize {
        1 + value
            .as_ref()
            .map_or(0, |inner| self.inner.allocation_size(inner))
    }
}

/// `Vec<T>`: `i32` count then the elements in order
#[derive(Debug, Clone, Default)]
pub struct SequenceConverter<C> {
    inner: C,
}

impl<C> SequenceConverter<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: FfiConverter> FfiConverter for SequenceConverter<C> {
    type Value = Vec<C::Value>;
    type Ffi = ForeignBuffer;

    fn lift(&self, api: &BufferApi, value: ForeignBuffer) -> BridgeResult<Self::Value> {
        lift_from_buffer(self, api, value)
    }

    fn lower(&self, api: &BufferApi, value: &Self::Value) -> BridgeResult<ForeignBuffer> {
        lower_into_buffer(self, api, value)
    }

    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<Self::Value> {
        let count = read_count(stream)?;
        // Preallocation is capped by the remaining bytes so a hostile count
        // cannot reserve unbounded memory; zero-sized elements grow past it.
        let mut items = Vec::with_capacity(count.min(stream.remaining()));
        for _ in 0..count {
            items.push(self.inner.read(stream)?);
        }
        Ok(items)
    }

    fn write(&self, value: &Self::Value, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        write_count(value.len(), stream)?;
        value.iter().try_for_each(|item| self.inner.write(item, stream))
    }

    fn allocation_size(&self, value: &Self::Value) -> usize {
        4 + value
            .iter()
            .map(|item| self.inner.allocation_size(item))
            .sum::<usize>()
    }
}

/// `HashMap<K, V>`: `i32` count then interleaved keys and values
#[derive(Debug, Clone, Default)]
pub struct MapConverter<K, V> {
    key: K,
    value: V,
}

impl<K, V> MapConverter<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

impl<K, V> FfiConverter for MapConverter<K, V>
where
    K: FfiConverter,
    K::Value: Eq + Hash,
    V: FfiConverter,
{
    type Value = HashMap<K::Value, V::Value>;
    type Ffi = ForeignBuffer;

    fn lift(&self, api: &BufferApi, value: ForeignBuffer) -> BridgeResult<Self::Value> {
        lift_from_buffer(self, api, value)
    }

    fn lower(&self, api: &BufferApi, value: &Self::Value) -> BridgeResult<ForeignBuffer> {
        lower_into_buffer(self, api, value)
    }

    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<Self::Value> {
        let count = read_count(stream)?;
        let mut map = HashMap::with_capacity(count.min(stream.remaining()));
        for _ in 0..count {
            let key = self.key.read(stream)?;
            let value = self.value.read(stream)?;
            map.insert(key, value);
        }
        Ok(map)
    }

    fn write(&self, value: &Self::Value, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        write_count(value.len(), stream)?;
        for (key, item) in value {
            self.key.write(key, stream)?;
            self.value.write(item, stream)?;
        }
        Ok(())
    }

    fn allocation_size(&self, value: &Self::Value) -> usize {
        4 + value
            .iter()
            .map(|(key, item)| self.key.allocation_size(key) + self.value.allocation_size(item))
            .sum::<usize>()
    }
}
