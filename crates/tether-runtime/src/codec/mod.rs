//! Byte stream codec and value converters
//!
//! All structured values cross the boundary as big-endian byte streams held in
//! [`ForeignBuffer`](crate::ffi::buffer::ForeignBuffer)s.

pub mod converter;
pub mod stream;
pub mod time;

pub use converter::{
    lift_from_buffer, lift_string, lower_into_buffer, BoolConverter, BytesConverter,
    F32Converter, F64Converter, FfiConverter, I16Converter, I32Converter, I64Converter,
    I8Converter, MapConverter, OptionalConverter, SequenceConverter, StringConverter,
    U16Converter, U32Converter, U64Converter, U8Converter, UnitConverter,
};
pub use stream::{StreamReader, StreamWriter};
pub use time::{DurationConverter, TimestampConverter};
