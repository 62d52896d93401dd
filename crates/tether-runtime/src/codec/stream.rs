//! Big-endian byte streams over bounded regions
//!
//! `StreamReader` and `StreamWriter` track a cursor over a fixed-length slice.
//! Every access checks the remaining length first; a short read or write fails
//! with [`BridgeError::Underflow`] and leaves the cursor where it was.

use crate::error::{BridgeError, BridgeResult};

macro_rules! read_be {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self) -> BridgeResult<$ty> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                let bytes = self.take(WIDTH)?;
                let mut raw = [0u8; WIDTH];
                raw.copy_from_slice(bytes);
                Ok(<$ty>::from_be_bytes(raw))
            }
        )*
    };
}

macro_rules! write_be {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self, value: $ty) -> BridgeResult<()> {
                self.write_bytes(&value.to_be_bytes())
            }
        )*
    };
}

fn check_remaining(needed: usize, position: usize, len: usize) -> BridgeResult<()> {
    let remaining = len - position;
    if remaining < needed {
        return Err(BridgeError::Underflow { needed, remaining });
    }
    Ok(())
}

/// Reading cursor over a byte region
#[derive(Debug)]
pub struct StreamReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> StreamReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor; positions past the end are rejected
    pub fn set_position(&mut self, position: usize) -> BridgeResult<()> {
        check_remaining(position, 0, self.data.len())?;
        self.position = position;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    fn take(&mut self, count: usize) -> BridgeResult<&'a [u8]> {
        check_remaining(count, self.position, self.data.len())?;
        let data = self.data;
        let start = self.position;
        self.position += count;
        Ok(&data[start..self.position])
    }

    /// Borrow the next `count` bytes
    pub fn read_bytes(&mut self, count: usize) -> BridgeResult<&'a [u8]> {
        self.take(count)
    }

    read_be! {
        read_u8 => u8,
        read_u16 => u16,
        read_u32 => u32,
        read_u64 => u64,
        read_i8 => i8,
        read_i16 => i16,
        read_i32 => i32,
        read_i64 => i64,
    }

    pub fn read_f32(&mut self) -> BridgeResult<f32> {
        self.read_u32().map(f32::from_bits)
    }

    pub fn read_f64(&mut self) -> BridgeResult<f64> {
        self.read_u64().map(f64::from_bits)
    }
}

/// Writing cursor over a byte region of fixed capacity
#[derive(Debug)]
pub struct StreamWriter<'a> {
    data: &'a mut [u8],
    position: usize,
}

impl<'a> StreamWriter<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) -> BridgeResult<()> {
        check_remaining(position, 0, self.data.len())?;
        self.position = position;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    /// Bytes written so far
    pub fn written(&self) -> &[u8] {
        &self.data[..self.position]
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        check_remaining(bytes.len(), self.position, self.data.len())?;
        let end = self.position + bytes.len();
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    write_be! {
        write_u8 => u8,
        write_u16 => u16,
        write_u32 => u32,
        write_u64 => u64,
        write_i8 => i8,
        write_i16 => i16,
        write_i32 => i32,
        write_i64 => i64,
    }

    pub fn write_f32(&mut self, value: f32) -> BridgeResult<()> {
        self.write_u32(value.to_bits())
    }

    pub fn write_f64(&mut self, value: f64) -> BridgeResult<()> {
        self.write_u64(value.to_bits())
    }
}
