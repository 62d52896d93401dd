//! Timestamp and duration converters
//!
//! Timestamps travel as `i64` seconds plus `u32` nanoseconds, with the sign on
//! the seconds field and the nanoseconds measured away from the epoch. Points
//! in the open interval (-1s, 0s) have a seconds field of 0 and therefore
//! decode as positive offsets; that gap is part of the wire format.

use crate::codec::converter::{lift_from_buffer, lower_into_buffer, FfiConverter};
use crate::codec::stream::{StreamReader, StreamWriter};
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::buffer::{BufferApi, ForeignBuffer};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

const NANOS_PER_SECOND: u32 = 1_000_000_000;

fn check_nanos(nanos: u32) -> BridgeResult<()> {
    if nanos >= NANOS_PER_SECOND {
        return Err(BridgeError::internal(format!(
            "nanosecond field out of range: {}",
            nanos
        )));
    }
    Ok(())
}

/// `chrono::DateTime<Utc>` as sign-on-seconds plus magnitude nanoseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampConverter;

impl TimestampConverter {
    /// Split into the `(seconds, nanoseconds)` wire pair
    pub fn split(value: &DateTime<Utc>) -> (i64, u32) {
        let delta = value.signed_duration_since(DateTime::UNIX_EPOCH);
        if delta < TimeDelta::zero() {
            let magnitude = -delta;
            (-magnitude.num_seconds(), magnitude.subsec_nanos() as u32)
        } else {
            (delta.num_seconds(), delta.subsec_nanos() as u32)
        }
    }

    /// Rebuild from the `(seconds, nanoseconds)` wire pair
    pub fn join(seconds: i64, nanos: u32) -> BridgeResult<DateTime<Utc>> {
        check_nanos(nanos)?;
        let sign = if seconds < 0 { -1 } else { 1 };
        DateTime::from_timestamp(seconds, 0)
            .and_then(|whole| whole.checked_add_signed(TimeDelta::nanoseconds(sign * nanos as i64)))
            .ok_or_else(|| {
                BridgeError::internal(format!("timestamp out of range: {}s {}ns", seconds, nanos))
            })
    }
}

impl FfiConverter for TimestampConverter {
    type Value = DateTime<Utc>;
    type Ffi = ForeignBuffer;

    fn lift(&self, api: &BufferApi, value: ForeignBuffer) -> BridgeResult<DateTime<Utc>> {
        lift_from_buffer(self, api, value)
    }

    fn lower(&self, api: &BufferApi, value: &DateTime<Utc>) -> BridgeResult<ForeignBuffer> {
        lower_into_buffer(self, api, value)
    }

    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<DateTime<Utc>> {
        let seconds = stream.read_i64()?;
        let nanos = stream.read_u32()?;
        Self::join(seconds, nanos)
    }

    fn write(&self, value: &DateTime<Utc>, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        let (seconds, nanos) = Self::split(value);
        stream.write_i64(seconds)?;
        stream.write_u32(nanos)
    }

    fn allocation_size(&self, _value: &DateTime<Utc>) -> usize {
        12
    }
}

/// `std::time::Duration` as `u64` seconds plus `u32` nanoseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationConverter;

impl FfiConverter for DurationConverter {
    type Value = Duration;
    type Ffi = ForeignBuffer;

    fn lift(&self, api: &BufferApi, value: ForeignBuffer) -> BridgeResult<Duration> {
        lift_from_buffer(self, api, value)
    }

    fn lower(&self, api: &BufferApi, value: &Duration) -> BridgeResult<ForeignBuffer> {
        lower_into_buffer(self, api, value)
    }

    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<Duration> {
        let seconds = stream.read_u64()?;
        let nanos = stream.read_u32()?;
        check_nanos(nanos)?;
        Ok(Duration::new(seconds, nanos))
    }

    fn write(&self, value: &Duration, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        stream.write_u64(value.as_secs())?;
        stream.write_u32(value.subsec_nanos())
    }

    fn allocation_size(&self, _value: &Duration) -> usize {
        12
    }
}
