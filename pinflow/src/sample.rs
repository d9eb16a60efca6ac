// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! One unit of media data moving between pins.

use crate::{Error, FormatDescriptor, Result, pool::Lease};

/// Start and optional stop time of a sample, in 100 ns reference units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleTime {
    pub start: i64,
    pub stop: Option<i64>,
}

impl SampleTime {
    pub fn new(start: i64, stop: Option<i64>) -> Self {
        Self { start, stop }
    }

    /// Stop minus start, when a stop time is present.
    pub fn duration(&self) -> Option<i64> {
        self.stop.map(|stop| stop - self.start)
    }
}

/// Per-sample flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleFlags {
    /// Decoding can start at this sample (keyframe).
    pub sync_point: bool,
    /// The sample is needed for decoding but should not be presented.
    pub preroll: bool,
    /// The sample follows a break in the stream (connect, seek, flush).
    pub discontinuity: bool,
}

enum Backing {
    Owned(Vec<u8>),
    Leased(Lease),
}

/// A buffer plus timing and flags.
///
/// A sample is exclusively owned by whichever stage holds it; pushing it
/// downstream moves it. Pool-backed samples return their buffer to the pool
/// when dropped.
pub struct Sample {
    backing: Backing,
    len: usize,
    time: Option<SampleTime>,
    flags: SampleFlags,
    format_change: Option<FormatDescriptor>,
}

impl Sample {
    /// Wraps an owned buffer; the actual length is the whole vector.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            backing: Backing::Owned(data),
            len,
            time: None,
            flags: SampleFlags::default(),
            format_change: None,
        }
    }

    /// Allocates an unpooled, zeroed buffer of `capacity` bytes with an
    /// actual length of zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the buffer cannot be reserved.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| Error::OutOfMemory)?;
        data.resize(capacity, 0);
        let mut sample = Self::from_vec(data);
        sample.len = 0;
        Ok(sample)
    }

    pub(crate) fn leased(lease: Lease) -> Self {
        Self {
            backing: Backing::Leased(lease),
            len: 0,
            time: None,
            flags: SampleFlags::default(),
            format_change: None,
        }
    }

    /// Whether the buffer belongs to a pool.
    pub fn is_pooled(&self) -> bool {
        matches!(self.backing, Backing::Leased(_))
    }

    /// Total buffer size.
    pub fn capacity(&self) -> usize {
        self.buffer().len()
    }

    /// The whole buffer, regardless of the actual length.
    pub fn buffer(&self) -> &[u8] {
        match &self.backing {
            Backing::Owned(data) => data,
            Backing::Leased(lease) => lease.data(),
        }
    }

    /// Mutable access to the whole buffer. Call [`Sample::set_actual_len`]
    /// after writing.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::Owned(data) => data,
            Backing::Leased(lease) => lease.data_mut(),
        }
    }

    /// The valid bytes.
    pub fn payload(&self) -> &[u8] {
        &self.buffer()[..self.len]
    }

    pub fn actual_len(&self) -> usize {
        self.len
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if `len` exceeds the capacity.
    pub fn set_actual_len(&mut self, len: usize) -> Result<()> {
        if len > self.capacity() {
            return Err(Error::InvalidArg(format!(
                "length {} exceeds buffer capacity {}",
                len,
                self.capacity()
            )));
        }
        self.len = len;
        Ok(())
    }

    /// Copies `data` into the buffer and sets the actual length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if `data` does not fit.
    pub fn fill_from(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.capacity() {
            return Err(Error::PoolExhausted);
        }
        self.buffer_mut()[..data.len()].copy_from_slice(data);
        self.len = data.len();
        Ok(())
    }

    pub fn time(&self) -> Option<SampleTime> {
        self.time
    }

    pub fn set_time(&mut self, time: Option<SampleTime>) {
        self.time = time;
    }

    pub fn flags(&self) -> SampleFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut SampleFlags {
        &mut self.flags
    }

    pub fn set_flags(&mut self, flags: SampleFlags) {
        self.flags = flags;
    }

    /// A new format that takes effect with this sample.
    pub fn format_change(&self) -> Option<&FormatDescriptor> {
        self.format_change.as_ref()
    }

    pub fn set_format_change(&mut self, format: Option<FormatDescriptor>) {
        self.format_change = format;
    }

    /// Copies timing, flags and any format change from `other`.
    pub fn copy_attributes_from(&mut self, other: &Sample) {
        self.time = other.time;
        self.flags = other.flags;
        self.format_change = other.format_change.clone();
    }

    /// Builder form of [`Sample::set_time`].
    pub fn with_time(mut self, start: i64, stop: Option<i64>) -> Self {
        self.time = Some(SampleTime::new(start, stop));
        self
    }

    /// Builder form of [`Sample::set_flags`].
    pub fn with_flags(mut self, flags: SampleFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("pooled", &self.is_pooled())
            .field("time", &self.time)
            .field("flags", &self.flags)
            .finish()
    }
}
