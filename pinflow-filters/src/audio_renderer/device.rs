// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, MutexGuard};

use pinflow::{AudioFormat, Error, Result};

/// Playback device contract.
///
/// The renderer drives a device from its receive path and its state
/// changes. Writes run without the filter lock, so a state change can reach
/// the device while a write is blocked; implementations synchronise
/// internally. They buffer what they are given and play it out on their
/// own clock.
pub trait AudioDevice: Send + Sync {
    /// Prepares playback of interleaved PCM in `format`.
    fn open(&self, format: &AudioFormat) -> Result<()>;

    /// Appends interleaved PCM. May block while the device buffer is full.
    fn write(&self, data: &[u8]) -> Result<()>;

    fn play(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    /// Stops playback and drops buffered audio. The device can be opened again.
    fn stop(&self);

    /// Frames played since the last open.
    fn cursor(&self) -> Result<u64>;
}

/// What a [`MemoryDevice`] has been told.
#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    pub format: Option<AudioFormat>,
    pub data: Vec<u8>,
    pub playing: bool,
    pub opens: usize,
    pub stops: usize,
    /// Frames written while paused, played out on the next `play`
    pub queued_frames: u64,
    pub played_frames: u64,
}

/// In-memory device that "plays" audio as soon as it is written while
/// playing. Clones share state, so tests keep one and hand the other to
/// the renderer.
#[derive(Clone, Debug, Default)]
pub struct MemoryDevice {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("Failed to lock memory device: lock poisoned".into()))
    }

    /// A copy of the device state.
    pub fn snapshot(&self) -> Result<MemoryState> {
        Ok(self.lock()?.clone())
    }
}

impl AudioDevice for MemoryDevice {
    fn open(&self, format: &AudioFormat) -> Result<()> {
        if format.block_align() == 0 {
            return Err(Error::InvalidArg("audio format without frame size".into()));
        }
        let mut state = self.lock()?;
        state.format = Some(format.clone());
        state.data.clear();
        state.playing = false;
        state.queued_frames = 0;
        state.played_frames = 0;
        state.opens += 1;
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        let mut state = self.lock()?;
        let block_align = state
            .format
            .as_ref()
            .map(AudioFormat::block_align)
            .ok_or_else(|| Error::InvalidArg("device is not open".into()))?;
        let frames = (data.len() / block_align) as u64;
        state.data.extend_from_slice(data);
        if state.playing {
            state.played_frames += frames;
        } else {
            state.queued_frames += frames;
        }
        Ok(())
    }

    fn play(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.playing = true;
        state.played_frames += std::mem::take(&mut state.queued_frames);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.lock()?.playing = false;
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut state) = self.lock() {
            state.playing = false;
            state.queued_frames = 0;
            state.stops += 1;
        }
    }

    fn cursor(&self) -> Result<u64> {
        Ok(self.lock()?.played_frames)
    }
}
