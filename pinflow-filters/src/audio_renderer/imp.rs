// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use pinflow::{
    AudioFormat, Error, FilterImpl, FilterState, FormatDescriptor, FormatList, Outputs, PinId,
    PinTemplate, Render, Result, Sample, StreamContext, Subtype,
};
use tracing::{debug, info, trace, warn};

use super::device::AudioDevice;

/// Writes whole frames to the device and counts them.
struct DeviceWriter {
    device: Arc<dyn AudioDevice>,
    block_align: usize,
    frames: AtomicU64,
}

impl Render for DeviceWriter {
    fn render(&self, sample: Sample) -> Result<()> {
        let payload = sample.payload();
        let partial = payload.len() % self.block_align;
        if partial != 0 {
            warn!("Dropping {} trailing bytes of a partial frame", partial);
        }
        let whole = payload.len() - partial;
        trace!("Writing {} bytes to the device", whole);
        self.device.write(&payload[..whole])?;
        self.frames
            .fetch_add((whole / self.block_align) as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Interleaved PCM renderer.
///
/// Sample payloads are written to the device as they arrive, outside the
/// filter lock. Entering Running starts playback, entering Paused pauses
/// it, and stopping the filter stops the device.
pub struct AudioRenderer {
    device: Arc<dyn AudioDevice>,
    format: Option<AudioFormat>,
    /// Set at start, kept after stop for the frame count
    writer: Option<Arc<DeviceWriter>>,
    end_of_stream: bool,
}

impl AudioRenderer {
    pub const INPUT: PinId = PinId(0);

    pub fn new(device: impl AudioDevice + 'static) -> Self {
        Self {
            device: Arc::new(device),
            format: None,
            writer: None,
            end_of_stream: false,
        }
    }

    /// Frames the device reports as played.
    pub fn frames_played(&self) -> Result<u64> {
        if self.format.is_none() {
            return Ok(0);
        }
        self.device.cursor()
    }

    /// Frames handed to the device since start.
    pub fn frames_received(&self) -> u64 {
        self.writer
            .as_ref()
            .map_or(0, |writer| writer.frames.load(Ordering::Relaxed))
    }

    /// Whether end-of-stream arrived since start.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }
}

impl FilterImpl for AudioRenderer {
    fn type_name(&self) -> &'static str {
        "audio-renderer"
    }

    fn pin_templates(&self) -> Vec<PinTemplate> {
        vec![PinTemplate::input("in")]
    }

    fn preferred_formats(&self, _pin: PinId, _upstream: Option<&FormatDescriptor>) -> FormatList {
        FormatList::new()
    }

    fn query_accept(
        &self,
        _pin: PinId,
        format: &FormatDescriptor,
        _upstream: Option<&FormatDescriptor>,
    ) -> Result<()> {
        let bits = match format.subtype {
            Subtype::PcmFloat => 32,
            Subtype::PcmS16 => 16,
            _ => return Err(Error::NoAcceptableFormat),
        };
        match format.audio_details() {
            Some(audio)
                if audio.bits_per_sample == bits && audio.channels > 0 && audio.sample_rate > 0 =>
            {
                Ok(())
            }
            _ => Err(Error::NoAcceptableFormat),
        }
    }

    fn start(&mut self, context: &StreamContext) -> Result<()> {
        let format = context
            .format(Self::INPUT)
            .and_then(FormatDescriptor::audio_details)
            .cloned()
            .ok_or(Error::NotConnected)?;
        if format.block_align() == 0 {
            return Err(Error::InvalidArg("audio format without frame size".into()));
        }
        self.device.open(&format)?;
        info!(
            "Rendering {} channels at {} Hz, {} bits",
            format.channels, format.sample_rate, format.bits_per_sample
        );
        self.writer = Some(Arc::new(DeviceWriter {
            device: self.device.clone(),
            block_align: format.block_align(),
            frames: AtomicU64::new(0),
        }));
        self.format = Some(format);
        self.end_of_stream = false;
        Ok(())
    }

    fn activated(&mut self, state: FilterState) -> Result<()> {
        debug!("Device follows {:?}", state);
        match state {
            FilterState::Running => self.device.play(),
            FilterState::Paused => self.device.pause(),
            FilterState::Stopped => Ok(()),
        }
    }

    fn stop(&mut self) {
        if self.format.take().is_some() {
            self.device.stop();
        }
    }

    fn renderer(&self, _pin: PinId) -> Option<Arc<dyn Render>> {
        self.writer
            .clone()
            .map(|writer| writer as Arc<dyn Render>)
    }

    fn end_of_stream(&mut self, _pin: PinId, _outputs: &mut Outputs<'_>) -> Result<()> {
        debug!("End of stream after {} frames", self.frames_received());
        self.end_of_stream = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.end_of_stream = false;
        Ok(())
    }

    fn receive_can_block(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Condvar, Mutex, atomic::AtomicUsize, mpsc},
        time::{Duration, Instant},
    };

    use pinflow::{Filter, Graph};

    use super::*;
    use crate::{AppSource, MemoryDevice};

    /// A device whose writes block until the gate opens.
    #[derive(Clone, Default)]
    struct GatedDevice {
        inner: MemoryDevice,
        gate: Arc<(Mutex<bool>, Condvar)>,
        writes: Arc<AtomicUsize>,
    }

    impl GatedDevice {
        fn set_open(&self, open: bool) {
            *self.gate.0.lock().unwrap() = open;
            self.gate.1.notify_all();
        }
    }

    impl AudioDevice for GatedDevice {
        fn open(&self, format: &AudioFormat) -> Result<()> {
            self.inner.open(format)
        }

        fn write(&self, data: &[u8]) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut open = self.gate.0.lock().unwrap();
            while !*open {
                open = self.gate.1.wait(open).unwrap();
            }
            self.inner.write(data)
        }

        fn play(&self) -> Result<()> {
            self.inner.play()
        }

        fn pause(&self) -> Result<()> {
            self.inner.pause()
        }

        fn stop(&self) {
            self.inner.stop()
        }

        fn cursor(&self) -> Result<u64> {
            self.inner.cursor()
        }
    }

    fn pipeline<D: AudioDevice + Clone + 'static>(
        format: FormatDescriptor,
        device: D,
    ) -> (Filter<AppSource>, Filter<AudioRenderer>, D, Graph) {
        let source = Filter::new("source", AppSource::new(vec![format]));
        let renderer = Filter::new("renderer", AudioRenderer::new(device.clone()));
        let mut graph = Graph::new();
        graph.add(&source);
        graph.add(&renderer);
        graph
            .connect(&source, AppSource::OUTPUT, &renderer, AudioRenderer::INPUT, None)
            .unwrap();
        (source, renderer, device, graph)
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn state_changes_drive_the_device() {
        let pcm = FormatDescriptor::audio(Subtype::PcmFloat, AudioFormat::float(2, 8000));
        let (source, renderer, device, graph) = pipeline(pcm, MemoryDevice::new());

        graph.pause().unwrap();
        source
            .push_output(AppSource::OUTPUT, Sample::from_vec(vec![0; 80]))
            .unwrap();
        wait_until(|| renderer.with_impl(|r| r.frames_received()).unwrap() == 10);
        assert_eq!(renderer.with_impl(|r| r.frames_played()).unwrap().unwrap(), 0);

        graph.run().unwrap();
        assert_eq!(renderer.with_impl(|r| r.frames_played()).unwrap().unwrap(), 10);
        assert!(device.snapshot().unwrap().playing);

        source.push_output_end_of_stream(AppSource::OUTPUT).unwrap();
        wait_until(|| renderer.with_impl(|r| r.is_end_of_stream()).unwrap());

        graph.stop().unwrap();
        let state = device.snapshot().unwrap();
        assert_eq!((state.opens, state.stops), (1, 1));
        assert_eq!(state.data.len(), 80);
        assert!(!state.playing);
    }

    /// A write stuck in the device must not hold the filter lock.
    #[test]
    fn blocked_write_leaves_filter_responsive() {
        let pcm = FormatDescriptor::audio(Subtype::PcmFloat, AudioFormat::float(2, 8000));
        let (source, renderer, device, graph) = pipeline(pcm, GatedDevice::default());
        graph.run().unwrap();
        source
            .push_output(AppSource::OUTPUT, Sample::from_vec(vec![0; 80]))
            .unwrap();
        wait_until(|| device.writes.load(Ordering::SeqCst) == 1);

        let (tx, rx) = mpsc::channel();
        let handle = renderer.clone();
        std::thread::spawn(move || {
            let _ = tx.send(handle.with_impl(|r| r.frames_received()));
        });
        let queried = rx.recv_timeout(Duration::from_secs(5));
        assert_eq!(queried.unwrap().unwrap(), 0);
        graph.pause().unwrap();
        assert_eq!(renderer.state().unwrap(), FilterState::Paused);
        assert!(!device.inner.snapshot().unwrap().playing);

        device.set_open(true);
        wait_until(|| renderer.with_impl(|r| r.frames_received()).unwrap() == 10);
        assert_eq!(renderer.with_impl(|r| r.frames_played()).unwrap().unwrap(), 0);
        graph.run().unwrap();
        assert_eq!(renderer.with_impl(|r| r.frames_played()).unwrap().unwrap(), 10);
        graph.stop().unwrap();
    }

    #[test]
    fn accepts_float_and_s16_pcm_only() {
        let renderer = AudioRenderer::new(MemoryDevice::new());
        let float = FormatDescriptor::audio(Subtype::PcmFloat, AudioFormat::float(2, 48000));
        let s16 = FormatDescriptor::audio(
            Subtype::PcmS16,
            AudioFormat {
                bits_per_sample: 16,
                ..AudioFormat::float(1, 44100)
            },
        );
        let mislabelled = FormatDescriptor::audio(Subtype::PcmS16, AudioFormat::float(1, 44100));
        let vorbis = FormatDescriptor::audio(Subtype::Vorbis, AudioFormat::float(2, 48000));
        assert!(renderer.query_accept(AudioRenderer::INPUT, &float, None).is_ok());
        assert!(renderer.query_accept(AudioRenderer::INPUT, &s16, None).is_ok());
        assert!(renderer.query_accept(AudioRenderer::INPUT, &mislabelled, None).is_err());
        assert!(renderer.query_accept(AudioRenderer::INPUT, &vorbis, None).is_err());
        assert!(renderer.receive_can_block());
    }
}
