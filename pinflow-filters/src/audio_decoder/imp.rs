// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

use pinflow::{
    AudioFormat, Error, FilterImpl, FormatDescriptor, FormatList, Outputs, PCM_CHUNK_DIVISOR,
    PinId, PinTemplate, PoolProperties, Result, Sample, SampleFlags, SampleTime, StreamContext,
    Subtype,
    channel_map::{channel_mask, interleave, write_f32_le},
    codec::{AudioDecoderCodec, PlanarAudio},
};
use tracing::{debug, info, trace};

/// Lower bound on the output pool size.
pub const MIN_OUTPUT_BUFFERS: usize = 3;

/// Float PCM layout for a compressed stream's channel count and rate.
fn pcm_format(stream: &AudioFormat) -> AudioFormat {
    let mut pcm = AudioFormat::float(stream.channels, stream.sample_rate);
    let mask = channel_mask(stream.channels as usize);
    pcm.channel_mask = (mask != 0).then_some(mask);
    pcm
}

fn chunk_frames(rate: u32) -> usize {
    (rate as usize / PCM_CHUNK_DIVISOR).max(1)
}

/// Running state of one decoded stream.
#[derive(Debug)]
struct Stream {
    pcm: AudioFormat,
    /// Decoded frames not yet emitted, codec channel order
    pending: PlanarAudio,
    /// Start time of the first timed input since start or flush
    first_time: Option<i64>,
    /// Frames emitted since `first_time`
    emitted: u64,
    discontinuity: bool,
}

impl Stream {
    fn new(pcm: AudioFormat) -> Self {
        let pending = PlanarAudio::new(pcm.channels as usize);
        Self {
            pcm,
            pending,
            first_time: None,
            emitted: 0,
            discontinuity: true,
        }
    }

    fn reset(&mut self) {
        self.pending = PlanarAudio::new(self.pcm.channels as usize);
        self.first_time = None;
        self.emitted = 0;
        self.discontinuity = true;
    }

    /// Moves the first `frames` pending frames into an interleaved sample.
    fn take_chunk(&mut self, frames: usize) -> Result<Sample> {
        let values = interleave(&self.pending.channels, 0..frames)?;
        for plane in &mut self.pending.channels {
            plane.drain(..frames);
        }
        let mut sample = Sample::with_capacity(frames * self.pcm.block_align())?;
        let written = write_f32_le(&values, sample.buffer_mut())?;
        sample.set_actual_len(written)?;

        let first = self.first_time.unwrap_or(0);
        let start = first + self.pcm.frames_to_ticks(self.emitted);
        self.emitted += frames as u64;
        let stop = first + self.pcm.frames_to_ticks(self.emitted);
        sample.set_time(Some(SampleTime::new(start, Some(stop))));
        sample.set_flags(SampleFlags {
            sync_point: true,
            preroll: false,
            discontinuity: std::mem::take(&mut self.discontinuity),
        });
        Ok(sample)
    }
}

/// Vorbis to float PCM decoder.
pub struct AudioDecoder {
    codec: Box<dyn AudioDecoderCodec>,
    stream: Option<Stream>,
}

impl AudioDecoder {
    pub const INPUT: PinId = PinId(0);
    pub const OUTPUT: PinId = PinId(1);

    pub fn new(codec: impl AudioDecoderCodec + 'static) -> Self {
        Self {
            codec: Box::new(codec),
            stream: None,
        }
    }

    /// Emits every whole chunk, plus the remainder when `drain` is set.
    fn emit(stream: &mut Stream, outputs: &mut Outputs<'_>, drain: bool) -> Result<()> {
        let chunk = chunk_frames(stream.pcm.sample_rate);
        let connected = outputs.is_connected(Self::OUTPUT);
        loop {
            let available = stream.pending.frames()?;
            let frames = match available {
                0 => break,
                n if n >= chunk => chunk,
                n if drain => n,
                _ => break,
            };
            let sample = stream.take_chunk(frames)?;
            if connected {
                trace!("Queuing {} frames: {:?}", frames, sample);
                outputs.push(Self::OUTPUT, sample)?;
            }
        }
        Ok(())
    }
}

impl FilterImpl for AudioDecoder {
    fn type_name(&self) -> &'static str {
        "audio-decoder"
    }

    fn pin_templates(&self) -> Vec<PinTemplate> {
        vec![PinTemplate::input("in"), PinTemplate::output("out")]
    }

    fn preferred_formats(&self, pin: PinId, upstream: Option<&FormatDescriptor>) -> FormatList {
        match upstream.and_then(FormatDescriptor::audio_details) {
            Some(stream) if pin == Self::OUTPUT => {
                vec![FormatDescriptor::audio(Subtype::PcmFloat, pcm_format(stream))].into()
            }
            _ => FormatList::new(),
        }
    }

    fn query_accept(
        &self,
        pin: PinId,
        format: &FormatDescriptor,
        upstream: Option<&FormatDescriptor>,
    ) -> Result<()> {
        if pin == Self::INPUT {
            let headers = format.codec_private.as_deref().unwrap_or_default();
            return match format.audio_details() {
                Some(audio)
                    if format.subtype == Subtype::Vorbis
                        && audio.channels > 0
                        && audio.sample_rate > 0
                        && !headers.is_empty() =>
                {
                    Ok(())
                }
                _ => Err(Error::NoAcceptableFormat),
            };
        }
        match (
            format.audio_details(),
            upstream.and_then(FormatDescriptor::audio_details),
        ) {
            (Some(pcm), Some(stream))
                if format.subtype == Subtype::PcmFloat
                    && pcm.bits_per_sample == 32
                    && pcm.channels == stream.channels
                    && pcm.sample_rate == stream.sample_rate =>
            {
                Ok(())
            }
            _ => Err(Error::NoAcceptableFormat),
        }
    }

    fn pool_requirements(&self, _pin: PinId, format: &FormatDescriptor) -> PoolProperties {
        let buffer_size = format.audio_details().map_or(0, |pcm| {
            chunk_frames(pcm.sample_rate) * pcm.block_align()
        });
        PoolProperties {
            buffer_count: MIN_OUTPUT_BUFFERS,
            buffer_size,
            alignment: 1,
            prefix: 0,
        }
    }

    fn start(&mut self, context: &StreamContext) -> Result<()> {
        let input = context.format(Self::INPUT).ok_or(Error::NotConnected)?;
        let stream = input
            .audio_details()
            .ok_or_else(|| Error::InvalidArg("compressed audio format without details".into()))?;
        self.codec.restart()?;
        self.codec.configure(input.codec_private.as_deref())?;
        let pcm = pcm_format(stream);
        info!(
            "Decoding {:?} with {} channels at {} Hz",
            input.subtype, pcm.channels, pcm.sample_rate
        );
        self.stream = Some(Stream::new(pcm));
        Ok(())
    }

    fn stop(&mut self) {
        self.stream = None;
    }

    fn receive(&mut self, _pin: PinId, sample: Sample, outputs: &mut Outputs<'_>) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        if stream.first_time.is_none() {
            match sample.time() {
                Some(time) if time.start >= 0 => {
                    debug!("Audio timeline starts at {}", time.start);
                    stream.first_time = Some(time.start);
                }
                _ => {
                    trace!("Skipping untimed packet before the first timestamp");
                    return Ok(());
                }
            }
        }
        if sample.flags().discontinuity {
            stream.discontinuity = true;
        }

        let decoded = self.codec.decode(sample.payload())?;
        if !decoded.is_empty() {
            stream.pending.append(decoded)?;
        }
        Self::emit(stream, outputs, false)
    }

    fn end_of_stream(&mut self, _pin: PinId, outputs: &mut Outputs<'_>) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        debug!("Draining {} frames at end-of-stream", stream.pending.frames()?);
        Self::emit(stream, outputs, true)
    }

    fn flush(&mut self) -> Result<()> {
        self.codec.restart()?;
        if let Some(stream) = self.stream.as_mut() {
            stream.reset();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use pinflow::{Filter, Graph, InputEndpoint, channel_map::read_f32_le};

    use super::*;
    use crate::{
        AppSource, CollectHandle, CollectSink,
        reference::{IdentityAudioDecoder, audio_headers},
    };

    const WAIT: Duration = Duration::from_secs(5);

    /// 80 Hz keeps chunks at ten frames.
    const RATE: u32 = 80;

    fn vorbis(channels: u16) -> FormatDescriptor {
        FormatDescriptor::audio(Subtype::Vorbis, AudioFormat::float(channels, RATE))
            .with_codec_private(audio_headers(channels, RATE))
    }

    /// Identity packet: planar f32 little-endian, one plane after another.
    fn packet(planes: &[Vec<f32>]) -> Vec<u8> {
        planes
            .iter()
            .flatten()
            .flat_map(|value| value.to_le_bytes())
            .collect()
    }

    /// Stereo planes where left is `n` and right is `-n` for frame `n`.
    fn stereo(from: usize, frames: usize) -> Vec<Vec<f32>> {
        let left: Vec<f32> = (from..from + frames).map(|n| n as f32).collect();
        let right = left.iter().map(|v| -v).collect();
        vec![left, right]
    }

    struct Rig {
        input: Arc<dyn InputEndpoint>,
        sink: CollectHandle,
        _decoder: Filter<AudioDecoder>,
        _graph: Graph,
    }

    fn pipeline(channels: u16) -> Rig {
        let source = Filter::new("source", AppSource::new(vec![vorbis(channels)]));
        let decoder = Filter::new("decoder", AudioDecoder::new(IdentityAudioDecoder::new()));
        let collect = CollectSink::new();
        let sink = collect.handle();
        let collect = Filter::new("sink", collect);
        let mut graph = Graph::new();
        graph.add(&source);
        graph.add(&decoder);
        graph.add(&collect);
        graph
            .connect(&source, AppSource::OUTPUT, &decoder, AudioDecoder::INPUT, None)
            .unwrap();
        graph
            .connect(&decoder, AudioDecoder::OUTPUT, &collect, CollectSink::INPUT, None)
            .unwrap();
        graph.run().unwrap();
        Rig {
            input: decoder.input(AudioDecoder::INPUT).unwrap(),
            sink,
            _decoder: decoder,
            _graph: graph,
        }
    }

    #[test]
    fn chunks_and_remainder_are_timed_from_first_input() {
        let rig = pipeline(2);
        rig.input
            .receive(Sample::from_vec(packet(&stereo(0, 25))).with_time(1000, None))
            .unwrap();
        rig.input.end_of_stream().unwrap();
        let collected = rig.sink.wait_for_end_of_stream(1, WAIT).unwrap();

        let format = collected.format.unwrap();
        assert_eq!(format.subtype, Subtype::PcmFloat);
        assert_eq!(format.audio_details().unwrap().channel_mask, Some(0x3));

        let lens: Vec<usize> = collected.samples.iter().map(|s| s.data.len()).collect();
        assert_eq!(lens, vec![80, 80, 40]);
        let times: Vec<(i64, Option<i64>)> = collected
            .samples
            .iter()
            .filter_map(|s| s.time.map(|t| (t.start, t.stop)))
            .collect();
        assert_eq!(
            times,
            vec![
                (1000, Some(1_251_000)),
                (1_251_000, Some(2_501_000)),
                (2_501_000, Some(3_126_000)),
            ]
        );
        assert!(collected.samples[0].flags.discontinuity);
        assert!(!collected.samples[1].flags.discontinuity);

        let first = read_f32_le(&collected.samples[0].data).unwrap();
        assert_eq!(&first[..4], &[0.0, -0.0, 1.0, -1.0]);
    }

    #[test]
    fn surround_is_interleaved_in_wire_order() {
        let rig = pipeline(3);
        // Codec order L, C, R.
        let planes = vec![vec![1.0; 10], vec![2.0; 10], vec![3.0; 10]];
        rig.input
            .receive(Sample::from_vec(packet(&planes)).with_time(0, None))
            .unwrap();
        let collected = rig.sink.wait_for_samples(1, WAIT).unwrap();
        let values = read_f32_le(&collected.samples[0].data).unwrap();
        assert_eq!(&values[..3], &[1.0, 3.0, 2.0]);
        let format = collected.format.unwrap();
        assert_eq!(format.audio_details().unwrap().channel_mask, Some(0x7));
    }

    #[test]
    fn untimed_packets_before_first_timestamp_are_skipped() {
        let rig = pipeline(2);
        rig.input
            .receive(Sample::from_vec(packet(&stereo(0, 10))))
            .unwrap();
        rig.input
            .receive(Sample::from_vec(packet(&stereo(100, 10))).with_time(500, None))
            .unwrap();
        rig.input.end_of_stream().unwrap();
        let collected = rig.sink.wait_for_end_of_stream(1, WAIT).unwrap();
        assert_eq!(collected.samples.len(), 1);
        assert_eq!(collected.samples[0].time.map(|t| t.start), Some(500));
        let values = read_f32_le(&collected.samples[0].data).unwrap();
        assert_eq!(values[0], 100.0);
    }

    #[test]
    fn flush_restarts_the_timeline() {
        let rig = pipeline(2);
        rig.input
            .receive(Sample::from_vec(packet(&stereo(0, 15))).with_time(0, None))
            .unwrap();
        rig.sink.wait_for_samples(1, WAIT).unwrap();
        rig.input.begin_flush().unwrap();
        rig.input.end_flush().unwrap();
        rig.input
            .receive(Sample::from_vec(packet(&stereo(0, 10))).with_time(9000, None))
            .unwrap();
        rig.input.end_of_stream().unwrap();
        let collected = rig.sink.wait_for_end_of_stream(1, WAIT).unwrap();

        // The five frames pending at the flush are gone.
        assert_eq!(collected.samples.len(), 2);
        let after = &collected.samples[1];
        assert_eq!(after.time.map(|t| t.start), Some(9000));
        assert!(after.flags.discontinuity);
    }

    #[test]
    fn input_needs_stream_headers() {
        let decoder = AudioDecoder::new(IdentityAudioDecoder::new());
        let bare = FormatDescriptor::audio(Subtype::Vorbis, AudioFormat::float(2, RATE));
        assert!(matches!(
            decoder.query_accept(AudioDecoder::INPUT, &bare, None),
            Err(Error::NoAcceptableFormat)
        ));
        assert!(decoder.query_accept(AudioDecoder::INPUT, &vorbis(2), None).is_ok());
    }

    #[test]
    fn output_pool_holds_one_chunk_per_buffer() {
        let decoder = AudioDecoder::new(IdentityAudioDecoder::new());
        let pcm = FormatDescriptor::audio(Subtype::PcmFloat, AudioFormat::float(2, 48000));
        let props = decoder.pool_requirements(AudioDecoder::OUTPUT, &pcm);
        assert!(props.buffer_count >= MIN_OUTPUT_BUFFERS);
        assert_eq!(props.buffer_size, 6000 * 8);
    }
}
