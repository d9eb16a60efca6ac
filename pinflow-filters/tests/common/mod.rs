// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Pipeline builders shared by the integration tests.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use pinflow::{
    AudioFormat, Filter, FormatDescriptor, Graph, Sample, Subtype, VideoFormat, channel_map,
};
use pinflow_filters::{
    AppSource, AudioDecoder, AudioEncoder, AudioRenderer, CollectHandle, CollectSink,
    ColorConverter, EncoderConfig, MemoryDevice, VideoDecoder, VideoEncoder,
    reference::{
        IdentityAudioDecoder, IdentityAudioEncoder, IdentityVideoDecoder, IdentityVideoEncoder,
    },
};

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: std::sync::Once = std::sync::Once::new();

pub fn setup_test() {
    // Initialize logging once (respects RUST_LOG environment variable)
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_test_writer()
            .init();
    });
}

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds or `TIMEOUT` expires.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 4;

/// 30 frames per second in 100 ns units.
pub const FRAME_DURATION: i64 = 333_333;

/// A solid top-down RGB24 frame of `WIDTH` x `HEIGHT`.
pub fn rgb_frame(index: i64, [r, g, b]: [u8; 3]) -> Sample {
    let pixels: Vec<u8> = (0..WIDTH * HEIGHT).flat_map(|_| [b, g, r]).collect();
    let start = index * FRAME_DURATION;
    Sample::from_vec(pixels).with_time(start, Some(start + FRAME_DURATION))
}

/// source -> converter -> encoder -> decoder -> sink.
pub struct VideoChain {
    pub source: Filter<AppSource>,
    pub converter: Filter<ColorConverter>,
    pub encoder: Filter<VideoEncoder>,
    pub decoder: Filter<VideoDecoder>,
    pub sink: CollectHandle,
    pub graph: Graph,
}

impl VideoChain {
    pub fn build(config: EncoderConfig) -> Self {
        let rgb = FormatDescriptor::video(
            Subtype::Rgb24,
            VideoFormat::new(WIDTH, HEIGHT).with_frame_duration(FRAME_DURATION),
        );
        let source = Filter::new("source", AppSource::new(vec![rgb]));
        let converter = Filter::new("convert", ColorConverter::new());
        let encoder = VideoEncoder::vp8(IdentityVideoEncoder::new(&config))
            .with_config(config)
            .unwrap();
        let encoder = Filter::new("encode", encoder);
        let decoder = Filter::new(
            "decode",
            VideoDecoder::new(IdentityVideoDecoder::new(WIDTH, HEIGHT)),
        );
        let collect = CollectSink::new().accepting(vec![FormatDescriptor::any(Subtype::I420)]);
        let sink = collect.handle();
        let collect = Filter::new("sink", collect);

        let mut graph = Graph::new();
        graph.add(&source);
        graph.add(&converter);
        graph.add(&encoder);
        graph.add(&decoder);
        graph.add(&collect);
        graph
            .connect(&source, AppSource::OUTPUT, &converter, ColorConverter::INPUT, None)
            .unwrap();
        graph
            .connect(&converter, ColorConverter::OUTPUT, &encoder, VideoEncoder::INPUT, None)
            .unwrap();
        graph
            .connect(&encoder, VideoEncoder::OUTPUT, &decoder, VideoDecoder::INPUT, None)
            .unwrap();
        graph
            .connect(&decoder, VideoDecoder::OUTPUT, &collect, CollectSink::INPUT, None)
            .unwrap();
        Self {
            source,
            converter,
            encoder,
            decoder,
            sink,
            graph,
        }
    }
}

/// source -> audio encoder -> audio decoder -> renderer.
pub struct AudioChain {
    pub source: Filter<AppSource>,
    pub renderer: Filter<AudioRenderer>,
    pub device: MemoryDevice,
    pub graph: Graph,
}

impl AudioChain {
    pub fn build(channels: u16, sample_rate: u32, buffer_size: usize) -> Self {
        let pcm = FormatDescriptor::audio(Subtype::PcmFloat, AudioFormat::float(channels, sample_rate));
        let source = Filter::new(
            "source",
            AppSource::new(vec![pcm]).with_buffer_size(buffer_size),
        );
        let encoder = Filter::new(
            "encode",
            AudioEncoder::new(IdentityAudioEncoder::new(channels, sample_rate)),
        );
        let decoder = Filter::new("decode", AudioDecoder::new(IdentityAudioDecoder::new()));
        let device = MemoryDevice::new();
        let renderer = Filter::new("render", AudioRenderer::new(device.clone()));

        let mut graph = Graph::new();
        graph.add(&source);
        graph.add(&encoder);
        graph.add(&decoder);
        graph.add(&renderer);
        graph
            .connect(&source, AppSource::OUTPUT, &encoder, AudioEncoder::INPUT, None)
            .unwrap();
        graph
            .connect(&encoder, AudioEncoder::OUTPUT, &decoder, AudioDecoder::INPUT, None)
            .unwrap();
        graph
            .connect(&decoder, AudioDecoder::OUTPUT, &renderer, AudioRenderer::INPUT, None)
            .unwrap();
        Self {
            source,
            renderer,
            device,
            graph,
        }
    }
}

/// Interleaved PCM bytes where every sample value is distinct.
pub fn pcm_ramp(channels: usize, frames: usize) -> Vec<u8> {
    let values: Vec<f32> = (0..channels * frames).map(|n| n as f32 * 0.25).collect();
    let mut bytes = vec![0; values.len() * 4];
    channel_map::write_f32_le(&values, &mut bytes).unwrap();
    bytes
}
