// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Runs synthetic RGB frames through convert, encode and decode, then
//! prints a JSON summary of what reached the sink.
//!
//! ```text
//! cargo run -p pinflow-filters --example transcode -- --frames 60 --flush-at 20
//! ```

mod common;

use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use pinflow::{Filter, FormatDescriptor, Graph, Sample, Subtype, VideoFormat};
use pinflow_filters::{
    AppSource, CollectSink, ColorConverter, EncoderConfig, VideoDecoder, VideoEncoder,
    reference::{IdentityVideoDecoder, IdentityVideoEncoder},
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// 25 frames per second in 100 ns units.
const FRAME_DURATION: i64 = 400_000;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Codec {
    Vp8,
    Vp9,
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of frames to generate
    #[arg(long, default_value_t = 30)]
    frames: i64,

    #[arg(long, default_value_t = 64)]
    width: u32,

    #[arg(long, default_value_t = 48)]
    height: u32,

    /// Flush the chain after this many frames
    #[arg(long)]
    flush_at: Option<i64>,

    #[arg(long, value_enum, default_value_t = Codec::Vp8)]
    codec: Codec,

    /// JSON encoder configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to wait for end-of-stream at the sink
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[derive(Serialize)]
struct FilterSummary {
    id: Uuid,
    name: String,
    state: String,
}

#[derive(Serialize)]
struct Summary {
    filters: Vec<FilterSummary>,
    converter_output: Option<String>,
    frames_in: i64,
    samples_out: usize,
    bytes_out: usize,
    discontinuities: usize,
    flushes: usize,
    first_start: Option<i64>,
    last_start: Option<i64>,
}

/// A moving diagonal gradient with rows padded to four bytes.
fn gradient(width: u32, height: u32, index: i64) -> Sample {
    let stride = (width as usize * 3 + 3) & !3;
    let mut pixels = vec![0u8; stride * height as usize];
    for (y, row) in pixels.chunks_exact_mut(stride).enumerate() {
        for x in 0..width as usize {
            let base = (x + y + index as usize * 4) as u8;
            row[x * 3..x * 3 + 3].copy_from_slice(&[base, base.wrapping_mul(2), 255 - base]);
        }
    }
    let start = index * FRAME_DURATION;
    Sample::from_vec(pixels).with_time(start, Some(start + FRAME_DURATION))
}

fn main() -> pinflow::Result<()> {
    common::setup_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let config = EncoderConfig::from_json(&std::fs::read_to_string(path)?)?;
            config.validate()?;
            config
        }
        None => EncoderConfig::default(),
    };

    let rgb = FormatDescriptor::video(
        Subtype::Rgb24,
        VideoFormat::new(args.width, args.height).with_frame_duration(FRAME_DURATION),
    );
    let source = Filter::new("source", AppSource::new(vec![rgb]));
    let converter = Filter::new("convert", ColorConverter::new());
    let codec = IdentityVideoEncoder::new(&config);
    let encoder = match args.codec {
        Codec::Vp8 => VideoEncoder::vp8(codec),
        Codec::Vp9 => VideoEncoder::vp9(codec),
    };
    let encoder = Filter::new("encode", encoder.with_config(config)?);
    let decoder = Filter::new(
        "decode",
        VideoDecoder::new(IdentityVideoDecoder::new(args.width, args.height)),
    );
    let collect = CollectSink::new();
    let sink = collect.handle();
    let collect = Filter::new("sink", collect);

    let mut graph = Graph::new();
    graph.add(&source);
    graph.add(&converter);
    graph.add(&encoder);
    graph.add(&decoder);
    graph.add(&collect);
    graph.connect(&source, AppSource::OUTPUT, &converter, ColorConverter::INPUT, None)?;
    graph.connect(&converter, ColorConverter::OUTPUT, &encoder, VideoEncoder::INPUT, None)?;
    graph.connect(&encoder, VideoEncoder::OUTPUT, &decoder, VideoDecoder::INPUT, None)?;
    graph.connect(&decoder, VideoDecoder::OUTPUT, &collect, CollectSink::INPUT, None)?;
    graph.run()?;
    info!(
        "Transcoding {} frames of {}x{} as {:?}",
        args.frames, args.width, args.height, args.codec
    );

    for index in 0..args.frames {
        if args.flush_at == Some(index) {
            info!("Flushing before frame {}", index);
            source.begin_flush()?;
            source.end_flush()?;
        }
        source.push_output(AppSource::OUTPUT, gradient(args.width, args.height, index))?;
    }
    source.push_output_end_of_stream(AppSource::OUTPUT)?;

    let collected = match sink.wait_for_end_of_stream(1, Duration::from_secs(args.timeout)) {
        Ok(collected) => collected,
        Err(e) => {
            warn!("No end of stream at the sink: {}", e);
            sink.snapshot()?
        }
    };

    let filters = graph
        .states()?
        .into_iter()
        .zip([
            source.id(),
            converter.id(),
            encoder.id(),
            decoder.id(),
            collect.id(),
        ])
        .map(|((name, state), id)| FilterSummary {
            id,
            name,
            state: format!("{state:?}"),
        })
        .collect();
    let summary = Summary {
        filters,
        converter_output: converter
            .connection_format(ColorConverter::OUTPUT)?
            .map(|f| format!("{:?}", f.subtype)),
        frames_in: args.frames,
        samples_out: collected.samples.len(),
        bytes_out: collected.samples.iter().map(|s| s.data.len()).sum(),
        discontinuities: collected
            .samples
            .iter()
            .filter(|s| s.flags.discontinuity)
            .count(),
        flushes: collected.flushes,
        first_start: collected.samples.first().and_then(|s| s.time).map(|t| t.start),
        last_start: collected.samples.last().and_then(|s| s.time).map(|t| t.start),
    };
    graph.stop()?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
