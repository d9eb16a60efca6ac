// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! # pinflow - streaming pin protocol
//!
//! Building blocks for push-model media pipelines: filters with typed pins,
//! format negotiation, negotiated buffer pools, per-output pump threads and
//! cooperative flush and end-of-stream handling.
//!
//! ## Overview
//!
//! A pipeline is a chain of [`Filter`]s. Each filter exposes input and
//! output pins. Connecting an output to a downstream input negotiates a
//! [`FormatDescriptor`] and a [`BufferPool`] owned by the producer. While
//! the pipeline is active, samples are pushed downstream: an input pin hands
//! each [`Sample`] to the filter's [`FilterImpl`], which appends results to
//! the output pin's [`PendingQueue`]. A pump thread per output pops the
//! queue, copies each sample into a pooled buffer and pushes it on.
//!
//! ### Key Concepts
//!
//! - **Filter**: a processing stage; protocol in [`Filter`], media logic in [`FilterImpl`]
//! - **Pin**: a typed connection point addressed by [`PinId`]
//! - **Format**: negotiated media type, [`FormatDescriptor`]
//! - **Pool**: negotiated set of reusable buffers, [`BufferPool`]
//! - **Pending queue**: per-output FIFO sealed by an end-of-stream sentinel
//! - **Pump**: the thread draining one pending queue
//!
//! ## Architecture
//!
//! ```text
//!  upstream filter                          downstream filter
//! ┌──────────────────────────────┐        ┌─────────────────────────┐
//! │ FilterImpl::receive          │        │                         │
//! │        │                     │        │                         │
//! │        ▼                     │ push   │                         │
//! │ PendingQueue ─► pump thread ─┼───────►│ InputEndpoint::receive  │
//! │                   │          │        │        │                │
//! │                   ▼          │        │        ▼                │
//! │              BufferPool      │        │ FilterImpl::receive ... │
//! └──────────────────────────────┘        └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use pinflow::{Filter, Graph, PinId};
//! # use pinflow::{FilterImpl, FormatList, FormatDescriptor, Outputs, PinTemplate, Sample, Result};
//! # struct Source;
//! # impl FilterImpl for Source {
//! #     fn type_name(&self) -> &'static str { "source" }
//! #     fn pin_templates(&self) -> Vec<PinTemplate> { vec![PinTemplate::output("out")] }
//! #     fn preferred_formats(&self, _: PinId, _: Option<&FormatDescriptor>) -> FormatList { FormatList::new() }
//! #     fn query_accept(&self, _: PinId, _: &FormatDescriptor, _: Option<&FormatDescriptor>) -> Result<()> { Ok(()) }
//! #     fn receive(&mut self, _: PinId, _: Sample, _: &mut Outputs<'_>) -> Result<()> { Ok(()) }
//! # }
//! # struct Sink;
//! # impl FilterImpl for Sink {
//! #     fn type_name(&self) -> &'static str { "sink" }
//! #     fn pin_templates(&self) -> Vec<PinTemplate> { vec![PinTemplate::input("in")] }
//! #     fn preferred_formats(&self, _: PinId, _: Option<&FormatDescriptor>) -> FormatList { FormatList::new() }
//! #     fn query_accept(&self, _: PinId, _: &FormatDescriptor, _: Option<&FormatDescriptor>) -> Result<()> { Ok(()) }
//! #     fn receive(&mut self, _: PinId, _: Sample, _: &mut Outputs<'_>) -> Result<()> { Ok(()) }
//! # }
//!
//! # fn main() -> Result<()> {
//! let source = Filter::new("source", Source);
//! let sink = Filter::new("sink", Sink);
//!
//! let mut graph = Graph::new();
//! graph.add(&source);
//! graph.add(&sink);
//! graph.connect(&source, PinId(0), &sink, PinId(0), None)?;
//! graph.run()?;
//!
//! source.push_output(PinId(0), Sample::from_vec(vec![0; 16]).with_time(0, Some(10)))?;
//! source.push_output_end_of_stream(PinId(0))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Locking
//!
//! Each filter has exactly one mutex guarding its pins, queues and flags.
//! It is never held across a call that can block on another stage: buffer
//! acquisition, a downstream push or an end-of-stream call. Debug builds
//! assert this; see [`lockcheck::held_locks`].
//!
//! ## Flush and end-of-stream
//!
//! End-of-stream travels as a queue sentinel, so samples already queued are
//! delivered first. Flush is cooperative: `begin_flush` propagates
//! downstream before the local pumps are joined, and `end_flush` propagates
//! only after local state is clean. A pump that does not exit in time is
//! reported as [`Error::Timeout`].

mod error;
mod filter;
mod format;
mod graph;
mod pin;
mod pool;
mod queue;
mod sample;
mod task;

pub mod channel_map;
pub mod codec;
pub mod config;
pub mod frame_queue;
pub mod lockcheck;

pub use config::{DeliveryMode, FilterConfig};
pub use error::{Error, Result};
pub use filter::{
    CopyPopulator, Filter, FilterImpl, FilterState, Outputs, Populate, Render, StreamContext,
};
pub use format::{
    AudioFormat, FormatDescriptor, FormatDetails, FormatList, MajorType, PCM_CHUNK_DIVISOR,
    Subtype, VideoFormat, negotiate,
};
pub use graph::{Control, Graph};
pub use pin::{Direction, InputEndpoint, PinId, PinInfo, PinKey, PinTemplate};
pub use pool::{BufferPool, PoolProperties, PoolRequest};
pub use queue::{PendingQueue, Pop, QueueEntry};
pub use sample::{Sample, SampleFlags, SampleTime};
