// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Test filters and a probing consumer endpoint shared by the integration
//! tests.

#![allow(dead_code)]

use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use pinflow::{
    Error, FilterImpl, FormatDescriptor, FormatList, InputEndpoint, Outputs, PinId, PinKey,
    PinTemplate, PoolRequest, Result, Sample, SampleFlags, Subtype, VideoFormat, lockcheck,
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

pub fn video(subtype: Subtype) -> FormatDescriptor {
    FormatDescriptor::video(subtype, VideoFormat::new(4, 2))
}

pub fn tagged(tag: u8) -> Sample {
    Sample::from_vec(vec![tag; 4]).with_time(tag as i64 * 10, Some(tag as i64 * 10 + 10))
}

/// Output-only filter offering a fixed ranked list of formats.
pub struct TestSource {
    pub formats: Vec<FormatDescriptor>,
    pub fail_flush: bool,
}

impl TestSource {
    pub fn new(formats: Vec<FormatDescriptor>) -> Self {
        Self {
            formats,
            fail_flush: false,
        }
    }
}

impl FilterImpl for TestSource {
    fn type_name(&self) -> &'static str {
        "test-source"
    }

    fn pin_templates(&self) -> Vec<PinTemplate> {
        vec![PinTemplate::output("out")]
    }

    fn preferred_formats(&self, _pin: PinId, _upstream: Option<&FormatDescriptor>) -> FormatList {
        self.formats.iter().cloned().collect()
    }

    fn query_accept(
        &self,
        _pin: PinId,
        format: &FormatDescriptor,
        _upstream: Option<&FormatDescriptor>,
    ) -> Result<()> {
        if self.formats.iter().any(|f| f.is_compatible(format)) {
            Ok(())
        } else {
            Err(Error::NoAcceptableFormat)
        }
    }

    fn receive(&mut self, _pin: PinId, _sample: Sample, _outputs: &mut Outputs<'_>) -> Result<()> {
        Err(Error::InvalidArg("source has no inputs".into()))
    }

    fn flush(&mut self) -> Result<()> {
        if self.fail_flush {
            return Err(Error::Codec("codec reset failed".into()));
        }
        Ok(())
    }
}

/// One input, one output; forwards samples unchanged in the input format.
#[derive(Default)]
pub struct PassThrough {
    pub fail_with_codec_error: bool,
    pub fail_flush: bool,
    pub received: usize,
    pub flushes: usize,
    pub drained: usize,
}

pub const PASS_IN: PinId = PinId(0);
pub const PASS_OUT: PinId = PinId(1);

impl FilterImpl for PassThrough {
    fn type_name(&self) -> &'static str {
        "pass-through"
    }

    fn pin_templates(&self) -> Vec<PinTemplate> {
        vec![PinTemplate::input("in"), PinTemplate::output("out")]
    }

    fn preferred_formats(&self, _pin: PinId, upstream: Option<&FormatDescriptor>) -> FormatList {
        upstream.cloned().into_iter().collect()
    }

    fn query_accept(
        &self,
        pin: PinId,
        format: &FormatDescriptor,
        upstream: Option<&FormatDescriptor>,
    ) -> Result<()> {
        match (pin, upstream) {
            (PASS_OUT, Some(upstream)) if upstream == format => Ok(()),
            (PASS_OUT, _) => Err(Error::NoAcceptableFormat),
            _ if format.subtype.is_compressed() => Err(Error::NoAcceptableFormat),
            _ => Ok(()),
        }
    }

    fn receive(&mut self, _pin: PinId, sample: Sample, outputs: &mut Outputs<'_>) -> Result<()> {
        if self.fail_with_codec_error {
            return Err(Error::Codec("forced failure".into()));
        }
        self.received += 1;
        outputs.push(PASS_OUT, sample)
    }

    fn end_of_stream(&mut self, _pin: PinId, _outputs: &mut Outputs<'_>) -> Result<()> {
        self.drained += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        if self.fail_flush {
            return Err(Error::Codec("codec reset failed".into()));
        }
        Ok(())
    }
}

/// What a [`Probe`] observed, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Sample(u8),
    EndOfStream,
    BeginFlush,
    EndFlush,
}

#[derive(Default)]
pub struct ProbeState {
    pub connected: Option<(PinKey, FormatDescriptor)>,
    pub disconnects: usize,
    pub events: Vec<Event>,
    pub flags: Vec<SampleFlags>,
    /// `lockcheck::held_locks()` at entry of every streaming call.
    pub held: Vec<usize>,
    pub threads: Vec<Option<String>>,
    pub entered_receive: usize,
    pub open: bool,
    pub flushing: bool,
    /// Keeps a blocked receive blocked through a flush.
    pub ignore_flush: bool,
    pub refuse: bool,
}

/// A consumer endpoint that records every call it receives.
///
/// Receives block while the gate is closed, and fail while `refuse` is set.
pub struct Probe {
    key: PinKey,
    accepts: Vec<Subtype>,
    request: PoolRequest,
    state: Mutex<ProbeState>,
    changed: Condvar,
}

impl Probe {
    pub fn new(accepts: Vec<Subtype>) -> Arc<Self> {
        Self::with_request(accepts, PoolRequest::default())
    }

    pub fn with_request(accepts: Vec<Subtype>, request: PoolRequest) -> Arc<Self> {
        Arc::new(Self {
            key: PinKey {
                filter: uuid::Uuid::new_v4(),
                pin: PinId(0),
            },
            accepts,
            request,
            state: Mutex::new(ProbeState {
                open: true,
                ..ProbeState::default()
            }),
            changed: Condvar::new(),
        })
    }

    pub fn endpoint(self: &Arc<Self>) -> Arc<dyn InputEndpoint> {
        self.clone()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ProbeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        let result = f(&mut state);
        self.changed.notify_all();
        result
    }

    pub fn set_open(&self, open: bool) {
        self.with_state(|s| s.open = open);
    }

    pub fn events(&self) -> Vec<Event> {
        self.with_state(|s| s.events.clone())
    }

    pub fn samples(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sample(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    pub fn ends(&self) -> usize {
        self.with_state(|s| {
            s.events
                .iter()
                .filter(|e| **e == Event::EndOfStream)
                .count()
        })
    }

    fn record_entry(state: &mut ProbeState) {
        state.held.push(lockcheck::held_locks());
        state
            .threads
            .push(std::thread::current().name().map(str::to_string));
    }
}

impl InputEndpoint for Probe {
    fn key(&self) -> PinKey {
        self.key
    }

    fn query_accept(&self, format: &FormatDescriptor) -> Result<()> {
        if self.accepts.contains(&format.subtype) {
            Ok(())
        } else {
            Err(Error::NoAcceptableFormat)
        }
    }

    fn receive_connection(&self, upstream: PinKey, format: &FormatDescriptor) -> Result<()> {
        self.with_state(|s| {
            if s.connected.is_some() {
                return Err(Error::AlreadyConnected);
            }
            s.connected = Some((upstream, format.clone()));
            Ok(())
        })
    }

    fn disconnect(&self) -> Result<()> {
        self.with_state(|s| {
            s.connected = None;
            s.disconnects += 1;
        });
        Ok(())
    }

    fn allocator_request(&self) -> PoolRequest {
        self.request
    }

    fn receive(&self, sample: Sample) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::record_entry(&mut state);
        state.entered_receive += 1;
        self.changed.notify_all();
        while !state.open && !(state.flushing && !state.ignore_flush) {
            state = self.changed.wait(state).unwrap();
        }
        if state.flushing && !state.ignore_flush {
            return Err(Error::RejectedFlushing);
        }
        if state.refuse {
            return Err(Error::WrongState("probe refuses samples"));
        }
        state.events.push(Event::Sample(sample.payload()[0]));
        state.flags.push(sample.flags());
        Ok(())
    }

    fn end_of_stream(&self) -> Result<()> {
        self.with_state(|s| {
            Self::record_entry(s);
            s.events.push(Event::EndOfStream);
        });
        Ok(())
    }

    fn begin_flush(&self) -> Result<()> {
        self.with_state(|s| {
            Self::record_entry(s);
            s.flushing = true;
            s.events.push(Event::BeginFlush);
        });
        Ok(())
    }

    fn end_flush(&self) -> Result<()> {
        self.with_state(|s| {
            Self::record_entry(s);
            s.flushing = false;
            s.events.push(Event::EndFlush);
        });
        Ok(())
    }
}
