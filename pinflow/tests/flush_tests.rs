// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for flush and end-of-stream coordination.

mod common;

use common::{
    Event, PASS_IN, PASS_OUT, PassThrough, Probe, TestSource, setup_test, tagged, video,
    wait_until,
};
use pinflow::{Error, Filter, Graph, PinId, Subtype};

const OUT: PinId = PinId(0);

fn source() -> Filter<TestSource> {
    Filter::new("source", TestSource::new(vec![video(Subtype::I420)]))
}

/// After a flush the queue is empty, flags are clear and exactly one pump
/// runs again.
#[test]
fn flush_drains_cleanly() {
    setup_test();
    let src = source();
    let probe = Probe::new(vec![Subtype::I420]);
    probe.set_open(false);
    src.connect(OUT, probe.endpoint(), None).unwrap();
    src.run().unwrap();

    src.push_output(OUT, tagged(1)).unwrap();
    assert!(wait_until(|| probe.with_state(|s| s.entered_receive) == 1));
    for tag in 2..=4 {
        src.push_output(OUT, tagged(tag)).unwrap();
    }
    assert_eq!(src.pending_len(OUT).unwrap(), 3);

    // The blocked downstream receive is released by the propagated flush.
    src.begin_flush().unwrap();
    assert_eq!(src.pending_len(OUT).unwrap(), 0);
    assert!(!src.pump_running(OUT).unwrap());
    assert!(matches!(
        src.push_output(OUT, tagged(5)),
        Err(Error::RejectedFlushing)
    ));

    src.end_flush().unwrap();
    assert_eq!(src.pending_len(OUT).unwrap(), 0);
    assert!(!src.is_done(OUT).unwrap());
    assert!(src.pump_running(OUT).unwrap());

    probe.set_open(true);
    src.push_output(OUT, tagged(6)).unwrap();
    assert!(wait_until(|| probe.samples() == vec![6]));
    assert_eq!(
        probe.events(),
        vec![Event::BeginFlush, Event::EndFlush, Event::Sample(6)]
    );
    assert!(
        probe
            .with_state(|s| s.held.clone())
            .iter()
            .all(|count| *count == 0)
    );
    src.stop().unwrap();
}

#[test]
fn flush_propagates_through_chain() {
    setup_test();
    let src = source();
    let pass = Filter::new("pass", PassThrough::default());
    let probe = Probe::new(vec![Subtype::I420]);
    let mut graph = Graph::new();
    graph.add(&src);
    graph.add(&pass);
    graph.connect(&src, OUT, &pass, PASS_IN, None).unwrap();
    pass.connect(PASS_OUT, probe.endpoint(), None).unwrap();
    graph.run().unwrap();

    src.push_output(OUT, tagged(1)).unwrap();
    assert!(wait_until(|| probe.samples() == vec![1]));

    src.begin_flush().unwrap();
    let input = pass.input(PASS_IN).unwrap();
    assert!(matches!(
        input.receive(tagged(9)),
        Err(Error::RejectedFlushing)
    ));
    assert!(matches!(
        input.end_of_stream(),
        Err(Error::RejectedFlushing)
    ));
    assert!(!pass.pump_running(PASS_OUT).unwrap());

    src.end_flush().unwrap();
    assert_eq!(pass.with_impl(|p| p.flushes).unwrap(), 1);
    assert!(pass.pump_running(PASS_OUT).unwrap());

    input.receive(tagged(2)).unwrap();
    src.push_output(OUT, tagged(3)).unwrap();
    src.push_output_end_of_stream(OUT).unwrap();
    assert!(wait_until(|| probe.ends() == 1));
    assert_eq!(
        probe.events(),
        vec![
            Event::Sample(1),
            Event::BeginFlush,
            Event::EndFlush,
            Event::Sample(2),
            Event::Sample(3),
            Event::EndOfStream,
        ]
    );
    graph.stop().unwrap();
}

/// A flush rewinds the stream: end-of-stream no longer applies afterwards.
#[test]
fn flush_clears_end_of_stream() {
    setup_test();
    let src = source();
    let pass = Filter::new("pass", PassThrough::default());
    let probe = Probe::new(vec![Subtype::I420]);
    src.connect(OUT, pass.input(PASS_IN).unwrap(), None).unwrap();
    pass.connect(PASS_OUT, probe.endpoint(), None).unwrap();
    pass.run().unwrap();
    src.run().unwrap();

    src.push_output_end_of_stream(OUT).unwrap();
    assert!(wait_until(|| probe.ends() == 1));
    let input = pass.input(PASS_IN).unwrap();
    assert!(matches!(input.receive(tagged(1)), Err(Error::RejectedEos)));

    src.begin_flush().unwrap();
    src.end_flush().unwrap();

    src.push_output(OUT, tagged(2)).unwrap();
    src.push_output_end_of_stream(OUT).unwrap();
    assert!(wait_until(|| probe.ends() == 2));
    assert_eq!(probe.samples(), vec![2]);

    src.stop().unwrap();
    pass.stop().unwrap();
}

#[test]
fn flush_while_stopped_starts_no_pump() {
    setup_test();
    let src = source();
    let probe = Probe::new(vec![Subtype::I420]);
    src.connect(OUT, probe.endpoint(), None).unwrap();

    src.begin_flush().unwrap();
    assert!(matches!(
        src.push_output(OUT, tagged(1)),
        Err(Error::WrongState(_))
    ));
    src.end_flush().unwrap();
    assert!(!src.pump_running(OUT).unwrap());
    assert_eq!(probe.events(), vec![Event::BeginFlush, Event::EndFlush]);
}

#[test]
fn flush_requires_connected_input() {
    setup_test();
    let pass = Filter::new("pass", PassThrough::default());
    let input = pass.input(PASS_IN).unwrap();
    assert!(matches!(input.begin_flush(), Err(Error::NotConnected)));
    assert!(matches!(input.end_flush(), Err(Error::NotConnected)));
}

/// A failed codec reset still ends the flush downstream, then ends the
/// stream instead of leaving it half flushed.
#[test]
fn failed_flush_still_ends_downstream_flush() {
    setup_test();
    let src = source();
    let pass = Filter::new(
        "pass",
        PassThrough {
            fail_flush: true,
            ..PassThrough::default()
        },
    );
    let probe = Probe::new(vec![Subtype::I420]);
    src.connect(OUT, pass.input(PASS_IN).unwrap(), None).unwrap();
    pass.connect(PASS_OUT, probe.endpoint(), None).unwrap();
    pass.run().unwrap();

    let input = pass.input(PASS_IN).unwrap();
    input.receive(tagged(1)).unwrap();
    assert!(wait_until(|| probe.samples() == vec![1]));

    input.begin_flush().unwrap();
    assert!(matches!(input.end_flush(), Err(Error::Codec(_))));
    assert!(!probe.with_state(|s| s.flushing));
    assert!(pass.pump_running(PASS_OUT).unwrap());
    assert!(wait_until(|| probe.ends() == 1));
    assert_eq!(
        probe.events(),
        vec![
            Event::Sample(1),
            Event::BeginFlush,
            Event::EndFlush,
            Event::EndOfStream,
        ]
    );
    assert!(matches!(
        input.receive(tagged(2)),
        Err(Error::DeliveryHalted)
    ));
    pass.stop().unwrap();
}

#[test]
fn failed_source_flush_ends_stream() {
    setup_test();
    let src = source();
    let probe = Probe::new(vec![Subtype::I420]);
    src.connect(OUT, probe.endpoint(), None).unwrap();
    src.run().unwrap();
    src.with_impl(|s| s.fail_flush = true).unwrap();

    src.begin_flush().unwrap();
    assert!(matches!(src.end_flush(), Err(Error::Codec(_))));
    assert!(wait_until(|| probe.ends() == 1));
    assert!(matches!(
        src.push_output(OUT, tagged(1)),
        Err(Error::RejectedEos)
    ));
    assert_eq!(
        probe.events(),
        vec![Event::BeginFlush, Event::EndFlush, Event::EndOfStream]
    );
    src.stop().unwrap();
}
