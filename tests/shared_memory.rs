//! Acquisition client reading frames from an in-process shared memory segment

mod common;

use num_complex::Complex32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use daq_iq_client::config::DataInterface;
use daq_iq_client::error::{Error, TransportError};
use daq_iq_client::events::delivery_queue;
use daq_iq_client::protocol::{FrameHeader, Opcode, HEADER_SIZE};
use daq_iq_client::receiver::frame::encode_samples_f32;
use daq_iq_client::transport::{
    memory_segment, BufferSignal, MemoryProducer, MemorySegment, SharedBufferTransport,
    SharedMemory,
};
use daq_iq_client::{AcquisitionClient, ConnectionState};

/// Segment wrapper counting slot releases
struct CountingSegment {
    inner: MemorySegment,
    releases: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl SharedMemory for CountingSegment {
    fn init(&mut self) -> Result<(), TransportError> {
        self.inner.init()
    }

    fn wait_buffer_free(&mut self) -> Result<BufferSignal, TransportError> {
        self.inner.wait_buffer_free()
    }

    fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.inner.buffer(index)
    }

    fn signal_buffer_ready(&mut self, index: usize) -> Result<(), TransportError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.signal_buffer_ready(index)
    }

    fn destroy(&mut self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.inner.destroy()
    }
}

struct Fixture {
    client: AcquisitionClient,
    producer: MemoryProducer,
    releases: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

fn fixture(sim: &daq_iq_client::sim::FirmwareSimulator, slot_size: usize) -> Fixture {
    let (segment, producer) = memory_segment(slot_size);
    let releases = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let segment = CountingSegment {
        inner: segment,
        releases: releases.clone(),
        destroyed: destroyed.clone(),
    };

    let mut config = config_for(sim);
    config.receiver.interface = DataInterface::SharedMemory;
    config.daq.gain_tenths = 50;
    let (tx, _rx) = delivery_queue();
    let client =
        AcquisitionClient::with_shared_memory(config, SharedBufferTransport::new(segment), tx)
            .unwrap();

    Fixture {
        client,
        producer,
        releases,
        destroyed,
    }
}

fn samples(count: usize) -> Vec<Complex32> {
    (0..count)
        .map(|i| Complex32::new(i as f32, -(i as f32)))
        .collect()
}

#[test]
fn gain_replay_waits_for_first_frame() {
    let sim = simulator(3, 8, 32);
    let mut fx = fixture(&sim, HEADER_SIZE + 3 * 8 * 8);

    fx.client.connect().unwrap();
    assert_eq!(fx.client.state(), ConnectionState::Ready);
    assert_eq!(fx.client.channel_count(), 0);

    // Without a channel count no gain command can be built.
    assert!(matches!(fx.client.set_gain(50, true), Err(Error::NotReady(_))));
    fx.client.init().unwrap().wait(WAIT).unwrap();
    assert!(!opcodes(&sim.received_commands()).contains(&Opcode::Gain));

    let header = FrameHeader::new(3, 8, 32);
    let data = samples(24);
    fx.producer
        .publish_frame(&header, &encode_samples_f32(&data))
        .unwrap();

    let frame = fx.client.get_next_frame().unwrap().unwrap();
    assert_eq!(frame.as_slice(), data.as_slice());
    assert_eq!(fx.client.channel_count(), 3);
    assert_eq!(fx.releases.load(Ordering::SeqCst), 1);

    wait_for("deferred gain", || {
        opcodes(&sim.received_commands()).contains(&Opcode::Gain)
    });
    assert_eq!(sim.gains(3), vec![50, 50, 50]);
}

#[test]
fn terminate_stops_without_release() {
    let sim = simulator(2, 4, 32);
    let mut fx = fixture(&sim, HEADER_SIZE + 2 * 4 * 8);
    fx.client.connect().unwrap();

    let header = FrameHeader::new(2, 4, 32);
    fx.producer
        .publish_frame(&header, &encode_samples_f32(&samples(8)))
        .unwrap();
    fx.producer.terminate();

    assert!(fx.client.get_next_frame().unwrap().is_some());
    let err = fx.client.get_next_frame().unwrap_err();
    assert!(err.is_terminated());
    assert!(!err.is_connection_lost());
    assert_eq!(fx.releases.load(Ordering::SeqCst), 1);

    fx.client.close();
    assert_eq!(fx.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(fx.client.state(), ConnectionState::Disconnected);
}

#[test]
fn empty_and_malformed_frames_release_their_slot() {
    let sim = simulator(2, 4, 32);
    let mut fx = fixture(&sim, HEADER_SIZE + 64);
    fx.client.connect().unwrap();

    fx.producer
        .publish_frame(&FrameHeader::new(2, 0, 32), &[])
        .unwrap();
    assert!(fx.client.get_next_frame().unwrap().is_none());

    fx.producer
        .publish(|slot| {
            slot.fill(0xaa);
            Ok(())
        })
        .unwrap();
    assert!(matches!(
        fx.client.get_next_frame(),
        Err(Error::MalformedHeader(_))
    ));

    assert_eq!(fx.releases.load(Ordering::SeqCst), 2);
    assert_eq!(fx.client.state(), ConnectionState::Ready);
}

#[test]
fn no_data_tokens_in_shared_memory_mode() {
    let sim = simulator(2, 4, 32);
    let mut fx = fixture(&sim, HEADER_SIZE + 64);
    fx.client.connect().unwrap();
    fx.client.init().unwrap().wait(WAIT).unwrap();

    assert_eq!(sim.frames_sent(), 0);
    assert_eq!(fx.client.interface(), DataInterface::SharedMemory);
}
