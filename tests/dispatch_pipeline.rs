//! End-to-end coverage of the capture dispatch path: a producer thread
//! standing in for the audio callback pushes (metadata, payload) pairs
//! through the rings, and the worker drains and delivers them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use duplex_audio_engine::clock::SessionClock;
use duplex_audio_engine::codec::pcm::{CaptureEncoder, CaptureFrame};
use duplex_audio_engine::codec::wav::TakeWriter;
use duplex_audio_engine::dispatch::{
    CaptureConsumer, ConsumerSlot, DispatchChannels, DispatchWorker, TakeSlot,
};

const FRAMES_PER_CALLBACK: usize = 64;

fn collecting_consumer() -> (Arc<dyn CaptureConsumer>, Arc<Mutex<Vec<(CaptureFrame, Bytes)>>>) {
    let seen: Arc<Mutex<Vec<(CaptureFrame, Bytes)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let consumer: Arc<dyn CaptureConsumer> = Arc::new(move |pcm: Bytes, meta: &CaptureFrame| {
        sink.lock().push((*meta, pcm));
    });
    (consumer, seen)
}

fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Drive a mono capture session through the rings and check every frame
/// arrives once, in production order, with its metadata intact.
#[test]
fn frames_flow_in_order_from_producer_to_consumer() {
    let channels = Arc::new(DispatchChannels::new(1 << 16, 1 << 20));
    let running = Arc::new(AtomicBool::new(true));
    let (consumer, seen) = collecting_consumer();
    let consumer_slot: ConsumerSlot = Arc::new(Mutex::new(Some(consumer)));
    let take_slot: TakeSlot = Arc::new(Mutex::new(None));

    let worker = DispatchWorker::spawn(
        channels.clone(),
        running.clone(),
        consumer_slot,
        take_slot,
    )
    .unwrap();

    let total_callbacks = 50u32;
    let producer = {
        let channels = channels.clone();
        thread::spawn(move || {
            let clock = SessionClock::new();
            let session_id = clock.begin_session();
            let mut encoder = CaptureEncoder::new(FRAMES_PER_CALLBACK, Default::default());

            for k in 0..total_callbacks {
                let start_frame = clock.position();
                let sample = k as f32 / 100.0;
                let input = vec![sample; FRAMES_PER_CALLBACK];
                clock.note_capture(start_frame);
                let meta = CaptureFrame {
                    num_frames: FRAMES_PER_CALLBACK as u32,
                    sample_rate: 48_000,
                    channels: 1,
                    output_frame_pos: start_frame,
                    input_frame_pos: clock.input_position(),
                    timestamp_nanos: clock.timestamp_nanos(),
                    session_frame: start_frame,
                    session_id,
                };
                assert!(encoder.encode_and_push(
                    &input,
                    &meta,
                    &channels.meta_ring,
                    &channels.pcm_ring
                ));
                channels.notify();
                clock.advance(FRAMES_PER_CALLBACK as u64);
                clock.add_input_frames(FRAMES_PER_CALLBACK as u64);
                if k % 10 == 0 {
                    thread::sleep(Duration::from_millis(2));
                }
            }
        })
    };
    producer.join().unwrap();

    assert!(wait_for(
        || seen.lock().len() == total_callbacks as usize,
        Duration::from_secs(5)
    ));

    running.store(false, Ordering::Release);
    channels.notify();
    worker.join();

    let seen = seen.lock();
    for (k, (meta, pcm)) in seen.iter().enumerate() {
        assert_eq!(meta.session_frame, (k * FRAMES_PER_CALLBACK) as u64);
        assert_eq!(meta.session_id, 1);
        assert_eq!(pcm.len(), FRAMES_PER_CALLBACK * 2);
        let first = i16::from_le_bytes([pcm[0], pcm[1]]);
        let expected = ((k as f32 / 100.0) * 32767.0).round() as i16;
        assert_eq!(first, expected);
    }
    assert!(channels.meta_ring.is_empty());
    assert!(channels.pcm_ring.is_empty());
}

/// Metadata written fractionally ahead of its payload is not delivered
/// until the payload completes.
#[test]
fn partial_payload_is_not_delivered_early() {
    let channels = Arc::new(DispatchChannels::new(1 << 12, 1 << 12));
    let running = Arc::new(AtomicBool::new(true));
    let (consumer, seen) = collecting_consumer();
    let consumer_slot: ConsumerSlot = Arc::new(Mutex::new(Some(consumer)));
    let take_slot: TakeSlot = Arc::new(Mutex::new(None));

    let worker = DispatchWorker::spawn(
        channels.clone(),
        running.clone(),
        consumer_slot,
        take_slot,
    )
    .unwrap();

    let meta = CaptureFrame {
        num_frames: 8,
        sample_rate: 48_000,
        channels: 1,
        output_frame_pos: 0,
        input_frame_pos: 0,
        timestamp_nanos: 0,
        session_frame: 0,
        session_id: 1,
    };
    assert!(channels.meta_ring.push(&meta.to_bytes()));
    assert!(channels.pcm_ring.push(&[0u8; 6])); // 6 of 16 declared bytes
    channels.notify();

    thread::sleep(Duration::from_millis(120));
    assert!(seen.lock().is_empty());

    assert!(channels.pcm_ring.push(&[0u8; 10]));
    channels.notify();
    assert!(wait_for(|| seen.lock().len() == 1, Duration::from_secs(2)));

    running.store(false, Ordering::Release);
    channels.notify();
    worker.join();
}

/// While a take writer is open it receives the capture exclusively; the
/// finalized file reads back with the pushed samples.
#[test]
fn open_take_captures_exclusively() {
    let dir = std::env::temp_dir().join("duplex-audio-engine-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("pipeline_take.wav");

    let channels = Arc::new(DispatchChannels::new(1 << 12, 1 << 14));
    let running = Arc::new(AtomicBool::new(true));
    let (consumer, seen) = collecting_consumer();
    let consumer_slot: ConsumerSlot = Arc::new(Mutex::new(Some(consumer)));
    let writer = TakeWriter::create(&path, 48_000, 1).unwrap();
    let take_slot: TakeSlot = Arc::new(Mutex::new(Some(writer)));

    let worker = DispatchWorker::spawn(
        channels.clone(),
        running.clone(),
        consumer_slot,
        take_slot.clone(),
    )
    .unwrap();

    let samples: Vec<i16> = (0..32).map(|i| i * 100).collect();
    let meta = CaptureFrame {
        num_frames: samples.len() as u32,
        sample_rate: 48_000,
        channels: 1,
        output_frame_pos: 0,
        input_frame_pos: 0,
        timestamp_nanos: 0,
        session_frame: 0,
        session_id: 1,
    };
    assert!(channels.meta_ring.push(&meta.to_bytes()));
    let payload: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    assert!(channels.pcm_ring.push(&payload));
    channels.notify();

    assert!(wait_for(
        || take_slot.lock().as_ref().map(|w| w.frames_written()) == Some(32),
        Duration::from_secs(2)
    ));
    assert!(seen.lock().is_empty());

    running.store(false, Ordering::Release);
    channels.notify();
    worker.join();

    take_slot.lock().take().unwrap().finalize().unwrap();
    let mut reader = hound::WavReader::open(&path).unwrap();
    let read_back: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_back, samples);
    std::fs::remove_file(&path).ok();
}

/// After stop has joined the worker, nothing is delivered any more.
#[test]
fn no_delivery_after_stop_returns() {
    let channels = Arc::new(DispatchChannels::new(1 << 12, 1 << 12));
    let running = Arc::new(AtomicBool::new(true));
    let (consumer, seen) = collecting_consumer();
    let consumer_slot: ConsumerSlot = Arc::new(Mutex::new(Some(consumer)));
    let take_slot: TakeSlot = Arc::new(Mutex::new(None));

    let worker = DispatchWorker::spawn(
        channels.clone(),
        running.clone(),
        consumer_slot,
        take_slot,
    )
    .unwrap();

    running.store(false, Ordering::Release);
    channels.notify();
    worker.join();

    let meta = CaptureFrame {
        num_frames: 1,
        sample_rate: 48_000,
        channels: 1,
        output_frame_pos: 0,
        input_frame_pos: 0,
        timestamp_nanos: 0,
        session_frame: 0,
        session_id: 2,
    };
    channels.meta_ring.push(&meta.to_bytes());
    channels.pcm_ring.push(&[0u8; 2]);
    channels.notify();

    thread::sleep(Duration::from_millis(120));
    assert!(seen.lock().is_empty());
    // The pair stays queued for the next session's worker to discard.
    assert!(!channels.meta_ring.is_empty());
}
