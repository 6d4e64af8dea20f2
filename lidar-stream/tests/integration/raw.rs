//! Raw mode: captures forwarded verbatim, one frame at a time

use crate::harness::{test_config, wait_until, Client};
use lidar_stream::adapters::{RawDataAdapter, RawOutcome};
use lidar_stream::core::types::EntityKind;
use lidar_stream::core::PipelineContext;
use lidar_stream::devices::SyntheticSource;
use lidar_stream::streaming::StreamerStage;

#[test]
fn raw_frames_do_not_interleave() {
    let config = test_config("raw");
    let ctx = PipelineContext::from_config(&config).unwrap();
    let stage = StreamerStage::start(&ctx, &config, 0).unwrap();
    let mut adapter = RawDataAdapter::new(ctx.clone());
    let mut source = SyntheticSource::new(0, &config.mock);
    let mut client = Client::connect(stage.local_addr());

    let frame_a = source.next_raw_frame();
    let frame_b = source.next_raw_frame();
    assert_eq!(frame_a.len(), 3);

    let forward = |adapter: &mut RawDataAdapter, capture: &[u8]| {
        adapter.process_capture(capture, &stage).unwrap()
    };

    assert_eq!(forward(&mut adapter, &frame_a[0]), RawOutcome::Forwarded);
    assert_eq!(forward(&mut adapter, &frame_a[1]), RawOutcome::Forwarded);
    // B announces itself while A is one capture short
    assert_eq!(forward(&mut adapter, &frame_b[0]), RawOutcome::Rejected);
    assert_eq!(forward(&mut adapter, &frame_a[2]), RawOutcome::Forwarded);

    let captures = client.raw_captures(3);
    assert_eq!(captures, frame_a);

    // Once A is streamed and back in the pool, B gets through
    assert!(wait_until(|| adapter.outstanding() == 0));
    for capture in &frame_b {
        assert_eq!(forward(&mut adapter, capture), RawOutcome::Forwarded);
    }
    assert_eq!(client.raw_captures(3), frame_b);

    assert!(wait_until(|| ctx.pool().in_flight(EntityKind::RawCapture) == 0));
    assert_eq!(adapter.frames(), 2);
    assert_eq!(adapter.rejected(), 1);
    assert_eq!(stage.stats().calibration_packets, 0);
}

#[test]
fn raw_captures_dropped_without_client_release_the_gate() {
    let config = test_config("raw");
    let ctx = PipelineContext::from_config(&config).unwrap();
    let stage = StreamerStage::start(&ctx, &config, 0).unwrap();
    let mut adapter = RawDataAdapter::new(ctx.clone());
    let mut source = SyntheticSource::new(0, &config.mock);

    for capture in source.next_raw_frame() {
        adapter.process_capture(&capture, &stage).unwrap();
    }
    assert!(wait_until(|| stage.stats().chunks_dropped == 3));
    assert!(wait_until(|| adapter.outstanding() == 0));

    let next = source.next_raw_frame();
    assert_eq!(
        adapter.process_capture(&next[0], &stage).unwrap(),
        RawOutcome::Forwarded
    );
}
