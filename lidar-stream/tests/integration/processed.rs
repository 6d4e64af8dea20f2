//! Processed mode: FOV in, Type C table then Type D packets out

use crate::harness::{test_config, wait_until, Client, DEVICE_ID};
use lidar_stream::adapters::{FovResult, ProcessedDataAdapter};
use lidar_stream::config::{AppConfig, TransportKind};
use lidar_stream::core::types::{EntityKind, Timescale};
use lidar_stream::core::PipelineContext;
use lidar_stream::devices::{SyntheticFov, SyntheticSource};
use lidar_stream::error::Error;
use lidar_stream::protocol::{
    CalibrationView, GlobalHeader, PacketType, TypeDView, TYPE_C_LEN, TYPE_D_LEN,
};
use lidar_stream::streaming::StreamerStage;
use std::net::UdpSocket;
use std::time::Duration;

/// Calibration windows for a 3 x 64 image: (2*3-1) x (2*64-1) table, one per row
const WINDOWS: usize = 127;
/// 3 columns of one 64-channel return each
const RETURNS_PER_FOV: usize = 3;

struct Rig {
    ctx: PipelineContext,
    stage: StreamerStage,
    adapter: ProcessedDataAdapter,
    source: SyntheticSource,
}

impl Rig {
    fn new(config: &AppConfig) -> Self {
        let ctx = PipelineContext::from_config(config).unwrap();
        let stage = StreamerStage::start(&ctx, config, 0).unwrap();
        Self {
            adapter: ProcessedDataAdapter::new(ctx.clone()),
            source: SyntheticSource::new(0, &config.mock),
            ctx,
            stage,
        }
    }

    fn push_fov(&mut self) -> SyntheticFov {
        let fov = self.source.next_fov();
        let emitted = self.adapter.process_fov(&fov, &self.stage).unwrap();
        assert_eq!(emitted, RETURNS_PER_FOV);
        fov
    }

    fn drained(&self) -> bool {
        let pool = self.ctx.pool();
        self.stage.queued() == 0
            && pool.in_flight(EntityKind::Chunk) == 0
            && pool.in_flight(EntityKind::ProcessedReturn) == 0
    }
}

fn sequences(packets: &[Vec<u8>]) -> Vec<u32> {
    packets
        .iter()
        .map(|p| TypeDView::new(p).unwrap().sequence())
        .collect()
}

#[test]
fn calibration_table_precedes_first_processed_packet() {
    let config = test_config("processed");
    let mut rig = Rig::new(&config);
    let mut client = Client::connect(rig.stage.local_addr());

    rig.push_fov();
    let packets = client.packets(WINDOWS + RETURNS_PER_FOV);
    assert_eq!(packets.len(), WINDOWS + RETURNS_PER_FOV);

    for (i, packet) in packets[..WINDOWS].iter().enumerate() {
        assert_eq!(packet.len(), TYPE_C_LEN);
        let view = CalibrationView::new(packet).unwrap();
        assert_eq!(view.window_index(), i as u32);
        assert_eq!(view.start_u(), 0);
        assert_eq!(view.start_v(), i as u16);
        assert_eq!((view.end_u(), view.end_v()), (5, 127));
        assert_eq!(view.header().device_id, DEVICE_ID);
    }
    // Window 0 starts in the top-left corner of the field of view
    let first = CalibrationView::new(&packets[0]).unwrap();
    assert_eq!(first.entry(0), (-30 * 3600, -15 * 3600));
    // Past the row end the window is zero padded
    assert_eq!(first.entry(5), (0, 0));

    for packet in &packets[WINDOWS..] {
        assert_eq!(packet.len(), TYPE_D_LEN);
        let header = GlobalHeader::parse(packet).unwrap();
        assert_eq!(header.packet_type, PacketType::Processed);
        assert_eq!(header.device_id, DEVICE_ID);
    }
    assert_eq!(sequences(&packets[WINDOWS..]), vec![0, 1, 2]);
}

#[test]
fn processed_packets_carry_fov_samples() {
    let config = test_config("processed");
    let mut rig = Rig::new(&config);
    let mut client = Client::connect(rig.stage.local_addr());

    let fov = rig.push_fov();
    let packets = client.packets(WINDOWS + RETURNS_PER_FOV);
    let returns: Vec<_> = packets[WINDOWS..]
        .iter()
        .map(|p| TypeDView::new(p).unwrap())
        .collect();

    let (width, _) = fov.image_size();
    let width = width as usize;
    for (column, view) in returns.iter().enumerate() {
        // Every pixel of a column shares the column's ROI
        assert_eq!(view.timestamp(), fov.roi_timestamps()[column]);
        assert_eq!(view.timescale(), Timescale::Utc);

        let geometry = view.geometry();
        assert_eq!((geometry.steer_extent, geometry.stare_extent), (3, 64));
        assert_eq!(geometry.steer_offset, 2 * column as u16);
        assert_eq!(geometry.partial_stare_extent, 64);

        for row in [0usize, 31, 63] {
            let channel = view.channel(row);
            let pixel = row * width + column;
            assert_eq!(channel.range, fov.range()[pixel]);
            assert_eq!(channel.intensity, fov.signal()[pixel]);
            assert!(channel.range_valid && channel.intensity_valid);
        }
    }
    assert!(returns[0].timestamp() < returns[2].timestamp());
}

#[test]
fn sequence_and_scenes_across_frames() {
    let config = test_config("processed");
    let mut rig = Rig::new(&config);
    let mut client = Client::connect(rig.stage.local_addr());

    for _ in 0..3 {
        rig.push_fov();
    }
    let packets = client.packets(WINDOWS + 3 * RETURNS_PER_FOV);
    let returns = &packets[WINDOWS..];
    assert_eq!(sequences(returns), (0..9).collect::<Vec<u32>>());

    let scene = |i: usize| TypeDView::new(&returns[i]).unwrap().scene();
    assert_eq!(scene(0).cur_begin, Some(0));
    assert_eq!(scene(0).prev_end, None);
    assert_eq!(scene(1).cur_end, None);
    assert_eq!(scene(2).cur_end, Some(2));
    assert_eq!((scene(3).prev_begin, scene(3).prev_end), (Some(0), Some(2)));
    assert_eq!(scene(3).cur_begin, Some(3));
    assert_eq!((scene(8).cur_begin, scene(8).cur_end), (Some(6), Some(8)));
}

#[test]
fn chunks_without_client_consume_no_sequence_numbers() {
    let config = test_config("processed");
    let mut rig = Rig::new(&config);

    rig.push_fov();
    assert!(wait_until(|| rig.stage.stats().chunks_dropped == 1));
    assert!(wait_until(|| rig.drained()));

    let mut client = Client::connect(rig.stage.local_addr());
    rig.push_fov();
    let packets = client.packets(WINDOWS + RETURNS_PER_FOV);
    assert_eq!(packets.len(), WINDOWS + RETURNS_PER_FOV);
    assert_eq!(sequences(&packets[WINDOWS..]), vec![0, 1, 2]);
    assert!(wait_until(|| rig.stage.stats().packets_sent == 3));
}

#[test]
fn new_client_supersedes_and_sequence_continues() {
    let config = test_config("processed");
    let mut rig = Rig::new(&config);

    let mut first = Client::connect(rig.stage.local_addr());
    rig.push_fov();
    assert_eq!(first.packets(WINDOWS + RETURNS_PER_FOV).len(), WINDOWS + 3);

    let mut second = Client::connect(rig.stage.local_addr());
    rig.push_fov();
    let packets = second.packets(WINDOWS + RETURNS_PER_FOV);
    assert_eq!(packets.len(), WINDOWS + RETURNS_PER_FOV);
    assert!(CalibrationView::new(&packets[0]).is_some());
    assert_eq!(sequences(&packets[WINDOWS..]), vec![3, 4, 5]);

    assert!(first.wait_closed());
    assert_eq!(rig.stage.stats().connections, 2);
}

#[test]
fn device_id_locked_while_client_attached() {
    let config = test_config("processed");
    let mut rig = Rig::new(&config);
    rig.stage.settings().set_device_id(0x43).unwrap();

    let mut client = Client::connect(rig.stage.local_addr());
    rig.push_fov();
    let packets = client.packets(WINDOWS + RETURNS_PER_FOV);
    assert_eq!(GlobalHeader::parse(&packets[0]).unwrap().device_id, 0x43);

    assert!(matches!(
        rig.stage.settings().set_device_id(0x44),
        Err(Error::ConfigLocked)
    ));
}

#[test]
fn pool_entities_return_after_streaming() {
    let config = test_config("processed");
    let mut rig = Rig::new(&config);
    let mut client = Client::connect(rig.stage.local_addr());

    for _ in 0..5 {
        rig.push_fov();
    }
    assert_eq!(client.packets(WINDOWS + 5 * RETURNS_PER_FOV).len(), WINDOWS + 15);
    assert!(wait_until(|| rig.drained()));

    let pool = rig.ctx.pool();
    assert_eq!(pool.available(EntityKind::Chunk), config.pipeline.chunk_pool);
    assert_eq!(
        pool.available(EntityKind::ProcessedReturn),
        config.pipeline.return_pool
    );
}

#[test]
fn frame_limit_stops_transmission() {
    let mut config = test_config("processed");
    config.pipeline.frame_limit = Some(1);
    let mut rig = Rig::new(&config);
    let mut client = Client::connect(rig.stage.local_addr());

    rig.push_fov();
    rig.push_fov();
    assert!(wait_until(|| rig.drained()));

    let packets = client.packets_within(WINDOWS + 2 * RETURNS_PER_FOV, Duration::from_millis(500));
    assert_eq!(packets.len(), WINDOWS + RETURNS_PER_FOV);
    assert_eq!(rig.stage.stats().packets_sent, 3);
}

#[test]
fn udp_sends_one_packet_per_datagram() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let mut config = test_config("processed");
    config.network.transport = TransportKind::Udp;
    config.network.udp_target = Some(receiver.local_addr().unwrap().to_string());
    let mut rig = Rig::new(&config);
    rig.push_fov();

    let mut lengths = Vec::new();
    let mut buf = [0u8; 2048];
    while lengths.len() < WINDOWS + RETURNS_PER_FOV {
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        lengths.push(n);
    }
    assert!(lengths[..WINDOWS].iter().all(|&n| n == TYPE_C_LEN));
    assert!(lengths[WINDOWS..].iter().all(|&n| n == TYPE_D_LEN));

    // Locked for good once anything went out
    assert!(rig.stage.settings().is_locked());
}
